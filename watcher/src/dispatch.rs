//! Per-event dispatch: console report or external action.
//!
//! With no action configured, every event is written as a report line to the
//! output sink. With an action, the event's numeric kind and quoted name are
//! passed to the action through an [`ActionRunner`], the loop waits for it to
//! finish, and the captured stdout is forwarded to the output sink.
//!
//! Action failures are confined to the event that triggered them: they are
//! logged, reported on the output sink and returned as
//! [`DispatchOutcome::ActionFailed`], never as an error. Only a failure to
//! write the output sink itself is an error.

use std::fmt;
use std::io::{self, Write};
use std::process::Stdio;

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::types::{EventReport, FileChangeEvent, ReportFormat};

/// External command template run for each dispatched event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionSpec(String);

impl ActionSpec {
    pub fn new(command: impl Into<String>) -> Self {
        Self(command.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors from running an external action.
#[derive(Error, Debug)]
pub enum ActionError {
    /// The process could not be started.
    #[error("failed to start action '{action}': {source}")]
    Spawn {
        action: String,
        #[source]
        source: io::Error,
    },

    /// The process ran but did not exit successfully.
    #[error("action '{action}' exited with {}", describe_exit(*code))]
    Failed { action: String, code: Option<i32> },
}

fn describe_exit(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "no status (terminated by signal)".to_string(),
    }
}

/// Result of a completed action process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionOutput {
    pub stdout: Vec<u8>,
    pub code: Option<i32>,
    pub success: bool,
}

/// Runs an action for one event and waits for it to finish.
#[allow(async_fn_in_trait)]
pub trait ActionRunner {
    /// Runs `action` with the decimal kind code and the event name.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::Spawn`] if the process cannot be started.
    /// A non-zero exit is reported through [`ActionOutput::success`].
    async fn run(
        &self,
        action: &ActionSpec,
        code: u32,
        name: &str,
    ) -> Result<ActionOutput, ActionError>;
}

/// Runs actions through the platform shell.
///
/// On Windows this is `cmd /C <action> <code> "<name>"`; elsewhere
/// `sh -c "<action> <code> '<name>'"`, so the action receives the name as a
/// single argument whatever characters it contains.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellRunner;

impl ShellRunner {
    #[cfg(windows)]
    fn command(action: &ActionSpec, code: u32, name: &str) -> Command {
        let mut command = Command::new("cmd");
        command
            .arg("/C")
            .arg(action.as_str())
            .arg(code.to_string())
            .arg(quote_name(name));
        command
    }

    #[cfg(not(windows))]
    fn command(action: &ActionSpec, code: u32, name: &str) -> Command {
        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(format!("{} {code} {}", action.as_str(), quote_name(name)));
        command
    }
}

impl ActionRunner for ShellRunner {
    async fn run(
        &self,
        action: &ActionSpec,
        code: u32,
        name: &str,
    ) -> Result<ActionOutput, ActionError> {
        let output = Self::command(action, code, name)
            .stdin(Stdio::null())
            .stderr(Stdio::inherit())
            .output()
            .await
            .map_err(|source| ActionError::Spawn {
                action: action.to_string(),
                source,
            })?;

        Ok(ActionOutput {
            stdout: output.stdout,
            code: output.status.code(),
            success: output.status.success(),
        })
    }
}

/// Quotes an event name for the platform shell.
#[cfg(windows)]
#[must_use]
pub fn quote_name(name: &str) -> String {
    format!("{name:?}")
}

/// Quotes an event name for the platform shell.
#[cfg(not(windows))]
#[must_use]
pub fn quote_name(name: &str) -> String {
    format!("'{}'", name.replace('\'', r"'\''"))
}

/// What happened to a dispatched event.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// A report line was written.
    Reported,
    /// The action ran and exited successfully.
    ActionCompleted,
    /// The action could not be started or exited unsuccessfully.
    ActionFailed(ActionError),
}

/// Sends each event to the console or to the configured action.
#[derive(Debug)]
pub struct ActionDispatcher<R, W> {
    action: Option<ActionSpec>,
    runner: R,
    out: W,
    format: ReportFormat,
}

impl<R: ActionRunner, W: Write> ActionDispatcher<R, W> {
    pub fn new(action: Option<ActionSpec>, runner: R, out: W, format: ReportFormat) -> Self {
        Self {
            action,
            runner,
            out,
            format,
        }
    }

    /// The output sink.
    pub fn output(&self) -> &W {
        &self.out
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Dispatches one event.
    ///
    /// # Errors
    ///
    /// Returns an I/O error only if the output sink cannot be written.
    pub async fn dispatch(&mut self, event: &FileChangeEvent) -> io::Result<DispatchOutcome> {
        let Self {
            action,
            runner,
            out,
            format,
        } = self;

        let Some(action) = action.as_ref() else {
            write_report(out, *format, event)?;
            return Ok(DispatchOutcome::Reported);
        };

        info!(action = %action, kind = %event.kind, name = %event.name, "Running action");

        let output = match runner.run(action, event.kind.code(), &event.name).await {
            Ok(output) => output,
            Err(err) => return report_failure(out, event, err),
        };

        out.write_all(&output.stdout)?;
        if !output.success {
            let err = ActionError::Failed {
                action: action.to_string(),
                code: output.code,
            };
            return report_failure(out, event, err);
        }

        debug!(action = %action, "Action completed");
        out.flush()?;
        Ok(DispatchOutcome::ActionCompleted)
    }
}

fn report_failure<W: Write>(
    out: &mut W,
    event: &FileChangeEvent,
    err: ActionError,
) -> io::Result<DispatchOutcome> {
    warn!(name = %event.name, error = %err, "Action failed");
    writeln!(out, "action failed for {}: {err}", event.name)?;
    out.flush()?;
    Ok(DispatchOutcome::ActionFailed(err))
}

fn write_report<W: Write>(
    out: &mut W,
    format: ReportFormat,
    event: &FileChangeEvent,
) -> io::Result<()> {
    match format {
        ReportFormat::Text => writeln!(out, "{} {}", event.kind, event.name)?,
        ReportFormat::Json => {
            serde_json::to_writer(&mut *out, &EventReport::from(event))?;
            writeln!(out)?;
        }
    }
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventKind;
    use std::cell::RefCell;

    /// Records invocations and answers with a canned result.
    #[derive(Default)]
    struct RecordingRunner {
        calls: RefCell<Vec<(u32, String)>>,
        exit_code: i32,
        refuse_spawn: bool,
    }

    impl ActionRunner for RecordingRunner {
        async fn run(
            &self,
            action: &ActionSpec,
            code: u32,
            name: &str,
        ) -> Result<ActionOutput, ActionError> {
            self.calls.borrow_mut().push((code, name.to_string()));
            if self.refuse_spawn {
                return Err(ActionError::Spawn {
                    action: action.to_string(),
                    source: io::Error::new(io::ErrorKind::NotFound, "no such program"),
                });
            }
            Ok(ActionOutput {
                stdout: format!("ran {code} {name}\n").into_bytes(),
                code: Some(self.exit_code),
                success: self.exit_code == 0,
            })
        }
    }

    fn output_text<R: ActionRunner>(dispatcher: &ActionDispatcher<R, Vec<u8>>) -> String {
        String::from_utf8(dispatcher.output().clone()).unwrap()
    }

    #[tokio::test]
    async fn text_report_without_action() {
        let mut dispatcher =
            ActionDispatcher::new(None, RecordingRunner::default(), Vec::new(), ReportFormat::Text);

        let outcome = dispatcher
            .dispatch(&FileChangeEvent::new(EventKind::Added, "a.txt"))
            .await
            .unwrap();

        assert!(matches!(outcome, DispatchOutcome::Reported));
        assert_eq!(output_text(&dispatcher), "added a.txt\n");
        assert!(dispatcher.runner().calls.borrow().is_empty());
    }

    #[tokio::test]
    async fn json_report_without_action() {
        let mut dispatcher =
            ActionDispatcher::new(None, RecordingRunner::default(), Vec::new(), ReportFormat::Json);

        dispatcher
            .dispatch(&FileChangeEvent::new(EventKind::Unknown(7), "x"))
            .await
            .unwrap();

        assert_eq!(
            output_text(&dispatcher),
            "{\"kind\":\"unknown\",\"code\":7,\"name\":\"x\"}\n"
        );
    }

    #[tokio::test]
    async fn action_receives_code_and_name() {
        let mut dispatcher = ActionDispatcher::new(
            Some(ActionSpec::new("notify-me")),
            RecordingRunner::default(),
            Vec::new(),
            ReportFormat::Text,
        );

        let outcome = dispatcher
            .dispatch(&FileChangeEvent::new(EventKind::RenamedNew, "b.txt"))
            .await
            .unwrap();

        assert!(matches!(outcome, DispatchOutcome::ActionCompleted));
        assert_eq!(
            *dispatcher.runner().calls.borrow(),
            vec![(5, "b.txt".to_string())]
        );
        assert_eq!(output_text(&dispatcher), "ran 5 b.txt\n");
    }

    #[tokio::test]
    async fn non_zero_exit_is_reported_not_fatal() {
        let runner = RecordingRunner {
            exit_code: 3,
            ..Default::default()
        };
        let mut dispatcher = ActionDispatcher::new(
            Some(ActionSpec::new("false")),
            runner,
            Vec::new(),
            ReportFormat::Text,
        );

        let outcome = dispatcher
            .dispatch(&FileChangeEvent::new(EventKind::Modified, "c.txt"))
            .await
            .unwrap();

        match outcome {
            DispatchOutcome::ActionFailed(ActionError::Failed { code, .. }) => {
                assert_eq!(code, Some(3));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        let text = output_text(&dispatcher);
        assert!(text.starts_with("ran 3 c.txt\n"));
        assert!(text.contains("action failed for c.txt: action 'false' exited with status 3"));
    }

    #[tokio::test]
    async fn spawn_failure_is_reported_not_fatal() {
        let runner = RecordingRunner {
            refuse_spawn: true,
            ..Default::default()
        };
        let mut dispatcher = ActionDispatcher::new(
            Some(ActionSpec::new("missing")),
            runner,
            Vec::new(),
            ReportFormat::Text,
        );

        let outcome = dispatcher
            .dispatch(&FileChangeEvent::new(EventKind::Added, "d.txt"))
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            DispatchOutcome::ActionFailed(ActionError::Spawn { .. })
        ));
        assert!(output_text(&dispatcher).contains("failed to start action 'missing'"));
    }

    #[test]
    fn exit_description() {
        let err = ActionError::Failed {
            action: "x".to_string(),
            code: None,
        };
        assert_eq!(
            err.to_string(),
            "action 'x' exited with no status (terminated by signal)"
        );
    }

    #[cfg(unix)]
    #[test]
    fn quote_name_escapes_single_quotes() {
        assert_eq!(quote_name("a.txt"), "'a.txt'");
        assert_eq!(quote_name("it's.txt"), r"'it'\''s.txt'");
        assert_eq!(quote_name("a b;$(rm)"), "'a b;$(rm)'");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn shell_runner_passes_arguments() {
        let output = ShellRunner
            .run(&ActionSpec::new("printf '%s|%s\\n'"), 1, "dir/it's a.txt")
            .await
            .unwrap();

        assert!(output.success);
        assert_eq!(String::from_utf8(output.stdout).unwrap(), "1|dir/it's a.txt\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn shell_runner_reports_exit_code() {
        let output = ShellRunner
            .run(&ActionSpec::new("exit 4 #"), 2, "x")
            .await
            .unwrap();

        assert!(!output.success);
        assert_eq!(output.code, Some(4));
    }
}
