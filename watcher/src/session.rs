//! The watch loop.
//!
//! A [`WatchSession`] owns the change subscription, the fill buffer, the
//! compiled filter and the dispatcher. Each cycle waits for one fill, then
//! runs every decoded record through filter and dispatcher in order.
//!
//! ```text
//! open ─▶ Opening ─▶ Waiting ─fill─▶ Draining ─▶ Waiting ─▶ …
//!                      │                  │
//!                      └────── fatal ─────┴──▶ Failed
//! ```

use std::io::{self, Write};

use tracing::{debug, error, info, trace, warn};

use crate::buffer::RawChangeBuffer;
use crate::config::{Config, WatchConfig};
use crate::dispatch::{ActionDispatcher, ActionRunner, DispatchOutcome, ShellRunner};
use crate::error::{Result, WatchError};
use crate::filter::EventFilter;
use crate::parser::NotificationRecordParser;
use crate::source::{ChangeSource, FillStatus, NotifySource};

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Assembled from caller-supplied parts; no cycle has run yet.
    Idle,
    /// Opened by [`WatchSession::open`]: the filter is compiled and the
    /// subscription is held, but the first wait has not started.
    Opening,
    /// Suspended until the source delivers a fill.
    Waiting,
    /// Decoding and dispatching the current fill.
    Draining,
    /// A fatal error ended the session.
    Failed,
}

/// Counters for one pass of the watch loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Records decoded from the fill.
    pub decoded: usize,
    /// Events that passed the filter and reached the dispatcher.
    pub dispatched: usize,
    /// Events rejected by the filter.
    pub filtered_out: usize,
    /// Dispatched events whose action failed.
    pub action_failures: usize,
    /// The source lost events before this fill.
    pub overflowed: bool,
}

/// A running directory watch.
#[derive(Debug)]
pub struct WatchSession<S, R, W> {
    source: S,
    buffer: RawChangeBuffer,
    filter: EventFilter,
    dispatcher: ActionDispatcher<R, W>,
    strict_decode: bool,
    state: SessionState,
}

impl WatchSession<NotifySource, ShellRunner, io::Stdout> {
    /// Opens a session on the platform watcher, reporting to stdout.
    ///
    /// The filter is compiled before the subscription is acquired, so an
    /// invalid pattern never leaves a handle behind.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Pattern`] for an invalid filter pattern and
    /// [`WatchError::Source`] if the directory cannot be watched.
    pub fn open(watch: &WatchConfig, settings: &Config) -> Result<Self> {
        debug!(root = %watch.root.display(), "Opening watch session");

        let filter = EventFilter::new(watch.name_pattern.as_deref())?;
        let source = NotifySource::open(&watch.root, watch.recursive)?;
        let dispatcher = ActionDispatcher::new(
            watch.action.clone(),
            ShellRunner,
            io::stdout(),
            settings.report_format,
        );

        let mut session = Self::with_parts(source, filter, dispatcher, settings);
        session.transition(SessionState::Opening);
        Ok(session)
    }
}

impl<S: ChangeSource, R: ActionRunner, W: Write> WatchSession<S, R, W> {
    /// Assembles a session from already-opened parts.
    pub fn with_parts(
        source: S,
        filter: EventFilter,
        dispatcher: ActionDispatcher<R, W>,
        settings: &Config,
    ) -> Self {
        Self {
            source,
            buffer: RawChangeBuffer::new(settings.buffer_size),
            filter,
            dispatcher,
            strict_decode: settings.strict_decode,
            state: SessionState::Idle,
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The report and action-output sink.
    pub fn output(&self) -> &W {
        self.dispatcher.output()
    }

    pub fn runner(&self) -> &R {
        self.dispatcher.runner()
    }

    /// Capacity of the fill buffer in bytes.
    #[must_use]
    pub fn buffer_capacity(&self) -> usize {
        self.buffer.capacity()
    }

    /// Runs one wait-and-drain pass.
    ///
    /// # Errors
    ///
    /// Source and output errors are fatal and leave the session
    /// [`SessionState::Failed`]. A malformed fill returns
    /// [`WatchError::Decode`] after dispatching the records that preceded
    /// the bad one; the session stays usable unless strict decoding is on.
    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        self.transition(SessionState::Waiting);

        let status = match self.source.next_fill(&mut self.buffer).await {
            Ok(status) => status,
            Err(err) => {
                self.transition(SessionState::Failed);
                return Err(err.into());
            }
        };

        let mut report = CycleReport {
            overflowed: status == FillStatus::Overflowed,
            ..CycleReport::default()
        };

        if report.overflowed {
            warn!(
                bytes = self.buffer.filled_len(),
                "Change notifications were lost; continuing with the records that arrived"
            );
        }

        if self.buffer.is_empty() {
            trace!("Empty fill");
            return Ok(report);
        }

        self.transition(SessionState::Draining);
        let drained = self.drain(&mut report).await;

        match drained {
            Ok(()) => {
                debug!(
                    decoded = report.decoded,
                    dispatched = report.dispatched,
                    filtered_out = report.filtered_out,
                    action_failures = report.action_failures,
                    "Fill drained"
                );
                self.transition(SessionState::Waiting);
                Ok(report)
            }
            Err(err) => {
                if err.is_fatal(self.strict_decode) {
                    self.transition(SessionState::Failed);
                } else {
                    self.transition(SessionState::Waiting);
                }
                Err(err)
            }
        }
    }

    /// Runs cycles until a fatal error occurs and returns that error.
    pub async fn run(&mut self) -> WatchError {
        loop {
            match self.run_cycle().await {
                Ok(report) => trace!(?report, "Cycle complete"),
                Err(err) if !err.is_fatal(self.strict_decode) => {}
                Err(err) => {
                    self.transition(SessionState::Failed);
                    return err;
                }
            }
        }
    }

    /// Ends the session and releases the subscription.
    pub fn close(self) {
        info!("Closing watch session");
    }

    async fn drain(&mut self, report: &mut CycleReport) -> Result<()> {
        for decoded in NotificationRecordParser::new(&self.buffer) {
            let event = match decoded {
                Ok(event) => event,
                Err(err) => {
                    error!(
                        error = %err,
                        bytes = self.buffer.filled_len(),
                        decoded = report.decoded,
                        "Malformed change buffer; skipping the rest of this fill"
                    );
                    return Err(err.into());
                }
            };
            report.decoded += 1;

            if !self.filter.matches(&event) {
                trace!(name = %event.name, "Filtered out");
                report.filtered_out += 1;
                continue;
            }

            report.dispatched += 1;
            let outcome = self
                .dispatcher
                .dispatch(&event)
                .await
                .map_err(WatchError::Output)?;
            if let DispatchOutcome::ActionFailed(_) = outcome {
                report.action_failures += 1;
            }
        }
        Ok(())
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            trace!(from = ?self.state, to = ?next, "Session state");
            self.state = next;
        }
    }
}
