//! Event types for directory change watching.
//!
//! This module defines the decoded change event and the shapes it is reported
//! in. Events are produced by the [`parser`](crate::parser) and consumed once
//! by the filter and dispatcher.

use std::fmt;

use serde::Serialize;

/// Classification of a single change record.
///
/// Values outside the known range decode to [`EventKind::Unknown`] and keep
/// the raw action code, so decoding never fails on an unfamiliar action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A file or directory was added to the watched tree.
    Added,
    /// A file or directory was removed.
    Removed,
    /// Contents, size or last-write time changed.
    Modified,
    /// The old name of a renamed entry.
    RenamedOld,
    /// The new name of a renamed entry.
    RenamedNew,
    /// An action code this version does not recognise.
    Unknown(u32),
}

impl EventKind {
    pub const ADDED: u32 = 1;
    pub const REMOVED: u32 = 2;
    pub const MODIFIED: u32 = 3;
    pub const RENAMED_OLD: u32 = 4;
    pub const RENAMED_NEW: u32 = 5;

    /// Maps a raw action code to its kind.
    #[must_use]
    pub const fn from_code(code: u32) -> Self {
        match code {
            Self::ADDED => Self::Added,
            Self::REMOVED => Self::Removed,
            Self::MODIFIED => Self::Modified,
            Self::RENAMED_OLD => Self::RenamedOld,
            Self::RENAMED_NEW => Self::RenamedNew,
            other => Self::Unknown(other),
        }
    }

    /// Returns the raw action code this kind was decoded from.
    #[must_use]
    pub const fn code(self) -> u32 {
        match self {
            Self::Added => Self::ADDED,
            Self::Removed => Self::REMOVED,
            Self::Modified => Self::MODIFIED,
            Self::RenamedOld => Self::RENAMED_OLD,
            Self::RenamedNew => Self::RENAMED_NEW,
            Self::Unknown(code) => code,
        }
    }

    /// Short lowercase label, `unknown` for unrecognised codes.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Removed => "removed",
            Self::Modified => "modified",
            Self::RenamedOld => "renamed-old",
            Self::RenamedNew => "renamed-new",
            Self::Unknown(_) => "unknown",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(code) => write!(f, "unknown({code})"),
            other => f.write_str(other.label()),
        }
    }
}

/// A single decoded change.
///
/// `name` is relative to the watched root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChangeEvent {
    pub kind: EventKind,
    pub name: String,
}

impl FileChangeEvent {
    pub fn new(kind: EventKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

/// Output format for console reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReportFormat {
    /// `<label> <name>` per line.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

impl ReportFormat {
    /// Parses a format name, case-insensitively.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "text" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Serialized shape of a JSON report line.
#[derive(Debug, Serialize)]
pub struct EventReport<'a> {
    pub kind: &'static str,
    pub code: u32,
    pub name: &'a str,
}

impl<'a> From<&'a FileChangeEvent> for EventReport<'a> {
    fn from(event: &'a FileChangeEvent) -> Self {
        Self {
            kind: event.kind.label(),
            code: event.kind.code(),
            name: &event.name,
        }
    }
}
