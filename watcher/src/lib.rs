//! Ophanim - a directory change watcher.
//!
//! This crate subscribes to change notifications for a directory, decodes the
//! raw notification records the platform delivers, filters them by name and
//! either reports each change on the console or runs an external action for it.
//!
//! # Overview
//!
//! Changes arrive as fills: a buffer of variable-length records chained by
//! byte offset, each carrying an action code and a UTF-16LE name. A
//! [`WatchSession`] waits for a fill, decodes it with the
//! [`NotificationRecordParser`], keeps the events whose name matches the
//! [`EventFilter`] and hands them to the [`ActionDispatcher`] one at a time.
//!
//! # Modules
//!
//! - [`types`]: Change kinds and decoded events
//! - [`buffer`]: Fixed-capacity fill buffer and record encoding
//! - [`parser`]: Decoding of chained change records
//! - [`filter`]: Regular-expression name filter
//! - [`dispatch`]: Console reports and external actions
//! - [`source`]: Change subscriptions
//! - [`session`]: The watch loop
//! - [`config`]: Command-line and environment configuration
//! - [`error`]: Error types for watch operations

pub mod buffer;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod filter;
pub mod parser;
pub mod session;
pub mod source;
pub mod types;

pub use buffer::{CapacityExceeded, RawChangeBuffer, RECORD_HEADER_LEN};
pub use config::{Config, ConfigError, WatchConfig};
pub use dispatch::{
    ActionDispatcher, ActionError, ActionOutput, ActionRunner, ActionSpec, DispatchOutcome,
    ShellRunner,
};
pub use error::{Result, WatchError};
pub use filter::{EventFilter, PatternError};
pub use parser::{parse_fill, DecodeError, NotificationRecordParser};
pub use session::{CycleReport, SessionState, WatchSession};
pub use source::{ChangeSource, FillStatus, NotifySource, SourceError};
pub use types::{EventKind, FileChangeEvent, ReportFormat};
