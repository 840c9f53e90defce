//! Error types for Ophanim.
//!
//! Each module owns its own error enum; [`WatchError`] gathers the ones that
//! can end a session or a cycle. Configuration errors surface before a
//! session exists, and action failures are reported per event as
//! [`DispatchOutcome::ActionFailed`](crate::dispatch::DispatchOutcome::ActionFailed).

use thiserror::Error;

use crate::filter::PatternError;
use crate::parser::DecodeError;
use crate::source::SourceError;

/// Errors that can occur while watching a directory.
///
/// # Examples
///
/// ```
/// use ophanim::config::WatchConfig;
/// use ophanim::error::WatchError;
/// use ophanim::filter::EventFilter;
/// use ophanim::source::NotifySource;
///
/// fn subscribe(config: &WatchConfig) -> Result<(EventFilter, NotifySource), WatchError> {
///     let filter = EventFilter::new(config.name_pattern.as_deref())?;
///     let source = NotifySource::open(&config.root, config.recursive)?;
///     Ok((filter, source))
/// }
///
/// let err = subscribe(&WatchConfig::new("/nonexistent").name_pattern("(")).unwrap_err();
/// assert!(matches!(err, WatchError::Pattern(_)));
/// ```
#[derive(Error, Debug)]
pub enum WatchError {
    /// The name filter could not be compiled.
    #[error(transparent)]
    Pattern(#[from] PatternError),

    /// Opening or reading the change source failed.
    #[error("watch error: {0}")]
    Source(#[from] SourceError),

    /// A fill could not be decoded.
    #[error("malformed change buffer: {0}")]
    Decode(#[from] DecodeError),

    /// Writing a report to the console failed.
    #[error("failed to write report: {0}")]
    Output(#[source] std::io::Error),
}

impl WatchError {
    /// Returns true if the watch loop cannot continue after this error.
    ///
    /// A malformed fill only aborts the current cycle unless strict decoding
    /// is enabled.
    #[must_use]
    pub fn is_fatal(&self, strict_decode: bool) -> bool {
        match self {
            Self::Decode(_) => strict_decode,
            Self::Pattern(_) | Self::Source(_) | Self::Output(_) => true,
        }
    }
}

/// A specialized `Result` type for watch operations.
pub type Result<T> = std::result::Result<T, WatchError>;
