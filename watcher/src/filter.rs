//! Name filter applied to decoded events.
//!
//! The pattern is compiled once when the session starts. Matching uses regular
//! expression search semantics: a match anywhere in the name counts unless the
//! pattern anchors itself.

use regex::Regex;
use thiserror::Error;

use crate::types::FileChangeEvent;

/// The filter pattern is not a valid regular expression.
#[derive(Error, Debug)]
#[error("invalid filter pattern '{pattern}': {source}")]
pub struct PatternError {
    pub pattern: String,
    #[source]
    pub source: regex::Error,
}

/// Optional predicate over event names.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pattern: Option<Regex>,
}

impl EventFilter {
    /// Compiles `pattern`; `None` lets every event through.
    ///
    /// # Errors
    ///
    /// Returns [`PatternError`] if the pattern does not compile.
    pub fn new(pattern: Option<&str>) -> Result<Self, PatternError> {
        let pattern = pattern
            .map(|p| {
                Regex::new(p).map_err(|source| PatternError {
                    pattern: p.to_string(),
                    source,
                })
            })
            .transpose()?;
        Ok(Self { pattern })
    }

    /// A filter that passes everything.
    #[must_use]
    pub fn pass_all() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn pattern(&self) -> Option<&str> {
        self.pattern.as_ref().map(Regex::as_str)
    }

    /// Returns true if the event should be dispatched.
    #[must_use]
    pub fn matches(&self, event: &FileChangeEvent) -> bool {
        self.pattern
            .as_ref()
            .is_none_or(|re| re.is_match(&event.name))
    }
}
