//! Errors surfaced by the binding engine.
//!
//! Discovery problems (double binding, unknown names, malformed props) are
//! not errors: they are logged and the offending element is skipped. Only
//! setup failures, mutation-target failures and awaited instantiation
//! failures reach the caller through [`Error`].

use regex::Regex;
use std::sync::LazyLock;

/// Message signature of a failed lazy-loaded bundle chunk.
static CHUNK_LOAD_FAILURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Loading( CSS)? chunk (\d)+ failed\.").expect("chunk failure pattern is valid")
});

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Boxed error returned by component factories.
pub type BoxError = Box<dyn std::error::Error>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("App init failed - root element is not found: {selector:?}")]
    RootNotFound { selector: String },

    #[error("Non-root element is required for {operation}")]
    InvalidElement { operation: &'static str },

    #[error("Component {component:?} failed to load: {message}")]
    Load { component: String, message: String },

    #[error("Component {component:?} is no longer attached to an app")]
    Detached { component: String },

    #[error("Invalid app options: {message}")]
    Config { message: String },

    #[error("Markup could not be parsed:\n{report}")]
    Markup { report: String },

    #[error("Host DOM call failed: {message}")]
    Host { message: String },
}

impl Error {
    pub(crate) fn load(component: &str, error: impl std::fmt::Display) -> Self {
        Self::Load {
            component: component.to_owned(),
            message: error.to_string(),
        }
    }

    /// True when a component failed because its lazily loaded chunk could not
    /// be fetched. The environment's recovery policy reacts to these.
    pub fn is_chunk_load_failure(&self) -> bool {
        match self {
            Self::Load { message, .. } => CHUNK_LOAD_FAILURE.is_match(message),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_failures_are_recognised() {
        let js = Error::load("Gallery", "Loading chunk 12 failed.\n(error: gallery.js)");
        let css = Error::load("Gallery", "Loading CSS chunk 3 failed.");
        assert!(js.is_chunk_load_failure());
        assert!(css.is_chunk_load_failure());
    }

    #[test]
    fn other_failures_are_not_chunk_failures() {
        let error = Error::load("Gallery", "boom");
        assert!(!error.is_chunk_load_failure());

        let error = Error::load("Gallery", "Something else. Loading chunk 1 failed.");
        assert!(!error.is_chunk_load_failure());

        let error = Error::RootNotFound {
            selector: "Loading chunk 1 failed.".into(),
        };
        assert!(!error.is_chunk_load_failure());
    }
}
