#![warn(missing_docs)]
//! `editor-core-lang` - data-driven language configuration for `editor-core` hosts.
//!
//! Language configurations are the JSON documents that accompany a grammar and describe
//! editing behavior: comment tokens, bracket pairs, auto-closing pairs, indentation and
//! folding rules. JSON has no regex literals, so regex-valued fields are written as
//! strings (or `{ "pattern", "flags" }` objects) and compiled when the configuration is
//! loaded.

mod configuration;

pub use configuration::{
    AutoClosingPair, ConfigRegex, ConfigurationError, FoldingMarkers, FoldingRules,
    IndentationRules, LanguageConfiguration,
};

/// Comment tokens for a language.
///
/// Hosts use this to implement comment toggling.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommentConfig {
    /// Line comment token (e.g. `//`, `#`).
    pub line: Option<String>,
    /// Block comment start token (e.g. `/*`).
    pub block_start: Option<String>,
    /// Block comment end token (e.g. `*/`).
    pub block_end: Option<String>,
}

impl CommentConfig {
    /// Line comments only.
    pub fn line(token: impl Into<String>) -> Self {
        Self {
            line: Some(token.into()),
            ..Self::default()
        }
    }

    /// Block comments only.
    pub fn block(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            line: None,
            block_start: Some(start.into()),
            block_end: Some(end.into()),
        }
    }

    /// Returns `true` if a non-empty line comment token is configured.
    pub fn has_line(&self) -> bool {
        self.line.as_deref().is_some_and(|s| !s.is_empty())
    }

    /// Returns `true` if both block comment tokens are configured and non-empty.
    pub fn has_block(&self) -> bool {
        self.block_start.as_deref().is_some_and(|s| !s.is_empty())
            && self.block_end.as_deref().is_some_and(|s| !s.is_empty())
    }

    /// Returns `true` if no comment token is configured.
    pub fn is_empty(&self) -> bool {
        !self.has_line() && !self.has_block()
    }
}
