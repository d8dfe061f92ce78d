use crate::textmate::scope::ScopeName;
use thiserror::Error;

/// Boxed error returned by host-provided loaders and fetchers.
pub type LoaderError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
/// Errors produced while loading, parsing, compiling or linking TextMate grammars.
///
/// Every variant is cheap to clone so a single failed load can be handed to all
/// callers waiting on the same scope name.
pub enum GrammarError {
    #[error("no grammar registered for scope '{0}'")]
    /// The loader has no source for the requested scope name.
    NotFound(ScopeName),

    #[error("failed to parse grammar '{scope}': {message}")]
    /// The fetched content is malformed for its declared format.
    Parse {
        /// Scope name (or path) of the grammar being parsed.
        scope: String,
        /// Parser error message.
        message: String,
    },

    #[error("failed to load grammar '{scope}': {message}")]
    /// The loader failed to fetch the raw source (network, storage, ...).
    Load {
        /// Scope name that was requested.
        scope: ScopeName,
        /// Loader error message.
        message: String,
    },

    #[error("unresolved rule reference '{reference}' in grammar '{scope}'")]
    /// An `include` could not be resolved locally or in any loaded grammar.
    UnresolvedRuleReference {
        /// Grammar that contains the include.
        scope: ScopeName,
        /// The include string as written in the grammar.
        reference: String,
    },

    #[error("regex compile error for pattern '{pattern}': {message}")]
    /// A pattern failed to compile with the pattern matcher.
    RegexCompile {
        /// The regex pattern source.
        pattern: String,
        /// The compiler error message.
        message: String,
    },

    #[error("invalid rule in grammar '{scope}': {message}")]
    /// A rule is structurally invalid (e.g. `end` without `begin`).
    InvalidRule {
        /// Grammar that contains the rule.
        scope: ScopeName,
        /// What is wrong with it.
        message: String,
    },
}

impl GrammarError {
    /// Wrap a loader failure for `scope`.
    pub fn load(scope: &ScopeName, err: impl std::fmt::Display) -> Self {
        Self::Load {
            scope: scope.clone(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
/// Errors produced while building a theme.
pub enum ThemeError {
    #[error("theme JSON parse error: {0}")]
    /// The raw theme is not valid JSON for the theme model.
    Parse(String),

    #[error("invalid color '{0}'")]
    /// A color value is not of the form `#RGB`, `#RGBA`, `#RRGGBB` or `#RRGGBBAA`.
    InvalidColor(String),

    #[error("theme references {0} distinct colors, the encoded format supports at most 511")]
    /// More distinct colors than the foreground field can index.
    TooManyColors(usize),

    #[error("theme references {0} colors including backgrounds, background colors must fit in 255")]
    /// A background color's id does not fit the background field.
    TooManyBackgroundColors(usize),
}
