//! TextMate grammar support.
//!
//! Grammars are loaded through a host-provided [`GrammarLoader`], compiled into rule
//! tables, linked with the grammars they embed or that inject into them, and then used to
//! tokenize text one line at a time. Each line's result carries the [`RuleStack`] to feed
//! into the next line, so editors can retokenize incrementally from any line whose start
//! state is known.

mod compiler;
mod definition;
mod engine;
mod error;
mod grammar;
mod matcher;
mod metadata;
mod registry;
mod scope;
mod selector;
mod source;
mod stack;
mod theme;

pub use compiler::{
    BeginEndRule, BeginWhileRule, EndPattern, GrammarDocument, GroupRule, IncludeTarget,
    LocalInjection, MatchRule, Rule, RuleId, ScopeTemplate,
};
pub use definition::{CaptureIndex, Flag, RawCaptures, RawGrammar, RawRule};
pub use engine::{LineTokens, Token};
pub use error::{GrammarError, LoaderError, ThemeError};
pub use grammar::{Grammar, Injection};
pub use matcher::{AnchorContext, Match, Pattern};
pub use metadata::{
    EncodedToken, FontStyle, LanguageId, MAX_BACKGROUND_INDEX, MAX_FOREGROUND_INDEX,
    StandardTokenType, TokenMetadata,
};
pub use registry::{GrammarLoader, GrammarRegistry};
pub use scope::ScopeName;
pub use selector::{InjectionPriority, ScopeSelector};
pub use source::{GrammarFormat, GrammarSource};
pub use stack::RuleStack;
pub use theme::{
    ColorTable, RawTheme, RawThemeRule, RawThemeScope, RawThemeSettings, StyleAttributes, Theme,
};

pub(crate) use metadata::push_encoded;
