#![warn(missing_docs)]
//! `editor-core-textmate` - TextMate grammar tokenization for `editor-core` hosts.
//!
//! The crate turns TextMate grammars (JSON, property list or YAML) into a line
//! tokenizer with resumable state, and packs each token's scope path into a 32-bit
//! metadata word (language, token type, font style, colors) resolved against a theme.
//!
//! - [`textmate::GrammarRegistry`] loads, caches and links grammars.
//! - [`Tokenizer`] is the per-language [`EncodedTokensProvider`] handed to a host.
//! - [`TokensProviderCache`] memoizes tokenizers per scope name.
//! - [`LanguageInfoProvider`] wires everything from a static [`LanguageManifest`].

pub mod textmate;

mod manifest;
mod provider;

pub use manifest::{
    FsResourceFetcher, LanguageInfo, LanguageInfoProvider, LanguageManifest, ManifestError,
    ManifestGrammar, ManifestGrammarLoader, ResourceFetcher,
};
pub use provider::{EncodedLineTokens, EncodedTokensProvider, Tokenizer, TokensProviderCache};
pub use textmate::*;
