use crate::textmate::{
    EncodedToken, Grammar, GrammarError, GrammarRegistry, LanguageId, RuleStack, ScopeName,
    StandardTokenType, TokenMetadata, push_encoded,
};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Encoded tokens of one line plus the state for the next line.
pub struct EncodedLineTokens {
    /// Tokens in order; each extends to the next token's start (the last to the end of
    /// the line). Neighbours never share the same metadata.
    pub tokens: Vec<EncodedToken>,
    /// State to pass to the next line.
    pub end_state: RuleStack,
}

/// The per-language tokenization entry points a host editor registers.
pub trait EncodedTokensProvider: Send + Sync {
    /// State before the first line of a document.
    fn initial_state(&self) -> RuleStack;

    /// Tokenize `line` starting from `state`.
    fn tokenize_encoded(&self, line: &str, state: &RuleStack) -> EncodedLineTokens;
}

/// A linked grammar bound to a language id, producing encoded tokens.
///
/// Scope paths are folded into [`TokenMetadata`] with the registry's current theme, so
/// callers only ever see packed integers.
#[derive(Debug)]
pub struct Tokenizer {
    grammar: Arc<Grammar>,
    language_id: LanguageId,
    embedded_languages: Vec<(ScopeName, LanguageId)>,
    registry: GrammarRegistry,
}

impl Tokenizer {
    /// Create a tokenizer. `embedded_languages` maps scope prefixes (e.g.
    /// `meta.embedded.block.css`) to the language id reported inside them.
    pub fn new(
        grammar: Arc<Grammar>,
        language_id: LanguageId,
        embedded_languages: Vec<(ScopeName, LanguageId)>,
        registry: GrammarRegistry,
    ) -> Self {
        Self {
            grammar,
            language_id,
            embedded_languages,
            registry,
        }
    }

    /// The linked grammar.
    pub fn grammar(&self) -> &Arc<Grammar> {
        &self.grammar
    }

    /// The language id encoded into tokens outside embedded regions.
    pub fn language_id(&self) -> LanguageId {
        self.language_id
    }

    fn language_for(&self, scopes: &[ScopeName]) -> LanguageId {
        scopes
            .iter()
            .rev()
            .find_map(|scope| {
                self.embedded_languages
                    .iter()
                    .find(|(prefix, _)| scope.matches_prefix(prefix))
                    .map(|(_, id)| *id)
            })
            .unwrap_or(self.language_id)
    }
}

impl EncodedTokensProvider for Tokenizer {
    fn initial_state(&self) -> RuleStack {
        RuleStack::INITIAL
    }

    fn tokenize_encoded(&self, line: &str, state: &RuleStack) -> EncodedLineTokens {
        let result = self.grammar.tokenize_line(line, state);
        let theme = self.registry.theme();

        let mut tokens = Vec::with_capacity(result.tokens.len());
        for token in &result.tokens {
            let style = theme.match_scopes(&token.scopes);
            let metadata = TokenMetadata::new(
                self.language_for(&token.scopes),
                StandardTokenType::for_path(&token.scopes),
                true,
                style.font_style,
                style.foreground,
                style.background,
            );
            push_encoded(&mut tokens, token.start, metadata);
        }

        EncodedLineTokens {
            tokens,
            end_state: result.rule_stack,
        }
    }
}

type SharedTokenizer = Shared<BoxFuture<'static, Result<Arc<Tokenizer>, GrammarError>>>;

/// Memoizes one [`Tokenizer`] per grammar scope name.
///
/// Requests for a scope that is already cached (or in flight) share the same result and
/// never reach the registry again. The language id of the first request for a scope is
/// the one encoded into its tokens.
#[derive(Debug, Clone)]
pub struct TokensProviderCache {
    registry: GrammarRegistry,
    tokenizers: Arc<Mutex<HashMap<ScopeName, SharedTokenizer>>>,
}

impl TokensProviderCache {
    /// Create a cache over `registry`.
    pub fn new(registry: GrammarRegistry) -> Self {
        Self {
            registry,
            tokenizers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The backing registry.
    pub fn registry(&self) -> &GrammarRegistry {
        &self.registry
    }

    /// Get (or load) the tokenizer for `scope`.
    ///
    /// Fails with the registry's error if the grammar cannot be loaded; the failure is
    /// cached until [`TokensProviderCache::forget`] is called.
    pub async fn get_tokenizer(
        &self,
        scope: &ScopeName,
        language_id: LanguageId,
    ) -> Result<Arc<Tokenizer>, GrammarError> {
        self.get_tokenizer_with_embedded(scope, language_id, Vec::new())
            .await
    }

    /// Like [`TokensProviderCache::get_tokenizer`], also mapping embedded scopes to
    /// language ids.
    pub async fn get_tokenizer_with_embedded(
        &self,
        scope: &ScopeName,
        language_id: LanguageId,
        embedded_languages: Vec<(ScopeName, LanguageId)>,
    ) -> Result<Arc<Tokenizer>, GrammarError> {
        let pending = {
            let mut tokenizers = self.tokenizers.lock();
            tokenizers
                .entry(scope.clone())
                .or_insert_with(|| {
                    let registry = self.registry.clone();
                    let scope = scope.clone();
                    async move {
                        let grammar = registry.load_grammar(&scope).await?;
                        tracing::debug!(scope = %scope, language = language_id.0, "tokenizer ready");
                        Ok(Arc::new(Tokenizer::new(
                            grammar,
                            language_id,
                            embedded_languages,
                            registry,
                        )))
                    }
                    .boxed()
                    .shared()
                })
                .clone()
        };
        pending.await
    }

    /// Drop the cached tokenizer for `scope` together with the registry's cached grammar,
    /// so the next request loads from scratch.
    pub fn forget(&self, scope: &ScopeName) {
        self.tokenizers.lock().remove(scope);
        self.registry.forget(scope);
    }
}
