use crate::textmate::compiler::GrammarDocument;
use crate::textmate::error::{GrammarError, LoaderError};
use crate::textmate::grammar::Grammar;
use crate::textmate::scope::ScopeName;
use crate::textmate::source::GrammarSource;
use crate::textmate::theme::{ColorTable, Theme};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared, join_all};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Source of raw grammars, provided by the host.
#[async_trait::async_trait]
pub trait GrammarLoader: Send + Sync {
    /// Fetch the raw grammar for `scope`. `Ok(None)` means the scope is unknown.
    async fn load_grammar(&self, scope: &ScopeName)
    -> Result<Option<GrammarSource>, LoaderError>;

    /// Scope names of grammars to inject into `scope`, in order.
    fn injections(&self, _scope: &ScopeName) -> Vec<ScopeName> {
        Vec::new()
    }
}

type SharedLoad<T> = Shared<BoxFuture<'static, Result<Arc<T>, GrammarError>>>;

struct RegistryInner {
    loader: Arc<dyn GrammarLoader>,
    documents: Mutex<HashMap<ScopeName, SharedLoad<GrammarDocument>>>,
    grammars: Mutex<HashMap<ScopeName, SharedLoad<Grammar>>>,
    // target scope -> injector scopes, in registration order
    injections: RwLock<IndexMap<ScopeName, Vec<ScopeName>>>,
    theme: RwLock<Arc<Theme>>,
}

/// Process-wide store of grammar documents and linked grammars.
///
/// Every load is memoized per scope name, including failures: concurrent requests for
/// the same uncached scope share one in-flight fetch, and every waiter sees the same
/// document or the same error. [`GrammarRegistry::forget`] clears an entry so a failed
/// load can be retried. Cloning the registry shares the store.
#[derive(Clone)]
pub struct GrammarRegistry {
    inner: Arc<RegistryInner>,
}

impl std::fmt::Debug for GrammarRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrammarRegistry")
            .field("documents", &self.inner.documents.lock().len())
            .field("grammars", &self.inner.grammars.lock().len())
            .finish()
    }
}

impl GrammarRegistry {
    /// Create a registry backed by `loader`, styled with `theme`.
    pub fn new(loader: Arc<dyn GrammarLoader>, theme: Theme) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                loader,
                documents: Mutex::new(HashMap::new()),
                grammars: Mutex::new(HashMap::new()),
                injections: RwLock::new(IndexMap::new()),
                theme: RwLock::new(Arc::new(theme)),
            }),
        }
    }

    /// Load, parse and compile the grammar document for `scope`.
    ///
    /// Only the document itself is loaded; see [`GrammarRegistry::load_grammar`] for a
    /// grammar linked with its embedded languages and injections.
    pub async fn load(&self, scope: &ScopeName) -> Result<Arc<GrammarDocument>, GrammarError> {
        let pending = {
            let mut documents = self.inner.documents.lock();
            documents
                .entry(scope.clone())
                .or_insert_with(|| {
                    tracing::debug!(scope = %scope, "loading grammar document");
                    self.clone().fetch_document(scope.clone()).boxed().shared()
                })
                .clone()
        };
        pending.await
    }

    /// Load `scope` together with every grammar it embeds and every grammar injected
    /// into it, and link them into a [`Grammar`] ready for tokenization.
    ///
    /// Any dependency that fails to load fails the whole load. An embedded grammar the
    /// loader does not know is reported as [`GrammarError::UnresolvedRuleReference`]
    /// against the grammar that includes it.
    pub async fn load_grammar(&self, scope: &ScopeName) -> Result<Arc<Grammar>, GrammarError> {
        let pending = {
            let mut grammars = self.inner.grammars.lock();
            grammars
                .entry(scope.clone())
                .or_insert_with(|| self.clone().link(scope.clone()).boxed().shared())
                .clone()
        };
        pending.await
    }

    /// Drop cached results for `scope` so the next request loads it again.
    ///
    /// Linked grammars that include `scope` keep the document they were built with.
    pub fn forget(&self, scope: &ScopeName) {
        self.inner.documents.lock().remove(scope);
        self.inner.grammars.lock().remove(scope);
        tracing::debug!(scope = %scope, "forgot cached grammar");
    }

    /// Register `injector` for injection into each of `targets`.
    ///
    /// Injectors of a target are evaluated in registration order. Grammars linked
    /// before the call are not affected.
    pub fn register_injection(&self, injector: &ScopeName, targets: &[ScopeName]) {
        let mut table = self.inner.injections.write();
        for target in targets {
            let injectors = table.entry(target.clone()).or_default();
            if !injectors.contains(injector) {
                injectors.push(injector.clone());
            }
        }
    }

    /// Injector scope names for `target`: loader-provided ones first, then registered ones.
    pub fn injectors_of(&self, target: &ScopeName) -> Vec<ScopeName> {
        let mut out = self.inner.loader.injections(target);
        if let Some(registered) = self.inner.injections.read().get(target) {
            for injector in registered {
                if !out.contains(injector) {
                    out.push(injector.clone());
                }
            }
        }
        out
    }

    /// The current theme.
    pub fn theme(&self) -> Arc<Theme> {
        self.inner.theme.read().clone()
    }

    /// Replace the theme. Tokens produced afterwards use the new color table.
    pub fn set_theme(&self, theme: Theme) {
        *self.inner.theme.write() = Arc::new(theme);
    }

    /// Colors of the current theme, addressed by the ids used in encoded tokens.
    pub fn color_map(&self) -> ColorTable {
        self.theme().color_table().clone()
    }

    async fn fetch_document(self, scope: ScopeName) -> Result<Arc<GrammarDocument>, GrammarError> {
        let source = self
            .inner
            .loader
            .load_grammar(&scope)
            .await
            .map_err(|err| GrammarError::load(&scope, err))?
            .ok_or_else(|| GrammarError::NotFound(scope.clone()))?;

        let raw = source.parse(&scope)?;
        let document = GrammarDocument::compile(raw)?;
        if document.scope_name != scope {
            tracing::warn!(
                requested = %scope,
                declared = %document.scope_name,
                "grammar declares a different scopeName"
            );
        }
        if !document.inject_to.is_empty() {
            self.register_injection(&scope, &document.inject_to);
        }
        tracing::debug!(scope = %scope, "grammar document loaded");
        Ok(Arc::new(document))
    }

    async fn link(self, scope: ScopeName) -> Result<Arc<Grammar>, GrammarError> {
        let root = self.load(&scope).await?;
        let injectors = self.injectors_of(&scope);

        let mut seen: HashSet<ScopeName> = HashSet::from([scope.clone()]);
        // Embedded scope -> grammar that first included it.
        let mut included_by: HashMap<ScopeName, ScopeName> = HashMap::new();
        for embedded in root.embedded_scopes() {
            included_by
                .entry(embedded.clone())
                .or_insert_with(|| scope.clone());
        }
        let mut documents = Vec::new();
        let mut wave: Vec<ScopeName> = root
            .embedded_scopes()
            .iter()
            .chain(injectors.iter())
            .filter(|s| seen.insert((*s).clone()))
            .cloned()
            .collect();

        // Breadth-first so independent grammars are fetched concurrently.
        while !wave.is_empty() {
            let results = join_all(wave.iter().map(|s| self.load(s))).await;
            let mut next = Vec::new();
            for (dependency, result) in wave.iter().zip(results) {
                match result {
                    Ok(doc) => {
                        for embedded in doc.embedded_scopes() {
                            if seen.insert(embedded.clone()) {
                                included_by.insert(embedded.clone(), doc.scope_name.clone());
                                next.push(embedded.clone());
                            }
                        }
                        documents.push(doc);
                    }
                    Err(GrammarError::NotFound(missing)) => {
                        tracing::warn!(
                            scope = %scope,
                            dependency = %dependency,
                            "referenced grammar is not available"
                        );
                        return Err(match included_by.remove(dependency) {
                            Some(includer) => GrammarError::UnresolvedRuleReference {
                                scope: includer,
                                reference: dependency.to_string(),
                            },
                            None => GrammarError::NotFound(missing),
                        });
                    }
                    Err(err) => return Err(err),
                }
            }
            wave = next;
        }

        let grammar = Grammar::link(root, documents, &injectors)?;
        tracing::debug!(
            scope = %scope,
            documents = grammar.document_scopes().count(),
            injections = grammar.injections().len(),
            "grammar linked"
        );
        Ok(Arc::new(grammar))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MapLoader {
        grammars: HashMap<&'static str, &'static str>,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl GrammarLoader for MapLoader {
        async fn load_grammar(
            &self,
            scope: &ScopeName,
        ) -> Result<Option<GrammarSource>, LoaderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .grammars
                .get(scope.as_str())
                .map(|json| GrammarSource::json(*json)))
        }
    }

    fn registry(grammars: &[(&'static str, &'static str)]) -> (GrammarRegistry, Arc<MapLoader>) {
        let loader = Arc::new(MapLoader {
            grammars: grammars.iter().copied().collect(),
            calls: AtomicUsize::new(0),
        });
        (
            GrammarRegistry::new(loader.clone(), Theme::default()),
            loader,
        )
    }

    #[test]
    fn documents_are_memoized() {
        let (registry, loader) = registry(&[("source.a", r#"{"scopeName": "source.a"}"#)]);
        let scope = ScopeName::new("source.a");
        let a = futures::executor::block_on(registry.load(&scope)).unwrap();
        let b = futures::executor::block_on(registry.load(&scope)).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(loader.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failures_are_cached_until_forgotten() {
        let (registry, loader) = registry(&[]);
        let scope = ScopeName::new("source.missing");
        let err = futures::executor::block_on(registry.load(&scope)).unwrap_err();
        assert_eq!(err, GrammarError::NotFound(scope.clone()));
        let _ = futures::executor::block_on(registry.load(&scope));
        assert_eq!(loader.calls.load(Ordering::SeqCst), 1);

        registry.forget(&scope);
        let _ = futures::executor::block_on(registry.load(&scope));
        assert_eq!(loader.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn inject_to_registers_the_injector() {
        let (registry, _) = registry(&[(
            "text.todo",
            r#"{"scopeName": "text.todo", "injectTo": ["source.a", "source.b"], "injectionSelector": "L:comment"}"#,
        )]);
        futures::executor::block_on(registry.load(&ScopeName::new("text.todo"))).unwrap();
        assert_eq!(
            registry.injectors_of(&ScopeName::new("source.b")),
            vec![ScopeName::new("text.todo")]
        );
    }
}
