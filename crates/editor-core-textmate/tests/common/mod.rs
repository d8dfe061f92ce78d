#![allow(dead_code)]

use editor_core_textmate::{
    Grammar, GrammarLoader, GrammarRegistry, GrammarSource, LoaderError, ScopeName, Theme, Token,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

pub const DEMO: &str = include_str!("../fixtures/demo.tmLanguage.json");
pub const EMBEDDING: &str = include_str!("../fixtures/embedding.tmLanguage.json");
pub const HTML: &str = include_str!("../fixtures/html.plist");
pub const TODO: &str = include_str!("../fixtures/todo.tmLanguage.yaml");
pub const DARK_THEME: &str = include_str!("../fixtures/dark.json");

/// In-memory grammar loader that counts fetches.
#[derive(Default)]
pub struct MapLoader {
    grammars: HashMap<String, GrammarSource>,
    injections: HashMap<String, Vec<ScopeName>>,
    delay: Option<Duration>,
    fail_once: AtomicBool,
    pub calls: AtomicUsize,
}

impl MapLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fixtures() -> Self {
        Self::new()
            .grammar("source.demo", GrammarSource::json(DEMO))
            .grammar("source.embedding", GrammarSource::json(EMBEDDING))
            .grammar("text.html.basic", GrammarSource::plist(HTML))
            .grammar(
                "text.todo",
                GrammarSource::from_path_hint(TODO, "todo.tmLanguage.yaml"),
            )
    }

    pub fn grammar(mut self, scope: &str, source: GrammarSource) -> Self {
        self.grammars.insert(scope.to_string(), source);
        self
    }

    pub fn json(self, scope: &str, json: &str) -> Self {
        self.grammar(scope, GrammarSource::json(json))
    }

    pub fn inject(mut self, target: &str, injector: &str) -> Self {
        self.injections
            .entry(target.to_string())
            .or_default()
            .push(ScopeName::new(injector));
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing_once(self) -> Self {
        self.fail_once.store(true, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl GrammarLoader for MapLoader {
    async fn load_grammar(
        &self,
        scope: &ScopeName,
    ) -> Result<Option<GrammarSource>, LoaderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_once.swap(false, Ordering::SeqCst) {
            return Err("connection reset".into());
        }
        Ok(self.grammars.get(scope.as_str()).cloned())
    }

    fn injections(&self, scope: &ScopeName) -> Vec<ScopeName> {
        self.injections
            .get(scope.as_str())
            .cloned()
            .unwrap_or_default()
    }
}

pub fn registry(loader: MapLoader) -> (GrammarRegistry, Arc<MapLoader>) {
    let loader = Arc::new(loader);
    (GrammarRegistry::new(loader.clone(), Theme::default()), loader)
}

pub fn themed_registry(loader: MapLoader) -> GrammarRegistry {
    let theme = Theme::from_json(DARK_THEME).expect("theme");
    GrammarRegistry::new(Arc::new(loader), theme)
}

pub async fn grammar(loader: MapLoader, scope: &str) -> Arc<Grammar> {
    let (registry, _) = registry(loader);
    registry
        .load_grammar(&ScopeName::new(scope))
        .await
        .expect("load grammar")
}

/// `(start, end, scope path joined by spaces)` for compact assertions.
pub fn summarize(tokens: &[Token]) -> Vec<(usize, usize, String)> {
    tokens
        .iter()
        .map(|t| {
            let scopes: Vec<&str> = t.scopes.iter().map(|s| s.as_str()).collect();
            (t.start, t.end, scopes.join(" "))
        })
        .collect()
}
