use crate::provider::{Tokenizer, TokensProviderCache};
use crate::textmate::{
    ColorTable, GrammarError, GrammarLoader, GrammarRegistry, GrammarSource, LanguageId,
    LoaderError, RawTheme, ScopeName, Theme, ThemeError,
};
use editor_core_lang::{ConfigurationError, LanguageConfiguration};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Static description of the languages a host serves.
///
/// ```json
/// {
///   "baseResourceURI": "/static",
///   "grammars": {
///     "source.python": { "language": "python", "path": "MagicPython.tmLanguage.json" }
///   },
///   "configurations": ["python"],
///   "theme": { "settings": [] }
/// }
/// ```
pub struct LanguageManifest {
    #[serde(rename = "baseResourceURI", default)]
    /// Prefix of every resource URI.
    pub base_resource_uri: String,
    #[serde(default)]
    /// Grammars by scope name, in declaration order.
    pub grammars: IndexMap<ScopeName, ManifestGrammar>,
    #[serde(default)]
    /// Languages that have a configuration document.
    pub configurations: Vec<String>,
    #[serde(default)]
    /// Theme used to color tokens.
    pub theme: RawTheme,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// One grammar entry of a [`LanguageManifest`].
pub struct ManifestGrammar {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Language id this grammar tokenizes, if it is a top-level language.
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    /// Scopes injected *into* this grammar.
    pub injections: Vec<ScopeName>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    /// Embedded scope prefix -> language id, for tokens inside embedded regions.
    pub embedded_languages: IndexMap<ScopeName, String>,
    /// Grammar file, relative to `{baseResourceURI}/grammars/`. The extension selects
    /// the format.
    pub path: String,
}

impl LanguageManifest {
    /// Parse a manifest from JSON.
    pub fn from_json(json: &str) -> Result<Self, ManifestError> {
        serde_json::from_str(json).map_err(ManifestError::Parse)
    }

    /// URI of the grammar file at `path`.
    pub fn grammar_uri(&self, path: &str) -> String {
        format!("{}/grammars/{}", self.base_resource_uri, path)
    }

    /// URI of the configuration document of `language`.
    pub fn configuration_uri(&self, language: &str) -> String {
        format!("{}/configurations/{}.json", self.base_resource_uri, language)
    }

    /// Scope name of the grammar declared for `language`.
    pub fn scope_for_language(&self, language: &str) -> Option<&ScopeName> {
        self.grammars
            .iter()
            .find(|(_, grammar)| grammar.language.as_deref() == Some(language))
            .map(|(scope, _)| scope)
    }

    /// Languages in declaration order: grammar languages first, then configuration-only
    /// languages.
    pub fn languages(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        let declared = self
            .grammars
            .values()
            .filter_map(|g| g.language.as_deref())
            .chain(self.configurations.iter().map(String::as_str));
        for language in declared {
            if !out.contains(&language) {
                out.push(language);
            }
        }
        out
    }
}

#[derive(Debug, Error)]
/// Errors produced by the manifest-driven language provider.
pub enum ManifestError {
    #[error("manifest JSON parse error: {0}")]
    /// The manifest is not valid JSON for the manifest model.
    Parse(#[source] serde_json::Error),

    #[error(transparent)]
    /// The manifest theme could not be built.
    Theme(#[from] ThemeError),

    #[error(transparent)]
    /// The grammar of the language failed to load.
    Grammar(#[from] GrammarError),

    #[error("failed to fetch '{uri}': {message}")]
    /// A resource could not be fetched.
    Fetch {
        /// Resource URI.
        uri: String,
        /// Fetcher error message.
        message: String,
    },

    #[error("invalid configuration for language '{language}': {source}")]
    /// The language configuration document is malformed.
    Configuration {
        /// Language id.
        language: String,
        /// Underlying error.
        #[source]
        source: ConfigurationError,
    },

    #[error("manifest declares {0} languages, encoded tokens support at most 255")]
    /// More languages than the language id field can hold.
    TooManyLanguages(usize),
}

/// Fetches resources by URI.
#[async_trait::async_trait]
pub trait ResourceFetcher: Send + Sync {
    /// Fetch `uri` as text. `Ok(None)` means the resource does not exist.
    async fn fetch(&self, uri: &str) -> Result<Option<String>, LoaderError>;
}

#[derive(Debug, Clone, Copy, Default)]
/// Fetches resources from the local file system, treating URIs as paths.
pub struct FsResourceFetcher;

#[async_trait::async_trait]
impl ResourceFetcher for FsResourceFetcher {
    async fn fetch(&self, uri: &str) -> Result<Option<String>, LoaderError> {
        match tokio::fs::read_to_string(uri).await {
            Ok(text) => Ok(Some(text)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(Box::new(err)),
        }
    }
}

/// [`GrammarLoader`] backed by a [`LanguageManifest`] and a [`ResourceFetcher`].
pub struct ManifestGrammarLoader {
    manifest: Arc<LanguageManifest>,
    fetcher: Arc<dyn ResourceFetcher>,
}

impl ManifestGrammarLoader {
    /// Create a loader for the grammars listed in `manifest`.
    pub fn new(manifest: Arc<LanguageManifest>, fetcher: Arc<dyn ResourceFetcher>) -> Self {
        Self { manifest, fetcher }
    }
}

#[async_trait::async_trait]
impl GrammarLoader for ManifestGrammarLoader {
    async fn load_grammar(
        &self,
        scope: &ScopeName,
    ) -> Result<Option<GrammarSource>, LoaderError> {
        let Some(entry) = self.manifest.grammars.get(scope) else {
            return Ok(None);
        };
        let uri = self.manifest.grammar_uri(&entry.path);
        tracing::debug!(scope = %scope, uri = %uri, "fetching grammar");
        let content = self
            .fetcher
            .fetch(&uri)
            .await?
            .ok_or_else(|| format!("grammar file '{uri}' does not exist"))?;
        Ok(Some(GrammarSource::from_path_hint(content, &entry.path)))
    }

    fn injections(&self, scope: &ScopeName) -> Vec<ScopeName> {
        self.manifest
            .grammars
            .get(scope)
            .map(|entry| entry.injections.clone())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
/// Everything a host needs to register one language.
pub struct LanguageInfo {
    /// Tokenizer, if the language has a grammar.
    pub tokens_provider: Option<Arc<Tokenizer>>,
    /// Editing configuration, if the language has one.
    pub configuration: Option<LanguageConfiguration>,
}

/// Resolves languages declared in a [`LanguageManifest`] to tokenizers and
/// configurations.
///
/// Encoded language ids are assigned in manifest order starting at 1; 0 is left for
/// "no language".
pub struct LanguageInfoProvider {
    manifest: Arc<LanguageManifest>,
    fetcher: Arc<dyn ResourceFetcher>,
    tokens_providers: TokensProviderCache,
    language_ids: IndexMap<String, LanguageId>,
}

impl std::fmt::Debug for LanguageInfoProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LanguageInfoProvider")
            .field("base_resource_uri", &self.manifest.base_resource_uri)
            .field("languages", &self.language_ids)
            .finish()
    }
}

impl LanguageInfoProvider {
    /// Build a provider. Fails if the manifest theme is invalid or the manifest declares
    /// more languages than a [`LanguageId`] can number.
    pub fn new(
        manifest: LanguageManifest,
        fetcher: Arc<dyn ResourceFetcher>,
    ) -> Result<Self, ManifestError> {
        let theme = Theme::from_raw(&manifest.theme)?;
        let languages = manifest.languages();
        if languages.len() > usize::from(u8::MAX) {
            return Err(ManifestError::TooManyLanguages(languages.len()));
        }
        let language_ids = languages
            .into_iter()
            .zip(1..=u8::MAX)
            .map(|(language, id)| (language.to_string(), LanguageId(id)))
            .collect();

        let manifest = Arc::new(manifest);
        let loader = Arc::new(ManifestGrammarLoader::new(manifest.clone(), fetcher.clone()));
        let registry = GrammarRegistry::new(loader, theme);

        Ok(Self {
            manifest,
            fetcher,
            tokens_providers: TokensProviderCache::new(registry),
            language_ids,
        })
    }

    /// The manifest this provider serves.
    pub fn manifest(&self) -> &LanguageManifest {
        &self.manifest
    }

    /// The shared grammar registry.
    pub fn registry(&self) -> &GrammarRegistry {
        self.tokens_providers.registry()
    }

    /// The tokenizer cache.
    pub fn tokens_providers(&self) -> &TokensProviderCache {
        &self.tokens_providers
    }

    /// Encoded id of `language`, if the manifest declares it.
    pub fn language_id(&self, language: &str) -> Option<LanguageId> {
        self.language_ids.get(language).copied()
    }

    /// Colors of the current theme, addressed by the ids in encoded tokens.
    pub fn color_map(&self) -> ColorTable {
        self.registry().color_map()
    }

    /// Load the tokenizer and configuration of `language` concurrently.
    pub async fn fetch_language_info(&self, language: &str) -> Result<LanguageInfo, ManifestError> {
        let (tokens_provider, configuration) = futures::join!(
            self.tokens_provider_for_language(language),
            self.configuration_for_language(language)
        );
        Ok(LanguageInfo {
            tokens_provider: tokens_provider?,
            configuration: configuration?,
        })
    }

    async fn tokens_provider_for_language(
        &self,
        language: &str,
    ) -> Result<Option<Arc<Tokenizer>>, ManifestError> {
        let Some(scope) = self.manifest.scope_for_language(language) else {
            return Ok(None);
        };
        let language_id = self.language_id(language).unwrap_or_default();
        let embedded = self.manifest.grammars[scope]
            .embedded_languages
            .iter()
            .map(|(prefix, embedded)| {
                (
                    prefix.clone(),
                    self.language_id(embedded).unwrap_or_default(),
                )
            })
            .collect();
        let tokenizer = self
            .tokens_providers
            .get_tokenizer_with_embedded(scope, language_id, embedded)
            .await?;
        Ok(Some(tokenizer))
    }

    async fn configuration_for_language(
        &self,
        language: &str,
    ) -> Result<Option<LanguageConfiguration>, ManifestError> {
        if !self.manifest.configurations.iter().any(|c| c == language) {
            return Ok(None);
        }
        let uri = self.manifest.configuration_uri(language);
        let text = self
            .fetcher
            .fetch(&uri)
            .await
            .map_err(|err| ManifestError::Fetch {
                uri: uri.clone(),
                message: err.to_string(),
            })?;
        let Some(text) = text else {
            tracing::warn!(language, uri = %uri, "language configuration not found");
            return Ok(None);
        };
        LanguageConfiguration::from_json(&text)
            .map(Some)
            .map_err(|source| ManifestError::Configuration {
                language: language.to_string(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const MANIFEST: &str = r#"{
        "baseResourceURI": "/res",
        "grammars": {
            "text.html.basic": { "path": "html.json" },
            "source.python": { "language": "python", "path": "python.plist", "injections": ["text.todo"] },
            "source.js": { "language": "javascript", "path": "js.tmLanguage.yaml" }
        },
        "configurations": ["python", "plaintext"],
        "theme": { "settings": [] }
    }"#;

    #[test]
    fn parses_manifest_in_declaration_order() {
        let manifest = LanguageManifest::from_json(MANIFEST).unwrap();
        assert_eq!(manifest.base_resource_uri, "/res");
        let scopes: Vec<_> = manifest.grammars.keys().map(|s| s.as_str()).collect();
        assert_eq!(scopes, vec!["text.html.basic", "source.python", "source.js"]);
        assert_eq!(manifest.languages(), vec!["python", "javascript", "plaintext"]);
        assert_eq!(
            manifest.scope_for_language("javascript"),
            Some(&ScopeName::new("source.js"))
        );
        assert_eq!(manifest.scope_for_language("html"), None);
    }

    #[test]
    fn resource_uris() {
        let manifest = LanguageManifest::from_json(MANIFEST).unwrap();
        assert_eq!(manifest.grammar_uri("python.plist"), "/res/grammars/python.plist");
        assert_eq!(
            manifest.configuration_uri("python"),
            "/res/configurations/python.json"
        );
    }

    #[test]
    fn language_ids_follow_manifest_order() {
        let manifest = LanguageManifest::from_json(MANIFEST).unwrap();
        let provider = LanguageInfoProvider::new(manifest, Arc::new(FsResourceFetcher)).unwrap();
        assert_eq!(provider.language_id("python"), Some(LanguageId(1)));
        assert_eq!(provider.language_id("javascript"), Some(LanguageId(2)));
        assert_eq!(provider.language_id("plaintext"), Some(LanguageId(3)));
        assert_eq!(provider.language_id("rust"), None);
    }

    #[test]
    fn language_ids_must_fit_the_encoding() {
        let mut manifest = LanguageManifest::from_json(MANIFEST).unwrap();
        manifest
            .configurations
            .extend((0..252).map(|i| format!("lang{i}")));
        let provider =
            LanguageInfoProvider::new(manifest.clone(), Arc::new(FsResourceFetcher)).unwrap();
        assert_eq!(provider.language_id("lang251"), Some(LanguageId(255)));

        manifest.configurations.push("one-too-many".into());
        let err = LanguageInfoProvider::new(manifest, Arc::new(FsResourceFetcher)).unwrap_err();
        assert!(matches!(err, ManifestError::TooManyLanguages(256)), "{err}");
    }

    #[test]
    fn loader_reports_manifest_injections() {
        let manifest = Arc::new(LanguageManifest::from_json(MANIFEST).unwrap());
        let loader = ManifestGrammarLoader::new(manifest, Arc::new(FsResourceFetcher));
        assert_eq!(
            loader.injections(&ScopeName::new("source.python")),
            vec![ScopeName::new("text.todo")]
        );
        assert!(loader.injections(&ScopeName::new("source.js")).is_empty());
    }

    #[test]
    fn invalid_theme_is_rejected() {
        let mut manifest = LanguageManifest::from_json(MANIFEST).unwrap();
        manifest.theme = serde_json::from_str(
            r#"{ "settings": [ { "scope": "comment", "settings": { "foreground": "green" } } ] }"#,
        )
        .unwrap();
        let err = LanguageInfoProvider::new(manifest, Arc::new(FsResourceFetcher)).unwrap_err();
        assert!(matches!(err, ManifestError::Theme(ThemeError::InvalidColor(_))));
    }
}
