mod common;

use editor_core_textmate::{
    EncodedTokensProvider, FsResourceFetcher, GrammarError, LanguageId, LanguageInfoProvider,
    LanguageManifest, ManifestError,
};
use pretty_assertions::assert_eq;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// Lay out `{base}/grammars/*` and `{base}/configurations/*` like a static resource server.
fn resource_dir() -> TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    let grammars = dir.path().join("grammars");
    let configurations = dir.path().join("configurations");
    fs::create_dir_all(&grammars).unwrap();
    fs::create_dir_all(&configurations).unwrap();

    fs::write(grammars.join("demo.tmLanguage.json"), common::DEMO).unwrap();
    fs::write(grammars.join("embedding.tmLanguage.json"), common::EMBEDDING).unwrap();
    fs::write(grammars.join("html.plist"), common::HTML).unwrap();
    fs::write(grammars.join("todo.tmLanguage.yaml"), common::TODO).unwrap();
    fs::write(
        configurations.join("demo.json"),
        include_str!("fixtures/demo.configuration.json"),
    )
    .unwrap();
    fs::write(configurations.join("bad.json"), "{ \"comments\": ").unwrap();
    dir
}

fn manifest(base: &Path) -> LanguageManifest {
    let base = serde_json::to_string(&base.to_string_lossy()).unwrap();
    LanguageManifest::from_json(&format!(
        r#"{{
            "baseResourceURI": {base},
            "grammars": {{
                "source.demo": {{ "language": "demo", "path": "demo.tmLanguage.json", "injections": ["text.todo"] }},
                "source.embedding": {{
                    "language": "embedding",
                    "path": "embedding.tmLanguage.json",
                    "embeddedLanguages": {{ "meta.embedded.block.html": "html" }}
                }},
                "text.html.basic": {{ "language": "html", "path": "html.plist" }},
                "text.todo": {{ "path": "todo.tmLanguage.yaml" }},
                "source.broken": {{ "language": "broken", "path": "missing.json" }}
            }},
            "configurations": ["demo", "bad", "html"],
            "theme": {theme}
        }}"#,
        theme = common::DARK_THEME,
    ))
    .expect("manifest")
}

fn provider(dir: &TempDir) -> LanguageInfoProvider {
    LanguageInfoProvider::new(manifest(dir.path()), Arc::new(FsResourceFetcher)).expect("provider")
}

#[tokio::test]
async fn fetches_tokenizer_and_configuration_together() {
    let dir = resource_dir();
    let provider = provider(&dir);

    let info = provider.fetch_language_info("demo").await.unwrap();
    let tokenizer = info.tokens_provider.expect("tokenizer");
    let configuration = info.configuration.expect("configuration");

    assert_eq!(tokenizer.language_id(), LanguageId(1));
    let comments = configuration.comments.expect("comments");
    assert_eq!(comments.line.as_deref(), Some("#"));
    assert!(comments.has_block());
    assert_eq!(configuration.auto_closing_pairs[1].not_in, vec!["string"]);
    let indentation = configuration.indentation_rules.expect("indentation rules");
    assert!(indentation.increase_indent_pattern.is_match("def foo():"));

    let line = tokenizer.tokenize_encoded("x = 1 # note", &tokenizer.initial_state());
    let colors = provider.color_map();
    let foregrounds: Vec<_> = line
        .tokens
        .iter()
        .map(|t| colors.get(t.metadata.foreground()))
        .collect();
    assert_eq!(foregrounds, vec![Some("#D4D4D4"), Some("#6A9955")]);
}

#[tokio::test]
async fn language_ids_follow_the_manifest() {
    let dir = resource_dir();
    let provider = provider(&dir);
    assert_eq!(provider.language_id("demo"), Some(LanguageId(1)));
    assert_eq!(provider.language_id("embedding"), Some(LanguageId(2)));
    assert_eq!(provider.language_id("html"), Some(LanguageId(3)));
    assert_eq!(provider.language_id("broken"), Some(LanguageId(4)));
    assert_eq!(provider.language_id("bad"), Some(LanguageId(5)));
}

#[tokio::test]
async fn embedded_languages_come_from_the_manifest() {
    let dir = resource_dir();
    let provider = provider(&dir);

    let info = provider.fetch_language_info("embedding").await.unwrap();
    assert!(info.configuration.is_none());
    let tokenizer = info.tokens_provider.expect("tokenizer");

    let line = tokenizer.tokenize_encoded("x <b>div</b> z", &tokenizer.initial_state());
    let languages: Vec<_> = line
        .tokens
        .iter()
        .map(|t| (t.start, t.metadata.language_id()))
        .collect();
    assert_eq!(
        languages,
        vec![(0, LanguageId(2)), (2, LanguageId(3)), (12, LanguageId(2))]
    );
}

#[tokio::test]
async fn manifest_injections_reach_the_grammar() {
    let dir = resource_dir();
    let provider = provider(&dir);

    let info = provider.fetch_language_info("demo").await.unwrap();
    let tokenizer = info.tokens_provider.expect("tokenizer");
    assert_eq!(tokenizer.grammar().injections().len(), 1);
    assert!(tokenizer.grammar().document("text.todo").is_some());
}

#[tokio::test]
async fn configuration_without_grammar_is_still_served() {
    let dir = resource_dir();
    let provider = provider(&dir);

    // `html` is listed under configurations but has no file on disk.
    let info = provider.fetch_language_info("html").await.unwrap();
    assert!(info.tokens_provider.is_some());
    assert!(info.configuration.is_none());
}

#[tokio::test]
async fn unknown_language_has_nothing() {
    let dir = resource_dir();
    let provider = provider(&dir);
    let info = provider.fetch_language_info("cobol").await.unwrap();
    assert!(info.tokens_provider.is_none());
    assert!(info.configuration.is_none());
}

#[tokio::test]
async fn missing_grammar_file_is_a_load_error() {
    let dir = resource_dir();
    let provider = provider(&dir);
    let err = provider.fetch_language_info("broken").await.unwrap_err();
    assert!(
        matches!(
            err,
            ManifestError::Grammar(GrammarError::Load { ref scope, .. }) if scope.as_str() == "source.broken"
        ),
        "unexpected error: {err}"
    );
}

#[tokio::test]
async fn malformed_configuration_names_the_language() {
    let dir = resource_dir();
    let provider = provider(&dir);
    let err = provider.fetch_language_info("bad").await.unwrap_err();
    assert!(
        matches!(err, ManifestError::Configuration { ref language, .. } if language == "bad"),
        "unexpected error: {err}"
    );
}
