//! Tokenize a file with the TextMate grammars listed in a language manifest.
//!
//! # Usage
//!
//! ```bash
//! cargo run -p textmate-tokenize -- --manifest res/manifest.json --language python foo.py
//! cargo run -p textmate-tokenize -- --manifest res/manifest.json --language python --encoded foo.py
//! ```
//!
//! A relative `baseResourceURI` in the manifest is resolved against the manifest's
//! directory.

use clap::Parser;
use editor_core_textmate::{
    ColorTable, EncodedTokensProvider, FsResourceFetcher, LanguageInfoProvider, LanguageManifest,
    RuleStack, TokenMetadata,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Command line arguments.
#[derive(Parser, Debug)]
#[command(name = "textmate-tokenize")]
#[command(about = "Tokenize a file with TextMate grammars and print the tokens")]
struct Args {
    /// Language manifest (JSON)
    #[arg(short, long, value_name = "PATH")]
    manifest: PathBuf,

    /// Language id to tokenize as
    #[arg(short, long)]
    language: String,

    /// Print encoded token metadata instead of scope paths
    #[arg(short, long)]
    encoded: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// File to tokenize
    file: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(if args.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let manifest = load_manifest(&args.manifest).await?;
    let provider = LanguageInfoProvider::new(manifest, Arc::new(FsResourceFetcher))?;
    let info = provider.fetch_language_info(&args.language).await?;
    let Some(tokenizer) = info.tokens_provider else {
        return Err(format!("no grammar declared for language '{}'", args.language).into());
    };
    if let Some(configuration) = &info.configuration {
        debug!(language = %args.language, comments = ?configuration.comments, "language configuration loaded");
    }

    let text = tokio::fs::read_to_string(&args.file).await?;
    info!(
        file = %args.file.display(),
        grammar = %tokenizer.grammar().scope_name(),
        "tokenizing"
    );

    if args.encoded {
        let colors = provider.color_map();
        let mut state = tokenizer.initial_state();
        for (index, line) in text.lines().enumerate() {
            println!("line {}: {}", index + 1, line);
            let result = tokenizer.tokenize_encoded(line, &state);
            for token in &result.tokens {
                println!("  {}", describe_encoded(token.start, token.metadata, &colors));
            }
            state = result.end_state;
        }
    } else {
        let grammar = tokenizer.grammar();
        let mut state = RuleStack::INITIAL;
        for (index, line) in text.lines().enumerate() {
            println!("line {}: {}", index + 1, line);
            let result = grammar.tokenize_line(line, &state);
            for token in &result.tokens {
                let scopes: Vec<&str> = token.scopes.iter().map(|s| s.as_str()).collect();
                println!(
                    "  token from {} to {} ({}) with scopes {}",
                    token.start,
                    token.end,
                    &line[token.start..token.end],
                    scopes.join(", ")
                );
            }
            state = result.rule_stack;
        }
    }

    Ok(())
}

async fn load_manifest(path: &Path) -> Result<LanguageManifest, Box<dyn std::error::Error>> {
    let json = tokio::fs::read_to_string(path).await?;
    let mut manifest = LanguageManifest::from_json(&json)?;

    let base = Path::new(&manifest.base_resource_uri);
    if base.is_relative() {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        manifest.base_resource_uri = dir.join(base).to_string_lossy().into_owned();
    }
    debug!(base = %manifest.base_resource_uri, grammars = manifest.grammars.len(), "manifest loaded");
    Ok(manifest)
}

fn describe_encoded(start: usize, metadata: TokenMetadata, colors: &ColorTable) -> String {
    format!(
        "token at {}: language={} type={:?} style={:?} foreground={} background={}",
        start,
        metadata.language_id().0,
        metadata.token_type(),
        metadata.font_style(),
        colors.get(metadata.foreground()).unwrap_or("-"),
        colors.get(metadata.background()).unwrap_or("-"),
    )
}
