use crate::textmate::definition::RawGrammar;
use crate::textmate::error::GrammarError;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// Serialization format of a raw grammar.
pub enum GrammarFormat {
    /// `.tmLanguage.json` tree format.
    Json,
    /// Apple property list (`.tmLanguage`, `.plist`).
    Plist,
    /// YAML (`.tmLanguage.yaml`).
    Yaml,
}

impl GrammarFormat {
    /// Infer the format from a file path.
    ///
    /// `.json` is JSON and `.yaml`/`.yml` is YAML; everything else is treated as a
    /// property list, which is the historical default for TextMate bundles.
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let ext = path
            .as_ref()
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("json") => Self::Json,
            Some("yaml") | Some("yml") => Self::Yaml,
            _ => Self::Plist,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Raw grammar content plus its format tag, as produced by a loader.
pub struct GrammarSource {
    /// Serialized grammar.
    pub content: String,
    /// How `content` is serialized.
    pub format: GrammarFormat,
}

impl GrammarSource {
    /// Create a source with an explicit format.
    pub fn new(content: impl Into<String>, format: GrammarFormat) -> Self {
        Self {
            content: content.into(),
            format,
        }
    }

    /// Create a JSON source.
    pub fn json(content: impl Into<String>) -> Self {
        Self::new(content, GrammarFormat::Json)
    }

    /// Create a property-list source.
    pub fn plist(content: impl Into<String>) -> Self {
        Self::new(content, GrammarFormat::Plist)
    }

    /// Create a source whose format is inferred from `path`.
    pub fn from_path_hint(content: impl Into<String>, path: impl AsRef<Path>) -> Self {
        Self::new(content, GrammarFormat::from_path(path))
    }

    /// Parse the content into a [`RawGrammar`].
    ///
    /// `origin` names the grammar in error messages.
    pub fn parse(&self, origin: &str) -> Result<RawGrammar, GrammarError> {
        let parse_error = |message: String| GrammarError::Parse {
            scope: origin.to_string(),
            message,
        };
        match self.format {
            GrammarFormat::Json => {
                serde_json::from_str(&self.content).map_err(|e| parse_error(e.to_string()))
            }
            GrammarFormat::Plist => {
                plist::from_bytes(self.content.as_bytes()).map_err(|e| parse_error(e.to_string()))
            }
            GrammarFormat::Yaml => {
                serde_yaml::from_str(&self.content).map_err(|e| parse_error(e.to_string()))
            }
        }
    }
}
