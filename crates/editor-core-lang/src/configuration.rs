use crate::CommentConfig;
use fancy_regex::Regex;
use serde::Deserialize;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
/// Errors produced while loading a language configuration.
pub enum ConfigurationError {
    #[error("language configuration parse error: {0}")]
    /// The document is not valid JSON for the configuration model.
    Parse(#[from] serde_json::Error),

    #[error("invalid regex in '{field}': {message}")]
    /// A regex-valued field failed to compile.
    InvalidRegex {
        /// Dotted path of the field (e.g. `indentationRules.increaseIndentPattern`).
        field: &'static str,
        /// Compiler error message.
        message: String,
    },
}

/// A regex-valued configuration field, compiled at load time.
#[derive(Clone)]
pub struct ConfigRegex {
    source: String,
    regex: Regex,
}

impl ConfigRegex {
    fn compile(field: &'static str, raw: &RawRegex) -> Result<Self, ConfigurationError> {
        let (pattern, flags) = match raw {
            RawRegex::Pattern(p) => (p.as_str(), ""),
            RawRegex::WithFlags { pattern, flags } => (pattern.as_str(), flags.as_deref().unwrap_or("")),
        };

        let inline: String = flags
            .chars()
            .filter(|c| matches!(c, 'i' | 'm' | 's'))
            .collect();
        let source = if inline.is_empty() {
            pattern.to_string()
        } else {
            format!("(?{inline}){pattern}")
        };

        let regex = Regex::new(&source).map_err(|e| ConfigurationError::InvalidRegex {
            field,
            message: e.to_string(),
        })?;
        Ok(Self { source, regex })
    }

    /// The pattern as compiled, with flags folded in as an inline group.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// The compiled regex.
    pub fn regex(&self) -> &Regex {
        &self.regex
    }

    /// Returns `true` if the pattern matches somewhere in `text`. Runtime match errors
    /// (backtracking limits) count as no match.
    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text).unwrap_or(false)
    }
}

impl fmt::Debug for ConfigRegex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ConfigRegex").field(&self.source).finish()
    }
}

impl PartialEq for ConfigRegex {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A pair that is closed automatically when its opening part is typed.
pub struct AutoClosingPair {
    /// Opening text.
    pub open: String,
    /// Closing text.
    pub close: String,
    /// Token types (`string`, `comment`) in which the pair is not auto-closed.
    pub not_in: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
/// Regexes driving automatic indentation.
pub struct IndentationRules {
    /// A line matching this is dedented.
    pub decrease_indent_pattern: ConfigRegex,
    /// Lines after one matching this are indented.
    pub increase_indent_pattern: ConfigRegex,
    /// Only the next line after one matching this is indented.
    pub indent_next_line_pattern: Option<ConfigRegex>,
    /// Lines matching this are left alone.
    pub un_indented_line_pattern: Option<ConfigRegex>,
}

#[derive(Debug, Clone, PartialEq)]
/// Region markers for folding (e.g. `#region` / `#endregion`).
pub struct FoldingMarkers {
    /// Start marker.
    pub start: ConfigRegex,
    /// End marker.
    pub end: ConfigRegex,
}

#[derive(Debug, Clone, PartialEq, Default)]
/// Folding behavior.
pub struct FoldingRules {
    /// Indentation-based folding where blank lines belong to the following block.
    pub offside: bool,
    /// Explicit region markers.
    pub markers: Option<FoldingMarkers>,
}

/// Editing behavior for a language, loaded from a `language-configuration.json` style
/// document.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LanguageConfiguration {
    /// Comment tokens.
    pub comments: Option<CommentConfig>,
    /// Bracket pairs used for matching and indentation.
    pub brackets: Vec<(String, String)>,
    /// Pairs closed automatically.
    pub auto_closing_pairs: Vec<AutoClosingPair>,
    /// Pairs used to surround a selection.
    pub surrounding_pairs: Vec<(String, String)>,
    /// What counts as a word.
    pub word_pattern: Option<ConfigRegex>,
    /// Indentation regexes.
    pub indentation_rules: Option<IndentationRules>,
    /// Folding rules.
    pub folding: Option<FoldingRules>,
}

impl LanguageConfiguration {
    /// Parse a configuration document and compile its regex-valued fields.
    pub fn from_json(json: &str) -> Result<Self, ConfigurationError> {
        let raw: RawConfiguration = serde_json::from_str(json)?;
        raw.into_configuration()
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawRegex {
    Pattern(String),
    WithFlags {
        pattern: String,
        #[serde(default)]
        flags: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawPair {
    Tuple(String, String),
    Object {
        open: String,
        close: String,
        #[serde(default, rename = "notIn")]
        not_in: Vec<String>,
    },
}

impl RawPair {
    fn into_auto_closing(self) -> AutoClosingPair {
        match self {
            RawPair::Tuple(open, close) => AutoClosingPair {
                open,
                close,
                not_in: Vec::new(),
            },
            RawPair::Object {
                open,
                close,
                not_in,
            } => AutoClosingPair {
                open,
                close,
                not_in,
            },
        }
    }

    fn into_tuple(self) -> (String, String) {
        match self {
            RawPair::Tuple(open, close) | RawPair::Object { open, close, .. } => (open, close),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawComments {
    #[serde(default)]
    line_comment: Option<String>,
    #[serde(default)]
    block_comment: Option<(String, String)>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawIndentationRules {
    decrease_indent_pattern: RawRegex,
    increase_indent_pattern: RawRegex,
    #[serde(default)]
    indent_next_line_pattern: Option<RawRegex>,
    #[serde(default)]
    un_indented_line_pattern: Option<RawRegex>,
}

#[derive(Debug, Deserialize)]
struct RawMarkers {
    start: RawRegex,
    end: RawRegex,
}

#[derive(Debug, Default, Deserialize)]
struct RawFolding {
    #[serde(default)]
    offside: bool,
    #[serde(default)]
    markers: Option<RawMarkers>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConfiguration {
    #[serde(default)]
    comments: Option<RawComments>,
    #[serde(default)]
    brackets: Vec<(String, String)>,
    #[serde(default)]
    auto_closing_pairs: Vec<RawPair>,
    #[serde(default)]
    surrounding_pairs: Vec<RawPair>,
    #[serde(default)]
    word_pattern: Option<RawRegex>,
    #[serde(default)]
    indentation_rules: Option<RawIndentationRules>,
    #[serde(default)]
    folding: Option<RawFolding>,
}

impl RawConfiguration {
    fn into_configuration(self) -> Result<LanguageConfiguration, ConfigurationError> {
        let comments = self.comments.map(|c| {
            let (block_start, block_end) = match c.block_comment {
                Some((start, end)) => (Some(start), Some(end)),
                None => (None, None),
            };
            CommentConfig {
                line: c.line_comment,
                block_start,
                block_end,
            }
        });

        let word_pattern = self
            .word_pattern
            .as_ref()
            .map(|r| ConfigRegex::compile("wordPattern", r))
            .transpose()?;

        let indentation_rules = match &self.indentation_rules {
            Some(rules) => Some(IndentationRules {
                decrease_indent_pattern: ConfigRegex::compile(
                    "indentationRules.decreaseIndentPattern",
                    &rules.decrease_indent_pattern,
                )?,
                increase_indent_pattern: ConfigRegex::compile(
                    "indentationRules.increaseIndentPattern",
                    &rules.increase_indent_pattern,
                )?,
                indent_next_line_pattern: rules
                    .indent_next_line_pattern
                    .as_ref()
                    .map(|r| ConfigRegex::compile("indentationRules.indentNextLinePattern", r))
                    .transpose()?,
                un_indented_line_pattern: rules
                    .un_indented_line_pattern
                    .as_ref()
                    .map(|r| ConfigRegex::compile("indentationRules.unIndentedLinePattern", r))
                    .transpose()?,
            }),
            None => None,
        };

        let folding = match &self.folding {
            Some(folding) => Some(FoldingRules {
                offside: folding.offside,
                markers: match &folding.markers {
                    Some(m) => Some(FoldingMarkers {
                        start: ConfigRegex::compile("folding.markers.start", &m.start)?,
                        end: ConfigRegex::compile("folding.markers.end", &m.end)?,
                    }),
                    None => None,
                },
            }),
            None => None,
        };

        Ok(LanguageConfiguration {
            comments,
            brackets: self.brackets,
            auto_closing_pairs: self
                .auto_closing_pairs
                .into_iter()
                .map(RawPair::into_auto_closing)
                .collect(),
            surrounding_pairs: self
                .surrounding_pairs
                .into_iter()
                .map(RawPair::into_tuple)
                .collect(),
            word_pattern,
            indentation_rules,
            folding,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const PYTHON: &str = r##"{
        "comments": { "lineComment": "#", "blockComment": ["\"\"\"", "\"\"\""] },
        "brackets": [["{", "}"], ["[", "]"], ["(", ")"]],
        "autoClosingPairs": [
            ["[", "]"],
            { "open": "\"", "close": "\"", "notIn": ["string", "comment"] }
        ],
        "surroundingPairs": [{ "open": "'", "close": "'" }, ["(", ")"]],
        "wordPattern": "(-?\\d*\\.\\d\\w*)|([^\\s\\(\\)\\[\\],.:;]+)",
        "indentationRules": {
            "increaseIndentPattern": "^\\s*(class|def|elif|else|except|finally|for|if|try|with|while)\\b.*:\\s*$",
            "decreaseIndentPattern": { "pattern": "^\\s*(ELIF|ELSE)\\b.*$", "flags": "i" }
        },
        "folding": {
            "offside": true,
            "markers": { "start": "^\\s*#\\s*region\\b", "end": "^\\s*#\\s*endregion\\b" }
        }
    }"##;

    #[test]
    fn comments_and_pairs() {
        let config = LanguageConfiguration::from_json(PYTHON).unwrap();
        let comments = config.comments.as_ref().unwrap();
        assert_eq!(comments.line.as_deref(), Some("#"));
        assert!(comments.has_block());

        assert_eq!(config.brackets.len(), 3);
        assert_eq!(
            config.auto_closing_pairs[1],
            AutoClosingPair {
                open: "\"".into(),
                close: "\"".into(),
                not_in: vec!["string".into(), "comment".into()],
            }
        );
        assert_eq!(
            config.surrounding_pairs,
            vec![("'".to_string(), "'".to_string()), ("(".to_string(), ")".to_string())]
        );
    }

    #[test]
    fn regex_fields_are_rehydrated() {
        let config = LanguageConfiguration::from_json(PYTHON).unwrap();
        let rules = config.indentation_rules.as_ref().unwrap();
        assert!(rules.increase_indent_pattern.is_match("    def foo():"));
        assert!(!rules.increase_indent_pattern.is_match("    return 1"));
        assert!(rules.decrease_indent_pattern.is_match("  else:"));
        assert_eq!(rules.decrease_indent_pattern.as_str(), "(?i)^\\s*(ELIF|ELSE)\\b.*$");
        assert!(rules.indent_next_line_pattern.is_none());

        let folding = config.folding.as_ref().unwrap();
        assert!(folding.offside);
        let markers = folding.markers.as_ref().unwrap();
        assert!(markers.start.is_match("# region imports"));
        assert!(markers.end.is_match("  #endregion"));

        assert!(config.word_pattern.as_ref().unwrap().is_match("identifier"));
    }

    #[test]
    fn invalid_regex_names_the_field() {
        let err = LanguageConfiguration::from_json(r#"{"wordPattern": "(unclosed"}"#).unwrap_err();
        match err {
            ConfigurationError::InvalidRegex { field, .. } => assert_eq!(field, "wordPattern"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn empty_document_is_valid() {
        let config = LanguageConfiguration::from_json("{}").unwrap();
        assert_eq!(config, LanguageConfiguration::default());
    }
}
