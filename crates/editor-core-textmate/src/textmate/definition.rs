use indexmap::IndexMap;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Raw TextMate grammar as written in `.tmLanguage.json`, `.tmLanguage` (plist) or YAML.
pub struct RawGrammar {
    /// Root scope (e.g. `source.python`).
    pub scope_name: String,

    #[serde(default)]
    /// Optional human-readable name.
    pub name: Option<String>,

    #[serde(default)]
    /// File extensions associated with this grammar.
    pub file_types: Vec<String>,

    #[serde(default)]
    /// Optional first-line regex used to detect the grammar.
    pub first_line_match: Option<String>,

    #[serde(default)]
    /// Top-level patterns.
    pub patterns: Vec<RawRule>,

    #[serde(default)]
    /// Named rules referenced by `#name` includes.
    pub repository: HashMap<String, RawRule>,

    #[serde(default)]
    /// Grammar-local injections: selector -> rule, in declaration order.
    pub injections: IndexMap<String, RawRule>,

    #[serde(default)]
    /// Selector describing where this grammar injects itself when used as an injector.
    pub injection_selector: Option<String>,

    #[serde(default)]
    /// Scope names this grammar wants to be injected into.
    pub inject_to: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
/// A single raw rule. The combination of present keys decides its kind.
pub struct RawRule {
    #[serde(default)]
    /// Include reference (`#name`, `$self`, `$base`, `scope`, `scope#name`).
    pub include: Option<String>,

    #[serde(default, rename = "match")]
    /// Single-line match regex.
    pub match_: Option<String>,

    #[serde(default)]
    /// Scope name(s) applied to the whole match / begin..end region.
    pub name: Option<String>,

    #[serde(default)]
    /// Scope name(s) applied between `begin` and `end`.
    pub content_name: Option<String>,

    #[serde(default)]
    /// Begin regex of a begin/end or begin/while rule.
    pub begin: Option<String>,

    #[serde(default)]
    /// End regex (may contain backreferences to `begin`).
    pub end: Option<String>,

    #[serde(default, rename = "while")]
    /// While regex checked at the start of each following line.
    pub while_: Option<String>,

    #[serde(default)]
    /// Captures for `match`, or for both `begin` and `end` when the specific maps are absent.
    pub captures: Option<RawCaptures>,

    #[serde(default)]
    /// Captures of the `begin` match.
    pub begin_captures: Option<RawCaptures>,

    #[serde(default)]
    /// Captures of the `end` match.
    pub end_captures: Option<RawCaptures>,

    #[serde(default)]
    /// Captures of the `while` match.
    pub while_captures: Option<RawCaptures>,

    #[serde(default)]
    /// Nested patterns.
    pub patterns: Option<Vec<RawRule>>,

    #[serde(default)]
    /// Rule-local repository, visible to includes inside this rule.
    pub repository: Option<HashMap<String, RawRule>>,

    #[serde(default)]
    /// Try `end` after the nested patterns instead of before them.
    pub apply_end_pattern_last: Option<Flag>,

    #[serde(default)]
    /// Disabled rules are skipped entirely.
    pub disabled: Option<Flag>,
}

/// Capture index -> capture rule.
pub type RawCaptures = BTreeMap<CaptureIndex, RawRule>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
/// A capture group index; written as a string key in JSON/plist and as an integer in YAML.
pub struct CaptureIndex(pub usize);

impl<'de> Deserialize<'de> for CaptureIndex {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct IndexVisitor;

        impl Visitor<'_> for IndexVisitor {
            type Value = CaptureIndex;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a capture group index")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                usize::try_from(v)
                    .map(CaptureIndex)
                    .map_err(|_| E::custom("capture index out of range"))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                usize::try_from(v)
                    .map(CaptureIndex)
                    .map_err(|_| E::custom("negative capture index"))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                v.trim()
                    .parse::<usize>()
                    .map(CaptureIndex)
                    .map_err(|_| E::custom(format!("invalid capture index '{v}'")))
            }
        }

        deserializer.deserialize_any(IndexVisitor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Boolean flag that grammars spell either as `true`/`false` or `1`/`0`.
pub struct Flag(pub bool);

impl<'de> Deserialize<'de> for Flag {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct FlagVisitor;

        impl Visitor<'_> for FlagVisitor {
            type Value = Flag;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a boolean or an integer")
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> Result<Self::Value, E> {
                Ok(Flag(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                Ok(Flag(v != 0))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                Ok(Flag(v != 0))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                Ok(Flag(matches!(v.trim(), "1" | "true")))
            }
        }

        deserializer.deserialize_any(FlagVisitor)
    }
}

impl RawRule {
    pub(crate) fn is_disabled(&self) -> bool {
        self.disabled.is_some_and(|f| f.0)
    }

    pub(crate) fn applies_end_pattern_last(&self) -> bool {
        self.apply_end_pattern_last.is_some_and(|f| f.0)
    }
}
