use crate::textmate::error::ThemeError;
use crate::textmate::metadata::{FontStyle, MAX_BACKGROUND_INDEX, MAX_FOREGROUND_INDEX};
use crate::textmate::scope::{ScopeName, scope_matches, segment_count};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const DEFAULT_FOREGROUND: &str = "#000000";
const DEFAULT_BACKGROUND: &str = "#FFFFFF";
// Resolved styles kept per theme before the cache starts over.
const STYLE_CACHE_CAPACITY: usize = 4096;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
/// A theme as written in JSON (`{ "name": ..., "settings": [...] }`).
///
/// VS Code style `tokenColors` is accepted as an alias for `settings`.
pub struct RawTheme {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Theme name.
    pub name: Option<String>,

    #[serde(default, alias = "tokenColors")]
    /// Rules in declaration order.
    pub settings: Vec<RawThemeRule>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
/// One theme rule.
pub struct RawThemeRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Optional display name.
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Selector(s); a rule without scope sets the theme defaults.
    pub scope: Option<RawThemeScope>,

    #[serde(default)]
    /// Style applied by the rule.
    pub settings: RawThemeSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
/// `scope` is either a comma separated string or a list of selectors.
pub enum RawThemeScope {
    /// `"comment, string.quoted"`
    One(String),
    /// `["comment", "string.quoted"]`
    Many(Vec<String>),
}

impl RawThemeScope {
    fn selectors(&self) -> Vec<&str> {
        match self {
            RawThemeScope::One(s) => split_selectors(s).collect(),
            RawThemeScope::Many(list) => list.iter().flat_map(|s| split_selectors(s)).collect(),
        }
    }
}

fn split_selectors(s: &str) -> impl Iterator<Item = &str> {
    s.split(',').map(str::trim).filter(|s| !s.is_empty())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Style attributes of a theme rule.
pub struct RawThemeSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Foreground color (`#RRGGBB`, `#RGB`, with optional alpha).
    pub foreground: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Background color.
    pub background: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Space separated font styles (`italic bold underline strikethrough`).
    pub font_style: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Distinct theme colors, addressed by 1-based id. Id 0 means "no color".
pub struct ColorTable {
    colors: Vec<String>,
    ids: HashMap<String, u32>,
}

impl ColorTable {
    fn intern(&mut self, color: &str) -> Result<u32, ThemeError> {
        self.intern_within(color, MAX_FOREGROUND_INDEX, ThemeError::TooManyColors)
    }

    fn intern_background(&mut self, color: &str) -> Result<u32, ThemeError> {
        self.intern_within(
            color,
            MAX_BACKGROUND_INDEX,
            ThemeError::TooManyBackgroundColors,
        )
    }

    fn intern_within(
        &mut self,
        color: &str,
        max: u32,
        overflow: fn(usize) -> ThemeError,
    ) -> Result<u32, ThemeError> {
        let color = normalize_color(color)?;
        let id = match self.ids.get(&color) {
            Some(&id) => id,
            None => self.colors.len() as u32 + 1,
        };
        if id > max {
            return Err(overflow(id as usize));
        }
        if id as usize > self.colors.len() {
            self.colors.push(color.clone());
            self.ids.insert(color, id);
        }
        Ok(id)
    }

    /// Color for `id`, normalized to upper-case `#RRGGBB` or `#RRGGBBAA`.
    pub fn get(&self, id: u32) -> Option<&str> {
        let index = id.checked_sub(1)? as usize;
        self.colors.get(index).map(String::as_str)
    }

    /// Id of a color, if the table contains it.
    pub fn id_of(&self, color: &str) -> Option<u32> {
        let color = normalize_color(color).ok()?;
        self.ids.get(&color).copied()
    }

    /// Number of colors.
    pub fn len(&self) -> usize {
        self.colors.len()
    }

    /// Returns `true` if the table has no colors.
    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    /// Colors in id order; the first entry has id 1.
    pub fn colors(&self) -> &[String] {
        &self.colors
    }

    /// `(id, color)` pairs in id order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> {
        self.colors
            .iter()
            .enumerate()
            .map(|(i, c)| (i as u32 + 1, c.as_str()))
    }
}

fn normalize_color(color: &str) -> Result<String, ThemeError> {
    let invalid = || ThemeError::InvalidColor(color.to_string());
    let hex = color.trim().strip_prefix('#').ok_or_else(invalid)?;
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(invalid());
    }
    let expanded = match hex.len() {
        3 | 4 => hex.chars().flat_map(|c| [c, c]).collect::<String>(),
        6 | 8 => hex.to_string(),
        _ => return Err(invalid()),
    };
    Ok(format!("#{}", expanded.to_ascii_uppercase()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
/// Resolved style of a scope path.
pub struct StyleAttributes {
    /// Foreground color id.
    pub foreground: u32,
    /// Background color id.
    pub background: u32,
    /// Font style bits.
    pub font_style: FontStyle,
}

#[derive(Debug, Clone)]
struct ThemeRule {
    scope: String,
    parents: Vec<String>,
    index: usize,
    foreground: Option<u32>,
    background: Option<u32>,
    font_style: Option<FontStyle>,
}

// Ordered so that the maximum is the most specific match.
type Specificity = (usize, usize, usize, usize);

impl ThemeRule {
    /// Specificity of this rule against `scopes`, or `None` if it does not apply.
    fn specificity(&self, scopes: &[ScopeName]) -> Option<Specificity> {
        let depth = scopes
            .iter()
            .rposition(|s| scope_matches(s, &self.scope))?;
        if !parents_match(&self.parents, &scopes[..depth]) {
            return None;
        }
        Some((
            depth,
            segment_count(&self.scope),
            self.parents.len(),
            self.index,
        ))
    }
}

fn parents_match(parents: &[String], ancestors: &[ScopeName]) -> bool {
    let mut remaining = ancestors.iter().rev();
    parents
        .iter()
        .rev()
        .all(|parent| remaining.by_ref().any(|scope| scope_matches(scope, parent)))
}

/// A compiled theme: defaults, rules and the color table they reference.
#[derive(Debug)]
pub struct Theme {
    name: Option<String>,
    defaults: StyleAttributes,
    rules: Vec<ThemeRule>,
    colors: ColorTable,
    cache: Mutex<HashMap<Vec<ScopeName>, StyleAttributes>>,
}

impl Default for Theme {
    fn default() -> Self {
        Self::from_raw(&RawTheme::default()).unwrap_or_else(|_| Self {
            name: None,
            defaults: StyleAttributes::default(),
            rules: Vec::new(),
            colors: ColorTable::default(),
            cache: Mutex::new(HashMap::new()),
        })
    }
}

impl Theme {
    /// Parse and compile a JSON theme.
    pub fn from_json(json: &str) -> Result<Self, ThemeError> {
        let raw: RawTheme =
            serde_json::from_str(json).map_err(|e| ThemeError::Parse(e.to_string()))?;
        Self::from_raw(&raw)
    }

    /// Compile a raw theme and build its color table.
    ///
    /// The default foreground and background always get ids 1 and 2. Background colors
    /// come next so they fit the narrower background field, then the remaining
    /// foreground colors, each in rule declaration order.
    pub fn from_raw(raw: &RawTheme) -> Result<Self, ThemeError> {
        let mut colors = ColorTable::default();

        let mut default_fg = DEFAULT_FOREGROUND;
        let mut default_bg = DEFAULT_BACKGROUND;
        let mut default_style = FontStyle::empty();
        for rule in raw.settings.iter().filter(|r| is_default_rule(r)) {
            if let Some(fg) = &rule.settings.foreground {
                default_fg = fg;
            }
            if let Some(bg) = &rule.settings.background {
                default_bg = bg;
            }
            if let Some(style) = &rule.settings.font_style {
                default_style = FontStyle::parse(style);
            }
        }
        let defaults = StyleAttributes {
            foreground: colors.intern(default_fg)?,
            background: colors.intern_background(default_bg)?,
            font_style: default_style,
        };
        for background in raw
            .settings
            .iter()
            .filter(|r| r.scope.is_some())
            .filter_map(|r| r.settings.background.as_deref())
        {
            colors.intern_background(background)?;
        }

        let mut rules = Vec::new();
        for (index, rule) in raw.settings.iter().enumerate() {
            let Some(scope) = &rule.scope else {
                continue;
            };
            let foreground = rule
                .settings
                .foreground
                .as_deref()
                .map(|c| colors.intern(c))
                .transpose()?;
            let background = rule
                .settings
                .background
                .as_deref()
                .map(|c| colors.intern_background(c))
                .transpose()?;
            let font_style = rule.settings.font_style.as_deref().map(FontStyle::parse);

            for selector in scope.selectors() {
                let mut parts: Vec<String> =
                    selector.split_whitespace().map(str::to_string).collect();
                let Some(scope) = parts.pop() else {
                    continue;
                };
                rules.push(ThemeRule {
                    scope,
                    parents: parts,
                    index,
                    foreground,
                    background,
                    font_style,
                });
            }
        }

        tracing::debug!(
            theme = raw.name.as_deref().unwrap_or("<unnamed>"),
            rules = rules.len(),
            colors = colors.len(),
            "compiled theme"
        );

        Ok(Self {
            name: raw.name.clone(),
            defaults,
            rules,
            colors,
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Theme name, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The color table referenced by resolved styles.
    pub fn color_table(&self) -> &ColorTable {
        &self.colors
    }

    /// Style used where no rule applies.
    pub fn defaults(&self) -> StyleAttributes {
        self.defaults
    }

    /// Resolve the style of a scope path (outermost first).
    ///
    /// Each attribute comes from the most specific rule that sets it: a rule matching a
    /// deeper scope wins, then one with a longer selector, then one with more parent
    /// constraints, and finally the one declared later.
    pub fn match_scopes(&self, scopes: &[ScopeName]) -> StyleAttributes {
        if let Some(hit) = self.cache.lock().get(scopes) {
            return *hit;
        }
        let resolved = self.resolve(scopes);
        let mut cache = self.cache.lock();
        if cache.len() >= STYLE_CACHE_CAPACITY {
            cache.clear();
        }
        cache.insert(scopes.to_vec(), resolved);
        resolved
    }

    fn resolve(&self, scopes: &[ScopeName]) -> StyleAttributes {
        let mut fg: Option<(Specificity, u32)> = None;
        let mut bg: Option<(Specificity, u32)> = None;
        let mut style: Option<(Specificity, FontStyle)> = None;

        for rule in &self.rules {
            let Some(spec) = rule.specificity(scopes) else {
                continue;
            };
            if let Some(value) = rule.foreground
                && fg.is_none_or(|(best, _)| spec >= best)
            {
                fg = Some((spec, value));
            }
            if let Some(value) = rule.background
                && bg.is_none_or(|(best, _)| spec >= best)
            {
                bg = Some((spec, value));
            }
            if let Some(value) = rule.font_style
                && style.is_none_or(|(best, _)| spec >= best)
            {
                style = Some((spec, value));
            }
        }

        StyleAttributes {
            foreground: fg.map_or(self.defaults.foreground, |(_, v)| v),
            background: bg.map_or(self.defaults.background, |(_, v)| v),
            font_style: style.map_or(self.defaults.font_style, |(_, v)| v),
        }
    }
}

fn is_default_rule(rule: &RawThemeRule) -> bool {
    match &rule.scope {
        None => true,
        Some(scope) => scope.selectors().is_empty(),
    }
}
