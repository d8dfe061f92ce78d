use crate::textmate::definition::{RawCaptures, RawGrammar, RawRule};
use crate::textmate::error::GrammarError;
use crate::textmate::matcher::{Pattern, has_backreferences, resolve_backreferences};
use crate::textmate::scope::ScopeName;
use crate::textmate::selector::ScopeSelector;
use regex::Regex as RustRegex;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Largest capture group index a grammar may style.
const MAX_CAPTURE_INDEX: usize = 999;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
/// Index of a rule inside its [`GrammarDocument`].
pub struct RuleId(pub(crate) u32);

impl RuleId {
    /// Position in the document's rule table.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone)]
/// A compiled TextMate grammar.
///
/// Rules live in a flat table and refer to each other by [`RuleId`]. References into
/// other grammars stay symbolic ([`IncludeTarget::External`]) and are resolved by
/// scope name at tokenization time, so documents never own each other.
pub struct GrammarDocument {
    /// Root scope (e.g. `source.python`).
    pub scope_name: ScopeName,
    /// Optional human-readable name.
    pub name: Option<String>,
    /// File extensions associated with this grammar.
    pub file_types: Vec<String>,
    /// Optional `firstLineMatch` regex source.
    pub first_line_match: Option<String>,
    /// Selector for when this grammar is used as an injector.
    pub injection_selector: Option<ScopeSelector>,
    /// Scope names this grammar declares it wants to be injected into.
    pub inject_to: Vec<ScopeName>,
    rules: Vec<Rule>,
    root: RuleId,
    repository: HashMap<String, RuleId>,
    injections: Vec<LocalInjection>,
    embedded: Vec<ScopeName>,
}

#[derive(Debug, Clone)]
/// A grammar-local injection (`injections` map entry).
pub struct LocalInjection {
    /// Where the rule applies.
    pub selector: ScopeSelector,
    /// The injected rule.
    pub rule: RuleId,
}

#[allow(clippy::large_enum_variant)]
#[derive(Debug, Clone)]
/// A compiled rule.
pub enum Rule {
    /// A single-line `match`.
    Match(MatchRule),
    /// A `begin`/`end` region.
    BeginEnd(BeginEndRule),
    /// A `begin`/`while` region.
    BeginWhile(BeginWhileRule),
    /// A reference to another rule.
    Include(IncludeTarget),
    /// A pattern list without a regex of its own (root, groups, capture rules).
    Group(GroupRule),
}

#[derive(Debug, Clone)]
/// Scope name(s), possibly with `$n` capture substitutions.
pub struct ScopeTemplate {
    raw: String,
    has_captures: bool,
}

#[derive(Debug, Clone)]
/// A compiled `match:` rule.
pub struct MatchRule {
    /// Scopes applied to the match.
    pub name: Option<ScopeTemplate>,
    /// The match regex.
    pub pattern: Pattern,
    /// Capture rules indexed by group.
    pub captures: Vec<Option<RuleId>>,
}

#[derive(Debug, Clone)]
/// An `end` or `while` regex, either static or dependent on the begin captures.
pub enum EndPattern {
    /// Compiled once at load time.
    Static(Pattern),
    /// Contains backreferences; compiled from the begin match at runtime.
    Dynamic(String),
}

impl EndPattern {
    fn compile(source: &str) -> Result<Self, GrammarError> {
        if has_backreferences(source) {
            // Validate with the references blanked out so broken patterns fail at load time.
            let probe = resolve_backreferences(source, "", &[]);
            Pattern::new(&probe)?;
            Ok(Self::Dynamic(source.to_string()))
        } else {
            Ok(Self::Static(Pattern::new(source)?))
        }
    }
}

#[derive(Debug, Clone)]
/// A compiled `begin`/`end` rule.
pub struct BeginEndRule {
    /// Scopes applied to the whole region including delimiters.
    pub name: Option<ScopeTemplate>,
    /// Scopes applied between the delimiters.
    pub content_name: Option<ScopeTemplate>,
    /// The begin regex.
    pub begin: Pattern,
    /// Capture rules of the begin match.
    pub begin_captures: Vec<Option<RuleId>>,
    /// The end regex.
    pub end: EndPattern,
    /// Capture rules of the end match.
    pub end_captures: Vec<Option<RuleId>>,
    /// Nested patterns active inside the region.
    pub patterns: Vec<RuleId>,
    /// Try `end` after the nested patterns.
    pub apply_end_pattern_last: bool,
}

#[derive(Debug, Clone)]
/// A compiled `begin`/`while` rule.
pub struct BeginWhileRule {
    /// Scopes applied to the whole region.
    pub name: Option<ScopeTemplate>,
    /// Scopes applied to the content.
    pub content_name: Option<ScopeTemplate>,
    /// The begin regex.
    pub begin: Pattern,
    /// Capture rules of the begin match.
    pub begin_captures: Vec<Option<RuleId>>,
    /// The while regex, checked at the start of each following line.
    pub while_: EndPattern,
    /// Capture rules of the while match.
    pub while_captures: Vec<Option<RuleId>>,
    /// Nested patterns active inside the region.
    pub patterns: Vec<RuleId>,
}

#[derive(Debug, Clone, Default)]
/// A pattern list with optional scopes.
pub struct GroupRule {
    /// Scopes applied (capture rules only).
    pub name: Option<ScopeTemplate>,
    /// Content scopes (capture rules with nested patterns).
    pub content_name: Option<ScopeTemplate>,
    /// Nested patterns.
    pub patterns: Vec<RuleId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Target of an `include`.
pub enum IncludeTarget {
    /// `#name`, resolved at compile time.
    Local(RuleId),
    /// `$self`: the root of the grammar containing the include.
    SelfRoot,
    /// `$base`: the root of the grammar being tokenized.
    BaseRoot,
    /// `scope.name` or `scope.name#rule` in another grammar.
    External {
        /// Scope name of the other grammar.
        scope: ScopeName,
        /// Repository entry, or the root when `None`.
        rule: Option<String>,
    },
}

impl GrammarDocument {
    /// Compile a parsed [`RawGrammar`], validating every regex and local reference.
    pub fn compile(raw: RawGrammar) -> Result<Self, GrammarError> {
        let scope_name = ScopeName::from(raw.scope_name.clone());
        let mut compiler = Compiler {
            scope: scope_name.clone(),
            rules: Vec::new(),
            embedded: Vec::new(),
        };

        let mut chain: Vec<HashMap<String, RuleId>> = Vec::new();
        let repository = compiler.compile_repository(&raw.repository, &mut chain)?;

        let root = compiler.reserve();
        let patterns = compiler.compile_patterns(&raw.patterns, &mut chain)?;
        compiler.rules[root.index()] = Rule::Group(GroupRule {
            name: None,
            content_name: None,
            patterns,
        });

        let mut injections = Vec::with_capacity(raw.injections.len());
        for (selector, rule) in &raw.injections {
            let rule = compiler.compile_rule(rule, &mut chain)?;
            injections.push(LocalInjection {
                selector: ScopeSelector::parse(selector),
                rule,
            });
        }

        Ok(Self {
            scope_name,
            name: raw.name,
            file_types: raw.file_types,
            first_line_match: raw.first_line_match,
            injection_selector: raw.injection_selector.as_deref().map(ScopeSelector::parse),
            inject_to: raw.inject_to.into_iter().map(ScopeName::from).collect(),
            rules: compiler.rules,
            root,
            repository,
            injections,
            embedded: compiler.embedded,
        })
    }

    /// The root rule (top-level patterns).
    pub fn root(&self) -> RuleId {
        self.root
    }

    /// Look up a rule by id.
    pub fn rule(&self, id: RuleId) -> Option<&Rule> {
        self.rules.get(id.index())
    }

    /// Look up a top-level repository entry.
    pub fn repository_rule(&self, name: &str) -> Option<RuleId> {
        self.repository.get(name).copied()
    }

    /// Grammar-local injections in declaration order.
    pub fn injections(&self) -> &[LocalInjection] {
        &self.injections
    }

    /// Scope names of other grammars referenced by includes, in first-reference order.
    pub fn embedded_scopes(&self) -> &[ScopeName] {
        &self.embedded
    }

    /// Every external include, for link-time validation.
    pub(crate) fn external_includes(&self) -> impl Iterator<Item = (&ScopeName, Option<&str>)> {
        self.rules.iter().filter_map(|rule| match rule {
            Rule::Include(IncludeTarget::External { scope, rule }) => {
                Some((scope, rule.as_deref()))
            }
            _ => None,
        })
    }
}

struct Compiler {
    scope: ScopeName,
    rules: Vec<Rule>,
    embedded: Vec<ScopeName>,
}

impl Compiler {
    fn reserve(&mut self) -> RuleId {
        let id = RuleId(self.rules.len() as u32);
        self.rules.push(Rule::Group(GroupRule::default()));
        id
    }

    fn invalid(&self, message: impl Into<String>) -> GrammarError {
        GrammarError::InvalidRule {
            scope: self.scope.clone(),
            message: message.into(),
        }
    }

    /// Reserve ids for every entry first so entries can include each other, then
    /// push the repository onto `chain` and compile the bodies.
    fn compile_repository(
        &mut self,
        repository: &HashMap<String, RawRule>,
        chain: &mut Vec<HashMap<String, RuleId>>,
    ) -> Result<HashMap<String, RuleId>, GrammarError> {
        let mut ids = HashMap::with_capacity(repository.len());
        for name in repository.keys() {
            ids.insert(name.clone(), self.reserve());
        }
        chain.push(ids.clone());
        for (name, raw) in repository {
            let rule = self.build_rule(raw, chain)?;
            self.rules[ids[name].index()] = rule;
        }
        Ok(ids)
    }

    fn compile_rule(
        &mut self,
        raw: &RawRule,
        chain: &mut Vec<HashMap<String, RuleId>>,
    ) -> Result<RuleId, GrammarError> {
        let id = self.reserve();
        let rule = self.build_rule(raw, chain)?;
        self.rules[id.index()] = rule;
        Ok(id)
    }

    fn compile_patterns(
        &mut self,
        patterns: &[RawRule],
        chain: &mut Vec<HashMap<String, RuleId>>,
    ) -> Result<Vec<RuleId>, GrammarError> {
        let mut out = Vec::with_capacity(patterns.len());
        for raw in patterns {
            if raw.is_disabled() {
                continue;
            }
            out.push(self.compile_rule(raw, chain)?);
        }
        Ok(out)
    }

    fn build_rule(
        &mut self,
        raw: &RawRule,
        chain: &mut Vec<HashMap<String, RuleId>>,
    ) -> Result<Rule, GrammarError> {
        let local_repo = raw.repository.as_ref().filter(|r| !r.is_empty());
        if let Some(repo) = local_repo {
            self.compile_repository(repo, chain)?;
        }
        let rule = self.build_rule_body(raw, chain);
        if local_repo.is_some() {
            chain.pop();
        }
        rule
    }

    fn build_rule_body(
        &mut self,
        raw: &RawRule,
        chain: &mut Vec<HashMap<String, RuleId>>,
    ) -> Result<Rule, GrammarError> {
        if let Some(include) = &raw.include {
            return self.resolve_include(include, chain).map(Rule::Include);
        }

        let name = raw.name.as_deref().map(ScopeTemplate::new);
        let content_name = raw.content_name.as_deref().map(ScopeTemplate::new);

        if let Some(source) = &raw.match_ {
            return Ok(Rule::Match(MatchRule {
                name,
                pattern: Pattern::new(source)?,
                captures: self.compile_captures(raw.captures.as_ref(), chain)?,
            }));
        }

        let patterns = match &raw.patterns {
            Some(p) => self.compile_patterns(p, chain)?,
            None => Vec::new(),
        };

        let Some(begin) = &raw.begin else {
            if raw.end.is_some() || raw.while_.is_some() {
                return Err(self.invalid("`end`/`while` without `begin`"));
            }
            return Ok(Rule::Group(GroupRule {
                name,
                content_name,
                patterns,
            }));
        };

        let begin_captures = self.compile_captures(
            raw.begin_captures.as_ref().or(raw.captures.as_ref()),
            chain,
        )?;

        if let Some(while_) = &raw.while_ {
            return Ok(Rule::BeginWhile(BeginWhileRule {
                name,
                content_name,
                begin: Pattern::new(begin)?,
                begin_captures,
                while_: EndPattern::compile(while_)?,
                while_captures: self.compile_captures(
                    raw.while_captures.as_ref().or(raw.captures.as_ref()),
                    chain,
                )?,
                patterns,
            }));
        }

        // A begin without end never closes; U+FFFF never occurs in text.
        let end = raw.end.as_deref().unwrap_or("\u{FFFF}");
        Ok(Rule::BeginEnd(BeginEndRule {
            name,
            content_name,
            begin: Pattern::new(begin)?,
            begin_captures,
            end: EndPattern::compile(end)?,
            end_captures: self.compile_captures(
                raw.end_captures.as_ref().or(raw.captures.as_ref()),
                chain,
            )?,
            patterns,
            apply_end_pattern_last: raw.applies_end_pattern_last(),
        }))
    }

    fn compile_captures(
        &mut self,
        captures: Option<&RawCaptures>,
        chain: &mut Vec<HashMap<String, RuleId>>,
    ) -> Result<Vec<Option<RuleId>>, GrammarError> {
        let Some(captures) = captures else {
            return Ok(Vec::new());
        };
        let len = captures.keys().map(|k| k.0 + 1).max().unwrap_or(0);
        if len > MAX_CAPTURE_INDEX + 1 {
            return Err(self.invalid(format!(
                "capture index {} exceeds {MAX_CAPTURE_INDEX}",
                len - 1
            )));
        }
        let mut out = vec![None; len];
        for (index, raw) in captures {
            out[index.0] = Some(self.compile_rule(raw, chain)?);
        }
        Ok(out)
    }

    fn resolve_include(
        &mut self,
        include: &str,
        chain: &[HashMap<String, RuleId>],
    ) -> Result<IncludeTarget, GrammarError> {
        match include {
            "$self" => return Ok(IncludeTarget::SelfRoot),
            "$base" => return Ok(IncludeTarget::BaseRoot),
            _ => {}
        }

        if let Some(name) = include.strip_prefix('#') {
            return chain
                .iter()
                .rev()
                .find_map(|repo| repo.get(name).copied())
                .map(IncludeTarget::Local)
                .ok_or_else(|| GrammarError::UnresolvedRuleReference {
                    scope: self.scope.clone(),
                    reference: include.to_string(),
                });
        }

        let (scope, rule) = match include.split_once('#') {
            Some((scope, rule)) => (scope, Some(rule.to_string())),
            None => (include, None),
        };
        if scope.is_empty() {
            return Err(GrammarError::UnresolvedRuleReference {
                scope: self.scope.clone(),
                reference: include.to_string(),
            });
        }

        let scope = ScopeName::new(scope);
        if scope == self.scope {
            // `source.self#name` written out in full.
            return match rule {
                None => Ok(IncludeTarget::SelfRoot),
                Some(name) => chain
                    .first()
                    .and_then(|repo| repo.get(&name).copied())
                    .map(IncludeTarget::Local)
                    .ok_or_else(|| GrammarError::UnresolvedRuleReference {
                        scope: self.scope.clone(),
                        reference: include.to_string(),
                    }),
            };
        }

        if !self.embedded.contains(&scope) {
            self.embedded.push(scope.clone());
        }
        Ok(IncludeTarget::External { scope, rule })
    }
}

static CAPTURE_REF: LazyLock<RustRegex> = LazyLock::new(|| {
    RustRegex::new(r"\$(\d+)|\$\{(\d+):/(downcase|upcase)\}").expect("valid capture regex")
});

impl ScopeTemplate {
    fn new(raw: &str) -> Self {
        Self {
            raw: raw.to_string(),
            has_captures: CAPTURE_REF.is_match(raw),
        }
    }

    /// Expand into individual scope names using capture text from `line`.
    pub fn expand(&self, line: &str, captures: &[Option<(usize, usize)>]) -> Vec<ScopeName> {
        if !self.has_captures {
            return self.raw.split_whitespace().map(ScopeName::new).collect();
        }

        let substituted = CAPTURE_REF.replace_all(&self.raw, |caps: &regex::Captures<'_>| {
            let (index, transform) = match (caps.get(1), caps.get(2)) {
                (Some(i), _) => (i.as_str(), None),
                (None, Some(i)) => (i.as_str(), caps.get(3).map(|m| m.as_str())),
                _ => return String::new(),
            };
            let Some((start, end)) = index
                .parse::<usize>()
                .ok()
                .and_then(|i| captures.get(i).copied().flatten())
            else {
                return caps[0].to_string();
            };
            // Dots in captured text would split the scope; drop leading ones like TextMate.
            let text = line[start..end].trim_start_matches('.');
            match transform {
                Some("downcase") => text.to_lowercase(),
                Some("upcase") => text.to_uppercase(),
                _ => text.to_string(),
            }
        });
        substituted.split_whitespace().map(ScopeName::new).collect()
    }

    /// The template as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}
