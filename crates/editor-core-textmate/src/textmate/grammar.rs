use crate::textmate::compiler::{GrammarDocument, IncludeTarget, Rule, RuleId};
use crate::textmate::error::GrammarError;
use crate::textmate::matcher::Pattern;
use crate::textmate::scope::ScopeName;
use crate::textmate::selector::ScopeSelector;
use crate::textmate::stack::{RuleRef, RuleStack, StackFrame};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone)]
/// An injection active in a [`Grammar`].
pub struct Injection {
    /// Where the injection applies.
    pub selector: ScopeSelector,
    /// Grammar that owns the injected rule.
    pub grammar: ScopeName,
    /// The injected rule.
    pub rule: RuleId,
}

#[derive(Debug, Clone)]
pub(crate) struct ActivePattern {
    pub(crate) rule: RuleRef,
    pub(crate) pattern: Pattern,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum PatternListKey {
    // Nested patterns of a rule on the stack.
    Children(RuleRef),
    // An injected rule itself.
    Injected(RuleRef),
}

/// A root grammar linked with every grammar it can reach.
///
/// Holds the root [`GrammarDocument`], the documents it embeds (transitively) and the
/// grammars injected into it, keyed by scope name. Documents never reference each other
/// directly; includes across grammars are looked up here by scope name.
pub struct Grammar {
    scope_name: ScopeName,
    documents: HashMap<ScopeName, Arc<GrammarDocument>>,
    injections: Vec<Injection>,
    pattern_lists: Mutex<HashMap<PatternListKey, Arc<[ActivePattern]>>>,
}

impl fmt::Debug for Grammar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut scopes: Vec<_> = self.documents.keys().map(|s| s.as_str()).collect();
        scopes.sort_unstable();
        f.debug_struct("Grammar")
            .field("scope_name", &self.scope_name)
            .field("documents", &scopes)
            .field("injections", &self.injections.len())
            .finish()
    }
}

impl Grammar {
    /// Link `root` with the documents it can reach.
    ///
    /// `documents` must contain every loaded embedded grammar and injector; `injectors`
    /// lists the scope names injected into `root` in registration order. Cross-grammar
    /// includes naming a grammar absent from `documents`, or a repository entry that
    /// does not exist, fail with [`GrammarError::UnresolvedRuleReference`]. A missing
    /// injector fails with [`GrammarError::NotFound`].
    pub fn link(
        root: Arc<GrammarDocument>,
        documents: impl IntoIterator<Item = Arc<GrammarDocument>>,
        injectors: &[ScopeName],
    ) -> Result<Self, GrammarError> {
        let scope_name = root.scope_name.clone();
        let mut by_scope: HashMap<ScopeName, Arc<GrammarDocument>> = documents
            .into_iter()
            .map(|doc| (doc.scope_name.clone(), doc))
            .collect();
        by_scope.insert(scope_name.clone(), root.clone());

        for doc in by_scope.values() {
            for (scope, rule) in doc.external_includes() {
                let resolved = match (by_scope.get(scope), rule) {
                    (None, _) => false,
                    (Some(_), None) => true,
                    (Some(target), Some(rule)) => target.repository_rule(rule).is_some(),
                };
                if !resolved {
                    return Err(GrammarError::UnresolvedRuleReference {
                        scope: doc.scope_name.clone(),
                        reference: match rule {
                            Some(rule) => format!("{scope}#{rule}"),
                            None => scope.to_string(),
                        },
                    });
                }
            }
        }

        let mut injections: Vec<Injection> = root
            .injections()
            .iter()
            .map(|local| Injection {
                selector: local.selector.clone(),
                grammar: scope_name.clone(),
                rule: local.rule,
            })
            .collect();
        for injector in injectors {
            let doc = by_scope
                .get(injector)
                .ok_or_else(|| GrammarError::NotFound(injector.clone()))?;
            let Some(selector) = &doc.injection_selector else {
                tracing::debug!(
                    injector = %injector,
                    target = %scope_name,
                    "injector has no injectionSelector; skipping"
                );
                continue;
            };
            injections.push(Injection {
                selector: selector.clone(),
                grammar: injector.clone(),
                rule: doc.root(),
            });
        }

        Ok(Self {
            scope_name,
            documents: by_scope,
            injections,
            pattern_lists: Mutex::new(HashMap::new()),
        })
    }

    /// Root scope name.
    pub fn scope_name(&self) -> &ScopeName {
        &self.scope_name
    }

    /// A linked document by scope name.
    pub fn document(&self, scope: &str) -> Option<&Arc<GrammarDocument>> {
        self.documents.get(scope)
    }

    /// Scope names of all linked documents, root included.
    pub fn document_scopes(&self) -> impl Iterator<Item = &ScopeName> {
        self.documents.keys()
    }

    /// Active injections: root-local ones first, then injectors in registration order.
    pub fn injections(&self) -> &[Injection] {
        &self.injections
    }

    /// The state of the first line of a document, before any text is consumed.
    pub(crate) fn root_stack(&self) -> Result<RuleStack, GrammarError> {
        let root = self.document_or_err(&self.scope_name)?.root();
        Ok(RuleStack::INITIAL.push(StackFrame {
            parent: None,
            depth: 0,
            rule: RuleRef {
                grammar: self.scope_name.clone(),
                rule: root,
            },
            enter_pos: None,
            anchor_pos: None,
            begin_captured_eol: false,
            end_pattern: None,
            name_scopes: vec![self.scope_name.clone()],
            content_scopes: vec![self.scope_name.clone()],
        }))
    }

    fn document_or_err(&self, scope: &ScopeName) -> Result<&Arc<GrammarDocument>, GrammarError> {
        self.documents
            .get(scope)
            .ok_or_else(|| GrammarError::NotFound(scope.clone()))
    }

    pub(crate) fn rule(&self, rule: &RuleRef) -> Result<&Rule, GrammarError> {
        self.document_or_err(&rule.grammar)?
            .rule(rule.rule)
            .ok_or_else(|| GrammarError::UnresolvedRuleReference {
                scope: rule.grammar.clone(),
                reference: format!("rule #{}", rule.rule.index()),
            })
    }

    /// Patterns scanned while `rule` is the innermost frame.
    pub(crate) fn child_patterns(&self, rule: &RuleRef) -> Arc<[ActivePattern]> {
        self.pattern_list(PatternListKey::Children(rule.clone()))
    }

    /// Patterns contributed by an injected rule.
    pub(crate) fn injected_patterns(&self, rule: &RuleRef) -> Arc<[ActivePattern]> {
        self.pattern_list(PatternListKey::Injected(rule.clone()))
    }

    fn pattern_list(&self, key: PatternListKey) -> Arc<[ActivePattern]> {
        if let Some(hit) = self.pattern_lists.lock().get(&key) {
            return hit.clone();
        }

        let mut out = Vec::new();
        let mut visiting = HashSet::new();
        match &key {
            PatternListKey::Children(rule) => {
                if let Some(children) = self.children_of(rule) {
                    for child in children {
                        self.collect(&rule.grammar, *child, &mut out, &mut visiting);
                    }
                }
            }
            PatternListKey::Injected(rule) => {
                self.collect(&rule.grammar, rule.rule, &mut out, &mut visiting);
            }
        }

        let list: Arc<[ActivePattern]> = out.into();
        self.pattern_lists.lock().insert(key, list.clone());
        list
    }

    fn children_of(&self, rule: &RuleRef) -> Option<&[RuleId]> {
        match self.rule(rule).ok()? {
            Rule::BeginEnd(r) => Some(&r.patterns),
            Rule::BeginWhile(r) => Some(&r.patterns),
            Rule::Group(r) => Some(&r.patterns),
            Rule::Match(_) | Rule::Include(_) => None,
        }
    }

    /// Flatten `id` into the rules whose regexes take part in a scan.
    fn collect(
        &self,
        grammar: &ScopeName,
        id: RuleId,
        out: &mut Vec<ActivePattern>,
        visiting: &mut HashSet<RuleRef>,
    ) {
        let Some(doc) = self.documents.get(grammar) else {
            return;
        };
        let Some(rule) = doc.rule(id) else {
            return;
        };
        let this = RuleRef {
            grammar: grammar.clone(),
            rule: id,
        };

        match rule {
            Rule::Match(r) => out.push(ActivePattern {
                rule: this,
                pattern: r.pattern.clone(),
            }),
            Rule::BeginEnd(r) => out.push(ActivePattern {
                rule: this,
                pattern: r.begin.clone(),
            }),
            Rule::BeginWhile(r) => out.push(ActivePattern {
                rule: this,
                pattern: r.begin.clone(),
            }),
            Rule::Group(r) => {
                if !visiting.insert(this) {
                    return;
                }
                for child in &r.patterns {
                    self.collect(grammar, *child, out, visiting);
                }
            }
            Rule::Include(target) => {
                if !visiting.insert(this) {
                    return;
                }
                let Some((target_grammar, target_rule)) = self.resolve_include(grammar, target)
                else {
                    return;
                };
                self.collect(&target_grammar, target_rule, out, visiting);
            }
        }
    }

    fn resolve_include(
        &self,
        grammar: &ScopeName,
        target: &IncludeTarget,
    ) -> Option<(ScopeName, RuleId)> {
        match target {
            IncludeTarget::Local(id) => Some((grammar.clone(), *id)),
            IncludeTarget::SelfRoot => {
                let doc = self.documents.get(grammar)?;
                Some((grammar.clone(), doc.root()))
            }
            IncludeTarget::BaseRoot => {
                let doc = self.documents.get(&self.scope_name)?;
                Some((self.scope_name.clone(), doc.root()))
            }
            IncludeTarget::External { scope, rule } => {
                let Some(doc) = self.documents.get(scope) else {
                    tracing::trace!(include = %scope, "embedded grammar not loaded");
                    return None;
                };
                let id = match rule {
                    Some(name) => doc.repository_rule(name)?,
                    None => doc.root(),
                };
                Some((scope.clone(), id))
            }
        }
    }
}
