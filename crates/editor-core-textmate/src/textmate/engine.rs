use crate::textmate::compiler::{EndPattern, Rule, RuleId};
use crate::textmate::error::GrammarError;
use crate::textmate::grammar::Grammar;
use crate::textmate::matcher::{AnchorContext, Match, Pattern, find_first, resolve_backreferences};
use crate::textmate::scope::ScopeName;
use crate::textmate::selector::InjectionPriority;
use crate::textmate::stack::{RuleRef, RuleStack, StackFrame};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
/// A token: the byte range `[start, end)` of a line and its scope path.
pub struct Token {
    /// Byte offset of the first byte.
    pub start: usize,
    /// Byte offset one past the last byte.
    pub end: usize,
    /// Active scopes, outermost first. The first entry is the grammar's scope name.
    pub scopes: Vec<ScopeName>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Result of tokenizing one line.
pub struct LineTokens {
    /// Tokens covering the whole line in order, without gaps.
    pub tokens: Vec<Token>,
    /// State to pass to the next line.
    pub rule_stack: RuleStack,
}

impl Grammar {
    /// Tokenize one line (without its line terminator) starting from `stack`.
    ///
    /// Pass [`RuleStack::INITIAL`] for the first line of a document and the returned
    /// `rule_stack` for each following line. The result depends only on the grammar,
    /// the line text and the incoming state.
    ///
    /// Offsets are byte offsets into `line`. The tokens cover `[0, line.len())`; an
    /// empty line yields a single empty token. If scanning hits an internal error the
    /// whole line becomes one token with the current scope path and the incoming
    /// state is returned unchanged.
    pub fn tokenize_line(&self, line: &str, stack: &RuleStack) -> LineTokens {
        match self.try_tokenize_line(line, stack) {
            Ok(tokens) => tokens,
            Err(err) => {
                tracing::error!(
                    grammar = %self.scope_name(),
                    error = %err,
                    "tokenization failed; emitting the line as a single token"
                );
                let scopes = if stack.is_initial() {
                    vec![self.scope_name().clone()]
                } else {
                    stack.scopes().to_vec()
                };
                LineTokens {
                    tokens: vec![Token {
                        start: 0,
                        end: line.len(),
                        scopes,
                    }],
                    rule_stack: stack.clone(),
                }
            }
        }
    }

    /// Tokenize a whole text line by line from the initial state.
    pub fn tokenize_text(&self, text: &str) -> Vec<LineTokens> {
        let mut stack = RuleStack::INITIAL;
        let mut out = Vec::new();
        for line in text.lines() {
            let tokens = self.tokenize_line(line, &stack);
            stack = tokens.rule_stack.clone();
            out.push(tokens);
        }
        out
    }

    fn try_tokenize_line(&self, line: &str, stack: &RuleStack) -> Result<LineTokens, GrammarError> {
        let is_first_line = stack.is_initial();
        let stack = if is_first_line {
            self.root_stack()?
        } else {
            stack.clone()
        };

        // Patterns may match the line terminator, so scan with one appended.
        let text = format!("{line}\n");
        let mut acc = TokenAccumulator::default();
        let scanner = Scanner {
            grammar: self,
            text: &text,
        };
        let end_stack = scanner.scan(stack, 0, is_first_line, true, &mut acc)?;

        Ok(LineTokens {
            tokens: acc.finish(line.len()),
            rule_stack: end_stack.reset_positions(),
        })
    }
}

#[derive(Debug, Default)]
struct TokenAccumulator {
    tokens: Vec<Token>,
    last_end: usize,
}

impl TokenAccumulator {
    fn produce(&mut self, end: usize, scopes: &[ScopeName]) {
        if self.last_end >= end {
            return;
        }
        self.tokens.push(Token {
            start: self.last_end,
            end,
            scopes: scopes.to_vec(),
        });
        self.last_end = end;
    }

    /// Drop the part produced for the appended line terminator.
    fn finish(mut self, line_len: usize) -> Vec<Token> {
        let fallback = self.tokens.last().map(|t| t.scopes.clone());
        self.tokens.retain(|t| t.start < line_len);
        if let Some(last) = self.tokens.last_mut() {
            last.end = last.end.min(line_len);
        }
        if self.tokens.is_empty() {
            self.tokens.push(Token {
                start: 0,
                end: line_len,
                scopes: fallback.unwrap_or_default(),
            });
        }
        self.tokens
    }
}

#[derive(Debug)]
enum Matched {
    /// The `end` pattern of the innermost begin/end rule.
    End,
    Rule(RuleRef),
}

#[derive(Debug)]
struct ScanState {
    stack: RuleStack,
    pos: usize,
    anchor: Option<usize>,
    is_first_line: bool,
}

struct Scanner<'a> {
    grammar: &'a Grammar,
    text: &'a str,
}

impl Scanner<'_> {
    fn scan(
        &self,
        stack: RuleStack,
        start: usize,
        is_first_line: bool,
        check_while: bool,
        acc: &mut TokenAccumulator,
    ) -> Result<RuleStack, GrammarError> {
        let len = self.text.len();
        let mut state = ScanState {
            stack,
            pos: start,
            anchor: None,
            is_first_line,
        };
        if check_while {
            self.check_while_conditions(&mut state, acc)?;
        }

        loop {
            let Some((matched, found)) = self.next_match(&state)? else {
                acc.produce(len, state.stack.scopes());
                break;
            };
            let has_advanced = found.end > state.pos;

            let stop = match matched {
                Matched::End => self.apply_end(&mut state, &found, has_advanced, acc)?,
                Matched::Rule(rule) => self.apply_rule(&mut state, rule, &found, has_advanced, acc)?,
            };
            if stop {
                acc.produce(len, state.stack.scopes());
                break;
            }

            if has_advanced {
                state.pos = found.end;
                state.is_first_line = false;
            }
        }

        Ok(state.stack)
    }

    /// Pop `begin`/`while` regions whose `while` pattern no longer matches at the start
    /// of the line, consuming the `while` matches of those that continue.
    fn check_while_conditions(
        &self,
        state: &mut ScanState,
        acc: &mut TokenAccumulator,
    ) -> Result<(), GrammarError> {
        if state.stack.frame().is_some_and(|f| f.begin_captured_eol) {
            state.anchor = Some(0);
        }

        let mut while_frames = Vec::new();
        for frame in state.stack.frames() {
            if let Rule::BeginWhile(rule) = self.grammar.rule(&frame.rule)? {
                while_frames.push((frame.clone(), rule));
            }
        }

        // Outermost first.
        for (frame, rule) in while_frames.into_iter().rev() {
            let pattern = self.dynamic_or_static(&frame, &rule.while_)?;
            let anchors = AnchorContext::new(state.is_first_line, state.anchor, state.pos);
            let frame_stack = RuleStack::at(&frame);

            let Some(found) = pattern.search(self.text, state.pos, anchors) else {
                state.stack = frame_stack.pop();
                break;
            };

            acc.produce(found.start, frame_stack.scopes());
            self.resolve_captures(
                &frame_stack,
                &frame.rule.grammar,
                &rule.while_captures,
                &found,
                state.is_first_line,
                acc,
            )?;
            acc.produce(found.end, frame_stack.scopes());
            state.anchor = Some(found.end);
            if found.end > state.pos {
                state.pos = found.end;
                state.is_first_line = false;
            }
        }
        Ok(())
    }

    fn dynamic_or_static<'p>(
        &self,
        frame: &'p StackFrame,
        pattern: &'p EndPattern,
    ) -> Result<&'p Pattern, GrammarError> {
        if let Some(resolved) = frame.end_pattern.as_deref() {
            return Ok(resolved);
        }
        match pattern {
            EndPattern::Static(p) => Ok(p),
            EndPattern::Dynamic(source) => Err(GrammarError::InvalidRule {
                scope: frame.rule.grammar.clone(),
                message: format!("unresolved backreferences in '{source}'"),
            }),
        }
    }

    /// Find the earliest match among the innermost rule's patterns and the injections.
    fn next_match(&self, state: &ScanState) -> Result<Option<(Matched, Match)>, GrammarError> {
        let Some(frame) = state.stack.frame() else {
            return Ok(None);
        };
        let anchors = AnchorContext::new(state.is_first_line, state.anchor, state.pos);

        let (end, end_last) = match self.grammar.rule(&frame.rule)? {
            Rule::BeginEnd(rule) => (
                Some(self.dynamic_or_static(frame, &rule.end)?),
                rule.apply_end_pattern_last,
            ),
            _ => (None, false),
        };
        let front = end.filter(|_| !end_last);
        let back = end.filter(|_| end_last);

        let children = self.grammar.child_patterns(&frame.rule);
        let regular = find_first(
            front
                .into_iter()
                .chain(children.iter().map(|p| &p.pattern))
                .chain(back),
            self.text,
            state.pos,
            anchors,
        )
        .map(|(index, found)| {
            let matched = match (front.is_some(), index) {
                (true, 0) => Matched::End,
                (has_front, index) => match children.get(index - usize::from(has_front)) {
                    Some(p) => Matched::Rule(p.rule.clone()),
                    // Past the children: the trailing `end` pattern.
                    None => Matched::End,
                },
            };
            (matched, found)
        });

        let injected = self.match_injections(state, anchors);

        Ok(match (regular, injected) {
            (None, None) => None,
            (Some(r), None) => Some(r),
            (None, Some((_, i))) => Some(i),
            (Some(r), Some((priority, i))) => {
                let (_, regular_match) = &r;
                let (_, injected_match) = &i;
                if injected_match.start < regular_match.start
                    || (injected_match.start == regular_match.start
                        && priority == InjectionPriority::Before)
                {
                    Some(i)
                } else {
                    Some(r)
                }
            }
        })
    }

    fn match_injections(
        &self,
        state: &ScanState,
        anchors: AnchorContext,
    ) -> Option<(InjectionPriority, (Matched, Match))> {
        let injections = self.grammar.injections();
        if injections.is_empty() {
            return None;
        }

        let scopes = state.stack.scopes();
        let mut active: Vec<_> = injections
            .iter()
            .filter_map(|inj| inj.selector.matching_priority(scopes).map(|p| (p, inj)))
            .collect();
        active.sort_by_key(|(priority, _)| match priority {
            InjectionPriority::Before => 0,
            InjectionPriority::Default => 1,
            InjectionPriority::After => 2,
        });

        let mut best: Option<(InjectionPriority, (Matched, Match))> = None;
        for (priority, injection) in active {
            let patterns = self.grammar.injected_patterns(&RuleRef {
                grammar: injection.grammar.clone(),
                rule: injection.rule,
            });
            let Some((index, found)) = find_first(
                patterns.iter().map(|p| &p.pattern),
                self.text,
                state.pos,
                anchors,
            ) else {
                continue;
            };
            if best
                .as_ref()
                .is_some_and(|(_, (_, current))| found.start >= current.start)
            {
                continue;
            }
            let done = found.start == state.pos;
            best = Some((priority, (Matched::Rule(patterns[index].rule.clone()), found)));
            if done {
                break;
            }
        }
        best
    }

    /// The innermost begin/end rule matched its `end` pattern. Returns `true` to stop.
    fn apply_end(
        &self,
        state: &mut ScanState,
        found: &Match,
        has_advanced: bool,
        acc: &mut TokenAccumulator,
    ) -> Result<bool, GrammarError> {
        let Some(frame) = state.stack.frame().cloned() else {
            return Ok(true);
        };
        let Rule::BeginEnd(rule) = self.grammar.rule(&frame.rule)? else {
            return Err(GrammarError::InvalidRule {
                scope: frame.rule.grammar.clone(),
                message: "end matched outside a begin/end rule".to_string(),
            });
        };

        acc.produce(found.start, state.stack.scopes());
        let ending = state
            .stack
            .with_top(|f| f.content_scopes = frame.name_scopes.clone());
        self.resolve_captures(
            &ending,
            &frame.rule.grammar,
            &rule.end_captures,
            found,
            state.is_first_line,
            acc,
        )?;
        acc.produce(found.end, ending.scopes());

        state.stack = ending.pop();
        state.anchor = frame.anchor_pos;

        if !has_advanced && frame.enter_pos == Some(state.pos) {
            // Pushed and popped without consuming anything: keep the rule and give up on
            // the rest of the line.
            tracing::trace!(rule = ?frame.rule, pos = state.pos, "empty begin/end cycle");
            state.stack = ending;
            return Ok(true);
        }
        Ok(false)
    }

    /// A `match` or `begin` pattern won. Returns `true` to stop.
    fn apply_rule(
        &self,
        state: &mut ScanState,
        rule_ref: RuleRef,
        found: &Match,
        has_advanced: bool,
        acc: &mut TokenAccumulator,
    ) -> Result<bool, GrammarError> {
        let rule = self.grammar.rule(&rule_ref)?;
        acc.produce(found.start, state.stack.scopes());

        let before_push = state.stack.clone();
        let name = match rule {
            Rule::Match(r) => r.name.as_ref(),
            Rule::BeginEnd(r) => r.name.as_ref(),
            Rule::BeginWhile(r) => r.name.as_ref(),
            Rule::Group(_) | Rule::Include(_) => {
                return Err(GrammarError::InvalidRule {
                    scope: rule_ref.grammar.clone(),
                    message: "matched a rule without a pattern".to_string(),
                });
            }
        };
        let mut name_scopes = before_push.scopes().to_vec();
        if let Some(name) = name {
            name_scopes.extend(name.expand(self.text, &found.captures));
        }

        let pushed = before_push.push(StackFrame {
            parent: None,
            depth: 0,
            rule: rule_ref.clone(),
            enter_pos: Some(state.pos),
            anchor_pos: state.anchor,
            begin_captured_eol: found.end == self.text.len(),
            end_pattern: None,
            content_scopes: name_scopes.clone(),
            name_scopes,
        });

        let (begin_captures, content_name, end) = match rule {
            Rule::Match(r) => {
                self.resolve_captures(
                    &pushed,
                    &rule_ref.grammar,
                    &r.captures,
                    found,
                    state.is_first_line,
                    acc,
                )?;
                acc.produce(found.end, pushed.scopes());
                state.stack = before_push;

                if !has_advanced {
                    tracing::trace!(rule = ?rule_ref, pos = state.pos, "match rule did not advance");
                    state.stack = state.stack.safe_pop();
                    return Ok(true);
                }
                return Ok(false);
            }
            Rule::BeginEnd(r) => (&r.begin_captures, r.content_name.as_ref(), &r.end),
            Rule::BeginWhile(r) => (&r.begin_captures, r.content_name.as_ref(), &r.while_),
            Rule::Group(_) | Rule::Include(_) => return Ok(true),
        };

        self.resolve_captures(
            &pushed,
            &rule_ref.grammar,
            begin_captures,
            found,
            state.is_first_line,
            acc,
        )?;
        acc.produce(found.end, pushed.scopes());
        state.anchor = Some(found.end);

        let mut content_scopes = pushed.scopes().to_vec();
        if let Some(content_name) = content_name {
            content_scopes.extend(content_name.expand(self.text, &found.captures));
        }
        let end_pattern = match end {
            EndPattern::Dynamic(source) => Some(Arc::new(Pattern::new(&resolve_backreferences(
                source,
                self.text,
                &found.captures,
            ))?)),
            EndPattern::Static(_) => None,
        };
        state.stack = pushed.with_top(|f| {
            f.content_scopes = content_scopes;
            f.end_pattern = end_pattern;
        });

        if !has_advanced && has_same_rule_entered_at(&before_push, &rule_ref, state.pos) {
            tracing::trace!(rule = ?rule_ref, pos = state.pos, "begin rule re-entered without advancing");
            state.stack = before_push;
            return Ok(true);
        }
        Ok(false)
    }

    /// Apply capture rules to the groups of `found`.
    ///
    /// Capture scopes nest by range; a capture rule with patterns re-tokenizes the
    /// captured text as if it were a region of its own.
    fn resolve_captures(
        &self,
        stack: &RuleStack,
        grammar: &ScopeName,
        capture_rules: &[Option<RuleId>],
        found: &Match,
        is_first_line: bool,
        acc: &mut TokenAccumulator,
    ) -> Result<(), GrammarError> {
        if capture_rules.is_empty() {
            return Ok(());
        }

        // (scopes, end) of captures that are still open.
        let mut open: Vec<(Vec<ScopeName>, usize)> = Vec::new();

        for (index, slot) in capture_rules.iter().enumerate() {
            let Some(id) = slot else {
                continue;
            };
            let Some(&Some((start, end))) = found.captures.get(index) else {
                continue;
            };
            if start == end {
                continue;
            }

            while let Some((scopes, open_end)) = open.pop_if(|(_, open_end)| *open_end <= start) {
                acc.produce(open_end, &scopes);
            }
            let base = open
                .last()
                .map(|(scopes, _)| scopes.clone())
                .unwrap_or_else(|| stack.scopes().to_vec());
            acc.produce(start, &base);

            let capture_ref = RuleRef {
                grammar: grammar.clone(),
                rule: *id,
            };
            let (name, content_name, has_patterns) = match self.grammar.rule(&capture_ref)? {
                Rule::Group(g) => (g.name.as_ref(), g.content_name.as_ref(), !g.patterns.is_empty()),
                Rule::Match(m) => (m.name.as_ref(), None, false),
                Rule::BeginEnd(b) => (b.name.as_ref(), b.content_name.as_ref(), !b.patterns.is_empty()),
                Rule::BeginWhile(b) => (b.name.as_ref(), b.content_name.as_ref(), !b.patterns.is_empty()),
                Rule::Include(_) => (None, None, false),
            };
            let names = name
                .map(|n| n.expand(self.text, &found.captures))
                .unwrap_or_default();

            if has_patterns {
                let mut name_scopes = stack.scopes().to_vec();
                name_scopes.extend(names);
                let mut content_scopes = name_scopes.clone();
                if let Some(content_name) = content_name {
                    content_scopes.extend(content_name.expand(self.text, &found.captures));
                }
                let nested = stack.push(StackFrame {
                    parent: None,
                    depth: 0,
                    rule: capture_ref,
                    enter_pos: Some(start),
                    anchor_pos: None,
                    begin_captured_eol: false,
                    end_pattern: None,
                    name_scopes,
                    content_scopes,
                });
                let sub = Scanner {
                    grammar: self.grammar,
                    text: &self.text[..end],
                };
                sub.scan(nested, start, is_first_line && start == 0, false, acc)?;
                continue;
            }

            if !names.is_empty() {
                let mut scopes = base;
                scopes.extend(names);
                open.push((scopes, end));
            }
        }

        while let Some((scopes, end)) = open.pop() {
            acc.produce(end, &scopes);
        }
        Ok(())
    }
}

/// Whether a frame entered at `pos` on this line already runs `rule`.
fn has_same_rule_entered_at(stack: &RuleStack, rule: &RuleRef, pos: usize) -> bool {
    stack
        .frames()
        .take_while(|f| f.enter_pos == Some(pos))
        .any(|f| &f.rule == rule)
}
