use crate::textmate::compiler::RuleId;
use crate::textmate::matcher::Pattern;
use crate::textmate::scope::ScopeName;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
/// A rule in a specific grammar.
pub(crate) struct RuleRef {
    pub(crate) grammar: ScopeName,
    pub(crate) rule: RuleId,
}

#[derive(Debug, Clone)]
pub(crate) struct StackFrame {
    pub(crate) parent: Option<Arc<StackFrame>>,
    pub(crate) depth: usize,
    pub(crate) rule: RuleRef,
    // Only meaningful while the line that pushed the frame is being scanned.
    pub(crate) enter_pos: Option<usize>,
    pub(crate) anchor_pos: Option<usize>,
    pub(crate) begin_captured_eol: bool,
    // `end`/`while` regex with backreferences substituted.
    pub(crate) end_pattern: Option<Arc<Pattern>>,
    pub(crate) name_scopes: Vec<ScopeName>,
    pub(crate) content_scopes: Vec<ScopeName>,
}

impl StackFrame {
    fn same_state(&self, other: &StackFrame) -> bool {
        self.depth == other.depth
            && self.rule == other.rule
            && self.begin_captured_eol == other.begin_captured_eol
            && self.end_pattern.as_ref().map(|p| p.source()) == other.end_pattern.as_ref().map(|p| p.source())
            && self.name_scopes == other.name_scopes
            && self.content_scopes == other.content_scopes
    }
}

/// Tokenizer state carried from the end of one line to the start of the next.
///
/// A rule stack is an immutable, shared linked list of frames: cloning is cheap and
/// tokenizing a line never mutates its input state. Two stacks compare equal when they
/// describe the same nesting of rules and scopes, so hosts can stop re-tokenizing once
/// the state after an edited line matches the state that was there before.
#[derive(Clone, Default)]
pub struct RuleStack {
    pub(crate) top: Option<Arc<StackFrame>>,
}

impl RuleStack {
    /// The state before the first line of a document.
    pub const INITIAL: RuleStack = RuleStack { top: None };

    /// Returns `true` for [`RuleStack::INITIAL`].
    pub fn is_initial(&self) -> bool {
        self.top.is_none()
    }

    /// Number of active rules, including the grammar root.
    pub fn depth(&self) -> usize {
        self.top.as_ref().map_or(0, |f| f.depth)
    }

    /// Scope path of the innermost active rule, outermost scope first.
    pub fn scopes(&self) -> &[ScopeName] {
        self.top.as_ref().map_or(&[], |f| &f.content_scopes)
    }

    pub(crate) fn frame(&self) -> Option<&Arc<StackFrame>> {
        self.top.as_ref()
    }

    pub(crate) fn push(&self, frame: StackFrame) -> RuleStack {
        RuleStack {
            top: Some(Arc::new(StackFrame {
                parent: self.top.clone(),
                depth: self.depth() + 1,
                ..frame
            })),
        }
    }

    pub(crate) fn pop(&self) -> RuleStack {
        RuleStack {
            top: self.top.as_ref().and_then(|f| f.parent.clone()),
        }
    }

    /// Pop unless only the root frame is left.
    pub(crate) fn safe_pop(&self) -> RuleStack {
        if self.depth() > 1 { self.pop() } else { self.clone() }
    }

    /// Replace the top frame with a modified copy.
    pub(crate) fn with_top(&self, update: impl FnOnce(&mut StackFrame)) -> RuleStack {
        let Some(top) = &self.top else {
            return self.clone();
        };
        let mut frame = StackFrame::clone(top);
        update(&mut frame);
        RuleStack {
            top: Some(Arc::new(frame)),
        }
    }

    /// Iterate frames from the innermost to the root.
    pub(crate) fn frames(&self) -> impl Iterator<Item = &Arc<StackFrame>> {
        std::iter::successors(self.top.as_ref(), |f| f.parent.as_ref())
    }

    /// Stack made of the frames from the root up to and including `frame`.
    pub(crate) fn at(frame: &Arc<StackFrame>) -> RuleStack {
        RuleStack {
            top: Some(frame.clone()),
        }
    }

    /// Clear line-relative positions of frames pushed on the current line.
    ///
    /// Frames from earlier lines already carry no positions, so only the top run of
    /// frames needs to be rebuilt.
    pub(crate) fn reset_positions(&self) -> RuleStack {
        let mut dirty = Vec::new();
        let mut cursor = self.top.clone();
        while let Some(frame) = cursor {
            if frame.enter_pos.is_none() && frame.anchor_pos.is_none() {
                cursor = Some(frame);
                break;
            }
            cursor = frame.parent.clone();
            dirty.push(frame);
        }

        let mut top = cursor;
        for frame in dirty.into_iter().rev() {
            top = Some(Arc::new(StackFrame {
                parent: top,
                enter_pos: None,
                anchor_pos: None,
                ..StackFrame::clone(&frame)
            }));
        }
        RuleStack { top }
    }
}

impl PartialEq for RuleStack {
    fn eq(&self, other: &Self) -> bool {
        let mut a = self.top.as_ref();
        let mut b = other.top.as_ref();
        loop {
            match (a, b) {
                (None, None) => return true,
                (Some(x), Some(y)) => {
                    if Arc::ptr_eq(x, y) {
                        return true;
                    }
                    if !x.same_state(y) {
                        return false;
                    }
                    a = x.parent.as_ref();
                    b = y.parent.as_ref();
                }
                _ => return false,
            }
        }
    }
}

impl Eq for RuleStack {}

impl fmt::Debug for RuleStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut frames: Vec<_> = self.frames().collect();
        frames.reverse();
        f.debug_list()
            .entries(frames.iter().map(|frame| {
                format!(
                    "{}#{} [{}]",
                    frame.rule.grammar,
                    frame.rule.rule.index(),
                    frame
                        .content_scopes
                        .iter()
                        .map(|s| s.as_str())
                        .collect::<Vec<_>>()
                        .join(" ")
                )
            }))
            .finish()
    }
}
