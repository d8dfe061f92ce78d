//! Pattern matcher adapter over Oniguruma.
//!
//! TextMate grammars are written against the Oniguruma dialect, so patterns are
//! compiled with `onig` and searched one by one; the earliest start wins and ties
//! go to the pattern listed first.

use crate::textmate::error::GrammarError;
use onig::{Regex, RegexOptions, Region, SearchOptions, Syntax};
use regex::Regex as RustRegex;
use std::fmt;
use std::sync::{Arc, LazyLock};

/// Which of the context-dependent anchors `\A` and `\G` may match at a scan position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AnchorContext {
    /// `\A` is allowed (first line of the document, scanning from column 0).
    pub allow_a: bool,
    /// `\G` is allowed (scanning from the current anchor position).
    pub allow_g: bool,
}

impl AnchorContext {
    /// Compute the anchor context for a scan position.
    pub fn new(is_first_line: bool, anchor_position: Option<usize>, position: usize) -> Self {
        Self {
            allow_a: is_first_line,
            allow_g: anchor_position == Some(position),
        }
    }

    fn variant_index(self) -> usize {
        (self.allow_a as usize) | ((self.allow_g as usize) << 1)
    }
}

/// A compiled pattern plus the variants needed to disable `\A`/`\G`.
#[derive(Clone)]
pub struct Pattern {
    source: Arc<str>,
    // Indexed by `AnchorContext::variant_index`. Patterns without anchors share one regex.
    variants: [Arc<Regex>; 4],
}

/// Result of a successful search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    /// Byte offset where the whole match starts.
    pub start: usize,
    /// Byte offset where the whole match ends.
    pub end: usize,
    /// Capture group ranges; index 0 is the whole match.
    pub captures: Vec<Option<(usize, usize)>>,
}

impl Pattern {
    /// Compile a pattern, validating it eagerly.
    pub fn new(source: &str) -> Result<Self, GrammarError> {
        let anchors = find_anchors(source);
        let base = Arc::new(compile(source)?);
        if anchors.is_empty() {
            return Ok(Self {
                source: Arc::from(source),
                variants: [base.clone(), base.clone(), base.clone(), base],
            });
        }

        let without_a = Arc::new(compile(&replace_anchors(source, &anchors, true, false))?);
        let without_g = Arc::new(compile(&replace_anchors(source, &anchors, false, true))?);
        let without_both = Arc::new(compile(&replace_anchors(source, &anchors, true, true))?);
        Ok(Self {
            source: Arc::from(source),
            // index: allow_a | allow_g << 1
            variants: [without_both, without_g, without_a, base],
        })
    }

    /// The pattern source as written (after backreference resolution, if any).
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Search `text` for the first match starting at or after `from`.
    pub fn search(&self, text: &str, from: usize, anchors: AnchorContext) -> Option<Match> {
        if from > text.len() {
            return None;
        }
        let regex = &self.variants[anchors.variant_index()];
        let mut region = Region::new();
        regex.search_with_options(
            text,
            from,
            text.len(),
            SearchOptions::SEARCH_OPTION_NONE,
            Some(&mut region),
        )?;

        let (start, end) = region.pos(0)?;
        let captures = (0..region.len()).map(|i| region.pos(i)).collect();
        Some(Match {
            start,
            end,
            captures,
        })
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pattern").field(&&*self.source).finish()
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for Pattern {}

/// Find the earliest match among `patterns`; ties go to the lowest index.
///
/// Returns the index of the winning pattern and its match.
pub fn find_first<'p, I>(
    patterns: I,
    text: &str,
    from: usize,
    anchors: AnchorContext,
) -> Option<(usize, Match)>
where
    I: IntoIterator<Item = &'p Pattern>,
{
    let mut best: Option<(usize, Match)> = None;
    for (idx, pattern) in patterns.into_iter().enumerate() {
        let Some(found) = pattern.search(text, from, anchors) else {
            continue;
        };
        let better = match &best {
            None => true,
            Some((_, existing)) => found.start < existing.start,
        };
        if better {
            let done = found.start == from;
            best = Some((idx, found));
            if done {
                // Nothing can start earlier; later patterns only lose the tie.
                break;
            }
        }
    }
    best
}

fn compile(source: &str) -> Result<Regex, GrammarError> {
    Regex::with_options(
        source,
        RegexOptions::REGEX_OPTION_CAPTURE_GROUP,
        Syntax::default(),
    )
    .map_err(|e| GrammarError::RegexCompile {
        pattern: source.to_string(),
        message: e.to_string(),
    })
}

#[derive(Debug, Clone, Copy)]
struct AnchorRef {
    offset: usize,
    is_g: bool,
}

fn find_anchors(source: &str) -> Vec<AnchorRef> {
    let bytes = source.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i] == b'\\' {
            match bytes[i + 1] {
                b'A' => out.push(AnchorRef {
                    offset: i,
                    is_g: false,
                }),
                b'G' => out.push(AnchorRef {
                    offset: i,
                    is_g: true,
                }),
                _ => {}
            }
            // Skip the escaped character so `\\G` is not mistaken for an anchor.
            i += 2;
        } else {
            i += 1;
        }
    }
    out
}

fn replace_anchors(source: &str, anchors: &[AnchorRef], drop_a: bool, drop_g: bool) -> String {
    let mut out = String::with_capacity(source.len());
    let mut last = 0;
    for anchor in anchors {
        let drop = if anchor.is_g { drop_g } else { drop_a };
        if !drop {
            continue;
        }
        out.push_str(&source[last..anchor.offset]);
        // A character that never occurs in text, so the anchor can never match.
        out.push('\u{FFFF}');
        last = anchor.offset + 2;
    }
    out.push_str(&source[last..]);
    out
}

static BACKREFERENCE: LazyLock<RustRegex> =
    LazyLock::new(|| RustRegex::new(r"\\(\d+)").expect("valid backreference regex"));

/// Returns `true` if an `end`/`while` source refers to captures of its `begin` match.
pub fn has_backreferences(source: &str) -> bool {
    BACKREFERENCE.is_match(source)
}

/// Substitute `\N` in `source` with the regex-escaped text of capture `N`.
pub fn resolve_backreferences(
    source: &str,
    line: &str,
    captures: &[Option<(usize, usize)>],
) -> String {
    BACKREFERENCE
        .replace_all(source, |caps: &regex::Captures<'_>| {
            let index: usize = caps[1].parse().unwrap_or(usize::MAX);
            captures
                .get(index)
                .copied()
                .flatten()
                .map(|(start, end)| escape_regex(&line[start..end]))
                .unwrap_or_default()
        })
        .into_owned()
}

fn escape_regex(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(
            c,
            '-' | '\\'
                | '{'
                | '}'
                | '*'
                | '+'
                | '?'
                | '|'
                | '^'
                | '$'
                | '.'
                | ','
                | '['
                | ']'
                | '('
                | ')'
                | '#'
                | ' '
        ) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
