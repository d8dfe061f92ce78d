use crate::textmate::scope::{ScopeName, scope_matches};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
/// Injection precedence declared with an `L:`/`R:` selector prefix.
pub enum InjectionPriority {
    /// `L:` - the injection wins ties against the host grammar's patterns.
    Before,
    /// No prefix.
    #[default]
    Default,
    /// `R:` - the injection loses ties against the host grammar's patterns.
    After,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Expr {
    /// Each element must match a scope of the path, in order.
    Path(Vec<String>),
    Not(Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
}

impl Expr {
    fn matches(&self, scopes: &[ScopeName]) -> bool {
        match self {
            Expr::Path(parts) => path_matches(parts, scopes),
            Expr::Not(inner) => !inner.matches(scopes),
            Expr::And(all) => all.iter().all(|e| e.matches(scopes)),
            Expr::Or(any) => any.iter().any(|e| e.matches(scopes)),
        }
    }
}

fn path_matches(parts: &[String], scopes: &[ScopeName]) -> bool {
    let mut remaining = scopes.iter();
    parts
        .iter()
        .all(|part| remaining.by_ref().any(|scope| scope_matches(scope, part)))
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Alternative {
    priority: InjectionPriority,
    expr: Expr,
}

/// A parsed TextMate scope selector, as used by injection selectors.
///
/// Supports `,` separated alternatives with optional `L:`/`R:` priority, descendant
/// paths (`text.html string`), `-` exclusions, `|` and parentheses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeSelector {
    source: String,
    alternatives: Vec<Alternative>,
}

impl ScopeSelector {
    /// Parse a selector. Unparseable trailing input is ignored.
    pub fn parse(source: &str) -> Self {
        let tokens = tokenize(source);
        let mut parser = Parser { tokens, pos: 0 };
        let mut alternatives = Vec::new();

        while parser.peek().is_some() {
            let priority = match parser.peek() {
                Some("L:") => {
                    parser.pos += 1;
                    InjectionPriority::Before
                }
                Some("R:") => {
                    parser.pos += 1;
                    InjectionPriority::After
                }
                _ => InjectionPriority::Default,
            };
            if let Some(expr) = parser.conjunction() {
                alternatives.push(Alternative { priority, expr });
            }
            if parser.peek() == Some(",") {
                parser.pos += 1;
            } else {
                break;
            }
        }

        Self {
            source: source.to_string(),
            alternatives,
        }
    }

    /// The selector text as written.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Returns the priority of the first alternative matching `scopes`, if any.
    pub fn matching_priority(&self, scopes: &[ScopeName]) -> Option<InjectionPriority> {
        self.alternatives
            .iter()
            .find(|alt| alt.expr.matches(scopes))
            .map(|alt| alt.priority)
    }

    /// Returns `true` if any alternative matches `scopes`.
    pub fn matches(&self, scopes: &[ScopeName]) -> bool {
        self.matching_priority(scopes).is_some()
    }
}

fn tokenize(source: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();
    while let Some((start, c)) = chars.next() {
        match c {
            ',' | '|' | '-' | '(' | ')' => tokens.push(c.to_string()),
            c if c.is_whitespace() => {}
            _ => {
                let mut end = start + c.len_utf8();
                while let Some(&(i, next)) = chars.peek() {
                    if next.is_whitespace() || matches!(next, ',' | '|' | '(' | ')') {
                        break;
                    }
                    end = i + next.len_utf8();
                    chars.next();
                    // `L:` / `R:` stand alone even when glued to the scope.
                    if end - start == 2 && matches!(&source[start..end], "L:" | "R:") {
                        break;
                    }
                }
                tokens.push(source[start..end].to_string());
            }
        }
    }
    tokens
}

struct Parser {
    tokens: Vec<String>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&str> {
        self.tokens.get(self.pos).map(|s| s.as_str())
    }

    fn is_identifier(token: &str) -> bool {
        !matches!(token, "," | "|" | "-" | "(" | ")" | "L:" | "R:")
    }

    fn conjunction(&mut self) -> Option<Expr> {
        let mut operands = Vec::new();
        while let Some(expr) = self.operand() {
            operands.push(expr);
        }
        match operands.len() {
            0 => None,
            1 => operands.pop(),
            _ => Some(Expr::And(operands)),
        }
    }

    fn operand(&mut self) -> Option<Expr> {
        match self.peek()? {
            "-" => {
                self.pos += 1;
                let inner = self.operand()?;
                Some(Expr::Not(Box::new(inner)))
            }
            "(" => {
                self.pos += 1;
                let inner = self.disjunction();
                if self.peek() == Some(")") {
                    self.pos += 1;
                }
                inner
            }
            token if Self::is_identifier(token) => {
                let mut parts = Vec::new();
                while let Some(token) = self.peek() {
                    if !Self::is_identifier(token) {
                        break;
                    }
                    parts.push(token.to_string());
                    self.pos += 1;
                }
                Some(Expr::Path(parts))
            }
            _ => None,
        }
    }

    fn disjunction(&mut self) -> Option<Expr> {
        let mut alternatives = Vec::new();
        loop {
            if let Some(expr) = self.conjunction() {
                alternatives.push(expr);
            }
            match self.peek() {
                Some("|") | Some(",") => self.pos += 1,
                _ => break,
            }
        }
        match alternatives.len() {
            0 => None,
            1 => alternatives.pop(),
            _ => Some(Expr::Or(alternatives)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(scopes: &[&str]) -> Vec<ScopeName> {
        scopes.iter().map(|s| ScopeName::new(s)).collect()
    }

    #[test]
    fn priority_prefixes() {
        let sel = ScopeSelector::parse("L:text.html.markdown");
        assert_eq!(
            sel.matching_priority(&path(&["text.html.markdown", "markup.heading"])),
            Some(InjectionPriority::Before)
        );
        let sel = ScopeSelector::parse("R:source.js");
        assert_eq!(
            sel.matching_priority(&path(&["source.js"])),
            Some(InjectionPriority::After)
        );
        let sel = ScopeSelector::parse("source.js");
        assert_eq!(
            sel.matching_priority(&path(&["source.js"])),
            Some(InjectionPriority::Default)
        );
    }

    #[test]
    fn exclusions_and_descendants() {
        let sel = ScopeSelector::parse("L:text.html.markdown -markup.raw");
        assert!(sel.matches(&path(&["text.html.markdown", "meta.paragraph"])));
        assert!(!sel.matches(&path(&["text.html.markdown", "markup.raw.block"])));

        let sel = ScopeSelector::parse("source.hack string.quoted");
        assert!(sel.matches(&path(&["source.hack", "meta.function", "string.quoted.double"])));
        assert!(!sel.matches(&path(&["string.quoted.double", "source.hack"])));
    }

    #[test]
    fn alternatives_and_groups() {
        let sel = ScopeSelector::parse("source.js, L:source.ts");
        assert_eq!(
            sel.matching_priority(&path(&["source.ts"])),
            Some(InjectionPriority::Before)
        );
        let sel = ScopeSelector::parse("(source.js | source.ts) -comment");
        assert!(sel.matches(&path(&["source.ts"])));
        assert!(!sel.matches(&path(&["source.ts", "comment.line"])));
        assert!(!sel.matches(&path(&["source.python"])));
    }
}
