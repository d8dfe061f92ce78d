mod common;

use common::{MapLoader, grammar, summarize};
use editor_core_textmate::{GrammarError, LineTokens, RuleStack, ScopeName};
use pretty_assertions::assert_eq;

fn tokens(result: &LineTokens) -> Vec<(usize, usize, String)> {
    summarize(&result.tokens)
}

fn t(start: usize, end: usize, scopes: &str) -> (usize, usize, String) {
    (start, end, scopes.to_string())
}

const DOCUMENT: &str = "def foo():
/* open
still inside
close */ x = 1 # note
x <<EOF
hello
EOF
> quoted
> more
plain
";

#[tokio::test]
async fn line_comment_splits_the_line() {
    let grammar = grammar(MapLoader::with_fixtures(), "source.demo").await;
    let result = grammar.tokenize_line("x = 1 # note", &RuleStack::INITIAL);
    assert_eq!(
        tokens(&result),
        vec![
            t(0, 6, "source.demo"),
            t(6, 12, "source.demo comment.line.number-sign.demo"),
        ]
    );
}

#[tokio::test]
async fn offsets_are_bytes() {
    let grammar = grammar(MapLoader::with_fixtures(), "source.demo").await;
    let result = grammar.tokenize_line("é # x", &RuleStack::INITIAL);
    assert_eq!(
        tokens(&result),
        vec![
            t(0, 3, "source.demo"),
            t(3, 6, "source.demo comment.line.number-sign.demo"),
        ]
    );
}

#[tokio::test]
async fn empty_line_yields_one_empty_token() {
    let grammar = grammar(MapLoader::with_fixtures(), "source.demo").await;
    let result = grammar.tokenize_line("", &RuleStack::INITIAL);
    assert_eq!(tokens(&result), vec![t(0, 0, "source.demo")]);
}

#[tokio::test]
async fn captures_nest_inside_the_match() {
    let grammar = grammar(MapLoader::with_fixtures(), "source.demo").await;
    let result = grammar.tokenize_line("def foo():", &RuleStack::INITIAL);
    assert_eq!(
        tokens(&result),
        vec![
            t(0, 3, "source.demo keyword.other.def.demo"),
            t(3, 4, "source.demo"),
            t(4, 7, "source.demo entity.name.function.demo"),
            t(7, 10, "source.demo"),
        ]
    );
}

#[tokio::test]
async fn block_comment_spans_lines() {
    let grammar = grammar(MapLoader::with_fixtures(), "source.demo").await;
    let first = grammar.tokenize_line("a /* b", &RuleStack::INITIAL);
    assert_eq!(
        tokens(&first),
        vec![
            t(0, 2, "source.demo"),
            t(2, 4, "source.demo comment.block.demo"),
            t(4, 6, "source.demo comment.block.demo"),
        ]
    );
    assert_eq!(first.rule_stack.depth(), 2);

    let second = grammar.tokenize_line("c", &first.rule_stack);
    assert_eq!(tokens(&second), vec![t(0, 1, "source.demo comment.block.demo")]);

    let third = grammar.tokenize_line("d */ e", &second.rule_stack);
    assert_eq!(
        tokens(&third),
        vec![
            t(0, 2, "source.demo comment.block.demo"),
            t(2, 4, "source.demo comment.block.demo"),
            t(4, 6, "source.demo"),
        ]
    );
    assert_eq!(third.rule_stack.depth(), 1);
    let root = grammar.tokenize_line("", &RuleStack::INITIAL).rule_stack;
    assert_eq!(third.rule_stack, root);
}

#[tokio::test]
async fn line_without_matches_keeps_the_state() {
    let grammar = grammar(MapLoader::with_fixtures(), "source.demo").await;
    let open = grammar.tokenize_line("/* open", &RuleStack::INITIAL);
    let inside = grammar.tokenize_line("still inside", &open.rule_stack);

    assert_eq!(
        tokens(&inside),
        vec![t(0, 12, "source.demo comment.block.demo")]
    );
    assert_eq!(inside.rule_stack, open.rule_stack);
}

#[tokio::test]
async fn end_pattern_backreferences_the_begin_match() {
    let grammar = grammar(MapLoader::with_fixtures(), "source.demo").await;
    let lines = grammar.tokenize_text("x <<EOF\nhello\nEOF\ny");
    let summary: Vec<_> = lines.iter().map(tokens).collect();
    assert_eq!(
        summary,
        vec![
            vec![
                t(0, 2, "source.demo"),
                t(2, 7, "source.demo string.unquoted.heredoc.demo"),
            ],
            vec![t(0, 5, "source.demo string.unquoted.heredoc.demo")],
            vec![t(0, 3, "source.demo string.unquoted.heredoc.demo")],
            vec![t(0, 1, "source.demo")],
        ]
    );
}

#[tokio::test]
async fn heredoc_terminator_must_repeat_the_captured_word() {
    let grammar = grammar(MapLoader::with_fixtures(), "source.demo").await;
    let lines = grammar.tokenize_text("x <<END\nEOF\nEND");
    assert_eq!(
        tokens(&lines[1]),
        vec![t(0, 3, "source.demo string.unquoted.heredoc.demo")]
    );
    assert_eq!(lines[1].rule_stack.depth(), 2);
    assert_eq!(lines[2].rule_stack.depth(), 1);
}

#[tokio::test]
async fn while_rule_continues_until_the_condition_fails() {
    let grammar = grammar(MapLoader::with_fixtures(), "source.demo").await;
    let lines = grammar.tokenize_text("> a\n> b\nc");
    let summary: Vec<_> = lines.iter().map(tokens).collect();
    assert_eq!(
        summary,
        vec![
            vec![
                t(0, 2, "source.demo markup.quote.demo"),
                t(2, 3, "source.demo markup.quote.demo"),
            ],
            vec![
                t(0, 2, "source.demo markup.quote.demo"),
                t(2, 3, "source.demo markup.quote.demo"),
            ],
            vec![t(0, 1, "source.demo")],
        ]
    );
    assert_eq!(lines[1].rule_stack.depth(), 2);
    assert_eq!(lines[2].rule_stack.depth(), 1);
}

#[tokio::test]
async fn threaded_state_matches_whole_text_tokenization() {
    let grammar = grammar(MapLoader::with_fixtures(), "source.demo").await;
    let whole = grammar.tokenize_text(DOCUMENT);

    let mut state = RuleStack::INITIAL;
    let mut threaded = Vec::new();
    for line in DOCUMENT.lines() {
        let result = grammar.tokenize_line(line, &state);
        state = result.rule_stack.clone();
        threaded.push(result);
    }
    assert_eq!(threaded, whole);

    // Resuming from a saved state reproduces the rest of the document.
    let resumed: Vec<_> = DOCUMENT
        .lines()
        .skip(2)
        .scan(whole[1].rule_stack.clone(), |state, line| {
            let result = grammar.tokenize_line(line, state);
            *state = result.rule_stack.clone();
            Some(result)
        })
        .collect();
    assert_eq!(resumed, whole[2..].to_vec());
}

#[tokio::test]
async fn embedded_grammar_scopes_nest_under_the_host() {
    let grammar = grammar(MapLoader::with_fixtures(), "source.embedding").await;
    let result = grammar.tokenize_line("x <b>div</b> z", &RuleStack::INITIAL);
    assert_eq!(
        tokens(&result),
        vec![
            t(0, 2, "source.embedding"),
            t(2, 5, "source.embedding meta.embedded.block.html"),
            t(
                5,
                8,
                "source.embedding meta.embedded.block.html text.html.basic entity.name.tag.html"
            ),
            t(8, 12, "source.embedding meta.embedded.block.html"),
            t(12, 14, "source.embedding"),
        ]
    );
}

#[tokio::test]
async fn embedded_region_state_carries_both_grammars() {
    let grammar = grammar(MapLoader::with_fixtures(), "source.embedding").await;
    let open = grammar.tokenize_line("<b>", &RuleStack::INITIAL);
    let scopes: Vec<&str> = open.rule_stack.scopes().iter().map(|s| s.as_str()).collect();
    assert_eq!(
        scopes,
        vec![
            "source.embedding",
            "meta.embedded.block.html",
            "text.html.basic"
        ]
    );
}

#[tokio::test]
async fn missing_embedded_grammar_fails_the_load() {
    let loader = MapLoader::new().json("source.embedding", common::EMBEDDING);
    let (registry, _) = common::registry(loader);
    let err = registry
        .load_grammar(&ScopeName::new("source.embedding"))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        GrammarError::UnresolvedRuleReference {
            scope: ScopeName::new("source.embedding"),
            reference: "text.html.basic".into(),
        }
    );
}

#[tokio::test]
async fn missing_injector_fails_the_load() {
    let loader = MapLoader::new()
        .json("source.notes", NOTES)
        .inject("source.notes", "text.todo");
    let (registry, _) = common::registry(loader);
    let err = registry
        .load_grammar(&ScopeName::new("source.notes"))
        .await
        .unwrap_err();
    assert_eq!(err, GrammarError::NotFound(ScopeName::new("text.todo")));
}

const NOTES: &str = r##"{
    "scopeName": "source.notes",
    "patterns": [
        {
            "begin": "#",
            "end": "$",
            "name": "comment.line.notes",
            "patterns": [{ "match": "TODO", "name": "comment.word.notes" }]
        }
    ]
}"##;

#[tokio::test]
async fn left_injection_wins_ties_with_regular_patterns() {
    let loader = MapLoader::with_fixtures()
        .json("source.notes", NOTES)
        .inject("source.notes", "text.todo");
    let grammar = grammar(loader, "source.notes").await;
    assert_eq!(grammar.injections().len(), 1);

    let result = grammar.tokenize_line("# TODO", &RuleStack::INITIAL);
    assert_eq!(
        tokens(&result),
        vec![
            t(0, 1, "source.notes comment.line.notes"),
            t(1, 2, "source.notes comment.line.notes"),
            t(2, 6, "source.notes comment.line.notes keyword.todo"),
        ]
    );
}

#[tokio::test]
async fn default_injection_loses_ties_with_regular_patterns() {
    let loader = MapLoader::new()
        .json("source.notes", NOTES)
        .json(
            "text.todo.plain",
            r#"{
                "scopeName": "text.todo.plain",
                "injectionSelector": "comment",
                "patterns": [{ "match": "TODO", "name": "keyword.todo" }]
            }"#,
        )
        .inject("source.notes", "text.todo.plain");
    let grammar = grammar(loader, "source.notes").await;

    let result = grammar.tokenize_line("# TODO", &RuleStack::INITIAL);
    assert_eq!(
        tokens(&result)[2],
        t(2, 6, "source.notes comment.line.notes comment.word.notes")
    );
}

#[tokio::test]
async fn injection_selector_limits_where_it_applies() {
    let loader = MapLoader::with_fixtures()
        .json("source.notes", NOTES)
        .inject("source.notes", "text.todo");
    let grammar = grammar(loader, "source.notes").await;

    // Outside a comment the injector is not active.
    let result = grammar.tokenize_line("TODO", &RuleStack::INITIAL);
    assert_eq!(tokens(&result), vec![t(0, 4, "source.notes")]);
}

#[tokio::test]
async fn grammar_local_injection_applies_inside_its_selector() {
    let loader = MapLoader::new().json(
        "source.local",
        r#"{
            "scopeName": "source.local",
            "patterns": [{ "begin": "\"", "end": "\"", "name": "string.quoted" }],
            "injections": {
                "string": { "patterns": [{ "match": "%", "name": "constant.other.placeholder" }] }
            }
        }"#,
    );
    let grammar = grammar(loader, "source.local").await;
    let result = grammar.tokenize_line(r#"s = "x%y""#, &RuleStack::INITIAL);
    assert_eq!(
        tokens(&result),
        vec![
            t(0, 4, "source.local"),
            t(4, 5, "source.local string.quoted"),
            t(5, 6, "source.local string.quoted"),
            t(6, 7, "source.local string.quoted constant.other.placeholder"),
            t(7, 8, "source.local string.quoted"),
            t(8, 9, "source.local string.quoted"),
        ]
    );
}

#[tokio::test]
async fn zero_width_match_does_not_loop() {
    let loader = MapLoader::new().json(
        "source.empty",
        r#"{
            "scopeName": "source.empty",
            "patterns": [
                { "match": "(?=x)", "name": "meta.lookahead" },
                { "match": "y", "name": "keyword" }
            ]
        }"#,
    );
    let grammar = grammar(loader, "source.empty").await;
    let result = grammar.tokenize_line("ax y", &RuleStack::INITIAL);
    assert_eq!(result.tokens.first().map(|t| t.start), Some(0));
    assert_eq!(result.tokens.last().map(|t| t.end), Some(4));
    assert_eq!(result.rule_stack.depth(), 1);
}
