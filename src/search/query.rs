//! Compiles free-form search text into FTS5 MATCH syntax.
//!
//! Plain words become prefix queries (`hello` → `hello*`), multi-word
//! input becomes an order-independent AND (`hello world` →
//! `hello* AND world*`), and anything carrying characters FTS5 treats as
//! syntax is quoted as a phrase. Explicit `AND`/`OR`/`NOT` queries are
//! tokenized so operators and grouping parentheses survive verbatim while
//! each operand is compiled on its own.

/// Characters that are FTS5 syntax and always force quoting.
const HARD_CHARS: &[char] = &[
    '"', '\'', '(', ')', '[', ']', '{', '}', '+', '!', '@', '#', '$', '%', '^', '&', '=', '|',
    '\\', '~', '`',
];

/// Punctuation the tokenizer splits on. Harmless inside a quoted phrase but
/// not next to a bare `*`.
const SOFT_CHARS: &[char] = &[' ', '.', ':', ';', ',', '<', '>', '?', '/', '-'];

const OPERATORS: &[&str] = &["AND", "OR", "NOT"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Word(String),
    Operator(String),
    Open,
    Close,
}

/// True when `text` carries nothing to match on: blank or a lone `*`.
pub fn is_match_all(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.is_empty() || trimmed == "*"
}

fn is_operator(word: &str) -> bool {
    OPERATORS.contains(&word)
}

fn strip_parens(word: &str) -> &str {
    word.trim_start_matches('(').trim_end_matches(')')
}

/// True when the term uses `AND`, `OR` or `NOT` as a whole word.
pub fn has_boolean_operators(term: &str) -> bool {
    term.split_whitespace()
        .any(|word| is_operator(strip_parens(word)))
}

/// Split a boolean query into operands, operators and grouping parens.
///
/// Parentheses are only treated as grouping when they balance across the
/// whole query; otherwise they stay inside the words they touch.
pub fn tokenize(term: &str) -> Vec<Token> {
    let grouped = tokenize_with_parens(term);
    if parens_balance(&grouped) {
        return grouped;
    }

    term.split_whitespace()
        .map(|word| {
            if is_operator(word) {
                Token::Operator(word.to_string())
            } else {
                Token::Word(word.to_string())
            }
        })
        .collect()
}

fn tokenize_with_parens(term: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    for word in term.split_whitespace() {
        let inner_start = word.len() - word.trim_start_matches('(').len();
        let trimmed = word.trim_start_matches('(');
        let inner = trimmed.trim_end_matches(')');
        let closing = trimmed.len() - inner.len();

        tokens.extend(std::iter::repeat(Token::Open).take(inner_start));
        if !inner.is_empty() {
            if is_operator(inner) {
                tokens.push(Token::Operator(inner.to_string()));
            } else {
                tokens.push(Token::Word(inner.to_string()));
            }
        }
        tokens.extend(std::iter::repeat(Token::Close).take(closing));
    }
    tokens
}

fn parens_balance(tokens: &[Token]) -> bool {
    let mut depth: i32 = 0;
    for token in tokens {
        match token {
            Token::Open => depth += 1,
            Token::Close => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

fn quote(term: &str) -> String {
    format!("\"{}\"", term.replace('"', "\"\""))
}

fn is_markdown_path(term: &str) -> bool {
    term.contains('/') && term.ends_with(".md")
}

fn with_prefix_star(quoted: String, term: &str, is_prefix: bool) -> String {
    if is_prefix && !is_markdown_path(term) {
        format!("{quoted}*")
    } else {
        quoted
    }
}

fn is_wildcard_pattern(term: &str) -> bool {
    term.contains('*')
        && term
            .chars()
            .all(|c| c.is_alphanumeric() || c == '*' || c == '_' || c == '-')
}

/// Compile one search term into FTS5 syntax.
///
/// With `is_prefix` set, plain words are prefix-matched. Exact lookups
/// (titles, paths) pass `false`.
pub fn prepare_search_term(term: &str, is_prefix: bool) -> String {
    let term = term.trim();
    if term == "*" {
        return term.to_string();
    }

    if has_boolean_operators(term) {
        return compile_boolean(&tokenize(term));
    }
    compile_operand(term, is_prefix)
}

/// Compile a term that carries no boolean operators.
fn compile_operand(term: &str, is_prefix: bool) -> String {
    if is_wildcard_pattern(term) {
        return term.to_string();
    }

    if term.contains(HARD_CHARS) {
        return with_prefix_star(quote(term), term, is_prefix);
    }

    if term.contains(SOFT_CHARS) {
        let words: Vec<&str> = term.split_whitespace().collect();
        let words_are_plain = words
            .iter()
            .all(|word| !word.contains(|c: char| SOFT_CHARS.contains(&c) && c != ' '));

        if words.len() > 1 && words_are_plain {
            return words
                .iter()
                .map(|word| {
                    if is_prefix && !word.ends_with('*') {
                        format!("{word}*")
                    } else {
                        word.to_string()
                    }
                })
                .collect::<Vec<_>>()
                .join(" AND ");
        }
        return with_prefix_star(quote(term), term, is_prefix);
    }

    if is_prefix {
        format!("{term}*")
    } else {
        term.to_string()
    }
}

/// Reassemble a tokenized boolean query. Runs of adjacent words form one
/// operand, compiled without prefix matching.
fn compile_boolean(tokens: &[Token]) -> String {
    let mut out = String::new();
    let mut operand: Vec<&str> = Vec::new();

    fn push_piece(out: &mut String, piece: &str) {
        if !out.is_empty() && !out.ends_with('(') {
            out.push(' ');
        }
        out.push_str(piece);
    }

    fn flush(out: &mut String, operand: &mut Vec<&str>) {
        if !operand.is_empty() {
            let compiled = compile_operand(&operand.join(" "), false);
            push_piece(out, &compiled);
            operand.clear();
        }
    }

    for token in tokens {
        match token {
            Token::Word(word) => operand.push(word),
            Token::Operator(op) => {
                flush(&mut out, &mut operand);
                push_piece(&mut out, op);
            }
            Token::Open => {
                flush(&mut out, &mut operand);
                push_piece(&mut out, "(");
            }
            Token::Close => {
                flush(&mut out, &mut operand);
                out.push(')');
            }
        }
    }
    flush(&mut out, &mut operand);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_words() {
        assert_eq!(prepare_search_term("hello", true), "hello*");
        assert_eq!(prepare_search_term("hello", false), "hello");
        assert_eq!(prepare_search_term("  spaced  ", true), "spaced*");
    }

    #[test]
    fn boolean_operands_are_compiled_separately() {
        assert_eq!(
            prepare_search_term("tier1-test AND unicode", true),
            "\"tier1-test\" AND unicode"
        );
        assert_eq!(prepare_search_term("rust OR go", true), "rust OR go");
        assert_eq!(prepare_search_term("rust NOT python", true), "rust NOT python");
    }

    #[test]
    fn multi_word_becomes_and() {
        assert_eq!(prepare_search_term("hello world", true), "hello* AND world*");
        assert_eq!(prepare_search_term("hello world", false), "hello AND world");
        assert_eq!(prepare_search_term("hello wor*", true), "hello* AND wor*");
    }

    #[test]
    fn punctuated_words_quote_the_phrase() {
        assert_eq!(
            prepare_search_term("Basic Memory v0.13.0b2", true),
            "\"Basic Memory v0.13.0b2\"*"
        );
        assert_eq!(prepare_search_term("config.json", false), "\"config.json\"");
        assert_eq!(prepare_search_term("config.json", true), "\"config.json\"*");
    }

    #[test]
    fn hard_characters_are_quoted_and_escaped() {
        assert_eq!(prepare_search_term("C++", true), "\"C++\"*");
        assert_eq!(prepare_search_term("say \"hi\"", false), "\"say \"\"hi\"\"\"");
        assert_eq!(prepare_search_term("50% off", true), "\"50% off\"*");
    }

    #[test]
    fn markdown_paths_never_get_a_star() {
        assert_eq!(prepare_search_term("notes/my-note.md", true), "\"notes/my-note.md\"");
    }

    #[test]
    fn wildcard_patterns_pass_through() {
        assert_eq!(prepare_search_term("proj*", true), "proj*");
        assert_eq!(prepare_search_term("tier_1-*", true), "tier_1-*");
        assert_eq!(prepare_search_term("*", true), "*");
    }

    #[test]
    fn parentheses_group_without_being_quoted() {
        assert_eq!(
            prepare_search_term("(rust OR go) AND async-io", true),
            "(rust OR go) AND \"async-io\""
        );
        assert_eq!(
            prepare_search_term("((a OR b)) NOT c.d", true),
            "((a OR b)) NOT \"c.d\""
        );
    }

    #[test]
    fn unbalanced_parentheses_are_literal() {
        assert_eq!(
            prepare_search_term("(rust OR go", true),
            "\"(rust\" OR go"
        );
    }

    #[test]
    fn tokenizer_emits_structure() {
        assert_eq!(
            tokenize("(a AND b) OR c"),
            vec![
                Token::Open,
                Token::Word("a".into()),
                Token::Operator("AND".into()),
                Token::Word("b".into()),
                Token::Close,
                Token::Operator("OR".into()),
                Token::Word("c".into()),
            ]
        );
    }

    #[test]
    fn lowercase_operators_are_words() {
        assert!(!has_boolean_operators("rock and roll"));
        assert_eq!(prepare_search_term("rock and roll", true), "rock* AND and* AND roll*");
    }

    #[test]
    fn match_all_detection() {
        assert!(is_match_all("*"));
        assert!(is_match_all("   "));
        assert!(is_match_all(""));
        assert!(!is_match_all("a*"));
    }
}
