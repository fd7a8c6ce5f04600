use phf::phf_map;
use tracing::trace;

use crate::tokens::{Token, TokenKind, Whitespace};

static KEYWORDS: phf::Map<&'static str, TokenKind> = phf_map! {
    "true" => TokenKind::TrueLiteral,
    "false" => TokenKind::FalseLiteral,
    "as" => TokenKind::AsKeyword,
    "boolean" => TokenKind::BooleanKeyword,
    "number" => TokenKind::NumberKeyword,
    "string" => TokenKind::StringKeyword,
    "if" => TokenKind::IfKeyword,
    "else" => TokenKind::ElseKeyword,
    "end" => TokenKind::EndKeyword,
    "while" => TokenKind::WhileKeyword,
    "and" => TokenKind::AndKeyword,
    "or" => TokenKind::OrKeyword,
};

// Two-character operators must come before their one-character prefixes.
const SIMPLE_TOKENS: [(&str, TokenKind); 13] = [
    ("==", TokenKind::EqualEqual),
    ("=", TokenKind::Equal),
    ("!=", TokenKind::BangEqual),
    (">=", TokenKind::GreaterThanEqual),
    (">", TokenKind::GreaterThan),
    ("<=", TokenKind::LessThanEqual),
    ("<", TokenKind::LessThan),
    ("+", TokenKind::Plus),
    ("-", TokenKind::Minus),
    ("*", TokenKind::Asterisk),
    ("/", TokenKind::Slash),
    ("(", TokenKind::LeftParen),
    (")", TokenKind::RightParen),
];

fn rest(text: &str, start: usize) -> &str {
    text.get(start..).unwrap_or("")
}

pub fn lex_whitespace(text: &str, start: usize) -> Whitespace {
    let remaining = rest(text, start);
    let length = remaining
        .char_indices()
        .find(|(_, c)| !c.is_whitespace())
        .map_or(remaining.len(), |(index, _)| index);

    Whitespace::new(start, &remaining[..length])
}

pub fn lex_simple_token(text: &str, start: usize, literal: &str, kind: TokenKind) -> Option<Token> {
    let whitespace = lex_whitespace(text, start);
    if !rest(text, whitespace.end()).starts_with(literal) {
        return None;
    }

    Some(Token::new(whitespace, literal, kind))
}

pub fn lex_end_of_input(text: &str, start: usize) -> Option<Token> {
    let whitespace = lex_whitespace(text, start);
    if whitespace.end() != text.len() {
        return None;
    }

    Some(Token::new(whitespace, "", TokenKind::EndOfInput))
}

fn digits_len(text: &str) -> usize {
    text.bytes().take_while(u8::is_ascii_digit).count()
}

pub fn lex_number_literal(text: &str, start: usize) -> Option<Token> {
    let whitespace = lex_whitespace(text, start);
    let remaining = rest(text, whitespace.end());

    let mut length = digits_len(remaining);
    if remaining[length..].starts_with('.') {
        let fraction = digits_len(&remaining[length + 1..]);
        // A bare trailing point is not a number, and is not partially consumed.
        if fraction == 0 {
            return None;
        }
        length += 1 + fraction;
    }

    if length == 0 {
        return None;
    }

    Some(Token::new(
        whitespace,
        &remaining[..length],
        TokenKind::NumberLiteral,
    ))
}

pub fn lex_identifier(text: &str, start: usize) -> Option<Token> {
    let whitespace = lex_whitespace(text, start);
    let remaining = rest(text, whitespace.end());

    let mut chars = remaining.char_indices();
    match chars.next() {
        Some((_, first)) if first.is_alphabetic() => {}
        _ => return None,
    }

    let length = chars
        .find(|(_, c)| !c.is_alphanumeric())
        .map_or(remaining.len(), |(index, _)| index);

    Some(Token::new(
        whitespace,
        &remaining[..length],
        TokenKind::Identifier,
    ))
}

pub fn lex_identifier_or_keyword(text: &str, start: usize) -> Option<Token> {
    let identifier = lex_identifier(text, start)?;
    match KEYWORDS.get(identifier.text.as_str()).copied() {
        Some(kind) => Some(identifier.with_kind(kind)),
        None => Some(identifier),
    }
}

pub fn lex_string_literal(text: &str, start: usize) -> Option<Token> {
    let whitespace = lex_whitespace(text, start);
    let remaining = rest(text, whitespace.end());

    let body = remaining.strip_prefix('"')?;
    // The closing quote may sit on a later line.
    let closing = body.find('"')?;
    let length = 1 + closing + 1;

    Some(Token::new(
        whitespace,
        &remaining[..length],
        TokenKind::StringLiteral,
    ))
}

pub fn lex_next_token(text: &str, start: usize) -> Option<Token> {
    SIMPLE_TOKENS
        .iter()
        .find_map(|(literal, kind)| lex_simple_token(text, start, literal, *kind))
        .or_else(|| lex_number_literal(text, start))
        .or_else(|| lex_identifier_or_keyword(text, start))
        .or_else(|| lex_string_literal(text, start))
        .or_else(|| lex_end_of_input(text, start))
}

/// Lexes a whole submission.
///
/// Stops after the end-of-input token, or at the first position where no
/// token lexes, in which case the result has no end-of-input token.
pub fn lex_submission(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut index = 0;

    while let Some(token) = lex_next_token(text, index) {
        let done = token.kind == TokenKind::EndOfInput;
        index += token.full_len();
        tokens.push(token);
        if done {
            break;
        }
    }

    trace!(count = tokens.len(), "lexed submission");
    tokens
}

/// Lexes like [`lex_submission`], but turns each character that starts no
/// token into an `Unknown` token and carries on, so the result always ends
/// with exactly one end-of-input token.
pub fn lex_recovering(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut index = 0;

    loop {
        let token = match lex_next_token(text, index) {
            Some(token) => token,
            None => {
                let whitespace = lex_whitespace(text, index);
                let unknown: String = rest(text, whitespace.end()).chars().take(1).collect();
                Token::new(whitespace, unknown, TokenKind::Unknown)
            }
        };

        let done = token.kind == TokenKind::EndOfInput;
        index += token.full_len();
        tokens.push(token);
        if done {
            return tokens;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_token(
        token: Option<Token>,
        full_start: usize,
        full_len: usize,
        trimmed_start: usize,
        trimmed_len: usize,
    ) {
        let token = match token {
            Some(token) => token,
            None => panic!("expected a token"),
        };
        assert_eq!(token.full_start(), full_start);
        assert_eq!(token.full_len(), full_len);
        assert_eq!(token.trimmed_start(), trimmed_start);
        assert_eq!(token.trimmed_len(), trimmed_len);
    }

    #[test]
    fn whitespace() {
        let whitespace = lex_whitespace("   ", 0);
        assert_eq!(whitespace.start, 0);
        assert_eq!(whitespace.len(), 3);

        assert_eq!(lex_whitespace("", 0).len(), 0);
        assert_eq!(lex_whitespace(" \t\r\nx", 0).len(), 4);
        assert_eq!(lex_whitespace("a  b", 1), Whitespace::new(1, "  "));
    }

    #[test]
    fn number_literals() {
        assert_token(lex_number_literal("5", 0), 0, 1, 0, 1);
        assert_token(lex_number_literal("5.4", 0), 0, 3, 0, 3);
        assert_token(lex_number_literal("  123 ", 0), 0, 5, 2, 3);
        assert_token(lex_number_literal(".5", 0), 0, 2, 0, 2);
        assert_token(lex_number_literal("12+3", 0), 0, 2, 0, 2);
    }

    #[test]
    fn number_literals_that_do_not_lex() {
        for text in ["", " ", "a", "1.", "12. ", ".", "+1"] {
            assert_eq!(lex_number_literal(text, 0), None, "{:?}", text);
        }
    }

    #[test]
    fn identifiers() {
        assert_token(lex_identifier("a", 0), 0, 1, 0, 1);
        assert_token(lex_identifier(" abc123 ", 0), 0, 7, 1, 6);
        assert_eq!(lex_identifier("1a", 0), None);
        assert_eq!(lex_identifier("", 0), None);
        assert_eq!(lex_identifier("+", 0), None);
    }

    #[test]
    fn keywords_are_exact_matches() {
        let kinds = [
            ("true", TokenKind::TrueLiteral),
            ("false", TokenKind::FalseLiteral),
            ("as", TokenKind::AsKeyword),
            ("boolean", TokenKind::BooleanKeyword),
            ("number", TokenKind::NumberKeyword),
            ("string", TokenKind::StringKeyword),
            ("if", TokenKind::IfKeyword),
            ("else", TokenKind::ElseKeyword),
            ("end", TokenKind::EndKeyword),
            ("while", TokenKind::WhileKeyword),
            ("and", TokenKind::AndKeyword),
            ("or", TokenKind::OrKeyword),
        ];
        for (text, kind) in kinds {
            let token = lex_identifier_or_keyword(text, 0);
            assert_eq!(token.map(|t| t.kind), Some(kind), "{}", text);
        }

        for text in ["truefoo", "asb", "booleanb", "numbera", "endx", "iff"] {
            let tokens = lex_submission(text);
            assert_eq!(tokens.len(), 2, "{}", text);
            assert_eq!(tokens[0].kind, TokenKind::Identifier);
            assert_eq!(tokens[0].text, text);
        }
    }

    #[test]
    fn string_literals() {
        assert_token(lex_string_literal("\"foo\"", 0), 0, 5, 0, 5);
        assert_token(lex_string_literal(" \"a\nb\" x", 0), 0, 6, 1, 5);
        assert_eq!(lex_string_literal("\"foo", 0), None);
        assert_eq!(lex_string_literal("foo\"", 0), None);
    }

    #[test]
    fn simple_tokens() {
        assert_token(lex_simple_token(" +", 0, "+", TokenKind::Plus), 0, 2, 1, 1);
        assert_eq!(lex_simple_token("-", 0, "+", TokenKind::Plus), None);
        assert_eq!(lex_simple_token("=", 0, "==", TokenKind::EqualEqual), None);
    }

    #[test]
    fn longer_operators_win() {
        let kinds: Vec<_> = lex_submission("== = != >= > <= <")
            .into_iter()
            .map(|t| t.kind)
            .collect();

        assert_eq!(
            kinds,
            vec![
                TokenKind::EqualEqual,
                TokenKind::Equal,
                TokenKind::BangEqual,
                TokenKind::GreaterThanEqual,
                TokenKind::GreaterThan,
                TokenKind::LessThanEqual,
                TokenKind::LessThan,
                TokenKind::EndOfInput,
            ]
        );
    }

    #[test]
    fn submission_of_empty_text() {
        let tokens = lex_submission("");
        assert_eq!(tokens, vec![Token::at(0, "", TokenKind::EndOfInput)]);
    }

    #[test]
    fn submission_spans_are_contiguous() {
        let text = " a as number = 1.5 * (b - 2) ";
        let tokens = lex_submission(text);

        let mut index = 0;
        for token in &tokens {
            assert_eq!(token.full_start(), index);
            index += token.full_len();
        }
        assert_eq!(index, text.len());
        assert_eq!(tokens.last().map(|t| t.kind), Some(TokenKind::EndOfInput));
    }

    #[test]
    fn submission_stops_where_nothing_lexes() {
        let tokens = lex_submission("1 + \"foo");
        assert_eq!(tokens.len(), 2);
        assert!(tokens.iter().all(|t| t.kind != TokenKind::EndOfInput));
    }

    #[test]
    fn recovering_lexer_emits_unknown_tokens() {
        let tokens = lex_recovering("1 # \"x");
        let kinds: Vec<_> = tokens.iter().map(|t| t.kind).collect();

        assert_eq!(
            kinds,
            vec![
                TokenKind::NumberLiteral,
                TokenKind::Unknown,
                TokenKind::Unknown,
                TokenKind::Identifier,
                TokenKind::EndOfInput,
            ]
        );
        assert_eq!(tokens[1].text, "#");
        assert_eq!(tokens[2].text, "\"");
    }
}
