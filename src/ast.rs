use std::ops::Range;

use rust_decimal::Decimal;

use crate::tokens::{Token, TokenKind};

/// Position views shared by every syntax node.
///
/// The full ("with whitespace") span starts at the node's own leading
/// whitespace; the trimmed span skips it but keeps all interior whitespace.
/// A composite node's full length is the sum of its children's full lengths.
pub trait SyntaxNode {
    fn start_with_whitespace(&self) -> usize;

    fn length_with_whitespace(&self) -> usize;

    /// Length of the whitespace in front of the node's first token.
    fn leading_whitespace(&self) -> usize;

    fn write_source(&self, out: &mut String);

    fn start(&self) -> usize {
        self.start_with_whitespace() + self.leading_whitespace()
    }

    fn length(&self) -> usize {
        self.length_with_whitespace() - self.leading_whitespace()
    }

    fn span(&self) -> Range<usize> {
        self.start()..self.start() + self.length()
    }

    fn full_span(&self) -> Range<usize> {
        self.start_with_whitespace()..self.start_with_whitespace() + self.length_with_whitespace()
    }

    /// The exact source text the node was parsed from, leading whitespace
    /// included.
    fn to_source(&self) -> String {
        let mut out = String::new();
        self.write_source(&mut out);
        out
    }
}

impl SyntaxNode for Token {
    fn start_with_whitespace(&self) -> usize {
        self.full_start()
    }

    fn length_with_whitespace(&self) -> usize {
        self.full_len()
    }

    fn leading_whitespace(&self) -> usize {
        self.whitespace.len()
    }

    fn write_source(&self, out: &mut String) {
        out.push_str(&self.whitespace.text);
        out.push_str(&self.text);
    }
}

/// `identifier as type`
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Declaration {
    pub identifier: Token,
    pub as_keyword: Token,
    pub type_name: Token,
}

impl Declaration {
    pub fn new(identifier: Token, as_keyword: Token, type_name: Token) -> Self {
        Declaration {
            identifier,
            as_keyword,
            type_name,
        }
    }

    pub fn name(&self) -> &str {
        &self.identifier.text
    }
}

impl SyntaxNode for Declaration {
    fn start_with_whitespace(&self) -> usize {
        self.identifier.full_start()
    }

    fn length_with_whitespace(&self) -> usize {
        self.identifier.full_len() + self.as_keyword.full_len() + self.type_name.full_len()
    }

    fn leading_whitespace(&self) -> usize {
        self.identifier.leading_whitespace()
    }

    fn write_source(&self, out: &mut String) {
        self.identifier.write_source(out);
        self.as_keyword.write_source(out);
        self.type_name.write_source(out);
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Expr {
    NumberLiteral(Token),
    BooleanLiteral(Token),
    StringLiteral(Token),
    Identifier(Token),
    Negation {
        operator: Token,
        operand: Box<Expr>,
    },
    /// Arithmetic, relational, equality, logical and assignment operators,
    /// told apart by the operator's text.
    Binary {
        left: Box<Expr>,
        operator: Token,
        right: Box<Expr>,
    },
    Parenthesized {
        left_paren: Token,
        inner: Box<Expr>,
        right_paren: Token,
    },
    Declaration(Declaration),
}

impl Expr {
    pub fn number(token: Token) -> Self {
        Expr::NumberLiteral(token)
    }

    pub fn boolean(token: Token) -> Self {
        Expr::BooleanLiteral(token)
    }

    pub fn string(token: Token) -> Self {
        Expr::StringLiteral(token)
    }

    pub fn identifier(token: Token) -> Self {
        Expr::Identifier(token)
    }

    pub fn negation(operator: Token, operand: Expr) -> Self {
        Expr::Negation {
            operator,
            operand: Box::new(operand),
        }
    }

    pub fn binary(left: Expr, operator: Token, right: Expr) -> Self {
        Expr::Binary {
            left: Box::new(left),
            operator,
            right: Box::new(right),
        }
    }

    pub fn parenthesized(left_paren: Token, inner: Expr, right_paren: Token) -> Self {
        Expr::Parenthesized {
            left_paren,
            inner: Box::new(inner),
            right_paren,
        }
    }

    pub fn declaration(identifier: Token, as_keyword: Token, type_name: Token) -> Self {
        Expr::Declaration(Declaration::new(identifier, as_keyword, type_name))
    }

    fn first_token(&self) -> &Token {
        match self {
            Expr::NumberLiteral(token)
            | Expr::BooleanLiteral(token)
            | Expr::StringLiteral(token)
            | Expr::Identifier(token) => token,
            Expr::Negation { operator, .. } => operator,
            Expr::Binary { left, .. } => left.first_token(),
            Expr::Parenthesized { left_paren, .. } => left_paren,
            Expr::Declaration(declaration) => &declaration.identifier,
        }
    }
}

impl SyntaxNode for Expr {
    fn start_with_whitespace(&self) -> usize {
        self.first_token().full_start()
    }

    fn length_with_whitespace(&self) -> usize {
        match self {
            Expr::NumberLiteral(token)
            | Expr::BooleanLiteral(token)
            | Expr::StringLiteral(token)
            | Expr::Identifier(token) => token.full_len(),
            Expr::Negation { operator, operand } => {
                operator.full_len() + operand.length_with_whitespace()
            }
            Expr::Binary {
                left,
                operator,
                right,
            } => {
                left.length_with_whitespace()
                    + operator.full_len()
                    + right.length_with_whitespace()
            }
            Expr::Parenthesized {
                left_paren,
                inner,
                right_paren,
            } => left_paren.full_len() + inner.length_with_whitespace() + right_paren.full_len(),
            Expr::Declaration(declaration) => declaration.length_with_whitespace(),
        }
    }

    fn leading_whitespace(&self) -> usize {
        self.first_token().whitespace.len()
    }

    fn write_source(&self, out: &mut String) {
        match self {
            Expr::NumberLiteral(token)
            | Expr::BooleanLiteral(token)
            | Expr::StringLiteral(token)
            | Expr::Identifier(token) => token.write_source(out),
            Expr::Negation { operator, operand } => {
                operator.write_source(out);
                operand.write_source(out);
            }
            Expr::Binary {
                left,
                operator,
                right,
            } => {
                left.write_source(out);
                operator.write_source(out);
                right.write_source(out);
            }
            Expr::Parenthesized {
                left_paren,
                inner,
                right_paren,
            } => {
                left_paren.write_source(out);
                inner.write_source(out);
                right_paren.write_source(out);
            }
            Expr::Declaration(declaration) => declaration.write_source(out),
        }
    }
}

impl std::fmt::Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_source())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Stmt {
    Expression(Expr),
    /// `identifier as type = initializer`
    Declaration {
        declaration: Declaration,
        equals: Token,
        initializer: Expr,
    },
    If {
        if_keyword: Token,
        condition: Expr,
        body: Block,
        end_keyword: Token,
    },
    IfElse {
        if_keyword: Token,
        condition: Expr,
        true_body: Block,
        else_keyword: Token,
        false_body: Block,
        end_keyword: Token,
    },
    While {
        while_keyword: Token,
        condition: Expr,
        body: Block,
        end_keyword: Token,
    },
}

impl Stmt {
    pub fn expression(expr: Expr) -> Self {
        Stmt::Expression(expr)
    }

    pub fn declaration(declaration: Declaration, equals: Token, initializer: Expr) -> Self {
        Stmt::Declaration {
            declaration,
            equals,
            initializer,
        }
    }

    pub fn if_then(if_keyword: Token, condition: Expr, body: Block, end_keyword: Token) -> Self {
        Stmt::If {
            if_keyword,
            condition,
            body,
            end_keyword,
        }
    }

    pub fn if_else(
        if_keyword: Token,
        condition: Expr,
        true_body: Block,
        else_keyword: Token,
        false_body: Block,
        end_keyword: Token,
    ) -> Self {
        Stmt::IfElse {
            if_keyword,
            condition,
            true_body,
            else_keyword,
            false_body,
            end_keyword,
        }
    }

    pub fn while_loop(
        while_keyword: Token,
        condition: Expr,
        body: Block,
        end_keyword: Token,
    ) -> Self {
        Stmt::While {
            while_keyword,
            condition,
            body,
            end_keyword,
        }
    }
}

impl SyntaxNode for Stmt {
    fn start_with_whitespace(&self) -> usize {
        match self {
            Stmt::Expression(expr) => expr.start_with_whitespace(),
            Stmt::Declaration { declaration, .. } => declaration.start_with_whitespace(),
            Stmt::If { if_keyword, .. } | Stmt::IfElse { if_keyword, .. } => {
                if_keyword.full_start()
            }
            Stmt::While { while_keyword, .. } => while_keyword.full_start(),
        }
    }

    fn length_with_whitespace(&self) -> usize {
        match self {
            Stmt::Expression(expr) => expr.length_with_whitespace(),
            Stmt::Declaration {
                declaration,
                equals,
                initializer,
            } => {
                declaration.length_with_whitespace()
                    + equals.full_len()
                    + initializer.length_with_whitespace()
            }
            Stmt::If {
                if_keyword,
                condition,
                body,
                end_keyword,
            } => {
                if_keyword.full_len()
                    + condition.length_with_whitespace()
                    + body.length_with_whitespace()
                    + end_keyword.full_len()
            }
            Stmt::IfElse {
                if_keyword,
                condition,
                true_body,
                else_keyword,
                false_body,
                end_keyword,
            } => {
                if_keyword.full_len()
                    + condition.length_with_whitespace()
                    + true_body.length_with_whitespace()
                    + else_keyword.full_len()
                    + false_body.length_with_whitespace()
                    + end_keyword.full_len()
            }
            Stmt::While {
                while_keyword,
                condition,
                body,
                end_keyword,
            } => {
                while_keyword.full_len()
                    + condition.length_with_whitespace()
                    + body.length_with_whitespace()
                    + end_keyword.full_len()
            }
        }
    }

    fn leading_whitespace(&self) -> usize {
        match self {
            Stmt::Expression(expr) => expr.leading_whitespace(),
            Stmt::Declaration { declaration, .. } => declaration.leading_whitespace(),
            Stmt::If { if_keyword, .. } | Stmt::IfElse { if_keyword, .. } => {
                if_keyword.whitespace.len()
            }
            Stmt::While { while_keyword, .. } => while_keyword.whitespace.len(),
        }
    }

    fn write_source(&self, out: &mut String) {
        match self {
            Stmt::Expression(expr) => expr.write_source(out),
            Stmt::Declaration {
                declaration,
                equals,
                initializer,
            } => {
                declaration.write_source(out);
                equals.write_source(out);
                initializer.write_source(out);
            }
            Stmt::If {
                if_keyword,
                condition,
                body,
                end_keyword,
            } => {
                if_keyword.write_source(out);
                condition.write_source(out);
                body.write_source(out);
                end_keyword.write_source(out);
            }
            Stmt::IfElse {
                if_keyword,
                condition,
                true_body,
                else_keyword,
                false_body,
                end_keyword,
            } => {
                if_keyword.write_source(out);
                condition.write_source(out);
                true_body.write_source(out);
                else_keyword.write_source(out);
                false_body.write_source(out);
                end_keyword.write_source(out);
            }
            Stmt::While {
                while_keyword,
                condition,
                body,
                end_keyword,
            } => {
                while_keyword.write_source(out);
                condition.write_source(out);
                body.write_source(out);
                end_keyword.write_source(out);
            }
        }
    }
}

/// A statement list. `NonEmpty` always holds at least one statement; use
/// [`Block::new`] to get the right variant.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Block {
    Empty { start: usize },
    NonEmpty(Vec<Stmt>),
}

impl Block {
    pub fn new(start: usize, statements: Vec<Stmt>) -> Self {
        if statements.is_empty() {
            Block::Empty { start }
        } else {
            Block::NonEmpty(statements)
        }
    }

    pub fn statements(&self) -> &[Stmt] {
        match self {
            Block::Empty { .. } => &[],
            Block::NonEmpty(statements) => statements,
        }
    }
}

impl SyntaxNode for Block {
    fn start_with_whitespace(&self) -> usize {
        match self {
            Block::Empty { start } => *start,
            Block::NonEmpty(statements) => statements
                .first()
                .map_or(0, SyntaxNode::start_with_whitespace),
        }
    }

    fn length_with_whitespace(&self) -> usize {
        self.statements()
            .iter()
            .map(SyntaxNode::length_with_whitespace)
            .sum()
    }

    fn leading_whitespace(&self) -> usize {
        self.statements()
            .first()
            .map_or(0, SyntaxNode::leading_whitespace)
    }

    fn write_source(&self, out: &mut String) {
        for statement in self.statements() {
            statement.write_source(out);
        }
    }
}

/// The exact numeric value of a number literal token, or `None` when the
/// text is not a plain decimal or does not fit a `Decimal` without rounding.
pub fn number_value(token: &Token) -> Option<Decimal> {
    let text = token.text.as_str();
    let mut parts = text.splitn(2, '.');
    let whole = parts.next().unwrap_or("");
    let fraction = parts.next();

    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    let valid = match fraction {
        Some(fraction) => all_digits(whole) && !fraction.is_empty() && all_digits(fraction),
        None => !whole.is_empty() && all_digits(whole),
    };
    if !valid {
        return None;
    }

    if whole.is_empty() {
        Decimal::from_str_exact(&format!("0{}", text)).ok()
    } else {
        Decimal::from_str_exact(text).ok()
    }
}

/// The text between a string literal's quotes.
pub fn string_value(token: &Token) -> &str {
    let text = token.text.as_str();
    text.strip_prefix('"')
        .and_then(|text| text.strip_suffix('"'))
        .unwrap_or(text)
}

pub fn boolean_value(token: &Token) -> bool {
    token.kind == TokenKind::TrueLiteral
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::Whitespace;
    use rust_decimal_macros::dec;

    fn token(start: usize, whitespace: &str, text: &str, kind: TokenKind) -> Token {
        Token::new(Whitespace::new(start, whitespace), text, kind)
    }

    #[test]
    fn binary_positions() {
        // " 1 +  2"
        let expr = Expr::binary(
            Expr::number(token(0, " ", "1", TokenKind::NumberLiteral)),
            token(2, " ", "+", TokenKind::Plus),
            Expr::number(token(4, "  ", "2", TokenKind::NumberLiteral)),
        );

        assert_eq!(expr.start_with_whitespace(), 0);
        assert_eq!(expr.length_with_whitespace(), 7);
        assert_eq!(expr.start(), 1);
        assert_eq!(expr.length(), 6);
        assert_eq!(expr.to_source(), " 1 +  2");
    }

    #[test]
    fn parenthesized_positions() {
        // "( a )"
        let expr = Expr::parenthesized(
            token(0, "", "(", TokenKind::LeftParen),
            Expr::identifier(token(1, " ", "a", TokenKind::Identifier)),
            token(3, " ", ")", TokenKind::RightParen),
        );

        assert_eq!(expr.span(), 0..5);
        assert_eq!(expr.full_span(), 0..5);
    }

    #[test]
    fn empty_block_records_its_start() {
        let block = Block::new(7, Vec::new());

        assert_eq!(block, Block::Empty { start: 7 });
        assert_eq!(block.start(), 7);
        assert_eq!(block.length(), 0);
        assert_eq!(block.length_with_whitespace(), 0);
    }

    #[test]
    fn hand_built_empty_statement_list_has_no_extent() {
        let block = Block::NonEmpty(Vec::new());

        assert_eq!(block.start_with_whitespace(), 0);
        assert_eq!(block.length_with_whitespace(), 0);
        assert_eq!(block.to_source(), "");
    }

    #[test]
    fn while_statement_positions() {
        // "while a b end"
        let statement = Stmt::while_loop(
            token(0, "", "while", TokenKind::WhileKeyword),
            Expr::identifier(token(5, " ", "a", TokenKind::Identifier)),
            Block::new(
                7,
                vec![Stmt::expression(Expr::identifier(token(
                    7,
                    " ",
                    "b",
                    TokenKind::Identifier,
                )))],
            ),
            token(9, " ", "end", TokenKind::EndKeyword),
        );

        assert_eq!(statement.length_with_whitespace(), 13);
        assert_eq!(statement.length(), 13);
        assert_eq!(statement.to_source(), "while a b end");
    }

    #[test]
    fn structural_equality() {
        let make = || {
            Expr::negation(
                Token::at(0, "-", TokenKind::Minus),
                Expr::number(Token::at(1, "3", TokenKind::NumberLiteral)),
            )
        };
        assert_eq!(make(), make());
        assert_ne!(
            make(),
            Expr::negation(
                Token::at(0, "-", TokenKind::Minus),
                Expr::number(Token::at(1, "4", TokenKind::NumberLiteral)),
            )
        );
    }

    #[test]
    fn literal_values() {
        let number = |text: &str| number_value(&Token::at(0, text, TokenKind::NumberLiteral));

        assert_eq!(number("5"), Some(dec!(5)));
        assert_eq!(number("5.25"), Some(dec!(5.25)));
        assert_eq!(number(".5"), Some(dec!(0.5)));
        assert_eq!(number("0.1"), Some(dec!(0.1)));
        assert_eq!(number("99999999999999999999999999999999"), None);
        assert_eq!(number("1."), None);
        assert_eq!(number("1e5"), None);
        assert_eq!(number(""), None);

        let string = Token::at(0, "\"a b\"", TokenKind::StringLiteral);
        assert_eq!(string_value(&string), "a b");

        assert!(boolean_value(&Token::at(0, "true", TokenKind::TrueLiteral)));
        assert!(!boolean_value(&Token::at(0, "false", TokenKind::FalseLiteral)));
    }
}
