use tracing::trace;

use crate::ast::{Block, Declaration, Expr, Stmt, SyntaxNode};
use crate::tokens::{Token, TokenKind};

/// A successful parse: the node and the index of the first unconsumed token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Parsed<T> {
    pub node: T,
    pub next: usize,
}

impl<T> Parsed<T> {
    pub fn new(node: T, next: usize) -> Self {
        Parsed { node, next }
    }
}

type ExprParser = fn(&[Token], usize) -> Option<Parsed<Expr>>;

/*
submission -> (expression | statement) EOF;

statement -> ifElse
    | if
    | declarationStatement
    | expressionStatement
    | while;

ifElse -> "if" expression block "else" block "end";
if -> "if" expression block "end";
declarationStatement -> declaration "=" expression;
expressionStatement -> expression;
while -> "while" expression block "end";

block -> statement*;

expression -> assignment;

assignment -> (declaration | IDENTIFIER) "=" assignment
    | conditionalOr;

declaration -> IDENTIFIER "as" ("number" | "boolean" | "string" | IDENTIFIER);

conditionalOr -> conditionalAnd ("or" conditionalAnd)*;
conditionalAnd -> equality ("and" equality)*;
equality -> relational (("==" | "!=") relational)*;
relational -> additive (("<" | "<=" | ">" | ">=") additive)*;
additive -> multiplicative (("+" | "-") multiplicative)*;
multiplicative -> unary (("*" | "/") unary)*;

unary -> "-"? operand;

operand -> NUMBER
    | STRING
    | "(" expression ")"
    | "true" | "false"
    | IDENTIFIER;
*/

fn token_at(tokens: &[Token], index: usize, kind: TokenKind) -> Option<&Token> {
    tokens.get(index).filter(|token| token.kind == kind)
}

fn token_of<'a>(tokens: &'a [Token], index: usize, kinds: &[TokenKind]) -> Option<&'a Token> {
    tokens.get(index).filter(|token| kinds.contains(&token.kind))
}

fn leaf(
    tokens: &[Token],
    start: usize,
    kinds: &[TokenKind],
    make: fn(Token) -> Expr,
) -> Option<Parsed<Expr>> {
    let token = token_of(tokens, start, kinds)?;
    Some(Parsed::new(make(token.clone()), start + 1))
}

pub fn parse_number_literal(tokens: &[Token], start: usize) -> Option<Parsed<Expr>> {
    leaf(tokens, start, &[TokenKind::NumberLiteral], Expr::number)
}

pub fn parse_string_literal(tokens: &[Token], start: usize) -> Option<Parsed<Expr>> {
    leaf(tokens, start, &[TokenKind::StringLiteral], Expr::string)
}

pub fn parse_boolean_literal(tokens: &[Token], start: usize) -> Option<Parsed<Expr>> {
    leaf(
        tokens,
        start,
        &[TokenKind::TrueLiteral, TokenKind::FalseLiteral],
        Expr::boolean,
    )
}

pub fn parse_identifier(tokens: &[Token], start: usize) -> Option<Parsed<Expr>> {
    leaf(tokens, start, &[TokenKind::Identifier], Expr::identifier)
}

pub fn parse_parenthesized(tokens: &[Token], start: usize) -> Option<Parsed<Expr>> {
    let left_paren = token_at(tokens, start, TokenKind::LeftParen)?;
    let inner = parse_expression(tokens, start + 1)?;
    let right_paren = token_at(tokens, inner.next, TokenKind::RightParen)?;

    Some(Parsed::new(
        Expr::parenthesized(left_paren.clone(), inner.node, right_paren.clone()),
        inner.next + 1,
    ))
}

pub fn parse_operand(tokens: &[Token], start: usize) -> Option<Parsed<Expr>> {
    // operand -> NUMBER | STRING | "(" expression ")" | "true" | "false" | IDENTIFIER;
    parse_number_literal(tokens, start)
        .or_else(|| parse_string_literal(tokens, start))
        .or_else(|| parse_parenthesized(tokens, start))
        .or_else(|| parse_boolean_literal(tokens, start))
        .or_else(|| parse_identifier(tokens, start))
}

pub fn parse_negation(tokens: &[Token], start: usize) -> Option<Parsed<Expr>> {
    // unary -> "-"? operand;
    match token_at(tokens, start, TokenKind::Minus) {
        Some(operator) => {
            let operand = parse_operand(tokens, start + 1)?;
            Some(Parsed::new(
                Expr::negation(operator.clone(), operand.node),
                operand.next,
            ))
        }
        None => parse_operand(tokens, start),
    }
}

/// Parses `operand (op operand)*` and folds the operands to the left.
pub fn parse_left_associative(
    tokens: &[Token],
    start: usize,
    operators: &[TokenKind],
    operand: ExprParser,
) -> Option<Parsed<Expr>> {
    let first = operand(tokens, start)?;
    let mut expr = first.node;
    let mut index = first.next;

    while let Some(operator) = token_of(tokens, index, operators) {
        let right = operand(tokens, index + 1)?;
        expr = Expr::binary(expr, operator.clone(), right.node);
        index = right.next;
    }

    Some(Parsed::new(expr, index))
}

pub fn parse_multiplicative(tokens: &[Token], start: usize) -> Option<Parsed<Expr>> {
    // multiplicative -> unary (("*" | "/") unary)*;
    parse_left_associative(
        tokens,
        start,
        &[TokenKind::Asterisk, TokenKind::Slash],
        parse_negation,
    )
}

pub fn parse_additive(tokens: &[Token], start: usize) -> Option<Parsed<Expr>> {
    // additive -> multiplicative (("+" | "-") multiplicative)*;
    parse_left_associative(
        tokens,
        start,
        &[TokenKind::Plus, TokenKind::Minus],
        parse_multiplicative,
    )
}

pub fn parse_relational(tokens: &[Token], start: usize) -> Option<Parsed<Expr>> {
    // relational -> additive (("<" | "<=" | ">" | ">=") additive)*;
    parse_left_associative(
        tokens,
        start,
        &[
            TokenKind::LessThanEqual,
            TokenKind::GreaterThanEqual,
            TokenKind::LessThan,
            TokenKind::GreaterThan,
        ],
        parse_additive,
    )
}

pub fn parse_equality(tokens: &[Token], start: usize) -> Option<Parsed<Expr>> {
    // equality -> relational (("==" | "!=") relational)*;
    parse_left_associative(
        tokens,
        start,
        &[TokenKind::EqualEqual, TokenKind::BangEqual],
        parse_relational,
    )
}

pub fn parse_conditional_and(tokens: &[Token], start: usize) -> Option<Parsed<Expr>> {
    parse_left_associative(tokens, start, &[TokenKind::AndKeyword], parse_equality)
}

pub fn parse_conditional_or(tokens: &[Token], start: usize) -> Option<Parsed<Expr>> {
    parse_left_associative(tokens, start, &[TokenKind::OrKeyword], parse_conditional_and)
}

pub fn parse_declaration(tokens: &[Token], start: usize) -> Option<Parsed<Declaration>> {
    let identifier = token_at(tokens, start, TokenKind::Identifier)?;
    let as_keyword = token_at(tokens, start + 1, TokenKind::AsKeyword)?;
    let type_name = tokens
        .get(start + 2)
        .filter(|token| token.kind.is_type_name())?;

    Some(Parsed::new(
        Declaration::new(identifier.clone(), as_keyword.clone(), type_name.clone()),
        start + 3,
    ))
}

pub fn parse_assignment(tokens: &[Token], start: usize) -> Option<Parsed<Expr>> {
    /*
    assignment -> (declaration | IDENTIFIER) "=" assignment
        | conditionalOr;
    */
    let target = parse_declaration(tokens, start)
        .map(|parsed| Parsed::new(Expr::Declaration(parsed.node), parsed.next))
        .or_else(|| parse_identifier(tokens, start));

    if let Some(target) = target {
        if let Some(equals) = token_at(tokens, target.next, TokenKind::Equal) {
            // Once the `=` is seen the right-hand side must parse.
            let value = parse_expression(tokens, target.next + 1)?;
            return Some(Parsed::new(
                Expr::binary(target.node, equals.clone(), value.node),
                value.next,
            ));
        }
    }

    parse_conditional_or(tokens, start)
}

pub fn parse_expression(tokens: &[Token], start: usize) -> Option<Parsed<Expr>> {
    parse_assignment(tokens, start)
}

pub fn parse_expression_statement(tokens: &[Token], start: usize) -> Option<Parsed<Stmt>> {
    let expr = parse_expression(tokens, start)?;
    Some(Parsed::new(Stmt::expression(expr.node), expr.next))
}

pub fn parse_declaration_statement(tokens: &[Token], start: usize) -> Option<Parsed<Stmt>> {
    // declarationStatement -> declaration "=" expression;
    let declaration = parse_declaration(tokens, start)?;
    let equals = token_at(tokens, declaration.next, TokenKind::Equal)?;
    let initializer = parse_expression(tokens, declaration.next + 1)?;

    Some(Parsed::new(
        Stmt::declaration(declaration.node, equals.clone(), initializer.node),
        initializer.next,
    ))
}

/// Parses either form of `if`. The condition and first body are parsed once,
/// then the next token picks the form.
fn parse_conditional_statement(tokens: &[Token], start: usize) -> Option<Parsed<Stmt>> {
    let if_keyword = token_at(tokens, start, TokenKind::IfKeyword)?;
    let condition = parse_expression(tokens, start + 1)?;
    let true_body = parse_block(tokens, condition.next);

    if let Some(end_keyword) = token_at(tokens, true_body.next, TokenKind::EndKeyword) {
        return Some(Parsed::new(
            Stmt::if_then(
                if_keyword.clone(),
                condition.node,
                true_body.node,
                end_keyword.clone(),
            ),
            true_body.next + 1,
        ));
    }

    let else_keyword = token_at(tokens, true_body.next, TokenKind::ElseKeyword)?;
    let false_body = parse_block(tokens, true_body.next + 1);
    let end_keyword = token_at(tokens, false_body.next, TokenKind::EndKeyword)?;

    Some(Parsed::new(
        Stmt::if_else(
            if_keyword.clone(),
            condition.node,
            true_body.node,
            else_keyword.clone(),
            false_body.node,
            end_keyword.clone(),
        ),
        false_body.next + 1,
    ))
}

pub fn parse_if_statement(tokens: &[Token], start: usize) -> Option<Parsed<Stmt>> {
    // if -> "if" expression block "end";
    parse_conditional_statement(tokens, start)
        .filter(|parsed| matches!(parsed.node, Stmt::If { .. }))
}

pub fn parse_if_else_statement(tokens: &[Token], start: usize) -> Option<Parsed<Stmt>> {
    // ifElse -> "if" expression block "else" block "end";
    parse_conditional_statement(tokens, start)
        .filter(|parsed| matches!(parsed.node, Stmt::IfElse { .. }))
}

pub fn parse_while_statement(tokens: &[Token], start: usize) -> Option<Parsed<Stmt>> {
    // while -> "while" expression block "end";
    let while_keyword = token_at(tokens, start, TokenKind::WhileKeyword)?;
    let condition = parse_expression(tokens, start + 1)?;
    let body = parse_block(tokens, condition.next);
    let end_keyword = token_at(tokens, body.next, TokenKind::EndKeyword)?;

    Some(Parsed::new(
        Stmt::while_loop(
            while_keyword.clone(),
            condition.node,
            body.node,
            end_keyword.clone(),
        ),
        body.next + 1,
    ))
}

pub fn parse_statement(tokens: &[Token], start: usize) -> Option<Parsed<Stmt>> {
    // ifElse and if share a prefix, so both are tried in one pass.
    parse_conditional_statement(tokens, start)
        .or_else(|| parse_declaration_statement(tokens, start))
        .or_else(|| parse_expression_statement(tokens, start))
        .or_else(|| parse_while_statement(tokens, start))
}

/// Parses statements until one fails to parse. Never fails itself; an empty
/// block records where it stopped.
pub fn parse_block(tokens: &[Token], start: usize) -> Parsed<Block> {
    let mut statements = Vec::new();
    let mut index = start;

    while let Some(statement) = parse_statement(tokens, index) {
        statements.push(statement.node);
        index = statement.next;
    }

    let position = match tokens.get(index) {
        Some(token) => token.full_start(),
        None => tokens.last().map_or(0, Token::full_end),
    };

    Parsed::new(Block::new(position, statements), index)
}

fn parse_submission<T: SyntaxNode>(
    tokens: &[Token],
    parse: fn(&[Token], usize) -> Option<Parsed<T>>,
) -> Option<T> {
    let parsed = parse(tokens, 0)?;
    let end = tokens.len().checked_sub(1)?;

    if parsed.next == end && tokens[end].kind == TokenKind::EndOfInput {
        trace!(length = parsed.node.length(), "parsed submission");
        Some(parsed.node)
    } else {
        None
    }
}

/// Parses a whole submission as one expression followed by end of input.
pub fn parse_expression_submission(tokens: &[Token]) -> Option<Expr> {
    parse_submission(tokens, parse_expression)
}

/// Parses a whole submission as one statement followed by end of input.
pub fn parse_statement_submission(tokens: &[Token]) -> Option<Stmt> {
    parse_submission(tokens, parse_statement)
}
