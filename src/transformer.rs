use tracing::debug;

use crate::ast::{self, Block, Declaration, Expr, Stmt};
use crate::binding::BindingContext;
use crate::diagnostic::Diagnostic;
use crate::error::UnboundVariable;
use crate::hlir::{ArithmeticOp, ComparisonOp, HlirExpr, LogicalOp, Type};
use crate::tokens::{Token, TokenKind};

/// The result of lowering one node: the context to thread into the next
/// node, the lowered form, and every diagnostic found on the way.
#[derive(Debug, Clone)]
pub struct Transformed {
    pub context: BindingContext,
    pub form: HlirExpr,
    pub diagnostics: Vec<Diagnostic>,
}

impl Transformed {
    fn new(context: BindingContext, form: HlirExpr, diagnostics: Vec<Diagnostic>) -> Self {
        Transformed {
            context,
            form,
            diagnostics,
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.diagnostics.is_empty()
    }
}

pub trait Transform {
    fn transform(&self, context: &BindingContext) -> Transformed;
}

/// Binds, type-checks and lowers `node`. Never stops at the first problem:
/// a node that fails to check is lowered to a placeholder of the type it
/// would have had.
pub fn transform(context: &BindingContext, node: &impl Transform) -> Transformed {
    let transformed = node.transform(context);
    debug!(
        diagnostics = transformed.diagnostics.len(),
        ty = %transformed.form.ty(),
        "transformed submission"
    );
    transformed
}

fn operand_mismatch(node: &Expr, operator: &str, expected: &str, found: Type) -> Diagnostic {
    Diagnostic::at(
        node,
        format!(
            "operator '{}' requires a {} operand, found {}",
            operator, expected, found
        ),
    )
}

impl Transform for Expr {
    fn transform(&self, context: &BindingContext) -> Transformed {
        match self {
            Expr::NumberLiteral(token) => match ast::number_value(token) {
                Some(n) => Transformed::new(context.clone(), HlirExpr::number(n), Vec::new()),
                None => Transformed::new(
                    context.clone(),
                    HlirExpr::placeholder(Type::Number),
                    vec![Diagnostic::at(
                        token,
                        format!("invalid number literal '{}'", token.text),
                    )],
                ),
            },
            Expr::BooleanLiteral(token) => Transformed::new(
                context.clone(),
                HlirExpr::boolean(ast::boolean_value(token)),
                Vec::new(),
            ),
            Expr::StringLiteral(token) => Transformed::new(
                context.clone(),
                HlirExpr::string(ast::string_value(token)),
                Vec::new(),
            ),
            Expr::Identifier(token) => transform_identifier(context, token),
            Expr::Negation { operator, operand } => {
                transform_negation(context, operator, operand)
            }
            Expr::Parenthesized { inner, .. } => inner.transform(context),
            Expr::Declaration(declaration) => {
                let (context, mut diagnostics) = declare(context, declaration);
                let form = match context.create_get_variable_expression(declaration.name()) {
                    Some(form) => form,
                    None => {
                        diagnostics.push(unbound(&declaration.identifier));
                        HlirExpr::placeholder(Type::Number)
                    }
                };
                Transformed::new(context, form, diagnostics)
            }
            Expr::Binary {
                left,
                operator,
                right,
            } => transform_binary(context, left, operator, right),
        }
    }
}

fn unbound(identifier: &Token) -> Diagnostic {
    let message = UnboundVariable {
        name: identifier.text.clone(),
    };
    Diagnostic::at(identifier, message.to_string())
}

fn transform_identifier(context: &BindingContext, token: &Token) -> Transformed {
    match context.create_get_variable_expression(&token.text) {
        Some(form) => Transformed::new(context.clone(), form, Vec::new()),
        None => Transformed::new(
            context.clone(),
            HlirExpr::placeholder(Type::Number),
            vec![unbound(token)],
        ),
    }
}

fn transform_negation(context: &BindingContext, operator: &Token, operand: &Expr) -> Transformed {
    let Transformed {
        context,
        form,
        mut diagnostics,
    } = operand.transform(context);

    let form = match form.ty() {
        Type::Number => HlirExpr::Negate(Box::new(form)),
        found => {
            diagnostics.push(operand_mismatch(operand, &operator.text, "number", found));
            HlirExpr::placeholder(Type::Number)
        }
    };

    Transformed::new(context, form, diagnostics)
}

fn arithmetic_op(kind: TokenKind) -> Option<ArithmeticOp> {
    match kind {
        TokenKind::Plus => Some(ArithmeticOp::Add),
        TokenKind::Minus => Some(ArithmeticOp::Subtract),
        TokenKind::Asterisk => Some(ArithmeticOp::Multiply),
        TokenKind::Slash => Some(ArithmeticOp::Divide),
        _ => None,
    }
}

fn comparison_op(kind: TokenKind) -> Option<ComparisonOp> {
    match kind {
        TokenKind::LessThan => Some(ComparisonOp::Less),
        TokenKind::LessThanEqual => Some(ComparisonOp::LessEqual),
        TokenKind::GreaterThan => Some(ComparisonOp::Greater),
        TokenKind::GreaterThanEqual => Some(ComparisonOp::GreaterEqual),
        TokenKind::EqualEqual => Some(ComparisonOp::Equal),
        TokenKind::BangEqual => Some(ComparisonOp::NotEqual),
        _ => None,
    }
}

fn logical_op(kind: TokenKind) -> Option<LogicalOp> {
    match kind {
        TokenKind::AndKeyword => Some(LogicalOp::And),
        TokenKind::OrKeyword => Some(LogicalOp::Or),
        _ => None,
    }
}

fn transform_binary(
    context: &BindingContext,
    left: &Expr,
    operator: &Token,
    right: &Expr,
) -> Transformed {
    if operator.kind == TokenKind::Equal {
        return transform_assignment(context, left, right);
    }

    let lhs = left.transform(context);
    let rhs = right.transform(&lhs.context);
    let mut diagnostics = lhs.diagnostics;
    diagnostics.extend(rhs.diagnostics);

    let (left_ty, right_ty) = (lhs.form.ty(), rhs.form.ty());
    let before = diagnostics.len();

    let form = if let Some(op) = arithmetic_op(operator.kind) {
        for (side, ty) in [(left, left_ty), (right, right_ty)] {
            if ty != Type::Number {
                diagnostics.push(operand_mismatch(side, op.symbol(), "number", ty));
            }
        }
        if diagnostics.len() == before {
            HlirExpr::Arithmetic {
                op,
                left: Box::new(lhs.form),
                right: Box::new(rhs.form),
            }
        } else {
            HlirExpr::placeholder(Type::Number)
        }
    } else if let Some(op) = comparison_op(operator.kind) {
        if op.is_equality() {
            if !matches!(left_ty, Type::Number | Type::Boolean) {
                diagnostics.push(operand_mismatch(
                    left,
                    op.symbol(),
                    "number or boolean",
                    left_ty,
                ));
            } else if right_ty != left_ty {
                diagnostics.push(Diagnostic::at(
                    right,
                    format!(
                        "operator '{}' requires a right operand of type {}, found {}",
                        op.symbol(),
                        left_ty,
                        right_ty
                    ),
                ));
            }
        } else {
            for (side, ty) in [(left, left_ty), (right, right_ty)] {
                if ty != Type::Number {
                    diagnostics.push(operand_mismatch(side, op.symbol(), "number", ty));
                }
            }
        }
        if diagnostics.len() == before {
            HlirExpr::Comparison {
                op,
                left: Box::new(lhs.form),
                right: Box::new(rhs.form),
            }
        } else {
            HlirExpr::placeholder(Type::Boolean)
        }
    } else if let Some(op) = logical_op(operator.kind) {
        for (side, ty) in [(left, left_ty), (right, right_ty)] {
            if ty != Type::Boolean {
                diagnostics.push(operand_mismatch(side, op.symbol(), "boolean", ty));
            }
        }
        if diagnostics.len() == before {
            HlirExpr::Logical {
                op,
                left: Box::new(lhs.form),
                right: Box::new(rhs.form),
            }
        } else {
            HlirExpr::placeholder(Type::Boolean)
        }
    } else {
        diagnostics.push(Diagnostic::at(
            operator,
            format!("'{}' is not a binary operator", operator.text),
        ));
        HlirExpr::placeholder(Type::Number)
    };

    Transformed::new(rhs.context, form, diagnostics)
}

fn declared_type(type_name: &Token) -> Option<Type> {
    match type_name.kind {
        TokenKind::NumberKeyword => Some(Type::Number),
        TokenKind::BooleanKeyword => Some(Type::Boolean),
        TokenKind::StringKeyword => Some(Type::String),
        _ => None,
    }
}

/// Registers a declared name in the current frame. Unknown type names are
/// reported and declare a number.
fn declare(context: &BindingContext, declaration: &Declaration) -> (BindingContext, Vec<Diagnostic>) {
    let mut diagnostics = Vec::new();
    let ty = declared_type(&declaration.type_name).unwrap_or_else(|| {
        diagnostics.push(Diagnostic::at(
            &declaration.type_name,
            format!("unknown type '{}'", declaration.type_name.text),
        ));
        Type::Number
    });

    (
        context.set_variable_type(declaration.name(), ty),
        diagnostics,
    )
}

fn transform_assignment(context: &BindingContext, left: &Expr, right: &Expr) -> Transformed {
    match left {
        Expr::Identifier(identifier) => assign(context.clone(), identifier, right, Vec::new()),
        Expr::Declaration(declaration) => {
            let (context, diagnostics) = declare(context, declaration);
            assign(context, &declaration.identifier, right, diagnostics)
        }
        _ => {
            let mut value = right.transform(context);
            value.diagnostics.insert(
                0,
                Diagnostic::at(left, "left side of assignment must be a variable"),
            );
            value
        }
    }
}

fn assign(
    context: BindingContext,
    identifier: &Token,
    value: &Expr,
    mut diagnostics: Vec<Diagnostic>,
) -> Transformed {
    let lowered = value.transform(&context);
    diagnostics.extend(lowered.diagnostics);
    let context = lowered.context;
    let name = identifier.text.as_str();

    let form = match context.try_get_variable_type(name) {
        None => {
            diagnostics.push(unbound(identifier));
            HlirExpr::GlobalSet {
                name: identifier.text.clone(),
                value: Box::new(lowered.form),
            }
        }
        Some(ty) => {
            let found = lowered.form.ty();
            let value_form = if found == ty {
                lowered.form
            } else {
                diagnostics.push(Diagnostic::at(
                    value,
                    format!(
                        "cannot assign a value of type {} to variable '{}' of type {}",
                        found, name, ty
                    ),
                ));
                HlirExpr::placeholder(ty)
            };
            context
                .create_set_variable_expression(name, value_form)
                .unwrap_or_else(|| HlirExpr::placeholder(ty))
        }
    };

    Transformed::new(context, form, diagnostics)
}

/// Lowers a condition, replacing a non-boolean one with `false`.
fn transform_condition(context: &BindingContext, condition: &Expr) -> Transformed {
    let mut lowered = condition.transform(context);
    let found = lowered.form.ty();
    if found != Type::Boolean {
        lowered.diagnostics.push(Diagnostic::at(
            condition,
            format!("condition must be a boolean, found {}", found),
        ));
        lowered.form = HlirExpr::boolean(false);
    }
    lowered
}

impl Transform for Stmt {
    fn transform(&self, context: &BindingContext) -> Transformed {
        match self {
            Stmt::Expression(expr) => expr.transform(context),
            Stmt::Declaration {
                declaration,
                initializer,
                ..
            } => {
                let (context, diagnostics) = declare(context, declaration);
                assign(context, &declaration.identifier, initializer, diagnostics)
            }
            Stmt::If {
                condition, body, ..
            } => {
                let condition = transform_condition(context, condition);
                let body = body.transform(&condition.context);

                let mut diagnostics = condition.diagnostics;
                diagnostics.extend(body.diagnostics);
                Transformed::new(
                    body.context,
                    HlirExpr::Conditional {
                        condition: Box::new(condition.form),
                        then_branch: Box::new(body.form),
                        else_branch: None,
                    },
                    diagnostics,
                )
            }
            Stmt::IfElse {
                condition,
                true_body,
                false_body,
                ..
            } => {
                let condition = transform_condition(context, condition);
                let true_body = true_body.transform(&condition.context);
                let false_body = false_body.transform(&true_body.context);

                let mut diagnostics = condition.diagnostics;
                diagnostics.extend(true_body.diagnostics);
                diagnostics.extend(false_body.diagnostics);
                Transformed::new(
                    false_body.context,
                    HlirExpr::Conditional {
                        condition: Box::new(condition.form),
                        then_branch: Box::new(true_body.form),
                        else_branch: Some(Box::new(false_body.form)),
                    },
                    diagnostics,
                )
            }
            Stmt::While {
                condition, body, ..
            } => {
                let condition = transform_condition(context, condition);
                let body = body.transform(&condition.context);

                let mut diagnostics = condition.diagnostics;
                diagnostics.extend(body.diagnostics);

                // loop { if condition { body } else { break } }
                let form = HlirExpr::Loop(Box::new(HlirExpr::Conditional {
                    condition: Box::new(condition.form),
                    then_branch: Box::new(body.form),
                    else_branch: Some(Box::new(HlirExpr::Break)),
                }));
                Transformed::new(body.context, form, diagnostics)
            }
        }
    }
}

impl Transform for Block {
    fn transform(&self, context: &BindingContext) -> Transformed {
        let mut local = BindingContext::local(context);
        let mut body = Vec::new();
        let mut diagnostics = Vec::new();

        for statement in self.statements() {
            let lowered = statement.transform(&local);
            local = lowered.context;
            body.push(lowered.form);
            diagnostics.extend(lowered.diagnostics);
        }

        let form = HlirExpr::Sequence {
            locals: local.local_variables().to_vec(),
            body,
        };

        // The block's own frame is dropped here.
        Transformed::new(context.clone(), form, diagnostics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use crate::lexer::lex_submission;
    use crate::parser::parse_statement_submission;

    fn run(context: &BindingContext, text: &str) -> Transformed {
        match parse_statement_submission(&lex_submission(text)) {
            Some(statement) => transform(context, &statement),
            None => panic!("{:?} did not parse", text),
        }
    }

    fn messages(transformed: &Transformed) -> Vec<(std::ops::Range<usize>, String)> {
        transformed
            .diagnostics
            .iter()
            .map(|diagnostic| (diagnostic.span(), diagnostic.message.to_string()))
            .collect()
    }

    fn bound(names: &[(&str, Type)]) -> BindingContext {
        names
            .iter()
            .fold(BindingContext::global(), |context, (name, ty)| {
                context.set_variable_type(name, *ty)
            })
    }

    #[test]
    fn literals() {
        let context = BindingContext::global();
        assert_eq!(run(&context, "5").form, HlirExpr::number(dec!(5)));
        assert_eq!(run(&context, "(.5)").form, HlirExpr::number(dec!(0.5)));
        assert_eq!(run(&context, "false").form, HlirExpr::boolean(false));
        assert_eq!(run(&context, "\"a b\"").form, HlirExpr::string("a b"));
    }

    #[test]
    fn invalid_number_literal_is_reported() {
        let expr = Expr::number(Token::at(0, "1e5", TokenKind::NumberLiteral));
        let transformed = transform(&BindingContext::global(), &expr);

        assert_eq!(
            messages(&transformed),
            vec![(0..3, "invalid number literal '1e5'".to_string())]
        );
        assert_eq!(transformed.form, HlirExpr::number(dec!(0)));
    }

    #[test]
    fn arithmetic() {
        let transformed = run(&BindingContext::global(), "2 * -3");
        assert!(!transformed.has_errors());
        assert_eq!(
            transformed.form,
            HlirExpr::Arithmetic {
                op: ArithmeticOp::Multiply,
                left: Box::new(HlirExpr::number(dec!(2))),
                right: Box::new(HlirExpr::Negate(Box::new(HlirExpr::number(dec!(3))))),
            }
        );
    }

    #[test]
    fn undeclared_variables_are_reported_and_replaced() {
        let transformed = run(&BindingContext::global(), "x + y");
        assert_eq!(
            messages(&transformed),
            vec![
                (0..1, "variable 'x' is not declared".to_string()),
                (4..5, "variable 'y' is not declared".to_string()),
            ]
        );
        assert_eq!(transformed.form.ty(), Type::Number);
    }

    #[test]
    fn arithmetic_reports_each_bad_side() {
        let context = BindingContext::global();

        let one = run(&context, "1 + true");
        assert_eq!(
            messages(&one),
            vec![(
                4..8,
                "operator '+' requires a number operand, found boolean".to_string()
            )]
        );
        assert_eq!(one.form, HlirExpr::number(dec!(0)));

        let two = run(&context, "true < \"s\"");
        assert_eq!(two.diagnostics.len(), 2);
        assert_eq!(two.form, HlirExpr::boolean(false));
    }

    #[test]
    fn negation_requires_a_number() {
        let transformed = run(&BindingContext::global(), "-true");
        assert_eq!(
            messages(&transformed),
            vec![(
                1..5,
                "operator '-' requires a number operand, found boolean".to_string()
            )]
        );
    }

    #[test]
    fn equality_rules() {
        let context = BindingContext::global();

        assert!(!run(&context, "1 == 2").has_errors());
        assert!(!run(&context, "true != false").has_errors());

        assert_eq!(
            messages(&run(&context, "1 == true")),
            vec![(
                5..9,
                "operator '==' requires a right operand of type number, found boolean".to_string()
            )]
        );
        assert_eq!(
            messages(&run(&context, "\"a\" == \"a\"")),
            vec![(
                0..3,
                "operator '==' requires a number or boolean operand, found string".to_string()
            )]
        );
    }

    #[test]
    fn logical_operators_require_booleans() {
        let context = BindingContext::global();
        assert!(!run(&context, "true and 1 < 2 or false").has_errors());

        let transformed = run(&context, "1 and true");
        assert_eq!(
            messages(&transformed),
            vec![(
                0..1,
                "operator 'and' requires a boolean operand, found number".to_string()
            )]
        );
    }

    #[test]
    fn declarations_bind_in_the_returned_context() {
        let transformed = run(&BindingContext::global(), "a as number = 1");

        assert!(!transformed.has_errors());
        assert_eq!(
            transformed.context.try_get_variable_type("a"),
            Some(Type::Number)
        );
        assert_eq!(
            transformed.form,
            HlirExpr::GlobalSet {
                name: "a".into(),
                value: Box::new(HlirExpr::number(dec!(1))),
            }
        );
    }

    #[test]
    fn declaration_expressions_chain() {
        let transformed = run(&BindingContext::global(), "a = b as boolean = true");
        // `a` is still undeclared; `b` is declared by the right side.
        assert_eq!(
            messages(&transformed),
            vec![(0..1, "variable 'a' is not declared".to_string())]
        );
        assert_eq!(
            transformed.context.try_get_variable_type("b"),
            Some(Type::Boolean)
        );
    }

    #[test]
    fn unknown_type_names_default_to_number() {
        let transformed = run(&BindingContext::global(), "a as thing = 1");
        assert_eq!(
            messages(&transformed),
            vec![(5..10, "unknown type 'thing'".to_string())]
        );
        assert_eq!(
            transformed.context.try_get_variable_type("a"),
            Some(Type::Number)
        );
    }

    #[test]
    fn assignments_are_type_checked() {
        let context = bound(&[("a", Type::Number)]);
        let transformed = run(&context, "a = true");

        assert_eq!(
            messages(&transformed),
            vec![(
                4..8,
                "cannot assign a value of type boolean to variable 'a' of type number".to_string()
            )]
        );
        assert_eq!(transformed.form.ty(), Type::Number);
    }

    #[test]
    fn assignment_to_an_undeclared_name() {
        let transformed = run(&BindingContext::global(), "b = 1");
        assert_eq!(
            messages(&transformed),
            vec![(0..1, "variable 'b' is not declared".to_string())]
        );
        assert!(matches!(transformed.form, HlirExpr::GlobalSet { .. }));
    }

    #[test]
    fn assignment_target_must_be_a_variable() {
        let expr = Expr::binary(
            Expr::number(Token::at(0, "1", TokenKind::NumberLiteral)),
            Token::at(1, "=", TokenKind::Equal),
            Expr::number(Token::at(2, "2", TokenKind::NumberLiteral)),
        );
        let transformed = transform(&BindingContext::global(), &expr);

        assert_eq!(
            messages(&transformed),
            vec![(0..1, "left side of assignment must be a variable".to_string())]
        );
    }

    #[test]
    fn non_boolean_condition_is_replaced_with_false() {
        let context = bound(&[("a", Type::Number)]);
        let transformed = run(&context, "if 5 a end");

        assert_eq!(
            messages(&transformed),
            vec![(3..4, "condition must be a boolean, found number".to_string())]
        );
        match transformed.form {
            HlirExpr::Conditional { condition, .. } => {
                assert_eq!(*condition, HlirExpr::boolean(false))
            }
            other => panic!("unexpected form {}", other),
        }
    }

    #[test]
    fn blocks_do_not_leak_declarations() {
        let context = BindingContext::global();
        let transformed = run(&context, "if true x as number = 1 x = x + 1 end");

        assert!(!transformed.has_errors());
        assert_eq!(transformed.context.try_get_variable_type("x"), None);
        assert_eq!(transformed.context, context);

        match transformed.form {
            HlirExpr::Conditional { then_branch, .. } => match *then_branch {
                HlirExpr::Sequence { locals, body } => {
                    assert_eq!(locals.len(), 1);
                    assert_eq!(locals[0].name, "x");
                    assert!(matches!(body[0], HlirExpr::LocalSet { .. }));
                    assert!(matches!(body[1], HlirExpr::LocalSet { .. }));
                }
                other => panic!("unexpected body {}", other),
            },
            other => panic!("unexpected form {}", other),
        }
    }

    #[test]
    fn while_lowers_to_a_loop_with_an_exit_branch() {
        let context = bound(&[("a", Type::Number)]);
        let transformed = run(&context, "while a < 3 a = a + 1 end");

        assert!(!transformed.has_errors());
        match transformed.form {
            HlirExpr::Loop(body) => match *body {
                HlirExpr::Conditional {
                    condition,
                    else_branch,
                    ..
                } => {
                    assert_eq!(condition.ty(), Type::Boolean);
                    assert_eq!(else_branch.map(|b| *b), Some(HlirExpr::Break));
                }
                other => panic!("unexpected loop body {}", other),
            },
            other => panic!("unexpected form {}", other),
        }
    }

    #[test]
    fn if_else_collects_diagnostics_from_both_branches() {
        let transformed = run(&BindingContext::global(), "if 1 x else y end");
        assert_eq!(transformed.diagnostics.len(), 3);
    }

    #[test]
    fn strings_can_be_declared_and_read() {
        let transformed = run(&BindingContext::global(), "s as string = \"hi\"");
        assert!(!transformed.has_errors());

        let read = run(&transformed.context, "s");
        assert_eq!(read.form.ty(), Type::String);
        assert!(run(&transformed.context, "s + 1").has_errors());
    }
}
