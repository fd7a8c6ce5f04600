//! The lowered, executable form produced by the transformer.
//!
//! An `HlirExpr` tree is statically typed: every node knows its result type
//! without looking at a binding context. The interpreter and the JIT both
//! consume it.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use ecow::EcoString;
use rust_decimal::Decimal;

use crate::error::RuntimeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    Number,
    Boolean,
    String,
    Void,
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Type::Number => "number",
            Type::Boolean => "boolean",
            Type::String => "string",
            Type::Void => "void",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(Decimal),
    Boolean(bool),
    String(EcoString),
    Void,
}

impl Value {
    pub fn ty(&self) -> Type {
        match self {
            Value::Number(_) => Type::Number,
            Value::Boolean(_) => Type::Boolean,
            Value::String(_) => Type::String,
            Value::Void => Type::Void,
        }
    }

    /// The value a fresh variable of type `ty` holds, and the value used in
    /// place of an expression that failed to type-check.
    pub fn default_of(ty: Type) -> Value {
        match ty {
            Type::Number => Value::Number(Decimal::ZERO),
            Type::Boolean => Value::Boolean(false),
            Type::String => Value::String(EcoString::new()),
            Type::Void => Value::Void,
        }
    }

    pub fn as_number(&self) -> Option<Decimal> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{}", n),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::String(s) => write!(f, "{}", s),
            Value::Void => f.write_str("void"),
        }
    }
}

static NEXT_SLOT: AtomicUsize = AtomicUsize::new(0);

/// Identifies one block-local storage slot. Ids are unique for the life of
/// the process, so two declarations of the same name never share a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(pub usize);

impl SlotId {
    pub fn fresh() -> Self {
        SlotId(NEXT_SLOT.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocalSlot {
    pub id: SlotId,
    pub name: EcoString,
    pub ty: Type,
}

impl LocalSlot {
    pub fn new(name: impl Into<EcoString>, ty: Type) -> Self {
        LocalSlot {
            id: SlotId::fresh(),
            name: name.into(),
            ty,
        }
    }
}

impl fmt::Display for LocalSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.id.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithmeticOp {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl ArithmeticOp {
    pub fn symbol(self) -> &'static str {
        match self {
            ArithmeticOp::Add => "+",
            ArithmeticOp::Subtract => "-",
            ArithmeticOp::Multiply => "*",
            ArithmeticOp::Divide => "/",
        }
    }

    pub fn apply(self, left: Decimal, right: Decimal) -> Result<Decimal, RuntimeError> {
        let result = match self {
            ArithmeticOp::Add => left.checked_add(right),
            ArithmeticOp::Subtract => left.checked_sub(right),
            ArithmeticOp::Multiply => left.checked_mul(right),
            ArithmeticOp::Divide if right.is_zero() => return Err(RuntimeError::DivisionByZero),
            ArithmeticOp::Divide => left.checked_div(right),
        };
        result.ok_or(RuntimeError::NumberOverflow {
            operator: self.symbol(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComparisonOp {
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Equal,
    NotEqual,
}

impl ComparisonOp {
    pub fn symbol(self) -> &'static str {
        match self {
            ComparisonOp::Less => "<",
            ComparisonOp::LessEqual => "<=",
            ComparisonOp::Greater => ">",
            ComparisonOp::GreaterEqual => ">=",
            ComparisonOp::Equal => "==",
            ComparisonOp::NotEqual => "!=",
        }
    }

    pub fn is_equality(self) -> bool {
        matches!(self, ComparisonOp::Equal | ComparisonOp::NotEqual)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalOp {
    And,
    Or,
}

impl LogicalOp {
    pub fn symbol(self) -> &'static str {
        match self {
            LogicalOp::And => "and",
            LogicalOp::Or => "or",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HlirExpr {
    Constant(Value),
    Negate(Box<HlirExpr>),
    Arithmetic {
        op: ArithmeticOp,
        left: Box<HlirExpr>,
        right: Box<HlirExpr>,
    },
    /// Relational operators take numbers; equality takes two numbers or two
    /// booleans.
    Comparison {
        op: ComparisonOp,
        left: Box<HlirExpr>,
        right: Box<HlirExpr>,
    },
    /// Short-circuiting.
    Logical {
        op: LogicalOp,
        left: Box<HlirExpr>,
        right: Box<HlirExpr>,
    },
    GlobalGet {
        name: EcoString,
        ty: Type,
    },
    GlobalSet {
        name: EcoString,
        value: Box<HlirExpr>,
    },
    LocalGet(LocalSlot),
    LocalSet {
        slot: LocalSlot,
        value: Box<HlirExpr>,
    },
    Conditional {
        condition: Box<HlirExpr>,
        then_branch: Box<HlirExpr>,
        else_branch: Option<Box<HlirExpr>>,
    },
    /// Runs its body until a `Break` inside it executes.
    Loop(Box<HlirExpr>),
    Break,
    /// Declares `locals` (initialised to their defaults) and runs `body` in
    /// order; the value is that of the last expression.
    Sequence {
        locals: Vec<LocalSlot>,
        body: Vec<HlirExpr>,
    },
}

impl HlirExpr {
    pub fn number(n: Decimal) -> Self {
        HlirExpr::Constant(Value::Number(n))
    }

    pub fn boolean(b: bool) -> Self {
        HlirExpr::Constant(Value::Boolean(b))
    }

    pub fn string(s: impl Into<EcoString>) -> Self {
        HlirExpr::Constant(Value::String(s.into()))
    }

    /// A constant standing in for an expression of type `ty` that could not
    /// be lowered.
    pub fn placeholder(ty: Type) -> Self {
        HlirExpr::Constant(Value::default_of(ty))
    }

    pub fn ty(&self) -> Type {
        match self {
            HlirExpr::Constant(value) => value.ty(),
            HlirExpr::Negate(_) | HlirExpr::Arithmetic { .. } => Type::Number,
            HlirExpr::Comparison { .. } | HlirExpr::Logical { .. } => Type::Boolean,
            HlirExpr::GlobalGet { ty, .. } => *ty,
            HlirExpr::GlobalSet { value, .. } | HlirExpr::LocalSet { value, .. } => value.ty(),
            HlirExpr::LocalGet(slot) => slot.ty,
            HlirExpr::Conditional { .. } | HlirExpr::Loop(_) | HlirExpr::Break => Type::Void,
            HlirExpr::Sequence { body, .. } => body.last().map_or(Type::Void, HlirExpr::ty),
        }
    }
}

impl fmt::Display for HlirExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HlirExpr::Constant(Value::String(s)) => write!(f, "{:?}", s.as_str()),
            HlirExpr::Constant(value) => write!(f, "{}", value),
            HlirExpr::Negate(operand) => write!(f, "(neg {})", operand),
            HlirExpr::Arithmetic { op, left, right } => {
                write!(f, "({} {} {})", op.symbol(), left, right)
            }
            HlirExpr::Comparison { op, left, right } => {
                write!(f, "({} {} {})", op.symbol(), left, right)
            }
            HlirExpr::Logical { op, left, right } => {
                write!(f, "({} {} {})", op.symbol(), left, right)
            }
            HlirExpr::GlobalGet { name, ty } => write!(f, "(global {} {})", name, ty),
            HlirExpr::GlobalSet { name, value } => write!(f, "(set-global {} {})", name, value),
            HlirExpr::LocalGet(slot) => write!(f, "{}", slot),
            HlirExpr::LocalSet { slot, value } => write!(f, "(set {} {})", slot, value),
            HlirExpr::Conditional {
                condition,
                then_branch,
                else_branch,
            } => {
                write!(f, "(if {} {}", condition, then_branch)?;
                if let Some(else_branch) = else_branch {
                    write!(f, " {}", else_branch)?;
                }
                f.write_str(")")
            }
            HlirExpr::Loop(body) => write!(f, "(loop {})", body),
            HlirExpr::Break => f.write_str("(break)"),
            HlirExpr::Sequence { locals, body } => {
                f.write_str("(seq [")?;
                for (index, slot) in locals.iter().enumerate() {
                    if index > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{}:{}", slot, slot.ty)?;
                }
                f.write_str("]")?;
                for expr in body {
                    write!(f, " {}", expr)?;
                }
                f.write_str(")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn slots_are_unique() {
        let a = LocalSlot::new("a", Type::Number);
        let b = LocalSlot::new("a", Type::Number);
        assert_ne!(a.id, b.id);
        assert_ne!(a, b);
    }

    #[test]
    fn result_types() {
        let slot = LocalSlot::new("flag", Type::Boolean);
        let cases = [
            (HlirExpr::number(dec!(1)), Type::Number),
            (HlirExpr::string("s"), Type::String),
            (HlirExpr::Negate(Box::new(HlirExpr::number(dec!(1)))), Type::Number),
            (
                HlirExpr::Comparison {
                    op: ComparisonOp::Equal,
                    left: Box::new(HlirExpr::boolean(true)),
                    right: Box::new(HlirExpr::boolean(false)),
                },
                Type::Boolean,
            ),
            (HlirExpr::LocalGet(slot.clone()), Type::Boolean),
            (
                HlirExpr::GlobalSet {
                    name: "a".into(),
                    value: Box::new(HlirExpr::string("x")),
                },
                Type::String,
            ),
            (HlirExpr::Loop(Box::new(HlirExpr::Break)), Type::Void),
            (
                HlirExpr::Sequence {
                    locals: vec![slot],
                    body: Vec::new(),
                },
                Type::Void,
            ),
            (
                HlirExpr::Sequence {
                    locals: Vec::new(),
                    body: vec![HlirExpr::boolean(true), HlirExpr::number(dec!(2))],
                },
                Type::Number,
            ),
        ];

        for (expr, ty) in cases {
            assert_eq!(expr.ty(), ty, "{}", expr);
        }
    }

    #[test]
    fn defaults() {
        assert_eq!(Value::default_of(Type::Number), Value::Number(dec!(0)));
        assert_eq!(Value::default_of(Type::Boolean), Value::Boolean(false));
        assert_eq!(Value::default_of(Type::String), Value::String("".into()));
        assert_eq!(HlirExpr::placeholder(Type::Boolean).ty(), Type::Boolean);
    }

    #[test]
    fn display() {
        let expr = HlirExpr::Loop(Box::new(HlirExpr::Conditional {
            condition: Box::new(HlirExpr::Comparison {
                op: ComparisonOp::Less,
                left: Box::new(HlirExpr::GlobalGet {
                    name: "a".into(),
                    ty: Type::Number,
                }),
                right: Box::new(HlirExpr::number(dec!(3))),
            }),
            then_branch: Box::new(HlirExpr::GlobalSet {
                name: "a".into(),
                value: Box::new(HlirExpr::Arithmetic {
                    op: ArithmeticOp::Add,
                    left: Box::new(HlirExpr::GlobalGet {
                        name: "a".into(),
                        ty: Type::Number,
                    }),
                    right: Box::new(HlirExpr::number(dec!(0.5))),
                }),
            }),
            else_branch: Some(Box::new(HlirExpr::Break)),
        }));

        assert_eq!(
            expr.to_string(),
            "(loop (if (< (global a number) 3) (set-global a (+ (global a number) 0.5)) (break)))"
        );
        assert_eq!(HlirExpr::string("hi").to_string(), "\"hi\"");
        assert_eq!(Value::Number(dec!(-6)).to_string(), "-6");
        assert_eq!(Value::Number(dec!(0.1) + dec!(0.2)).to_string(), "0.3");
    }

    #[test]
    fn arithmetic_is_exact_and_checked() {
        assert_eq!(ArithmeticOp::Add.apply(dec!(0.1), dec!(0.2)), Ok(dec!(0.3)));
        assert_eq!(ArithmeticOp::Divide.apply(dec!(1), dec!(8)), Ok(dec!(0.125)));
        assert_eq!(
            ArithmeticOp::Divide.apply(dec!(1), Decimal::ZERO),
            Err(RuntimeError::DivisionByZero)
        );
        assert_eq!(
            ArithmeticOp::Multiply.apply(Decimal::MAX, dec!(2)),
            Err(RuntimeError::NumberOverflow { operator: "*" })
        );
    }
}
