use std::collections::HashMap;

use rust_decimal::Decimal;
use tracing::{debug, trace};

use crate::error::RuntimeError;
use crate::globals::GlobalStore;
use crate::hlir::{ComparisonOp, HlirExpr, LogicalOp, SlotId, Type, Value};

/// Why evaluation of a subtree stopped early.
enum Unwind {
    Break,
    Error(RuntimeError),
}

impl From<RuntimeError> for Unwind {
    fn from(error: RuntimeError) -> Self {
        Unwind::Error(error)
    }
}

type Eval = Result<Value, Unwind>;

struct Interpreter<'a> {
    store: &'a mut dyn GlobalStore,
    locals: HashMap<SlotId, Value>,
}

fn expect_number(value: Value, operator: &'static str) -> Result<Decimal, RuntimeError> {
    value.as_number().ok_or(RuntimeError::InvalidOperand {
        operator,
        found: value.ty(),
    })
}

fn expect_boolean(value: Value, operator: &'static str) -> Result<bool, RuntimeError> {
    value.as_boolean().ok_or(RuntimeError::InvalidOperand {
        operator,
        found: value.ty(),
    })
}

impl Interpreter<'_> {
    fn eval(&mut self, expr: &HlirExpr) -> Eval {
        match expr {
            HlirExpr::Constant(value) => Ok(value.clone()),
            HlirExpr::Negate(operand) => {
                let n = expect_number(self.eval(operand)?, "-")?;
                Ok(Value::Number(-n))
            }
            HlirExpr::Arithmetic { op, left, right } => {
                let l = expect_number(self.eval(left)?, op.symbol())?;
                let r = expect_number(self.eval(right)?, op.symbol())?;
                Ok(Value::Number(op.apply(l, r)?))
            }
            HlirExpr::Comparison { op, left, right } => {
                let l = self.eval(left)?;
                let r = self.eval(right)?;
                Ok(Value::Boolean(compare(*op, l, r)?))
            }
            HlirExpr::Logical { op, left, right } => {
                let l = expect_boolean(self.eval(left)?, op.symbol())?;
                let result = match (op, l) {
                    (LogicalOp::And, false) => false,
                    (LogicalOp::Or, true) => true,
                    _ => expect_boolean(self.eval(right)?, op.symbol())?,
                };
                Ok(Value::Boolean(result))
            }
            HlirExpr::GlobalGet { name, ty } => {
                // A name bound but never written reads as its type's default.
                let value = self
                    .store
                    .try_get(name)
                    .unwrap_or_else(|| Value::default_of(*ty));
                if value.ty() != *ty {
                    return Err(RuntimeError::GlobalTypeMismatch {
                        name: name.clone(),
                        expected: *ty,
                        found: value.ty(),
                    }
                    .into());
                }
                Ok(value)
            }
            HlirExpr::GlobalSet { name, value } => {
                let value = self.eval(value)?;
                trace!(%name, %value, "set global");
                Ok(self.store.set(name, value))
            }
            HlirExpr::LocalGet(slot) => self
                .locals
                .get(&slot.id)
                .cloned()
                .ok_or_else(|| RuntimeError::UnknownLocal(slot.name.clone()).into()),
            HlirExpr::LocalSet { slot, value } => {
                let value = self.eval(value)?;
                if !self.locals.contains_key(&slot.id) {
                    return Err(RuntimeError::UnknownLocal(slot.name.clone()).into());
                }
                self.locals.insert(slot.id, value.clone());
                Ok(value)
            }
            HlirExpr::Conditional {
                condition,
                then_branch,
                else_branch,
            } => {
                if expect_boolean(self.eval(condition)?, "if")? {
                    self.eval(then_branch)?;
                } else if let Some(else_branch) = else_branch {
                    self.eval(else_branch)?;
                }
                Ok(Value::Void)
            }
            HlirExpr::Loop(body) => loop {
                match self.eval(body) {
                    Ok(_) => {}
                    Err(Unwind::Break) => return Ok(Value::Void),
                    Err(error) => return Err(error),
                }
            },
            HlirExpr::Break => Err(Unwind::Break),
            HlirExpr::Sequence { locals, body } => {
                for slot in locals {
                    self.locals.insert(slot.id, Value::default_of(slot.ty));
                }

                let mut last = Value::Void;
                for expr in body {
                    last = self.eval(expr)?;
                }
                Ok(last)
            }
        }
    }
}

fn compare(op: ComparisonOp, left: Value, right: Value) -> Result<bool, RuntimeError> {
    let symbol = op.symbol();
    match (op, left, right) {
        (ComparisonOp::Equal, Value::Boolean(l), Value::Boolean(r)) => Ok(l == r),
        (ComparisonOp::NotEqual, Value::Boolean(l), Value::Boolean(r)) => Ok(l != r),
        (op, Value::Number(l), Value::Number(r)) => Ok(match op {
            ComparisonOp::Less => l < r,
            ComparisonOp::LessEqual => l <= r,
            ComparisonOp::Greater => l > r,
            ComparisonOp::GreaterEqual => l >= r,
            ComparisonOp::Equal => l == r,
            ComparisonOp::NotEqual => l != r,
        }),
        (_, Value::Number(_), other) | (_, other, _) => Err(RuntimeError::InvalidOperand {
            operator: symbol,
            found: other.ty(),
        }),
    }
}

/// Runs `form` once against `store`.
pub fn evaluate(form: &HlirExpr, store: &mut dyn GlobalStore) -> Result<Value, RuntimeError> {
    let mut interpreter = Interpreter {
        store,
        locals: HashMap::new(),
    };

    match interpreter.eval(form) {
        Ok(value) => Ok(value),
        Err(Unwind::Break) => Err(RuntimeError::BreakOutsideLoop),
        Err(Unwind::Error(error)) => Err(error),
    }
}

fn breaks_outside_loop(expr: &HlirExpr) -> bool {
    match expr {
        HlirExpr::Break => true,
        HlirExpr::Loop(_) => false,
        HlirExpr::Constant(_)
        | HlirExpr::GlobalGet { .. }
        | HlirExpr::LocalGet(_) => false,
        HlirExpr::Negate(operand) => breaks_outside_loop(operand),
        HlirExpr::Arithmetic { left, right, .. }
        | HlirExpr::Comparison { left, right, .. }
        | HlirExpr::Logical { left, right, .. } => {
            breaks_outside_loop(left) || breaks_outside_loop(right)
        }
        HlirExpr::GlobalSet { value, .. } | HlirExpr::LocalSet { value, .. } => {
            breaks_outside_loop(value)
        }
        HlirExpr::Conditional {
            condition,
            then_branch,
            else_branch,
        } => {
            breaks_outside_loop(condition)
                || breaks_outside_loop(then_branch)
                || else_branch.as_deref().is_some_and(breaks_outside_loop)
        }
        HlirExpr::Sequence { body, .. } => body.iter().any(breaks_outside_loop),
    }
}

/// A checked form that can be run any number of times.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    form: HlirExpr,
}

impl Program {
    pub fn compile(form: HlirExpr) -> Result<Self, RuntimeError> {
        if breaks_outside_loop(&form) {
            return Err(RuntimeError::BreakOutsideLoop);
        }
        debug!(ty = %form.ty(), "compiled program");
        Ok(Program { form })
    }

    pub fn result_type(&self) -> Type {
        self.form.ty()
    }

    pub fn form(&self) -> &HlirExpr {
        &self.form
    }

    pub fn invoke(&self, store: &mut dyn GlobalStore) -> Result<Value, RuntimeError> {
        evaluate(&self.form, store)
    }
}
