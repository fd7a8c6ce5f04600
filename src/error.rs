use ecow::EcoString;
use thiserror::Error;

use crate::hlir::Type;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("variable '{name}' is not declared")]
pub struct UnboundVariable {
    pub name: EcoString,
}

/// Failures while executing a lowered form. The transformer only emits
/// well-typed forms, so these indicate a store that disagrees with the
/// binding context or a hand-built form.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    #[error("global '{name}' holds a {found} value where a {expected} was expected")]
    GlobalTypeMismatch {
        name: EcoString,
        expected: Type,
        found: Type,
    },
    #[error("'break' outside of a loop")]
    BreakOutsideLoop,
    #[error("operator '{operator}' cannot be applied to a {found} value")]
    InvalidOperand {
        operator: &'static str,
        found: Type,
    },
    #[error("division by zero")]
    DivisionByZero,
    #[error("result of '{operator}' is out of range")]
    NumberOverflow { operator: &'static str },
    #[error("local '{0}' is used outside the block that declares it")]
    UnknownLocal(EcoString),
}

#[cfg(feature = "jit")]
#[derive(Debug, Error)]
pub enum JitError {
    #[error(transparent)]
    Module(#[from] cranelift_module::ModuleError),
    #[error("generated code failed verification: {0}")]
    Verifier(String),
    #[error("{0} values are not supported by the JIT backend")]
    Unsupported(Type),
    #[error("'break' outside of a loop")]
    BreakOutsideLoop,
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[cfg(feature = "jit")]
    #[error(transparent)]
    Jit(#[from] JitError),
    #[error("this build has no JIT backend; rebuild with the `jit` feature")]
    JitUnavailable,
}
