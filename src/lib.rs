//! `ncalc`: a small typed calculator language with variables, blocks and
//! loops, run one submission at a time.
//!
//! Text is lexed into [`tokens::Token`]s, parsed into an [`ast`], then bound,
//! type-checked and lowered into an [`hlir::HlirExpr`] by the
//! [`transformer`]. Lowered forms run on the [`interpreter`], or with the
//! `jit` feature, as native code through [`codegen`]. [`session::Session`]
//! strings the stages together.

pub mod ast;
pub mod binding;
#[cfg(feature = "jit")]
pub mod codegen;
pub mod diagnostic;
pub mod error;
pub mod globals;
pub mod hlir;
pub mod interpreter;
pub mod lexer;
pub mod line_map;
pub mod parser;
pub mod session;
pub mod tokens;
pub mod transformer;


pub use error::{RuntimeError, SessionError};
pub use session::{Backend, Outcome, Session, SessionOptions};
