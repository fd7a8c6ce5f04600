//! The submission pipeline: lex, parse, lower, run, and commit.

use tracing::{debug, warn};

use crate::binding::BindingContext;
use crate::diagnostic::Diagnostic;
#[cfg(feature = "jit")]
use crate::error::JitError;
use crate::error::SessionError;
use crate::globals::{GlobalStore, Globals};
use crate::hlir::{HlirExpr, Value};
use crate::interpreter::Program;
use crate::lexer::{lex_recovering, lex_submission};
use crate::line_map::{render_diagnostic, LineMap};
use crate::parser::{parse_expression_submission, parse_statement_submission};
use crate::tokens::TokenKind;
use crate::transformer::{transform, Transformed};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum Backend {
    /// Walk the lowered form directly.
    #[default]
    Interpreter,
    /// Compile the lowered form to native code with Cranelift.
    Jit,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionOptions {
    pub backend: Backend,
    /// Keep the lowered form of the last accepted submission around for
    /// printing.
    pub dump_hlir: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Evaluated(Value),
    Rejected(Vec<Diagnostic>),
    /// Neither an expression nor a statement.
    Unrecognized,
}

pub struct Session {
    context: BindingContext,
    globals: Box<dyn GlobalStore>,
    options: SessionOptions,
    last_form: Option<HlirExpr>,
    #[cfg(feature = "jit")]
    jit: crate::codegen::Jit,
}

impl Default for Session {
    fn default() -> Self {
        Session::new(SessionOptions::default())
    }
}

impl Session {
    pub fn new(options: SessionOptions) -> Self {
        Session::with_store(options, Box::new(Globals::new()))
    }

    pub fn with_store(options: SessionOptions, globals: Box<dyn GlobalStore>) -> Self {
        Session {
            context: BindingContext::global(),
            globals,
            options,
            last_form: None,
            #[cfg(feature = "jit")]
            jit: crate::codegen::Jit::new(),
        }
    }

    pub fn context(&self) -> &BindingContext {
        &self.context
    }

    pub fn globals(&self) -> &dyn GlobalStore {
        self.globals.as_ref()
    }

    pub fn options(&self) -> SessionOptions {
        self.options
    }

    /// The lowered form of the last accepted submission, recorded only when
    /// `dump_hlir` is set.
    pub fn last_form(&self) -> Option<&HlirExpr> {
        self.last_form.as_ref()
    }

    /// Runs one submission. The binding context only moves forward when the
    /// submission lowers without diagnostics and then runs without error.
    pub fn submit(&mut self, text: &str) -> Result<Outcome, SessionError> {
        let Some(transformed) = self.lower(text) else {
            debug!("unrecognized submission");
            return Ok(Outcome::Unrecognized);
        };

        if transformed.has_errors() {
            warn!(
                diagnostics = transformed.diagnostics.len(),
                "submission rejected, binding context rolled back"
            );
            return Ok(Outcome::Rejected(transformed.diagnostics));
        }

        let Transformed { context, form, .. } = transformed;
        let value = self.execute(&form)?;

        self.context = context;
        if self.options.dump_hlir {
            self.last_form = Some(form);
        }
        Ok(Outcome::Evaluated(value))
    }

    fn lower(&self, text: &str) -> Option<Transformed> {
        let tokens = lex_submission(text);
        if let Some(expr) = parse_expression_submission(&tokens) {
            return Some(transform(&self.context, &expr));
        }
        parse_statement_submission(&tokens).map(|stmt| transform(&self.context, &stmt))
    }

    fn execute(&mut self, form: &HlirExpr) -> Result<Value, SessionError> {
        match self.options.backend {
            Backend::Interpreter => self.interpret(form),
            Backend::Jit => self.execute_native(form),
        }
    }

    fn interpret(&mut self, form: &HlirExpr) -> Result<Value, SessionError> {
        let program = Program::compile(form.clone())?;
        Ok(program.invoke(self.globals.as_mut())?)
    }

    #[cfg(feature = "jit")]
    fn execute_native(&mut self, form: &HlirExpr) -> Result<Value, SessionError> {
        match self.jit.compile(form) {
            Ok(function) => Ok(function.invoke(self.globals.as_mut())?),
            Err(JitError::Unsupported(ty)) => {
                debug!(%ty, "falling back to the interpreter");
                self.interpret(form)
            }
            Err(error) => Err(error.into()),
        }
    }

    #[cfg(not(feature = "jit"))]
    fn execute_native(&mut self, _form: &HlirExpr) -> Result<Value, SessionError> {
        Err(SessionError::JitUnavailable)
    }
}

/// Whether `text` should be submitted as is, or the front end should keep
/// reading lines. Text that parses is complete. Otherwise more input is
/// wanted while a string literal is open, `if`/`while` outnumber `end`, or
/// `(` outnumbers `)`.
pub fn is_submission_complete(text: &str) -> bool {
    let tokens = lex_submission(text);
    if parse_expression_submission(&tokens).is_some()
        || parse_statement_submission(&tokens).is_some()
    {
        return true;
    }

    let mut blocks = 0i32;
    let mut parens = 0i32;
    for token in lex_recovering(text) {
        match token.kind {
            TokenKind::IfKeyword | TokenKind::WhileKeyword => blocks += 1,
            TokenKind::EndKeyword => blocks -= 1,
            TokenKind::LeftParen => parens += 1,
            TokenKind::RightParen => parens -= 1,
            TokenKind::Unknown if token.text == "\"" => return false,
            _ => {}
        }
    }

    blocks <= 0 && parens <= 0
}

pub fn render_diagnostics(text: &str, diagnostics: &[Diagnostic]) -> String {
    let map = LineMap::new(text);
    diagnostics
        .iter()
        .map(|diagnostic| render_diagnostic(&map, diagnostic))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use crate::hlir::Type;

    #[test]
    fn rejected_submissions_roll_back() {
        let mut session = Session::default();
        let outcome = session.submit("a as number = true").unwrap();

        assert!(matches!(outcome, Outcome::Rejected(ref d) if !d.is_empty()));
        assert_eq!(session.context().try_get_variable_type("a"), None);
        assert_eq!(session.globals().get("a"), Value::Number(dec!(0)));
    }

    #[test]
    fn accepted_submissions_commit() {
        let mut session = Session::default();
        session.submit("flag as boolean = true").unwrap();

        assert_eq!(
            session.context().try_get_variable_type("flag"),
            Some(Type::Boolean)
        );
        assert_eq!(
            session.submit("flag or false").unwrap(),
            Outcome::Evaluated(Value::Boolean(true))
        );
    }

    #[test]
    fn runtime_errors_do_not_commit() {
        let mut globals = Globals::new();
        globals.set("a", Value::Boolean(true));
        let mut session = Session::with_store(SessionOptions::default(), Box::new(globals));
        // The store disagrees with the declared type of `a`.
        session.context = BindingContext::global().set_variable_type("a", Type::Number);

        assert!(matches!(
            session.submit("b as number = a"),
            Err(SessionError::Runtime(_))
        ));
        assert_eq!(session.context().try_get_variable_type("b"), None);
        assert_eq!(
            session.context().try_get_variable_type("a"),
            Some(Type::Number)
        );
    }

    #[test]
    fn unrecognized_text() {
        let mut session = Session::default();
        assert_eq!(session.submit("1 +").unwrap(), Outcome::Unrecognized);
        assert_eq!(session.submit("").unwrap(), Outcome::Unrecognized);
    }

    #[test]
    fn dump_keeps_the_last_form() {
        let mut session = Session::new(SessionOptions {
            dump_hlir: true,
            ..SessionOptions::default()
        });
        session.submit("1 + 2").unwrap();
        assert_eq!(
            session.last_form().map(ToString::to_string).as_deref(),
            Some("(+ 1 2)")
        );

        let mut quiet = Session::default();
        quiet.submit("1 + 2").unwrap();
        assert!(quiet.last_form().is_none());
    }

    #[cfg(not(feature = "jit"))]
    #[test]
    fn jit_backend_needs_the_feature() {
        let mut session = Session::new(SessionOptions {
            backend: Backend::Jit,
            dump_hlir: false,
        });
        assert!(matches!(
            session.submit("1"),
            Err(SessionError::JitUnavailable)
        ));
    }

    #[cfg(feature = "jit")]
    #[test]
    fn jit_backend_falls_back_for_strings() {
        let mut session = Session::new(SessionOptions {
            backend: Backend::Jit,
            dump_hlir: false,
        });
        assert_eq!(
            session.submit("2 * -3").unwrap(),
            Outcome::Evaluated(Value::Number(dec!(-6)))
        );
        assert_eq!(
            session.submit("\"hi\"").unwrap(),
            Outcome::Evaluated(Value::String("hi".into()))
        );
    }

    #[test]
    fn continuation() {
        assert!(is_submission_complete("1 + 2"));
        assert!(!is_submission_complete("while a < 3"));
        assert!(!is_submission_complete("if a < 3 if b"));
        assert!(!is_submission_complete("(1 + 2"));
        assert!(!is_submission_complete("\"open"));
        assert!(is_submission_complete("while a < 3 a = a + 1 end"));
        // Balanced but malformed text is handed over and reported.
        assert!(is_submission_complete("1 + + 2"));
        assert!(is_submission_complete("end"));

        let open = format!("{}1{}", "if true ".repeat(32), " end".repeat(31));
        assert!(!is_submission_complete(&open));
        assert!(is_submission_complete(&format!("{} end", open)));
    }

    #[test]
    fn renders_each_diagnostic() {
        let text = "true + 1";
        let diagnostics = vec![
            Diagnostic::new(0, 4, "first"),
            Diagnostic::new(7, 1, "second"),
        ];
        assert_eq!(
            render_diagnostics(text, &diagnostics),
            "error: first\n    true + 1\n    ^^^^\nerror: second\n    true + 1\n           ^\n"
        );
    }
}
