use std::ops::Range;

use ecow::EcoString;

use crate::ast::SyntaxNode;

/// A semantic problem found while transforming a submission. The span is
/// always a trimmed span of the source text.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Diagnostic {
    pub start: usize,
    pub length: usize,
    pub message: EcoString,
}

impl Diagnostic {
    pub fn new(start: usize, length: usize, message: impl Into<EcoString>) -> Self {
        Diagnostic {
            start,
            length,
            message: message.into(),
        }
    }

    pub fn at(node: &impl SyntaxNode, message: impl Into<EcoString>) -> Self {
        Diagnostic::new(node.start(), node.length(), message)
    }

    pub fn span(&self) -> Range<usize> {
        self.start..self.start + self.length
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at {}..{}", self.message, self.start, self.start + self.length)
    }
}

impl From<&Diagnostic> for miette::SourceSpan {
    fn from(diagnostic: &Diagnostic) -> Self {
        (diagnostic.start, diagnostic.length).into()
    }
}
