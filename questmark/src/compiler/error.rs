use std::ops::Range;

use codespan_reporting::diagnostic::{Diagnostic, Label};

use crate::program::ProgramError;
use crate::tokenizer::LexError;

/// A fatal compilation failure. No program is produced.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    #[error("cannot compile code fragment: {source}")]
    Lex {
        source: LexError,
        /// Span of the whole fragment in the document.
        span: Range<usize>,
    },

    #[error("option precondition must be inline code")]
    NonCodePrecondition { span: Range<usize> },

    #[error("invalid options section: {message}")]
    InvalidConfig { message: String },

    #[error("label `{label}` is defined more than once")]
    DuplicateLabel {
        label: String,
        span: Option<Range<usize>>,
    },

    #[error("`{label}` does not name a state or label")]
    UndefinedLabel {
        label: String,
        span: Option<Range<usize>>,
    },

    #[error(transparent)]
    Program(#[from] ProgramError),
}

impl CompileError {
    pub fn span(&self) -> Option<&Range<usize>> {
        match self {
            CompileError::Lex { span, .. } | CompileError::NonCodePrecondition { span } => Some(span),
            CompileError::DuplicateLabel { span, .. } | CompileError::UndefinedLabel { span, .. } => {
                span.as_ref()
            }
            CompileError::InvalidConfig { .. } | CompileError::Program(_) => None,
        }
    }

    pub fn to_diagnostic(&self, file_id: usize) -> Diagnostic<usize> {
        let mut diagnostic = Diagnostic::error().with_message(self.to_string());
        if let Some(span) = self.span() {
            diagnostic = diagnostic.with_labels(vec![Label::primary(file_id, span.clone())]);
        }
        match self {
            CompileError::Lex { source, .. } => {
                let inner = source.span();
                diagnostic.with_notes(vec![format!(
                    "at bytes {}..{} of the fragment",
                    inner.start, inner.end
                )])
            }
            CompileError::NonCodePrecondition { .. } => diagnostic.with_notes(vec![
                "only `inline code` may appear before the option's text".to_string(),
            ]),
            _ => diagnostic,
        }
    }
}

/// A non-fatal finding reported next to the compiled program.
#[derive(Debug, Clone, PartialEq)]
pub struct Warning {
    pub message: String,
    pub span: Option<Range<usize>>,
}

impl Warning {
    pub fn new(message: impl Into<String>, span: Option<Range<usize>>) -> Self {
        Warning {
            message: message.into(),
            span,
        }
    }

    pub fn to_diagnostic(&self, file_id: usize) -> Diagnostic<usize> {
        let diagnostic = Diagnostic::warning().with_message(&self.message);
        match &self.span {
            Some(span) => diagnostic.with_labels(vec![Label::primary(file_id, span.clone())]),
            None => diagnostic,
        }
    }
}
