use std::ops::Range;

use codespan_reporting::diagnostic::{Diagnostic, Label};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseErrorKind {
    #[error("options section entries must be JSON objects")]
    NotAnObject,
    #[error("options section contains invalid JSON")]
    InvalidJson { detail: String },
}

/// A problem in the markdown source, located by byte span.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind} (at {}..{})", .span.start, .span.end)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub span: Range<usize>,
    pub file_id: usize,
}

impl ParseError {
    pub(crate) fn new(kind: ParseErrorKind, span: Range<usize>, file_id: usize) -> Self {
        ParseError {
            kind,
            span,
            file_id,
        }
    }

    pub(crate) fn invalid_json(err: &serde_json::Error, span: Range<usize>, file_id: usize) -> Self {
        let detail = err.to_string();
        Self::new(ParseErrorKind::InvalidJson { detail }, span, file_id)
    }

    pub fn to_diagnostic(&self) -> Diagnostic<usize> {
        let label = Label::primary(self.file_id, self.span.clone());
        let diagnostic = Diagnostic::error().with_message(self.kind.to_string());
        match &self.kind {
            ParseErrorKind::NotAnObject => diagnostic
                .with_labels(vec![label.with_message("expected `{ ... }`")])
                .with_notes(vec!["each code span or fence here is merged as one JSON object".into()]),
            ParseErrorKind::InvalidJson { detail } => diagnostic
                .with_labels(vec![label])
                .with_notes(vec![detail.clone()]),
        }
    }
}
