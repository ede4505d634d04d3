pub mod error;
mod structural;

pub use error::{ParseError, ParseErrorKind};

use crate::document::Document;

/// Reads questmark markdown into a [`Document`].
pub struct Parser {
    source: String,
    file_id: usize,
}

impl Parser {
    pub fn new(source: String, file_id: usize) -> Self {
        Parser { source, file_id }
    }

    /// Every error in the source is reported; a partial document never is.
    pub fn parse(&self) -> Result<Document, Vec<ParseError>> {
        structural::parse_document(&self.source, self.file_id)
    }
}
