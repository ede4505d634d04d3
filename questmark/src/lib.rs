pub mod compiler;
pub mod document;
pub mod instruction;
pub mod parser;
pub mod program;
pub mod tokenizer;

use codespan_reporting::diagnostic::Diagnostic;

pub use compiler::{compile, CompileError, Compiled, Warning};
pub use document::Document;
pub use instruction::Instruction;
pub use parser::{ParseError, Parser};
pub use program::{LabelMap, Program, ProgramError};

/// Why a source document produced no program.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("document failed to parse ({} error(s))", .0.len())]
    Parse(Vec<ParseError>),
    #[error(transparent)]
    Compile(#[from] CompileError),
}

impl SourceError {
    pub fn to_diagnostics(&self, file_id: usize) -> Vec<Diagnostic<usize>> {
        match self {
            SourceError::Parse(errors) => errors.iter().map(ParseError::to_diagnostic).collect(),
            SourceError::Compile(err) => vec![err.to_diagnostic(file_id)],
        }
    }
}

/// Parse and compile markdown source in one step.
pub fn compile_source(source: &str, file_id: usize) -> Result<Compiled, SourceError> {
    let document = Parser::new(source.to_string(), file_id)
        .parse()
        .map_err(SourceError::Parse)?;
    Ok(compile(&document)?)
}
