//! Parsing capability: source text → structural syntax tree.

pub mod ast;
pub mod python;

use std::cell::RefCell;
use thiserror::Error;

pub use python::PythonParser;

/// Why a file's text could not be turned into a syntax tree.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    /// The text is not valid source (1-indexed line, 0-indexed column).
    #[error("syntax error at line {line}, column {column}")]
    Syntax { line: usize, column: usize },

    /// The bytes are not valid UTF-8.
    #[error("decode error: {0}")]
    Decode(String),

    /// The grammar could not be loaded or produced no tree.
    #[error("parser unavailable: {0}")]
    Grammar(String),
}

/// Anything that can turn source text into an [`ast::Module`].
pub trait SourceParser {
    fn parse(&mut self, text: &str) -> Result<ast::Module, ParseError>;
}

thread_local! {
    static PYTHON_PARSER: RefCell<Option<PythonParser>> = const { RefCell::new(None) };
}

/// Run `f` with this thread's Python parser, creating it on first use.
///
/// Extraction workers are pooled threads; keeping one parser per thread
/// avoids reloading the grammar for every file.
pub fn with_python_parser<F, R>(f: F) -> Result<R, ParseError>
where
    F: FnOnce(&mut PythonParser) -> R,
{
    PYTHON_PARSER.with(|cell| {
        let mut slot = cell.borrow_mut();
        if slot.is_none() {
            *slot = Some(PythonParser::new()?);
        }
        match slot.as_mut() {
            Some(parser) => Ok(f(parser)),
            None => Err(ParseError::Grammar("parser slot empty".to_string())),
        }
    })
}
