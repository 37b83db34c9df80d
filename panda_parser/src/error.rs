use remain::sorted;
use thiserror::Error;

/// Position within a startup database file, threaded through every AST
/// node so a validation failure discovered long after parsing (e.g. an
/// unassigned register) can still point at its origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

#[sorted]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("{0}:{1:?}: duplicate name {2:?}")]
    DuplicateName(String, Position, String),
    #[error("{0}:{1:?}: {2}")]
    Malformed(String, Position, String),
    #[error("{0}:{1:?}: indent too deep (max {2})")]
    TooDeep(String, Position, usize),
    #[error("{0}:{1:?}: {2}")]
    TypeError(String, Position, String),
    #[error("{0}:{1:?}: unassigned register for {2:?}")]
    UnassignedRegister(String, Position, String),
    #[error("{0}:{1:?}: unknown class {2:?}")]
    UnknownClass(String, Position, String),
    #[error("{0}:{1:?}: unexpected indent")]
    WrongIndent(String, Position),
}

impl ParseError {
    pub fn malformed(file: &str, pos: Position, what: impl Into<String>) -> ParseError {
        ParseError::Malformed(file.to_string(), pos, what.into())
    }
}

pub type Result<T> = std::result::Result<T, ParseError>;
