//! Shared error utilities used across the compilation pipeline.
//!
//! Every failure in any stage is terminal and renders as a single
//! diagnostic line: the message, then an optional `, at line: L` and
//! `, column: C` tail, then a full stop. A zero line or column is simply
//! left out of the message.

use std::fmt;

use snafu::Snafu;

pub type CompileResult<T> = Result<T, CompileError>;

/// Line/column pair attached to most diagnostics.
///
/// Lines are 1-based and columns 0-based, both taken from the first byte of
/// the offending token. Displays as the positional tail of a message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Location {
  pub line: usize,
  pub column: usize,
}

impl Location {
  pub fn new(line: usize, column: usize) -> Self {
    Self { line, column }
  }
}

impl fmt::Display for Location {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.line != 0 {
      write!(f, ", at line: {}", self.line)?;
    }
    if self.column != 0 {
      write!(f, ", column: {}", self.column)?;
    }
    Ok(())
  }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CompileError {
  // Driver errors
  #[snafu(display("Invalid usage."))]
  InvalidUsage,

  #[snafu(display("Error opening file: {path}."))]
  OpenFileError { path: String, source: std::io::Error },

  #[snafu(display("Invalid program{location}."))]
  InvalidProgram { location: Location },

  // Lexical errors
  #[snafu(display("Syntax error: unidentified token{location}."))]
  UnidentifiedToken { location: Location },

  #[snafu(display("Syntax error: string too long{location}."))]
  StringTooLong { location: Location },

  // Syntax errors
  #[snafu(display("Syntax error: expected expression{location}."))]
  ExpectedExpression { location: Location },

  #[snafu(display("Syntax error: expected ({location}."))]
  ExpectedOpenParenthesis { location: Location },

  #[snafu(display("Syntax error: expected ){location}."))]
  ExpectedCloseParenthesis { location: Location },

  #[snafu(display("Syntax error: expected {{{location}."))]
  ExpectedOpenCurly { location: Location },

  #[snafu(display("Syntax error: expected }}{location}."))]
  ExpectedCloseCurly { location: Location },

  #[snafu(display("Syntax error: expected scope{location}."))]
  ExpectedScope { location: Location },

  #[snafu(display("Syntax error: expected integer literal{location}."))]
  ExpectedIntegerLiteral { location: Location },

  #[snafu(display("Syntax error: expected ;{location}."))]
  ExpectedEndOfLine { location: Location },

  #[snafu(display("Syntax error: unknown operator{location}."))]
  UnknownOperator { location: Location },

  // Semantic errors raised during lowering
  #[snafu(display("Variable is not declared: {name}{location}."))]
  VariableNotDeclared { name: String, location: Location },

  #[snafu(display("Variable already declared{location}."))]
  VariableAlreadyDeclared { location: Location },

  #[snafu(display("Variable is not mutable{location}."))]
  VariableNotMutable { location: Location },
}
