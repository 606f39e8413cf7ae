//! Lexical analysis: turns the raw input string into a vector of tokens.
//!
//! The scanner is byte-oriented and greedy – at every position it commits to
//! the longest token that can start there. It knows nothing about grammar;
//! keywords are just identifiers that match a fixed table. Every token
//! records the line and column of its first byte so later stages can point
//! diagnostics at the right place.

use snafu::ensure;
use tracing::{debug, trace};

use crate::config::MAX_STRING_SIZE;
use crate::error::{CompileResult, Location, StringTooLongSnafu, UnidentifiedTokenSnafu};

/// Kinds of tokens recognised by the front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
  Exit,
  Print,
  Let,
  Mut,
  If,
  Elif,
  Else,
  Ident,
  IntLit,
  StringLit,
  OpenParen,
  CloseParen,
  Eq,
  Plus,
  Minus,
  Star,
  ForwardSlash,
  OpenCurly,
  CloseCurly,
  EndOfLine,
}

/// Thin wrapper for lexical information needed by later stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
  pub ty: TokenType,
  pub value: String,
  pub line: usize,
  pub column: usize,
}

impl Token {
  /// Convenience constructor to keep the scan loop readable.
  pub fn new(ty: TokenType, value: impl Into<String>, line: usize, column: usize) -> Self {
    Self {
      ty,
      value: value.into(),
      line,
      column,
    }
  }

  /// Position of the token's first byte, for diagnostics.
  pub fn location(&self) -> Location {
    Location::new(self.line, self.column)
  }
}

/// Lex the input into a flat vector of tokens.
pub fn tokenize(input: &str) -> CompileResult<Vec<Token>> {
  Scanner::new(input).run()
}

/// Cursor over the source bytes. Lines are 1-based, columns 0-based and
/// reset on every newline the scanner handles explicitly.
struct Scanner<'a> {
  bytes: &'a [u8],
  index: usize,
  line: usize,
  column: usize,
}

impl<'a> Scanner<'a> {
  fn new(input: &'a str) -> Self {
    Self {
      bytes: input.as_bytes(),
      index: 0,
      line: 1,
      column: 0,
    }
  }

  fn run(mut self) -> CompileResult<Vec<Token>> {
    let mut tokens = Vec::new();

    while let Some(c) = self.peek(0) {
      let line = self.line;
      let column = self.column;

      // New line
      if c == b'\n' {
        self.consume();
        self.handle_new_line();
        continue;
      }

      // Skip whitespace
      if c.is_ascii_whitespace() {
        self.consume();
        continue;
      }

      // Comments
      if c == b'/' && self.peek(1) == Some(b'/') {
        self.consume();
        self.consume();
        while let Some(b) = self.peek(0) {
          if b == b'\n' {
            break;
          }
          self.consume();
        }
        continue;
      }
      if c == b'/' && self.peek(1) == Some(b'*') {
        self.consume();
        self.consume();
        while let Some(b) = self.peek(0) {
          if b == b'*' && self.peek(1) == Some(b'/') {
            self.consume();
            self.consume();
            break;
          }
          self.consume();
          if b == b'\n' {
            self.handle_new_line();
          }
        }
        continue;
      }

      // Identifiers and keywords
      if c.is_ascii_alphabetic() {
        let mut buff = String::new();
        buff.push(self.consume() as char);
        while let Some(b) = self.peek(0) {
          if !b.is_ascii_alphanumeric() {
            break;
          }
          buff.push(self.consume() as char);
        }

        let ty = match buff.as_str() {
          "exit" => TokenType::Exit,
          "print" => TokenType::Print,
          "let" => TokenType::Let,
          "mut" => TokenType::Mut,
          "if" => TokenType::If,
          "elif" => TokenType::Elif,
          "else" => TokenType::Else,
          _ => TokenType::Ident,
        };
        tokens.push(Token::new(ty, buff, line, column));
        continue;
      }

      // Integer literals; a leading '-' folds into the literal only when the
      // very next byte is a digit.
      if c.is_ascii_digit() || (c == b'-' && self.peek(1).is_some_and(|b| b.is_ascii_digit())) {
        let mut buff = String::new();
        buff.push(self.consume() as char);
        while let Some(b) = self.peek(0) {
          // A '_' flanked by digits is a separator and is dropped.
          if b == b'_' && self.peek(1).is_some_and(|n| n.is_ascii_digit()) {
            self.consume();
            continue;
          }
          if !b.is_ascii_digit() {
            break;
          }
          buff.push(self.consume() as char);
        }
        tokens.push(Token::new(TokenType::IntLit, buff, line, column));
        continue;
      }

      // String literals
      if c == b'"' {
        self.consume();
        let mut buff: Vec<u8> = Vec::new();
        while let Some(b) = self.peek(0) {
          if b == b'"' {
            break;
          }
          if b == b'\\' && self.peek(1).is_some() {
            self.consume();
            // `\n` is the only substituting escape; for anything else the
            // backslash is dropped and the next byte rescanned.
            if self.peek(0) == Some(b'n') {
              self.consume();
              buff.push(b'\n');
            }
            continue;
          }
          buff.push(self.consume());
        }
        ensure!(
          self.peek(0).is_some(),
          UnidentifiedTokenSnafu {
            location: Location::new(line, column),
          }
        );
        self.consume();
        ensure!(
          buff.len() <= MAX_STRING_SIZE,
          StringTooLongSnafu {
            location: Location::new(line, column),
          }
        );
        let value = String::from_utf8_lossy(&buff).into_owned();
        tokens.push(Token::new(TokenType::StringLit, value, line, column));
        continue;
      }

      // Single-byte operators, braces and the statement terminator
      let ty = match c {
        b'(' => Some(TokenType::OpenParen),
        b')' => Some(TokenType::CloseParen),
        b'=' => Some(TokenType::Eq),
        b'+' => Some(TokenType::Plus),
        b'-' => Some(TokenType::Minus),
        b'*' => Some(TokenType::Star),
        b'/' => Some(TokenType::ForwardSlash),
        b'{' => Some(TokenType::OpenCurly),
        b'}' => Some(TokenType::CloseCurly),
        b';' => Some(TokenType::EndOfLine),
        _ => None,
      };
      if let Some(ty) = ty {
        self.consume();
        tokens.push(Token::new(ty, (c as char).to_string(), line, column));
        continue;
      }

      // No token starts with this byte.
      return UnidentifiedTokenSnafu {
        location: Location::new(line, column),
      }
      .fail();
    }

    for token in &tokens {
      trace!(?token, "scanned");
    }
    debug!(
      tokens = tokens.len(),
      lines = self.line,
      "tokenisation complete"
    );

    Ok(tokens)
  }

  fn peek(&self, offset: usize) -> Option<u8> {
    self.bytes.get(self.index + offset).copied()
  }

  /// Advance one byte. Only called after a successful `peek`.
  fn consume(&mut self) -> u8 {
    let b = self.bytes[self.index];
    self.index += 1;
    self.column += 1;
    b
  }

  fn handle_new_line(&mut self) {
    self.line += 1;
    self.column = 0;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::CompileError;

  fn kinds(source: &str) -> Vec<TokenType> {
    tokenize(source)
      .unwrap()
      .into_iter()
      .map(|t| t.ty)
      .collect()
  }

  #[test]
  fn scans_exit_statement() {
    assert_eq!(
      kinds("exit(42);"),
      vec![
        TokenType::Exit,
        TokenType::OpenParen,
        TokenType::IntLit,
        TokenType::CloseParen,
        TokenType::EndOfLine,
      ]
    );
  }

  #[test]
  fn keywords_and_identifiers_are_distinguished() {
    let tokens = tokenize("let mut abc = exits;").unwrap();
    assert_eq!(tokens[0].ty, TokenType::Let);
    assert_eq!(tokens[1].ty, TokenType::Mut);
    assert_eq!(tokens[2].ty, TokenType::Ident);
    assert_eq!(tokens[2].value, "abc");
    // A keyword prefix does not make an identifier a keyword.
    assert_eq!(tokens[4].ty, TokenType::Ident);
    assert_eq!(tokens[4].value, "exits");
  }

  #[test]
  fn positions_point_at_first_byte() {
    let tokens = tokenize("let x = 5;\n  exit(x);").unwrap();
    let let_tok = &tokens[0];
    assert_eq!((let_tok.line, let_tok.column), (1, 0));
    let x_tok = &tokens[1];
    assert_eq!((x_tok.line, x_tok.column), (1, 4));
    let exit_tok = &tokens[5];
    assert_eq!((exit_tok.line, exit_tok.column), (2, 2));
  }

  #[test]
  fn line_comments_are_skipped() {
    assert_eq!(
      kinds("// nothing here\nexit(0);"),
      vec![
        TokenType::Exit,
        TokenType::OpenParen,
        TokenType::IntLit,
        TokenType::CloseParen,
        TokenType::EndOfLine,
      ]
    );
  }

  #[test]
  fn block_comments_count_their_newlines() {
    let tokens = tokenize("/* a\n b\n c */ exit(0);").unwrap();
    assert_eq!(tokens[0].ty, TokenType::Exit);
    assert_eq!(tokens[0].line, 3);
  }

  #[test]
  fn underscores_between_digits_are_dropped() {
    let tokens = tokenize("exit(1_000_000);").unwrap();
    assert_eq!(tokens[2].ty, TokenType::IntLit);
    assert_eq!(tokens[2].value, "1000000");
  }

  #[test]
  fn trailing_underscore_is_not_part_of_the_literal() {
    // `1_;` scans as the literal `1` and then chokes on the dangling `_`.
    let err = tokenize("exit(1_);").unwrap_err();
    assert!(matches!(err, CompileError::UnidentifiedToken { .. }));
  }

  #[test]
  fn minus_directly_before_digit_is_a_negative_literal() {
    let tokens = tokenize("exit(-42);").unwrap();
    assert_eq!(tokens[2].ty, TokenType::IntLit);
    assert_eq!(tokens[2].value, "-42");
  }

  #[test]
  fn minus_with_space_is_an_operator() {
    let tokens = tokenize("8 - 4").unwrap();
    assert_eq!(tokens[1].ty, TokenType::Minus);
    assert_eq!(tokens[2].value, "4");
  }

  #[test]
  fn string_newline_escape_substitutes() {
    let tokens = tokenize("print(\"hello\\nworld\");").unwrap();
    assert_eq!(tokens[2].ty, TokenType::StringLit);
    assert_eq!(tokens[2].value, "hello\nworld");
  }

  #[test]
  fn other_escapes_drop_the_backslash() {
    let tokens = tokenize("print(\"a\\tb\");").unwrap();
    assert_eq!(tokens[2].value, "atb");
  }

  #[test]
  fn unterminated_string_is_rejected() {
    let err = tokenize("print(\"oops").unwrap_err();
    assert!(matches!(err, CompileError::UnidentifiedToken { .. }));
  }

  #[test]
  fn overlong_string_is_rejected() {
    let source = format!("print(\"{}\");", "x".repeat(MAX_STRING_SIZE + 1));
    let err = tokenize(&source).unwrap_err();
    assert!(matches!(err, CompileError::StringTooLong { .. }));
  }

  #[test]
  fn unknown_byte_reports_its_position() {
    let err = tokenize("exit(4@2);").unwrap_err();
    match err {
      CompileError::UnidentifiedToken { location } => {
        assert_eq!((location.line, location.column), (1, 6));
      }
      other => panic!("unexpected error: {other}"),
    }
  }

  #[test]
  fn lexemes_reproduce_source_without_trivia() {
    // Holds for the subset whose lexemes round-trip (no strings, no
    // underscore separators).
    let source = "let x = 10; // ten\n{ exit(x + 2); }";
    let stripped: String = "letx=10;{exit(x+2);}".to_string();
    let joined: String = tokenize(source)
      .unwrap()
      .iter()
      .map(|t| t.value.as_str())
      .collect();
    assert_eq!(joined, stripped);
  }
}
