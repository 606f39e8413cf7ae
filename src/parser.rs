//! Recursive-descent parser producing the program AST.
//!
//! Statements are dispatched on up to three tokens of lookahead, mirroring
//! the scanner's keyword set; expressions descend through a single
//! precedence-climbing routine so associativity and binding strength live
//! in one place. The parser never recovers – the first error is returned
//! and compilation stops.

use tracing::debug;

use crate::error::{
  CompileResult, ExpectedCloseCurlySnafu, ExpectedCloseParenthesisSnafu, ExpectedEndOfLineSnafu,
  ExpectedExpressionSnafu, ExpectedIntegerLiteralSnafu, ExpectedOpenCurlySnafu,
  ExpectedOpenParenthesisSnafu, ExpectedScopeSnafu, InvalidProgramSnafu, Location,
  UnknownOperatorSnafu,
};
use crate::tokenizer::{Token, TokenType};

/// Binary operators recognised by the language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
  Add,
  Sub,
  Mul,
  Div,
}

impl BinOp {
  /// Binding strength for precedence climbing; higher binds tighter. Tokens
  /// without an entry cannot continue an expression.
  pub fn precedence(ty: TokenType) -> Option<u8> {
    match ty {
      TokenType::Plus | TokenType::Minus => Some(1),
      TokenType::Star | TokenType::ForwardSlash => Some(2),
      _ => None,
    }
  }

  fn from_token(token: &Token) -> CompileResult<Self> {
    match token.ty {
      TokenType::Plus => Ok(BinOp::Add),
      TokenType::Minus => Ok(BinOp::Sub),
      TokenType::Star => Ok(BinOp::Mul),
      TokenType::ForwardSlash => Ok(BinOp::Div),
      _ => UnknownOperatorSnafu {
        location: token.location(),
      }
      .fail(),
    }
  }
}

/// Leaf of the expression grammar.
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
  IntLit(Token),
  Ident(Token),
  Paren(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
  Term(Term),
  Binary {
    op: BinOp,
    left: Box<Expr>,
    right: Box<Expr>,
  },
}

/// Body of a `print` statement: a single expression or a string literal.
#[derive(Debug, Clone, PartialEq)]
pub enum PrintArg {
  Expr(Expr),
  String(Token),
}

/// Brace-delimited statement list.
#[derive(Debug, Clone, PartialEq)]
pub struct Scope {
  pub stmts: Vec<Stmt>,
}

/// One `cond { ... }` arm of an if-chain.
#[derive(Debug, Clone, PartialEq)]
pub struct IfBranch {
  pub cond: Expr,
  pub scope: Scope,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
  Exit(Expr),
  Print(PrintArg),
  Let {
    ident: Token,
    expr: Expr,
    is_mutable: bool,
  },
  Assign {
    ident: Token,
    expr: Expr,
  },
  Scope(Scope),
  If {
    branch: IfBranch,
    elifs: Vec<IfBranch>,
    else_scope: Option<Scope>,
  },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prog {
  pub stmts: Vec<Stmt>,
}

/// Parse the token stream into a program.
pub fn parse(tokens: Vec<Token>) -> CompileResult<Prog> {
  let mut parser = Parser::new(tokens);
  let mut stmts = Vec::new();
  while parser.peek(0).is_some() {
    stmts.push(parser.parse_stmt()?);
  }

  debug!(statements = stmts.len(), "parsing complete");
  Ok(Prog { stmts })
}

/// Lightweight cursor over the token vector.
struct Parser {
  tokens: Vec<Token>,
  index: usize,
}

impl Parser {
  fn new(tokens: Vec<Token>) -> Self {
    Self { tokens, index: 0 }
  }

  // ----- Statement parsing -----

  /// Dispatch on the next statement. Arms are tried in order and guard on
  /// lookahead only, so a head that matches no arm falls through to a single
  /// `InvalidProgram` diagnostic.
  fn parse_stmt(&mut self) -> CompileResult<Stmt> {
    // exit ( expr ) ;
    if self.peek_is(0, TokenType::Exit) && self.peek_is(1, TokenType::OpenParen) {
      self.consume();
      self.consume();
      let Some(expr) = self.parse_expr(0)? else {
        return ExpectedIntegerLiteralSnafu {
          location: self.location(),
        }
        .fail();
      };
      self.expect_close_paren()?;
      self.expect_end_of_line()?;
      return Ok(Stmt::Exit(expr));
    }

    // print ( expr | string ) ;
    if self.peek_is(0, TokenType::Print) && self.peek_is(1, TokenType::OpenParen) {
      self.consume();
      self.consume();
      let arg = if let Some(string) = self.try_consume(TokenType::StringLit) {
        PrintArg::String(string)
      } else {
        let Some(expr) = self.parse_expr(0)? else {
          return ExpectedExpressionSnafu {
            location: self.location(),
          }
          .fail();
        };
        PrintArg::Expr(expr)
      };
      self.expect_close_paren()?;
      self.expect_end_of_line()?;
      return Ok(Stmt::Print(arg));
    }

    // let [mut] ident = expr ;
    if self.peek_is(0, TokenType::Let) && self.let_shape_ahead() {
      self.consume();
      let is_mutable = self.try_consume(TokenType::Mut).is_some();
      let Some(ident) = self.try_consume(TokenType::Ident) else {
        return InvalidProgramSnafu {
          location: self.location(),
        }
        .fail();
      };
      self.consume(); // `=`, guaranteed by the lookahead guard
      let Some(expr) = self.parse_expr(0)? else {
        return ExpectedExpressionSnafu {
          location: self.location(),
        }
        .fail();
      };
      self.expect_end_of_line()?;
      return Ok(Stmt::Let {
        ident,
        expr,
        is_mutable,
      });
    }

    // ident = expr ;
    if self.peek_is(0, TokenType::Ident) && self.peek_is(1, TokenType::Eq) {
      let Some(ident) = self.try_consume(TokenType::Ident) else {
        return InvalidProgramSnafu {
          location: self.location(),
        }
        .fail();
      };
      self.consume(); // `=`
      let Some(expr) = self.parse_expr(0)? else {
        return ExpectedExpressionSnafu {
          location: self.location(),
        }
        .fail();
      };
      self.expect_end_of_line()?;
      return Ok(Stmt::Assign { ident, expr });
    }

    // { ... }
    if self.peek_is(0, TokenType::OpenCurly) {
      return Ok(Stmt::Scope(self.parse_scope()?));
    }

    // if ( expr ) { ... } elif ... else ...
    if self.peek_is(0, TokenType::If) && self.peek_is(1, TokenType::OpenParen) {
      return self.parse_if();
    }

    InvalidProgramSnafu {
      location: self.location(),
    }
    .fail()
  }

  /// `let` may be followed by `mut ident =` or directly by `ident =`.
  fn let_shape_ahead(&self) -> bool {
    if self.peek_is(1, TokenType::Mut) {
      self.peek_is(2, TokenType::Ident) && self.peek_is(3, TokenType::Eq)
    } else {
      self.peek_is(1, TokenType::Ident) && self.peek_is(2, TokenType::Eq)
    }
  }

  fn parse_scope(&mut self) -> CompileResult<Scope> {
    if self.try_consume(TokenType::OpenCurly).is_none() {
      return ExpectedOpenCurlySnafu {
        location: self.location(),
      }
      .fail();
    }

    let mut stmts = Vec::new();
    while let Some(token) = self.peek(0) {
      if token.ty == TokenType::CloseCurly {
        break;
      }
      stmts.push(self.parse_stmt()?);
    }

    if self.try_consume(TokenType::CloseCurly).is_none() {
      return ExpectedCloseCurlySnafu {
        location: self.location(),
      }
      .fail();
    }
    Ok(Scope { stmts })
  }

  fn parse_if(&mut self) -> CompileResult<Stmt> {
    self.consume(); // `if`
    self.consume(); // `(`, guaranteed by the dispatch guard
    let branch = self.parse_branch()?;

    let mut elifs = Vec::new();
    while self.try_consume(TokenType::Elif).is_some() {
      if self.try_consume(TokenType::OpenParen).is_none() {
        return ExpectedOpenParenthesisSnafu {
          location: self.location(),
        }
        .fail();
      }
      elifs.push(self.parse_branch()?);
    }

    let else_scope = if self.try_consume(TokenType::Else).is_some() {
      if !self.peek_is(0, TokenType::OpenCurly) {
        return ExpectedScopeSnafu {
          location: self.location(),
        }
        .fail();
      }
      Some(self.parse_scope()?)
    } else {
      None
    };

    Ok(Stmt::If {
      branch,
      elifs,
      else_scope,
    })
  }

  /// Parse `cond ) { ... }`, shared by `if` and `elif`; the opening
  /// parenthesis has already been consumed.
  fn parse_branch(&mut self) -> CompileResult<IfBranch> {
    let Some(cond) = self.parse_expr(0)? else {
      return ExpectedExpressionSnafu {
        location: self.location(),
      }
      .fail();
    };
    self.expect_close_paren()?;
    if !self.peek_is(0, TokenType::OpenCurly) {
      return ExpectedScopeSnafu {
        location: self.location(),
      }
      .fail();
    }
    let scope = self.parse_scope()?;
    Ok(IfBranch { cond, scope })
  }

  // ----- Expression parsing -----

  /// Precedence climbing: fold operators of at least `min_prec` into the
  /// left-hand side. The `prec + 1` on the recursive call makes every
  /// operator left-associative.
  fn parse_expr(&mut self, min_prec: u8) -> CompileResult<Option<Expr>> {
    let Some(term) = self.parse_term()? else {
      return Ok(None);
    };
    let mut lhs = Expr::Term(term);

    loop {
      let Some(prec) = self.peek(0).and_then(|t| BinOp::precedence(t.ty)) else {
        break;
      };
      if prec < min_prec {
        break;
      }
      let Some(op_token) = self.consume() else {
        break;
      };
      let op = BinOp::from_token(&op_token)?;

      let Some(rhs) = self.parse_expr(prec + 1)? else {
        return ExpectedExpressionSnafu {
          location: self.location(),
        }
        .fail();
      };
      lhs = Expr::Binary {
        op,
        left: Box::new(lhs),
        right: Box::new(rhs),
      };
    }

    Ok(Some(lhs))
  }

  /// A term is an integer literal, an identifier or a parenthesised
  /// expression. Returns `None` when the next token cannot start one, so
  /// callers choose the diagnostic.
  fn parse_term(&mut self) -> CompileResult<Option<Term>> {
    if let Some(int_lit) = self.try_consume(TokenType::IntLit) {
      return Ok(Some(Term::IntLit(int_lit)));
    }
    if let Some(ident) = self.try_consume(TokenType::Ident) {
      return Ok(Some(Term::Ident(ident)));
    }
    if self.try_consume(TokenType::OpenParen).is_some() {
      let Some(inner) = self.parse_expr(0)? else {
        return ExpectedExpressionSnafu {
          location: self.location(),
        }
        .fail();
      };
      self.expect_close_paren()?;
      return Ok(Some(Term::Paren(Box::new(inner))));
    }
    Ok(None)
  }

  // ----- Cursor helpers -----

  fn peek(&self, offset: usize) -> Option<&Token> {
    self.tokens.get(self.index + offset)
  }

  fn peek_is(&self, offset: usize, ty: TokenType) -> bool {
    self.peek(offset).is_some_and(|token| token.ty == ty)
  }

  fn consume(&mut self) -> Option<Token> {
    let token = self.tokens.get(self.index).cloned();
    if token.is_some() {
      self.index += 1;
    }
    token
  }

  /// Consume the current token only when it has the expected type.
  fn try_consume(&mut self, ty: TokenType) -> Option<Token> {
    if self.peek_is(0, ty) { self.consume() } else { None }
  }

  fn expect_close_paren(&mut self) -> CompileResult<()> {
    if self.try_consume(TokenType::CloseParen).is_none() {
      return ExpectedCloseParenthesisSnafu {
        location: self.location(),
      }
      .fail();
    }
    Ok(())
  }

  fn expect_end_of_line(&mut self) -> CompileResult<()> {
    if self.try_consume(TokenType::EndOfLine).is_none() {
      return ExpectedEndOfLineSnafu {
        location: self.location(),
      }
      .fail();
    }
    Ok(())
  }

  /// Position of the current token, falling back to the last token at end
  /// of input so diagnostics still point somewhere useful.
  fn location(&self) -> Location {
    self
      .peek(0)
      .or_else(|| self.tokens.last())
      .map(Token::location)
      .unwrap_or_default()
  }
}
