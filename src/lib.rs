//! Crate root: wires together the compilation pipeline.
//!
//! The stages are intentionally small and composable so they can be evolved
//! independently:
//! - `tokenizer` performs lexical analysis and produces a flat token stream.
//! - `parser` owns all syntactic knowledge and returns the program AST.
//! - `codegen` lowers the program to NASM x86-64 assembly for Linux.
//! - `config` holds the compile-time limits the stages read.
//! - `error` centralises the diagnostic taxonomy shared by all stages.

pub mod config;
pub mod error;
pub mod parser;
pub mod tokenizer;

mod codegen;

pub use error::{CompileError, CompileResult};

/// Compile a source string into NASM x86-64 assembly.
pub fn generate_assembly(source: &str) -> CompileResult<String> {
  let tokens = tokenizer::tokenize(source)?;
  let prog = parser::parse(tokens)?;
  codegen::generate(&prog)
}
