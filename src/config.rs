//! Compile-time limits and paths read by the rest of the pipeline.

/// Longest string literal the scanner accepts, in bytes.
pub const MAX_STRING_SIZE: usize = 1024;

/// Size of the generated program's stdout staging buffer, in bytes. Must
/// exceed `MAX_STRING_SIZE` plus the emitted terminator so a freshly flushed
/// buffer always has room for a full literal.
pub const PRINT_BUFFER_SIZE: usize = 4096;

/// Where the driver writes the generated assembly.
pub const OUTPUT_PATH: &str = "_test/test.asm";
