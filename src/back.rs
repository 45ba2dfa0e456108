//! The back-end of the compiler.

pub mod asm;
pub mod codegen;
pub mod peephole;

pub use asm::*;
pub use codegen::generate;
pub use peephole::optimize;
