//! The kernel dialect understood by the reference driver: a small C-like
//! language with `__kernel` entry points, `__global` buffer pointers, scalar
//! parameters, and the NDRange builtins. Source goes through [`lexer`] and
//! [`parser`] at build time; launches walk the tree in [`eval`].

pub mod ast;
pub mod eval;
pub mod lexer;
pub mod parser;

pub use ast::{KernelDef, ProgramAst, ScalarType};
pub use eval::{run_kernel, EvalError, LaunchGrid, ResolvedArg, Value};
pub use parser::{compile, CompileError};
