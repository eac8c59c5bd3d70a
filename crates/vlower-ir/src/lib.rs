//! Intermediate representation for vlower
//!
//! Programs are arenas of declarations ([`Program`]) whose bodies are small
//! expression trees. The lowering passes in `vlower-transform` rewrite this
//! representation in place; [`interp::Interpreter`] can execute it before
//! and after lowering.

pub mod builder;
pub mod dump;
pub mod interp;
pub mod ir;
pub mod program;

pub use builder::{ClassHandle, ProgramBuilder};
pub use dump::dump_program;
pub use interp::{InterpError, Interpreter, Value};
pub use ir::*;
pub use program::{IrError, Program, ProgramData, TypeContext};
