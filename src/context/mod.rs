//! Component F: the execution context — a symbolic interpreter that drives
//! the register allocator ([`crate::regalloc`]), the value model
//! ([`crate::value`]) and the output buffer ([`crate::output`]) over one
//! method's decoded SBIL body (`spec.md` §4.F).

mod call;
mod device;
mod engine;

pub use engine::{Compilation, ExecutionContext};
