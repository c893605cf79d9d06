mod chunk;
mod compiler;
pub mod debug;
mod error;
mod function;
mod lexer;
mod value;
mod vm;

pub use self::{
    chunk::*,
    compiler::{compile, Compiler, Precedence},
    error::*,
    function::*,
    lexer::*,
    value::*,
    vm::*,
};

/// Compiles and runs `source` on a fresh virtual machine.
pub fn interpret(source: &str) -> Interpretation {
    VirtualMachine::default().interpret(source)
}
