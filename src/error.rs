use crate::OpCode;
use std::fmt;
use thiserror::Error;

/// A syntax error. The first one aborts compilation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("[line {line}] Error{location}: {message}")]
pub struct CompileError {
    pub line: usize,
    /// ` at 'lexeme'`, ` at end`, or empty for lexical errors.
    pub location: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeErrorKind {
    #[error("Operand must be a number.")]
    OperandMustBeNumber,
    #[error("Operands must be numbers.")]
    OperandsMustBeNumbers,
    #[error("Operands must be two numbers or two strings.")]
    OperandsMustBeNumbersOrStrings,
    #[error("Undefined variable '{0}'.")]
    UndefinedVariable(String),
    #[error("Expected {expected} arguments but got {got}.")]
    ArityMismatch { expected: usize, got: usize },
    #[error("Can only call functions.")]
    NotCallable,
    #[error("Stack overflow.")]
    StackOverflow,
    #[error("Stack underflow.")]
    StackUnderflow,
    #[error("Call depth exceeded {0} frames.")]
    FrameOverflow(usize),
    #[error("Instruction limit of {0} exceeded.")]
    InstructionLimitExceeded(u64),
    #[error("Unknown opcode {0}.")]
    InvalidOpcode(u8),
    #[error("Constant {0} is out of range.")]
    ConstantOutOfRange(usize),
    #[error("Constant {0} is not a variable name.")]
    ExpectedName(usize),
    #[error("Reached the end of the chunk without returning.")]
    UnexpectedEndOfChunk,
    #[error("Virtual machine must be reset before it can run again.")]
    NotReady,
}

/// A fault raised while dispatching, with the location it happened at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeError {
    pub kind: RuntimeErrorKind,
    pub opcode: Option<OpCode>,
    pub line: usize,
    /// Innermost frame first.
    pub trace: Vec<String>,
}

impl RuntimeError {
    pub fn new(kind: RuntimeErrorKind) -> Self {
        Self {
            kind,
            opcode: None,
            line: 0,
            trace: Vec::new(),
        }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        for frame in self.trace.iter() {
            write!(f, "\n{}", frame)?;
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}
