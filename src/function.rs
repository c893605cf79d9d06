use crate::Chunk;
use std::fmt::{self, Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionType {
    Function,
    Script,
}

/// A compiled function body. The implicit top-level program is a `Script`
/// with no name and arity 0.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub function_type: FunctionType,
    pub arity: usize,
    pub name: Option<String>,
    pub chunk: Chunk,
}

impl Function {
    pub fn new(function_type: FunctionType, name: Option<&str>) -> Self {
        Self {
            function_type,
            arity: 0,
            name: name.map(str::to_string),
            chunk: Chunk::new(),
        }
    }

    pub fn script() -> Self {
        Self::new(FunctionType::Script, None)
    }

    pub fn display_name(&self) -> &str {
        match (&self.function_type, &self.name) {
            (FunctionType::Function, Some(name)) => name,
            _ => "script",
        }
    }
}

impl Display for Function {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self.function_type {
            FunctionType::Script => write!(f, "<script>"),
            FunctionType::Function => write!(f, "<fn {}>", self.display_name()),
        }
    }
}
