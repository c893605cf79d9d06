use crate::Function;
use std::fmt::{self, Display, Formatter};
use std::rc::Rc;

/// A runtime value. Numbers, booleans and nil are copied; objects are shared.
#[derive(Debug, Clone, Default)]
pub enum Value {
    Number(f64),
    Boolean(bool),
    #[default]
    Nil,
    Object(Object),
}

#[derive(Debug, Clone)]
pub enum Object {
    String(Rc<str>),
    Function(Rc<Function>),
}

impl Value {
    pub fn string(value: &str) -> Self {
        Value::Object(Object::String(Rc::from(value)))
    }

    pub fn function(function: Rc<Function>) -> Self {
        Value::Object(Object::Function(function))
    }

    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Boolean(false))
    }

    pub fn as_function(&self) -> Option<&Rc<Function>> {
        match self {
            Value::Object(Object::Function(function)) => Some(function),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Number(left), Value::Number(right)) => left == right,
            (Value::Boolean(left), Value::Boolean(right)) => left == right,
            (Value::Nil, Value::Nil) => true,
            (Value::Object(left), Value::Object(right)) => left == right,
            _ => false,
        }
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Object::String(left), Object::String(right)) => left == right,
            (Object::Function(left), Object::Function(right)) => Rc::ptr_eq(left, right),
            _ => false,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Value::Number(value) => write!(f, "{}", value),
            Value::Boolean(value) => write!(f, "{}", value),
            Value::Nil => write!(f, "nil"),
            Value::Object(object) => write!(f, "{}", object),
        }
    }
}

impl Display for Object {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Object::String(value) => write!(f, "{}", value),
            Object::Function(function) => write!(f, "{}", function),
        }
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Number(value as f64)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::string(value)
    }
}
