use crate::{
    compile, Error, Function, Object, OpCode, RuntimeError, RuntimeErrorKind, Value,
};
use std::collections::HashMap;
use std::rc::Rc;
use tracing::{debug, trace};

pub const STACK_SIZE: usize = 2048;
pub const MAX_FRAMES: usize = 64;

type Result<T> = std::result::Result<T, RuntimeErrorKind>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmConfig {
    /// Maximum operand stack depth, in values.
    pub stack_size: usize,
    /// Maximum call depth, including the script frame.
    pub max_frames: usize,
    /// Faults once this many instructions have been dispatched.
    pub instruction_limit: Option<u64>,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            stack_size: STACK_SIZE,
            max_frames: MAX_FRAMES,
            instruction_limit: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpretResult {
    Ok,
    CompileError,
    RuntimeError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    Ready,
    Running,
    HaltedOk,
    HaltedError,
}

/// Outcome of one interpretation: the result, the last opcode dispatched and
/// every value printed before completion or failure.
#[derive(Debug, Clone, PartialEq)]
pub struct Interpretation {
    pub result: InterpretResult,
    pub opcode: Option<OpCode>,
    pub output: Vec<Value>,
    pub error: Option<Error>,
}

#[derive(Debug, Clone)]
pub struct CallFrame {
    pub function: Rc<Function>,
    pub ip: usize,
    /// Stack index of slot 0, which holds the callee.
    pub base: usize,
}

impl CallFrame {
    pub fn new(function: Rc<Function>, base: usize) -> Self {
        Self {
            function,
            ip: 0,
            base,
        }
    }

    fn line(&self) -> usize {
        let chunk = &self.function.chunk;
        chunk
            .lines
            .get(self.ip.saturating_sub(1))
            .copied()
            .unwrap_or_default()
    }
}

pub struct VirtualMachine {
    config: VmConfig,
    stack: Vec<Value>,
    stack_pointer: usize,
    frames: Vec<CallFrame>,
    globals: HashMap<Rc<str>, Value>,
    output: Vec<Value>,
    state: VmState,
    last_opcode: Option<OpCode>,
    instructions_executed: u64,
}

impl Default for VirtualMachine {
    fn default() -> Self {
        Self::new(VmConfig::default())
    }
}

impl VirtualMachine {
    pub fn new(config: VmConfig) -> Self {
        Self {
            stack: Vec::with_capacity(config.stack_size),
            stack_pointer: 0,
            frames: Vec::with_capacity(config.max_frames),
            globals: HashMap::new(),
            output: Vec::new(),
            state: VmState::Ready,
            last_opcode: None,
            instructions_executed: 0,
            config,
        }
    }

    pub fn state(&self) -> VmState {
        self.state
    }

    pub fn output(&self) -> &[Value] {
        &self.output
    }

    pub fn global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    pub fn stack_top(&self) -> Option<&Value> {
        self.stack_pointer
            .checked_sub(1)
            .and_then(|index| self.stack.get(index))
    }

    /// Returns the machine to `Ready`, discarding the stack, frames, globals
    /// and output of the previous run.
    pub fn reset(&mut self) {
        self.stack.clear();
        self.stack_pointer = 0;
        self.frames.clear();
        self.globals.clear();
        self.output.clear();
        self.state = VmState::Ready;
        self.last_opcode = None;
        self.instructions_executed = 0;
    }

    #[tracing::instrument(level = "debug", skip_all)]
    pub fn interpret(&mut self, source: &str) -> Interpretation {
        if self.state != VmState::Ready {
            return self.not_ready();
        }

        match compile(source) {
            Ok(function) => self.run_function(function),
            Err(error) => {
                debug!(%error, "compile error");
                Interpretation {
                    result: InterpretResult::CompileError,
                    opcode: None,
                    output: Vec::new(),
                    error: Some(error.into()),
                }
            }
        }
    }

    /// Executes a ready-made script function, such as a hand-assembled chunk.
    pub fn run_function(&mut self, function: Function) -> Interpretation {
        if self.state != VmState::Ready {
            return self.not_ready();
        }

        self.state = VmState::Running;
        let function = Rc::new(function);
        let outcome = self
            .push(Value::function(function.clone()))
            .and_then(|_| self.call(function, 0))
            .and_then(|_| self.run());

        match outcome {
            Ok(()) => {
                self.state = VmState::HaltedOk;
                Interpretation {
                    result: InterpretResult::Ok,
                    opcode: self.last_opcode,
                    output: self.output.clone(),
                    error: None,
                }
            }
            Err(kind) => {
                self.state = VmState::HaltedError;
                let error = self.runtime_error(kind);
                debug!(%error, opcode = ?error.opcode, line = error.line, "runtime error");
                Interpretation {
                    result: InterpretResult::RuntimeError,
                    opcode: self.last_opcode,
                    output: self.output.clone(),
                    error: Some(error.into()),
                }
            }
        }
    }

    fn run(&mut self) -> Result<()> {
        loop {
            self.count_instruction()?;

            let byte = self.read_byte()?;
            let opcode = OpCode::try_from(byte).map_err(RuntimeErrorKind::InvalidOpcode)?;
            self.last_opcode = Some(opcode);
            trace!(
                ip = self.frames.last().map_or(0, |frame| frame.ip - 1),
                %opcode,
                depth = self.stack_pointer,
                "dispatch"
            );

            match opcode {
                OpCode::Constant => {
                    let constant = self.read_constant()?;
                    self.push(constant)?;
                }
                OpCode::Nil => self.push(Value::Nil)?,
                OpCode::True => self.push(Value::Boolean(true))?,
                OpCode::False => self.push(Value::Boolean(false))?,
                OpCode::Pop => {
                    self.pop()?;
                }
                OpCode::GetLocal => {
                    let slot = self.read_byte()? as usize;
                    let index = self.current_frame()?.base + slot;
                    // Slots above the stack pointer keep whatever was last
                    // stored there; slots never written read as nil.
                    let value = self.stack.get(index).cloned().unwrap_or_default();
                    self.push(value)?;
                }
                OpCode::SetLocal => {
                    let slot = self.read_byte()? as usize;
                    let index = self.current_frame()?.base + slot;
                    if index >= self.config.stack_size {
                        return Err(RuntimeErrorKind::StackOverflow);
                    }
                    let value = self.peek(0)?.clone();
                    if index >= self.stack.len() {
                        self.stack.resize(index + 1, Value::Nil);
                    }
                    self.stack[index] = value;
                }
                OpCode::GetGlobal => {
                    let name = self.read_name()?;
                    let value = match self.globals.get(&name) {
                        Some(value) => value.clone(),
                        None => return Err(RuntimeErrorKind::UndefinedVariable(name.to_string())),
                    };
                    self.push(value)?;
                }
                OpCode::DefineGlobal => {
                    let name = self.read_name()?;
                    let value = self.peek(0)?.clone();
                    self.globals.insert(name, value);
                    self.pop()?;
                }
                OpCode::SetGlobal => {
                    let name = self.read_name()?;
                    let value = self.peek(0)?.clone();
                    match self.globals.get_mut(&name) {
                        Some(slot) => *slot = value,
                        None => return Err(RuntimeErrorKind::UndefinedVariable(name.to_string())),
                    }
                }
                OpCode::Equal => {
                    let right = self.pop()?;
                    let left = self.pop()?;
                    self.push(Value::Boolean(left == right))?;
                }
                OpCode::Greater | OpCode::Less => {
                    let (left, right) = self.pop_numbers()?;
                    let result = match opcode {
                        OpCode::Greater => left > right,
                        _ => left < right,
                    };
                    self.push(Value::Boolean(result))?;
                }
                OpCode::Add => {
                    let right = self.pop()?;
                    let left = self.pop()?;
                    let result = match (&left, &right) {
                        (Value::Number(left), Value::Number(right)) => Value::Number(left + right),
                        (
                            Value::Object(Object::String(left)),
                            Value::Object(Object::String(right)),
                        ) => Value::string(&format!("{}{}", left, right)),
                        _ => return Err(RuntimeErrorKind::OperandsMustBeNumbersOrStrings),
                    };
                    self.push(result)?;
                }
                OpCode::Subtract | OpCode::Multiply | OpCode::Divide => {
                    let (left, right) = self.pop_numbers()?;
                    let result = match opcode {
                        OpCode::Subtract => left - right,
                        OpCode::Multiply => left * right,
                        _ => left / right,
                    };
                    self.push(Value::Number(result))?;
                }
                OpCode::Not => {
                    let operand = self.pop()?;
                    self.push(Value::Boolean(!operand.is_truthy()))?;
                }
                OpCode::Negate => match self.pop()? {
                    Value::Number(value) => self.push(Value::Number(-value))?,
                    _ => return Err(RuntimeErrorKind::OperandMustBeNumber),
                },
                OpCode::Print => {
                    let value = self.pop()?;
                    self.output.push(value);
                }
                OpCode::Call => {
                    let argument_count = self.read_byte()? as usize;
                    let callee = self.peek(argument_count)?.clone();
                    match callee.as_function() {
                        Some(function) => self.call(function.clone(), argument_count)?,
                        None => return Err(RuntimeErrorKind::NotCallable),
                    }
                }
                OpCode::Return => {
                    let result = self.pop()?;
                    let frame = self.frames.pop().ok_or(RuntimeErrorKind::StackUnderflow)?;
                    self.stack_pointer = frame.base;
                    self.push(result)?;
                    if self.frames.is_empty() {
                        return Ok(());
                    }
                }
            }
        }
    }

    fn call(&mut self, function: Rc<Function>, argument_count: usize) -> Result<()> {
        if argument_count != function.arity {
            return Err(RuntimeErrorKind::ArityMismatch {
                expected: function.arity,
                got: argument_count,
            });
        }
        if self.frames.len() >= self.config.max_frames {
            return Err(RuntimeErrorKind::FrameOverflow(self.config.max_frames));
        }

        let base = self
            .stack_pointer
            .checked_sub(argument_count + 1)
            .ok_or(RuntimeErrorKind::StackUnderflow)?;
        debug!(function = %function, base, depth = self.frames.len() + 1, "call");
        self.frames.push(CallFrame::new(function, base));
        Ok(())
    }

    fn count_instruction(&mut self) -> Result<()> {
        if let Some(limit) = self.config.instruction_limit {
            if self.instructions_executed >= limit {
                return Err(RuntimeErrorKind::InstructionLimitExceeded(limit));
            }
        }
        self.instructions_executed += 1;
        Ok(())
    }

    fn current_frame(&self) -> Result<&CallFrame> {
        self.frames.last().ok_or(RuntimeErrorKind::StackUnderflow)
    }

    fn read_byte(&mut self) -> Result<u8> {
        let frame = self
            .frames
            .last_mut()
            .ok_or(RuntimeErrorKind::StackUnderflow)?;
        let byte = frame
            .function
            .chunk
            .code
            .get(frame.ip)
            .copied()
            .ok_or(RuntimeErrorKind::UnexpectedEndOfChunk)?;
        frame.ip += 1;
        Ok(byte)
    }

    fn read_constant(&mut self) -> Result<Value> {
        let index = self.read_byte()? as usize;
        self.current_frame()?
            .function
            .chunk
            .constants
            .get(index)
            .cloned()
            .ok_or(RuntimeErrorKind::ConstantOutOfRange(index))
    }

    fn read_name(&mut self) -> Result<Rc<str>> {
        let index = self.read_byte()? as usize;
        match self.current_frame()?.function.chunk.constants.get(index) {
            Some(Value::Object(Object::String(name))) => Ok(name.clone()),
            Some(_) => Err(RuntimeErrorKind::ExpectedName(index)),
            None => Err(RuntimeErrorKind::ConstantOutOfRange(index)),
        }
    }

    fn push(&mut self, value: Value) -> Result<()> {
        if self.stack_pointer >= self.config.stack_size {
            return Err(RuntimeErrorKind::StackOverflow);
        }
        if self.stack_pointer >= self.stack.len() {
            self.stack.push(value);
        } else {
            self.stack[self.stack_pointer] = value;
        }
        self.stack_pointer += 1;
        Ok(())
    }

    fn pop(&mut self) -> Result<Value> {
        if self.stack_pointer == 0 {
            return Err(RuntimeErrorKind::StackUnderflow);
        }
        self.stack_pointer -= 1;
        Ok(self.stack[self.stack_pointer].clone())
    }

    fn peek(&self, distance: usize) -> Result<&Value> {
        self.stack_pointer
            .checked_sub(distance + 1)
            .map(|index| &self.stack[index])
            .ok_or(RuntimeErrorKind::StackUnderflow)
    }

    fn pop_numbers(&mut self) -> Result<(f64, f64)> {
        let right = self.pop()?;
        let left = self.pop()?;
        match (left, right) {
            (Value::Number(left), Value::Number(right)) => Ok((left, right)),
            _ => Err(RuntimeErrorKind::OperandsMustBeNumbers),
        }
    }

    fn runtime_error(&self, kind: RuntimeErrorKind) -> RuntimeError {
        let trace = self
            .frames
            .iter()
            .rev()
            .map(|frame| match frame.function.name {
                Some(_) => format!("[line {}] in {}()", frame.line(), frame.function.display_name()),
                None => format!("[line {}] in script", frame.line()),
            })
            .collect();

        RuntimeError {
            kind,
            opcode: self.last_opcode,
            line: self.frames.last().map(CallFrame::line).unwrap_or_default(),
            trace,
        }
    }

    fn not_ready(&self) -> Interpretation {
        Interpretation {
            result: InterpretResult::RuntimeError,
            opcode: None,
            output: Vec::new(),
            error: Some(RuntimeError::new(RuntimeErrorKind::NotReady).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Chunk, FunctionType};
    use anyhow::{bail, Result};

    fn interpret(source: &str) -> Interpretation {
        VirtualMachine::default().interpret(source)
    }

    fn numbers(values: &[f64]) -> Vec<Value> {
        values.iter().copied().map(Value::Number).collect()
    }

    fn assert_interprets(
        source: &str,
        result: InterpretResult,
        opcode: Option<OpCode>,
        output: Vec<Value>,
    ) {
        let interpretation = interpret(source);
        assert_eq!(interpretation.result, result, "Failed for input: {}", source);
        assert_eq!(interpretation.opcode, opcode, "Failed for input: {}", source);
        assert_eq!(interpretation.output, output, "Failed for input: {}", source);
    }

    fn runtime_error_kind(interpretation: &Interpretation) -> Result<RuntimeErrorKind> {
        match &interpretation.error {
            Some(Error::Runtime(error)) => Ok(error.kind.clone()),
            error => bail!("Expected a runtime error, got {:?}", error),
        }
    }

    #[test]
    fn test_manual_chunk() -> Result<()> {
        let mut chunk = Chunk::new();

        let constant = chunk.add_constant(Value::Number(1.2));
        chunk.write(OpCode::Constant, 123);
        chunk.write(constant as u8, 123);

        let constant = chunk.add_constant(Value::Number(3.4));
        chunk.write(OpCode::Constant, 123);
        chunk.write(constant as u8, 123);

        chunk.write(OpCode::Add, 123);

        let constant = chunk.add_constant(Value::Number(4.6));
        chunk.write(OpCode::Constant, 123);
        chunk.write(constant as u8, 123);

        chunk.write(OpCode::Divide, 123);
        chunk.write(OpCode::Negate, 123);
        chunk.write(OpCode::Print, 123);
        chunk.write(OpCode::Nil, 123);
        chunk.write(OpCode::Return, 123);

        let mut function = Function::script();
        function.chunk = chunk;

        let mut vm = VirtualMachine::default();
        let interpretation = vm.run_function(function);

        assert_eq!(interpretation.result, InterpretResult::Ok);
        assert_eq!(interpretation.opcode, Some(OpCode::Return));
        assert_eq!(interpretation.output, numbers(&[-1.0]));
        assert_eq!(vm.state(), VmState::HaltedOk);
        assert_eq!(vm.stack_top(), Some(&Value::Nil));
        Ok(())
    }

    #[test]
    fn test_arithmetic() {
        let tests = [
            ("print 1 + 1;", 2.0),
            ("print 2 - 1;", 1.0),
            ("print 3 * 3;", 9.0),
            ("print 9 / 3;", 3.0),
            ("print -1;", -1.0),
            ("print 1.5 + 2.25;", 3.75),
            ("print 0.1 + 0.2;", 0.1 + 0.2),
            ("print 50 / 2 * 2 + 10 - 5;", 55.0),
            ("print (1 + 2) * 3;", 9.0),
            ("print 1 + 2 * 3;", 7.0),
            ("print 10 - 4 - 3;", 3.0),
            ("print 2 * -3;", -6.0),
        ];

        for (input, expected) in tests {
            assert_interprets(
                input,
                InterpretResult::Ok,
                Some(OpCode::Return),
                numbers(&[expected]),
            );
        }
    }

    #[test]
    fn test_negation_is_involutive() {
        for n in [0.0, 1.0, -2.5, 1e300, 123.456] {
            let source = format!("print -(-({}));", n);
            assert_interprets(
                &source,
                InterpretResult::Ok,
                Some(OpCode::Return),
                numbers(&[n]),
            );
        }
    }

    #[test]
    fn test_division_by_zero_follows_ieee() -> Result<()> {
        let interpretation = interpret("print 1 / 0; print -1 / 0; print 0 / 0;");
        assert_eq!(interpretation.result, InterpretResult::Ok);

        match interpretation.output.as_slice() {
            [Value::Number(positive), Value::Number(negative), Value::Number(nan)] => {
                assert_eq!(*positive, f64::INFINITY);
                assert_eq!(*negative, f64::NEG_INFINITY);
                assert!(nan.is_nan());
            }
            output => bail!("Unexpected output: {:?}", output),
        }
        Ok(())
    }

    #[test]
    fn test_comparison_and_logic() {
        let tests = [
            ("print 1 < 2;", true),
            ("print 1 > 2;", false),
            ("print 2 <= 2;", true),
            ("print 3 >= 4;", false),
            ("print 1 == 1;", true),
            ("print 1 != 1;", false),
            ("print true == true;", true),
            ("print nil == false;", false),
            ("print \"a\" == \"a\";", true),
            ("print \"a\" != \"b\";", true),
            ("print 1 + 1 == 2;", true),
            ("print !true;", false),
            ("print !nil;", true),
            ("print !0;", false),
            ("print !!1;", true),
        ];

        for (input, expected) in tests {
            assert_interprets(
                input,
                InterpretResult::Ok,
                Some(OpCode::Return),
                vec![Value::Boolean(expected)],
            );
        }
    }

    #[test]
    fn test_string_concatenation() {
        assert_interprets(
            "let greeting = \"hello, \" + \"world\"; print greeting;",
            InterpretResult::Ok,
            Some(OpCode::Return),
            vec![Value::string("hello, world")],
        );
    }

    #[test]
    fn test_print_preserves_order() {
        assert_interprets(
            "let a = 1; print 1; print 2; print a;",
            InterpretResult::Ok,
            Some(OpCode::Return),
            numbers(&[1.0, 2.0, 1.0]),
        );
    }

    #[test]
    fn test_scopes() {
        let tests = [
            ("{ print 1; }", vec![1.0]),
            ("{ let a = 1; print a; }", vec![1.0]),
            (
                "{ let a = 1; print a; { a = 2; print a; } print a; }",
                vec![1.0, 2.0, 2.0],
            ),
            (
                "{ let a = 1; print a; let b = 2; print b; }",
                vec![1.0, 2.0],
            ),
            (
                "{ let a = 1; print a; { let b = 2; print b; } print a; }",
                vec![1.0, 2.0, 1.0],
            ),
            (
                "{ let a = 1; { let a = 2; print a; { print a; } } print a; }",
                vec![2.0, 2.0, 1.0],
            ),
            (
                "let a = 10; { let a = 1; print a; } print a;",
                vec![1.0, 10.0],
            ),
            (
                "{ let a = 1; { let b = a + 1; { let c = b + 1; print a + b + c; } } }",
                vec![6.0],
            ),
        ];

        for (input, expected) in tests {
            assert_interprets(
                input,
                InterpretResult::Ok,
                Some(OpCode::Return),
                numbers(&expected),
            );
        }
    }

    // A name used after its declaring block has closed resolves like any other
    // unknown name: as a global. With no such global, reading it faults on
    // the global lookup rather than on a stack slot.
    #[test]
    fn test_name_used_after_its_block_closes() -> Result<()> {
        let source = "{ let a = 1; print a; { let b = 2; } print b; }";
        let interpretation = interpret(source);

        assert_eq!(interpretation.result, InterpretResult::RuntimeError);
        assert_eq!(interpretation.opcode, Some(OpCode::GetGlobal));
        assert_eq!(interpretation.output, numbers(&[1.0]));
        assert_eq!(
            runtime_error_kind(&interpretation)?,
            RuntimeErrorKind::UndefinedVariable("b".to_string())
        );

        assert_interprets(
            "let b = 7; { { let b = 2; print b; } print b; }",
            InterpretResult::Ok,
            Some(OpCode::Return),
            numbers(&[2.0, 7.0]),
        );
        Ok(())
    }

    // Hand-assembled bytecode may still read a slot whose local is gone. The
    // machine does not track slot lifetimes, so the stale value comes back.
    #[test]
    fn test_stale_local_slot_reads_last_value() {
        let mut function = Function::script();
        let chunk = &mut function.chunk;
        let constant = chunk.add_constant(Value::Number(42.0));
        chunk.write(OpCode::Constant, 1);
        chunk.write(constant as u8, 1);
        chunk.write(OpCode::Pop, 1);
        chunk.write(OpCode::GetLocal, 2);
        chunk.write(1, 2);
        chunk.write(OpCode::Print, 2);
        chunk.write(OpCode::GetLocal, 3);
        chunk.write(9, 3);
        chunk.write(OpCode::Print, 3);
        chunk.write(OpCode::Nil, 4);
        chunk.write(OpCode::Return, 4);

        let interpretation = VirtualMachine::default().run_function(function);

        assert_eq!(interpretation.result, InterpretResult::Ok);
        assert_eq!(interpretation.output, vec![Value::Number(42.0), Value::Nil]);
    }

    #[test]
    fn test_functions() {
        let tests = [
            ("fun a() { return 1; } print a();", vec![1.0]),
            ("{ fun a() { return 1; } print a(); }", vec![1.0]),
            ("fun add(a, b) { return a + b; } print add(1, 2);", vec![3.0]),
            (
                "fun f(x) { let y = x * 2; { let z = y + 1; return z; } } print f(4);",
                vec![9.0],
            ),
            (
                "fun inner(x) { return x + 1; } fun outer(x) { return inner(x) * 2; } print outer(3);",
                vec![8.0],
            ),
            (
                "let total = 0; fun bump(n) { total = total + n; return total; } bump(2); print bump(3); print total;",
                vec![5.0, 5.0],
            ),
            (
                "{ let a = 5; fun twice(x) { return x * 2; } print twice(a); print a; }",
                vec![10.0, 5.0],
            ),
        ];

        for (input, expected) in tests {
            assert_interprets(
                input,
                InterpretResult::Ok,
                Some(OpCode::Return),
                numbers(&expected),
            );
        }
    }

    #[test]
    fn test_function_results_without_return_value() {
        assert_interprets(
            "fun nothing() { } fun early() { return; } print nothing(); print early();",
            InterpretResult::Ok,
            Some(OpCode::Return),
            vec![Value::Nil, Value::Nil],
        );
    }

    #[test]
    fn test_print_function_value() {
        let interpretation = interpret("fun named() {} print named;");
        let printed: Vec<String> = interpretation.output.iter().map(Value::to_string).collect();
        assert_eq!(printed, vec!["<fn named>".to_string()]);
    }

    #[test]
    fn test_runtime_errors() -> Result<()> {
        let tests = [
            (
                "print 1; print -\"a\";",
                OpCode::Negate,
                vec![1.0],
                RuntimeErrorKind::OperandMustBeNumber,
            ),
            (
                "print 1 + \"a\";",
                OpCode::Add,
                vec![],
                RuntimeErrorKind::OperandsMustBeNumbersOrStrings,
            ),
            (
                "print 2; print true * 2;",
                OpCode::Multiply,
                vec![2.0],
                RuntimeErrorKind::OperandsMustBeNumbers,
            ),
            (
                "print nil < 1;",
                OpCode::Less,
                vec![],
                RuntimeErrorKind::OperandsMustBeNumbers,
            ),
            (
                "print missing;",
                OpCode::GetGlobal,
                vec![],
                RuntimeErrorKind::UndefinedVariable("missing".to_string()),
            ),
            (
                "missing = 1;",
                OpCode::SetGlobal,
                vec![],
                RuntimeErrorKind::UndefinedVariable("missing".to_string()),
            ),
            (
                "fun f(a) { return a; } print 3; print f();",
                OpCode::Call,
                vec![3.0],
                RuntimeErrorKind::ArityMismatch { expected: 1, got: 0 },
            ),
            (
                "let x = 1; x();",
                OpCode::Call,
                vec![],
                RuntimeErrorKind::NotCallable,
            ),
            (
                "fun loop() { return loop(); } loop();",
                OpCode::Call,
                vec![],
                RuntimeErrorKind::FrameOverflow(MAX_FRAMES),
            ),
        ];

        for (input, opcode, output, kind) in tests {
            let interpretation = interpret(input);
            assert_eq!(
                interpretation.result,
                InterpretResult::RuntimeError,
                "Failed for input: {}",
                input
            );
            assert_eq!(interpretation.opcode, Some(opcode), "Failed for input: {}", input);
            assert_eq!(interpretation.output, numbers(&output), "Failed for input: {}", input);
            assert_eq!(runtime_error_kind(&interpretation)?, kind, "Failed for input: {}", input);
        }
        Ok(())
    }

    #[test]
    fn test_runtime_error_trace() -> Result<()> {
        let source = "fun inner() {\n  return -nil;\n}\nfun outer() {\n  return inner();\n}\nouter();";
        let interpretation = interpret(source);

        match interpretation.error {
            Some(Error::Runtime(error)) => {
                assert_eq!(error.line, 2);
                assert_eq!(error.opcode, Some(OpCode::Negate));
                assert_eq!(
                    error.trace,
                    vec![
                        "[line 2] in inner()".to_string(),
                        "[line 5] in outer()".to_string(),
                        "[line 7] in script".to_string(),
                    ]
                );
            }
            error => bail!("Expected a runtime error, got {:?}", error),
        }
        Ok(())
    }

    #[test]
    fn test_compile_error_runs_nothing() -> Result<()> {
        let mut vm = VirtualMachine::default();
        let interpretation = vm.interpret("print 1; print (;");

        assert_eq!(interpretation.result, InterpretResult::CompileError);
        assert_eq!(interpretation.opcode, None);
        assert!(interpretation.output.is_empty());
        assert!(matches!(interpretation.error, Some(Error::Compile(_))));
        assert_eq!(vm.state(), VmState::Ready);
        Ok(())
    }

    #[test]
    fn test_stack_overflow() -> Result<()> {
        let config = VmConfig {
            stack_size: 4,
            ..VmConfig::default()
        };
        let interpretation = VirtualMachine::new(config).interpret("print 1 + (2 + (3 + (4 + 5)));");

        assert_eq!(interpretation.result, InterpretResult::RuntimeError);
        assert_eq!(interpretation.opcode, Some(OpCode::Constant));
        assert_eq!(runtime_error_kind(&interpretation)?, RuntimeErrorKind::StackOverflow);
        Ok(())
    }

    #[test]
    fn test_instruction_limit() -> Result<()> {
        let config = VmConfig {
            instruction_limit: Some(3),
            ..VmConfig::default()
        };
        let interpretation = VirtualMachine::new(config).interpret("print 1; print 2; print 3;");

        assert_eq!(interpretation.result, InterpretResult::RuntimeError);
        assert_eq!(interpretation.output, numbers(&[1.0]));
        assert_eq!(
            runtime_error_kind(&interpretation)?,
            RuntimeErrorKind::InstructionLimitExceeded(3)
        );
        Ok(())
    }

    #[test]
    fn test_invalid_bytecode() -> Result<()> {
        let tests = [
            (vec![250], vec![], RuntimeErrorKind::InvalidOpcode(250)),
            (
                vec![OpCode::Constant as u8, 3],
                vec![],
                RuntimeErrorKind::ConstantOutOfRange(3),
            ),
            (
                vec![OpCode::GetGlobal as u8, 0],
                vec![Value::Number(1.0)],
                RuntimeErrorKind::ExpectedName(0),
            ),
            (vec![OpCode::Nil as u8], vec![], RuntimeErrorKind::UnexpectedEndOfChunk),
            (
                vec![OpCode::Pop as u8, OpCode::Pop as u8],
                vec![],
                RuntimeErrorKind::StackUnderflow,
            ),
        ];

        for (code, constants, kind) in tests {
            let mut function = Function::new(FunctionType::Script, None);
            function.chunk.lines = vec![1; code.len()];
            function.chunk.code = code;
            function.chunk.constants = constants;

            let interpretation = VirtualMachine::default().run_function(function);
            assert_eq!(interpretation.result, InterpretResult::RuntimeError);
            assert_eq!(runtime_error_kind(&interpretation)?, kind);
        }
        Ok(())
    }

    #[test]
    fn test_lifecycle() -> Result<()> {
        let mut vm = VirtualMachine::default();
        assert_eq!(vm.state(), VmState::Ready);

        let first = vm.interpret("let a = 1; print a;");
        assert_eq!(first.result, InterpretResult::Ok);
        assert_eq!(vm.state(), VmState::HaltedOk);
        assert_eq!(vm.global("a"), Some(&Value::Number(1.0)));

        let refused = vm.interpret("print 2;");
        assert_eq!(refused.result, InterpretResult::RuntimeError);
        assert!(refused.output.is_empty());
        assert_eq!(runtime_error_kind(&refused)?, RuntimeErrorKind::NotReady);
        assert_eq!(vm.output(), numbers(&[1.0]).as_slice());

        vm.reset();
        assert_eq!(vm.state(), VmState::Ready);
        assert_eq!(vm.global("a"), None);

        let failed = vm.interpret("print 2; print -nil;");
        assert_eq!(failed.result, InterpretResult::RuntimeError);
        assert_eq!(failed.output, numbers(&[2.0]));
        assert_eq!(vm.state(), VmState::HaltedError);
        Ok(())
    }

    #[test]
    fn test_independent_machines_share_nothing() {
        let mut first = VirtualMachine::default();
        let mut second = VirtualMachine::default();

        first.interpret("let shared = 1;");
        let interpretation = second.interpret("print shared;");

        assert_eq!(interpretation.result, InterpretResult::RuntimeError);
        assert_eq!(first.global("shared"), Some(&Value::Number(1.0)));
        assert_eq!(second.global("shared"), None);
    }
}
