use crate::{
    debug::disassemble_chunk, Chunk, CompileError, Function, FunctionType, Lexer, OpCode, Token,
    TokenKind, Value,
};
use std::rc::Rc;
use tracing::{debug, trace};

pub type Result<T> = std::result::Result<T, CompileError>;

const MAX_LOCALS: usize = u8::MAX as usize + 1;
const MAX_CONSTANTS: usize = u8::MAX as usize + 1;
const MAX_ARGUMENTS: usize = u8::MAX as usize;

#[derive(Debug, PartialEq, PartialOrd, Copy, Clone)]
pub enum Precedence {
    Lowest,
    Assignment,
    Equals,
    LessThanGreaterThan,
    Sum,
    Product,
    Prefix,
    Call,
    Primary,
}

impl Precedence {
    pub fn of_token(kind: TokenKind) -> Self {
        match kind {
            TokenKind::Equal | TokenKind::NotEqual => Self::Equals,
            TokenKind::LessThan
            | TokenKind::LessThanOrEqual
            | TokenKind::GreaterThan
            | TokenKind::GreaterThanOrEqual => Self::LessThanGreaterThan,
            TokenKind::Plus | TokenKind::Minus => Self::Sum,
            TokenKind::Slash | TokenKind::Asterisk => Self::Product,
            TokenKind::LeftParentheses => Self::Call,
            _ => Self::Lowest,
        }
    }

    fn next(self) -> Self {
        match self {
            Self::Lowest => Self::Assignment,
            Self::Assignment => Self::Equals,
            Self::Equals => Self::LessThanGreaterThan,
            Self::LessThanGreaterThan => Self::Sum,
            Self::Sum => Self::Product,
            Self::Product => Self::Prefix,
            Self::Prefix => Self::Call,
            Self::Call | Self::Primary => Self::Primary,
        }
    }
}

/// Compiles a whole program into its top-level script function.
pub fn compile(source: &str) -> Result<Function> {
    Compiler::new(Lexer::new(source)).compile()
}

#[derive(Debug)]
struct Local<'a> {
    name: &'a str,
    depth: usize,
    initialized: bool,
}

/// Per-function compilation context. Depth 0 is the function body's top
/// level; slot 0 is reserved for the callee.
struct FunctionState<'a> {
    function: Function,
    locals: Vec<Local<'a>>,
    scope_depth: usize,
}

impl<'a> FunctionState<'a> {
    fn new(function_type: FunctionType, name: Option<&str>) -> Self {
        Self {
            function: Function::new(function_type, name),
            locals: vec![Local {
                name: "",
                depth: 0,
                initialized: true,
            }],
            scope_depth: 0,
        }
    }
}

pub struct Compiler<'a, I: Iterator<Item = Token<'a>>> {
    tokens: I,
    current: Token<'a>,
    previous: Token<'a>,
    states: Vec<FunctionState<'a>>,
}

impl<'a, I: Iterator<Item = Token<'a>>> Compiler<'a, I> {
    pub fn new(tokens: I) -> Self {
        let start = Token::new(TokenKind::EndOfFile, "", 1);
        Self {
            tokens,
            current: start,
            previous: start,
            states: vec![FunctionState::new(FunctionType::Script, None)],
        }
    }

    pub fn compile(mut self) -> Result<Function> {
        self.advance()?;
        while !self.matches(TokenKind::EndOfFile)? {
            self.declaration()?;
        }
        Ok(self.end_function())
    }

    fn declaration(&mut self) -> Result<()> {
        if self.matches(TokenKind::Fun)? {
            self.function_declaration()
        } else if self.matches(TokenKind::Let)? {
            self.let_declaration()
        } else {
            self.statement()
        }
    }

    fn function_declaration(&mut self) -> Result<()> {
        let global = self.parse_variable("Expect function name.")?;
        self.mark_initialized();
        self.function()?;
        self.define_variable(global);
        Ok(())
    }

    fn function(&mut self) -> Result<()> {
        let name = self.previous.lexeme;
        self.states
            .push(FunctionState::new(FunctionType::Function, Some(name)));

        self.consume(TokenKind::LeftParentheses, "Expect '(' after function name.")?;
        if !self.check(TokenKind::RightParentheses) {
            loop {
                self.state_mut().function.arity += 1;
                if self.state().function.arity > MAX_ARGUMENTS {
                    return Err(self.error_at_current("Can't have more than 255 parameters."));
                }
                let parameter = self.parse_variable("Expect parameter name.")?;
                self.define_variable(parameter);
                if !self.matches(TokenKind::Comma)? {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParentheses, "Expect ')' after parameters.")?;
        self.consume(TokenKind::LeftBrace, "Expect '{' before function body.")?;
        self.block()?;

        let function = self.end_function();
        let constant = self.make_constant(Value::function(Rc::new(function)))?;
        self.emit_bytes(OpCode::Constant, constant);
        Ok(())
    }

    fn let_declaration(&mut self) -> Result<()> {
        let global = self.parse_variable("Expect variable name.")?;

        if self.matches(TokenKind::Assign)? {
            self.expression()?;
        } else {
            self.emit(OpCode::Nil);
        }
        self.consume(
            TokenKind::Semicolon,
            "Expect ';' after variable declaration.",
        )?;

        self.define_variable(global);
        Ok(())
    }

    fn statement(&mut self) -> Result<()> {
        if self.matches(TokenKind::Print)? {
            self.print_statement()
        } else if self.matches(TokenKind::Return)? {
            self.return_statement()
        } else if self.matches(TokenKind::LeftBrace)? {
            self.begin_scope();
            self.block()?;
            self.end_scope();
            Ok(())
        } else {
            self.expression_statement()
        }
    }

    fn print_statement(&mut self) -> Result<()> {
        self.expression()?;
        self.consume(TokenKind::Semicolon, "Expect ';' after value.")?;
        self.emit(OpCode::Print);
        Ok(())
    }

    fn return_statement(&mut self) -> Result<()> {
        if self.state().function.function_type == FunctionType::Script {
            return Err(self.error_at_previous("Can't return from top-level code."));
        }

        if self.matches(TokenKind::Semicolon)? {
            self.emit_return();
        } else {
            self.expression()?;
            self.consume(TokenKind::Semicolon, "Expect ';' after return value.")?;
            self.emit(OpCode::Return);
        }
        Ok(())
    }

    fn expression_statement(&mut self) -> Result<()> {
        self.expression()?;
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.")?;
        self.emit(OpCode::Pop);
        Ok(())
    }

    fn block(&mut self) -> Result<()> {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::EndOfFile) {
            self.declaration()?;
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after block.")
    }

    fn begin_scope(&mut self) {
        self.state_mut().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        let state = self.state_mut();
        let depth = state.scope_depth;
        let mut popped = 0;
        while state.locals.last().map_or(false, |local| local.depth == depth) {
            state.locals.pop();
            popped += 1;
        }
        state.scope_depth -= 1;

        for _ in 0..popped {
            self.emit(OpCode::Pop);
        }
    }

    fn expression(&mut self) -> Result<()> {
        self.parse_precedence(Precedence::Assignment)
    }

    fn parse_precedence(&mut self, precedence: Precedence) -> Result<()> {
        self.advance()?;
        let can_assign = precedence <= Precedence::Assignment;
        self.prefix(self.previous.kind, can_assign)?;

        while precedence <= Precedence::of_token(self.current.kind) {
            self.advance()?;
            self.infix(self.previous.kind)?;
        }

        if can_assign && self.check(TokenKind::Assign) {
            return Err(self.error_at_current("Invalid assignment target."));
        }
        Ok(())
    }

    fn prefix(&mut self, kind: TokenKind, can_assign: bool) -> Result<()> {
        match kind {
            TokenKind::LeftParentheses => self.grouping(),
            TokenKind::Minus | TokenKind::Bang => self.unary(),
            TokenKind::Number => self.number(),
            TokenKind::String => self.string(),
            TokenKind::True => {
                self.emit(OpCode::True);
                Ok(())
            }
            TokenKind::False => {
                self.emit(OpCode::False);
                Ok(())
            }
            TokenKind::Nil => {
                self.emit(OpCode::Nil);
                Ok(())
            }
            TokenKind::Identifier => self.variable(can_assign),
            _ => Err(self.error_at_previous("Expect expression.")),
        }
    }

    fn infix(&mut self, kind: TokenKind) -> Result<()> {
        match kind {
            TokenKind::LeftParentheses => self.call(),
            _ => self.binary(),
        }
    }

    fn grouping(&mut self) -> Result<()> {
        self.expression()?;
        self.consume(TokenKind::RightParentheses, "Expect ')' after expression.")
    }

    fn unary(&mut self) -> Result<()> {
        let operator = self.previous.kind;
        self.parse_precedence(Precedence::Prefix)?;
        match operator {
            TokenKind::Minus => self.emit(OpCode::Negate),
            _ => self.emit(OpCode::Not),
        }
        Ok(())
    }

    fn binary(&mut self) -> Result<()> {
        let operator = self.previous.kind;
        self.parse_precedence(Precedence::of_token(operator).next())?;

        match operator {
            TokenKind::Plus => self.emit(OpCode::Add),
            TokenKind::Minus => self.emit(OpCode::Subtract),
            TokenKind::Asterisk => self.emit(OpCode::Multiply),
            TokenKind::Slash => self.emit(OpCode::Divide),
            TokenKind::Equal => self.emit(OpCode::Equal),
            TokenKind::NotEqual => self.emit_bytes(OpCode::Equal, OpCode::Not),
            TokenKind::GreaterThan => self.emit(OpCode::Greater),
            TokenKind::GreaterThanOrEqual => self.emit_bytes(OpCode::Less, OpCode::Not),
            TokenKind::LessThan => self.emit(OpCode::Less),
            TokenKind::LessThanOrEqual => self.emit_bytes(OpCode::Greater, OpCode::Not),
            _ => return Err(self.error_at_previous("Expect binary operator.")),
        }
        Ok(())
    }

    fn call(&mut self) -> Result<()> {
        let argument_count = self.argument_list()?;
        self.emit_bytes(OpCode::Call, argument_count);
        Ok(())
    }

    fn argument_list(&mut self) -> Result<u8> {
        let mut count = 0;
        if !self.check(TokenKind::RightParentheses) {
            loop {
                self.expression()?;
                if count == MAX_ARGUMENTS {
                    return Err(self.error_at_previous("Can't have more than 255 arguments."));
                }
                count += 1;
                if !self.matches(TokenKind::Comma)? {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParentheses, "Expect ')' after arguments.")?;
        Ok(count as u8)
    }

    fn number(&mut self) -> Result<()> {
        let value = self
            .previous
            .lexeme
            .parse::<f64>()
            .map_err(|_| self.error_at_previous("Invalid number literal."))?;
        self.emit_constant(Value::Number(value))
    }

    fn string(&mut self) -> Result<()> {
        let contents = self
            .previous
            .lexeme
            .strip_prefix('"')
            .and_then(|lexeme| lexeme.strip_suffix('"'))
            .ok_or_else(|| self.error_at_previous("Invalid string literal."))?;
        self.emit_constant(Value::string(contents))
    }

    fn variable(&mut self, can_assign: bool) -> Result<()> {
        let name = self.previous.lexeme;
        let (get, set, operand) = match self.resolve_local(name)? {
            Some(slot) => (OpCode::GetLocal, OpCode::SetLocal, slot),
            None => {
                let constant = self.identifier_constant(name)?;
                (OpCode::GetGlobal, OpCode::SetGlobal, constant)
            }
        };

        if can_assign && self.matches(TokenKind::Assign)? {
            self.expression()?;
            self.emit_bytes(set, operand);
        } else {
            self.emit_bytes(get, operand);
        }
        Ok(())
    }

    /// Finds the innermost live local called `name`, searching from the most
    /// recently declared one. Locals popped by `end_scope` are gone from the
    /// list, so names that outlived their block fall through to globals.
    fn resolve_local(&self, name: &str) -> Result<Option<u8>> {
        let state = self.state();
        match state
            .locals
            .iter()
            .enumerate()
            .rev()
            .find(|(_, local)| local.name == name)
        {
            Some((_, local)) if !local.initialized => Err(
                self.error_at_previous("Can't read local variable in its own initializer."),
            ),
            Some((slot, _)) => Ok(Some(slot as u8)),
            None => Ok(None),
        }
    }

    fn is_global_scope(&self) -> bool {
        let state = self.state();
        state.function.function_type == FunctionType::Script && state.scope_depth == 0
    }

    /// Consumes a name and declares it. Returns the name's constant index when
    /// it binds a global.
    fn parse_variable(&mut self, message: &str) -> Result<Option<u8>> {
        self.consume(TokenKind::Identifier, message)?;
        let name = self.previous.lexeme;

        if self.is_global_scope() {
            return self.identifier_constant(name).map(Some);
        }

        self.declare_local(name)?;
        Ok(None)
    }

    fn declare_local(&mut self, name: &'a str) -> Result<()> {
        let state = self.state();
        let depth = state.scope_depth;
        let duplicate = state
            .locals
            .iter()
            .rev()
            .take_while(|local| local.depth == depth)
            .any(|local| local.name == name);
        if duplicate {
            return Err(self.error_at_previous("Already a variable with this name in this scope."));
        }
        if state.locals.len() == MAX_LOCALS {
            return Err(self.error_at_previous("Too many local variables in function."));
        }

        self.state_mut().locals.push(Local {
            name,
            depth,
            initialized: false,
        });
        Ok(())
    }

    fn mark_initialized(&mut self) {
        if self.is_global_scope() {
            return;
        }
        if let Some(local) = self.state_mut().locals.last_mut() {
            local.initialized = true;
        }
    }

    fn define_variable(&mut self, global: Option<u8>) {
        match global {
            Some(constant) => self.emit_bytes(OpCode::DefineGlobal, constant),
            None => self.mark_initialized(),
        }
    }

    fn identifier_constant(&mut self, name: &str) -> Result<u8> {
        self.make_constant(Value::string(name))
    }

    fn make_constant(&mut self, value: Value) -> Result<u8> {
        if self.chunk().constants.len() == MAX_CONSTANTS {
            return Err(self.error_at_previous("Too many constants in one chunk."));
        }
        Ok(self.chunk_mut().add_constant(value) as u8)
    }

    fn emit_constant(&mut self, value: Value) -> Result<()> {
        let constant = self.make_constant(value)?;
        self.emit_bytes(OpCode::Constant, constant);
        Ok(())
    }

    fn emit(&mut self, byte: impl Into<u8>) {
        let line = self.previous.line;
        self.chunk_mut().write(byte, line);
    }

    fn emit_bytes(&mut self, first: impl Into<u8>, second: impl Into<u8>) {
        self.emit(first);
        self.emit(second);
    }

    fn emit_return(&mut self) {
        self.emit_bytes(OpCode::Nil, OpCode::Return);
    }

    fn end_function(&mut self) -> Function {
        self.emit_return();
        let function = match self.states.pop() {
            Some(state) => state.function,
            None => Function::script(),
        };

        debug!(
            function = %function,
            arity = function.arity,
            bytes = function.chunk.len(),
            constants = function.chunk.constants.len(),
            "compiled function"
        );
        trace!(
            "\n{}",
            disassemble_chunk(&function.chunk, function.display_name())
        );

        function
    }

    fn state(&self) -> &FunctionState<'a> {
        // The script state is pushed in `new` and only popped by the final
        // `end_function`, after which the compiler is consumed.
        &self.states[self.states.len() - 1]
    }

    fn state_mut(&mut self) -> &mut FunctionState<'a> {
        let last = self.states.len() - 1;
        &mut self.states[last]
    }

    fn chunk(&self) -> &Chunk {
        &self.state().function.chunk
    }

    fn chunk_mut(&mut self) -> &mut Chunk {
        &mut self.state_mut().function.chunk
    }

    fn advance(&mut self) -> Result<()> {
        self.previous = self.current;
        let line = self.previous.line;
        self.current = self
            .tokens
            .next()
            .unwrap_or_else(|| Token::new(TokenKind::EndOfFile, "", line));

        if self.current.kind == TokenKind::Error {
            return Err(CompileError {
                line: self.current.line,
                location: String::new(),
                message: self.current.lexeme.to_string(),
            });
        }
        Ok(())
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn matches(&mut self, kind: TokenKind) -> Result<bool> {
        if !self.check(kind) {
            return Ok(false);
        }
        self.advance()?;
        Ok(true)
    }

    fn consume(&mut self, kind: TokenKind, message: &str) -> Result<()> {
        if self.check(kind) {
            return self.advance();
        }
        Err(self.error_at_current(message))
    }

    fn error_at_current(&self, message: &str) -> CompileError {
        Self::error_at(&self.current, message)
    }

    fn error_at_previous(&self, message: &str) -> CompileError {
        Self::error_at(&self.previous, message)
    }

    fn error_at(token: &Token, message: &str) -> CompileError {
        let location = match token.kind {
            TokenKind::EndOfFile => " at end".to_string(),
            _ => format!(" at '{}'", token.lexeme),
        };
        CompileError {
            line: token.line,
            location,
            message: message.to_string(),
        }
    }
}
