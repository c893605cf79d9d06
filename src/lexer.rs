use std::str::Chars;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Assign,
    Asterisk,
    Bang,
    Comma,
    EndOfFile,
    Equal,
    Error,
    False,
    Fun,
    GreaterThan,
    GreaterThanOrEqual,
    Identifier,
    LeftBrace,
    LeftParentheses,
    LessThan,
    LessThanOrEqual,
    Let,
    Minus,
    Nil,
    NotEqual,
    Number,
    Plus,
    Print,
    Return,
    RightBrace,
    RightParentheses,
    Semicolon,
    Slash,
    String,
    True,
}

/// A lexeme tagged with its kind and the 1-based line it starts on.
///
/// For `TokenKind::Error` the lexeme holds the error message instead of
/// source text.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub lexeme: &'a str,
    pub line: usize,
}

impl<'a> Token<'a> {
    pub fn new(kind: TokenKind, lexeme: &'a str, line: usize) -> Self {
        Self { kind, lexeme, line }
    }
}

pub const EOF_CHAR: char = '\0';

pub struct Lexer<'a> {
    source: &'a str,
    chars: Chars<'a>,
    start: usize,
    line: usize,
    finished: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Lexer<'a> {
        Self {
            source,
            chars: source.chars(),
            start: 0,
            line: 1,
            finished: false,
        }
    }

    pub fn next_token(&mut self) -> Token<'a> {
        self.skip_trivia();
        self.start = self.offset();

        if self.is_eof() {
            return Token::new(TokenKind::EndOfFile, "", self.line);
        }

        let kind = match self.read_char() {
            '(' => TokenKind::LeftParentheses,
            ')' => TokenKind::RightParentheses,
            '{' => TokenKind::LeftBrace,
            '}' => TokenKind::RightBrace,
            ',' => TokenKind::Comma,
            ';' => TokenKind::Semicolon,
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Asterisk,
            '/' => TokenKind::Slash,
            '!' => self.next_char_or(TokenKind::Bang, '=', TokenKind::NotEqual),
            '=' => self.next_char_or(TokenKind::Assign, '=', TokenKind::Equal),
            '<' => self.next_char_or(TokenKind::LessThan, '=', TokenKind::LessThanOrEqual),
            '>' => self.next_char_or(TokenKind::GreaterThan, '=', TokenKind::GreaterThanOrEqual),
            '"' => return self.string(),
            c if Self::is_letter(c) => {
                self.skip_while(|c| Self::is_letter(c) || Self::is_digit(c));
                Self::lookup_identifier(self.lexeme())
            }
            c if Self::is_digit(c) => {
                self.skip_while(Self::is_digit);
                if self.peek_nth(0) == '.' && Self::is_digit(self.peek_nth(1)) {
                    self.read_char();
                    self.skip_while(Self::is_digit);
                }
                TokenKind::Number
            }
            _ => return self.error("Unexpected character."),
        };

        self.make_token(kind)
    }

    /// Drains the lexer, including the trailing `EndOfFile` token.
    pub fn tokenize(&mut self) -> Vec<Token<'a>> {
        self.by_ref().collect()
    }

    fn string(&mut self) -> Token<'a> {
        let line = self.line;
        while self.peek_nth(0) != '"' && !self.is_eof() {
            if self.read_char() == '\n' {
                self.line += 1;
            }
        }

        if self.is_eof() {
            return self.error("Unterminated string.");
        }

        self.read_char();
        Token::new(TokenKind::String, self.lexeme(), line)
    }

    fn make_token(&self, kind: TokenKind) -> Token<'a> {
        Token::new(kind, self.lexeme(), self.line)
    }

    fn error(&self, message: &'static str) -> Token<'a> {
        Token::new(TokenKind::Error, message, self.line)
    }

    fn lexeme(&self) -> &'a str {
        &self.source[self.start..self.offset()]
    }

    fn offset(&self) -> usize {
        self.source.len() - self.chars.as_str().len()
    }

    fn read_char(&mut self) -> char {
        self.chars.next().unwrap_or(EOF_CHAR)
    }

    fn peek_nth(&self, n: usize) -> char {
        self.chars.clone().nth(n).unwrap_or(EOF_CHAR)
    }

    fn is_eof(&self) -> bool {
        self.chars.as_str().is_empty()
    }

    fn skip_while(&mut self, mut predicate: impl FnMut(char) -> bool) {
        while predicate(self.peek_nth(0)) && !self.is_eof() {
            self.read_char();
        }
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek_nth(0) {
                '\n' => {
                    self.line += 1;
                    self.read_char();
                }
                c if Self::is_whitespace(c) && !self.is_eof() => {
                    self.read_char();
                }
                '/' if self.peek_nth(1) == '/' => self.skip_while(|c| c != '\n'),
                _ => break,
            }
        }
    }

    fn is_letter(c: char) -> bool {
        c.is_ascii_alphabetic() || c == '_'
    }

    fn is_digit(c: char) -> bool {
        c.is_ascii_digit()
    }

    fn is_whitespace(c: char) -> bool {
        c == ' ' || c == '\t' || c == '\r'
    }

    fn lookup_identifier(identifier: &str) -> TokenKind {
        match identifier {
            "fun" => TokenKind::Fun,
            "let" => TokenKind::Let,
            "print" => TokenKind::Print,
            "return" => TokenKind::Return,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "nil" => TokenKind::Nil,
            _ => TokenKind::Identifier,
        }
    }

    fn next_char_or(&mut self, default: TokenKind, next_char: char, kind: TokenKind) -> TokenKind {
        match self.peek_nth(0) {
            c if c == next_char => {
                self.read_char();
                kind
            }
            _ => default,
        }
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let token = self.next_token();
        if token.kind == TokenKind::EndOfFile {
            self.finished = true;
        }
        Some(token)
    }
}
