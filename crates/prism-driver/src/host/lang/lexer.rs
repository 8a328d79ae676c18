//! Lexer for the kernel dialect
//!
//! Converts kernel source text into a token stream with line and column
//! positions, so build logs can point at the offending character. Handles
//! `//` line comments and `/* */` block comments.

use crate::host::lang::ast::ScalarType;
use std::fmt;

/// Token types in the kernel dialect
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Keywords
    KwKernel,
    KwGlobal,
    KwConst,
    KwVoid,
    KwUnsigned,
    KwIf,
    KwElse,
    KwWhile,
    KwReturn,
    /// A scalar type keyword (`uint`, `float`, ...)
    Type(ScalarType),

    // Literals and names
    IntLit(u64),
    FloatLit(f32),
    Ident(String),

    // Punctuation
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semicolon,

    // Operators
    Star,
    Plus,
    Minus,
    Slash,
    Percent,
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    EqEq,
    NotEq,
    Lt,
    Gt,
    Le,
    Ge,
    AndAnd,
    OrOr,
    Not,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::KwKernel => write!(f, "__kernel"),
            Token::KwGlobal => write!(f, "__global"),
            Token::KwConst => write!(f, "const"),
            Token::KwVoid => write!(f, "void"),
            Token::KwUnsigned => write!(f, "unsigned"),
            Token::KwIf => write!(f, "if"),
            Token::KwElse => write!(f, "else"),
            Token::KwWhile => write!(f, "while"),
            Token::KwReturn => write!(f, "return"),
            Token::Type(ty) => write!(f, "{}", ty),
            Token::IntLit(v) => write!(f, "{}", v),
            Token::FloatLit(v) => write!(f, "{}", v),
            Token::Ident(name) => write!(f, "{}", name),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::Comma => write!(f, ","),
            Token::Semicolon => write!(f, ";"),
            Token::Star => write!(f, "*"),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Slash => write!(f, "/"),
            Token::Percent => write!(f, "%"),
            Token::Assign => write!(f, "="),
            Token::PlusAssign => write!(f, "+="),
            Token::MinusAssign => write!(f, "-="),
            Token::StarAssign => write!(f, "*="),
            Token::SlashAssign => write!(f, "/="),
            Token::EqEq => write!(f, "=="),
            Token::NotEq => write!(f, "!="),
            Token::Lt => write!(f, "<"),
            Token::Gt => write!(f, ">"),
            Token::Le => write!(f, "<="),
            Token::Ge => write!(f, ">="),
            Token::AndAnd => write!(f, "&&"),
            Token::OrOr => write!(f, "||"),
            Token::Not => write!(f, "!"),
        }
    }
}

/// A token with its source position (1-based line and column)
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub line: u32,
    pub col: u32,
}

/// Lexing failure with source position
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub line: u32,
    pub col: u32,
    pub message: String,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.line, self.col, self.message)
    }
}

impl std::error::Error for LexError {}

/// Lexer state
struct Lexer {
    input: Vec<char>,
    position: usize,
    line: u32,
    col: u32,
}

impl Lexer {
    fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            position: 0,
            line: 1,
            col: 1,
        }
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.position).copied()
    }

    fn peek_ahead(&self, offset: usize) -> Option<char> {
        self.input.get(self.position + offset).copied()
    }

    fn consume(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.position += 1;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn error(&self, message: impl Into<String>) -> LexError {
        LexError {
            line: self.line,
            col: self.col,
            message: message.into(),
        }
    }

    /// Skip whitespace and comments; returns Err on an unterminated block
    /// comment
    fn skip_trivia(&mut self) -> Result<(), LexError> {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.consume();
                }
                Some('/') if self.peek_ahead(1) == Some('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.consume();
                    }
                }
                Some('/') if self.peek_ahead(1) == Some('*') => {
                    let (line, col) = (self.line, self.col);
                    self.consume();
                    self.consume();
                    loop {
                        match self.peek() {
                            Some('*') if self.peek_ahead(1) == Some('/') => {
                                self.consume();
                                self.consume();
                                break;
                            }
                            Some(_) => {
                                self.consume();
                            }
                            None => {
                                return Err(LexError {
                                    line,
                                    col,
                                    message: "unterminated block comment".to_string(),
                                });
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn lex_number(&mut self) -> Result<Token, LexError> {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                text.push(c);
                self.consume();
            } else {
                break;
            }
        }
        // A '.' followed by a digit makes this a float literal
        if self.peek() == Some('.') && self.peek_ahead(1).is_some_and(|c| c.is_ascii_digit()) {
            text.push('.');
            self.consume();
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    text.push(c);
                    self.consume();
                } else {
                    break;
                }
            }
            // Optional trailing 'f' suffix
            if self.peek() == Some('f') {
                self.consume();
            }
            let value: f32 = text
                .parse()
                .map_err(|_| self.error(format!("invalid float literal '{}'", text)))?;
            return Ok(Token::FloatLit(value));
        }
        if self.peek() == Some('f') {
            self.consume();
            let value: f32 = text
                .parse()
                .map_err(|_| self.error(format!("invalid float literal '{}'", text)))?;
            return Ok(Token::FloatLit(value));
        }
        // Optional unsigned suffix on integers
        if self.peek() == Some('u') || self.peek() == Some('U') {
            self.consume();
        }
        let value: u64 = text
            .parse()
            .map_err(|_| self.error(format!("integer literal '{}' out of range", text)))?;
        Ok(Token::IntLit(value))
    }

    fn lex_word(&mut self) -> Token {
        let mut word = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                word.push(c);
                self.consume();
            } else {
                break;
            }
        }
        match word.as_str() {
            "__kernel" => Token::KwKernel,
            "__global" => Token::KwGlobal,
            "const" => Token::KwConst,
            "void" => Token::KwVoid,
            "unsigned" => Token::KwUnsigned,
            "if" => Token::KwIf,
            "else" => Token::KwElse,
            "while" => Token::KwWhile,
            "return" => Token::KwReturn,
            "char" => Token::Type(ScalarType::I8),
            "uchar" => Token::Type(ScalarType::U8),
            "short" => Token::Type(ScalarType::I16),
            "ushort" => Token::Type(ScalarType::U16),
            "int" => Token::Type(ScalarType::I32),
            "uint" => Token::Type(ScalarType::U32),
            "long" => Token::Type(ScalarType::I64),
            "ulong" => Token::Type(ScalarType::U64),
            "float" => Token::Type(ScalarType::F32),
            "size_t" => Token::Type(ScalarType::U64),
            _ => Token::Ident(word),
        }
    }

    fn next_token(&mut self) -> Result<Option<Spanned>, LexError> {
        self.skip_trivia()?;
        let (line, col) = (self.line, self.col);
        let c = match self.peek() {
            Some(c) => c,
            None => return Ok(None),
        };

        let token = if c.is_ascii_digit() {
            self.lex_number()?
        } else if c.is_ascii_alphabetic() || c == '_' {
            self.lex_word()
        } else {
            self.consume();
            match c {
                '(' => Token::LParen,
                ')' => Token::RParen,
                '{' => Token::LBrace,
                '}' => Token::RBrace,
                '[' => Token::LBracket,
                ']' => Token::RBracket,
                ',' => Token::Comma,
                ';' => Token::Semicolon,
                '%' => Token::Percent,
                '*' => {
                    if self.peek() == Some('=') {
                        self.consume();
                        Token::StarAssign
                    } else {
                        Token::Star
                    }
                }
                '+' => {
                    if self.peek() == Some('=') {
                        self.consume();
                        Token::PlusAssign
                    } else {
                        Token::Plus
                    }
                }
                '-' => {
                    if self.peek() == Some('=') {
                        self.consume();
                        Token::MinusAssign
                    } else {
                        Token::Minus
                    }
                }
                '/' => {
                    if self.peek() == Some('=') {
                        self.consume();
                        Token::SlashAssign
                    } else {
                        Token::Slash
                    }
                }
                '=' => {
                    if self.peek() == Some('=') {
                        self.consume();
                        Token::EqEq
                    } else {
                        Token::Assign
                    }
                }
                '!' => {
                    if self.peek() == Some('=') {
                        self.consume();
                        Token::NotEq
                    } else {
                        Token::Not
                    }
                }
                '<' => {
                    if self.peek() == Some('=') {
                        self.consume();
                        Token::Le
                    } else {
                        Token::Lt
                    }
                }
                '>' => {
                    if self.peek() == Some('=') {
                        self.consume();
                        Token::Ge
                    } else {
                        Token::Gt
                    }
                }
                '&' => {
                    if self.peek() == Some('&') {
                        self.consume();
                        Token::AndAnd
                    } else {
                        return Err(LexError {
                            line,
                            col,
                            message: "expected '&&'".to_string(),
                        });
                    }
                }
                '|' => {
                    if self.peek() == Some('|') {
                        self.consume();
                        Token::OrOr
                    } else {
                        return Err(LexError {
                            line,
                            col,
                            message: "expected '||'".to_string(),
                        });
                    }
                }
                other => {
                    return Err(LexError {
                        line,
                        col,
                        message: format!("unexpected character '{}'", other),
                    });
                }
            }
        };

        Ok(Some(Spanned { token, line, col }))
    }
}

/// Tokenize kernel source into a positioned token stream
pub fn tokenize(input: &str) -> Result<Vec<Spanned>, LexError> {
    let mut lexer = Lexer::new(input);
    let mut tokens = Vec::new();
    while let Some(spanned) = lexer.next_token()? {
        tokens.push(spanned);
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<Token> {
        tokenize(input)
            .unwrap()
            .into_iter()
            .map(|s| s.token)
            .collect()
    }

    #[test]
    fn test_tokenize_kernel_header() {
        let tokens = kinds("__kernel void add(__global uint* out)");
        assert_eq!(
            tokens,
            vec![
                Token::KwKernel,
                Token::KwVoid,
                Token::Ident("add".to_string()),
                Token::LParen,
                Token::KwGlobal,
                Token::Type(ScalarType::U32),
                Token::Star,
                Token::Ident("out".to_string()),
                Token::RParen,
            ]
        );
    }

    #[test]
    fn test_tokenize_compound_operators() {
        assert_eq!(
            kinds("a += 1; b <= c != d"),
            vec![
                Token::Ident("a".to_string()),
                Token::PlusAssign,
                Token::IntLit(1),
                Token::Semicolon,
                Token::Ident("b".to_string()),
                Token::Le,
                Token::Ident("c".to_string()),
                Token::NotEq,
                Token::Ident("d".to_string()),
            ]
        );
    }

    #[test]
    fn test_tokenize_number_literals() {
        assert_eq!(
            kinds("30 1.5 2.0f 7u"),
            vec![
                Token::IntLit(30),
                Token::FloatLit(1.5),
                Token::FloatLit(2.0),
                Token::IntLit(7),
            ]
        );
    }

    #[test]
    fn test_comments_are_skipped() {
        let source = "a // trailing\n/* block\n comment */ b";
        assert_eq!(
            kinds(source),
            vec![Token::Ident("a".to_string()), Token::Ident("b".to_string())]
        );
    }

    #[test]
    fn test_positions_track_lines() {
        let tokens = tokenize("a\n  b").unwrap();
        assert_eq!(tokens[0].line, 1);
        assert_eq!(tokens[0].col, 1);
        assert_eq!(tokens[1].line, 2);
        assert_eq!(tokens[1].col, 3);
    }

    #[test]
    fn test_unterminated_block_comment() {
        let err = tokenize("a /* never closed").unwrap_err();
        assert!(err.message.contains("unterminated"));
        assert_eq!(err.line, 1);
    }

    #[test]
    fn test_unexpected_character() {
        let err = tokenize("a @ b").unwrap_err();
        assert!(err.message.contains('@'));
    }

    #[test]
    fn test_single_ampersand_rejected() {
        assert!(tokenize("a & b").is_err());
    }
}
