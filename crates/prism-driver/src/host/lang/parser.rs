//! Recursive descent parser for the kernel dialect
//!
//! Grammar:
//!
//! ```text
//! program     := kernel*
//! kernel      := "__kernel" "void" IDENT "(" params? ")" block
//! params      := param ("," param)*
//! param       := "__global" "const"? type "*" IDENT
//!              | type IDENT
//! type        := "unsigned" scalar? | scalar
//! block       := "{" stmt* "}"
//! stmt        := type IDENT ("=" expr)? ";"
//!              | lvalue assign-op expr ";"
//!              | "if" "(" expr ")" branch ("else" branch)?
//!              | "while" "(" expr ")" branch
//!              | "return" ";"
//! branch      := block | stmt
//! lvalue      := IDENT ("[" expr "]")?
//! assign-op   := "=" | "+=" | "-=" | "*=" | "/="
//! expr        := or
//! or          := and ("||" and)*
//! and         := equality ("&&" equality)*
//! equality    := relational (("==" | "!=") relational)*
//! relational  := additive (("<" | ">" | "<=" | ">=") additive)*
//! additive    := multiplicative (("+" | "-") multiplicative)*
//! multiplicative := unary (("*" | "/" | "%") unary)*
//! unary       := ("-" | "!") unary | postfix
//! postfix     := primary ("[" expr "]")?
//! primary     := INT | FLOAT | IDENT | IDENT "(" args? ")" | "(" expr ")"
//! ```
//!
//! Calls are restricted to the built-in set (`get_global_id`, `min`, ...);
//! an unknown callee or a wrong arity is a compile error, not a link error.

use crate::host::lang::ast::{
    AssignOp, BinaryOp, Block, Builtin, Expr, KernelDef, LValue, Param, ProgramAst, ScalarType,
    Stmt, UnaryOp,
};
use crate::host::lang::lexer::{tokenize, LexError, Spanned, Token};
use std::fmt;

/// Compile failure with source position, rendered into build logs
#[derive(Debug, Clone, PartialEq)]
pub struct CompileError {
    pub line: u32,
    pub col: u32,
    pub message: String,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: error: {}", self.line, self.col, self.message)
    }
}

impl std::error::Error for CompileError {}

impl From<LexError> for CompileError {
    fn from(err: LexError) -> Self {
        Self {
            line: err.line,
            col: err.col,
            message: err.message,
        }
    }
}

/// Compile kernel source into a syntax tree
pub fn compile(source: &str) -> Result<ProgramAst, CompileError> {
    let tokens = tokenize(source)?;
    Parser::new(tokens).parse_program()
}

struct Parser {
    tokens: Vec<Spanned>,
    position: usize,
}

impl Parser {
    fn new(tokens: Vec<Spanned>) -> Self {
        Self {
            tokens,
            position: 0,
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position).map(|s| &s.token)
    }

    fn advance(&mut self) -> Option<Spanned> {
        let spanned = self.tokens.get(self.position).cloned();
        if spanned.is_some() {
            self.position += 1;
        }
        spanned
    }

    /// Position of the current token, or just past the last token at EOF
    fn here(&self) -> (u32, u32) {
        match self.tokens.get(self.position) {
            Some(s) => (s.line, s.col),
            None => match self.tokens.last() {
                Some(s) => (s.line, s.col + 1),
                None => (1, 1),
            },
        }
    }

    fn error_here(&self, message: impl Into<String>) -> CompileError {
        let (line, col) = self.here();
        CompileError {
            line,
            col,
            message: message.into(),
        }
    }

    fn expect(&mut self, expected: Token) -> Result<(), CompileError> {
        match self.peek() {
            Some(token) if *token == expected => {
                self.advance();
                Ok(())
            }
            Some(token) => Err(self.error_here(format!("expected '{}', found '{}'", expected, token))),
            None => Err(self.error_here(format!("expected '{}', found end of source", expected))),
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<String, CompileError> {
        match self.peek() {
            Some(Token::Ident(_)) => match self.advance() {
                Some(Spanned {
                    token: Token::Ident(name),
                    ..
                }) => Ok(name),
                _ => Err(self.error_here(format!("expected {}", what))),
            },
            Some(token) => Err(self.error_here(format!("expected {}, found '{}'", what, token))),
            None => Err(self.error_here(format!("expected {}, found end of source", what))),
        }
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    // --------------------------------------------------------------------------------------------
    // Declarations
    // --------------------------------------------------------------------------------------------

    fn parse_program(&mut self) -> Result<ProgramAst, CompileError> {
        let mut kernels = Vec::new();
        while self.peek().is_some() {
            kernels.push(self.parse_kernel()?);
        }
        Ok(ProgramAst { kernels })
    }

    fn parse_kernel(&mut self) -> Result<KernelDef, CompileError> {
        self.expect(Token::KwKernel)?;
        self.expect(Token::KwVoid)?;
        let name = self.expect_ident("kernel name")?;
        self.expect(Token::LParen)?;
        let mut params = Vec::new();
        if self.peek() != Some(&Token::RParen) {
            loop {
                params.push(self.parse_param()?);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }
        self.expect(Token::RParen)?;
        let body = self.parse_block()?;
        Ok(KernelDef { name, params, body })
    }

    fn parse_param(&mut self) -> Result<Param, CompileError> {
        if self.eat(&Token::KwGlobal) {
            let is_const = self.eat(&Token::KwConst);
            let ty = self.parse_type()?;
            self.expect(Token::Star)?;
            let name = self.expect_ident("parameter name")?;
            Ok(Param {
                name,
                ty,
                is_pointer: true,
                is_const,
            })
        } else {
            let is_const = self.eat(&Token::KwConst);
            let ty = self.parse_type()?;
            if self.peek() == Some(&Token::Star) {
                return Err(self.error_here("pointer parameters must be declared __global"));
            }
            let name = self.expect_ident("parameter name")?;
            Ok(Param {
                name,
                ty,
                is_pointer: false,
                is_const,
            })
        }
    }

    fn parse_type(&mut self) -> Result<ScalarType, CompileError> {
        if self.eat(&Token::KwUnsigned) {
            // "unsigned" alone means unsigned int
            if let Some(Token::Type(ty)) = self.peek() {
                if ty.is_float() {
                    return Err(self.error_here("'unsigned float' is not a type"));
                }
                let ty = *ty;
                self.advance();
                return Ok(ty.to_unsigned());
            }
            return Ok(ScalarType::U32);
        }
        match self.peek() {
            Some(Token::Type(ty)) => {
                let ty = *ty;
                self.advance();
                Ok(ty)
            }
            Some(token) => Err(self.error_here(format!("expected type, found '{}'", token))),
            None => Err(self.error_here("expected type, found end of source")),
        }
    }

    // --------------------------------------------------------------------------------------------
    // Statements
    // --------------------------------------------------------------------------------------------

    fn parse_block(&mut self) -> Result<Block, CompileError> {
        self.expect(Token::LBrace)?;
        let mut stmts = Vec::new();
        while self.peek() != Some(&Token::RBrace) {
            if self.peek().is_none() {
                return Err(self.error_here("expected '}', found end of source"));
            }
            stmts.push(self.parse_stmt()?);
        }
        self.expect(Token::RBrace)?;
        Ok(Block(stmts))
    }

    /// A branch body: a braced block, or a single statement normalized into
    /// a one-element block
    fn parse_branch(&mut self) -> Result<Block, CompileError> {
        if self.peek() == Some(&Token::LBrace) {
            self.parse_block()
        } else {
            Ok(Block(vec![self.parse_stmt()?]))
        }
    }

    fn parse_stmt(&mut self) -> Result<Stmt, CompileError> {
        match self.peek() {
            Some(Token::Type(_)) | Some(Token::KwUnsigned) | Some(Token::KwConst) => {
                self.eat(&Token::KwConst);
                let ty = self.parse_type()?;
                let name = self.expect_ident("variable name")?;
                let init = if self.eat(&Token::Assign) {
                    Some(self.parse_expr()?)
                } else {
                    None
                };
                self.expect(Token::Semicolon)?;
                Ok(Stmt::Decl { ty, name, init })
            }
            Some(Token::KwIf) => {
                self.advance();
                self.expect(Token::LParen)?;
                let cond = self.parse_expr()?;
                self.expect(Token::RParen)?;
                let then_branch = self.parse_branch()?;
                let else_branch = if self.eat(&Token::KwElse) {
                    Some(self.parse_branch()?)
                } else {
                    None
                };
                Ok(Stmt::If {
                    cond,
                    then_branch,
                    else_branch,
                })
            }
            Some(Token::KwWhile) => {
                self.advance();
                self.expect(Token::LParen)?;
                let cond = self.parse_expr()?;
                self.expect(Token::RParen)?;
                let body = self.parse_branch()?;
                Ok(Stmt::While { cond, body })
            }
            Some(Token::KwReturn) => {
                self.advance();
                if self.peek() != Some(&Token::Semicolon) {
                    return Err(self.error_here("kernel functions return void"));
                }
                self.expect(Token::Semicolon)?;
                Ok(Stmt::Return)
            }
            Some(Token::Ident(_)) => {
                let target = self.parse_lvalue()?;
                let op = match self.peek() {
                    Some(Token::Assign) => AssignOp::Set,
                    Some(Token::PlusAssign) => AssignOp::Add,
                    Some(Token::MinusAssign) => AssignOp::Sub,
                    Some(Token::StarAssign) => AssignOp::Mul,
                    Some(Token::SlashAssign) => AssignOp::Div,
                    _ => return Err(self.error_here("expected assignment operator")),
                };
                self.advance();
                let value = self.parse_expr()?;
                self.expect(Token::Semicolon)?;
                Ok(Stmt::Assign { target, op, value })
            }
            Some(token) => Err(self.error_here(format!("expected statement, found '{}'", token))),
            None => Err(self.error_here("expected statement, found end of source")),
        }
    }

    fn parse_lvalue(&mut self) -> Result<LValue, CompileError> {
        let name = self.expect_ident("assignment target")?;
        if self.eat(&Token::LBracket) {
            let index = self.parse_expr()?;
            self.expect(Token::RBracket)?;
            Ok(LValue::Index { base: name, index })
        } else {
            Ok(LValue::Var(name))
        }
    }

    // --------------------------------------------------------------------------------------------
    // Expressions
    // --------------------------------------------------------------------------------------------

    fn parse_expr(&mut self) -> Result<Expr, CompileError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, CompileError> {
        let mut lhs = self.parse_and()?;
        while self.eat(&Token::OrOr) {
            let rhs = self.parse_and()?;
            lhs = Expr::Binary {
                op: BinaryOp::Or,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, CompileError> {
        let mut lhs = self.parse_equality()?;
        while self.eat(&Token::AndAnd) {
            let rhs = self.parse_equality()?;
            lhs = Expr::Binary {
                op: BinaryOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> Result<Expr, CompileError> {
        let mut lhs = self.parse_relational()?;
        loop {
            let op = match self.peek() {
                Some(Token::EqEq) => BinaryOp::Eq,
                Some(Token::NotEq) => BinaryOp::Ne,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_relational()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_relational(&mut self) -> Result<Expr, CompileError> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Some(Token::Lt) => BinaryOp::Lt,
                Some(Token::Gt) => BinaryOp::Gt,
                Some(Token::Le) => BinaryOp::Le,
                Some(Token::Ge) => BinaryOp::Ge,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_additive()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr, CompileError> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, CompileError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, CompileError> {
        let op = match self.peek() {
            Some(Token::Minus) => Some(UnaryOp::Neg),
            Some(Token::Not) => Some(UnaryOp::Not),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary {
                op,
                operand: Box::new(operand),
            });
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, CompileError> {
        let primary = self.parse_primary()?;
        if self.peek() == Some(&Token::LBracket) {
            let base = match primary {
                Expr::Var(name) => name,
                _ => return Err(self.error_here("only named buffers can be indexed")),
            };
            self.advance();
            let index = self.parse_expr()?;
            self.expect(Token::RBracket)?;
            return Ok(Expr::Index {
                base,
                index: Box::new(index),
            });
        }
        Ok(primary)
    }

    fn parse_primary(&mut self) -> Result<Expr, CompileError> {
        match self.peek() {
            Some(Token::IntLit(v)) => {
                let v = *v;
                self.advance();
                Ok(Expr::IntLit(v))
            }
            Some(Token::FloatLit(v)) => {
                let v = *v;
                self.advance();
                Ok(Expr::FloatLit(v))
            }
            Some(Token::LParen) => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(_)) => {
                let name = self.expect_ident("expression")?;
                if self.peek() == Some(&Token::LParen) {
                    return self.parse_call(name);
                }
                Ok(Expr::Var(name))
            }
            Some(token) => Err(self.error_here(format!("expected expression, found '{}'", token))),
            None => Err(self.error_here("expected expression, found end of source")),
        }
    }

    fn parse_call(&mut self, name: String) -> Result<Expr, CompileError> {
        let (which, arity) = Builtin::lookup(&name)
            .ok_or_else(|| self.error_here(format!("unknown function '{}'", name)))?;
        self.expect(Token::LParen)?;
        let mut args = Vec::new();
        if self.peek() != Some(&Token::RParen) {
            loop {
                args.push(self.parse_expr()?);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }
        self.expect(Token::RParen)?;
        if args.len() != arity {
            return Err(self.error_here(format!(
                "'{}' takes {} argument{}, found {}",
                name,
                arity,
                if arity == 1 { "" } else { "s" },
                args.len()
            )));
        }
        Ok(Expr::Builtin { which, args })
    }
}
