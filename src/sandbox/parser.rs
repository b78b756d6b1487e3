//! Recursive-descent parser for strategy scripts.
//!
//! Fails fast: the first syntax error is returned with its line and column.

use super::ast::*;
use super::lexer::{tokenize, Span, Tok, Token};
use super::Diagnostic;

/// Deepest expression/block nesting accepted before parsing is refused.
const MAX_NESTING: usize = 64;

/// Parse a whole script.
pub fn parse(source: &str) -> Result<Program, Diagnostic> {
    let tokens = tokenize(source)?;
    Parser {
        tokens,
        pos: 0,
        depth: 0,
    }
    .program()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

type PResult<T> = Result<T, Diagnostic>;

impl Parser {
    // -- token helpers --

    fn peek(&self) -> &Tok {
        &self.tokens[self.pos].tok
    }

    fn span(&self) -> Span {
        self.tokens[self.pos].span
    }

    fn bump(&mut self) -> Token {
        let token = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek() == tok {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: &Tok) -> PResult<Span> {
        if self.peek() == tok {
            Ok(self.bump().span)
        } else {
            Err(self.unexpected(&format!("{tok}")))
        }
    }

    fn ident(&mut self, what: &str) -> PResult<String> {
        match self.peek().clone() {
            Tok::Ident(name) => {
                self.bump();
                Ok(name)
            }
            _ => Err(self.unexpected(what)),
        }
    }

    fn unexpected(&self, expected: &str) -> Diagnostic {
        Diagnostic::new(
            self.span(),
            format!("expected {expected}, found {}", self.peek()),
        )
    }

    fn enter(&mut self) -> PResult<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(Diagnostic::new(self.span(), "nesting too deep"));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    /// Left-associative chains nest one level per operator.
    fn leave_folds(&mut self, folds: usize) {
        self.depth -= folds;
    }

    // -- items --

    fn program(mut self) -> PResult<Program> {
        let mut program = Program {
            imports: Vec::new(),
            globals: Vec::new(),
            functions: Vec::new(),
        };
        loop {
            let span = self.span();
            match self.peek() {
                Tok::Eof => break,
                Tok::Import => {
                    self.bump();
                    let module = self.ident("module name")?;
                    self.expect(&Tok::Semi)?;
                    program.imports.push(Import { module, span });
                }
                Tok::Fn => program.functions.push(self.function()?),
                Tok::Let => {
                    self.bump();
                    let name = self.ident("variable name")?;
                    self.expect(&Tok::Assign)?;
                    let value = self.expr()?;
                    self.expect(&Tok::Semi)?;
                    program.globals.push(Global { name, value, span });
                }
                _ => return Err(self.unexpected("`import`, `fn` or `let`")),
            }
        }
        Ok(program)
    }

    fn function(&mut self) -> PResult<Function> {
        let span = self.expect(&Tok::Fn)?;
        let name = self.ident("function name")?;
        self.expect(&Tok::LParen)?;
        let mut params = Vec::new();
        if !self.eat(&Tok::RParen) {
            loop {
                params.push(self.ident("parameter name")?);
                if self.eat(&Tok::RParen) {
                    break;
                }
                self.expect(&Tok::Comma)?;
            }
        }
        let body = self.block()?;
        Ok(Function {
            name,
            params,
            body,
            span,
        })
    }

    // -- statements --

    fn block(&mut self) -> PResult<Vec<Stmt>> {
        self.enter()?;
        self.expect(&Tok::LBrace)?;
        let mut stmts = Vec::new();
        while !self.eat(&Tok::RBrace) {
            if *self.peek() == Tok::Eof {
                return Err(self.unexpected("`}`"));
            }
            stmts.push(self.stmt()?);
        }
        self.leave();
        Ok(stmts)
    }

    fn stmt(&mut self) -> PResult<Stmt> {
        let span = self.span();
        match self.peek() {
            Tok::Let => {
                self.bump();
                let name = self.ident("variable name")?;
                self.expect(&Tok::Assign)?;
                let value = self.expr()?;
                self.expect(&Tok::Semi)?;
                Ok(Stmt::Let { name, value, span })
            }
            Tok::If => self.if_stmt(),
            Tok::While => {
                self.bump();
                let cond = self.expr()?;
                let body = self.block()?;
                Ok(Stmt::While { cond, body, span })
            }
            Tok::For => {
                self.bump();
                let var = self.ident("loop variable")?;
                self.expect(&Tok::In)?;
                let iter = self.expr()?;
                let body = self.block()?;
                Ok(Stmt::For {
                    var,
                    iter,
                    body,
                    span,
                })
            }
            Tok::Return => {
                self.bump();
                let value = if *self.peek() == Tok::Semi {
                    None
                } else {
                    Some(self.expr()?)
                };
                self.expect(&Tok::Semi)?;
                Ok(Stmt::Return { value, span })
            }
            Tok::Break => {
                self.bump();
                self.expect(&Tok::Semi)?;
                Ok(Stmt::Break(span))
            }
            Tok::Continue => {
                self.bump();
                self.expect(&Tok::Semi)?;
                Ok(Stmt::Continue(span))
            }
            Tok::Raise => {
                self.bump();
                let value = self.expr()?;
                self.expect(&Tok::Semi)?;
                Ok(Stmt::Raise { value, span })
            }
            _ => {
                let expr = self.expr()?;
                let op = match self.peek() {
                    Tok::Assign => Some(AssignOp::Set),
                    Tok::PlusAssign => Some(AssignOp::Add),
                    Tok::MinusAssign => Some(AssignOp::Sub),
                    Tok::StarAssign => Some(AssignOp::Mul),
                    Tok::SlashAssign => Some(AssignOp::Div),
                    _ => None,
                };
                match op {
                    Some(op) => {
                        self.bump();
                        let (target, path) = lvalue(expr)?;
                        let value = self.expr()?;
                        self.expect(&Tok::Semi)?;
                        Ok(Stmt::Assign {
                            target,
                            path,
                            op,
                            value,
                            span,
                        })
                    }
                    None => {
                        self.expect(&Tok::Semi)?;
                        Ok(Stmt::Expr(expr))
                    }
                }
            }
        }
    }

    fn if_stmt(&mut self) -> PResult<Stmt> {
        let span = self.expect(&Tok::If)?;
        let cond = self.expr()?;
        let then_body = self.block()?;
        let else_body = if self.eat(&Tok::Else) {
            if *self.peek() == Tok::If {
                Some(vec![self.if_stmt()?])
            } else {
                Some(self.block()?)
            }
        } else {
            None
        };
        Ok(Stmt::If {
            cond,
            then_body,
            else_body,
            span,
        })
    }

    // -- expressions --

    fn expr(&mut self) -> PResult<Expr> {
        self.enter()?;
        let expr = self.or_expr();
        self.leave();
        expr
    }

    fn or_expr(&mut self) -> PResult<Expr> {
        let mut left = self.and_expr()?;
        let mut folds = 0;
        while *self.peek() == Tok::Or {
            let span = self.bump().span;
            self.enter()?;
            folds += 1;
            let right = self.and_expr()?;
            left = binary(BinOp::Or, left, right, span);
        }
        self.leave_folds(folds);
        Ok(left)
    }

    fn and_expr(&mut self) -> PResult<Expr> {
        let mut left = self.not_expr()?;
        let mut folds = 0;
        while *self.peek() == Tok::And {
            let span = self.bump().span;
            self.enter()?;
            folds += 1;
            let right = self.not_expr()?;
            left = binary(BinOp::And, left, right, span);
        }
        self.leave_folds(folds);
        Ok(left)
    }

    fn not_expr(&mut self) -> PResult<Expr> {
        if *self.peek() == Tok::Not {
            let span = self.bump().span;
            self.enter()?;
            let operand = self.not_expr()?;
            self.leave();
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
                span,
            });
        }
        self.comparison()
    }

    fn comparison(&mut self) -> PResult<Expr> {
        let mut left = self.additive()?;
        let mut folds = 0;
        loop {
            let op = match self.peek() {
                Tok::Eq => BinOp::Eq,
                Tok::Ne => BinOp::Ne,
                Tok::Lt => BinOp::Lt,
                Tok::Le => BinOp::Le,
                Tok::Gt => BinOp::Gt,
                Tok::Ge => BinOp::Ge,
                _ => break,
            };
            let span = self.bump().span;
            self.enter()?;
            folds += 1;
            let right = self.additive()?;
            left = binary(op, left, right, span);
        }
        self.leave_folds(folds);
        Ok(left)
    }

    fn additive(&mut self) -> PResult<Expr> {
        let mut left = self.multiplicative()?;
        let mut folds = 0;
        loop {
            let op = match self.peek() {
                Tok::Plus => BinOp::Add,
                Tok::Minus => BinOp::Sub,
                _ => break,
            };
            let span = self.bump().span;
            self.enter()?;
            folds += 1;
            let right = self.multiplicative()?;
            left = binary(op, left, right, span);
        }
        self.leave_folds(folds);
        Ok(left)
    }

    fn multiplicative(&mut self) -> PResult<Expr> {
        let mut left = self.unary()?;
        let mut folds = 0;
        loop {
            let op = match self.peek() {
                Tok::Star => BinOp::Mul,
                Tok::Slash => BinOp::Div,
                Tok::Percent => BinOp::Rem,
                _ => break,
            };
            let span = self.bump().span;
            self.enter()?;
            folds += 1;
            let right = self.unary()?;
            left = binary(op, left, right, span);
        }
        self.leave_folds(folds);
        Ok(left)
    }

    fn unary(&mut self) -> PResult<Expr> {
        if *self.peek() == Tok::Minus {
            let span = self.bump().span;
            self.enter()?;
            let operand = self.unary()?;
            self.leave();
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(operand),
                span,
            });
        }
        self.postfix()
    }

    fn postfix(&mut self) -> PResult<Expr> {
        let mut expr = self.primary()?;
        let mut folds = 0;
        loop {
            let span = self.span();
            if matches!(self.peek(), Tok::Dot | Tok::LBracket | Tok::LParen) {
                self.enter()?;
                folds += 1;
            }
            match self.peek() {
                Tok::Dot => {
                    self.bump();
                    let name = self.ident("field name")?;
                    expr = Expr::Field {
                        target: Box::new(expr),
                        name,
                        span,
                    };
                }
                Tok::LBracket => {
                    self.bump();
                    let index = self.expr()?;
                    self.expect(&Tok::RBracket)?;
                    expr = Expr::Index {
                        target: Box::new(expr),
                        index: Box::new(index),
                        span,
                    };
                }
                Tok::LParen => {
                    self.bump();
                    let callee = match expr {
                        Expr::Var(name, _) => Callee::Free(name),
                        Expr::Field { target, name, .. } => match *target {
                            Expr::Var(module, _) => Callee::Qualified {
                                module,
                                member: name,
                            },
                            _ => {
                                return Err(Diagnostic::new(
                                    span,
                                    "only named functions can be called",
                                ))
                            }
                        },
                        _ => {
                            return Err(Diagnostic::new(span, "only named functions can be called"))
                        }
                    };
                    let args = self.comma_list(&Tok::RParen)?;
                    expr = Expr::Call { callee, args, span };
                }
                _ => break,
            }
        }
        self.leave_folds(folds);
        Ok(expr)
    }

    fn comma_list(&mut self, close: &Tok) -> PResult<Vec<Expr>> {
        let mut items = Vec::new();
        if self.eat(close) {
            return Ok(items);
        }
        loop {
            items.push(self.expr()?);
            if self.eat(close) {
                return Ok(items);
            }
            self.expect(&Tok::Comma)?;
            if self.eat(close) {
                return Ok(items);
            }
        }
    }

    fn primary(&mut self) -> PResult<Expr> {
        let span = self.span();
        match self.peek().clone() {
            Tok::Number(n) => {
                self.bump();
                Ok(Expr::Number(n, span))
            }
            Tok::Str(s) => {
                self.bump();
                Ok(Expr::Str(s, span))
            }
            Tok::True => {
                self.bump();
                Ok(Expr::Bool(true, span))
            }
            Tok::False => {
                self.bump();
                Ok(Expr::Bool(false, span))
            }
            Tok::Nil => {
                self.bump();
                Ok(Expr::Nil(span))
            }
            Tok::Ident(name) => {
                self.bump();
                Ok(Expr::Var(name, span))
            }
            Tok::LParen => {
                self.bump();
                let inner = self.expr()?;
                self.expect(&Tok::RParen)?;
                Ok(inner)
            }
            Tok::LBracket => {
                self.bump();
                let items = self.comma_list(&Tok::RBracket)?;
                Ok(Expr::List(items, span))
            }
            Tok::LBrace => {
                self.bump();
                let mut entries = Vec::new();
                loop {
                    if self.eat(&Tok::RBrace) {
                        break;
                    }
                    let key = match self.peek().clone() {
                        Tok::Ident(k) | Tok::Str(k) => {
                            self.bump();
                            k
                        }
                        _ => return Err(self.unexpected("map key")),
                    };
                    self.expect(&Tok::Colon)?;
                    let value = self.expr()?;
                    entries.push((key, value));
                    if !self.eat(&Tok::Comma) {
                        self.expect(&Tok::RBrace)?;
                        break;
                    }
                }
                Ok(Expr::Map(entries, span))
            }
            _ => Err(self.unexpected("expression")),
        }
    }
}

fn binary(op: BinOp, left: Expr, right: Expr, span: Span) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
        span,
    }
}

/// Turn `a.b[c].d` into (`a`, [.b, [c], .d]).
fn lvalue(expr: Expr) -> PResult<(String, Vec<PathSeg>)> {
    let span = expr.span();
    let mut path = Vec::new();
    let mut cur = expr;
    loop {
        match cur {
            Expr::Var(name, _) => {
                path.reverse();
                return Ok((name, path));
            }
            Expr::Field { target, name, .. } => {
                path.push(PathSeg::Field(name));
                cur = *target;
            }
            Expr::Index { target, index, .. } => {
                path.push(PathSeg::Index(*index));
                cur = *target;
            }
            _ => return Err(Diagnostic::new(span, "invalid assignment target")),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
