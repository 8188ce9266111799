//! Recursive descent parser for the script dialect, with precedence
//! climbing for operators and a hard recursion-depth cap.

use crate::ast::{
    ArrowBody, ArrowFn, AssignOp, BinaryOp, Expr, LogicalOp, Stmt, UnaryOp,
};
use crate::lexer::Lexer;
use crate::token::{Token, TokenKind};
use std::rc::Rc;

const MAX_PARSER_DEPTH: usize = 200;

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
#[error("syntax error at byte {pos}: {message}")]
pub struct ParseError {
    pub pos: usize,
    pub message: String,
}

/// Parse a complete script.
pub fn parse(source: &str) -> Result<Vec<Stmt>, ParseError> {
    let tokens = Lexer::new(source).tokenize().map_err(|e| ParseError {
        pos: e.pos,
        message: e.message,
    })?;
    let mut parser = Parser { tokens, position: 0 };
    parser.parse_program()
}

struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

impl Parser {
    fn parse_program(&mut self) -> Result<Vec<Stmt>, ParseError> {
        let mut stmts = Vec::new();
        while self.current().kind != TokenKind::Eof {
            stmts.push(self.statement(0)?);
        }
        Ok(stmts)
    }

    fn statement(&mut self, depth: usize) -> Result<Stmt, ParseError> {
        self.check_depth(depth)?;
        let stmt = match &self.current().kind {
            TokenKind::Let | TokenKind::Const | TokenKind::Var => self.declaration(depth)?,
            TokenKind::If => return self.if_statement(depth),
            TokenKind::While => return self.while_statement(depth),
            TokenKind::For => return self.for_statement(depth),
            TokenKind::LBrace => return Ok(Stmt::Block(self.block(depth)?)),
            TokenKind::Return => {
                self.advance();
                let value = if matches!(
                    self.current().kind,
                    TokenKind::Semi | TokenKind::RBrace | TokenKind::Eof
                ) {
                    None
                } else {
                    Some(self.expression(depth + 1)?)
                };
                Stmt::Return(value)
            }
            TokenKind::Break => {
                self.advance();
                Stmt::Break
            }
            TokenKind::Continue => {
                self.advance();
                Stmt::Continue
            }
            TokenKind::Throw => {
                self.advance();
                Stmt::Throw(self.expression(depth + 1)?)
            }
            _ => Stmt::Expr(self.expression(depth + 1)?),
        };
        self.eat(&TokenKind::Semi);
        Ok(stmt)
    }

    fn declaration(&mut self, depth: usize) -> Result<Stmt, ParseError> {
        self.advance(); // let / const / var
        let name = self.expect_ident()?;
        let init = if self.eat(&TokenKind::Assign) {
            Some(self.expression(depth + 1)?)
        } else {
            None
        };
        Ok(Stmt::Decl { name, init })
    }

    fn if_statement(&mut self, depth: usize) -> Result<Stmt, ParseError> {
        self.advance();
        self.expect(TokenKind::LParen)?;
        let cond = self.expression(depth + 1)?;
        self.expect(TokenKind::RParen)?;
        let then_branch = self.branch(depth)?;
        let else_branch = if self.eat(&TokenKind::Else) {
            Some(self.branch(depth)?)
        } else {
            None
        };
        Ok(Stmt::If {
            cond,
            then_branch,
            else_branch,
        })
    }

    fn while_statement(&mut self, depth: usize) -> Result<Stmt, ParseError> {
        self.advance();
        self.expect(TokenKind::LParen)?;
        let cond = self.expression(depth + 1)?;
        self.expect(TokenKind::RParen)?;
        let body = self.branch(depth)?;
        Ok(Stmt::While { cond, body })
    }

    fn for_statement(&mut self, depth: usize) -> Result<Stmt, ParseError> {
        self.advance();
        self.expect(TokenKind::LParen)?;

        let init = if self.eat(&TokenKind::Semi) {
            None
        } else {
            let stmt = match self.current().kind {
                TokenKind::Let | TokenKind::Const | TokenKind::Var => self.declaration(depth)?,
                _ => Stmt::Expr(self.expression(depth + 1)?),
            };
            self.expect(TokenKind::Semi)?;
            Some(Box::new(stmt))
        };

        let cond = if self.current().kind == TokenKind::Semi {
            None
        } else {
            Some(self.expression(depth + 1)?)
        };
        self.expect(TokenKind::Semi)?;

        let step = if self.current().kind == TokenKind::RParen {
            None
        } else {
            Some(self.expression(depth + 1)?)
        };
        self.expect(TokenKind::RParen)?;

        let body = self.branch(depth)?;
        Ok(Stmt::For {
            init,
            cond,
            step,
            body,
        })
    }

    /// A braced block or a single statement.
    fn branch(&mut self, depth: usize) -> Result<Vec<Stmt>, ParseError> {
        if self.current().kind == TokenKind::LBrace {
            self.block(depth)
        } else {
            Ok(vec![self.statement(depth + 1)?])
        }
    }

    fn block(&mut self, depth: usize) -> Result<Vec<Stmt>, ParseError> {
        self.check_depth(depth)?;
        self.expect(TokenKind::LBrace)?;
        let mut stmts = Vec::new();
        while !matches!(self.current().kind, TokenKind::RBrace | TokenKind::Eof) {
            stmts.push(self.statement(depth + 1)?);
        }
        self.expect(TokenKind::RBrace)?;
        Ok(stmts)
    }

    fn expression(&mut self, depth: usize) -> Result<Expr, ParseError> {
        self.check_depth(depth)?;
        self.assignment(depth)
    }

    fn assignment(&mut self, depth: usize) -> Result<Expr, ParseError> {
        let target = self.ternary(depth + 1)?;
        let op = match self.current().kind {
            TokenKind::Assign => AssignOp::Assign,
            TokenKind::PlusAssign => AssignOp::Add,
            TokenKind::MinusAssign => AssignOp::Sub,
            TokenKind::StarAssign => AssignOp::Mul,
            TokenKind::SlashAssign => AssignOp::Div,
            _ => return Ok(target),
        };
        let pos = self.current().pos;
        if !matches!(target, Expr::Ident(_) | Expr::Member { .. } | Expr::Index { .. }) {
            return Err(ParseError {
                pos,
                message: "invalid assignment target".to_string(),
            });
        }
        self.advance();
        let value = self.assignment(depth + 1)?;
        Ok(Expr::Assign {
            target: Box::new(target),
            op,
            value: Box::new(value),
        })
    }

    fn ternary(&mut self, depth: usize) -> Result<Expr, ParseError> {
        self.check_depth(depth)?;
        let cond = self.logical_or(depth + 1)?;
        if !self.eat(&TokenKind::Question) {
            return Ok(cond);
        }
        let then_expr = self.expression(depth + 1)?;
        self.expect(TokenKind::Colon)?;
        let else_expr = self.expression(depth + 1)?;
        Ok(Expr::Ternary {
            cond: Box::new(cond),
            then_expr: Box::new(then_expr),
            else_expr: Box::new(else_expr),
        })
    }

    fn logical_or(&mut self, depth: usize) -> Result<Expr, ParseError> {
        let mut left = self.logical_and(depth + 1)?;
        while self.eat(&TokenKind::OrOr) {
            let right = self.logical_and(depth + 1)?;
            left = Expr::Logical {
                op: LogicalOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn logical_and(&mut self, depth: usize) -> Result<Expr, ParseError> {
        let mut left = self.bit_or(depth + 1)?;
        while self.eat(&TokenKind::AndAnd) {
            let right = self.bit_or(depth + 1)?;
            left = Expr::Logical {
                op: LogicalOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn bit_or(&mut self, depth: usize) -> Result<Expr, ParseError> {
        let mut left = self.bit_xor(depth + 1)?;
        while self.eat(&TokenKind::BitOr) {
            let right = self.bit_xor(depth + 1)?;
            left = binary(BinaryOp::BitOr, left, right);
        }
        Ok(left)
    }

    fn bit_xor(&mut self, depth: usize) -> Result<Expr, ParseError> {
        let mut left = self.bit_and(depth + 1)?;
        while self.eat(&TokenKind::BitXor) {
            let right = self.bit_and(depth + 1)?;
            left = binary(BinaryOp::BitXor, left, right);
        }
        Ok(left)
    }

    fn bit_and(&mut self, depth: usize) -> Result<Expr, ParseError> {
        let mut left = self.equality(depth + 1)?;
        while self.eat(&TokenKind::BitAnd) {
            let right = self.equality(depth + 1)?;
            left = binary(BinaryOp::BitAnd, left, right);
        }
        Ok(left)
    }

    fn equality(&mut self, depth: usize) -> Result<Expr, ParseError> {
        let mut left = self.relational(depth + 1)?;
        loop {
            let op = match self.current().kind {
                TokenKind::EqEq => BinaryOp::Eq,
                TokenKind::EqEqEq => BinaryOp::StrictEq,
                TokenKind::NotEq => BinaryOp::NotEq,
                TokenKind::NotEqEq => BinaryOp::StrictNotEq,
                _ => break,
            };
            self.advance();
            let right = self.relational(depth + 1)?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn relational(&mut self, depth: usize) -> Result<Expr, ParseError> {
        let mut left = self.additive(depth + 1)?;
        loop {
            let op = match self.current().kind {
                TokenKind::Lt => BinaryOp::Lt,
                TokenKind::Gt => BinaryOp::Gt,
                TokenKind::Le => BinaryOp::Le,
                TokenKind::Ge => BinaryOp::Ge,
                _ => break,
            };
            self.advance();
            let right = self.additive(depth + 1)?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn additive(&mut self, depth: usize) -> Result<Expr, ParseError> {
        let mut left = self.multiplicative(depth + 1)?;
        loop {
            let op = match self.current().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.multiplicative(depth + 1)?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn multiplicative(&mut self, depth: usize) -> Result<Expr, ParseError> {
        let mut left = self.unary(depth + 1)?;
        loop {
            let op = match self.current().kind {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Rem,
                _ => break,
            };
            self.advance();
            let right = self.unary(depth + 1)?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn unary(&mut self, depth: usize) -> Result<Expr, ParseError> {
        self.check_depth(depth)?;
        let op = match self.current().kind {
            TokenKind::Not => UnaryOp::Not,
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Plus => UnaryOp::Plus,
            TokenKind::Typeof => UnaryOp::Typeof,
            _ => return self.postfix(depth),
        };
        self.advance();
        let operand = self.unary(depth + 1)?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn postfix(&mut self, depth: usize) -> Result<Expr, ParseError> {
        let expr = self.call_member(depth + 1)?;
        match self.current().kind {
            TokenKind::PlusPlus | TokenKind::MinusMinus
                if matches!(expr, Expr::Ident(_) | Expr::Member { .. } | Expr::Index { .. }) =>
            {
                let increment = self.current().kind == TokenKind::PlusPlus;
                self.advance();
                Ok(Expr::Postfix {
                    target: Box::new(expr),
                    increment,
                })
            }
            _ => Ok(expr),
        }
    }

    fn call_member(&mut self, depth: usize) -> Result<Expr, ParseError> {
        self.check_depth(depth)?;
        let mut expr = self.primary(depth + 1)?;
        loop {
            match self.current().kind {
                TokenKind::Dot => {
                    self.advance();
                    let property = self.expect_ident()?;
                    expr = Expr::Member {
                        object: Box::new(expr),
                        property,
                    };
                }
                TokenKind::LBracket => {
                    self.advance();
                    let index = self.expression(depth + 1)?;
                    self.expect(TokenKind::RBracket)?;
                    expr = Expr::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                    };
                }
                TokenKind::LParen => {
                    self.advance();
                    let args = self.arguments(depth)?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn arguments(&mut self, depth: usize) -> Result<Vec<Expr>, ParseError> {
        let mut args = Vec::new();
        if self.eat(&TokenKind::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.expression(depth + 1)?);
            if self.eat(&TokenKind::Comma) {
                continue;
            }
            self.expect(TokenKind::RParen)?;
            break;
        }
        Ok(args)
    }

    fn primary(&mut self, depth: usize) -> Result<Expr, ParseError> {
        self.check_depth(depth)?;
        let token = self.current().clone();
        match token.kind {
            TokenKind::Number(n) => {
                self.advance();
                Ok(Expr::Number(n))
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(Expr::Str(s))
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::Bool(true))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::Bool(false))
            }
            TokenKind::Null => {
                self.advance();
                Ok(Expr::Null)
            }
            TokenKind::Undefined => {
                self.advance();
                Ok(Expr::Undefined)
            }
            // `new X(...)` evaluates as a plain call of X.
            TokenKind::New => {
                self.advance();
                self.call_member(depth + 1)
            }
            TokenKind::Ident(name) => {
                // Single-parameter arrow: `x => body`.
                if self.peek_kind() == Some(&TokenKind::Arrow) {
                    self.advance();
                    self.advance();
                    return self.arrow_body(vec![name], depth);
                }
                self.advance();
                Ok(Expr::Ident(name))
            }
            TokenKind::LParen => {
                if let Some(params) = self.try_arrow_params() {
                    return self.arrow_body(params, depth);
                }
                self.advance();
                let expr = self.expression(depth + 1)?;
                self.expect(TokenKind::RParen)?;
                Ok(expr)
            }
            TokenKind::LBracket => {
                self.advance();
                let mut items = Vec::new();
                if !self.eat(&TokenKind::RBracket) {
                    loop {
                        items.push(self.expression(depth + 1)?);
                        if self.eat(&TokenKind::Comma) {
                            if self.current().kind == TokenKind::RBracket {
                                self.advance();
                                break;
                            }
                            continue;
                        }
                        self.expect(TokenKind::RBracket)?;
                        break;
                    }
                }
                Ok(Expr::Array(items))
            }
            TokenKind::LBrace => self.object_literal(depth),
            other => Err(ParseError {
                pos: token.pos,
                message: format!("unexpected token {:?}", other),
            }),
        }
    }

    fn object_literal(&mut self, depth: usize) -> Result<Expr, ParseError> {
        self.expect(TokenKind::LBrace)?;
        let mut entries = Vec::new();
        if self.eat(&TokenKind::RBrace) {
            return Ok(Expr::Object(entries));
        }
        loop {
            let key = match self.current().kind.clone() {
                TokenKind::Ident(name) => {
                    self.advance();
                    name
                }
                TokenKind::Str(s) => {
                    self.advance();
                    s
                }
                TokenKind::Number(n) => {
                    self.advance();
                    crate::value::format_number(n)
                }
                other => {
                    return Err(ParseError {
                        pos: self.current().pos,
                        message: format!("invalid object key {:?}", other),
                    })
                }
            };
            let value = if self.eat(&TokenKind::Colon) {
                self.expression(depth + 1)?
            } else {
                // Shorthand `{ a }`.
                Expr::Ident(key.clone())
            };
            entries.push((key, value));
            if self.eat(&TokenKind::Comma) {
                if self.current().kind == TokenKind::RBrace {
                    self.advance();
                    break;
                }
                continue;
            }
            self.expect(TokenKind::RBrace)?;
            break;
        }
        Ok(Expr::Object(entries))
    }

    /// Lookahead for `(a, b) =>` arrow parameter lists; restores position on
    /// failure.
    fn try_arrow_params(&mut self) -> Option<Vec<String>> {
        let saved = self.position;
        if !self.eat(&TokenKind::LParen) {
            return None;
        }
        let mut params = Vec::new();
        if !self.eat(&TokenKind::RParen) {
            loop {
                match self.current().kind.clone() {
                    TokenKind::Ident(name) => {
                        self.advance();
                        params.push(name);
                    }
                    _ => {
                        self.position = saved;
                        return None;
                    }
                }
                if self.eat(&TokenKind::Comma) {
                    continue;
                }
                if self.eat(&TokenKind::RParen) {
                    break;
                }
                self.position = saved;
                return None;
            }
        }
        if self.eat(&TokenKind::Arrow) {
            Some(params)
        } else {
            self.position = saved;
            None
        }
    }

    fn arrow_body(&mut self, params: Vec<String>, depth: usize) -> Result<Expr, ParseError> {
        let body = if self.current().kind == TokenKind::LBrace {
            ArrowBody::Block(self.block(depth + 1)?)
        } else {
            ArrowBody::Expr(self.expression(depth + 1)?)
        };
        Ok(Expr::Arrow(Rc::new(ArrowFn { params, body })))
    }

    fn current(&self) -> &Token {
        self.tokens
            .get(self.position)
            .unwrap_or(self.tokens.last().expect("token stream has EOF"))
    }

    fn peek_kind(&self) -> Option<&TokenKind> {
        self.tokens.get(self.position + 1).map(|t| &t.kind)
    }

    fn advance(&mut self) {
        if self.position < self.tokens.len() - 1 {
            self.position += 1;
        }
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if &self.current().kind == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<(), ParseError> {
        if self.current().kind == kind {
            self.advance();
            Ok(())
        } else {
            Err(ParseError {
                pos: self.current().pos,
                message: format!("expected {:?}, found {:?}", kind, self.current().kind),
            })
        }
    }

    fn expect_ident(&mut self) -> Result<String, ParseError> {
        match self.current().kind.clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Ok(name)
            }
            other => Err(ParseError {
                pos: self.current().pos,
                message: format!("expected identifier, found {:?}", other),
            }),
        }
    }

    fn check_depth(&self, depth: usize) -> Result<(), ParseError> {
        if depth > MAX_PARSER_DEPTH {
            return Err(ParseError {
                pos: self.current().pos,
                message: format!("maximum nesting depth ({}) exceeded", MAX_PARSER_DEPTH),
            });
        }
        Ok(())
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_output_assignment() {
        let stmts = parse("output.n = (inputs.a|0) + (inputs.b|0);").unwrap();
        assert_eq!(stmts.len(), 1);
        assert!(matches!(&stmts[0], Stmt::Expr(Expr::Assign { .. })));
    }

    #[test]
    fn parses_control_flow() {
        let stmts = parse(
            "let total = 0;\n\
             for (let i = 0; i < 10; i++) { total += i; }\n\
             while (false) { break; }\n\
             if (total > 40) { output.big = true; } else { output.big = false; }",
        )
        .unwrap();
        assert_eq!(stmts.len(), 4);
    }

    #[test]
    fn parses_arrow_functions() {
        let stmts = parse("let f = (a, b) => a + b; let g = x => { return x * 2; };").unwrap();
        assert_eq!(stmts.len(), 2);
        let stmts = parse("[1,2,3].map(n => n * 2)").unwrap();
        assert_eq!(stmts.len(), 1);
    }

    #[test]
    fn parses_object_and_array_literals() {
        let stmts = parse("return { a: 1, 'b': 2, c };").unwrap();
        assert!(matches!(&stmts[0], Stmt::Return(Some(Expr::Object(entries))) if entries.len() == 3));
        parse("let xs = [1, 'two', [3]];").unwrap();
    }

    #[test]
    fn rejects_bad_assignment_target() {
        assert!(parse("1 = 2;").is_err());
    }

    #[test]
    fn rejects_runaway_nesting() {
        let mut src = String::new();
        for _ in 0..300 {
            src.push('(');
        }
        src.push('1');
        for _ in 0..300 {
            src.push(')');
        }
        assert!(parse(&src).is_err());
    }

    #[test]
    fn new_expression_is_plain_call() {
        let stmts = parse("let d = new Date();").unwrap();
        assert!(matches!(
            &stmts[0],
            Stmt::Decl { init: Some(Expr::Call { .. }), .. }
        ));
    }
}
