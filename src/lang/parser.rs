// SPDX-License-Identifier: GPL-3.0-or-later
// This file is part of covenant.

//! Recursive-descent parser with precedence climbing for expressions.
//!
//! Nonterminals advance a `(buf, pos)` cursor; terminals are the scanners in
//! [`super::lexer`]. Errors abort the compilation and point at the cursor.

use super::lexer::{
    scan_binary_op, scan_bool_literal, scan_bytes_literal, scan_identifier, scan_int_literal,
    scan_keyword, scan_str_literal, scan_tok, scan_unary_op, skip_ws_and_comments,
};
use super::{Clause, Contract, Expr, ExprKind, Param, Statement, ValueInfo};
use crate::error::{Error, ErrorKind, Pos, Result};
use crate::ImportResolver;

pub struct Parser<'a> {
    pub buf: &'a [u8],
    pub pos: usize,
}

impl<'a> Parser<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Parser { buf, pos: 0 }
    }

    fn err(&self, message: impl Into<String>) -> Error {
        Error::at(ErrorKind::Parse, self.buf, self.pos, message)
    }

    /// Position of the next token, with whitespace and comments skipped.
    fn here(&self) -> Pos {
        Pos::of(self.buf, skip_ws_and_comments(self.buf, self.pos))
    }

    fn peek_keyword(&self) -> Option<String> {
        scan_identifier(self.buf, self.pos).map(|(id, _)| id)
    }

    fn peek_tok(&self, tok: &str) -> bool {
        scan_tok(self.buf, self.pos, tok).is_some()
    }

    fn consume_keyword(&mut self, keyword: &str) -> Result<()> {
        match scan_keyword(self.buf, self.pos, keyword) {
            Some(new_pos) => {
                self.pos = new_pos;
                Ok(())
            }
            None => Err(self.err(format!("expected keyword {keyword}"))),
        }
    }

    fn consume_identifier(&mut self) -> Result<(String, Pos)> {
        let at = self.here();
        match scan_identifier(self.buf, self.pos) {
            Some((name, new_pos)) => {
                self.pos = new_pos;
                Ok((name, at))
            }
            None => Err(self.err("expected identifier")),
        }
    }

    fn consume_tok(&mut self, tok: &str) -> Result<()> {
        match scan_tok(self.buf, self.pos, tok) {
            Some(new_pos) => {
                self.pos = new_pos;
                Ok(())
            }
            None => Err(self.err(format!("expected {tok} token"))),
        }
    }

    // contract name(params) locks amount of asset { clauses }
    fn parse_contract(&mut self) -> Result<Contract> {
        let pos = self.here();
        self.consume_keyword("contract")?;
        let (name, _) = self.consume_identifier()?;
        let params = self.parse_params()?;
        self.consume_keyword("locks")?;
        let (amount, _) = self.consume_identifier()?;
        self.consume_keyword("of")?;
        let (asset, _) = self.consume_identifier()?;
        self.consume_tok("{")?;
        let mut clauses = Vec::new();
        while !self.peek_tok("}") {
            clauses.push(self.parse_clause()?);
        }
        self.consume_tok("}")?;
        Ok(Contract {
            name,
            params,
            value: ValueInfo { amount, asset },
            clauses,
            pos,
        })
    }

    // (a, b: T, c: U)
    fn parse_params(&mut self) -> Result<Vec<Param>> {
        let mut params = Vec::new();
        self.consume_tok("(")?;
        let mut first = true;
        while !self.peek_tok(")") {
            if first {
                first = false;
            } else {
                self.consume_tok(",")?;
            }
            self.parse_params_type(&mut params)?;
        }
        self.consume_tok(")")?;
        Ok(params)
    }

    // one or more names sharing a type: a, b: Integer
    fn parse_params_type(&mut self, params: &mut Vec<Param>) -> Result<()> {
        let start = params.len();
        let (name, pos) = self.consume_identifier()?;
        params.push(Param {
            name,
            ty: crate::types::Type::Integer,
            pos,
        });
        while self.peek_tok(",") {
            self.consume_tok(",")?;
            let (name, pos) = self.consume_identifier()?;
            params.push(Param {
                name,
                ty: crate::types::Type::Integer,
                pos,
            });
        }
        self.consume_tok(":")?;
        let (type_name, _) = self.consume_identifier()?;
        let ty = crate::types::lookup(&type_name)
            .ok_or_else(|| self.err(format!("unknown type {type_name}")))?;
        for p in &mut params[start..] {
            p.ty = ty;
        }
        Ok(())
    }

    fn parse_clause(&mut self) -> Result<Clause> {
        let pos = self.here();
        self.consume_keyword("clause")?;
        let (name, _) = self.consume_identifier()?;
        let params = self.parse_params()?;
        self.consume_tok("{")?;
        let statements = self.parse_statements()?;
        self.consume_tok("}")?;
        Ok(Clause {
            name,
            params,
            statements,
            pos,
        })
    }

    fn parse_statements(&mut self) -> Result<Vec<Statement>> {
        let mut statements = Vec::new();
        while !self.peek_tok("}") {
            statements.push(self.parse_statement()?);
        }
        Ok(statements)
    }

    fn parse_statement(&mut self) -> Result<Statement> {
        match self.peek_keyword().as_deref() {
            Some("if") => self.parse_if_stmt(),
            Some("define") => self.parse_define_stmt(),
            Some("assign") => self.parse_assign_stmt(),
            Some("verify") => self.parse_verify_stmt(),
            Some("lock") => self.parse_lock_stmt(),
            Some("unlock") => self.parse_unlock_stmt(),
            other => Err(self.err(format!(
                "unknown keyword \"{}\"",
                other.unwrap_or_default()
            ))),
        }
    }

    fn parse_if_stmt(&mut self) -> Result<Statement> {
        let pos = self.here();
        self.consume_keyword("if")?;
        let cond = self.parse_expr()?;
        self.consume_tok("{")?;
        let then_body = self.parse_statements()?;
        self.consume_tok("}")?;
        let else_body = if self.peek_keyword().as_deref() == Some("else") {
            self.consume_keyword("else")?;
            self.consume_tok("{")?;
            let body = self.parse_statements()?;
            self.consume_tok("}")?;
            Some(body)
        } else {
            None
        };
        Ok(Statement::If {
            cond,
            then_body,
            else_body,
            pos,
        })
    }

    fn parse_define_stmt(&mut self) -> Result<Statement> {
        let pos = self.here();
        self.consume_keyword("define")?;
        let (name, name_pos) = self.consume_identifier()?;
        self.consume_tok(":")?;
        let (type_name, _) = self.consume_identifier()?;
        let ty = crate::types::lookup(&type_name)
            .ok_or_else(|| self.err(format!("unknown type {type_name}")))?;
        let init = if self.peek_tok("=") {
            self.consume_tok("=")?;
            Some(self.parse_expr()?)
        } else {
            None
        };
        Ok(Statement::Define {
            param: Param {
                name,
                ty,
                pos: name_pos,
            },
            init,
            pos,
        })
    }

    fn parse_assign_stmt(&mut self) -> Result<Statement> {
        let pos = self.here();
        self.consume_keyword("assign")?;
        let (name, _) = self.consume_identifier()?;
        self.consume_tok("=")?;
        let expr = self.parse_expr()?;
        Ok(Statement::Assign { name, expr, pos })
    }

    fn parse_verify_stmt(&mut self) -> Result<Statement> {
        let pos = self.here();
        self.consume_keyword("verify")?;
        let expr = self.parse_expr()?;
        Ok(Statement::Verify { expr, pos })
    }

    fn parse_lock_stmt(&mut self) -> Result<Statement> {
        let pos = self.here();
        self.consume_keyword("lock")?;
        let amount = self.parse_expr()?;
        self.consume_keyword("of")?;
        let asset = self.parse_expr()?;
        self.consume_keyword("with")?;
        let program = self.parse_expr()?;
        Ok(Statement::Lock {
            amount,
            asset,
            program,
            pos,
        })
    }

    fn parse_unlock_stmt(&mut self) -> Result<Statement> {
        let pos = self.here();
        self.consume_keyword("unlock")?;
        let amount = self.parse_expr()?;
        self.consume_keyword("of")?;
        let asset = self.parse_expr()?;
        Ok(Statement::Unlock { amount, asset, pos })
    }

    // Precedence climbing:
    // <https://en.wikipedia.org/wiki/Operator-precedence_parser#Precedence_climbing_method>
    pub fn parse_expr(&mut self) -> Result<Expr> {
        let lhs = self.parse_unary_expr()?;
        self.parse_expr_cont(lhs, 0)
    }

    fn parse_expr_cont(&mut self, mut lhs: Expr, min_precedence: u8) -> Result<Expr> {
        loop {
            let Some((op, new_pos)) = scan_binary_op(self.buf, self.pos) else {
                break;
            };
            if op.precedence < min_precedence {
                break;
            }
            self.pos = new_pos;

            let mut rhs = self.parse_unary_expr()?;
            loop {
                let Some((op2, _)) = scan_binary_op(self.buf, self.pos) else {
                    break;
                };
                let climbs = if op2.right_assoc {
                    op2.precedence >= op.precedence
                } else {
                    op2.precedence > op.precedence
                };
                if !climbs {
                    break;
                }
                rhs = self.parse_expr_cont(rhs, op2.precedence)?;
            }
            let pos = lhs.pos;
            lhs = Expr {
                kind: ExprKind::Binary {
                    op: op.kind,
                    left: Box::new(lhs),
                    right: Box::new(rhs),
                },
                pos,
            };
        }
        Ok(lhs)
    }

    fn parse_unary_expr(&mut self) -> Result<Expr> {
        let pos = self.here();
        let Some((op, new_pos)) = scan_unary_op(self.buf, self.pos) else {
            return self.parse_literal_or_primary();
        };
        self.pos = new_pos;
        let operand = self.parse_unary_expr()?;
        Ok(Expr {
            kind: ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            pos,
        })
    }

    fn parse_literal_or_primary(&mut self) -> Result<Expr> {
        let pos = self.here();
        if let Some((n, new_pos)) = scan_int_literal(self.buf, self.pos)? {
            self.pos = new_pos;
            return Ok(Expr {
                kind: ExprKind::Int(n),
                pos,
            });
        }
        if let Some((bytes, new_pos)) = scan_str_literal(self.buf, self.pos)? {
            self.pos = new_pos;
            return Ok(Expr {
                kind: ExprKind::Bytes(bytes),
                pos,
            });
        }
        if let Some((bytes, new_pos)) = scan_bytes_literal(self.buf, self.pos)? {
            self.pos = new_pos;
            return Ok(Expr {
                kind: ExprKind::Bytes(bytes),
                pos,
            });
        }
        if let Some((b, new_pos)) = scan_bool_literal(self.buf, self.pos) {
            self.pos = new_pos;
            return Ok(Expr {
                kind: ExprKind::Bool(b),
                pos,
            });
        }
        self.parse_call_or_primary()
    }

    // a primary, optionally followed by a call argument list
    fn parse_call_or_primary(&mut self) -> Result<Expr> {
        let pos = self.here();
        let e = self.parse_primary()?;
        if self.peek_tok("(") {
            let args = self.parse_args()?;
            return Ok(Expr {
                kind: ExprKind::Call {
                    func: Box::new(e),
                    args,
                },
                pos,
            });
        }
        Ok(e)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let pos = self.here();
        if self.peek_tok("(") {
            self.consume_tok("(")?;
            let e = self.parse_expr()?;
            self.consume_tok(")")?;
            return Ok(e);
        }
        if self.peek_tok("[") {
            self.consume_tok("[")?;
            let mut elements = Vec::new();
            let mut first = true;
            while !self.peek_tok("]") {
                if first {
                    first = false;
                } else {
                    self.consume_tok(",")?;
                }
                elements.push(self.parse_expr()?);
            }
            self.consume_tok("]")?;
            return Ok(Expr {
                kind: ExprKind::List(elements),
                pos,
            });
        }
        let (name, at) = self.consume_identifier()?;
        Ok(Expr {
            kind: ExprKind::Var(name),
            pos: at,
        })
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>> {
        let mut args = Vec::new();
        self.consume_tok("(")?;
        let mut first = true;
        while !self.peek_tok(")") {
            if first {
                first = false;
            } else {
                self.consume_tok(",")?;
            }
            args.push(self.parse_expr()?);
        }
        self.consume_tok(")")?;
        Ok(args)
    }
}

/// Parse one source buffer: leading `import` directives, then contracts.
/// Contracts from imports are prepended in import order. `chain` carries the
/// import paths currently being resolved, for cycle detection.
pub fn parse_unit(
    buf: &[u8],
    resolver: &mut dyn ImportResolver,
    chain: &mut Vec<String>,
) -> Result<Vec<Contract>> {
    let mut p = Parser::new(buf);
    let mut contracts = parse_imports(&mut p, resolver, chain)?;

    if scan_keyword(p.buf, p.pos, "contract").is_none() {
        return Err(Error::at(
            ErrorKind::Parse,
            p.buf,
            p.pos,
            "expected contract",
        ));
    }
    while p.peek_keyword().as_deref() == Some("contract") {
        contracts.push(p.parse_contract()?);
    }
    Ok(contracts)
}

fn parse_imports(
    p: &mut Parser,
    resolver: &mut dyn ImportResolver,
    chain: &mut Vec<String>,
) -> Result<Vec<Contract>> {
    let mut imported = Vec::new();
    while p.peek_keyword().as_deref() == Some("import") {
        p.consume_keyword("import")?;
        let at = skip_ws_and_comments(p.buf, p.pos);
        let Some((path_bytes, new_pos)) = scan_str_literal(p.buf, p.pos)? else {
            return Err(p.err("expected import path string"));
        };
        p.pos = new_pos;
        let path = String::from_utf8(path_bytes).map_err(|_| {
            Error::at(ErrorKind::Import, p.buf, at, "import path is not valid UTF-8")
        })?;
        if chain.contains(&path) {
            return Err(Error::at(
                ErrorKind::Import,
                p.buf,
                at,
                format!("cyclic import of \"{path}\""),
            ));
        }
        let src = resolver.resolve(&path).map_err(|e| {
            Error::at(
                ErrorKind::Import,
                p.buf,
                at,
                format!("cannot resolve import \"{path}\": {e}"),
            )
        })?;
        chain.push(path);
        let sub = parse_unit(&src, resolver, chain)?;
        chain.pop();
        imported.extend(sub);
    }
    Ok(imported)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::{BinaryOp, ExprKind};
    use crate::NoImports;

    fn parse_one(src: &str) -> Contract {
        let mut chain = Vec::new();
        let mut contracts = parse_unit(src.as_bytes(), &mut NoImports, &mut chain).unwrap();
        assert_eq!(contracts.len(), 1);
        contracts.pop().unwrap()
    }

    fn parse_expr(src: &str) -> Expr {
        let mut p = Parser::new(src.as_bytes());
        p.parse_expr().unwrap()
    }

    #[test]
    fn contract_shape() {
        let c = parse_one(
            "contract T(a: Amount, k: PublicKey) locks billAmount of billAsset {
               clause spend(sig: Signature) {
                 verify checkTxSig(k, sig)
                 unlock billAmount of billAsset
               }
             }",
        );
        assert_eq!(c.name, "T");
        assert_eq!(c.params.len(), 2);
        assert_eq!(c.value.amount, "billAmount");
        assert_eq!(c.value.asset, "billAsset");
        assert_eq!(c.clauses.len(), 1);
        assert_eq!(c.clauses[0].params.len(), 1);
        assert_eq!(c.clauses[0].statements.len(), 2);
    }

    #[test]
    fn shared_type_param_groups() {
        let c = parse_one(
            "contract T(a, b: Amount, p: Program) locks v of w {
               clause x() { unlock v of w }
             }",
        );
        let tys: Vec<_> = c.params.iter().map(|p| p.ty.name()).collect();
        assert_eq!(tys, ["Amount", "Amount", "Program"]);
    }

    #[test]
    fn precedence_and_associativity() {
        let e = parse_expr("1 + 2 * 3");
        let ExprKind::Binary { op, right, .. } = &e.kind else {
            panic!("not a binary expr");
        };
        assert_eq!(*op, BinaryOp::Add);
        assert!(matches!(
            right.kind,
            ExprKind::Binary {
                op: BinaryOp::Mul,
                ..
            }
        ));

        // && binds tighter than || and looser than comparison
        let e = parse_expr("a < b && c || d");
        let ExprKind::Binary { op, .. } = &e.kind else {
            panic!()
        };
        assert_eq!(*op, BinaryOp::Or);
    }

    #[test]
    fn left_associative_sub() {
        let e = parse_expr("a - b - c");
        let ExprKind::Binary { op, left, .. } = &e.kind else {
            panic!()
        };
        assert_eq!(*op, BinaryOp::Sub);
        assert!(matches!(
            left.kind,
            ExprKind::Binary {
                op: BinaryOp::Sub,
                ..
            }
        ));
    }

    #[test]
    fn subtraction_of_a_literal_is_binary() {
        let e = parse_expr("a -3");
        assert!(matches!(
            e.kind,
            ExprKind::Binary {
                op: BinaryOp::Sub,
                ..
            }
        ));
        // while a lone -3 is a single literal
        let e = parse_expr("-3");
        assert!(matches!(e.kind, ExprKind::Int(-3)));
    }

    #[test]
    fn calls_and_lists() {
        let e = parse_expr("checkTxMultiSig([a, b], [s])");
        let ExprKind::Call { func, args } = &e.kind else {
            panic!()
        };
        assert_eq!(func.as_var(), Some("checkTxMultiSig"));
        assert_eq!(args.len(), 2);
        assert!(matches!(&args[0].kind, ExprKind::List(v) if v.len() == 2));
    }

    #[test]
    fn unknown_statement_keyword() {
        let mut chain = Vec::new();
        let err = parse_unit(
            b"contract T() locks a of b { clause c() { spend a } }",
            &mut NoImports,
            &mut chain,
        )
        .unwrap_err();
        assert!(err.message.contains("unknown keyword \"spend\""), "{err}");
    }

    #[test]
    fn missing_contract() {
        let mut chain = Vec::new();
        let err = parse_unit(b"clause x() {}", &mut NoImports, &mut chain).unwrap_err();
        assert_eq!(err.to_string(), "line 1, col 0: expected contract");
    }

    #[test]
    fn missing_import_is_an_import_error() {
        let mut chain = Vec::new();
        let err = parse_unit(
            b"import \"./Nope\"\ncontract T() locks a of b {}",
            &mut NoImports,
            &mut chain,
        )
        .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Import);
        assert!(err.message.contains("./Nope"));
    }
}
