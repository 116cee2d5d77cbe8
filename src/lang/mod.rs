// SPDX-License-Identifier: GPL-3.0-or-later
// This file is part of covenant.

//! Surface language: AST, scanners and the recursive-descent parser.

pub mod lexer;
pub mod parser;

use crate::error::{Pos, Result};
use crate::types::Type;
use crate::ImportResolver;

#[derive(Clone, Debug)]
pub struct Contract {
    pub name: String,
    pub params: Vec<Param>,
    pub value: ValueInfo,
    pub clauses: Vec<Clause>,
    pub pos: Pos,
}

#[derive(Clone, Debug)]
pub struct Param {
    pub name: String,
    pub ty: Type,
    pub pos: Pos,
}

/// The locked value: `locks <amount> of <asset>`. References to these names
/// compile to the AMOUNT and ASSET introspection opcodes.
#[derive(Clone, Debug)]
pub struct ValueInfo {
    pub amount: String,
    pub asset: String,
}

#[derive(Clone, Debug)]
pub struct Clause {
    pub name: String,
    pub params: Vec<Param>,
    pub statements: Vec<Statement>,
    pub pos: Pos,
}

#[derive(Clone, Debug)]
pub enum Statement {
    Verify {
        expr: Expr,
        pos: Pos,
    },
    Lock {
        amount: Expr,
        asset: Expr,
        program: Expr,
        pos: Pos,
    },
    Unlock {
        amount: Expr,
        asset: Expr,
        pos: Pos,
    },
    Define {
        param: Param,
        init: Option<Expr>,
        pos: Pos,
    },
    Assign {
        name: String,
        expr: Expr,
        pos: Pos,
    },
    If {
        cond: Expr,
        then_body: Vec<Statement>,
        else_body: Option<Vec<Statement>>,
        pos: Pos,
    },
}

#[derive(Clone, Debug)]
pub struct Expr {
    pub kind: ExprKind,
    pub pos: Pos,
}

#[derive(Clone, Debug)]
pub enum ExprKind {
    Var(String),
    Int(i64),
    Bool(bool),
    Bytes(Vec<u8>),
    List(Vec<Expr>),
    Call { func: Box<Expr>, args: Vec<Expr> },
    Unary { op: UnaryOp, operand: Box<Expr> },
    Binary { op: BinaryOp, left: Box<Expr>, right: Box<Expr> },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Mul,
    Div,
    Mod,
    Add,
    Sub,
    Less,
    LessEq,
    Greater,
    GreaterEq,
    Eq,
    NotEq,
    And,
    Or,
}

impl Expr {
    /// Bare variable name, if this expression is one.
    pub fn as_var(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Var(name) => Some(name),
            _ => None,
        }
    }
}

/// Structural equality, ignoring positions. Used by the value-balance check
/// to recognize `lock x ...` paired with `lock billAmount - x ...`.
pub fn same_shape(a: &Expr, b: &Expr) -> bool {
    match (&a.kind, &b.kind) {
        (ExprKind::Var(x), ExprKind::Var(y)) => x == y,
        (ExprKind::Int(x), ExprKind::Int(y)) => x == y,
        (ExprKind::Bool(x), ExprKind::Bool(y)) => x == y,
        (ExprKind::Bytes(x), ExprKind::Bytes(y)) => x == y,
        (ExprKind::List(x), ExprKind::List(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| same_shape(a, b))
        }
        (
            ExprKind::Call { func: fa, args: aa },
            ExprKind::Call { func: fb, args: ab },
        ) => {
            same_shape(fa, fb)
                && aa.len() == ab.len()
                && aa.iter().zip(ab).all(|(a, b)| same_shape(a, b))
        }
        (
            ExprKind::Unary { op: oa, operand: ea },
            ExprKind::Unary { op: ob, operand: eb },
        ) => oa == ob && same_shape(ea, eb),
        (
            ExprKind::Binary { op: oa, left: la, right: ra },
            ExprKind::Binary { op: ob, left: lb, right: rb },
        ) => oa == ob && same_shape(la, lb) && same_shape(ra, rb),
        _ => false,
    }
}

/// Parse a compilation unit, resolving `import` directives through
/// `resolver`. Imported contracts come first, in import order.
pub fn parse(src: &[u8], resolver: &mut dyn ImportResolver) -> Result<Vec<Contract>> {
    let mut chain = Vec::new();
    parser::parse_unit(src, resolver, &mut chain)
}
