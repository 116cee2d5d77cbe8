// SPDX-License-Identifier: GPL-3.0-or-later
// This file is part of covenant.

//! Binder and semantic checker.
//!
//! Runs after parsing and before code generation, so the generator can
//! assume well-formed input. A scope frame is pushed per clause body and per
//! `if` arm; identifier resolution walks frames innermost first, then the
//! contract parameters, the locked value names, contract names (earlier in
//! the unit, or the contract itself as a call target), and finally builtins.

use std::collections::BTreeSet;

use crate::error::{Error, ErrorKind, Pos, Result};
use crate::lang::{same_shape, BinaryOp, Clause, Contract, Expr, ExprKind, Statement, UnaryOp};
use crate::types::{self, Type};

pub fn check_unit(contracts: &[Contract]) -> Result<()> {
    for (i, c) in contracts.iter().enumerate() {
        if contracts[..i].iter().any(|p| p.name == c.name) {
            return Err(Error::new(
                ErrorKind::Semantic,
                c.pos,
                format!("duplicate contract {}", c.name),
            ));
        }
        Checker {
            contract: c,
            visible: &contracts[..i],
        }
        .check()?;
    }
    Ok(())
}

enum Binding<'a> {
    Entry { ty: Type, local: bool },
    ValueAmount,
    ValueAsset,
    ContractRef { is_self: bool },
    Builtin(&'a types::Builtin),
}

struct Frame {
    names: Vec<(String, Type, bool)>, // name, type, introduced by define
}

struct Checker<'a> {
    contract: &'a Contract,
    visible: &'a [Contract], // contracts declared earlier in the unit
}

struct ClauseScope {
    frames: Vec<Frame>,
    unassigned: BTreeSet<String>,
}

impl<'a> Checker<'a> {
    fn check(&self) -> Result<()> {
        let c = self.contract;
        if c.clauses.is_empty() {
            return Err(Error::new(
                ErrorKind::Semantic,
                c.pos,
                format!("contract {} has no clauses", c.name),
            ));
        }

        let mut scope = ClauseScope {
            frames: vec![Frame { names: Vec::new() }],
            unassigned: BTreeSet::new(),
        };
        for p in &c.params {
            self.declare(&mut scope, &p.name, p.ty, false, p.pos)?;
        }

        for (i, clause) in c.clauses.iter().enumerate() {
            if c.clauses[..i].iter().any(|prev| prev.name == clause.name) {
                return Err(Error::new(
                    ErrorKind::Semantic,
                    clause.pos,
                    format!("duplicate clause {}", clause.name),
                ));
            }
            scope.frames.push(Frame { names: Vec::new() });
            for p in &clause.params {
                self.declare(&mut scope, &p.name, p.ty, false, p.pos)?;
            }
            self.check_statements(&clause.statements, &mut scope)?;
            self.check_balance(clause)?;
            scope.frames.pop();
            scope.unassigned.clear();
        }
        Ok(())
    }

    // Shadowing is forbidden: a declaration may not reuse any name visible
    // in an enclosing frame, nor the locked value names.
    fn declare(
        &self,
        scope: &mut ClauseScope,
        name: &str,
        ty: Type,
        local: bool,
        pos: Pos,
    ) -> Result<()> {
        let value = &self.contract.value;
        let taken = name == value.amount
            || name == value.asset
            || scope
                .frames
                .iter()
                .any(|f| f.names.iter().any(|(n, _, _)| n == name));
        if taken {
            return Err(Error::new(
                ErrorKind::Semantic,
                pos,
                format!("duplicate name {name} in scope"),
            ));
        }
        scope
            .frames
            .last_mut()
            .expect("at least one frame")
            .names
            .push((name.to_string(), ty, local));
        Ok(())
    }

    fn resolve(&self, scope: &ClauseScope, name: &str) -> Option<Binding<'a>> {
        for frame in scope.frames.iter().rev() {
            if let Some((_, ty, local)) = frame.names.iter().find(|(n, _, _)| n == name) {
                return Some(Binding::Entry {
                    ty: *ty,
                    local: *local,
                });
            }
        }
        if name == self.contract.value.amount {
            return Some(Binding::ValueAmount);
        }
        if name == self.contract.value.asset {
            return Some(Binding::ValueAsset);
        }
        if name == self.contract.name {
            return Some(Binding::ContractRef { is_self: true });
        }
        if self.visible.iter().any(|c| c.name == name) {
            return Some(Binding::ContractRef { is_self: false });
        }
        types::builtin(name).map(Binding::Builtin)
    }

    fn check_statements(&self, stmts: &[Statement], scope: &mut ClauseScope) -> Result<()> {
        for stmt in stmts {
            self.check_statement(stmt, scope)?;
        }
        Ok(())
    }

    fn check_statement(&self, stmt: &Statement, scope: &mut ClauseScope) -> Result<()> {
        match stmt {
            Statement::Verify { expr, pos } => {
                let ty = self.type_of(expr, scope, false)?;
                if ty != Type::Boolean {
                    return Err(Error::new(
                        ErrorKind::Semantic,
                        *pos,
                        format!("verify expression must be Boolean, not {}", ty.name()),
                    ));
                }
            }
            Statement::Lock {
                amount,
                asset,
                program,
                pos,
            } => {
                let t = self.type_of(amount, scope, false)?;
                if !types::compatible(Type::Amount, t) {
                    return Err(Error::new(
                        ErrorKind::Semantic,
                        *pos,
                        format!("lock amount must be an Amount, not {}", t.name()),
                    ));
                }
                let t = self.type_of(asset, scope, false)?;
                if !types::compatible(Type::Asset, t) {
                    return Err(Error::new(
                        ErrorKind::Semantic,
                        *pos,
                        format!("lock asset must be an Asset, not {}", t.name()),
                    ));
                }
                let t = self.type_of(program, scope, true)?;
                if !types::compatible(Type::Program, t) {
                    return Err(Error::new(
                        ErrorKind::Semantic,
                        *pos,
                        format!("lock program must be a Program, not {}", t.name()),
                    ));
                }
            }
            Statement::Unlock { amount, asset, pos } => {
                let value = &self.contract.value;
                if amount.as_var() != Some(value.amount.as_str())
                    || asset.as_var() != Some(value.asset.as_str())
                {
                    return Err(Error::new(
                        ErrorKind::Semantic,
                        *pos,
                        format!(
                            "unlock must release {} of {} exactly",
                            value.amount, value.asset
                        ),
                    ));
                }
            }
            Statement::Define { param, init, .. } => {
                if let Some(init) = init {
                    let t = self.type_of(init, scope, false)?;
                    if !types::compatible(param.ty, t) {
                        return Err(Error::new(
                            ErrorKind::Semantic,
                            param.pos,
                            format!(
                                "cannot initialize {} of type {} with {}",
                                param.name,
                                param.ty.name(),
                                t.name()
                            ),
                        ));
                    }
                }
                self.declare(scope, &param.name, param.ty, true, param.pos)?;
                if init.is_none() {
                    scope.unassigned.insert(param.name.clone());
                }
            }
            Statement::Assign { name, expr, pos } => {
                let t = self.type_of(expr, scope, false)?;
                match self.resolve(scope, name) {
                    Some(Binding::Entry { ty, local: true }) => {
                        if !types::compatible(ty, t) {
                            return Err(Error::new(
                                ErrorKind::Semantic,
                                *pos,
                                format!(
                                    "cannot assign {} to {} of type {}",
                                    t.name(),
                                    name,
                                    ty.name()
                                ),
                            ));
                        }
                        scope.unassigned.remove(name);
                    }
                    Some(_) => {
                        return Err(Error::new(
                            ErrorKind::Semantic,
                            *pos,
                            format!("cannot assign to {name}"),
                        ));
                    }
                    None => {
                        return Err(Error::new(
                            ErrorKind::Semantic,
                            *pos,
                            format!("unknown identifier {name}"),
                        ));
                    }
                }
            }
            Statement::If {
                cond,
                then_body,
                else_body,
                pos,
            } => {
                let ty = self.type_of(cond, scope, false)?;
                if ty != Type::Boolean {
                    return Err(Error::new(
                        ErrorKind::Semantic,
                        *pos,
                        format!("if condition must be Boolean, not {}", ty.name()),
                    ));
                }
                let entry_unassigned = scope.unassigned.clone();

                scope.frames.push(Frame { names: Vec::new() });
                self.check_statements(then_body, scope)?;
                scope.frames.pop();
                let after_then = scope.unassigned.clone();

                scope.unassigned = entry_unassigned;
                if let Some(else_body) = else_body {
                    scope.frames.push(Frame { names: Vec::new() });
                    self.check_statements(else_body, scope)?;
                    scope.frames.pop();
                }
                // assigned on every path = assigned in both arms
                let after_else = scope.unassigned.clone();
                scope.unassigned = after_then.union(&after_else).cloned().collect();
            }
        }
        Ok(())
    }

    fn type_of(&self, expr: &Expr, scope: &ClauseScope, allow_contract_call: bool) -> Result<Type> {
        match &expr.kind {
            ExprKind::Var(name) => match self.resolve(scope, name) {
                Some(Binding::Entry { ty, .. }) => {
                    if scope.unassigned.contains(name) {
                        return Err(Error::new(
                            ErrorKind::Semantic,
                            expr.pos,
                            format!("use of {name} before assignment"),
                        ));
                    }
                    Ok(ty)
                }
                Some(Binding::ValueAmount) => Ok(Type::Amount),
                Some(Binding::ValueAsset) => Ok(Type::Asset),
                Some(Binding::ContractRef { is_self }) => {
                    if is_self {
                        return Err(Error::new(
                            ErrorKind::Semantic,
                            expr.pos,
                            format!("contract {name} cannot reference its own program"),
                        ));
                    }
                    Ok(Type::Program)
                }
                Some(Binding::Builtin(_)) => Err(Error::new(
                    ErrorKind::Semantic,
                    expr.pos,
                    format!("{name} is a function, not a value"),
                )),
                None => Err(Error::new(
                    ErrorKind::Semantic,
                    expr.pos,
                    format!("unknown identifier {name}"),
                )),
            },
            ExprKind::Int(_) => Ok(Type::Integer),
            ExprKind::Bool(_) => Ok(Type::Boolean),
            ExprKind::Bytes(_) => Ok(Type::Str),
            ExprKind::List(_) => Err(Error::new(
                ErrorKind::Semantic,
                expr.pos,
                "list literal is only valid as a checkTxMultiSig argument",
            )),
            ExprKind::Unary { op, operand } => {
                let t = self.type_of(operand, scope, false)?;
                match op {
                    UnaryOp::Neg if t.is_numeric() => Ok(Type::Integer),
                    UnaryOp::Not if t == Type::Boolean => Ok(Type::Boolean),
                    UnaryOp::Neg => Err(Error::new(
                        ErrorKind::Semantic,
                        expr.pos,
                        format!("cannot negate {}", t.name()),
                    )),
                    UnaryOp::Not => Err(Error::new(
                        ErrorKind::Semantic,
                        expr.pos,
                        format!("cannot apply ! to {}", t.name()),
                    )),
                }
            }
            ExprKind::Binary { op, left, right } => {
                let lt = self.type_of(left, scope, false)?;
                let rt = self.type_of(right, scope, false)?;
                self.binary_type(*op, lt, rt, expr.pos)
            }
            ExprKind::Call { func, args } => {
                let Some(name) = func.as_var() else {
                    return Err(Error::new(
                        ErrorKind::Semantic,
                        expr.pos,
                        "only named functions and contracts can be called",
                    ));
                };
                match self.resolve(scope, name) {
                    Some(Binding::Builtin(b)) => self.check_builtin_call(b, args, scope, expr.pos),
                    Some(Binding::ContractRef { .. }) => {
                        if !allow_contract_call {
                            return Err(Error::new(
                                ErrorKind::Semantic,
                                expr.pos,
                                format!("contract {name} may only be called as a lock program"),
                            ));
                        }
                        // The call-site argument list is deliberately not
                        // checked against the callee's declaration; the VM
                        // pattern tolerates it and deployed sources rely on
                        // it. Arguments still have to be well-formed.
                        for a in args {
                            self.type_of(a, scope, false)?;
                        }
                        Ok(Type::Program)
                    }
                    Some(_) => Err(Error::new(
                        ErrorKind::Semantic,
                        expr.pos,
                        format!("{name} is not a function"),
                    )),
                    None => Err(Error::new(
                        ErrorKind::Semantic,
                        expr.pos,
                        format!("unknown identifier {name}"),
                    )),
                }
            }
        }
    }

    fn binary_type(&self, op: BinaryOp, lt: Type, rt: Type, pos: Pos) -> Result<Type> {
        use BinaryOp::*;
        let err = |msg: String| Err(Error::new(ErrorKind::Semantic, pos, msg));
        match op {
            Mul | Div | Mod | Add | Sub => {
                if lt.is_numeric() && rt.is_numeric() {
                    Ok(Type::Integer)
                } else {
                    err(format!(
                        "arithmetic needs numeric operands, got {} and {}",
                        lt.name(),
                        rt.name()
                    ))
                }
            }
            Less | LessEq | Greater | GreaterEq => {
                if lt.is_numeric() && rt.is_numeric() {
                    Ok(Type::Boolean)
                } else {
                    err(format!(
                        "comparison needs numeric operands, got {} and {}",
                        lt.name(),
                        rt.name()
                    ))
                }
            }
            Eq | NotEq => {
                if types::compatible(lt, rt) || types::compatible(rt, lt) {
                    Ok(Type::Boolean)
                } else {
                    err(format!("cannot compare {} with {}", lt.name(), rt.name()))
                }
            }
            And | Or => {
                if lt == Type::Boolean && rt == Type::Boolean {
                    Ok(Type::Boolean)
                } else {
                    err(format!(
                        "boolean operator needs Boolean operands, got {} and {}",
                        lt.name(),
                        rt.name()
                    ))
                }
            }
        }
    }

    fn check_builtin_call(
        &self,
        b: &types::Builtin,
        args: &[Expr],
        scope: &ClauseScope,
        pos: Pos,
    ) -> Result<Type> {
        if b.name == "checkTxMultiSig" {
            let (keys, sigs) = match args {
                [k, s] => (k, s),
                _ => {
                    return Err(Error::new(
                        ErrorKind::Semantic,
                        pos,
                        "checkTxMultiSig takes a key list and a signature list",
                    ));
                }
            };
            for (list, elem_ty) in [(keys, Type::PublicKey), (sigs, Type::Signature)] {
                let ExprKind::List(elements) = &list.kind else {
                    return Err(Error::new(
                        ErrorKind::Semantic,
                        list.pos,
                        "checkTxMultiSig arguments must be list literals",
                    ));
                };
                if elements.is_empty() {
                    return Err(Error::new(
                        ErrorKind::Semantic,
                        list.pos,
                        "checkTxMultiSig lists must not be empty",
                    ));
                }
                for e in elements {
                    let t = self.type_of(e, scope, false)?;
                    if !types::compatible(elem_ty, t) {
                        return Err(Error::new(
                            ErrorKind::Semantic,
                            e.pos,
                            format!("expected {}, got {}", elem_ty.name(), t.name()),
                        ));
                    }
                }
            }
            return Ok(b.result);
        }

        if args.len() != b.args.len() {
            return Err(Error::new(
                ErrorKind::Semantic,
                pos,
                format!(
                    "{} takes {} argument(s), got {}",
                    b.name,
                    b.args.len(),
                    args.len()
                ),
            ));
        }
        for (a, want) in args.iter().zip(b.args) {
            let t = self.type_of(a, scope, false)?;
            if !types::compatible(*want, t) {
                return Err(Error::new(
                    ErrorKind::Semantic,
                    a.pos,
                    format!("{} expects {}, got {}", b.name, want.name(), t.name()),
                ));
            }
        }
        Ok(b.result)
    }

    // Every control-flow path must dispose of the locked value exactly once:
    // a single unlock, one lock of the full amount to the locked asset, or a
    // syntactic split X / billAmount - X.
    fn check_balance(&self, clause: &Clause) -> Result<()> {
        let mut unlock_count = 0;
        count_unlocks(&clause.statements, &mut unlock_count);
        if unlock_count > 1 {
            return Err(Error::new(
                ErrorKind::Semantic,
                clause.pos,
                format!("clause {} unlocks the value more than once", clause.name),
            ));
        }

        for path in self.collect_paths(&clause.statements) {
            self.check_path(clause, &path)?;
        }
        Ok(())
    }

    fn collect_paths(&self, stmts: &[Statement]) -> Vec<PathInfo> {
        let mut acc = vec![PathInfo::default()];
        for stmt in stmts {
            match stmt {
                Statement::Unlock { .. } => {
                    for p in &mut acc {
                        p.unlocks += 1;
                    }
                }
                Statement::Lock { amount, asset, .. } => {
                    if asset.as_var() == Some(self.contract.value.asset.as_str()) {
                        for p in &mut acc {
                            p.bill_amounts.push(amount.clone());
                        }
                    }
                }
                Statement::If {
                    then_body,
                    else_body,
                    ..
                } => {
                    let then_paths = self.collect_paths(then_body);
                    let else_paths = match else_body {
                        Some(body) => self.collect_paths(body),
                        None => vec![PathInfo::default()],
                    };
                    let mut next = Vec::new();
                    for prefix in &acc {
                        for arm in then_paths.iter().chain(else_paths.iter()) {
                            let mut p = prefix.clone();
                            p.unlocks += arm.unlocks;
                            p.bill_amounts.extend(arm.bill_amounts.iter().cloned());
                            next.push(p);
                        }
                    }
                    acc = next;
                }
                _ => {}
            }
        }
        acc
    }

    fn check_path(&self, clause: &Clause, path: &PathInfo) -> Result<()> {
        let unbalanced = || {
            Err(Error::new(
                ErrorKind::Semantic,
                clause.pos,
                format!("clause {} does not balance the locked value", clause.name),
            ))
        };
        if path.unlocks > 0 {
            if path.unlocks == 1 && path.bill_amounts.is_empty() {
                return Ok(());
            }
            return unbalanced();
        }
        let amount_name = self.contract.value.amount.as_str();
        let is_full = |e: &Expr| e.as_var() == Some(amount_name);
        match path.bill_amounts.as_slice() {
            [one] if is_full(one) => Ok(()),
            [a, b] => {
                let split = |x: &Expr, rest: &Expr| match &rest.kind {
                    ExprKind::Binary {
                        op: BinaryOp::Sub,
                        left,
                        right,
                    } => is_full(left) && same_shape(right, x),
                    _ => false,
                };
                if split(a, b) || split(b, a) {
                    Ok(())
                } else {
                    unbalanced()
                }
            }
            _ => unbalanced(),
        }
    }
}

#[derive(Clone, Default)]
struct PathInfo {
    unlocks: usize,
    bill_amounts: Vec<Expr>,
}

fn count_unlocks(stmts: &[Statement], n: &mut usize) {
    for s in stmts {
        match s {
            Statement::Unlock { .. } => *n += 1,
            Statement::If {
                then_body,
                else_body,
                ..
            } => {
                count_unlocks(then_body, n);
                if let Some(body) = else_body {
                    count_unlocks(body, n);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NoImports;

    fn check(src: &str) -> Result<()> {
        let contracts = crate::lang::parse(src.as_bytes(), &mut NoImports)?;
        check_unit(&contracts)
    }

    #[test]
    fn duplicate_param_reports_second_position() {
        let err = check(
            "contract T(a: Amount,\n           a: Asset) locks v of w {\n  clause c() { unlock v of w }\n}",
        )
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Semantic);
        assert!(err.message.contains("duplicate name a"));
        assert_eq!(err.line, 2);
        assert_eq!(err.col, 11);
    }

    #[test]
    fn verify_of_integer_is_a_type_error() {
        let err = check(
            "contract T() locks v of w { clause c() { verify 3 + 4\n unlock v of w } }",
        )
        .unwrap_err();
        assert!(err.message.contains("must be Boolean"), "{err}");
    }

    #[test]
    fn unknown_identifier() {
        let err =
            check("contract T() locks v of w { clause c() { verify mystery unlock v of w } }")
                .unwrap_err();
        assert!(err.message.contains("unknown identifier mystery"));
    }

    #[test]
    fn unbalanced_clause_is_rejected() {
        let err = check(
            "contract T(p: Program) locks v of w { clause c() { verify below(3) } }",
        )
        .unwrap_err();
        assert!(err.message.contains("does not balance"), "{err}");
    }

    #[test]
    fn split_lock_balances() {
        check(
            "contract T(x: Amount, p, q: Program) locks v of w {
               clause c() {
                 lock x of w with p
                 lock v - x of w with q
               }
             }",
        )
        .unwrap();
    }

    #[test]
    fn unlock_must_name_the_value() {
        let err = check(
            "contract T(x: Amount) locks v of w { clause c() { unlock x of w } }",
        )
        .unwrap_err();
        assert!(err.message.contains("unlock must release v of w"));
    }

    #[test]
    fn assign_before_use_on_every_path() {
        check(
            "contract T(b: Boolean, p: Program) locks v of w {
               clause c() {
                 define x: Integer
                 if b { assign x = 1 } else { assign x = 2 }
                 verify x > 0
                 lock v of w with p
               }
             }",
        )
        .unwrap();

        let err = check(
            "contract T(b: Boolean, p: Program) locks v of w {
               clause c() {
                 define x: Integer
                 if b { assign x = 1 }
                 verify x > 0
                 lock v of w with p
               }
             }",
        )
        .unwrap_err();
        assert!(err.message.contains("before assignment"), "{err}");
    }

    #[test]
    fn contract_call_outside_lock_program_is_rejected() {
        let err = check(
            "contract A() locks v of w { clause c() { unlock v of w } }
             contract B(k: PublicKey) locks v of w {
               clause c() { verify A() unlock v of w }
             }",
        )
        .unwrap_err();
        assert!(err.message.contains("may only be called as a lock program"));
    }

    #[test]
    fn builtin_arity_and_types() {
        let err = check(
            "contract T(k: PublicKey) locks v of w { clause c() { verify below(k)\nunlock v of w } }",
        )
        .unwrap_err();
        assert!(err.message.contains("below expects Integer"), "{err}");
    }
}
