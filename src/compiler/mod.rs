// SPDX-License-Identifier: GPL-3.0-or-later
// This file is part of covenant.

//! Code generation for the stack VM.
//!
//! A contract compiles to one linear byte body: a clause dispatch prologue,
//! then each clause in declaration order. The generator keeps an explicit
//! image of the VM stack (see [`stack`]) so every identifier reference
//! resolves to a depth and the cheapest access opcode for it; whether the
//! reference copies or consumes its entry is decided by how many uses the
//! clause has left.
//!
//! On entry the stack holds the contract arguments (first on top), the
//! clause selector beneath them when there is more than one clause, and the
//! spending clause's arguments below that, first argument deepest.

pub mod emit;
pub mod stack;

use std::collections::BTreeMap;

use tracing::debug;

use crate::error::{Error, ErrorKind, Pos, Result};
use crate::lang::{BinaryOp, Clause, Contract, Expr, ExprKind, Param, Statement, UnaryOp, ValueInfo};
use crate::types::{self, Type};
use emit::{Builder, Op};
use stack::{Entry, Model};

#[derive(Clone, Debug)]
pub struct ClauseInfo {
    pub name: String,
    pub params: Vec<Param>,
}

/// A compiled contract: the surface signature plus the emitted byte body.
#[derive(Clone, Debug)]
pub struct CompiledContract {
    pub name: String,
    pub params: Vec<Param>,
    pub clauses: Vec<ClauseInfo>,
    pub body: Vec<u8>,
}

impl CompiledContract {
    /// The program address: a fixed-width digest over the byte body.
    pub fn address(&self) -> [u8; 32] {
        crate::digest::program_address(&self.body)
    }
}

/// Compile every contract of a unit, in order. Bodies of earlier contracts
/// are memoized so later ones can inline them; each contract is compiled
/// exactly once no matter how many sites reference it.
pub fn compile_contracts(contracts: &[Contract]) -> Result<Vec<CompiledContract>> {
    let mut bodies: BTreeMap<String, Vec<u8>> = BTreeMap::new();
    let mut out = Vec::with_capacity(contracts.len());
    for (i, contract) in contracts.iter().enumerate() {
        let body = compile_contract(contract, &contracts[..i], &bodies)?;
        debug!(contract = %contract.name, bytes = body.len(), "compiled");
        bodies.insert(contract.name.clone(), body.clone());
        out.push(CompiledContract {
            name: contract.name.clone(),
            params: contract.params.clone(),
            clauses: contract
                .clauses
                .iter()
                .map(|c| ClauseInfo {
                    name: c.name.clone(),
                    params: c.params.clone(),
                })
                .collect(),
            body,
        });
    }
    Ok(out)
}

fn compile_contract(
    contract: &Contract,
    prior: &[Contract],
    bodies: &BTreeMap<String, Vec<u8>>,
) -> Result<Vec<u8>> {
    let mut b = Builder::new();
    let n = contract.clauses.len();

    // Clause dispatch: roll the selector up from beneath the contract
    // arguments, then jump. With two clauses a bare JUMPIF suffices; with
    // more, compare against each clause index first.
    let mut clause_labels = Vec::new();
    if n > 1 {
        for _ in 1..n {
            clause_labels.push(b.label());
        }
        b.push_int(contract.params.len() as i64);
        b.op(Op::Roll);
        for i in (2..n).rev() {
            b.op(Op::Dup);
            b.push_int(i as i64);
            b.op(Op::NumEqual);
            b.jump_if(clause_labels[i - 1]);
        }
        b.jump_if(clause_labels[0]);
    }

    let end = b.label();
    for (i, clause) in contract.clauses.iter().enumerate() {
        if i > 0 {
            b.anchor(clause_labels[i - 1]);
        }
        ClauseCx::new(contract, clause, prior, bodies, &mut b).compile()?;
        if i + 1 < n {
            b.jump(end);
        }
    }
    b.anchor(end);
    b.freeze()
}

// How a contract-call argument reaches the constructed program.
enum ArgPlan<'e> {
    // already on the stack; fetched when the argument chain runs
    StackVar(&'e str),
    // a reference to an imported contract; its body is pushed in place
    Body(&'e str),
    // anything else: evaluated ahead of the chain into a stash entry
    Eval(usize),
}

struct ClauseCx<'a> {
    contract: &'a Contract,
    clause: &'a Clause,
    prior: &'a [Contract],
    bodies: &'a BTreeMap<String, Vec<u8>>,
    b: &'a mut Builder,
    model: Model,
    counts: BTreeMap<String, usize>,
    branch_depth: usize,
    lock_index: i64,
    next_id: u32,
}

impl<'a> ClauseCx<'a> {
    fn new(
        contract: &'a Contract,
        clause: &'a Clause,
        prior: &'a [Contract],
        bodies: &'a BTreeMap<String, Vec<u8>>,
        b: &'a mut Builder,
    ) -> Self {
        let mut counts = BTreeMap::new();
        count_statements(&clause.statements, &mut counts);

        let mut cx = ClauseCx {
            contract,
            clause,
            prior,
            bodies,
            b,
            model: Model::default(),
            counts,
            branch_depth: 0,
            lock_index: 0,
            next_id: 0,
        };
        // Clause arguments, first argument deepest, then the contract
        // arguments with the first one on top. The selector, when present,
        // was consumed by the dispatch prologue.
        for p in &clause.params {
            let e = cx.named_entry(&p.name, p.ty);
            cx.model.push(e);
        }
        for p in contract.params.iter().rev() {
            let e = cx.named_entry(&p.name, p.ty);
            cx.model.push(e);
        }
        cx
    }

    fn fresh_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id - 1
    }

    fn named_entry(&mut self, name: &str, ty: Type) -> Entry {
        Entry {
            id: self.fresh_id(),
            label: name.to_string(),
            ty,
            refs_left: self.counts.get(name).copied().unwrap_or(0),
            branch_depth: self.branch_depth,
        }
    }

    fn push_temp(&mut self, ty: Type) {
        let e = Entry {
            id: self.fresh_id(),
            label: String::new(),
            ty,
            refs_left: 0,
            branch_depth: self.branch_depth,
        };
        self.model.push(e);
    }

    fn compile(mut self) -> Result<()> {
        // The last statement that emits a check leaves its boolean as the
        // script result instead of VERIFYing it; unlock emits nothing and
        // does not count.
        let clause = self.clause;
        let final_idx = clause
            .statements
            .iter()
            .rposition(|s| !matches!(s, Statement::Unlock { .. }));
        for (i, stmt) in clause.statements.iter().enumerate() {
            self.statement(stmt, final_idx == Some(i))?;
        }
        Ok(())
    }

    fn statement(&mut self, stmt: &Statement, is_final: bool) -> Result<()> {
        match stmt {
            Statement::Verify { expr, .. } => {
                self.hoist_value_refs(expr)?;
                self.expr(expr)?;
                if !is_final {
                    self.b.op(Op::Verify);
                    self.model.pop()?;
                }
            }
            Statement::Lock {
                amount,
                asset,
                program,
                ..
            } => {
                self.lock(amount, asset, program, is_final)?;
            }
            Statement::Unlock { .. } => {
                // Releasing the value needs no code: the script succeeding
                // is the release.
            }
            Statement::Define { param, init, .. } => {
                match init {
                    Some(init) => self.expr(init)?,
                    None => {
                        self.b.push_int(0);
                        self.push_temp(param.ty);
                    }
                }
                let refs = self.counts.get(&param.name).copied().unwrap_or(0);
                let top = self.model.get_mut(0)?;
                top.label = param.name.clone();
                top.ty = param.ty;
                top.refs_left = refs;
            }
            Statement::Assign { name, expr, pos } => {
                self.expr(expr)?;
                let Some(depth) = self.model.find(name) else {
                    return Err(Error::new(
                        ErrorKind::Internal,
                        *pos,
                        format!("internal: assign target {name} not on the stack"),
                    ));
                };
                let old = self.model.get(depth)?.clone();
                self.consume_at(depth)?;
                self.b.op(Op::Drop);
                self.model.pop()?;
                let top = self.model.get_mut(0)?;
                top.label = old.label;
                top.ty = old.ty;
                top.refs_left = old.refs_left;
                top.branch_depth = old.branch_depth;
            }
            Statement::If {
                cond,
                then_body,
                else_body,
                pos,
            } => {
                self.if_statement(cond, then_body, else_body.as_deref(), *pos)?;
            }
        }
        Ok(())
    }

    fn if_statement(
        &mut self,
        cond: &Expr,
        then_body: &[Statement],
        else_body: Option<&[Statement]>,
        pos: Pos,
    ) -> Result<()> {
        self.hoist_value_refs(cond)?;
        self.expr(cond)?;
        self.b.op(Op::Not);
        self.b.op(Op::Nop);
        self.model.pop()?; // JUMPIF consumes the inverted condition

        let else_label = self.b.label();
        let join = self.b.label();
        self.b.jump_if(if else_body.is_some() { else_label } else { join });

        let entry_model = self.model.clone();
        let entry_locks = self.lock_index;
        self.branch_depth += 1;

        for s in then_body {
            self.statement(s, false)?;
        }
        let then_model = self.model.clone();
        let then_locks = self.lock_index;

        if let Some(else_body) = else_body {
            self.b.jump(join);
            self.b.anchor(else_label);
            self.model = entry_model;
            self.lock_index = entry_locks;
            for s in else_body {
                self.statement(s, false)?;
            }
            if !then_model.same_shape(&self.model) {
                return Err(Error::new(
                    ErrorKind::Semantic,
                    pos,
                    "if arms leave inconsistent stack shapes",
                ));
            }
            self.lock_index = then_locks.max(self.lock_index);
        } else {
            if !then_model.same_shape(&entry_model) {
                return Err(Error::new(
                    ErrorKind::Semantic,
                    pos,
                    "if arms leave inconsistent stack shapes",
                ));
            }
            self.lock_index = then_locks;
        }
        self.b.anchor(join);
        self.branch_depth -= 1;
        Ok(())
    }

    // References to the locked value inside a checked expression are pushed
    // once ahead of it and consumed as ordinary stack temporaries.
    fn hoist_value_refs(&mut self, expr: &Expr) -> Result<()> {
        let mut order = Vec::new();
        let mut counts = BTreeMap::new();
        collect_value_refs(&self.contract.value, expr, &mut order, &mut counts);
        for name in order {
            let (op, ty) = if name == self.contract.value.amount {
                (Op::Amount, Type::Amount)
            } else {
                (Op::Asset, Type::Asset)
            };
            self.b.op(op);
            let entry = Entry {
                id: self.fresh_id(),
                label: name.clone(),
                ty,
                refs_left: counts[&name],
                branch_depth: self.branch_depth,
            };
            self.model.push(entry);
        }
        Ok(())
    }

    fn lock(&mut self, amount: &Expr, asset: &Expr, program: &Expr, is_final: bool) -> Result<()> {
        let index = self.lock_index;
        self.lock_index += 1;

        if let ExprKind::Call { func, args } = &program.kind {
            if let Some(name) = func.as_var() {
                if self.contract_first_param(name).is_some() {
                    return self.lock_with_call(index, amount, asset, name, args, is_final);
                }
            }
        }

        self.b.push_int(index);
        self.push_temp(Type::Integer);
        self.expr(amount)?;
        self.expr(asset)?;
        self.b.push_int(1);
        self.push_temp(Type::Integer);
        self.expr(program)?;
        self.check_output(is_final)
    }

    // lock whose program is a contract call. The program is concatenated on
    // the stack: a seed, the CATPUSHDATA'd arguments in reverse source
    // order, then the pay-to-program tail. Arguments that are not bare
    // stack references are evaluated ahead of the chain; the last such
    // stash goes immediately before the asset operand, the one before it
    // ahead of the amount, the rest ahead of the index.
    fn lock_with_call(
        &mut self,
        index: i64,
        amount: &Expr,
        asset: &Expr,
        callee: &str,
        args: &[Expr],
        is_final: bool,
    ) -> Result<()> {
        let callee_takes_own_program = self
            .contract_first_param(callee)
            .ok_or_else(|| Error::internal(format!("unknown call target {callee}")))?
            == Some(Type::Program);

        let plans: Vec<ArgPlan> = args
            .iter()
            .enumerate()
            .map(|(i, a)| match a.as_var() {
                Some(n) if self.model.find(n).is_some() => ArgPlan::StackVar(n),
                Some(n) if self.body_of(n).is_some() => ArgPlan::Body(n),
                _ => ArgPlan::Eval(i),
            })
            .collect();

        let evals: Vec<usize> = plans
            .iter()
            .rev()
            .filter_map(|p| match p {
                ArgPlan::Eval(i) => Some(*i),
                _ => None,
            })
            .collect();
        let k = evals.len();
        let mut stashes: BTreeMap<usize, u32> = BTreeMap::new();

        for &ai in &evals[..k.saturating_sub(2)] {
            self.stash(&args[ai], ai, &mut stashes)?;
        }
        self.b.push_int(index);
        self.push_temp(Type::Integer);
        if k >= 2 {
            let ai = evals[k - 2];
            self.stash(&args[ai], ai, &mut stashes)?;
        }
        self.expr(amount)?;
        if k >= 1 {
            let ai = evals[k - 1];
            self.stash(&args[ai], ai, &mut stashes)?;
        }
        self.expr(asset)?;
        self.b.push_int(1);
        self.push_temp(Type::Integer);

        // seed of the constructed program
        self.b.push_data(&[]);
        self.push_temp(Type::Program);

        for (i, _) in args.iter().enumerate().rev() {
            match &plans[i] {
                ArgPlan::StackVar(name) => {
                    let depth = self
                        .model
                        .find(name)
                        .ok_or_else(|| Error::internal(format!("{name} left the stack")))?;
                    self.access(depth)?;
                }
                ArgPlan::Body(name) => {
                    let body = self
                        .body_of(name)
                        .ok_or_else(|| Error::internal(format!("no body for {name}")))?;
                    self.b.push_data(&body);
                    self.push_temp(Type::Program);
                }
                ArgPlan::Eval(ai) => {
                    let id = stashes[ai];
                    let depth = self
                        .model
                        .find_id(id)
                        .ok_or_else(|| Error::internal("argument stash left the stack"))?;
                    self.access(depth)?;
                }
            }
            self.b.op(Op::CatPushdata);
            self.model.pop_n(2)?;
            self.push_temp(Type::Program);
        }

        if callee_takes_own_program {
            // the callee finds its own program in its first argument
            self.append_raw(&[Op::Depth.byte(), Op::Over.byte()])?;
        } else {
            self.append_raw(&[Op::Depth.byte()])?;
            let body = self
                .body_of(callee)
                .ok_or_else(|| Error::internal(format!("no body for {callee}")))?;
            self.b.push_data(&body);
            self.push_temp(Type::Program);
            self.b.op(Op::CatPushdata);
            self.model.pop_n(2)?;
            self.push_temp(Type::Program);
        }
        // FALSE, then CHECKPREDICATE
        self.b.push_data(&[]);
        self.push_temp(Type::Program);
        self.b.op(Op::CatPushdata);
        self.model.pop_n(2)?;
        self.push_temp(Type::Program);
        self.append_raw(&[Op::CheckPredicate.byte()])?;

        self.check_output(is_final)
    }

    // Append literal bytes to the program under construction.
    fn append_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.b.push_data(bytes);
        self.push_temp(Type::Program);
        self.b.op(Op::Cat);
        self.model.pop_n(2)?;
        self.push_temp(Type::Program);
        Ok(())
    }

    fn check_output(&mut self, is_final: bool) -> Result<()> {
        self.b.op(Op::CheckOutput);
        self.model.pop_n(5)?;
        self.push_temp(Type::Boolean);
        if !is_final {
            self.b.op(Op::Verify);
            self.model.pop()?;
        }
        Ok(())
    }

    fn stash(&mut self, arg: &Expr, index: usize, stashes: &mut BTreeMap<usize, u32>) -> Result<()> {
        self.expr(arg)?;
        let top = self.model.get_mut(0)?;
        top.refs_left = 1;
        stashes.insert(index, top.id);
        Ok(())
    }

    fn expr(&mut self, expr: &Expr) -> Result<()> {
        match &expr.kind {
            ExprKind::Var(name) => self.var(name, expr.pos),
            ExprKind::Int(n) => {
                self.b.push_int(*n);
                self.push_temp(Type::Integer);
                Ok(())
            }
            ExprKind::Bool(v) => {
                self.b.push_int(*v as i64);
                self.push_temp(Type::Boolean);
                Ok(())
            }
            ExprKind::Bytes(data) => {
                self.b.push_data(data);
                self.push_temp(Type::Str);
                Ok(())
            }
            ExprKind::List(_) => Err(Error::new(
                ErrorKind::Internal,
                expr.pos,
                "internal: list literal outside checkTxMultiSig",
            )),
            ExprKind::Unary { op, operand } => {
                self.expr(operand)?;
                let (opcode, ty) = match op {
                    UnaryOp::Neg => (Op::Negate, Type::Integer),
                    UnaryOp::Not => (Op::Not, Type::Boolean),
                };
                self.b.op(opcode);
                self.model.pop()?;
                self.push_temp(ty);
                Ok(())
            }
            ExprKind::Binary { op, left, right } => {
                let numeric = self.is_numeric(left) && self.is_numeric(right);
                self.expr(left)?;
                self.expr(right)?;
                let (opcode, ty) = match op {
                    BinaryOp::Mul => (Op::Mul, Type::Integer),
                    BinaryOp::Div => (Op::Div, Type::Integer),
                    BinaryOp::Mod => (Op::Mod, Type::Integer),
                    BinaryOp::Add => (Op::Add, Type::Integer),
                    BinaryOp::Sub => (Op::Sub, Type::Integer),
                    BinaryOp::Less => (Op::Less, Type::Boolean),
                    BinaryOp::LessEq => (Op::LessEq, Type::Boolean),
                    BinaryOp::Greater => (Op::Greater, Type::Boolean),
                    BinaryOp::GreaterEq => (Op::GreaterEq, Type::Boolean),
                    BinaryOp::Eq if numeric => (Op::NumEqual, Type::Boolean),
                    BinaryOp::Eq => (Op::Equal, Type::Boolean),
                    BinaryOp::NotEq if numeric => (Op::NumNotEqual, Type::Boolean),
                    BinaryOp::NotEq => (Op::Equal, Type::Boolean),
                    BinaryOp::And => (Op::BoolAnd, Type::Boolean),
                    BinaryOp::Or => (Op::BoolOr, Type::Boolean),
                };
                self.b.op(opcode);
                if matches!(op, BinaryOp::NotEq) && !numeric {
                    self.b.op(Op::Not);
                }
                self.model.pop_n(2)?;
                self.push_temp(ty);
                Ok(())
            }
            ExprKind::Call { func, args } => {
                let Some(name) = func.as_var() else {
                    return Err(Error::new(
                        ErrorKind::Internal,
                        expr.pos,
                        "internal: call of a non-identifier",
                    ));
                };
                self.builtin_call(name, args, expr.pos)
            }
        }
    }

    fn var(&mut self, name: &str, pos: Pos) -> Result<()> {
        if let Some(depth) = self.model.find(name) {
            return self.access(depth);
        }
        if name == self.contract.value.amount {
            self.b.op(Op::Amount);
            self.push_temp(Type::Amount);
            return Ok(());
        }
        if name == self.contract.value.asset {
            self.b.op(Op::Asset);
            self.push_temp(Type::Asset);
            return Ok(());
        }
        if let Some(body) = self.body_of(name) {
            self.b.push_data(&body);
            self.push_temp(Type::Program);
            return Ok(());
        }
        Err(Error::new(
            ErrorKind::Internal,
            pos,
            format!("internal: unresolved identifier {name}"),
        ))
    }

    /// Emit the access for the entry at `depth`. The last remaining use of
    /// an entry consumes it in place (nothing, SWAP, ROT, or n ROLL);
    /// everything else copies (DUP, OVER, or n PICK). Entries born outside
    /// the current `if` arm are never consumed inside it.
    fn access(&mut self, depth: usize) -> Result<()> {
        let branch_depth = self.branch_depth;
        let entry = self.model.get_mut(depth)?;
        if entry.refs_left > 0 {
            entry.refs_left -= 1;
        }
        let consume = entry.refs_left == 0 && entry.branch_depth >= branch_depth;
        let ty = entry.ty;
        if consume {
            match depth {
                0 => {}
                1 => self.b.op(Op::Swap),
                2 => self.b.op(Op::Rot),
                n => {
                    self.b.push_int(n as i64);
                    self.b.op(Op::Roll);
                }
            }
            self.model.lift(depth)?;
        } else {
            match depth {
                0 => self.b.op(Op::Dup),
                1 => self.b.op(Op::Over),
                n => {
                    self.b.push_int(n as i64);
                    self.b.op(Op::Pick);
                }
            }
            self.push_temp(ty);
        }
        Ok(())
    }

    fn consume_at(&mut self, depth: usize) -> Result<()> {
        match depth {
            0 => {}
            1 => self.b.op(Op::Swap),
            2 => self.b.op(Op::Rot),
            n => {
                self.b.push_int(n as i64);
                self.b.op(Op::Roll);
            }
        }
        self.model.lift(depth)
    }

    fn builtin_call(&mut self, name: &str, args: &[Expr], pos: Pos) -> Result<()> {
        match name {
            "below" | "above" => {
                self.expr(&args[0])?;
                self.b.op(Op::BlockHeight);
                self.push_temp(Type::Integer);
                self.b.op(if name == "below" { Op::Less } else { Op::Greater });
                self.model.pop_n(2)?;
                self.push_temp(Type::Boolean);
            }
            "checkTxSig" => {
                self.expr(&args[1])?; // signature first
                self.expr(&args[0])?;
                self.b.op(Op::TxSigHash);
                self.push_temp(Type::Hash);
                self.b.op(Op::Swap);
                self.model.swap()?;
                self.b.op(Op::CheckSig);
                self.model.pop_n(3)?;
                self.push_temp(Type::Boolean);
            }
            "checkTxMultiSig" => {
                let (ExprKind::List(keys), ExprKind::List(sigs)) = (&args[0].kind, &args[1].kind)
                else {
                    return Err(Error::new(
                        ErrorKind::Internal,
                        pos,
                        "internal: checkTxMultiSig without list literals",
                    ));
                };
                for s in sigs {
                    self.expr(s)?;
                }
                for key in keys {
                    self.expr(key)?;
                }
                self.b.push_int(keys.len() as i64);
                self.push_temp(Type::Integer);
                self.b.op(Op::TxSigHash);
                self.push_temp(Type::Hash);
                self.b.op(Op::Swap);
                self.model.swap()?;
                self.b.op(Op::CheckMultiSig);
                self.model.pop_n(sigs.len() + keys.len() + 2)?;
                self.push_temp(Type::Boolean);
            }
            "sha256" | "sha3" => {
                self.expr(&args[0])?;
                self.b.op(if name == "sha256" { Op::Sha256 } else { Op::Sha3 });
                self.model.pop()?;
                self.push_temp(Type::Hash);
            }
            "size" => {
                self.expr(&args[0])?;
                self.b.op(Op::Size);
                self.model.pop()?;
                self.push_temp(Type::Integer);
            }
            "concat" | "concatpush" => {
                self.expr(&args[0])?;
                self.expr(&args[1])?;
                self.b
                    .op(if name == "concat" { Op::Cat } else { Op::CatPushdata });
                self.model.pop_n(2)?;
                self.push_temp(Type::Str);
            }
            other => {
                return Err(Error::new(
                    ErrorKind::Internal,
                    pos,
                    format!("internal: call of {other} survived checking"),
                ));
            }
        }
        Ok(())
    }

    // First parameter type of a visible contract, by name. `Some(None)`
    // means the contract exists but declares no parameters.
    fn contract_first_param(&self, name: &str) -> Option<Option<Type>> {
        let ast = if name == self.contract.name {
            self.contract
        } else {
            self.prior.iter().find(|c| c.name == name)?
        };
        Some(ast.params.first().map(|p| p.ty))
    }

    // Compiled body of an earlier contract. The contract being compiled has
    // no body yet, which is fine: self-references never embed one.
    fn body_of(&self, name: &str) -> Option<Vec<u8>> {
        if name == self.contract.name {
            return None;
        }
        self.bodies.get(name).cloned()
    }

    fn is_numeric(&self, expr: &Expr) -> bool {
        match &expr.kind {
            ExprKind::Int(_) => true,
            ExprKind::Bool(_) | ExprKind::Bytes(_) | ExprKind::List(_) => false,
            ExprKind::Var(name) => {
                if let Some(depth) = self.model.find(name) {
                    return self
                        .model
                        .get(depth)
                        .map(|e| e.ty.is_numeric())
                        .unwrap_or(false);
                }
                *name == self.contract.value.amount
            }
            ExprKind::Unary { op, .. } => matches!(op, UnaryOp::Neg),
            ExprKind::Binary { op, .. } => matches!(
                op,
                BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod | BinaryOp::Add | BinaryOp::Sub
            ),
            ExprKind::Call { func, .. } => func
                .as_var()
                .and_then(types::builtin)
                .map(|b| b.result.is_numeric())
                .unwrap_or(false),
        }
    }
}

fn count_statements(stmts: &[Statement], counts: &mut BTreeMap<String, usize>) {
    for stmt in stmts {
        match stmt {
            Statement::Verify { expr, .. } => count_expr(expr, counts),
            Statement::Lock {
                amount,
                asset,
                program,
                ..
            } => {
                count_expr(amount, counts);
                count_expr(asset, counts);
                count_expr(program, counts);
            }
            // unlock emits nothing, so its operands are not uses
            Statement::Unlock { .. } => {}
            Statement::Define { init, .. } => {
                if let Some(init) = init {
                    count_expr(init, counts);
                }
            }
            Statement::Assign { expr, .. } => count_expr(expr, counts),
            Statement::If {
                cond,
                then_body,
                else_body,
                ..
            } => {
                count_expr(cond, counts);
                count_statements(then_body, counts);
                if let Some(body) = else_body {
                    count_statements(body, counts);
                }
            }
        }
    }
}

fn count_expr(expr: &Expr, counts: &mut BTreeMap<String, usize>) {
    match &expr.kind {
        ExprKind::Var(name) => {
            *counts.entry(name.clone()).or_insert(0) += 1;
        }
        ExprKind::Int(_) | ExprKind::Bool(_) | ExprKind::Bytes(_) => {}
        ExprKind::List(elements) => {
            for e in elements {
                count_expr(e, counts);
            }
        }
        // the callee name is not a stack access
        ExprKind::Call { args, .. } => {
            for a in args {
                count_expr(a, counts);
            }
        }
        ExprKind::Unary { operand, .. } => count_expr(operand, counts),
        ExprKind::Binary { left, right, .. } => {
            count_expr(left, counts);
            count_expr(right, counts);
        }
    }
}

fn collect_value_refs(
    value: &ValueInfo,
    expr: &Expr,
    order: &mut Vec<String>,
    counts: &mut BTreeMap<String, usize>,
) {
    match &expr.kind {
        ExprKind::Var(name) => {
            if name == &value.amount || name == &value.asset {
                if !counts.contains_key(name) {
                    order.push(name.clone());
                }
                *counts.entry(name.clone()).or_insert(0) += 1;
            }
        }
        ExprKind::Int(_) | ExprKind::Bool(_) | ExprKind::Bytes(_) => {}
        ExprKind::List(elements) => {
            for e in elements {
                collect_value_refs(value, e, order, counts);
            }
        }
        ExprKind::Call { args, .. } => {
            for a in args {
                collect_value_refs(value, a, order, counts);
            }
        }
        ExprKind::Unary { operand, .. } => collect_value_refs(value, operand, order, counts),
        ExprKind::Binary { left, right, .. } => {
            collect_value_refs(value, left, order, counts);
            collect_value_refs(value, right, order, counts);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NoImports;

    fn compile(src: &str) -> Vec<CompiledContract> {
        let contracts = crate::lang::parse(src.as_bytes(), &mut NoImports).unwrap();
        crate::check::check_unit(&contracts).unwrap();
        compile_contracts(&contracts).unwrap()
    }

    fn body_hex(src: &str) -> String {
        hex::encode(&compile(src).last().unwrap().body)
    }

    const LOCK_POSITION: &str = "
        contract LockPosition(height: Integer,
                              program: Program,
                              publicKey: PublicKey) locks billAmount of billAsset {
          clause spend(sig: Signature) {
            verify below(height)
            verify checkTxSig(publicKey, sig)
            lock billAmount of billAsset with program
          }
        }";

    #[test]
    fn lock_position_golden() {
        assert_eq!(body_hex(LOCK_POSITION), "cd9f697b7bae7cac6900c3c251547ac1");
    }

    #[test]
    fn repay_collateral_golden() {
        let src = "
            contract RepayCollateral(assetLoaned: Asset,
                                     amountLoaned: Amount,
                                     blockHeight: Integer,
                                     lender: Program,
                                     borrower: Program) locks billAmount of billAsset {
              clause repay() {
                verify above(blockHeight)
                lock amountLoaned of assetLoaned with lender
                lock billAmount of billAsset with borrower
              }
              clause default() {
                verify below(blockHeight)
                lock billAmount of billAsset with lender
              }
            }";
        assert_eq!(
            body_hex(src),
            "557a641f0000007bcda069007b7b51547ac16951c3c251547ac1632a0000007bcd9f6900c3c251567ac1"
        );
    }

    #[test]
    fn single_clause_has_no_dispatch() {
        let body = compile(LOCK_POSITION).pop().unwrap().body;
        assert_eq!(body[0], Op::BlockHeight.byte());
    }

    #[test]
    fn three_clause_dispatch_compares_the_selector() {
        let src = "
            contract T() locks v of w {
              clause a() { unlock v of w }
              clause b() { unlock v of w }
              clause c() { unlock v of w }
            }";
        // ROLL, DUP 2 NUMEQUAL JUMPIF c, JUMPIF b, then three empty bodies
        assert_eq!(
            body_hex(src),
            "007a76529c6419000000641400000063190000006319000000"
        );
    }

    #[test]
    fn inconsistent_if_arms_are_rejected() {
        let src = "
            contract T(b: Boolean, p: Program) locks v of w {
              clause c() {
                if b { define x: Integer = 1 } else { verify true }
                lock v of w with p
              }
            }";
        let contracts = crate::lang::parse(src.as_bytes(), &mut NoImports).unwrap();
        crate::check::check_unit(&contracts).unwrap();
        let err = compile_contracts(&contracts).unwrap_err();
        assert!(err.message.contains("inconsistent stack shapes"), "{err}");
    }

    #[test]
    fn address_is_the_digest_of_the_body() {
        let c = compile(LOCK_POSITION).pop().unwrap();
        assert_eq!(c.address(), crate::digest::program_address(&c.body));
    }
}
