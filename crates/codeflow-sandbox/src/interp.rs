//! Tree-walking evaluator with operation, allocation and wall-clock
//! budgets. The evaluator is the entire capability surface of user code:
//! anything it does not implement simply does not exist in the sandbox.

use crate::ast::{ArrowBody, AssignOp, BinaryOp, Expr, LogicalOp, Stmt, UnaryOp};
use crate::value::Value;
use std::collections::HashMap;
use std::time::Instant;

/// Member names that never resolve; blocks prototype-walking escapes.
pub const RESERVED_MEMBERS: &[&str] = &["__proto__", "constructor", "prototype"];

/// Interval (in operations) between wall-clock checks.
const DEADLINE_CHECK_INTERVAL: u64 = 1024;

/// Non-local control flow and failure channel.
#[derive(Debug)]
pub enum Flow {
    Return(Value),
    Break,
    Continue,
    /// User `throw` or a runtime error.
    Throw(Value),
    /// Operation or allocation budget exhausted.
    Budget(String),
    /// In-worker wall-clock watchdog fired.
    Timeout,
}

impl Flow {
    pub fn error(message: impl Into<String>) -> Self {
        Flow::Throw(Value::Str(message.into()))
    }
}

#[derive(Debug)]
pub struct Timer {
    pub id: u64,
    pub delay_ms: f64,
    pub callback: Value,
}

#[derive(Debug)]
pub struct Interp {
    scopes: Vec<HashMap<String, Value>>,
    pub console: Vec<String>,
    pub console_truncated: bool,
    pub timers: Vec<Timer>,
    pub cancelled_timers: Vec<u64>,
    next_timer_id: u64,
    ops: u64,
    op_budget: u64,
    alloc: usize,
    alloc_budget: usize,
    deadline: Instant,
}

impl Interp {
    pub fn new(op_budget: u64, alloc_budget: usize, deadline: Instant) -> Self {
        Self {
            scopes: vec![HashMap::new()],
            console: Vec::new(),
            console_truncated: false,
            timers: Vec::new(),
            cancelled_timers: Vec::new(),
            next_timer_id: 1,
            ops: 0,
            op_budget,
            alloc: 0,
            alloc_budget,
            deadline,
        }
    }

    pub fn define_global(&mut self, name: &str, value: Value) {
        self.scopes[0].insert(name.to_string(), value);
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        self.scopes.iter().rev().find_map(|s| s.get(name).cloned())
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    fn tick(&mut self) -> Result<(), Flow> {
        self.ops += 1;
        if self.ops > self.op_budget {
            return Err(Flow::Budget("operation budget exceeded".to_string()));
        }
        if self.ops % DEADLINE_CHECK_INTERVAL == 0 && Instant::now() >= self.deadline {
            return Err(Flow::Timeout);
        }
        Ok(())
    }

    pub fn charge_alloc(&mut self, bytes: usize) -> Result<(), Flow> {
        self.alloc = self.alloc.saturating_add(bytes);
        if self.alloc > self.alloc_budget {
            return Err(Flow::Budget("allocation budget exceeded".to_string()));
        }
        Ok(())
    }

    pub fn log_line(&mut self, line: String) {
        if self.console.len() < crate::MAX_CONSOLE_LINES {
            self.console.push(line);
        } else {
            self.console_truncated = true;
        }
    }

    pub fn register_timer(&mut self, delay_ms: f64, callback: Value) -> u64 {
        let id = self.next_timer_id;
        self.next_timer_id += 1;
        self.timers.push(Timer {
            id,
            delay_ms: delay_ms.max(0.0),
            callback,
        });
        id
    }

    /// Run a program. A top-level `return` yields the script's result value.
    pub fn run(&mut self, program: &[Stmt]) -> Result<Value, Flow> {
        match self.exec_block(program) {
            Ok(()) => Ok(Value::Undefined),
            Err(Flow::Return(v)) => Ok(v),
            Err(Flow::Break) | Err(Flow::Continue) => {
                Err(Flow::error("illegal break or continue outside a loop"))
            }
            Err(other) => Err(other),
        }
    }

    fn exec_block(&mut self, stmts: &[Stmt]) -> Result<(), Flow> {
        for stmt in stmts {
            self.exec_stmt(stmt)?;
        }
        Ok(())
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> Result<(), Flow> {
        self.tick()?;
        match stmt {
            Stmt::Decl { name, init } => {
                let value = match init {
                    Some(expr) => self.eval(expr)?,
                    None => Value::Undefined,
                };
                self.scopes
                    .last_mut()
                    .expect("scope stack is never empty")
                    .insert(name.clone(), value);
                Ok(())
            }
            Stmt::Expr(expr) => {
                self.eval(expr)?;
                Ok(())
            }
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => {
                if self.eval(cond)?.truthy() {
                    self.scoped(|interp| interp.exec_block(then_branch))
                } else if let Some(else_branch) = else_branch {
                    self.scoped(|interp| interp.exec_block(else_branch))
                } else {
                    Ok(())
                }
            }
            Stmt::While { cond, body } => {
                while self.eval(cond)?.truthy() {
                    match self.scoped(|interp| interp.exec_block(body)) {
                        Ok(()) | Err(Flow::Continue) => {}
                        Err(Flow::Break) => break,
                        Err(other) => return Err(other),
                    }
                }
                Ok(())
            }
            Stmt::For {
                init,
                cond,
                step,
                body,
            } => self.scoped(|interp| {
                if let Some(init) = init {
                    interp.exec_stmt(init)?;
                }
                loop {
                    if let Some(cond) = cond {
                        if !interp.eval(cond)?.truthy() {
                            break;
                        }
                    }
                    match interp.scoped(|inner| inner.exec_block(body)) {
                        Ok(()) | Err(Flow::Continue) => {}
                        Err(Flow::Break) => break,
                        Err(other) => return Err(other),
                    }
                    if let Some(step) = step {
                        interp.eval(step)?;
                    }
                }
                Ok(())
            }),
            Stmt::Return(value) => {
                let v = match value {
                    Some(expr) => self.eval(expr)?,
                    None => Value::Undefined,
                };
                Err(Flow::Return(v))
            }
            Stmt::Break => Err(Flow::Break),
            Stmt::Continue => Err(Flow::Continue),
            Stmt::Throw(expr) => {
                let v = self.eval(expr)?;
                Err(Flow::Throw(v))
            }
            Stmt::Block(stmts) => self.scoped(|interp| interp.exec_block(stmts)),
        }
    }

    fn scoped<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T, Flow>) -> Result<T, Flow> {
        self.scopes.push(HashMap::new());
        let result = f(self);
        self.scopes.pop();
        result
    }

    pub fn eval(&mut self, expr: &Expr) -> Result<Value, Flow> {
        self.tick()?;
        match expr {
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Null => Ok(Value::Null),
            Expr::Undefined => Ok(Value::Undefined),
            Expr::Ident(name) => self
                .lookup(name)
                .ok_or_else(|| Flow::error(format!("{} is not defined", name))),
            Expr::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.eval(item)?);
                }
                self.charge_alloc(out.len() * 16 + 32)?;
                Ok(Value::array(out))
            }
            Expr::Object(entries) => {
                let mut out = Vec::with_capacity(entries.len());
                for (key, value) in entries {
                    out.push((key.clone(), self.eval(value)?));
                }
                self.charge_alloc(out.len() * 48 + 32)?;
                Ok(Value::object(out))
            }
            Expr::Member { object, property } => {
                let obj = self.eval(object)?;
                self.member_get(&obj, property)
            }
            Expr::Index { object, index } => {
                let obj = self.eval(object)?;
                let idx = self.eval(index)?;
                match &obj {
                    Value::Array(items) => {
                        let i = idx.to_number();
                        if i.is_finite() && i >= 0.0 {
                            Ok(items
                                .borrow()
                                .items
                                .get(i as usize)
                                .cloned()
                                .unwrap_or(Value::Undefined))
                        } else {
                            Ok(Value::Undefined)
                        }
                    }
                    Value::Str(s) => {
                        let i = idx.to_number();
                        if i.is_finite() && i >= 0.0 {
                            Ok(s.chars()
                                .nth(i as usize)
                                .map(|c| Value::Str(c.to_string()))
                                .unwrap_or(Value::Undefined))
                        } else {
                            Ok(Value::Undefined)
                        }
                    }
                    _ => self.member_get(&obj, &idx.to_display()),
                }
            }
            Expr::Call { callee, args } => self.eval_call(callee, args),
            Expr::Unary { op, operand } => {
                if let (UnaryOp::Typeof, Expr::Ident(name)) = (op, operand.as_ref()) {
                    // `typeof missing` must not throw.
                    return Ok(Value::Str(
                        self.lookup(name)
                            .map(|v| v.type_name())
                            .unwrap_or("undefined")
                            .to_string(),
                    ));
                }
                let v = self.eval(operand)?;
                Ok(match op {
                    UnaryOp::Neg => Value::Number(-v.to_number()),
                    UnaryOp::Plus => Value::Number(v.to_number()),
                    UnaryOp::Not => Value::Bool(!v.truthy()),
                    UnaryOp::Typeof => Value::Str(v.type_name().to_string()),
                })
            }
            Expr::Binary { op, left, right } => {
                let l = self.eval(left)?;
                let r = self.eval(right)?;
                self.binary(*op, l, r)
            }
            Expr::Logical { op, left, right } => {
                let l = self.eval(left)?;
                match op {
                    LogicalOp::And => {
                        if l.truthy() {
                            self.eval(right)
                        } else {
                            Ok(l)
                        }
                    }
                    LogicalOp::Or => {
                        if l.truthy() {
                            Ok(l)
                        } else {
                            self.eval(right)
                        }
                    }
                }
            }
            Expr::Ternary {
                cond,
                then_expr,
                else_expr,
            } => {
                if self.eval(cond)?.truthy() {
                    self.eval(then_expr)
                } else {
                    self.eval(else_expr)
                }
            }
            Expr::Assign { target, op, value } => {
                let rhs = self.eval(value)?;
                let applied = match op {
                    AssignOp::Assign => rhs,
                    compound => {
                        let current = self.eval(target)?;
                        let bin_op = match compound {
                            AssignOp::Add => BinaryOp::Add,
                            AssignOp::Sub => BinaryOp::Sub,
                            AssignOp::Mul => BinaryOp::Mul,
                            AssignOp::Div => BinaryOp::Div,
                            AssignOp::Assign => unreachable!(),
                        };
                        self.binary(bin_op, current, rhs)?
                    }
                };
                self.assign(target, applied.clone())?;
                Ok(applied)
            }
            Expr::Postfix { target, increment } => {
                let current = self.eval(target)?.to_number();
                let next = if *increment { current + 1.0 } else { current - 1.0 };
                self.assign(target, Value::Number(next))?;
                Ok(Value::Number(current))
            }
            Expr::Arrow(def) => Ok(Value::Arrow(def.clone())),
        }
    }

    fn binary(&mut self, op: BinaryOp, l: Value, r: Value) -> Result<Value, Flow> {
        Ok(match op {
            BinaryOp::Add => match (&l, &r) {
                (Value::Str(_), _) | (_, Value::Str(_)) => {
                    let s = format!("{}{}", l.to_display(), r.to_display());
                    self.charge_alloc(s.len())?;
                    Value::Str(s)
                }
                _ => Value::Number(l.to_number() + r.to_number()),
            },
            BinaryOp::Sub => Value::Number(l.to_number() - r.to_number()),
            BinaryOp::Mul => Value::Number(l.to_number() * r.to_number()),
            BinaryOp::Div => Value::Number(l.to_number() / r.to_number()),
            BinaryOp::Rem => Value::Number(l.to_number() % r.to_number()),
            BinaryOp::Eq => Value::Bool(l.loose_equals(&r)),
            BinaryOp::StrictEq => Value::Bool(l.strict_equals(&r)),
            BinaryOp::NotEq => Value::Bool(!l.loose_equals(&r)),
            BinaryOp::StrictNotEq => Value::Bool(!l.strict_equals(&r)),
            BinaryOp::Lt => compare(&l, &r, |o| o == std::cmp::Ordering::Less),
            BinaryOp::Gt => compare(&l, &r, |o| o == std::cmp::Ordering::Greater),
            BinaryOp::Le => compare(&l, &r, |o| o != std::cmp::Ordering::Greater),
            BinaryOp::Ge => compare(&l, &r, |o| o != std::cmp::Ordering::Less),
            BinaryOp::BitAnd => Value::Number((l.to_i32() & r.to_i32()) as f64),
            BinaryOp::BitOr => Value::Number((l.to_i32() | r.to_i32()) as f64),
            BinaryOp::BitXor => Value::Number((l.to_i32() ^ r.to_i32()) as f64),
        })
    }

    pub fn member_get(&mut self, obj: &Value, property: &str) -> Result<Value, Flow> {
        if RESERVED_MEMBERS.contains(&property) {
            return Ok(Value::Undefined);
        }
        match obj {
            Value::Object(data) => Ok(data
                .borrow()
                .entries
                .iter()
                .find(|(k, _)| k == property)
                .map(|(_, v)| v.clone())
                .unwrap_or(Value::Undefined)),
            Value::Array(items) => match property {
                "length" => Ok(Value::Number(items.borrow().items.len() as f64)),
                _ => Ok(Value::Undefined),
            },
            Value::Str(s) => match property {
                "length" => Ok(Value::Number(s.chars().count() as f64)),
                _ => Ok(Value::Undefined),
            },
            Value::RegExp(data) => match property {
                "source" => Ok(Value::Str(data.source.clone())),
                "flags" => Ok(Value::Str(data.flags.clone())),
                "global" => Ok(Value::Bool(data.global)),
                _ => Ok(Value::Undefined),
            },
            Value::Undefined | Value::Null => Err(Flow::error(format!(
                "cannot read properties of {} (reading '{}')",
                obj.to_display(),
                property
            ))),
            _ => Ok(Value::Undefined),
        }
    }

    fn assign(&mut self, target: &Expr, value: Value) -> Result<(), Flow> {
        match target {
            Expr::Ident(name) => {
                for scope in self.scopes.iter_mut().rev() {
                    if let Some(slot) = scope.get_mut(name) {
                        *slot = value;
                        return Ok(());
                    }
                }
                // Undeclared assignment lands in the global scope.
                self.scopes[0].insert(name.clone(), value);
                Ok(())
            }
            Expr::Member { object, property } => {
                let obj = self.eval(object)?;
                self.member_set(&obj, property, value)
            }
            Expr::Index { object, index } => {
                let obj = self.eval(object)?;
                let idx = self.eval(index)?;
                match &obj {
                    Value::Array(items) => {
                        let mut data = items.borrow_mut();
                        if data.frozen {
                            return Err(Flow::error("cannot modify a read-only array"));
                        }
                        let i = idx.to_number();
                        if !i.is_finite() || i < 0.0 {
                            return Err(Flow::error("invalid array index"));
                        }
                        let i = i as usize;
                        if i >= data.items.len() {
                            let grow = i + 1 - data.items.len();
                            drop(data);
                            self.charge_alloc(grow * 16)?;
                            let mut data = items.borrow_mut();
                            data.items.resize(i + 1, Value::Undefined);
                            data.items[i] = value;
                        } else {
                            data.items[i] = value;
                        }
                        Ok(())
                    }
                    _ => self.member_set(&obj, &idx.to_display(), value),
                }
            }
            _ => Err(Flow::error("invalid assignment target")),
        }
    }

    fn member_set(&mut self, obj: &Value, property: &str, value: Value) -> Result<(), Flow> {
        if RESERVED_MEMBERS.contains(&property) {
            return Err(Flow::error(format!("cannot set reserved property '{}'", property)));
        }
        match obj {
            Value::Object(data) => {
                let mut data = data.borrow_mut();
                if data.frozen {
                    return Err(Flow::error("cannot modify a read-only object"));
                }
                self.alloc = self.alloc.saturating_add(value.shallow_size());
                if self.alloc > self.alloc_budget {
                    return Err(Flow::Budget("allocation budget exceeded".to_string()));
                }
                if let Some(slot) = data.entries.iter_mut().find(|(k, _)| k == property) {
                    slot.1 = value;
                } else {
                    data.entries.push((property.to_string(), value));
                }
                Ok(())
            }
            _ => Err(Flow::error(format!(
                "cannot set property '{}' on {}",
                property,
                obj.type_name()
            ))),
        }
    }

    fn eval_call(&mut self, callee: &Expr, args: &[Expr]) -> Result<Value, Flow> {
        let mut arg_values = Vec::with_capacity(args.len());
        // Method calls dispatch on the receiver before generic lookup.
        if let Expr::Member { object, property } = callee {
            let receiver = self.eval(object)?;
            for arg in args {
                arg_values.push(self.eval(arg)?);
            }
            return self.call_method(receiver, property, arg_values);
        }
        let callee_value = self.eval(callee)?;
        for arg in args {
            arg_values.push(self.eval(arg)?);
        }
        self.call_function(callee_value, arg_values)
    }

    fn call_method(
        &mut self,
        receiver: Value,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Value, Flow> {
        if RESERVED_MEMBERS.contains(&name) {
            return Err(Flow::error(format!("{} is not a function", name)));
        }
        match &receiver {
            Value::Str(s) => crate::builtins::string_method(self, s, name, &args),
            Value::Array(_) => crate::builtins::array_method(self, &receiver, name, args),
            Value::Number(n) => crate::builtins::number_method(*n, name, &args),
            Value::RegExp(data) => crate::builtins::regexp_method(self, data.as_ref(), name, &args),
            Value::Object(data) => {
                let method = data
                    .borrow()
                    .entries
                    .iter()
                    .find(|(k, _)| k == name)
                    .map(|(_, v)| v.clone());
                match method {
                    Some(f @ (Value::Arrow(_) | Value::Native { .. })) => {
                        self.call_function(f, args)
                    }
                    Some(_) | None => Err(Flow::error(format!("{} is not a function", name))),
                }
            }
            other => Err(Flow::error(format!(
                "cannot call '{}' on {}",
                name,
                other.type_name()
            ))),
        }
    }

    pub fn call_function(&mut self, callee: Value, args: Vec<Value>) -> Result<Value, Flow> {
        self.tick()?;
        match callee {
            Value::Native { f, .. } => f(self, &args),
            Value::Arrow(def) => {
                if self.scopes.len() > 64 {
                    return Err(Flow::error("call stack depth exceeded"));
                }
                let mut scope = HashMap::new();
                for (i, param) in def.params.iter().enumerate() {
                    scope.insert(
                        param.clone(),
                        args.get(i).cloned().unwrap_or(Value::Undefined),
                    );
                }
                self.scopes.push(scope);
                let result = match &def.body {
                    ArrowBody::Expr(expr) => self.eval(expr),
                    ArrowBody::Block(stmts) => match self.exec_block(stmts) {
                        Ok(()) => Ok(Value::Undefined),
                        Err(Flow::Return(v)) => Ok(v),
                        Err(other) => Err(other),
                    },
                };
                self.scopes.pop();
                result
            }
            other => Err(Flow::error(format!("{} is not a function", other.to_display()))),
        }
    }
}

fn compare(l: &Value, r: &Value, pred: fn(std::cmp::Ordering) -> bool) -> Value {
    let ordering = match (l, r) {
        (Value::Str(a), Value::Str(b)) => a.cmp(b),
        _ => {
            let (a, b) = (l.to_number(), r.to_number());
            if a.is_nan() || b.is_nan() {
                return Value::Bool(false);
            }
            match a.partial_cmp(&b) {
                Some(o) => o,
                None => return Value::Bool(false),
            }
        }
    };
    Value::Bool(pred(ordering))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use std::time::Duration;

    fn run_src(src: &str) -> Result<(Value, Interp), String> {
        let program = parse(src).map_err(|e| e.to_string())?;
        let mut interp = Interp::new(
            crate::OP_BUDGET,
            crate::ALLOC_BUDGET,
            Instant::now() + Duration::from_secs(5),
        );
        crate::builtins::install_globals(
            &mut interp,
            &serde_json::json!({}),
            &serde_json::Map::new(),
            &serde_json::json!({}),
        );
        match interp.run(&program) {
            Ok(v) => Ok((v, interp)),
            Err(Flow::Throw(v)) => Err(v.to_display()),
            Err(Flow::Budget(m)) => Err(m),
            Err(Flow::Timeout) => Err("timeout".to_string()),
            Err(_) => Err("unexpected control flow".to_string()),
        }
    }

    fn output_of(src: &str) -> Vec<(String, Value)> {
        let (_, interp) = run_src(src).unwrap();
        let Some(Value::Object(out)) = interp.lookup("output") else {
            panic!("no output object")
        };
        let entries = out.borrow().entries.clone();
        entries
    }

    #[test]
    fn arithmetic_and_coercion() {
        let out = output_of("output.n = ('2'|0) + ('3'|0);");
        assert!(matches!(out[0].1, Value::Number(n) if n == 5.0));
    }

    #[test]
    fn loops_and_compound_assignment() {
        let out = output_of("let t = 0; for (let i = 1; i <= 4; i++) { t += i; } output.t = t;");
        assert!(matches!(out[0].1, Value::Number(n) if n == 10.0));
    }

    #[test]
    fn arrow_functions_and_array_methods() {
        let out = output_of("output.sum = [1,2,3,4].map(n => n * 2).filter(n => n > 2).length;");
        assert!(matches!(out[0].1, Value::Number(n) if n == 3.0));
    }

    #[test]
    fn while_true_hits_a_budget() {
        let program = parse("while (true) {}").unwrap();
        let mut interp = Interp::new(
            10_000,
            crate::ALLOC_BUDGET,
            Instant::now() + Duration::from_secs(60),
        );
        match interp.run(&program) {
            Err(Flow::Budget(_)) => {}
            other => panic!("expected budget exhaustion, got {:?}", other),
        }
    }

    #[test]
    fn wall_clock_deadline_fires() {
        let program = parse("while (true) {}").unwrap();
        let mut interp = Interp::new(u64::MAX, crate::ALLOC_BUDGET, Instant::now());
        match interp.run(&program) {
            Err(Flow::Timeout) => {}
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[test]
    fn giant_allocation_is_an_error() {
        let err = run_src(
            "let s = 'x'; while (true) { s = s + s; }",
        )
        .unwrap_err();
        assert!(err.contains("allocation budget"), "got: {}", err);
    }

    #[test]
    fn reserved_members_never_resolve() {
        let (v, _) = run_src("return ({}).constructor;").unwrap();
        assert!(matches!(v, Value::Undefined));
        let (v, _) = run_src("let o = {a: 1}; return o.__proto__;").unwrap();
        assert!(matches!(v, Value::Undefined));
        let err = run_src("({}).constructor('return 1')").unwrap_err();
        assert!(err.contains("not a function"));
    }

    #[test]
    fn unknown_identifiers_throw() {
        let err = run_src("require('fs')").unwrap_err();
        assert!(err.contains("require is not defined"));
        let err = run_src("fetch('http://example.com')").unwrap_err();
        assert!(err.contains("fetch is not defined"));
        let err = run_src("process.exit(1)").unwrap_err();
        assert!(err.contains("process is not defined"));
    }

    #[test]
    fn typeof_missing_does_not_throw() {
        let (v, _) = run_src("return typeof missing;").unwrap();
        assert!(matches!(v, Value::Str(s) if s == "undefined"));
    }

    #[test]
    fn user_throw_surfaces_as_error() {
        let err = run_src("throw 'boom';").unwrap_err();
        assert_eq!(err, "boom");
    }

    #[test]
    fn frozen_inputs_reject_writes() {
        let program = parse("inputs.a = 'mutated';").unwrap();
        let mut interp = Interp::new(
            crate::OP_BUDGET,
            crate::ALLOC_BUDGET,
            Instant::now() + Duration::from_secs(5),
        );
        crate::builtins::install_globals(
            &mut interp,
            &serde_json::json!({"a": "original"}),
            &serde_json::Map::new(),
            &serde_json::json!({}),
        );
        match interp.run(&program) {
            Err(Flow::Throw(v)) => assert!(v.to_display().contains("read-only")),
            other => panic!("expected throw, got {:?}", other),
        }
    }

    #[test]
    fn ternary_and_logical() {
        let (v, _) = run_src("return (1 < 2 ? 'a' : 'b') + (false || 'c');").unwrap();
        assert!(matches!(v, Value::Str(s) if s == "ac"));
    }

    #[test]
    fn string_comparison_is_lexicographic() {
        let (v, _) = run_src("return 'apple' < 'banana';").unwrap();
        assert!(matches!(v, Value::Bool(true)));
    }
}
