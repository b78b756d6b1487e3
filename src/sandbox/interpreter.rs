//! Tree-walking evaluator with step metering.
//!
//! An [`Interpreter`] lives for exactly one entry-point call. It borrows the
//! unit's functions, globals and RNG, plus the live session context, and is
//! dropped when the call returns.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Instant;

use rand_chacha::ChaCha8Rng;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use super::ast::{AssignOp, BinOp, Callee, Expr, Function, PathSeg, Stmt, UnaryOp};
use super::capabilities;
use super::value::Value;
use super::SandboxConfig;
use crate::strategy::{ExtraValue, SessionContext};

/// Steps between wall-clock checks.
const CLOCK_CHECK_INTERVAL: u64 = 64;

/// Combined block/expression/call nesting before evaluation is refused.
/// Bounds native stack use independently of the script's shape.
const MAX_NESTING: usize = 160;

/// Why evaluation stopped abnormally.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Fault {
    Timeout,
    Error { message: String, line: usize },
}

pub(crate) type Exec<T> = Result<T, Fault>;

pub(crate) fn fault(line: usize, message: impl Into<String>) -> Fault {
    Fault::Error {
        message: message.into(),
        line,
    }
}

enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

/// Local scopes of one function activation.
#[derive(Default)]
struct Frame {
    scopes: Vec<HashMap<String, Value>>,
}

enum Key {
    Name(String),
    Value(Value),
}

impl Key {
    fn as_map_key(&self, line: usize) -> Exec<&str> {
        match self {
            Key::Name(name) => Ok(name),
            Key::Value(Value::Str(s)) => Ok(s),
            Key::Value(other) => Err(fault(
                line,
                format!("map keys are strings, got {}", other.type_name()),
            )),
        }
    }

    fn as_list_index(&self, len: usize, line: usize) -> Exec<usize> {
        match self {
            Key::Value(Value::Number(n)) => list_index(*n, len, line),
            Key::Name(name) => Err(fault(line, format!("lists have no field `{name}`"))),
            Key::Value(other) => Err(fault(
                line,
                format!("list index must be a number, got {}", other.type_name()),
            )),
        }
    }
}

pub(crate) struct Interpreter<'a> {
    functions: &'a HashMap<String, Function>,
    imports: &'a HashSet<&'static str>,
    globals: &'a mut HashMap<String, Value>,
    pub(super) rng: &'a mut ChaCha8Rng,
    ctx: Option<&'a mut SessionContext>,
    pub(super) config: &'a SandboxConfig,
    pub(super) epoch: Instant,
    pub(super) deadline: Instant,
    steps: u64,
    call_depth: usize,
    nesting: usize,
}

impl<'a> Interpreter<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        functions: &'a HashMap<String, Function>,
        imports: &'a HashSet<&'static str>,
        globals: &'a mut HashMap<String, Value>,
        rng: &'a mut ChaCha8Rng,
        ctx: Option<&'a mut SessionContext>,
        config: &'a SandboxConfig,
        epoch: Instant,
        deadline: Instant,
    ) -> Self {
        Self {
            functions,
            imports,
            globals,
            rng,
            ctx,
            config,
            epoch,
            deadline,
            steps: 0,
            call_depth: 0,
            nesting: 0,
        }
    }

    /// Evaluate a top-level initializer (no locals, no session context).
    pub(crate) fn eval_global(&mut self, expr: &Expr) -> Exec<Value> {
        let mut frame = Frame::default();
        self.eval(&mut frame, expr)
    }

    pub(crate) fn define_global(&mut self, name: &str, value: Value) {
        self.globals.insert(name.to_string(), value);
    }

    /// Call a script-defined function by name.
    pub(crate) fn call_function(&mut self, name: &str, args: Vec<Value>, line: usize) -> Exec<Value> {
        let functions = self.functions;
        let func = functions
            .get(name)
            .ok_or_else(|| fault(line, format!("unknown function `{name}`")))?;
        if func.params.len() != args.len() {
            return Err(fault(
                line,
                format!(
                    "`{name}` takes {} argument(s) but {} were given",
                    func.params.len(),
                    args.len()
                ),
            ));
        }
        if self.call_depth >= self.config.max_call_depth {
            return Err(fault(
                line,
                format!("call depth limit exceeded ({})", self.config.max_call_depth),
            ));
        }

        let scope: HashMap<String, Value> = func.params.iter().cloned().zip(args).collect();
        let mut frame = Frame {
            scopes: vec![scope],
        };

        self.call_depth += 1;
        let flow = self.exec_block(&mut frame, &func.body)?;
        self.call_depth -= 1;

        match flow {
            Flow::Return(value) => Ok(value),
            Flow::Normal => Ok(Value::Nil),
            Flow::Break | Flow::Continue => Err(fault(
                func.span.line,
                "`break`/`continue` outside of a loop",
            )),
        }
    }

    pub(super) fn tick(&mut self) -> Exec<()> {
        self.steps += 1;
        if self.steps % CLOCK_CHECK_INTERVAL == 0 && Instant::now() >= self.deadline {
            return Err(Fault::Timeout);
        }
        Ok(())
    }

    fn enter(&mut self, line: usize) -> Exec<()> {
        self.nesting += 1;
        if self.nesting > MAX_NESTING {
            return Err(fault(line, "evaluation nested too deeply"));
        }
        Ok(())
    }

    pub(super) fn check_len(&self, len: usize, line: usize) -> Exec<()> {
        if len > self.config.max_collection_len {
            return Err(fault(
                line,
                format!(
                    "collection length {len} exceeds the limit of {}",
                    self.config.max_collection_len
                ),
            ));
        }
        Ok(())
    }

    pub(super) fn check_str(&self, s: &str, line: usize) -> Exec<()> {
        check_str_len(s, self.config, line)
    }

    // -----------------------------------------------------------------------
    // Statements
    // -----------------------------------------------------------------------

    fn exec_block(&mut self, frame: &mut Frame, body: &[Stmt]) -> Exec<Flow> {
        let line = body.first().map_or(0, |s| s.span().line);
        self.enter(line)?;
        frame.scopes.push(HashMap::new());
        let flow = self.exec_stmts(frame, body);
        frame.scopes.pop();
        self.nesting -= 1;
        flow
    }

    fn exec_stmts(&mut self, frame: &mut Frame, body: &[Stmt]) -> Exec<Flow> {
        for stmt in body {
            match self.exec_stmt(frame, stmt)? {
                Flow::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, frame: &mut Frame, stmt: &Stmt) -> Exec<Flow> {
        self.tick()?;
        match stmt {
            Stmt::Let { name, value, .. } => {
                let value = self.eval(frame, value)?;
                if let Some(scope) = frame.scopes.last_mut() {
                    scope.insert(name.clone(), value);
                }
                Ok(Flow::Normal)
            }
            Stmt::Assign {
                target,
                path,
                op,
                value,
                span,
            } => {
                self.assign(frame, target, path, *op, value, span.line)?;
                Ok(Flow::Normal)
            }
            Stmt::If {
                cond,
                then_body,
                else_body,
                ..
            } => {
                if self.eval(frame, cond)?.truthy() {
                    self.exec_block(frame, then_body)
                } else if let Some(else_body) = else_body {
                    self.exec_block(frame, else_body)
                } else {
                    Ok(Flow::Normal)
                }
            }
            Stmt::While { cond, body, .. } => {
                loop {
                    self.tick()?;
                    if !self.eval(frame, cond)?.truthy() {
                        break;
                    }
                    match self.exec_block(frame, body)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::For {
                var,
                iter,
                body,
                span,
            } => {
                let items = match self.eval(frame, iter)? {
                    Value::List(items) => items,
                    Value::Map(entries) => entries.into_keys().map(Value::Str).collect(),
                    Value::Str(s) => s.chars().map(|c| Value::Str(c.to_string())).collect(),
                    other => {
                        return Err(fault(
                            span.line,
                            format!("cannot iterate over a {}", other.type_name()),
                        ))
                    }
                };
                for item in items {
                    self.tick()?;
                    self.enter(span.line)?;
                    frame
                        .scopes
                        .push(HashMap::from([(var.clone(), item)]));
                    let flow = self.exec_stmts(frame, body);
                    frame.scopes.pop();
                    self.nesting -= 1;
                    match flow? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Return { value, .. } => {
                let value = match value {
                    Some(expr) => self.eval(frame, expr)?,
                    None => Value::Nil,
                };
                Ok(Flow::Return(value))
            }
            Stmt::Break(_) => Ok(Flow::Break),
            Stmt::Continue(_) => Ok(Flow::Continue),
            Stmt::Raise { value, span } => {
                let value = self.eval(frame, value)?;
                Err(fault(span.line, value.to_string()))
            }
            Stmt::Expr(expr) => {
                self.eval(frame, expr)?;
                Ok(Flow::Normal)
            }
        }
    }

    fn assign(
        &mut self,
        frame: &mut Frame,
        target: &str,
        path: &[PathSeg],
        op: AssignOp,
        value: &Expr,
        line: usize,
    ) -> Exec<()> {
        let rhs = self.eval(frame, value)?;
        let mut keys = Vec::with_capacity(path.len());
        for seg in path {
            keys.push(match seg {
                PathSeg::Field(name) => Key::Name(name.clone()),
                PathSeg::Index(expr) => Key::Value(self.eval(frame, expr)?),
            });
        }

        let is_ctx = matches!(lookup_ref(frame, self.globals, target), Some(Value::Context));
        if is_ctx && !keys.is_empty() {
            return self.assign_ctx(&keys, op, rhs, line);
        }

        let config = self.config;
        let slot = match frame.scopes.iter_mut().rev().find_map(|s| s.get_mut(target)) {
            Some(slot) => slot,
            None => self.globals.get_mut(target).ok_or_else(|| {
                fault(line, format!("assignment to undeclared variable `{target}`"))
            })?,
        };
        let place = walk_mut(slot, &keys, op == AssignOp::Set, config, line)?;
        let new = match op {
            AssignOp::Set => rhs,
            other => arith(bin_op(other), place.clone(), rhs, config, line)?,
        };
        *place = new;
        Ok(())
    }

    /// Writes through the context handle: only `ctx.extra.<key>` is writable.
    fn assign_ctx(&mut self, keys: &[Key], op: AssignOp, rhs: Value, line: usize) -> Exec<()> {
        let field = keys[0].as_map_key(line)?.to_string();
        if field != "extra" {
            return Err(fault(line, format!("ctx.{field} is read-only")));
        }
        let key = match keys.get(1) {
            Some(key) => key.as_map_key(line)?.to_string(),
            None => return Err(fault(line, "ctx.extra cannot be replaced; assign its keys")),
        };
        if keys.len() > 2 {
            return Err(fault(line, "ctx.extra values are scalars"));
        }

        let config = self.config;
        let ctx = self
            .ctx
            .as_deref_mut()
            .ok_or_else(|| fault(line, "no session context is available here"))?;
        let new = match op {
            AssignOp::Set => rhs,
            other => {
                let current = ctx.get_extra(&key).map(Value::from).unwrap_or_default();
                arith(bin_op(other), current, rhs, config, line)?
            }
        };
        if new.is_nil() {
            ctx.remove_extra(&key);
            return Ok(());
        }
        let stored = ExtraValue::try_from(&new).map_err(|type_name| {
            fault(line, format!("ctx.extra only stores scalars, got {type_name}"))
        })?;
        ctx.set_extra(&key, stored)
            .map_err(|e| fault(line, e.to_string()))
    }

    // -----------------------------------------------------------------------
    // Expressions
    // -----------------------------------------------------------------------

    fn eval(&mut self, frame: &mut Frame, expr: &Expr) -> Exec<Value> {
        self.enter(expr.span().line)?;
        let value = self.eval_inner(frame, expr);
        self.nesting -= 1;
        value
    }

    fn eval_inner(&mut self, frame: &mut Frame, expr: &Expr) -> Exec<Value> {
        match expr {
            Expr::Nil(_) => Ok(Value::Nil),
            Expr::Bool(b, _) => Ok(Value::Bool(*b)),
            Expr::Number(n, _) => Ok(Value::Number(*n)),
            Expr::Str(s, span) => {
                self.check_str(s, span.line)?;
                Ok(Value::Str(s.clone()))
            }
            Expr::List(items, span) => {
                self.check_len(items.len(), span.line)?;
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(frame, item)?);
                }
                Ok(Value::List(values))
            }
            Expr::Map(entries, span) => {
                self.check_len(entries.len(), span.line)?;
                let mut map = BTreeMap::new();
                for (key, value) in entries {
                    let value = self.eval(frame, value)?;
                    map.insert(key.clone(), value);
                }
                Ok(Value::Map(map))
            }
            Expr::Var(name, span) => self.lookup(frame, name, span.line),
            Expr::Field { target, name, span } => {
                // Borrow plain variables instead of copying the whole value.
                if let Expr::Var(var, _) = target.as_ref() {
                    if let Some(Value::Map(map)) = lookup_ref(frame, self.globals, var) {
                        return Ok(map.get(name).cloned().unwrap_or_default());
                    }
                }
                let target = self.eval(frame, target)?;
                self.get_field(target, name, span.line)
            }
            Expr::Index {
                target,
                index,
                span,
            } => {
                let index = self.eval(frame, index)?;
                if let Expr::Var(var, _) = target.as_ref() {
                    if let Some(found) = lookup_ref(frame, self.globals, var) {
                        match (found, &index) {
                            (Value::List(items), Value::Number(n)) => {
                                let i = list_index(*n, items.len(), span.line)?;
                                return Ok(items[i].clone());
                            }
                            (Value::Map(map), Value::Str(key)) => {
                                return Ok(map.get(key).cloned().unwrap_or_default())
                            }
                            _ => {}
                        }
                    }
                }
                let target = self.eval(frame, target)?;
                self.get_index(target, index, span.line)
            }
            Expr::Call { callee, args, span } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(frame, arg)?);
                }
                match callee {
                    Callee::Free(name) if self.functions.contains_key(name) => {
                        self.call_function(name, values, span.line)
                    }
                    Callee::Free(name) => self.call_builtin(name, values, span.line),
                    Callee::Qualified { module, member } => {
                        let Some(module) = self.imports.get(module.as_str()).copied() else {
                            return Err(fault(
                                span.line,
                                format!("module `{module}` is not imported"),
                            ));
                        };
                        self.call_module(module, member, values, span.line)
                    }
                }
            }
            Expr::Unary { op, operand, span } => {
                let value = self.eval(frame, operand)?;
                match (op, value) {
                    (UnaryOp::Not, value) => Ok(Value::Bool(!value.truthy())),
                    (UnaryOp::Neg, Value::Number(n)) => Ok(Value::Number(-n)),
                    (UnaryOp::Neg, other) => Err(fault(
                        span.line,
                        format!("cannot negate a {}", other.type_name()),
                    )),
                }
            }
            Expr::Binary {
                op,
                left,
                right,
                span,
            } => {
                let left = self.eval(frame, left)?;
                match op {
                    BinOp::And if !left.truthy() => Ok(left),
                    BinOp::Or if left.truthy() => Ok(left),
                    BinOp::And | BinOp::Or => self.eval(frame, right),
                    _ => {
                        let right = self.eval(frame, right)?;
                        arith(*op, left, right, self.config, span.line)
                    }
                }
            }
        }
    }

    fn lookup(&self, frame: &Frame, name: &str, line: usize) -> Exec<Value> {
        if let Some(value) = lookup_ref(frame, self.globals, name) {
            return Ok(value.clone());
        }
        if let Some(module) = self.imports.get(name).copied() {
            return Ok(Value::Module(module));
        }
        Err(fault(line, format!("undefined variable `{name}`")))
    }

    fn get_field(&self, target: Value, name: &str, line: usize) -> Exec<Value> {
        match target {
            Value::Map(mut map) => Ok(map.remove(name).unwrap_or_default()),
            Value::Context => self.ctx_field(name, line),
            Value::Module(module) => {
                let spec = capabilities::module(module)
                    .ok_or_else(|| fault(line, format!("unknown module `{module}`")))?;
                if let Some(value) = spec.constant(name) {
                    return Ok(Value::Number(value));
                }
                if spec.function(name).is_some() {
                    return Err(fault(line, format!("`{module}.{name}` is a function; call it")));
                }
                Err(fault(line, format!("module `{module}` has no member `{name}`")))
            }
            other => Err(fault(
                line,
                format!("cannot read field `{name}` of a {}", other.type_name()),
            )),
        }
    }

    fn get_index(&self, target: Value, index: Value, line: usize) -> Exec<Value> {
        match (target, index) {
            (Value::List(mut items), Value::Number(n)) => {
                let i = list_index(n, items.len(), line)?;
                Ok(items.swap_remove(i))
            }
            (Value::Map(mut map), Value::Str(key)) => Ok(map.remove(&key).unwrap_or_default()),
            (Value::Str(s), Value::Number(n)) => {
                let chars: Vec<char> = s.chars().collect();
                let i = list_index(n, chars.len(), line)?;
                Ok(Value::Str(chars[i].to_string()))
            }
            (target @ (Value::Context | Value::Module(_)), Value::Str(key)) => {
                self.get_field(target, &key, line)
            }
            (target, index) => Err(fault(
                line,
                format!(
                    "cannot index a {} with a {}",
                    target.type_name(),
                    index.type_name()
                ),
            )),
        }
    }

    /// Read-only view of the session context.
    fn ctx_field(&self, name: &str, line: usize) -> Exec<Value> {
        let ctx = self
            .ctx
            .as_deref()
            .ok_or_else(|| fault(line, "no session context is available here"))?;
        let value = match name {
            "balance" => Value::Number(ctx.balance_f64()),
            "start_balance" => decimal(ctx.start_balance()),
            "profit" => decimal(ctx.profit()),
            "currency" => Value::Str(ctx.currency().to_string()),
            "bets_placed" => Value::Number(ctx.bets_placed() as f64),
            "wins" => Value::Number(ctx.wins() as f64),
            "losses" => Value::Number(ctx.losses() as f64),
            "failed" => Value::Number(ctx.failed() as f64),
            "streak" => Value::Number(ctx.streak() as f64),
            "best_streak" => Value::Number(ctx.best_streak() as f64),
            "worst_streak" => Value::Number(ctx.worst_streak() as f64),
            "wagered" => decimal(ctx.wagered()),
            "limits" => {
                let limits = ctx.limits();
                Value::map([
                    ("max_bets", opt_number(limits.max_bets.map(|n| n as f64))),
                    (
                        "max_duration_secs",
                        opt_number(limits.max_duration_secs.map(|n| n as f64)),
                    ),
                    ("stop_loss", opt_number(limits.stop_loss.and_then(|d| d.to_f64()))),
                    ("take_profit", opt_number(limits.take_profit.and_then(|d| d.to_f64()))),
                ])
            }
            "extra" => Value::Map(
                ctx.extra()
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::from(v)))
                    .collect(),
            ),
            other => return Err(fault(line, format!("ctx has no field `{other}`"))),
        };
        Ok(value)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn lookup_ref<'v>(
    frame: &'v Frame,
    globals: &'v HashMap<String, Value>,
    name: &str,
) -> Option<&'v Value> {
    frame
        .scopes
        .iter()
        .rev()
        .find_map(|scope| scope.get(name))
        .or_else(|| globals.get(name))
}

fn walk_mut<'v>(
    slot: &'v mut Value,
    keys: &[Key],
    create: bool,
    config: &SandboxConfig,
    line: usize,
) -> Exec<&'v mut Value> {
    let mut cur = slot;
    for (i, key) in keys.iter().enumerate() {
        let last = i + 1 == keys.len();
        cur = match cur {
            Value::Map(map) => {
                let name = key.as_map_key(line)?;
                if !map.contains_key(name) {
                    if !(create && last) {
                        return Err(fault(line, format!("map has no key `{name}`")));
                    }
                    if map.len() >= config.max_collection_len {
                        return Err(fault(
                            line,
                            format!(
                                "collection length exceeds the limit of {}",
                                config.max_collection_len
                            ),
                        ));
                    }
                    map.insert(name.to_string(), Value::Nil);
                }
                map.get_mut(name)
                    .ok_or_else(|| fault(line, format!("map has no key `{name}`")))?
            }
            Value::List(items) => {
                let i = key.as_list_index(items.len(), line)?;
                &mut items[i]
            }
            other => {
                return Err(fault(
                    line,
                    format!("cannot assign into a {}", other.type_name()),
                ))
            }
        };
    }
    Ok(cur)
}

pub(super) fn list_index(n: f64, len: usize, line: usize) -> Exec<usize> {
    if n.fract() != 0.0 || n < 0.0 || n >= len as f64 {
        return Err(fault(
            line,
            format!("index {} out of range for length {len}", Value::Number(n)),
        ));
    }
    Ok(n as usize)
}

fn check_str_len(s: &str, config: &SandboxConfig, line: usize) -> Exec<()> {
    if s.len() > config.max_string_len {
        return Err(fault(
            line,
            format!(
                "string length {} exceeds the limit of {}",
                s.len(),
                config.max_string_len
            ),
        ));
    }
    Ok(())
}

fn bin_op(op: AssignOp) -> BinOp {
    match op {
        AssignOp::Add => BinOp::Add,
        AssignOp::Sub => BinOp::Sub,
        AssignOp::Mul => BinOp::Mul,
        // `Set` never reaches here.
        AssignOp::Div | AssignOp::Set => BinOp::Div,
    }
}

fn decimal(d: Decimal) -> Value {
    Value::Number(d.to_f64().unwrap_or(0.0))
}

fn opt_number(n: Option<f64>) -> Value {
    n.map(Value::Number).unwrap_or_default()
}

fn op_symbol(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::Rem => "%",
        BinOp::Eq => "==",
        BinOp::Ne => "!=",
        BinOp::Lt => "<",
        BinOp::Le => "<=",
        BinOp::Gt => ">",
        BinOp::Ge => ">=",
        BinOp::And => "and",
        BinOp::Or => "or",
    }
}

/// Apply a non-short-circuit binary operator.
fn arith(op: BinOp, left: Value, right: Value, config: &SandboxConfig, line: usize) -> Exec<Value> {
    use Value::{List, Number, Str};

    let value = match (op, left, right) {
        (BinOp::Eq, l, r) => Value::Bool(l == r),
        (BinOp::Ne, l, r) => Value::Bool(l != r),
        (BinOp::And, l, r) => if l.truthy() { r } else { l },
        (BinOp::Or, l, r) => if l.truthy() { l } else { r },

        (BinOp::Add, Number(a), Number(b)) => Number(a + b),
        (BinOp::Add, Str(mut a), Str(b)) => {
            a.push_str(&b);
            check_str_len(&a, config, line)?;
            Str(a)
        }
        (BinOp::Add, List(mut a), List(b)) => {
            a.extend(b);
            if a.len() > config.max_collection_len {
                return Err(fault(
                    line,
                    format!(
                        "collection length {} exceeds the limit of {}",
                        a.len(),
                        config.max_collection_len
                    ),
                ));
            }
            List(a)
        }
        (BinOp::Sub, Number(a), Number(b)) => Number(a - b),
        (BinOp::Mul, Number(a), Number(b)) => Number(a * b),
        (BinOp::Div, Number(_), Number(b)) if b == 0.0 => {
            return Err(fault(line, "division by zero"))
        }
        (BinOp::Div, Number(a), Number(b)) => Number(a / b),
        (BinOp::Rem, Number(_), Number(b)) if b == 0.0 => {
            return Err(fault(line, "modulo by zero"))
        }
        (BinOp::Rem, Number(a), Number(b)) => Number(a % b),

        (BinOp::Lt, Number(a), Number(b)) => Value::Bool(a < b),
        (BinOp::Le, Number(a), Number(b)) => Value::Bool(a <= b),
        (BinOp::Gt, Number(a), Number(b)) => Value::Bool(a > b),
        (BinOp::Ge, Number(a), Number(b)) => Value::Bool(a >= b),
        (BinOp::Lt, Str(a), Str(b)) => Value::Bool(a < b),
        (BinOp::Le, Str(a), Str(b)) => Value::Bool(a <= b),
        (BinOp::Gt, Str(a), Str(b)) => Value::Bool(a > b),
        (BinOp::Ge, Str(a), Str(b)) => Value::Bool(a >= b),

        (op, l, r) => {
            return Err(fault(
                line,
                format!(
                    "unsupported operand types for {}: {} and {}",
                    op_symbol(op),
                    l.type_name(),
                    r.type_name()
                ),
            ))
        }
    };
    Ok(value)
}
