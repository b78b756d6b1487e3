//! Strategy sandbox.
//!
//! Untrusted strategy scripts are parsed, validated against a closed
//! capability set, and then interpreted with a per-call wall-clock budget.
//! A script can only reach the allow-listed modules, the built-in function
//! table, and the session context handed to its entry points. It has no way
//! to touch files, processes, the network, or the host's own state.
//!
//! ```text
//! source ──► lexer ──► parser ──► validator ──► StrategyUnit::call ──► Value
//!                                    │
//!                                    └─► ValidationReport (errors / warnings)
//! ```

mod ast;
pub mod capabilities;
mod interpreter;
mod lexer;
mod natives;
mod parser;
mod validator;
pub mod value;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::{Duration, Instant};

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::strategy::{SessionContext, StrategyMeta};
use crate::types::StrategyError;

use interpreter::{Fault, Interpreter};
use lexer::Span;
pub use value::Value;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Resource limits applied to every loaded unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Wall-clock budget for one entry-point call.
    pub call_timeout_ms: u64,
    pub max_call_depth: usize,
    pub max_collection_len: usize,
    /// Maximum string length in bytes.
    pub max_string_len: usize,
    /// Seed for the `random` module. Unseeded units draw from the OS.
    pub rng_seed: Option<u64>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 250,
            max_call_depth: 32,
            max_collection_len: 10_000,
            max_string_len: 65_536,
            rng_seed: None,
        }
    }
}

impl SandboxConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

/// A positioned validation message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub line: usize,
    pub col: usize,
    pub message: String,
}

impl Diagnostic {
    pub(crate) fn new(span: Span, message: impl Into<String>) -> Self {
        Self {
            line: span.line,
            col: span.col,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.line, self.col, self.message)
    }
}

/// Outcome of static validation. Zero errors means the script may load.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<Diagnostic>,
    pub warnings: Vec<Diagnostic>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} error(s), {} warning(s)",
            self.errors.len(),
            self.warnings.len()
        )?;
        for d in &self.errors {
            write!(f, "\n  error {d}")?;
        }
        for d in &self.warnings {
            write!(f, "\n  warning {d}")?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("strategy script rejected: {0}")]
    Rejected(ValidationReport),

    #[error("strategy globals failed to initialize: {0}")]
    Initialization(StrategyError),
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Script functions the host calls. Each takes `ctx` first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryPoint {
    NextBet,
    OnResult,
    Init,
    OnSessionStart,
    OnSessionEnd,
}

impl EntryPoint {
    pub const ALL: [EntryPoint; 5] = [
        EntryPoint::NextBet,
        EntryPoint::OnResult,
        EntryPoint::Init,
        EntryPoint::OnSessionStart,
        EntryPoint::OnSessionEnd,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            EntryPoint::NextBet => "next_bet",
            EntryPoint::OnResult => "on_result",
            EntryPoint::Init => "init",
            EntryPoint::OnSessionStart => "on_session_start",
            EntryPoint::OnSessionEnd => "on_session_end",
        }
    }

    /// Parameter count, including `ctx`.
    pub fn arity(&self) -> usize {
        match self {
            EntryPoint::NextBet | EntryPoint::OnSessionStart => 1,
            EntryPoint::OnResult | EntryPoint::Init | EntryPoint::OnSessionEnd => 2,
        }
    }

    pub fn signature(&self) -> &'static str {
        match self {
            EntryPoint::NextBet => "next_bet(ctx)",
            EntryPoint::OnResult => "on_result(ctx, outcome)",
            EntryPoint::Init => "init(ctx, params)",
            EntryPoint::OnSessionStart => "on_session_start(ctx)",
            EntryPoint::OnSessionEnd => "on_session_end(ctx, reason)",
        }
    }

    pub fn is_required(&self) -> bool {
        matches!(self, EntryPoint::NextBet)
    }
}

impl fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ---------------------------------------------------------------------------
// Sandbox
// ---------------------------------------------------------------------------

/// Validates and loads strategy scripts under a fixed set of limits.
#[derive(Debug, Clone, Default)]
pub struct Sandbox {
    config: SandboxConfig,
}

impl Sandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Static checks only. Never executes anything.
    pub fn validate(&self, source: &str) -> ValidationReport {
        match parser::parse(source) {
            Ok(program) => validator::validate_program(&program),
            Err(diagnostic) => ValidationReport {
                errors: vec![diagnostic],
                warnings: Vec::new(),
            },
        }
    }

    /// Validate, then evaluate the script's globals and bind its entry points.
    ///
    /// Validation always runs, whatever `meta.trusted` says.
    pub fn load(&self, meta: StrategyMeta, source: &str) -> Result<StrategyUnit, LoadError> {
        let program = match parser::parse(source) {
            Ok(program) => program,
            Err(diagnostic) => {
                return Err(LoadError::Rejected(ValidationReport {
                    errors: vec![diagnostic],
                    warnings: Vec::new(),
                }))
            }
        };
        let report = validator::validate_program(&program);
        if !report.is_ok() {
            warn!(strategy = %meta.name, errors = report.errors.len(), "Strategy script rejected");
            return Err(LoadError::Rejected(report));
        }
        for w in &report.warnings {
            warn!(strategy = %meta.name, line = w.line, "{}", w.message);
        }

        let entry_points: HashSet<EntryPoint> = EntryPoint::ALL
            .into_iter()
            .filter(|entry| {
                program
                    .functions
                    .iter()
                    .any(|f| f.name == entry.name() && f.params.len() == entry.arity())
            })
            .collect();
        let imports: HashSet<&'static str> = program
            .imports
            .iter()
            .filter_map(|i| capabilities::module(&i.module).map(|m| m.name))
            .collect();
        let rng = match self.config.rng_seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::seed_from_u64(rand::random()),
        };
        let globals_src = program.globals;
        let functions: HashMap<String, ast::Function> = program
            .functions
            .into_iter()
            .map(|f| (f.name.clone(), f))
            .collect();

        let mut unit = StrategyUnit {
            meta,
            source: source.to_string(),
            validated: true,
            warnings: report.warnings,
            entry_points,
            functions,
            imports,
            globals: HashMap::new(),
            rng,
            config: self.config.clone(),
            epoch: Instant::now(),
        };
        unit.init_globals(&globals_src)
            .map_err(LoadError::Initialization)?;

        debug!(
            strategy = %unit.meta.name,
            globals = unit.globals.len(),
            entry_points = unit.entry_points.len(),
            "Strategy script loaded"
        );
        Ok(unit)
    }
}

// ---------------------------------------------------------------------------
// Loaded unit
// ---------------------------------------------------------------------------

/// A validated, loaded script with its own globals and RNG.
pub struct StrategyUnit {
    meta: StrategyMeta,
    source: String,
    validated: bool,
    warnings: Vec<Diagnostic>,
    entry_points: HashSet<EntryPoint>,
    functions: HashMap<String, ast::Function>,
    imports: HashSet<&'static str>,
    globals: HashMap<String, Value>,
    rng: ChaCha8Rng,
    config: SandboxConfig,
    epoch: Instant,
}

impl fmt::Debug for StrategyUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyUnit")
            .field("meta", &self.meta)
            .field("entry_points", &self.entry_points)
            .field("globals", &self.globals)
            .finish_non_exhaustive()
    }
}

impl StrategyUnit {
    pub fn meta(&self) -> &StrategyMeta {
        &self.meta
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_validated(&self) -> bool {
        self.validated
    }

    pub fn warnings(&self) -> &[Diagnostic] {
        &self.warnings
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Whether the script defines `entry` with the expected arity.
    pub fn has_entry(&self, entry: EntryPoint) -> bool {
        self.entry_points.contains(&entry)
    }

    /// Current value of a script global.
    pub fn global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    fn init_globals(&mut self, globals: &[ast::Global]) -> Result<(), StrategyError> {
        let timeout = self.config.call_timeout();
        let start = Instant::now();
        let mut interp = Interpreter::new(
            &self.functions,
            &self.imports,
            &mut self.globals,
            &mut self.rng,
            None,
            &self.config,
            self.epoch,
            start + timeout,
        );
        for global in globals {
            let value = interp
                .eval_global(&global.value)
                .map_err(|f| fault_to_error(f, "globals", timeout))?;
            interp.define_global(&global.name, value);
        }
        Ok(())
    }

    /// Call one entry point. `args` are the arguments after `ctx`.
    ///
    /// Optional entry points the script does not define return `nil`.
    pub fn call(
        &mut self,
        entry: EntryPoint,
        ctx: &mut SessionContext,
        args: Vec<Value>,
        timeout: Duration,
    ) -> Result<Value, StrategyError> {
        if !self.has_entry(entry) {
            return if entry.is_required() {
                Err(StrategyError::contract(entry.name(), "entry point is not defined"))
            } else {
                Ok(Value::Nil)
            };
        }
        if args.len() + 1 != entry.arity() {
            return Err(StrategyError::contract(
                entry.name(),
                format!("expected {} argument(s) after ctx", entry.arity() - 1),
            ));
        }

        let mut full_args = Vec::with_capacity(entry.arity());
        full_args.push(Value::Context);
        full_args.extend(args);

        let start = Instant::now();
        let deadline = start + timeout;
        let mut interp = Interpreter::new(
            &self.functions,
            &self.imports,
            &mut self.globals,
            &mut self.rng,
            Some(ctx),
            &self.config,
            self.epoch,
            deadline,
        );
        let result = interp
            .call_function(entry.name(), full_args, 0)
            .map_err(|f| fault_to_error(f, entry.name(), timeout))?;
        if start.elapsed() > timeout {
            return Err(fault_to_error(Fault::Timeout, entry.name(), timeout));
        }
        Ok(result)
    }
}

fn fault_to_error(fault: Fault, entry: &str, timeout: Duration) -> StrategyError {
    match fault {
        Fault::Timeout => StrategyError::ExecutionTimeout {
            entry: entry.to_string(),
            limit_ms: timeout.as_millis() as u64,
        },
        Fault::Error { message, line } => StrategyError::ExecutionError {
            entry: entry.to_string(),
            message,
            line: (line > 0).then_some(line),
        },
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SessionLimits;
    use rust_decimal_macros::dec;

    fn meta() -> StrategyMeta {
        StrategyMeta {
            name: "test".into(),
            version: None,
            author: None,
            trusted: false,
        }
    }

    fn ctx() -> SessionContext {
        SessionContext::new(dec!(100), "btc", SessionLimits::default())
    }

    const TIMEOUT: Duration = Duration::from_millis(250);

    // -- Validation tests --

    #[test]
    fn test_validate_reports_syntax_error_position() {
        let report = Sandbox::default().validate("fn next_bet(ctx) {\n  return 1 +;\n}");
        assert!(!report.is_ok());
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].line, 2);
    }

    #[test]
    fn test_validate_rejects_deep_chains_with_a_diagnostic() {
        let sandbox = Sandbox::default();
        let sum = vec!["1"; 10_000].join("+");
        let members = format!("a{}", ".b".repeat(10_000));
        for body in [sum, members] {
            let source = format!("fn next_bet(a) {{ return {body}; }}");
            let report = sandbox.validate(&source);
            assert!(!report.is_ok());
            assert!(report.errors[0].message.contains("nesting too deep"));
            assert!(sandbox.load(meta(), &source).is_err());
        }
    }

    #[test]
    fn test_load_rejects_forbidden_script_even_when_trusted() {
        let mut m = meta();
        m.trusted = true;
        let err = Sandbox::default()
            .load(m, "import os;\nfn next_bet(ctx) { return nil; }")
            .unwrap_err();
        match err {
            LoadError::Rejected(report) => {
                assert!(report.errors[0].message.contains("`os` is forbidden"))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_report_display() {
        let report = Sandbox::default().validate("import os;");
        let text = report.to_string();
        assert!(text.starts_with("2 error(s), 0 warning(s)"), "{text}");
        assert!(text.contains("error 1:1: `os` is forbidden"));
    }

    // -- Loading tests --

    #[test]
    fn test_globals_evaluated_at_load_and_persist() {
        let src = "let n = 2 * 3;\nfn next_bet(ctx) { n += 1; return n; }";
        let mut unit = Sandbox::default().load(meta(), src).unwrap();
        assert!(unit.is_validated());
        assert_eq!(unit.global("n"), Some(&Value::Number(6.0)));
        let mut c = ctx();
        assert_eq!(
            unit.call(EntryPoint::NextBet, &mut c, vec![], TIMEOUT).unwrap(),
            Value::Number(7.0)
        );
        assert_eq!(
            unit.call(EntryPoint::NextBet, &mut c, vec![], TIMEOUT).unwrap(),
            Value::Number(8.0)
        );
    }

    #[test]
    fn test_global_initializer_fault_fails_load() {
        let err = Sandbox::default()
            .load(meta(), "let n = 1 / 0;\nfn next_bet(ctx) { return nil; }")
            .unwrap_err();
        assert!(matches!(
            err,
            LoadError::Initialization(StrategyError::ExecutionError { .. })
        ));
    }

    #[test]
    fn test_wrong_arity_optional_entry_not_bound() {
        let src = "fn next_bet(ctx) { return nil; }\nfn on_result(ctx) { raise \"never\"; }";
        let mut unit = Sandbox::default().load(meta(), src).unwrap();
        assert_eq!(unit.warnings().len(), 1);
        assert!(!unit.has_entry(EntryPoint::OnResult));
        let result = unit.call(EntryPoint::OnResult, &mut ctx(), vec![Value::Nil], TIMEOUT);
        assert_eq!(result, Ok(Value::Nil));
    }

    // -- Call tests --

    #[test]
    fn test_call_timeout() {
        let mut unit = Sandbox::default()
            .load(meta(), "fn next_bet(ctx) { while true { } }")
            .unwrap();
        let started = Instant::now();
        let err = unit
            .call(EntryPoint::NextBet, &mut ctx(), vec![], Duration::from_millis(50))
            .unwrap_err();
        assert_eq!(
            err,
            StrategyError::ExecutionTimeout {
                entry: "next_bet".into(),
                limit_ms: 50
            }
        );
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_raise_maps_to_execution_error() {
        let mut unit = Sandbox::default()
            .load(meta(), "fn next_bet(ctx) {\n  raise \"no more\";\n}")
            .unwrap();
        let err = unit
            .call(EntryPoint::NextBet, &mut ctx(), vec![], TIMEOUT)
            .unwrap_err();
        assert_eq!(
            err,
            StrategyError::ExecutionError {
                entry: "next_bet".into(),
                message: "no more".into(),
                line: Some(2)
            }
        );
    }

    #[test]
    fn test_wrong_host_argument_count_is_contract_violation() {
        let mut unit = Sandbox::default()
            .load(meta(), "fn next_bet(ctx) { return nil; }")
            .unwrap();
        let err = unit
            .call(EntryPoint::NextBet, &mut ctx(), vec![Value::Nil], TIMEOUT)
            .unwrap_err();
        assert!(matches!(err, StrategyError::ContractViolation { .. }));
    }

    #[test]
    fn test_unit_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<StrategyUnit>();
    }
}
