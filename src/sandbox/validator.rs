//! Static checks run on every script before it is loaded.
//!
//! The validator walks the whole tree and collects every problem it finds
//! instead of stopping at the first one.

use std::collections::{HashMap, HashSet};

use super::ast::{Callee, Expr, Function, PathSeg, Program, Stmt};
use super::capabilities::{self, Arity};
use super::lexer::Span;
use super::{Diagnostic, EntryPoint, ValidationReport};

pub(crate) fn validate_program(program: &Program) -> ValidationReport {
    let mut v = Validator::default();
    v.imports(program);
    v.declare_functions(program);
    v.globals(program);
    v.entry_points(program);
    for func in &program.functions {
        v.function_body(func);
    }
    v.report
}

#[derive(Default)]
struct Validator<'p> {
    report: ValidationReport,
    imports: HashSet<&'p str>,
    functions: HashMap<&'p str, usize>,
    globals: HashSet<&'p str>,
    scopes: Vec<HashSet<&'p str>>,
    loop_depth: usize,
}

impl<'p> Validator<'p> {
    fn error(&mut self, span: Span, message: impl Into<String>) {
        self.report.errors.push(Diagnostic::new(span, message));
    }

    fn warning(&mut self, span: Span, message: impl Into<String>) {
        self.report.warnings.push(Diagnostic::new(span, message));
    }

    /// Report `name` if it is denied. Returns true when it was.
    fn deny(&mut self, name: &str, span: Span) -> bool {
        match capabilities::denied(name) {
            Some(category) => {
                self.error(span, format!("`{name}` is forbidden ({category})"));
                true
            }
            None => false,
        }
    }

    fn is_variable(&self, name: &str) -> bool {
        self.scopes.iter().any(|s| s.contains(name)) || self.globals.contains(name)
    }

    fn declare(&mut self, name: &'p str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name);
        }
    }

    // -----------------------------------------------------------------------
    // Items
    // -----------------------------------------------------------------------

    fn imports(&mut self, program: &'p Program) {
        for import in &program.imports {
            let name = import.module.as_str();
            if self.deny(name, import.span) {
                continue;
            }
            if capabilities::module(name).is_none() {
                self.error(
                    import.span,
                    format!(
                        "module `{name}` is not available (allowed: {})",
                        capabilities::allowed_module_names()
                    ),
                );
                continue;
            }
            if !self.imports.insert(name) {
                self.warning(import.span, format!("module `{name}` imported more than once"));
            }
        }
    }

    fn declare_functions(&mut self, program: &'p Program) {
        for func in &program.functions {
            let name = func.name.as_str();
            if self.deny(name, func.span) {
                continue;
            }
            if capabilities::builtin(name).is_some() {
                self.error(func.span, format!("`{name}` shadows a built-in function"));
                continue;
            }
            if capabilities::module(name).is_some() {
                self.error(func.span, format!("`{name}` shadows a module name"));
                continue;
            }
            if self.functions.insert(name, func.params.len()).is_some() {
                self.error(func.span, format!("function `{name}` is defined more than once"));
            }
            let mut seen = HashSet::new();
            for param in &func.params {
                if self.deny(param, func.span) {
                    continue;
                }
                if !seen.insert(param.as_str()) {
                    self.error(
                        func.span,
                        format!("parameter `{param}` appears twice in `{name}`"),
                    );
                }
            }
        }
    }

    fn globals(&mut self, program: &'p Program) {
        for global in &program.globals {
            self.check_expr(&global.value);
            let name = global.name.as_str();
            if self.deny(name, global.span) {
                continue;
            }
            if self.functions.contains_key(name) || capabilities::module(name).is_some() {
                self.error(
                    global.span,
                    format!("global `{name}` clashes with a function or module name"),
                );
                continue;
            }
            if !self.globals.insert(name) {
                self.error(global.span, format!("global `{name}` is declared more than once"));
            }
        }
    }

    fn entry_points(&mut self, program: &Program) {
        for entry in EntryPoint::ALL {
            let found = program.functions.iter().find(|f| f.name == entry.name());
            match found {
                None if entry.is_required() => self.error(
                    Span::new(1, 1),
                    format!(
                        "missing required entry point `{}` ({})",
                        entry.name(),
                        entry.signature()
                    ),
                ),
                None => {}
                Some(func) if func.params.len() == entry.arity() => {}
                Some(func) if entry.is_required() => self.error(
                    func.span,
                    format!(
                        "`{}` must take {} parameter(s): {}",
                        entry.name(),
                        entry.arity(),
                        entry.signature()
                    ),
                ),
                Some(func) => self.warning(
                    func.span,
                    format!(
                        "`{}` should take {} parameter(s) ({}); it will not be called",
                        entry.name(),
                        entry.arity(),
                        entry.signature()
                    ),
                ),
            }
        }
    }

    fn function_body(&mut self, func: &'p Function) {
        self.scopes = vec![func.params.iter().map(String::as_str).collect()];
        self.loop_depth = 0;
        self.check_block(&func.body);
        self.scopes.clear();
    }

    // -----------------------------------------------------------------------
    // Statements
    // -----------------------------------------------------------------------

    fn check_block(&mut self, body: &'p [Stmt]) {
        self.scopes.push(HashSet::new());
        self.check_stmts(body);
        self.scopes.pop();
    }

    fn check_stmts(&mut self, body: &'p [Stmt]) {
        let mut terminated = false;
        for stmt in body {
            if terminated {
                self.warning(stmt.span(), "unreachable statement");
                terminated = false;
            }
            self.check_stmt(stmt);
            if matches!(
                stmt,
                Stmt::Return { .. } | Stmt::Break(_) | Stmt::Continue(_) | Stmt::Raise { .. }
            ) {
                terminated = true;
            }
        }
    }

    fn check_stmt(&mut self, stmt: &'p Stmt) {
        match stmt {
            Stmt::Let { name, value, span } => {
                self.check_expr(value);
                if !self.deny(name, *span) {
                    self.declare(name);
                }
            }
            Stmt::Assign {
                target,
                path,
                value,
                span,
                ..
            } => {
                self.check_expr(value);
                for seg in path {
                    match seg {
                        PathSeg::Field(name) => {
                            self.deny(name, *span);
                        }
                        PathSeg::Index(expr) => self.check_expr(expr),
                    }
                }
                if self.deny(target, *span) {
                    return;
                }
                if !self.is_variable(target) {
                    if self.imports.contains(target.as_str()) {
                        self.error(*span, format!("cannot assign to module `{target}`"));
                    } else {
                        self.error(
                            *span,
                            format!("assignment to undeclared variable `{target}`"),
                        );
                    }
                }
            }
            Stmt::If {
                cond,
                then_body,
                else_body,
                ..
            } => {
                self.check_expr(cond);
                self.check_block(then_body);
                if let Some(else_body) = else_body {
                    self.check_block(else_body);
                }
            }
            Stmt::While { cond, body, .. } => {
                self.check_expr(cond);
                self.loop_depth += 1;
                self.check_block(body);
                self.loop_depth -= 1;
            }
            Stmt::For {
                var,
                iter,
                body,
                span,
            } => {
                self.check_expr(iter);
                self.scopes.push(HashSet::new());
                if !self.deny(var, *span) {
                    self.declare(var);
                }
                self.loop_depth += 1;
                self.check_stmts(body);
                self.loop_depth -= 1;
                self.scopes.pop();
            }
            Stmt::Return { value, .. } => {
                if let Some(value) = value {
                    self.check_expr(value);
                }
            }
            Stmt::Break(span) | Stmt::Continue(span) => {
                if self.loop_depth == 0 {
                    self.error(*span, "`break`/`continue` outside of a loop");
                }
            }
            Stmt::Raise { value, .. } => self.check_expr(value),
            Stmt::Expr(expr) => {
                if !matches!(expr, Expr::Call { .. }) {
                    self.warning(expr.span(), "expression result is unused");
                }
                self.check_expr(expr);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Expressions
    // -----------------------------------------------------------------------

    fn check_expr(&mut self, expr: &'p Expr) {
        match expr {
            Expr::Nil(_) | Expr::Bool(..) | Expr::Number(..) | Expr::Str(..) => {}
            Expr::List(items, _) => {
                for item in items {
                    self.check_expr(item);
                }
            }
            Expr::Map(entries, _) => {
                for (_, value) in entries {
                    self.check_expr(value);
                }
            }
            Expr::Var(name, span) => self.check_var(name, *span),
            Expr::Field { target, name, span } => {
                if self.deny(name, *span) {
                    return;
                }
                if let Expr::Var(module, _) = target.as_ref() {
                    if !self.is_variable(module) && self.imports.contains(module.as_str()) {
                        self.check_constant(module, name, *span);
                        return;
                    }
                }
                self.check_expr(target);
            }
            Expr::Index { target, index, .. } => {
                self.check_expr(target);
                self.check_expr(index);
            }
            Expr::Call { callee, args, span } => {
                match callee {
                    Callee::Free(name) => self.check_free_call(name, args.len(), *span),
                    Callee::Qualified { module, member } => {
                        self.check_module_call(module, member, args.len(), *span)
                    }
                }
                for arg in args {
                    self.check_expr(arg);
                }
            }
            Expr::Unary { operand, .. } => self.check_expr(operand),
            Expr::Binary { left, right, .. } => {
                self.check_expr(left);
                self.check_expr(right);
            }
        }
    }

    fn check_var(&mut self, name: &str, span: Span) {
        if self.deny(name, span) || self.is_variable(name) || self.imports.contains(name) {
            return;
        }
        if capabilities::module(name).is_some() {
            self.error(span, format!("module `{name}` used without `import {name};`"));
        } else if self.functions.contains_key(name) || capabilities::builtin(name).is_some() {
            self.error(span, format!("`{name}` is a function and can only be called"));
        } else {
            self.error(span, format!("undeclared variable `{name}`"));
        }
    }

    fn check_constant(&mut self, module: &str, name: &str, span: Span) {
        let Some(spec) = capabilities::module(module) else {
            return;
        };
        if spec.constant(name).is_some() {
            return;
        }
        if spec.function(name).is_some() {
            self.error(span, format!("`{module}.{name}` is a function and must be called"));
        } else {
            self.error(span, format!("module `{module}` has no member `{name}`"));
        }
    }

    fn check_arity(&mut self, name: &str, arity: Arity, got: usize, span: Span) {
        if !arity.accepts(got) {
            self.error(span, format!("`{name}` takes {arity}, {got} given"));
        }
    }

    fn check_free_call(&mut self, name: &str, argc: usize, span: Span) {
        if self.deny(name, span) {
            return;
        }
        if let Some(&params) = self.functions.get(name) {
            self.check_arity(name, Arity::Exact(params), argc, span);
        } else if let Some(arity) = capabilities::builtin(name) {
            self.check_arity(name, arity, argc, span);
        } else {
            self.error(span, format!("unknown function `{name}`"));
        }
    }

    fn check_module_call(&mut self, module: &str, member: &str, argc: usize, span: Span) {
        if self.deny(module, span) || self.deny(member, span) {
            return;
        }
        if self.is_variable(module) {
            self.error(
                span,
                format!("`{module}.{member}(...)`: only module functions can be called with `.`"),
            );
            return;
        }
        let Some(spec) = capabilities::module(module) else {
            self.error(span, format!("unknown module `{module}`"));
            return;
        };
        if !self.imports.contains(module) {
            self.error(span, format!("module `{module}` used without `import {module};`"));
            return;
        }
        match spec.function(member) {
            Some(arity) => self.check_arity(&format!("{module}.{member}"), arity, argc, span),
            None if spec.constant(member).is_some() => self.error(
                span,
                format!("`{module}.{member}` is a constant, not a function"),
            ),
            None => self.error(
                span,
                format!("module `{module}` has no function `{member}`"),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::parser::parse;
    use super::*;

    fn report(src: &str) -> ValidationReport {
        validate_program(&parse(src).expect("parse"))
    }

    fn errors(src: &str) -> Vec<String> {
        report(src).errors.into_iter().map(|d| d.message).collect()
    }

    fn has_error(src: &str, needle: &str) -> bool {
        errors(src).iter().any(|m| m.contains(needle))
    }

    const OK: &str = "fn next_bet(ctx) { return {amount: 1, chance: 50}; }";

    // -- Accepting tests --

    #[test]
    fn test_minimal_script_is_valid() {
        let r = report(OK);
        assert!(r.is_ok(), "{r}");
        assert!(r.warnings.is_empty());
    }

    #[test]
    fn test_full_script_is_valid() {
        let src = r#"
            import math;
            import collections;
            let base = 0.01;
            let history = [];
            fn init(ctx, params) { if has(params, "base") { base = params.base; } }
            fn on_session_start(ctx) { ctx.extra.losses = 0; }
            fn next_bet(ctx) {
                let amount = base * math.pow(2, ctx.extra.losses);
                for x in history { amount = amount + 0 * x; }
                return {amount: math.min(amount, 1), chance: 49.5, direction: "under"};
            }
            fn on_result(ctx, outcome) {
                history = append(history, outcome.profit);
                if outcome.won { ctx.extra.losses = 0; } else { ctx.extra.losses += 1; }
            }
            fn on_session_end(ctx, reason) { return collections.sum(history) * math.pi; }
        "#;
        let r = report(src);
        assert!(r.is_ok(), "{r}");
    }

    // -- Capability tests --

    #[test]
    fn test_forbidden_import() {
        assert!(has_error(&format!("import os;\n{OK}"), "`os` is forbidden (process control)"));
        assert!(has_error(&format!("import socket;\n{OK}"), "network access"));
        assert!(has_error(&format!("import json;\n{OK}"), "module `json` is not available"));
    }

    #[test]
    fn test_forbidden_calls_anywhere() {
        let src = "fn next_bet(ctx) { eval(\"1\"); return nil; }";
        assert!(has_error(src, "`eval` is forbidden (dynamic evaluation)"));
        let src = "fn next_bet(ctx) { let x = ctx.__class__; return nil; }";
        assert!(has_error(src, "`__class__` is forbidden"));
        let src = "fn next_bet(ctx) { let open = 1; return nil; }";
        assert!(has_error(src, "`open` is forbidden (file access)"));
    }

    #[test]
    fn test_module_use_rules() {
        let src = "fn next_bet(ctx) { return math.floor(1); }";
        assert!(has_error(src, "module `math` used without `import math;`"));
        let src = "import math;\nfn next_bet(ctx) { return math.tan(1); }";
        assert!(has_error(src, "module `math` has no function `tan`"));
        let src = "import math;\nfn next_bet(ctx) { return math.pow(1); }";
        assert!(has_error(src, "`math.pow` takes 2 arguments, 1 given"));
        let src = "import math;\nfn next_bet(ctx) { return math.tau; }";
        assert!(has_error(src, "module `math` has no member `tau`"));
    }

    #[test]
    fn test_unknown_names() {
        assert!(has_error("fn next_bet(ctx) { return foo(1); }", "unknown function `foo`"));
        assert!(has_error("fn next_bet(ctx) { return y; }", "undeclared variable `y`"));
        assert!(has_error("fn next_bet(ctx) { z = 1; }", "assignment to undeclared variable `z`"));
        assert!(has_error("fn next_bet(ctx) { return len; }", "can only be called"));
    }

    #[test]
    fn test_block_scoping() {
        let src = "fn next_bet(ctx) { if true { let a = 1; } return a; }";
        assert!(has_error(src, "undeclared variable `a`"));
        let src = "fn next_bet(ctx) { for i in range(3) { } return i; }";
        assert!(has_error(src, "undeclared variable `i`"));
    }

    // -- Entry point tests --

    #[test]
    fn test_missing_next_bet() {
        assert!(has_error("fn on_result(ctx, o) { }", "missing required entry point `next_bet`"));
    }

    #[test]
    fn test_next_bet_wrong_arity() {
        assert!(has_error("fn next_bet() { return nil; }", "`next_bet` must take 1 parameter(s)"));
    }

    #[test]
    fn test_optional_entry_wrong_arity_warns() {
        let r = report(&format!("{OK}\nfn on_result(ctx) {{ }}"));
        assert!(r.is_ok(), "{r}");
        assert_eq!(r.warnings.len(), 1);
        assert!(r.warnings[0].message.contains("will not be called"));
    }

    // -- Misc tests --

    #[test]
    fn test_break_outside_loop() {
        assert!(has_error("fn next_bet(ctx) { break; }", "outside of a loop"));
    }

    #[test]
    fn test_unreachable_and_unused_warnings() {
        let r = report("fn next_bet(ctx) { return nil; 1 + 1; }");
        assert!(r.is_ok());
        let messages: Vec<_> = r.warnings.iter().map(|d| d.message.as_str()).collect();
        assert!(messages.contains(&"unreachable statement"));
        assert!(messages.contains(&"expression result is unused"));
    }

    #[test]
    fn test_collects_multiple_errors_with_positions() {
        let r = report("import os;\nfn next_bet(ctx) {\n  return foo();\n}");
        assert_eq!(r.errors.len(), 2);
        assert_eq!(r.errors[0].line, 1);
        assert_eq!(r.errors[1].line, 3);
    }

    #[test]
    fn test_builtin_shadowing_rejected() {
        assert!(has_error(&format!("{OK}\nfn len(x) {{ return 0; }}"), "shadows a built-in"));
    }
}
