use std::collections::HashSet;

use super::ast::*;
use super::LoadError;
use crate::indicators;

/// Read-only names every handler can see.
pub const CONSTANTS: &[&str] = &["position", "entry_price", "symbol", "buy", "sell", "close", "hold"];

/// Builtin functions: name, minimum and maximum positional arity.
pub const FUNCTIONS: &[(&str, usize, usize)] = &[
    ("ta", 1, 1),
    ("bars", 0, 1),
    ("len", 1, 1),
    ("abs", 1, 1),
    ("min", 1, 8),
    ("max", 1, 8),
    ("highest", 1, 2),
    ("lowest", 1, 2),
    ("cross_above", 2, 2),
    ("cross_below", 2, 2),
    ("pct_change", 1, 2),
];

fn function(name: &str) -> Option<(usize, usize)> {
    FUNCTIONS
        .iter()
        .find(|(n, _, _)| *n == name)
        .map(|(_, lo, hi)| (*lo, *hi))
}

/// Reject any identifier, call or state key outside the allow-list.
///
/// Locals introduced with `let` are visible for the rest of the block they
/// appear in, including nested blocks.
pub fn check(program: &Program) -> Result<(), LoadError> {
    let state: HashSet<&str> = program.state.iter().map(|s| s.name.as_str()).collect();
    let handler = &program.on_bar;
    if CONSTANTS.contains(&handler.param.as_str()) || function(&handler.param).is_some() {
        return Err(LoadError::rejected(
            handler.line,
            1,
            format!("on_bar parameter '{}' shadows a builtin", handler.param),
        ));
    }
    let checker = Checker {
        state,
        param: &handler.param,
    };
    let mut scope = vec![HashSet::new()];
    checker.block(&handler.body, &mut scope)
}

struct Checker<'a> {
    state: HashSet<&'a str>,
    param: &'a str,
}

type Scope = Vec<HashSet<String>>;

impl Checker<'_> {
    fn is_local(scope: &Scope, name: &str) -> bool {
        scope.iter().any(|frame| frame.contains(name))
    }

    fn block(&self, body: &[Stmt], scope: &mut Scope) -> Result<(), LoadError> {
        for stmt in body {
            self.stmt(stmt, scope)?;
        }
        Ok(())
    }

    fn stmt(&self, stmt: &Stmt, scope: &mut Scope) -> Result<(), LoadError> {
        match &stmt.kind {
            StmtKind::Let { name, value } => {
                self.expr(value, scope)?;
                if name == self.param || CONSTANTS.contains(&name.as_str()) || function(name).is_some() {
                    return Err(LoadError::rejected(
                        stmt.line,
                        stmt.column,
                        format!("cannot rebind builtin name '{name}'"),
                    ));
                }
                if let Some(frame) = scope.last_mut() {
                    frame.insert(name.clone());
                }
                Ok(())
            }
            StmtKind::Assign { name, value } => {
                if !Self::is_local(scope, name) {
                    let message = if name == self.param || CONSTANTS.contains(&name.as_str()) {
                        format!("cannot assign to '{name}'")
                    } else {
                        format!("assignment to undeclared name '{name}' (use 'let {name} = ...')")
                    };
                    return Err(LoadError::rejected(stmt.line, stmt.column, message));
                }
                self.expr(value, scope)
            }
            StmtKind::SetState { key, value } => {
                self.state_key(key, stmt.line, stmt.column)?;
                self.expr(value, scope)
            }
            StmtKind::If {
                branches,
                otherwise,
            } => {
                for (cond, body) in branches {
                    self.expr(cond, scope)?;
                    scope.push(HashSet::new());
                    let result = self.block(body, scope);
                    scope.pop();
                    result?;
                }
                if let Some(body) = otherwise {
                    scope.push(HashSet::new());
                    let result = self.block(body, scope);
                    scope.pop();
                    result?;
                }
                Ok(())
            }
            StmtKind::Return(Some(value)) => self.expr(value, scope),
            StmtKind::Return(None) | StmtKind::Pass => Ok(()),
        }
    }

    fn state_key(&self, key: &str, line: usize, column: usize) -> Result<(), LoadError> {
        if self.state.contains(key) {
            Ok(())
        } else {
            Err(LoadError::rejected(
                line,
                column,
                format!("unknown state key '{key}' (declare it with 'state {key} = ...')"),
            ))
        }
    }

    fn expr(&self, expr: &Expr, scope: &Scope) -> Result<(), LoadError> {
        match &expr.kind {
            ExprKind::Literal(_) => Ok(()),
            ExprKind::Name(name) => {
                if name == self.param || Self::is_local(scope, name) || CONSTANTS.contains(&name.as_str()) {
                    Ok(())
                } else if function(name).is_some() {
                    Err(LoadError::rejected(
                        expr.line,
                        expr.column,
                        format!("'{name}' is a function and must be called"),
                    ))
                } else {
                    Err(LoadError::rejected(
                        expr.line,
                        expr.column,
                        format!("unknown name '{name}'"),
                    ))
                }
            }
            ExprKind::State(key) => self.state_key(key, expr.line, expr.column),
            ExprKind::Unary { operand, .. } => self.expr(operand, scope),
            ExprKind::Binary { lhs, rhs, .. } => {
                self.expr(lhs, scope)?;
                self.expr(rhs, scope)
            }
            ExprKind::Index { target, index } => {
                self.expr(target, scope)?;
                self.expr(index, scope)
            }
            ExprKind::Field { target, .. } => self.expr(target, scope),
            ExprKind::Call { func, args, kwargs } => {
                let name = match &func.kind {
                    ExprKind::Name(name) => name,
                    _ => {
                        return Err(LoadError::rejected(
                            func.line,
                            func.column,
                            "only builtin functions may be called",
                        ))
                    }
                };
                let (lo, hi) = function(name).ok_or_else(|| {
                    LoadError::rejected(
                        func.line,
                        func.column,
                        format!("unknown function '{name}'"),
                    )
                })?;
                if args.len() < lo || args.len() > hi {
                    let expected = if lo == hi {
                        lo.to_string()
                    } else {
                        format!("{lo} to {hi}")
                    };
                    return Err(LoadError::rejected(
                        expr.line,
                        expr.column,
                        format!("{name}() takes {expected} positional arguments, got {}", args.len()),
                    ));
                }
                if name != "ta" && !kwargs.is_empty() {
                    return Err(LoadError::rejected(
                        expr.line,
                        expr.column,
                        format!("{name}() takes no keyword arguments"),
                    ));
                }
                if name == "ta" {
                    self.indicator_call(&args[0], kwargs)?;
                }
                for arg in args {
                    self.expr(arg, scope)?;
                }
                for (_, value) in kwargs {
                    self.expr(value, scope)?;
                }
                Ok(())
            }
        }
    }

    /// `ta` takes a literal indicator name and parameters that indicator knows.
    fn indicator_call(&self, name: &Expr, kwargs: &[(String, Expr)]) -> Result<(), LoadError> {
        let ExprKind::Literal(Literal::Str(indicator)) = &name.kind else {
            return Err(LoadError::rejected(
                name.line,
                name.column,
                "ta() indicator name must be a string literal",
            ));
        };
        let spec = indicators::lookup(indicator).ok_or_else(|| {
            LoadError::rejected(
                name.line,
                name.column,
                format!("unknown indicator '{indicator}'"),
            )
        })?;
        for (key, value) in kwargs {
            if !spec.params.iter().any(|(k, _)| k == key) {
                return Err(LoadError::rejected(
                    value.line,
                    value.column,
                    format!("{} has no parameter '{key}'", spec.name),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::lexer::tokenize;
    use crate::script::parser::Parser;

    fn check_src(body: &str) -> Result<(), LoadError> {
        let src = format!("strategy T:\n    state armed = false\n    on_bar(bar):\n{body}");
        let program = Parser::new(tokenize(&src)?).parse_program()?;
        check(&program)
    }

    #[test]
    fn accepts_allow_listed_vocabulary() {
        let body = "\
        let r = ta(\"RSI\", period=14)
        let m = ta(\"macd\")
        if r == none or m == none:
            return hold
        if position == 0 and r[-1] < 30 and not state.armed:
            state.armed = true
            return buy
        if cross_above(m.macd, m.signal) and len(bars(5)) == 5:
            return close
        let hi = highest(bars(20).high, 20)
        return hold
";
        check_src(body).unwrap();
    }

    #[test]
    fn rejects_unknown_names() {
        let err = check_src("        return open(\"/etc/passwd\")\n").unwrap_err();
        assert!(err.to_string().contains("unknown function 'open'"), "{err}");

        let err = check_src("        return os\n").unwrap_err();
        assert!(err.to_string().contains("unknown name 'os'"), "{err}");
    }

    #[test]
    fn rejects_method_calls() {
        let err = check_src("        return bar.close()\n").unwrap_err();
        assert!(err.to_string().contains("only builtin functions"), "{err}");
    }

    #[test]
    fn rejects_undeclared_state_key() {
        let err = check_src("        state.count = 1\n        return hold\n").unwrap_err();
        assert!(err.to_string().contains("unknown state key 'count'"), "{err}");
    }

    #[test]
    fn rejects_assignment_without_let() {
        let err = check_src("        x = 1\n        return hold\n").unwrap_err();
        assert!(err.to_string().contains("undeclared name 'x'"), "{err}");
    }

    #[test]
    fn rejects_assignment_to_position() {
        let err = check_src("        position = 1\n        return hold\n").unwrap_err();
        assert!(err.to_string().contains("cannot assign to 'position'"), "{err}");
    }

    #[test]
    fn branch_locals_do_not_escape() {
        let body = "\
        if bar.close > 1:
            let x = 1
        return x
";
        assert!(check_src(body).is_err());
    }

    #[test]
    fn rejects_unknown_indicator_and_param() {
        assert!(check_src("        let x = ta(\"ICHIMOKU\")\n        return hold\n").is_err());
        let err = check_src("        let x = ta(\"RSI\", length=3)\n        return hold\n").unwrap_err();
        assert!(err.to_string().contains("no parameter 'length'"), "{err}");
    }

    #[test]
    fn rejects_bad_arity() {
        let err = check_src("        return abs(1, 2)\n").unwrap_err();
        assert!(err.to_string().contains("abs() takes 1"), "{err}");
    }
}
