//! Tree-walking evaluator for a checked program.
//!
//! Missing data propagates as `none`: indexing past either end, arithmetic on
//! `none` and indicators without enough history all yield `none`, and ordering
//! comparisons involving `none` are false. Type mismatches and division by
//! zero are errors.

use std::collections::HashMap;
use std::sync::Arc;

use common::{Bar, Signal};

use super::ast::*;
use super::state::{StateStore, StateValue};
use super::value::Value;
use super::ExecutionError;
use crate::indicators::{self, IndicatorOutput, Params};

/// Everything a handler can observe for one bar.
pub struct Env<'a> {
    pub bar: &'a Bar,
    /// Window including `bar` as its last element.
    pub window: &'a [Bar],
    pub position: i64,
    pub entry_price: f64,
    pub symbol: &'a str,
    pub state: &'a mut StateStore,
}

type EResult<T> = Result<T, ExecutionError>;

/// Run `on_bar` once. Falling off the end yields `Value::None`.
pub fn run_on_bar(program: &Program, env: &mut Env<'_>) -> EResult<Value> {
    let mut frame = CallFrame {
        env,
        param: &program.on_bar.param,
        locals: HashMap::new(),
    };
    Ok(frame.block(&program.on_bar.body)?.unwrap_or(Value::None))
}

struct CallFrame<'p, 'e, 'a> {
    env: &'e mut Env<'a>,
    param: &'p str,
    locals: HashMap<String, Value>,
}

fn err(line: usize, message: impl Into<String>) -> ExecutionError {
    ExecutionError {
        line,
        message: message.into(),
    }
}

impl CallFrame<'_, '_, '_> {
    fn block(&mut self, body: &[Stmt]) -> EResult<Option<Value>> {
        for stmt in body {
            if let Some(ret) = self.stmt(stmt)? {
                return Ok(Some(ret));
            }
        }
        Ok(None)
    }

    fn stmt(&mut self, stmt: &Stmt) -> EResult<Option<Value>> {
        match &stmt.kind {
            StmtKind::Let { name, value } | StmtKind::Assign { name, value } => {
                let v = self.eval(value)?;
                self.locals.insert(name.clone(), v);
                Ok(None)
            }
            StmtKind::SetState { key, value } => {
                let v = self.eval(value)?;
                let stored = match v {
                    Value::None => StateValue::None,
                    Value::Bool(b) => StateValue::Bool(b),
                    Value::Number(n) => StateValue::Number(n),
                    Value::Str(s) => StateValue::Str(s),
                    Value::Signal(s) => StateValue::Str(s.to_string()),
                    other => {
                        return Err(err(
                            stmt.line,
                            format!("cannot store a {} in state.{key}", other.type_name()),
                        ))
                    }
                };
                self.env
                    .state
                    .set(key, stored)
                    .map_err(|m| err(stmt.line, m))?;
                Ok(None)
            }
            StmtKind::If {
                branches,
                otherwise,
            } => {
                for (cond, body) in branches {
                    if self.eval(cond)?.truthy() {
                        return self.block(body);
                    }
                }
                match otherwise {
                    Some(body) => self.block(body),
                    None => Ok(None),
                }
            }
            StmtKind::Return(value) => Ok(Some(match value {
                Some(expr) => self.eval(expr)?,
                None => Value::None,
            })),
            StmtKind::Pass => Ok(None),
        }
    }

    fn eval(&mut self, expr: &Expr) -> EResult<Value> {
        let line = expr.line;
        match &expr.kind {
            ExprKind::Literal(lit) => Ok(match lit {
                Literal::None => Value::None,
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Number(n) => Value::Number(*n),
                Literal::Str(s) => Value::Str(s.clone()),
            }),
            ExprKind::Name(name) => self.name(name, line),
            ExprKind::State(key) => match self.env.state.get(key) {
                Some(StateValue::None) | None => Ok(Value::None),
                Some(StateValue::Bool(b)) => Ok(Value::Bool(*b)),
                Some(StateValue::Number(n)) => Ok(Value::Number(*n)),
                Some(StateValue::Str(s)) => Ok(Value::Str(s.clone())),
            },
            ExprKind::Unary { op, operand } => {
                let v = self.eval(operand)?;
                match (op, v) {
                    (UnaryOp::Not, v) => Ok(Value::Bool(!v.truthy())),
                    (UnaryOp::Neg, Value::Number(n)) => Ok(Value::Number(-n)),
                    (UnaryOp::Neg, Value::None) => Ok(Value::None),
                    (UnaryOp::Neg, other) => Err(err(
                        line,
                        format!("cannot negate a {}", other.type_name()),
                    )),
                }
            }
            ExprKind::Binary { op, lhs, rhs } => match op {
                BinaryOp::And => {
                    let l = self.eval(lhs)?;
                    Ok(Value::Bool(l.truthy() && self.eval(rhs)?.truthy()))
                }
                BinaryOp::Or => {
                    let l = self.eval(lhs)?;
                    Ok(Value::Bool(l.truthy() || self.eval(rhs)?.truthy()))
                }
                _ => {
                    let l = self.eval(lhs)?;
                    let r = self.eval(rhs)?;
                    binary(*op, l, r, line)
                }
            },
            ExprKind::Index { target, index } => {
                let t = self.eval(target)?;
                let i = self.eval(index)?;
                index_value(t, i, line)
            }
            ExprKind::Field { target, name } => {
                let t = self.eval(target)?;
                field(t, name, line)
            }
            ExprKind::Call { func, args, kwargs } => {
                let ExprKind::Name(name) = &func.kind else {
                    return Err(err(line, "only builtin functions may be called"));
                };
                self.call(name, args, kwargs, line)
            }
        }
    }

    fn name(&self, name: &str, line: usize) -> EResult<Value> {
        if let Some(v) = self.locals.get(name) {
            return Ok(v.clone());
        }
        if name == self.param {
            return Ok(Value::Bar(*self.env.bar));
        }
        match name {
            "position" => Ok(Value::Number(self.env.position as f64)),
            "entry_price" => Ok(Value::Number(self.env.entry_price)),
            "symbol" => Ok(Value::Str(self.env.symbol.to_string())),
            "buy" => Ok(Value::Signal(Signal::Buy)),
            "sell" => Ok(Value::Signal(Signal::Sell)),
            "close" => Ok(Value::Signal(Signal::Close)),
            "hold" => Ok(Value::Signal(Signal::Hold)),
            other => Err(err(line, format!("unknown name '{other}'"))),
        }
    }

    fn call(
        &mut self,
        name: &str,
        args: &[Expr],
        kwargs: &[(String, Expr)],
        line: usize,
    ) -> EResult<Value> {
        let mut values = Vec::with_capacity(args.len());
        for a in args {
            values.push(self.eval(a)?);
        }

        match name {
            "ta" => {
                let Some(Value::Str(indicator)) = values.first() else {
                    return Err(err(line, "ta() indicator name must be a string"));
                };
                let mut params = Params::new();
                for (key, expr) in kwargs {
                    match self.eval(expr)? {
                        Value::Number(n) => {
                            params.insert(key.clone(), n);
                        }
                        other => {
                            return Err(err(
                                line,
                                format!("ta() parameter '{key}' must be a number, got {}", other.type_name()),
                            ))
                        }
                    }
                }
                Ok(match indicators::compute(indicator, self.env.window, &params) {
                    Some(IndicatorOutput::Series(s)) => Value::Series(s.into()),
                    Some(IndicatorOutput::Frame(f)) => Value::Frame(Arc::new(f)),
                    None => Value::None,
                })
            }
            "bars" => {
                let window = self.env.window;
                let n = match values.first() {
                    None => window.len(),
                    Some(v) => count_arg(v, "bars", line)?,
                };
                let start = window.len().saturating_sub(n);
                Ok(Value::Bars(window[start..].into()))
            }
            "len" => match &values[0] {
                Value::None => Ok(Value::Number(0.0)),
                Value::Series(s) => Ok(Value::Number(s.len() as f64)),
                Value::Bars(b) => Ok(Value::Number(b.len() as f64)),
                Value::Frame(f) => Ok(Value::Number(f.len() as f64)),
                Value::Str(s) => Ok(Value::Number(s.chars().count() as f64)),
                other => Err(err(line, format!("len() of a {}", other.type_name()))),
            },
            "abs" => match &values[0] {
                Value::Number(n) => Ok(Value::Number(n.abs())),
                Value::None => Ok(Value::None),
                other => Err(err(line, format!("abs() of a {}", other.type_name()))),
            },
            "min" | "max" => {
                let pick_max = name == "max";
                let numbers = numbers_of(&values, name, line)?;
                let best = numbers.into_iter().reduce(|a, b| {
                    if pick_max {
                        a.max(b)
                    } else {
                        a.min(b)
                    }
                });
                Ok(best.into())
            }
            "highest" | "lowest" => {
                let Some(series) = series_arg(&values[0], name, line)? else {
                    return Ok(Value::None);
                };
                let n = match values.get(1) {
                    Some(v) => count_arg(v, name, line)?,
                    None => series.len(),
                };
                if n == 0 || series.len() < n {
                    return Ok(Value::None);
                }
                let tail = &series[series.len() - n..];
                let v = if name == "highest" {
                    tail.iter().copied().fold(f64::MIN, f64::max)
                } else {
                    tail.iter().copied().fold(f64::MAX, f64::min)
                };
                Ok(Value::Number(v))
            }
            "cross_above" | "cross_below" => {
                let (Some((a_prev, a_now)), Some((b_prev, b_now))) = (
                    last_two(&values[0], name, line)?,
                    last_two(&values[1], name, line)?,
                ) else {
                    return Ok(Value::Bool(false));
                };
                let crossed = if name == "cross_above" {
                    a_prev <= b_prev && a_now > b_now
                } else {
                    a_prev >= b_prev && a_now < b_now
                };
                Ok(Value::Bool(crossed))
            }
            "pct_change" => {
                let Some(series) = series_arg(&values[0], name, line)? else {
                    return Ok(Value::None);
                };
                let n = match values.get(1) {
                    Some(v) => count_arg(v, name, line)?,
                    None => 1,
                };
                if n == 0 || series.len() <= n {
                    return Ok(Value::None);
                }
                let now = series[series.len() - 1];
                let then = series[series.len() - 1 - n];
                if then == 0.0 {
                    return Ok(Value::None);
                }
                Ok(Value::Number((now - then) / then * 100.0))
            }
            other => Err(err(line, format!("unknown function '{other}'"))),
        }
    }
}

fn count_arg(v: &Value, func: &str, line: usize) -> EResult<usize> {
    match v {
        Value::Number(n) if *n >= 0.0 && n.is_finite() => Ok(*n as usize),
        other => Err(err(
            line,
            format!("{func}() expects a non-negative count, got {}", other.describe()),
        )),
    }
}

/// Series view of an argument: a series, or a bar list's closes.
fn series_arg(v: &Value, func: &str, line: usize) -> EResult<Option<Arc<[f64]>>> {
    match v {
        Value::None => Ok(None),
        Value::Series(s) => Ok(Some(s.clone())),
        Value::Bars(b) => Ok(Some(b.iter().map(|bar| bar.close).collect())),
        other => Err(err(
            line,
            format!("{func}() expects a series, got {}", other.type_name()),
        )),
    }
}

/// Previous and current value of a series; a number is a flat line.
fn last_two(v: &Value, func: &str, line: usize) -> EResult<Option<(f64, f64)>> {
    match v {
        Value::Number(n) => Ok(Some((*n, *n))),
        other => Ok(series_arg(other, func, line)?.and_then(|s| {
            let n = s.len();
            (n >= 2).then(|| (s[n - 2], s[n - 1]))
        })),
    }
}

fn numbers_of(values: &[Value], func: &str, line: usize) -> EResult<Vec<f64>> {
    if let [Value::Series(s)] = values {
        return Ok(s.to_vec());
    }
    let mut out = Vec::with_capacity(values.len());
    for v in values {
        match v {
            Value::Number(n) => out.push(*n),
            Value::None => {}
            other => {
                return Err(err(
                    line,
                    format!("{func}() expects numbers, got {}", other.type_name()),
                ))
            }
        }
    }
    Ok(out)
}

fn binary(op: BinaryOp, l: Value, r: Value, line: usize) -> EResult<Value> {
    use BinaryOp::*;
    match op {
        Eq => Ok(Value::Bool(equals(&l, &r))),
        NotEq => Ok(Value::Bool(!equals(&l, &r))),
        Lt | Le | Gt | Ge => match (&l, &r) {
            (Value::None, _) | (_, Value::None) => Ok(Value::Bool(false)),
            (Value::Number(a), Value::Number(b)) => Ok(Value::Bool(match op {
                Lt => a < b,
                Le => a <= b,
                Gt => a > b,
                _ => a >= b,
            })),
            _ => Err(err(
                line,
                format!(
                    "cannot compare {} {} {}",
                    l.type_name(),
                    op.symbol(),
                    r.type_name()
                ),
            )),
        },
        Add | Sub | Mul | Div | Rem => match (&l, &r) {
            (Value::None, _) | (_, Value::None) => Ok(Value::None),
            (Value::Number(a), Value::Number(b)) => {
                let (a, b) = (*a, *b);
                match op {
                    Add => Ok(Value::Number(a + b)),
                    Sub => Ok(Value::Number(a - b)),
                    Mul => Ok(Value::Number(a * b)),
                    Div | Rem if b == 0.0 => Err(err(line, "division by zero")),
                    Div => Ok(Value::Number(a / b)),
                    _ => Ok(Value::Number(a % b)),
                }
            }
            (Value::Str(a), Value::Str(b)) if op == Add => Ok(Value::Str(format!("{a}{b}"))),
            _ => Err(err(
                line,
                format!(
                    "unsupported operand types for {}: {} and {}",
                    op.symbol(),
                    l.type_name(),
                    r.type_name()
                ),
            )),
        },
        And => Ok(Value::Bool(l.truthy() && r.truthy())),
        Or => Ok(Value::Bool(l.truthy() || r.truthy())),
    }
}

fn equals(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Signal(a), Value::Str(_)) | (Value::Str(_), Value::Signal(a)) => {
            let other = if matches!(l, Value::Signal(_)) { r } else { l };
            other.as_signal() == Some(*a)
        }
        _ => l == r,
    }
}

fn index_value(target: Value, index: Value, line: usize) -> EResult<Value> {
    let i = match index {
        Value::Number(n) if n.fract() == 0.0 => n as i64,
        Value::None => return Ok(Value::None),
        other => {
            return Err(err(
                line,
                format!("index must be an integer, got {}", other.describe()),
            ))
        }
    };
    let resolve = |len: usize| -> Option<usize> {
        let idx = if i < 0 { len as i64 + i } else { i };
        (0..len as i64).contains(&idx).then_some(idx as usize)
    };
    match target {
        Value::None => Ok(Value::None),
        Value::Series(s) => Ok(resolve(s.len()).map(|k| s[k]).into()),
        Value::Bars(b) => Ok(resolve(b.len())
            .map(|k| Value::Bar(b[k]))
            .unwrap_or(Value::None)),
        other => Err(err(
            line,
            format!("a {} cannot be indexed", other.type_name()),
        )),
    }
}

fn field(target: Value, name: &str, line: usize) -> EResult<Value> {
    match target {
        Value::None => Ok(Value::None),
        Value::Bar(bar) => bar_field(&bar, name)
            .ok_or_else(|| err(line, format!("bar has no field '{name}'"))),
        Value::Bars(bars) => {
            if !BAR_FIELDS.contains(&name) {
                return Err(err(line, format!("bars have no field '{name}'")));
            }
            let column: Arc<[f64]> = bars
                .iter()
                .filter_map(|b| match bar_field(b, name) {
                    Some(Value::Number(n)) => Some(n),
                    _ => None,
                })
                .collect();
            Ok(Value::Series(column))
        }
        Value::Frame(frame) => frame
            .column(name)
            .map(|c| Value::Series(c.into()))
            .ok_or_else(|| {
                let columns: Vec<&str> = frame.names().collect();
                err(
                    line,
                    format!("indicator has no column '{name}' (columns: {})", columns.join(", ")),
                )
            }),
        other => Err(err(
            line,
            format!("a {} has no field '{name}'", other.type_name()),
        )),
    }
}

const BAR_FIELDS: &[&str] = &["open", "high", "low", "close", "volume", "pct_change", "timestamp"];

fn bar_field(bar: &Bar, name: &str) -> Option<Value> {
    Some(Value::Number(match name {
        "open" => bar.open,
        "high" => bar.high,
        "low" => bar.low,
        "close" => bar.close,
        "volume" => bar.volume,
        "pct_change" => bar.pct_change(),
        "timestamp" => bar.timestamp.timestamp() as f64,
        _ => return None,
    }))
}
