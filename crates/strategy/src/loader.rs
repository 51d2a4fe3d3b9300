use std::sync::Arc;

use common::Bar;

use crate::script::ast::Program;
use crate::script::interp::{run_on_bar, Env};
use crate::script::lexer::tokenize;
use crate::script::parser::Parser;
use crate::script::{checker, ExecutionError, LoadError, StateStore, StateValue, Value};

/// Name of the unit a program declares: the identifier after `strategy` on
/// the first line that starts with that keyword.
pub fn extract_unit_name(text: &str) -> Option<String> {
    text.lines().find_map(|line| {
        let mut words = line.split_whitespace();
        if words.next()? != "strategy" {
            return None;
        }
        let name: String = words
            .next()?
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_')
            .collect();
        let starts_ok = name.chars().next().is_some_and(|c| c.is_alphabetic() || c == '_');
        starts_ok.then_some(name)
    })
}

/// Compile program text into an immutable, shareable unit.
///
/// Loading is pure: nothing is executed and no persisted state is touched.
pub fn load(text: &str) -> Result<(String, CompiledUnit), LoadError> {
    if text.trim().is_empty() {
        return Err(LoadError::Empty);
    }
    let name = extract_unit_name(text).ok_or(LoadError::NoUnit)?;
    let program = Parser::new(tokenize(text)?).parse_program()?;
    checker::check(&program)?;
    debug_assert_eq!(name, program.name);
    let unit = CompiledUnit {
        program: Arc::new(program),
    };
    Ok((name, unit))
}

/// A checked program. Cloning shares the underlying tree.
#[derive(Debug, Clone)]
pub struct CompiledUnit {
    program: Arc<Program>,
}

impl CompiledUnit {
    pub fn name(&self) -> &str {
        &self.program.name
    }

    /// Declared state keys, in declaration order.
    pub fn state_keys(&self) -> Vec<&str> {
        self.program.state.iter().map(|s| s.name.as_str()).collect()
    }

    /// Fresh instance with its own state store.
    pub fn instantiate(&self) -> StrategyInstance {
        StrategyInstance {
            state: StateStore::from_decls(&self.program.state),
            unit: self.clone(),
        }
    }
}

/// Per-bar inputs besides the window.
pub struct BarContext<'a> {
    pub window: &'a [Bar],
    pub position: i64,
    pub entry_price: f64,
    pub symbol: &'a str,
}

/// One live copy of a unit: program plus its private state.
#[derive(Debug, Clone)]
pub struct StrategyInstance {
    unit: CompiledUnit,
    state: StateStore,
}

impl StrategyInstance {
    pub fn unit(&self) -> &CompiledUnit {
        &self.unit
    }

    /// Invoke `on_bar` for the last bar of `ctx.window`.
    pub fn on_bar(&mut self, ctx: &BarContext<'_>) -> Result<Value, ExecutionError> {
        let bar = ctx.window.last().ok_or_else(|| ExecutionError {
            line: self.unit.program.on_bar.line,
            message: "on_bar called with an empty window".to_string(),
        })?;
        let mut env = Env {
            bar,
            window: ctx.window,
            position: ctx.position,
            entry_price: ctx.entry_price,
            symbol: ctx.symbol,
            state: &mut self.state,
        };
        run_on_bar(&self.unit.program, &mut env)
    }

    pub fn reset(&mut self) {
        self.state.reset();
    }

    pub fn state(&self) -> Vec<(String, StateValue)> {
        self.state.snapshot()
    }
}
