//! Instruction templates for synthesis and self-review.

use common::{ChatMessage, TradeDirection};
use strategy::indicators::catalogue_table;

pub const SYNTHESIS_TEMPERATURE: f32 = 0.2;
pub const REVIEW_TEMPERATURE: f32 = 0.3;
pub const MAX_TOKENS: u32 = 2000;

const GENERATOR_SYSTEM: &str =
    "You are a trading strategy generator. Output ONLY a strategy program, no explanations.";

const REVIEWER_SYSTEM: &str =
    "You are a code reviewer. Check whether a strategy program implements the user's description.";

fn direction_text(direction: TradeDirection) -> &'static str {
    match direction {
        TradeDirection::Long => "Long only: the program may return `buy` and `close`, never `sell`.",
        TradeDirection::Short => "Short only: the program may return `sell` and `close`, never `buy`.",
        TradeDirection::Both => "Both directions: the program may return `buy`, `sell` and `close`.",
    }
}

const LANGUAGE_GUIDE: &str = r#"## Program structure

```strategy
strategy MyStrategy:
    state flag = false
    on_bar(bar):
        return hold
```

- Exactly one `strategy <Name>:` block containing one `on_bar(bar):` handler.
- Indent with 4 spaces. No tabs, loops, functions or imports.
- `let x = expr` introduces a local; `x = expr` reassigns it.
- `state <name> = <literal>` declares persistent state, read and written as `state.<name>`.
  A state slot keeps the type of its initial value.
- Control flow: `if` / `elif` / `else`, `return <expr>`, `pass`.
- Operators: `+ - * / %`, `== != < <= > >=`, `and or not`.
- `none` means "no data yet"; comparisons with `none` are false.

## Available values

- `position`: current position (positive long, negative short, 0 flat)
- `entry_price`: price of the open position, 0 when flat
- `symbol`: contract code
- `bar.open`, `bar.high`, `bar.low`, `bar.close`, `bar.volume`, `bar.timestamp`
- `bar.pct_change`: open-to-close change in percent (5.0 means +5%)

## Builtins

- `bars()` / `bars(n)`: recent bars, oldest first; `bars(2)[-2]` is the previous bar
- `bars(n).close` (also open/high/low/volume): the column as a series
- `ta("NAME", key=value, ...)`: indicator series or frame, `none` while warming up
- `len(x)`, `abs(x)`, `min(...)`, `max(...)`
- `highest(series, n)`, `lowest(series, n)`, `pct_change(series, n)`
- `cross_above(a, b)`, `cross_below(a, b)`: `a` crossed `b` on this bar
- Series are indexed from the end: `rsi[-1]` is the latest value

## Indicators

The indicator name must be a string literal. Multi-output indicators expose
their columns as fields, e.g. `ta("MACD").signal[-1]`.

"#;

const WORKED_EXAMPLES: &str = r#"## Examples

Description: "Buy when RSI drops below 30, close when RSI rises above 70."

```strategy
strategy RsiReversal:
    on_bar(bar):
        let rsi = ta("RSI", period=14)
        if rsi == none or len(rsi) < 2:
            return hold
        if position == 0:
            if rsi[-1] < 30:
                return buy
        elif rsi[-1] > 70:
            return close
        return hold
```

Description: "Buy on a MACD golden cross, close on a death cross."

```strategy
strategy MacdCross:
    on_bar(bar):
        let m = ta("MACD", fast=12, slow=26, signal=9)
        if m == none or len(m) < 2:
            return hold
        if position == 0:
            if cross_above(m.macd, m.signal):
                return buy
        elif cross_below(m.macd, m.signal):
            return close
        return hold
```

Description: "After buying, if the market hits limit-up and later falls 6% from entry, close."

```strategy
strategy LimitUpExit:
    state was_limit_up = false
    on_bar(bar):
        let recent = bars(2)
        if len(recent) < 2:
            return hold
        let limit_up = recent[-2].close * 1.095
        if position > 0:
            if state.was_limit_up:
                let loss = (bar.close - entry_price) / entry_price
                if loss <= -0.06:
                    state.was_limit_up = false
                    return close
            if bar.close >= limit_up:
                state.was_limit_up = true
        if position == 0 and bar.close >= limit_up:
            state.was_limit_up = true
            return buy
        return hold
```
"#;

/// Messages asking the model to turn `description` into a program.
pub fn synthesis_messages(description: &str, direction: TradeDirection) -> Vec<ChatMessage> {
    let user = format!(
        "Generate a strategy program for the description below.\n\n\
         ## Trading direction\n\n{direction}\n\n\
         {LANGUAGE_GUIDE}{table}\n\
         ## Return values\n\nOne of `buy` (open long), `sell` (open short), \
         `close` (flatten), `hold` (do nothing).\n\n\
         {WORKED_EXAMPLES}\n\
         ## User description\n\n{description}\n\n\
         Output only the program inside one ```strategy fenced block.",
        direction = direction_text(direction),
        table = catalogue_table(),
    );
    vec![ChatMessage::system(GENERATOR_SYSTEM), ChatMessage::user(user)]
}

/// Messages asking the model to judge `program` against `description`.
pub fn review_messages(description: &str, program: &str) -> Vec<ChatMessage> {
    let user = format!(
        "## User description\n\n{description}\n\n\
         ## Generated program\n\n```strategy\n{program}\n```\n\n\
         ## Checklist\n\
         1. Does the logic implement the description?\n\
         2. Are the buy/sell/close/hold conditions correct?\n\
         3. Are there obvious logic errors?\n\n\
         ## Reply format\n\
         VERDICT: PASS or FAIL\n\
         REASON: <specific explanation>\n\
         SUGGESTION: <fix, if FAIL>"
    );
    vec![ChatMessage::system(REVIEWER_SYSTEM), ChatMessage::user(user)]
}
