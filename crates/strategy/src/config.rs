use serde::{Deserialize, Serialize};

use common::{Error, Result, RiskParams, StrategyDefinition, TradeDirection};

/// Top-level strategy seed file (TOML).
///
/// Example `config/strategies.toml`:
/// ```toml
/// [[strategy]]
/// id = "txf-rsi"
/// name = "TXF RSI reversal"
/// symbol = "TXF"
/// timeframe = "15m"
/// direction = "long"
/// description = "Buy when RSI(14) drops below 30, close when it rises above 70."
///
/// [strategy.risk]
/// stop_loss = 50
/// quantity = 1
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StrategyFileConfig {
    #[serde(rename = "strategy", default)]
    pub strategies: Vec<StrategyConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StrategyConfig {
    pub id: String,
    /// Human-readable name shown in logs and notifications.
    pub name: String,
    /// Natural-language rules the program is synthesized from.
    pub description: String,
    pub symbol: String,
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
    #[serde(default)]
    pub direction: TradeDirection,
    #[serde(default)]
    pub risk: RiskParams,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_timeframe() -> String {
    "15m".to_string()
}

fn default_enabled() -> bool {
    true
}

impl StrategyConfig {
    /// A fresh definition with no program attached.
    pub fn to_definition(&self) -> StrategyDefinition {
        let mut def = StrategyDefinition::new(
            &self.id,
            &self.name,
            &self.description,
            &self.symbol,
            &self.timeframe,
            self.direction,
        );
        def.risk = self.risk;
        def.enabled = self.enabled;
        def
    }
}

impl StrategyFileConfig {
    pub fn parse(content: &str) -> Result<Self> {
        let file: Self = toml::from_str(content)
            .map_err(|e| Error::Config(format!("invalid strategy config: {e}")))?;
        let mut seen = std::collections::HashSet::new();
        for s in &file.strategies {
            if !seen.insert(s.id.as_str()) {
                return Err(Error::Config(format!("duplicate strategy id '{}'", s.id)));
            }
            if s.description.trim().is_empty() {
                return Err(Error::Config(format!("strategy '{}' has an empty description", s.id)));
            }
        }
        Ok(file)
    }

    /// Load from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read strategy config at '{path}': {e}")))?;
        Self::parse(&content)
    }

    pub fn definitions(&self) -> Vec<StrategyDefinition> {
        self.strategies.iter().map(StrategyConfig::to_definition).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[[strategy]]
id = "txf-rsi"
name = "TXF RSI"
symbol = "TXF"
direction = "long"
description = "Buy when RSI(14) < 30, close above 70."

[strategy.risk]
stop_loss = 50.0
quantity = 2

[[strategy]]
id = "mxf-macd"
name = "MXF MACD"
symbol = "MXF"
timeframe = "1h"
description = "Trade MACD crosses both ways."
enabled = false
"#;

    #[test]
    fn parses_seed_file() {
        let file = StrategyFileConfig::parse(SAMPLE).unwrap();
        let defs = file.definitions();
        assert_eq!(defs.len(), 2);

        assert_eq!(defs[0].timeframe, "15m");
        assert_eq!(defs[0].direction, TradeDirection::Long);
        assert_eq!(defs[0].risk.quantity, 2);
        assert!(defs[0].needs_regeneration());

        assert_eq!(defs[1].direction, TradeDirection::Both);
        assert!(!defs[1].enabled);
    }

    #[test]
    fn rejects_duplicate_ids() {
        let dup = format!("{SAMPLE}\n[[strategy]]\nid = \"txf-rsi\"\nname = \"x\"\nsymbol = \"TXF\"\ndescription = \"y\"\n");
        assert!(StrategyFileConfig::parse(&dup).is_err());
    }
}
