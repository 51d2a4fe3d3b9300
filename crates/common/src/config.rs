use crate::MarketMode;

/// All configuration loaded from environment variables at startup.
/// Missing required variables cause an immediate panic with a clear message.
#[derive(Debug, Clone)]
pub struct Config {
    // Market data
    pub market_mode: MarketMode,
    pub paper_slippage_bps: f64,

    // LLM backend (OpenAI-compatible)
    pub llm_base_url: String,
    pub llm_api_key: String,
    pub llm_model: String,
    pub llm_timeout_secs: u64,

    // Telegram notifications, disabled when no token is set
    pub telegram_token: Option<String>,
    pub telegram_chat_ids: Vec<i64>,

    // Database
    pub database_url: String,

    // Strategy seed file path
    pub strategy_config_path: String,

    // Pipeline
    pub check_interval_secs: u64,
    pub verify_max_attempts: u32,
    pub verify_sample_bars: usize,
    pub artifacts_dir: String,
    pub initial_capital: f64,
}

impl Config {
    /// Load all configuration from environment variables.
    /// Loads `.env` if present. Panics on any missing required variable.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        let market_mode = match optional_env("MARKET_MODE")
            .unwrap_or_else(|| "paper".to_string())
            .to_lowercase()
            .as_str()
        {
            "paper" => MarketMode::Paper,
            "live" => MarketMode::Live,
            other => panic!("ERROR: MARKET_MODE must be 'paper' or 'live', got: '{other}'"),
        };

        let telegram_chat_ids = optional_env("TELEGRAM_CHAT_IDS")
            .map(|v| parse_id_list("TELEGRAM_CHAT_IDS", &v))
            .unwrap_or_default();

        Config {
            market_mode,
            paper_slippage_bps: parsed_env("PAPER_SLIPPAGE_BPS", 0.0),
            llm_base_url: optional_env("LLM_BASE_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            llm_api_key: required_env("LLM_API_KEY"),
            llm_model: optional_env("LLM_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
            llm_timeout_secs: parsed_env("LLM_TIMEOUT_SECS", 60),
            telegram_token: optional_env("TELEGRAM_TOKEN").filter(|t| !t.is_empty()),
            telegram_chat_ids,
            database_url: required_env("DATABASE_URL"),
            strategy_config_path: optional_env("STRATEGY_CONFIG_PATH")
                .unwrap_or_else(|| "config/strategies.toml".to_string()),
            check_interval_secs: parsed_env("CHECK_INTERVAL_SECS", 60),
            verify_max_attempts: parsed_env("VERIFY_MAX_ATTEMPTS", 3),
            verify_sample_bars: parsed_env("VERIFY_SAMPLE_BARS", 100),
            artifacts_dir: optional_env("ARTIFACTS_DIR")
                .unwrap_or_else(|| "workspace/backtests".to_string()),
            initial_capital: parsed_env("INITIAL_CAPITAL", 1_000_000.0),
        }
    }
}

fn parse_id_list(key: &str, raw: &str) -> Vec<i64> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>()
                .unwrap_or_else(|_| panic!("{key} contains non-numeric ID: '{s}'"))
        })
        .collect()
}

fn required_env(key: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| {
        panic!("Required environment variable '{key}' is not set. Check your .env file.")
    })
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn parsed_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    optional_env(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_list_skips_blanks() {
        assert_eq!(parse_id_list("X", "1, 2,,3 "), vec![1, 2, 3]);
    }

    #[test]
    #[should_panic(expected = "non-numeric")]
    fn id_list_rejects_garbage() {
        parse_id_list("X", "12,abc");
    }
}
