use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ─── Market data ──────────────────────────────────────────────────────────────

/// One closed OHLCV candle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// Percent change from open to close. Zero when the open is zero.
    pub fn pct_change(&self) -> f64 {
        if self.open == 0.0 {
            return 0.0;
        }
        (self.close - self.open) / self.open * 100.0
    }

    /// Typical price used by CCI and VWAP.
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }
}

/// A closed bar published on the market broadcast channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BarEvent {
    pub symbol: String,
    pub timeframe: String,
    pub bar: Bar,
}

/// Instrument descriptor returned by the market data collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    pub symbol: String,
    pub exchange: String,
}

/// Columnar bar history as returned by `get_kbars`. Oldest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KBars {
    pub ts: Vec<DateTime<Utc>>,
    pub open: Vec<f64>,
    pub high: Vec<f64>,
    pub low: Vec<f64>,
    pub close: Vec<f64>,
    pub volume: Vec<f64>,
}

impl KBars {
    pub fn from_bars(bars: &[Bar]) -> Self {
        let mut out = KBars::default();
        for b in bars {
            out.ts.push(b.timestamp);
            out.open.push(b.open);
            out.high.push(b.high);
            out.low.push(b.low);
            out.close.push(b.close);
            out.volume.push(b.volume);
        }
        out
    }

    /// Number of complete rows (the shortest column wins).
    pub fn len(&self) -> usize {
        [
            self.ts.len(),
            self.open.len(),
            self.high.len(),
            self.low.len(),
            self.close.len(),
            self.volume.len(),
        ]
        .into_iter()
        .min()
        .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_bars(&self) -> Vec<Bar> {
        (0..self.len())
            .map(|i| Bar {
                timestamp: self.ts[i],
                open: self.open[i],
                high: self.high[i],
                low: self.low[i],
                close: self.close[i],
                volume: self.volume[i],
            })
            .collect()
    }
}

// ─── Timeframes ───────────────────────────────────────────────────────────────

/// Bars per trading day for a timeframe string. Unknown timeframes use the
/// 15-minute figure.
pub fn bars_per_day(timeframe: &str) -> u32 {
    match timeframe {
        "1m" => 1440,
        "5m" => 288,
        "15m" => 96,
        "30m" => 48,
        "60m" | "1h" => 24,
        "1d" => 1,
        _ => 96,
    }
}

/// Backtest lookback in days for a timeframe string.
pub fn lookback_days(timeframe: &str) -> u32 {
    match timeframe {
        "1m" => 7,
        "5m" => 14,
        "15m" | "30m" => 30,
        "60m" | "1h" => 90,
        "1d" => 365,
        _ => 30,
    }
}

/// Length of one bar in seconds, if the timeframe is known.
pub fn timeframe_secs(timeframe: &str) -> Option<i64> {
    match timeframe {
        "1m" => Some(60),
        "5m" => Some(300),
        "15m" => Some(900),
        "30m" => Some(1800),
        "60m" | "1h" => Some(3600),
        "1d" => Some(86_400),
        _ => None,
    }
}

// ─── Signals and fills ────────────────────────────────────────────────────────

/// Decision emitted by a strategy for one bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    Buy,
    Sell,
    Close,
    #[default]
    Hold,
}

impl Signal {
    pub const ALL: [Signal; 4] = [Signal::Buy, Signal::Sell, Signal::Close, Signal::Hold];

    /// Case-insensitive lookup by name.
    pub fn parse(s: &str) -> Option<Signal> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buy" => Some(Signal::Buy),
            "sell" => Some(Signal::Sell),
            "close" => Some(Signal::Close),
            "hold" => Some(Signal::Hold),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Buy => "buy",
            Signal::Sell => "sell",
            Signal::Close => "close",
            Signal::Hold => "hold",
        }
    }

    /// True for everything except `hold`.
    pub fn is_trade(&self) -> bool {
        *self != Signal::Hold
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which entries a strategy may take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum TradeDirection {
    #[serde(alias = "long-only", alias = "long_only")]
    Long,
    #[serde(alias = "short-only", alias = "short_only")]
    Short,
    #[default]
    Both,
}

impl TradeDirection {
    /// Whether an entry on `side` is allowed.
    pub fn permits(&self, side: OrderSide) -> bool {
        match (self, side) {
            (TradeDirection::Both, _) => true,
            (TradeDirection::Long, OrderSide::Buy) => true,
            (TradeDirection::Short, OrderSide::Sell) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for TradeDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeDirection::Long => write!(f, "long"),
            TradeDirection::Short => write!(f, "short"),
            TradeDirection::Both => write!(f, "both"),
        }
    }
}

impl std::str::FromStr for TradeDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "long" | "long-only" | "long_only" => Ok(TradeDirection::Long),
            "short" | "short-only" | "short_only" => Ok(TradeDirection::Short),
            "both" => Ok(TradeDirection::Both),
            other => Err(format!("unknown trade direction '{other}'")),
        }
    }
}

/// Side of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "TEXT", rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// +1 for buys, -1 for sells.
    pub fn sign(&self) -> i64 {
        match self {
            OrderSide::Buy => 1,
            OrderSide::Sell => -1,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Execution report fed back into a strategy executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub symbol: String,
    pub side: OrderSide,
    pub price: f64,
    /// Contracts, always positive.
    pub quantity: i64,
    pub timestamp: DateTime<Utc>,
}

/// A signal that left the runner, ready for the order layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalEvent {
    pub strategy_id: String,
    pub symbol: String,
    pub signal: Signal,
    /// Close of the bar that produced the signal.
    pub price: f64,
    pub quantity: i64,
    /// Position held by the executor when the signal was produced.
    pub position: i64,
    pub timestamp: DateTime<Utc>,
}

// ─── Strategy definitions ─────────────────────────────────────────────────────

/// Whether the current candidate program has cleared verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum VerificationStatus {
    #[default]
    Pending,
    Passed,
    Failed,
}

impl std::fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerificationStatus::Pending => write!(f, "pending"),
            VerificationStatus::Passed => write!(f, "passed"),
            VerificationStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for VerificationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(VerificationStatus::Pending),
            "passed" => Ok(VerificationStatus::Passed),
            "failed" => Ok(VerificationStatus::Failed),
            other => Err(format!("unknown verification status '{other}'")),
        }
    }
}

/// Protective distances and order size attached to a strategy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskParams {
    /// Stop-loss distance in price points.
    #[serde(default)]
    pub stop_loss: f64,
    /// Take-profit distance in price points.
    #[serde(default)]
    pub take_profit: f64,
    #[serde(default = "default_quantity")]
    pub quantity: i64,
}

fn default_quantity() -> i64 {
    1
}

impl Default for RiskParams {
    fn default() -> Self {
        Self {
            stop_loss: 0.0,
            take_profit: 0.0,
            quantity: default_quantity(),
        }
    }
}

/// Hex SHA-256 of a strategy description. Raw text, no canonicalization.
pub fn description_hash(description: &str) -> String {
    hex::encode(Sha256::digest(description.as_bytes()))
}

/// Program text produced by the synthesizer for one description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateProgram {
    pub source: String,
    pub unit_name: String,
    pub description_hash: String,
}

/// A user strategy and the pipeline bookkeeping stored alongside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyDefinition {
    pub id: String,
    pub name: String,
    pub description: String,
    pub symbol: String,
    pub timeframe: String,
    #[serde(default)]
    pub direction: TradeDirection,
    #[serde(default)]
    pub risk: RiskParams,
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub strategy_code: Option<String>,
    #[serde(default)]
    pub strategy_class_name: Option<String>,
    #[serde(default)]
    pub strategy_version: u32,
    #[serde(default)]
    pub prompt_hash: Option<String>,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub verification_status: VerificationStatus,
    #[serde(default)]
    pub verification_error: Option<String>,
    #[serde(default)]
    pub verification_attempts: u32,

    #[serde(default)]
    pub last_signal: Option<Signal>,
    #[serde(default)]
    pub last_signal_at: Option<DateTime<Utc>>,
}

fn default_enabled() -> bool {
    true
}

impl StrategyDefinition {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        symbol: impl Into<String>,
        timeframe: impl Into<String>,
        direction: TradeDirection,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            symbol: symbol.into(),
            timeframe: timeframe.into(),
            direction,
            risk: RiskParams::default(),
            enabled: true,
            strategy_code: None,
            strategy_class_name: None,
            strategy_version: 0,
            prompt_hash: None,
            verified: false,
            verification_status: VerificationStatus::Pending,
            verification_error: None,
            verification_attempts: 0,
            last_signal: None,
            last_signal_at: None,
        }
    }

    /// No program yet, or the description changed since the program was made.
    pub fn needs_regeneration(&self) -> bool {
        match (&self.strategy_code, &self.prompt_hash) {
            (Some(_), Some(hash)) => *hash != description_hash(&self.description),
            _ => true,
        }
    }

    /// The installed candidate, if any.
    pub fn candidate(&self) -> Option<CandidateProgram> {
        Some(CandidateProgram {
            source: self.strategy_code.clone()?,
            unit_name: self.strategy_class_name.clone()?,
            description_hash: self.prompt_hash.clone().unwrap_or_default(),
        })
    }

    /// Replace the candidate program. Bumps the version and restarts verification.
    pub fn set_candidate(&mut self, candidate: CandidateProgram) {
        self.strategy_code = Some(candidate.source);
        self.strategy_class_name = Some(candidate.unit_name);
        self.prompt_hash = Some(candidate.description_hash);
        self.strategy_version += 1;
        self.verified = false;
        self.verification_status = VerificationStatus::Pending;
        self.verification_error = None;
        self.verification_attempts = 0;
    }

    /// Change the description. The current program becomes stale.
    pub fn update_description(&mut self, description: impl Into<String>) {
        let description = description.into();
        if description == self.description {
            return;
        }
        self.description = description;
        self.verified = false;
        self.verification_status = VerificationStatus::Pending;
        self.verification_error = None;
    }

    /// Write the outcome of one verification attempt onto the definition.
    pub fn record_verification(&mut self, report: &VerificationReport) {
        self.verification_attempts = report.attempt;
        self.verification_status = report.status;
        self.verified = report.passed;
        self.verification_error = report.reason.clone();
    }

    pub fn is_passed(&self) -> bool {
        self.verified && self.verification_status == VerificationStatus::Passed
    }
}

// ─── Verification reports ─────────────────────────────────────────────────────

/// Which gate rejected a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStage {
    Load,
    Review,
    BacktestCheck,
}

impl std::fmt::Display for VerificationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerificationStage::Load => write!(f, "Load"),
            VerificationStage::Review => write!(f, "Stage 1"),
            VerificationStage::BacktestCheck => write!(f, "Stage 2"),
        }
    }
}

/// Count of each signal emitted during a replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalHistogram {
    pub buy: usize,
    pub sell: usize,
    pub close: usize,
    pub hold: usize,
}

impl SignalHistogram {
    pub fn record(&mut self, signal: Signal) {
        match signal {
            Signal::Buy => self.buy += 1,
            Signal::Sell => self.sell += 1,
            Signal::Close => self.close += 1,
            Signal::Hold => self.hold += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.buy + self.sell + self.close + self.hold
    }

    /// Non-hold signals.
    pub fn trades(&self) -> usize {
        self.buy + self.sell + self.close
    }

    /// Share of non-hold signals in `[0, 1]`. Zero for an empty histogram.
    pub fn trade_ratio(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            n => self.trades() as f64 / n as f64,
        }
    }
}

impl std::fmt::Display for SignalHistogram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "buy={} sell={} close={} hold={}",
            self.buy, self.sell, self.close, self.hold
        )
    }
}

/// Stage 1: the model's reading of the program against the description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewOutcome {
    pub passed: bool,
    pub reason: String,
    pub suggestion: Option<String>,
}

/// Stage 2: a short simulated replay over recent bars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayOutcome {
    pub passed: bool,
    pub reason: String,
    pub warning: Option<String>,
    pub histogram: SignalHistogram,
    /// Index of every non-hold signal within the replayed window.
    pub trade_bars: Vec<(usize, Signal)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub passed: bool,
    pub failed_stage: Option<VerificationStage>,
    /// Surfaced failure text, e.g. `Stage 2 failed: ...`.
    pub reason: Option<String>,
    #[serde(skip)]
    pub failure: Option<crate::PipelineError>,
    pub review: Option<ReviewOutcome>,
    pub replay: Option<ReplayOutcome>,
    pub attempt: u32,
    pub status: VerificationStatus,
}

// ─── LLM messages ─────────────────────────────────────────────────────────────

/// One chat turn sent to the language model backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

// ─── Engine control ───────────────────────────────────────────────────────────

/// How the runner is fed and filled.
///
/// `Live` streams closed klines over the websocket and leaves fills to the
/// order layer (`EngineCommand::Fill`). `Paper` polls bars over REST and
/// fills every signal with the paper broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketMode {
    Live,
    Paper,
}

impl std::fmt::Display for MarketMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MarketMode::Live => write!(f, "live"),
            MarketMode::Paper => write!(f, "paper"),
        }
    }
}

/// Current state of the strategy runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    #[default]
    Stopped,
    Running,
    Paused,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Stopped => write!(f, "stopped"),
            EngineState::Running => write!(f, "running"),
            EngineState::Paused => write!(f, "paused"),
        }
    }
}

/// Commands sent to the runner via the command channel.
#[derive(Debug, Clone)]
pub enum EngineCommand {
    Start,
    Stop,
    Pause,
    Resume,
    /// Synthesize/verify if needed, then install the strategy.
    Activate(String),
    Deactivate(String),
    UpdateDescription { id: String, description: String },
    /// Execution report from the order layer for one strategy.
    Fill { strategy_id: String, fill: Fill },
}
