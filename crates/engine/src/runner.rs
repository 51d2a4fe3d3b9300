use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use common::{
    Bar, BarEvent, Config, EngineCommand, EngineState, MarketDataClient, MarketMode, Notifier,
    PipelineError, Signal, SignalEvent, StrategyDefinition, StrategyStore, VerificationStatus,
};
use paper::PaperBroker;
use strategy::{CompiledUnit, ExecutorStatus, StrategyExecutor};
use synth::ActivationPipeline;

use crate::binance::BinanceKlineStream;
use crate::poller::BarPoller;

/// Closed bars kept per feed.
pub const BAR_BUFFER_CAP: usize = 500;

/// History loaded into a fresh executor's window before it goes live.
pub const WARM_UP_BARS: usize = 100;

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub mode: MarketMode,
    pub check_interval: Duration,
    pub slippage_bps: f64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            mode: MarketMode::Paper,
            check_interval: Duration::from_secs(60),
            slippage_bps: 0.0,
        }
    }
}

impl RunnerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            mode: config.market_mode,
            check_interval: Duration::from_secs(config.check_interval_secs.max(1)),
            slippage_bps: config.paper_slippage_bps,
        }
    }
}

/// Where a strategy is in its life inside the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotPhase {
    /// Known but not running.
    Idle,
    /// Synthesis/verification task in flight.
    Activating,
    /// Verification did not pass yet; retried on the next tick.
    Waiting,
    Live,
    /// Refused until the description changes.
    Failed,
}

impl std::fmt::Display for SlotPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SlotPhase::Idle => "idle",
            SlotPhase::Activating => "activating",
            SlotPhase::Waiting => "waiting",
            SlotPhase::Live => "live",
            SlotPhase::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One row of the status table published through [`EngineHandle::snapshot`].
#[derive(Debug, Clone, Serialize)]
pub struct StrategySnapshot {
    pub id: String,
    pub name: String,
    pub symbol: String,
    pub timeframe: String,
    pub enabled: bool,
    pub phase: SlotPhase,
    pub version: u32,
    pub verification_status: VerificationStatus,
    pub verification_attempts: u32,
    pub last_signal: Option<Signal>,
    pub last_signal_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub executor: Option<ExecutorStatus>,
}

type Snapshot = Arc<RwLock<BTreeMap<String, StrategySnapshot>>>;

/// Cloneable handle passed to the binary and notifiers.
#[derive(Clone)]
pub struct EngineHandle {
    command_tx: mpsc::Sender<EngineCommand>,
    state: Arc<RwLock<EngineState>>,
    snapshot: Snapshot,
    bar_tx: broadcast::Sender<BarEvent>,
    signal_tx: broadcast::Sender<SignalEvent>,
}

impl EngineHandle {
    pub async fn send(&self, cmd: EngineCommand) {
        let _ = self.command_tx.send(cmd).await;
    }

    pub async fn state(&self) -> EngineState {
        *self.state.read().await
    }

    /// Status of every strategy the runner knows about, ordered by id.
    pub async fn snapshot(&self) -> Vec<StrategySnapshot> {
        self.snapshot.read().await.values().cloned().collect()
    }

    pub async fn strategy(&self, id: &str) -> Option<StrategySnapshot> {
        self.snapshot.read().await.get(id).cloned()
    }

    pub fn subscribe_bars(&self) -> broadcast::Receiver<BarEvent> {
        self.bar_tx.subscribe()
    }

    /// Signals that passed the runner, for the order layer.
    pub fn subscribe_signals(&self) -> broadcast::Receiver<SignalEvent> {
        self.signal_tx.subscribe()
    }

    /// Feed a closed bar from an external source.
    pub fn publish_bar(&self, event: BarEvent) {
        let _ = self.bar_tx.send(event);
    }
}

// ─── Runner ───────────────────────────────────────────────────────────────────

type FeedKey = (String, String);

struct Slot {
    definition: StrategyDefinition,
    phase: SlotPhase,
    executor: Option<StrategyExecutor>,
    /// Timestamp of the last bar this strategy has seen.
    cursor: Option<DateTime<Utc>>,
    error: Option<String>,
    /// The description changed while an activation was in flight.
    stale: bool,
}

impl Slot {
    fn new(definition: StrategyDefinition) -> Self {
        Self {
            definition,
            phase: SlotPhase::Idle,
            executor: None,
            cursor: None,
            error: None,
            stale: false,
        }
    }

    fn feed_key(&self) -> FeedKey {
        (self.definition.symbol.clone(), self.definition.timeframe.clone())
    }

    fn snapshot(&self) -> StrategySnapshot {
        let d = &self.definition;
        StrategySnapshot {
            id: d.id.clone(),
            name: d.name.clone(),
            symbol: d.symbol.clone(),
            timeframe: d.timeframe.clone(),
            enabled: d.enabled,
            phase: self.phase,
            version: d.strategy_version,
            verification_status: d.verification_status,
            verification_attempts: d.verification_attempts,
            last_signal: d.last_signal,
            last_signal_at: d.last_signal_at,
            error: self.error.clone(),
            executor: self.executor.as_ref().map(StrategyExecutor::status),
        }
    }
}

struct ActivationOutcome {
    id: String,
    definition: StrategyDefinition,
    result: Result<(CompiledUnit, Vec<Bar>), PipelineError>,
}

/// Owns every executor and drives them from buffered bars on a fixed tick.
///
/// Activations run as separate tasks; everything else happens on this task,
/// so executors need no locking.
pub struct StrategyRunner {
    config: RunnerConfig,
    pipeline: ActivationPipeline,
    store: Arc<dyn StrategyStore>,
    market: Arc<dyn MarketDataClient>,
    notifier: Arc<dyn Notifier>,

    state: Arc<RwLock<EngineState>>,
    snapshot: Snapshot,
    command_rx: mpsc::Receiver<EngineCommand>,
    #[allow(dead_code)] // kept to prevent channel close
    command_tx: mpsc::Sender<EngineCommand>,
    bar_tx: broadcast::Sender<BarEvent>,
    bar_rx: broadcast::Receiver<BarEvent>,
    signal_tx: broadcast::Sender<SignalEvent>,
    outcome_tx: mpsc::UnboundedSender<ActivationOutcome>,
    outcome_rx: mpsc::UnboundedReceiver<ActivationOutcome>,

    slots: BTreeMap<String, Slot>,
    buffers: HashMap<FeedKey, VecDeque<Bar>>,
    feeds: HashMap<FeedKey, JoinHandle<()>>,
}

impl StrategyRunner {
    pub fn new(
        config: RunnerConfig,
        pipeline: ActivationPipeline,
        store: Arc<dyn StrategyStore>,
        market: Arc<dyn MarketDataClient>,
        notifier: Arc<dyn Notifier>,
    ) -> (Self, EngineHandle) {
        let (command_tx, command_rx) = mpsc::channel(32);
        let (bar_tx, bar_rx) = broadcast::channel(1024);
        let (signal_tx, _) = broadcast::channel(1024);
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let state = Arc::new(RwLock::new(EngineState::Stopped));
        let snapshot: Snapshot = Arc::default();

        let handle = EngineHandle {
            command_tx: command_tx.clone(),
            state: state.clone(),
            snapshot: snapshot.clone(),
            bar_tx: bar_tx.clone(),
            signal_tx: signal_tx.clone(),
        };

        let runner = StrategyRunner {
            config,
            pipeline,
            store,
            market,
            notifier,
            state,
            snapshot,
            command_rx,
            command_tx,
            bar_tx,
            bar_rx,
            signal_tx,
            outcome_tx,
            outcome_rx,
            slots: BTreeMap::new(),
            buffers: HashMap::new(),
            feeds: HashMap::new(),
        };

        (runner, handle)
    }

    /// Run the control loop. Call from `tokio::spawn`.
    pub async fn run(mut self) {
        info!(mode = %self.config.mode, "Strategy runner initialized in Stopped state. Waiting for Start command.");
        let mut ticker = tokio::time::interval(self.config.check_interval);

        loop {
            tokio::select! {
                cmd = self.command_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => {
                        warn!("Runner command channel closed, shutting down");
                        break;
                    }
                },
                event = self.bar_rx.recv() => match event {
                    Ok(event) => self.buffer_bar(event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "Bar channel lagged, bars dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => {}
                },
                Some(outcome) = self.outcome_rx.recv() => self.install(outcome).await,
                _ = ticker.tick() => self.on_tick().await,
            }
            self.refresh_snapshot().await;
        }

        for (_, feed) in self.feeds.drain() {
            feed.abort();
        }
    }

    async fn handle_command(&mut self, cmd: EngineCommand) {
        match cmd {
            EngineCommand::Start => self.start().await,

            EngineCommand::Stop => {
                info!("Runner stopping, aborting bar feeds");
                *self.state.write().await = EngineState::Stopped;
                for (_, feed) in self.feeds.drain() {
                    feed.abort();
                }
            }

            EngineCommand::Pause => {
                if *self.state.read().await == EngineState::Running {
                    info!("Runner paused, bars still evaluated, signals suppressed");
                    *self.state.write().await = EngineState::Paused;
                }
            }

            EngineCommand::Resume => {
                if *self.state.read().await == EngineState::Paused {
                    info!("Runner resumed");
                    *self.state.write().await = EngineState::Running;
                }
            }

            EngineCommand::Activate(id) => self.activate(&id).await,

            EngineCommand::Deactivate(id) => {
                let Some(slot) = self.slots.get_mut(&id) else {
                    warn!(strategy = %id, "Deactivate for unknown strategy");
                    return;
                };
                info!(strategy = %id, "Deactivating strategy");
                slot.definition.enabled = false;
                slot.executor = None;
                slot.cursor = None;
                if slot.phase != SlotPhase::Activating {
                    slot.phase = SlotPhase::Idle;
                }
                let def = slot.definition.clone();
                self.persist(&def).await;
            }

            EngineCommand::UpdateDescription { id, description } => {
                self.update_description(&id, description).await;
            }

            EngineCommand::Fill { strategy_id, fill } => {
                match self
                    .slots
                    .get_mut(&strategy_id)
                    .and_then(|s| s.executor.as_mut())
                {
                    Some(executor) => executor.on_fill(&fill),
                    None => warn!(strategy = %strategy_id, "Fill for a strategy with no executor"),
                }
            }
        }
    }

    async fn start(&mut self) {
        if *self.state.read().await == EngineState::Running {
            info!("Runner already running");
            return;
        }
        *self.state.write().await = EngineState::Running;

        match self.store.load_all().await {
            Ok(defs) => {
                for def in defs {
                    self.slots
                        .entry(def.id.clone())
                        .or_insert_with(|| Slot::new(def));
                }
            }
            Err(e) => error!(error = %e, "Failed to load strategy definitions"),
        }

        let pending: Vec<String> = self
            .slots
            .iter()
            .filter(|(_, s)| s.definition.enabled && matches!(s.phase, SlotPhase::Idle | SlotPhase::Waiting))
            .map(|(id, _)| id.clone())
            .collect();
        info!(strategies = self.slots.len(), activating = pending.len(), "Runner started");
        for id in pending {
            self.spawn_activation(&id);
        }

        let live: Vec<FeedKey> = self
            .slots
            .values()
            .filter(|s| s.phase == SlotPhase::Live)
            .map(Slot::feed_key)
            .collect();
        for key in live {
            self.ensure_feed(key);
        }
    }

    async fn activate(&mut self, id: &str) {
        if !self.slots.contains_key(id) {
            match self.store.get(id).await {
                Ok(Some(def)) => {
                    self.slots.insert(id.to_string(), Slot::new(def));
                }
                Ok(None) => {
                    warn!(strategy = %id, "Activate for unknown strategy");
                    return;
                }
                Err(e) => {
                    error!(strategy = %id, error = %e, "Failed to load strategy definition");
                    return;
                }
            }
        }
        let Some(slot) = self.slots.get_mut(id) else { return };
        if slot.phase == SlotPhase::Activating {
            info!(strategy = %id, "Activation already in flight");
            return;
        }
        slot.definition.enabled = true;
        let def = slot.definition.clone();
        self.persist(&def).await;

        if *self.state.read().await == EngineState::Stopped {
            info!(strategy = %id, "Runner stopped, strategy will activate on Start");
            return;
        }
        self.spawn_activation(id);
    }

    async fn update_description(&mut self, id: &str, description: String) {
        let Some(slot) = self.slots.get_mut(id) else {
            // Not loaded yet: edit the stored copy, it is picked up on Start.
            match self.store.get(id).await {
                Ok(Some(mut def)) => {
                    def.update_description(description);
                    self.persist(&def).await;
                }
                Ok(None) => warn!(strategy = %id, "UpdateDescription for unknown strategy"),
                Err(e) => error!(strategy = %id, error = %e, "Failed to load strategy definition"),
            }
            return;
        };
        if slot.definition.description == description {
            return;
        }
        info!(strategy = %id, "Strategy description changed");
        slot.definition.update_description(description);
        let def = slot.definition.clone();

        let respawn = match slot.phase {
            SlotPhase::Activating => {
                slot.stale = true;
                false
            }
            _ => def.enabled,
        };
        if !respawn && slot.phase != SlotPhase::Activating {
            slot.phase = SlotPhase::Idle;
            slot.executor = None;
        }
        self.persist(&def).await;

        if respawn && *self.state.read().await != EngineState::Stopped {
            self.spawn_activation(id);
        }
    }

    fn spawn_activation(&mut self, id: &str) {
        let Some(slot) = self.slots.get_mut(id) else { return };
        if slot.phase == SlotPhase::Activating {
            return;
        }
        slot.phase = SlotPhase::Activating;
        slot.stale = false;
        // A recompiled program starts flat.
        if let Some(executor) = slot.executor.take() {
            if executor.position() != 0 {
                info!(
                    strategy = %id,
                    position = executor.position(),
                    entry_price = executor.entry_price(),
                    "Recompiling; paper position dropped"
                );
            }
        }

        let id = id.to_string();
        let mut definition = slot.definition.clone();
        let key = slot.feed_key();
        let pipeline = self.pipeline.clone();
        let market = self.market.clone();
        let outcome_tx = self.outcome_tx.clone();

        info!(strategy = %id, "Activation started");
        tokio::spawn(async move {
            let result = match pipeline.activate(&mut definition).await {
                Ok(unit) => Ok((unit, recent_bars(market.as_ref(), &definition).await)),
                Err(e) => Err(e),
            };
            let _ = outcome_tx.send(ActivationOutcome {
                id,
                definition,
                result,
            });
        });

        self.ensure_feed(key);
    }

    async fn install(&mut self, outcome: ActivationOutcome) {
        let ActivationOutcome {
            id,
            definition,
            result,
        } = outcome;
        let running = *self.state.read().await != EngineState::Stopped;
        let Some(slot) = self.slots.get_mut(&id) else { return };

        let enabled = slot.definition.enabled;
        let latest_description = slot.definition.description.clone();
        let stale = slot.stale;
        slot.definition = definition;
        slot.definition.enabled = enabled;

        if stale {
            slot.definition.update_description(latest_description);
            slot.phase = SlotPhase::Idle;
            let def = slot.definition.clone();
            self.persist(&def).await;
            if enabled && running {
                self.spawn_activation(&id);
            }
            return;
        }

        match result {
            Ok((unit, warm)) if enabled => {
                let mut executor = StrategyExecutor::new(&id, &slot.definition.symbol, &unit);
                executor.warm_up(&warm);
                let warm_end = warm.last().map(|b| b.timestamp);
                let buffer = self.buffers.get(&slot.feed_key());
                // Bars the previous executor already consumed are history,
                // not fresh signals.
                let seen = slot.cursor;
                let backlog: Vec<Bar> = buffer
                    .into_iter()
                    .flatten()
                    .filter(|b| warm_end.map_or(true, |t| b.timestamp > t))
                    .filter(|b| seen.is_some_and(|c| b.timestamp <= c))
                    .copied()
                    .collect();
                executor.warm_up(&backlog);
                let buffered = buffer.and_then(|b| b.back()).map(|b| b.timestamp);
                slot.cursor = backlog
                    .last()
                    .map(|b| b.timestamp)
                    .or(warm_end)
                    .or(buffered);
                slot.executor = Some(executor);
                slot.phase = SlotPhase::Live;
                slot.error = None;
                info!(
                    strategy = %id,
                    unit = unit.name(),
                    version = slot.definition.strategy_version,
                    warm_bars = warm.len(),
                    "Strategy live"
                );
                let message = format!(
                    "Strategy '{}' ({id}) is live: {} v{}",
                    slot.definition.name,
                    unit.name(),
                    slot.definition.strategy_version
                );
                let key = slot.feed_key();
                self.notifier.notify(&message).await;
                self.ensure_feed(key);
            }
            Ok(_) => {
                slot.phase = SlotPhase::Idle;
            }
            Err(e) => {
                slot.phase = if slot.definition.verification_status == VerificationStatus::Failed {
                    SlotPhase::Failed
                } else {
                    SlotPhase::Waiting
                };
                slot.error = Some(e.to_string());
                warn!(strategy = %id, phase = %slot.phase, error = %e, "Activation did not complete");
                let message = format!(
                    "Strategy '{}' ({id}) {e} [attempt {}, {}]",
                    slot.definition.name,
                    slot.definition.verification_attempts,
                    slot.definition.verification_status
                );
                self.notifier.notify(&message).await;
            }
        }
    }

    fn buffer_bar(&mut self, event: BarEvent) {
        let buffer = self
            .buffers
            .entry((event.symbol, event.timeframe))
            .or_default();
        if buffer.back().is_some_and(|last| event.bar.timestamp <= last.timestamp) {
            debug!(ts = %event.bar.timestamp, "Duplicate or out-of-order bar ignored");
            return;
        }
        buffer.push_back(event.bar);
        while buffer.len() > BAR_BUFFER_CAP {
            buffer.pop_front();
        }
    }

    /// Feed every live executor the buffered bars past its cursor.
    async fn on_tick(&mut self) {
        let state = *self.state.read().await;
        if state == EngineState::Stopped {
            return;
        }
        let suppress = state == EngineState::Paused;
        let paper_fills = self.config.mode == MarketMode::Paper;

        let mut emitted: Vec<SignalEvent> = Vec::new();
        let mut retry: Vec<String> = Vec::new();

        for (id, slot) in self.slots.iter_mut() {
            match slot.phase {
                SlotPhase::Waiting if !suppress && slot.definition.enabled => {
                    retry.push(id.clone());
                    continue;
                }
                SlotPhase::Live => {}
                _ => continue,
            }
            let key = slot.feed_key();
            let Some(executor) = slot.executor.as_mut() else { continue };
            let Some(buffer) = self.buffers.get(&key) else { continue };

            let cursor = slot.cursor;
            let fresh: Vec<Bar> = buffer
                .iter()
                .filter(|b| cursor.map_or(true, |c| b.timestamp > c))
                .copied()
                .collect();

            for bar in fresh {
                let signal = executor.execute_bar(bar);
                slot.cursor = Some(bar.timestamp);
                if suppress || !signal.is_trade() {
                    continue;
                }

                let position = executor.position();
                if paper_fills {
                    let broker = PaperBroker::new(
                        &slot.definition.symbol,
                        slot.definition.direction,
                        slot.definition.risk.quantity,
                    )
                    .with_slippage(self.config.slippage_bps);
                    match broker.fill_for(signal, &bar, position) {
                        Some(fill) => executor.on_fill(&fill),
                        None => continue,
                    }
                }

                slot.definition.last_signal = Some(signal);
                slot.definition.last_signal_at = Some(bar.timestamp);
                emitted.push(SignalEvent {
                    strategy_id: id.clone(),
                    symbol: slot.definition.symbol.clone(),
                    signal,
                    price: bar.close,
                    quantity: slot.definition.risk.quantity,
                    position,
                    timestamp: bar.timestamp,
                });
            }
        }

        for event in emitted {
            info!(
                strategy = %event.strategy_id,
                signal = %event.signal,
                price = event.price,
                position = event.position,
                "Signal"
            );
            let message = format!(
                "[{}] {} {} @ {:.2} (position before: {})",
                event.strategy_id, event.signal, event.symbol, event.price, event.position
            );
            let def = self.slots.get(&event.strategy_id).map(|s| s.definition.clone());
            let _ = self.signal_tx.send(event);
            self.notifier.notify(&message).await;
            if let Some(def) = def {
                self.persist(&def).await;
            }
        }

        for id in retry {
            self.spawn_activation(&id);
        }
    }

    fn ensure_feed(&mut self, key: FeedKey) {
        if self.feeds.contains_key(&key) {
            return;
        }
        let (symbol, timeframe) = key.clone();
        info!(%symbol, %timeframe, mode = %self.config.mode, "Starting bar feed");
        let handle = match self.config.mode {
            MarketMode::Live => {
                tokio::spawn(BinanceKlineStream::new(symbol, timeframe, self.bar_tx.clone()).run())
            }
            MarketMode::Paper => tokio::spawn(
                BarPoller::new(
                    self.market.clone(),
                    symbol,
                    timeframe,
                    self.config.check_interval,
                    self.bar_tx.clone(),
                )
                .run(),
            ),
        };
        self.feeds.insert(key, handle);
    }

    async fn refresh_snapshot(&self) {
        let table: BTreeMap<String, StrategySnapshot> = self
            .slots
            .iter()
            .map(|(id, slot)| (id.clone(), slot.snapshot()))
            .collect();
        *self.snapshot.write().await = table;
    }

    async fn persist(&self, def: &StrategyDefinition) {
        if let Err(e) = self.store.save(def).await {
            error!(strategy = %def.id, error = %e, "Failed to persist strategy definition");
        }
    }
}

/// The most recent closed bars for warming a new executor. Empty on any
/// market data failure.
async fn recent_bars(market: &dyn MarketDataClient, def: &StrategyDefinition) -> Vec<Bar> {
    let contract = match market.get_contract(&def.symbol).await {
        Ok(Some(c)) => c,
        Ok(None) => {
            warn!(strategy = %def.id, symbol = %def.symbol, "Contract not found for warm-up");
            return Vec::new();
        }
        Err(e) => {
            warn!(strategy = %def.id, error = %e, "Warm-up contract lookup failed");
            return Vec::new();
        }
    };
    match market.get_kbars(&contract, &def.timeframe, WARM_UP_BARS).await {
        Ok(k) => k.to_bars(),
        Err(e) => {
            warn!(strategy = %def.id, error = %e, "Warm-up bars unavailable");
            Vec::new()
        }
    }
}
