//! stratbot: natural-language strategies, synthesized, verified and run.
//!
//! Commands:
//! - `run`: start the strategy runner and trade until Ctrl-C
//! - `verify <id>`: one synthesis and verification attempt
//! - `backtest <id>`: historical backtest with report and artifacts

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use common::{
    Config, EngineCommand, LogNotifier, MarketDataClient, Notifier, StrategyDefinition,
    StrategyStore,
};
use engine::{
    BacktestEngine, BacktestRequest, BinanceMarket, RunnerConfig, SqliteStrategyStore,
    StrategyRunner,
};
use paper::{synthetic, PaperMarket};
use strategy::StrategyFileConfig;
use synth::{
    ActivationPipeline, LlmConfig, OpenAiClient, SelfReviewer, Synthesizer, Verifier,
    VerifierConfig,
};
use telegram_notify::TelegramNotifier;

#[derive(Parser)]
#[command(
    name = "stratbot",
    about = "Synthesize, verify, backtest and run trading strategies described in plain language"
)]
struct Cli {
    /// Serve synthetic bars instead of exchange data.
    #[arg(long, global = true, default_value_t = false)]
    offline: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every enabled strategy until Ctrl-C.
    Run,
    /// Synthesize (if needed) and verify one strategy.
    Verify {
        /// Strategy id from the strategy config.
        id: String,
    },
    /// Backtest one strategy's installed program.
    Backtest {
        /// Strategy id from the strategy config.
        id: String,

        /// Starting capital. Defaults to INITIAL_CAPITAL.
        #[arg(long)]
        capital: Option<f64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env();
    info!(mode = %cfg.market_mode, offline = cli.offline, "stratbot starting");

    // ── Database ──────────────────────────────────────────────────────────────
    let store = Arc::new(
        SqliteStrategyStore::connect(&cfg.database_url)
            .await
            .context("failed to open strategy database")?,
    );
    let seeded = seed_definitions(store.as_ref(), &cfg.strategy_config_path).await?;
    info!(strategies = seeded.len(), "Database ready");

    // ── Collaborators ─────────────────────────────────────────────────────────
    let market: Arc<dyn MarketDataClient> = if cli.offline {
        let paper = PaperMarket::new();
        for def in &seeded {
            paper
                .insert(&def.symbol, synthetic::sine_wave(3_000, 100.0, 8.0, 96.0))
                .await;
        }
        Arc::new(paper)
    } else {
        Arc::new(BinanceMarket::new()?)
    };

    let notifier: Arc<dyn Notifier> = match &cfg.telegram_token {
        Some(token) if !cfg.telegram_chat_ids.is_empty() => {
            Arc::new(TelegramNotifier::new(token.clone(), &cfg.telegram_chat_ids))
        }
        _ => {
            info!("Telegram not configured, notifications go to the log");
            Arc::new(LogNotifier)
        }
    };

    let llm = Arc::new(OpenAiClient::new(LlmConfig::from_config(&cfg))?);
    let verifier = Verifier::new(
        SelfReviewer::new(llm.clone()),
        market.clone(),
        VerifierConfig::from_config(&cfg),
    );
    let pipeline = ActivationPipeline::new(Synthesizer::new(llm), verifier, store.clone());

    match cli.command {
        Commands::Run => run(&cfg, pipeline, store, market, notifier).await,
        Commands::Verify { id } => verify(&id, &pipeline, store.as_ref(), notifier.as_ref()).await,
        Commands::Backtest { id, capital } => {
            let capital = capital.unwrap_or(cfg.initial_capital);
            let engine = BacktestEngine::new(market)
                .with_artifacts_dir(&cfg.artifacts_dir)
                .with_slippage(cfg.paper_slippage_bps);
            backtest(&id, capital, &engine, &pipeline, store.as_ref()).await
        }
    }
}

/// Insert strategies from the seed file that the store does not know yet and
/// carry description edits over to the ones it does.
async fn seed_definitions(
    store: &dyn StrategyStore,
    path: &str,
) -> Result<Vec<StrategyDefinition>> {
    if !std::path::Path::new(path).exists() {
        warn!(path, "No strategy config found, using stored definitions only");
        return Ok(store.load_all().await?);
    }

    let file = StrategyFileConfig::load(path)?;
    for seed in file.definitions() {
        match store.get(&seed.id).await? {
            None => {
                info!(strategy = %seed.id, "Seeding new strategy");
                store.save(&seed).await?;
            }
            Some(mut current) => {
                let changed = current.description != seed.description;
                current.update_description(seed.description.clone());
                current.name = seed.name;
                current.risk = seed.risk;
                if changed {
                    info!(strategy = %current.id, "Description changed in config, program will be regenerated");
                }
                store.save(&current).await?;
            }
        }
    }
    Ok(store.load_all().await?)
}

async fn run(
    cfg: &Config,
    pipeline: ActivationPipeline,
    store: Arc<SqliteStrategyStore>,
    market: Arc<dyn MarketDataClient>,
    notifier: Arc<dyn Notifier>,
) -> Result<()> {
    let (runner, handle) = StrategyRunner::new(
        RunnerConfig::from_config(cfg),
        pipeline,
        store,
        market,
        notifier,
    );
    tokio::spawn(runner.run());

    let mut signals = handle.subscribe_signals();
    tokio::spawn(async move {
        loop {
            match signals.recv().await {
                Ok(event) => info!(
                    strategy = %event.strategy_id,
                    signal = %event.signal,
                    price = event.price,
                    "Signal"
                ),
                Err(broadcast::error::RecvError::Lagged(n)) => warn!(skipped = n, "Signal log lagged"),
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    handle.send(EngineCommand::Start).await;

    info!("Runner started. Waiting for shutdown signal.");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Stopping.");
    handle.send(EngineCommand::Stop).await;
    for snapshot in handle.snapshot().await {
        info!(strategy = %snapshot.id, phase = %snapshot.phase, status = %snapshot.verification_status, "Final state");
    }
    Ok(())
}

async fn verify(
    id: &str,
    pipeline: &ActivationPipeline,
    store: &dyn StrategyStore,
    notifier: &dyn Notifier,
) -> Result<()> {
    let mut def = store
        .get(id)
        .await?
        .ok_or_else(|| anyhow!("unknown strategy '{id}'"))?;

    match pipeline.activate(&mut def).await {
        Ok(unit) => {
            println!(
                "{}: {} v{} verified ({}/{} attempts)",
                def.id,
                unit.name(),
                def.strategy_version,
                def.verification_attempts,
                pipeline.verifier().config().max_attempts
            );
        }
        Err(e) => {
            notifier.notify(&format!("Strategy {} ({}): {e}", def.name, def.id)).await;
            println!(
                "{}: {} [status {}, {}/{} attempts]",
                def.id,
                e,
                def.verification_status,
                def.verification_attempts,
                pipeline.verifier().config().max_attempts
            );
        }
    }
    Ok(())
}

async fn backtest(
    id: &str,
    capital: f64,
    engine: &BacktestEngine,
    pipeline: &ActivationPipeline,
    store: &dyn StrategyStore,
) -> Result<()> {
    let mut def = store
        .get(id)
        .await?
        .ok_or_else(|| anyhow!("unknown strategy '{id}'"))?;

    if !def.is_passed() || def.needs_regeneration() {
        info!(strategy = %def.id, status = %def.verification_status, "No verified program, activating first");
        pipeline.activate(&mut def).await?;
    }

    // Refuses anything that still has not passed, with the stored reason.
    let request = BacktestRequest::for_definition(&def, capital)?;
    let report = engine.run_backtest(&request).await?;

    println!("{}\n", report.report);
    println!("{}", report.narrative);
    if let Some(paths) = &report.artifacts {
        println!();
        println!("Chart:   {}", paths.chart.display());
        println!("Report:  {}", paths.report.display());
        println!("Metrics: {}", paths.metrics.display());
    }
    Ok(())
}
