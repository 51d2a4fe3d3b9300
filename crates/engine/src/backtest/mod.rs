//! Historical backtests through the live executor path.
//!
//! Bars go through the same `execute_bar` policy and paper fill rules the
//! verifier and runner use, so a backtest shows exactly the signals live
//! trading would have produced on the same bars.

mod chart;
mod metrics;
mod report;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use common::{
    bars_per_day, lookback_days, Bar, MarketDataClient, PipelineError, Signal, StrategyDefinition,
    TradeDirection,
};
use paper::{PaperBroker, ReplayMode, Replayer};
use strategy::StrategyExecutor;

pub use chart::equity_svg;
pub use metrics::{
    compute_metrics, contract_spec, max_drawdown, profit_factor, simulate, sqn_rating,
    BacktestMetrics, ContractSpec, EquityPoint, Trade,
};
pub use report::{format_report, narrative, ReportHeader};

/// Upper bound on bars fetched for one backtest.
pub const MAX_BARS: usize = 10_000;

/// Names the artifact files of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactTag {
    pub strategy_id: String,
    pub version: u32,
}

#[derive(Debug, Clone)]
pub struct BacktestRequest {
    pub program: String,
    /// Expected unit name; a program declaring another name is refused.
    pub unit_name: Option<String>,
    pub symbol: String,
    pub timeframe: String,
    pub direction: TradeDirection,
    pub quantity: i64,
    pub initial_capital: f64,
    pub tag: Option<ArtifactTag>,
}

impl BacktestRequest {
    /// Backtest the installed program of `def`. Only programs that passed
    /// verification qualify; otherwise the stored failure reason is returned.
    pub fn for_definition(def: &StrategyDefinition, initial_capital: f64) -> Result<Self, PipelineError> {
        let program = def
            .strategy_code
            .clone()
            .ok_or_else(|| PipelineError::Backtest(format!("strategy {} has no program", def.id)))?;
        if !def.is_passed() {
            let reason = def.verification_error.clone().unwrap_or_else(|| {
                format!(
                    "strategy {} has not passed verification ({})",
                    def.id, def.verification_status
                )
            });
            return Err(PipelineError::Backtest(reason));
        }
        Ok(Self {
            program,
            unit_name: def.strategy_class_name.clone(),
            symbol: def.symbol.clone(),
            timeframe: def.timeframe.clone(),
            direction: def.direction,
            quantity: def.risk.quantity,
            initial_capital,
            tag: Some(ArtifactTag {
                strategy_id: def.id.clone(),
                version: def.strategy_version,
            }),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactPaths {
    pub chart: PathBuf,
    pub report: PathBuf,
    pub metrics: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct BacktestReport {
    pub unit_name: String,
    pub symbol: String,
    pub timeframe: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub lookback_days: u32,
    pub initial_capital: f64,
    pub bars: usize,
    pub metrics: BacktestMetrics,
    pub trades: Vec<Trade>,
    pub equity: Vec<EquityPoint>,
    #[serde(skip)]
    pub signals: Vec<Signal>,
    pub report: String,
    pub narrative: String,
    pub artifacts: Option<ArtifactPaths>,
}

/// Number of bars a backtest fetches for `timeframe`.
pub fn bar_count(timeframe: &str) -> usize {
    ((lookback_days(timeframe) * bars_per_day(timeframe)) as usize).min(MAX_BARS)
}

#[derive(Clone)]
pub struct BacktestEngine {
    market: Arc<dyn MarketDataClient>,
    artifacts_dir: Option<PathBuf>,
    slippage_bps: f64,
}

impl BacktestEngine {
    pub fn new(market: Arc<dyn MarketDataClient>) -> Self {
        Self {
            market,
            artifacts_dir: None,
            slippage_bps: 0.0,
        }
    }

    /// Paper fill slippage; must match the runner's and the verifier's.
    pub fn with_slippage(mut self, slippage_bps: f64) -> Self {
        self.slippage_bps = slippage_bps.max(0.0);
        self
    }

    /// Write `.svg`, `.txt` and `.json` artifacts for tagged runs under `dir`.
    pub fn with_artifacts_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifacts_dir = Some(dir.into());
        self
    }

    pub async fn run_backtest(&self, req: &BacktestRequest) -> Result<BacktestReport, PipelineError> {
        let fail = PipelineError::Backtest;

        let (unit_name, unit) =
            strategy::load(&req.program).map_err(|e| fail(format!("program failed to load: {e}")))?;
        if let Some(expected) = req.unit_name.as_deref().filter(|n| !n.is_empty()) {
            if expected != unit_name {
                return Err(fail(format!(
                    "strategy unit '{expected}' not found in program (declares '{unit_name}')"
                )));
            }
        }

        let contract = self
            .market
            .get_contract(&req.symbol)
            .await
            .map_err(|e| fail(format!("market data error: {e}")))?
            .ok_or_else(|| fail(format!("contract not found: {}", req.symbol)))?;

        let days = lookback_days(&req.timeframe);
        let count = bar_count(&req.timeframe);
        info!(symbol = %req.symbol, timeframe = %req.timeframe, days, count, "Starting backtest");

        let bars: Vec<Bar> = self
            .market
            .get_kbars(&contract, &req.timeframe, count)
            .await
            .map_err(|e| fail(format!("market data error: {e}")))?
            .to_bars();
        let (Some(first), Some(last)) = (bars.first(), bars.last()) else {
            return Err(fail(format!("no bars available for {} {}", req.symbol, req.timeframe)));
        };
        let (start, end) = (first.timestamp, last.timestamp);

        let id = req.tag.as_ref().map_or("backtest", |t| t.strategy_id.as_str());
        let mut executor = StrategyExecutor::new(id, &req.symbol, &unit);
        let replayer = Replayer::new(
            PaperBroker::new(&req.symbol, req.direction, req.quantity).with_slippage(self.slippage_bps),
            ReplayMode::Lenient,
        );
        let trace = replayer
            .run(&mut executor, &bars)
            .map_err(|e| fail(format!("replay error: {e}")))?;

        let spec = contract_spec(&req.symbol);
        let (trades, equity) = simulate(&bars, &trace.fills, spec, req.initial_capital);
        let metrics = compute_metrics(
            &trades,
            &equity,
            req.initial_capital,
            spec,
            bars_per_day(&req.timeframe),
        );
        if !metrics.total_pnl.is_finite() || !metrics.total_return.is_finite() {
            return Err(fail("metric computation produced a non-finite result".to_string()));
        }

        let header = ReportHeader {
            unit_name: &unit_name,
            symbol: &req.symbol,
            timeframe: &req.timeframe,
            start,
            end,
            lookback_days: days,
            initial_capital: req.initial_capital,
        };
        let report_text = format_report(&header, &metrics);
        let narrative_text = narrative(&metrics);

        info!(
            symbol = %req.symbol,
            bars = bars.len(),
            trades = metrics.trade_count,
            total_return = metrics.total_return,
            "Backtest completed"
        );

        let mut report = BacktestReport {
            unit_name,
            symbol: req.symbol.clone(),
            timeframe: req.timeframe.clone(),
            start,
            end,
            lookback_days: days,
            initial_capital: req.initial_capital,
            bars: bars.len(),
            metrics,
            trades,
            equity,
            signals: trace.signals,
            report: report_text,
            narrative: narrative_text,
            artifacts: None,
        };

        if let (Some(dir), Some(tag)) = (&self.artifacts_dir, &req.tag) {
            match write_artifacts(dir, tag, &report, Utc::now()) {
                Ok(paths) => {
                    info!(report = %paths.report.display(), "Backtest artifacts written");
                    report.artifacts = Some(paths);
                }
                // Artifacts are a by-product; the report stands without them.
                Err(e) => warn!(error = %e, "Failed to write backtest artifacts"),
            }
        }

        Ok(report)
    }
}

/// `<id>_v<version>_<YYYYmmddHHMMSS>` stem for artifact files.
pub fn artifact_stem(tag: &ArtifactTag, at: DateTime<Utc>) -> String {
    format!("{}_v{}_{}", tag.strategy_id, tag.version, at.format("%Y%m%d%H%M%S"))
}

fn write_artifacts(
    dir: &Path,
    tag: &ArtifactTag,
    report: &BacktestReport,
    at: DateTime<Utc>,
) -> common::Result<ArtifactPaths> {
    std::fs::create_dir_all(dir)?;
    let stem = artifact_stem(tag, at);
    let paths = ArtifactPaths {
        chart: dir.join(format!("{stem}.svg")),
        report: dir.join(format!("{stem}.txt")),
        metrics: dir.join(format!("{stem}.json")),
    };

    let title = format!("{} {} {} v{}", report.unit_name, report.symbol, report.timeframe, tag.version);
    std::fs::write(
        &paths.chart,
        equity_svg(&title, &report.equity, &report.trades, report.initial_capital),
    )?;
    std::fs::write(&paths.report, format!("{}\n\n{}\n", report.report, report.narrative))?;

    let json = serde_json::json!({
        "strategy_id": tag.strategy_id,
        "version": tag.version,
        "unit_name": report.unit_name,
        "symbol": report.symbol,
        "timeframe": report.timeframe,
        "start": report.start,
        "end": report.end,
        "initial_capital": report.initial_capital,
        "metrics": report.metrics,
        "trades": report.trades,
        "equity_curve": report.equity,
    });
    std::fs::write(&paths.metrics, serde_json::to_string_pretty(&json)?)?;
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use common::VerificationStatus;
    use paper::{synthetic, PaperMarket};

    const RSI: &str = "\
strategy RsiReversal:
    on_bar(bar):
        let rsi = ta(\"RSI\", period=14)
        if rsi == none:
            return hold
        if position == 0 and rsi[-1] < 30:
            return buy
        if position > 0 and rsi[-1] > 70:
            return close
        return hold
";

    async fn engine(symbol: &str, bars: Vec<Bar>) -> BacktestEngine {
        let market = PaperMarket::new();
        market.insert(symbol, bars).await;
        BacktestEngine::new(Arc::new(market))
    }

    fn request(program: &str) -> BacktestRequest {
        BacktestRequest {
            program: program.to_string(),
            unit_name: None,
            symbol: "TXF".into(),
            timeframe: "15m".into(),
            direction: TradeDirection::Long,
            quantity: 1,
            initial_capital: 1_000_000.0,
            tag: None,
        }
    }

    #[test]
    fn only_verified_programs_are_backtested() {
        let mut def =
            StrategyDefinition::new("rsi", "RSI", "dip buyer", "TXF", "15m", TradeDirection::Long);
        assert_eq!(
            BacktestRequest::for_definition(&def, 1_000_000.0).unwrap_err(),
            PipelineError::Backtest("strategy rsi has no program".into())
        );

        def.strategy_code = Some(RSI.into());
        def.strategy_class_name = Some("RsiReversal".into());
        def.strategy_version = 2;
        def.verification_status = VerificationStatus::Pending;
        assert_eq!(
            BacktestRequest::for_definition(&def, 1_000_000.0).unwrap_err(),
            PipelineError::Backtest("strategy rsi has not passed verification (pending)".into())
        );

        let stored = "Stage 2 failed: signals too frequent (100.0%), likely erroneous";
        def.verification_status = VerificationStatus::Failed;
        def.verification_error = Some(stored.into());
        assert_eq!(
            BacktestRequest::for_definition(&def, 1_000_000.0).unwrap_err(),
            PipelineError::Backtest(stored.into())
        );

        def.verified = true;
        def.verification_status = VerificationStatus::Passed;
        def.verification_error = None;
        let req = BacktestRequest::for_definition(&def, 1_000_000.0).unwrap();
        assert_eq!(req.unit_name.as_deref(), Some("RsiReversal"));
        assert_eq!(
            req.tag,
            Some(ArtifactTag {
                strategy_id: "rsi".into(),
                version: 2,
            })
        );
    }

    #[test]
    fn bar_counts_follow_lookback() {
        assert_eq!(bar_count("15m"), 30 * 96);
        assert_eq!(bar_count("1m"), MAX_BARS);
        assert_eq!(bar_count("1d"), 365);
    }

    #[test]
    fn stem_format() {
        let tag = ArtifactTag {
            strategy_id: "rsi".into(),
            version: 3,
        };
        let at = Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap();
        assert_eq!(artifact_stem(&tag, at), "rsi_v3_20240506070809");
    }

    #[tokio::test]
    async fn rsi_dip_rally_makes_one_winning_trade() {
        let e = engine("TXF", synthetic::rsi_dip_rally()).await;
        let report = e.run_backtest(&request(RSI)).await.unwrap();
        assert_eq!(report.bars, 100);
        assert_eq!(report.metrics.trade_count, 1);
        assert_eq!(report.metrics.won_trades, 1);
        assert_eq!(report.metrics.profit_factor, f64::INFINITY);
        assert_eq!(report.metrics.total_commission, 80.0);
        assert!(report.metrics.total_pnl > 0.0);
        assert!(report.report.contains("Backtest report (RsiReversal)"));
        assert!(report.artifacts.is_none());
    }

    #[tokio::test]
    async fn failures_never_produce_a_partial_report() {
        let e = engine("TXF", synthetic::rsi_dip_rally()).await;

        let mut missing = request(RSI);
        missing.symbol = "MXF".into();
        assert_eq!(
            e.run_backtest(&missing).await.unwrap_err(),
            PipelineError::Backtest("contract not found: MXF".into())
        );

        let broken = request("strategy X:\n    on_bar(bar)\n        return buy\n");
        assert!(matches!(
            e.run_backtest(&broken).await,
            Err(PipelineError::Backtest(reason)) if reason.starts_with("program failed to load")
        ));

        let mut renamed = request(RSI);
        renamed.unit_name = Some("Other".into());
        assert!(e.run_backtest(&renamed).await.is_err());

        let empty = engine("TXF", Vec::new()).await;
        assert_eq!(
            empty.run_backtest(&request(RSI)).await.unwrap_err(),
            PipelineError::Backtest("no bars available for TXF 15m".into())
        );
    }

    #[tokio::test]
    async fn open_position_is_closed_at_the_end() {
        let always_long = "strategy Hold:\n    on_bar(bar):\n        if position == 0:\n            return buy\n        return hold\n";
        let e = engine("TXF", synthetic::sine_wave(50, 100.0, 5.0, 20.0)).await;
        let report = e.run_backtest(&request(always_long)).await.unwrap();
        assert_eq!(report.metrics.trade_count, 1);
        assert!(report.trades[0].forced_exit);
    }

    #[tokio::test]
    async fn tagged_runs_write_three_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let e = engine("TXF", synthetic::rsi_dip_rally())
            .await
            .with_artifacts_dir(dir.path());
        let mut req = request(RSI);
        req.tag = Some(ArtifactTag {
            strategy_id: "rsi".into(),
            version: 2,
        });
        let report = e.run_backtest(&req).await.unwrap();
        let paths = report.artifacts.unwrap();

        for path in [&paths.chart, &paths.report, &paths.metrics] {
            assert!(path.exists(), "{}", path.display());
            let name = path.file_name().unwrap().to_string_lossy().to_string();
            assert!(name.starts_with("rsi_v2_"), "{name}");
        }
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&paths.metrics).unwrap()).unwrap();
        assert_eq!(json["metrics"]["trade_count"], 1);
        assert_eq!(json["equity_curve"].as_array().unwrap().len(), 100);
        let text = std::fs::read_to_string(&paths.report).unwrap();
        assert!(text.contains("Past performance"));
    }
}
