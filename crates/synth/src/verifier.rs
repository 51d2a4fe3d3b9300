use std::sync::Arc;

use tracing::{info, warn};

use common::{
    MarketDataClient, PipelineError, ReplayOutcome, ReviewOutcome, StrategyDefinition,
    VerificationReport, VerificationStage, VerificationStatus,
};
use paper::{PaperBroker, ReplayMode, Replayer};
use strategy::{CompiledUnit, StrategyExecutor};

use crate::review::SelfReviewer;

/// Non-hold share above which a sample replay is rejected.
pub const MAX_TRADE_RATIO: f64 = 0.5;

pub const NO_SIGNALS_WARNING: &str = "no trade signals in sample window";

#[derive(Debug, Clone, Copy)]
pub struct VerifierConfig {
    pub max_attempts: u32,
    pub sample_bars: usize,
    pub slippage_bps: f64,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            sample_bars: 100,
            slippage_bps: 0.0,
        }
    }
}

impl VerifierConfig {
    pub fn from_config(config: &common::Config) -> Self {
        Self {
            max_attempts: config.verify_max_attempts.max(1),
            sample_bars: config.verify_sample_bars.max(1),
            slippage_bps: config.paper_slippage_bps,
        }
    }
}

/// Two-stage gate a candidate program must clear before it trades.
#[derive(Clone)]
pub struct Verifier {
    reviewer: SelfReviewer,
    market: Arc<dyn MarketDataClient>,
    config: VerifierConfig,
}

impl Verifier {
    pub fn new(reviewer: SelfReviewer, market: Arc<dyn MarketDataClient>, config: VerifierConfig) -> Self {
        Self {
            reviewer,
            market,
            config,
        }
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    /// One verification attempt. The outcome is written onto `def`.
    ///
    /// A load failure fails the definition at once; stage failures keep it
    /// pending until `max_attempts` is reached.
    pub async fn verify(&self, def: &mut StrategyDefinition, program: &str) -> VerificationReport {
        let attempt = def.verification_attempts + 1;
        info!(
            strategy = %def.id,
            attempt,
            max_attempts = self.config.max_attempts,
            "Verification attempt"
        );

        let report = match strategy::load(program) {
            Err(e) => self.failed(attempt, VerificationStage::Load, e.to_string(), None, None),
            Ok((_, unit)) => self.run_stages(def, program, &unit, attempt).await,
        };

        if def.is_passed() && !report.passed {
            warn!(strategy = %def.id, "Verified strategy failed a re-check; keeping it passed");
            def.verification_attempts = report.attempt;
        } else {
            def.record_verification(&report);
        }

        match &report.reason {
            Some(reason) if !report.passed => {
                warn!(strategy = %def.id, attempt, status = %report.status, %reason, "Verification failed")
            }
            _ => info!(strategy = %def.id, attempt, "Verification passed"),
        }
        report
    }

    async fn run_stages(
        &self,
        def: &StrategyDefinition,
        program: &str,
        unit: &CompiledUnit,
        attempt: u32,
    ) -> VerificationReport {
        let review = self.reviewer.review(&def.description, program).await;
        if !review.passed {
            let reason = review.reason.clone();
            return self.failed(attempt, VerificationStage::Review, reason, Some(review), None);
        }

        let replay = self.replay_check(def, unit).await;
        if !replay.passed {
            let reason = replay.reason.clone();
            return self.failed(attempt, VerificationStage::BacktestCheck, reason, Some(review), Some(replay));
        }

        VerificationReport {
            passed: true,
            failed_stage: None,
            reason: None,
            failure: None,
            review: Some(review),
            replay: Some(replay),
            attempt,
            status: VerificationStatus::Passed,
        }
    }

    /// Stage 2: replay recent history with simulated fills.
    pub async fn replay_check(&self, def: &StrategyDefinition, unit: &CompiledUnit) -> ReplayOutcome {
        let fail = |reason: String| ReplayOutcome {
            passed: false,
            reason,
            warning: None,
            histogram: Default::default(),
            trade_bars: Vec::new(),
        };

        let contract = match self.market.get_contract(&def.symbol).await {
            Ok(Some(c)) => c,
            Ok(None) => return fail(format!("contract not found: {}", def.symbol)),
            Err(e) => return fail(format!("market data error: {e}")),
        };
        let bars = match self
            .market
            .get_kbars(&contract, &def.timeframe, self.config.sample_bars)
            .await
        {
            Ok(k) if !k.is_empty() => k.to_bars(),
            Ok(_) => return fail(format!("no bars available for {} {}", def.symbol, def.timeframe)),
            Err(e) => return fail(format!("market data error: {e}")),
        };

        let broker = PaperBroker::new(&def.symbol, def.direction, def.risk.quantity)
            .with_slippage(self.config.slippage_bps);
        let replayer = Replayer::new(broker, ReplayMode::Strict);
        let mut executor = StrategyExecutor::new(&def.id, &def.symbol, unit);
        let trace = match replayer.run(&mut executor, &bars) {
            Ok(t) => t,
            Err(e) => return fail(format!("runtime error: {e}")),
        };

        let histogram = trace.histogram;
        let ratio = histogram.trade_ratio();
        info!(strategy = %def.id, bars = bars.len(), signals = %histogram, "Stage 2 replay finished");

        let (passed, reason, warning) = if histogram.trades() == 0 {
            (
                true,
                format!("passed ({NO_SIGNALS_WARNING})"),
                Some(NO_SIGNALS_WARNING.to_string()),
            )
        } else if ratio > MAX_TRADE_RATIO {
            (
                false,
                format!("signals too frequent ({:.1}%), likely erroneous", ratio * 100.0),
                None,
            )
        } else {
            (true, "passed".to_string(), None)
        };

        ReplayOutcome {
            passed,
            reason,
            warning,
            histogram,
            trade_bars: trace.trade_bars(),
        }
    }

    fn failed(
        &self,
        attempt: u32,
        stage: VerificationStage,
        reason: String,
        review: Option<ReviewOutcome>,
        replay: Option<ReplayOutcome>,
    ) -> VerificationReport {
        let status = if stage == VerificationStage::Load || attempt >= self.config.max_attempts {
            VerificationStatus::Failed
        } else {
            VerificationStatus::Pending
        };
        let failure = PipelineError::from_stage(stage, reason);
        VerificationReport {
            passed: false,
            failed_stage: Some(stage),
            reason: Some(failure.to_string()),
            failure: Some(failure),
            review,
            replay,
            attempt,
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedModel;
    use common::TradeDirection;
    use paper::{synthetic, PaperMarket};

    const ALWAYS_BUY: &str = "strategy AlwaysBuy:\n    on_bar(bar):\n        return buy\n";
    const PASS: &str = "VERDICT: PASS\nREASON: ok";

    async fn verifier(replies: &[&str]) -> (Verifier, Arc<ScriptedModel>) {
        let model = Arc::new(ScriptedModel::new(replies.iter().map(|r| r.to_string())));
        let market = PaperMarket::new();
        market.insert("TXF", synthetic::rsi_dip_rally()).await;
        let v = Verifier::new(
            SelfReviewer::new(model.clone()),
            Arc::new(market),
            VerifierConfig::default(),
        );
        (v, model)
    }

    fn def() -> StrategyDefinition {
        StrategyDefinition::new("s1", "test", "always buy", "TXF", "15m", TradeDirection::Long)
    }

    #[tokio::test]
    async fn load_failure_fails_immediately_without_review() {
        let (v, model) = verifier(&[]).await;
        let mut d = def();
        let report = v.verify(&mut d, "strategy Broken:\n    on_bar(bar)\n        return buy\n").await;
        assert_eq!(report.failed_stage, Some(VerificationStage::Load));
        assert_eq!(d.verification_status, VerificationStatus::Failed);
        assert!(report.reason.unwrap().contains("line 2"));
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn always_buy_is_too_frequent_and_stays_pending() {
        let (v, _) = verifier(&[PASS]).await;
        let mut d = def();
        let report = v.verify(&mut d, ALWAYS_BUY).await;
        assert!(!report.passed);
        assert_eq!(report.failed_stage, Some(VerificationStage::BacktestCheck));
        assert_eq!(
            report.reason.as_deref(),
            Some("Stage 2 failed: signals too frequent (100.0%), likely erroneous")
        );
        assert_eq!(d.verification_status, VerificationStatus::Pending);
        assert_eq!(d.verification_attempts, 1);
        assert!(!d.verified);
    }

    #[tokio::test]
    async fn attempts_exhaust_into_failed() {
        let (v, _) = verifier(&[PASS, PASS, PASS]).await;
        let mut d = def();
        for expected in 1..=3u32 {
            v.verify(&mut d, ALWAYS_BUY).await;
            assert_eq!(d.verification_attempts, expected);
        }
        assert_eq!(d.verification_status, VerificationStatus::Failed);
    }

    #[tokio::test]
    async fn review_failure_is_stage_one() {
        let (v, _) = verifier(&["VERDICT: FAIL\nREASON: never closes"]).await;
        let mut d = def();
        let report = v.verify(&mut d, ALWAYS_BUY).await;
        assert_eq!(report.reason.as_deref(), Some("Stage 1 failed: never closes"));
        assert!(report.replay.is_none());
    }

    #[tokio::test]
    async fn zero_signals_is_a_soft_pass() {
        let (v, _) = verifier(&[PASS]).await;
        let mut d = def();
        let report = v
            .verify(&mut d, "strategy Idle:\n    on_bar(bar):\n        return hold\n")
            .await;
        assert!(report.passed);
        assert_eq!(report.replay.unwrap().warning.as_deref(), Some(NO_SIGNALS_WARNING));
        assert!(d.is_passed());
    }

    #[tokio::test]
    async fn missing_contract_fails_stage_two() {
        let (v, _) = verifier(&[PASS]).await;
        let mut d = def();
        d.symbol = "MXF".into();
        let report = v.verify(&mut d, ALWAYS_BUY).await;
        assert_eq!(report.reason.as_deref(), Some("Stage 2 failed: contract not found: MXF"));
    }
}
