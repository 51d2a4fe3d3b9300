use std::sync::Arc;

use tracing::{error, info, warn};

use common::{
    CandidateProgram, PipelineError, StrategyDefinition, StrategyStore, VerificationStatus,
    description_hash,
};
use strategy::{load, CompiledUnit};

use crate::synthesizer::Synthesizer;
use crate::verifier::Verifier;

/// Synthesize → load → verify, persisting the definition after every step.
#[derive(Clone)]
pub struct ActivationPipeline {
    synthesizer: Synthesizer,
    verifier: Verifier,
    store: Arc<dyn StrategyStore>,
}

impl ActivationPipeline {
    pub fn new(synthesizer: Synthesizer, verifier: Verifier, store: Arc<dyn StrategyStore>) -> Self {
        Self {
            synthesizer,
            verifier,
            store,
        }
    }

    pub fn synthesizer(&self) -> &Synthesizer {
        &self.synthesizer
    }

    pub fn verifier(&self) -> &Verifier {
        &self.verifier
    }

    /// Bring `def` to a runnable, verified unit, or explain which gate refused it.
    pub async fn activate(&self, def: &mut StrategyDefinition) -> Result<CompiledUnit, PipelineError> {
        if def.is_passed() && !def.needs_regeneration() {
            return self.installed_unit(def);
        }

        if def.needs_regeneration() {
            info!(strategy = %def.id, version = def.strategy_version, "Generating strategy program");
            let source = self
                .synthesizer
                .synthesize(&def.description, def.direction)
                .await?;

            match load(&source) {
                Ok((unit_name, _)) => {
                    def.set_candidate(CandidateProgram {
                        source,
                        unit_name,
                        description_hash: description_hash(&def.description),
                    });
                    info!(strategy = %def.id, version = def.strategy_version, "Candidate program installed");
                    self.persist(def).await;
                }
                Err(e) => {
                    // Keep the broken candidate so the same text is not retried
                    // until the description changes.
                    let unit_name = strategy::extract_unit_name(&source).unwrap_or_default();
                    def.set_candidate(CandidateProgram {
                        source,
                        unit_name,
                        description_hash: description_hash(&def.description),
                    });
                    let failure = PipelineError::Load(e.to_string());
                    def.verification_attempts = 1;
                    def.verification_status = VerificationStatus::Failed;
                    def.verification_error = Some(failure.to_string());
                    self.persist(def).await;
                    return Err(failure);
                }
            }
        }

        if def.verification_status == VerificationStatus::Failed {
            let surfaced = def.verification_error.clone().unwrap_or_default();
            warn!(strategy = %def.id, reason = %surfaced, "Strategy previously failed verification");
            return Err(surfaced_failure(&surfaced));
        }

        let Some(source) = def.strategy_code.clone() else {
            return Err(PipelineError::Generation("no program installed".to_string()));
        };
        let report = self.verifier.verify(def, &source).await;
        self.persist(def).await;

        if report.passed {
            self.installed_unit(def)
        } else {
            Err(report.failure.unwrap_or_else(|| {
                surfaced_failure(report.reason.as_deref().unwrap_or("verification failed"))
            }))
        }
    }

    fn installed_unit(&self, def: &StrategyDefinition) -> Result<CompiledUnit, PipelineError> {
        let source = def
            .strategy_code
            .as_deref()
            .ok_or_else(|| PipelineError::Load("no program installed".to_string()))?;
        let (_, unit) = load(source).map_err(|e| PipelineError::Load(e.to_string()))?;
        Ok(unit)
    }

    async fn persist(&self, def: &StrategyDefinition) {
        if let Err(e) = self.store.save(def).await {
            error!(strategy = %def.id, error = %e, "Failed to persist strategy definition");
        }
    }
}

/// Rebuild a pipeline error from its surfaced text.
fn surfaced_failure(text: &str) -> PipelineError {
    const PREFIXES: [(&str, fn(String) -> PipelineError); 5] = [
        ("generation failed: ", PipelineError::Generation),
        ("load failed: ", PipelineError::Load),
        ("Stage 1 failed: ", PipelineError::Review),
        ("Stage 2 failed: ", PipelineError::BacktestCheck),
        ("backtest failed: ", PipelineError::Backtest),
    ];
    PREFIXES
        .iter()
        .find_map(|(prefix, make)| text.strip_prefix(prefix).map(|r| make(r.to_string())))
        .unwrap_or_else(|| PipelineError::BacktestCheck(text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn surfaced_text_round_trips() {
        for err in [
            PipelineError::Load("line 2, column 5: x".into()),
            PipelineError::Review("never closes".into()),
            PipelineError::BacktestCheck("contract not found: TXF".into()),
        ] {
            assert_eq!(surfaced_failure(&err.to_string()), err);
        }
    }
}
