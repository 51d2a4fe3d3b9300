//! Natural-language strategy synthesis and the verification gate.

pub mod activation;
pub mod llm;
pub mod prompts;
pub mod review;
pub mod synthesizer;
pub mod testing;
pub mod verifier;

pub use activation::ActivationPipeline;
pub use llm::{LlmConfig, LlmError, OpenAiClient};
pub use review::{parse_review, SelfReviewer};
pub use synthesizer::{extract_program, SynthesisCache, Synthesizer};
pub use verifier::{Verifier, VerifierConfig};
