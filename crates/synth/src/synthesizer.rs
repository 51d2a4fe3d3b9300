use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use common::{LanguageModel, PipelineError, TradeDirection};
use strategy::extract_unit_name;

use crate::prompts::{synthesis_messages, MAX_TOKENS, SYNTHESIS_TEMPERATURE};

/// Shorter responses cannot hold a complete program.
const MIN_PROGRAM_LEN: usize = 20;

/// Bounded FIFO cache of generated program text.
#[derive(Debug)]
pub struct SynthesisCache {
    capacity: usize,
    order: VecDeque<String>,
    entries: HashMap<String, String>,
}

impl SynthesisCache {
    pub const DEFAULT_CAPACITY: usize = 64;

    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            entries: HashMap::new(),
        }
    }

    /// Key for a request: SHA-256 over direction and raw description.
    pub fn key(description: &str, direction: TradeDirection) -> String {
        let mut hasher = Sha256::new();
        hasher.update(direction.to_string().as_bytes());
        hasher.update([0u8]);
        hasher.update(description.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn get(&self, key: &str) -> Option<&String> {
        self.entries.get(key)
    }

    pub fn insert(&mut self, key: String, program: String) {
        if self.entries.insert(key.clone(), program).is_none() {
            self.order.push_back(key);
        }
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.entries.clear();
    }
}

/// Take the first fenced code block, or the whole text when there is none.
///
/// Returns `None` when the result is too short or lacks a `strategy`
/// declaration or an `on_bar` handler.
pub fn extract_program(response: &str) -> Option<String> {
    let text = response.trim();
    let body = match text.find("```") {
        Some(open) => {
            let after = &text[open + 3..];
            // Skip the info string (`strategy`, `python`, ...) up to the newline.
            let start = after.find('\n').map(|i| i + 1).unwrap_or(after.len());
            let rest = &after[start..];
            let end = rest.find("```").unwrap_or(rest.len());
            &rest[..end]
        }
        None => text,
    };
    let program = body.trim_matches('\n').trim_end();
    if program.trim().len() < MIN_PROGRAM_LEN {
        warn!(len = program.len(), "Response too short to contain a program");
        return None;
    }
    if extract_unit_name(program).is_none() || !program.contains("on_bar") {
        warn!("Response lacks a strategy declaration or on_bar handler");
        return None;
    }
    Some(format!("{program}\n"))
}

/// Turns natural-language descriptions into program text.
#[derive(Clone)]
pub struct Synthesizer {
    llm: Arc<dyn LanguageModel>,
    cache: Arc<Mutex<SynthesisCache>>,
}

impl Synthesizer {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self::with_capacity(llm, SynthesisCache::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(llm: Arc<dyn LanguageModel>, capacity: usize) -> Self {
        Self {
            llm,
            cache: Arc::new(Mutex::new(SynthesisCache::new(capacity))),
        }
    }

    pub async fn synthesize(
        &self,
        description: &str,
        direction: TradeDirection,
    ) -> Result<String, PipelineError> {
        let key = SynthesisCache::key(description, direction);
        if let Some(hit) = self.cached(&key) {
            info!(key = %&key[..12], "Using cached strategy program");
            return Ok(hit);
        }

        info!(len = description.len(), %direction, "Calling LLM to generate strategy program");
        let messages = synthesis_messages(description, direction);
        let response = self
            .llm
            .chat(&messages, SYNTHESIS_TEMPERATURE, MAX_TOKENS)
            .await
            .map_err(|e| PipelineError::Generation(e.to_string()))?;
        debug!(len = response.len(), "LLM response received");

        let program = extract_program(&response).ok_or_else(|| {
            let preview: String = response.chars().take(200).collect();
            PipelineError::Generation(format!("could not extract a program from the response: {preview:?}"))
        })?;

        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(key, program.clone());
        }
        Ok(program)
    }

    fn cached(&self, key: &str) -> Option<String> {
        self.cache.lock().ok()?.get(key).cloned()
    }

    pub fn clear_cache(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
    }

    pub fn cache_len(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }
}
