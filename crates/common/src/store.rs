use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{Result, StrategyDefinition};

/// Persistence boundary for strategy definitions.
///
/// The pipeline reads a definition, mutates its bookkeeping fields and hands
/// it back through `save`. Implementations upsert by `id`.
#[async_trait]
pub trait StrategyStore: Send + Sync {
    async fn load_all(&self) -> Result<Vec<StrategyDefinition>>;

    async fn get(&self, id: &str) -> Result<Option<StrategyDefinition>>;

    async fn save(&self, definition: &StrategyDefinition) -> Result<()>;
}

/// Process-local store for tests and offline runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryStrategyStore {
    definitions: Arc<RwLock<BTreeMap<String, StrategyDefinition>>>,
}

impl MemoryStrategyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_definitions(definitions: impl IntoIterator<Item = StrategyDefinition>) -> Self {
        let map = definitions.into_iter().map(|d| (d.id.clone(), d)).collect();
        Self {
            definitions: Arc::new(RwLock::new(map)),
        }
    }
}

#[async_trait]
impl StrategyStore for MemoryStrategyStore {
    async fn load_all(&self) -> Result<Vec<StrategyDefinition>> {
        Ok(self.definitions.read().await.values().cloned().collect())
    }

    async fn get(&self, id: &str) -> Result<Option<StrategyDefinition>> {
        Ok(self.definitions.read().await.get(id).cloned())
    }

    async fn save(&self, definition: &StrategyDefinition) -> Result<()> {
        self.definitions
            .write()
            .await
            .insert(definition.id.clone(), definition.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TradeDirection;

    #[tokio::test]
    async fn memory_store_upserts_by_id() {
        let store = MemoryStrategyStore::new();
        let mut def = StrategyDefinition::new("a", "A", "desc", "TXF", "15m", TradeDirection::Both);
        store.save(&def).await.unwrap();
        def.verification_attempts = 2;
        store.save(&def).await.unwrap();

        let all = store.load_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].verification_attempts, 2);
        assert!(store.get("missing").await.unwrap().is_none());
    }
}
