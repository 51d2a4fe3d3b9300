use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::{debug, info};

use common::{
    Error, Result, RiskParams, Signal, StrategyDefinition, StrategyStore, TradeDirection,
    VerificationStatus,
};

const COLUMNS: &str = "id, name, description, symbol, timeframe, direction, stop_loss, \
    take_profit, quantity, enabled, strategy_code, strategy_class_name, strategy_version, \
    prompt_hash, verified, verification_status, verification_error, verification_attempts, \
    last_signal, last_signal_at";

/// Strategy definitions in the `strategies` table.
#[derive(Debug, Clone)]
pub struct SqliteStrategyStore {
    db: SqlitePool,
}

impl SqliteStrategyStore {
    /// Open (creating if missing) the database at `url` and apply migrations.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let db = SqlitePoolOptions::new().connect_with(options).await?;
        let store = Self::from_pool(db);
        store.migrate().await?;
        info!(url, "Strategy store ready");
        Ok(store)
    }

    pub fn from_pool(db: SqlitePool) -> Self {
        Self { db }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.db)
            .await
            .map_err(|e| Error::Database(e.into()))
    }
}

#[async_trait]
impl StrategyStore for SqliteStrategyStore {
    async fn load_all(&self) -> Result<Vec<StrategyDefinition>> {
        let rows = sqlx::query(&format!("SELECT {COLUMNS} FROM strategies ORDER BY id"))
            .fetch_all(&self.db)
            .await?;
        rows.iter().map(decode).collect()
    }

    async fn get(&self, id: &str) -> Result<Option<StrategyDefinition>> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM strategies WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        row.as_ref().map(decode).transpose()
    }

    async fn save(&self, def: &StrategyDefinition) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO strategies (
                id, name, description, symbol, timeframe, direction, stop_loss, take_profit,
                quantity, enabled, strategy_code, strategy_class_name, strategy_version,
                prompt_hash, verified, verification_status, verification_error,
                verification_attempts, last_signal, last_signal_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                symbol = excluded.symbol,
                timeframe = excluded.timeframe,
                direction = excluded.direction,
                stop_loss = excluded.stop_loss,
                take_profit = excluded.take_profit,
                quantity = excluded.quantity,
                enabled = excluded.enabled,
                strategy_code = excluded.strategy_code,
                strategy_class_name = excluded.strategy_class_name,
                strategy_version = excluded.strategy_version,
                prompt_hash = excluded.prompt_hash,
                verified = excluded.verified,
                verification_status = excluded.verification_status,
                verification_error = excluded.verification_error,
                verification_attempts = excluded.verification_attempts,
                last_signal = excluded.last_signal,
                last_signal_at = excluded.last_signal_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&def.id)
        .bind(&def.name)
        .bind(&def.description)
        .bind(&def.symbol)
        .bind(&def.timeframe)
        .bind(def.direction)
        .bind(def.risk.stop_loss)
        .bind(def.risk.take_profit)
        .bind(def.risk.quantity)
        .bind(def.enabled)
        .bind(&def.strategy_code)
        .bind(&def.strategy_class_name)
        .bind(i64::from(def.strategy_version))
        .bind(&def.prompt_hash)
        .bind(def.verified)
        .bind(def.verification_status)
        .bind(&def.verification_error)
        .bind(i64::from(def.verification_attempts))
        .bind(def.last_signal.map(|s| s.as_str()))
        .bind(def.last_signal_at.map(|t| t.to_rfc3339()))
        .bind(Utc::now().to_rfc3339())
        .execute(&self.db)
        .await?;

        debug!(strategy = %def.id, version = def.strategy_version, status = %def.verification_status, "Strategy saved");
        Ok(())
    }
}

fn decode(row: &SqliteRow) -> Result<StrategyDefinition> {
    let last_signal: Option<String> = row.try_get("last_signal")?;
    let last_signal_at: Option<String> = row.try_get("last_signal_at")?;

    Ok(StrategyDefinition {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        symbol: row.try_get("symbol")?,
        timeframe: row.try_get("timeframe")?,
        direction: row.try_get::<TradeDirection, _>("direction")?,
        risk: RiskParams {
            stop_loss: row.try_get("stop_loss")?,
            take_profit: row.try_get("take_profit")?,
            quantity: row.try_get("quantity")?,
        },
        enabled: row.try_get("enabled")?,
        strategy_code: row.try_get("strategy_code")?,
        strategy_class_name: row.try_get("strategy_class_name")?,
        strategy_version: counter(row.try_get("strategy_version")?),
        prompt_hash: row.try_get("prompt_hash")?,
        verified: row.try_get("verified")?,
        verification_status: row.try_get::<VerificationStatus, _>("verification_status")?,
        verification_error: row.try_get("verification_error")?,
        verification_attempts: counter(row.try_get("verification_attempts")?),
        last_signal: last_signal.as_deref().and_then(Signal::parse),
        last_signal_at: last_signal_at.as_deref().map(parse_time).transpose()?,
    })
}

fn counter(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}

fn parse_time(text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Other(format!("bad timestamp '{text}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    async fn store() -> SqliteStrategyStore {
        // A single connection keeps the in-memory database alive and shared.
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = SqliteStrategyStore::from_pool(db);
        store.migrate().await.unwrap();
        store
    }

    #[tokio::test]
    async fn round_trips_pipeline_bookkeeping() {
        let store = store().await;
        let mut def = StrategyDefinition::new(
            "txf-rsi",
            "TXF RSI",
            "buy when RSI < 30",
            "TXF",
            "15m",
            TradeDirection::Long,
        );
        def.risk.stop_loss = 50.0;
        def.strategy_code = Some("strategy X:\n".into());
        def.strategy_class_name = Some("X".into());
        def.strategy_version = 2;
        def.verification_status = VerificationStatus::Failed;
        def.verification_error = Some("Stage 2 failed: too frequent".into());
        def.verification_attempts = 3;
        def.last_signal = Some(Signal::Close);
        def.last_signal_at = Some(Utc.with_ymd_and_hms(2024, 3, 1, 9, 15, 0).unwrap());
        store.save(&def).await.unwrap();

        let loaded = store.get("txf-rsi").await.unwrap().unwrap();
        assert_eq!(loaded, def);
        assert!(store.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_upserts_by_id() {
        let store = store().await;
        let mut def =
            StrategyDefinition::new("a", "A", "first", "MXF", "5m", TradeDirection::Both);
        store.save(&def).await.unwrap();
        def.update_description("second");
        def.enabled = false;
        store.save(&def).await.unwrap();
        store
            .save(&StrategyDefinition::new("b", "B", "x", "TXF", "1h", TradeDirection::Short))
            .await
            .unwrap();

        let all = store.load_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, "a");
        assert_eq!(all[0].description, "second");
        assert!(!all[0].enabled);
        assert_eq!(all[1].direction, TradeDirection::Short);
    }
}
