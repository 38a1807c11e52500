pub mod adjustment_repo;
pub mod memory;
pub mod position_repo;
pub mod settings_repo;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{AdjustmentRecord, LiveSettings, Position};

pub use memory::MemoryStore;

/// Persistence for positions, adjustment history and runtime settings.
///
/// Callers read fresh at the start of each operation; nothing is cached
/// between calls.
#[async_trait]
pub trait PositionStore: Send + Sync {
    async fn list_positions(&self) -> anyhow::Result<Vec<Position>>;

    async fn get_position(&self, id: Uuid) -> anyhow::Result<Option<Position>>;

    /// Insert or replace by id.
    async fn save_position(&self, position: &Position) -> anyhow::Result<()>;

    /// Returns false when the id was unknown.
    async fn delete_position(&self, id: Uuid) -> anyhow::Result<bool>;

    /// Returns false when `(suggestion_id, outcome)` is already recorded.
    async fn append_adjustment(&self, record: &AdjustmentRecord) -> anyhow::Result<bool>;

    /// Most recent first.
    async fn list_adjustments(&self, limit: usize) -> anyhow::Result<Vec<AdjustmentRecord>>;

    async fn load_settings(&self) -> anyhow::Result<Option<LiveSettings>>;

    async fn save_settings(&self, settings: &LiveSettings) -> anyhow::Result<()>;
}

pub async fn init_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;

    // Verify connectivity
    sqlx::query("SELECT 1").execute(&pool).await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// PostgreSQL-backed store.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl PositionStore for PgStore {
    async fn list_positions(&self) -> anyhow::Result<Vec<Position>> {
        position_repo::list_positions(&self.pool).await
    }

    async fn get_position(&self, id: Uuid) -> anyhow::Result<Option<Position>> {
        position_repo::get_position(&self.pool, id).await
    }

    async fn save_position(&self, position: &Position) -> anyhow::Result<()> {
        position_repo::upsert_position(&self.pool, position).await
    }

    async fn delete_position(&self, id: Uuid) -> anyhow::Result<bool> {
        position_repo::delete_position(&self.pool, id).await
    }

    async fn append_adjustment(&self, record: &AdjustmentRecord) -> anyhow::Result<bool> {
        adjustment_repo::insert_record(&self.pool, record).await
    }

    async fn list_adjustments(&self, limit: usize) -> anyhow::Result<Vec<AdjustmentRecord>> {
        adjustment_repo::list_records(&self.pool, limit.min(i64::MAX as usize) as i64).await
    }

    async fn load_settings(&self) -> anyhow::Result<Option<LiveSettings>> {
        settings_repo::load_settings(&self.pool).await
    }

    async fn save_settings(&self, settings: &LiveSettings) -> anyhow::Result<()> {
        settings_repo::save_settings(&self.pool, settings).await
    }
}
