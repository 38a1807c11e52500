//! In-process store used when no database is configured, and by tests.

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{AdjustmentRecord, LiveSettings, Position};

use super::PositionStore;

#[derive(Debug, Default)]
struct Inner {
    positions: Vec<Position>,
    adjustments: Vec<AdjustmentRecord>,
    settings: Option<LiveSettings>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with positions.
    pub fn with_positions(positions: Vec<Position>) -> Self {
        Self {
            inner: RwLock::new(Inner {
                positions,
                ..Inner::default()
            }),
        }
    }
}

#[async_trait]
impl PositionStore for MemoryStore {
    async fn list_positions(&self) -> anyhow::Result<Vec<Position>> {
        let inner = self.inner.read().await;
        let mut positions = inner.positions.clone();
        positions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(positions)
    }

    async fn get_position(&self, id: Uuid) -> anyhow::Result<Option<Position>> {
        let inner = self.inner.read().await;
        Ok(inner.positions.iter().find(|p| p.id == id).cloned())
    }

    async fn save_position(&self, position: &Position) -> anyhow::Result<()> {
        let mut inner = self.inner.write().await;
        match inner.positions.iter_mut().find(|p| p.id == position.id) {
            Some(existing) => *existing = position.clone(),
            None => inner.positions.push(position.clone()),
        }
        Ok(())
    }

    async fn delete_position(&self, id: Uuid) -> anyhow::Result<bool> {
        let mut inner = self.inner.write().await;
        let before = inner.positions.len();
        inner.positions.retain(|p| p.id != id);
        Ok(inner.positions.len() != before)
    }

    async fn append_adjustment(&self, record: &AdjustmentRecord) -> anyhow::Result<bool> {
        let mut inner = self.inner.write().await;
        let duplicate = inner
            .adjustments
            .iter()
            .any(|r| r.suggestion_id == record.suggestion_id && r.outcome == record.outcome);
        if duplicate {
            return Ok(false);
        }
        inner.adjustments.push(record.clone());
        Ok(true)
    }

    async fn list_adjustments(&self, limit: usize) -> anyhow::Result<Vec<AdjustmentRecord>> {
        let inner = self.inner.read().await;
        let mut records = inner.adjustments.clone();
        records.sort_by(|a, b| b.resolved_at.cmp(&a.resolved_at));
        records.truncate(limit);
        Ok(records)
    }

    async fn load_settings(&self) -> anyhow::Result<Option<LiveSettings>> {
        Ok(self.inner.read().await.settings.clone())
    }

    async fn save_settings(&self, settings: &LiveSettings) -> anyhow::Result<()> {
        self.inner.write().await.settings = Some(settings.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::position::fixtures::position;
    use crate::models::{AdjustmentKind, AdjustmentOutcome, AdjustmentRule, AdjustmentSuggestion, Direction};
    use chrono::Utc;
    use rust_decimal::Decimal;

    fn btc() -> Position {
        position(
            "BTCUSDT",
            Direction::Long,
            Decimal::from(100),
            10,
            Decimal::from(100),
            Decimal::from(99),
            &[Decimal::from(102)],
        )
    }

    #[tokio::test]
    async fn save_is_an_upsert() {
        let store = MemoryStore::new();
        let mut p = btc();
        store.save_position(&p).await.unwrap();
        p.needs_review = true;
        store.save_position(&p).await.unwrap();

        let all = store.list_positions().await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].needs_review);
    }

    #[tokio::test]
    async fn delete_reports_whether_anything_was_removed() {
        let p = btc();
        let store = MemoryStore::with_positions(vec![p.clone()]);
        assert!(store.delete_position(p.id).await.unwrap());
        assert!(!store.delete_position(p.id).await.unwrap());
        assert!(store.get_position(p.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn adjustment_history_dedups_by_suggestion_and_outcome() {
        let store = MemoryStore::new();
        let suggestion = AdjustmentSuggestion {
            id: Uuid::new_v4(),
            position_id: Uuid::new_v4(),
            symbol: "BTCUSDT".into(),
            kind: AdjustmentKind::StopLoss,
            rule: AdjustmentRule::MomentumTrailing,
            current_level: Decimal::from(95),
            proposed_level: Decimal::from(98),
            rationale: String::new(),
            confidence: 60,
            created_at: Utc::now(),
        };
        let dismissed = AdjustmentRecord::resolve(&suggestion, AdjustmentOutcome::Dismissed);
        assert!(store.append_adjustment(&dismissed).await.unwrap());
        assert!(!store.append_adjustment(&dismissed).await.unwrap());

        let accepted = AdjustmentRecord::resolve(&suggestion, AdjustmentOutcome::Accepted);
        assert!(store.append_adjustment(&accepted).await.unwrap());
        assert_eq!(store.list_adjustments(10).await.unwrap().len(), 2);
        assert_eq!(store.list_adjustments(1).await.unwrap().len(), 1);
    }
}
