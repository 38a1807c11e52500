use serde::Serialize;
use uuid::Uuid;

use crate::models::{AdjustmentSuggestion, Position, PriceSnapshot};
use crate::services::notifier::Notification;

/// Messages broadcast to all connected WebSocket clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum WsMessage {
    #[serde(rename = "notification")]
    Notification(Notification),

    #[serde(rename = "position_update")]
    PositionUpdate(Position),

    #[serde(rename = "position_removed")]
    PositionRemoved { id: Uuid },

    #[serde(rename = "suggestions_update")]
    SuggestionsUpdate(Vec<AdjustmentSuggestion>),

    #[serde(rename = "price_update")]
    PriceUpdate(Vec<PriceSnapshot>),
}
