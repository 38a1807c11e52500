use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

use super::ParseEnumError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AdjustmentKind {
    TakeProfit,
    StopLoss,
}

impl AdjustmentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AdjustmentKind::TakeProfit => "take-profit",
            AdjustmentKind::StopLoss => "stop-loss",
        }
    }
}

impl fmt::Display for AdjustmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for AdjustmentKind {
    type Error = ParseEnumError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "take-profit" => Ok(AdjustmentKind::TakeProfit),
            "stop-loss" => Ok(AdjustmentKind::StopLoss),
            _ => Err(ParseEnumError { kind: "adjustment kind", value }),
        }
    }
}

/// Which advisor rule produced a suggestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentRule {
    VolatilityWidening,
    StructuralProximity,
    MomentumTrailing,
}

impl AdjustmentRule {
    pub fn as_str(self) -> &'static str {
        match self {
            AdjustmentRule::VolatilityWidening => "volatility_widening",
            AdjustmentRule::StructuralProximity => "structural_proximity",
            AdjustmentRule::MomentumTrailing => "momentum_trailing",
        }
    }
}

impl fmt::Display for AdjustmentRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for AdjustmentRule {
    type Error = ParseEnumError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "volatility_widening" => Ok(AdjustmentRule::VolatilityWidening),
            "structural_proximity" => Ok(AdjustmentRule::StructuralProximity),
            "momentum_trailing" => Ok(AdjustmentRule::MomentumTrailing),
            _ => Err(ParseEnumError { kind: "adjustment rule", value }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdjustmentOutcome {
    Accepted,
    Dismissed,
}

impl AdjustmentOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            AdjustmentOutcome::Accepted => "accepted",
            AdjustmentOutcome::Dismissed => "dismissed",
        }
    }
}

impl fmt::Display for AdjustmentOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for AdjustmentOutcome {
    type Error = ParseEnumError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "accepted" => Ok(AdjustmentOutcome::Accepted),
            "dismissed" => Ok(AdjustmentOutcome::Dismissed),
            _ => Err(ParseEnumError { kind: "adjustment outcome", value }),
        }
    }
}

/// Stable identity of a recommendation: the same rule proposing the same kind of change
/// for the same position, regardless of the exact level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SuggestionIdentity {
    pub position_id: Uuid,
    pub kind: AdjustmentKind,
    pub rule: AdjustmentRule,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentSuggestion {
    pub id: Uuid,
    pub position_id: Uuid,
    pub symbol: String,
    pub kind: AdjustmentKind,
    pub rule: AdjustmentRule,
    pub current_level: Decimal,
    pub proposed_level: Decimal,
    pub rationale: String,
    /// 0..=100
    pub confidence: u8,
    pub created_at: DateTime<Utc>,
}

impl AdjustmentSuggestion {
    pub fn identity(&self) -> SuggestionIdentity {
        SuggestionIdentity {
            position_id: self.position_id,
            kind: self.kind,
            rule: self.rule,
        }
    }
}

/// Append-only audit entry for a resolved suggestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct AdjustmentRecord {
    pub suggestion_id: Uuid,
    pub position_id: Uuid,
    pub symbol: String,
    #[sqlx(try_from = "String")]
    pub kind: AdjustmentKind,
    #[sqlx(try_from = "String")]
    pub rule: AdjustmentRule,
    #[sqlx(try_from = "String")]
    pub outcome: AdjustmentOutcome,
    pub previous_level: Decimal,
    pub proposed_level: Decimal,
    pub resolved_at: DateTime<Utc>,
}

impl AdjustmentRecord {
    pub fn resolve(suggestion: &AdjustmentSuggestion, outcome: AdjustmentOutcome) -> Self {
        Self {
            suggestion_id: suggestion.id,
            position_id: suggestion.position_id,
            symbol: suggestion.symbol.clone(),
            kind: suggestion.kind,
            rule: suggestion.rule,
            outcome,
            previous_level: suggestion.current_level,
            proposed_level: suggestion.proposed_level,
            resolved_at: Utc::now(),
        }
    }

    pub fn identity(&self) -> SuggestionIdentity {
        SuggestionIdentity {
            position_id: self.position_id,
            kind: self.kind,
            rule: self.rule,
        }
    }
}
