//! What-if projection of a uniform price shock across every open position.

use std::collections::HashMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::models::Position;

use super::liquidation::{self, LeverageBracket, RiskBand};

pub const MAX_SHOCK_PCT: Decimal = dec!(50);
pub const PRESET_SHOCKS: [i64; 8] = [-30, -20, -10, -5, 5, 10, 20, 30];

#[derive(Debug, Error, PartialEq)]
pub enum ScenarioError {
    #[error("shock must be between -{MAX_SHOCK_PCT}% and {MAX_SHOCK_PCT}%, got {0}%")]
    ShockOutOfRange(Decimal),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionImpact {
    pub position_id: Uuid,
    pub symbol: String,
    pub current_price: Decimal,
    pub simulated_price: Decimal,
    pub pnl_usd: Decimal,
    pub pnl_pct: Decimal,
    pub tp_hit: bool,
    pub sl_hit: bool,
    pub liquidation_price: Decimal,
    pub liquidation_risk: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioReport {
    pub shock_pct: Decimal,
    pub total_pnl_usd: Decimal,
    /// Total impact as a percent of deployed margin.
    pub total_pnl_pct: Decimal,
    pub positions: Vec<PositionImpact>,
}

/// True when moving from `from` to `to` reaches or passes `level`.
fn crosses(from: Decimal, to: Decimal, level: Decimal) -> bool {
    if to > from {
        level > from && level <= to
    } else if to < from {
        level < from && level >= to
    } else {
        false
    }
}

fn impact(
    position: &Position,
    current: Decimal,
    shock_pct: Decimal,
    brackets: &[LeverageBracket],
) -> PositionImpact {
    let simulated = current * (Decimal::ONE_HUNDRED + shock_pct) / Decimal::ONE_HUNDRED;
    let pnl_pct = shock_pct * position.leverage_dec() * position.direction.sign();
    let pnl_usd = position.investment_amount * pnl_pct / Decimal::ONE_HUNDRED;

    let estimate = liquidation::estimate(position, simulated, brackets);
    let liquidation_risk = liquidation::is_liquidated(simulated, estimate.liquidation_price, position.direction)
        || estimate.band == RiskBand::Danger;

    PositionImpact {
        position_id: position.id,
        symbol: position.symbol.clone(),
        current_price: current,
        simulated_price: simulated,
        pnl_usd,
        pnl_pct,
        tp_hit: position.direction.is_profit_side(current, simulated)
            && position
                .take_profits
                .iter()
                .any(|tp| crosses(current, simulated, tp.price)),
        sl_hit: position.direction.is_loss_side(current, simulated)
            && crosses(current, simulated, position.stop_loss.price),
        liquidation_price: estimate.liquidation_price,
        liquidation_risk,
    }
}

/// Applies `shock_pct` to each position's current price (live, else entry).
pub fn simulate(
    positions: &[Position],
    prices: &HashMap<String, Decimal>,
    shock_pct: Decimal,
    brackets: &HashMap<String, Vec<LeverageBracket>>,
) -> Result<ScenarioReport, ScenarioError> {
    if shock_pct.abs() > MAX_SHOCK_PCT {
        return Err(ScenarioError::ShockOutOfRange(shock_pct));
    }

    let impacts: Vec<PositionImpact> = positions
        .iter()
        .map(|p| {
            let current = prices.get(&p.symbol).copied().unwrap_or(p.entry_price);
            let schedule = brackets.get(&p.symbol).map(Vec::as_slice).unwrap_or(&[]);
            impact(p, current, shock_pct, schedule)
        })
        .collect();

    let total_pnl_usd: Decimal = impacts.iter().map(|i| i.pnl_usd).sum();
    let deployed: Decimal = positions.iter().map(|p| p.investment_amount).sum();
    let total_pnl_pct = if deployed.is_zero() {
        Decimal::ZERO
    } else {
        total_pnl_usd * Decimal::ONE_HUNDRED / deployed
    };

    Ok(ScenarioReport {
        shock_pct,
        total_pnl_usd,
        total_pnl_pct,
        positions: impacts,
    })
}

/// Runs every preset shock in order.
pub fn simulate_presets(
    positions: &[Position],
    prices: &HashMap<String, Decimal>,
    brackets: &HashMap<String, Vec<LeverageBracket>>,
) -> Vec<ScenarioReport> {
    PRESET_SHOCKS
        .iter()
        .filter_map(|s| simulate(positions, prices, Decimal::from(*s), brackets).ok())
        .collect()
}
