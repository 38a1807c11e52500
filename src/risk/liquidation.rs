//! Liquidation price and distance-to-liquidation estimates.
//!
//! Shared by the exposure view, the scenario engine and the live-risk endpoint.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::models::{Direction, Position};

/// Maintenance margin ratio used when no bracket schedule is available (0.4%).
pub const DEFAULT_MAINT_MARGIN_RATIO: Decimal = dec!(0.004);

/// One tier of the exchange's leverage-bracket schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeverageBracket {
    pub bracket: u32,
    pub initial_leverage: u32,
    pub notional_floor: Decimal,
    pub notional_cap: Decimal,
    pub maint_margin_ratio: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskBand {
    Safe,
    Warning,
    Danger,
}

impl RiskBand {
    /// >20% safe, 10-20% warning, <10% danger.
    pub fn classify(distance_pct: Decimal) -> Self {
        if distance_pct > Decimal::from(20) {
            RiskBand::Safe
        } else if distance_pct >= Decimal::from(10) {
            RiskBand::Warning
        } else {
            RiskBand::Danger
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiquidationEstimate {
    pub liquidation_price: Decimal,
    pub maint_margin_ratio: Decimal,
    pub distance_pct: Decimal,
    pub band: RiskBand,
}

/// Maintenance margin ratio for a position's tier of the bracket schedule.
///
/// Brackets are keyed by notional exposure; the tier containing `notional` wins and
/// exposure above the last cap uses the last tier.
pub fn maintenance_margin_ratio(brackets: &[LeverageBracket], notional: Decimal) -> Decimal {
    brackets
        .iter()
        .find(|b| notional >= b.notional_floor && notional < b.notional_cap)
        .or_else(|| brackets.iter().max_by_key(|b| b.notional_cap))
        .map(|b| b.maint_margin_ratio)
        .unwrap_or(DEFAULT_MAINT_MARGIN_RATIO)
}

/// entry × (1 - 1/L + mmr) for longs, entry × (1 + 1/L - mmr) for shorts.
pub fn liquidation_price(entry: Decimal, leverage: u32, direction: Direction, mmr: Decimal) -> Decimal {
    let inv_lev = Decimal::ONE / Decimal::from(leverage.max(1));
    match direction {
        Direction::Long => entry * (Decimal::ONE - inv_lev + mmr),
        Direction::Short => entry * (Decimal::ONE + inv_lev - mmr),
    }
}

/// How far the live price can move against the position before liquidation, in percent.
pub fn distance_to_liquidation_pct(live_price: Decimal, liq_price: Decimal, direction: Direction) -> Decimal {
    if live_price.is_zero() {
        return Decimal::ZERO;
    }
    (live_price - liq_price) * Decimal::ONE_HUNDRED * direction.sign() / live_price
}

pub fn estimate(position: &Position, live_price: Decimal, brackets: &[LeverageBracket]) -> LiquidationEstimate {
    let mmr = maintenance_margin_ratio(brackets, position.total_exposure);
    let liq = liquidation_price(position.entry_price, position.leverage, position.direction, mmr);
    let distance = distance_to_liquidation_pct(live_price, liq, position.direction);
    LiquidationEstimate {
        liquidation_price: liq,
        maint_margin_ratio: mmr,
        distance_pct: distance,
        band: RiskBand::classify(distance),
    }
}

/// True when `price` is at or through the liquidation price.
pub fn is_liquidated(price: Decimal, liq_price: Decimal, direction: Direction) -> bool {
    match direction {
        Direction::Long => price <= liq_price,
        Direction::Short => price >= liq_price,
    }
}
