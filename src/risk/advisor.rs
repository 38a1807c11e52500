//! Exit-level adjustment rules, evaluated against fresh price history.
//!
//! Each rule is independent and may fire alongside the others. The rules only
//! propose; nothing here touches a position.

use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use crate::models::{AdjustmentKind, AdjustmentRule, AdjustmentSuggestion, Candle, Direction, Position};

use super::volatility::{
    atr_ratio, average_true_range, price_change_pct, support_resistance, ATR_PERIOD,
    STRUCTURE_LOOKBACK,
};

/// ATR/price above which the stop is considered too tight (3%).
const VOLATILITY_TRIGGER: Decimal = dec!(0.03);
/// Widening applied to the price-to-stop distance (30%).
const STOP_WIDENING: Decimal = dec!(1.3);
/// Minimum relative change of a stop proposal (5%).
const MIN_STOP_CHANGE: Decimal = dec!(0.05);
/// Distance to support/resistance counted as "at structure" (2%).
const STRUCTURE_PROXIMITY: Decimal = dec!(0.02);
/// Distance to TP1 within which banking early is worth it (5%).
const TP_PROXIMITY: Decimal = dec!(0.05);
/// Offset of a pulled-in TP1 beyond the current price (2%).
const TP_OFFSET: Decimal = dec!(0.02);
pub const MOMENTUM_PERIODS: usize = 24;
/// Favourable move over `MOMENTUM_PERIODS`, percent.
const MOMENTUM_TRIGGER_PCT: Decimal = dec!(5);
/// Unrealized ROE required before trailing, percent.
const TRAIL_MIN_ROE_PCT: Decimal = dec!(10);
const TRAIL_ATR_MULTIPLE: Decimal = dec!(2);

fn suggestion(
    position: &Position,
    kind: AdjustmentKind,
    rule: AdjustmentRule,
    current_level: Decimal,
    proposed_level: Decimal,
    confidence: u8,
    rationale: String,
) -> AdjustmentSuggestion {
    AdjustmentSuggestion {
        id: Uuid::new_v4(),
        position_id: position.id,
        symbol: position.symbol.clone(),
        kind,
        rule,
        current_level,
        proposed_level,
        rationale,
        confidence: confidence.min(100),
        created_at: Utc::now(),
    }
}

/// Stop proposals closer than `MIN_STOP_CHANGE` to the current stop are noise.
fn is_meaningful_stop_change(current: Decimal, proposed: Decimal) -> bool {
    !current.is_zero() && (proposed - current).abs() / current > MIN_STOP_CHANGE
}

/// Clamp a decimal score onto a confidence in `[lo, hi]`.
fn score(value: Decimal, lo: u8, hi: u8) -> u8 {
    let lo_d = Decimal::from(lo);
    let hi_d = Decimal::from(hi);
    value.max(lo_d).min(hi_d).round().to_u8().unwrap_or(lo)
}

fn volatility_widening(position: &Position, price: Decimal, atr: Decimal) -> Option<AdjustmentSuggestion> {
    let ratio = atr_ratio(atr, price);
    if ratio <= VOLATILITY_TRIGGER {
        return None;
    }

    let current = position.stop_loss.price;
    let distance = (price - current).abs();
    let proposed = price - position.direction.sign() * distance * STOP_WIDENING;
    if proposed <= Decimal::ZERO || !is_meaningful_stop_change(current, proposed) {
        return None;
    }

    let ratio_pct = ratio * Decimal::ONE_HUNDRED;
    Some(suggestion(
        position,
        AdjustmentKind::StopLoss,
        AdjustmentRule::VolatilityWidening,
        current,
        proposed,
        score(Decimal::from(50) + (ratio_pct - Decimal::from(3)) * Decimal::from(10), 50, 90),
        format!(
            "Volatility is {:.2}% of price (ATR {:.4}); widening the stop 30% to avoid noise exits",
            ratio_pct, atr
        ),
    ))
}

fn structural_proximity(position: &Position, candles: &[Candle], price: Decimal) -> Option<AdjustmentSuggestion> {
    let tp1 = position.take_profits.first()?;
    let sr = support_resistance(candles, STRUCTURE_LOOKBACK)?;
    if price.is_zero() || !position.direction.is_profit_side(price, tp1.price) {
        return None;
    }

    let (level, label) = match position.direction {
        Direction::Long => (sr.resistance, "resistance"),
        Direction::Short => (sr.support, "support"),
    };
    let near_structure = (level - price).abs() / price <= STRUCTURE_PROXIMITY;
    let near_tp = (tp1.price - price).abs() / price <= TP_PROXIMITY;
    if !near_structure || !near_tp {
        return None;
    }

    let proposed = price * (Decimal::ONE + position.direction.sign() * TP_OFFSET);
    if proposed == tp1.price {
        return None;
    }

    Some(suggestion(
        position,
        AdjustmentKind::TakeProfit,
        AdjustmentRule::StructuralProximity,
        tp1.price,
        proposed,
        70,
        format!(
            "Price {} is within 2% of {} at {} and near TP1 {}; bank partial profit at {}",
            price,
            label,
            level,
            tp1.price,
            proposed.round_dp(8).normalize()
        ),
    ))
}

fn momentum_trailing(
    position: &Position,
    candles: &[Candle],
    price: Decimal,
    atr: Decimal,
) -> Option<AdjustmentSuggestion> {
    let closes: Vec<Decimal> = candles.iter().map(|c| c.close).collect();
    let change = price_change_pct(&closes, MOMENTUM_PERIODS)?;
    let favourable = change * position.direction.sign();
    if favourable <= MOMENTUM_TRIGGER_PCT || position.roe_pct(price) <= TRAIL_MIN_ROE_PCT {
        return None;
    }

    let current = position.stop_loss.price;
    let proposed = price - position.direction.sign() * TRAIL_ATR_MULTIPLE * atr;
    let improves = match position.direction {
        Direction::Long => proposed > current,
        Direction::Short => proposed < current,
    };
    if !improves || proposed <= Decimal::ZERO || !is_meaningful_stop_change(current, proposed) {
        return None;
    }

    Some(suggestion(
        position,
        AdjustmentKind::StopLoss,
        AdjustmentRule::MomentumTrailing,
        current,
        proposed,
        score(Decimal::from(50) + favourable * Decimal::from(3), 50, 95),
        format!(
            "{:.2}% move in favour over {} bars; trail stop to 2×ATR behind price to lock in profit",
            favourable, MOMENTUM_PERIODS
        ),
    ))
}

/// Runs every rule against one position.
pub fn evaluate(position: &Position, candles: &[Candle], current_price: Decimal) -> Vec<AdjustmentSuggestion> {
    if current_price <= Decimal::ZERO {
        return Vec::new();
    }
    let atr = average_true_range(candles, ATR_PERIOD).value;

    [
        volatility_widening(position, current_price, atr),
        structural_proximity(position, candles, current_price),
        momentum_trailing(position, candles, current_price, atr),
    ]
    .into_iter()
    .flatten()
    .collect()
}
