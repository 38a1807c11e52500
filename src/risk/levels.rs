//! Stop-loss / take-profit derivation for a new position.
//!
//! The stop starts at an ATR multiple from entry, is pulled in to the nearest
//! structural level when that is tighter, and is finally clamped so the margin
//! at risk stays inside the configured capital-risk band.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::Serialize;
use thiserror::Error;

use crate::models::position::MAX_LEVERAGE;
use crate::models::{Candle, Direction, StopLossLevel, TakeProfitLevel};

use super::volatility::{
    average_true_range, support_resistance, swing_points, AtrEstimate, ATR_PERIOD,
    STRUCTURE_LOOKBACK, SWING_WING,
};

/// Take-profit ATR multiples before leverage scaling.
const TP_MULTIPLIERS: [Decimal; 3] = [dec!(1.5), dec!(3), dec!(5)];
/// Share of the position closed at each take-profit, percent. The last level takes the remainder.
pub const TP_ALLOCATIONS: [Decimal; 3] = [dec!(40), dec!(30), dec!(30)];
/// Gap placed beyond a structural level, as a fraction of entry.
const STRUCTURE_BUFFER: Decimal = dec!(0.001);
/// ATR substituted when the estimate is zero, as a fraction of entry.
const MIN_ATR_FRACTION: Decimal = dec!(0.005);
/// ATR cap as a fraction of entry; keeps short targets above zero on garbage data.
const MAX_ATR_FRACTION: Decimal = dec!(0.10);
/// Significant digits kept when a stop is clamped onto the band edge.
const CLAMP_SIGNIFICANT_DIGITS: u32 = 12;

/// Allowed margin-at-risk range for a stop, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CapitalRiskBand {
    pub floor_pct: Decimal,
    pub ceiling_pct: Decimal,
}

impl Default for CapitalRiskBand {
    fn default() -> Self {
        Self {
            floor_pct: Decimal::new(5, 1),   // 0.5%
            ceiling_pct: Decimal::new(2, 0), // 2.0%
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum LevelError {
    #[error("entry price must be positive, got {0}")]
    NonPositiveEntry(Decimal),

    #[error("investment amount must be positive, got {0}")]
    NonPositiveInvestment(Decimal),

    #[error("leverage must be between 1 and {MAX_LEVERAGE}, got {0}")]
    LeverageOutOfRange(u32),

    #[error("invalid capital risk band: floor {floor}% / ceiling {ceiling}%")]
    InvalidBand { floor: Decimal, ceiling: Decimal },
}

#[derive(Debug, Clone)]
pub struct LevelInputs<'a> {
    pub entry_price: Decimal,
    pub direction: Direction,
    pub leverage: u32,
    pub investment_amount: Decimal,
    pub candles: &'a [Candle],
    pub band: CapitalRiskBand,
}

/// How the final stop price was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopPlacement {
    Atr,
    Structure,
    ClampedToCeiling,
    ClampedToFloor,
}

impl StopPlacement {
    fn describe(self) -> &'static str {
        match self {
            StopPlacement::Atr => "ATR stop",
            StopPlacement::Structure => "structural stop",
            StopPlacement::ClampedToCeiling => "stop pulled in to the risk ceiling",
            StopPlacement::ClampedToFloor => "stop pushed out to the risk floor",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RiskLevels {
    pub take_profits: Vec<TakeProfitLevel>,
    pub stop_loss: StopLossLevel,
    pub atr: AtrEstimate,
    /// ATR actually used after zero/cap substitution.
    pub effective_atr: Decimal,
    pub stop_multiplier: Decimal,
    pub placement: StopPlacement,
    /// Structural level considered for the stop, if any was found.
    pub structural_level: Option<Decimal>,
}

/// Margin lost if the stop fills, in percent: |entry - stop| / entry × leverage × 100.
///
/// Multiplies before dividing so band-edge stops evaluate to the edge exactly.
pub fn capital_risk_pct(entry: Decimal, stop: Decimal, leverage: u32) -> Decimal {
    if entry.is_zero() {
        return Decimal::ZERO;
    }
    (entry - stop).abs() * Decimal::from(leverage) * Decimal::ONE_HUNDRED / entry
}

/// (stop ATR multiplier, take-profit scale) for a leverage tier.
/// Higher leverage gets a tighter stop and closer targets.
fn leverage_tier(leverage: u32) -> (Decimal, Decimal) {
    match leverage {
        0..=5 => (Decimal::new(2, 0), Decimal::ONE),
        6..=10 => (Decimal::new(15, 1), Decimal::new(75, 2)),
        11..=20 => (Decimal::ONE, Decimal::new(5, 1)),
        _ => (Decimal::new(75, 2), Decimal::new(35, 2)),
    }
}

fn effective_atr(atr: Decimal, entry: Decimal) -> Decimal {
    if atr <= Decimal::ZERO {
        return entry * MIN_ATR_FRACTION;
    }
    atr.min(entry * MAX_ATR_FRACTION)
}

/// Nearest structural level on the loss side of entry: the highest swing low or
/// support below entry for longs, the lowest swing high or resistance above entry
/// for shorts.
fn structural_level(candles: &[Candle], direction: Direction, entry: Decimal) -> Option<Decimal> {
    let window = &candles[candles.len().saturating_sub(STRUCTURE_LOOKBACK)..];
    let swings = swing_points(window, SWING_WING);
    let sr = support_resistance(window, STRUCTURE_LOOKBACK);

    match direction {
        Direction::Long => swings
            .lows
            .into_iter()
            .chain(sr.map(|s| s.support))
            .filter(|level| *level < entry)
            .max(),
        Direction::Short => swings
            .highs
            .into_iter()
            .chain(sr.map(|s| s.resistance))
            .filter(|level| *level > entry)
            .min(),
    }
}

/// Distance from entry that puts capital risk exactly on `pct`, rounded toward the band interior.
fn band_distance(entry: Decimal, leverage: u32, pct: Decimal, strategy: RoundingStrategy) -> Decimal {
    let raw = entry * pct / (Decimal::from(leverage) * Decimal::ONE_HUNDRED);
    raw.round_sf_with_strategy(CLAMP_SIGNIFICANT_DIGITS, strategy)
        .unwrap_or(raw)
}

/// Re-clamps a stop into the capital-risk band.
pub fn clamp_stop(
    entry: Decimal,
    stop: Decimal,
    direction: Direction,
    leverage: u32,
    band: CapitalRiskBand,
) -> (Decimal, Option<StopPlacement>) {
    let risk = capital_risk_pct(entry, stop, leverage);
    let on_loss_side = direction.is_loss_side(entry, stop);

    let (distance, placement) = if on_loss_side && risk > band.ceiling_pct {
        (
            band_distance(entry, leverage, band.ceiling_pct, RoundingStrategy::ToZero),
            StopPlacement::ClampedToCeiling,
        )
    } else if !on_loss_side || risk < band.floor_pct {
        (
            band_distance(entry, leverage, band.floor_pct, RoundingStrategy::AwayFromZero),
            StopPlacement::ClampedToFloor,
        )
    } else {
        return (stop, None);
    };

    (entry - direction.sign() * distance, Some(placement))
}

fn validate(inputs: &LevelInputs<'_>) -> Result<(), LevelError> {
    if inputs.entry_price <= Decimal::ZERO {
        return Err(LevelError::NonPositiveEntry(inputs.entry_price));
    }
    if inputs.investment_amount <= Decimal::ZERO {
        return Err(LevelError::NonPositiveInvestment(inputs.investment_amount));
    }
    if inputs.leverage == 0 || inputs.leverage > MAX_LEVERAGE {
        return Err(LevelError::LeverageOutOfRange(inputs.leverage));
    }
    let band = inputs.band;
    if band.floor_pct <= Decimal::ZERO || band.floor_pct > band.ceiling_pct {
        return Err(LevelError::InvalidBand {
            floor: band.floor_pct,
            ceiling: band.ceiling_pct,
        });
    }
    Ok(())
}

/// Derives take-profit levels and a band-clamped stop for a new position.
pub fn calculate_levels(inputs: &LevelInputs<'_>) -> Result<RiskLevels, LevelError> {
    validate(inputs)?;

    let entry = inputs.entry_price;
    let direction = inputs.direction;
    let sign = direction.sign();
    let leverage = inputs.leverage;
    let lev = Decimal::from(leverage);

    let atr = average_true_range(inputs.candles, ATR_PERIOD);
    let eff_atr = effective_atr(atr.value, entry);
    let (stop_mult, tp_scale) = leverage_tier(leverage);

    // --- Stop: ATR base, pulled in to structure when tighter ---
    let base_distance = eff_atr * stop_mult;
    let mut stop = entry - sign * base_distance;
    let mut placement = StopPlacement::Atr;

    let structure = structural_level(inputs.candles, direction, entry);
    if let Some(level) = structure {
        let candidate = level - sign * entry * STRUCTURE_BUFFER;
        if direction.is_loss_side(entry, candidate) && (entry - candidate).abs() < base_distance {
            stop = candidate;
            placement = StopPlacement::Structure;
        }
    }

    let (stop, clamped) = clamp_stop(entry, stop, direction, leverage, inputs.band);
    if let Some(c) = clamped {
        placement = c;
    }

    let capital_risk = capital_risk_pct(entry, stop, leverage);
    let loss_move_pct = (entry - stop).abs() * Decimal::ONE_HUNDRED / entry;

    // --- Take-profits ---
    let take_profits: Vec<TakeProfitLevel> = TP_MULTIPLIERS
        .iter()
        .zip(TP_ALLOCATIONS.iter())
        .enumerate()
        .map(|(i, (mult, alloc))| {
            let scaled = *mult * tp_scale;
            let price = entry + sign * eff_atr * scaled;
            let roe = (price - entry).abs() * lev * Decimal::ONE_HUNDRED / entry;
            TakeProfitLevel {
                level: (i + 1) as u8,
                price,
                expected_profit_usd: inputs.investment_amount * roe * *alloc
                    / (Decimal::ONE_HUNDRED * Decimal::ONE_HUNDRED),
                expected_profit_pct: roe,
                allocation_pct: *alloc,
                rationale: format!(
                    "{}x ATR target ({}x base scaled for {}x leverage), close {}%",
                    scaled.normalize(),
                    mult.normalize(),
                    leverage,
                    alloc.normalize(),
                ),
            }
        })
        .collect();

    let mut rationale = format!(
        "{}: {}x ATR ({}) at {}x leverage, capital risk {}%",
        placement.describe(),
        stop_mult.normalize(),
        eff_atr.round_dp(8).normalize(),
        leverage,
        capital_risk.round_dp(2),
    );
    if let Some(level) = structure.filter(|_| placement == StopPlacement::Structure) {
        rationale.push_str(&format!(", anchored beyond structure at {}", level.normalize()));
    }
    if atr.degraded {
        rationale.push_str(", limited price history (default ATR)");
    }

    let partial_exit_strategy = partial_exit_playbook(&take_profits);

    Ok(RiskLevels {
        stop_loss: StopLossLevel {
            price: stop,
            expected_loss_usd: inputs.investment_amount * capital_risk / Decimal::ONE_HUNDRED,
            expected_loss_pct: loss_move_pct,
            capital_risk_pct: capital_risk,
            rationale,
            partial_exit_strategy,
        },
        take_profits,
        atr,
        effective_atr: eff_atr,
        stop_multiplier: stop_mult,
        placement,
        structural_level: structure,
    })
}

fn partial_exit_playbook(take_profits: &[TakeProfitLevel]) -> String {
    let legs: Vec<String> = take_profits
        .iter()
        .map(|tp| {
            format!(
                "close {}% at TP{} ({})",
                tp.allocation_pct.normalize(),
                tp.level,
                tp.price.round_dp(8).normalize()
            )
        })
        .collect();
    format!("{}; move stop to breakeven once TP1 fills", legs.join(", "))
}
