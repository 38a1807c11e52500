use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::position::MAX_LEVERAGE;

/// Reward assumed per unit of risk when no target is given.
const DEFAULT_REWARD_MULTIPLE: Decimal = dec!(2);

#[derive(Debug, Error, PartialEq)]
pub enum SizingError {
    #[error("capital must be positive, got {0}")]
    NonPositiveCapital(Decimal),

    #[error("risk percent must be in (0, 100], got {0}")]
    RiskPctOutOfRange(Decimal),

    #[error("entry price must be positive, got {0}")]
    NonPositiveEntry(Decimal),

    #[error("stop price must be positive, got {0}")]
    NonPositiveStop(Decimal),

    #[error("stop price equals entry price ({0}); stop distance would be zero")]
    StopEqualsEntry(Decimal),

    #[error("leverage must be between 1 and {MAX_LEVERAGE}, got {0}")]
    LeverageOutOfRange(u32),

    #[error("target price must be positive, got {0}")]
    NonPositiveTarget(Decimal),
}

#[derive(Debug, Clone, Deserialize)]
pub struct SizingInput {
    pub capital: Decimal,
    pub risk_pct: Decimal,
    pub entry_price: Decimal,
    pub stop_price: Decimal,
    pub leverage: u32,
    #[serde(default)]
    pub target_price: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SizingResult {
    /// Notional value of the position.
    pub position_size: Decimal,
    pub contracts: Decimal,
    /// Margin required at the requested leverage.
    pub margin: Decimal,
    pub risk_amount: Decimal,
    pub reward_amount: Decimal,
    pub risk_reward_ratio: Decimal,
}

/// Risk-budget sizing: the notional at which hitting the stop loses exactly
/// `capital × risk_pct / 100`.
pub fn size_position(input: &SizingInput) -> Result<SizingResult, SizingError> {
    if input.capital <= Decimal::ZERO {
        return Err(SizingError::NonPositiveCapital(input.capital));
    }
    if input.risk_pct <= Decimal::ZERO || input.risk_pct > Decimal::ONE_HUNDRED {
        return Err(SizingError::RiskPctOutOfRange(input.risk_pct));
    }
    if input.entry_price <= Decimal::ZERO {
        return Err(SizingError::NonPositiveEntry(input.entry_price));
    }
    if input.stop_price <= Decimal::ZERO {
        return Err(SizingError::NonPositiveStop(input.stop_price));
    }
    if input.stop_price == input.entry_price {
        return Err(SizingError::StopEqualsEntry(input.entry_price));
    }
    if input.leverage == 0 || input.leverage > MAX_LEVERAGE {
        return Err(SizingError::LeverageOutOfRange(input.leverage));
    }
    if let Some(target) = input.target_price {
        if target <= Decimal::ZERO {
            return Err(SizingError::NonPositiveTarget(target));
        }
    }

    let risk_amount = input.capital * input.risk_pct / Decimal::ONE_HUNDRED;
    let stop_distance = (input.stop_price - input.entry_price).abs();
    let position_size = risk_amount * input.entry_price / stop_distance;
    let contracts = position_size / input.entry_price;
    let margin = position_size / Decimal::from(input.leverage);

    let reward_amount = match input.target_price {
        Some(target) => position_size * (target - input.entry_price).abs() / input.entry_price,
        None => risk_amount * DEFAULT_REWARD_MULTIPLE,
    };

    Ok(SizingResult {
        position_size,
        contracts,
        margin,
        risk_amount,
        reward_amount,
        risk_reward_ratio: reward_amount / risk_amount,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
