use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use super::{Direction, ParseEnumError};

pub const MAX_LEVERAGE: u32 = 125;

/// One take-profit target. `level` is 1-based and levels are ordered by distance from entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TakeProfitLevel {
    pub level: u8,
    pub price: Decimal,
    /// Profit realized by the allocated slice when this level fills.
    pub expected_profit_usd: Decimal,
    /// Return on margin at this price, as a percentage.
    pub expected_profit_pct: Decimal,
    /// Share of the position closed at this level, as a percentage.
    pub allocation_pct: Decimal,
    pub rationale: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopLossLevel {
    pub price: Decimal,
    pub expected_loss_usd: Decimal,
    /// Adverse price move to the stop, as a percentage of entry.
    pub expected_loss_pct: Decimal,
    /// Margin lost if the stop fills: price move % × leverage.
    pub capital_risk_pct: Decimal,
    pub rationale: String,
    pub partial_exit_strategy: String,
}

/// Exchange order ids placed on behalf of a position.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkedOrders {
    pub entry: Option<String>,
    pub stop_loss: Option<String>,
    /// Indexed like `Position::take_profits`.
    #[serde(default)]
    pub take_profits: Vec<Option<String>>,
}

impl LinkedOrders {
    pub fn is_empty(&self) -> bool {
        self.entry.is_none()
            && self.stop_loss.is_none()
            && self.take_profits.iter().all(Option::is_none)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSource {
    Manual,
    Imported,
}

impl PositionSource {
    pub fn as_str(self) -> &'static str {
        match self {
            PositionSource::Manual => "manual",
            PositionSource::Imported => "imported",
        }
    }
}

impl fmt::Display for PositionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for PositionSource {
    type Error = ParseEnumError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "manual" => Ok(PositionSource::Manual),
            "imported" => Ok(PositionSource::Imported),
            _ => Err(ParseEnumError { kind: "position source", value }),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum PositionError {
    #[error("entry price must be positive, got {0}")]
    NonPositiveEntry(Decimal),

    #[error("investment amount must be positive, got {0}")]
    NonPositiveInvestment(Decimal),

    #[error("leverage must be between 1 and {MAX_LEVERAGE}, got {0}")]
    LeverageOutOfRange(u32),

    #[error("stop-loss {stop} is not on the loss side of entry {entry} for a {direction} position")]
    StopOnWrongSide {
        stop: Decimal,
        entry: Decimal,
        direction: Direction,
    },

    #[error("stop-loss {stop} is not on the loss side of the current price {price} for a {direction} position")]
    StopBeyondPrice {
        stop: Decimal,
        price: Decimal,
        direction: Direction,
    },

    #[error("take-profit {level} at {price} is not on the profit side of entry {entry}")]
    TakeProfitOnWrongSide { level: u8, price: Decimal, entry: Decimal },
}

/// A tracked leveraged futures position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Position {
    pub id: Uuid,
    pub symbol: String,
    #[sqlx(try_from = "String")]
    pub direction: Direction,
    pub entry_price: Decimal,
    #[sqlx(try_from = "i32")]
    pub leverage: u32,
    pub investment_amount: Decimal,
    pub total_exposure: Decimal,
    #[sqlx(json)]
    pub take_profits: Vec<TakeProfitLevel>,
    #[sqlx(json)]
    pub stop_loss: StopLossLevel,
    #[sqlx(try_from = "String")]
    pub source: PositionSource,
    /// Set on imported positions whose exits are placeholders.
    pub needs_review: bool,
    #[sqlx(json)]
    pub orders: LinkedOrders,
    pub created_at: DateTime<Utc>,
}

impl Position {
    /// Checks the sizing and exit-side invariants.
    pub fn validate(&self) -> Result<(), PositionError> {
        if self.entry_price <= Decimal::ZERO {
            return Err(PositionError::NonPositiveEntry(self.entry_price));
        }
        if self.investment_amount <= Decimal::ZERO {
            return Err(PositionError::NonPositiveInvestment(self.investment_amount));
        }
        if self.leverage == 0 || self.leverage > MAX_LEVERAGE {
            return Err(PositionError::LeverageOutOfRange(self.leverage));
        }
        if !self.direction.is_loss_side(self.entry_price, self.stop_loss.price) {
            return Err(PositionError::StopOnWrongSide {
                stop: self.stop_loss.price,
                entry: self.entry_price,
                direction: self.direction,
            });
        }
        for tp in &self.take_profits {
            if !self.direction.is_profit_side(self.entry_price, tp.price) {
                return Err(PositionError::TakeProfitOnWrongSide {
                    level: tp.level,
                    price: tp.price,
                    entry: self.entry_price,
                });
            }
        }
        Ok(())
    }

    pub fn leverage_dec(&self) -> Decimal {
        Decimal::from(self.leverage)
    }

    /// Contract quantity implied by exposure and entry.
    pub fn contracts(&self) -> Decimal {
        if self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        self.total_exposure / self.entry_price
    }

    /// Return on margin at `price`, in percent.
    pub fn roe_pct(&self, price: Decimal) -> Decimal {
        if self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        (price - self.entry_price) * self.leverage_dec() * Decimal::ONE_HUNDRED
            * self.direction.sign()
            / self.entry_price
    }

    pub fn unrealized_pnl(&self, price: Decimal) -> Decimal {
        self.investment_amount * self.roe_pct(price) / Decimal::ONE_HUNDRED
    }

    /// Sum of allocation-weighted take-profit payouts.
    pub fn potential_profit(&self) -> Decimal {
        self.take_profits.iter().map(|tp| tp.expected_profit_usd).sum()
    }

    pub fn potential_loss(&self) -> Decimal {
        self.stop_loss.expected_loss_usd
    }

    /// Moves the stop and recomputes its loss figures.
    ///
    /// The stop must stay on the loss side of `market_price`; it may pass entry.
    /// Loss figures are signed: a stop trailed beyond entry locks in profit and
    /// reports zero or negative risk.
    pub fn move_stop(&mut self, price: Decimal, market_price: Decimal, note: &str) -> Result<(), PositionError> {
        if price <= Decimal::ZERO || !self.direction.is_loss_side(market_price, price) {
            return Err(PositionError::StopBeyondPrice {
                stop: price,
                price: market_price,
                direction: self.direction,
            });
        }

        let capital_risk = -self.roe_pct(price);
        self.stop_loss.price = price;
        self.stop_loss.capital_risk_pct = capital_risk;
        self.stop_loss.expected_loss_usd = self.investment_amount * capital_risk / Decimal::ONE_HUNDRED;
        self.stop_loss.expected_loss_pct = if self.entry_price.is_zero() {
            Decimal::ZERO
        } else {
            (self.entry_price - price) * self.direction.sign() * Decimal::ONE_HUNDRED / self.entry_price
        };
        self.stop_loss.rationale = note.to_string();
        Ok(())
    }

    /// Moves take-profit `index` (0-based) and recomputes its payout. Returns false if absent.
    pub fn move_take_profit(&mut self, index: usize, price: Decimal, note: &str) -> bool {
        let roe = self.roe_pct(price);
        let investment = self.investment_amount;
        let Some(tp) = self.take_profits.get_mut(index) else {
            return false;
        };
        tp.price = price;
        tp.expected_profit_pct = roe;
        tp.expected_profit_usd =
            investment * roe * tp.allocation_pct / (Decimal::ONE_HUNDRED * Decimal::ONE_HUNDRED);
        tp.rationale = note.to_string();
        true
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Position: {} {} {}x entry={} margin={} sl={}",
            self.symbol,
            self.direction,
            self.leverage,
            self.entry_price,
            self.investment_amount,
            self.stop_loss.price,
        )
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::position;
    use super::*;

    #[test]
    fn test_validate_long_ok() {
        let p = position(
            "BTCUSDT",
            Direction::Long,
            Decimal::from(100),
            10,
            Decimal::from(50),
            Decimal::from(99),
            &[Decimal::from(102), Decimal::from(104)],
        );
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_validate_short_stop_below_entry_rejected() {
        let p = position(
            "ETHUSDT",
            Direction::Short,
            Decimal::from(100),
            5,
            Decimal::from(50),
            Decimal::from(98),
            &[Decimal::from(95)],
        );
        assert!(matches!(p.validate(), Err(PositionError::StopOnWrongSide { .. })));
    }

    #[test]
    fn test_validate_leverage_bounds() {
        let mut p = position(
            "ETHUSDT",
            Direction::Long,
            Decimal::from(100),
            1,
            Decimal::from(50),
            Decimal::from(99),
            &[],
        );
        p.leverage = 0;
        assert_eq!(p.validate(), Err(PositionError::LeverageOutOfRange(0)));
        p.leverage = 126;
        assert_eq!(p.validate(), Err(PositionError::LeverageOutOfRange(126)));
    }

    #[test]
    fn test_roe_and_pnl_short() {
        let p = position(
            "SOLUSDT",
            Direction::Short,
            Decimal::from(200),
            5,
            Decimal::from(100),
            Decimal::from(202),
            &[Decimal::from(190)],
        );
        // price down 5% on a 5x short = +25% ROE
        assert_eq!(p.roe_pct(Decimal::from(190)), Decimal::from(25));
        assert_eq!(p.unrealized_pnl(Decimal::from(190)), Decimal::from(25));
        assert_eq!(p.contracts(), Decimal::new(25, 1));
    }

    #[test]
    fn test_move_stop_recomputes_loss() {
        let mut p = position(
            "BTCUSDT",
            Direction::Long,
            Decimal::from(100),
            10,
            Decimal::from(200),
            Decimal::from(99),
            &[Decimal::from(102)],
        );
        p.move_stop(Decimal::new(995, 1), Decimal::from(100), "trailed").unwrap();
        assert_eq!(p.stop_loss.capital_risk_pct, Decimal::from(5));
        assert_eq!(p.stop_loss.expected_loss_usd, Decimal::from(10));
        assert_eq!(p.stop_loss.expected_loss_pct, Decimal::new(5, 1));
        assert_eq!(p.stop_loss.rationale, "trailed");
    }

    #[test]
    fn test_stop_trailed_past_entry_locks_profit() {
        let mut p = position(
            "BTCUSDT",
            Direction::Long,
            Decimal::from(100),
            10,
            Decimal::from(200),
            Decimal::from(95),
            &[Decimal::from(130)],
        );
        p.move_stop(Decimal::from(110), Decimal::from(120), "trailed").unwrap();
        // stop 10% above entry on 10x: 100% of margin locked in, not at risk
        assert_eq!(p.stop_loss.capital_risk_pct, Decimal::from(-100));
        assert_eq!(p.stop_loss.expected_loss_usd, Decimal::from(-200));
        assert_eq!(p.stop_loss.expected_loss_pct, Decimal::from(-10));

        let mut short = position(
            "ETHUSDT",
            Direction::Short,
            Decimal::from(200),
            5,
            Decimal::from(100),
            Decimal::from(210),
            &[Decimal::from(150)],
        );
        short.move_stop(Decimal::from(200), Decimal::from(180), "breakeven").unwrap();
        assert_eq!(short.stop_loss.capital_risk_pct, Decimal::ZERO);
        assert_eq!(short.stop_loss.expected_loss_usd, Decimal::ZERO);
    }

    #[test]
    fn test_stop_beyond_market_price_is_rejected() {
        let mut p = position(
            "BTCUSDT",
            Direction::Long,
            Decimal::from(100),
            10,
            Decimal::from(200),
            Decimal::from(95),
            &[Decimal::from(130)],
        );
        let before = p.stop_loss.clone();

        let err = p.move_stop(Decimal::from(105), Decimal::from(104), "late").unwrap_err();
        assert!(matches!(err, PositionError::StopBeyondPrice { .. }));
        assert!(p.move_stop(Decimal::from(104), Decimal::from(104), "at price").is_err());
        assert!(p.move_stop(Decimal::ZERO, Decimal::from(104), "zero").is_err());
        assert_eq!(p.stop_loss, before);

        let mut short = position(
            "ETHUSDT",
            Direction::Short,
            Decimal::from(200),
            5,
            Decimal::from(100),
            Decimal::from(210),
            &[Decimal::from(150)],
        );
        assert!(short.move_stop(Decimal::from(185), Decimal::from(190), "wrong way").is_err());
    }

    #[test]
    fn test_move_take_profit() {
        let mut p = position(
            "BTCUSDT",
            Direction::Long,
            Decimal::from(100),
            10,
            Decimal::from(200),
            Decimal::from(99),
            &[Decimal::from(102)],
        );
        p.take_profits[0].allocation_pct = Decimal::from(40);
        assert!(p.move_take_profit(0, Decimal::from(101), "banked"));
        // 1% × 10x = 10% ROE on 200 margin, 40% of the position
        assert_eq!(p.take_profits[0].expected_profit_usd, Decimal::from(8));
        assert!(!p.move_take_profit(3, Decimal::from(105), "missing"));
    }
}
