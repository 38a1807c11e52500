//! Average True Range and simple structural levels from a candle series.
//!
//! Everything here fails soft: short or empty series produce a conservative
//! estimate flagged as degraded instead of an error, so position creation is
//! never blocked by missing history.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

use crate::models::Candle;

pub const ATR_PERIOD: usize = 14;
pub const STRUCTURE_LOOKBACK: usize = 50;
pub const SWING_WING: usize = 2;

/// Fallback ATR as a fraction of the last price (0.5%).
const DEFAULT_ATR_FRACTION: Decimal = dec!(0.005);

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AtrEstimate {
    pub value: Decimal,
    /// True when the series was too short and `value` is the fallback.
    pub degraded: bool,
}

impl AtrEstimate {
    fn fallback(last_price: Option<Decimal>) -> Self {
        Self {
            value: last_price.map(|p| p * DEFAULT_ATR_FRACTION).unwrap_or(Decimal::ZERO),
            degraded: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SupportResistance {
    pub support: Decimal,
    pub resistance: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SwingPoints {
    pub highs: Vec<Decimal>,
    pub lows: Vec<Decimal>,
}

/// ATR over `period` bars using full OHLC true range.
pub fn average_true_range(candles: &[Candle], period: usize) -> AtrEstimate {
    let period = period.max(1);
    if candles.len() < period + 1 {
        return AtrEstimate::fallback(candles.last().map(|c| c.close));
    }

    let ranges: Vec<Decimal> = candles
        .windows(2)
        .map(|w| {
            let prev_close = w[0].close;
            let bar = &w[1];
            bar.high.max(prev_close) - bar.low.min(prev_close)
        })
        .collect();

    AtrEstimate {
        value: mean_of_last(&ranges, period),
        degraded: false,
    }
}

/// ATR when only closes are known: true range degrades to |close[i] - close[i-1]|.
pub fn average_true_range_from_closes(closes: &[Decimal], period: usize) -> AtrEstimate {
    let period = period.max(1);
    if closes.len() < period + 1 {
        return AtrEstimate::fallback(closes.last().copied());
    }

    let ranges: Vec<Decimal> = closes.windows(2).map(|w| (w[1] - w[0]).abs()).collect();

    AtrEstimate {
        value: mean_of_last(&ranges, period),
        degraded: false,
    }
}

fn mean_of_last(values: &[Decimal], n: usize) -> Decimal {
    let tail = &values[values.len().saturating_sub(n)..];
    if tail.is_empty() {
        return Decimal::ZERO;
    }
    tail.iter().copied().sum::<Decimal>() / Decimal::from(tail.len())
}

/// Lowest low / highest high over the trailing `lookback` bars.
pub fn support_resistance(candles: &[Candle], lookback: usize) -> Option<SupportResistance> {
    let window = &candles[candles.len().saturating_sub(lookback)..];
    let support = window.iter().map(|c| c.low).min()?;
    let resistance = window.iter().map(|c| c.high).max()?;
    Some(SupportResistance { support, resistance })
}

/// Bars whose high (low) is strictly above (below) `wing` neighbours on both sides.
pub fn swing_points(candles: &[Candle], wing: usize) -> SwingPoints {
    let mut points = SwingPoints::default();
    if wing == 0 || candles.len() < 2 * wing + 1 {
        return points;
    }

    for i in wing..candles.len() - wing {
        let neighbours = candles[i - wing..i].iter().chain(&candles[i + 1..=i + wing]);
        let (mut is_high, mut is_low) = (true, true);
        for n in neighbours {
            if n.high >= candles[i].high {
                is_high = false;
            }
            if n.low <= candles[i].low {
                is_low = false;
            }
        }
        if is_high {
            points.highs.push(candles[i].high);
        }
        if is_low {
            points.lows.push(candles[i].low);
        }
    }

    points
}

/// Percent change between the close `periods` bars ago and the last close.
pub fn price_change_pct(closes: &[Decimal], periods: usize) -> Option<Decimal> {
    if periods == 0 || closes.len() <= periods {
        return None;
    }
    let last = *closes.last()?;
    let base = closes[closes.len() - 1 - periods];
    if base.is_zero() {
        return None;
    }
    Some((last - base) * Decimal::ONE_HUNDRED / base)
}

/// Realized volatility proxy: ATR as a fraction of price.
pub fn atr_ratio(atr: Decimal, price: Decimal) -> Decimal {
    if price.is_zero() {
        return Decimal::ZERO;
    }
    atr / price
}
