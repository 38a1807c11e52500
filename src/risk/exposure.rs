//! Portfolio-level exposure: totals, asset concentration, long/short skew and
//! correlation clusters. Pure over a snapshot of positions and live prices.

use std::collections::{BTreeMap, HashMap};

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use uuid::Uuid;

use crate::models::{Direction, Position};

use super::liquidation::{self, LeverageBracket, LiquidationEstimate};

/// Notional exposure above this multiple of deployed capital is over-leveraged.
const OVER_LEVERAGE_MULTIPLE: Decimal = dec!(5);
/// Long/short capital gap above this share of deployed capital is imbalanced.
const IMBALANCE_FRACTION: Decimal = dec!(0.7);

const QUOTE_ASSETS: &[&str] = &["USDT", "USDC", "BUSD", "FDUSD", "USD"];

/// Historically correlated instrument clusters, matched by base asset.
const CORRELATION_GROUPS: &[(&str, &[&str])] = &[
    ("Major caps", &["BTC", "ETH"]),
    ("Layer 1", &["SOL", "AVAX", "ADA", "DOT", "NEAR", "ATOM", "SUI", "APT"]),
    ("Layer 2", &["ARB", "OP", "MATIC", "POL", "STRK"]),
    ("DeFi", &["UNI", "AAVE", "LINK", "MKR", "CRV", "LDO", "SNX"]),
    ("Meme", &["DOGE", "SHIB", "1000SHIB", "PEPE", "1000PEPE", "FLOKI", "WIF", "BONK", "1000BONK"]),
    ("Exchange tokens", &["BNB", "OKB", "CRO"]),
    ("Stablecoins", &["USDC", "BUSD", "TUSD", "FDUSD", "DAI"]),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrelationLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationRisk {
    pub group: String,
    pub symbols: Vec<String>,
    pub position_count: usize,
    pub combined_exposure: Decimal,
    /// Set when every position in the cluster points the same way.
    pub direction: Option<Direction>,
    pub level: CorrelationLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssetConcentration {
    pub asset: String,
    pub capital: Decimal,
    pub exposure: Decimal,
    pub pct_of_capital: Decimal,
    pub position_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExposureWarnings {
    pub over_leveraged: bool,
    pub high_correlation: bool,
    pub imbalanced: bool,
}

/// Live view of one position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionRisk {
    pub position_id: Uuid,
    pub symbol: String,
    pub live_price: Option<Decimal>,
    pub unrealized_pnl: Decimal,
    pub roe_pct: Decimal,
    pub liquidation: LiquidationEstimate,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PortfolioExposure {
    pub total_capital: Decimal,
    pub total_exposure: Decimal,
    pub average_leverage: Decimal,
    pub potential_profit: Decimal,
    pub potential_loss: Decimal,
    pub unrealized_pnl: Decimal,
    pub assets: Vec<AssetConcentration>,
    pub long_capital: Decimal,
    pub short_capital: Decimal,
    pub long_pct: Decimal,
    pub short_pct: Decimal,
    pub correlation_risks: Vec<CorrelationRisk>,
    pub warnings: ExposureWarnings,
    pub positions: Vec<PositionRisk>,
}

/// Base asset of an exchange symbol: `BTCUSDT` -> `BTC`.
pub fn base_asset(symbol: &str) -> &str {
    let upper = symbol.trim();
    for quote in QUOTE_ASSETS {
        if let Some(base) = upper.strip_suffix(quote) {
            if !base.is_empty() {
                return base;
            }
        }
    }
    upper
}

fn pct(part: Decimal, whole: Decimal) -> Decimal {
    if whole.is_zero() {
        return Decimal::ZERO;
    }
    part * Decimal::ONE_HUNDRED / whole
}

/// Live-risk view of every position; missing prices fall back to entry.
pub fn position_risks(
    positions: &[Position],
    prices: &HashMap<String, Decimal>,
    brackets: &HashMap<String, Vec<LeverageBracket>>,
) -> Vec<PositionRisk> {
    positions
        .iter()
        .map(|p| {
            let live = prices.get(&p.symbol).copied();
            let price = live.unwrap_or(p.entry_price);
            let schedule = brackets.get(&p.symbol).map(Vec::as_slice).unwrap_or(&[]);
            PositionRisk {
                position_id: p.id,
                symbol: p.symbol.clone(),
                live_price: live,
                unrealized_pnl: p.unrealized_pnl(price),
                roe_pct: p.roe_pct(price),
                liquidation: liquidation::estimate(p, price, schedule),
            }
        })
        .collect()
}

pub fn correlation_risks(positions: &[Position]) -> Vec<CorrelationRisk> {
    let mut risks = Vec::new();

    for (group, members) in CORRELATION_GROUPS {
        let matching: Vec<&Position> = positions
            .iter()
            .filter(|p| members.contains(&base_asset(&p.symbol)))
            .collect();
        if matching.len() < 2 {
            continue;
        }

        let first = matching[0].direction;
        let same_direction = matching.iter().all(|p| p.direction == first);
        let level = match (same_direction, matching.len()) {
            (true, n) if n >= 3 => CorrelationLevel::High,
            (true, _) => CorrelationLevel::Medium,
            (false, _) => CorrelationLevel::Low,
        };

        let mut symbols: Vec<String> = matching.iter().map(|p| p.symbol.clone()).collect();
        symbols.sort();
        symbols.dedup();

        risks.push(CorrelationRisk {
            group: (*group).to_string(),
            symbols,
            position_count: matching.len(),
            combined_exposure: matching.iter().map(|p| p.total_exposure).sum(),
            direction: same_direction.then_some(first),
            level,
        });
    }

    risks.sort_by(|a, b| b.level.cmp(&a.level).then(b.combined_exposure.cmp(&a.combined_exposure)));
    risks
}

/// Folds a position set into portfolio totals, concentration and warning flags.
pub fn aggregate(
    positions: &[Position],
    prices: &HashMap<String, Decimal>,
    brackets: &HashMap<String, Vec<LeverageBracket>>,
) -> PortfolioExposure {
    if positions.is_empty() {
        return PortfolioExposure::default();
    }

    let total_capital: Decimal = positions.iter().map(|p| p.investment_amount).sum();
    let total_exposure: Decimal = positions.iter().map(|p| p.total_exposure).sum();
    let weighted_leverage: Decimal = positions
        .iter()
        .map(|p| p.investment_amount * p.leverage_dec())
        .sum();

    let long_capital: Decimal = positions
        .iter()
        .filter(|p| p.direction == Direction::Long)
        .map(|p| p.investment_amount)
        .sum();
    let short_capital = total_capital - long_capital;

    let mut by_asset: BTreeMap<String, AssetConcentration> = BTreeMap::new();
    for p in positions {
        let asset = base_asset(&p.symbol).to_string();
        let entry = by_asset.entry(asset.clone()).or_insert_with(|| AssetConcentration {
            asset,
            capital: Decimal::ZERO,
            exposure: Decimal::ZERO,
            pct_of_capital: Decimal::ZERO,
            position_count: 0,
        });
        entry.capital += p.investment_amount;
        entry.exposure += p.total_exposure;
        entry.position_count += 1;
    }
    let mut assets: Vec<AssetConcentration> = by_asset
        .into_values()
        .map(|mut a| {
            a.pct_of_capital = pct(a.capital, total_capital);
            a
        })
        .collect();
    assets.sort_by(|a, b| b.capital.cmp(&a.capital).then_with(|| a.asset.cmp(&b.asset)));

    let risks = position_risks(positions, prices, brackets);
    let correlation = correlation_risks(positions);

    let warnings = ExposureWarnings {
        over_leveraged: total_exposure > total_capital * OVER_LEVERAGE_MULTIPLE,
        high_correlation: correlation.iter().any(|c| c.level == CorrelationLevel::High),
        imbalanced: (long_capital - short_capital).abs() > total_capital * IMBALANCE_FRACTION,
    };

    PortfolioExposure {
        total_capital,
        total_exposure,
        average_leverage: if total_capital.is_zero() {
            Decimal::ZERO
        } else {
            weighted_leverage / total_capital
        },
        potential_profit: positions.iter().map(Position::potential_profit).sum(),
        potential_loss: positions.iter().map(Position::potential_loss).sum(),
        unrealized_pnl: risks.iter().map(|r| r.unrealized_pnl).sum(),
        assets,
        long_capital,
        short_capital,
        long_pct: pct(long_capital, total_capital),
        short_pct: pct(short_capital, total_capital),
        correlation_risks: correlation,
        warnings,
        positions: risks,
    }
}
