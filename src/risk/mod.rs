pub mod advisor;
pub mod exposure;
pub mod levels;
pub mod liquidation;
pub mod scenario;
pub mod volatility;

pub use exposure::{aggregate, PortfolioExposure};
pub use levels::{calculate_levels, CapitalRiskBand, LevelError, LevelInputs, RiskLevels};
pub use liquidation::{LeverageBracket, LiquidationEstimate, RiskBand};
pub use scenario::{simulate, ScenarioError, ScenarioReport, PRESET_SHOCKS};
