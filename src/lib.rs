pub mod api;
pub mod config;
pub mod db;
pub mod errors;
pub mod exchange;
pub mod execution;
pub mod metrics;
pub mod models;
pub mod risk;
pub mod services;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::PositionStore;
use crate::exchange::ExchangeConnector;
use crate::services::adjustment_monitor::SuggestionBook;
use crate::services::notifier::Notifier;
use crate::services::price_feed::PriceBook;
use crate::services::settings::SettingsHandle;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn PositionStore>,
    pub config: AppConfig,
    pub settings: SettingsHandle,
    pub notifier: Notifier,
    pub prices: Arc<PriceBook>,
    pub suggestions: Arc<SuggestionBook>,
    pub exchange: ExchangeConnector,
    pub metrics_handle: metrics_exporter_prometheus::PrometheusHandle,
}
