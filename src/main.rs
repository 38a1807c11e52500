use std::sync::Arc;

use perpdesk::api::create_router;
use perpdesk::config::AppConfig;
use perpdesk::db::{self, MemoryStore, PgStore, PositionStore};
use perpdesk::exchange::{self, ExchangeClient};
use perpdesk::metrics::init_metrics;
use perpdesk::services::adjustment_monitor::{self, SuggestionBook};
use perpdesk::services::notifier::{Notifier, TelegramSink};
use perpdesk::services::price_feed::{self, PriceBook};
use perpdesk::services::reconciliation;
use perpdesk::services::settings::SettingsHandle;
use perpdesk::AppState;

/// Capacity of the dashboard broadcast channel.
const WS_CHANNEL_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    let addr = format!("{}:{}", config.host, config.port);

    let metrics_handle = init_metrics()?;

    let store: Arc<dyn PositionStore> = match &config.database_url {
        Some(url) => {
            tracing::info!("Connecting to database...");
            let pool = db::init_pool(url).await?;
            tracing::info!("Database connected");
            Arc::new(PgStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, positions are kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    let settings = SettingsHandle::load(store.as_ref(), config.default_settings()).await;
    let current = settings.current();
    tracing::info!(
        live_trading_enabled = current.live_trading_enabled,
        credentials_configured = current.usable_credentials().is_some(),
        total_capital = %current.total_capital,
        "Settings loaded"
    );
    if current.live_trading_enabled && current.usable_credentials().is_none() {
        tracing::warn!("Live trading enabled without exchange credentials, orders will not be placed");
    }

    let http = ExchangeClient::http_client(config.exchange_timeout)?;
    let connect = exchange::client_connector(http.clone(), config.exchange_base_url.clone(), config.exchange_timeout);

    let telegram = match (&config.telegram_bot_token, &config.telegram_chat_id) {
        (Some(token), Some(chat)) => Some(TelegramSink::new(http.clone(), token.clone(), chat.clone())),
        _ => None,
    };
    if telegram.is_none() {
        tracing::info!("Telegram not configured, notifications go to dashboard clients only");
    }
    let notifier = Notifier::new(WS_CHANNEL_CAPACITY).with_telegram(telegram);

    let prices = Arc::new(PriceBook::new());
    let suggestions = Arc::new(SuggestionBook::new());

    // --- Background loops ---
    tokio::spawn(price_feed::run_price_feed(
        store.clone(),
        settings.clone(),
        connect.clone(),
        prices.clone(),
        notifier.clone(),
        config.price_refresh_interval,
    ));

    tokio::spawn(adjustment_monitor::run_adjustment_monitor(
        store.clone(),
        settings.clone(),
        connect.clone(),
        suggestions.clone(),
        prices.clone(),
        notifier.clone(),
        config.advisor_interval,
    ));

    tokio::spawn(reconciliation::run_reconciliation_loop(
        store.clone(),
        settings.subscribe(),
        connect.clone(),
        config.reconcile_interval,
        notifier.clone(),
    ));

    let state = AppState {
        store,
        config,
        settings,
        notifier,
        prices,
        suggestions,
        exchange: connect,
        metrics_handle,
    };
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {addr}");
    axum::serve(listener, router).await?;

    Ok(())
}

fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,perpdesk=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();
}
