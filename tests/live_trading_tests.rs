mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use perpdesk::api::ws_types::WsMessage;
use perpdesk::db::{MemoryStore, PositionStore};
use perpdesk::exchange::OrderType;
use perpdesk::execution::{OrderStep, StepStatus};
use perpdesk::models::{
    AdjustmentKind, AdjustmentOutcome, AdjustmentRule, AdjustmentSuggestion, Direction, LiveSettings,
    PositionSource, PriceSnapshot,
};
use perpdesk::services::notifier::{NotificationLevel, Notifier};
use perpdesk::services::positions::{self, NewPosition, PreviewRequest};
use perpdesk::services::reconciliation::{self, run_reconciliation_loop};
use perpdesk::services::settings::{SettingsHandle, SettingsUpdate};

use common::{connector, live_settings, remote_position, seed_position, test_config, test_state, MockExchange};

fn btc_long() -> NewPosition {
    NewPosition {
        symbol: "BTCUSDT".into(),
        direction: Direction::Long,
        entry_price: Decimal::from(100),
        leverage: 10,
        investment_amount: Decimal::from(200),
    }
}

#[tokio::test]
async fn take_profit_timeout_still_places_stop_and_keeps_record() {
    let mock = Arc::new(MockExchange::stalling(OrderType::TakeProfitMarket));
    let state = test_state(mock.clone(), live_settings(), test_config());

    let committed = positions::open_position(&state, btc_long()).await.unwrap();
    let id = committed.position.id;
    assert!(state.store.get_position(id).await.unwrap().is_some());

    let report = committed.sync.expect("live sync should start").await.unwrap();

    let tp_steps: Vec<_> = report
        .steps
        .iter()
        .filter(|s| matches!(s.step, OrderStep::TakeProfit(_)))
        .collect();
    assert_eq!(tp_steps.len(), 3);
    assert!(tp_steps.iter().all(|s| s.status == StepStatus::TimedOut));
    assert!(report.order_id(OrderStep::StopLoss).is_some());
    assert_eq!(mock.placed_types().last(), Some(&OrderType::StopMarket));

    let stored = state.store.get_position(id).await.unwrap().unwrap();
    assert!(stored.orders.entry.is_some());
    assert!(stored.orders.stop_loss.is_some());
    assert!(stored.orders.take_profits.iter().all(Option::is_none));
}

#[tokio::test]
async fn missing_credentials_warns_once_and_skips_exchange() {
    let mock = Arc::new(MockExchange::new());
    let settings = LiveSettings {
        live_trading_enabled: true,
        credentials: None,
        ..LiveSettings::default()
    };
    let state = test_state(mock.clone(), settings, test_config());
    let mut rx = state.notifier.subscribe();

    let committed = positions::open_position(&state, btc_long()).await.unwrap();
    assert!(committed.sync.is_none());
    assert!(mock.placed.lock().unwrap().is_empty());
    assert_eq!(state.store.list_positions().await.unwrap().len(), 1);

    let mut warnings = 0;
    while let Ok(msg) = rx.try_recv() {
        if let WsMessage::Notification(n) = msg {
            if n.level == NotificationLevel::Warning {
                warnings += 1;
            }
        }
    }
    assert_eq!(warnings, 1);
}

#[tokio::test]
async fn invalid_input_is_rejected_before_market_data_is_fetched() {
    let mock = Arc::new(MockExchange::new());
    let state = test_state(mock.clone(), LiveSettings::default(), test_config());

    let mut negative_entry = btc_long();
    negative_entry.entry_price = Decimal::from(-5);
    assert!(positions::open_position(&state, negative_entry).await.is_err());

    let mut no_leverage = btc_long();
    no_leverage.leverage = 0;
    let preview = PreviewRequest {
        position: no_leverage,
        risk_pct: None,
    };
    assert!(positions::preview_position(&state, &preview).await.is_err());

    let mut blank = btc_long();
    blank.symbol = " ".into();
    assert!(positions::open_position(&state, blank).await.is_err());

    assert_eq!(mock.kline_calls.load(Ordering::SeqCst), 0);
    assert!(state.store.list_positions().await.unwrap().is_empty());

    positions::open_position(&state, btc_long()).await.unwrap();
    assert_eq!(mock.kline_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn paper_mode_never_touches_exchange() {
    let mock = Arc::new(MockExchange::new());
    let state = test_state(mock.clone(), LiveSettings::default(), test_config());

    let committed = positions::open_position(&state, btc_long()).await.unwrap();
    assert!(committed.sync.is_none());
    assert!(mock.placed.lock().unwrap().is_empty());
}

#[tokio::test]
async fn reconciliation_follows_exchange() {
    let store = MemoryStore::new();
    store.save_position(&seed_position("AAAUSDT")).await.unwrap();
    store.save_position(&seed_position("BBBUSDT")).await.unwrap();

    let mock = MockExchange::with_remote(vec![
        remote_position("BBBUSDT", 10, 100, 10),
        remote_position("CCCUSDT", -5, 40, 5),
    ]);
    let notifier = Notifier::new(16);

    let report = reconciliation::reconcile_once(&store, &mock, &notifier).await.unwrap();
    assert_eq!(report.imported, vec!["CCCUSDT".to_string()]);
    assert_eq!(report.removed, vec!["AAAUSDT".to_string()]);
    assert_eq!(report.matched, 1);

    let mut symbols: Vec<String> = store
        .list_positions()
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.symbol)
        .collect();
    symbols.sort();
    assert_eq!(symbols, vec!["BBBUSDT", "CCCUSDT"]);

    let imported = store
        .list_positions()
        .await
        .unwrap()
        .into_iter()
        .find(|p| p.symbol == "CCCUSDT")
        .unwrap();
    assert_eq!(imported.source, PositionSource::Imported);
    assert_eq!(imported.direction, Direction::Short);
    assert!(imported.needs_review);

    // Second pass is a no-op.
    let again = reconciliation::reconcile_once(&store, &mock, &notifier).await.unwrap();
    assert!(again.is_noop());
}

async fn wait_for_calls(mock: &MockExchange, expected: usize) {
    for _ in 0..100 {
        if mock.position_calls.load(Ordering::SeqCst) >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "expected {expected} reconciliation calls, saw {}",
        mock.position_calls.load(Ordering::SeqCst)
    );
}

#[tokio::test]
async fn reconciliation_loop_waits_then_reschedules_on_change() {
    let store: Arc<dyn PositionStore> = Arc::new(MemoryStore::new());
    let mock = Arc::new(MockExchange::new());
    let settings = SettingsHandle::new(LiveSettings::default());

    let task = tokio::spawn(run_reconciliation_loop(
        store.clone(),
        settings.subscribe(),
        connector(mock.clone()),
        Duration::from_secs(3_600),
        Notifier::new(16),
    ));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(mock.position_calls.load(Ordering::SeqCst), 0);

    settings
        .update(
            store.as_ref(),
            SettingsUpdate {
                live_trading_enabled: Some(true),
                api_key: Some("k".into()),
                api_secret: Some("s".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    wait_for_calls(&mock, 1).await;

    // Any change resets the schedule and runs immediately.
    settings
        .update(
            store.as_ref(),
            SettingsUpdate {
                total_capital: Some(Decimal::from(2_000)),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    wait_for_calls(&mock, 2).await;

    drop(settings);
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("loop should stop when settings are dropped")
        .unwrap();
}

#[tokio::test]
async fn startup_reconciliation_runs_when_credentials_exist() {
    let store: Arc<dyn PositionStore> = Arc::new(MemoryStore::new());
    let mock = Arc::new(MockExchange::with_remote(vec![remote_position("BBBUSDT", 10, 100, 10)]));
    let settings = SettingsHandle::new(LiveSettings {
        live_trading_enabled: false,
        ..live_settings()
    });

    let task = tokio::spawn(run_reconciliation_loop(
        store.clone(),
        settings.subscribe(),
        connector(mock.clone()),
        Duration::from_secs(3_600),
        Notifier::new(16),
    ));

    wait_for_calls(&mock, 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    // One pass only: the periodic schedule waits for live trading.
    assert_eq!(mock.position_calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.list_positions().await.unwrap().len(), 1);

    drop(settings);
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("loop should stop when settings are dropped")
        .unwrap();
}

fn stop_suggestion(position_id: Uuid, from: i64, to: Decimal) -> AdjustmentSuggestion {
    AdjustmentSuggestion {
        id: Uuid::new_v4(),
        position_id,
        symbol: "BTCUSDT".into(),
        kind: AdjustmentKind::StopLoss,
        rule: AdjustmentRule::MomentumTrailing,
        current_level: Decimal::from(from),
        proposed_level: to,
        rationale: "trend extended".into(),
        confidence: 80,
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn accepted_stop_adjustment_replaces_exchange_stop() {
    let mock = Arc::new(MockExchange::new());
    let state = test_state(mock.clone(), live_settings(), test_config());

    let mut position = seed_position("BTCUSDT");
    position.orders.stop_loss = Some("sl-1".into());
    state.store.save_position(&position).await.unwrap();

    let suggestion = stop_suggestion(position.id, 99, Decimal::new(995, 1));
    let empty = Default::default();
    state.suggestions.replace(vec![suggestion.clone()], &empty, &Default::default()).await;

    let committed = positions::accept_suggestion(&state, suggestion.id).await.unwrap();
    assert_eq!(committed.position.stop_loss.price, Decimal::new(995, 1));
    assert!(state.suggestions.list().await.is_empty());

    let history = state.store.list_adjustments(10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].outcome, AdjustmentOutcome::Accepted);

    let report = committed.sync.expect("live adjustment should run").await.unwrap();
    assert!(report.all_placed());
    assert_eq!(*mock.cancelled.lock().unwrap(), vec!["sl-1".to_string()]);

    let placed = mock.placed.lock().unwrap().clone();
    assert_eq!(placed.len(), 1);
    assert_eq!(placed[0].order_type, OrderType::StopMarket);
    assert_eq!(placed[0].stop_price, Some(Decimal::new(995, 1)));

    let stored = state.store.get_position(position.id).await.unwrap().unwrap();
    assert_eq!(stored.stop_loss.price, Decimal::new(995, 1));
    assert_eq!(stored.orders.stop_loss.as_deref(), report.order_id(OrderStep::StopLoss));
}

#[tokio::test]
async fn stop_beyond_live_price_is_refused() {
    let mock = Arc::new(MockExchange::new());
    let state = test_state(mock.clone(), live_settings(), test_config());
    let position = seed_position("BTCUSDT");
    state.store.save_position(&position).await.unwrap();

    // Price fell to 98.5 after the trail was proposed; a stop at 99.5 would fill instantly.
    state
        .prices
        .update(PriceSnapshot {
            symbol: "BTCUSDT".into(),
            price: Decimal::new(985, 1),
            timestamp: Utc::now(),
        })
        .await;
    let suggestion = stop_suggestion(position.id, 99, Decimal::new(995, 1));
    state.suggestions.replace(vec![suggestion.clone()], &Default::default(), &Default::default()).await;

    assert!(positions::accept_suggestion(&state, suggestion.id).await.is_err());
    assert!(state.suggestions.get(suggestion.id).await.is_some());
    assert!(state.store.list_adjustments(10).await.unwrap().is_empty());
    assert!(mock.placed.lock().unwrap().is_empty());

    let stored = state.store.get_position(position.id).await.unwrap().unwrap();
    assert_eq!(stored.stop_loss.price, Decimal::from(99));
}

#[tokio::test]
async fn dismissal_is_recorded_once() {
    let state = test_state(Arc::new(MockExchange::new()), LiveSettings::default(), test_config());
    let position = seed_position("BTCUSDT");
    state.store.save_position(&position).await.unwrap();

    let suggestion = stop_suggestion(position.id, 99, Decimal::from(98));
    let empty = Default::default();
    state.suggestions.replace(vec![suggestion.clone()], &empty, &Default::default()).await;

    positions::dismiss_suggestion(&state, suggestion.id).await.unwrap();
    assert!(positions::dismiss_suggestion(&state, suggestion.id).await.is_err());

    let history = state.store.list_adjustments(10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].outcome, AdjustmentOutcome::Dismissed);

    // Position levels are unchanged by a dismissal.
    let stored = state.store.get_position(position.id).await.unwrap().unwrap();
    assert_eq!(stored.stop_loss.price, Decimal::from(99));
}
