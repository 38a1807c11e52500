//! Mirrors a position's exits onto the exchange.
//!
//! Steps run strictly in order (entry, take-profits, stop) and each one is
//! bounded by its own timeout. A failed step is recorded and the sequence
//! continues; nothing already accepted by the exchange is rolled back.

use std::fmt;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::exchange::{GatewayError, OrderGateway, OrderRequest, SymbolRules};
use crate::models::{AdjustmentKind, AdjustmentSuggestion, LinkedOrders, Position};

pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "level", rename_all = "snake_case")]
pub enum OrderStep {
    Entry,
    /// 1-based take-profit level.
    TakeProfit(u8),
    StopLoss,
    CancelStop,
}

impl fmt::Display for OrderStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderStep::Entry => f.write_str("entry"),
            OrderStep::TakeProfit(level) => write!(f, "TP{level}"),
            OrderStep::StopLoss => f.write_str("SL"),
            OrderStep::CancelStop => f.write_str("SL cancel"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepStatus {
    Placed { order_id: String },
    Rejected { message: String },
    TimedOut,
    Failed { message: String },
    Skipped { reason: String },
}

impl StepStatus {
    fn label(&self) -> &'static str {
        match self {
            StepStatus::Placed { .. } => "placed",
            StepStatus::Rejected { .. } => "rejected",
            StepStatus::TimedOut => "timed_out",
            StepStatus::Failed { .. } => "failed",
            StepStatus::Skipped { .. } => "skipped",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StepStatus::Placed { .. })
    }
}

impl From<GatewayError> for StepStatus {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::Rejected { message, .. } => StepStatus::Rejected { message },
            GatewayError::Timeout(_) => StepStatus::TimedOut,
            other => StepStatus::Failed {
                message: other.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepOutcome {
    pub step: OrderStep,
    pub status: StepStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlacementReport {
    pub position_id: Uuid,
    pub symbol: String,
    pub steps: Vec<StepOutcome>,
}

impl PlacementReport {
    fn new(position: &Position) -> Self {
        Self {
            position_id: position.id,
            symbol: position.symbol.clone(),
            steps: Vec::new(),
        }
    }

    pub fn order_id(&self, step: OrderStep) -> Option<&str> {
        self.steps.iter().find(|s| s.step == step).and_then(|s| match &s.status {
            StepStatus::Placed { order_id } => Some(order_id.as_str()),
            _ => None,
        })
    }

    pub fn all_placed(&self) -> bool {
        self.steps.iter().all(|s| s.status.is_success())
    }

    pub fn failures(&self) -> impl Iterator<Item = &StepOutcome> {
        self.steps.iter().filter(|s| !s.status.is_success())
    }

    /// Order ids for a freshly placed position, indexed like its take-profits.
    pub fn linked_orders(&self, take_profit_count: usize) -> LinkedOrders {
        LinkedOrders {
            entry: self.order_id(OrderStep::Entry).map(String::from),
            stop_loss: self.order_id(OrderStep::StopLoss).map(String::from),
            take_profits: (0..take_profit_count)
                .map(|i| self.order_id(OrderStep::TakeProfit((i + 1) as u8)).map(String::from))
                .collect(),
        }
    }
}

/// Splits `total` across take-profit allocations; the last level takes the remainder.
fn split_quantities(total: Decimal, allocations: &[Decimal], rules: &SymbolRules) -> Vec<Decimal> {
    let mut remaining = total;
    allocations
        .iter()
        .enumerate()
        .map(|(i, alloc)| {
            let qty = if i + 1 == allocations.len() {
                remaining
            } else {
                rules.round_qty(total * *alloc / Decimal::ONE_HUNDRED).min(remaining)
            };
            remaining -= qty;
            qty
        })
        .collect()
}

pub struct LiveOrderOrchestrator<'a, G: OrderGateway + ?Sized> {
    gateway: &'a G,
    step_timeout: Duration,
}

impl<'a, G: OrderGateway + ?Sized> LiveOrderOrchestrator<'a, G> {
    pub fn new(gateway: &'a G, step_timeout: Duration) -> Self {
        Self { gateway, step_timeout }
    }

    async fn symbol_rules(&self, symbol: &str) -> SymbolRules {
        match tokio::time::timeout(self.step_timeout, self.gateway.symbol_rules(symbol)).await {
            Ok(Ok(rules)) => rules,
            Ok(Err(e)) => {
                tracing::warn!(symbol, error = %e, "Symbol rules unavailable, using defaults");
                SymbolRules::fallback(symbol)
            }
            Err(_) => {
                tracing::warn!(symbol, "Symbol rules lookup timed out, using defaults");
                SymbolRules::fallback(symbol)
            }
        }
    }

    async fn attempt(&self, step: OrderStep, order: OrderRequest) -> StepOutcome {
        let status = match tokio::time::timeout(self.step_timeout, self.gateway.place_order(&order)).await {
            Ok(Ok(ack)) => StepStatus::Placed { order_id: ack.order_id },
            Ok(Err(e)) => StepStatus::from(e),
            Err(_) => StepStatus::TimedOut,
        };
        record(&order.symbol, step, status)
    }

    /// Entry, then every take-profit, then the stop. Always attempts every step once.
    pub async fn place_position_orders(&self, position: &Position) -> PlacementReport {
        let mut report = PlacementReport::new(position);
        let symbol = position.symbol.as_str();
        let rules = self.symbol_rules(symbol).await;
        let total = rules.round_qty(position.contracts());

        if total <= Decimal::ZERO || total < rules.min_qty {
            let reason = format!("quantity {} below lot size {}", total, rules.min_qty);
            report.steps.push(record(symbol, OrderStep::Entry, StepStatus::Skipped { reason: reason.clone() }));
            for tp in &position.take_profits {
                report.steps.push(record(
                    symbol,
                    OrderStep::TakeProfit(tp.level),
                    StepStatus::Skipped { reason: reason.clone() },
                ));
            }
            report.steps.push(record(symbol, OrderStep::StopLoss, StepStatus::Skipped { reason }));
            return report;
        }

        let entry_side = position.direction.entry_side();
        let exit_side = position.direction.exit_side();

        report.steps.push(
            self.attempt(OrderStep::Entry, OrderRequest::market(symbol, entry_side, total))
                .await,
        );

        let allocations: Vec<Decimal> = position.take_profits.iter().map(|tp| tp.allocation_pct).collect();
        let quantities = split_quantities(total, &allocations, &rules);
        for (tp, qty) in position.take_profits.iter().zip(quantities) {
            let step = OrderStep::TakeProfit(tp.level);
            if qty <= Decimal::ZERO {
                report.steps.push(record(
                    symbol,
                    step,
                    StepStatus::Skipped {
                        reason: "allocation rounds to zero".into(),
                    },
                ));
                continue;
            }
            let order = OrderRequest::take_profit(symbol, exit_side, qty, rules.round_price(tp.price));
            report.steps.push(self.attempt(step, order).await);
        }

        let stop = OrderRequest::stop_loss(symbol, exit_side, total, rules.round_price(position.stop_loss.price));
        report.steps.push(self.attempt(OrderStep::StopLoss, stop).await);

        report
    }

    /// Applies an accepted suggestion: a fresh take-profit, or cancel-then-replace for the stop.
    pub async fn apply_adjustment(&self, position: &Position, suggestion: &AdjustmentSuggestion) -> PlacementReport {
        let mut report = PlacementReport::new(position);
        let symbol = position.symbol.as_str();
        let rules = self.symbol_rules(symbol).await;
        let total = rules.round_qty(position.contracts());
        let exit_side = position.direction.exit_side();
        let trigger = rules.round_price(suggestion.proposed_level);

        match suggestion.kind {
            AdjustmentKind::TakeProfit => {
                let index = take_profit_index(position, suggestion.current_level);
                let Some(tp) = position.take_profits.get(index) else {
                    report.steps.push(record(
                        symbol,
                        OrderStep::TakeProfit(1),
                        StepStatus::Skipped {
                            reason: "position has no take-profit levels".into(),
                        },
                    ));
                    return report;
                };
                let allocations: Vec<Decimal> =
                    position.take_profits.iter().map(|tp| tp.allocation_pct).collect();
                let qty = split_quantities(total, &allocations, &rules)
                    .get(index)
                    .copied()
                    .unwrap_or(total);
                let order = OrderRequest::take_profit(symbol, exit_side, qty, trigger);
                report.steps.push(self.attempt(OrderStep::TakeProfit(tp.level), order).await);
            }
            AdjustmentKind::StopLoss => {
                let cancel = self.cancel_existing_stop(position).await;
                let cancelled = cancel.status.is_success();
                report.steps.push(cancel);

                if cancelled {
                    let order = OrderRequest::stop_loss(symbol, exit_side, total, trigger);
                    report.steps.push(self.attempt(OrderStep::StopLoss, order).await);
                } else {
                    report.steps.push(record(
                        symbol,
                        OrderStep::StopLoss,
                        StepStatus::Skipped {
                            reason: "existing stop could not be cancelled".into(),
                        },
                    ));
                }
            }
        }

        report
    }

    /// Cancels the stored stop order, or every open STOP_MARKET order for the symbol
    /// when no id is stored. Reports the cancelled ids comma-separated.
    async fn cancel_existing_stop(&self, position: &Position) -> StepOutcome {
        let symbol = position.symbol.as_str();

        let order_ids: Vec<String> = match &position.orders.stop_loss {
            Some(id) => vec![id.clone()],
            None => match tokio::time::timeout(self.step_timeout, self.gateway.open_orders(symbol)).await {
                Ok(Ok(orders)) => orders
                    .into_iter()
                    .filter(|o| o.is_stop_market())
                    .map(|o| o.order_id)
                    .collect(),
                Ok(Err(e)) => return record(symbol, OrderStep::CancelStop, StepStatus::from(e)),
                Err(_) => return record(symbol, OrderStep::CancelStop, StepStatus::TimedOut),
            },
        };

        for id in &order_ids {
            let status = match tokio::time::timeout(self.step_timeout, self.gateway.cancel_order(symbol, id)).await {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => StepStatus::from(e),
                Err(_) => StepStatus::TimedOut,
            };
            return record(symbol, OrderStep::CancelStop, status);
        }

        record(
            symbol,
            OrderStep::CancelStop,
            StepStatus::Placed {
                order_id: order_ids.join(","),
            },
        )
    }
}

fn take_profit_index(position: &Position, current_level: Decimal) -> usize {
    position
        .take_profits
        .iter()
        .position(|tp| tp.price == current_level)
        .unwrap_or(0)
}

fn record(symbol: &str, step: OrderStep, status: StepStatus) -> StepOutcome {
    match &status {
        StepStatus::Placed { order_id } => {
            tracing::info!(symbol, step = %step, order_id = %order_id, "Order step succeeded");
        }
        StepStatus::Skipped { reason } => {
            tracing::info!(symbol, step = %step, reason = %reason, "Order step skipped");
        }
        other => {
            tracing::warn!(symbol, step = %step, status = ?other, "Order step failed");
        }
    }
    metrics::counter!("order_steps_total", "status" => status.label()).increment(1);
    StepOutcome { step, status }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{ExchangePosition, OpenOrder, OrderAck, OrderType};
    use crate::models::position::fixtures::position;
    use crate::models::{AdjustmentRule, Direction};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;

    #[derive(Default)]
    struct ScriptedGateway {
        placed: Mutex<Vec<OrderRequest>>,
        cancelled: Mutex<Vec<String>>,
        hang_on: Option<OrderType>,
        reject_on: Option<OrderType>,
        fail_cancel: bool,
        open: Vec<OpenOrder>,
    }

    #[async_trait]
    impl OrderGateway for ScriptedGateway {
        async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck, GatewayError> {
            self.placed.lock().unwrap().push(order.clone());
            if self.hang_on == Some(order.order_type) {
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
            if self.reject_on == Some(order.order_type) {
                return Err(GatewayError::Rejected {
                    status: 400,
                    code: Some(-2021),
                    message: "Order would immediately trigger.".into(),
                });
            }
            let n = self.placed.lock().unwrap().len();
            Ok(OrderAck {
                order_id: format!("o{n}"),
                symbol: order.symbol.clone(),
                status: "NEW".into(),
            })
        }

        async fn cancel_order(&self, _symbol: &str, order_id: &str) -> Result<(), GatewayError> {
            if self.fail_cancel {
                return Err(GatewayError::Rejected {
                    status: 400,
                    code: Some(-2011),
                    message: "Unknown order sent.".into(),
                });
            }
            self.cancelled.lock().unwrap().push(order_id.to_string());
            Ok(())
        }

        async fn open_orders(&self, _symbol: &str) -> Result<Vec<OpenOrder>, GatewayError> {
            Ok(self.open.clone())
        }

        async fn open_positions(&self) -> Result<Vec<ExchangePosition>, GatewayError> {
            Ok(Vec::new())
        }

        async fn symbol_rules(&self, symbol: &str) -> Result<SymbolRules, GatewayError> {
            Ok(SymbolRules::fallback(symbol))
        }
    }

    fn btc() -> Position {
        let mut p = position(
            "BTCUSDT",
            Direction::Long,
            Decimal::from(100),
            10,
            Decimal::from(100),
            Decimal::from(98),
            &[Decimal::from(103), Decimal::from(106), Decimal::from(110)],
        );
        for (tp, alloc) in p.take_profits.iter_mut().zip([40, 30, 30]) {
            tp.allocation_pct = Decimal::from(alloc);
        }
        p
    }

    fn types(gateway: &ScriptedGateway) -> Vec<OrderType> {
        gateway.placed.lock().unwrap().iter().map(|o| o.order_type).collect()
    }

    #[tokio::test]
    async fn places_entry_then_take_profits_then_stop() {
        let gateway = ScriptedGateway::default();
        let report = LiveOrderOrchestrator::new(&gateway, Duration::from_millis(200))
            .place_position_orders(&btc())
            .await;

        assert!(report.all_placed());
        assert_eq!(
            types(&gateway),
            vec![
                OrderType::Market,
                OrderType::TakeProfitMarket,
                OrderType::TakeProfitMarket,
                OrderType::TakeProfitMarket,
                OrderType::StopMarket,
            ]
        );

        let placed = gateway.placed.lock().unwrap();
        // 1000 notional at 100 -> 10 contracts, split 40/30/30
        assert_eq!(placed[0].quantity, Decimal::from(10));
        assert_eq!(placed[1].quantity, Decimal::from(4));
        assert_eq!(placed[2].quantity, Decimal::from(3));
        assert_eq!(placed[3].quantity, Decimal::from(3));
        assert!(placed[1..].iter().all(|o| o.reduce_only));
        assert_eq!(placed[4].stop_price, Some(Decimal::from(98)));

        let linked = report.linked_orders(3);
        assert_eq!(linked.entry.as_deref(), Some("o1"));
        assert_eq!(linked.take_profits.len(), 3);
        assert_eq!(linked.stop_loss.as_deref(), Some("o5"));
    }

    #[tokio::test]
    async fn take_profit_timeout_still_attempts_stop() {
        let gateway = ScriptedGateway {
            hang_on: Some(OrderType::TakeProfitMarket),
            ..Default::default()
        };
        let report = LiveOrderOrchestrator::new(&gateway, Duration::from_millis(50))
            .place_position_orders(&btc())
            .await;

        let statuses: Vec<_> = report.steps.iter().map(|s| (s.step, s.status.clone())).collect();
        assert_eq!(statuses[1], (OrderStep::TakeProfit(1), StepStatus::TimedOut));
        assert_eq!(statuses[3], (OrderStep::TakeProfit(3), StepStatus::TimedOut));
        assert_eq!(statuses[4].0, OrderStep::StopLoss);
        assert!(statuses[4].1.is_success());
        assert_eq!(types(&gateway).last(), Some(&OrderType::StopMarket));
        assert_eq!(report.failures().count(), 3);
    }

    #[tokio::test]
    async fn rejection_carries_message_and_continues() {
        let gateway = ScriptedGateway {
            reject_on: Some(OrderType::Market),
            ..Default::default()
        };
        let report = LiveOrderOrchestrator::new(&gateway, Duration::from_millis(200))
            .place_position_orders(&btc())
            .await;

        assert_eq!(
            report.steps[0].status,
            StepStatus::Rejected {
                message: "Order would immediately trigger.".into()
            }
        );
        assert_eq!(report.steps.len(), 5);
        assert!(report.steps[1..].iter().all(|s| s.status.is_success()));
    }

    #[tokio::test]
    async fn dust_position_skips_every_step() {
        let mut p = btc();
        p.total_exposure = Decimal::new(5, 2);
        let gateway = ScriptedGateway::default();
        let report = LiveOrderOrchestrator::new(&gateway, Duration::from_millis(200))
            .place_position_orders(&p)
            .await;
        assert!(report
            .steps
            .iter()
            .all(|s| matches!(s.status, StepStatus::Skipped { .. })));
        assert!(gateway.placed.lock().unwrap().is_empty());
    }

    fn stop_suggestion(p: &Position) -> AdjustmentSuggestion {
        AdjustmentSuggestion {
            id: Uuid::new_v4(),
            position_id: p.id,
            symbol: p.symbol.clone(),
            kind: AdjustmentKind::StopLoss,
            rule: AdjustmentRule::MomentumTrailing,
            current_level: p.stop_loss.price,
            proposed_level: Decimal::from(101),
            rationale: String::new(),
            confidence: 70,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn stop_adjustment_cancels_stored_stop_first() {
        let mut p = btc();
        p.orders.stop_loss = Some("sl-1".into());
        let gateway = ScriptedGateway::default();
        let report = LiveOrderOrchestrator::new(&gateway, Duration::from_millis(200))
            .apply_adjustment(&p, &stop_suggestion(&p))
            .await;

        assert_eq!(*gateway.cancelled.lock().unwrap(), vec!["sl-1".to_string()]);
        assert_eq!(report.steps[0].step, OrderStep::CancelStop);
        assert_eq!(report.order_id(OrderStep::StopLoss), Some("o1"));
        assert_eq!(gateway.placed.lock().unwrap()[0].stop_price, Some(Decimal::from(101)));
    }

    #[tokio::test]
    async fn stop_adjustment_without_id_cancels_open_stop_orders() {
        let p = btc();
        let open = |id: &str, t: &str| OpenOrder {
            order_id: id.into(),
            symbol: "BTCUSDT".into(),
            side: None,
            order_type: t.into(),
            quantity: Decimal::from(10),
            stop_price: Decimal::from(98),
            reduce_only: true,
        };
        let gateway = ScriptedGateway {
            open: vec![open("11", "STOP_MARKET"), open("12", "TAKE_PROFIT_MARKET")],
            ..Default::default()
        };
        LiveOrderOrchestrator::new(&gateway, Duration::from_millis(200))
            .apply_adjustment(&p, &stop_suggestion(&p))
            .await;
        assert_eq!(*gateway.cancelled.lock().unwrap(), vec!["11".to_string()]);
    }

    #[tokio::test]
    async fn failed_cancel_skips_replacement() {
        let mut p = btc();
        p.orders.stop_loss = Some("sl-1".into());
        let gateway = ScriptedGateway {
            fail_cancel: true,
            ..Default::default()
        };
        let report = LiveOrderOrchestrator::new(&gateway, Duration::from_millis(200))
            .apply_adjustment(&p, &stop_suggestion(&p))
            .await;

        assert!(matches!(report.steps[0].status, StepStatus::Rejected { .. }));
        assert!(matches!(report.steps[1].status, StepStatus::Skipped { .. }));
        assert!(gateway.placed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn take_profit_adjustment_places_fresh_order() {
        let p = btc();
        let mut s = stop_suggestion(&p);
        s.kind = AdjustmentKind::TakeProfit;
        s.rule = AdjustmentRule::StructuralProximity;
        s.current_level = Decimal::from(103);
        s.proposed_level = Decimal::from(102);

        let gateway = ScriptedGateway::default();
        let report = LiveOrderOrchestrator::new(&gateway, Duration::from_millis(200))
            .apply_adjustment(&p, &s)
            .await;

        assert_eq!(report.steps.len(), 1);
        assert_eq!(report.steps[0].step, OrderStep::TakeProfit(1));
        let placed = gateway.placed.lock().unwrap();
        assert_eq!(placed[0].order_type, OrderType::TakeProfitMarket);
        assert_eq!(placed[0].quantity, Decimal::from(4));
        assert!(gateway.cancelled.lock().unwrap().is_empty());
    }
}
