use async_trait::async_trait;
use futures_trader::{
    AdapterConfig, AdapterEvent, AlertBus, AuditRecord, AuditTrail, ConnectionAdapter,
    MarketContext, NotificationEvent, OrderSide, OrderState, OrderType, Position,
    PositionScaleSignal, Predictor, Qty, SimulatedVenue, SimulatedVenueConfig, StrategyConfig,
    StrategyEngine, TradeSignal,
};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Predictor driven by the test: enters while armed, exits on demand.
struct ScriptedPredictor {
    enter: AtomicBool,
    exit: AtomicBool,
}

impl ScriptedPredictor {
    fn new() -> Self {
        Self {
            enter: AtomicBool::new(false),
            exit: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Predictor for ScriptedPredictor {
    async fn evaluate_entry(&self, context: &MarketContext) -> Option<TradeSignal> {
        if self.enter.load(Ordering::SeqCst) {
            Some(TradeSignal::new(
                context.symbol.clone(),
                OrderSide::Buy,
                Qty::from_i64(1),
                0.9,
                "scripted entry",
            ))
        } else {
            None
        }
    }

    async fn evaluate_exit(
        &self,
        context: &MarketContext,
        position: &Position,
    ) -> Option<TradeSignal> {
        if self.exit.load(Ordering::SeqCst) {
            Some(TradeSignal::new(
                context.symbol.clone(),
                OrderSide::Sell,
                position.qty.abs(),
                0.9,
                "scripted exit",
            ))
        } else {
            None
        }
    }

    async fn evaluate_scale(
        &self,
        _context: &MarketContext,
        _position: &Position,
    ) -> Option<PositionScaleSignal> {
        None
    }
}

struct Harness {
    adapter: Arc<ConnectionAdapter>,
    engine: Arc<StrategyEngine>,
    predictor: Arc<ScriptedPredictor>,
    alerts: tokio::sync::mpsc::Receiver<NotificationEvent>,
    audit: tokio::sync::mpsc::Receiver<AuditRecord>,
}

async fn harness() -> Harness {
    let venue = Arc::new(SimulatedVenue::new(SimulatedVenueConfig {
        walk_step_ticks: 2,
        bar_interval: Duration::from_millis(100),
        fill_delay: Duration::from_millis(20),
        fill_poll_interval: Duration::from_millis(5),
        ..SimulatedVenueConfig::default()
    }));
    let adapter = ConnectionAdapter::new(
        venue,
        AdapterConfig {
            data_interval: Duration::from_millis(10),
            event_capacity: 4096,
            ..AdapterConfig::default()
        },
    );
    adapter.connect().await.unwrap();

    let (alert_bus, alerts) = AlertBus::new(256);
    let (audit_trail, audit) = AuditTrail::new(256);
    let predictor = Arc::new(ScriptedPredictor::new());

    let config = StrategyConfig {
        contract_multiplier: Decimal::ONE,
        // Keep the protective legs far away so only the scripted exit
        // closes the trade.
        stop_atr_multiple: Decimal::new(100, 0),
        target_atr_multiple: Decimal::new(200, 0),
        evaluation_interval: Duration::from_millis(50),
        min_eval_interval: Duration::from_millis(10),
        ..StrategyConfig::default()
    };

    let engine = StrategyEngine::new(
        Arc::clone(&adapter),
        predictor.clone() as Arc<dyn Predictor>,
        config,
        alert_bus,
        audit_trail,
    );
    engine.initialize().await.unwrap();

    Harness {
        adapter,
        engine,
        predictor,
        alerts,
        audit,
    }
}

async fn wait_for<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn drain_events(
    events: &mut broadcast::Receiver<AdapterEvent>,
    window: Duration,
) -> Vec<AdapterEvent> {
    let mut collected = Vec::new();
    let deadline = tokio::time::Instant::now() + window;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        match tokio::time::timeout(remaining, events.recv()).await {
            Ok(Ok(event)) => collected.push(event),
            Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
            _ => break,
        }
    }
    collected
}

#[tokio::test]
async fn test_full_round_trip_with_cancel_then_flatten_ordering() {
    let mut harness = harness().await;
    let mut events = harness.adapter.events();
    let config = StrategyConfig::default();
    let symbol = config.symbol.clone();

    harness.engine.start().await.unwrap();
    harness.predictor.enter.store(true, Ordering::SeqCst);

    // Entry: wait until the parent fill lands in the position store.
    let adapter = Arc::clone(&harness.adapter);
    let sym = symbol.clone();
    assert!(
        wait_for(Duration::from_secs(5), move || {
            adapter
                .position(&sym, "SIM-001")
                .map_or(false, |p| !p.is_flat())
        })
        .await,
        "entry never opened a position"
    );
    harness.predictor.enter.store(false, Ordering::SeqCst);
    assert_eq!(harness.engine.daily_stats().await.trades_entered, 1);

    // Let the protective legs activate, then ask for the exit.
    let adapter = Arc::clone(&harness.adapter);
    let sym = symbol.clone();
    assert!(
        wait_for(Duration::from_secs(2), move || {
            adapter.open_orders(Some(&sym)).len() >= 2
        })
        .await,
        "protective legs never activated"
    );
    harness.predictor.exit.store(true, Ordering::SeqCst);

    let adapter = Arc::clone(&harness.adapter);
    let sym = symbol.clone();
    assert!(
        wait_for(Duration::from_secs(5), move || {
            adapter
                .position(&sym, "SIM-001")
                .map_or(false, |p| p.is_flat())
        })
        .await,
        "exit never flattened the position"
    );

    // Event ordering: every protective leg observed Cancelled before
    // the flattening market order (market, no bracket) was Submitted.
    let collected = drain_events(&mut events, Duration::from_millis(300)).await;
    let mut protective_ids = Vec::new();
    for event in &collected {
        if let AdapterEvent::OrderSubmitted(order) = event {
            if order.bracket.is_some()
                && matches!(order.order_type, OrderType::Stop | OrderType::Limit)
            {
                protective_ids.push(order.order_id.clone());
            }
        }
    }
    assert_eq!(protective_ids.len(), 2, "expected stop and target legs");

    let flatten_idx = collected
        .iter()
        .position(|event| {
            matches!(event, AdapterEvent::OrderSubmitted(order)
                if order.order_type == OrderType::Market
                    && order.bracket.is_none()
                    && order.side == OrderSide::Sell)
        })
        .expect("flattening order submitted");

    for id in &protective_ids {
        let cancelled_idx = collected.iter().position(|event| {
            matches!(event, AdapterEvent::OrderUpdated(order)
                if &order.order_id == id && order.state == OrderState::Cancelled)
        });
        let cancelled_idx = cancelled_idx
            .unwrap_or_else(|| panic!("protective leg {} was never observed cancelled", id));
        assert!(
            cancelled_idx < flatten_idx,
            "leg {} cancelled at {} but flatten submitted at {}",
            id,
            cancelled_idx,
            flatten_idx
        );
    }

    // Round trip recorded for metrics and the audit sink.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if harness.engine.performance_metrics().await.total_trades >= 1 {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "trade outcome never reached the tracker"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let mut saw_trade_record = false;
    while let Ok(record) = harness.audit.try_recv() {
        if matches!(record, AuditRecord::Trade(_)) {
            saw_trade_record = true;
        }
    }
    assert!(saw_trade_record, "no TradeOutcome audit record emitted");

    let mut saw_trade_notification = false;
    while let Ok(event) = harness.alerts.try_recv() {
        if matches!(event, NotificationEvent::TradeExecuted { .. }) {
            saw_trade_notification = true;
        }
    }
    assert!(saw_trade_notification, "no TradeExecuted notification");

    harness.engine.stop().await.unwrap();
    harness.adapter.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_stop_cancels_working_orders() {
    let harness = harness().await;
    let symbol = StrategyConfig::default().symbol;

    harness.engine.start().await.unwrap();
    harness.predictor.enter.store(true, Ordering::SeqCst);

    // Position open and protective legs working.
    let adapter = Arc::clone(&harness.adapter);
    let sym = symbol.clone();
    assert!(
        wait_for(Duration::from_secs(5), move || {
            adapter.open_orders(Some(&sym)).len() >= 2
        })
        .await,
        "protective legs never activated"
    );
    harness.predictor.enter.store(false, Ordering::SeqCst);

    harness.engine.stop().await.unwrap();

    let adapter = Arc::clone(&harness.adapter);
    let sym = symbol.clone();
    assert!(
        wait_for(Duration::from_secs(2), move || {
            adapter.open_orders(Some(&sym)).is_empty()
        })
        .await,
        "working orders not cancelled on stop"
    );

    harness.adapter.disconnect().await.unwrap();
}
