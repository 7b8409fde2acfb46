use futures_trader::{
    AdapterConfig, AdapterError, AdapterEvent, BracketRequest, ConnectionAdapter, OrderRequest,
    OrderSide, OrderState, PositionDirection, Price, Qty, SimulatedVenue, SimulatedVenueConfig,
    Symbol,
};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

fn adapter_with(venue_config: SimulatedVenueConfig) -> Arc<ConnectionAdapter> {
    let venue = Arc::new(SimulatedVenue::new(venue_config));
    ConnectionAdapter::new(
        venue,
        AdapterConfig {
            contract_multipliers: HashMap::from([("ES".to_string(), Decimal::new(50, 0))]),
            ..AdapterConfig::default()
        },
    )
}

async fn collect_until<F>(
    events: &mut broadcast::Receiver<AdapterEvent>,
    timeout: Duration,
    mut done: F,
) -> Vec<AdapterEvent>
where
    F: FnMut(&[AdapterEvent]) -> bool,
{
    let mut collected = Vec::new();
    let deadline = tokio::time::Instant::now() + timeout;
    while !done(&collected) {
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

async fn wait_for_order_state(
    adapter: &ConnectionAdapter,
    order_id: &str,
    state: OrderState,
    timeout: Duration,
) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if adapter
            .get_order(order_id)
            .map_or(false, |order| order.state == state)
        {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_market_order_submitted_then_filled_in_order() {
    let adapter = adapter_with(SimulatedVenueConfig::default());
    adapter.connect().await.unwrap();
    let mut events = adapter.events();

    let order = adapter
        .submit_order(OrderRequest::market(
            "SIM-001",
            "ES",
            OrderSide::Buy,
            Qty::from_i64(2),
        ))
        .await
        .unwrap();
    assert_eq!(order.state, OrderState::Working);

    let collected = collect_until(&mut events, Duration::from_secs(2), |seen| {
        seen.iter().any(|e| {
            matches!(e, AdapterEvent::OrderUpdated(o)
                if o.order_id == order.order_id && o.state == OrderState::Filled)
        })
    })
    .await;

    // Submitted is observed before Filled for the same order id.
    let submitted_idx = collected.iter().position(|e| {
        matches!(e, AdapterEvent::OrderSubmitted(o) if o.order_id == order.order_id)
    });
    let filled_idx = collected.iter().position(|e| {
        matches!(e, AdapterEvent::OrderUpdated(o)
            if o.order_id == order.order_id && o.state == OrderState::Filled)
    });
    assert!(submitted_idx.is_some(), "no Submitted event seen");
    assert!(filled_idx.is_some(), "no Filled event seen");
    assert!(submitted_idx.unwrap() < filled_idx.unwrap());

    // Filled quantity never exceeds requested quantity.
    let filled = adapter.get_order(&order.order_id).unwrap();
    assert_eq!(filled.state, OrderState::Filled);
    assert!(filled.filled_qty.value() <= filled.qty.value());
    assert!(filled.avg_fill_price.is_some());

    // The confirmed fill, and nothing else, moved the position.
    let position = adapter.position(&Symbol::new("ES"), "SIM-001").unwrap();
    assert_eq!(position.direction, PositionDirection::Long);
    assert_eq!(position.qty, Qty::from_i64(2));
    assert!(position.direction_consistent());

    adapter.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_cancel_and_modify_reject_terminal_orders() {
    let adapter = adapter_with(SimulatedVenueConfig::default());
    adapter.connect().await.unwrap();

    let order = adapter
        .submit_order(OrderRequest::market(
            "SIM-001",
            "ES",
            OrderSide::Buy,
            Qty::from_i64(1),
        ))
        .await
        .unwrap();
    assert!(
        wait_for_order_state(&adapter, &order.order_id, OrderState::Filled, Duration::from_secs(2))
            .await
    );

    assert!(matches!(
        adapter.cancel_order(&order.order_id).await.unwrap_err(),
        AdapterError::InvalidOrderState { .. }
    ));
    assert!(matches!(
        adapter
            .modify_order(&order.order_id, None, Some(Price::from_str("1").unwrap()))
            .await
            .unwrap_err(),
        AdapterError::InvalidOrderState { .. }
    ));
    assert!(matches!(
        adapter.cancel_order("no-such-order").await.unwrap_err(),
        AdapterError::OrderNotFound(_)
    ));

    adapter.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_cancel_resting_order() {
    let adapter = adapter_with(SimulatedVenueConfig {
        fill_delay: Duration::from_secs(60),
        ..SimulatedVenueConfig::default()
    });
    adapter.connect().await.unwrap();

    let order = adapter
        .submit_order(OrderRequest::market(
            "SIM-001",
            "ES",
            OrderSide::Buy,
            Qty::from_i64(1),
        ))
        .await
        .unwrap();

    adapter.cancel_order(&order.order_id).await.unwrap();
    assert!(
        wait_for_order_state(
            &adapter,
            &order.order_id,
            OrderState::Cancelled,
            Duration::from_secs(2)
        )
        .await
    );

    // No fill, no position.
    assert!(adapter.position(&Symbol::new("ES"), "SIM-001").is_none());
    adapter.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_bracket_oco_cancels_sibling_on_protective_fill() {
    // Static walk: the market order fills at 4500, the target (limit
    // sell at 4500) is immediately marketable, the stop never triggers.
    let adapter = adapter_with(SimulatedVenueConfig {
        walk_step_ticks: 0,
        fill_delay: Duration::from_millis(20),
        fill_poll_interval: Duration::from_millis(5),
        ..SimulatedVenueConfig::default()
    });
    adapter.connect().await.unwrap();

    let links = adapter
        .submit_bracket(BracketRequest {
            account: "SIM-001".to_string(),
            symbol: Symbol::new("ES"),
            side: OrderSide::Buy,
            qty: Qty::from_i64(1),
            stop_price: Price::from_str("4490").unwrap(),
            target_price: Price::from_str("4500").unwrap(),
        })
        .await
        .unwrap();

    // Protective legs are held back until the parent fills.
    let stop_before = adapter.get_order(&links.stop_id).unwrap();
    assert_eq!(stop_before.state, OrderState::Pending);

    assert!(
        wait_for_order_state(&adapter, &links.parent_id, OrderState::Filled, Duration::from_secs(2))
            .await
    );
    assert!(
        wait_for_order_state(&adapter, &links.target_id, OrderState::Filled, Duration::from_secs(2))
            .await
    );
    // The surviving sibling is cancelled by the adapter.
    assert!(
        wait_for_order_state(&adapter, &links.stop_id, OrderState::Cancelled, Duration::from_secs(2))
            .await
    );

    // Entry long 1, target sell 1: flat, nothing left working.
    let position = adapter.position(&Symbol::new("ES"), "SIM-001").unwrap();
    assert!(position.is_flat());
    assert!(position.direction_consistent());
    assert!(adapter.open_orders(Some(&Symbol::new("ES"))).is_empty());

    adapter.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_bracket_children_void_when_parent_cancelled() {
    let adapter = adapter_with(SimulatedVenueConfig {
        fill_delay: Duration::from_secs(60),
        ..SimulatedVenueConfig::default()
    });
    adapter.connect().await.unwrap();

    let links = adapter
        .submit_bracket(BracketRequest {
            account: "SIM-001".to_string(),
            symbol: Symbol::new("ES"),
            side: OrderSide::Buy,
            qty: Qty::from_i64(1),
            stop_price: Price::from_str("4490").unwrap(),
            target_price: Price::from_str("4520").unwrap(),
        })
        .await
        .unwrap();

    adapter.cancel_order(&links.parent_id).await.unwrap();
    assert!(
        wait_for_order_state(&adapter, &links.parent_id, OrderState::Cancelled, Duration::from_secs(2))
            .await
    );
    assert!(
        wait_for_order_state(&adapter, &links.stop_id, OrderState::Cancelled, Duration::from_secs(2))
            .await
    );
    assert!(
        wait_for_order_state(&adapter, &links.target_id, OrderState::Cancelled, Duration::from_secs(2))
            .await
    );
    assert!(adapter.position(&Symbol::new("ES"), "SIM-001").is_none());

    adapter.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_open_orders_survive_reconnect_without_resubmission() {
    let adapter = adapter_with(SimulatedVenueConfig {
        fill_delay: Duration::from_secs(60),
        ..SimulatedVenueConfig::default()
    });
    adapter.connect().await.unwrap();

    let order = adapter
        .submit_order(OrderRequest::market(
            "SIM-001",
            "ES",
            OrderSide::Buy,
            Qty::from_i64(1),
        ))
        .await
        .unwrap();

    adapter.reconnect().await.unwrap();

    // Still exactly one order, still working: tracked, not duplicated.
    let open = adapter.open_orders(None);
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].order_id, order.order_id);

    // Lifecycle tracking resumed: a cancel on the new session lands.
    adapter.cancel_order(&order.order_id).await.unwrap();
    assert!(
        wait_for_order_state(&adapter, &order.order_id, OrderState::Cancelled, Duration::from_secs(2))
            .await
    );

    adapter.disconnect().await.unwrap();
}
