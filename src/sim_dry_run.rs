use futures_trader::{
    init_logging, AdapterConfig, AlertBus, AuditTrail, ConnectionAdapter, MomentumPredictor,
    SimulatedVenue, SimulatedVenueConfig, StrategyConfig, StrategyEngine,
};
use log::info;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Dry run against the simulated venue: connect, run the momentum
/// strategy for half a minute, print what happened.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging("info", None)?;

    // Simulation is an explicit construction-time choice.
    let venue = Arc::new(SimulatedVenue::new(SimulatedVenueConfig {
        bar_interval: Duration::from_secs(2),
        ..SimulatedVenueConfig::default()
    }));

    let adapter = ConnectionAdapter::new(
        venue,
        AdapterConfig {
            health_check_interval: Duration::from_secs(5),
            data_interval: Duration::from_millis(200),
            contract_multipliers: HashMap::from([("ES".to_string(), Decimal::new(50, 0))]),
            ..AdapterConfig::default()
        },
    );
    adapter.connect().await?;

    let (alerts, mut alert_rx) = AlertBus::new(64);
    let (audit, mut audit_rx) = AuditTrail::new(64);
    tokio::spawn(async move {
        while let Some(event) = alert_rx.recv().await {
            info!("notification: {:?}", event);
        }
    });
    tokio::spawn(async move {
        while let Some(record) = audit_rx.recv().await {
            info!("audit: {:?}", record);
        }
    });

    let config = StrategyConfig {
        entry_confidence_threshold: 0.55,
        evaluation_interval: Duration::from_millis(250),
        min_eval_interval: Duration::from_millis(200),
        ..StrategyConfig::default()
    };

    let engine = StrategyEngine::new(
        Arc::clone(&adapter),
        Arc::new(MomentumPredictor::default()),
        config,
        alerts,
        audit,
    );
    engine.initialize().await?;
    engine.start().await?;

    tokio::time::sleep(Duration::from_secs(30)).await;

    engine.stop().await?;
    adapter.disconnect().await?;

    let metrics = engine.performance_metrics().await;
    let daily = engine.daily_stats().await;
    info!(
        "session done: {} entries today, {} round trips, net {}",
        daily.trades_entered, metrics.total_trades, metrics.net_pnl
    );
    Ok(())
}
