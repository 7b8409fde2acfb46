use crate::adapter::connection::{AdapterError, ConnectionAdapter};
use crate::core::events::{
    AdapterEvent, BracketRequest, MarketDataKind, OrderRequest, OrderSide, OrderState, OrderType,
    Position, PositionDirection,
};
use crate::monitoring::alerts::{AlertBus, AuditRecord, AuditTrail, NotificationEvent};
use crate::monitoring::metrics::{PerformanceMetrics, PerformanceTracker, PredictionRecord, TradeOutcome};
use crate::risk::rules::{DailyStats, RiskGate};
use crate::strategy::config::{ConfigError, StrategyConfig};
use crate::strategy::context::MarketContext;
use crate::traits::predictor::{PositionScaleSignal, Predictor, ScaleAction, TradeSignal};
use crate::types::{Price, Qty};
use chrono::Utc;
use log::{debug, error, info, warn};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tokio::task::JoinHandle;

/// Back-off after a caught evaluation-cycle fault.
const CYCLE_FAULT_BACKOFF: Duration = Duration::from_millis(500);
/// Consecutive cycle faults that escalate to a fatal report.
const MAX_CONSECUTIVE_FAULTS: u32 = 3;
/// Grace period for engine tasks to observe shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);
/// Bound on waiting for cancel confirmations during exit.
const EXIT_CANCEL_TIMEOUT: Duration = Duration::from_secs(2);

/// Lifecycle state of the evaluation engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Initializing,
    Ready,
    Running,
    Paused,
    Stopping,
    Stopped,
    Error,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StrategyError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("operation requires state {expected}, current state is {actual}")]
    InvalidState {
        expected: &'static str,
        actual: EngineState,
    },

    #[error(transparent)]
    Adapter(#[from] AdapterError),
}

/// What the engine remembers about the trade it currently has on, so a
/// `TradeOutcome` can be cut when the position returns to flat.
#[derive(Debug, Clone)]
struct OpenTradeMemo {
    direction: PositionDirection,
    peak_qty: Qty,
    entry_price: Price,
    realized_at_open: Decimal,
    opened_at: chrono::DateTime<Utc>,
}

/// Periodic decision loop over one symbol: consumes the adapter's
/// market-data and order events, consults the pluggable predictor,
/// applies risk gates and routes orders back through the adapter.
pub struct StrategyEngine {
    adapter: Arc<ConnectionAdapter>,
    predictor: Arc<dyn Predictor>,
    config: RwLock<StrategyConfig>,
    state: RwLock<EngineState>,
    context: RwLock<MarketContext>,
    daily: RwLock<DailyStats>,
    tracker: RwLock<PerformanceTracker>,
    alerts: AlertBus,
    audit: AuditTrail,
    shutdown: Mutex<watch::Sender<bool>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    last_eval: Mutex<Option<Instant>>,
    pyramid_adds: AtomicU32,
    open_trade: RwLock<Option<OpenTradeMemo>>,
    last_realized_seen: RwLock<Decimal>,
    last_fill_price: RwLock<Option<Price>>,
}

impl StrategyEngine {
    pub fn new(
        adapter: Arc<ConnectionAdapter>,
        predictor: Arc<dyn Predictor>,
        config: StrategyConfig,
        alerts: AlertBus,
        audit: AuditTrail,
    ) -> Arc<Self> {
        let context = MarketContext::new(config.symbol.clone(), config.atr_period);
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            adapter,
            predictor,
            config: RwLock::new(config),
            state: RwLock::new(EngineState::Uninitialized),
            context: RwLock::new(context),
            daily: RwLock::new(DailyStats::new(Utc::now().date_naive())),
            tracker: RwLock::new(PerformanceTracker::new()),
            alerts,
            audit,
            shutdown: Mutex::new(shutdown),
            tasks: Mutex::new(Vec::new()),
            last_eval: Mutex::new(None),
            pyramid_adds: AtomicU32::new(0),
            open_trade: RwLock::new(None),
            last_realized_seen: RwLock::new(Decimal::ZERO),
            last_fill_price: RwLock::new(None),
        })
    }

    pub async fn state(&self) -> EngineState {
        *self.state.read().await
    }

    pub async fn daily_stats(&self) -> DailyStats {
        self.daily.read().await.clone()
    }

    pub async fn performance_metrics(&self) -> PerformanceMetrics {
        self.tracker.read().await.metrics()
    }

    /// Validate configuration and move to Ready. Fails fast on invalid
    /// input, leaving the engine in Error with nothing else mutated.
    pub async fn initialize(&self) -> Result<(), StrategyError> {
        {
            let mut state = self.state.write().await;
            if *state != EngineState::Uninitialized {
                return Err(StrategyError::InvalidState {
                    expected: "Uninitialized",
                    actual: *state,
                });
            }
            *state = EngineState::Initializing;
        }

        let config = self.config.read().await.clone();
        if let Err(e) = config.validate() {
            error!("strategy configuration invalid: {}", e);
            *self.state.write().await = EngineState::Error;
            return Err(e.into());
        }

        info!(
            "strategy initialized for {} on account {}",
            config.symbol, config.account
        );
        *self.state.write().await = EngineState::Ready;
        Ok(())
    }

    /// Subscribe market data and launch the evaluation loop. Returns
    /// immediately; the loop runs until pause/stop. Legal from Ready
    /// or Paused only.
    pub async fn start(self: &Arc<Self>) -> Result<(), StrategyError> {
        {
            let state = self.state.read().await;
            if !matches!(*state, EngineState::Ready | EngineState::Paused) {
                return Err(StrategyError::InvalidState {
                    expected: "Ready or Paused",
                    actual: *state,
                });
            }
        }

        let config = self.config.read().await.clone();
        if let Err(e) = self
            .adapter
            .subscribe(config.symbol.clone(), MarketDataKind::Last)
            .await
        {
            warn!("start aborted, market data subscription failed: {}", e);
            return Err(e.into());
        }
        self.adapter
            .subscribe(config.symbol.clone(), MarketDataKind::Bars)
            .await?;

        self.rearm_shutdown().await;
        self.spawn_event_pump().await;
        self.spawn_eval_loop(config.evaluation_interval).await;

        *self.state.write().await = EngineState::Running;
        info!("strategy running on {}", config.symbol);
        Ok(())
    }

    /// Suspend evaluation without cancelling orders. Start resumes.
    pub async fn pause(&self) -> Result<(), StrategyError> {
        {
            let state = self.state.read().await;
            if *state != EngineState::Running {
                return Err(StrategyError::InvalidState {
                    expected: "Running",
                    actual: *state,
                });
            }
        }
        self.teardown_tasks().await;
        *self.state.write().await = EngineState::Paused;
        info!("strategy paused");
        Ok(())
    }

    /// Cancel the strategy's working orders and stop. Idempotent.
    pub async fn stop(&self) -> Result<(), StrategyError> {
        {
            let state = self.state.read().await;
            if *state == EngineState::Stopped {
                return Ok(());
            }
        }
        *self.state.write().await = EngineState::Stopping;
        self.teardown_tasks().await;

        let config = self.config.read().await.clone();
        if self.adapter.is_connected().await {
            match self.adapter.cancel_all_for_symbol(&config.symbol).await {
                Ok(cancelled) if cancelled > 0 => {
                    info!("cancelled {} working orders on stop", cancelled)
                }
                Ok(_) => {}
                Err(e) => warn!("order cancellation on stop failed: {}", e),
            }
        }

        *self.state.write().await = EngineState::Stopped;
        info!("strategy stopped");
        Ok(())
    }

    /// Replace the configuration. Refused while the strategy runs.
    pub async fn update_config(&self, new_config: StrategyConfig) -> Result<(), StrategyError> {
        {
            let state = self.state.read().await;
            if matches!(*state, EngineState::Running | EngineState::Stopping) {
                return Err(StrategyError::InvalidState {
                    expected: "not Running",
                    actual: *state,
                });
            }
        }
        new_config.validate()?;

        let rebuild_context = {
            let current = self.config.read().await;
            current.symbol != new_config.symbol || current.atr_period != new_config.atr_period
        };
        if rebuild_context {
            *self.context.write().await =
                MarketContext::new(new_config.symbol.clone(), new_config.atr_period);
        }
        *self.config.write().await = new_config;
        info!("strategy configuration updated");
        Ok(())
    }

    /// Entry evaluation against the current context, gates included.
    /// `None` is the expected common outcome.
    pub async fn evaluate_entry(&self) -> Option<TradeSignal> {
        let config = self.config.read().await.clone();
        let context = self.context.read().await.clone();
        self.evaluate_entry_gated(&config, &context).await
    }

    // ---- background tasks ----

    async fn rearm_shutdown(&self) {
        let (tx, _) = watch::channel(false);
        *self.shutdown.lock().await = tx;
    }

    async fn teardown_tasks(&self) {
        let _ = self.shutdown.lock().await.send(true);
        let handles: Vec<JoinHandle<()>> = {
            let mut tasks = self.tasks.lock().await;
            tasks.drain(..).collect()
        };
        for handle in handles {
            let abort = handle.abort_handle();
            if tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err() {
                warn!("engine task exceeded shutdown grace, aborting");
                abort.abort();
            }
        }
    }

    async fn spawn_event_pump(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        let mut events = self.adapter.events();
        let mut shutdown_rx = self.shutdown.lock().await.subscribe();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    event = events.recv() => match event {
                        Ok(event) => engine.handle_event(event).await,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("event bus lagged, {} events skipped", skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
            debug!("event pump stopped");
        });
        self.tasks.lock().await.push(handle);
    }

    async fn spawn_eval_loop(self: &Arc<Self>, interval: Duration) {
        let engine = Arc::clone(self);
        let mut shutdown_rx = self.shutdown.lock().await.subscribe();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut consecutive_faults: u32 = 0;
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        match engine.run_cycle().await {
                            Ok(()) => consecutive_faults = 0,
                            Err(e) => {
                                consecutive_faults += 1;
                                error!(
                                    "evaluation cycle failed ({} consecutive): {}",
                                    consecutive_faults, e
                                );
                                if consecutive_faults >= MAX_CONSECUTIVE_FAULTS {
                                    let message = format!(
                                        "evaluation loop aborted after {} consecutive faults: {}",
                                        consecutive_faults, e
                                    );
                                    engine.alerts.emit(NotificationEvent::Fatal {
                                        message,
                                    });
                                    *engine.state.write().await = EngineState::Error;
                                    break;
                                }
                                tokio::time::sleep(CYCLE_FAULT_BACKOFF).await;
                            }
                        }
                    }
                }
            }
            debug!("evaluation loop stopped");
        });
        self.tasks.lock().await.push(handle);
    }

    async fn handle_event(&self, event: AdapterEvent) {
        let (symbol, account) = {
            let config = self.config.read().await;
            (config.symbol.clone(), config.account.clone())
        };

        match event {
            AdapterEvent::Price(update) if update.symbol == symbol => {
                self.context.write().await.apply_quote(&update);
            }
            AdapterEvent::Bar(bar) if bar.symbol == symbol => {
                self.context.write().await.apply_bar(&bar);
            }
            AdapterEvent::OrderUpdated(order) if order.symbol == symbol => {
                if order.state == OrderState::Filled {
                    if let Some(price) = order.avg_fill_price {
                        *self.last_fill_price.write().await = Some(price);
                    }
                }
            }
            AdapterEvent::PositionUpdated(position)
                if position.symbol == symbol && position.account == account =>
            {
                self.track_position(position).await;
            }
            AdapterEvent::ConnectionStateChanged { new, reason, .. } => {
                self.alerts.emit(NotificationEvent::ConnectionStatus {
                    state: new,
                    reason,
                });
            }
            AdapterEvent::Error { message, fatal } if fatal => {
                self.alerts.emit(NotificationEvent::Fatal { message });
            }
            _ => {}
        }
    }

    /// Fold a position update into the daily counters, the circuit
    /// breaker and the open-trade memo.
    async fn track_position(&self, position: Position) {
        {
            let mut last = self.last_realized_seen.write().await;
            let delta = position.realized_pnl - *last;
            if !delta.is_zero() {
                *last = position.realized_pnl;
                drop(last);
                let mut daily = self.daily.write().await;
                daily.add_realized(delta);
                if !daily.breaker_tripped {
                    let config = self.config.read().await.clone();
                    if let Some(account) = self.adapter.account(&config.account) {
                        let limit = RiskGate::daily_loss_limit(&config, &account);
                        if daily.loss_limit_reached(limit) {
                            daily.breaker_tripped = true;
                            warn!(
                                "daily circuit breaker tripped: P&L {} against limit {}",
                                daily.realized_pnl, limit
                            );
                            self.alerts.emit(NotificationEvent::CircuitBreakerTripped {
                                daily_pnl: daily.realized_pnl,
                                loss_limit: limit,
                            });
                        }
                    }
                }
            }
        }

        let mut memo = self.open_trade.write().await;
        if position.is_flat() {
            if let Some(trade) = memo.take() {
                let exit_price = self
                    .last_fill_price
                    .read()
                    .await
                    .unwrap_or(trade.entry_price);
                let outcome = TradeOutcome {
                    symbol: position.symbol.clone(),
                    account: position.account.clone(),
                    direction: trade.direction,
                    qty: trade.peak_qty,
                    entry_price: trade.entry_price,
                    exit_price,
                    realized_pnl: position.realized_pnl - trade.realized_at_open,
                    opened_at: trade.opened_at,
                    closed_at: Utc::now(),
                };
                info!(
                    "trade closed: {:?} {} {} for {}",
                    outcome.direction, outcome.qty, outcome.symbol, outcome.realized_pnl
                );
                self.tracker.write().await.record(&outcome);
                self.audit.record(AuditRecord::Trade(outcome));
                self.pyramid_adds.store(0, Ordering::SeqCst);
            }
        } else {
            match memo.as_mut() {
                None => {
                    *memo = Some(OpenTradeMemo {
                        direction: position.direction,
                        peak_qty: position.qty.abs(),
                        entry_price: position.avg_entry_price.unwrap_or(Price::ZERO),
                        realized_at_open: position.realized_pnl,
                        opened_at: position.opened_at.unwrap_or_else(Utc::now),
                    });
                }
                Some(trade) => {
                    if position.qty.abs() > trade.peak_qty {
                        trade.peak_qty = position.qty.abs();
                    }
                }
            }
        }
    }

    // ---- evaluation cycle ----

    async fn run_cycle(&self) -> Result<(), StrategyError> {
        // Daily counters reset at the UTC midnight boundary.
        let today = Utc::now().date_naive();
        let closed = self.daily.write().await.roll_over(today);
        if let Some(closed) = closed {
            info!(
                "daily rollover: {} trades, realized {}",
                closed.trades_entered, closed.realized_pnl
            );
            self.alerts.emit(NotificationEvent::DailySummary {
                day: closed.day,
                realized_pnl: closed.realized_pnl,
                trades: closed.trades_entered,
                max_drawdown: closed.max_drawdown,
            });
        }

        {
            let min_interval = self.config.read().await.min_eval_interval;
            let mut last = self.last_eval.lock().await;
            if let Some(previous) = *last {
                if previous.elapsed() < min_interval {
                    return Ok(());
                }
            }
            *last = Some(Instant::now());
        }

        let config = self.config.read().await.clone();
        let context = self.context.read().await.clone();
        if !context.ready() {
            debug!("market context not ready, skipping cycle");
            return Ok(());
        }

        match self.adapter.position(&config.symbol, &config.account) {
            Some(position) if !position.is_flat() => {
                self.manage_position(&config, &context, &position).await
            }
            _ => self.try_enter(&config, &context).await,
        }
    }

    /// In a position: exit first, then scale; at most one action per
    /// cycle.
    async fn manage_position(
        &self,
        config: &StrategyConfig,
        context: &MarketContext,
        position: &Position,
    ) -> Result<(), StrategyError> {
        if let Some(signal) = self.predictor.evaluate_exit(context, position).await {
            if signal.confidence >= config.exit_confidence_threshold {
                info!("exit signal for {}: {}", config.symbol, signal.reason);
                return self.execute_exit(config, position, &signal.reason).await;
            }
            debug!(
                "exit signal below threshold ({:.3} < {:.3})",
                signal.confidence, config.exit_confidence_threshold
            );
        }

        if let Some(signal) = self.predictor.evaluate_scale(context, position).await {
            if self.execute_scale(config, context, position, signal).await? {
                return Ok(());
            }
        }

        if config.trailing_stop_enabled {
            self.ratchet_trailing_stop(config, context, position).await?;
        }
        Ok(())
    }

    async fn try_enter(
        &self,
        config: &StrategyConfig,
        context: &MarketContext,
    ) -> Result<(), StrategyError> {
        match self.evaluate_entry_gated(config, context).await {
            Some(signal) => self.execute_entry(config, context, signal).await,
            None => Ok(()),
        }
    }

    async fn evaluate_entry_gated(
        &self,
        config: &StrategyConfig,
        context: &MarketContext,
    ) -> Option<TradeSignal> {
        let account = match self.adapter.account(&config.account) {
            Some(account) => account,
            None => {
                debug!("account {} not yet known to adapter", config.account);
                return None;
            }
        };

        let daily = self.daily.read().await.clone();
        let open_positions = self
            .adapter
            .positions(&config.account)
            .iter()
            .filter(|p| !p.is_flat())
            .count();
        let existing = self.adapter.position(&config.symbol, &config.account);

        if let Err(rejection) = RiskGate::check_entry_preconditions(
            config,
            &daily,
            &account,
            open_positions,
            existing.as_ref(),
        ) {
            if rejection.rule == "DailyLossLimit" && daily.breaker_tripped {
                // Already alerted when the breaker tripped.
                debug!("entry blocked: {}", rejection);
            } else {
                warn!("entry blocked: {}", rejection);
                self.alerts.emit(NotificationEvent::RiskAlert {
                    rule: rejection.rule,
                    details: rejection.details,
                });
            }
            return None;
        }

        // An entry already routed but not yet filled must not be
        // doubled up while its fill report is in flight.
        if !self.adapter.open_orders(Some(&config.symbol)).is_empty() {
            debug!("entry skipped, orders already working in {}", config.symbol);
            return None;
        }

        // No signal is the expected common case, not an error.
        let signal = self.predictor.evaluate_entry(context).await?;

        if let Err(rejection) = RiskGate::check_confidence(config, &signal) {
            warn!("entry withheld: {}", rejection);
            self.audit.record(AuditRecord::Prediction(PredictionRecord {
                symbol: signal.symbol.clone(),
                side: signal.side,
                confidence: signal.confidence,
                reason: signal.reason.clone(),
                executed: false,
                timestamp: Utc::now(),
            }));
            return None;
        }

        Some(signal)
    }

    /// Bracket entry: stop and target offset from the entry price by
    /// the configured ATR multiples, sized subject to the
    /// risk-per-trade gate (rejected, never resized).
    async fn execute_entry(
        &self,
        config: &StrategyConfig,
        context: &MarketContext,
        signal: TradeSignal,
    ) -> Result<(), StrategyError> {
        let (entry_price, atr) = match (context.last_price, context.atr) {
            (Some(price), Some(atr)) => (price, atr),
            _ => return Ok(()),
        };
        let account = match self.adapter.account(&config.account) {
            Some(account) => account,
            None => return Ok(()),
        };

        let qty = if signal.qty.is_zero() {
            config.order_qty
        } else {
            signal.qty.abs()
        };
        if atr <= Decimal::ZERO {
            debug!("ATR not established, entry skipped");
            return Ok(());
        }
        let stop_distance = atr * config.stop_atr_multiple;
        let target_distance = atr * config.target_atr_multiple;
        let (stop_price, target_price) = match signal.side {
            OrderSide::Buy => (
                entry_price - Price::new(stop_distance),
                entry_price + Price::new(target_distance),
            ),
            OrderSide::Sell => (
                entry_price + Price::new(stop_distance),
                entry_price - Price::new(target_distance),
            ),
        };

        if let Err(rejection) = RiskGate::check_order_risk(config, &account, stop_distance, qty) {
            warn!("entry rejected by sizing: {}", rejection);
            self.alerts.emit(NotificationEvent::RiskAlert {
                rule: rejection.rule,
                details: rejection.details,
            });
            self.audit.record(AuditRecord::Prediction(PredictionRecord {
                symbol: signal.symbol.clone(),
                side: signal.side,
                confidence: signal.confidence,
                reason: signal.reason.clone(),
                executed: false,
                timestamp: Utc::now(),
            }));
            return Ok(());
        }

        let request = BracketRequest {
            account: config.account.clone(),
            symbol: config.symbol.clone(),
            side: signal.side,
            qty,
            stop_price,
            target_price,
        };

        match self.adapter.submit_bracket(request).await {
            Ok(_links) => {
                // The counter moves only on successful submission.
                self.daily.write().await.record_entry();
                info!(
                    "entry submitted: {:?} {} {} @ ~{} (stop {}, target {})",
                    signal.side, qty, config.symbol, entry_price, stop_price, target_price
                );
                self.alerts.emit(NotificationEvent::TradeExecuted {
                    symbol: config.symbol.clone(),
                    side: signal.side,
                    qty,
                    reason: signal.reason.clone(),
                });
                self.audit.record(AuditRecord::Prediction(PredictionRecord {
                    symbol: signal.symbol,
                    side: signal.side,
                    confidence: signal.confidence,
                    reason: signal.reason,
                    executed: true,
                    timestamp: Utc::now(),
                }));
                Ok(())
            }
            Err(AdapterError::Venue(e)) => {
                // Rejected by the venue: non-fatal, the loop continues.
                warn!("entry submission rejected: {}", e);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Cancel-then-flatten. Flattening before cancelling risks a stale
    /// bracket leg re-entering a position after the exit.
    async fn execute_exit(
        &self,
        config: &StrategyConfig,
        position: &Position,
        reason: &str,
    ) -> Result<(), StrategyError> {
        let cancelled = self.adapter.cancel_all_for_symbol(&config.symbol).await?;
        if cancelled > 0 {
            debug!("cancelled {} working orders before flatten", cancelled);
        }

        // Wait (bounded) for the cancels to be confirmed so a stale
        // leg cannot fill between here and the flatten.
        let deadline = Instant::now() + EXIT_CANCEL_TIMEOUT;
        loop {
            let open = self.adapter.open_orders(Some(&config.symbol));
            if open.is_empty() {
                break;
            }
            if Instant::now() >= deadline {
                warn!(
                    "flattening with {} orders still awaiting cancel confirmation",
                    open.len()
                );
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let side = match position.direction {
            PositionDirection::Long => OrderSide::Sell,
            PositionDirection::Short => OrderSide::Buy,
            PositionDirection::Flat => return Ok(()),
        };
        let qty = position.qty.abs();
        let request = OrderRequest::market(
            config.account.clone(),
            config.symbol.clone(),
            side,
            qty,
        );
        self.adapter.submit_order(request).await?;

        self.alerts.emit(NotificationEvent::TradeExecuted {
            symbol: config.symbol.clone(),
            side,
            qty,
            reason: reason.to_string(),
        });
        Ok(())
    }

    /// Scale-out always allowed; scale-in honors the pyramiding toggle
    /// and add budget. Returns whether an action was taken.
    async fn execute_scale(
        &self,
        config: &StrategyConfig,
        context: &MarketContext,
        position: &Position,
        signal: PositionScaleSignal,
    ) -> Result<bool, StrategyError> {
        match signal.action {
            ScaleAction::Out => {
                let qty = signal.qty.abs().min(position.qty.abs());
                if qty.is_zero() {
                    return Ok(false);
                }
                let side = match position.direction {
                    PositionDirection::Long => OrderSide::Sell,
                    PositionDirection::Short => OrderSide::Buy,
                    PositionDirection::Flat => return Ok(false),
                };
                self.adapter
                    .submit_order(OrderRequest::market(
                        config.account.clone(),
                        config.symbol.clone(),
                        side,
                        qty,
                    ))
                    .await?;
                let new_total = position.qty.abs() - qty;
                info!(
                    "scaled out {} of {} ({} remaining): {}",
                    qty, config.symbol, new_total, signal.reason
                );
                self.alerts.emit(NotificationEvent::PositionScaled {
                    symbol: config.symbol.clone(),
                    action: ScaleAction::Out,
                    qty,
                    new_total,
                    reason: signal.reason,
                });
                Ok(true)
            }
            ScaleAction::In => {
                if !config.pyramiding_enabled {
                    debug!("scale-in signal ignored, pyramiding disabled");
                    return Ok(false);
                }
                if self.pyramid_adds.load(Ordering::SeqCst) >= config.max_pyramid_adds {
                    debug!("scale-in signal ignored, add budget spent");
                    return Ok(false);
                }
                let atr = match context.atr {
                    Some(atr) => atr,
                    None => return Ok(false),
                };
                let account = match self.adapter.account(&config.account) {
                    Some(account) => account,
                    None => return Ok(false),
                };
                let qty = signal.qty.abs();
                if qty.is_zero() {
                    return Ok(false);
                }
                let stop_distance = atr * config.stop_atr_multiple;
                if let Err(rejection) =
                    RiskGate::check_order_risk(config, &account, stop_distance, qty)
                {
                    warn!("scale-in rejected by sizing: {}", rejection);
                    return Ok(false);
                }
                let side = match position.direction {
                    PositionDirection::Long => OrderSide::Buy,
                    PositionDirection::Short => OrderSide::Sell,
                    PositionDirection::Flat => return Ok(false),
                };
                self.adapter
                    .submit_order(OrderRequest::market(
                        config.account.clone(),
                        config.symbol.clone(),
                        side,
                        qty,
                    ))
                    .await?;
                self.pyramid_adds.fetch_add(1, Ordering::SeqCst);
                let new_total = position.qty.abs() + qty;
                info!(
                    "scaled into {} by {} ({} total): {}",
                    config.symbol, qty, new_total, signal.reason
                );
                self.alerts.emit(NotificationEvent::PositionScaled {
                    symbol: config.symbol.clone(),
                    action: ScaleAction::In,
                    qty,
                    new_total,
                    reason: signal.reason,
                });
                Ok(true)
            }
        }
    }

    /// Move the protective stop along once price has run at least one
    /// ATR past the previous level.
    async fn ratchet_trailing_stop(
        &self,
        config: &StrategyConfig,
        context: &MarketContext,
        position: &Position,
    ) -> Result<(), StrategyError> {
        let (last, atr) = match (context.last_price, context.atr) {
            (Some(last), Some(atr)) => (last, atr),
            _ => return Ok(()),
        };
        let stop_distance = atr * config.stop_atr_multiple;

        for order in self.adapter.open_orders(Some(&config.symbol)) {
            if order.order_type != OrderType::Stop {
                continue;
            }
            let current = match order.stop_price {
                Some(price) => price,
                None => continue,
            };
            match position.direction {
                PositionDirection::Long => {
                    let desired = last - Price::new(stop_distance);
                    if desired.value() - current.value() >= atr {
                        self.adapter
                            .modify_order(&order.order_id, None, Some(desired))
                            .await?;
                        info!("trailing stop for {} raised to {}", config.symbol, desired);
                    }
                }
                PositionDirection::Short => {
                    let desired = last + Price::new(stop_distance);
                    if current.value() - desired.value() >= atr {
                        self.adapter
                            .modify_order(&order.order_id, None, Some(desired))
                            .await?;
                        info!("trailing stop for {} lowered to {}", config.symbol, desired);
                    }
                }
                PositionDirection::Flat => {}
            }
        }
        Ok(())
    }
}
