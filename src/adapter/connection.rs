use crate::adapter::order_store::OrderStore;
use crate::adapter::subscriptions::{SubscribeOutcome, SubscriptionSet, UnsubscribeOutcome};
use crate::core::events::{
    AccountInfo, AdapterEvent, BracketLinks, BracketRequest, ConnectionState, ExecutionReport,
    MarketDataKind, Order, OrderId, OrderRequest, OrderState, Position,
};
use crate::traits::venue::{VenueError, VenueSession};
use crate::types::Symbol;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Grace period for background tasks to observe the shutdown signal
/// before they are aborted.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Adapter-level error taxonomy. Connectivity problems recover locally
/// through bounded reconnection; everything else surfaces to the caller.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("not connected to venue")]
    NotConnected,

    #[error("order not found: {0}")]
    OrderNotFound(OrderId),

    #[error("order {order_id} is {state:?}; cancel/modify requires a working order")]
    InvalidOrderState { order_id: OrderId, state: OrderState },

    #[error("order id {0} was already submitted")]
    DuplicateOrderId(OrderId),

    #[error("reconnect attempts exhausted after {attempts} tries")]
    ReconnectExhausted { attempts: u32 },

    #[error(transparent)]
    Venue(#[from] VenueError),
}

/// Tuning for the connection adapter.
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    /// Liveness probe cadence while connected.
    pub health_check_interval: Duration,
    /// Reconnect automatically when a health probe fails.
    pub auto_reconnect: bool,
    pub max_reconnect_attempts: u32,
    /// Fixed delay between reconnect attempts.
    pub reconnect_delay: Duration,
    /// Cadence of per-symbol market data production.
    pub data_interval: Duration,
    /// Capacity of the broadcast event bus.
    pub event_capacity: usize,
    /// Dollar value of one point per contract, by symbol.
    pub contract_multipliers: HashMap<String, Decimal>,
    pub default_contract_multiplier: Decimal,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            health_check_interval: Duration::from_secs(30),
            auto_reconnect: true,
            max_reconnect_attempts: 5,
            reconnect_delay: Duration::from_secs(5),
            data_interval: Duration::from_secs(1),
            event_capacity: 512,
            contract_multipliers: HashMap::new(),
            default_contract_multiplier: Decimal::ONE,
        }
    }
}

/// Owns one logical session to the execution venue: connection state
/// machine, subscriptions, order/position/account indexes and the
/// supervised background loops that keep them current.
///
/// All venue traffic goes through the `VenueSession` capability; the
/// adapter behaves identically over a real or simulated session.
pub struct ConnectionAdapter {
    venue: Arc<dyn VenueSession>,
    config: AdapterConfig,
    state: RwLock<ConnectionState>,
    connected_at: RwLock<Option<DateTime<Utc>>>,
    store: OrderStore,
    subscriptions: Mutex<SubscriptionSet>,
    events: broadcast::Sender<AdapterEvent>,
    // Re-armed on every (re)connect; each session's tasks subscribe to
    // the sender that was live when they were spawned.
    shutdown: Mutex<watch::Sender<bool>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ConnectionAdapter {
    pub fn new(venue: Arc<dyn VenueSession>, config: AdapterConfig) -> Arc<Self> {
        let (events, _) = broadcast::channel(config.event_capacity.max(16));
        let (shutdown, _) = watch::channel(false);
        let store = OrderStore::new(
            config.contract_multipliers.clone(),
            config.default_contract_multiplier,
        );
        Arc::new(Self {
            venue,
            config,
            state: RwLock::new(ConnectionState::Disconnected),
            connected_at: RwLock::new(None),
            store,
            subscriptions: Mutex::new(SubscriptionSet::new()),
            events,
            shutdown: Mutex::new(shutdown),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Subscribe to the typed event bus. Per symbol and per order,
    /// events arrive in emission order.
    pub fn events(&self) -> broadcast::Receiver<AdapterEvent> {
        self.events.subscribe()
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub async fn is_connected(&self) -> bool {
        *self.state.read().await == ConnectionState::Connected
    }

    pub async fn connected_at(&self) -> Option<DateTime<Utc>> {
        *self.connected_at.read().await
    }

    fn emit(&self, event: AdapterEvent) {
        // A send error just means nobody is listening right now.
        let _ = self.events.send(event);
    }

    async fn set_state(&self, new: ConnectionState, reason: &str) {
        let old = {
            let mut guard = self.state.write().await;
            let old = *guard;
            if old == new {
                return;
            }
            *guard = new;
            old
        };
        info!("connection state {} -> {} ({})", old, new, reason);
        self.emit(AdapterEvent::ConnectionStateChanged {
            old,
            new,
            reason: reason.to_string(),
        });
    }

    async fn ensure_connected(&self) -> Result<(), AdapterError> {
        if self.is_connected().await {
            Ok(())
        } else {
            Err(AdapterError::NotConnected)
        }
    }

    /// Single session establishment attempt. On success the health
    /// check loop starts; on failure the adapter lands in Error and the
    /// caller decides whether that is fatal.
    pub async fn connect(self: &Arc<Self>) -> Result<(), AdapterError> {
        if self.is_connected().await {
            debug!("connect requested while already connected");
            return Ok(());
        }

        self.set_state(ConnectionState::Connecting, "connect requested")
            .await;
        if let Err(e) = self.venue.connect().await {
            let message = format!("connect failed: {}", e);
            self.set_state(ConnectionState::Error, &message).await;
            self.emit(AdapterEvent::Error {
                message,
                fatal: false,
            });
            return Err(e.into());
        }

        *self.connected_at.write().await = Some(Utc::now());
        self.set_state(ConnectionState::Connected, "session established")
            .await;
        self.rearm_shutdown().await;
        self.refresh_accounts().await;
        self.spawn_health_loop().await;
        self.respawn_session_tasks().await;
        Ok(())
    }

    /// Stop all background work, close the venue session and land in
    /// Disconnected. Idempotent.
    pub async fn disconnect(&self) -> Result<(), AdapterError> {
        self.subscriptions.lock().await.stop_all();
        self.teardown_tasks().await;
        if let Err(e) = self.venue.disconnect().await {
            warn!("venue disconnect reported: {}", e);
        }
        *self.connected_at.write().await = None;
        self.set_state(ConnectionState::Disconnected, "explicit stop")
            .await;
        Ok(())
    }

    /// Tear the session down and retry connect up to the configured
    /// attempt budget. Emits exactly one fatal error event when the
    /// budget is exhausted; never retries indefinitely.
    pub async fn reconnect(self: &Arc<Self>) -> Result<(), AdapterError> {
        self.set_state(ConnectionState::Reconnecting, "reconnect requested")
            .await;
        self.teardown_tasks().await;
        let _ = self.venue.disconnect().await;

        let max = self.config.max_reconnect_attempts.max(1);
        for attempt in 1..=max {
            match self.venue.connect().await {
                Ok(()) => {
                    *self.connected_at.write().await = Some(Utc::now());
                    self.set_state(
                        ConnectionState::Connected,
                        &format!("reconnected on attempt {}", attempt),
                    )
                    .await;
                    self.rearm_shutdown().await;
                    self.refresh_accounts().await;
                    self.spawn_health_loop().await;
                    self.respawn_session_tasks().await;
                    return Ok(());
                }
                Err(e) => {
                    warn!("reconnect attempt {}/{} failed: {}", attempt, max, e);
                    if attempt < max {
                        tokio::time::sleep(self.config.reconnect_delay).await;
                    }
                }
            }
        }

        let message = format!("reconnect attempts exhausted after {} tries", max);
        self.emit(AdapterEvent::Error {
            message: message.clone(),
            fatal: true,
        });
        self.set_state(ConnectionState::Error, &message).await;
        Err(AdapterError::ReconnectExhausted { attempts: max })
    }

    /// Idempotent subscription to (symbol, data-kind). The first kind
    /// on a symbol starts its data-production task.
    pub async fn subscribe(
        self: &Arc<Self>,
        symbol: Symbol,
        kind: MarketDataKind,
    ) -> Result<(), AdapterError> {
        self.ensure_connected().await?;
        let outcome = self.subscriptions.lock().await.add(symbol.clone(), kind);
        match outcome {
            SubscribeOutcome::AlreadyActive => {
                debug!("already subscribed to {} {:?}", symbol, kind);
            }
            SubscribeOutcome::KindAdded => {
                info!("subscribed to {} {:?}", symbol, kind);
            }
            SubscribeOutcome::SymbolAdded(stop_rx) => {
                info!("subscribed to {} {:?}", symbol, kind);
                self.spawn_data_task(symbol, stop_rx).await;
            }
        }
        Ok(())
    }

    /// Remove one (symbol, data-kind). Removing the last kind stops the
    /// symbol's data task.
    pub async fn unsubscribe(&self, symbol: &Symbol, kind: MarketDataKind) -> Result<(), AdapterError> {
        match self.subscriptions.lock().await.remove(symbol, kind) {
            UnsubscribeOutcome::NotSubscribed => {
                debug!("unsubscribe for inactive pair {} {:?}", symbol, kind);
            }
            UnsubscribeOutcome::KindRemoved => {
                info!("unsubscribed {} {:?}", symbol, kind);
            }
            UnsubscribeOutcome::SymbolCleared => {
                info!("unsubscribed {} {:?}; symbol cleared", symbol, kind);
            }
        }
        Ok(())
    }

    pub async fn is_subscribed(&self, symbol: &Symbol, kind: MarketDataKind) -> bool {
        self.subscriptions.lock().await.is_active(symbol, kind)
    }

    pub async fn subscription_count(&self) -> usize {
        self.subscriptions.lock().await.len()
    }

    /// Submit an order. Assigns an id when the request carries none,
    /// emits `OrderSubmitted` once the venue accepts, and tracks the
    /// order to its terminal state. Orders are routed at most once;
    /// reconnects never resubmit.
    pub async fn submit_order(self: &Arc<Self>, request: OrderRequest) -> Result<Order, AdapterError> {
        self.ensure_connected().await?;
        let order_id = request
            .order_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        if self.store.get_order(&order_id).is_some() {
            return Err(AdapterError::DuplicateOrderId(order_id));
        }
        let order = Order::from_request(request, order_id);
        self.place_and_track(order).await
    }

    /// Submit a bracket: parent market entry plus protective stop and
    /// target, linked as one OCO group. The protective legs are held
    /// locally as Pending and only routed once the parent reports a
    /// fill, so the group can never add exposure beyond the parent.
    /// Sibling cancellation on a protective fill is best-effort without
    /// venue-native brackets; a short window between fill and cancel
    /// acknowledgement remains.
    pub async fn submit_bracket(
        self: &Arc<Self>,
        request: BracketRequest,
    ) -> Result<BracketLinks, AdapterError> {
        self.ensure_connected().await?;

        let links = BracketLinks {
            parent_id: Uuid::new_v4().to_string(),
            stop_id: Uuid::new_v4().to_string(),
            target_id: Uuid::new_v4().to_string(),
        };
        let exit_side = request.side.opposite();

        let mut parent = Order::from_request(
            OrderRequest::market(
                request.account.clone(),
                request.symbol.clone(),
                request.side,
                request.qty,
            ),
            links.parent_id.clone(),
        );
        parent.bracket = Some(links.clone());

        let mut stop = Order::from_request(
            OrderRequest::stop(
                request.account.clone(),
                request.symbol.clone(),
                exit_side,
                request.qty,
                request.stop_price,
            ),
            links.stop_id.clone(),
        );
        stop.bracket = Some(links.clone());

        let mut target = Order::from_request(
            OrderRequest::limit(
                request.account,
                request.symbol,
                exit_side,
                request.qty,
                request.target_price,
            ),
            links.target_id.clone(),
        );
        target.bracket = Some(links.clone());

        // Children are indexed before the parent goes out so no fill
        // report can race their bookkeeping.
        self.store.insert_order(stop);
        self.store.insert_order(target);

        if let Err(e) = self.place_and_track(parent).await {
            for child in [&links.stop_id, &links.target_id] {
                let _ = self.store.set_order_state(child, OrderState::Cancelled);
            }
            return Err(e);
        }

        Ok(links)
    }

    async fn place_and_track(self: &Arc<Self>, order: Order) -> Result<Order, AdapterError> {
        let order_id = order.order_id.clone();
        self.store.insert_order(order.clone());

        if let Err(e) = self.venue.place_order(&order).await {
            if let Some(rejected) = self.store.set_order_state(&order_id, OrderState::Rejected) {
                self.emit(AdapterEvent::OrderUpdated(rejected));
            }
            return Err(e.into());
        }

        let submitted = self
            .store
            .set_order_state(&order_id, OrderState::Working)
            .unwrap_or(order);
        self.emit(AdapterEvent::OrderSubmitted(submitted.clone()));
        self.spawn_fill_task(order_id).await;
        Ok(submitted)
    }

    /// Cancel a working order. Terminal or unknown orders fail loudly
    /// instead of silently succeeding.
    pub async fn cancel_order(&self, order_id: &str) -> Result<(), AdapterError> {
        self.ensure_connected().await?;
        let order = self
            .store
            .get_order(order_id)
            .ok_or_else(|| AdapterError::OrderNotFound(order_id.to_string()))?;
        if !order.is_open() {
            return Err(AdapterError::InvalidOrderState {
                order_id: order_id.to_string(),
                state: order.state,
            });
        }
        self.venue.cancel_order(order_id).await?;
        Ok(())
    }

    /// Replace stop/limit levels on a working order.
    pub async fn modify_order(
        &self,
        order_id: &str,
        limit_price: Option<crate::types::Price>,
        stop_price: Option<crate::types::Price>,
    ) -> Result<(), AdapterError> {
        self.ensure_connected().await?;
        let order = self
            .store
            .get_order(order_id)
            .ok_or_else(|| AdapterError::OrderNotFound(order_id.to_string()))?;
        if !order.is_open() {
            return Err(AdapterError::InvalidOrderState {
                order_id: order_id.to_string(),
                state: order.state,
            });
        }
        self.venue.modify_order(order_id, limit_price, stop_price).await?;
        Ok(())
    }

    /// Cancel every open order in a symbol. Returns how many cancel
    /// requests were accepted.
    pub async fn cancel_all_for_symbol(&self, symbol: &Symbol) -> Result<usize, AdapterError> {
        self.ensure_connected().await?;
        let mut cancelled = 0;
        for order in self.store.open_orders(Some(symbol)) {
            match self.venue.cancel_order(&order.order_id).await {
                Ok(()) => cancelled += 1,
                Err(e) => warn!("cancel of {} failed: {}", order.order_id, e),
            }
        }
        Ok(cancelled)
    }

    // ---- point-in-time queries against the local index; no network ----

    pub fn get_order(&self, order_id: &str) -> Option<Order> {
        self.store.get_order(order_id)
    }

    pub fn open_orders(&self, symbol: Option<&Symbol>) -> Vec<Order> {
        self.store.open_orders(symbol)
    }

    pub fn position(&self, symbol: &Symbol, account: &str) -> Option<Position> {
        self.store.position(symbol, account)
    }

    pub fn positions(&self, account: &str) -> Vec<Position> {
        self.store.positions(account)
    }

    pub fn account(&self, account_id: &str) -> Option<AccountInfo> {
        self.store.account(account_id)
    }

    // ---- session internals ----

    async fn rearm_shutdown(&self) {
        let (tx, _) = watch::channel(false);
        *self.shutdown.lock().await = tx;
    }

    async fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown.lock().await.subscribe()
    }

    /// Signal the current session's tasks and wait (bounded) for them
    /// to drain. Stragglers are aborted.
    async fn teardown_tasks(&self) {
        let _ = self.shutdown.lock().await.send(true);
        let handles: Vec<JoinHandle<()>> = {
            let mut tasks = self.tasks.lock().await;
            tasks.drain(..).collect()
        };
        for handle in handles {
            let abort = handle.abort_handle();
            if tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err() {
                warn!("background task exceeded shutdown grace, aborting");
                abort.abort();
            }
        }
    }

    async fn refresh_accounts(&self) {
        match self.venue.fetch_accounts().await {
            Ok(accounts) => {
                for account in accounts {
                    self.store.upsert_account(account.clone());
                    self.emit(AdapterEvent::AccountUpdated(account));
                }
            }
            Err(e) => warn!("account refresh failed: {}", e),
        }
    }

    /// Data tasks for every active subscription and fill listeners for
    /// every order still open; called on each (re)connect so session
    /// state survives venue outages.
    async fn respawn_session_tasks(self: &Arc<Self>) {
        let rearmed = self.subscriptions.lock().await.rearm_all();
        for (symbol, stop_rx) in rearmed {
            self.spawn_data_task(symbol, stop_rx).await;
        }
        for order in self.store.open_orders(None) {
            self.spawn_fill_task(order.order_id).await;
        }
    }

    fn spawn_health_loop<'a>(
        self: &'a Arc<Self>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
        let adapter = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_receiver().await;
        if *shutdown_rx.borrow() {
            return;
        }
        let interval = self.config.health_check_interval;
        let auto_reconnect = self.config.auto_reconnect;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The interval's first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = adapter.venue.health_check().await {
                            warn!("health check failed: {}", e);
                            if auto_reconnect {
                                let adapter = Arc::clone(&adapter);
                                // Reconnect tears this task down; run it
                                // outside the supervised set.
                                tokio::spawn(async move {
                                    if let Err(e) = adapter.reconnect().await {
                                        error!("auto-reconnect gave up: {}", e);
                                    }
                                });
                                break;
                            }
                        }
                    }
                }
            }
            debug!("health check loop stopped");
        });
        self.tasks.lock().await.push(handle);
        })
    }

    async fn spawn_data_task(self: &Arc<Self>, symbol: Symbol, mut stop_rx: watch::Receiver<bool>) {
        let adapter = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_receiver().await;
        if *shutdown_rx.borrow() || *stop_rx.borrow() {
            return;
        }
        let interval = self.config.data_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => {
                        let kinds = adapter.subscriptions.lock().await.kinds(&symbol);
                        if kinds.is_empty() {
                            break;
                        }
                        let wants_quotes = kinds.iter().any(|k| {
                            matches!(k, MarketDataKind::Last | MarketDataKind::Bid | MarketDataKind::Ask)
                        });
                        if wants_quotes {
                            match adapter.venue.fetch_quote(&symbol).await {
                                Ok(update) => {
                                    adapter.store.mark_positions(&symbol, update.price);
                                    adapter.emit(AdapterEvent::Price(update));
                                }
                                Err(e) => debug!("quote fetch for {} failed: {}", symbol, e),
                            }
                        }
                        if kinds.contains(&MarketDataKind::Bars) {
                            match adapter.venue.fetch_bar(&symbol).await {
                                Ok(Some(bar)) => adapter.emit(AdapterEvent::Bar(bar)),
                                Ok(None) => {}
                                Err(e) => debug!("bar fetch for {} failed: {}", symbol, e),
                            }
                        }
                    }
                }
            }
            debug!("data task for {} stopped", symbol);
        });
        self.tasks.lock().await.push(handle);
    }

    /// Short-lived listener that drives one order to its terminal
    /// state by applying venue execution reports.
    fn spawn_fill_task<'a>(
        self: &'a Arc<Self>,
        order_id: OrderId,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            let adapter = Arc::clone(self);
            let mut shutdown_rx = self.shutdown_receiver().await;
            if *shutdown_rx.borrow() {
                return;
            }

            let handle = tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown_rx.changed() => break,
                        result = adapter.venue.await_execution(&order_id) => {
                            match result {
                                Ok(report) => {
                                    let terminal = report.state.is_terminal();
                                    adapter.process_execution(&order_id, report).await;
                                    if terminal {
                                        break;
                                    }
                                }
                                Err(e) => {
                                    warn!("execution stream for {} ended: {}", order_id, e);
                                    break;
                                }
                            }
                        }
                    }
                }
            });
            self.tasks.lock().await.push(handle);
        })
    }

    async fn process_execution(self: &Arc<Self>, order_id: &str, report: ExecutionReport) {
        let Some(applied) = self.store.apply_execution(&report) else {
            debug!("stale execution report for {} ignored", order_id);
            return;
        };

        self.emit(AdapterEvent::OrderUpdated(applied.order.clone()));
        if let Some(position) = applied.position {
            self.emit(AdapterEvent::PositionUpdated(position));
        }
        if let Some(account) = applied.account {
            self.emit(AdapterEvent::AccountUpdated(account));
        }

        if let Some(links) = applied.order.bracket.clone() {
            let id = applied.order.order_id.as_str();
            if id == links.parent_id {
                if !applied.fill_delta.is_zero() {
                    // Parent traded: route the protective legs.
                    self.activate_bracket_children(&links).await;
                } else if applied.order.state.is_terminal() {
                    // Parent died unfilled: the legs never go out.
                    self.void_bracket_children(&links).await;
                }
            } else if links.is_protective_leg(id) && !applied.fill_delta.is_zero() {
                // A protective leg traded: the group is done; cancel
                // survivors so no exposure is added beyond the parent.
                self.cancel_siblings(&links, id).await;
            }
        }
    }

    async fn activate_bracket_children(self: &Arc<Self>, links: &BracketLinks) {
        for child in [&links.stop_id, &links.target_id] {
            let pending = self
                .store
                .get_order(child)
                .filter(|order| order.state == OrderState::Pending);
            if let Some(order) = pending {
                if let Err(e) = self.place_and_track(order).await {
                    warn!("bracket leg {} failed to route: {}", child, e);
                }
            }
        }
    }

    async fn void_bracket_children(&self, links: &BracketLinks) {
        for child in [&links.stop_id, &links.target_id] {
            if let Some(updated) = self.store.set_order_state(child, OrderState::Cancelled) {
                self.emit(AdapterEvent::OrderUpdated(updated));
            }
        }
    }

    async fn cancel_siblings(&self, links: &BracketLinks, triggered: &str) {
        for sibling in links.siblings(triggered) {
            let open = self
                .store
                .get_order(&sibling)
                .map_or(false, |order| order.is_open());
            if open {
                if let Err(e) = self.venue.cancel_order(&sibling).await {
                    warn!("bracket sibling cancel for {} failed: {}", sibling, e);
                }
            }
        }
    }
}
