use crate::core::events::{
    AccountInfo, Bar, ExecutionReport, MarketDataKind, Order, OrderState, OrderType, PriceUpdate,
};
use crate::traits::venue::{VenueError, VenueSession};
use crate::types::{Price, Symbol};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

/// Knobs for the simulated venue. Failure injection drives the
/// reconnect tests.
#[derive(Debug, Clone)]
pub struct SimulatedVenueConfig {
    pub account_id: String,
    pub buying_power: Decimal,
    /// Start price per symbol; `default_start_price` otherwise.
    pub start_prices: HashMap<String, Decimal>,
    pub default_start_price: Decimal,
    pub tick_size: Decimal,
    /// Largest per-quote move, in ticks.
    pub walk_step_ticks: i64,
    /// Seed for the deterministic price walk.
    pub seed: u64,
    pub bar_interval: Duration,
    /// Delay before a market order fills.
    pub fill_delay: Duration,
    /// Poll cadence for resting stop/limit orders.
    pub fill_poll_interval: Duration,
    /// Fail this many connect calls before succeeding.
    pub fail_first_connects: u32,
    /// Start failing health probes after this many successes.
    pub fail_health_after: Option<u32>,
}

impl Default for SimulatedVenueConfig {
    fn default() -> Self {
        Self {
            account_id: "SIM-001".to_string(),
            buying_power: Decimal::new(100_000, 0),
            start_prices: HashMap::new(),
            default_start_price: Decimal::new(4500, 0),
            tick_size: Decimal::new(25, 2), // 0.25
            walk_step_ticks: 4,
            seed: 42,
            bar_interval: Duration::from_secs(5),
            fill_delay: Duration::from_millis(50),
            fill_poll_interval: Duration::from_millis(20),
            fail_first_connects: 0,
            fail_health_after: None,
        }
    }
}

struct RestingOrder {
    order: Order,
    cancelled: bool,
    placed_at: DateTime<Utc>,
}

struct BarAccumulator {
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    started: DateTime<Utc>,
}

/// Venue capability backed by a deterministic random-walk simulation.
///
/// Resting orders survive disconnects, the way a real broker keeps
/// working orders server-side while a session is down.
pub struct SimulatedVenue {
    config: SimulatedVenueConfig,
    connected: AtomicBool,
    connect_calls: AtomicU32,
    health_successes: AtomicU32,
    rng_state: AtomicU64,
    last_prices: DashMap<String, Decimal>,
    resting: DashMap<String, RestingOrder>,
    bars: DashMap<String, BarAccumulator>,
}

impl SimulatedVenue {
    pub fn new(config: SimulatedVenueConfig) -> Self {
        let seed = config.seed | 1;
        Self {
            config,
            connected: AtomicBool::new(false),
            connect_calls: AtomicU32::new(0),
            health_successes: AtomicU32::new(0),
            rng_state: AtomicU64::new(seed),
            last_prices: DashMap::new(),
            resting: DashMap::new(),
            bars: DashMap::new(),
        }
    }

    fn require_connected(&self) -> Result<(), VenueError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(VenueError::Unavailable("session not connected".to_string()))
        }
    }

    // Deterministic LCG; good enough for a price walk.
    fn next_rand(&self) -> u64 {
        let mut state = self.rng_state.load(Ordering::Relaxed);
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.rng_state.store(state, Ordering::Relaxed);
        state >> 33
    }

    fn start_price(&self, symbol: &Symbol) -> Decimal {
        self.config
            .start_prices
            .get(symbol.as_str())
            .copied()
            .unwrap_or(self.config.default_start_price)
    }

    fn last_price(&self, symbol: &Symbol) -> Decimal {
        self.last_prices
            .get(symbol.as_str())
            .map(|entry| *entry.value())
            .unwrap_or_else(|| self.start_price(symbol))
    }

    fn step_price(&self, symbol: &Symbol) -> Decimal {
        let span = (self.config.walk_step_ticks * 2 + 1) as u64;
        let ticks = (self.next_rand() % span) as i64 - self.config.walk_step_ticks;
        let step = self.config.tick_size * Decimal::from(ticks);
        let mut entry = self
            .last_prices
            .entry(symbol.as_str().to_string())
            .or_insert_with(|| self.start_price(symbol));
        *entry += step;
        *entry
    }

    fn fill_report(order: &Order, price: Decimal) -> ExecutionReport {
        ExecutionReport {
            order_id: order.order_id.clone(),
            state: OrderState::Filled,
            filled_qty: order.qty.abs(),
            fill_price: Some(Price::new(price)),
            reason: None,
            timestamp: Utc::now(),
        }
    }

    /// Trigger/limit check for a resting order against the last price.
    fn crossing_price(order: &Order, last: Decimal) -> Option<Decimal> {
        use crate::core::events::OrderSide;
        match order.order_type {
            OrderType::Market => Some(last),
            OrderType::Limit => {
                let limit = order.limit_price?.value();
                match order.side {
                    OrderSide::Buy if last <= limit => Some(limit),
                    OrderSide::Sell if last >= limit => Some(limit),
                    _ => None,
                }
            }
            OrderType::Stop => {
                let stop = order.stop_price?.value();
                match order.side {
                    OrderSide::Buy if last >= stop => Some(stop),
                    OrderSide::Sell if last <= stop => Some(stop),
                    _ => None,
                }
            }
        }
    }
}

#[async_trait]
impl VenueSession for SimulatedVenue {
    async fn connect(&self) -> Result<(), VenueError> {
        let attempt = self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if attempt < self.config.fail_first_connects {
            return Err(VenueError::ConnectionFailed(format!(
                "simulated connect failure ({} of {})",
                attempt + 1,
                self.config.fail_first_connects
            )));
        }
        if self.connected.swap(true, Ordering::SeqCst) {
            return Err(VenueError::ConnectionFailed(
                "session already connected".to_string(),
            ));
        }
        debug!("simulated venue connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), VenueError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn health_check(&self) -> Result<(), VenueError> {
        self.require_connected()?;
        if let Some(threshold) = self.config.fail_health_after {
            if self.health_successes.load(Ordering::SeqCst) >= threshold {
                return Err(VenueError::Unavailable(
                    "simulated health probe failure".to_string(),
                ));
            }
        }
        self.health_successes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn fetch_quote(&self, symbol: &Symbol) -> Result<PriceUpdate, VenueError> {
        self.require_connected()?;
        let price = self.step_price(symbol);
        let now = Utc::now();

        // Feed the bar accumulator from the same walk.
        let mut acc = self
            .bars
            .entry(symbol.as_str().to_string())
            .or_insert_with(|| BarAccumulator {
                open: price,
                high: price,
                low: price,
                close: price,
                started: now,
            });
        acc.high = acc.high.max(price);
        acc.low = acc.low.min(price);
        acc.close = price;

        Ok(PriceUpdate {
            symbol: symbol.clone(),
            kind: MarketDataKind::Last,
            price: Price::new(price),
            timestamp: now,
        })
    }

    async fn fetch_bar(&self, symbol: &Symbol) -> Result<Option<Bar>, VenueError> {
        self.require_connected()?;
        let now = Utc::now();
        let interval = chrono::Duration::from_std(self.config.bar_interval)
            .unwrap_or_else(|_| chrono::Duration::seconds(5));

        let mut acc = match self.bars.get_mut(symbol.as_str()) {
            Some(acc) => acc,
            None => return Ok(None),
        };
        if now.signed_duration_since(acc.started) < interval {
            return Ok(None);
        }

        let bar = Bar {
            symbol: symbol.clone(),
            open: Price::new(acc.open),
            high: Price::new(acc.high),
            low: Price::new(acc.low),
            close: Price::new(acc.close),
            start: acc.started,
            end: now,
        };

        // Next bar opens at the previous close.
        acc.open = acc.close;
        acc.high = acc.close;
        acc.low = acc.close;
        acc.started = now;

        Ok(Some(bar))
    }

    async fn place_order(&self, order: &Order) -> Result<(), VenueError> {
        self.require_connected()?;
        if order.qty.is_zero() {
            return Err(VenueError::OrderRejected("zero quantity".to_string()));
        }
        self.resting.insert(
            order.order_id.clone(),
            RestingOrder {
                order: order.clone(),
                cancelled: false,
                placed_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), VenueError> {
        self.require_connected()?;
        match self.resting.get_mut(order_id) {
            Some(mut entry) => {
                entry.cancelled = true;
                Ok(())
            }
            None => Err(VenueError::UnknownOrder(order_id.to_string())),
        }
    }

    async fn modify_order(
        &self,
        order_id: &str,
        limit_price: Option<Price>,
        stop_price: Option<Price>,
    ) -> Result<(), VenueError> {
        self.require_connected()?;
        match self.resting.get_mut(order_id) {
            Some(mut entry) => {
                if entry.cancelled {
                    return Err(VenueError::UnknownOrder(order_id.to_string()));
                }
                if let Some(limit) = limit_price {
                    entry.order.limit_price = Some(limit);
                }
                if let Some(stop) = stop_price {
                    entry.order.stop_price = Some(stop);
                }
                Ok(())
            }
            None => Err(VenueError::UnknownOrder(order_id.to_string())),
        }
    }

    async fn await_execution(&self, order_id: &str) -> Result<ExecutionReport, VenueError> {
        loop {
            // While the session is down, reports are simply unavailable;
            // the caller's cancellation signal bounds the overall wait.
            if self.connected.load(Ordering::SeqCst) {
                let verdict = {
                    let entry = self
                        .resting
                        .get(order_id)
                        .ok_or_else(|| VenueError::UnknownOrder(order_id.to_string()))?;

                    if entry.cancelled {
                        Some(ExecutionReport {
                            order_id: order_id.to_string(),
                            state: OrderState::Cancelled,
                            filled_qty: entry.order.filled_qty,
                            fill_price: entry.order.avg_fill_price,
                            reason: Some("cancelled".to_string()),
                            timestamp: Utc::now(),
                        })
                    } else {
                        let delay_elapsed = Utc::now()
                            .signed_duration_since(entry.placed_at)
                            .to_std()
                            .map(|d| d >= self.config.fill_delay)
                            .unwrap_or(false);
                        if delay_elapsed {
                            let last = self.last_price(&entry.order.symbol);
                            Self::crossing_price(&entry.order, last)
                                .map(|price| Self::fill_report(&entry.order, price))
                        } else {
                            None
                        }
                    }
                };

                if let Some(report) = verdict {
                    self.resting.remove(order_id);
                    return Ok(report);
                }
            }

            tokio::time::sleep(self.config.fill_poll_interval).await;
        }
    }

    async fn fetch_accounts(&self) -> Result<Vec<AccountInfo>, VenueError> {
        self.require_connected()?;
        Ok(vec![AccountInfo {
            account_id: self.config.account_id.clone(),
            buying_power: self.config.buying_power,
            cash: self.config.buying_power,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            updated_at: Utc::now(),
        }])
    }
}
