use crate::types::{Price, Qty, Symbol};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::Signed;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Account identifier
pub type AccountId = String;

/// Order identifier
pub type OrderId = String;

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    /// +1 for Buy, -1 for Sell.
    pub fn sign(&self) -> rust_decimal::Decimal {
        match self {
            OrderSide::Buy => rust_decimal::Decimal::ONE,
            OrderSide::Sell => -rust_decimal::Decimal::ONE,
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
    Stop,
}

/// Market data kind a subscription covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketDataKind {
    Last,
    Bid,
    Ask,
    Bars,
}

/// Connection state of the venue session. Owned exclusively by the
/// adapter; the single source of truth for whether venue calls are safe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Reconnecting => "Reconnecting",
            ConnectionState::Error => "Error",
        };
        write!(f, "{}", s)
    }
}

/// Order lifecycle state. Transitions are monotonic: once terminal,
/// an order never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderState {
    Pending,
    Working,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderState::Filled | OrderState::Cancelled | OrderState::Rejected
        )
    }

    /// Still cancellable/modifiable at the venue.
    pub fn is_open(&self) -> bool {
        matches!(self, OrderState::Working | OrderState::PartiallyFilled)
    }

    /// Whether the state machine admits `next` from `self`.
    pub fn can_transition_to(&self, next: OrderState) -> bool {
        if *self == next {
            return false;
        }
        match self {
            OrderState::Pending => matches!(
                next,
                OrderState::Working | OrderState::Cancelled | OrderState::Rejected
            ),
            OrderState::Working => matches!(
                next,
                OrderState::PartiallyFilled
                    | OrderState::Filled
                    | OrderState::Cancelled
                    | OrderState::Rejected
            ),
            OrderState::PartiallyFilled => {
                matches!(next, OrderState::Filled | OrderState::Cancelled)
            }
            OrderState::Filled | OrderState::Cancelled | OrderState::Rejected => false,
        }
    }
}

/// Parent/stop/target linkage for a bracket (OCO) group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BracketLinks {
    pub parent_id: OrderId,
    pub stop_id: OrderId,
    pub target_id: OrderId,
}

impl BracketLinks {
    /// The other orders of the group, seen from `own_id`.
    pub fn siblings(&self, own_id: &str) -> SmallVec<[OrderId; 2]> {
        let mut out = SmallVec::new();
        for id in [&self.parent_id, &self.stop_id, &self.target_id] {
            if id != own_id {
                out.push(id.clone());
            }
        }
        out
    }

    /// True when `id` is the stop or target leg, not the entry.
    pub fn is_protective_leg(&self, id: &str) -> bool {
        self.stop_id == id || self.target_id == id
    }
}

/// Request to create a new order. The adapter assigns `order_id`
/// when absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub order_id: Option<OrderId>,
    pub account: AccountId,
    pub symbol: Symbol,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub qty: Qty,
    pub limit_price: Option<Price>,
    pub stop_price: Option<Price>,
}

impl OrderRequest {
    pub fn market(
        account: impl Into<AccountId>,
        symbol: impl Into<Symbol>,
        side: OrderSide,
        qty: Qty,
    ) -> Self {
        Self {
            order_id: None,
            account: account.into(),
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            qty,
            limit_price: None,
            stop_price: None,
        }
    }

    pub fn limit(
        account: impl Into<AccountId>,
        symbol: impl Into<Symbol>,
        side: OrderSide,
        qty: Qty,
        limit_price: Price,
    ) -> Self {
        Self {
            order_id: None,
            account: account.into(),
            symbol: symbol.into(),
            side,
            order_type: OrderType::Limit,
            qty,
            limit_price: Some(limit_price),
            stop_price: None,
        }
    }

    pub fn stop(
        account: impl Into<AccountId>,
        symbol: impl Into<Symbol>,
        side: OrderSide,
        qty: Qty,
        stop_price: Price,
    ) -> Self {
        Self {
            order_id: None,
            account: account.into(),
            symbol: symbol.into(),
            side,
            order_type: OrderType::Stop,
            qty,
            limit_price: None,
            stop_price: Some(stop_price),
        }
    }
}

/// Bracket (OCO) submission: a parent entry plus protective stop and
/// target legs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BracketRequest {
    pub account: AccountId,
    pub symbol: Symbol,
    pub side: OrderSide,
    pub qty: Qty,
    pub stop_price: Price,
    pub target_price: Price,
}

/// An order as tracked by the adapter's store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: OrderId,
    pub account: AccountId,
    pub symbol: Symbol,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub qty: Qty,
    pub limit_price: Option<Price>,
    pub stop_price: Option<Price>,
    pub state: OrderState,
    pub filled_qty: Qty,
    pub avg_fill_price: Option<Price>,
    pub bracket: Option<BracketLinks>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn from_request(request: OrderRequest, order_id: OrderId) -> Self {
        let now = Utc::now();
        Self {
            order_id,
            account: request.account,
            symbol: request.symbol,
            side: request.side,
            order_type: request.order_type,
            qty: request.qty,
            limit_price: request.limit_price,
            stop_price: request.stop_price,
            state: OrderState::Pending,
            filled_qty: Qty::ZERO,
            avg_fill_price: None,
            bracket: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn remaining_qty(&self) -> Qty {
        self.qty - self.filled_qty
    }

    pub fn is_open(&self) -> bool {
        self.state.is_open()
    }
}

/// Venue-reported lifecycle event for one order. Applied by the adapter
/// to its local index; never consumed directly by the strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub order_id: OrderId,
    pub state: OrderState,
    /// Cumulative filled quantity as reported by the venue.
    pub filled_qty: Qty,
    pub fill_price: Option<Price>,
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// A single market data tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceUpdate {
    pub symbol: Symbol,
    pub kind: MarketDataKind,
    pub price: Price,
    pub timestamp: DateTime<Utc>,
}

/// A completed OHLC bar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: Symbol,
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub close: Price,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Directional exposure of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionDirection {
    Flat,
    Long,
    Short,
}

/// A position keyed by (symbol, account). Quantity is signed; the
/// direction tag always agrees with the sign and is Flat iff zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: Symbol,
    pub account: AccountId,
    pub direction: PositionDirection,
    pub qty: Qty,
    pub avg_entry_price: Option<Price>,
    pub realized_pnl: rust_decimal::Decimal,
    pub unrealized_pnl: rust_decimal::Decimal,
    pub opened_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    pub fn flat(symbol: Symbol, account: AccountId) -> Self {
        Self {
            symbol,
            account,
            direction: PositionDirection::Flat,
            qty: Qty::ZERO,
            avg_entry_price: None,
            realized_pnl: rust_decimal::Decimal::ZERO,
            unrealized_pnl: rust_decimal::Decimal::ZERO,
            opened_at: None,
            updated_at: Utc::now(),
        }
    }

    pub fn is_flat(&self) -> bool {
        self.direction == PositionDirection::Flat
    }

    /// Invariant check: Flat iff qty == 0, and direction matches sign.
    pub fn direction_consistent(&self) -> bool {
        match self.direction {
            PositionDirection::Flat => self.qty.is_zero(),
            PositionDirection::Long => self.qty.value() > rust_decimal::Decimal::ZERO,
            PositionDirection::Short => self.qty.value() < rust_decimal::Decimal::ZERO,
        }
    }

    fn direction_for(qty: Qty) -> PositionDirection {
        if qty.is_zero() {
            PositionDirection::Flat
        } else if qty.value() > rust_decimal::Decimal::ZERO {
            PositionDirection::Long
        } else {
            PositionDirection::Short
        }
    }

    /// Apply a confirmed fill. Returns the realized P&L delta produced
    /// by any closing portion.
    pub fn apply_fill(
        &mut self,
        side: OrderSide,
        fill_qty: Qty,
        fill_price: Price,
        multiplier: rust_decimal::Decimal,
    ) -> rust_decimal::Decimal {
        let delta = fill_qty.abs() * side.sign();
        let old_qty = self.qty.value();
        let mut realized = rust_decimal::Decimal::ZERO;

        if old_qty.is_zero() || old_qty.signum() == delta.signum() {
            // Opening or adding: weighted average entry price.
            let old_notional = match self.avg_entry_price {
                Some(avg) => old_qty.abs() * avg.value(),
                None => rust_decimal::Decimal::ZERO,
            };
            let add_abs = delta.abs().value();
            let add_notional = add_abs * fill_price.value();
            let new_abs = old_qty.abs() + add_abs;
            self.avg_entry_price = Some(Price::new((old_notional + add_notional) / new_abs));
            if old_qty.is_zero() {
                self.opened_at = Some(Utc::now());
            }
            self.qty = Qty::new(old_qty + delta.value());
        } else {
            // Reducing, closing, or flipping.
            let close_qty = delta.abs().value().min(old_qty.abs());
            if let Some(avg) = self.avg_entry_price {
                let per_contract = (fill_price.value() - avg.value()) * old_qty.signum();
                realized = per_contract * close_qty * multiplier;
                self.realized_pnl += realized;
            }
            let remainder = delta.abs().value() - close_qty;
            let new_qty = old_qty + delta.value();
            self.qty = Qty::new(new_qty);
            if new_qty.is_zero() {
                self.avg_entry_price = None;
                self.opened_at = None;
                self.unrealized_pnl = rust_decimal::Decimal::ZERO;
            } else if remainder > rust_decimal::Decimal::ZERO {
                // Flipped through flat: remainder opens a fresh position.
                self.avg_entry_price = Some(fill_price);
                self.opened_at = Some(Utc::now());
            }
        }

        self.direction = Self::direction_for(self.qty);
        self.updated_at = Utc::now();
        debug_assert!(self.direction_consistent());
        realized
    }

    /// Mark the position against the latest price.
    pub fn mark(&mut self, last_price: Price, multiplier: rust_decimal::Decimal) {
        if let Some(avg) = self.avg_entry_price {
            self.unrealized_pnl = (last_price.value() - avg.value()) * self.qty.value() * multiplier;
        } else {
            self.unrealized_pnl = rust_decimal::Decimal::ZERO;
        }
        self.updated_at = Utc::now();
    }
}

/// Account snapshot. Total P&L is derived, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub account_id: AccountId,
    pub buying_power: rust_decimal::Decimal,
    pub cash: rust_decimal::Decimal,
    pub realized_pnl: rust_decimal::Decimal,
    pub unrealized_pnl: rust_decimal::Decimal,
    pub updated_at: DateTime<Utc>,
}

impl AccountInfo {
    pub fn total_pnl(&self) -> rust_decimal::Decimal {
        self.realized_pnl + self.unrealized_pnl
    }
}

/// Event published on the adapter's bus. Per symbol and per order,
/// delivery order follows the emitting task's publish order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdapterEvent {
    ConnectionStateChanged {
        old: ConnectionState,
        new: ConnectionState,
        reason: String,
    },
    Price(PriceUpdate),
    Bar(Bar),
    OrderSubmitted(Order),
    OrderUpdated(Order),
    PositionUpdated(Position),
    AccountUpdated(AccountInfo),
    Error {
        message: String,
        fatal: bool,
    },
}
