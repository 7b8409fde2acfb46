use crate::core::events::{AccountInfo, Bar, ExecutionReport, Order, OrderId, PriceUpdate};
use crate::types::{Price, Symbol};
use async_trait::async_trait;

/// Error reported by a venue session implementation.
#[derive(Debug, thiserror::Error)]
pub enum VenueError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("venue unavailable: {0}")]
    Unavailable(String),

    #[error("order rejected: {0}")]
    OrderRejected(String),

    #[error("unknown order: {0}")]
    UnknownOrder(OrderId),

    #[error("venue error: {0}")]
    Other(String),
}

/// Capability interface to the execution venue.
///
/// The adapter is written against this trait only; it behaves the same
/// whether the implementation is a real broker session or a simulation.
/// The choice is made at construction time, never inferred from the
/// runtime environment.
#[async_trait]
pub trait VenueSession: Send + Sync {
    /// Establish the session. A second call on a live session is a
    /// venue-level error.
    async fn connect(&self) -> Result<(), VenueError>;

    /// Tear the session down. Idempotent.
    async fn disconnect(&self) -> Result<(), VenueError>;

    /// Lightweight liveness probe. `Ok` means the session is usable.
    async fn health_check(&self) -> Result<(), VenueError>;

    /// Latest quote for a symbol.
    async fn fetch_quote(&self, symbol: &Symbol) -> Result<PriceUpdate, VenueError>;

    /// Next completed bar for a symbol, if one has closed since the
    /// previous call.
    async fn fetch_bar(&self, symbol: &Symbol) -> Result<Option<Bar>, VenueError>;

    /// Route an order. The order id is already assigned by the caller.
    async fn place_order(&self, order: &Order) -> Result<(), VenueError>;

    /// Cancel a resting order.
    async fn cancel_order(&self, order_id: &str) -> Result<(), VenueError>;

    /// Replace the trigger/limit levels of a resting order.
    async fn modify_order(
        &self,
        order_id: &str,
        limit_price: Option<Price>,
        stop_price: Option<Price>,
    ) -> Result<(), VenueError>;

    /// Wait for the next execution report for `order_id`. Resolves on
    /// every state change (partial fill, fill, cancel, reject); callers
    /// bound the wait with their own cancellation signal.
    async fn await_execution(&self, order_id: &str) -> Result<ExecutionReport, VenueError>;

    /// Accounts visible to this session.
    async fn fetch_accounts(&self) -> Result<Vec<AccountInfo>, VenueError>;
}
