use crate::core::events::{OrderSide, Position};
use crate::strategy::context::MarketContext;
use crate::types::{Qty, Symbol};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Decision to open a position, produced by a predictor and consumed
/// exactly once by the engine's execution step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeSignal {
    pub symbol: Symbol,
    pub side: OrderSide,
    pub qty: Qty,
    /// Confidence score in [0, 1].
    pub confidence: f64,
    pub reason: String,
    pub metadata: serde_json::Value,
}

impl TradeSignal {
    pub fn new(symbol: Symbol, side: OrderSide, qty: Qty, confidence: f64, reason: impl Into<String>) -> Self {
        Self {
            symbol,
            side,
            qty,
            confidence: confidence.clamp(0.0, 1.0),
            reason: reason.into(),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Direction of a position scale adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScaleAction {
    /// Add to a winning position (pyramiding).
    In,
    /// Take part of the position off.
    Out,
}

/// Decision to scale an existing position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionScaleSignal {
    pub symbol: Symbol,
    pub action: ScaleAction,
    pub qty: Qty,
    pub confidence: f64,
    pub reason: String,
    pub metadata: serde_json::Value,
}

impl PositionScaleSignal {
    pub fn new(symbol: Symbol, action: ScaleAction, qty: Qty, confidence: f64, reason: impl Into<String>) -> Self {
        Self {
            symbol,
            action,
            qty,
            confidence: confidence.clamp(0.0, 1.0),
            reason: reason.into(),
            metadata: serde_json::Value::Null,
        }
    }
}

/// Pluggable decision function. The engine hands it immutable context
/// snapshots and applies its own gating on whatever comes back; how a
/// confidence score is computed is entirely the implementation's
/// business. Implementations need not be deterministic.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Predictor: Send + Sync {
    /// Consulted when flat. `None` means no opportunity this cycle,
    /// which is the expected common case.
    async fn evaluate_entry(&self, context: &MarketContext) -> Option<TradeSignal>;

    /// Consulted first while in a position. A returned signal requests
    /// a full exit.
    async fn evaluate_exit(
        &self,
        context: &MarketContext,
        position: &Position,
    ) -> Option<TradeSignal>;

    /// Consulted after exit declined. May request scale-in or
    /// scale-out of the current position.
    async fn evaluate_scale(
        &self,
        context: &MarketContext,
        position: &Position,
    ) -> Option<PositionScaleSignal>;
}
