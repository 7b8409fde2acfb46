use crate::core::events::ConnectionState;
use crate::core::events::OrderSide;
use crate::monitoring::metrics::{PredictionRecord, TradeOutcome};
use crate::traits::predictor::ScaleAction;
use crate::types::{Qty, Symbol};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::warn;

/// Structured event for the external notification sink. The core only
/// produces these; delivery (webhooks, chat, email) lives elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NotificationEvent {
    ConnectionStatus {
        state: ConnectionState,
        reason: String,
    },
    TradeExecuted {
        symbol: Symbol,
        side: OrderSide,
        qty: Qty,
        reason: String,
    },
    CircuitBreakerTripped {
        daily_pnl: Decimal,
        loss_limit: Decimal,
    },
    PositionScaled {
        symbol: Symbol,
        action: ScaleAction,
        qty: Qty,
        new_total: Qty,
        reason: String,
    },
    RiskAlert {
        rule: String,
        details: String,
    },
    DailySummary {
        day: NaiveDate,
        realized_pnl: Decimal,
        trades: u32,
        max_drawdown: Decimal,
    },
    Fatal {
        message: String,
    },
}

/// Record for the external audit/persistence sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AuditRecord {
    Trade(TradeOutcome),
    Prediction(PredictionRecord),
}

/// Non-blocking producer handle for notification events. When no sink
/// is attached the events are simply dropped.
#[derive(Clone)]
pub struct AlertBus {
    tx: mpsc::Sender<NotificationEvent>,
}

impl AlertBus {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<NotificationEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// A bus with no consumer; every emit is a no-op.
    pub fn disabled() -> Self {
        let (tx, _rx) = mpsc::channel(1);
        Self { tx }
    }

    pub fn emit(&self, event: NotificationEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(event)) => {
                warn!("notification sink full, dropping event: {:?}", event);
            }
        }
    }
}

/// Non-blocking producer handle for audit records, same contract as
/// [`AlertBus`].
#[derive(Clone)]
pub struct AuditTrail {
    tx: mpsc::Sender<AuditRecord>,
}

impl AuditTrail {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<AuditRecord>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub fn disabled() -> Self {
        let (tx, _rx) = mpsc::channel(1);
        Self { tx }
    }

    pub fn record(&self, record: AuditRecord) {
        match self.tx.try_send(record) {
            Ok(()) => {}
            Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(record)) => {
                warn!("audit sink full, dropping record: {:?}", record);
            }
        }
    }
}
