pub mod alerts;
pub mod metrics;

pub use alerts::{AlertBus, AuditRecord, AuditTrail, NotificationEvent};
pub use metrics::{PerformanceMetrics, PerformanceTracker, PredictionRecord, TradeOutcome};
