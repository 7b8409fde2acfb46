pub mod adapter;
pub mod core;
pub mod logging;
pub mod monitoring;
pub mod risk;
pub mod strategy;
pub mod traits;
pub mod types;

pub use adapter::{AdapterConfig, AdapterError, ConnectionAdapter, SimulatedVenue, SimulatedVenueConfig};
pub use core::events::{
    AccountInfo, AdapterEvent, Bar, BracketLinks, BracketRequest, ConnectionState, ExecutionReport,
    MarketDataKind, Order, OrderId, OrderRequest, OrderSide, OrderState, OrderType, Position,
    PositionDirection, PriceUpdate,
};
pub use logging::init_logging;
pub use monitoring::{
    AlertBus, AuditRecord, AuditTrail, NotificationEvent, PerformanceMetrics, PerformanceTracker,
    PredictionRecord, TradeOutcome,
};
pub use risk::{DailyStats, RiskGate, RiskRejection};
pub use strategy::{
    ConfigError, EngineState, MarketContext, MomentumPredictor, MomentumPredictorConfig, Regime,
    StrategyConfig, StrategyEngine, StrategyError,
};
pub use traits::{
    PositionScaleSignal, Predictor, ScaleAction, TradeSignal, VenueError, VenueSession,
};
pub use types::{Price, Qty, Symbol};
