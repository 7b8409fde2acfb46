pub mod config;
pub mod context;
pub mod engine;
pub mod momentum;

pub use config::{ConfigError, StrategyConfig};
pub use context::{MarketContext, Regime};
pub use engine::{EngineState, StrategyEngine, StrategyError};
pub use momentum::{MomentumPredictor, MomentumPredictorConfig};
