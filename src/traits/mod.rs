pub mod predictor;
pub mod venue;

pub use predictor::{PositionScaleSignal, Predictor, ScaleAction, TradeSignal};
pub use venue::{VenueError, VenueSession};
