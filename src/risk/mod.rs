pub mod rules;

pub use rules::{DailyStats, RiskGate, RiskRejection};
