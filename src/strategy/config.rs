use crate::core::events::AccountId;
use crate::types::{Qty, Symbol};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration error, surfaced synchronously at initialize and never
/// at runtime.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("symbol must not be empty")]
    EmptySymbol,

    #[error("risk per trade must be in (0, 5] percent, got {0}")]
    RiskPerTradeOutOfRange(Decimal),

    #[error("entry confidence threshold must be in [0.5, 1.0], got {0}")]
    EntryConfidenceOutOfRange(f64),

    #[error("max daily loss percent must be positive, got {0}")]
    MaxDailyLossOutOfRange(Decimal),

    #[error("ATR multiples must be positive (stop {stop}, target {target})")]
    AtrMultiplesInvalid { stop: Decimal, target: Decimal },

    #[error("contract multiplier must be positive, got {0}")]
    ContractMultiplierInvalid(Decimal),

    #[error("order quantity must be positive, got {0}")]
    OrderQtyInvalid(Qty),

    #[error("max concurrent positions must be at least 1")]
    MaxPositionsInvalid,
}

/// Strategy parameters. Immutable while the strategy is running;
/// `StrategyEngine::update_config` refuses changes in the Running state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub symbol: Symbol,
    pub account: AccountId,
    /// Contracts per entry order.
    pub order_qty: Qty,
    /// Entry signals below this confidence are discarded. [0.5, 1.0].
    pub entry_confidence_threshold: f64,
    /// Exit signals below this confidence are ignored.
    pub exit_confidence_threshold: f64,
    /// Percent of buying power a single trade may put at risk. (0, 5].
    pub risk_per_trade_pct: Decimal,
    /// Percent of buying power the daily circuit breaker trips at.
    pub max_daily_loss_pct: Decimal,
    pub max_concurrent_positions: usize,
    pub pyramiding_enabled: bool,
    pub max_pyramid_adds: u32,
    pub stop_atr_multiple: Decimal,
    pub target_atr_multiple: Decimal,
    pub trailing_stop_enabled: bool,
    /// Dollar value of one point of price movement per contract.
    pub contract_multiplier: Decimal,
    pub atr_period: u32,
    /// Cadence of the evaluation loop.
    pub evaluation_interval: Duration,
    /// Minimum time between two evaluations actually running.
    pub min_eval_interval: Duration,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            symbol: Symbol::new("ES"),
            account: "SIM-001".to_string(),
            order_qty: Qty::from_i64(1),
            entry_confidence_threshold: 0.65,
            exit_confidence_threshold: 0.5,
            risk_per_trade_pct: Decimal::ONE,
            max_daily_loss_pct: Decimal::new(3, 0),
            max_concurrent_positions: 3,
            pyramiding_enabled: false,
            max_pyramid_adds: 2,
            stop_atr_multiple: Decimal::new(15, 1), // 1.5
            target_atr_multiple: Decimal::new(3, 0),
            trailing_stop_enabled: false,
            contract_multiplier: Decimal::new(50, 0),
            atr_period: 14,
            evaluation_interval: Duration::from_secs(1),
            min_eval_interval: Duration::from_millis(900),
        }
    }
}

impl StrategyConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.symbol.is_empty() {
            return Err(ConfigError::EmptySymbol);
        }
        if self.risk_per_trade_pct <= Decimal::ZERO || self.risk_per_trade_pct > Decimal::new(5, 0)
        {
            return Err(ConfigError::RiskPerTradeOutOfRange(self.risk_per_trade_pct));
        }
        if !(0.5..=1.0).contains(&self.entry_confidence_threshold) {
            return Err(ConfigError::EntryConfidenceOutOfRange(
                self.entry_confidence_threshold,
            ));
        }
        if self.max_daily_loss_pct <= Decimal::ZERO {
            return Err(ConfigError::MaxDailyLossOutOfRange(self.max_daily_loss_pct));
        }
        if self.stop_atr_multiple <= Decimal::ZERO || self.target_atr_multiple <= Decimal::ZERO {
            return Err(ConfigError::AtrMultiplesInvalid {
                stop: self.stop_atr_multiple,
                target: self.target_atr_multiple,
            });
        }
        if self.contract_multiplier <= Decimal::ZERO {
            return Err(ConfigError::ContractMultiplierInvalid(
                self.contract_multiplier,
            ));
        }
        if self.order_qty.value() <= Decimal::ZERO {
            return Err(ConfigError::OrderQtyInvalid(self.order_qty));
        }
        if self.max_concurrent_positions == 0 {
            return Err(ConfigError::MaxPositionsInvalid);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(StrategyConfig::default().validate().is_ok());
    }

    #[test]
    fn test_empty_symbol_rejected() {
        let mut config = StrategyConfig::default();
        config.symbol = Symbol::new("");
        assert_eq!(config.validate(), Err(ConfigError::EmptySymbol));
    }

    #[test]
    fn test_risk_per_trade_bounds() {
        let mut config = StrategyConfig::default();

        config.risk_per_trade_pct = Decimal::ZERO;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::RiskPerTradeOutOfRange(_))
        ));

        config.risk_per_trade_pct = Decimal::new(51, 1); // 5.1
        assert!(matches!(
            config.validate(),
            Err(ConfigError::RiskPerTradeOutOfRange(_))
        ));

        config.risk_per_trade_pct = Decimal::new(5, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_entry_confidence_bounds() {
        let mut config = StrategyConfig::default();

        config.entry_confidence_threshold = 0.49;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EntryConfidenceOutOfRange(_))
        ));

        config.entry_confidence_threshold = 1.01;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EntryConfidenceOutOfRange(_))
        ));

        config.entry_confidence_threshold = 0.5;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serde_round_trip() {
        let config = StrategyConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: StrategyConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
