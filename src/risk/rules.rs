use crate::core::events::{AccountInfo, Position};
use crate::strategy::config::StrategyConfig;
use crate::traits::predictor::TradeSignal;
use crate::types::Qty;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A withheld action. Not an error: gating out an entry is normal
/// operation, reported at warn level and otherwise dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskRejection {
    pub rule: String,
    pub details: String,
    pub timestamp: DateTime<Utc>,
}

impl RiskRejection {
    pub fn new(rule: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            details: details.into(),
            timestamp: Utc::now(),
        }
    }
}

impl std::fmt::Display for RiskRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.rule, self.details)
    }
}

/// Rolling counters for the current UTC trading day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyStats {
    pub day: NaiveDate,
    pub realized_pnl: Decimal,
    pub trades_entered: u32,
    pub max_drawdown: Decimal,
    pub breaker_tripped: bool,
    peak_pnl: Decimal,
}

impl DailyStats {
    pub fn new(day: NaiveDate) -> Self {
        Self {
            day,
            realized_pnl: Decimal::ZERO,
            trades_entered: 0,
            max_drawdown: Decimal::ZERO,
            breaker_tripped: false,
            peak_pnl: Decimal::ZERO,
        }
    }

    /// Reset counters when the UTC day has changed. Returns the closed
    /// day's stats so the caller can emit a summary.
    pub fn roll_over(&mut self, today: NaiveDate) -> Option<DailyStats> {
        if today == self.day {
            return None;
        }
        let closed = self.clone();
        *self = DailyStats::new(today);
        Some(closed)
    }

    pub fn add_realized(&mut self, delta: Decimal) {
        self.realized_pnl += delta;
        if self.realized_pnl > self.peak_pnl {
            self.peak_pnl = self.realized_pnl;
        }
        let drawdown = self.peak_pnl - self.realized_pnl;
        if drawdown > self.max_drawdown {
            self.max_drawdown = drawdown;
        }
    }

    pub fn record_entry(&mut self) {
        self.trades_entered += 1;
    }

    /// Daily loss at or beyond `limit_amount` (a positive number).
    pub fn loss_limit_reached(&self, limit_amount: Decimal) -> bool {
        self.realized_pnl <= -limit_amount
    }
}

/// Stateless gating checks consulted by the evaluation engine before
/// any order is allowed out.
pub struct RiskGate;

impl RiskGate {
    /// Dollar amount at which the daily circuit breaker trips.
    pub fn daily_loss_limit(config: &StrategyConfig, account: &AccountInfo) -> Decimal {
        account.buying_power * config.max_daily_loss_pct / Decimal::new(100, 0)
    }

    /// Gates that apply before the predictor is even consulted.
    pub fn check_entry_preconditions(
        config: &StrategyConfig,
        daily: &DailyStats,
        account: &AccountInfo,
        open_positions: usize,
        existing: Option<&Position>,
    ) -> Result<(), RiskRejection> {
        let limit = Self::daily_loss_limit(config, account);
        if daily.loss_limit_reached(limit) {
            return Err(RiskRejection::new(
                "DailyLossLimit",
                format!(
                    "daily P&L {} at or beyond loss limit {}",
                    daily.realized_pnl, limit
                ),
            ));
        }

        if open_positions >= config.max_concurrent_positions {
            return Err(RiskRejection::new(
                "MaxConcurrentPositions",
                format!(
                    "{} open positions, limit {}",
                    open_positions, config.max_concurrent_positions
                ),
            ));
        }

        if let Some(position) = existing {
            if !position.is_flat() {
                return Err(RiskRejection::new(
                    "ExistingPosition",
                    format!(
                        "already {:?} {} in {}",
                        position.direction,
                        position.qty.abs(),
                        position.symbol
                    ),
                ));
            }
        }

        Ok(())
    }

    /// Confidence gate applied to the predictor's output.
    pub fn check_confidence(
        config: &StrategyConfig,
        signal: &TradeSignal,
    ) -> Result<(), RiskRejection> {
        if signal.confidence < config.entry_confidence_threshold {
            return Err(RiskRejection::new(
                "ConfidenceThreshold",
                format!(
                    "confidence {:.3} below threshold {:.3}",
                    signal.confidence, config.entry_confidence_threshold
                ),
            ));
        }
        Ok(())
    }

    /// Per-order risk as a percent of buying power.
    pub fn order_risk_pct(
        stop_distance: Decimal,
        qty: Qty,
        contract_multiplier: Decimal,
        buying_power: Decimal,
    ) -> Decimal {
        if buying_power <= Decimal::ZERO {
            return Decimal::MAX;
        }
        let risk_dollars = stop_distance.abs() * qty.abs().value() * contract_multiplier;
        risk_dollars / buying_power * Decimal::new(100, 0)
    }

    /// Proposed risk must fit within the configured risk-per-trade
    /// percent. Oversized signals are rejected, never resized.
    pub fn check_order_risk(
        config: &StrategyConfig,
        account: &AccountInfo,
        stop_distance: Decimal,
        qty: Qty,
    ) -> Result<(), RiskRejection> {
        let pct = Self::order_risk_pct(
            stop_distance,
            qty,
            config.contract_multiplier,
            account.buying_power,
        );
        if pct > config.risk_per_trade_pct {
            return Err(RiskRejection::new(
                "RiskPerTrade",
                format!(
                    "proposed risk {:.2}% exceeds limit {}%",
                    pct, config.risk_per_trade_pct
                ),
            ));
        }
        Ok(())
    }
}
