use crate::core::events::{AccountId, OrderSide, PositionDirection};
use crate::types::{Price, Qty, Symbol};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A completed round trip, emitted when a position returns to flat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub symbol: Symbol,
    pub account: AccountId,
    pub direction: PositionDirection,
    pub qty: Qty,
    pub entry_price: Price,
    pub exit_price: Price,
    pub realized_pnl: Decimal,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
}

/// One predictor consultation that produced a signal, for offline
/// model evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub symbol: Symbol,
    pub side: OrderSide,
    pub confidence: f64,
    pub reason: String,
    /// Whether the signal survived gating and was executed.
    pub executed: bool,
    pub timestamp: DateTime<Utc>,
}

/// Aggregated strategy performance, the `performance_metrics()` answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_trades: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,
    pub win_rate: f64,
    pub gross_profit: Decimal,
    pub gross_loss: Decimal,
    pub net_pnl: Decimal,
    /// gross_profit / gross_loss; None until there is a losing trade.
    pub profit_factor: Option<f64>,
    pub max_drawdown: Decimal,
    pub consecutive_wins: u32,
    pub consecutive_losses: u32,
    pub max_consecutive_wins: u32,
    pub max_consecutive_losses: u32,
    pub updated_at: DateTime<Utc>,
}

/// Rolls trade outcomes into the running metric set.
#[derive(Debug, Clone)]
pub struct PerformanceTracker {
    total_trades: u32,
    winning_trades: u32,
    losing_trades: u32,
    gross_profit: Decimal,
    gross_loss: Decimal,
    net_pnl: Decimal,
    equity_peak: Decimal,
    max_drawdown: Decimal,
    consecutive_wins: u32,
    consecutive_losses: u32,
    max_consecutive_wins: u32,
    max_consecutive_losses: u32,
    updated_at: DateTime<Utc>,
}

impl PerformanceTracker {
    pub fn new() -> Self {
        Self {
            total_trades: 0,
            winning_trades: 0,
            losing_trades: 0,
            gross_profit: Decimal::ZERO,
            gross_loss: Decimal::ZERO,
            net_pnl: Decimal::ZERO,
            equity_peak: Decimal::ZERO,
            max_drawdown: Decimal::ZERO,
            consecutive_wins: 0,
            consecutive_losses: 0,
            max_consecutive_wins: 0,
            max_consecutive_losses: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn record(&mut self, outcome: &TradeOutcome) {
        self.total_trades += 1;
        self.net_pnl += outcome.realized_pnl;

        if outcome.realized_pnl > Decimal::ZERO {
            self.winning_trades += 1;
            self.gross_profit += outcome.realized_pnl;
            self.consecutive_wins += 1;
            self.consecutive_losses = 0;
            if self.consecutive_wins > self.max_consecutive_wins {
                self.max_consecutive_wins = self.consecutive_wins;
            }
        } else if outcome.realized_pnl < Decimal::ZERO {
            self.losing_trades += 1;
            self.gross_loss += -outcome.realized_pnl;
            self.consecutive_losses += 1;
            self.consecutive_wins = 0;
            if self.consecutive_losses > self.max_consecutive_losses {
                self.max_consecutive_losses = self.consecutive_losses;
            }
        } else {
            // Scratch trade: breaks both streaks.
            self.consecutive_wins = 0;
            self.consecutive_losses = 0;
        }

        if self.net_pnl > self.equity_peak {
            self.equity_peak = self.net_pnl;
        }
        let drawdown = self.equity_peak - self.net_pnl;
        if drawdown > self.max_drawdown {
            self.max_drawdown = drawdown;
        }
        self.updated_at = Utc::now();
    }

    pub fn metrics(&self) -> PerformanceMetrics {
        let win_rate = if self.total_trades > 0 {
            self.winning_trades as f64 / self.total_trades as f64
        } else {
            0.0
        };
        let profit_factor = if self.gross_loss > Decimal::ZERO {
            (self.gross_profit / self.gross_loss).to_f64()
        } else {
            None
        };
        PerformanceMetrics {
            total_trades: self.total_trades,
            winning_trades: self.winning_trades,
            losing_trades: self.losing_trades,
            win_rate,
            gross_profit: self.gross_profit,
            gross_loss: self.gross_loss,
            net_pnl: self.net_pnl,
            profit_factor,
            max_drawdown: self.max_drawdown,
            consecutive_wins: self.consecutive_wins,
            consecutive_losses: self.consecutive_losses,
            max_consecutive_wins: self.max_consecutive_wins,
            max_consecutive_losses: self.max_consecutive_losses,
            updated_at: self.updated_at,
        }
    }
}

impl Default for PerformanceTracker {
    fn default() -> Self {
        Self::new()
    }
}
