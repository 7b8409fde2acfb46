use crate::core::events::{OrderSide, Position, PositionDirection};
use crate::strategy::context::{MarketContext, Regime};
use crate::traits::predictor::{PositionScaleSignal, Predictor, ScaleAction, TradeSignal};
use crate::types::Qty;
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Tuning for the momentum predictor.
#[derive(Debug, Clone)]
pub struct MomentumPredictorConfig {
    pub order_qty: Qty,
    /// Minimum absolute drift across the context window to act on.
    pub min_drift: Decimal,
    /// Drift against the position that triggers an exit.
    pub exit_reversal: Decimal,
    /// Take half off once the move exceeds this many ATRs.
    pub scale_out_atr: Decimal,
}

impl Default for MomentumPredictorConfig {
    fn default() -> Self {
        Self {
            order_qty: Qty::from_i64(1),
            min_drift: Decimal::new(2, 3),      // 0.002
            exit_reversal: Decimal::new(1, 3),  // 0.001
            scale_out_atr: Decimal::new(2, 0),
        }
    }
}

/// Deterministic drift-following predictor. A stand-in for a real
/// model: the engine only ever sees the `Predictor` trait, so swapping
/// in an ML-backed implementation is a construction-time decision.
pub struct MomentumPredictor {
    config: MomentumPredictorConfig,
}

impl MomentumPredictor {
    pub fn new(config: MomentumPredictorConfig) -> Self {
        Self { config }
    }

    /// Confidence grows with drift strength, saturating at 0.95.
    fn confidence_for(&self, drift: Decimal) -> f64 {
        let strength = (drift.abs() / self.config.min_drift)
            .to_f64()
            .unwrap_or(0.0);
        (0.5 + 0.1 * strength).min(0.95)
    }
}

impl Default for MomentumPredictor {
    fn default() -> Self {
        Self::new(MomentumPredictorConfig::default())
    }
}

#[async_trait]
impl Predictor for MomentumPredictor {
    async fn evaluate_entry(&self, context: &MarketContext) -> Option<TradeSignal> {
        if context.regime != Regime::Trending {
            return None;
        }
        let drift = context.drift()?;
        if drift.abs() < self.config.min_drift {
            return None;
        }
        let side = if drift > Decimal::ZERO {
            OrderSide::Buy
        } else {
            OrderSide::Sell
        };
        Some(TradeSignal::new(
            context.symbol.clone(),
            side,
            self.config.order_qty,
            self.confidence_for(drift),
            format!("drift {:.4} in trending regime", drift),
        ))
    }

    async fn evaluate_exit(
        &self,
        context: &MarketContext,
        position: &Position,
    ) -> Option<TradeSignal> {
        let drift = context.drift()?;
        let against = match position.direction {
            PositionDirection::Long => drift <= -self.config.exit_reversal,
            PositionDirection::Short => drift >= self.config.exit_reversal,
            PositionDirection::Flat => false,
        };
        if !against && context.regime != Regime::Volatile {
            return None;
        }
        let reason = if against {
            format!("drift reversed to {:.4}", drift)
        } else {
            "volatile regime".to_string()
        };
        let side = match position.direction {
            PositionDirection::Long => OrderSide::Sell,
            _ => OrderSide::Buy,
        };
        Some(TradeSignal::new(
            context.symbol.clone(),
            side,
            position.qty.abs(),
            0.8,
            reason,
        ))
    }

    async fn evaluate_scale(
        &self,
        context: &MarketContext,
        position: &Position,
    ) -> Option<PositionScaleSignal> {
        let (last, atr) = match (context.last_price, context.atr) {
            (Some(last), Some(atr)) if !atr.is_zero() => (last, atr),
            _ => return None,
        };
        let entry = position.avg_entry_price?;
        // Open profit measured in ATRs, sign-adjusted for shorts.
        let run = (last.value() - entry.value()) * position.qty.signum();
        if run < atr * self.config.scale_out_atr {
            return None;
        }
        let half = (position.qty.abs().value() / Decimal::new(2, 0)).floor();
        if half < Decimal::ONE {
            return None;
        }
        Some(PositionScaleSignal::new(
            context.symbol.clone(),
            ScaleAction::Out,
            Qty::new(half),
            0.7,
            format!("open profit {:.1} ATRs, banking half", run / atr),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::events::{Bar, MarketDataKind, PriceUpdate};
    use crate::types::{Price, Symbol};
    use chrono::Utc;

    fn trending_context(up: bool) -> MarketContext {
        let mut ctx = MarketContext::new(Symbol::new("ES"), 14);
        let mut price = 4500.0;
        for _ in 0..8 {
            price += if up { 4.0 } else { -4.0 };
            let close = format!("{}", price);
            let now = Utc::now();
            ctx.apply_bar(&Bar {
                symbol: Symbol::new("ES"),
                open: Price::from_str(&close).unwrap(),
                high: Price::from_str(&format!("{}", price + 1.0)).unwrap(),
                low: Price::from_str(&format!("{}", price - 1.0)).unwrap(),
                close: Price::from_str(&close).unwrap(),
                start: now,
                end: now,
            });
        }
        ctx.apply_quote(&PriceUpdate {
            symbol: Symbol::new("ES"),
            kind: MarketDataKind::Last,
            price: Price::from_str(&format!("{}", price)).unwrap(),
            timestamp: Utc::now(),
        });
        ctx
    }

    #[tokio::test]
    async fn test_entry_follows_drift_direction() {
        let predictor = MomentumPredictor::default();

        let up = trending_context(true);
        let signal = predictor.evaluate_entry(&up).await.expect("long signal");
        assert_eq!(signal.side, OrderSide::Buy);
        assert!(signal.confidence >= 0.5 && signal.confidence <= 0.95);

        let down = trending_context(false);
        let signal = predictor.evaluate_entry(&down).await.expect("short signal");
        assert_eq!(signal.side, OrderSide::Sell);
    }

    #[tokio::test]
    async fn test_no_entry_without_trend() {
        let predictor = MomentumPredictor::default();
        let ctx = MarketContext::new(Symbol::new("ES"), 14);
        assert!(predictor.evaluate_entry(&ctx).await.is_none());
    }

    #[tokio::test]
    async fn test_exit_on_reversal() {
        let predictor = MomentumPredictor::default();
        let down = trending_context(false);

        let mut position = Position::flat(Symbol::new("ES"), "SIM-001".to_string());
        position.apply_fill(
            OrderSide::Buy,
            Qty::from_i64(2),
            Price::from_str("4500").unwrap(),
            Decimal::ONE,
        );

        let signal = predictor
            .evaluate_exit(&down, &position)
            .await
            .expect("exit on reversal");
        assert_eq!(signal.side, OrderSide::Sell);
        assert_eq!(signal.qty, Qty::from_i64(2));
    }
}
