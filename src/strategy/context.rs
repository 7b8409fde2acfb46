use crate::core::events::{Bar, MarketDataKind, PriceUpdate};
use crate::types::{Price, Symbol};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Classified market condition used as strategy context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Regime {
    Unknown,
    Trending,
    Ranging,
    Volatile,
}

// Closes retained for drift/regime classification.
const REGIME_WINDOW: usize = 20;
// Bars required before the regime tag means anything.
const MIN_BARS_FOR_REGIME: usize = 5;
// ATR / price above this reads as a volatile regime.
const VOLATILE_ATR_RATIO: Decimal = Decimal::from_parts(8, 0, 0, false, 3); // 0.008
// Absolute drift across the window above this reads as trending.
const TRENDING_DRIFT: Decimal = Decimal::from_parts(2, 0, 0, false, 3); // 0.002

/// Live market state for one symbol the strategy is attached to.
///
/// Owned by the evaluation engine; its event handler mutates the
/// context in place and the evaluation loop reads cloned snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketContext {
    pub symbol: Symbol,
    pub last_price: Option<Price>,
    pub last_tick_at: Option<DateTime<Utc>>,
    /// Wilder-smoothed average true range over completed bars.
    pub atr: Option<Decimal>,
    pub regime: Regime,
    pub updated_at: DateTime<Utc>,
    atr_period: u32,
    bars_seen: u32,
    prev_close: Option<Decimal>,
    recent_closes: VecDeque<Decimal>,
}

impl MarketContext {
    pub fn new(symbol: Symbol, atr_period: u32) -> Self {
        Self {
            symbol,
            last_price: None,
            last_tick_at: None,
            atr: None,
            regime: Regime::Unknown,
            updated_at: Utc::now(),
            atr_period: atr_period.max(1),
            bars_seen: 0,
            prev_close: None,
            recent_closes: VecDeque::with_capacity(REGIME_WINDOW),
        }
    }

    /// Context carries enough data for the predictor to work with.
    pub fn ready(&self) -> bool {
        self.last_price.is_some() && self.atr.is_some()
    }

    pub fn apply_quote(&mut self, update: &PriceUpdate) {
        if update.symbol != self.symbol || update.kind != MarketDataKind::Last {
            return;
        }
        self.last_price = Some(update.price);
        self.last_tick_at = Some(update.timestamp);
        self.updated_at = Utc::now();
    }

    pub fn apply_bar(&mut self, bar: &Bar) {
        if bar.symbol != self.symbol {
            return;
        }

        let high = bar.high.value();
        let low = bar.low.value();
        let close = bar.close.value();

        let true_range = match self.prev_close {
            Some(prev) => (high - low).max((high - prev).abs()).max((low - prev).abs()),
            None => high - low,
        };

        let period = Decimal::from(self.atr_period);
        self.atr = Some(match self.atr {
            // Wilder smoothing once seeded.
            Some(atr) => (atr * (period - Decimal::ONE) + true_range) / period,
            None => true_range,
        });

        self.prev_close = Some(close);
        self.bars_seen += 1;
        if self.recent_closes.len() == REGIME_WINDOW {
            self.recent_closes.pop_front();
        }
        self.recent_closes.push_back(close);
        self.regime = self.classify();
        self.updated_at = Utc::now();
    }

    /// Relative price change across the retained close window.
    pub fn drift(&self) -> Option<Decimal> {
        let first = self.recent_closes.front()?;
        let last = self.recent_closes.back()?;
        if self.recent_closes.len() < 2 || first.is_zero() {
            return None;
        }
        Some((last - first) / first)
    }

    fn classify(&self) -> Regime {
        if (self.bars_seen as usize) < MIN_BARS_FOR_REGIME {
            return Regime::Unknown;
        }
        let (atr, last) = match (self.atr, self.last_price.or(self.prev_close.map(Price::new))) {
            (Some(atr), Some(last)) if !last.value().is_zero() => (atr, last.value()),
            _ => return Regime::Unknown,
        };
        if atr / last >= VOLATILE_ATR_RATIO {
            return Regime::Volatile;
        }
        match self.drift() {
            Some(drift) if drift.abs() >= TRENDING_DRIFT => Regime::Trending,
            Some(_) => Regime::Ranging,
            None => Regime::Unknown,
        }
    }
}
