use crate::core::events::MarketDataKind;
use crate::types::Symbol;
use std::collections::{HashMap, HashSet};
use tokio::sync::watch;

/// Outcome of adding a (symbol, kind) pair.
#[derive(Debug)]
pub enum SubscribeOutcome {
    /// Pair was already active; nothing to do.
    AlreadyActive,
    /// New kind on a symbol that already has a data task.
    KindAdded,
    /// First kind for this symbol; caller must spawn its data task
    /// and wire it to the returned stop signal.
    SymbolAdded(watch::Receiver<bool>),
}

/// Outcome of removing a (symbol, kind) pair.
#[derive(Debug, PartialEq, Eq)]
pub enum UnsubscribeOutcome {
    NotSubscribed,
    KindRemoved,
    /// Last kind removed; the symbol's data task has been signalled
    /// to stop.
    SymbolCleared,
}

/// Active (symbol, data-kind) pairs plus the per-symbol stop signals
/// for their data-production tasks.
pub struct SubscriptionSet {
    entries: HashMap<Symbol, HashSet<MarketDataKind>>,
    stops: HashMap<Symbol, watch::Sender<bool>>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            stops: HashMap::new(),
        }
    }

    /// Idempotent: subscribing twice to the same pair is a no-op.
    pub fn add(&mut self, symbol: Symbol, kind: MarketDataKind) -> SubscribeOutcome {
        let kinds = self.entries.entry(symbol.clone()).or_default();
        if !kinds.insert(kind) {
            return SubscribeOutcome::AlreadyActive;
        }
        if kinds.len() > 1 {
            return SubscribeOutcome::KindAdded;
        }
        let (tx, rx) = watch::channel(false);
        self.stops.insert(symbol, tx);
        SubscribeOutcome::SymbolAdded(rx)
    }

    pub fn remove(&mut self, symbol: &Symbol, kind: MarketDataKind) -> UnsubscribeOutcome {
        let Some(kinds) = self.entries.get_mut(symbol) else {
            return UnsubscribeOutcome::NotSubscribed;
        };
        if !kinds.remove(&kind) {
            return UnsubscribeOutcome::NotSubscribed;
        }
        if !kinds.is_empty() {
            return UnsubscribeOutcome::KindRemoved;
        }
        self.entries.remove(symbol);
        if let Some(stop) = self.stops.remove(symbol) {
            let _ = stop.send(true);
        }
        UnsubscribeOutcome::SymbolCleared
    }

    pub fn is_active(&self, symbol: &Symbol, kind: MarketDataKind) -> bool {
        self.entries
            .get(symbol)
            .map_or(false, |kinds| kinds.contains(&kind))
    }

    pub fn kinds(&self, symbol: &Symbol) -> HashSet<MarketDataKind> {
        self.entries.get(symbol).cloned().unwrap_or_default()
    }

    pub fn active_symbols(&self) -> Vec<Symbol> {
        self.entries.keys().cloned().collect()
    }

    /// Count of active (symbol, kind) pairs.
    pub fn len(&self) -> usize {
        self.entries.values().map(|kinds| kinds.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Replace every symbol's stop channel, returning fresh receivers
    /// so data tasks can be respawned after a reconnect.
    pub fn rearm_all(&mut self) -> Vec<(Symbol, watch::Receiver<bool>)> {
        let mut out = Vec::with_capacity(self.entries.len());
        for symbol in self.entries.keys() {
            let (tx, rx) = watch::channel(false);
            self.stops.insert(symbol.clone(), tx);
            out.push((symbol.clone(), rx));
        }
        out
    }

    /// Signal every data task to stop without dropping the
    /// subscription entries (used on disconnect).
    pub fn stop_all(&mut self) {
        for stop in self.stops.values() {
            let _ = stop.send(true);
        }
    }
}

impl Default for SubscriptionSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_double_subscribe_is_single_entry() {
        let mut set = SubscriptionSet::new();
        let symbol = Symbol::new("ES");

        assert!(matches!(
            set.add(symbol.clone(), MarketDataKind::Last),
            SubscribeOutcome::SymbolAdded(_)
        ));
        assert!(matches!(
            set.add(symbol.clone(), MarketDataKind::Last),
            SubscribeOutcome::AlreadyActive
        ));
        assert_eq!(set.len(), 1);
        assert!(set.is_active(&symbol, MarketDataKind::Last));
    }

    #[test]
    fn test_multiple_kinds_per_symbol() {
        let mut set = SubscriptionSet::new();
        let symbol = Symbol::new("ES");

        assert!(matches!(
            set.add(symbol.clone(), MarketDataKind::Last),
            SubscribeOutcome::SymbolAdded(_)
        ));
        assert!(matches!(
            set.add(symbol.clone(), MarketDataKind::Bars),
            SubscribeOutcome::KindAdded
        ));
        assert_eq!(set.len(), 2);
        assert_eq!(set.active_symbols().len(), 1);
    }

    #[test]
    fn test_last_kind_removal_clears_symbol_and_stops_task() {
        let mut set = SubscriptionSet::new();
        let symbol = Symbol::new("ES");

        let rx = match set.add(symbol.clone(), MarketDataKind::Last) {
            SubscribeOutcome::SymbolAdded(rx) => rx,
            other => panic!("unexpected outcome: {:?}", other),
        };
        set.add(symbol.clone(), MarketDataKind::Bars);

        assert_eq!(
            set.remove(&symbol, MarketDataKind::Bars),
            UnsubscribeOutcome::KindRemoved
        );
        assert_eq!(
            set.remove(&symbol, MarketDataKind::Last),
            UnsubscribeOutcome::SymbolCleared
        );
        assert!(set.is_empty());
        // The data task's stop signal fired.
        assert!(*rx.borrow());
    }

    #[test]
    fn test_unsubscribe_unknown_pair() {
        let mut set = SubscriptionSet::new();
        assert_eq!(
            set.remove(&Symbol::new("ES"), MarketDataKind::Last),
            UnsubscribeOutcome::NotSubscribed
        );
    }

    #[test]
    fn test_rearm_all_returns_receiver_per_symbol() {
        let mut set = SubscriptionSet::new();
        set.add(Symbol::new("ES"), MarketDataKind::Last);
        set.add(Symbol::new("NQ"), MarketDataKind::Bars);

        let rearmed = set.rearm_all();
        assert_eq!(rearmed.len(), 2);
        for (_, rx) in &rearmed {
            assert!(!*rx.borrow());
        }
    }
}
