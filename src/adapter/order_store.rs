use crate::core::events::{
    AccountId, AccountInfo, ExecutionReport, Order, OrderId, OrderState, Position,
};
use crate::types::{Price, Qty, Symbol};
use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Result of applying one execution report: snapshots of everything
/// the report touched, for event emission by the adapter.
#[derive(Debug, Clone)]
pub struct ExecutionApplied {
    pub order: Order,
    pub position: Option<Position>,
    pub account: Option<AccountInfo>,
    pub fill_delta: Qty,
    pub realized_delta: Decimal,
}

/// Order, position and account indexes owned by the adapter.
///
/// Mutation happens only on the adapter's own event-processing path;
/// external callers read clones. Lookups never touch the network.
pub struct OrderStore {
    orders: DashMap<OrderId, Order>,
    positions: DashMap<(String, AccountId), Position>,
    accounts: DashMap<AccountId, AccountInfo>,
    contract_multipliers: HashMap<String, Decimal>,
    default_multiplier: Decimal,
}

impl OrderStore {
    pub fn new(contract_multipliers: HashMap<String, Decimal>, default_multiplier: Decimal) -> Self {
        Self {
            orders: DashMap::new(),
            positions: DashMap::new(),
            accounts: DashMap::new(),
            contract_multipliers,
            default_multiplier,
        }
    }

    pub fn multiplier_for(&self, symbol: &Symbol) -> Decimal {
        self.contract_multipliers
            .get(symbol.as_str())
            .copied()
            .unwrap_or(self.default_multiplier)
    }

    pub fn insert_order(&self, order: Order) {
        self.orders.insert(order.order_id.clone(), order);
    }

    pub fn get_order(&self, order_id: &str) -> Option<Order> {
        self.orders.get(order_id).map(|entry| entry.value().clone())
    }

    /// Move an order to `state` if the transition is legal. Returns the
    /// updated snapshot, or None for unknown orders and illegal moves.
    pub fn set_order_state(&self, order_id: &str, state: OrderState) -> Option<Order> {
        let mut entry = self.orders.get_mut(order_id)?;
        if !entry.state.can_transition_to(state) {
            return None;
        }
        entry.state = state;
        entry.updated_at = Utc::now();
        Some(entry.clone())
    }

    pub fn open_orders(&self, symbol: Option<&Symbol>) -> Vec<Order> {
        self.orders
            .iter()
            .filter(|entry| entry.is_open())
            .filter(|entry| symbol.map_or(true, |s| &entry.symbol == s))
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Apply a venue execution report to the indexes. Reports against
    /// terminal orders and stale duplicates are ignored (None).
    pub fn apply_execution(&self, report: &ExecutionReport) -> Option<ExecutionApplied> {
        let (order_snapshot, fill_delta, fill_price) = {
            let mut entry = self.orders.get_mut(&report.order_id)?;
            if entry.state.is_terminal() {
                return None;
            }

            // Filled quantity never exceeds requested quantity.
            let capped = Qty::new(report.filled_qty.abs().value().min(entry.qty.abs().value()));
            let fill_delta = if capped.value() > entry.filled_qty.value() {
                capped - entry.filled_qty
            } else {
                Qty::ZERO
            };

            let state_advanced = entry.state.can_transition_to(report.state);
            if state_advanced {
                entry.state = report.state;
            } else if report.state != entry.state || fill_delta.is_zero() {
                // Neither a legal transition nor new fill quantity.
                return None;
            }

            if !fill_delta.is_zero() {
                if let Some(price) = report.fill_price {
                    let prev_filled = entry.filled_qty.value();
                    entry.avg_fill_price = Some(match entry.avg_fill_price {
                        Some(avg) => Price::new(
                            (avg.value() * prev_filled + price.value() * fill_delta.value())
                                / capped.value(),
                        ),
                        None => price,
                    });
                }
                entry.filled_qty = capped;
            }
            entry.updated_at = Utc::now();

            (entry.clone(), fill_delta, report.fill_price)
        };

        let mut position = None;
        let mut account = None;
        let mut realized_delta = Decimal::ZERO;

        if !fill_delta.is_zero() {
            if let Some(price) = fill_price.or(order_snapshot.avg_fill_price) {
                let multiplier = self.multiplier_for(&order_snapshot.symbol);
                let key = (
                    order_snapshot.symbol.as_str().to_string(),
                    order_snapshot.account.clone(),
                );
                let mut pos = self.positions.entry(key).or_insert_with(|| {
                    Position::flat(order_snapshot.symbol.clone(), order_snapshot.account.clone())
                });
                realized_delta = pos.apply_fill(order_snapshot.side, fill_delta, price, multiplier);
                position = Some(pos.clone());
                drop(pos);

                if !realized_delta.is_zero() {
                    if let Some(mut acct) = self.accounts.get_mut(&order_snapshot.account) {
                        acct.realized_pnl += realized_delta;
                        acct.cash += realized_delta;
                        acct.updated_at = Utc::now();
                        account = Some(acct.clone());
                    }
                }
            }
        }

        Some(ExecutionApplied {
            order: order_snapshot,
            position,
            account,
            fill_delta,
            realized_delta,
        })
    }

    /// Re-mark all positions in `symbol` against the latest price and
    /// refresh the owning accounts' unrealized P&L.
    pub fn mark_positions(&self, symbol: &Symbol, last_price: Price) {
        let multiplier = self.multiplier_for(symbol);
        let mut touched_accounts = Vec::new();

        for mut entry in self.positions.iter_mut() {
            if entry.key().0 == symbol.as_str() {
                entry.mark(last_price, multiplier);
                touched_accounts.push(entry.key().1.clone());
            }
        }

        for account_id in touched_accounts {
            let unrealized: Decimal = self
                .positions
                .iter()
                .filter(|entry| entry.key().1 == account_id)
                .map(|entry| entry.unrealized_pnl)
                .sum();
            if let Some(mut acct) = self.accounts.get_mut(&account_id) {
                acct.unrealized_pnl = unrealized;
                acct.updated_at = Utc::now();
            }
        }
    }

    pub fn position(&self, symbol: &Symbol, account: &str) -> Option<Position> {
        self.positions
            .get(&(symbol.as_str().to_string(), account.to_string()))
            .map(|entry| entry.value().clone())
    }

    pub fn positions(&self, account: &str) -> Vec<Position> {
        self.positions
            .iter()
            .filter(|entry| entry.key().1 == account)
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn upsert_account(&self, account: AccountInfo) {
        self.accounts.insert(account.account_id.clone(), account);
    }

    pub fn account(&self, account_id: &str) -> Option<AccountInfo> {
        self.accounts.get(account_id).map(|entry| entry.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::events::{OrderRequest, OrderSide, PositionDirection};

    fn px(s: &str) -> Price {
        Price::from_str(s).unwrap()
    }

    fn store() -> OrderStore {
        let mut multipliers = HashMap::new();
        multipliers.insert("ES".to_string(), Decimal::new(50, 0));
        OrderStore::new(multipliers, Decimal::ONE)
    }

    fn working_order(store: &OrderStore, id: &str, side: OrderSide, qty: i64) -> Order {
        let request = OrderRequest::market("ACC1", "ES", side, Qty::from_i64(qty));
        let mut order = Order::from_request(request, id.to_string());
        order.state = OrderState::Working;
        store.insert_order(order.clone());
        order
    }

    fn fill_report(id: &str, state: OrderState, filled: i64, price: &str) -> ExecutionReport {
        ExecutionReport {
            order_id: id.to_string(),
            state,
            filled_qty: Qty::from_i64(filled),
            fill_price: Some(px(price)),
            reason: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_fill_updates_order_and_position() {
        let store = store();
        store.upsert_account(AccountInfo {
            account_id: "ACC1".to_string(),
            buying_power: Decimal::new(100_000, 0),
            cash: Decimal::new(100_000, 0),
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            updated_at: Utc::now(),
        });
        working_order(&store, "o1", OrderSide::Buy, 2);

        let applied = store
            .apply_execution(&fill_report("o1", OrderState::Filled, 2, "4500"))
            .expect("applies");

        assert_eq!(applied.order.state, OrderState::Filled);
        assert_eq!(applied.order.filled_qty, Qty::from_i64(2));
        assert_eq!(applied.fill_delta, Qty::from_i64(2));
        let pos = applied.position.expect("position updated");
        assert_eq!(pos.direction, PositionDirection::Long);
        assert_eq!(pos.qty, Qty::from_i64(2));
    }

    #[test]
    fn test_fill_never_exceeds_requested_qty() {
        let store = store();
        working_order(&store, "o1", OrderSide::Buy, 2);

        let applied = store
            .apply_execution(&fill_report("o1", OrderState::Filled, 5, "4500"))
            .expect("applies");
        assert_eq!(applied.order.filled_qty, Qty::from_i64(2));
    }

    #[test]
    fn test_terminal_orders_reject_further_reports() {
        let store = store();
        working_order(&store, "o1", OrderSide::Buy, 1);

        store
            .apply_execution(&fill_report("o1", OrderState::Filled, 1, "4500"))
            .expect("first fill applies");
        assert!(store
            .apply_execution(&fill_report("o1", OrderState::Cancelled, 1, "4500"))
            .is_none());
        assert_eq!(store.get_order("o1").unwrap().state, OrderState::Filled);
    }

    #[test]
    fn test_partial_fill_sequence() {
        let store = store();
        working_order(&store, "o1", OrderSide::Buy, 3);

        let first = store
            .apply_execution(&fill_report("o1", OrderState::PartiallyFilled, 1, "4500"))
            .unwrap();
        assert_eq!(first.fill_delta, Qty::from_i64(1));
        assert_eq!(first.order.state, OrderState::PartiallyFilled);

        // Duplicate report: no new quantity, same state -> ignored.
        assert!(store
            .apply_execution(&fill_report("o1", OrderState::PartiallyFilled, 1, "4500"))
            .is_none());

        let second = store
            .apply_execution(&fill_report("o1", OrderState::PartiallyFilled, 2, "4502"))
            .unwrap();
        assert_eq!(second.fill_delta, Qty::from_i64(1));
        // Weighted average of 4500 and 4502.
        assert_eq!(second.order.avg_fill_price, Some(px("4501")));

        let last = store
            .apply_execution(&fill_report("o1", OrderState::Filled, 3, "4504"))
            .unwrap();
        assert_eq!(last.order.filled_qty, Qty::from_i64(3));
        assert_eq!(last.order.state, OrderState::Filled);
    }

    #[test]
    fn test_round_trip_realizes_pnl_into_account() {
        let store = store();
        store.upsert_account(AccountInfo {
            account_id: "ACC1".to_string(),
            buying_power: Decimal::new(100_000, 0),
            cash: Decimal::new(100_000, 0),
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            updated_at: Utc::now(),
        });

        working_order(&store, "buy", OrderSide::Buy, 1);
        store
            .apply_execution(&fill_report("buy", OrderState::Filled, 1, "4500"))
            .unwrap();

        working_order(&store, "sell", OrderSide::Sell, 1);
        let applied = store
            .apply_execution(&fill_report("sell", OrderState::Filled, 1, "4510"))
            .unwrap();

        // 10 points * 50 multiplier.
        assert_eq!(applied.realized_delta, Decimal::new(500, 0));
        let account = applied.account.expect("account touched");
        assert_eq!(account.realized_pnl, Decimal::new(500, 0));
        assert_eq!(account.cash, Decimal::new(100_500, 0));

        let pos = store.position(&Symbol::new("ES"), "ACC1").unwrap();
        assert!(pos.is_flat());
    }

    #[test]
    fn test_mark_positions_updates_unrealized() {
        let store = store();
        store.upsert_account(AccountInfo {
            account_id: "ACC1".to_string(),
            buying_power: Decimal::new(100_000, 0),
            cash: Decimal::new(100_000, 0),
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            updated_at: Utc::now(),
        });
        working_order(&store, "o1", OrderSide::Buy, 1);
        store
            .apply_execution(&fill_report("o1", OrderState::Filled, 1, "4500"))
            .unwrap();

        store.mark_positions(&Symbol::new("ES"), px("4506"));
        let pos = store.position(&Symbol::new("ES"), "ACC1").unwrap();
        assert_eq!(pos.unrealized_pnl, Decimal::new(300, 0));
        let acct = store.account("ACC1").unwrap();
        assert_eq!(acct.unrealized_pnl, Decimal::new(300, 0));
        assert_eq!(acct.total_pnl(), Decimal::new(300, 0));
    }

    #[test]
    fn test_unknown_order_lookup_is_none() {
        let store = store();
        assert!(store.get_order("nope").is_none());
        assert!(store.position(&Symbol::new("ES"), "ACC1").is_none());
        assert!(store.account("ACC1").is_none());
        assert!(store.open_orders(None).is_empty());
    }
}
