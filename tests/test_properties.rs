use futures_trader::{OrderSide, OrderState, Position, Price, Qty, Symbol};
use proptest::prelude::*;
use rust_decimal::Decimal;

fn order_state_strategy() -> impl Strategy<Value = OrderState> {
    prop_oneof![
        Just(OrderState::Pending),
        Just(OrderState::Working),
        Just(OrderState::PartiallyFilled),
        Just(OrderState::Filled),
        Just(OrderState::Cancelled),
        Just(OrderState::Rejected),
    ]
}

proptest! {
    /// Once an order reaches a terminal state, no proposed transition
    /// is ever accepted again.
    #[test]
    fn order_state_machine_is_monotonic(
        proposals in proptest::collection::vec(order_state_strategy(), 1..40)
    ) {
        let mut state = OrderState::Pending;
        let mut terminal_since: Option<usize> = None;

        for (i, proposed) in proposals.into_iter().enumerate() {
            let accepted = state.can_transition_to(proposed);
            if let Some(at) = terminal_since {
                prop_assert!(
                    !accepted,
                    "terminal state {:?} (reached at step {}) accepted {:?} at step {}",
                    state, at, proposed, i
                );
            }
            if accepted {
                state = proposed;
                if state.is_terminal() {
                    terminal_since.get_or_insert(i);
                }
            }
        }
    }

    /// Self-transitions are never legal, and every legal transition
    /// out of a terminal state is ruled out.
    #[test]
    fn order_state_no_self_or_terminal_exits(state in order_state_strategy(), next in order_state_strategy()) {
        prop_assert!(!state.can_transition_to(state));
        if state.is_terminal() {
            prop_assert!(!state.can_transition_to(next));
        }
    }

    /// For any sequence of fills, a position's direction tag always
    /// agrees with its signed quantity, and Flat iff zero.
    #[test]
    fn position_direction_always_consistent(
        fills in proptest::collection::vec((any::<bool>(), 1i64..5, 1i64..10_000), 1..30)
    ) {
        let mut position = Position::flat(Symbol::new("ES"), "ACC1".to_string());
        for (buy, qty, price) in fills {
            let side = if buy { OrderSide::Buy } else { OrderSide::Sell };
            position.apply_fill(
                side,
                Qty::from_i64(qty),
                Price::new(Decimal::new(price, 1)),
                Decimal::ONE,
            );
            prop_assert!(position.direction_consistent());
            prop_assert_eq!(position.is_flat(), position.qty.is_zero());
            if position.qty.is_zero() {
                prop_assert!(position.avg_entry_price.is_none());
            } else {
                prop_assert!(position.avg_entry_price.is_some());
            }
        }
    }

    /// Buying then fully selling the same quantity at the same price
    /// realizes exactly zero and ends flat.
    #[test]
    fn position_round_trip_at_same_price_is_flat_zero(qty in 1i64..20, price in 1i64..100_000) {
        let mut position = Position::flat(Symbol::new("NQ"), "ACC1".to_string());
        let px = Price::new(Decimal::new(price, 2));

        position.apply_fill(OrderSide::Buy, Qty::from_i64(qty), px, Decimal::ONE);
        let realized = position.apply_fill(OrderSide::Sell, Qty::from_i64(qty), px, Decimal::ONE);

        prop_assert_eq!(realized, Decimal::ZERO);
        prop_assert!(position.is_flat());
        prop_assert_eq!(position.realized_pnl, Decimal::ZERO);
    }

    /// Price and Qty survive JSON round trips with full precision.
    #[test]
    fn price_qty_serde_round_trip(mantissa in -1_000_000_000i64..1_000_000_000, scale in 0u32..10) {
        let price = Price::new(Decimal::new(mantissa, scale));
        let json = serde_json::to_string(&price).unwrap();
        let back: Price = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(back, price);

        let qty = Qty::new(Decimal::new(mantissa, scale));
        let json = serde_json::to_string(&qty).unwrap();
        let back: Qty = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(back, qty);
    }
}
