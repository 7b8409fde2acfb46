pub mod connection;
pub mod order_store;
pub mod sim;
pub mod subscriptions;

pub use connection::{AdapterConfig, AdapterError, ConnectionAdapter};
pub use order_store::{ExecutionApplied, OrderStore};
pub use sim::{SimulatedVenue, SimulatedVenueConfig};
pub use subscriptions::{SubscribeOutcome, SubscriptionSet, UnsubscribeOutcome};
