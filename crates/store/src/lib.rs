//! In-memory persistence for the delivery engine — keyed record stores
//! with per-key atomic updates, so counter and status correctness holds
//! across concurrent workers.

pub mod attempts;
pub mod messages;
pub mod routing_table;

pub use attempts::{AttemptLog, ChannelAttemptStats};
pub use messages::MessageStore;
pub use routing_table::RoutingTable;
