//! Delivery engine — the executor that drives one message through
//! rate limiting, routing, and retry, and the queue processor that
//! polls for due messages and fans them out to workers.

pub mod executor;
pub mod queue;
pub mod service;

pub use executor::{DeliveryExecutor, DeliveryOutcome, DeliveryReport};
pub use queue::QueueProcessor;
pub use service::DeliveryService;
