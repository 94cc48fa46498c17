//! Channel routing — provider selection, fallback, and retry policy.

pub mod retry;
pub mod router;

pub use retry::{classify_failure, RetryEvaluator};
pub use router::{ChannelRouter, FallbackOutcome, ProviderSelection};
