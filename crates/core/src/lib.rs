pub mod config;
pub mod error;
pub mod limits;
pub mod message;
pub mod routing;

pub use config::AppConfig;
pub use error::{CourierError, CourierResult};
