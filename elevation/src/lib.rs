//! Elevation bootstrap for run-as requests.
//!
//! Chooses between direct in-process execution and broker-mediated
//! execution, provisions transient elevated brokers on demand, and retries
//! the connect while a freshly started broker races its own initialization.

mod bootstrap;
pub mod env;
mod error;

pub use bootstrap::BootstrapState;
pub use bootstrap::CONNECT_ATTEMPTS;
pub use bootstrap::CONNECT_RETRY_DELAY;
pub use bootstrap::ElevationBootstrap;
pub use env::BrokerEnvironment;
pub use error::ElevationError;
pub use error::Result;
