//! Client for the privileged-operation broker.
//!
//! Marshals typed requests into a shared-memory arena, sends fixed-size
//! envelopes over the broker's private channel, and blocks for the
//! synchronous reply. One [`Session`] per broker; one typed builder per
//! operation.

pub mod arena;
pub mod calls;
mod error;
pub mod marshal;
pub mod session;
pub mod socket;

pub use arena::Arena;
pub use arena::DEFAULT_ARENA_SIZE;
pub use arena::SharedMapping;
pub use calls::ServiceConfigParameters;
pub use calls::TcpEntry;
pub use error::ClientError;
pub use error::Result;
pub use session::ConnectOptions;
pub use session::Session;
