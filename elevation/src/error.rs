//! Elevation bootstrap errors.

use opsvc_client::ClientError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ElevationError {
    /// The user declined the elevation prompt. Terminal; never retried, and
    /// reported distinctly from every transport failure.
    #[error("the elevation prompt was declined")]
    Cancelled,

    /// Every connection attempt to the provisioned broker failed.
    #[error("timed out waiting for the broker channel to become available")]
    Timeout,

    /// Registering or starting the transient broker service failed.
    #[error("broker service provisioning failed: {0}")]
    Provision(String),

    /// Direct in-process execution failed; carries the OS error text.
    #[error("direct execution failed: {0}")]
    Execution(String),

    #[error(transparent)]
    Client(#[from] ClientError),
}

pub type Result<T> = std::result::Result<T, ElevationError>;
