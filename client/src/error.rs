//! Client-side error taxonomy.

use opsvc_protocol::WireError;
use thiserror::Error;

/// Errors surfaced by the broker client.
///
/// Broker-reported failure codes are passed through verbatim in
/// `OperationFailed`; the client never reinterprets them. Credential
/// material never appears in any of these messages.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("no active broker session")]
    NotConnected,

    #[error("a broker session is already active in this process")]
    AlreadyConnected,

    #[error("failed to connect to the broker channel: {0}")]
    ConnectFailed(#[source] std::io::Error),

    #[error("shared arena or staging allocation failed")]
    AllocationFailure,

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("broker reported failure code {0:#010x}")]
    OperationFailed(u32),
}

impl From<WireError> for ClientError {
    fn from(err: WireError) -> Self {
        ClientError::Protocol(err.to_string())
    }
}

/// Result type alias for broker client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Maps a broker status word to a call outcome.
pub(crate) fn status_to_result(status: u32) -> Result<()> {
    if opsvc_protocol::status::is_success(status) {
        Ok(())
    } else {
        Err(ClientError::OperationFailed(status))
    }
}
