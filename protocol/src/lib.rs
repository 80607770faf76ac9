//! Wire protocol for the privileged-operation broker.
//!
//! The client marshals variable-length request data into a shared-memory
//! arena and sends a fixed-size envelope over a private seqpacket channel.
//! Everything that crosses the process boundary is described here: the
//! envelope header and per-operation payloads, relative references into the
//! arena, the connect handshake, channel naming, and the staged packing of
//! nested structures. The broker-side probe/capture helpers live here too so
//! both peers validate references with the same rules.

pub mod capture;
pub mod channel;
mod codec;
pub mod envelope;
pub mod handshake;
pub mod ops;
pub mod pack;
pub mod relative;
pub mod run_as;
pub mod service_config;
pub mod status;
pub mod wstr;

pub use envelope::ApiNumber;
pub use envelope::ENVELOPE_SIZE;
pub use envelope::Envelope;
pub use envelope::PAYLOAD_SIZE;
pub use ops::ReplyPayload;
pub use ops::RequestPayload;
pub use relative::RelativeRef;
pub use run_as::RunAsParameters;
pub use run_as::Secret;

use thiserror::Error;

/// Errors raised while encoding or decoding wire data.
///
/// Anything malformed coming off the channel, and any locally detected
/// envelope-shape violation, ends up here before it can be sent.
#[derive(Error, Debug)]
pub enum WireError {
    #[error("message truncated: {0}")]
    Truncated(&'static str),

    #[error("unknown operation selector: {0}")]
    UnknownApiNumber(u32),

    #[error("relative reference out of bounds")]
    RefOutOfBounds,

    #[error("relative reference misaligned")]
    RefMisaligned,

    #[error("required reference is null")]
    NullRef,

    #[error("invalid UTF-16 payload")]
    InvalidString,

    #[error("payload exceeds the inline buffer: {0}")]
    PayloadTooLarge(&'static str),

    #[error("malformed payload: {0}")]
    Malformed(&'static str),
}
