//! Broker-side probing and capture of arena references.
//!
//! The client writes request data into the shared arena and the broker must
//! treat every inbound reference as hostile: bounds-check it against the
//! mapped view, verify alignment, and copy the bytes out before use so the
//! client cannot mutate them mid-operation. Null references are legal only
//! where the operation treats the parameter as optional.

use crate::WireError;
use crate::relative::RelativeRef;
use crate::wstr;

/// A read-only window over the peer's mapped arena.
pub struct ArenaView<'a> {
    bytes: &'a [u8],
}

impl<'a> ArenaView<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Validates a reference and returns the referenced slice without
    /// copying. `None` for an allowed null reference.
    pub fn probe(
        &self,
        reference: RelativeRef,
        alignment: usize,
        allow_null: bool,
    ) -> Result<Option<&'a [u8]>, WireError> {
        match reference.checked_range(self.bytes.len(), alignment, allow_null)? {
            Some(range) => Ok(Some(&self.bytes[range])),
            None => Ok(None),
        }
    }

    /// Captures the referenced bytes into an owned buffer.
    pub fn capture_bytes(
        &self,
        reference: RelativeRef,
        allow_null: bool,
    ) -> Result<Option<Vec<u8>>, WireError> {
        Ok(self.probe(reference, 1, allow_null)?.map(<[u8]>::to_vec))
    }

    /// Captures a UTF-16 string. The length must be even and the content
    /// valid UTF-16; anything else is rejected before the operation runs.
    pub fn capture_string(
        &self,
        reference: RelativeRef,
        allow_null: bool,
    ) -> Result<Option<String>, WireError> {
        match self.probe(reference, 2, allow_null)? {
            Some(raw) => Ok(Some(wstr::decode(raw)?)),
            None => Ok(None),
        }
    }

    /// Captures a NUL-separated multi-string (dependency lists).
    pub fn capture_multi_string(
        &self,
        reference: RelativeRef,
        allow_null: bool,
    ) -> Result<Option<Vec<String>>, WireError> {
        match self.probe(reference, 2, allow_null)? {
            Some(raw) => Ok(Some(wstr::decode_multi(raw)?)),
            None => Ok(None),
        }
    }
}
