//! Arena-relative references.
//!
//! The shared arena is mapped at different base addresses in the two peers,
//! so nothing that crosses the channel may carry an absolute pointer. A
//! [`RelativeRef`] names a byte range by its offset from the arena base.
//! Offset zero is reserved by the arena and doubles as the encoding of an
//! absent optional value.

use crate::WireError;

pub const RELATIVE_REF_SIZE: usize = 8;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RelativeRef {
    pub offset: u32,
    pub length: u32,
}

impl RelativeRef {
    pub const NULL: RelativeRef = RelativeRef { offset: 0, length: 0 };

    pub fn new(offset: u32, length: u32) -> Self {
        Self { offset, length }
    }

    pub fn is_null(&self) -> bool {
        self.offset == 0
    }

    /// End offset of the referenced range, or an error on wraparound.
    pub fn end(&self) -> Result<u64, WireError> {
        Ok(u64::from(self.offset) + u64::from(self.length))
    }

    /// Validates the reference against an arena of `arena_size` bytes and an
    /// alignment requirement. Null references are accepted only when
    /// `allow_null` is set; the caller decides what absence means.
    pub fn checked_range(
        &self,
        arena_size: usize,
        alignment: usize,
        allow_null: bool,
    ) -> Result<Option<std::ops::Range<usize>>, WireError> {
        if self.is_null() {
            return if allow_null {
                Ok(None)
            } else {
                Err(WireError::NullRef)
            };
        }

        let start = self.offset as usize;
        let end = start
            .checked_add(self.length as usize)
            .ok_or(WireError::RefOutOfBounds)?;

        if end > arena_size {
            return Err(WireError::RefOutOfBounds);
        }
        if alignment > 1 && start % alignment != 0 {
            return Err(WireError::RefMisaligned);
        }

        Ok(Some(start..end))
    }

    pub fn encode(&self) -> [u8; RELATIVE_REF_SIZE] {
        let mut out = [0u8; RELATIVE_REF_SIZE];
        out[..4].copy_from_slice(&self.offset.to_le_bytes());
        out[4..].copy_from_slice(&self.length.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() < RELATIVE_REF_SIZE {
            return Err(WireError::Truncated("relative reference"));
        }
        Ok(Self {
            offset: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            length: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        })
    }
}
