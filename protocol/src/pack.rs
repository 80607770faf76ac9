//! Staged packing of nested variable-length structures.
//!
//! Structures with pointer fields (a trigger list whose triggers each carry
//! a subtype id and a list of data blobs, failure actions with message and
//! command strings, …) are flattened depth-first into one contiguous blob
//! before being copied into the arena. Pointer fields become blob-relative
//! `(offset, length)` pairs.
//!
//! A pointer field is addressed by a [`FieldSlot`] — its own offset inside
//! the staging buffer — and patched the moment its target is appended.
//! Because slots are indices rather than addresses, growing the staging
//! buffer never invalidates one, and there is no rebasing pass: the set of
//! patch sites is exactly the set of `FieldSlot`s handed out, each typed
//! and each written exactly once.

use crate::WireError;
use crate::relative::RELATIVE_REF_SIZE;
use crate::relative::RelativeRef;

/// Location of an 8-byte packed reference field inside the staging buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldSlot {
    at: usize,
}

#[derive(Debug, Default)]
pub struct PackBuilder {
    bytes: Vec<u8>,
}

impl PackBuilder {
    pub fn new() -> Self {
        Self::with_capacity(200)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn align_to(&mut self, alignment: usize) -> usize {
        debug_assert!(alignment.is_power_of_two());
        let offset = self.bytes.len().next_multiple_of(alignment);
        self.bytes.resize(offset, 0);
        offset
    }

    /// Appends the fixed-size root structure. Must be the first append; the
    /// root always lands at offset zero so the final blob can be read from
    /// its start.
    pub fn pack_root(&mut self, root: &[u8]) -> usize {
        debug_assert!(self.bytes.is_empty());
        self.bytes.extend_from_slice(root);
        0
    }

    /// Appends `data` aligned to `alignment` and returns its blob-relative
    /// offset. Used for targets whose reference field is written by the
    /// caller as part of a larger fixed block.
    pub fn append(&mut self, data: &[u8], alignment: usize) -> usize {
        let offset = self.align_to(alignment);
        self.bytes.extend_from_slice(data);
        offset
    }

    /// Reserves a reference field inside a block that was appended earlier.
    /// `base` is the block's offset, `field_offset` the field's offset
    /// within the block.
    pub fn slot(&self, base: usize, field_offset: usize) -> Result<FieldSlot, WireError> {
        let at = base
            .checked_add(field_offset)
            .filter(|at| {
                at.checked_add(RELATIVE_REF_SIZE)
                    .is_some_and(|end| end <= self.bytes.len())
            })
            .ok_or(WireError::Malformed("field slot outside staging buffer"))?;
        Ok(FieldSlot { at })
    }

    /// Appends `data` and patches `slot` with its `(offset, length)`,
    /// returning the written reference. An empty `data` writes a null
    /// reference and appends nothing, which is how absent optional targets
    /// are encoded.
    pub fn pack_field(
        &mut self,
        slot: FieldSlot,
        data: &[u8],
        alignment: usize,
    ) -> Result<RelativeRef, WireError> {
        let reference = if data.is_empty() {
            RelativeRef::NULL
        } else {
            let offset = self.append(data, alignment);
            let offset = u32::try_from(offset).map_err(|_| WireError::RefOutOfBounds)?;
            let length = u32::try_from(data.len()).map_err(|_| WireError::RefOutOfBounds)?;
            RelativeRef::new(offset, length)
        };
        self.bytes[slot.at..slot.at + RELATIVE_REF_SIZE].copy_from_slice(&reference.encode());
        Ok(reference)
    }

    pub fn finish(self) -> Vec<u8> {
        self.bytes
    }
}

/// Read-side companion: resolves blob-relative references with the same
/// bounds discipline the broker applies to arena references.
pub struct PackedReader<'a> {
    bytes: &'a [u8],
}

impl<'a> PackedReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Reads the reference field stored at `at`.
    pub fn ref_at(&self, at: usize) -> Result<RelativeRef, WireError> {
        let end = at
            .checked_add(RELATIVE_REF_SIZE)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(WireError::Truncated("packed reference field"))?;
        RelativeRef::decode(&self.bytes[at..end])
    }

    /// Resolves a reference to its target bytes; `None` for a null ref.
    pub fn resolve(&self, reference: RelativeRef) -> Result<Option<&'a [u8]>, WireError> {
        // Offset 0 is the root structure itself, never a field target, so
        // the null encoding is unambiguous here just as it is in the arena.
        match reference.checked_range(self.bytes.len(), 1, true)? {
            Some(range) => Ok(Some(&self.bytes[range])),
            None => Ok(None),
        }
    }

    /// Convenience: reads the field at `at` and resolves it.
    pub fn field(&self, at: usize) -> Result<Option<&'a [u8]>, WireError> {
        self.resolve(self.ref_at(at)?)
    }
}
