//! Arena-facing marshaling.
//!
//! Builders turn their in-process arguments into arena allocations holding
//! UTF-16 strings, multi-strings or opaque byte runs, and embed the
//! resulting [`RelativeRef`]s in the envelope. [`ArgPack`] tracks every
//! allocation a builder makes so they can be released in reverse order of
//! allocation on every exit path, with credential blocks scrubbed before
//! release.

use opsvc_protocol::RelativeRef;
use opsvc_protocol::run_as::Secret;
use opsvc_protocol::wstr;

use crate::arena::Arena;
use crate::error::Result;

/// Copies raw bytes into the arena.
pub fn pack_bytes(arena: &mut Arena, data: &[u8]) -> Result<RelativeRef> {
    arena.alloc_bytes(data)
}

/// Copies a string into the arena as UTF-16LE, length in bytes, no NUL.
pub fn pack_string(arena: &mut Arena, value: &str) -> Result<RelativeRef> {
    arena.alloc_bytes(&wstr::encode(value))
}

/// Copies a NUL-separated, double-NUL-terminated multi-string into the
/// arena (service dependency lists).
pub fn pack_multi_string<S: AsRef<str>>(arena: &mut Arena, parts: &[S]) -> Result<RelativeRef> {
    arena.alloc_bytes(&wstr::encode_multi(parts))
}

/// Per-call allocation ledger.
pub(crate) struct ArgPack {
    refs: Vec<RelativeRef>,
    secrets: Vec<RelativeRef>,
}

impl ArgPack {
    pub(crate) fn new() -> Self {
        Self {
            refs: Vec::new(),
            secrets: Vec::new(),
        }
    }

    pub(crate) fn push_bytes(&mut self, arena: &mut Arena, data: &[u8]) -> Result<RelativeRef> {
        let reference = pack_bytes(arena, data)?;
        self.refs.push(reference);
        Ok(reference)
    }

    pub(crate) fn push_string(&mut self, arena: &mut Arena, value: &str) -> Result<RelativeRef> {
        let reference = pack_string(arena, value)?;
        self.refs.push(reference);
        Ok(reference)
    }

    /// Absent optionals become null references; the operation's own
    /// optional-parameter semantics apply, absence is not an error.
    pub(crate) fn push_opt_string(
        &mut self,
        arena: &mut Arena,
        value: Option<&str>,
    ) -> Result<RelativeRef> {
        match value {
            Some(value) => self.push_string(arena, value),
            None => Ok(RelativeRef::NULL),
        }
    }

    pub(crate) fn push_multi_string(
        &mut self,
        arena: &mut Arena,
        parts: &[String],
    ) -> Result<RelativeRef> {
        let reference = pack_multi_string(arena, parts)?;
        self.refs.push(reference);
        Ok(reference)
    }

    /// A credential string: tracked separately so release scrubs it first.
    pub(crate) fn push_opt_secret(
        &mut self,
        arena: &mut Arena,
        value: Option<&Secret>,
    ) -> Result<RelativeRef> {
        match value {
            Some(secret) => {
                let reference = self.push_string(arena, secret.as_str())?;
                self.secrets.push(reference);
                Ok(reference)
            }
            None => Ok(RelativeRef::NULL),
        }
    }

    /// Zeroes credential blocks, then frees every allocation in reverse
    /// order of allocation.
    pub(crate) fn release(self, arena: &mut Arena) {
        for secret in &self.secrets {
            arena.zero(*secret);
        }
        for reference in self.refs.iter().rev() {
            arena.free(*reference);
        }
    }
}
