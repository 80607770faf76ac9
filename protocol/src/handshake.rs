//! Connect handshake.
//!
//! The first datagram on a fresh connection is a [`ClientHello`] with the
//! arena's file descriptor attached; the broker maps the arena and answers
//! with a [`ServerHello`] carrying its process id, which the session records
//! as the peer identity for handle-transfer operations.

use crate::WireError;
use crate::codec::Reader;
use crate::codec::Writer;

pub const HELLO_MAGIC: u32 = 0x4F50_5356; // "OPSV"
pub const PROTOCOL_VERSION: u32 = 1;

pub const CLIENT_HELLO_SIZE: usize = 16;
pub const SERVER_HELLO_SIZE: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClientHello {
    pub version: u32,
    pub arena_size: u64,
}

impl ClientHello {
    pub fn encode(&self) -> [u8; CLIENT_HELLO_SIZE] {
        let mut out = [0u8; CLIENT_HELLO_SIZE];
        let mut w = Writer::new(&mut out);
        // The buffer is sized for exactly these fields.
        let _ = w.put_u32(HELLO_MAGIC);
        let _ = w.put_u32(self.version);
        let _ = w.put_u64(self.arena_size);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(bytes);
        if r.get_u32()? != HELLO_MAGIC {
            return Err(WireError::Malformed("client hello magic"));
        }
        Ok(Self {
            version: r.get_u32()?,
            arena_size: r.get_u64()?,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ServerHello {
    pub version: u32,
    pub status: u32,
    pub server_pid: u32,
}

impl ServerHello {
    pub fn encode(&self) -> [u8; SERVER_HELLO_SIZE] {
        let mut out = [0u8; SERVER_HELLO_SIZE];
        let mut w = Writer::new(&mut out);
        let _ = w.put_u32(HELLO_MAGIC);
        let _ = w.put_u32(self.version);
        let _ = w.put_u32(self.status);
        let _ = w.put_u32(self.server_pid);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(bytes);
        if r.get_u32()? != HELLO_MAGIC {
            return Err(WireError::Malformed("server hello magic"));
        }
        Ok(Self {
            version: r.get_u32()?,
            status: r.get_u32()?,
            server_pid: r.get_u32()?,
        })
    }
}
