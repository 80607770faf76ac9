//! The broker channel session.
//!
//! A [`Session`] owns the connection to one broker: the seqpacket channel,
//! the shared arena, and the peer's identity. It is a single-owner value —
//! there is no ambient global session — but the process still enforces the
//! at-most-one-live-session invariant so two callers cannot race separate
//! arenas against the same broker surface.

use std::os::fd::BorrowedFd;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use opsvc_protocol::Envelope;
use opsvc_protocol::channel;
use opsvc_protocol::handshake::ClientHello;
use opsvc_protocol::handshake::PROTOCOL_VERSION;
use opsvc_protocol::handshake::ServerHello;
use opsvc_protocol::status;
use tracing::debug;

use crate::arena::Arena;
use crate::arena::DEFAULT_ARENA_SIZE;
use crate::error::ClientError;
use crate::error::Result;
use crate::socket::BrokerChannel;

static SESSION_LIVE: AtomicBool = AtomicBool::new(false);

/// Options accepted by [`Session::connect`].
#[derive(Clone, Copy, Debug)]
pub struct ConnectOptions {
    /// Size of the shared arena. Fixed for the lifetime of the session.
    pub arena_size: usize,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            arena_size: DEFAULT_ARENA_SIZE,
        }
    }
}

#[derive(Debug)]
struct LiveGuard;

impl LiveGuard {
    fn acquire() -> Result<Self> {
        if SESSION_LIVE.swap(true, Ordering::AcqRel) {
            return Err(ClientError::AlreadyConnected);
        }
        Ok(Self)
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        SESSION_LIVE.store(false, Ordering::Release);
    }
}

/// An established session with a broker.
#[derive(Debug)]
pub struct Session {
    channel: BrokerChannel,
    arena: Arena,
    peer_pid: u32,
    _guard: LiveGuard,
}

impl Session {
    /// Connects to the broker listening on `name`'s channel.
    ///
    /// Creates and maps the arena, opens the channel, and exchanges the
    /// hello pair; the broker's hello reports its process id. Every failing
    /// step is translated to [`ClientError::ConnectFailed`].
    pub fn connect(name: &str, options: ConnectOptions) -> Result<Self> {
        let guard = LiveGuard::acquire()?;

        let arena = Arena::create(options.arena_size).map_err(ClientError::ConnectFailed)?;
        let channel =
            BrokerChannel::connect(&channel::socket_path(name)).map_err(ClientError::ConnectFailed)?;

        let hello = ClientHello {
            version: PROTOCOL_VERSION,
            arena_size: options.arena_size as u64,
        };
        channel
            .send(&hello.encode(), &[arena.mapping().fd()])
            .map_err(ClientError::ConnectFailed)?;

        let reply = channel.receive().map_err(ClientError::ConnectFailed)?;
        let reply = ServerHello::decode(&reply.data)?;
        if reply.version != PROTOCOL_VERSION {
            return Err(ClientError::Protocol(
                "broker protocol version mismatch".to_string(),
            ));
        }
        if !status::is_success(reply.status) {
            return Err(ClientError::OperationFailed(reply.status));
        }

        debug!(
            channel = name,
            peer_pid = reply.server_pid,
            arena_size = options.arena_size,
            "connected to broker"
        );

        Ok(Self {
            channel,
            arena,
            peer_pid: reply.server_pid,
            _guard: guard,
        })
    }

    /// Process id the broker reported at connect time.
    pub fn peer_process_id(&self) -> u32 {
        self.peer_pid
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub(crate) fn arena_mut(&mut self) -> &mut Arena {
        &mut self.arena
    }

    /// Sends a request envelope and blocks until the reply overwrites it in
    /// place. There is no timeout: the broker always replies or the channel
    /// dies, and a dead channel reads as [`ClientError::NotConnected`].
    pub fn call(&mut self, envelope: &mut Envelope) -> Result<()> {
        self.call_with_fds(envelope, &[])
    }

    /// As [`call`](Self::call), attaching descriptors to the request.
    pub fn call_with_fds(&mut self, envelope: &mut Envelope, fds: &[BorrowedFd<'_>]) -> Result<()> {
        self.channel
            .send(envelope.as_bytes(), fds)
            .map_err(|_| ClientError::NotConnected)?;
        let reply = self
            .channel
            .receive()
            .map_err(|_| ClientError::NotConnected)?;
        envelope.overwrite_with_reply(&reply.data)?;
        Ok(())
    }

    /// Tears the session down, releasing the arena and the channel.
    /// Dropping the session has the same effect; a dropped or disconnected
    /// session frees the live-session slot for the next caller.
    pub fn disconnect(self) {
        debug!(peer_pid = self.peer_pid, "disconnecting from broker");
        drop(self);
    }
}
