//! In-process simulated broker for integration tests.
//!
//! Listens on a real channel socket, maps the arena descriptor from the
//! client hello, validates inbound references with the same probe rules a
//! production broker must apply, records every call, and answers with a
//! scriptable response. Runs on a plain thread; the client under test talks
//! to it over the real transport.

use std::os::fd::AsRawFd;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::thread::JoinHandle;

use anyhow::Context;
use anyhow::Result;
use anyhow::bail;
use opsvc_client::SharedMapping;
use opsvc_client::socket::receive_message;
use opsvc_client::socket::send_message;
use opsvc_protocol::Envelope;
use opsvc_protocol::capture::ArenaView;
use opsvc_protocol::channel;
use opsvc_protocol::handshake::ClientHello;
use opsvc_protocol::handshake::PROTOCOL_VERSION;
use opsvc_protocol::handshake::ServerHello;
use opsvc_protocol::ops::ReplyPayload;
use opsvc_protocol::ops::RequestPayload;
use opsvc_protocol::status;
use socket2::Domain;
use socket2::SockAddr;
use socket2::Socket;
use socket2::Type;
use tracing_subscriber::EnvFilter;

/// Installs the usual test subscriber; safe to call from every test.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init();
}

/// The broker side of the mapped arena, handed to responders so they can
/// write reply data behind the request's references.
pub struct BrokerArena {
    mapping: SharedMapping,
}

impl BrokerArena {
    pub fn snapshot(&self) -> Vec<u8> {
        self.mapping.snapshot()
    }

    pub fn write_at(&self, offset: u32, data: &[u8]) {
        let _ = self.mapping.write_at(offset, data);
    }

    /// Runs `f` over a capture view of the current arena contents.
    pub fn with_view<R>(&self, f: impl FnOnce(&ArenaView<'_>) -> R) -> R {
        let snapshot = self.snapshot();
        f(&ArenaView::new(&snapshot))
    }
}

/// What the broker should answer to one request.
pub struct BrokerResponse {
    pub status: u32,
    pub reply: Option<ReplyPayload>,
}

impl BrokerResponse {
    pub fn success() -> Self {
        Self {
            status: status::SUCCESS,
            reply: None,
        }
    }

    pub fn failure(status: u32) -> Self {
        Self {
            status,
            reply: None,
        }
    }

    pub fn with_reply(status: u32, reply: ReplyPayload) -> Self {
        Self {
            status,
            reply: Some(reply),
        }
    }
}

pub type Responder = Box<dyn FnMut(&RequestPayload, &BrokerArena) -> BrokerResponse + Send>;

/// One request observed by the broker, with the arena as it looked at
/// dispatch time (before any scrubbing the client does afterwards).
#[derive(Clone)]
pub struct RecordedCall {
    pub request: RequestPayload,
    pub arena: Vec<u8>,
    /// Descriptors attached to the request datagram.
    pub fd_count: usize,
}

struct Shared {
    calls: Mutex<Vec<RecordedCall>>,
    stop: AtomicBool,
}

/// A broker instance listening on a real channel.
pub struct TestBroker {
    name: String,
    socket_path: PathBuf,
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl TestBroker {
    /// Spawns a broker on a freshly generated channel name.
    pub fn spawn(responder: Responder) -> Result<Self> {
        Self::spawn_named(&channel::generate_name(), responder)
    }

    /// Spawns a broker that accepts every call with `SUCCESS`.
    pub fn spawn_accepting() -> Result<Self> {
        Self::spawn(Box::new(|_, _| BrokerResponse::success()))
    }

    pub fn spawn_named(name: &str, mut responder: Responder) -> Result<Self> {
        let socket_path = channel::socket_path(name);
        let _ = std::fs::remove_file(&socket_path);

        let listener = Socket::new(Domain::UNIX, Type::SEQPACKET, None)?;
        listener.bind(&SockAddr::unix(&socket_path)?)?;
        // Owner-only rendezvous; the peer-credential check below backs this
        // up for filesystems that ignore socket modes.
        std::fs::set_permissions(&socket_path, std::fs::Permissions::from_mode(0o700))?;
        listener.listen(4)?;

        let shared = Arc::new(Shared {
            calls: Mutex::new(Vec::new()),
            stop: AtomicBool::new(false),
        });

        let thread_shared = Arc::clone(&shared);
        let handle = std::thread::spawn(move || {
            while !thread_shared.stop.load(Ordering::Acquire) {
                let Ok((connection, _)) = listener.accept() else {
                    break;
                };
                if thread_shared.stop.load(Ordering::Acquire) {
                    break;
                }
                if let Err(err) = serve_connection(&connection, &thread_shared, &mut responder) {
                    tracing::debug!(%err, "test broker connection ended");
                }
            }
        });

        Ok(Self {
            name: name.to_string(),
            socket_path,
            shared,
            handle: Some(handle),
        })
    }

    pub fn channel_name(&self) -> &str {
        &self.name
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.shared
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.shared
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Drop for TestBroker {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        // Poke the listener loose from accept().
        if let Ok(socket) = Socket::new(Domain::UNIX, Type::SEQPACKET, None) {
            if let Ok(addr) = SockAddr::unix(&self.socket_path) {
                let _ = socket.connect(&addr);
            }
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

fn serve_connection(
    connection: &Socket,
    shared: &Shared,
    responder: &mut Responder,
) -> Result<()> {
    // Owner-only surface: refuse peers running as anybody else.
    if peer_uid(connection).context("peer credentials")? != unsafe { libc::getuid() } {
        bail!("peer uid mismatch");
    }

    let hello = receive_message(connection).context("client hello")?;
    let parsed = ClientHello::decode(&hello.data)?;
    if parsed.version != PROTOCOL_VERSION {
        bail!("unsupported protocol version {}", parsed.version);
    }
    let Some(arena_fd) = hello.fds.into_iter().next() else {
        bail!("client hello carried no arena descriptor");
    };
    let arena = BrokerArena {
        mapping: SharedMapping::from_fd(arena_fd, parsed.arena_size as usize)?,
    };

    let ack = ServerHello {
        version: PROTOCOL_VERSION,
        status: status::SUCCESS,
        server_pid: std::process::id(),
    };
    send_message(connection, &ack.encode(), &[])?;

    loop {
        let message = match receive_message(connection) {
            Ok(message) => message,
            // Client went away; session over.
            Err(_) => return Ok(()),
        };
        let envelope = Envelope::parse(&message.data)?;
        let api = envelope.api_number();
        let fd_count = message.fds.len();

        let (status, reply) = match envelope.decode_request() {
            Ok(request) => {
                shared
                    .calls
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(RecordedCall {
                        request: request.clone(),
                        arena: arena.snapshot(),
                        fd_count,
                    });
                let response = responder(&request, &arena);
                (response.status, response.reply)
            }
            Err(_) => (status::INVALID_PARAMETER, None),
        };

        let reply = Envelope::reply(api, status, reply.as_ref())?;
        send_message(connection, reply.as_bytes(), &[])?;
    }
}

/// Responder helper: answers heap-information queries the way a broker
/// does, including the buffer-too-small retry protocol.
pub fn heap_information_responder(content: String) -> Responder {
    let encoded = encode_heap_payload(&content);
    Box::new(move |request, arena| match request {
        RequestPayload::QueryProcessHeapInformation { data, .. } => {
            let required = encoded.len() as u32;
            if data.length < required {
                BrokerResponse::with_reply(
                    status::BUFFER_TOO_SMALL,
                    ReplyPayload::QueryProcessHeapInformation {
                        data_length: required,
                    },
                )
            } else {
                arena.write_at(data.offset, &encoded);
                BrokerResponse::with_reply(
                    status::SUCCESS,
                    ReplyPayload::QueryProcessHeapInformation {
                        data_length: required,
                    },
                )
            }
        }
        _ => BrokerResponse::success(),
    })
}

fn encode_heap_payload(content: &str) -> Vec<u8> {
    opsvc_protocol::wstr::encode(content)
}

fn peer_uid(socket: &Socket) -> std::io::Result<libc::uid_t> {
    let mut cred: libc::ucred = unsafe { std::mem::zeroed() };
    let mut len = size_of::<libc::ucred>() as libc::socklen_t;
    let rc = unsafe {
        libc::getsockopt(
            socket.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_PEERCRED,
            (&raw mut cred).cast(),
            &mut len,
        )
    };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(cred.uid)
}
