//! Blocking seqpacket transport with descriptor passing.
//!
//! One datagram per protocol message, boundaries preserved by
//! `SOCK_SEQPACKET`. File descriptors (the arena at connect time, duplicated
//! handles for minidump requests) ride in `SCM_RIGHTS` control messages
//! attached to the datagram they belong to.

use std::io;
use std::io::IoSlice;
use std::mem::MaybeUninit;
use std::os::fd::AsRawFd;
use std::os::fd::BorrowedFd;
use std::os::fd::FromRawFd;
use std::os::fd::OwnedFd;
use std::os::fd::RawFd;
use std::path::Path;

use libc::c_uint;
use socket2::Domain;
use socket2::MaybeUninitSlice;
use socket2::MsgHdr;
use socket2::MsgHdrMut;
use socket2::SockAddr;
use socket2::Socket;
use socket2::Type;

pub const MAX_MESSAGE_SIZE: usize = 4096;
pub const MAX_FDS_PER_MESSAGE: usize = 4;

/// A message received off the channel: payload bytes plus any descriptors
/// the peer attached.
#[derive(Debug)]
pub struct ReceivedMessage {
    pub data: Vec<u8>,
    pub fds: Vec<OwnedFd>,
}

fn assume_init(buf: &[MaybeUninit<u8>]) -> &[u8] {
    unsafe { std::slice::from_raw_parts(buf.as_ptr().cast(), buf.len()) }
}

fn control_space_for_fds(count: usize) -> usize {
    unsafe { libc::CMSG_SPACE((count * size_of::<RawFd>()) as _) as usize }
}

fn extract_fds(control: &mut [MaybeUninit<u8>], len: usize) -> io::Result<Vec<OwnedFd>> {
    if len == 0 {
        return Ok(Vec::new());
    }
    let mut fds = Vec::new();
    let mut hdr: libc::msghdr = unsafe { std::mem::zeroed() };
    hdr.msg_control = control.as_mut_ptr().cast();
    hdr.msg_controllen = len as _;

    let mut cmsg = unsafe { libc::CMSG_FIRSTHDR(&hdr) };
    while !cmsg.is_null() {
        let level = unsafe { (*cmsg).cmsg_level };
        let ty = unsafe { (*cmsg).cmsg_type };
        if level == libc::SOL_SOCKET && ty == libc::SCM_RIGHTS {
            let data_ptr = unsafe { libc::CMSG_DATA(cmsg).cast::<RawFd>() };
            let fd_count: usize = {
                let cmsg_data_len =
                    unsafe { (*cmsg).cmsg_len as usize } - unsafe { libc::CMSG_LEN(0) as usize };
                cmsg_data_len / size_of::<RawFd>()
            };
            for i in 0..fd_count {
                let fd = unsafe { data_ptr.add(i).read() };
                fds.push(unsafe { OwnedFd::from_raw_fd(fd) });
            }
        }
        cmsg = unsafe { libc::CMSG_NXTHDR(&hdr, cmsg) };
    }
    Ok(fds)
}

/// Receives one datagram and its attached descriptors.
pub fn receive_message(socket: &Socket) -> io::Result<ReceivedMessage> {
    let mut data = [MaybeUninit::<u8>::uninit(); MAX_MESSAGE_SIZE];
    let mut control = vec![MaybeUninit::<u8>::uninit(); control_space_for_fds(MAX_FDS_PER_MESSAGE)];
    let (received, control_len) = {
        let mut bufs = [MaybeUninitSlice::new(&mut data)];
        let mut msg = MsgHdrMut::new()
            .with_buffers(&mut bufs)
            .with_control(&mut control);
        let received = socket.recvmsg(&mut msg, 0)?;
        (received, msg.control_len())
    };

    if received == 0 {
        return Err(io::Error::from(io::ErrorKind::UnexpectedEof));
    }

    let data = assume_init(&data[..received]).to_vec();
    let fds = extract_fds(&mut control, control_len)?;
    Ok(ReceivedMessage { data, fds })
}

/// Sends one datagram with optional attached descriptors.
pub fn send_message(socket: &Socket, data: &[u8], fds: &[BorrowedFd<'_>]) -> io::Result<()> {
    if fds.len() > MAX_FDS_PER_MESSAGE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("too many fds: {}", fds.len()),
        ));
    }

    let payload = [IoSlice::new(data)];
    let sent = if fds.is_empty() {
        let msg = MsgHdr::new().with_buffers(&payload);
        socket.sendmsg(&msg, 0)?
    } else {
        let mut control = vec![0u8; control_space_for_fds(fds.len())];
        unsafe {
            let cmsg = control.as_mut_ptr().cast::<libc::cmsghdr>();
            (*cmsg).cmsg_len =
                libc::CMSG_LEN(size_of::<RawFd>() as c_uint * fds.len() as c_uint) as _;
            (*cmsg).cmsg_level = libc::SOL_SOCKET;
            (*cmsg).cmsg_type = libc::SCM_RIGHTS;
            let data_ptr = libc::CMSG_DATA(cmsg).cast::<RawFd>();
            for (i, fd) in fds.iter().enumerate() {
                data_ptr.add(i).write(fd.as_raw_fd());
            }
        }
        let msg = MsgHdr::new().with_buffers(&payload).with_control(&control);
        socket.sendmsg(&msg, 0)?
    };

    if sent != data.len() {
        return Err(io::Error::from(io::ErrorKind::WriteZero));
    }
    Ok(())
}

/// The client end of a broker channel.
#[derive(Debug)]
pub struct BrokerChannel {
    socket: Socket,
}

impl BrokerChannel {
    /// Connects to the channel's socket path. All failures bubble up as the
    /// raw I/O error; the session layer translates them.
    pub fn connect(path: &Path) -> io::Result<Self> {
        let socket = Socket::new(Domain::UNIX, Type::SEQPACKET, None)?;
        socket.connect(&SockAddr::unix(path)?)?;
        Ok(Self { socket })
    }

    pub fn from_socket(socket: Socket) -> Self {
        Self { socket }
    }

    pub fn send(&self, data: &[u8], fds: &[BorrowedFd<'_>]) -> io::Result<()> {
        send_message(&self.socket, data, fds)
    }

    pub fn receive(&self) -> io::Result<ReceivedMessage> {
        receive_message(&self.socket)
    }
}
