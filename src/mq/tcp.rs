//! TCP transport driver
//!
//! Addresses take the form `tcp://host:port`; a `*` host listens on all
//! interfaces. Each message travels as one frame: a 4-byte big-endian length
//! followed by the payload.
//!
//! A listening socket accepts any number of peers in a background thread and
//! reads each peer on its own thread into a shared inbox. Dropping either
//! half of a listening socket closes it: the port is released and every
//! accepted peer sees EOF. A dialing socket retries the connection until
//! [`DIAL_TIMEOUT`] elapses.

use super::peers::{Peer, PeerSet};
use super::{Driver, MqError, MqResult, Socket, SocketKind, SocketReader, SocketWriter};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Registry name of the TCP driver
pub const DRIVER_NAME: &str = "tcp";

/// Largest payload accepted in a single frame (64 MiB)
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// How long `dial` keeps retrying an unreachable peer
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause between dial attempts
pub const DIAL_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// How often the acceptor checks whether its listener was closed
pub const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(20);

const ADDRESS_PREFIX: &str = "tcp://";

/// Parse `tcp://host:port` into a `host:port` string suitable for std::net
pub fn parse_address(address: &str, listening: bool) -> MqResult<String> {
    let invalid = || MqError::InvalidAddress(address.to_string());

    let rest = address.strip_prefix(ADDRESS_PREFIX).ok_or_else(invalid)?;
    let (host, port) = rest.rsplit_once(':').ok_or_else(invalid)?;
    port.parse::<u16>().map_err(|_| invalid())?;

    let host = match host {
        "*" if listening => "0.0.0.0",
        "*" | "" => return Err(invalid()),
        host => host,
    };
    Ok(format!("{}:{}", host, port))
}

/// Write one length-prefixed frame
pub fn write_frame(w: &mut impl Write, data: &[u8]) -> MqResult<()> {
    if data.len() > MAX_FRAME_SIZE {
        return Err(MqError::FrameTooLarge(data.len()));
    }
    w.write_all(&(data.len() as u32).to_be_bytes())?;
    w.write_all(data)?;
    w.flush()?;
    Ok(())
}

/// Read one length-prefixed frame
///
/// An oversized frame is skipped before `FrameTooLarge` is returned, so the
/// next call starts at the following header.
pub fn read_frame(r: &mut impl Read) -> MqResult<Vec<u8>> {
    let mut header = [0u8; 4];
    r.read_exact(&mut header)?;
    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_SIZE {
        let skipped = std::io::copy(&mut r.by_ref().take(len as u64), &mut std::io::sink())?;
        if skipped < len as u64 {
            return Err(MqError::Closed);
        }
        return Err(MqError::FrameTooLarge(len));
    }
    let mut data = vec![0u8; len];
    r.read_exact(&mut data)?;
    Ok(data)
}

/// Driver for sockets speaking framed TCP
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpDriver;

impl TcpDriver {
    pub fn new() -> Self {
        Self
    }
}

impl Driver for TcpDriver {
    fn name(&self) -> &str {
        DRIVER_NAME
    }

    fn new_socket(&self, kind: SocketKind) -> MqResult<Box<dyn Socket>> {
        Ok(Box::new(TcpSocket {
            kind,
            state: State::Idle,
        }))
    }
}

impl Peer for TcpStream {
    fn deliver(&mut self, data: &[u8]) -> MqResult<()> {
        write_frame(self, data)
    }

    fn close(&mut self) {
        let _ = self.shutdown(Shutdown::Both);
    }
}

/// State shared by a listening socket, its acceptor and its peer threads
struct Listener {
    peers: PeerSet<TcpStream>,
    closed: AtomicBool,
}

impl Listener {
    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.peers.close();
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Closes the listener when dropped
struct ListenerHandle(Arc<Listener>);

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.0.close();
    }
}

enum State {
    Idle,
    Listening {
        local_addr: SocketAddr,
        inbox: Receiver<Vec<u8>>,
        listener: ListenerHandle,
    },
    Connected(TcpStream),
}

/// Socket created by [`TcpDriver`]
pub struct TcpSocket {
    kind: SocketKind,
    state: State,
}

impl TcpSocket {
    /// Address actually bound, once listening (useful with port 0)
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.state {
            State::Listening { local_addr, .. } => Some(*local_addr),
            State::Connected(stream) => stream.local_addr().ok(),
            State::Idle => None,
        }
    }
}

impl Socket for TcpSocket {
    fn kind(&self) -> SocketKind {
        self.kind
    }

    fn listen(&mut self, address: &str) -> MqResult<()> {
        if !matches!(self.state, State::Idle) {
            return Err(MqError::AlreadyConnected);
        }
        let addr = parse_address(address, true)?;
        let listener = TcpListener::bind(&addr).map_err(|e| match e.kind() {
            std::io::ErrorKind::AddrInUse => MqError::AddressInUse(address.to_string()),
            _ => MqError::from(e),
        })?;
        let local_addr = listener.local_addr()?;

        let (tx, inbox) = unbounded();
        let shared = Arc::new(Listener {
            peers: PeerSet::new(),
            closed: AtomicBool::new(false),
        });
        spawn_acceptor(listener, tx, shared.clone())?;

        tracing::debug!("tcp {} listening at {}", self.kind, local_addr);
        self.state = State::Listening {
            local_addr,
            inbox,
            listener: ListenerHandle(shared),
        };
        Ok(())
    }

    fn dial(&mut self, address: &str) -> MqResult<()> {
        if !matches!(self.state, State::Idle) {
            return Err(MqError::AlreadyConnected);
        }
        let addr = parse_address(address, false)?;
        let deadline = Instant::now() + DIAL_TIMEOUT;

        let stream = loop {
            match TcpStream::connect(&addr) {
                Ok(stream) => break stream,
                Err(e) if Instant::now() < deadline => {
                    tracing::trace!("dial {} failed, retrying: {}", addr, e);
                    std::thread::sleep(DIAL_RETRY_INTERVAL);
                }
                Err(e) => {
                    return Err(MqError::Timeout(format!("dial {}: {}", address, e)));
                }
            }
        };
        stream.set_nodelay(true)?;

        tracing::debug!("tcp {} connected to {}", self.kind, addr);
        self.state = State::Connected(stream);
        Ok(())
    }

    fn split(self: Box<Self>) -> MqResult<(Box<dyn SocketWriter>, Box<dyn SocketReader>)> {
        let broadcast = self.kind.is_broadcast();
        match self.state {
            State::Idle => Err(MqError::NotConnected),
            State::Listening {
                inbox, listener, ..
            } => {
                let shared = listener.0.clone();
                Ok((
                    Box::new(ListenerWriter {
                        listener,
                        broadcast,
                    }),
                    Box::new(ListenerReader {
                        _listener: ListenerHandle(shared),
                        inbox,
                    }),
                ))
            }
            State::Connected(stream) => {
                let reader = stream.try_clone()?;
                Ok((
                    Box::new(StreamWriter { stream }),
                    Box::new(StreamReader { stream: reader }),
                ))
            }
        }
    }
}

fn spawn_acceptor(
    listener: TcpListener,
    inbox: Sender<Vec<u8>>,
    shared: Arc<Listener>,
) -> MqResult<()> {
    // Non-blocking so the loop notices `close` and drops the listener
    listener.set_nonblocking(true)?;
    std::thread::Builder::new()
        .name("fer-tcp-accept".to_string())
        .spawn(move || {
            while !shared.is_closed() {
                match listener.accept() {
                    Ok((stream, _)) => {
                        if let Err(e) = add_peer(stream, &inbox, &shared.peers) {
                            tracing::warn!("tcp peer setup failed: {}", e);
                        }
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => {
                        std::thread::sleep(ACCEPT_POLL_INTERVAL);
                    }
                    Err(e) => {
                        tracing::warn!("tcp accept failed: {}", e);
                        std::thread::sleep(ACCEPT_POLL_INTERVAL);
                    }
                }
            }
            tracing::debug!("tcp acceptor stopped");
        })?;
    Ok(())
}

fn add_peer(
    stream: TcpStream,
    inbox: &Sender<Vec<u8>>,
    peers: &PeerSet<TcpStream>,
) -> MqResult<()> {
    stream.set_nonblocking(false)?;
    stream.set_nodelay(true)?;
    let peer_addr = stream.peer_addr()?;
    let mut reader = stream.try_clone()?;
    let inbox = inbox.clone();

    std::thread::Builder::new()
        .name(format!("fer-tcp-peer-{}", peer_addr))
        .spawn(move || loop {
            match read_frame(&mut reader) {
                Ok(frame) => {
                    if inbox.send(frame).is_err() {
                        break;
                    }
                }
                Err(MqError::FrameTooLarge(len)) => {
                    tracing::warn!("tcp peer {} sent oversized frame ({} bytes)", peer_addr, len);
                }
                Err(e) => {
                    tracing::debug!("tcp peer {} gone: {}", peer_addr, e);
                    break;
                }
            }
        })?;

    tracing::debug!("tcp peer {} connected", peer_addr);
    peers.add(stream)
}

struct ListenerWriter {
    listener: ListenerHandle,
    broadcast: bool,
}

impl SocketWriter for ListenerWriter {
    fn send(&mut self, data: &[u8]) -> MqResult<()> {
        if data.len() > MAX_FRAME_SIZE {
            return Err(MqError::FrameTooLarge(data.len()));
        }
        self.listener.0.peers.deliver(self.broadcast, data)
    }
}

struct ListenerReader {
    _listener: ListenerHandle,
    inbox: Receiver<Vec<u8>>,
}

impl SocketReader for ListenerReader {
    fn recv(&mut self) -> MqResult<Vec<u8>> {
        self.inbox.recv().map_err(|_| MqError::Closed)
    }
}

struct StreamWriter {
    stream: TcpStream,
}

impl SocketWriter for StreamWriter {
    fn send(&mut self, data: &[u8]) -> MqResult<()> {
        write_frame(&mut self.stream, data)
    }
}

impl Drop for StreamWriter {
    fn drop(&mut self) {
        // Wakes a reader blocked on the same connection
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

struct StreamReader {
    stream: TcpStream,
}

impl SocketReader for StreamReader {
    fn recv(&mut self) -> MqResult<Vec<u8>> {
        read_frame(&mut self.stream)
    }
}
