//! Transport abstraction for channel sockets
//!
//! A [`Driver`] creates sockets for one concrete transport. Sockets are
//! established once (listen or dial) and then [split](Socket::split) into a
//! [`SocketWriter`] and a [`SocketReader`], each owned by exactly one task.
//!
//! # Drivers
//!
//! - [`InprocDriver`] (`"inproc"`) - in-memory transport between devices of one process
//! - [`TcpDriver`] (`"tcp"`) - length-prefixed frames over TCP
//!
//! Drivers are looked up by name in a process-wide registry that is
//! initialised once with the built-in drivers, in that order. New transports
//! are added with [`register`] without touching the device runtime.
//!
//! # Example
//!
//! ```ignore
//! use fer::mq::{self, SocketKind};
//!
//! let driver = mq::open("inproc")?;
//! let mut sock = driver.new_socket(SocketKind::Pair)?;
//! sock.listen("inproc://data1")?;
//! let (mut writer, mut reader) = sock.split()?;
//! ```

pub mod inproc;
pub(crate) mod peers;
pub mod tcp;

pub use inproc::InprocDriver;
pub use tcp::TcpDriver;

use std::fmt;
use std::io;
use std::str::FromStr;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use thiserror::Error;

/// Errors raised by transport drivers and sockets.
///
/// Cloneable so a failed receive can be handed to user code inside a
/// [`crate::Msg`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MqError {
    #[error("address already in use: {0}")]
    AddressInUse(String),

    #[error("invalid address {0:?}")]
    InvalidAddress(String),

    #[error("unknown socket type {0:?}")]
    UnknownSocketKind(String),

    #[error("socket closed")]
    Closed,

    #[error("socket is neither listening nor connected")]
    NotConnected,

    #[error("socket is already listening or connected")]
    AlreadyConnected,

    #[error("no such driver {0:?}")]
    UnknownDriver(String),

    #[error("driver {0:?} is already registered")]
    DuplicateDriver(String),

    #[error("frame of {0} bytes exceeds the maximum frame size")]
    FrameTooLarge(usize),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("{kind:?}: {message}")]
    Io { kind: io::ErrorKind, message: String },
}

impl From<io::Error> for MqError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => MqError::Closed,
            kind => MqError::Io {
                kind,
                message: err.to_string(),
            },
        }
    }
}

pub type MqResult<T> = std::result::Result<T, MqError>;

/// Messaging pattern of a socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketKind {
    Pub,
    Sub,
    XPub,
    XSub,
    Push,
    Pull,
    Req,
    Rep,
    Dealer,
    Router,
    Pair,
    Bus,
}

impl SocketKind {
    pub const ALL: [SocketKind; 12] = [
        SocketKind::Pub,
        SocketKind::Sub,
        SocketKind::XPub,
        SocketKind::XSub,
        SocketKind::Push,
        SocketKind::Pull,
        SocketKind::Req,
        SocketKind::Rep,
        SocketKind::Dealer,
        SocketKind::Router,
        SocketKind::Pair,
        SocketKind::Bus,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SocketKind::Pub => "pub",
            SocketKind::Sub => "sub",
            SocketKind::XPub => "xpub",
            SocketKind::XSub => "xsub",
            SocketKind::Push => "push",
            SocketKind::Pull => "pull",
            SocketKind::Req => "req",
            SocketKind::Rep => "rep",
            SocketKind::Dealer => "dealer",
            SocketKind::Router => "router",
            SocketKind::Pair => "pair",
            SocketKind::Bus => "bus",
        }
    }

    /// Whether a listening socket of this kind copies each message to every
    /// connected peer (rather than handing it to one of them)
    pub fn is_broadcast(self) -> bool {
        matches!(self, SocketKind::Pub | SocketKind::XPub | SocketKind::Bus)
    }
}

impl FromStr for SocketKind {
    type Err = MqError;

    fn from_str(s: &str) -> MqResult<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        SocketKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == wanted)
            .ok_or_else(|| MqError::UnknownSocketKind(s.to_string()))
    }
}

impl fmt::Display for SocketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Factory for sockets of one transport implementation
pub trait Driver: Send + Sync {
    /// Registry name of this driver (e.g. "tcp")
    fn name(&self) -> &str;

    /// Create an unconnected socket of the requested kind
    fn new_socket(&self, kind: SocketKind) -> MqResult<Box<dyn Socket>>;
}

/// A transport endpoint, established exactly once with `listen` or `dial`
pub trait Socket: Send {
    /// Kind requested at creation
    fn kind(&self) -> SocketKind;

    /// Accept peers at `address`
    fn listen(&mut self, address: &str) -> MqResult<()>;

    /// Connect to a listening peer at `address`
    ///
    /// May block until the peer is reachable.
    fn dial(&mut self, address: &str) -> MqResult<()>;

    /// Split an established socket into its send and receive halves
    fn split(self: Box<Self>) -> MqResult<(Box<dyn SocketWriter>, Box<dyn SocketReader>)>;
}

/// Sending half of an established socket
pub trait SocketWriter: Send {
    fn send(&mut self, data: &[u8]) -> MqResult<()>;
}

/// Receiving half of an established socket
pub trait SocketReader: Send {
    /// Block until the next payload arrives
    fn recv(&mut self) -> MqResult<Vec<u8>>;
}

// ==================== Driver Registry ====================

static REGISTRY: OnceLock<RwLock<Vec<Arc<dyn Driver>>>> = OnceLock::new();

fn registry() -> &'static RwLock<Vec<Arc<dyn Driver>>> {
    REGISTRY.get_or_init(|| {
        let builtin: Vec<Arc<dyn Driver>> =
            vec![Arc::new(InprocDriver::new()), Arc::new(TcpDriver::new())];
        RwLock::new(builtin)
    })
}

/// Make a driver available to [`open`] under its name
pub fn register(driver: Arc<dyn Driver>) -> MqResult<()> {
    let mut drivers = registry().write().unwrap_or_else(PoisonError::into_inner);
    if drivers.iter().any(|d| d.name() == driver.name()) {
        return Err(MqError::DuplicateDriver(driver.name().to_string()));
    }
    tracing::debug!("Registered transport driver '{}'", driver.name());
    drivers.push(driver);
    Ok(())
}

/// Look up a registered driver by name
pub fn open(name: &str) -> MqResult<Arc<dyn Driver>> {
    registry()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .iter()
        .find(|d| d.name() == name)
        .cloned()
        .ok_or_else(|| MqError::UnknownDriver(name.to_string()))
}

/// Names of all registered drivers, in registration order
pub fn drivers() -> Vec<String> {
    registry()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .iter()
        .map(|d| d.name().to_string())
        .collect()
}
