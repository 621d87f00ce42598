//! In-memory transport driver
//!
//! Sockets created by one [`InprocDriver`] share an address space. Any string
//! is a valid address; an optional `inproc://` prefix is ignored. Dialing may
//! happen before the address is bound: messages sent by early dialers wait
//! for the listener. An address is forgotten once no socket refers to it.

use super::peers::{Peer, PeerSet};
use super::{Driver, MqError, MqResult, Socket, SocketKind, SocketReader, SocketWriter};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Registry name of the in-memory driver
pub const DRIVER_NAME: &str = "inproc";

const ADDRESS_PREFIX: &str = "inproc://";

/// Rendezvous point for one address
struct Endpoint {
    /// Dialers -> listener
    to_listener: Sender<Vec<u8>>,
    from_dialers: Receiver<Vec<u8>>,
    bound: AtomicBool,
    /// Listener -> dialers (one inbox per dialer)
    dialers: PeerSet<Sender<Vec<u8>>>,
}

impl Endpoint {
    fn new() -> Self {
        let (to_listener, from_dialers) = unbounded();
        Self {
            to_listener,
            from_dialers,
            bound: AtomicBool::new(false),
            dialers: PeerSet::new(),
        }
    }
}

impl Peer for Sender<Vec<u8>> {
    fn deliver(&mut self, data: &[u8]) -> MqResult<()> {
        self.send(data.to_vec()).map_err(|_| MqError::Closed)
    }
}

/// Endpoints by address, with the number of sockets using each
type Endpoints = Arc<Mutex<HashMap<String, (Arc<Endpoint>, usize)>>>;

/// Driver for sockets that live inside the current process
#[derive(Clone, Default)]
pub struct InprocDriver {
    endpoints: Endpoints,
}

impl InprocDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, (Arc<Endpoint>, usize)>> {
        self.endpoints.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn endpoint(&self, address: &str) -> MqResult<EndpointRef> {
        let key = address.strip_prefix(ADDRESS_PREFIX).unwrap_or(address);
        if key.is_empty() {
            return Err(MqError::InvalidAddress(address.to_string()));
        }
        let mut endpoints = self.lock();
        let (endpoint, users) = endpoints
            .entry(key.to_string())
            .or_insert_with(|| (Arc::new(Endpoint::new()), 0));
        *users += 1;
        Ok(EndpointRef {
            driver: self.clone(),
            key: key.to_string(),
            endpoint: endpoint.clone(),
        })
    }

    fn release(&self, key: &str) {
        let mut endpoints = self.lock();
        if let Some((_, users)) = endpoints.get_mut(key) {
            *users -= 1;
            if *users == 0 {
                endpoints.remove(key);
                tracing::trace!("inproc address {:?} released", key);
            }
        }
    }

    #[cfg(test)]
    fn endpoint_count(&self) -> usize {
        self.lock().len()
    }
}

impl Driver for InprocDriver {
    fn name(&self) -> &str {
        DRIVER_NAME
    }

    fn new_socket(&self, kind: SocketKind) -> MqResult<Box<dyn Socket>> {
        Ok(Box::new(InprocSocket {
            driver: self.clone(),
            kind,
            state: State::Idle,
        }))
    }
}

/// One socket's claim on an endpoint
struct EndpointRef {
    driver: InprocDriver,
    key: String,
    endpoint: Arc<Endpoint>,
}

impl std::ops::Deref for EndpointRef {
    type Target = Endpoint;

    fn deref(&self) -> &Endpoint {
        &self.endpoint
    }
}

impl Drop for EndpointRef {
    fn drop(&mut self) {
        self.driver.release(&self.key);
    }
}

/// Bound side of an endpoint, shared by the listener's two halves
struct Binding(EndpointRef);

impl Drop for Binding {
    fn drop(&mut self) {
        self.0.bound.store(false, Ordering::SeqCst);
    }
}

enum State {
    Idle,
    Listening(Binding),
    Dialed {
        endpoint: EndpointRef,
        inbox: Receiver<Vec<u8>>,
    },
}

/// Socket created by [`InprocDriver`]
pub struct InprocSocket {
    driver: InprocDriver,
    kind: SocketKind,
    state: State,
}

impl Socket for InprocSocket {
    fn kind(&self) -> SocketKind {
        self.kind
    }

    fn listen(&mut self, address: &str) -> MqResult<()> {
        if !matches!(self.state, State::Idle) {
            return Err(MqError::AlreadyConnected);
        }
        let endpoint = self.driver.endpoint(address)?;
        if endpoint.bound.swap(true, Ordering::SeqCst) {
            return Err(MqError::AddressInUse(address.to_string()));
        }
        tracing::trace!("inproc {} listening at {:?}", self.kind, address);
        self.state = State::Listening(Binding(endpoint));
        Ok(())
    }

    fn dial(&mut self, address: &str) -> MqResult<()> {
        if !matches!(self.state, State::Idle) {
            return Err(MqError::AlreadyConnected);
        }
        let endpoint = self.driver.endpoint(address)?;
        let (tx, inbox) = unbounded();
        endpoint.dialers.add(tx)?;
        tracing::trace!("inproc {} dialed {:?}", self.kind, address);
        self.state = State::Dialed { endpoint, inbox };
        Ok(())
    }

    fn split(self: Box<Self>) -> MqResult<(Box<dyn SocketWriter>, Box<dyn SocketReader>)> {
        let kind = self.kind;
        match self.state {
            State::Idle => Err(MqError::NotConnected),
            State::Listening(binding) => {
                let inbox = binding.0.from_dialers.clone();
                let binding = Arc::new(binding);
                Ok((
                    Box::new(ListenerWriter {
                        binding: binding.clone(),
                        broadcast: kind.is_broadcast(),
                    }),
                    Box::new(ListenerReader {
                        _binding: binding,
                        inbox,
                    }),
                ))
            }
            State::Dialed { endpoint, inbox } => {
                let to_listener = endpoint.to_listener.clone();
                let endpoint = Arc::new(endpoint);
                Ok((
                    Box::new(DialerWriter {
                        _endpoint: endpoint.clone(),
                        to_listener,
                    }),
                    Box::new(DialerReader {
                        _endpoint: endpoint,
                        inbox,
                    }),
                ))
            }
        }
    }
}

struct ListenerWriter {
    binding: Arc<Binding>,
    broadcast: bool,
}

impl SocketWriter for ListenerWriter {
    fn send(&mut self, data: &[u8]) -> MqResult<()> {
        self.binding.0.dialers.deliver(self.broadcast, data)
    }
}

struct ListenerReader {
    _binding: Arc<Binding>,
    inbox: Receiver<Vec<u8>>,
}

impl SocketReader for ListenerReader {
    fn recv(&mut self) -> MqResult<Vec<u8>> {
        self.inbox.recv().map_err(|_| MqError::Closed)
    }
}

struct DialerWriter {
    _endpoint: Arc<EndpointRef>,
    to_listener: Sender<Vec<u8>>,
}

impl SocketWriter for DialerWriter {
    fn send(&mut self, data: &[u8]) -> MqResult<()> {
        self.to_listener
            .send(data.to_vec())
            .map_err(|_| MqError::Closed)
    }
}

struct DialerReader {
    _endpoint: Arc<EndpointRef>,
    inbox: Receiver<Vec<u8>>,
}

impl SocketReader for DialerReader {
    fn recv(&mut self) -> MqResult<Vec<u8>> {
        self.inbox.recv().map_err(|_| MqError::Closed)
    }
}
