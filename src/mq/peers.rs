//! Peer bookkeeping for listening sockets
//!
//! A listening socket hands outgoing messages to the peers that dialed it:
//! round-robin for point-to-point kinds, copied to all peers for broadcast
//! kinds. Peers whose delivery fails are dropped from the set.
//!
//! Point-to-point messages sent while no peer is connected are queued and
//! flushed, in order, to the next peer that joins. Broadcast messages with
//! no peer are dropped. Sending never waits for a peer.

use super::{MqError, MqResult};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// One connected peer of a listening socket
pub(crate) trait Peer: Send {
    /// Hand one message to the peer
    fn deliver(&mut self, data: &[u8]) -> MqResult<()>;

    /// Release the connection; the remote end observes EOF
    fn close(&mut self) {}
}

struct Peers<P> {
    list: Vec<P>,
    next: usize,
    /// Point-to-point messages waiting for a first peer
    pending: VecDeque<Vec<u8>>,
    closed: bool,
}

pub(crate) struct PeerSet<P> {
    inner: Mutex<Peers<P>>,
}

impl<P: Peer> PeerSet<P> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Peers {
                list: Vec::new(),
                next: 0,
                pending: VecDeque::new(),
                closed: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Peers<P>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a peer, first flushing any queued messages to it
    pub fn add(&self, mut peer: P) -> MqResult<()> {
        let mut peers = self.lock();
        if peers.closed {
            peer.close();
            return Err(MqError::Closed);
        }

        while let Some(data) = peers.pending.front() {
            if let Err(err) = peer.deliver(data) {
                peer.close();
                return Err(err);
            }
            peers.pending.pop_front();
        }
        peers.list.push(peer);
        Ok(())
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lock().list.len()
    }

    /// Number of queued point-to-point messages
    #[cfg(test)]
    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }

    /// Deliver `data` to the next peer, or to every peer when `broadcast`
    pub fn deliver(&self, broadcast: bool, data: &[u8]) -> MqResult<()> {
        let mut peers = self.lock();
        if peers.closed {
            return Err(MqError::Closed);
        }

        if broadcast {
            peers.list.retain_mut(|peer| match peer.deliver(data) {
                Ok(()) => true,
                Err(err) => {
                    tracing::debug!("Dropping peer after failed delivery: {}", err);
                    peer.close();
                    false
                }
            });
            return Ok(());
        }

        while !peers.list.is_empty() {
            let idx = peers.next % peers.list.len();
            match peers.list[idx].deliver(data) {
                Ok(()) => {
                    peers.next = idx + 1;
                    return Ok(());
                }
                Err(err) => {
                    tracing::debug!("Dropping peer after failed delivery: {}", err);
                    peers.list.remove(idx).close();
                }
            }
        }

        peers.pending.push_back(data.to_vec());
        Ok(())
    }

    /// Close every peer and refuse further peers and messages
    pub fn close(&self) {
        let mut peers = self.lock();
        peers.closed = true;
        peers.pending.clear();
        for mut peer in peers.list.drain(..) {
            peer.close();
        }
    }
}
