//! Device-wide shutdown signal
//!
//! [`Shutdown`] is held by the runtime and by the tasks allowed to end the
//! device; [`ShutdownSignal`] is the read-only view handed to relay tasks and
//! user code. The signal can be polled ([`ShutdownSignal::is_fired`]) or
//! waited on inside `crossbeam_channel::select!` through
//! [`ShutdownSignal::receiver`], which disconnects when the signal fires.
//!
//! The first fatal error reported through [`Shutdown::fail`] is kept so the
//! bootstrap sequence can return it.

use crate::error::FerError;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

struct Inner {
    fired: AtomicBool,
    /// Dropped when the signal fires, disconnecting every receiver
    trigger: Mutex<Option<Sender<()>>>,
    fatal: Mutex<Option<FerError>>,
}

/// Owner side of the shutdown signal
#[derive(Clone)]
pub struct Shutdown {
    inner: Arc<Inner>,
    rx: Receiver<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, rx) = bounded(0);
        Self {
            inner: Arc::new(Inner {
                fired: AtomicBool::new(false),
                trigger: Mutex::new(Some(tx)),
                fatal: Mutex::new(None),
            }),
            rx,
        }
    }

    /// Fire the signal. Idempotent.
    pub fn fire(&self) {
        self.inner.fired.store(true, Ordering::SeqCst);
        let sender = self
            .inner
            .trigger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if sender.is_some() {
            tracing::debug!("Shutdown signal fired");
        }
    }

    /// Record a fatal error (the first one wins) and fire the signal
    pub fn fail(&self, err: FerError) {
        {
            let mut fatal = self
                .inner
                .fatal
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if fatal.is_none() {
                *fatal = Some(err);
            } else {
                tracing::debug!("Ignoring subsequent fatal error: {}", err);
            }
        }
        self.fire();
    }

    /// Take the recorded fatal error, if any
    pub fn take_fatal(&self) -> Option<FerError> {
        self.inner
            .fatal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Read-only view for observers
    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            inner: self.inner.clone(),
            rx: self.rx.clone(),
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer side of the shutdown signal
#[derive(Clone)]
pub struct ShutdownSignal {
    inner: Arc<Inner>,
    rx: Receiver<()>,
}

impl ShutdownSignal {
    /// Whether the signal has fired
    pub fn is_fired(&self) -> bool {
        self.inner.fired.load(Ordering::SeqCst)
    }

    /// Receiver that becomes disconnected once the signal fires.
    ///
    /// Never yields a value; use it as a `recv` arm of `select!`.
    pub fn receiver(&self) -> &Receiver<()> {
        &self.rx
    }

    /// Block until the signal fires
    pub fn wait(&self) {
        // Only ever returns Err(Disconnected)
        let _ = self.rx.recv();
    }

    /// Block until the signal fires or `timeout` elapses; returns whether it fired
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        match self.rx.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => self.is_fired(),
            _ => true,
        }
    }
}

impl std::fmt::Debug for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownSignal")
            .field("fired", &self.is_fired())
            .finish()
    }
}
