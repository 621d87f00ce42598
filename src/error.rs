//! Error handling for fer
//!
//! This module defines the crate-wide error type and a Result alias for use
//! throughout the runtime. Transport-level failures have their own type,
//! [`MqError`], which is cheap to clone so it can ride inside a [`crate::Msg`].

use crate::config::SocketMethod;
use crate::device::{DeviceState, Transition};
use crate::mq::MqError;
use crate::types::ChannelId;
use thiserror::Error;

/// Main error type for fer operations
#[derive(Error, Debug)]
pub enum FerError {
    /// Errors related to configuration loading or validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// The requested device id is not part of the topology
    #[error("no such device {0:?}")]
    NoSuchDevice(String),

    /// Lookup of an unknown channel identity
    #[error("no such channel (name={name:?} index={index})")]
    NoSuchChannel { name: String, index: usize },

    /// A channel lists more than one socket specification
    #[error("channel {name:?} has {count} socket specifications, exactly one is supported")]
    MultipleSockets { name: String, count: usize },

    /// Connection method other than bind/connect
    #[error("invalid socket method (value={0:?})")]
    InvalidSocketMethod(String),

    /// Socket type not understood by the transport layer
    #[error("unknown socket type (value={0:?})")]
    UnknownSocketKind(String),

    /// Errors raised by a transport driver
    #[error("Transport error: {0}")]
    Transport(#[from] MqError),

    /// Listen or dial failed while setting up a channel
    #[error("{method}({address:?}) on channel {channel} failed: {source}")]
    Setup {
        channel: ChannelId,
        method: SocketMethod,
        address: String,
        #[source]
        source: MqError,
    },

    /// Sending on a channel's socket failed
    #[error("send on channel {channel} failed: {source}")]
    Send {
        channel: ChannelId,
        #[source]
        source: MqError,
    },

    /// The relay task behind a queue has exited
    #[error("channel {channel} is closed")]
    ChannelClosed { channel: ChannelId },

    /// Lifecycle method invoked from a state that does not allow it
    #[error("invalid lifecycle transition {transition:?} from state {from:?}")]
    InvalidTransition {
        from: DeviceState,
        transition: Transition,
    },

    /// Errors reported by user device code
    #[error("Device error: {0}")]
    Device(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<FerError>,
    },
}

impl FerError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        FerError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Strip any context wrappers and return the underlying error
    pub fn root(&self) -> &FerError {
        match self {
            FerError::WithContext { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Result type alias for fer operations
pub type Result<T> = std::result::Result<T, FerError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, MqError> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| FerError::Transport(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| FerError::Transport(e).with_context(f()))
    }
}
