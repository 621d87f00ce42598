//! Core data types shared by devices and the runtime
//!
//! - [`Msg`] - one quantum of data exchanged on a channel
//! - [`Cmd`] - control signal addressed to a channel's relay task
//! - [`ChannelId`] - (name, index) identity of a channel within a device

use crate::mq::MqError;
use std::fmt;

/// A quantum of data being exchanged between devices.
///
/// Payloads are opaque bytes. A message produced by a failed receive carries
/// the transport error in `err` and an empty payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Msg {
    /// Message payload
    pub data: Vec<u8>,
    /// Set when the receive that produced this message failed
    pub err: Option<MqError>,
}

impl Msg {
    /// Create a message carrying `data`
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            err: None,
        }
    }

    /// Create a message reporting a receive failure
    pub fn from_error(err: MqError) -> Self {
        Self {
            data: Vec::new(),
            err: Some(err),
        }
    }

    /// Whether this message carries a payload rather than an error
    pub fn is_ok(&self) -> bool {
        self.err.is_none()
    }

    /// Convert into the payload, or the receive error
    pub fn into_result(self) -> std::result::Result<Vec<u8>, MqError> {
        match self.err {
            Some(err) => Err(err),
            None => Ok(self.data),
        }
    }
}

impl From<std::result::Result<Vec<u8>, MqError>> for Msg {
    fn from(res: std::result::Result<Vec<u8>, MqError>) -> Self {
        match res {
            Ok(data) => Msg::new(data),
            Err(err) => Msg::from_error(err),
        }
    }
}

impl From<Vec<u8>> for Msg {
    fn from(data: Vec<u8>) -> Self {
        Msg::new(data)
    }
}

impl From<&[u8]> for Msg {
    fn from(data: &[u8]) -> Self {
        Msg::new(data)
    }
}

impl From<&str> for Msg {
    fn from(data: &str) -> Self {
        Msg::new(data.as_bytes())
    }
}

/// Control commands delivered to a channel's relay task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cmd {
    /// Terminate the relay task
    End,
}

/// Identity of a channel inside a device: a name shared by a group of
/// sockets, and the index of one member of that group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId {
    pub name: String,
    pub index: usize,
}

impl ChannelId {
    pub fn new(name: impl Into<String>, index: usize) -> Self {
        Self {
            name: name.into(),
            index,
        }
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.name, self.index)
    }
}
