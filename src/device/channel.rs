//! Channel relay tasks
//!
//! A channel owns one socket and moves messages between it and the
//! in-process [`Queue`] handed to user code. Once its socket is established
//! the socket is split and each half is driven by its own thread:
//!
//! - **relay**: waits on the outgoing queue, the command queue and the
//!   shutdown signal; forwards outgoing messages to the socket in order.
//! - **reader**: blocks on the socket and publishes every received payload
//!   (or receive error) on the incoming queue, in order.
//!
//! Keeping the blocking receive on its own thread means an outgoing message,
//! an `End` command or shutdown is never held up by a receive in flight.
//!
//! A failed send is fatal to the device: the relay logs it, records it as the
//! device's fatal error and fires the shutdown signal. A failed receive is
//! only surfaced to user code as a [`Msg`] carrying the error.

use crate::config::{ChannelConfig, SocketMethod};
use crate::device::shutdown::{Shutdown, ShutdownSignal};
use crate::error::{FerError, Result};
use crate::mq::{Driver, MqError, MqResult, Socket, SocketKind, SocketReader, SocketWriter};
use crate::types::{ChannelId, Cmd, Msg};
use crossbeam_channel::{bounded, select, Receiver, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::Span;

/// Capacity of the in-process message queues. Zero makes every hand-off a
/// rendezvous, so nothing is buffered beyond the message in flight.
pub const QUEUE_CAPACITY: usize = 0;

/// Capacity of a channel's command queue
pub const COMMAND_CAPACITY: usize = 1;

/// User-side end of a channel: send outgoing messages, receive incoming ones.
///
/// Cloning a queue yields another handle to the same channel.
#[derive(Debug, Clone)]
pub struct Queue {
    id: ChannelId,
    outgoing: Sender<Msg>,
    incoming: Receiver<Msg>,
}

impl Queue {
    /// Identity of the channel behind this queue
    pub fn id(&self) -> &ChannelId {
        &self.id
    }

    /// Hand a message to the channel's relay task.
    ///
    /// Blocks until the relay takes it; fails once the relay has exited.
    pub fn send(&self, msg: Msg) -> Result<()> {
        self.outgoing.send(msg).map_err(|_| self.closed())
    }

    /// Send a payload
    pub fn send_data(&self, data: impl Into<Vec<u8>>) -> Result<()> {
        self.send(Msg::new(data))
    }

    /// Block until the next incoming message
    pub fn recv(&self) -> Result<Msg> {
        self.incoming.recv().map_err(|_| self.closed())
    }

    /// Take an incoming message if one is ready
    pub fn try_recv(&self) -> Option<Msg> {
        self.incoming.try_recv().ok()
    }

    /// Wait up to `timeout` for an incoming message
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<Msg>> {
        match self.incoming.recv_timeout(timeout) {
            Ok(msg) => Ok(Some(msg)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(self.closed()),
        }
    }

    /// Incoming side, for use in `crossbeam_channel::select!`
    pub fn incoming(&self) -> &Receiver<Msg> {
        &self.incoming
    }

    /// Outgoing side, for use in `crossbeam_channel::select!`
    pub fn outgoing(&self) -> &Sender<Msg> {
        &self.outgoing
    }

    fn closed(&self) -> FerError {
        FerError::ChannelClosed {
            channel: self.id.clone(),
        }
    }
}

/// Validated socket specification of one channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketSpec {
    pub kind: SocketKind,
    pub method: SocketMethod,
    pub address: String,
}

impl SocketSpec {
    /// Check a channel entry: exactly one socket, known type, known method
    pub fn from_config(cfg: &ChannelConfig) -> Result<Self> {
        let socket = match cfg.sockets.as_slice() {
            [socket] => socket,
            sockets => {
                return Err(FerError::MultipleSockets {
                    name: cfg.name.clone(),
                    count: sockets.len(),
                })
            }
        };
        Ok(Self {
            kind: socket.kind()?,
            method: socket.method()?,
            address: socket.address.clone(),
        })
    }
}

/// A channel before its relay tasks are started
pub struct Channel {
    id: ChannelId,
    spec: SocketSpec,
    socket: Box<dyn Socket>,
    commands: Receiver<Cmd>,
    outgoing: Receiver<Msg>,
    incoming: Sender<Msg>,
    span: Span,
}

impl Channel {
    /// Create the channel's socket and queues.
    ///
    /// Returns the channel, the user-side queue and the command sender.
    pub fn new(
        driver: &dyn Driver,
        id: ChannelId,
        spec: SocketSpec,
        parent: &Span,
    ) -> Result<(Self, Queue, Sender<Cmd>)> {
        let span = tracing::info_span!(parent: parent, "channel", name = %id.name, index = id.index);
        let socket = driver.new_socket(spec.kind)?;

        let (cmd_tx, commands) = bounded(COMMAND_CAPACITY);
        let (out_tx, outgoing) = bounded(QUEUE_CAPACITY);
        let (incoming, in_rx) = bounded(QUEUE_CAPACITY);

        let queue = Queue {
            id: id.clone(),
            outgoing: out_tx,
            incoming: in_rx,
        };
        let channel = Self {
            id,
            spec,
            socket,
            commands,
            outgoing,
            incoming,
            span,
        };
        Ok((channel, queue, cmd_tx))
    }

    pub fn id(&self) -> &ChannelId {
        &self.id
    }

    pub fn spec(&self) -> &SocketSpec {
        &self.spec
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Listen or dial according to the configured method
    pub fn setup(&mut self) -> Result<()> {
        let _enter = self.span.enter();
        let address = self.spec.address.as_str();
        tracing::debug!("{} {} at {:?}", self.spec.method, self.spec.kind, address);

        let res = match self.spec.method {
            SocketMethod::Bind => self.socket.listen(address),
            SocketMethod::Connect => self.socket.dial(address),
        };
        res.map_err(|source| FerError::Setup {
            channel: self.id.clone(),
            method: self.spec.method,
            address: address.to_string(),
            source,
        })
    }

    /// Split the socket and start the relay and reader threads
    pub fn start(self, shutdown: &Shutdown) -> Result<ChannelTasks> {
        let (writer, reader) = self.socket.split()?;
        let thread_name = |role: &str| format!("fer-{}-{}-{}", role, self.id.name, self.id.index);

        let relay = RelayTask {
            id: self.id.clone(),
            writer: ChannelWriter { writer },
            outgoing: self.outgoing,
            commands: self.commands,
            signal: shutdown.signal(),
            shutdown: shutdown.clone(),
            span: self.span.clone(),
        };
        let relay = std::thread::Builder::new()
            .name(thread_name("relay"))
            .spawn(move || relay.run())?;

        let receiver = ReaderTask {
            reader: ChannelReader { reader },
            incoming: self.incoming,
            signal: shutdown.signal(),
            span: self.span,
        };
        let reader = std::thread::Builder::new()
            .name(thread_name("recv"))
            .spawn(move || receiver.run())?;

        Ok(ChannelTasks { relay, reader })
    }
}

/// Join handles of a started channel
pub struct ChannelTasks {
    pub relay: JoinHandle<()>,
    pub reader: JoinHandle<()>,
}

/// Sending half of a channel's socket
pub struct ChannelWriter {
    writer: Box<dyn SocketWriter>,
}

impl ChannelWriter {
    /// Transmit a payload; returns the number of bytes sent
    pub fn send(&mut self, data: &[u8]) -> MqResult<usize> {
        self.writer.send(data)?;
        Ok(data.len())
    }
}

/// Receiving half of a channel's socket
pub struct ChannelReader {
    reader: Box<dyn SocketReader>,
}

impl ChannelReader {
    /// Block for the next payload and wrap it (or the failure) in a message
    pub fn receive(&mut self) -> Msg {
        self.reader.recv().into()
    }
}

struct RelayTask {
    id: ChannelId,
    writer: ChannelWriter,
    outgoing: Receiver<Msg>,
    commands: Receiver<Cmd>,
    signal: ShutdownSignal,
    shutdown: Shutdown,
    span: Span,
}

impl RelayTask {
    fn run(self) {
        let RelayTask {
            id,
            mut writer,
            outgoing,
            commands,
            signal,
            shutdown,
            span,
        } = self;
        let _enter = span.enter();
        tracing::debug!("relay started");

        loop {
            select! {
                recv(outgoing) -> msg => {
                    let Ok(msg) = msg else {
                        tracing::debug!("queue dropped, relay stopping");
                        break;
                    };
                    if signal.is_fired() {
                        tracing::debug!("dropping outgoing message after shutdown");
                        break;
                    }
                    if let Err(source) = writer.send(&msg.data) {
                        tracing::error!("send error: {}", source);
                        shutdown.fail(FerError::Send { channel: id.clone(), source });
                        break;
                    }
                }
                recv(commands) -> cmd => match cmd {
                    Ok(Cmd::End) => {
                        tracing::debug!("end command received");
                        break;
                    }
                    Err(_) => break,
                },
                recv(signal.receiver()) -> _ => break,
            }
        }

        tracing::debug!("relay stopped");
    }
}

struct ReaderTask {
    reader: ChannelReader,
    incoming: Sender<Msg>,
    signal: ShutdownSignal,
    span: Span,
}

impl ReaderTask {
    fn run(mut self) {
        let _enter = self.span.enter();
        tracing::debug!("reader started");

        while !self.signal.is_fired() {
            let msg = self.reader.receive();
            let closed = msg.err == Some(MqError::Closed);
            if let Some(err) = &msg.err {
                tracing::warn!("receive error: {}", err);
            }

            select! {
                send(self.incoming, msg) -> res => if res.is_err() {
                    break;
                },
                recv(self.signal.receiver()) -> _ => break,
            }

            if closed {
                break;
            }
        }

        tracing::debug!("reader stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SocketConfig;
    use crate::mq::InprocDriver;
    use std::sync::{Arc, Mutex};

    /// Driver whose sockets record sends, optionally failing them
    struct RecordingDriver {
        sent: Arc<Mutex<Vec<Vec<u8>>>>,
        fail_sends: bool,
    }

    struct RecordingSocket {
        sent: Arc<Mutex<Vec<Vec<u8>>>>,
        fail_sends: bool,
    }

    struct RecordingWriter {
        sent: Arc<Mutex<Vec<Vec<u8>>>>,
        fail_sends: bool,
    }

    struct IdleReader;

    impl Driver for RecordingDriver {
        fn name(&self) -> &str {
            "recording"
        }

        fn new_socket(&self, _kind: SocketKind) -> MqResult<Box<dyn Socket>> {
            Ok(Box::new(RecordingSocket {
                sent: self.sent.clone(),
                fail_sends: self.fail_sends,
            }))
        }
    }

    impl Socket for RecordingSocket {
        fn kind(&self) -> SocketKind {
            SocketKind::Push
        }

        fn listen(&mut self, _address: &str) -> MqResult<()> {
            Ok(())
        }

        fn dial(&mut self, address: &str) -> MqResult<()> {
            Err(MqError::InvalidAddress(address.to_string()))
        }

        fn split(self: Box<Self>) -> MqResult<(Box<dyn SocketWriter>, Box<dyn SocketReader>)> {
            Ok((
                Box::new(RecordingWriter {
                    sent: self.sent,
                    fail_sends: self.fail_sends,
                }),
                Box::new(IdleReader),
            ))
        }
    }

    impl SocketWriter for RecordingWriter {
        fn send(&mut self, data: &[u8]) -> MqResult<()> {
            if self.fail_sends {
                return Err(MqError::Closed);
            }
            self.sent.lock().unwrap().push(data.to_vec());
            Ok(())
        }
    }

    impl SocketReader for IdleReader {
        fn recv(&mut self) -> MqResult<Vec<u8>> {
            let never = crossbeam_channel::never::<Vec<u8>>();
            never.recv().map_err(|_| MqError::Closed)
        }
    }

    fn recording(fail_sends: bool) -> (RecordingDriver, Arc<Mutex<Vec<Vec<u8>>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        (
            RecordingDriver {
                sent: sent.clone(),
                fail_sends,
            },
            sent,
        )
    }

    fn spec(kind: SocketKind, method: SocketMethod, address: &str) -> SocketSpec {
        SocketSpec {
            kind,
            method,
            address: address.to_string(),
        }
    }

    fn started(
        driver: &dyn Driver,
        name: &str,
        spec: SocketSpec,
        shutdown: &Shutdown,
    ) -> (Queue, Sender<Cmd>, ChannelTasks) {
        let (mut channel, queue, cmd) =
            Channel::new(driver, ChannelId::new(name, 0), spec, &Span::none()).unwrap();
        channel.setup().unwrap();
        let tasks = channel.start(shutdown).unwrap();
        (queue, cmd, tasks)
    }

    #[test]
    fn test_spec_validation() {
        let one = ChannelConfig::new("data", SocketConfig::new("push", "Bind", "x"));
        let spec = SocketSpec::from_config(&one).unwrap();
        assert_eq!(spec.kind, SocketKind::Push);
        assert_eq!(spec.method, SocketMethod::Bind);

        let mut two = one.clone();
        two.sockets.push(SocketConfig::new("push", "bind", "y"));
        assert!(matches!(
            SocketSpec::from_config(&two),
            Err(FerError::MultipleSockets { count: 2, .. })
        ));

        let none = ChannelConfig {
            name: "empty".to_string(),
            sockets: Vec::new(),
        };
        assert!(matches!(
            SocketSpec::from_config(&none),
            Err(FerError::MultipleSockets { count: 0, .. })
        ));

        let bad = ChannelConfig::new("data", SocketConfig::new("push", "broadcast", "x"));
        assert!(matches!(
            SocketSpec::from_config(&bad),
            Err(FerError::InvalidSocketMethod(_))
        ));
    }

    #[test]
    fn test_writer_reports_byte_count() {
        let (driver, sent) = recording(false);
        let socket = driver.new_socket(SocketKind::Push).unwrap();
        let (writer, _reader) = socket.split().unwrap();
        let mut writer = ChannelWriter { writer };

        assert_eq!(writer.send(b"hello").unwrap(), 5);
        assert_eq!(sent.lock().unwrap().as_slice(), &[b"hello".to_vec()]);
    }

    #[test]
    fn test_setup_failure_names_channel() {
        let (driver, _) = recording(false);
        let (mut channel, _queue, _cmd) = Channel::new(
            &driver,
            ChannelId::new("data1", 0),
            spec(SocketKind::Push, SocketMethod::Connect, "nowhere"),
            &Span::none(),
        )
        .unwrap();

        let err = channel.setup().unwrap_err();
        assert!(matches!(
            err,
            FerError::Setup { method: SocketMethod::Connect, ref address, .. } if address == "nowhere"
        ));
    }

    #[test]
    fn test_relay_forwards_in_order() {
        let (driver, sent) = recording(false);
        let shutdown = Shutdown::new();
        let (queue, cmd, tasks) = started(
            &driver,
            "out",
            spec(SocketKind::Push, SocketMethod::Bind, "out"),
            &shutdown,
        );

        for payload in ["A", "B", "C"] {
            queue.send_data(payload).unwrap();
        }
        // Commands queue behind the message in flight
        cmd.send(Cmd::End).unwrap();
        tasks.relay.join().unwrap();

        let sent = sent.lock().unwrap();
        assert_eq!(sent.as_slice(), &[b"A".to_vec(), b"B".to_vec(), b"C".to_vec()]);
    }

    #[test]
    fn test_end_command_stops_relay() {
        let (driver, sent) = recording(false);
        let shutdown = Shutdown::new();
        let (queue, cmd, tasks) = started(
            &driver,
            "out",
            spec(SocketKind::Push, SocketMethod::Bind, "out"),
            &shutdown,
        );

        cmd.send(Cmd::End).unwrap();
        tasks.relay.join().unwrap();

        assert!(matches!(
            queue.send_data("late"),
            Err(FerError::ChannelClosed { .. })
        ));
        assert!(sent.lock().unwrap().is_empty());
        assert!(!shutdown.signal().is_fired());
    }

    #[test]
    fn test_shutdown_stops_relay_and_drops_later_messages() {
        let (driver, sent) = recording(false);
        let shutdown = Shutdown::new();
        let (queue, _cmd, tasks) = started(
            &driver,
            "out",
            spec(SocketKind::Push, SocketMethod::Bind, "out"),
            &shutdown,
        );

        shutdown.fire();
        tasks.relay.join().unwrap();

        assert!(queue.send_data("after").is_err());
        assert!(sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_send_failure_is_fatal() {
        let (driver, _) = recording(true);
        let shutdown = Shutdown::new();
        let (queue, _cmd, tasks) = started(
            &driver,
            "out",
            spec(SocketKind::Push, SocketMethod::Bind, "out"),
            &shutdown,
        );

        queue.send_data("doomed").unwrap();
        tasks.relay.join().unwrap();

        assert!(shutdown.signal().is_fired());
        assert!(matches!(
            shutdown.take_fatal(),
            Some(FerError::Send { source: MqError::Closed, .. })
        ));
    }

    #[test]
    fn test_loopback_ping_pong() {
        let driver = InprocDriver::new();
        let shutdown = Shutdown::new();
        let (server, _server_cmd, _) = started(
            &driver,
            "server",
            spec(SocketKind::Pair, SocketMethod::Bind, "loop"),
            &shutdown,
        );
        let (client, _client_cmd, _) = started(
            &driver,
            "client",
            spec(SocketKind::Pair, SocketMethod::Connect, "loop"),
            &shutdown,
        );

        client.send_data("ping").unwrap();
        let msg = server.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
        assert_eq!(msg, Msg::new("ping"));

        server.send_data("pong").unwrap();
        let msg = client.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
        assert_eq!(msg.data, b"pong");
        assert!(msg.is_ok());

        shutdown.fire();
    }

    #[test]
    fn test_receive_error_reaches_queue() {
        struct ClosedReader;
        impl SocketReader for ClosedReader {
            fn recv(&mut self) -> MqResult<Vec<u8>> {
                Err(MqError::Closed)
            }
        }

        let (incoming, in_rx) = bounded(QUEUE_CAPACITY);
        let shutdown = Shutdown::new();
        let receiver = ReaderTask {
            reader: ChannelReader {
                reader: Box::new(ClosedReader),
            },
            incoming,
            signal: shutdown.signal(),
            span: Span::none(),
        };
        let handle = std::thread::spawn(move || receiver.run());

        let msg = in_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(msg.err, Some(MqError::Closed));
        // A closed socket ends the reader, disconnecting the queue
        handle.join().unwrap();
        assert!(in_rx.recv().is_err());
    }
}
