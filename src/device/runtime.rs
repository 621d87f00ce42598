//! Device runtime: channels built from topology, wired to sockets
//!
//! [`DeviceRuntime`] is what a user device sees through the
//! [`Controller`] trait. It is built once from a driver and the device's
//! slice of the topology, after which its lookup tables never change.
//!
//! # Startup
//!
//! Construction validates every channel entry before any socket is created,
//! so a bad topology fails without side effects. [`DeviceRuntime::run`] then
//! launches one setup thread per channel (listen/dial may block), which
//! starts the channel's relay tasks once its socket is established. Setup
//! failures are fatal: they are recorded and fire the shutdown signal.

use crate::config::DeviceConfig;
use crate::device::channel::{Channel, ChannelTasks, Queue, SocketSpec};
use crate::device::shutdown::{Shutdown, ShutdownSignal};
use crate::device::Controller;
use crate::error::{FerError, Result};
use crate::mq::Driver;
use crate::types::{ChannelId, Cmd};
use crossbeam_channel::{Sender, TrySendError};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::Span;

/// Poll interval of [`DeviceRuntime::wait_started`]
const START_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Runtime state of one device
pub struct DeviceRuntime {
    name: String,
    /// Channels not yet handed to their setup thread, by name then index
    pending: BTreeMap<String, Vec<Channel>>,
    queues: HashMap<ChannelId, Queue>,
    commands: Vec<(ChannelId, Sender<Cmd>)>,
    shutdown: Shutdown,
    span: Span,
    setup_threads: Vec<JoinHandle<()>>,
    started: Arc<Mutex<Vec<ChannelTasks>>>,
}

impl DeviceRuntime {
    /// Build the channels described by `cfg`, creating one socket per channel
    pub fn new(driver: &dyn Driver, cfg: &DeviceConfig) -> Result<Self> {
        let span = tracing::info_span!("device", name = %cfg.name());
        tracing::debug!(parent: &span, "new device: {:?}", cfg);

        // Validate the whole topology before creating any socket
        let specs = cfg
            .channels
            .iter()
            .map(|ch| SocketSpec::from_config(ch).map(|spec| (ch.name.clone(), spec)))
            .collect::<Result<Vec<_>>>()
            .inspect_err(|e| tracing::error!(parent: &span, "invalid topology: {}", e))?;

        let mut pending: BTreeMap<String, Vec<Channel>> = BTreeMap::new();
        let mut queues = HashMap::new();
        let mut commands = Vec::new();

        for (name, spec) in specs {
            let members = pending.entry(name.clone()).or_default();
            let id = ChannelId::new(name, members.len());
            tracing::debug!(parent: &span, "new channel {}: {:?}", id, spec);

            let (channel, queue, cmd) = Channel::new(driver, id.clone(), spec, &span)
                .inspect_err(|e| tracing::error!(parent: &span, "channel {}: {}", id, e))?;
            members.push(channel);
            queues.insert(id.clone(), queue);
            commands.push((id, cmd));
        }

        Ok(Self {
            name: cfg.name().to_string(),
            pending,
            queues,
            commands,
            shutdown: Shutdown::new(),
            span,
            setup_threads: Vec::new(),
            started: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Device name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All channel identities, sorted
    pub fn channel_ids(&self) -> Vec<ChannelId> {
        let mut ids: Vec<_> = self.queues.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Queue of the channel `name[index]`
    pub fn chan(&self, name: &str, index: usize) -> Result<Queue> {
        self.queues
            .get(&ChannelId::new(name, index))
            .cloned()
            .ok_or_else(|| FerError::NoSuchChannel {
                name: name.to_string(),
                index,
            })
    }

    /// Shared shutdown signal
    pub fn done(&self) -> ShutdownSignal {
        self.shutdown.signal()
    }

    /// Owner handle of the shutdown signal
    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    /// Establish every channel's socket and start its relay tasks.
    ///
    /// Returns once all setup threads are launched; failures surface through
    /// the shutdown signal and [`DeviceRuntime::take_fatal_error`].
    pub fn run(&mut self) -> Result<()> {
        let pending = std::mem::take(&mut self.pending);

        for (name, channels) in pending {
            tracing::debug!(parent: &self.span, "init channels [{}]...", name);
            for channel in channels {
                let shutdown = self.shutdown.clone();
                let started = self.started.clone();
                let thread_name = format!("fer-setup-{}", channel.id());

                let handle = std::thread::Builder::new()
                    .name(thread_name)
                    .spawn(move || setup_and_start(channel, &shutdown, &started))?;
                self.setup_threads.push(handle);
            }
        }
        Ok(())
    }

    /// Deliver `cmd` to every relay task; returns how many accepted it
    pub fn broadcast(&self, cmd: Cmd) -> usize {
        let mut delivered = 0;
        for (id, tx) in &self.commands {
            match tx.try_send(cmd) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::debug!(parent: &self.span, "command queue of {} is full", id);
                }
                Err(TrySendError::Disconnected(_)) => {
                    tracing::debug!(parent: &self.span, "relay of {} already stopped", id);
                }
            }
        }
        delivered
    }

    /// Number of channels whose relay tasks are running or have run
    pub fn started_channels(&self) -> usize {
        self.started
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Wait until every channel is started, shutdown fires, or `timeout`
    /// elapses. Returns whether every channel started.
    pub fn wait_started(&self, timeout: Duration) -> bool {
        let total = self.queues.len();
        let deadline = Instant::now() + timeout;
        loop {
            if self.started_channels() == total {
                return true;
            }
            if self.shutdown.signal().is_fired() || Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(START_POLL_INTERVAL);
        }
    }

    /// Fire the shutdown signal, tell every relay to end and wait for the
    /// relays that were started.
    ///
    /// Reader tasks blocked in a socket receive are left to finish on their own.
    pub fn stop(&mut self) {
        tracing::debug!(parent: &self.span, "stopping channels...");
        self.shutdown.fire();
        self.broadcast(Cmd::End);

        let tasks = std::mem::take(
            &mut *self
                .started
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for task in tasks {
            if task.relay.join().is_err() {
                tracing::error!(parent: &self.span, "relay task panicked");
            }
        }
        // Setup threads exit on their own once the signal has fired
        self.setup_threads.clear();
    }

    /// Take the first fatal error reported by a channel or by the device.
    ///
    /// The error is moved out; later calls return `None`.
    pub fn take_fatal_error(&self) -> Option<FerError> {
        self.shutdown.take_fatal()
    }
}

fn setup_and_start(mut channel: Channel, shutdown: &Shutdown, started: &Mutex<Vec<ChannelTasks>>) {
    let span = channel.span().clone();

    if let Err(err) = channel.setup() {
        tracing::error!(parent: &span, "{}", err);
        shutdown.fail(err);
        return;
    }
    if shutdown.signal().is_fired() {
        tracing::debug!(parent: &span, "shutdown during setup, not starting");
        return;
    }

    match channel.start(shutdown) {
        Ok(tasks) => started
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tasks),
        Err(err) => {
            tracing::error!(parent: &span, "start failed: {}", err);
            shutdown.fail(err);
        }
    }
}

impl Controller for DeviceRuntime {
    fn chan(&self, name: &str, index: usize) -> Result<Queue> {
        DeviceRuntime::chan(self, name, index)
    }

    fn done(&self) -> ShutdownSignal {
        DeviceRuntime::done(self)
    }

    fn info(&self, msg: &str) {
        tracing::info!(parent: &self.span, "{}", msg);
    }

    fn fatal(&self, msg: &str) {
        tracing::error!(parent: &self.span, "{}", msg);
        self.shutdown.fail(FerError::Device(msg.to_string()));
    }
}

impl std::fmt::Debug for DeviceRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRuntime")
            .field("name", &self.name)
            .field("channels", &self.channel_ids())
            .field("started", &self.started_channels())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChannelConfig, SocketConfig};
    use crate::mq::{InprocDriver, MqError};

    fn device(channels: &[(&str, &str, &str)]) -> DeviceConfig {
        channels
            .iter()
            .fold(DeviceConfig::new("dev"), |dev, (name, method, addr)| {
                dev.with_channel(ChannelConfig::new(
                    *name,
                    SocketConfig::new("pair", *method, *addr),
                ))
            })
    }

    #[test]
    fn test_channels_registered_at_index_zero() {
        let driver = InprocDriver::new();
        let rt = DeviceRuntime::new(
            &driver,
            &device(&[("data1", "bind", "a"), ("data2", "connect", "b")]),
        )
        .unwrap();

        assert_eq!(rt.name(), "dev");
        assert_eq!(
            rt.channel_ids(),
            vec![ChannelId::new("data1", 0), ChannelId::new("data2", 0)]
        );
        assert_eq!(rt.chan("data2", 0).unwrap().id(), &ChannelId::new("data2", 0));
    }

    #[test]
    fn test_shared_name_gets_distinct_indices() {
        let driver = InprocDriver::new();
        let rt = DeviceRuntime::new(
            &driver,
            &device(&[("fan", "bind", "x"), ("fan", "bind", "y")]),
        )
        .unwrap();

        assert!(rt.chan("fan", 0).is_ok());
        assert!(rt.chan("fan", 1).is_ok());
        assert!(rt.chan("fan", 2).is_err());
    }

    #[test]
    fn test_lookup_unknown_channel() {
        let driver = InprocDriver::new();
        let rt = DeviceRuntime::new(&driver, &device(&[("data1", "bind", "a")])).unwrap();

        assert!(matches!(
            rt.chan("x", 0),
            Err(FerError::NoSuchChannel { ref name, index: 0 }) if name == "x"
        ));
        assert!(matches!(
            rt.chan("data1", 1),
            Err(FerError::NoSuchChannel { .. })
        ));
    }

    #[test]
    fn test_invalid_method_fails_construction() {
        let driver = InprocDriver::new();
        let res = DeviceRuntime::new(&driver, &device(&[("data1", "broadcast", "a")]));
        assert!(matches!(res, Err(FerError::InvalidSocketMethod(_))));
    }

    #[test]
    fn test_setup_failure_is_fatal() {
        let driver = InprocDriver::new();
        let mut first =
            DeviceRuntime::new(&driver, &device(&[("data1", "bind", "taken")])).unwrap();
        let mut second =
            DeviceRuntime::new(&driver, &device(&[("data1", "bind", "taken")])).unwrap();

        first.run().unwrap();
        assert!(first.wait_started(Duration::from_secs(5)));

        second.run().unwrap();
        assert!(second.done().wait_timeout(Duration::from_secs(5)));
        assert!(matches!(
            second.take_fatal_error(),
            Some(FerError::Setup { source: MqError::AddressInUse(_), .. })
        ));

        first.stop();
        second.stop();
    }

    #[test]
    fn test_broadcast_reaches_every_channel() {
        let driver = InprocDriver::new();
        let rt = DeviceRuntime::new(
            &driver,
            &device(&[("a", "bind", "bc-a"), ("b", "bind", "bc-b")]),
        )
        .unwrap();

        // Command queues hold one command each until the relays start
        assert_eq!(rt.broadcast(Cmd::End), 2);
        assert_eq!(rt.broadcast(Cmd::End), 0);
    }

    #[test]
    fn test_stop_closes_queues() {
        let driver = InprocDriver::new();
        let mut rt = DeviceRuntime::new(&driver, &device(&[("data1", "bind", "stop")])).unwrap();
        let queue = rt.chan("data1", 0).unwrap();

        rt.run().unwrap();
        assert!(rt.wait_started(Duration::from_secs(5)));
        assert_eq!(rt.started_channels(), 1);

        rt.stop();
        assert!(rt.done().is_fired());
        assert!(matches!(
            queue.send_data("late"),
            Err(FerError::ChannelClosed { .. })
        ));
        assert!(rt.take_fatal_error().is_none());
    }

    #[test]
    fn test_controller_fatal_records_error() {
        let driver = InprocDriver::new();
        let rt = DeviceRuntime::new(&driver, &device(&[])).unwrap();
        let ctl: &dyn Controller = &rt;

        ctl.info("starting");
        ctl.fatal("boom");
        assert!(ctl.done().is_fired());
        assert!(matches!(rt.take_fatal_error(), Some(FerError::Device(m)) if m == "boom"));
        assert!(rt.take_fatal_error().is_none());
    }
}
