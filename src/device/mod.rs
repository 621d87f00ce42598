//! Devices and the runtime that hosts them
//!
//! A device is user code implementing [`Device`]. The runtime drives it
//! through a fixed lifecycle (see [`lifecycle`]) and hands it a
//! [`Controller`] for looking up channel queues and observing shutdown.
//!
//! # Example
//!
//! ```ignore
//! use fer::device::{Controller, Device};
//! use fer::config::DeviceConfig;
//! use fer::device::channel::Queue;
//!
//! #[derive(Default)]
//! struct Sink {
//!     input: Option<Queue>,
//! }
//!
//! impl Device for Sink {
//!     fn configure(&mut self, _cfg: &DeviceConfig) -> fer::Result<()> {
//!         Ok(())
//!     }
//!
//!     fn init(&mut self, ctl: &dyn Controller) -> fer::Result<()> {
//!         self.input = Some(ctl.chan("data2", 0)?);
//!         Ok(())
//!     }
//!
//!     fn run(&mut self, ctl: &dyn Controller) -> fer::Result<()> {
//!         ctl.done().wait();
//!         Ok(())
//!     }
//! }
//! ```

pub mod channel;
pub mod lifecycle;
pub mod runtime;
pub mod shutdown;

pub use channel::Queue;
pub use lifecycle::{DeviceState, Lifecycle, Transition};
pub use runtime::DeviceRuntime;
pub use shutdown::{Shutdown, ShutdownSignal};

use crate::config::DeviceConfig;
use crate::error::Result;

/// Runtime surface available to a device
pub trait Controller {
    /// Queue of the channel `name[index]`, or `FerError::NoSuchChannel`
    fn chan(&self, name: &str, index: usize) -> Result<Queue>;

    /// Device-wide shutdown signal
    fn done(&self) -> ShutdownSignal;

    /// Log an informational message in the device's context
    fn info(&self, msg: &str);

    /// Log an error, record it as the device's fatal error and fire shutdown
    fn fatal(&self, msg: &str);
}

/// User-supplied processing logic
pub trait Device: Send {
    /// Store the device's slice of the topology. Must not perform I/O.
    fn configure(&mut self, cfg: &DeviceConfig) -> Result<()>;

    /// Resolve the channels the device needs
    fn init(&mut self, ctl: &dyn Controller) -> Result<()>;

    /// Service channel queues until shutdown
    fn run(&mut self, ctl: &dyn Controller) -> Result<()>;

    fn pause(&mut self, _ctl: &dyn Controller) -> Result<()> {
        Ok(())
    }

    fn reset(&mut self, _ctl: &dyn Controller) -> Result<()> {
        Ok(())
    }
}

impl<D: Device + ?Sized> Device for Box<D> {
    fn configure(&mut self, cfg: &DeviceConfig) -> Result<()> {
        (**self).configure(cfg)
    }

    fn init(&mut self, ctl: &dyn Controller) -> Result<()> {
        (**self).init(ctl)
    }

    fn run(&mut self, ctl: &dyn Controller) -> Result<()> {
        (**self).run(ctl)
    }

    fn pause(&mut self, ctl: &dyn Controller) -> Result<()> {
        (**self).pause(ctl)
    }

    fn reset(&mut self, ctl: &dyn Controller) -> Result<()> {
        (**self).reset(ctl)
    }
}
