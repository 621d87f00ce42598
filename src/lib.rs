//! # fer: devices and channels for message-passing pipelines
//!
//! A pipeline is a set of independent **devices** exchanging opaque byte
//! messages over pluggable transports. Each device is user code; fer supplies
//! its lifecycle, its named channels, and the threads that relay messages
//! between in-process queues and transport sockets.
//!
//! ## Architecture
//!
//! - **Config**: FairMQ-style topology files (JSON or TOML) and command-line arguments
//! - **Transport** (`mq`): driver/socket traits with in-memory and TCP drivers
//! - **Channels**: one relay thread and one reader thread per socket, bounded crossbeam queues
//! - **Runtime**: builds channels from topology, exposes them through [`Controller`]
//! - **Bootstrap**: sequences `Configure`, `Init` and `Run` for one device per process
//!
//! ## Example
//!
//! ```ignore
//! use fer::{Controller, Device, DeviceConfig, Queue};
//!
//! #[derive(Default)]
//! struct Sampler {
//!     out: Option<Queue>,
//! }
//!
//! impl Device for Sampler {
//!     fn configure(&mut self, _cfg: &DeviceConfig) -> fer::Result<()> {
//!         Ok(())
//!     }
//!
//!     fn init(&mut self, ctl: &dyn Controller) -> fer::Result<()> {
//!         self.out = Some(ctl.chan("data1", 0)?);
//!         Ok(())
//!     }
//!
//!     fn run(&mut self, ctl: &dyn Controller) -> fer::Result<()> {
//!         let out = self.out.as_ref().ok_or_else(|| fer::FerError::Device("not initialised".into()))?;
//!         while !ctl.done().is_fired() {
//!             out.send_data("HELLO")?;
//!         }
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     fer::main(Sampler::default())?;
//!     Ok(())
//! }
//! ```

pub mod bootstrap;
pub mod config;
pub mod device;
pub mod error;
pub mod logging;
pub mod mq;
pub mod types;

// Re-export commonly used types
pub use bootstrap::{main, run_device};
pub use config::{Config, DeviceArgs, DeviceConfig};
pub use device::{Controller, Device, DeviceRuntime, Queue, ShutdownSignal};
pub use error::{FerError, Result};
pub use types::{ChannelId, Cmd, Msg};
