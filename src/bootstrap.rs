//! Process bootstrap for a single device
//!
//! The sequence is fixed: parse arguments, install logging, load the
//! topology, open the transport driver, build the runtime, then drive the
//! device through `Configure`, `Init` and `Run` while the runtime's channels
//! are set up in the background. The first error aborts the sequence.

use crate::config::{Config, DeviceArgs};
use crate::device::{Device, DeviceRuntime, Lifecycle};
use crate::error::{Result, ResultExt};
use crate::logging;
use crate::mq;
use clap::Parser;

/// Entry point for device binaries
///
/// ```ignore
/// fn main() -> anyhow::Result<()> {
///     fer::main(MyDevice::default())?;
///     Ok(())
/// }
/// ```
pub fn main<D: Device>(device: D) -> Result<()> {
    let args = DeviceArgs::parse();
    let _guard = logging::init_logging(&args.log_filter, args.log_file.as_deref())?;

    let config = Config::from_args(&args)?;
    tracing::info!(
        "Starting device '{}' (transport={}, control={})",
        config.id,
        config.transport,
        config.control
    );

    let res = run_device(&config, device);
    match &res {
        Ok(()) => tracing::info!("Device '{}' terminated", config.id),
        Err(e) => tracing::error!("Device '{}' failed: {}", config.id, e),
    }
    res
}

/// Run `device` as the topology entry `config.id` until its `run` returns.
///
/// A fatal error recorded by the runtime (setup or send failure, or
/// `Controller::fatal`) is returned even when `run` itself returned `Ok`.
pub fn run_device<D: Device>(config: &Config, device: D) -> Result<()> {
    let driver = mq::open(&config.transport)
        .with_context(|| format!("opening transport '{}'", config.transport))?;
    let cfg = config.device()?;

    let mut runtime = DeviceRuntime::new(driver.as_ref(), cfg)?;
    let mut lifecycle = Lifecycle::new(device);

    lifecycle.configure(cfg)?;
    runtime.run()?;

    let res = lifecycle
        .init(&runtime)
        .and_then(|()| lifecycle.run(&runtime))
        .and_then(|()| lifecycle.terminate());

    runtime.stop();
    res?;

    match runtime.take_fatal_error() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
