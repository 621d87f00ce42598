//! Device lifecycle state machine
//!
//! ```text
//! Constructed --Configure--> Configured --Init--> Initialized --Run--> Running
//! Running     --Pause------> Paused     --Run---> Running
//! Initialized --Reset------> Initialized
//! Paused      --Reset------> Initialized
//! Running     --Terminate--> Terminated
//! ```
//!
//! Any other transition is rejected with `FerError::InvalidTransition` and
//! the device method is not called.

use super::{Controller, Device};
use crate::config::DeviceConfig;
use crate::error::{FerError, Result};

/// Lifecycle state of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeviceState {
    #[default]
    Constructed,
    Configured,
    Initialized,
    Running,
    Paused,
    Terminated,
}

/// Lifecycle transition requested by the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    Configure,
    Init,
    Run,
    Pause,
    Reset,
    Terminate,
}

impl DeviceState {
    /// State reached by applying `transition`, if allowed
    pub fn next(self, transition: Transition) -> Result<DeviceState> {
        use DeviceState::*;
        use Transition::*;

        match (self, transition) {
            (Constructed, Configure) => Ok(Configured),
            (Configured, Init) => Ok(Initialized),
            (Initialized | Paused, Run) => Ok(Running),
            (Running, Pause) => Ok(Paused),
            (Initialized | Paused, Reset) => Ok(Initialized),
            (Running, Terminate) => Ok(Terminated),
            (from, transition) => Err(FerError::InvalidTransition { from, transition }),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, DeviceState::Running)
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self, DeviceState::Terminated)
    }
}

/// A user device together with its lifecycle state
#[derive(Debug)]
pub struct Lifecycle<D> {
    device: D,
    state: DeviceState,
}

impl<D: Device> Lifecycle<D> {
    pub fn new(device: D) -> Self {
        Self {
            device,
            state: DeviceState::Constructed,
        }
    }

    /// Current state
    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn into_inner(self) -> D {
        self.device
    }

    pub fn configure(&mut self, cfg: &DeviceConfig) -> Result<()> {
        let next = self.state.next(Transition::Configure)?;
        self.device.configure(cfg)?;
        self.state = next;
        Ok(())
    }

    pub fn init(&mut self, ctl: &dyn Controller) -> Result<()> {
        let next = self.state.next(Transition::Init)?;
        self.device.init(ctl)?;
        self.state = next;
        Ok(())
    }

    /// Run the device. The state is `Running` for the duration of the call
    /// and stays there after it returns, until [`Lifecycle::terminate`].
    pub fn run(&mut self, ctl: &dyn Controller) -> Result<()> {
        self.state = self.state.next(Transition::Run)?;
        self.device.run(ctl)
    }

    pub fn pause(&mut self, ctl: &dyn Controller) -> Result<()> {
        let next = self.state.next(Transition::Pause)?;
        self.device.pause(ctl)?;
        self.state = next;
        Ok(())
    }

    pub fn reset(&mut self, ctl: &dyn Controller) -> Result<()> {
        let next = self.state.next(Transition::Reset)?;
        self.device.reset(ctl)?;
        self.state = next;
        Ok(())
    }

    pub fn terminate(&mut self) -> Result<()> {
        self.state = self.state.next(Transition::Terminate)?;
        Ok(())
    }
}
