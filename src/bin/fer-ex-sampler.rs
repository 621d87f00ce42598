//! Example device: sends "HELLO" on `data1` once per second

use crossbeam_channel::{select, tick};
use fer::{Controller, Device, DeviceConfig, FerError, Msg, Queue};
use std::time::Duration;

const PERIOD: Duration = Duration::from_secs(1);

#[derive(Default)]
struct Sampler {
    output: Option<Queue>,
}

impl Device for Sampler {
    fn configure(&mut self, _cfg: &DeviceConfig) -> fer::Result<()> {
        Ok(())
    }

    fn init(&mut self, ctl: &dyn Controller) -> fer::Result<()> {
        self.output = Some(ctl.chan("data1", 0)?);
        Ok(())
    }

    fn run(&mut self, ctl: &dyn Controller) -> fer::Result<()> {
        let output = self
            .output
            .as_ref()
            .ok_or_else(|| FerError::Device("sampler not initialised".to_string()))?;
        let done = ctl.done();
        let ticker = tick(PERIOD);

        loop {
            select! {
                recv(ticker) -> _ => {}
                recv(done.receiver()) -> _ => return Ok(()),
            }
            select! {
                send(output.outgoing(), Msg::from("HELLO")) -> res => {
                    if res.is_err() {
                        return Ok(());
                    }
                }
                recv(done.receiver()) -> _ => return Ok(()),
            }
        }
    }
}

fn main() -> anyhow::Result<()> {
    fer::main(Sampler::default())?;
    Ok(())
}
