//! Example device: logs every payload arriving on `data2`

use crossbeam_channel::select;
use fer::{Controller, Device, DeviceConfig, FerError, Queue};

#[derive(Default)]
struct Sink {
    data: Option<Queue>,
}

impl Device for Sink {
    fn configure(&mut self, _cfg: &DeviceConfig) -> fer::Result<()> {
        Ok(())
    }

    fn init(&mut self, ctl: &dyn Controller) -> fer::Result<()> {
        self.data = Some(ctl.chan("data2", 0)?);
        Ok(())
    }

    fn run(&mut self, ctl: &dyn Controller) -> fer::Result<()> {
        let data = self
            .data
            .as_ref()
            .ok_or_else(|| FerError::Device("sink not initialised".to_string()))?;
        let done = ctl.done();

        loop {
            select! {
                recv(data.incoming()) -> msg => match msg {
                    Ok(msg) => match msg.into_result() {
                        Ok(payload) => {
                            ctl.info(&format!("received: {:?}", String::from_utf8_lossy(&payload)))
                        }
                        Err(e) => tracing::warn!("receive on data2 failed: {}", e),
                    },
                    Err(_) => return Ok(()),
                },
                recv(done.receiver()) -> _ => return Ok(()),
            }
        }
    }
}

fn main() -> anyhow::Result<()> {
    fer::main(Sink::default())?;
    Ok(())
}
