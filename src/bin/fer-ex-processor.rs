//! Example device: reads `data1`, tags each payload and forwards it on `data2`

use crossbeam_channel::select;
use fer::{Controller, Device, DeviceConfig, FerError, Msg, Queue};

#[derive(Default)]
struct Processor {
    cfg: DeviceConfig,
    input: Option<Queue>,
    output: Option<Queue>,
}

impl Processor {
    fn process(&self, data: &[u8]) -> Vec<u8> {
        let mut out = data.to_vec();
        out.extend_from_slice(format!(" (modified by {})", self.cfg.name()).as_bytes());
        out.extend_from_slice(chrono::Local::now().to_rfc3339().as_bytes());
        out
    }
}

impl Device for Processor {
    fn configure(&mut self, cfg: &DeviceConfig) -> fer::Result<()> {
        self.cfg = cfg.clone();
        Ok(())
    }

    fn init(&mut self, ctl: &dyn Controller) -> fer::Result<()> {
        self.input = Some(ctl.chan("data1", 0)?);
        self.output = Some(ctl.chan("data2", 0)?);
        Ok(())
    }

    fn run(&mut self, ctl: &dyn Controller) -> fer::Result<()> {
        let (input, output) = match (&self.input, &self.output) {
            (Some(input), Some(output)) => (input, output),
            _ => return Err(FerError::Device("processor not initialised".to_string())),
        };
        let done = ctl.done();

        loop {
            let msg = select! {
                recv(input.incoming()) -> msg => match msg {
                    Ok(msg) => msg,
                    Err(_) => return Ok(()),
                },
                recv(done.receiver()) -> _ => return Ok(()),
            };
            let payload = match msg.into_result() {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!("receive on data1 failed: {}", e);
                    continue;
                }
            };

            let out = Msg::new(self.process(&payload));
            select! {
                send(output.outgoing(), out) -> res => {
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
    fer::main(Processor::default())?;
    Ok(())
}
