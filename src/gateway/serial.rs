use super::channel::{ChannelResult, DynFuture, GatewayChannel};
use super::registry::{self, DriverInfo};
use super::timing::TimingPolicy;
use super::GatewayDriver;
use crate::error::{OpenError, TransportError};
use futures::future::{self, FutureExt};
use log::debug;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::Instant;
use tokio_serial::{ClearBuffer, DataBits, Parity, SerialPort, SerialStream, StopBits};

/// Serial link to a DALI HAT style gateway
pub struct HatChannel {
    serial: SerialStream,
}

impl HatChannel {
    pub fn open(port: &str, baud_rate: u32, parity: Parity) -> Result<HatChannel, TransportError> {
        let builder = tokio_serial::new(port, baud_rate)
            .parity(parity)
            .data_bits(DataBits::Eight)
            .stop_bits(StopBits::One);
        let serial = SerialStream::open(&builder)?;
        debug!("Opened {} at {} baud", port, baud_rate);
        Ok(HatChannel { serial })
    }
}

impl GatewayChannel for HatChannel {
    fn write<'a>(&'a mut self, data: &'a [u8]) -> DynFuture<'a, ChannelResult<()>> {
        Box::pin(async move {
            self.serial.write_all(data).await?;
            self.serial.flush().await?;
            Ok(())
        })
    }

    fn bytes_available(&mut self) -> ChannelResult<usize> {
        Ok(self.serial.bytes_to_read()? as usize)
    }

    fn read(&mut self, len: usize, timeout: Duration) -> DynFuture<'_, ChannelResult<Vec<u8>>> {
        Box::pin(async move {
            let mut buf = vec![0u8; len];
            let mut pos = 0;
            let deadline = Instant::now() + timeout;
            while pos < len {
                match tokio::time::timeout_at(deadline, self.serial.read(&mut buf[pos..])).await {
                    Ok(Ok(0)) => break,
                    Ok(Ok(n)) => pos += n,
                    Ok(Err(e)) => return Err(e.into()),
                    Err(_) => break,
                }
            }
            buf.truncate(pos);
            Ok(buf)
        })
    }

    fn wait(&mut self, delay: Duration) -> DynFuture<'_, ()> {
        tokio::time::sleep(delay).boxed()
    }

    fn clear_input(&mut self) -> DynFuture<'_, ChannelResult<()>> {
        let res = self
            .serial
            .clear(ClearBuffer::Input)
            .map_err(TransportError::from);
        future::ready(res).boxed()
    }
}

/// Parity from its first letter. Empty means none.
fn parse_parity(s: &str) -> Result<Parity, OpenError> {
    match s.chars().next() {
        None | Some('N' | 'n') => Ok(Parity::None),
        Some('E' | 'e') => Ok(Parity::Even),
        Some('O' | 'o') => Ok(Parity::Odd),
        Some(_) => Err(OpenError::ParameterError(
            "parity has invalid value".to_string(),
        )),
    }
}

fn driver_open(params: HashMap<String, String>) -> Result<GatewayDriver, OpenError> {
    let port = params
        .get("port")
        .map(|s| s.as_str())
        .unwrap_or("/dev/ttyS0");
    let baud_rate = match params.get("baud_rate") {
        None => 19200,
        Some(s) => u32::from_str(s)
            .map_err(|_| OpenError::ParameterError("baud_rate has invalid value".to_string()))?,
    };
    let parity = match params.get("parity") {
        Some(p) => parse_parity(p)?,
        None => Parity::None,
    };
    let timing = registry::timing_params(&params, TimingPolicy::default())?;
    let channel = HatChannel::open(port, baud_rate, parity)?;
    Ok(GatewayDriver::new(Box::new(channel), timing))
}

pub fn driver_info() -> DriverInfo {
    DriverInfo {
        name: "HAT".to_string(),
        description: "Serial DALI HAT gateway (port, baud_rate, parity)".to_string(),
        open: driver_open,
    }
}
