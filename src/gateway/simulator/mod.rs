//! Gateway and bus simulation.
//!
//! `SimGateway` speaks the same ASCII line protocol as the real gateway and
//! forwards frames to a set of simulated gear. Delays are not slept, only
//! accumulated, so a full commissioning run completes instantly.

pub mod gear;

use super::channel::{ChannelResult, DynFuture, GatewayChannel};
use super::frame::{CommandFrame, Opcode};
use super::registry::DriverInfo;
use super::timing::TimingPolicy;
use super::GatewayDriver;
use crate::common::address::Long;
use crate::error::{OpenError, TransportError};
use futures::future::{self, FutureExt};
use gear::SimGear;
use log::debug;
use std::collections::{HashMap, VecDeque};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// State shared between the gateway and whoever inspects the bus
#[derive(Debug, Default)]
pub struct SimBus {
    pub gear: Vec<SimGear>,
    /// Every request received, in order
    pub frames: Vec<CommandFrame>,
    /// Sum of all delays the driver asked for
    pub elapsed: Duration,
    rx: VecDeque<u8>,
}

impl SimBus {
    fn request(&mut self, frame: CommandFrame) {
        self.frames.push(frame);
        let reply = match frame.opcode {
            Opcode::Version => Some("V010203".to_string()),
            Opcode::BusStatus => Some("D21".to_string()),
            Opcode::Send | Opcode::SendTwice => {
                let twice = frame.opcode == Opcode::SendTwice;
                let answers: Vec<u8> = self
                    .gear
                    .iter_mut()
                    .filter_map(|g| g.frame([frame.address, frame.data], twice))
                    .collect();
                match answers.split_first() {
                    None => None,
                    Some((first, rest)) if rest.iter().all(|a| a == first) => {
                        Some(format!("J{:02X}", first))
                    }
                    // Differing answers collide
                    Some(_) => Some("X".to_string()),
                }
            }
        };
        if let Some(reply) = reply {
            debug!("Simulated reply {}", reply);
            self.rx.extend(reply.bytes());
            self.rx.push_back(b'\n');
        }
    }
}

pub struct SimGateway {
    bus: Arc<Mutex<SimBus>>,
}

impl Default for SimGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl SimGateway {
    pub fn new() -> SimGateway {
        SimGateway {
            bus: Arc::new(Mutex::new(SimBus::default())),
        }
    }

    /// Gateway with one unaddressed gear for each random address
    pub fn with_random_addresses(addrs: &[Long]) -> SimGateway {
        let gw = SimGateway::new();
        if let Ok(mut bus) = gw.bus.lock() {
            bus.gear
                .extend(addrs.iter().map(|a| SimGear::with_random(*a)));
        }
        gw
    }

    /// Handle for inspecting and modifying the simulated bus
    pub fn bus(&self) -> Arc<Mutex<SimBus>> {
        self.bus.clone()
    }

    fn lock(&self) -> ChannelResult<MutexGuard<'_, SimBus>> {
        self.bus
            .lock()
            .map_err(|_| TransportError::Other("Simulator state poisoned".to_string()))
    }
}

impl GatewayChannel for SimGateway {
    fn write<'a>(&'a mut self, data: &'a [u8]) -> DynFuture<'a, ChannelResult<()>> {
        let res = self.lock().map(|mut bus| {
            for line in data.split_inclusive(|c| *c == b'\n') {
                if let Some(frame) = CommandFrame::parse(line) {
                    bus.request(frame);
                }
            }
        });
        future::ready(res).boxed()
    }

    fn bytes_available(&mut self) -> ChannelResult<usize> {
        Ok(self.lock()?.rx.len())
    }

    fn read(&mut self, len: usize, _timeout: Duration) -> DynFuture<'_, ChannelResult<Vec<u8>>> {
        let res = self.lock().map(|mut bus| {
            let n = len.min(bus.rx.len());
            bus.rx.drain(..n).collect()
        });
        future::ready(res).boxed()
    }

    fn wait(&mut self, delay: Duration) -> DynFuture<'_, ()> {
        if let Ok(mut bus) = self.bus.lock() {
            bus.elapsed += delay;
        }
        future::ready(()).boxed()
    }
}

fn driver_open(params: HashMap<String, String>) -> Result<GatewayDriver, OpenError> {
    let devices = match params.get("devices") {
        None => 4,
        Some(s) => u8::from_str(s)
            .map_err(|_| OpenError::ParameterError("devices has invalid value".to_string()))?,
    };
    let gw = SimGateway::new();
    if let Ok(mut bus) = gw.bus.lock() {
        bus.gear = (0..devices).map(|_| SimGear::new()).collect();
    }
    let timing = super::registry::timing_params(&params, TimingPolicy::default())?;
    Ok(GatewayDriver::new(Box::new(gw), timing))
}

pub fn driver_info() -> DriverInfo {
    DriverInfo {
        name: "SIM".to_string(),
        description: "Simulated gateway with unaddressed gear (devices=N)".to_string(),
        open: driver_open,
    }
}
