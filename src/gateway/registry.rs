use super::timing::TimingPolicy;
use super::GatewayDriver;
use crate::error::{DynResult, OpenError};
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;

pub type OpenFn = fn(HashMap<String, String>) -> Result<GatewayDriver, OpenError>;

#[derive(Clone)]
pub struct DriverInfo {
    pub name: String,
    pub description: String,
    pub open: OpenFn,
}

lazy_static! {
    static ref DRIVERS: Mutex<Vec<DriverInfo>> = Mutex::new(Vec::new());
}

pub fn add_driver(info: DriverInfo) {
    if let Ok(mut drivers) = DRIVERS.lock() {
        if !drivers.iter().any(|d| d.name == info.name) {
            drivers.push(info);
        }
    }
}

/// Names and descriptions of all registered drivers
pub fn driver_names() -> Vec<String> {
    match DRIVERS.lock() {
        Ok(drivers) => drivers
            .iter()
            .map(|d| format!("{}: {}", d.name, d.description))
            .collect(),
        Err(_) => Vec::new(),
    }
}

/// Split `name:key=value,key=value` into name and parameters
pub fn parse_device(device: &str) -> Result<(String, HashMap<String, String>), OpenError> {
    let (name, rest) = device.split_once(':').unwrap_or((device, ""));
    let mut params = HashMap::new();
    for param in rest.split(',').filter(|p| !p.is_empty()) {
        let Some((key, value)) = param.split_once('=') else {
            return Err(OpenError::ParameterError(format!(
                "Expected key=value, got '{}'",
                param
            )));
        };
        params.insert(key.trim().to_string(), value.trim().to_string());
    }
    Ok((name.to_string(), params))
}

/// Open a gateway driver.
///
/// `default` selects the first registered driver.
pub fn open(device: &str) -> Result<GatewayDriver, OpenError> {
    let (name, params) = parse_device(device)?;
    let info = {
        let drivers = DRIVERS
            .lock()
            .map_err(|_| OpenError::DriverError("Driver registry poisoned".into()))?;
        if name == "default" {
            drivers.first().cloned()
        } else {
            drivers
                .iter()
                .find(|d| d.name.eq_ignore_ascii_case(&name))
                .cloned()
        }
    };
    match info {
        Some(info) => (info.open)(params),
        None => Err(OpenError::NotFound),
    }
}

fn millis_param(params: &HashMap<String, String>, key: &str) -> Result<Option<Duration>, OpenError> {
    params
        .get(key)
        .map(|s| {
            u64::from_str(s)
                .map(Duration::from_millis)
                .map_err(|_| OpenError::ParameterError(format!("{} has invalid value", key)))
        })
        .transpose()
}

/// Override timing from `tx_delay_ms`, `rx_delay_ms` and `level_attempts`
pub fn timing_params(
    params: &HashMap<String, String>,
    mut timing: TimingPolicy,
) -> Result<TimingPolicy, OpenError> {
    if let Some(d) = millis_param(params, "tx_delay_ms")? {
        timing.short_unit = d;
    }
    if let Some(d) = millis_param(params, "rx_delay_ms")? {
        timing.long_unit = d;
    }
    if let Some(s) = params.get("level_attempts") {
        timing.level_attempts = u32::from_str(s).map_err(|_| {
            OpenError::ParameterError("level_attempts has invalid value".to_string())
        })?;
    }
    Ok(timing)
}

pub fn init() -> DynResult<()> {
    #[cfg(feature = "serial")]
    add_driver(super::serial::driver_info());
    #[cfg(any(test, feature = "simulator"))]
    add_driver(super::simulator::driver_info());
    Ok(())
}
