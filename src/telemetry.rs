//! Remote dashboard bridge.
//!
//! Publishes the state of a dimmer and a relay as JSON attribute documents
//! and answers remote procedure calls using plain driver operations. The
//! message transport is left to the host.

use crate::common::address::Short;
use crate::common::cmd_defs::MAX_LEVEL;
use crate::error::TransportError;
use crate::gateway::GatewayDriver;
use log::{debug, info};
use serde_derive::{Deserialize, Serialize};
use serde_json::Value;
use std::error::Error;
use std::fmt;

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct RelayStatus {
    /// None if the relay is at neither end of the range
    #[serde(rename = "RelayStatus")]
    pub on: Option<bool>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct BrightnessLevel {
    #[serde(rename = "BrightnessLevel")]
    pub level: u8,
}

#[derive(Deserialize, Debug)]
pub struct RpcRequest {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// What to send back after handling a request
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RpcOutcome {
    /// Attribute documents to publish
    pub attributes: Vec<String>,
    /// Body of the RPC response, if the method has one
    pub response: Option<String>,
}

#[derive(Debug)]
pub enum BridgeError {
    Json(serde_json::Error),
    Transport(TransportError),
    UnknownMethod(String),
    InvalidParams(String),
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BridgeError::Json(e) => write!(f, "Invalid JSON: {}", e),
            BridgeError::Transport(e) => write!(f, "Gateway error: {}", e),
            BridgeError::UnknownMethod(m) => write!(f, "Unknown RPC method '{}'", m),
            BridgeError::InvalidParams(m) => write!(f, "Invalid parameters for '{}'", m),
        }
    }
}

impl Error for BridgeError {}

impl From<serde_json::Error> for BridgeError {
    fn from(e: serde_json::Error) -> Self {
        BridgeError::Json(e)
    }
}

impl From<TransportError> for BridgeError {
    fn from(e: TransportError) -> Self {
        BridgeError::Transport(e)
    }
}

/// Relay state from its level
pub fn relay_state(level: u8) -> Option<bool> {
    match level {
        0 => Some(false),
        MAX_LEVEL => Some(true),
        _ => None,
    }
}

/// Requested relay state, either a bool or 0/1
fn relay_param(params: &Value) -> Option<bool> {
    match params {
        Value::Bool(on) => Some(*on),
        _ => match params.as_u64()? {
            0 => Some(false),
            1 => Some(true),
            _ => None,
        },
    }
}

/// Addresses of the devices shown on the dashboard
#[derive(Debug, Copy, Clone)]
pub struct Bridge {
    pub dimmer: Short,
    pub relay: Short,
}

impl Default for Bridge {
    fn default() -> Self {
        Bridge {
            dimmer: Short::new(0),
            relay: Short::new(1),
        }
    }
}

impl Bridge {
    pub async fn relay_status(&self, driver: &mut GatewayDriver) -> Result<RelayStatus, TransportError> {
        let level = driver.query_level(self.relay).await?;
        Ok(RelayStatus {
            on: relay_state(level),
        })
    }

    pub async fn brightness(&self, driver: &mut GatewayDriver) -> Result<BrightnessLevel, TransportError> {
        let level = driver.query_level(self.dimmer).await?;
        Ok(BrightnessLevel { level })
    }

    /// Attribute documents for a periodic update
    pub async fn poll_attributes(&self, driver: &mut GatewayDriver) -> Result<Vec<String>, BridgeError> {
        let brightness = self.brightness(driver).await?;
        let relay = self.relay_status(driver).await?;
        Ok(vec![
            serde_json::to_string(&brightness)?,
            serde_json::to_string(&relay)?,
        ])
    }

    pub async fn handle_rpc(
        &self,
        driver: &mut GatewayDriver,
        payload: &str,
    ) -> Result<RpcOutcome, BridgeError> {
        let req: RpcRequest = serde_json::from_str(payload)?;
        debug!("RPC {} {}", req.method, req.params);
        let mut outcome = RpcOutcome::default();
        match req.method.as_str() {
            "SetDaliRelayState" => {
                let on = relay_param(&req.params)
                    .ok_or_else(|| BridgeError::InvalidParams(req.method.clone()))?;
                info!("Set relay {}", if on { "on" } else { "off" });
                driver.set_state(self.relay, on).await?;
            }
            "setBrightnessLevel" => {
                let level = req
                    .params
                    .as_u64()
                    .filter(|l| *l <= MAX_LEVEL as u64)
                    .ok_or_else(|| BridgeError::InvalidParams(req.method.clone()))?;
                info!("Set brightness level {}", level);
                driver.set_level(self.dimmer, level as u8).await?;
            }
            "checkRelayStatus" => {
                let status = self.relay_status(driver).await?;
                outcome.attributes.push(serde_json::to_string(&status)?);
                outcome.response = Some(serde_json::to_string(&status.on)?);
            }
            "checkBrightnessLevel" => {
                let brightness = self.brightness(driver).await?;
                outcome.attributes.push(serde_json::to_string(&brightness)?);
            }
            // Sent when a dashboard is opened so the control starts at the
            // current level
            "getStartingBrightnessLevel" => {
                let brightness = self.brightness(driver).await?;
                outcome.response = Some(serde_json::to_string(&brightness.level)?);
            }
            _ => return Err(BridgeError::UnknownMethod(req.method)),
        }
        Ok(outcome)
    }
}
