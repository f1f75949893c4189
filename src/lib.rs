pub mod common {
    pub mod address;
    pub mod cmd_defs;
    pub mod status;
}

pub mod commission;
pub mod error;
pub mod gateway;
pub mod power;
pub mod telemetry;
