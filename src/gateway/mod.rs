pub mod channel;
pub mod driver;
pub mod frame;
pub mod registry;
pub mod timing;

pub use driver::GatewayDriver;
pub use registry::{driver_names, init, open};

#[cfg(feature = "serial")]
pub mod serial;

#[cfg(any(test, feature = "simulator"))]
pub mod simulator;
