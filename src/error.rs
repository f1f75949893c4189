use std::error::Error;
use std::fmt;

pub type DynResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Failure of the serial channel to the gateway.
///
/// Always fatal for the operation in progress. Malformed replies are not
/// errors, they decode to `ResponseToken::Invalid` or `NoResponse`.
#[derive(Debug)]
pub enum TransportError {
    Io(std::io::Error),
    #[cfg(feature = "serial")]
    Serial(tokio_serial::Error),
    /// The channel has been closed or the gateway is gone
    Closed,
    Other(String),
}

impl Error for TransportError {}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> TransportError {
        TransportError::Io(err)
    }
}

#[cfg(feature = "serial")]
impl From<tokio_serial::Error> for TransportError {
    fn from(err: tokio_serial::Error) -> TransportError {
        TransportError::Serial(err)
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Io(err) => write!(f, "Serial I/O failed: {}", err),
            #[cfg(feature = "serial")]
            TransportError::Serial(err) => write!(f, "Serial port error: {}", err),
            TransportError::Closed => write!(f, "Gateway channel closed"),
            TransportError::Other(msg) => f.write_str(msg),
        }
    }
}

/// Failure to open a gateway driver from the registry.
#[derive(Debug)]
pub enum OpenError {
    NotFound,
    ParameterError(String),
    DriverError(Box<dyn Error + Send + Sync>),
}

impl Error for OpenError {}

impl fmt::Display for OpenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpenError::NotFound => write!(f, "Driver not found"),
            OpenError::ParameterError(msg) => write!(f, "Invalid driver parameter: {}", msg),
            OpenError::DriverError(err) => write!(f, "Driver error: {}", err),
        }
    }
}

impl From<TransportError> for OpenError {
    fn from(err: TransportError) -> OpenError {
        OpenError::DriverError(Box::new(err))
    }
}
