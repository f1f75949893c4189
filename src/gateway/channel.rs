use crate::error::TransportError;
use futures::future::{BoxFuture, FutureExt};
use std::time::Duration;

pub type ChannelResult<T> = Result<T, TransportError>;

/// Boxed future returned by channel methods
pub type DynFuture<'a, T> = BoxFuture<'a, T>;

/// Byte channel to the gateway.
///
/// Half duplex: the driver writes a request, waits, then looks at what has
/// been buffered. Waiting goes through the channel so that simulated
/// channels can skip it.
pub trait GatewayChannel: Send {
    fn write<'a>(&'a mut self, data: &'a [u8]) -> DynFuture<'a, ChannelResult<()>>;

    /// Number of received bytes that can be read without blocking
    fn bytes_available(&mut self) -> ChannelResult<usize>;

    /// Read up to `len` bytes. Returns early with what has been received if
    /// the read times out.
    fn read(&mut self, len: usize, timeout: Duration) -> DynFuture<'_, ChannelResult<Vec<u8>>>;

    fn wait(&mut self, delay: Duration) -> DynFuture<'_, ()>;

    /// Drop any buffered input
    fn clear_input(&mut self) -> DynFuture<'_, ChannelResult<()>> {
        async move {
            let n = self.bytes_available()?;
            if n > 0 {
                self.read(n, Duration::ZERO).await?;
            }
            Ok(())
        }
        .boxed()
    }
}
