use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Byte stream the pool can hold.
pub trait Connection: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Connection for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Opens connections to downstream endpoints.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Connects to `address`.
    ///
    /// # Errors
    ///
    /// Returns the I/O error reported by the connect attempt.
    async fn dial(&self, address: &str) -> io::Result<Box<dyn Connection>>;
}

/// Dials plain TCP with `TCP_NODELAY` set.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpDialer;

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, address: &str) -> io::Result<Box<dyn Connection>> {
        let stream = TcpStream::connect(address).await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}
