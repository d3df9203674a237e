use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use switchyard_wire::{FrameKind, Request, Response, decode_response, encode_request};

use super::POOL_TARGET;
use super::connections::{ConnectionPool, PooledConnection};
use super::errors::ClientError;
use crate::session::SessionBuffer;

/// Calls actions on downstream services over pooled connections.
#[derive(Debug, Clone)]
pub struct Client {
    pool: Arc<ConnectionPool>,
    max_frame_bytes: usize,
}

impl Client {
    /// Wraps `pool`; responses larger than `max_frame_bytes` are rejected.
    #[must_use]
    pub const fn new(pool: Arc<ConnectionPool>, max_frame_bytes: usize) -> Self {
        Self {
            pool,
            max_frame_bytes,
        }
    }

    /// Underlying pool.
    #[must_use]
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Sends `request` to the next endpoint of `group`.
    ///
    /// Returns `Ok(None)` for one-way requests once the frame is written.
    /// Any I/O or framing failure marks the connection dead; nothing is
    /// retried.
    ///
    /// # Errors
    ///
    /// Returns a [`ClientError`] when borrowing, writing, reading or
    /// decoding fails, or when the response carries a different trace id.
    pub async fn call(
        &self,
        group: &str,
        request: &Request,
    ) -> Result<Option<Response>, ClientError> {
        let frame = encode_request(request)?;
        let mut connection = self.pool.borrow(group).await?;
        match self.exchange(&mut connection, &frame, request).await {
            Ok(response) => {
                self.pool.release(connection);
                Ok(response)
            }
            Err(error) => {
                debug!(
                    target: POOL_TARGET,
                    group,
                    address = %connection.address(),
                    error = %error,
                    "upstream call failed; discarding connection"
                );
                self.pool.mark_dead(connection);
                Err(error)
            }
        }
    }

    async fn exchange(
        &self,
        connection: &mut PooledConnection,
        frame: &[u8],
        request: &Request,
    ) -> Result<Option<Response>, ClientError> {
        let stream = connection.stream_mut();
        stream.write_all(frame).await?;
        stream.flush().await?;
        if !request.respond {
            return Ok(None);
        }

        let mut buffer = SessionBuffer::new(FrameKind::Response, self.max_frame_bytes);
        loop {
            if let Some(frame) = buffer.try_extract_frame()? {
                let (response, _) = decode_response(&frame)?.ok_or(ClientError::Closed)?;
                if !same_trace(&response.trace_id, &request.trace_id) {
                    return Err(ClientError::TraceMismatch);
                }
                if !buffer.is_empty() {
                    connection.mark_dead();
                }
                return Ok(Some(response));
            }
            if stream.read_buf(buffer.read_buf_mut()).await? == 0 {
                return Err(ClientError::Closed);
            }
        }
    }
}

// Fixed-width trace ids come back with their zero padding trimmed.
fn same_trace(left: &[u8], right: &[u8]) -> bool {
    trim_zeros(left) == trim_zeros(right)
}

fn trim_zeros(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().rposition(|&byte| byte != 0).map_or(0, |at| at + 1);
    bytes.get(..end).unwrap_or_default()
}
