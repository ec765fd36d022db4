//! Stream open/close pairing for HTTP transfers.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use ripstream_core::backend::ByteStream;
use ripstream_core::{RegistryError, RegistryHandle, ResourceId};

/// One counted transfer of a file.
///
/// Created after the registry has counted the open; the matching close is
/// sent exactly once, on [`StreamLease::close`] or on drop.
pub struct StreamLease {
    registry: RegistryHandle,
    id: ResourceId,
    file_index: usize,
    closed: bool,
}

impl StreamLease {
    /// Registers an open transfer of `file_index`.
    ///
    /// # Errors
    ///
    /// - `RegistryError::RegistryShutdown` - Registry actor is gone
    pub async fn open(
        registry: &RegistryHandle,
        id: ResourceId,
        file_index: usize,
    ) -> Result<Self, RegistryError> {
        registry.stream_open(id.clone(), file_index).await?;
        Ok(Self {
            registry: registry.clone(),
            id,
            file_index,
            closed: false,
        })
    }

    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.registry.stream_close(self.id.clone(), self.file_index);
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for StreamLease {
    fn drop(&mut self) {
        self.close();
    }
}

/// Response body stream that holds a lease until the transfer ends.
///
/// The lease closes when the backend stream finishes or fails, or when the
/// body is dropped after a client disconnect.
pub struct LeasedStream {
    inner: ByteStream,
    lease: StreamLease,
}

impl LeasedStream {
    pub fn new(inner: ByteStream, lease: StreamLease) -> Self {
        Self { inner, lease }
    }
}

impl Stream for LeasedStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = self.inner.poll_next_unpin(cx);
        match &polled {
            Poll::Ready(None) => self.lease.close(),
            Poll::Ready(Some(Err(err))) => {
                tracing::debug!("Stream {}/{} read failed: {}", self.lease.id, self.lease.file_index, err);
                self.lease.close();
            }
            _ => {}
        }
        polled
    }
}
