use std::fmt;
use std::io;
use std::pin::Pin;

use anyhow::Result;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt, stream};
use thiserror::Error;

pub type ChunkStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send + 'static>>;

#[derive(Debug, Error)]
#[error("response body exceeded the cache size limit after {bytes_read} bytes")]
pub struct BodyTooLarge {
    pub bytes_read: u64,
}

enum Inner {
    Empty,
    Buffered(Bytes),
    Streamed(ChunkStream),
}

/// Message body. Either already in memory or a stream of chunks that can be
/// consumed exactly once.
pub struct Body {
    inner: Inner,
}

impl Body {
    pub fn empty() -> Self {
        Self {
            inner: Inner::Empty,
        }
    }

    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self {
            inner: Inner::Buffered(bytes.into()),
        }
    }

    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Self {
            inner: Inner::Streamed(Box::pin(stream)),
        }
    }

    pub fn into_stream(self) -> ChunkStream {
        match self.inner {
            Inner::Empty => Box::pin(stream::empty()),
            Inner::Buffered(bytes) => Box::pin(stream::once(async move { Ok(bytes) })),
            Inner::Streamed(chunks) => chunks,
        }
    }

    /// Drains the body into memory.
    pub async fn buffer(self) -> io::Result<Bytes> {
        match self.inner {
            Inner::Empty => Ok(Bytes::new()),
            Inner::Buffered(bytes) => Ok(bytes),
            Inner::Streamed(mut chunks) => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = chunks.next().await {
                    buf.extend_from_slice(&chunk?);
                }
                Ok(buf.freeze())
            }
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            Inner::Empty => f.write_str("Body::Empty"),
            Inner::Buffered(bytes) => write!(f, "Body::Buffered({} bytes)", bytes.len()),
            Inner::Streamed(_) => f.write_str("Body::Streamed"),
        }
    }
}

/// Buffers a chunk stream, failing with [`BodyTooLarge`] as soon as the
/// running total passes `limit`. The stream is dropped on failure, which
/// signals abandonment to a tee feeding it.
pub(crate) async fn buffer_with_limit(mut chunks: ChunkStream, limit: usize) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk?;
        if buf.len() + chunk.len() > limit {
            return Err(BodyTooLarge {
                bytes_read: (buf.len() + chunk.len()) as u64,
            }
            .into());
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}
