//! Byte-capped output capture.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

/// Read chunk size for child pipes.
pub(crate) const CHUNK_SIZE: usize = 8 * 1024;

/// Accumulates at most `cap` bytes and remembers whether more arrived.
#[derive(Debug)]
pub(crate) struct CappedBuffer {
    buf: Vec<u8>,
    cap: usize,
    overflowed: bool,
}

impl CappedBuffer {
    pub(crate) fn new(cap: usize) -> Self {
        Self {
            buf: Vec::with_capacity(cap.min(CHUNK_SIZE)),
            cap,
            overflowed: false,
        }
    }

    /// Append a chunk. Returns true once the cap has been exceeded; the
    /// bytes past the cap are dropped.
    pub(crate) fn push(&mut self, chunk: &[u8]) -> bool {
        let room = self.cap.saturating_sub(self.buf.len());
        if chunk.len() > room {
            self.buf.extend_from_slice(&chunk[..room]);
            self.overflowed = true;
        } else {
            self.buf.extend_from_slice(chunk);
        }
        self.overflowed
    }

    pub(crate) fn overflowed(&self) -> bool {
        self.overflowed
    }

    pub(crate) fn len(&self) -> usize {
        self.buf.len()
    }

    /// Decode as UTF-8, lossily, never exceeding the cap in bytes.
    pub(crate) fn into_string(self) -> String {
        let mut text = String::from_utf8_lossy(&self.buf).into_owned();
        if text.len() > self.cap {
            let mut end = self.cap;
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            text.truncate(end);
        }
        text
    }
}

/// Drain `reader` to EOF, keeping the first `cap` bytes.
///
/// Reading continues past the cap so a chatty child never blocks on a full
/// pipe.
pub(crate) async fn drain_capped<R>(mut reader: R, cap: usize) -> io::Result<CappedBuffer>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = CappedBuffer::new(cap);
    let mut chunk = vec![0u8; CHUNK_SIZE];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(buffer);
        }
        if !buffer.overflowed() {
            buffer.push(&chunk[..n]);
        }
    }
}
