//! Stream decoding of the agent's stdout into JSON objects.
//!
//! Newlines are a soft boundary: a single JSON object may span several
//! lines, and a single line may carry informational prelude from wrapper
//! scripts before the first object. [`StreamDecoder`] accumulates line
//! fragments until a parse succeeds, which is the real object boundary.

use futures_util::StreamExt;
use serde_json::Value;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;

use crate::errors::{Result, SdkError};
use crate::transport::codec::NdjsonCodec;

/// Incremental NDJSON-object decoder over any byte stream.
pub struct StreamDecoder<R> {
    framed: FramedRead<R, NdjsonCodec>,
    buffer: String,
    max_buffer_size: usize,
}

impl<R> StreamDecoder<R>
where
    R: AsyncRead + Unpin,
{
    /// Wrap `input` with a per-object ceiling of `max_buffer_size` bytes.
    pub fn new(input: R, max_buffer_size: usize) -> Self {
        Self {
            framed: FramedRead::new(input, NdjsonCodec::new(max_buffer_size)),
            buffer: String::new(),
            max_buffer_size,
        }
    }

    /// Decode the next complete JSON object.
    ///
    /// Returns `Ok(None)` at EOF. A partial object left in the buffer at
    /// EOF is discarded.
    ///
    /// # Errors
    ///
    /// - [`SdkError::Decode`] when a single object (or line) grows past
    ///   the configured ceiling; carries the accumulated prefix.
    /// - [`SdkError::Process`] when the underlying read fails.
    pub async fn next_object(&mut self) -> Result<Option<Value>> {
        while let Some(item) = self.framed.next().await {
            let line = match item {
                Ok(line) => line,
                Err(SdkError::Decode { message, .. }) => {
                    // Attach whatever was accumulated so far for diagnosis.
                    return Err(SdkError::Decode {
                        message,
                        line: std::mem::take(&mut self.buffer),
                    });
                }
                Err(err) => return Err(err),
            };

            let mut fragment = line.trim();
            if fragment.is_empty() {
                continue;
            }

            // Wrapper scripts may print informational prelude before the
            // first JSON object. Skip it while nothing is buffered.
            if self.buffer.is_empty() {
                match fragment.find('{') {
                    None => continue,
                    Some(0) => {}
                    Some(start) => {
                        fragment = fragment[start..].trim();
                        if fragment.is_empty() {
                            continue;
                        }
                    }
                }
            }

            self.buffer.push_str(fragment);

            if self.buffer.len() > self.max_buffer_size {
                return Err(SdkError::Decode {
                    message: format!(
                        "JSON message exceeded maximum buffer size of {} bytes",
                        self.max_buffer_size
                    ),
                    line: std::mem::take(&mut self.buffer),
                });
            }

            match serde_json::from_str::<Value>(&self.buffer) {
                Ok(value) => {
                    self.buffer.clear();
                    return Ok(Some(value));
                }
                // Incomplete object split across lines; keep accumulating.
                Err(_) => continue,
            }
        }

        Ok(None)
    }
}
