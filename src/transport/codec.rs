//! NDJSON line codec for the agent's stdout.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a hard maximum line length
//! so an unterminated or runaway line from a misbehaving agent process
//! cannot exhaust memory. Lines over the cap surface as a decode error;
//! I/O failures surface as a process error.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};

use crate::errors::SdkError;

/// Line codec bounded by the transport's configured buffer ceiling.
///
/// Decode-only: outbound NDJSON lines are written straight to the child's
/// stdin under the transport write lock.
#[derive(Debug)]
pub struct NdjsonCodec {
    inner: LinesCodec,
    max_length: usize,
}

impl NdjsonCodec {
    /// Create a codec capped at `max_length` bytes per line.
    #[must_use]
    pub fn new(max_length: usize) -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(max_length),
            max_length,
        }
    }

    fn map_error(&self, err: LinesCodecError) -> SdkError {
        match err {
            LinesCodecError::MaxLineLengthExceeded => SdkError::Decode {
                message: format!(
                    "stdout line exceeded maximum buffer size of {} bytes",
                    self.max_length
                ),
                line: String::new(),
            },
            LinesCodecError::Io(io_err) => SdkError::Process {
                message: format!("failed reading JSON stream from agent: {io_err}"),
                exit_code: None,
                stderr: None,
            },
        }
    }
}

impl Decoder for NdjsonCodec {
    type Item = String;
    type Error = SdkError;

    /// Decode the next newline-terminated line, buffering until one is
    /// complete.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        self.inner.decode(src).map_err(|e| self.map_error(e))
    }

    /// Decode the final unterminated line at EOF.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        self.inner.decode_eof(src).map_err(|e| self.map_error(e))
    }
}
