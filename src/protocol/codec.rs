//! NDJSON line codec for child-process streams.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a maximum line length so a
//! misbehaving child cannot force an unbounded allocation with one
//! unterminated frame.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};

use crate::{AppError, Result};

/// Maximum inbound frame length: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Line framing for inbound NDJSON streams.
///
/// Inbound lines longer than [`MAX_LINE_BYTES`] fail with
/// [`AppError::Decode`]`("line too long: …")`. Outbound frames are written by
/// [`crate::process::ProcessHandle::write_frame`], not through this codec.
///
/// ```rust,ignore
/// use tokio_util::codec::FramedRead;
/// use agent_bridge::protocol::codec::FrameCodec;
///
/// let frames = FramedRead::new(child_stdout, FrameCodec::new());
/// ```
#[derive(Debug)]
pub struct FrameCodec(LinesCodec);

impl FrameCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_BYTES)
    }

    /// Create a codec with a custom inbound line limit.
    #[must_use]
    pub fn with_max_length(max_length: usize) -> Self {
        Self(LinesCodec::new_with_max_length(max_length))
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode(src).map_err(map_codec_error)
    }

    /// Yields a trailing line that lacks its `\n` when the stream ends.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode_eof(src).map_err(map_codec_error)
    }
}

fn map_codec_error(e: LinesCodecError) -> AppError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => {
            AppError::Decode("line too long: exceeded maximum frame length".into())
        }
        LinesCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
    }
}
