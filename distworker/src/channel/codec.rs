//! Wire framing for the controller channel.
//!
//! Every frame is a 4-byte big-endian length followed by one JSON document.
//!
//! - [`FrameCodec`] only splits the byte stream into frames. A frame whose
//!   body is not valid JSON is still a complete frame, so a reader built on
//!   it can report the bad frame and keep reading.
//! - [`JsonCodec`] adds serde_json on top, for typed streams.
//!
//! `FramedRead` stops yielding after its decoder returns an error, so inbound
//! traffic that must survive malformed frames goes through [`FrameCodec`].

use std::marker::PhantomData;

use serde::{Serialize, de::DeserializeOwned};
use tokio_util::bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use crate::error::ChannelError;

/// Upper bound for one frame. `collectionfinish` for a large plan carries
/// every node id, which can exceed the length codec's 8 MiB default.
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Frames at or above this size are logged.
const LARGE_FRAME_BYTES: usize = 100_000;

pub struct FrameCodec {
    inner: LengthDelimitedCodec,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            inner: LengthDelimitedCodec::builder()
                .length_field_length(4)
                .max_frame_length(MAX_FRAME_BYTES)
                .new_codec(),
        }
    }
}

impl Decoder for FrameCodec {
    type Item = BytesMut;
    type Error = ChannelError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Ok(self.inner.decode(src)?)
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = ChannelError;

    fn encode(&mut self, body: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if body.len() >= LARGE_FRAME_BYTES {
            tracing::info!(
                frame_bytes = body.len(),
                frame_kb = body.len() / 1024,
                "Large frame being encoded"
            );
        }
        self.inner.encode(body, dst)?;
        Ok(())
    }
}

/// Typed frames: JSON bodies decoded into / encoded from `T`.
pub struct JsonCodec<T> {
    frames: FrameCodec,
    _phantom: PhantomData<T>,
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> JsonCodec<T> {
    pub fn new() -> Self {
        Self {
            frames: FrameCodec::new(),
            _phantom: PhantomData,
        }
    }
}

impl<T: DeserializeOwned> Decoder for JsonCodec<T> {
    type Item = T;
    type Error = ChannelError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(frame) = self.frames.decode(src)? else {
            return Ok(None);
        };
        serde_json::from_slice(&frame)
            .map(Some)
            .map_err(ChannelError::Decode)
    }
}

impl<T: Serialize> Encoder<T> for JsonCodec<T> {
    type Error = ChannelError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = serde_json::to_vec(&item).map_err(ChannelError::Encode)?;
        tracing::trace!(frame_bytes = body.len(), "Encoding frame");
        self.frames.encode(Bytes::from(body), dst)
    }
}
