//! Named-message channel to the controller.
//!
//! - **codec**: length-prefixed JSON framing for AsyncRead/AsyncWrite
//!
//! Outbound traffic is always a typed [`Event`]; inbound traffic is the
//! bootstrap document followed by [`Command`]s. The remote end closing the
//! stream surfaces as [`ChannelError::EndOfStream`]. A malformed inbound
//! frame is [`ChannelError::Decode`] and does not end the stream.
//!
//! Traffic is mirrored at debug level on the `distworker::channel` target.

pub mod codec;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, Stdin, Stdout, stdin, stdout};
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::config::Bootstrap;
use crate::error::ChannelError;
use crate::protocol::{Command, Event, Message};
use codec::{FrameCodec, JsonCodec};

pub struct Channel<R, W> {
    reader: FramedRead<R, FrameCodec>,
    writer: FramedWrite<W, JsonCodec<Event>>,
}

pub type StdioChannel = Channel<Stdin, Stdout>;

impl StdioChannel {
    /// Channel over this process's stdin/stdout.
    pub fn stdio() -> Self {
        Channel::new(stdin(), stdout())
    }
}

impl<R, W> Channel<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: FramedRead::new(reader, FrameCodec::new()),
            writer: FramedWrite::new(writer, JsonCodec::new()),
        }
    }

    pub async fn send(&mut self, event: Event) -> Result<(), ChannelError> {
        tracing::debug!(target: "distworker::channel", event = ?event, "sending {}", event.name());
        self.writer.send(event).await
    }

    /// Block until the next command arrives.
    pub async fn receive(&mut self) -> Result<Command, ChannelError> {
        let frame = self.receive_frame().await?;
        let msg: Message = serde_json::from_value(frame).map_err(ChannelError::Decode)?;
        let command = Command::from_message(msg).map_err(ChannelError::Decode)?;
        tracing::debug!(target: "distworker::channel", command = ?command, "received {}", command.name());
        Ok(command)
    }

    /// Read the bootstrap document. Must be the first frame on the channel.
    pub async fn receive_bootstrap(&mut self) -> Result<Bootstrap, ChannelError> {
        let frame = self.receive_frame().await?;
        serde_json::from_value(frame).map_err(ChannelError::Decode)
    }

    async fn receive_frame(&mut self) -> Result<Value, ChannelError> {
        let frame = self.reader.next().await.ok_or(ChannelError::EndOfStream)??;
        serde_json::from_slice(&frame).map_err(|e| {
            tracing::warn!(frame_bytes = frame.len(), error = %e, "Discarding malformed frame");
            ChannelError::Decode(e)
        })
    }
}
