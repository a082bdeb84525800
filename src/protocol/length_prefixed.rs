//! Length-prefixed framing.
//!
//! # Wire Format
//! ```text
//! ┌───────────────┬──────┬─────────────────┐
//! │ length (u32be)│ kind │ body            │
//! └───────────────┴──────┴─────────────────┘
//!   length covers kind + body
//!   kind: 0x01 DATA, 0x06 ACK, 0x15 NAK
//! ```
//!
//! A document travels as a DATA frame. The receiving side answers with an
//! empty ACK or NAK frame; a deferred reply is another DATA frame.

use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::protocol::state::SessionState;
use crate::protocol::{ProtocolError, ProtocolSession};

pub const NAME: &str = "length-prefixed";

/// Largest frame accepted from a peer.
pub const MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum FrameKind {
    Data = 0x01,
    Ack = 0x06,
    Nak = 0x15,
}

impl TryFrom<u8> for FrameKind {
    type Error = ProtocolError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            0x01 => Ok(FrameKind::Data),
            0x06 => Ok(FrameKind::Ack),
            0x15 => Ok(FrameKind::Nak),
            other => Err(ProtocolError::Malformed(format!(
                "unknown frame kind 0x{other:02x}"
            ))),
        }
    }
}

/// Constructor registered under [`NAME`].
pub fn bind(stream: TcpStream) -> Result<Box<dyn ProtocolSession>, ProtocolError> {
    stream.set_nodelay(true)?;
    Ok(Box::new(LengthPrefixedSession::new(stream)))
}

pub struct LengthPrefixedSession {
    framed: Framed<TcpStream, LengthDelimitedCodec>,
    state: SessionState,
    received: Option<Bytes>,
}

impl LengthPrefixedSession {
    pub fn new(stream: TcpStream) -> Self {
        let codec = LengthDelimitedCodec::builder()
            .max_frame_length(MAX_FRAME_LENGTH)
            .new_codec();
        Self {
            framed: Framed::new(stream, codec),
            state: SessionState::new(),
            received: None,
        }
    }

    async fn write_frame(&mut self, kind: FrameKind, body: &[u8]) -> Result<(), ProtocolError> {
        let mut frame = BytesMut::with_capacity(1 + body.len());
        frame.put_u8(kind as u8);
        frame.extend_from_slice(body);
        self.framed.send(frame.freeze()).await?;
        Ok(())
    }

    async fn read_frame(&mut self) -> Result<(FrameKind, Bytes), ProtocolError> {
        let mut frame = match self.framed.next().await {
            Some(frame) => frame?,
            None => return Err(ProtocolError::ConnectionClosed),
        };
        if frame.is_empty() {
            return Err(ProtocolError::Malformed("empty frame".into()));
        }
        let kind = FrameKind::try_from(frame.get_u8())?;
        Ok((kind, frame.freeze()))
    }
}

#[async_trait]
impl ProtocolSession for LengthPrefixedSession {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn send(&mut self, document: &[u8]) -> Result<(), ProtocolError> {
        self.state.begin_send()?;
        let result = self.write_frame(FrameKind::Data, document).await;
        self.state.finish_send(result.is_ok());
        result
    }

    fn send_succeeded(&self) -> Result<bool, ProtocolError> {
        self.state.send_succeeded()
    }

    async fn read_reply(&mut self) -> Result<Bytes, ProtocolError> {
        self.state.require_sent("read_reply")?;
        match self.read_frame().await? {
            (FrameKind::Data, body) => Ok(body),
            (FrameKind::Ack, _) => Ok(Bytes::new()),
            (FrameKind::Nak, _) => Err(ProtocolError::Rejected),
        }
    }

    async fn receive(&mut self) -> Result<(), ProtocolError> {
        self.state.begin_receive()?;
        match self.read_frame().await? {
            (FrameKind::Data, body) => {
                self.received = Some(body);
                self.state.finish_receive();
                Ok(())
            }
            (kind, _) => Err(ProtocolError::Malformed(format!(
                "expected a data frame, got {kind:?}"
            ))),
        }
    }

    fn received(&self) -> Result<&Bytes, ProtocolError> {
        self.state.require_received("received")?;
        self.received.as_ref().ok_or(ProtocolError::OutOfOrder {
            operation: "received",
            required: "receive",
        })
    }

    async fn signal_success(&mut self) -> Result<(), ProtocolError> {
        self.state.signal("signal_success")?;
        self.write_frame(FrameKind::Ack, &[]).await
    }

    async fn signal_error(&mut self) -> Result<(), ProtocolError> {
        self.state.signal("signal_error")?;
        self.write_frame(FrameKind::Nak, &[]).await
    }

    fn into_stream(self: Box<Self>) -> TcpStream {
        crate::protocol::release(self.framed, NAME)
    }
}
