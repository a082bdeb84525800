//! Newline-delimited text protocol.
//!
//! One document per line. The receiver answers `+OK` or `-ERR`; any other
//! line read as a reply is reply data. Documents must be UTF-8 and may not
//! contain line breaks.
//!
//! A data line starting with `+`, `-` or `.` goes out with one extra leading
//! `.`, which the reader strips, so status lines never collide with data.

use std::borrow::Cow;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};

use crate::protocol::state::SessionState;
use crate::protocol::{ProtocolError, ProtocolSession};

pub const NAME: &str = "line";

/// Longest line accepted from a peer.
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;

const ACK: &str = "+OK";
const NAK: &str = "-ERR";
const ESCAPE: char = '.';

/// Constructor registered under [`NAME`].
pub fn bind(stream: TcpStream) -> Result<Box<dyn ProtocolSession>, ProtocolError> {
    stream.set_nodelay(true)?;
    Ok(Box::new(LineSession::new(stream)))
}

impl From<LinesCodecError> for ProtocolError {
    fn from(err: LinesCodecError) -> Self {
        match err {
            LinesCodecError::Io(e) => ProtocolError::Io(e),
            LinesCodecError::MaxLineLengthExceeded => {
                ProtocolError::Malformed(format!("line exceeds {MAX_LINE_LENGTH} bytes"))
            }
        }
    }
}

pub struct LineSession {
    framed: Framed<TcpStream, LinesCodec>,
    state: SessionState,
    received: Option<Bytes>,
}

impl LineSession {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            framed: Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH)),
            state: SessionState::new(),
            received: None,
        }
    }

    async fn write_line(&mut self, line: &str) -> Result<(), ProtocolError> {
        self.framed.send(line).await?;
        Ok(())
    }

    async fn read_line(&mut self) -> Result<String, ProtocolError> {
        match self.framed.next().await {
            Some(line) => Ok(line?),
            None => Err(ProtocolError::ConnectionClosed),
        }
    }
}

fn as_line(document: &[u8]) -> Result<&str, ProtocolError> {
    let text = std::str::from_utf8(document)
        .map_err(|e| ProtocolError::Malformed(format!("document is not UTF-8: {e}")))?;
    if text.contains(['\n', '\r']) {
        return Err(ProtocolError::Malformed("document contains a line break".into()));
    }
    Ok(text)
}

fn escape(line: &str) -> Cow<'_, str> {
    if line.starts_with(['+', '-', ESCAPE]) {
        Cow::Owned(format!("{ESCAPE}{line}"))
    } else {
        Cow::Borrowed(line)
    }
}

fn unescape(mut line: String) -> String {
    if line.starts_with(ESCAPE) {
        line.remove(0);
    }
    line
}

#[async_trait]
impl ProtocolSession for LineSession {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn send(&mut self, document: &[u8]) -> Result<(), ProtocolError> {
        self.state.begin_send()?;
        let result = match as_line(document) {
            Ok(line) => self.write_line(&escape(line)).await,
            Err(e) => Err(e),
        };
        self.state.finish_send(result.is_ok());
        result
    }

    fn send_succeeded(&self) -> Result<bool, ProtocolError> {
        self.state.send_succeeded()
    }

    async fn read_reply(&mut self) -> Result<Bytes, ProtocolError> {
        self.state.require_sent("read_reply")?;
        let line = self.read_line().await?;
        match line.as_str() {
            ACK => Ok(Bytes::new()),
            NAK => Err(ProtocolError::Rejected),
            _ => Ok(Bytes::from(unescape(line))),
        }
    }

    async fn receive(&mut self) -> Result<(), ProtocolError> {
        self.state.begin_receive()?;
        let line = self.read_line().await?;
        self.received = Some(Bytes::from(unescape(line)));
        self.state.finish_receive();
        Ok(())
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
        self.write_line(ACK).await
    }

    async fn signal_error(&mut self) -> Result<(), ProtocolError> {
        self.state.signal("signal_error")?;
        self.write_line(NAK).await
    }

    fn into_stream(self: Box<Self>) -> TcpStream {
        crate::protocol::release(self.framed, NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;

    async fn pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, server) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (client.unwrap(), server.unwrap().0)
    }

    #[tokio::test]
    async fn line_exchange_with_ack() {
        let (client, server) = pair().await;
        let mut sender = bind(client).unwrap();
        let mut receiver = bind(server).unwrap();

        sender.send(b"hello world").await.unwrap();
        receiver.receive().await.unwrap();
        assert_eq!(receiver.received().unwrap().as_ref(), b"hello world");

        receiver.signal_success().await.unwrap();
        assert!(sender.read_reply().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn err_line_is_rejection() {
        let (client, server) = pair().await;
        let mut sender = bind(client).unwrap();
        let mut receiver = bind(server).unwrap();

        sender.send(b"nope").await.unwrap();
        receiver.receive().await.unwrap();
        receiver.signal_error().await.unwrap();
        assert!(matches!(sender.read_reply().await, Err(ProtocolError::Rejected)));
    }

    #[tokio::test]
    async fn signal_is_written_as_text() {
        let (client, server) = pair().await;
        let mut sender = bind(client).unwrap();
        let mut receiver = bind(server).unwrap();

        sender.send(b"ping").await.unwrap();
        receiver.receive().await.unwrap();
        receiver.signal_success().await.unwrap();

        let mut raw = BufReader::new(sender.into_stream());
        let mut line = String::new();
        raw.read_line(&mut line).await.unwrap();
        assert_eq!(line, "+OK\n");
    }

    #[tokio::test]
    async fn multi_line_document_fails_send() {
        let (client, _server) = pair().await;
        let mut sender = bind(client).unwrap();

        assert!(matches!(
            sender.send(b"two\nlines").await,
            Err(ProtocolError::Malformed(_))
        ));
        assert!(!sender.send_succeeded().unwrap());
    }

    #[tokio::test]
    async fn status_lookalike_data_survives() {
        let (client, server) = pair().await;
        let mut requester = bind(client).unwrap();
        let mut responder = bind(server).unwrap();

        requester.send(b".hidden").await.unwrap();
        responder.receive().await.unwrap();
        assert_eq!(responder.received().unwrap().as_ref(), b".hidden");

        // a deferred reply goes out through a fresh sending session
        let mut replier = bind(responder.into_stream()).unwrap();
        replier.send(b"+OK").await.unwrap();
        assert_eq!(requester.read_reply().await.unwrap().as_ref(), b"+OK");
    }

    #[tokio::test]
    async fn escaped_lines_on_the_wire() {
        let (client, server) = pair().await;
        let mut sender = bind(client).unwrap();
        sender.send(b"-ERR is data here").await.unwrap();

        let mut raw = BufReader::new(server);
        let mut line = String::new();
        raw.read_line(&mut line).await.unwrap();
        assert_eq!(line, ".-ERR is data here\n");
    }
}
