//! Outbound connections.
//!
//! # Responsibilities
//! - Parse `tcp://host:port` destinations
//! - Open a connection within the connect timeout
//! - Or reuse the socket carried by a `PendingReply`

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use tokio::net::TcpStream;
use url::Url;

use crate::exchange::document::PendingReply;

/// A remote peer in `tcp://host:port` form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    host: String,
    port: u16,
}

impl Destination {
    pub const SCHEME: &'static str = "tcp";

    /// Parse a destination URI. Anything but `tcp://host:port` is `InvalidInput`.
    pub fn parse(uri: &str) -> io::Result<Self> {
        let invalid = |reason: String| io::Error::new(io::ErrorKind::InvalidInput, reason);

        let url =
            Url::parse(uri).map_err(|e| invalid(format!("invalid destination '{uri}': {e}")))?;
        if url.scheme() != Self::SCHEME {
            return Err(invalid(format!(
                "unsupported scheme '{}' in '{uri}', expected tcp://host:port",
                url.scheme()
            )));
        }
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| invalid(format!("destination '{uri}' has no host")))?;
        let port = url
            .port()
            .ok_or_else(|| invalid(format!("destination '{uri}' has no port")))?;

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port`, suitable for resolution.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Resolve to the first socket address.
    pub async fn resolve(&self) -> io::Result<SocketAddr> {
        tokio::net::lookup_host(self.authority())
            .await?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    format!("{} resolved to no addresses", self.host),
                )
            })
    }
}

impl From<SocketAddr> for Destination {
    fn from(addr: SocketAddr) -> Self {
        let host = match addr {
            SocketAddr::V4(v4) => v4.ip().to_string(),
            SocketAddr::V6(v6) => format!("[{}]", v6.ip()),
        };
        Self {
            host,
            port: addr.port(),
        }
    }
}

impl FromStr for Destination {
    type Err = io::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", Self::SCHEME, self.host, self.port)
    }
}

/// A socket ready for an outbound session.
#[derive(Debug)]
pub struct OutboundSocket {
    pub stream: TcpStream,
    pub peer: SocketAddr,
    /// The socket came from a pending reply rather than a new connect.
    pub reused: bool,
}

/// Opens outbound sockets to one destination.
#[derive(Debug, Clone)]
pub struct OutboundEndpoint {
    destination: Destination,
    connect_timeout: Duration,
}

impl OutboundEndpoint {
    pub fn new(destination: Destination, connect_timeout: Duration) -> Self {
        Self {
            destination,
            connect_timeout,
        }
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Reuse `pending` if given, otherwise connect.
    pub async fn open(&self, pending: Option<PendingReply>) -> io::Result<OutboundSocket> {
        match pending {
            Some(pending) => {
                let peer = pending.peer();
                tracing::debug!(
                    connection_id = %pending.connection(),
                    peer_addr = %peer,
                    "Reusing pending reply connection"
                );
                Ok(OutboundSocket {
                    stream: pending.into_stream(),
                    peer,
                    reused: true,
                })
            }
            None => self.connect().await,
        }
    }

    async fn connect(&self) -> io::Result<OutboundSocket> {
        let connect = async {
            let addr = self.destination.resolve().await?;
            let stream = TcpStream::connect(addr).await?;
            Ok::<_, io::Error>((stream, addr))
        };
        let (stream, peer) = tokio::time::timeout(self.connect_timeout, connect)
            .await
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!(
                        "connect to {} timed out after {:?}",
                        self.destination, self.connect_timeout
                    ),
                )
            })??;

        tracing::debug!(destination = %self.destination, peer_addr = %peer, "Connected");
        Ok(OutboundSocket {
            stream,
            peer,
            reused: false,
        })
    }
}
