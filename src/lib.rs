//! Protocol-agnostic TCP message exchange.

// Wire and transport
pub mod net;
pub mod protocol;

// Message exchange
pub mod exchange;

// Cross-cutting concerns
pub mod config;
pub mod lifecycle;
pub mod observability;

pub use config::schema::ExchangeConfig;
pub use exchange::{AcceptLoop, AcceptLoopHandle, Document, MessageSink, PendingReply, Sender};
pub use lifecycle::Shutdown;
pub use net::outbound::Destination;
pub use protocol::{ProtocolRegistry, ProtocolSession};
