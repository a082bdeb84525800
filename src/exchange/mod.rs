//! Document exchange subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound:
//!     accept_loop.rs (accept with timeout, reap, stop)
//!     → worker.rs (one task per connection: receive → deliver → ack | defer)
//!     → sink.rs (serialized delivery to the downstream pipeline)
//!
//! Deferred reply:
//!     worker attaches the live socket to the Document as a PendingReply
//!     → sink keeps the document
//!     → sender.rs takes the PendingReply and answers on that socket
//!
//! Outbound:
//!     sender.rs (open or reuse socket → send → optional reply → close)
//! ```
//!
//! # Design Decisions
//! - A socket has exactly one owner at any time: accept loop, then worker,
//!   then either closed by the worker or moved into a `PendingReply`
//! - `registry.rs` tracks worker tasks for reaping and the shutdown join

pub mod accept_loop;
pub mod document;
pub mod registry;
pub mod sender;
pub mod sink;
pub mod worker;

pub use accept_loop::{AcceptLoop, AcceptLoopHandle};
pub use document::{Document, DocumentId, PendingReply};
pub use registry::{ConnectionId, WorkerRegistry};
pub use sender::{SendError, SendOutcome, Sender};
pub use sink::{ChannelSink, LogSink, MessageSink, SharedSink, SinkError};
pub use worker::{ConnectionWorker, WorkerError, WorkerSettings};
