//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound:
//!     listener.rs (bind with backlog, accept with timeout, admission)
//!     → hand accepted socket to a connection worker
//!
//! Outbound:
//!     outbound.rs (parse tcp://host:port, connect with timeout
//!                  or reuse a pending reply's socket)
//!     → hand socket to the sender's protocol session
//! ```
//!
//! # Design Decisions
//! - Accept timeouts are expected and surface as `Ok(None)`, not errors
//! - Unbounded accept by default; `max_workers` adds a semaphore
//! - A socket has exactly one owner; reuse consumes the pending reply

pub mod listener;
pub mod outbound;
