//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Validate config → Resolve protocols → Bind listener → Spawn accept loop
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Cancel token → Accept loop stops → Join workers → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Shutdown never aborts workers; it waits for them to finish
//!   (bounded by their read timeout)

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
