//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! accept loop, workers, sender produce:
//!     → logging.rs (structured log events, per-connection spans)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging via `tracing`; every worker runs in a span named
//!   after its connection ID
//! - Metrics are cheap (atomic increments) and no-ops until a recorder is installed

pub mod logging;
pub mod metrics;
