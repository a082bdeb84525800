//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks, protocol names)
//!     → ExchangeConfig (validated, immutable)
//!     → listener/sender sections handed to net and exchange
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; a listener keeps its endpoint settings
//!   for its whole lifetime
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use schema::AdmissionPolicy;
pub use schema::ExchangeConfig;
pub use schema::ListenerConfig;
pub use schema::ObservabilityConfig;
pub use schema::SenderConfig;
