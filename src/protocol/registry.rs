//! Protocol variant registry.
//!
//! # Responsibilities
//! - Map configured protocol names to session constructors
//! - Resolve a name once, at configuration time, into a `ProtocolFactory`
//!
//! # Design Decisions
//! - Closed set: only registered constructors can be resolved
//! - Unknown names fail at startup, not per connection

use std::collections::HashMap;
use std::fmt;

use tokio::net::TcpStream;

use crate::protocol::{length_prefixed, line, ProtocolError, ProtocolSession};

/// Builds a session bound to a socket.
pub type Constructor = fn(TcpStream) -> Result<Box<dyn ProtocolSession>, ProtocolError>;

/// Named set of protocol constructors.
#[derive(Clone, Default)]
pub struct ProtocolRegistry {
    constructors: HashMap<&'static str, Constructor>,
}

impl ProtocolRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The variants shipped with this crate.
    pub fn builtin() -> Self {
        Self::new()
            .with(length_prefixed::NAME, length_prefixed::bind)
            .with(line::NAME, line::bind)
    }

    /// Register a constructor, replacing any previous one under the same name.
    pub fn with(mut self, name: &'static str, constructor: Constructor) -> Self {
        self.constructors.insert(name, constructor);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.constructors.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Resolve a configured name into a factory.
    pub fn resolve(&self, name: &str) -> Result<ProtocolFactory, ProtocolError> {
        self.constructors
            .get_key_value(name)
            .map(|(name, constructor)| ProtocolFactory {
                name: *name,
                constructor: *constructor,
            })
            .ok_or_else(|| ProtocolError::Unknown(name.to_string()))
    }
}

impl fmt::Debug for ProtocolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolRegistry")
            .field("names", &self.names())
            .finish()
    }
}

/// A resolved protocol variant. Cheap to copy into every worker.
#[derive(Clone, Copy)]
pub struct ProtocolFactory {
    name: &'static str,
    constructor: Constructor,
}

impl ProtocolFactory {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Instantiate a fresh session bound to `stream`.
    pub fn bind(&self, stream: TcpStream) -> Result<Box<dyn ProtocolSession>, ProtocolError> {
        (self.constructor)(stream)
    }
}

impl fmt::Debug for ProtocolFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ProtocolFactory").field(&self.name).finish()
    }
}
