//! The name every conveyor and client is addressed by.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The unique name of a conveyor (or of an operator client) on the switchboard.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConveyorId(pub String);

impl ConveyorId {
    /// Create an id from an existing name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Generate a unique client name with the given prefix.
    pub fn generate(prefix: &str) -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("{prefix}-{}", &suffix[..8]))
    }

    /// Return the inner string representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConveyorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ConveyorId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ConveyorId {
    fn from(s: String) -> Self {
        Self(s)
    }
}
