//! Who is registered on the switchboard, and as what.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::ConveyorId;

/// The service a registered party offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    /// A conveyor segment actor.
    Conveyor,
    /// An operator or test client issuing requests.
    Client,
}

/// A directory record for one registered party.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub id: ConveyorId,
    pub service: ServiceKind,
    pub registered_at: DateTime<Utc>,
}

/// Registry of every named party.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Directory {
    entries: HashMap<String, DirectoryEntry>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry. Returns false if the name is already taken.
    pub fn register(&mut self, id: ConveyorId, service: ServiceKind) -> bool {
        if self.entries.contains_key(id.as_str()) {
            return false;
        }
        let entry = DirectoryEntry {
            id: id.clone(),
            service,
            registered_at: Utc::now(),
        };
        self.entries.insert(id.0, entry);
        true
    }

    pub fn deregister(&mut self, id: &ConveyorId) -> Option<DirectoryEntry> {
        self.entries.remove(id.as_str())
    }

    pub fn lookup(&self, id: &ConveyorId) -> Option<&DirectoryEntry> {
        self.entries.get(id.as_str())
    }

    /// All entries offering `service`, sorted by name.
    pub fn list_by_service(&self, service: ServiceKind) -> Vec<&DirectoryEntry> {
        let mut found: Vec<&DirectoryEntry> = self
            .entries
            .values()
            .filter(|e| e.service == service)
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        found
    }
}
