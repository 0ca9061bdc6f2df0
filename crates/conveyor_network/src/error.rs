//! Conveyor network error types.
//!
//! The `Display` text of the state-conflict variants is the reason string
//! carried by `failure` replies.

use std::time::Duration;

/// Errors that can occur in the conveyor_network crate.
#[derive(Debug, thiserror::Error)]
pub enum ConveyorError {
    /// The conveyor is busy or already holds a pallet.
    #[error("Conveyor busy, cannot load")]
    Busy,

    /// The conveyor has been taken down by an operator.
    #[error("Conveyor down, cannot load")]
    Down,

    /// Unload was requested with no pallet present, or while down.
    #[error("Pallet not unloaded")]
    NotUnloaded,

    /// A `set_status` request named a status outside Idle/Busy/Down.
    #[error("Selected status is not valid")]
    InvalidStatus(String),

    /// A transfer was requested from a conveyor that holds no pallet.
    #[error("Cannot proceed, pallet not loaded")]
    PalletNotLoaded,

    /// A new transfer arrived while this conveyor's belt is still running a hop.
    #[error("Cannot proceed, a hop is already in progress")]
    HopInProgress,

    /// The next hop of a route is not a declared neighbour.
    #[error("Next conveyor {0} is not a neighbour")]
    NotANeighbour(String),

    /// No destination reply arrived inside the discovery window.
    #[error("Failed to find a path from {origin} to {destination}")]
    NoPathFound { origin: String, destination: String },

    /// Every load attempt for a hop was refused or went unanswered.
    #[error("Transfer stalled at {at}: {next} did not accept the pallet")]
    TransferStalled { at: String, next: String },

    /// No mailbox is registered under the given name.
    #[error("Conveyor not found: {0}")]
    PeerNotFound(String),

    /// A mailbox with this name is already registered.
    #[error("Name already registered: {0}")]
    DuplicateName(String),

    /// A mailbox exists but can no longer accept envelopes.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A bounded wait expired.
    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    /// The layout description is inconsistent.
    #[error("Invalid layout: {0}")]
    Layout(String),

    /// A peer answered with `failure` or `not_understood`.
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// JSON serialization / deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_errors_render_reply_reasons() {
        assert_eq!(ConveyorError::Busy.to_string(), "Conveyor busy, cannot load");
        assert_eq!(ConveyorError::Down.to_string(), "Conveyor down, cannot load");
        assert_eq!(ConveyorError::NotUnloaded.to_string(), "Pallet not unloaded");
        assert_eq!(
            ConveyorError::InvalidStatus("Sleeping".into()).to_string(),
            "Selected status is not valid"
        );
    }

    #[test]
    fn test_routing_errors_name_conveyors() {
        let err = ConveyorError::TransferStalled {
            at: "CNV3".into(),
            next: "CNV4".into(),
        };
        assert!(err.to_string().contains("CNV3"));
        assert!(err.to_string().contains("CNV4"));
    }
}
