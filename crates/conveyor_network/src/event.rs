//! Events a conveyor publishes as it runs.

use crate::identity::ConveyorId;
use crate::state::ConveyorStatus;

/// Something observable happened on a conveyor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConveyorEvent {
    /// Status or pallet flag changed.
    StateChanged {
        status: ConveyorStatus,
        pallet_loaded: bool,
    },
    /// This conveyor, as discovery source, selected a path.
    PathFound { route: Vec<ConveyorId>, replies: usize },
    /// This conveyor, as discovery source, heard no reply in time.
    DiscoveryFailed { destination: ConveyorId },
    /// A hop began; the pallet is moving towards `next`.
    HopStarted { next: ConveyorId },
    /// The next conveyor refused or did not answer; retrying.
    HopRetry { next: ConveyorId, attempt: u32 },
    /// The next conveyor took the pallet.
    HandedOver { to: ConveyorId },
    /// Retries exhausted; a fresh transfer was issued to route around `blocked`.
    RerouteRequested {
        blocked: ConveyorId,
        destination: ConveyorId,
    },
    /// Retries exhausted without reroute permission.
    TransferStalled { next: ConveyorId },
    /// The pallet was unloaded while the belt ran; the hop was dropped.
    HopAbandoned { next: ConveyorId },
    /// `from` agreed to load after this conveyor had given up on the hop,
    /// and was told to unload again.
    LateAgreementRevoked { from: ConveyorId },
    /// The route names a next hop that is not a neighbour.
    RouteRejected { next: ConveyorId },
    /// The pallet reached this conveyor, the end of its route.
    Arrived { route: Vec<ConveyorId> },
    /// A route this conveyor started has been completed elsewhere.
    TransferFinished { reported_by: ConveyorId },
}
