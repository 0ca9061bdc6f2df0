//! Conveyor state machine, local status and pallet presence.
//!
//! `Idle → Busy → Idle` is driven by load/unload and by the two behaviours
//! (discovery and transfer). `Down` is reachable from anywhere through an
//! administrative `set_status`, which overwrites the status without looking
//! at the pallet flag.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConveyorError;
use crate::identity::ConveyorId;

/// Operational status of a conveyor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConveyorStatus {
    Idle,
    Busy,
    Down,
}

impl fmt::Display for ConveyorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "Idle",
            Self::Busy => "Busy",
            Self::Down => "Down",
        };
        f.write_str(s)
    }
}

impl FromStr for ConveyorStatus {
    type Err = ConveyorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Idle" => Ok(Self::Idle),
            "Busy" => Ok(Self::Busy),
            "Down" => Ok(Self::Down),
            other => Err(ConveyorError::InvalidStatus(other.to_string())),
        }
    }
}

/// Snapshot of a conveyor, as returned to `get_info` queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConveyorInfo {
    pub neighbours: Vec<ConveyorId>,
    pub transfer_time: u32,
    pub pallet_loaded: bool,
    pub status: ConveyorStatus,
}

/// Private mutable state owned by one conveyor actor.
#[derive(Debug, Clone)]
pub struct ConveyorState {
    status: ConveyorStatus,
    pallet_loaded: bool,
    neighbours: Vec<ConveyorId>,
    transfer_time: u32,
}

impl ConveyorState {
    /// A fresh conveyor: idle, empty, with a fixed neighbour list.
    pub fn new(neighbours: Vec<ConveyorId>, transfer_time: u32) -> Self {
        Self {
            status: ConveyorStatus::Idle,
            pallet_loaded: false,
            neighbours,
            transfer_time,
        }
    }

    pub fn status(&self) -> ConveyorStatus {
        self.status
    }

    pub fn pallet_loaded(&self) -> bool {
        self.pallet_loaded
    }

    pub fn neighbours(&self) -> &[ConveyorId] {
        &self.neighbours
    }

    pub fn transfer_time(&self) -> u32 {
        self.transfer_time
    }

    pub fn is_idle(&self) -> bool {
        self.status == ConveyorStatus::Idle
    }

    pub fn is_neighbour(&self, id: &ConveyorId) -> bool {
        self.neighbours.contains(id)
    }

    /// Accept a pallet. Only an idle, empty conveyor may load.
    pub fn load(&mut self) -> Result<(), ConveyorError> {
        if self.status == ConveyorStatus::Busy || self.pallet_loaded {
            return Err(ConveyorError::Busy);
        }
        if self.status == ConveyorStatus::Down {
            return Err(ConveyorError::Down);
        }
        self.status = ConveyorStatus::Busy;
        self.pallet_loaded = true;
        Ok(())
    }

    /// Remove the pallet. Refused when empty or down.
    pub fn unload(&mut self) -> Result<(), ConveyorError> {
        if !self.pallet_loaded || self.status == ConveyorStatus::Down {
            return Err(ConveyorError::NotUnloaded);
        }
        self.status = ConveyorStatus::Idle;
        self.pallet_loaded = false;
        Ok(())
    }

    /// Administrative override. Never validated against the pallet flag.
    pub fn set_status(&mut self, status: ConveyorStatus) {
        self.status = status;
    }

    /// Mark the conveyor busy for a discovery or a hop, returning the
    /// status it had before.
    pub fn occupy(&mut self) -> ConveyorStatus {
        std::mem::replace(&mut self.status, ConveyorStatus::Busy)
    }

    /// The next conveyor took the pallet.
    pub fn hand_over(&mut self) {
        self.status = ConveyorStatus::Idle;
        self.pallet_loaded = false;
    }

    pub fn info(&self) -> ConveyorInfo {
        ConveyorInfo {
            neighbours: self.neighbours.clone(),
            transfer_time: self.transfer_time,
            pallet_loaded: self.pallet_loaded,
            status: self.status,
        }
    }
}
