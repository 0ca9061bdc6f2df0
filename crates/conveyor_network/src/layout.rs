//! Declare a plant of conveyors and bring it up on one switchboard.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::info;

use crate::client::ConveyorClient;
use crate::config::ConveyorConfig;
use crate::directory::ServiceKind;
use crate::error::ConveyorError;
use crate::identity::ConveyorId;
use crate::node::{ConveyorHandle, ConveyorNode};
use crate::transport::Switchboard;

/// One conveyor of a layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConveyorSpec {
    pub name: ConveyorId,
    /// Conveyors this one can hand a pallet to. Directed.
    #[serde(default)]
    pub neighbours: Vec<ConveyorId>,
    #[serde(default = "default_transfer_time")]
    pub transfer_time: u32,
}

fn default_transfer_time() -> u32 {
    1
}

impl ConveyorSpec {
    pub fn new(name: &str, neighbours: &[&str], transfer_time: u32) -> Self {
        Self {
            name: name.into(),
            neighbours: neighbours.iter().map(|n| ConveyorId::from(*n)).collect(),
            transfer_time,
        }
    }
}

/// A whole plant: which conveyors exist and how they connect.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutSpec {
    pub conveyors: Vec<ConveyorSpec>,
}

impl LayoutSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style: add a conveyor.
    pub fn with_conveyor(mut self, name: &str, neighbours: &[&str], transfer_time: u32) -> Self {
        self.conveyors
            .push(ConveyorSpec::new(name, neighbours, transfer_time));
        self
    }

    /// Names must be unique and non-empty, transfer times positive, and every
    /// neighbour declared.
    pub fn validate(&self) -> Result<(), ConveyorError> {
        let mut names = HashSet::new();
        for conveyor in &self.conveyors {
            if conveyor.name.as_str().is_empty() {
                return Err(ConveyorError::Layout("conveyor with empty name".into()));
            }
            if conveyor.transfer_time == 0 {
                return Err(ConveyorError::Layout(format!(
                    "{} has a zero transfer time",
                    conveyor.name
                )));
            }
            if !names.insert(&conveyor.name) {
                return Err(ConveyorError::Layout(format!(
                    "conveyor {} declared twice",
                    conveyor.name
                )));
            }
        }
        for conveyor in &self.conveyors {
            for neighbour in &conveyor.neighbours {
                if !names.contains(neighbour) {
                    return Err(ConveyorError::Layout(format!(
                        "{} names unknown neighbour {neighbour}",
                        conveyor.name
                    )));
                }
                if neighbour == &conveyor.name {
                    return Err(ConveyorError::Layout(format!(
                        "{} lists itself as a neighbour",
                        conveyor.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// The fourteen-conveyor demonstration plant: a main loop with two
    /// shortcut branches.
    pub fn reference_plant() -> Self {
        Self::new()
            .with_conveyor("CNV1", &["CNV2"], 1)
            .with_conveyor("CNV2", &["CNV3"], 1)
            .with_conveyor("CNV3", &["CNV4", "CNV13"], 1)
            .with_conveyor("CNV4", &["CNV5"], 1)
            .with_conveyor("CNV5", &["CNV6"], 1)
            .with_conveyor("CNV6", &["CNV7"], 1)
            .with_conveyor("CNV7", &["CNV8"], 1)
            .with_conveyor("CNV8", &["CNV9", "CNV14"], 1)
            .with_conveyor("CNV9", &["CNV10"], 1)
            .with_conveyor("CNV10", &["CNV11"], 1)
            .with_conveyor("CNV11", &["CNV12"], 1)
            .with_conveyor("CNV12", &["CNV1"], 1)
            .with_conveyor("CNV13", &["CNV9", "CNV14"], 1)
            .with_conveyor("CNV14", &["CNV12"], 1)
    }

    pub fn load_from_file(path: &Path) -> Result<Self, ConveyorError> {
        let data = std::fs::read_to_string(path)?;
        let spec: Self = serde_json::from_str(&data)?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), ConveyorError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// A running plant.
pub struct Layout {
    switchboard: Switchboard,
    config: ConveyorConfig,
    conveyors: BTreeMap<ConveyorId, ConveyorHandle>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Layout {
    /// Validate `spec` and spawn one actor per conveyor.
    pub async fn spawn(spec: &LayoutSpec, config: ConveyorConfig) -> Result<Self, ConveyorError> {
        spec.validate()?;

        let switchboard = Switchboard::new();
        let (shutdown_tx, _) = broadcast::channel(1);
        let mut conveyors = BTreeMap::new();
        for conveyor in &spec.conveyors {
            let handle = ConveyorNode::spawn(
                conveyor.name.clone(),
                conveyor.neighbours.clone(),
                conveyor.transfer_time,
                switchboard.clone(),
                config.clone(),
                shutdown_tx.subscribe(),
            )
            .await?;
            conveyors.insert(conveyor.name.clone(), handle);
        }
        let registered = switchboard.list(ServiceKind::Conveyor).await;
        info!("Layout started with {} conveyors registered", registered.len());

        Ok(Self {
            switchboard,
            config,
            conveyors,
            shutdown_tx,
        })
    }

    pub fn switchboard(&self) -> &Switchboard {
        &self.switchboard
    }

    pub fn config(&self) -> &ConveyorConfig {
        &self.config
    }

    pub fn conveyor(&self, name: &str) -> Option<&ConveyorHandle> {
        self.conveyors.get(&ConveyorId::from(name))
    }

    pub fn conveyor_ids(&self) -> Vec<ConveyorId> {
        self.conveyors.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.conveyors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conveyors.is_empty()
    }

    /// Conveyors currently reporting a pallet.
    pub fn holders(&self) -> Vec<ConveyorId> {
        self.conveyors
            .values()
            .filter(|handle| handle.pallet_loaded())
            .map(|handle| handle.id().clone())
            .collect()
    }

    /// Register a client on this layout's switchboard.
    pub async fn client(&self, name: &str) -> Result<ConveyorClient, ConveyorError> {
        ConveyorClient::connect(&self.switchboard, name.into()).await
    }

    /// Stop every conveyor and wait for the actors to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        for (_, handle) in self.conveyors {
            handle.join().await;
        }
        info!("Layout stopped");
    }
}
