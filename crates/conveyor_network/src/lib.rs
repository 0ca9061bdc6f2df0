//! Conveyor Network: decentralised control for a plant of conveyor segments.
//!
//! Every conveyor runs as an independent actor that knows only its own state
//! and its downstream neighbours. Conveyors cooperate by exchanging messages
//! to find the shortest route for a pallet and to hand it over hop by hop,
//! retrying and rerouting around segments that cannot take it.
//!
//! # Architecture
//!
//! - **Transport**: an in-process [`Switchboard`] of named, bounded tokio
//!   mailboxes with a service directory.
//! - **Protocol**: [`Envelope`]s carrying a performative and a JSON body,
//!   classified by the [`router`] into typed intents.
//! - **Discovery**: flood-and-collect shortest path search.
//! - **Transfer**: timed hops with load negotiation, retry and reroute.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use conveyor_network::{ConveyorConfig, Layout, LayoutSpec};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), conveyor_network::ConveyorError> {
//! let layout = Layout::spawn(&LayoutSpec::reference_plant(), ConveyorConfig::default()).await?;
//! let mut client = layout.client("operator").await?;
//!
//! client.load(&"CNV1".into()).await?;
//! client.transfer(&"CNV1".into(), &"CNV9".into(), true).await?;
//! let arrived_at = client.wait_for_transfer_finished(Duration::from_secs(60)).await?;
//! println!("pallet arrived at {arrived_at}");
//!
//! layout.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod directory;
pub mod discovery;
pub mod error;
pub mod event;
pub mod identity;
pub mod layout;
pub mod message;
pub mod node;
pub mod router;
pub mod state;
pub mod transfer;
pub mod transport;

// ── Re-exports for convenience ──────────────────────────────────────────

pub use client::ConveyorClient;
pub use config::ConveyorConfig;
pub use directory::{Directory, DirectoryEntry, ServiceKind};
pub use error::ConveyorError;
pub use event::ConveyorEvent;
pub use identity::ConveyorId;
pub use layout::{ConveyorSpec, Layout, LayoutSpec};
pub use message::{Envelope, PathQuery, Performative, Request, RoutedTransfer};
pub use node::{ConveyorHandle, ConveyorNode};
pub use state::{ConveyorInfo, ConveyorState, ConveyorStatus};
pub use transport::Switchboard;
