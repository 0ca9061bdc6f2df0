//! In-process transport over named tokio mailboxes.
//!
//! The [`Switchboard`] is the reliable, name-addressed delivery service the
//! conveyors talk through. Each registered party owns the receiving half of a
//! bounded mpsc mailbox; envelopes between any two parties arrive in the
//! order they were sent.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::{debug, trace};

use crate::directory::{Directory, DirectoryEntry, ServiceKind};
use crate::error::ConveyorError;
use crate::identity::ConveyorId;
use crate::message::Envelope;

#[derive(Default)]
struct Exchange {
    mailboxes: HashMap<ConveyorId, mpsc::Sender<Envelope>>,
    directory: Directory,
}

/// Cheaply cloneable handle to the shared exchange.
#[derive(Clone, Default)]
pub struct Switchboard {
    inner: Arc<RwLock<Exchange>>,
}

impl Switchboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a named mailbox and return its receiving half.
    pub async fn register(
        &self,
        id: ConveyorId,
        service: ServiceKind,
        capacity: usize,
    ) -> Result<mpsc::Receiver<Envelope>, ConveyorError> {
        let mut exchange = self.inner.write().await;
        if !exchange.directory.register(id.clone(), service) {
            return Err(ConveyorError::DuplicateName(id.0));
        }
        let (tx, rx) = mpsc::channel(capacity.max(1));
        exchange.mailboxes.insert(id.clone(), tx);
        debug!("Registered {id} as {service:?}");
        Ok(rx)
    }

    /// Remove a mailbox. Envelopes sent afterwards fail with `PeerNotFound`.
    pub async fn deregister(&self, id: &ConveyorId) {
        let mut exchange = self.inner.write().await;
        exchange.mailboxes.remove(id);
        exchange.directory.deregister(id);
        debug!("Deregistered {id}");
    }

    /// Deliver an envelope to the mailbox named by `envelope.to`.
    pub async fn send(&self, envelope: Envelope) -> Result<(), ConveyorError> {
        let tx = {
            let exchange = self.inner.read().await;
            exchange
                .mailboxes
                .get(&envelope.to)
                .cloned()
                .ok_or_else(|| ConveyorError::PeerNotFound(envelope.to.0.clone()))?
        };

        trace!(
            "{} -> {} [{}] {}",
            envelope.from,
            envelope.to,
            envelope.performative.as_str(),
            envelope.content
        );
        let to = envelope.to.clone();
        tx.send(envelope)
            .await
            .map_err(|_| ConveyorError::Transport(format!("mailbox of {to} is closed")))
    }

    pub async fn lookup(&self, id: &ConveyorId) -> Option<DirectoryEntry> {
        self.inner.read().await.directory.lookup(id).cloned()
    }

    /// Snapshot of the entries offering `service`, sorted by name.
    pub async fn list(&self, service: ServiceKind) -> Vec<DirectoryEntry> {
        let exchange = self.inner.read().await;
        exchange
            .directory
            .list_by_service(service)
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn is_registered(&self, id: &ConveyorId) -> bool {
        self.inner.read().await.mailboxes.contains_key(id)
    }
}
