//! One actor per conveyor segment.
//!
//! A node owns its [`ConveyorState`] and a mailbox on the [`Switchboard`].
//! Its event loop serves one envelope at a time. Discovery aggregation and
//! hop negotiation wait *inside* the loop: while they wait, only replies in
//! their own conversation are consumed and everything else is deferred, so
//! a conveyor drives at most one discovery or one hop at a time.
//!
//! The delayed action that models belt movement runs as a detached timer
//! task which hands the hop back to the loop through a private channel.

use std::collections::VecDeque;

use serde_json::Value;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ConveyorConfig;
use crate::directory::ServiceKind;
use crate::error::ConveyorError;
use crate::event::ConveyorEvent;
use crate::identity::ConveyorId;
use crate::message::{Envelope, Performative};
use crate::router::{self, Intent};
use crate::state::{ConveyorInfo, ConveyorState, ConveyorStatus};
use crate::transfer::{HopJob, TransferJob};
use crate::transport::Switchboard;

/// A running conveyor actor.
pub struct ConveyorNode {
    pub(crate) id: ConveyorId,
    pub(crate) state: ConveyorState,
    pub(crate) config: ConveyorConfig,
    switchboard: Switchboard,
    inbox: mpsc::Receiver<Envelope>,
    /// Envelopes that arrived during a blocking wait, in arrival order.
    deferred: VecDeque<Envelope>,
    hop_tx: mpsc::UnboundedSender<HopJob>,
    hop_rx: mpsc::UnboundedReceiver<HopJob>,
    /// Ticket of the hop whose belt is running, if any.
    pub(crate) pending_hop: Option<u64>,
    hop_tickets: u64,
    /// Load conversations of hops given up on, oldest first.
    pub(crate) abandoned_hops: VecDeque<(String, ConveyorId)>,
    events: broadcast::Sender<ConveyorEvent>,
    snapshot: watch::Sender<ConveyorInfo>,
}

/// Handle kept by whoever spawned a conveyor.
pub struct ConveyorHandle {
    id: ConveyorId,
    events: broadcast::Sender<ConveyorEvent>,
    snapshot: watch::Receiver<ConveyorInfo>,
    task: JoinHandle<()>,
}

impl ConveyorHandle {
    pub fn id(&self) -> &ConveyorId {
        &self.id
    }

    /// Subscribe to the conveyor's events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ConveyorEvent> {
        self.events.subscribe()
    }

    /// Latest published state.
    pub fn info(&self) -> ConveyorInfo {
        self.snapshot.borrow().clone()
    }

    pub fn status(&self) -> ConveyorStatus {
        self.snapshot.borrow().status
    }

    pub fn pallet_loaded(&self) -> bool {
        self.snapshot.borrow().pallet_loaded
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the actor task to exit.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            warn!("Conveyor {} task ended abnormally: {e}", self.id);
        }
    }
}

enum Wake {
    Message(Envelope),
    Hop(HopJob),
    Stop,
}

impl ConveyorNode {
    /// Register a conveyor on the switchboard and start its event loop.
    pub async fn spawn(
        id: ConveyorId,
        neighbours: Vec<ConveyorId>,
        transfer_time: u32,
        switchboard: Switchboard,
        config: ConveyorConfig,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<ConveyorHandle, ConveyorError> {
        let inbox = switchboard
            .register(id.clone(), ServiceKind::Conveyor, config.mailbox_capacity)
            .await?;

        let state = ConveyorState::new(neighbours, transfer_time);
        let (hop_tx, hop_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let (snapshot, snapshot_rx) = watch::channel(state.info());

        let node = Self {
            id: id.clone(),
            state,
            config,
            switchboard,
            inbox,
            deferred: VecDeque::new(),
            hop_tx,
            hop_rx,
            pending_hop: None,
            hop_tickets: 0,
            abandoned_hops: VecDeque::new(),
            events: events.clone(),
            snapshot,
        };
        let task = tokio::spawn(node.run(shutdown));

        Ok(ConveyorHandle {
            id,
            events,
            snapshot: snapshot_rx,
            task,
        })
    }

    async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            "Conveyor {} started (neighbours: {:?}, transfer time: {})",
            self.id,
            self.state.neighbours(),
            self.state.transfer_time()
        );

        loop {
            let wake = match self.deferred.pop_front() {
                Some(envelope) => Wake::Message(envelope),
                None => self.next_wake(&mut shutdown).await,
            };
            match wake {
                Wake::Message(envelope) => self.handle_envelope(envelope).await,
                Wake::Hop(hop) => self.complete_hop(hop).await,
                Wake::Stop => break,
            }
        }

        self.switchboard.deregister(&self.id).await;
        info!("Conveyor {} stopped", self.id);
    }

    async fn next_wake(&mut self, shutdown: &mut broadcast::Receiver<()>) -> Wake {
        tokio::select! {
            Some(hop) = self.hop_rx.recv() => Wake::Hop(hop),
            message = self.inbox.recv() => match message {
                Some(envelope) => Wake::Message(envelope),
                None => Wake::Stop,
            },
            _ = shutdown.recv() => Wake::Stop,
        }
    }

    async fn handle_envelope(&mut self, envelope: Envelope) {
        let intent = router::classify(&envelope);
        debug!(
            "{} dispatching {} from {}",
            self.id,
            intent.dispatch_key(),
            envelope.from
        );

        if intent.is_silent() {
            self.absorb(&envelope, intent).await;
            return;
        }

        match intent {
            Intent::InfoQuery => {
                let info = serde_json::to_value(self.state.info()).unwrap_or_default();
                self.deliver(envelope.reply(Performative::Inform, info)).await;
            }
            Intent::Load => {
                let outcome = self.state.load().map(|()| "Pallet loaded".to_string());
                self.acknowledge(&envelope, outcome).await;
            }
            Intent::Unload => {
                let outcome = self.state.unload().map(|()| "Pallet unloaded".to_string());
                if outcome.is_ok() && self.pending_hop.take().is_some() {
                    warn!("{} - Pallet unloaded while the belt was running", self.id);
                }
                self.acknowledge(&envelope, outcome).await;
            }
            Intent::SetStatus(raw) => {
                let outcome = raw.parse::<ConveyorStatus>().map(|status| {
                    self.state.set_status(status);
                    format!("Setting status to {status}")
                });
                self.acknowledge(&envelope, outcome).await;
            }
            Intent::RoutedTransfer(transfer) => {
                self.begin_routed_transfer(&envelope, transfer).await;
            }
            Intent::Transfer {
                destination,
                reroute,
                requester,
            } => {
                self.begin_transfer(&envelope, destination, reroute, requester)
                    .await;
            }
            Intent::DiscoveryCall(query) => self.handle_discovery_call(&envelope, query).await,
            Intent::DiscoveryProbe(query) => self.relay_probe(&envelope, query).await,
            Intent::NotUnderstood(diagnostic) => {
                info!(
                    "{} - Request not understood, received from {}",
                    self.id, envelope.from
                );
                self.deliver(envelope.reply(Performative::NotUnderstood, Value::String(diagnostic)))
                    .await;
            }
            Intent::Unexpected(kind) => {
                warn!("{} - Unexpected act {kind} from {}", self.id, envelope.from);
                self.deliver(envelope.reply_text(
                    Performative::Failure,
                    format!("unexpected act: {kind}"),
                ))
                .await;
            }
            Intent::TransferFinished | Intent::LatePathReply(_) | Intent::Acknowledgement => {}
        }
    }

    /// Intents that never get a reply.
    async fn absorb(&mut self, envelope: &Envelope, intent: Intent) {
        match intent {
            Intent::Acknowledgement => self.settle_late_agreement(envelope).await,
            Intent::TransferFinished => {
                info!("{} - Transfer finished, reported by {}", self.id, envelope.from);
                self.emit(ConveyorEvent::TransferFinished {
                    reported_by: envelope.from.clone(),
                });
            }
            Intent::LatePathReply(path) => {
                debug!(
                    "{} - Ignoring path reply that missed its window: {:?}",
                    self.id, path.via_points
                );
            }
            _ => {}
        }
    }

    /// Answer a state command with `agree` or `failure`.
    async fn acknowledge(&self, envelope: &Envelope, outcome: Result<String, ConveyorError>) {
        let reply = match outcome {
            Ok(text) => {
                info!("{} - {text}", self.id);
                self.publish_state();
                envelope.reply_text(Performative::Agree, text)
            }
            Err(e) => {
                warn!("{} - {e}", self.id);
                envelope.reply_text(Performative::Failure, e.to_string())
            }
        };
        self.deliver(reply).await;
    }

    /// Send through the switchboard. Delivery failures are logged, never fatal.
    pub(crate) async fn deliver(&self, envelope: Envelope) {
        let to = envelope.to.clone();
        if let Err(e) = self.switchboard.send(envelope).await {
            warn!("{} - Could not deliver to {to}: {e}", self.id);
        }
    }

    pub(crate) fn emit(&self, event: ConveyorEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Publish the current state; emits `StateChanged` only on a real change.
    pub(crate) fn publish_state(&self) {
        let info = self.state.info();
        let previous = self.snapshot.send_replace(info.clone());
        if previous.status != info.status || previous.pallet_loaded != info.pallet_loaded {
            self.emit(ConveyorEvent::StateChanged {
                status: info.status,
                pallet_loaded: info.pallet_loaded,
            });
        }
    }

    /// Arm the delayed action for a hop. Until it fires the conveyor
    /// takes no other transfer.
    pub(crate) fn schedule_hop(
        &mut self,
        job: TransferJob,
        reply_to: ConveyorId,
        conversation: Option<String>,
    ) {
        self.hop_tickets += 1;
        self.pending_hop = Some(self.hop_tickets);
        let hop = HopJob {
            job,
            reply_to,
            conversation,
            ticket: self.hop_tickets,
        };
        let delay = self.config.hop_duration(self.state.transfer_time());
        let tx = self.hop_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(hop);
        });
    }

    /// Next envelope of `conversation` arriving before `deadline`. Anything
    /// else that arrives meanwhile is deferred.
    pub(crate) async fn next_in_conversation(
        &mut self,
        deadline: Instant,
        conversation: &str,
    ) -> Option<Envelope> {
        loop {
            match tokio::time::timeout_at(deadline, self.inbox.recv()).await {
                Ok(Some(envelope)) if envelope.in_conversation(conversation) => {
                    return Some(envelope);
                }
                Ok(Some(envelope)) => self.deferred.push_back(envelope),
                Ok(None) | Err(_) => return None,
            }
        }
    }
}
