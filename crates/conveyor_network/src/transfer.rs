//! Transfer execution: hand a pallet along a route, one hop at a time.
//!
//! The conveyor holding the pallet occupies itself for `transfer_time`
//! units, then asks the next conveyor to load. A refusal or silence starts
//! the retry sequence; while backing off it still listens, so a late
//! agreement completes the hop. When the attempts run out the transfer is
//! either rerouted through a fresh discovery or reported as stalled.
//!
//! A conveyor runs one hop at a time. Transfers arriving while its belt
//! runs are refused, and unloading the pallet mid-hop drops the hop. An
//! agreement that turns up after the conveyor gave up on a hop is revoked
//! with an `unload`, so the pallet is never on two conveyors at once.

use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::discovery::DiscoverySession;
use crate::error::ConveyorError;
use crate::event::ConveyorEvent;
use crate::identity::ConveyorId;
use crate::message::{
    Envelope, PathQuery, Performative, Request, RoutedTransfer, TRANSFER_FINISHED,
};
use crate::node::ConveyorNode;

/// How many given-up hop conversations a conveyor remembers.
const ABANDONED_HOP_MEMORY: usize = 32;

/// A pallet's progress along its route, seen from the conveyor holding it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferJob {
    /// Never empty.
    pub route: Vec<ConveyorId>,
    pub current_index: usize,
    pub reroute: bool,
    pub requester: Option<ConveyorId>,
}

impl TransferJob {
    /// Find `me` on the route. `None` if the route does not name it.
    pub fn locate(transfer: RoutedTransfer, me: &ConveyorId) -> Option<Self> {
        let current_index = transfer.route.iter().position(|id| id == me)?;
        Some(Self {
            route: transfer.route,
            current_index,
            reroute: transfer.reroute,
            requester: transfer.requester,
        })
    }

    pub fn is_final(&self) -> bool {
        self.current_index + 1 == self.route.len()
    }

    pub fn origin(&self) -> &ConveyorId {
        &self.route[0]
    }

    pub fn destination(&self) -> &ConveyorId {
        &self.route[self.route.len() - 1]
    }

    pub fn next_hop(&self) -> Option<&ConveyorId> {
        self.route.get(self.current_index + 1)
    }

    /// The request that carries this job on to the next conveyor.
    pub fn to_request(&self) -> Request {
        Request::RoutedTransfer(RoutedTransfer {
            route: self.route.clone(),
            reroute: self.reroute,
            requester: self.requester.clone(),
        })
    }

    /// Who hears about the end of the job: the route origin, and the
    /// requester when that is someone else.
    pub fn notify_targets(&self) -> Vec<ConveyorId> {
        let mut targets = vec![self.origin().clone()];
        if let Some(requester) = &self.requester {
            if requester != self.origin() {
                targets.push(requester.clone());
            }
        }
        targets
    }
}

/// A hop waiting for its delayed action.
#[derive(Debug, Clone)]
pub struct HopJob {
    pub job: TransferJob,
    /// Sender of the routed transfer that started this hop.
    pub reply_to: ConveyorId,
    pub conversation: Option<String>,
    /// Matches the node's pending hop while this hop is still wanted.
    pub ticket: u64,
}

/// Outcome of one load negotiation window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadDecision {
    Agreed,
    Refused(String),
    NoReply,
}

impl LoadDecision {
    pub fn is_agreed(&self) -> bool {
        matches!(self, Self::Agreed)
    }
}

impl ConveyorNode {
    /// A `routed_transfer` request reached this conveyor.
    pub(crate) async fn begin_routed_transfer(
        &mut self,
        envelope: &Envelope,
        mut transfer: RoutedTransfer,
    ) {
        if let Err(err) = self.ready_for_transfer() {
            self.turn_down(envelope, transfer.requester.as_ref(), err)
                .await;
            return;
        }
        if transfer.requester.is_none() {
            transfer.requester = Some(envelope.from.clone());
        }

        let Some(job) = TransferJob::locate(transfer, &self.id) else {
            warn!(
                "{} - Route from {} does not include me, ignoring",
                self.id, envelope.from
            );
            return;
        };
        info!("{} - Received route: {:?}", self.id, job.route);

        if job.is_final() {
            self.arrive(job).await;
            return;
        }

        if let Some(next) = job.next_hop() {
            debug!("{} - Transfer continuing towards {next}", self.id);
            self.emit(ConveyorEvent::HopStarted { next: next.clone() });
        }
        self.state.occupy();
        self.publish_state();
        self.schedule_hop(job, envelope.from.clone(), envelope.conversation_id.clone());
    }

    /// A `transfer` request: find the best route, then follow it.
    pub(crate) async fn begin_transfer(
        &mut self,
        envelope: &Envelope,
        destination: ConveyorId,
        reroute: bool,
        requester: Option<ConveyorId>,
    ) {
        if let Err(err) = self.ready_for_transfer() {
            self.turn_down(envelope, requester.as_ref(), err).await;
            return;
        }

        info!("{} - Looking for the best path to {destination}", self.id);
        let query = PathQuery::new(self.id.clone(), destination, reroute);
        self.discover(DiscoverySession {
            query,
            requester: requester.unwrap_or_else(|| envelope.from.clone()),
            requester_conversation: envelope.conversation_id.clone(),
            auto_transfer: true,
        })
        .await;
    }

    /// A transfer can start only with the pallet on board and the belt free.
    fn ready_for_transfer(&self) -> Result<(), ConveyorError> {
        if !self.state.pallet_loaded() {
            return Err(ConveyorError::PalletNotLoaded);
        }
        if self.pending_hop.is_some() {
            return Err(ConveyorError::HopInProgress);
        }
        Ok(())
    }

    /// Refuse a transfer request: `failure` to its sender and to the
    /// requester it names.
    async fn turn_down(
        &self,
        envelope: &Envelope,
        requester: Option<&ConveyorId>,
        err: ConveyorError,
    ) {
        warn!("{} - {err}", self.id);
        let mut targets = vec![envelope.from.clone()];
        if let Some(requester) = requester {
            if !targets.contains(requester) {
                targets.push(requester.clone());
            }
        }
        self.notify_failure(targets, &err, envelope.conversation_id.clone())
            .await;
    }

    async fn arrive(&mut self, job: TransferJob) {
        info!("{} - Transfer finished, pallet arrived", self.id);
        self.emit(ConveyorEvent::Arrived {
            route: job.route.clone(),
        });
        for target in job.notify_targets() {
            let notice = Envelope::text(
                self.id.clone(),
                target,
                Performative::Inform,
                TRANSFER_FINISHED,
            );
            self.deliver(notice).await;
        }
    }

    /// The belt has run: negotiate the hand-over with the next conveyor.
    pub(crate) async fn complete_hop(&mut self, hop: HopJob) {
        let current = self.pending_hop == Some(hop.ticket);
        if current {
            self.pending_hop = None;
        }
        let Some(next) = hop.job.next_hop().cloned() else {
            return;
        };

        if !current || !self.state.pallet_loaded() {
            warn!(
                "{} - Pallet no longer on board, dropping the hop to {next}",
                self.id
            );
            self.emit(ConveyorEvent::HopAbandoned { next });
            let err = ConveyorError::PalletNotLoaded;
            self.notify_failure(hop_targets(&hop), &err, hop.conversation.clone())
                .await;
            return;
        }

        if !self.state.is_neighbour(&next) {
            let err = ConveyorError::NotANeighbour(next.0.clone());
            warn!("{} - {err}", self.id);
            self.emit(ConveyorEvent::RouteRejected { next });
            self.notify_failure(hop_targets(&hop), &err, hop.conversation.clone())
                .await;
            return;
        }

        info!("{} - Transferring the pallet to {next}", self.id);
        let conversation = uuid::Uuid::new_v4().to_string();
        let mut decision = self
            .offer_pallet(&next, &conversation, self.config.load_reply_timeout)
            .await;

        let mut attempt = 0;
        while !decision.is_agreed() && attempt < self.config.max_retries {
            attempt += 1;
            warn!(
                "{} - {next} did not take the pallet ({decision:?}), retry {attempt}",
                self.id
            );
            self.emit(ConveyorEvent::HopRetry {
                next: next.clone(),
                attempt,
            });

            decision = self
                .await_load_decision(&conversation, self.config.retry_backoff, false)
                .await;
            if decision.is_agreed() {
                break;
            }
            decision = self
                .offer_pallet(&next, &conversation, self.config.retry_reply_timeout)
                .await;
        }

        if decision.is_agreed() {
            self.hand_over(hop.job, next).await;
        } else {
            if self.abandoned_hops.len() == ABANDONED_HOP_MEMORY {
                self.abandoned_hops.pop_front();
            }
            self.abandoned_hops.push_back((conversation, next.clone()));
            self.give_up(hop, next).await;
        }
    }

    /// An `agree` in the conversation of a hop already given up on means the
    /// next conveyor loaded a pallet that never left here. Take it back.
    pub(crate) async fn settle_late_agreement(&mut self, envelope: &Envelope) {
        if envelope.performative != Performative::Agree {
            return;
        }
        let Some(conversation) = envelope.conversation_id.as_deref() else {
            return;
        };
        let Some(position) = self
            .abandoned_hops
            .iter()
            .position(|(abandoned, _)| abandoned == conversation)
        else {
            return;
        };
        let Some((_, next)) = self.abandoned_hops.remove(position) else {
            return;
        };

        warn!(
            "{} - {next} agreed to load after the hop was given up, asking it to unload",
            self.id
        );
        self.emit(ConveyorEvent::LateAgreementRevoked { from: next.clone() });
        self.deliver(Envelope::request(self.id.clone(), next, &Request::Unload))
            .await;
    }

    async fn offer_pallet(
        &mut self,
        next: &ConveyorId,
        conversation: &str,
        window: Duration,
    ) -> LoadDecision {
        let load = Envelope::request(self.id.clone(), next.clone(), &Request::Load)
            .with_conversation(Some(conversation.to_string()));
        self.deliver(load).await;
        self.await_load_decision(conversation, window, true).await
    }

    /// Wait up to `window` for an answer to a load offer. With
    /// `stop_on_refusal` unset the whole window is spent waiting for an
    /// agreement and refusals are only remembered.
    async fn await_load_decision(
        &mut self,
        conversation: &str,
        window: Duration,
        stop_on_refusal: bool,
    ) -> LoadDecision {
        let deadline = Instant::now() + window;
        let mut decision = LoadDecision::NoReply;
        while let Some(reply) = self.next_in_conversation(deadline, conversation).await {
            match reply.performative {
                Performative::Agree => return LoadDecision::Agreed,
                Performative::Refuse | Performative::Failure => {
                    let reason = reply
                        .text_content()
                        .map(str::to_string)
                        .unwrap_or_else(|| reply.content.to_string());
                    debug!("{} - Load refused by {}: {reason}", self.id, reply.from);
                    decision = LoadDecision::Refused(reason);
                    if stop_on_refusal {
                        return decision;
                    }
                }
                _ => {}
            }
        }
        decision
    }

    async fn hand_over(&mut self, job: TransferJob, next: ConveyorId) {
        self.state.hand_over();
        self.publish_state();
        info!("{} - Pallet handed over to {next}, spreading the route", self.id);
        self.emit(ConveyorEvent::HandedOver { to: next.clone() });
        self.deliver(Envelope::request(self.id.clone(), next, &job.to_request()))
            .await;
    }

    async fn give_up(&mut self, hop: HopJob, next: ConveyorId) {
        let job = hop.job;
        if job.reroute {
            let destination = job.destination().clone();
            warn!(
                "{} - {next} unavailable, rerouting towards {destination}",
                self.id
            );
            self.emit(ConveyorEvent::RerouteRequested {
                blocked: next,
                destination: destination.clone(),
            });
            let retry = Request::Transfer {
                destination,
                reroute: true,
                requester: job.requester.clone(),
            };
            self.deliver(Envelope::request(self.id.clone(), self.id.clone(), &retry))
                .await;
            return;
        }

        let err = ConveyorError::TransferStalled {
            at: self.id.0.clone(),
            next: next.0.clone(),
        };
        error!("{} - {err}", self.id);
        self.emit(ConveyorEvent::TransferStalled { next });
        self.notify_failure(job.notify_targets(), &err, None).await;
    }

    /// Send `failure` to each target other than this conveyor.
    async fn notify_failure(
        &self,
        targets: Vec<ConveyorId>,
        err: &ConveyorError,
        conversation: Option<String>,
    ) {
        for target in targets {
            if target == self.id {
                continue;
            }
            let notice =
                Envelope::text(self.id.clone(), target, Performative::Failure, err.to_string())
                    .with_conversation(conversation.clone());
            self.deliver(notice).await;
        }
    }
}

/// The sender of the routed transfer, then the job's own notice targets.
fn hop_targets(hop: &HopJob) -> Vec<ConveyorId> {
    let mut targets = vec![hop.reply_to.clone()];
    for target in hop.job.notify_targets() {
        if !targets.contains(&target) {
            targets.push(target);
        }
    }
    targets
}
