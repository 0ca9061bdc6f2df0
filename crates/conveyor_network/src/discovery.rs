//! Path discovery: flood probes through the layout, keep the shortest reply.
//!
//! The source marks itself and sends a `propagate` probe to every neighbour
//! under a fresh conversation id. Each idle relay that has not yet seen the
//! probe appends itself and floods further; the destination appends itself
//! and sends the complete path back to the source. The source collects
//! replies for a fixed window and keeps the first strictly-shortest one.

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::ConveyorError;
use crate::event::ConveyorEvent;
use crate::identity::ConveyorId;
use crate::message::{Envelope, PathQuery, Performative, Request, RoutedTransfer};
use crate::node::ConveyorNode;

/// Collects discovery replies and keeps the best one.
///
/// A reply replaces the current best only when it is strictly shorter, so
/// among equally short paths the one that arrived first wins.
#[derive(Debug, Default)]
pub struct PathAggregator {
    best: Option<PathQuery>,
    replies: usize,
}

impl PathAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offer(&mut self, path: PathQuery) {
        self.replies += 1;
        let shorter = match &self.best {
            Some(best) => path.len() < best.len(),
            None => true,
        };
        if shorter {
            self.best = Some(path);
        }
    }

    /// Number of replies offered so far.
    pub fn replies(&self) -> usize {
        self.replies
    }

    pub fn into_best(self) -> Option<PathQuery> {
        self.best
    }
}

/// A discovery run by this conveyor as source.
pub(crate) struct DiscoverySession {
    pub query: PathQuery,
    /// Receives the path, or the failure notice.
    pub requester: ConveyorId,
    pub requester_conversation: Option<String>,
    /// Start a routed transfer along the path instead of reporting it.
    pub auto_transfer: bool,
}

impl ConveyorNode {
    /// A `cfp`: someone wants a path from `query.source` to `query.destination`.
    pub(crate) async fn handle_discovery_call(&mut self, envelope: &Envelope, mut query: PathQuery) {
        if query.source != self.id {
            warn!(
                "{} - Path request for source {} sent to the wrong conveyor, forwarding",
                self.id, query.source
            );
            if query.reply_to.is_none() {
                query.reply_to = Some(envelope.from.clone());
            }
            let forward = Envelope::new(
                self.id.clone(),
                query.source.clone(),
                Performative::Cfp,
                query.to_value(),
            )
            .with_conversation(envelope.conversation_id.clone());
            self.deliver(forward).await;
            return;
        }

        info!(
            "{} - Received path finding request to {}",
            self.id, query.destination
        );
        let requester = query
            .reply_to
            .take()
            .unwrap_or_else(|| envelope.from.clone());
        self.discover(DiscoverySession {
            query,
            requester,
            requester_conversation: envelope.conversation_id.clone(),
            auto_transfer: false,
        })
        .await;
    }

    /// A `propagate`: relay the probe, answer it, or drop it.
    pub(crate) async fn relay_probe(&mut self, envelope: &Envelope, mut query: PathQuery) {
        if query.has_visited(&self.id) {
            debug!("{} - Already on this probe's path, dropping", self.id);
            return;
        }
        if query.is_empty() {
            // Nobody marked it yet: this is a fresh request, not a relay.
            self.handle_discovery_call(envelope, query).await;
            return;
        }
        if !self.state.is_idle() {
            debug!(
                "{} - {} and not relaying probe from {}",
                self.id,
                self.state.status(),
                envelope.from
            );
            return;
        }

        query.visit(&self.id);
        if query.destination == self.id {
            info!(
                "{} - I am the destination, sending the full path to {}",
                self.id, query.source
            );
            let reply = Envelope::new(
                self.id.clone(),
                query.source.clone(),
                Performative::Inform,
                query.to_value(),
            )
            .with_conversation(envelope.conversation_id.clone());
            self.deliver(reply).await;
            return;
        }

        debug!("{} - Adding myself to the path and propagating", self.id);
        self.flood(&query, envelope.conversation_id.clone()).await;
    }

    async fn flood(&self, query: &PathQuery, conversation: Option<String>) {
        let content = query.to_value();
        for neighbour in self.state.neighbours() {
            let probe = Envelope::new(
                self.id.clone(),
                neighbour.clone(),
                Performative::Propagate,
                content.clone(),
            )
            .with_conversation(conversation.clone());
            self.deliver(probe).await;
        }
    }

    /// Run a discovery as source, then report the result or act on it.
    pub(crate) async fn discover(&mut self, session: DiscoverySession) {
        let DiscoverySession {
            mut query,
            requester,
            requester_conversation,
            auto_transfer,
        } = session;
        query.visit(&self.id);

        let paths = if query.destination == self.id {
            let mut paths = PathAggregator::new();
            paths.offer(query.clone());
            paths
        } else {
            self.collect_paths(&query).await
        };
        let replies = paths.replies();

        let Some(mut path) = paths.into_best() else {
            warn!(
                "{} - No path from {} to {} within the discovery window",
                self.id, query.source, query.destination
            );
            self.emit(ConveyorEvent::DiscoveryFailed {
                destination: query.destination.clone(),
            });
            if requester != self.id {
                let err = ConveyorError::NoPathFound {
                    origin: query.source.0.clone(),
                    destination: query.destination.0.clone(),
                };
                let notice =
                    Envelope::text(self.id.clone(), requester, Performative::Failure, err.to_string())
                        .with_conversation(requester_conversation);
                self.deliver(notice).await;
            }
            return;
        };

        info!(
            "{} - Best path out of {replies} replies: {:?}",
            self.id, path.via_points
        );
        self.emit(ConveyorEvent::PathFound {
            route: path.via_points.clone(),
            replies,
        });

        if auto_transfer {
            let transfer = Request::RoutedTransfer(RoutedTransfer {
                route: path.via_points,
                reroute: query.reroute,
                requester: Some(requester),
            });
            self.deliver(Envelope::request(self.id.clone(), self.id.clone(), &transfer))
                .await;
        } else {
            path.reply_to = None;
            let reply = Envelope::new(
                self.id.clone(),
                requester,
                Performative::Inform,
                path.to_value(),
            )
            .with_conversation(requester_conversation);
            self.deliver(reply).await;
        }
    }

    /// Flood the probe and gather replies until the window closes. The
    /// conveyor is Busy meanwhile and gets its previous status back after.
    async fn collect_paths(&mut self, query: &PathQuery) -> PathAggregator {
        let flood_id = uuid::Uuid::new_v4().to_string();
        let previous = self.state.occupy();
        self.publish_state();

        self.flood(query, Some(flood_id.clone())).await;
        info!("{} - Polling paths to {}", self.id, query.destination);

        let deadline = Instant::now() + self.config.discovery_window;
        let mut paths = PathAggregator::new();
        while let Some(reply) = self.next_in_conversation(deadline, &flood_id).await {
            if reply.performative != Performative::Inform {
                continue;
            }
            match serde_json::from_value::<PathQuery>(reply.content) {
                Ok(path) => {
                    debug!("{} - Path reply: {:?}", self.id, path.via_points);
                    paths.offer(path);
                }
                Err(e) => warn!(
                    "{} - Discarding malformed path reply from {}: {e}",
                    self.id, reply.from
                ),
            }
        }

        self.state.set_status(previous);
        self.publish_state();
        paths
    }
}
