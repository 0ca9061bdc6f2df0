//! Operator client. Issues requests to conveyors and correlates the replies.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

use crate::directory::ServiceKind;
use crate::error::ConveyorError;
use crate::identity::ConveyorId;
use crate::message::{
    Envelope, PathQuery, Performative, Request, RoutedTransfer, TRANSFER_FINISHED,
};
use crate::state::{ConveyorInfo, ConveyorStatus};
use crate::transport::Switchboard;

const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(5);
const CLIENT_MAILBOX_CAPACITY: usize = 64;

/// A named party on the switchboard that is not a conveyor.
pub struct ConveyorClient {
    id: ConveyorId,
    switchboard: Switchboard,
    inbox: mpsc::Receiver<Envelope>,
    /// Envelopes that arrived while waiting for a specific reply.
    pending: VecDeque<Envelope>,
    reply_timeout: Duration,
}

impl ConveyorClient {
    pub async fn connect(switchboard: &Switchboard, id: ConveyorId) -> Result<Self, ConveyorError> {
        let inbox = switchboard
            .register(id.clone(), ServiceKind::Client, CLIENT_MAILBOX_CAPACITY)
            .await?;
        Ok(Self {
            id,
            switchboard: switchboard.clone(),
            inbox,
            pending: VecDeque::new(),
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
        })
    }

    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    pub fn id(&self) -> &ConveyorId {
        &self.id
    }

    /// Send a prepared envelope as is.
    pub async fn send(&self, envelope: Envelope) -> Result<(), ConveyorError> {
        self.switchboard.send(envelope).await
    }

    /// Send a request and wait for the reply in the same conversation.
    pub async fn request(
        &mut self,
        to: &ConveyorId,
        request: &Request,
    ) -> Result<Envelope, ConveyorError> {
        let conversation = uuid::Uuid::new_v4().to_string();
        let envelope = Envelope::request(self.id.clone(), to.clone(), request)
            .with_conversation(Some(conversation.clone()));
        self.send(envelope).await?;
        self.await_conversation(&conversation, self.reply_timeout)
            .await
    }

    async fn await_conversation(
        &mut self,
        conversation: &str,
        timeout: Duration,
    ) -> Result<Envelope, ConveyorError> {
        let deadline = Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, self.inbox.recv()).await {
                Ok(Some(envelope)) if envelope.in_conversation(conversation) => return Ok(envelope),
                Ok(Some(envelope)) => {
                    debug!(
                        "{} - Holding unrelated {} from {}",
                        self.id,
                        envelope.performative.as_str(),
                        envelope.from
                    );
                    self.pending.push_back(envelope);
                }
                Ok(None) => {
                    return Err(ConveyorError::Transport(format!(
                        "mailbox of {} is closed",
                        self.id
                    )));
                }
                Err(_) => return Err(ConveyorError::Timeout(timeout)),
            }
        }
    }

    /// Next envelope addressed to this client, held ones first.
    pub async fn recv(&mut self, timeout: Duration) -> Result<Envelope, ConveyorError> {
        if let Some(envelope) = self.pending.pop_front() {
            return Ok(envelope);
        }
        match tokio::time::timeout(timeout, self.inbox.recv()).await {
            Ok(Some(envelope)) => Ok(envelope),
            Ok(None) => Err(ConveyorError::Transport(format!(
                "mailbox of {} is closed",
                self.id
            ))),
            Err(_) => Err(ConveyorError::Timeout(timeout)),
        }
    }

    pub async fn info(&mut self, conveyor: &ConveyorId) -> Result<ConveyorInfo, ConveyorError> {
        let reply = self.request(conveyor, &Request::GetInfo).await?;
        if reply.performative != Performative::Inform {
            return Err(ConveyorError::Rejected(describe(&reply)));
        }
        Ok(serde_json::from_value(reply.content)?)
    }

    pub async fn load(&mut self, conveyor: &ConveyorId) -> Result<String, ConveyorError> {
        let reply = self.request(conveyor, &Request::Load).await?;
        accepted(reply)
    }

    pub async fn unload(&mut self, conveyor: &ConveyorId) -> Result<String, ConveyorError> {
        let reply = self.request(conveyor, &Request::Unload).await?;
        accepted(reply)
    }

    pub async fn set_status(
        &mut self,
        conveyor: &ConveyorId,
        status: ConveyorStatus,
    ) -> Result<String, ConveyorError> {
        let request = Request::SetStatus {
            status: status.to_string(),
        };
        let reply = self.request(conveyor, &request).await?;
        accepted(reply)
    }

    /// Ask `source` for the best path to `destination`. The wait must cover
    /// the discovery window.
    pub async fn find_path(
        &mut self,
        source: &ConveyorId,
        destination: &ConveyorId,
        timeout: Duration,
    ) -> Result<Vec<ConveyorId>, ConveyorError> {
        let conversation = uuid::Uuid::new_v4().to_string();
        let query = PathQuery::new(source.clone(), destination.clone(), false);
        let call = Envelope::new(
            self.id.clone(),
            source.clone(),
            Performative::Cfp,
            query.to_value(),
        )
        .with_conversation(Some(conversation.clone()));
        self.send(call).await?;

        let reply = self.await_conversation(&conversation, timeout).await?;
        if reply.performative != Performative::Inform {
            return Err(ConveyorError::Rejected(describe(&reply)));
        }
        let path: PathQuery = serde_json::from_value(reply.content)?;
        Ok(path.via_points)
    }

    /// Start moving the pallet along `route`. Completion arrives later as a
    /// transfer-finished notice, see [`Self::wait_for_transfer_finished`].
    pub async fn routed_transfer(
        &self,
        route: Vec<ConveyorId>,
        reroute: bool,
    ) -> Result<(), ConveyorError> {
        let Some(origin) = route.first().cloned() else {
            return Err(ConveyorError::Rejected("route is empty".into()));
        };
        let request = Request::RoutedTransfer(RoutedTransfer {
            route,
            reroute,
            requester: None,
        });
        self.send(Envelope::request(self.id.clone(), origin, &request))
            .await
    }

    /// Move the pallet from `source` to `destination` over the best route.
    pub async fn transfer(
        &self,
        source: &ConveyorId,
        destination: &ConveyorId,
        reroute: bool,
    ) -> Result<(), ConveyorError> {
        let request = Request::Transfer {
            destination: destination.clone(),
            reroute,
            requester: None,
        };
        self.send(Envelope::request(self.id.clone(), source.clone(), &request))
            .await
    }

    /// Wait for the end of a transfer. Returns the conveyor that reported
    /// arrival, or the failure reason.
    pub async fn wait_for_transfer_finished(
        &mut self,
        timeout: Duration,
    ) -> Result<ConveyorId, ConveyorError> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let envelope = match self.recv(remaining).await {
                Err(ConveyorError::Timeout(_)) => return Err(ConveyorError::Timeout(timeout)),
                other => other?,
            };
            match envelope.performative {
                Performative::Inform if envelope.text_content() == Some(TRANSFER_FINISHED) => {
                    return Ok(envelope.from);
                }
                Performative::Failure | Performative::NotUnderstood | Performative::Refuse => {
                    return Err(ConveyorError::Rejected(describe(&envelope)));
                }
                _ => debug!(
                    "{} - Ignoring {} from {} while waiting for transfer",
                    self.id,
                    envelope.performative.as_str(),
                    envelope.from
                ),
            }
        }
    }

    pub async fn disconnect(self) {
        self.switchboard.deregister(&self.id).await;
    }
}

fn describe(envelope: &Envelope) -> String {
    envelope
        .text_content()
        .map(str::to_string)
        .unwrap_or_else(|| envelope.content.to_string())
}

fn accepted(reply: Envelope) -> Result<String, ConveyorError> {
    match reply.performative {
        Performative::Agree | Performative::Inform => Ok(describe(&reply)),
        _ => Err(ConveyorError::Rejected(describe(&reply))),
    }
}
