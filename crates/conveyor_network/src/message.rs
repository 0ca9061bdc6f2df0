//! Message protocol: envelopes, performatives and request bodies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::ConveyorId;

/// Text of the notice sent to the route origin when a pallet arrives.
pub const TRANSFER_FINISHED: &str = "Transfer finished";

/// The communicative act carried by an [`Envelope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Performative {
    /// Ask a conveyor to do something; the body is a [`Request`].
    Request,
    /// Positive acknowledgement.
    Agree,
    /// Negative decision on a request.
    Refuse,
    /// The request was understood but could not be carried out.
    Failure,
    /// Information: a snapshot, a discovered path, or a transfer notice.
    Inform,
    /// The body could not be parsed.
    NotUnderstood,
    /// Ask a conveyor to start a path discovery on someone's behalf.
    Cfp,
    /// An in-flight discovery probe.
    Propagate,
}

impl Performative {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Agree => "agree",
            Self::Refuse => "refuse",
            Self::Failure => "failure",
            Self::Inform => "inform",
            Self::NotUnderstood => "not_understood",
            Self::Cfp => "cfp",
            Self::Propagate => "propagate",
        }
    }
}

/// A message between two named parties on the switchboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique message identifier (UUID v4).
    pub id: String,
    pub from: ConveyorId,
    pub to: ConveyorId,
    pub performative: Performative,
    /// JSON body, interpreted according to `performative`.
    pub content: serde_json::Value,
    /// Correlates replies with the wait that is expecting them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    pub fn new(
        from: ConveyorId,
        to: ConveyorId,
        performative: Performative,
        content: serde_json::Value,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            from,
            to,
            performative,
            content,
            conversation_id: None,
            timestamp: Utc::now(),
        }
    }

    /// Build an envelope carrying a plain text body.
    pub fn text(
        from: ConveyorId,
        to: ConveyorId,
        performative: Performative,
        text: impl Into<String>,
    ) -> Self {
        Self::new(from, to, performative, serde_json::Value::String(text.into()))
    }

    /// Build a `request` envelope for the given body.
    pub fn request(from: ConveyorId, to: ConveyorId, request: &Request) -> Self {
        Self::new(from, to, Performative::Request, request.to_value())
    }

    pub fn with_conversation(mut self, conversation_id: Option<String>) -> Self {
        self.conversation_id = conversation_id;
        self
    }

    /// Answer this envelope: sender and receiver swap, the conversation id
    /// is kept.
    pub fn reply(&self, performative: Performative, content: serde_json::Value) -> Envelope {
        Envelope::new(self.to.clone(), self.from.clone(), performative, content)
            .with_conversation(self.conversation_id.clone())
    }

    pub fn reply_text(&self, performative: Performative, text: impl Into<String>) -> Envelope {
        self.reply(performative, serde_json::Value::String(text.into()))
    }

    /// The body as text, when it is a JSON string.
    pub fn text_content(&self) -> Option<&str> {
        self.content.as_str()
    }

    pub fn in_conversation(&self, conversation_id: &str) -> bool {
        self.conversation_id.as_deref() == Some(conversation_id)
    }

    /// Serialize the envelope to a JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize an envelope from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Body of a `request` envelope, tagged by `request_type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "request_type", rename_all = "snake_case")]
pub enum Request {
    GetInfo,
    Load,
    Unload,
    SetStatus {
        status: String,
    },
    /// Move the pallet along a known route.
    RoutedTransfer(RoutedTransfer),
    /// Find the best route to `destination`, then move the pallet along it.
    Transfer {
        destination: ConveyorId,
        #[serde(default = "default_reroute")]
        reroute: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        requester: Option<ConveyorId>,
    },
}

impl Request {
    /// The `request_type` tags this protocol understands.
    pub const KNOWN_TYPES: [&'static str; 6] = [
        "get_info",
        "load",
        "unload",
        "set_status",
        "routed_transfer",
        "transfer",
    ];

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

fn default_reroute() -> bool {
    true
}

/// A route to follow, from the pallet's current conveyor to its destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutedTransfer {
    #[serde(rename = "via_points")]
    pub route: Vec<ConveyorId>,
    #[serde(default)]
    pub reroute: bool,
    /// Who asked for the transfer, when it is not the route origin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requester: Option<ConveyorId>,
}

/// A discovery request: travels as a probe, returns as a reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathQuery {
    pub source: ConveyorId,
    pub destination: ConveyorId,
    /// Conveyors traversed so far, in order, without duplicates.
    #[serde(default)]
    pub via_points: Vec<ConveyorId>,
    #[serde(default)]
    pub reroute: bool,
    /// Where the result goes when the call was forwarded to the source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<ConveyorId>,
}

impl PathQuery {
    pub fn new(source: ConveyorId, destination: ConveyorId, reroute: bool) -> Self {
        Self {
            source,
            destination,
            via_points: Vec::new(),
            reroute,
            reply_to: None,
        }
    }

    pub fn has_visited(&self, id: &ConveyorId) -> bool {
        self.via_points.contains(id)
    }

    /// Append `id` to the visited list. Returns false if it was already there.
    pub fn visit(&mut self, id: &ConveyorId) -> bool {
        if self.has_visited(id) {
            return false;
        }
        self.via_points.push(id.clone());
        true
    }

    /// Number of conveyors on the path, endpoints included.
    pub fn len(&self) -> usize {
        self.via_points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.via_points.is_empty()
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}
