//! Classifies inbound envelopes into intents before a conveyor acts on them.
//!
//! Classification is by intent rather than raw performative: a `request`
//! becomes one of six commands depending on its `request_type`, a `cfp` is a
//! discovery call, a `propagate` is a probe. Acknowledgement-only envelopes
//! are recognised here; the node never answers them.

use serde_json::Value;

use crate::message::{Envelope, PathQuery, Performative, Request, RoutedTransfer, TRANSFER_FINISHED};

/// What an inbound envelope asks the conveyor to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    InfoQuery,
    Load,
    Unload,
    SetStatus(String),
    RoutedTransfer(RoutedTransfer),
    Transfer {
        destination: crate::identity::ConveyorId,
        reroute: bool,
        requester: Option<crate::identity::ConveyorId>,
    },
    DiscoveryCall(PathQuery),
    DiscoveryProbe(PathQuery),
    /// A pallet reached the end of a route this conveyor started.
    TransferFinished,
    /// A discovery reply that arrived after its window closed.
    LatePathReply(PathQuery),
    /// agree / failure / not_understood: swallowed without a reply.
    Acknowledgement,
    /// The body could not be parsed; carries a diagnostic.
    NotUnderstood(String),
    /// A well-formed envelope of a kind this conveyor does not handle.
    Unexpected(String),
}

impl Intent {
    /// Return a string key used in dispatch logs.
    pub fn dispatch_key(&self) -> &'static str {
        match self {
            Self::InfoQuery => "info_query",
            Self::Load => "load_cmd",
            Self::Unload => "unload_cmd",
            Self::SetStatus(_) => "status_cmd",
            Self::RoutedTransfer(_) => "routed_transfer_cmd",
            Self::Transfer { .. } => "transfer_cmd",
            Self::DiscoveryCall(_) => "discovery_call",
            Self::DiscoveryProbe(_) => "discovery_probe",
            Self::TransferFinished => "transfer_finished",
            Self::LatePathReply(_) => "late_path_reply",
            Self::Acknowledgement => "acknowledgement",
            Self::NotUnderstood(_) => "not_understood",
            Self::Unexpected(_) => "unexpected",
        }
    }

    /// Whether the conveyor stays silent for this intent.
    pub fn is_silent(&self) -> bool {
        matches!(
            self,
            Self::TransferFinished | Self::LatePathReply(_) | Self::Acknowledgement
        )
    }
}

/// Classify an inbound envelope.
pub fn classify(envelope: &Envelope) -> Intent {
    match envelope.performative {
        Performative::Agree | Performative::Failure | Performative::NotUnderstood => {
            Intent::Acknowledgement
        }
        Performative::Inform => classify_inform(&envelope.content),
        Performative::Request => classify_request(&envelope.content),
        Performative::Cfp => match parse_path_query(&envelope.content) {
            Ok(query) => Intent::DiscoveryCall(query),
            Err(diag) => Intent::NotUnderstood(diag),
        },
        Performative::Propagate => match parse_path_query(&envelope.content) {
            Ok(query) => Intent::DiscoveryProbe(query),
            Err(diag) => Intent::NotUnderstood(diag),
        },
        Performative::Refuse => Intent::Unexpected(Performative::Refuse.as_str().to_string()),
    }
}

fn classify_inform(content: &Value) -> Intent {
    if let Some(text) = content.as_str() {
        if text.trim().eq_ignore_ascii_case(TRANSFER_FINISHED) {
            return Intent::TransferFinished;
        }
    }
    match serde_json::from_value::<PathQuery>(content.clone()) {
        Ok(path) => Intent::LatePathReply(path),
        Err(_) => Intent::Unexpected(Performative::Inform.as_str().to_string()),
    }
}

fn classify_request(content: &Value) -> Intent {
    let body = match structured(content) {
        Ok(body) => body,
        Err(diag) => return Intent::NotUnderstood(diag),
    };

    let request_type = match body.get("request_type").and_then(Value::as_str) {
        Some(kind) => kind.to_string(),
        None => return Intent::NotUnderstood("Request not understood: missing request_type".into()),
    };
    if !Request::KNOWN_TYPES.contains(&request_type.as_str()) {
        return Intent::Unexpected(request_type);
    }

    match serde_json::from_value::<Request>(body) {
        Ok(Request::GetInfo) => Intent::InfoQuery,
        Ok(Request::Load) => Intent::Load,
        Ok(Request::Unload) => Intent::Unload,
        Ok(Request::SetStatus { status }) => Intent::SetStatus(status),
        Ok(Request::RoutedTransfer(transfer)) => Intent::RoutedTransfer(transfer),
        Ok(Request::Transfer {
            destination,
            reroute,
            requester,
        }) => Intent::Transfer {
            destination,
            reroute,
            requester,
        },
        Err(e) => Intent::NotUnderstood(format!("Request not understood: {e}")),
    }
}

fn parse_path_query(content: &Value) -> Result<PathQuery, String> {
    let body = structured(content)?;
    serde_json::from_value(body).map_err(|e| format!("Path query not understood: {e}"))
}

/// Bodies may arrive as JSON values or as JSON text; normalise to a value.
fn structured(content: &Value) -> Result<Value, String> {
    match content {
        Value::String(text) => serde_json::from_str::<Value>(text)
            .map_err(|e| format!("Request not understood: {e}")),
        other => Ok(other.clone()),
    }
}
