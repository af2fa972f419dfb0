//! Board sync protocol and relay wire framing.
//!
//! Two named actions travel between peers of a board room:
//!
//! ```text
//! vector  { "payload": base64(state vector) }   "here is what I have"
//! update  { "payload": base64(update) }         "here is what you lack"
//! ```
//!
//! Binary payloads are standard base64; empty bytes encode as the empty
//! string and mean "nothing to send".
//!
//! Over the WebSocket relay every action (and every room membership event)
//! is wrapped in a bincode-encoded [`RelayFrame`]:
//!
//! ```text
//! ┌──────┬─────────┬──────┬──────────┬────────┬───────────┐
//! │ kind │ peer_id │ room │ target?  │ action │ payload   │
//! │ u8   │ 16 B    │ str  │ 16 B     │ str    │ variable  │
//! └──────┴─────────┴──────┴──────────┴────────┴───────────┘
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Protocol errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("invalid base64 payload: {0}")]
    Payload(#[from] base64::DecodeError),

    #[error("unknown action `{0}`")]
    UnknownAction(String),

    #[error("connection closed")]
    ConnectionClosed,
}

/// Encode bytes for a text-only channel.
pub fn encode_payload(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return String::new();
    }
    STANDARD.encode(bytes)
}

/// Inverse of [`encode_payload`].
pub fn decode_payload(text: &str) -> Result<Vec<u8>, ProtocolError> {
    if text.is_empty() {
        return Ok(Vec::new());
    }
    Ok(STANDARD.decode(text)?)
}

/// Named sync actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncAction {
    Vector,
    Update,
}

impl SyncAction {
    pub fn name(&self) -> &'static str {
        match self {
            SyncAction::Vector => "vector",
            SyncAction::Update => "update",
        }
    }

    pub fn from_name(name: &str) -> Result<Self, ProtocolError> {
        match name {
            "vector" => Ok(SyncAction::Vector),
            "update" => Ok(SyncAction::Update),
            other => Err(ProtocolError::UnknownAction(other.to_string())),
        }
    }
}

/// JSON body shared by both actions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionPayload {
    #[serde(default)]
    pub payload: String,
}

/// A decoded sync message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncMessage {
    pub action: SyncAction,
    pub bytes: Vec<u8>,
}

impl SyncMessage {
    pub fn vector(state_vector: Vec<u8>) -> Self {
        Self {
            action: SyncAction::Vector,
            bytes: state_vector,
        }
    }

    pub fn update(update: Vec<u8>) -> Self {
        Self {
            action: SyncAction::Update,
            bytes: update,
        }
    }

    /// JSON body to put on the wire under `self.action.name()`.
    pub fn body(&self) -> Result<String, ProtocolError> {
        let body = ActionPayload {
            payload: encode_payload(&self.bytes),
        };
        serde_json::to_string(&body).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Parse an action received from a peer.
    pub fn parse(action: &str, body: &str) -> Result<Self, ProtocolError> {
        let action = SyncAction::from_name(action)?;
        let body: ActionPayload = serde_json::from_str(body)
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        Ok(Self {
            action,
            bytes: decode_payload(&body.payload)?,
        })
    }
}

/// Relay frame kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum FrameKind {
    /// Client enters a room
    Join = 1,
    /// Client leaves a room
    Leave = 2,
    /// Relay reports another member of the room
    PeerJoined = 3,
    /// Relay reports a departed member
    PeerLeft = 4,
    /// A named action between members
    Action = 5,
}

/// Envelope exchanged with the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayFrame {
    pub kind: FrameKind,
    /// Sender for client frames, subject for membership frames
    pub peer_id: Uuid,
    /// Room key, `<app_id>/<room>`
    pub room: String,
    /// Recipient of a point-to-point action; `None` broadcasts
    pub target: Option<Uuid>,
    pub action: String,
    pub payload: Vec<u8>,
}

impl RelayFrame {
    fn membership(kind: FrameKind, peer_id: Uuid, room: &str) -> Self {
        Self {
            kind,
            peer_id,
            room: room.to_string(),
            target: None,
            action: String::new(),
            payload: Vec::new(),
        }
    }

    pub fn join(peer_id: Uuid, room: &str) -> Self {
        Self::membership(FrameKind::Join, peer_id, room)
    }

    pub fn leave(peer_id: Uuid, room: &str) -> Self {
        Self::membership(FrameKind::Leave, peer_id, room)
    }

    /// `peer_id` joined; delivered to `target` only when set.
    pub fn peer_joined(peer_id: Uuid, room: &str, target: Option<Uuid>) -> Self {
        Self {
            target,
            ..Self::membership(FrameKind::PeerJoined, peer_id, room)
        }
    }

    pub fn peer_left(peer_id: Uuid, room: &str) -> Self {
        Self::membership(FrameKind::PeerLeft, peer_id, room)
    }

    pub fn action(
        peer_id: Uuid,
        room: &str,
        target: Option<Uuid>,
        action: &str,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            kind: FrameKind::Action,
            peer_id,
            room: room.to_string(),
            target,
            action: action.to_string(),
            payload,
        }
    }

    /// True if the relay should hand this frame to `peer`.
    pub fn is_for(&self, peer: Uuid) -> bool {
        self.peer_id != peer && self.target.map_or(true, |t| t == peer)
    }

    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (frame, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        Ok(frame)
    }
}
