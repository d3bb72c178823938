//! Sync protocol messages.
//!
//! Wire envelope is JSON with a `type` discriminant. Every message is a full
//! state target, not a delta, so applying the same message twice yields the
//! same local state as applying it once.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};

/// Messages exchanged between peers for synchronization.
///
/// Only the authority peer emits these; followers apply them through
/// [`Session::apply_message`](crate::Session::apply_message) and never
/// re-broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncMessage {
    /// Replace the receiver's loaded audio wholesale.
    #[serde(rename_all = "camelCase")]
    LoadAudio {
        /// Raw audio bytes, broadcast by value.
        payload: Vec<u8>,
        source_name: String,
        mime_type: String,
    },

    /// Replace the receiver's lyrics wholesale; the receiver re-parses.
    #[serde(rename_all = "camelCase")]
    LoadLrc { text: String, source_name: String },

    /// Playback state reconciliation target.
    #[serde(rename_all = "camelCase")]
    PlayerState {
        is_playing: bool,
        position_seconds: f64,
        volume: f64,
    },
}

impl SyncMessage {
    /// The wire discriminant, for logging.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::LoadAudio { .. } => "loadAudio",
            Self::LoadLrc { .. } => "loadLrc",
            Self::PlayerState { .. } => "playerState",
        }
    }

    /// Decode a message from its wire form.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ProtocolDecode`] on malformed JSON or an unknown
    /// `type` tag. Callers log and drop; a bad message never crashes a peer.
    pub fn decode(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| CoreError::ProtocolDecode {
            reason: e.to_string(),
        })
    }

    /// Encode a message to its wire form.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ChannelSendFailed`] if serialization fails.
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| CoreError::ChannelSendFailed {
            reason: e.to_string(),
        })
    }
}
