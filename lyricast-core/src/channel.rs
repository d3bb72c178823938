//! Peer broadcast seam and the authority guard.

use crate::error::Result;
use crate::protocol::SyncMessage;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{trace, warn};

/// The host environment's pub/sub channel to peers.
///
/// Delivery is reliable and at-least-once, with no ordering guarantee across
/// distinct senders. Messages are designed to be idempotent under
/// re-delivery, so implementations need no dedup.
#[async_trait]
pub trait BroadcastChannel: Send + Sync {
    /// Send a message to all peers.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying channel rejects the send. Callers
    /// treat sends as fire-and-forget; failures are logged, never retried.
    async fn send(&self, message: &SyncMessage) -> Result<()>;
}

/// Answers whether this peer is the session authority.
///
/// Only the authority emits sync messages; followers apply them but never
/// re-broadcast. The role may change at runtime (e.g. host transfer), so it
/// is consulted per publish rather than captured at construction.
pub trait AuthorityCheck: Send + Sync {
    fn is_authority(&self) -> bool;
}

/// Publishes sync messages, gated on the authority role.
///
/// This is the single place authority is checked: call sites publish
/// unconditionally and the guard silently drops the message on follower
/// peers, which also prevents reconciliation feedback loops.
pub struct Broadcaster {
    channel: Arc<dyn BroadcastChannel>,
    authority: Arc<dyn AuthorityCheck>,
}

impl Broadcaster {
    #[must_use]
    pub fn new(channel: Arc<dyn BroadcastChannel>, authority: Arc<dyn AuthorityCheck>) -> Self {
        Self { channel, authority }
    }

    /// Send a message to peers if this peer is the authority.
    ///
    /// Fire-and-forget: send failures are logged and swallowed, a peer being
    /// offline must never disturb local playback.
    pub async fn publish(&self, message: &SyncMessage) {
        if !self.authority.is_authority() {
            trace!("not the authority, suppressing {} broadcast", message.kind());
            return;
        }
        if let Err(e) = self.channel.send(message).await {
            warn!("failed to broadcast {} message: {e}", message.kind());
        }
    }
}
