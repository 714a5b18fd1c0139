//! Broadcast fan-out and the connection retirement path.
//!
//! A broadcast serializes the envelope once, frames it once, and writes the
//! identical bytes to every connection in a registry snapshot. Send
//! failures are collected during iteration and the registry is only touched
//! afterwards. Because a retirement itself announces the departure (and a
//! departed peer's announcement can reveal further dead sockets), removals
//! are driven as an iterative worklist rather than recursion.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::db::ChatStore;
use crate::ws::frame::{self, Opcode};
use crate::ws::message::{wall_clock, ServerMessage};
use crate::ws::registry::{ConnectionRegistry, Outbound, Peer};

pub struct BroadcastHub {
    registry: Arc<ConnectionRegistry>,
    store: Arc<dyn ChatStore>,
}

impl BroadcastHub {
    pub fn new(registry: Arc<ConnectionRegistry>, store: Arc<dyn ChatStore>) -> Self {
        Self { registry, store }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Fan one envelope out to every live connection. Returns how many
    /// connections the frame was written to; dead connections found along
    /// the way are retired without aborting delivery to the rest.
    pub async fn broadcast(&self, msg: &ServerMessage) -> usize {
        let Some(bytes) = encode_envelope(msg) else {
            return 0;
        };
        let (delivered, pruned) = self.fanout(bytes).await;
        self.retire(pruned).await;
        delivered
    }

    /// Unicast one envelope. A failed write retires the connection.
    pub async fn send_to(&self, id: u64, msg: &ServerMessage) -> bool {
        let Some(bytes) = encode_envelope(msg) else {
            return false;
        };
        let targets = self.registry.snapshot().await;
        let Some((_, sender)) = targets.into_iter().find(|(peer_id, _)| *peer_id == id) else {
            return false;
        };
        if sender.send(Outbound::Frame(bytes)).is_ok() {
            return true;
        }
        if let Some(peer) = self.registry.remove(id).await {
            self.retire(vec![peer]).await;
        }
        false
    }

    /// Broadcast the current roster to everyone.
    pub async fn announce_roster(&self) -> usize {
        let msg = self.roster_message().await;
        self.broadcast(&msg).await
    }

    /// The shared cleanup entry: deregister, end the session, announce the
    /// departure. Safe to call from racing triggers; only the caller that
    /// actually removed the peer runs the cleanup. Returns whether this
    /// call was the one that retired it.
    pub async fn drop_peer(&self, id: u64, reason: &str) -> bool {
        match self.registry.remove(id).await {
            Some(peer) => {
                info!(id, nickname = %peer.nickname, reason, "closing connection");
                peer.try_send(Outbound::Close);
                self.retire(vec![peer]).await;
                true
            }
            None => false,
        }
    }

    async fn roster_message(&self) -> ServerMessage {
        let users = self.registry.roster().await;
        let count = users.len();
        ServerMessage::Userlist { users, count }
    }

    /// Write `bytes` to a snapshot of the registry. Returns the delivered
    /// count and the peers whose channels were already gone, removed from
    /// the registry after the iteration finished.
    async fn fanout(&self, bytes: Vec<u8>) -> (usize, Vec<Peer>) {
        let targets = self.registry.snapshot().await;
        let mut delivered = 0;
        let mut dead = Vec::new();
        for (id, sender) in targets {
            if sender.send(Outbound::Frame(bytes.clone())).is_ok() {
                delivered += 1;
            } else {
                dead.push(id);
            }
        }

        let mut pruned = Vec::new();
        for id in dead {
            if let Some(peer) = self.registry.remove(id).await {
                pruned.push(peer);
            }
        }
        (delivered, pruned)
    }

    /// Finish removals: persistence cleanup plus "left the chat" and roster
    /// announcements for each retired peer. Announcements may surface more
    /// dead sockets, which join the worklist.
    async fn retire(&self, mut pruned: Vec<Peer>) {
        while let Some(peer) = pruned.pop() {
            warn!(id = peer.id, nickname = %peer.nickname, "retiring connection");

            if let Some(session_id) = peer.session_id {
                if let Err(e) = self.store.end_session(session_id).await {
                    warn!(session_id, error = %e, "failed to end session");
                }
            }
            let farewell = format!("{} left the chat", peer.nickname);
            if let Err(e) = self
                .store
                .save_message(peer.session_id, &peer.nickname, &peer.addr, &farewell, "system")
                .await
            {
                warn!(error = %e, "failed to save departure message");
            }
            if let Err(e) = self
                .store
                .log_system("disconnect", &farewell, Some(&peer.addr))
                .await
            {
                warn!(error = %e, "failed to write system log");
            }

            let online_count = self.registry.count().await;
            let system = ServerMessage::System {
                message: farewell,
                timestamp: wall_clock(),
                online_count,
            };
            if let Some(bytes) = encode_envelope(&system) {
                let (_, more) = self.fanout(bytes).await;
                pruned.extend(more);
            }
            let roster = self.roster_message().await;
            if let Some(bytes) = encode_envelope(&roster) {
                let (_, more) = self.fanout(bytes).await;
                pruned.extend(more);
            }
        }
    }
}

fn encode_envelope(msg: &ServerMessage) -> Option<Vec<u8>> {
    match serde_json::to_string(msg) {
        Ok(text) => Some(frame::encode_text(&text)),
        Err(e) => {
            error!(error = %e, "failed to serialize envelope");
            None
        }
    }
}

/// Encoded zero-payload ping, shared by the liveness monitor.
pub fn ping_frame() -> Vec<u8> {
    frame::encode_control(Opcode::Ping, &[], None).expect("empty control frame")
}
