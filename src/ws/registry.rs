//! Authoritative in-memory set of open connections.
//!
//! All mutation is serialized behind a single `RwLock`; the identifier
//! counter only moves forward, so an id observed anywhere in the system is
//! never reused for a later connection. `remove` is idempotent and returns
//! the peer exactly once, which is what makes the cleanup path safe to
//! trigger from racing sources (read loop, broadcast prune, liveness sweep).

use std::collections::HashMap;

use chrono::{DateTime, Local};
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use crate::ws::message::RosterEntry;

/// What travels down a connection's outbound channel to its writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Already-encoded frame bytes, written verbatim.
    Frame(Vec<u8>),
    /// Write a close frame and shut the transport down.
    Close,
}

/// Per-connection bookkeeping. The accumulation buffer lives in the
/// connection's read task, not here.
#[derive(Debug)]
pub struct Peer {
    pub id: u64,
    pub nickname: String,
    pub addr: String,
    pub joined_at: DateTime<Local>,
    /// Liveness flag: true when any qualifying signal arrived since the
    /// last monitor tick.
    pub alive: bool,
    pub user_id: Option<i64>,
    pub session_id: Option<i64>,
    sender: mpsc::UnboundedSender<Outbound>,
}

impl Peer {
    pub fn try_send(&self, item: Outbound) -> bool {
        self.sender.send(item).is_ok()
    }
}

#[derive(Debug, Default)]
struct RegistryInner {
    next_id: u64,
    peers: HashMap<u64, Peer>,
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    inner: RwLock<RegistryInner>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and hand back its identifier. Identifiers are
    /// strictly increasing and never reused, even after removal.
    pub async fn add(&self, addr: String, sender: mpsc::UnboundedSender<Outbound>) -> u64 {
        let mut inner = self.inner.write().await;
        inner.next_id += 1;
        let id = inner.next_id;
        inner.peers.insert(
            id,
            Peer {
                id,
                nickname: "Anonymous".to_string(),
                addr,
                joined_at: Local::now(),
                alive: true,
                user_id: None,
                session_id: None,
                sender,
            },
        );
        debug!(id, online = inner.peers.len(), "connection registered");
        id
    }

    /// Remove a connection. A no-op (returning `None`) when the id is
    /// already gone.
    pub async fn remove(&self, id: u64) -> Option<Peer> {
        let mut inner = self.inner.write().await;
        let peer = inner.peers.remove(&id);
        if peer.is_some() {
            debug!(id, online = inner.peers.len(), "connection removed");
        }
        peer
    }

    pub async fn count(&self) -> usize {
        self.inner.read().await.peers.len()
    }

    pub async fn contains(&self, id: u64) -> bool {
        self.inner.read().await.peers.contains_key(&id)
    }

    /// Populate nickname and persistence links once a join arrives.
    pub async fn set_identity(
        &self,
        id: u64,
        nickname: String,
        user_id: Option<i64>,
        session_id: Option<i64>,
    ) {
        if let Some(peer) = self.inner.write().await.peers.get_mut(&id) {
            peer.nickname = nickname;
            peer.user_id = user_id;
            peer.session_id = session_id;
        }
    }

    /// Force the liveness flag true. Called for any inbound frame, pong,
    /// or application heartbeat.
    pub async fn mark_alive(&self, id: u64) {
        if let Some(peer) = self.inner.write().await.peers.get_mut(&id) {
            peer.alive = true;
        }
    }

    /// Cloneable view of one peer's identity fields.
    pub async fn peer_info(&self, id: u64) -> Option<PeerInfo> {
        self.inner.read().await.peers.get(&id).map(|p| PeerInfo {
            id: p.id,
            nickname: p.nickname.clone(),
            addr: p.addr.clone(),
            user_id: p.user_id,
            session_id: p.session_id,
        })
    }

    /// Snapshot of senders for fan-out. Connections added after the
    /// snapshot do not receive that particular write.
    pub async fn snapshot(&self) -> Vec<(u64, mpsc::UnboundedSender<Outbound>)> {
        self.inner
            .read()
            .await
            .peers
            .values()
            .map(|p| (p.id, p.sender.clone()))
            .collect()
    }

    /// Roster rows for the `userlist` envelope.
    pub async fn roster(&self) -> Vec<RosterEntry> {
        let mut entries: Vec<RosterEntry> = self
            .inner
            .read()
            .await
            .peers
            .values()
            .map(|p| RosterEntry {
                id: p.id,
                nickname: p.nickname.clone(),
                ip: p.addr.clone(),
                join_time: p.joined_at.format("%H:%M:%S").to_string(),
            })
            .collect();
        entries.sort_by_key(|e| e.id);
        entries
    }

    /// One liveness pass: connections whose flag stayed false since the
    /// previous tick are returned as expired; the rest get the flag reset
    /// and a ping queued.
    pub async fn begin_sweep(&self, ping: &[u8]) -> Vec<u64> {
        let mut inner = self.inner.write().await;
        let mut expired = Vec::new();
        for peer in inner.peers.values_mut() {
            if peer.alive {
                peer.alive = false;
                let _ = peer.sender.send(Outbound::Frame(ping.to_vec()));
            } else {
                expired.push(peer.id);
            }
        }
        expired
    }

    /// Take every peer out of the registry (shutdown path).
    pub async fn drain(&self) -> Vec<Peer> {
        let mut inner = self.inner.write().await;
        inner.peers.drain().map(|(_, p)| p).collect()
    }
}

/// Identity fields of a peer, detached from its transport handle.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub id: u64,
    pub nickname: String,
    pub addr: String,
    pub user_id: Option<i64>,
    pub session_id: Option<i64>,
}
