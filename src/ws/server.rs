//! Connection lifecycle and message dispatch.
//!
//! One task per connection reads the socket into an accumulation buffer and
//! peels frames off it; a companion writer task drains the connection's
//! outbound channel. All registry mutation goes through the shared
//! [`ConnectionRegistry`], and every way a connection can die funnels into
//! [`BroadcastHub::drop_peer`].

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::db::ChatStore;
use crate::ws::frame::{self, Opcode};
use crate::ws::handshake::{self, HttpHead};
use crate::ws::hub::BroadcastHub;
use crate::ws::liveness::LivenessMonitor;
use crate::ws::message::{normalize_nickname, wall_clock, ClientMessage, ServerMessage};
use crate::ws::registry::{ConnectionRegistry, Outbound};

pub struct ChatServer {
    registry: Arc<ConnectionRegistry>,
    hub: Arc<BroadcastHub>,
    store: Arc<dyn ChatStore>,
    history_limit: i64,
    heartbeat_interval: Duration,
}

impl ChatServer {
    pub fn new(settings: &Settings, store: Arc<dyn ChatStore>) -> Arc<Self> {
        let registry = Arc::new(ConnectionRegistry::new());
        let hub = Arc::new(BroadcastHub::new(registry.clone(), store.clone()));
        Arc::new(Self {
            registry,
            hub,
            store,
            history_limit: i64::from(settings.chat.history_limit),
            heartbeat_interval: Duration::from_secs(settings.chat.heartbeat_interval_secs),
        })
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    /// Start the periodic liveness sweep for this server's registry.
    pub fn spawn_liveness(&self) -> JoinHandle<()> {
        LivenessMonitor::new(self.hub.clone(), self.heartbeat_interval).spawn()
    }

    /// Drive one accepted TCP connection to completion. Plain HTTP requests
    /// are answered and closed; upgrade requests switch to frame mode and
    /// stay until the connection dies.
    pub async fn handle_connection(self: Arc<Self>, mut stream: TcpStream, addr: std::net::SocketAddr) {
        let peer_addr = addr.to_string();

        let (head, leftover) = match handshake::read_head(&mut stream).await {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!(%peer_addr, error = %e, "failed to read request head");
                return;
            }
        };

        if !head.wants_upgrade() {
            self.respond_plain_http(&head, &mut stream).await;
            return;
        }

        let response = match handshake::accept_response(&head) {
            Ok(response) => response,
            Err(e) => {
                warn!(%peer_addr, error = %e, "rejecting handshake");
                let _ = stream
                    .write_all(handshake::bad_request_response().as_bytes())
                    .await;
                return;
            }
        };
        if let Err(e) = stream.write_all(response.as_bytes()).await {
            warn!(%peer_addr, error = %e, "failed to complete handshake");
            return;
        }

        // From here on the transport is in frame mode.
        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.registry.add(peer_addr.clone(), tx.clone()).await;
        let online = self.registry.count().await;
        info!(id, %peer_addr, online, "client connected");
        if let Err(e) = self
            .store
            .log_system("connect", &format!("client {id} connected"), Some(&peer_addr))
            .await
        {
            warn!(error = %e, "failed to write system log");
        }

        let writer = tokio::spawn(writer_task(write_half, rx));
        let reason = self.read_loop(id, read_half, leftover, &tx).await;
        self.hub.drop_peer(id, reason).await;
        drop(tx);
        let _ = writer.await;
    }

    /// Read bytes into the accumulation buffer and peel frames off it in
    /// arrival order. Returns the reason the connection ended.
    async fn read_loop(
        &self,
        id: u64,
        mut read_half: OwnedReadHalf,
        leftover: Vec<u8>,
        tx: &mpsc::UnboundedSender<Outbound>,
    ) -> &'static str {
        let mut buf = leftover;
        let mut chunk = [0u8; 4096];

        loop {
            // Drain every complete frame already buffered before reading more.
            loop {
                match frame::decode(&buf) {
                    Ok(None) => break,
                    Ok(Some(frame)) => {
                        buf.drain(..frame.consumed);
                        // Any inbound frame counts as a liveness signal.
                        self.registry.mark_alive(id).await;
                        match frame.opcode {
                            Opcode::Close => return "close frame",
                            Opcode::Ping => {
                                if let Ok(pong) =
                                    frame::encode_control(Opcode::Pong, &frame.payload, None)
                                {
                                    let _ = tx.send(Outbound::Frame(pong));
                                }
                            }
                            Opcode::Pong => {}
                            Opcode::Text => {
                                if !self.dispatch_text(id, &frame.payload).await {
                                    return "client disconnect";
                                }
                            }
                        }
                    }
                    Err(e) => {
                        warn!(id, error = %e, "rejecting frame");
                        return "protocol error";
                    }
                }
            }

            tokio::select! {
                _ = tx.closed() => return "writer closed",
                result = read_half.read(&mut chunk) => match result {
                    Ok(0) => return "socket closed",
                    Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    Err(e) => {
                        debug!(id, error = %e, "read error");
                        return "read error";
                    }
                },
            }
        }
    }

    /// Parse and dispatch one text frame. Returns false when the peer asked
    /// for a deliberate disconnect.
    async fn dispatch_text(&self, id: u64, payload: &[u8]) -> bool {
        let text = match std::str::from_utf8(payload) {
            Ok(text) => text,
            Err(e) => {
                warn!(id, error = %e, "discarding non-UTF-8 text frame");
                return true;
            }
        };
        let msg: ClientMessage = match serde_json::from_str(text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(id, error = %e, "discarding malformed envelope");
                return true;
            }
        };

        match msg {
            ClientMessage::Join { nickname } => {
                self.handle_join(id, &nickname).await;
                true
            }
            ClientMessage::Message { message } => {
                self.handle_chat(id, &message).await;
                true
            }
            ClientMessage::Heartbeat => {
                // Application-level liveness signal; the flag was already
                // set for the inbound frame, this keeps the intent explicit.
                self.registry.mark_alive(id).await;
                true
            }
            ClientMessage::Disconnect => false,
            ClientMessage::GetStats => {
                self.handle_get_stats(id).await;
                true
            }
            ClientMessage::Unknown => true,
        }
    }

    async fn handle_join(&self, id: u64, raw_nickname: &str) {
        let nickname = normalize_nickname(raw_nickname);
        let Some(peer) = self.registry.peer_info(id).await else {
            return;
        };

        let mut user_id = None;
        let mut session_id = None;
        match self.store.find_or_create_user(&nickname, &peer.addr).await {
            Ok(user) => {
                user_id = Some(user.id);
                match self
                    .store
                    .create_session(user.id, &nickname, &peer.addr)
                    .await
                {
                    Ok(sid) => session_id = Some(sid),
                    Err(e) => warn!(id, error = %e, "failed to create session"),
                }
            }
            Err(e) => warn!(id, error = %e, "failed to look up user"),
        }
        self.registry
            .set_identity(id, nickname.clone(), user_id, session_id)
            .await;

        let greeting = format!("{nickname} joined the chat");
        let online = self.registry.count().await;
        info!(id, %nickname, online, "peer joined");
        if let Err(e) = self
            .store
            .save_message(session_id, &nickname, &peer.addr, &greeting, "system")
            .await
        {
            warn!(id, error = %e, "failed to save join message");
        }
        if let Err(e) = self.store.log_system("join", &greeting, Some(&peer.addr)).await {
            warn!(id, error = %e, "failed to write system log");
        }

        self.hub
            .broadcast(&ServerMessage::System {
                message: greeting,
                timestamp: wall_clock(),
                online_count: online,
            })
            .await;

        match self.store.recent_messages(self.history_limit).await {
            Ok(messages) => {
                self.hub
                    .send_to(id, &ServerMessage::History { messages })
                    .await;
            }
            Err(e) => warn!(id, error = %e, "failed to load history"),
        }

        self.hub.announce_roster().await;
    }

    async fn handle_chat(&self, id: u64, raw: &str) {
        let content = raw.trim();
        if content.is_empty() {
            return;
        }
        let Some(peer) = self.registry.peer_info(id).await else {
            return;
        };

        if let Err(e) = self
            .store
            .save_message(peer.session_id, &peer.nickname, &peer.addr, content, "user")
            .await
        {
            warn!(id, error = %e, "failed to save message");
        }
        if let Some(user_id) = peer.user_id {
            if let Err(e) = self.store.increment_user_messages(user_id).await {
                warn!(id, error = %e, "failed to bump message counter");
            }
        }

        self.hub
            .broadcast(&ServerMessage::Message {
                nickname: peer.nickname,
                message: content.to_string(),
                timestamp: wall_clock(),
            })
            .await;
    }

    async fn handle_get_stats(&self, id: u64) {
        match self.store.statistics().await {
            Ok(data) => {
                self.hub.send_to(id, &ServerMessage::Stats { data }).await;
            }
            Err(e) => warn!(id, error = %e, "failed to load statistics"),
        }
    }

    async fn respond_plain_http(&self, head: &HttpHead, stream: &mut TcpStream) {
        let (status, body) = if head.path() == "/health" {
            let online = self.registry.count().await;
            (
                "200 OK",
                serde_json::json!({
                    "status": "healthy",
                    "timestamp": chrono::Utc::now().to_rfc3339(),
                    "online": online,
                })
                .to_string(),
            )
        } else {
            ("404 Not Found", serde_json::json!({"error": "not found"}).to_string())
        };

        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        let _ = stream.write_all(response.as_bytes()).await;
    }

    /// Close every open connection, ending their sessions first. Called on
    /// interrupt before the process exits.
    pub async fn shutdown(&self) {
        let peers = self.registry.drain().await;
        info!(count = peers.len(), "closing open connections");
        for peer in peers {
            if let Some(session_id) = peer.session_id {
                if let Err(e) = self.store.end_session(session_id).await {
                    warn!(session_id, error = %e, "failed to end session");
                }
            }
            peer.try_send(Outbound::Close);
        }
    }
}

async fn writer_task(mut write_half: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<Outbound>) {
    while let Some(item) = rx.recv().await {
        match item {
            Outbound::Frame(bytes) => {
                if write_half.write_all(&bytes).await.is_err() {
                    break;
                }
            }
            Outbound::Close => {
                if let Ok(close) = frame::encode_control(Opcode::Close, &[], None) {
                    let _ = write_half.write_all(&close).await;
                }
                break;
            }
        }
    }
    let _ = write_half.shutdown().await;
}
