//! Client session runner.
//!
//! One task owns the whole connection lifecycle: dial, handshake, join,
//! pump frames both ways, and reconnect with backoff when the connection
//! drops. Callers talk to it over two channels: commands in, events out.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::reconnect::{ReconnectDecision, ReconnectPolicy, ReconnectState};
use super::ConnectionState;
use crate::error::ClientError;
use crate::ws::frame::{self, Opcode};
use crate::ws::handshake;
use crate::ws::message::{ClientMessage, ServerMessage};

/// Commands from the caller to the running session.
#[derive(Debug)]
pub enum ClientInput {
    Say(String),
    GetStats,
    Quit,
}

/// What the session reports back.
#[derive(Debug)]
pub enum ClientEvent {
    State(ConnectionState),
    Message(ServerMessage),
}

pub struct ChatClient {
    host: String,
    port: u16,
    path: String,
    nickname: String,
    policy: ReconnectPolicy,
    heartbeat_interval: Duration,
    events: mpsc::UnboundedSender<ClientEvent>,
    input: mpsc::UnboundedReceiver<ClientInput>,
}

impl ChatClient {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        nickname: impl Into<String>,
    ) -> (
        Self,
        mpsc::UnboundedSender<ClientInput>,
        mpsc::UnboundedReceiver<ClientEvent>,
    ) {
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let client = Self {
            host: host.into(),
            port,
            path: "/".to_string(),
            nickname: nickname.into(),
            policy: ReconnectPolicy::default(),
            heartbeat_interval: Duration::from_secs(25),
            events: event_tx,
            input: input_rx,
        };
        (client, input_tx, event_rx)
    }

    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Run until the caller quits (`Ok`) or the backoff schedule is
    /// exhausted (`Err`). Every outage, including a failed first dial,
    /// walks the same schedule; a successful connection resets it.
    pub async fn run(mut self) -> Result<(), ClientError> {
        let mut backoff = ReconnectState::new();
        loop {
            let _ = self
                .events
                .send(ClientEvent::State(ConnectionState::Connecting));
            match self.connect_once().await {
                Ok((read_half, write_half, leftover)) => {
                    backoff.reset();
                    info!(host = %self.host, port = self.port, "connected");
                    let _ = self
                        .events
                        .send(ClientEvent::State(ConnectionState::Connected));
                    if self.drive(read_half, write_half, leftover).await {
                        let _ = self.events.send(ClientEvent::State(ConnectionState::Closed));
                        return Ok(());
                    }
                }
                Err(e) => warn!(error = %e, "connection attempt failed"),
            }

            match backoff.next(&self.policy) {
                ReconnectDecision::RetryAfter(delay) => {
                    info!(attempt = backoff.attempt(), ?delay, "reconnecting");
                    let _ = self.events.send(ClientEvent::State(
                        ConnectionState::Reconnecting {
                            attempt: backoff.attempt(),
                            delay,
                        },
                    ));
                    tokio::time::sleep(delay).await;
                }
                ReconnectDecision::GiveUp => {
                    warn!(attempts = backoff.attempt() - 1, "giving up");
                    let _ = self.events.send(ClientEvent::State(ConnectionState::Closed));
                    return Err(ClientError::RetriesExhausted);
                }
            }
        }
    }

    async fn connect_once(
        &self,
    ) -> Result<(OwnedReadHalf, OwnedWriteHalf, Vec<u8>), ClientError> {
        let mut stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        let nonce = handshake::client_nonce();
        let host_header = format!("{}:{}", self.host, self.port);
        stream
            .write_all(handshake::client_request(&host_header, &self.path, &nonce).as_bytes())
            .await?;
        let (head, leftover) = handshake::read_head(&mut stream).await?;
        handshake::validate_accept(&nonce, &head)?;
        let (read_half, write_half) = stream.into_split();
        Ok((read_half, write_half, leftover))
    }

    /// Pump one established connection. Returns true when the caller asked
    /// to quit (no reconnection), false when the connection dropped.
    async fn drive(
        &mut self,
        mut read_half: OwnedReadHalf,
        mut write_half: OwnedWriteHalf,
        leftover: Vec<u8>,
    ) -> bool {
        let join = ClientMessage::Join {
            nickname: self.nickname.clone(),
        };
        if self.send_envelope(&mut write_half, &join).await.is_err() {
            return false;
        }

        let mut heartbeat = tokio::time::interval(self.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // Consume the immediate first tick; the join just went out.
        heartbeat.tick().await;

        let mut buf = leftover;
        let mut chunk = [0u8; 4096];
        loop {
            loop {
                match frame::decode(&buf) {
                    Ok(None) => break,
                    Ok(Some(frame)) => {
                        buf.drain(..frame.consumed);
                        match frame.opcode {
                            Opcode::Text => match serde_json::from_slice::<ServerMessage>(
                                &frame.payload,
                            ) {
                                Ok(msg) => {
                                    let _ = self.events.send(ClientEvent::Message(msg));
                                }
                                Err(e) => debug!(error = %e, "ignoring unrecognized envelope"),
                            },
                            Opcode::Ping => {
                                if self
                                    .send_control(&mut write_half, Opcode::Pong, &frame.payload)
                                    .await
                                    .is_err()
                                {
                                    return false;
                                }
                            }
                            Opcode::Pong => {}
                            Opcode::Close => return false,
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "protocol error");
                        return false;
                    }
                }
            }

            tokio::select! {
                result = read_half.read(&mut chunk) => match result {
                    Ok(0) => return false,
                    Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    Err(e) => {
                        debug!(error = %e, "read error");
                        return false;
                    }
                },
                _ = heartbeat.tick() => {
                    if self
                        .send_envelope(&mut write_half, &ClientMessage::Heartbeat)
                        .await
                        .is_err()
                    {
                        return false;
                    }
                }
                input = self.input.recv() => match input {
                    Some(ClientInput::Say(text)) => {
                        let msg = ClientMessage::Message { message: text };
                        if self.send_envelope(&mut write_half, &msg).await.is_err() {
                            return false;
                        }
                    }
                    Some(ClientInput::GetStats) => {
                        if self
                            .send_envelope(&mut write_half, &ClientMessage::GetStats)
                            .await
                            .is_err()
                        {
                            return false;
                        }
                    }
                    // A dropped input channel counts as quitting.
                    Some(ClientInput::Quit) | None => {
                        let _ = self
                            .send_envelope(&mut write_half, &ClientMessage::Disconnect)
                            .await;
                        if let Ok(close) = frame::encode_control(Opcode::Close, &[], Some(mask_key())) {
                            let _ = write_half.write_all(&close).await;
                        }
                        let _ = write_half.shutdown().await;
                        return true;
                    }
                },
            }
        }
    }

    async fn send_envelope(
        &self,
        write_half: &mut OwnedWriteHalf,
        msg: &ClientMessage,
    ) -> std::io::Result<()> {
        let text = serde_json::to_string(msg)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        write_half
            .write_all(&frame::encode_text_masked(&text, mask_key()))
            .await
    }

    async fn send_control(
        &self,
        write_half: &mut OwnedWriteHalf,
        opcode: Opcode,
        payload: &[u8],
    ) -> std::io::Result<()> {
        match frame::encode_control(opcode, payload, Some(mask_key())) {
            Ok(bytes) => write_half.write_all(&bytes).await,
            Err(e) => {
                debug!(error = %e, "skipping oversized control reply");
                Ok(())
            }
        }
    }
}

fn mask_key() -> [u8; 4] {
    rand::random()
}
