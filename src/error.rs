use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Database(err.into())
    }
}

/// Failures while upgrading an HTTP connection to frame mode, on either role.
#[derive(Error, Debug)]
pub enum HandshakeError {
    #[error("missing Sec-WebSocket-Key header")]
    MissingKey,

    #[error("malformed HTTP head: {0}")]
    Malformed(String),

    #[error("request head exceeds {0} bytes")]
    HeadTooLarge(usize),

    #[error("connection closed before the HTTP head completed")]
    UnexpectedEof,

    #[error("expected 101 Switching Protocols, got {0}")]
    UnexpectedStatus(u16),

    #[error("Sec-WebSocket-Accept does not match the sent key")]
    AcceptMismatch,
}

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("unsupported opcode 0x{0:x}")]
    UnsupportedOpcode(u8),

    #[error("control frame payload exceeds 125 bytes")]
    ControlPayloadTooLong,

    #[error("declared payload of {0} bytes exceeds the supported maximum")]
    PayloadTooLarge(u64),
}

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                DatabaseError::Connection(err.to_string())
            }
            _ => DatabaseError::Query(err.to_string()),
        }
    }
}

/// Peer-side failures surfaced by the chat client.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("reconnection attempts exhausted")]
    RetriesExhausted,
}
