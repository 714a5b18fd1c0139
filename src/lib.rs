pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod ws;

pub use config::Settings;
pub use error::AppError;
pub type Result<T> = std::result::Result<T, AppError>;

pub use ws::{BroadcastHub, ChatServer, ConnectionRegistry, LivenessMonitor};
