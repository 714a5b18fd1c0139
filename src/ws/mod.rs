pub mod frame;
pub mod handshake;
pub mod hub;
pub mod liveness;
pub mod message;
pub mod registry;
pub mod server;

pub use hub::BroadcastHub;
pub use liveness::LivenessMonitor;
pub use registry::ConnectionRegistry;
pub use server::ChatServer;
