pub mod reconnect;
pub mod session;

use std::time::Duration;

pub use reconnect::{ReconnectDecision, ReconnectPolicy, ReconnectState};
pub use session::{ChatClient, ClientEvent, ClientInput};

/// Where a client session currently stands, reported through
/// [`ClientEvent::State`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Reconnecting { attempt: u32, delay: Duration },
    /// Terminal: either a deliberate quit or an exhausted backoff schedule.
    Closed,
}
