//! Dead-connection detection.
//!
//! Every tick, connections whose liveness flag stayed false since the
//! previous tick are timed out and retired; everyone else has the flag
//! reset and a protocol ping written. The flag is set back to true by any
//! inbound frame, a pong, or an application-level heartbeat envelope, so
//! either mechanism keeps a connection alive.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::ws::hub::{ping_frame, BroadcastHub};

pub struct LivenessMonitor {
    hub: Arc<BroadcastHub>,
    interval: Duration,
}

impl LivenessMonitor {
    pub fn new(hub: Arc<BroadcastHub>, interval: Duration) -> Self {
        Self { hub, interval }
    }

    /// Run sweeps forever on the configured interval.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; a sweep at startup would
            // ping an empty registry, so skip it.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.sweep().await;
            }
        })
    }

    /// One monitor pass. Public so tests can drive ticks directly.
    pub async fn sweep(&self) {
        let expired = self.hub.registry().begin_sweep(&ping_frame()).await;
        if expired.is_empty() {
            debug!("liveness sweep: all connections responsive");
            return;
        }
        for id in expired {
            info!(id, "liveness timeout");
            self.hub.drop_peer(id, "liveness timeout").await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ChatStore, MockChatStore};
    use crate::ws::frame::{self, Opcode};
    use crate::ws::registry::{ConnectionRegistry, Outbound};
    use tokio::sync::mpsc;

    fn permissive_store() -> Arc<dyn ChatStore> {
        let mut store = MockChatStore::new();
        store.expect_end_session().returning(|_| Ok(()));
        store
            .expect_save_message()
            .returning(|_, _, _, _, _| Ok(()));
        store.expect_log_system().returning(|_, _, _| Ok(()));
        Arc::new(store)
    }

    #[tokio::test]
    async fn test_unresponsive_connection_removed_after_one_interval() {
        let registry = Arc::new(ConnectionRegistry::new());
        let hub = Arc::new(BroadcastHub::new(registry.clone(), permissive_store()));
        let monitor = LivenessMonitor::new(hub, Duration::from_secs(30));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = registry.add("silent".into(), tx).await;

        // Tick 1: flag was true (fresh connection), so it gets pinged.
        monitor.sweep().await;
        assert!(registry.contains(id).await);
        match rx.try_recv().unwrap() {
            Outbound::Frame(bytes) => {
                let ping = frame::decode(&bytes).unwrap().unwrap();
                assert_eq!(ping.opcode, Opcode::Ping);
            }
            other => panic!("expected ping frame, got {other:?}"),
        }

        // No qualifying signal before tick 2: timed out and removed.
        monitor.sweep().await;
        assert!(!registry.contains(id).await);
        assert_eq!(rx.try_recv().unwrap(), Outbound::Close);
    }

    #[tokio::test]
    async fn test_pong_or_heartbeat_retains_connection() {
        let registry = Arc::new(ConnectionRegistry::new());
        let hub = Arc::new(BroadcastHub::new(registry.clone(), permissive_store()));
        let monitor = LivenessMonitor::new(hub, Duration::from_secs(30));

        let (tx, _rx) = mpsc::unbounded_channel();
        let id = registry.add("responsive".into(), tx).await;

        for _ in 0..3 {
            monitor.sweep().await;
            // Either a pong or an application heartbeat lands here; both
            // funnel into the same flag.
            registry.mark_alive(id).await;
        }
        assert!(registry.contains(id).await);
    }
}
