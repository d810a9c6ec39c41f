//! Periodic broadcast of aggregate statistics to every live connection.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::events::ServerEvent;
use crate::presence::PresenceRegistry;
use crate::queue::PairingQueue;
use crate::router::RelayRouter;

/// Spawn the `statsUpdate` broadcaster. Runs until the returned handle is
/// aborted (normally: for the lifetime of the process).
pub fn spawn_stats_broadcaster(
    registry: PresenceRegistry,
    queue: PairingQueue,
    router: RelayRouter,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let online_count = registry.online_count().await;
            let queue_count = queue.len().await;
            debug!(online_count, queue_count, "broadcasting stats");
            router
                .broadcast_all(ServerEvent::StatsUpdate {
                    online_count,
                    queue_count,
                })
                .await;
        }
    })
}
