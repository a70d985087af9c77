use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::node::Node;

const IDLE_SLEEP: Duration = Duration::from_millis(150);

/// The Applier: the single worker that ever advances `last_applied` and
/// mutates the KV. Runs for the lifetime of the process. When it finds a
/// committed entry waiting it applies it and loops again immediately;
/// when it finds a gap (a later entry committed but this node's next
/// slot still missing) it pulls the entry from a peer; otherwise it
/// sleeps.
pub async fn run(node: Arc<Node>) {
    loop {
        if node.apply_step().await.is_some() {
            continue;
        }

        let gap = {
            let log = node.log.lock().await;
            log.next_gap()
        };
        if let Some(index) = gap {
            debug!(index, "applier requesting commit for gap");
            node.request_commit_from_leader(index).await;
        }

        tokio::time::sleep(IDLE_SLEEP).await;
    }
}
