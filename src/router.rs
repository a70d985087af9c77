use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::log::Operation;
use crate::node::Node;

/// The Command Router: the client-facing entry point for mutations. Every
/// mutating call first rejects non-leaders with `Error::NotLeader` before
/// touching the log, so a follower never even attempts a doomed precommit.
async fn require_leader(node: &Node) -> Result<()> {
    if node.is_leader().await {
        Ok(())
    } else {
        Err(Error::NotLeader { leader: node.leader_addr().await })
    }
}

pub async fn add(node: &Node, key: String, value: String) -> Result<i64> {
    require_leader(node).await?;
    node.propose(Operation::Add { key, value }).await
}

pub async fn del(node: &Node, key: String) -> Result<i64> {
    require_leader(node).await?;
    node.propose(Operation::Del { key }).await
}

pub async fn update(node: &Node, old_key: String, new_key: String, new_value: String) -> Result<i64> {
    require_leader(node).await?;
    node.propose(Operation::Update { old_key, new_key, new_value }).await
}

/// Reads never gate on leadership: any node answers from its own KV,
/// which may lag a just-elected leader by at most one heartbeat's worth
/// of catch-up. Gating reads on leadership too would make a just-elected
/// leader's own followers briefly unable to serve a value the old leader
/// already committed, for no corresponding consistency benefit — nothing
/// here promises linearizable reads either way.
pub async fn lookup(node: &Node, key: &str) -> Option<String> {
    node.kv.lookup(key).await
}

pub async fn fetch(node: &Node) -> HashMap<String, String> {
    node.kv.fetch().await.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::Kv;

    fn single_node_leader() -> Node {
        let node = Node::new("http://self".into(), vec![], Kv::new());
        node
    }

    #[tokio::test]
    async fn add_rejected_while_follower() {
        let node = single_node_leader();
        let err = add(&node, "a".into(), "b".into()).await.unwrap_err();
        assert!(matches!(err, Error::NotLeader { .. }));
    }

    #[tokio::test]
    async fn add_succeeds_as_sole_leader_and_is_visible_immediately() {
        let node = single_node_leader();
        node.election.lock().await.become_leader();
        add(&node, "a".into(), "b".into()).await.unwrap();
        assert_eq!(lookup(&node, "a").await, Some("b".into()));
    }

    #[tokio::test]
    async fn duplicate_add_rejected_even_as_leader() {
        let node = single_node_leader();
        node.election.lock().await.become_leader();
        add(&node, "a".into(), "b".into()).await.unwrap();
        let err = add(&node, "a".into(), "c".into()).await.unwrap_err();
        assert!(matches!(err, Error::Invalid(_)));
    }
}
