pub mod server;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::log::Operation;

/// The `{"Status": .., "Data": ..}` envelope every handler returns.
/// Status 0 is success, 1 a recoverable failure, 2 "not the leader" (in
/// which case `data` carries the leader's address, or "" if unknown).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireResponse {
    #[serde(rename = "Status")]
    pub status: i32,
    #[serde(rename = "Data")]
    pub data: String,
}

impl WireResponse {
    pub fn ok(data: impl Into<String>) -> Self {
        Self { status: 0, data: data.into() }
    }

    pub fn from_result<T>(result: crate::error::Result<T>, to_data: impl FnOnce(T) -> String) -> Self {
        match result {
            Ok(v) => Self::ok(to_data(v)),
            Err(e) => {
                let (status, data) = e.to_wire();
                Self { status, data }
            }
        }
    }
}

async fn get(client: &reqwest::Client, url: &str, query: &[(&str, String)]) -> Option<WireResponse> {
    match client.get(url).query(query).send().await {
        Ok(resp) => resp.json::<WireResponse>().await.ok(),
        Err(err) => {
            debug!(url, error = %err, "outbound request failed");
            None
        }
    }
}

/// Fans the precommit out to every peer concurrently and counts the acks.
/// The leader's own implicit vote is not counted here; see `Node::quorum`.
pub async fn fan_out_precommit(
    client: &reqwest::Client,
    peers: &[String],
    index: i64,
    op: &Operation,
) -> usize {
    let futures = peers.iter().map(|peer| {
        let url = format!("{}/commit/{}", peer, op.kind());
        let mut pairs = vec![("index", index.to_string()), ("flag", "precommit".to_string())];
        pairs.extend(op.to_query_pairs());
        let client = client.clone();
        async move { get(&client, &url, &pairs).await }
    });
    let results = futures::future::join_all(futures).await;
    results.into_iter().filter(|r| matches!(r, Some(r) if r.status == 0)).count()
}

/// Best-effort broadcast used by the leader once an entry applies, and by
/// `RequestCommit` handling to push a single committed entry back to one
/// requester. Failures are logged and otherwise ignored.
pub async fn fan_out_commit(client: &reqwest::Client, peers: &[String], index: i64, op: &Operation) {
    let futures = peers.iter().map(|peer| {
        let url = format!("{}/commit/{}", peer, op.kind());
        let mut pairs = vec![("index", index.to_string()), ("flag", "commit".to_string())];
        pairs.extend(op.to_query_pairs());
        let client = client.clone();
        async move {
            let _ = get(&client, &url, &pairs).await;
        }
    });
    futures::future::join_all(futures).await;
}

/// Asks `peer` to push the entry at `index` back to `requester` if it has
/// one committed. Fire-and-forget: the reply to this call is just an ack.
pub async fn request_commit(client: &reqwest::Client, peer: &str, index: i64, requester: &str) {
    let url = format!("{}/requestCommit", peer);
    let pairs = [("index", index.to_string()), ("requester", requester.to_string())];
    let _ = get(client, &url, &pairs).await;
}

/// Sends a `RequestVote` to `peer`. Fire-and-forget: a granted vote, if
/// any, arrives later as a separate inbound `Vote` call, not in this
/// response.
pub async fn candidate_req(client: &reqwest::Client, peer: &str, candidate: &str, term: i64, last_commit: i64) {
    let url = format!("{}/candidate_req", peer);
    let pairs = [
        ("candidate", candidate.to_string()),
        ("term", term.to_string()),
        ("last_commit", last_commit.to_string()),
    ];
    let _ = get(client, &url, &pairs).await;
}

/// Pushes a vote grant to `candidate`.
pub async fn send_vote(client: &reqwest::Client, candidate: &str, voter: &str) {
    let url = format!("{}/vote", candidate);
    let _ = get(client, &url, &[("voter", voter.to_string())]).await;
}

/// Broadcasts a heartbeat to `peer` and returns the term the responder
/// reports back in `Data`. A responder's term is the signal a leader uses
/// to notice it has been superseded (e.g. after a partition heals into a
/// peer that elected a new leader at a higher term) and should step down.
/// `None` on any transport failure or malformed response.
pub async fn send_heartbeat(client: &reqwest::Client, peer: &str, term: i64, leader: &str) -> Option<i64> {
    let url = format!("{}/raft_heartbeat", peer);
    let pairs = [("leader", leader.to_string()), ("term", term.to_string())];
    let resp = get(client, &url, &pairs).await?;
    resp.data.parse::<i64>().ok()
}
