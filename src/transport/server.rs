use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use tracing::instrument;

use crate::log::Operation;
use crate::node::Node;
use crate::router;
use crate::transport::WireResponse;

type SharedNode = Arc<Node>;

pub fn build(node: SharedNode) -> Router {
    Router::new()
        .route("/add", get(add))
        .route("/update/:old_key", get(update))
        .route("/delete/:key", get(delete))
        .route("/fetch", get(fetch))
        .route("/get_leader", get(get_leader))
        .route("/ping", get(ping))
        .route("/commit/:command", get(commit))
        .route("/requestCommit", get(request_commit))
        .route("/candidate_req", get(candidate_req))
        .route("/vote", get(vote))
        .route("/raft_heartbeat", get(raft_heartbeat))
        .route("/:short_url", get(lookup))
        .with_state(node)
}

fn missing(name: &str) -> WireResponse {
    WireResponse { status: 1, data: format!("missing '{}'", name) }
}

#[instrument(skip(node))]
async fn add(State(node): State<SharedNode>, Query(q): Query<HashMap<String, String>>) -> Json<WireResponse> {
    let (Some(key), Some(value)) = (q.get("shortUrl").cloned(), q.get("redirect").cloned()) else {
        return Json(missing("shortUrl/redirect"));
    };
    let result = router::add(&node, key.clone(), value.clone()).await;
    Json(WireResponse::from_result(result, |_| format!("added '{}' -> '{}'", key, value)))
}

#[instrument(skip(node))]
async fn update(
    State(node): State<SharedNode>,
    Path(old_key): Path<String>,
    Query(q): Query<HashMap<String, String>>,
) -> Json<WireResponse> {
    let (Some(new_key), Some(new_value)) = (q.get("shortUrl").cloned(), q.get("redirect").cloned()) else {
        return Json(missing("shortUrl/redirect"));
    };
    let result = router::update(&node, old_key.clone(), new_key.clone(), new_value.clone()).await;
    Json(WireResponse::from_result(result, |_| format!("updated '{}' -> '{}' -> '{}'", old_key, new_key, new_value)))
}

#[instrument(skip(node))]
async fn delete(State(node): State<SharedNode>, Path(key): Path<String>) -> Json<WireResponse> {
    let result = router::del(&node, key.clone()).await;
    Json(WireResponse::from_result(result, |_| format!("deleted '{}'", key)))
}

/// `GET /:short_url` — the public lookup surface. Returns the redirect
/// target as `Data` in the usual JSON envelope; HTML redirection is a
/// front-end concern out of scope here.
#[instrument(skip(node))]
async fn lookup(State(node): State<SharedNode>, Path(short_url): Path<String>) -> Json<WireResponse> {
    match router::lookup(&node, &short_url).await {
        Some(target) => Json(WireResponse::ok(target)),
        None => Json(WireResponse { status: 1, data: format!("'{}' not found", short_url) }),
    }
}

#[instrument(skip(node))]
async fn fetch(State(node): State<SharedNode>) -> Json<WireResponse> {
    let all = router::fetch(&node).await;
    let mut data = String::new();
    for (k, v) in all {
        data.push_str(&k);
        data.push('=');
        data.push_str(&v);
        data.push(' ');
    }
    Json(WireResponse::ok(data))
}

async fn get_leader(State(node): State<SharedNode>) -> Json<WireResponse> {
    match node.leader_addr().await {
        Some(leader) => Json(WireResponse::ok(leader)),
        None => Json(WireResponse { status: 1, data: String::new() }),
    }
}

async fn ping() -> Json<WireResponse> {
    Json(WireResponse::ok(""))
}

/// `GET /commit/{command}?index=i&flag={precommit|commit}&...` — the
/// single inter-node route carrying both phases of log replication.
/// `command` selects how the query args are parsed back into an
/// `Operation` (see `Operation::from_query`).
#[instrument(skip(node))]
async fn commit(
    State(node): State<SharedNode>,
    Path(command): Path<String>,
    Query(q): Query<HashMap<String, String>>,
) -> Json<WireResponse> {
    let Some(index) = q.get("index").and_then(|s| s.parse::<i64>().ok()) else {
        return Json(missing("index"));
    };
    let Some(flag) = q.get("flag").cloned() else {
        return Json(missing("flag"));
    };
    let op = match Operation::from_query(&command, &q) {
        Ok(op) => op,
        Err(e) => return Json(WireResponse { status: 1, data: e.to_string() }),
    };
    match flag.as_str() {
        "precommit" => match node.handle_precommit(index, op).await {
            Ok(()) => Json(WireResponse::ok("")),
            Err(e) => {
                let (status, data) = e.to_wire();
                Json(WireResponse { status, data })
            }
        },
        "commit" => {
            node.handle_commit(index, op).await;
            Json(WireResponse::ok(""))
        }
        other => Json(WireResponse { status: 1, data: format!("unknown flag '{}'", other) }),
    }
}

#[instrument(skip(node))]
async fn request_commit(State(node): State<SharedNode>, Query(q): Query<HashMap<String, String>>) -> Json<WireResponse> {
    let (Some(index), Some(requester)) =
        (q.get("index").and_then(|s| s.parse::<i64>().ok()), q.get("requester").cloned())
    else {
        return Json(missing("index/requester"));
    };
    node.handle_request_commit(index, requester).await;
    Json(WireResponse::ok(""))
}

#[instrument(skip(node))]
async fn candidate_req(State(node): State<SharedNode>, Query(q): Query<HashMap<String, String>>) -> Json<WireResponse> {
    let (Some(candidate), Some(term), Some(last_commit)) = (
        q.get("candidate").cloned(),
        q.get("term").and_then(|s| s.parse::<i64>().ok()),
        q.get("last_commit").and_then(|s| s.parse::<i64>().ok()),
    ) else {
        return Json(missing("candidate/term/last_commit"));
    };
    node.handle_request_vote(candidate, term, last_commit).await;
    Json(WireResponse::ok(""))
}

#[instrument(skip(node))]
async fn vote(State(node): State<SharedNode>, Query(q): Query<HashMap<String, String>>) -> Json<WireResponse> {
    let Some(voter) = q.get("voter").cloned() else {
        return Json(missing("voter"));
    };
    node.handle_vote(voter).await;
    Json(WireResponse::ok(""))
}

/// Acks with this node's own term as `Data`, so the leader can notice it
/// has been superseded (see `transport::send_heartbeat`).
#[instrument(skip(node))]
async fn raft_heartbeat(State(node): State<SharedNode>, Query(q): Query<HashMap<String, String>>) -> Json<WireResponse> {
    let (Some(leader), Some(term)) =
        (q.get("leader").cloned(), q.get("term").and_then(|s| s.parse::<i64>().ok()))
    else {
        return Json(missing("leader/term"));
    };
    node.handle_heartbeat(term, leader).await;
    let my_term = node.election.lock().await.term;
    Json(WireResponse::ok(my_term.to_string()))
}
