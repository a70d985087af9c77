use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::election::{LEADER_HEARTBEAT_PERIOD, Role};
use crate::node::Node;
use crate::transport;

const TICK: Duration = Duration::from_millis(20);

/// The consensus tick loop: one instance per process, running for its
/// lifetime. Dispatches on the node's current role.
pub async fn run(node: Arc<Node>) {
    loop {
        let role = node.election.lock().await.role;
        match role {
            Role::Follower => tick_follower(&node).await,
            Role::Candidate => tick_candidate(&node).await,
            Role::Leader => tick_leader(&node).await,
        }
        tokio::time::sleep(TICK).await;
    }
}

async fn tick_follower(node: &Arc<Node>) {
    let timed_out = {
        let election = node.election.lock().await;
        election.last_heartbeat.elapsed() >= election.heartbeat_timeout
    };
    if !timed_out {
        return;
    }
    let mut election = node.election.lock().await;
    if election.role != Role::Follower {
        return;
    }
    let new_term = election.term + 1;
    election.start_candidacy(new_term);
    election.voted_for = Some((new_term, node.id.clone()));
    election.votes_received.insert(node.id.clone());
    info!(node = %node.id, term = new_term, "follower heartbeat timeout, starting candidacy");
}

/// A candidate resends `RequestVote` to every peer on each tick until
/// either it wins (an inbound `/vote` push moves it to Leader, handled in
/// `Node::handle_vote`) or its own election timeout reverts it to
/// Follower. Resending is safe: a voter that already granted this
/// candidate a vote simply grants it again.
async fn tick_candidate(node: &Arc<Node>) {
    let (term, election_timed_out) = {
        let election = node.election.lock().await;
        (election.term, election.candidacy_started.elapsed() >= election.election_timeout)
    };

    if election_timed_out {
        let mut election = node.election.lock().await;
        if election.role == Role::Candidate && election.term == term {
            info!(node = %node.id, term, "election timed out without a majority, reverting to follower");
            election.abandon_candidacy();
        }
        return;
    }

    let last_commit = node.log.lock().await.last_applied;
    broadcast_vote_requests(node, term, last_commit).await;
}

async fn broadcast_vote_requests(node: &Arc<Node>, term: i64, last_commit: i64) {
    let futures = node.peers.iter().map(|peer| {
        let http = node.http.clone();
        let id = node.id.clone();
        let peer = peer.clone();
        async move {
            transport::candidate_req(&http, &peer, &id, term, last_commit).await;
        }
    });
    futures::future::join_all(futures).await;
}

async fn tick_leader(node: &Arc<Node>) {
    let should_beat = {
        let election = node.election.lock().await;
        election.last_heartbeat.elapsed() >= LEADER_HEARTBEAT_PERIOD
    };
    if !should_beat {
        return;
    }

    let term = {
        let mut election = node.election.lock().await;
        election.last_heartbeat = std::time::Instant::now();
        election.term
    };

    let futures = node.peers.iter().map(|peer| {
        let http = node.http.clone();
        let id = node.id.clone();
        let peer = peer.clone();
        async move { transport::send_heartbeat(&http, &peer, term, &id).await }
    });
    let peer_terms = futures::future::join_all(futures).await;
    let highest = peer_terms.into_iter().flatten().max();

    if let Some(peer_term) = highest {
        if peer_term > term {
            let mut election = node.election.lock().await;
            if peer_term > election.term {
                info!(node = %node.id, term = peer_term, "stepping down: discovered higher term");
                election.become_follower(None, peer_term);
            }
        }
    }
}
