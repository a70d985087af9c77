use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::debug;

use crate::election::{ElectionState, Role};
use crate::error::{Error, Result};
use crate::kv::Kv;
use crate::log::{self, LogState, Operation};
use crate::transport;

/// The per-node aggregate. One instance per process; shared via `Arc` with
/// the axum handlers, the consensus loop and the applier loop. The three
/// locks (`kv`'s internal one plus `log` and `election` here) are always
/// acquired in isolation: nothing ever awaits an RPC while holding one.
pub struct Node {
    pub id: String,
    pub peers: Vec<String>,
    pub kv: Kv,
    pub log: Mutex<LogState>,
    pub election: Mutex<ElectionState>,
    pub http: reqwest::Client,
    /// Round-robin cursor over `peers`, advanced once per gap-fill request
    /// so the Applier asks one peer at a time rather than hammering the
    /// same peer (or every peer at once) on every tick.
    gap_cursor: AtomicUsize,
}

impl Node {
    pub fn new(id: String, peers: Vec<String>, kv: Kv) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(300))
            .build()
            .expect("reqwest client builds");
        Self {
            id,
            peers,
            kv,
            log: Mutex::new(LogState::new()),
            election: Mutex::new(ElectionState::new()),
            http,
            gap_cursor: AtomicUsize::new(0),
        }
    }

    /// Peer acks required in addition to the leader's/candidate's own
    /// implicit vote: `floor(N/2)` where N is the full cluster size (self
    /// plus peers), i.e. a strict majority once the implicit vote is
    /// counted.
    pub fn quorum(&self) -> usize {
        (self.peers.len() + 1) / 2
    }

    pub async fn is_leader(&self) -> bool {
        self.election.lock().await.role == Role::Leader
    }

    /// The address clients should be redirected to via `/get_leader`: this
    /// node's own address while it holds the role, otherwise whichever
    /// leader it last heard a heartbeat from.
    pub async fn leader_addr(&self) -> Option<String> {
        let election = self.election.lock().await;
        if election.role == Role::Leader {
            return Some(self.id.clone());
        }
        election.leader.as_ref().map(|(addr, _)| addr.clone())
    }

    /// The leader-side precommit protocol: validate against the KV as
    /// projected through any outstanding log entries, assign the next dense
    /// index, fan the entry out to every peer, and commit locally once a
    /// quorum of peers has acked. Returns once the entry is visible in this
    /// node's own KV, so a caller's subsequent `lookup` is guaranteed to see
    /// it.
    pub async fn propose(&self, op: Operation) -> Result<i64> {
        let index = {
            let mut log = self.log.lock().await;
            let mut projected = self.kv.snapshot().await;
            log.project(&mut projected);
            Kv::check_precondition(&projected, &op)?;
            let index = log.next_index();
            log.precommit(index, op.clone())?;
            index
        };

        let acks = transport::fan_out_precommit(&self.http, &self.peers, index, &op).await;
        debug!(index, acks, needed = self.quorum(), "precommit round complete");

        if acks < self.quorum() {
            return Err(Error::QuorumNotReached);
        }

        {
            let mut log = self.log.lock().await;
            log.commit(index, op.clone());
        }

        self.wait_applied(index).await;
        Ok(index)
    }

    /// Spins until the local Applier has caught `last_applied` up to
    /// `index`. The Applier polls every `<=150ms`; under normal operation
    /// this returns within a tick or two.
    async fn wait_applied(&self, index: i64) {
        loop {
            {
                let log = self.log.lock().await;
                if log.last_applied >= index {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    /// Follower-side precommit handler: stores the entry, refusing to
    /// overwrite one that already committed with different args.
    pub async fn handle_precommit(&self, index: i64, op: Operation) -> Result<()> {
        let mut log = self.log.lock().await;
        log.precommit(index, op)
    }

    /// Commit handler, shared by leader and follower: marks the entry
    /// committed, accepting it as authoritative even if it never saw the
    /// matching precommit.
    pub async fn handle_commit(&self, index: i64, op: Operation) {
        let mut log = self.log.lock().await;
        log.commit(index, op);
    }

    /// Drives the Applier's single apply step; returns whether anything was
    /// applied. Leaders broadcast a `Commit` after advancing so followers
    /// converge without every one of them separately requesting it.
    pub async fn apply_step(&self) -> Option<i64> {
        let applied = {
            let mut log_guard = self.log.lock().await;
            if log::apply_one(&self.kv, &mut log_guard).await {
                log_guard.get(log_guard.last_applied).cloned()
            } else {
                None
            }
        };
        if let Some(entry) = &applied {
            if self.is_leader().await {
                transport::fan_out_commit(&self.http, &self.peers, entry.index, &entry.op).await;
            }
        }
        applied.map(|entry| entry.index)
    }

    /// Applier-side gap-filling: asks one peer to push the commit at
    /// `index` back to us.
    pub async fn request_commit(&self, index: i64, peer: &str) {
        transport::request_commit(&self.http, peer, index, &self.id).await;
    }

    /// Picks the next peer in round-robin order and asks it for the entry
    /// at `index`. A no-op on a single-node cluster.
    pub async fn request_commit_from_leader(&self, index: i64) {
        if self.peers.is_empty() {
            return;
        }
        let i = self.gap_cursor.fetch_add(1, Ordering::Relaxed) % self.peers.len();
        let peer = self.peers[i].clone();
        self.request_commit(index, &peer).await;
    }

    /// `RequestCommit` handler: if this node's entry at `index` is already
    /// committed, pushes it back to `requester` as a `Commit` call. The ack
    /// to the requester's original call is unconditional; the push only
    /// happens when the entry is actually available.
    pub async fn handle_request_commit(&self, index: i64, requester: String) {
        let entry = { self.log.lock().await.get(index).cloned() };
        if let Some(entry) = entry {
            if entry.committed {
                transport::fan_out_commit(&self.http, std::slice::from_ref(&requester), entry.index, &entry.op)
                    .await;
            }
        }
    }

    /// Voter-side `RequestVote` handling: a sitting Leader or Candidate
    /// never votes; a candidate whose log trails this node's is rejected;
    /// a candidate already voted for is granted another (idempotent) vote;
    /// otherwise a strictly higher term wins the vote. The grant itself is
    /// never the HTTP response; a granted vote is pushed back to the
    /// candidate as a separate `Vote` call.
    pub async fn handle_request_vote(&self, candidate: String, term: i64, last_commit: i64) {
        let my_last_applied = self.log.lock().await.last_applied;
        let granted = {
            let mut election = self.election.lock().await;
            if matches!(election.role, Role::Leader | Role::Candidate) {
                false
            } else if my_last_applied > last_commit {
                false
            } else if matches!(&election.voted_for, Some((_, voted_for)) if voted_for == &candidate) {
                election.reset_heartbeat();
                true
            } else if term > election.term {
                election.term = term;
                election.voted_for = Some((term, candidate.clone()));
                election.reset_heartbeat();
                true
            } else {
                false
            }
        };
        if granted {
            transport::send_vote(&self.http, &candidate, &self.id).await;
        }
    }

    /// Candidate-side handling of an inbound `Vote` push. A no-op unless
    /// this node is still a candidate in the term it solicited votes for.
    pub async fn handle_vote(&self, voter: String) {
        let mut election = self.election.lock().await;
        if election.role != Role::Candidate {
            return;
        }
        election.votes_received.insert(voter);
        if election.votes_received.len() >= self.quorum() + 1 {
            election.become_leader();
        }
    }

    /// Heartbeat handling: a heartbeat at a higher known term always makes
    /// its sender our leader; one from the leader we already follow just
    /// refreshes the timer and term.
    pub async fn handle_heartbeat(&self, term: i64, leader: String) {
        let mut election = self.election.lock().await;
        if election.role == Role::Leader {
            return;
        }
        let known_leader_term = election.leader.as_ref().map(|(_, t)| *t);
        if term > known_leader_term.unwrap_or(-1) {
            election.become_follower(Some((leader, term)), term);
        } else if election.leader.as_ref().map(|(l, _)| l.as_str()) == Some(leader.as_str()) {
            election.term = term;
            election.reset_heartbeat();
        }
    }
}
