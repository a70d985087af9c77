use std::collections::HashSet;
use std::time::{Duration, Instant};

use rand::Rng;

/// The three roles of the consensus role machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

/// Per-node election state. A single lock (held by `node::Node`) guards
/// every field together; no outbound RPC is ever issued while it is held.
pub struct ElectionState {
    pub role: Role,
    pub term: i64,
    /// (address, term) of the leader this node currently believes in.
    pub leader: Option<(String, i64)>,
    /// (term, candidate) this node last granted a vote to.
    pub voted_for: Option<(i64, String)>,
    /// Peers known to have voted for us in the current candidacy.
    pub votes_received: HashSet<String>,
    /// Last time a valid heartbeat was received (follower/candidate) or a
    /// heartbeat was sent (leader).
    pub last_heartbeat: Instant,
    pub heartbeat_timeout: Duration,
    /// When the current candidacy began.
    pub candidacy_started: Instant,
    pub election_timeout: Duration,
}

pub fn follower_timeout() -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(750..=1000))
}

pub fn candidate_timeout() -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(500..=750))
}

pub const LEADER_HEARTBEAT_PERIOD: Duration = Duration::from_millis(50);

impl ElectionState {
    pub fn new() -> Self {
        Self {
            role: Role::Follower,
            term: 0,
            leader: None,
            voted_for: None,
            votes_received: HashSet::new(),
            last_heartbeat: Instant::now(),
            heartbeat_timeout: follower_timeout(),
            candidacy_started: Instant::now(),
            election_timeout: candidate_timeout(),
        }
    }

    pub fn reset_heartbeat(&mut self) {
        self.last_heartbeat = Instant::now();
        self.heartbeat_timeout = follower_timeout();
    }

    /// Transitions from Follower into a fresh candidacy for `term`.
    pub fn start_candidacy(&mut self, new_term: i64) {
        self.role = Role::Candidate;
        self.term = new_term;
        self.votes_received.clear();
        self.candidacy_started = Instant::now();
        self.election_timeout = candidate_timeout();
    }

    /// A candidacy that timed out without a majority reverts to Follower.
    /// Only the heartbeat timer is reset; `term` and any previously known
    /// `leader` are left untouched.
    pub fn abandon_candidacy(&mut self) {
        self.role = Role::Follower;
        self.reset_heartbeat();
    }

    pub fn become_follower(&mut self, leader: Option<(String, i64)>, term: i64) {
        self.role = Role::Follower;
        self.term = term;
        if let Some(l) = leader {
            self.leader = Some(l);
        }
        self.reset_heartbeat();
    }

    pub fn become_leader(&mut self) {
        self.role = Role::Leader;
        self.leader = None;
        self.votes_received.clear();
        self.last_heartbeat = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_as_follower_term_zero() {
        let e = ElectionState::new();
        assert_eq!(e.role, Role::Follower);
        assert_eq!(e.term, 0);
        assert!(e.leader.is_none());
        assert!(e.voted_for.is_none());
    }

    #[test]
    fn start_candidacy_increments_term_and_clears_votes() {
        let mut e = ElectionState::new();
        e.votes_received.insert("http://peer".into());
        e.start_candidacy(1);
        assert_eq!(e.role, Role::Candidate);
        assert_eq!(e.term, 1);
        assert!(e.votes_received.is_empty());
    }
}
