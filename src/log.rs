use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::kv::Kv;

/// A mutating operation submitted through the Command Router, carrying
/// whatever arguments it needs to apply itself to the KV: a key and value
/// to add, a key to delete, or an old key/new key/new value to update.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    Add { key: String, value: String },
    Del { key: String },
    Update { old_key: String, new_key: String, new_value: String },
}

impl Operation {
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::Add { .. } => "add",
            Operation::Del { .. } => "del",
            Operation::Update { .. } => "update",
        }
    }

    /// Flattens the operation's arguments into the query-string pairs used
    /// by the inter-node `/commit/{command}` route; the command name
    /// (`kind()`) travels in the path, not here. `shortUrl`/
    /// `redirect` name the new key/value throughout, matching the
    /// client-facing `/add` and `/update/{K}` routes; `oldShortUrl` is
    /// added for `update`, which otherwise has no path segment to carry it.
    pub fn to_query_pairs(&self) -> Vec<(&'static str, String)> {
        match self {
            Operation::Add { key, value } => {
                vec![("shortUrl", key.clone()), ("redirect", value.clone())]
            }
            Operation::Del { key } => vec![("shortUrl", key.clone())],
            Operation::Update { old_key, new_key, new_value } => vec![
                ("oldShortUrl", old_key.clone()),
                ("shortUrl", new_key.clone()),
                ("redirect", new_value.clone()),
            ],
        }
    }

    /// Reconstructs an `Operation` of kind `command` from the query
    /// parameters a peer sent to `/commit/{command}`.
    pub fn from_query(command: &str, params: &std::collections::HashMap<String, String>) -> Result<Operation> {
        let get = |name: &str| -> Result<String> {
            params
                .get(name)
                .cloned()
                .ok_or_else(|| Error::Invalid(format!("missing '{}'", name)))
        };
        match command {
            "add" => Ok(Operation::Add { key: get("shortUrl")?, value: get("redirect")? }),
            "del" => Ok(Operation::Del { key: get("shortUrl")? }),
            "update" => Ok(Operation::Update {
                old_key: get("oldShortUrl")?,
                new_key: get("shortUrl")?,
                new_value: get("redirect")?,
            }),
            other => Err(Error::Invalid(format!("unknown operation kind '{}'", other))),
        }
    }
}

/// A single replicated log entry.
#[derive(Clone, Debug, PartialEq)]
pub struct Entry {
    pub index: i64,
    pub committed: bool,
    pub op: Operation,
}

/// The replicated log: an index-keyed map of entries plus the two
/// watermarks `last_applied` and `next_commit`. A single exclusive lock
/// (held by the caller, see `node::Node`) protects all three together.
pub struct LogState {
    pub entries: BTreeMap<i64, Entry>,
    pub last_applied: i64,
    pub next_commit: i64,
}

impl LogState {
    pub fn new() -> Self {
        Self { entries: BTreeMap::new(), last_applied: -1, next_commit: -1 }
    }

    /// The smallest unused index strictly greater than `last_applied` and
    /// any already-precommitted entry.
    pub fn next_index(&self) -> i64 {
        let highest = self.entries.keys().next_back().copied().unwrap_or(-1);
        (highest + 1).max(self.last_applied + 1)
    }

    /// Projects the effect of every entry above `last_applied` (committed
    /// or not) onto a KV snapshot, so that proposals can be validated
    /// against outstanding precommits as well as applied state. Without
    /// this, two concurrent `Add`s of the same key could both pass a
    /// precondition check validated only against the already-applied KV,
    /// racing each other into the log instead of one rejecting the other.
    pub fn project(&self, kv: &mut std::collections::HashMap<String, String>) {
        for entry in self.entries.values() {
            if entry.index <= self.last_applied {
                continue;
            }
            match &entry.op {
                Operation::Add { key, value } => {
                    kv.insert(key.clone(), value.clone());
                }
                Operation::Del { key } => {
                    kv.remove(key);
                }
                Operation::Update { old_key, new_key, new_value } => {
                    if old_key != new_key {
                        kv.remove(old_key);
                    }
                    kv.insert(new_key.clone(), new_value.clone());
                }
            }
        }
    }

    /// Stores a leader-assigned or follower-received precommit at `index`.
    /// Overwrites any existing uncommitted entry; refuses to overwrite an
    /// already-committed entry whose (kind, args) differ.
    pub fn precommit(&mut self, index: i64, op: Operation) -> Result<()> {
        if let Some(existing) = self.entries.get(&index) {
            if existing.committed {
                if existing.op == op {
                    return Ok(());
                }
                return Err(Error::Invalid(format!(
                    "entry {} already committed with a different operation",
                    index
                )));
            }
        }
        debug!(index, kind = op.kind(), "precommitting log entry");
        self.entries.insert(index, Entry { index, committed: false, op });
        Ok(())
    }

    /// Marks the entry at `index` committed. If missing, stores it as an
    /// authoritative commit (the pull-based catch-up path a lagging node
    /// uses to fill a gap).
    pub fn commit(&mut self, index: i64, op: Operation) {
        self.entries
            .entry(index)
            .and_modify(|e| {
                e.committed = true;
                e.op = op.clone();
            })
            .or_insert(Entry { index, committed: true, op });
        if index > self.next_commit {
            self.next_commit = index;
        }
    }

    pub fn get(&self, index: i64) -> Option<&Entry> {
        self.entries.get(&index)
    }

    /// Returns `last_applied + 1` if that slot is missing or still
    /// uncommitted while a later entry is already committed: the signal
    /// that this node has fallen behind and should pull the gap from the
    /// leader rather than wait for it to arrive via the next broadcast.
    pub fn next_gap(&self) -> Option<i64> {
        let missing = self.last_applied + 1;
        let ready = matches!(self.entries.get(&missing), Some(e) if e.committed);
        if ready {
            return None;
        }
        if self.entries.values().any(|e| e.committed && e.index > missing) {
            Some(missing)
        } else {
            None
        }
    }
}

/// Applies the operation to the KV and advances `last_applied`. Caller
/// must already hold the log lock and must not hold the KV lock.
pub async fn apply_one(kv: &Kv, log: &mut LogState) -> bool {
    let next = log.last_applied + 1;
    match log.entries.get(&next) {
        Some(entry) if entry.committed => {
            let op = entry.op.clone();
            kv.apply(&op).await;
            log.last_applied = next;
            debug!(index = next, "applied log entry");
            true
        }
        _ => false,
    }
}
