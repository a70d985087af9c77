use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::warn;

use crate::error::{Error, Result};
use crate::log::Operation;

/// The Raft-replicated state machine: a map from short name to redirect
/// target. Mutated only by the Applier; read concurrently by lookup/fetch
/// handlers under a reader/writer discipline.
pub struct Kv {
    urls: RwLock<HashMap<String, String>>,
}

impl Kv {
    pub fn new() -> Self {
        Self { urls: RwLock::new(HashMap::new()) }
    }

    /// Seeds the map with static entries at startup, before any worker starts.
    pub fn seeded(entries: impl IntoIterator<Item = (String, String)>) -> Self {
        Self { urls: RwLock::new(entries.into_iter().collect()) }
    }

    pub async fn lookup(&self, key: &str) -> Option<String> {
        self.urls.read().await.get(key).cloned()
    }

    pub async fn fetch(&self) -> Vec<(String, String)> {
        self.urls
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.urls.read().await.contains_key(key)
    }

    /// Checks whether `op` would succeed against the given key/value
    /// snapshot: add requires a non-empty key and value and no existing
    /// entry, delete and update require the key to already exist. Takes a
    /// plain map rather than `&self` so a caller can validate against a
    /// snapshot that also accounts for in-flight log entries, not just the
    /// applied KV.
    pub fn check_precondition(urls: &HashMap<String, String>, op: &Operation) -> Result<()> {
        match op {
            Operation::Add { key, value } => {
                if key.is_empty() {
                    return Err(Error::Invalid("no short url provided".into()));
                }
                if value.is_empty() {
                    return Err(Error::Invalid("no redirect url provided".into()));
                }
                if urls.contains_key(key) {
                    return Err(Error::Invalid(format!(
                        "cannot add '{}': already exists.",
                        key
                    )));
                }
                Ok(())
            }
            Operation::Del { key } => {
                if !urls.contains_key(key) {
                    return Err(Error::Invalid(format!(
                        "failed to delete '{}': not found.",
                        key
                    )));
                }
                Ok(())
            }
            Operation::Update { old_key, .. } => {
                if !urls.contains_key(old_key) {
                    return Err(Error::Invalid(format!(
                        "failed to update '{}': not found.",
                        old_key
                    )));
                }
                Ok(())
            }
        }
    }

    /// Applies a committed log entry. The entry has already cleared quorum
    /// and, per the log invariants, its (kind, args) can never change again,
    /// so this never rejects: a precondition violation here can only arise
    /// from a leader change racing the original validation, and the
    /// committed instruction is executed on a best-effort basis regardless.
    pub async fn apply(&self, op: &Operation) {
        let mut urls = self.urls.write().await;
        match op {
            Operation::Add { key, value } => {
                if urls.insert(key.clone(), value.clone()).is_some() {
                    warn!(key, "applied Add over an existing key");
                }
            }
            Operation::Del { key } => {
                if urls.remove(key).is_none() {
                    warn!(key, "applied Del for a missing key");
                }
            }
            Operation::Update { old_key, new_key, new_value } => {
                if old_key != new_key {
                    if urls.remove(old_key).is_none() {
                        warn!(old_key, "applied Update for a missing key");
                    }
                    urls.insert(new_key.clone(), new_value.clone());
                } else if urls.contains_key(old_key) {
                    urls.insert(old_key.clone(), new_value.clone());
                } else {
                    warn!(old_key, "applied Update for a missing key");
                    urls.insert(old_key.clone(), new_value.clone());
                }
            }
        }
    }

    pub(crate) async fn snapshot(&self) -> HashMap<String, String> {
        self.urls.read().await.clone()
    }
}
