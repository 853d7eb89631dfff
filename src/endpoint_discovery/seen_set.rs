use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use parking_lot::Mutex;

use super::types::{Dedupe, EndpointKey, SyncState};

const SHARDS: usize = 16;

/// Every endpoint key seen since start, with its latest sync state.
///
/// Keys are spread over independently locked shards, so work on one key
/// never waits behind a global lock. Entries are never evicted.
pub struct SeenSet {
    shards: Vec<Mutex<HashMap<EndpointKey, SyncState>>>,
}

impl Default for SeenSet {
    fn default() -> Self {
        Self::new()
    }
}

impl SeenSet {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARDS).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    fn shard(&self, key: &EndpointKey) -> &Mutex<HashMap<EndpointKey, SyncState>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARDS]
    }

    /// Records `key` as discovered on first sight.
    pub fn dedupe(&self, key: &EndpointKey) -> Dedupe {
        let mut shard = self.shard(key).lock();
        if shard.contains_key(key) {
            return Dedupe::AlreadySeen;
        }
        shard.insert(key.clone(), SyncState::Discovered);
        Dedupe::New
    }

    pub fn set_state(&self, key: &EndpointKey, state: SyncState) {
        self.shard(key).lock().insert(key.clone(), state);
    }

    pub fn state(&self, key: &EndpointKey) -> Option<SyncState> {
        self.shard(key).lock().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All keys with their states, sorted by key.
    pub fn snapshot(&self) -> Vec<(EndpointKey, SyncState)> {
        let mut entries: Vec<(EndpointKey, SyncState)> = self
            .shards
            .iter()
            .flat_map(|s| {
                s.lock()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect::<Vec<_>>()
            })
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}
