//! At most one in-flight unit of work per key.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;

use parking_lot::Mutex;
use tokio::sync::broadcast;

/// In-flight key registry plus a completion broadcast.
///
/// The first caller for a key becomes the leader and runs the work; callers
/// arriving while it runs wait for the leader's result instead of starting
/// their own. If the leader is cancelled, waiting callers start over and one
/// of them takes the lead.
pub struct SingleFlight<K, V> {
    inflight: Mutex<HashMap<K, broadcast::Sender<V>>>,
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

enum Role<V> {
    Leader(broadcast::Sender<V>),
    Follower(broadcast::Receiver<V>),
}

/// Unregisters the key if the leader is dropped before publishing.
struct LeaderGuard<'a, K: Eq + Hash, V> {
    inflight: &'a Mutex<HashMap<K, broadcast::Sender<V>>>,
    key: Option<K>,
}

impl<K: Eq + Hash, V> Drop for LeaderGuard<'_, K, V> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.inflight.lock().remove(&key);
        }
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.inflight.lock().len()
    }

    /// Runs `work` unless a call for `key` is already running, in which case
    /// that call's result is returned.
    pub async fn run<F, Fut>(&self, key: K, mut work: F) -> V
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = V>,
    {
        loop {
            let role = {
                let mut inflight = self.inflight.lock();
                match inflight.get(&key) {
                    Some(sender) => Role::Follower(sender.subscribe()),
                    None => {
                        let (sender, _) = broadcast::channel(1);
                        inflight.insert(key.clone(), sender.clone());
                        Role::Leader(sender)
                    }
                }
            };

            match role {
                Role::Leader(sender) => {
                    let mut guard = LeaderGuard {
                        inflight: &self.inflight,
                        key: Some(key.clone()),
                    };
                    let value = work().await;
                    // Unregister before publishing so late arrivals start fresh
                    // instead of subscribing to a finished channel.
                    if let Some(key) = guard.key.take() {
                        self.inflight.lock().remove(&key);
                    }
                    let _ = sender.send(value.clone());
                    return value;
                }
                Role::Follower(mut receiver) => {
                    if let Ok(value) = receiver.recv().await {
                        return value;
                    }
                }
            }
        }
    }
}
