use std::collections::VecDeque;

use log::warn;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::http_reconstruction::types::ExchangeRecord;

/// Dropped records between two overflow warnings.
const WARN_EVERY: u64 = 1000;

struct QueueState {
    items: VecDeque<ExchangeRecord>,
    closed: bool,
    dropped: u64,
}

/// Bounded multi-producer, single-consumer queue of exchange records.
///
/// Producers are capture threads and never block: when the queue is full the
/// oldest record is dropped. Pops are async.
pub struct ExchangeQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
}

impl ExchangeQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity.min(4096)),
                closed: false,
                dropped: 0,
            }),
            notify: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    /// Enqueues a record. Returns `false` once the queue is closed.
    pub fn push(&self, record: ExchangeRecord) -> bool {
        {
            let mut state = self.state.lock();
            if state.closed {
                return false;
            }
            if state.items.len() >= self.capacity {
                state.items.pop_front();
                state.dropped += 1;
                if state.dropped == 1 || state.dropped % WARN_EVERY == 0 {
                    warn!(
                        "Exchange queue full ({} records), {} dropped so far",
                        self.capacity, state.dropped
                    );
                }
            }
            state.items.push_back(record);
        }
        self.notify.notify_one();
        true
    }

    /// Next record; `None` once the queue is closed and empty.
    pub async fn pop(&self) -> Option<ExchangeRecord> {
        loop {
            {
                let mut state = self.state.lock();
                if let Some(record) = state.items.pop_front() {
                    return Some(record);
                }
                if state.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Stops accepting records. Already queued records can still be popped.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped(&self) -> u64 {
        self.state.lock().dropped
    }
}
