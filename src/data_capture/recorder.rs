//! Capture sink: every reconstructed exchange, written once, in arrival order.
//!
//! The recorder sits between the exchange queue and a [`Storage`] backend.
//! It never blocks the pipeline on a failing disk: a write error is logged
//! and the record is dropped, the next record is tried again.

use std::collections::{HashSet, VecDeque};

use log::{trace, warn};

use super::storage::Storage;
use crate::http_reconstruction::types::{Direction, ExchangeRecord};

/// How many recent (correlation id, direction) pairs are remembered.
const RECENT_KEYS: usize = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Written,
    Duplicate,
    Failed,
}

pub struct ExchangeRecorder {
    storage: Box<dyn Storage>,
    written: HashSet<(String, Direction)>,
    order: VecDeque<(String, Direction)>,
    failures: u64,
}

impl ExchangeRecorder {
    pub fn new(storage: Box<dyn Storage>) -> Self {
        Self {
            storage,
            written: HashSet::new(),
            order: VecDeque::new(),
            failures: 0,
        }
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    pub fn record(&mut self, exchange: &ExchangeRecord) -> RecordOutcome {
        let key = (exchange.correlation_id.clone(), exchange.direction);
        if self.written.contains(&key) {
            trace!("Skipping already recorded {:?} {}", key.1, key.0);
            return RecordOutcome::Duplicate;
        }

        if let Err(e) = self.storage.append(exchange) {
            self.failures += 1;
            warn!("Dropping exchange {}: {}", exchange.id, e);
            return RecordOutcome::Failed;
        }

        if self.order.len() == RECENT_KEYS {
            if let Some(oldest) = self.order.pop_front() {
                self.written.remove(&oldest);
            }
        }
        self.written.insert(key.clone());
        self.order.push_back(key);
        RecordOutcome::Written
    }
}
