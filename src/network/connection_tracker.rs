//! # Connection Tracker
//!
//! Owns one [`ConnectionState`] per TCP connection and turns captured
//! segments into in-order byte runs per half-stream.
//!
//! ```text
//! segments ──▶ ConnectionTracker ──▶ Delivered { side, bytes } ──▶ parser state (S)
//!                │ reorder buffer per half-stream
//!                │ retransmission trimming
//!                └ idle / gap / overflow eviction
//! ```
//!
//! The tracker is generic over the per-flow parser state `S` so it stays a
//! leaf: it stores the state next to the byte streams and hands it back to
//! the caller, but never looks inside.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use log::{debug, warn};

use super::types::{FlowKey, Side, TcpSegment};
use crate::configuration::types::TrackerConfig;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerSettings {
    pub idle_timeout: Duration,
    pub reorder_window: Duration,
    pub max_buffer_bytes: usize,
    pub max_flows: usize,
}

impl From<&TrackerConfig> for TrackerSettings {
    fn from(config: &TrackerConfig) -> Self {
        Self {
            idle_timeout: Duration::from_secs(config.idle_timeout_secs),
            reorder_window: Duration::from_millis(config.reorder_window_ms),
            max_buffer_bytes: config.max_buffer_bytes,
            max_flows: config.max_flows,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetReason {
    /// A sequence gap outlived the reorder window.
    Loss,
    /// The connection was reset by a peer.
    Rst,
    /// Too much data waited in the reorder buffer.
    Overflow,
}

/// What happened to one observed segment.
#[derive(Debug, PartialEq)]
pub enum Observation {
    /// No payload to deliver (pure ACK, duplicate, unknown flow FIN...).
    Ignored,
    /// Out-of-order payload held until the gap fills.
    Buffered,
    /// In-order bytes for `side` of the canonical flow `key`.
    Delivered {
        key: FlowKey,
        side: Side,
        data: Vec<u8>,
        /// The half-stream has delivered everything up to its FIN.
        fin: bool,
    },
    Reset { key: FlowKey, reason: ResetReason },
    /// The flow table is full; the segment started a flow that is not tracked.
    Untracked,
}

/// One direction of a connection.
#[derive(Debug, Default)]
struct HalfStream {
    /// Sequence number of the next byte to deliver, once known.
    next_seq: Option<u32>,
    /// Absolute stream offset of `next_seq`.
    next_offset: u64,
    /// Out-of-order payload keyed by absolute offset.
    pending: BTreeMap<u64, Vec<u8>>,
    pending_bytes: usize,
    /// When the oldest unfilled gap opened.
    gap_since: Option<Duration>,
    fin_offset: Option<u64>,
    fin_delivered: bool,
}

impl HalfStream {
    fn offset_of(&self, next_seq: u32, seq: u32) -> Option<u64> {
        let diff = i64::from(seq.wrapping_sub(next_seq) as i32);
        let offset = self.next_offset as i64 + diff;
        (offset >= 0).then_some(offset as u64)
    }

    /// Accepts a segment and returns the bytes that became contiguous.
    fn accept(&mut self, segment: &TcpSegment, now: Duration) -> Vec<u8> {
        let mut seq = segment.sequence;
        if segment.flags.syn() {
            // SYN occupies one sequence number.
            seq = seq.wrapping_add(1);
        }
        let next_seq = *self.next_seq.get_or_insert(seq);

        let Some(start) = self.offset_of(next_seq, seq) else {
            return Vec::new();
        };
        let end = start + segment.payload.len() as u64;
        if segment.flags.fin() {
            self.fin_offset = Some(end);
        }

        let mut released = Vec::new();
        if !segment.payload.is_empty() {
            if start <= self.next_offset {
                if end > self.next_offset {
                    let skip = (self.next_offset - start) as usize;
                    released.extend_from_slice(&segment.payload[skip..]);
                    self.next_offset = end;
                }
                self.drain_pending(&mut released);
            } else {
                let entry = self.pending.entry(start).or_default();
                if segment.payload.len() > entry.len() {
                    self.pending_bytes += segment.payload.len() - entry.len();
                    *entry = segment.payload.clone();
                }
            }
        }

        if !released.is_empty() {
            self.next_seq = Some(next_seq.wrapping_add(released.len() as u32));
        }
        if self.pending.is_empty() {
            self.gap_since = None;
        } else if self.gap_since.is_none() || !released.is_empty() {
            self.gap_since = Some(now);
        }
        released
    }

    fn drain_pending(&mut self, released: &mut Vec<u8>) {
        while let Some(entry) = self.pending.first_entry() {
            let start = *entry.key();
            if start > self.next_offset {
                break;
            }
            let data = entry.remove();
            self.pending_bytes -= data.len();
            let end = start + data.len() as u64;
            if end > self.next_offset {
                let skip = (self.next_offset - start) as usize;
                released.extend_from_slice(&data[skip..]);
                self.next_offset = end;
            }
        }
    }

    fn reached_fin(&mut self) -> bool {
        match self.fin_offset {
            Some(fin) if !self.fin_delivered && self.next_offset >= fin && self.pending.is_empty() => {
                self.fin_delivered = true;
                true
            }
            _ => false,
        }
    }

    fn gap_expired(&self, now: Duration, window: Duration) -> bool {
        self.gap_since
            .map(|since| now.saturating_sub(since) > window)
            .unwrap_or(false)
    }
}

/// Per-connection state, owned by the tracker.
#[derive(Debug)]
pub struct ConnectionState<S> {
    pub key: FlowKey,
    streams: [HalfStream; 2],
    pub parser: S,
    pub created: Duration,
    pub last_activity: Duration,
}

impl<S> ConnectionState<S> {
    fn buffered_bytes(&self) -> usize {
        self.streams.iter().map(|s| s.pending_bytes).sum()
    }

    pub fn closed(&self) -> bool {
        self.streams.iter().all(|s| s.fin_delivered)
    }
}

/// Flow table for one capture worker.
pub struct ConnectionTracker<S> {
    settings: TrackerSettings,
    flows: HashMap<FlowKey, ConnectionState<S>>,
    untracked_warned: bool,
}

impl<S: Default> ConnectionTracker<S> {
    pub fn new(settings: TrackerSettings) -> Self {
        Self {
            settings,
            flows: HashMap::new(),
            untracked_warned: false,
        }
    }

    pub fn settings(&self) -> &TrackerSettings {
        &self.settings
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    pub fn get_mut(&mut self, key: &FlowKey) -> Option<&mut ConnectionState<S>> {
        self.flows.get_mut(key)
    }

    /// Drops a flow and everything buffered for it.
    pub fn remove(&mut self, key: &FlowKey) -> Option<ConnectionState<S>> {
        self.flows.remove(key)
    }

    /// Feeds one segment into its flow.
    ///
    /// # Arguments
    ///
    /// * `segment` - the decoded segment, direction as captured
    /// * `now` - monotonic capture time of the segment
    pub fn observe(&mut self, segment: &TcpSegment, now: Duration) -> Observation {
        let (key, side) = segment.flow.canonical();

        if segment.flags.rst() {
            return match self.flows.remove(&key) {
                Some(_) => {
                    debug!("{}: reset by peer", key);
                    Observation::Reset {
                        key,
                        reason: ResetReason::Rst,
                    }
                }
                None => Observation::Ignored,
            };
        }

        if !self.flows.contains_key(&key) {
            // Bare ACKs and FINs of flows we never saw carry nothing to parse.
            if segment.payload.is_empty() && !segment.flags.syn() {
                return Observation::Ignored;
            }
            if self.flows.len() >= self.settings.max_flows {
                if !self.untracked_warned {
                    warn!(
                        "Flow table full ({} flows), new connections are not tracked",
                        self.settings.max_flows
                    );
                    self.untracked_warned = true;
                }
                return Observation::Untracked;
            }
            debug!("{}: tracking new flow", key);
            self.flows.insert(
                key.clone(),
                ConnectionState {
                    key: key.clone(),
                    streams: [HalfStream::default(), HalfStream::default()],
                    parser: S::default(),
                    created: now,
                    last_activity: now,
                },
            );
        }

        let settings = self.settings;
        let Some(state) = self.flows.get_mut(&key) else {
            return Observation::Ignored;
        };
        state.last_activity = now;

        let stream = &mut state.streams[side.index()];
        let data = stream.accept(segment, now);
        let fin = stream.reached_fin();
        let gap_expired = stream.gap_expired(now, settings.reorder_window);

        if state.buffered_bytes() > settings.max_buffer_bytes {
            warn!(
                "{}: reorder buffer exceeded {} bytes, dropping flow",
                key, settings.max_buffer_bytes
            );
            self.flows.remove(&key);
            return Observation::Reset {
                key,
                reason: ResetReason::Overflow,
            };
        }
        if gap_expired {
            debug!("{}: sequence gap outlived the reorder window", key);
            self.flows.remove(&key);
            return Observation::Reset {
                key,
                reason: ResetReason::Loss,
            };
        }

        if data.is_empty() && !fin {
            if state.streams[side.index()].pending.is_empty() {
                return Observation::Ignored;
            }
            return Observation::Buffered;
        }
        Observation::Delivered {
            key,
            side,
            data,
            fin,
        }
    }

    /// Evicts idle flows and flows whose gap outlived the reorder window.
    ///
    /// Partial exchanges held by evicted flows are discarded.
    pub fn evict_idle(&mut self, now: Duration) -> Vec<(FlowKey, ResetReason)> {
        let settings = self.settings;
        let mut evicted = Vec::new();
        self.flows.retain(|key, state| {
            if now.saturating_sub(state.last_activity) > settings.idle_timeout {
                debug!("{}: idle, evicting", key);
                evicted.push((key.clone(), ResetReason::Loss));
                return false;
            }
            if state
                .streams
                .iter()
                .any(|s| s.gap_expired(now, settings.reorder_window))
            {
                debug!("{}: sequence gap outlived the reorder window", key);
                evicted.push((key.clone(), ResetReason::Loss));
                return false;
            }
            true
        });
        evicted
    }
}
