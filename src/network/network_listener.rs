//! # Network Listener Module
//!
//! Passive capture for one monitored interface. A [`CaptureWorker`] owns its
//! packet source, decoder, reconstructor and service detector; nothing in it
//! is shared with other workers. Completed exchanges are handed to the async
//! side through the [`ExchangeQueue`].
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌───────────────┐   ┌───────────────┐
//! │ PacketSource │──▶│ FrameDecoder │──▶│ Reconstructor │──▶│ ServiceDetect │
//! │ (AF_PACKET / │   │ (L2/L3/TCP,  │   │ (tracker +    │   │ (Host header, │
//! │  pcap file)  │   │  port filter)│   │  HTTP parse)  │   │  registry)    │
//! └──────────────┘   └──────────────┘   └───────────────┘   └───────┬───────┘
//!                                                                   │
//!                                                           ┌───────▼───────┐
//!                                                           │ ExchangeQueue │
//!                                                           └───────────────┘
//! ```
//!
//! The worker runs on its own OS thread with blocking reads bounded by the
//! source's read timeout, so a stop request is honoured within one timeout.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, trace};

use super::packet::FrameDecoder;
use super::packet_source::{PacketRead, PacketSource};
use super::service_detector::ServiceDetector;
use crate::error_handling::types::CaptureError;
use crate::http_reconstruction::Reconstructor;
use crate::pipeline::ExchangeQueue;

/// How often idle flows are swept, in capture time.
const EVICTION_INTERVAL: Duration = Duration::from_secs(1);

/// Counters of one worker, returned when it stops.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub frames: u64,
    pub segments: u64,
    pub records: u64,
    pub evicted_flows: u64,
}

/// Capture loop for a single interface or pcap file.
///
/// # Fields Overview
///
/// * `source` - where frames come from
/// * `decoder` - frame to TCP segment, filtered on the monitored ports
/// * `reconstructor` - per-flow reassembly and HTTP parsing
/// * `detector` - stamps the logical service on each record
/// * `queue` - hand-off to the consumer
/// * `stop` - shared stop flag, checked between reads
pub struct CaptureWorker {
    source: Box<dyn PacketSource>,
    decoder: FrameDecoder,
    reconstructor: Reconstructor,
    detector: ServiceDetector,
    queue: Arc<ExchangeQueue>,
    stop: Arc<AtomicBool>,
}

impl CaptureWorker {
    pub fn new(
        source: Box<dyn PacketSource>,
        decoder: FrameDecoder,
        reconstructor: Reconstructor,
        detector: ServiceDetector,
        queue: Arc<ExchangeQueue>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            source,
            decoder,
            reconstructor,
            detector,
            queue,
            stop,
        }
    }

    pub fn interface(&self) -> &str {
        self.decoder.interface()
    }

    /// Starts the worker on a dedicated thread named after its interface.
    ///
    /// # Errors
    ///
    /// Returns the OS error when the thread cannot be spawned.
    pub fn spawn(self) -> std::io::Result<JoinHandle<Result<CaptureStats, CaptureError>>> {
        let name = format!("capture-{}", self.interface());
        thread::Builder::new().name(name).spawn(move || {
            let interface = self.interface().to_string();
            let result = self.run();
            match &result {
                Ok(stats) => info!(
                    "Capture on {} stopped: {} frames, {} segments, {} records",
                    interface, stats.frames, stats.segments, stats.records
                ),
                Err(e) => error!("Capture on {} failed: {}", interface, e),
            }
            result
        })
    }

    /// Reads until stopped, until the source is exhausted, or until the
    /// queue is closed.
    ///
    /// # Errors
    ///
    /// Any read error other than a timeout ends the loop.
    pub fn run(mut self) -> Result<CaptureStats, CaptureError> {
        let link = self.source.link_type();
        let mut stats = CaptureStats::default();
        let mut now = Duration::ZERO;
        let mut last_sweep = Duration::ZERO;

        info!("Capturing on {} ({:?})", self.interface(), link);

        while !self.stop.load(Ordering::Relaxed) {
            match self.source.next_frame()? {
                PacketRead::Frame { data, time } => {
                    stats.frames += 1;
                    now = now.max(time.offset);
                    let Some(segment) = self.decoder.decode(link, &data) else {
                        continue;
                    };
                    stats.segments += 1;
                    trace!("{} seq={} len={}", segment.flow, segment.sequence, segment.payload.len());

                    for record in self.reconstructor.process(&segment, time) {
                        let record = self.detector.enrich(record);
                        stats.records += 1;
                        if !self.queue.push(record) {
                            debug!("{}: queue closed, stopping capture", self.interface());
                            return Ok(stats);
                        }
                    }
                }
                PacketRead::Timeout => {
                    if let Some(elapsed) = self.source.elapsed() {
                        now = now.max(elapsed);
                    }
                }
                PacketRead::Exhausted => {
                    info!("{}: end of capture source", self.interface());
                    break;
                }
            }

            if now.saturating_sub(last_sweep) >= EVICTION_INTERVAL {
                let evicted = self.reconstructor.evict_idle(now);
                if evicted > 0 {
                    debug!("{}: evicted {} idle flows", self.interface(), evicted);
                }
                stats.evicted_flows += evicted as u64;
                last_sweep = now;
            }
        }

        Ok(stats)
    }
}
