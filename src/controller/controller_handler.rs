use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use log::{error, info, warn};

use crate::configuration::config::Config;
use crate::configuration::service_mapping::ServiceMappings;
use crate::data_capture::{ExchangeRecorder, JsonLinesStorage};
use crate::endpoint_discovery::{EndpointNormalizer, SeenSet};
use crate::error_handling::types::*;
use crate::http_reconstruction::Reconstructor;
use crate::network::connection_tracker::TrackerSettings;
use crate::network::network_listener::{CaptureStats, CaptureWorker};
use crate::network::packet::FrameDecoder;
use crate::network::packet_source::{AfPacketSource, PacketSource, PcapFileSource};
use crate::network::service_detector::ServiceDetector;
use crate::network::service_registry::{ServiceRegistry, StaticRegistry};
use crate::pipeline::consumer::PendingSyncs;
use crate::pipeline::{Consumer, ConsumerReport, ExchangeQueue};
use crate::sync_client::{HttpPlatform, RemotePlatform, Synchronizer};
use crate::web_interface::WebServer;

/// Read timeout of live capture sockets; bounds how long a stop request waits.
const LIVE_READ_TIMEOUT: Duration = Duration::from_millis(200);

type WorkerHandle = JoinHandle<Result<CaptureStats, CaptureError>>;

/// Where packets are read from.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureMode {
    /// One `AF_PACKET` worker per configured interface.
    Live,
    /// Replay a pcap file, then shut down once everything is drained.
    Replay(PathBuf),
}

/// Wires capture, the exchange queue, the consumer and the sync client
/// together and owns their lifecycle.
///
/// # Fields Overview
///
/// * `config` - validated configuration
/// * `mode` - live capture or pcap replay
/// * `platform` - remote platform; the HTTPS client unless replaced
/// * `seen` - endpoint keys and sync states shared with the status server
pub struct Controller {
    config: Config,
    mode: CaptureMode,
    platform: Arc<dyn RemotePlatform>,
    seen: Arc<SeenSet>,
}

impl Controller {
    /// # Errors
    ///
    /// Fails when live capture has no interface to listen on or the HTTP
    /// client cannot be built.
    pub fn new(config: Config, mode: CaptureMode) -> Result<Self, ControllerError> {
        if mode == CaptureMode::Live {
            config.validate_live_capture()?;
        }
        let platform = HttpPlatform::new(&config.platform)
            .map_err(|e| ControllerError::InitializationFailed(e.to_string()))?;
        if config.platform.credential().is_none() {
            warn!("No platform credential configured, discovered endpoints will not sync");
        }

        Ok(Self {
            config,
            mode,
            platform: Arc::new(platform),
            seen: Arc::new(SeenSet::new()),
        })
    }

    /// Replaces the remote platform client.
    pub fn with_platform(mut self, platform: Arc<dyn RemotePlatform>) -> Self {
        self.platform = platform;
        self
    }

    pub fn seen(&self) -> Arc<SeenSet> {
        self.seen.clone()
    }

    /// Runs until Ctrl-C / SIGTERM, or until a replayed file is exhausted.
    ///
    /// Shutdown order: capture workers stop, the queue is closed, the
    /// consumer writes what is left, then in-flight syncs are aborted (live)
    /// or awaited (replay).
    pub async fn run(self) -> Result<ConsumerReport, ControllerError> {
        info!("Starting controller on node {}", self.config.node_name);

        let queue = Arc::new(ExchangeQueue::new(self.config.queue_capacity));
        let consumer = self.build_consumer(queue.clone())?;
        let consumer_task = tokio::spawn(consumer.run());

        let web_task = if self.config.web.enabled {
            let addr: SocketAddr = format!("{}:{}", self.config.web.bind_address, self.config.web.port)
                .parse()
                .map_err(|e| ControllerError::WebError(format!("bad bind address: {}", e)))?;
            Some(WebServer::new(self.seen.clone(), &self.config.node_name).start(addr))
        } else {
            None
        };

        let stop = Arc::new(AtomicBool::new(false));
        let workers = match self.spawn_workers(queue.clone(), stop.clone()) {
            Ok(workers) => workers,
            Err(e) => {
                queue.close();
                consumer_task.abort();
                if let Some(task) = web_task {
                    task.abort();
                }
                return Err(e);
            }
        };

        let mut joined = tokio::task::spawn_blocking(move || join_workers(workers));
        let finished = tokio::select! {
            result = &mut joined => Some(result),
            _ = shutdown_signal() => None,
        };
        let capture = match finished {
            Some(result) => result,
            None => {
                info!("Shutdown requested, stopping capture");
                stop.store(true, Ordering::SeqCst);
                (&mut joined).await
            }
        };
        let stats = capture.map_err(|e| ControllerError::InitializationFailed(e.to_string()))?;
        let frames: u64 = stats.iter().map(|s| s.frames).sum();
        info!("Capture finished: {} worker(s), {} frames", stats.len(), frames);

        queue.close();
        let report = consumer_task
            .await
            .map_err(|e| ControllerError::InitializationFailed(format!("consumer: {}", e)))?;
        if queue.dropped() > 0 {
            warn!("{} records were dropped on queue overflow", queue.dropped());
        }

        if let Some(task) = web_task {
            task.abort();
        }
        info!("Controller stopped");
        Ok(report)
    }

    fn build_consumer(&self, queue: Arc<ExchangeQueue>) -> Result<Consumer, ControllerError> {
        let storage = JsonLinesStorage::open(&self.config.capture_log)?;
        let normalizer = EndpointNormalizer::new(&self.config.normalizer).map_err(|e| {
            ControllerError::InitializationFailed(format!("normalizer patterns: {}", e))
        })?;
        let mappings = Arc::new(ServiceMappings::new(
            self.config.services.clone(),
            self.config.mapping_file.clone(),
        ));
        info!("{} service mapping(s) known at startup", mappings.len());

        let synchronizer = Arc::new(Synchronizer::new(
            self.platform.clone(),
            mappings,
            self.seen.clone(),
            &self.config.platform,
        ));
        let pending = match self.mode {
            CaptureMode::Live => PendingSyncs::Abort,
            CaptureMode::Replay(_) => PendingSyncs::Wait,
        };

        Ok(Consumer::new(
            queue,
            ExchangeRecorder::new(Box::new(storage)),
            normalizer,
            synchronizer,
            self.config.platform.max_concurrent_syncs,
        )
        .on_close(pending))
    }

    fn spawn_workers(
        &self,
        queue: Arc<ExchangeQueue>,
        stop: Arc<AtomicBool>,
    ) -> Result<Vec<WorkerHandle>, ControllerError> {
        let registry: Arc<dyn ServiceRegistry> =
            Arc::new(StaticRegistry::new(self.config.registry_addresses()));

        let sources: Vec<(String, Box<dyn PacketSource>)> = match &self.mode {
            CaptureMode::Replay(path) => {
                info!("Replaying {}", path.display());
                let source: Box<dyn PacketSource> = Box::new(PcapFileSource::open(path)?);
                vec![("pcap".to_string(), source)]
            }
            CaptureMode::Live => self
                .config
                .interfaces
                .iter()
                .map(|iface| {
                    let source = AfPacketSource::open(iface, LIVE_READ_TIMEOUT)?;
                    Ok((iface.clone(), Box::new(source) as Box<dyn PacketSource>))
                })
                .collect::<Result<_, CaptureError>>()?,
        };

        let mut handles = Vec::with_capacity(sources.len());
        for (interface, source) in sources {
            let worker = CaptureWorker::new(
                source,
                FrameDecoder::new(&interface, &self.config.ports),
                Reconstructor::new(TrackerSettings::from(&self.config.tracker), &self.config.node_name),
                ServiceDetector::new(&self.config.identifier, registry.clone()),
                queue.clone(),
                stop.clone(),
            );
            let handle = worker.spawn().map_err(|e| {
                ControllerError::InitializationFailed(format!("capture thread for {}: {}", interface, e))
            })?;
            handles.push(handle);
        }
        Ok(handles)
    }
}

fn join_workers(workers: Vec<WorkerHandle>) -> Vec<CaptureStats> {
    workers
        .into_iter()
        .filter_map(|handle| match handle.join() {
            Ok(Ok(stats)) => Some(stats),
            Ok(Err(_)) => None,
            Err(_) => {
                error!("A capture thread panicked");
                None
            }
        })
        .collect()
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::types::ServiceMapping;
    use crate::endpoint_discovery::{EndpointKey, SyncState};
    use crate::network::packet::testing::ethernet_frame;
    use crate::network::packet_source::pcap_bytes;
    use crate::sync_client::platform::testing::{Calls, MockPlatform};
    use std::net::SocketAddrV4;
    use tempfile::tempdir;

    const PSH_ACK: u8 = 0x18;

    fn exchange_frames() -> Vec<(u32, u32, Vec<u8>)> {
        let client: SocketAddrV4 = "10.244.0.5:41000".parse().unwrap();
        let server: SocketAddrV4 = "10.96.0.20:8080".parse().unwrap();
        let mut frames = Vec::new();
        let mut client_seq = 1_000u32;
        let mut server_seq = 9_000u32;
        for (n, id) in [1, 2].iter().enumerate() {
            let request = format!(
                "GET /api/v1/users/{} HTTP/1.1\r\nHost: users.default.svc.cluster.local\r\n\r\n",
                id
            );
            let response = b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n";
            frames.push((1, n as u32 * 10, ethernet_frame(client, server, client_seq, PSH_ACK, request.as_bytes())));
            frames.push((1, n as u32 * 10 + 5, ethernet_frame(server, client, server_seq, PSH_ACK, response)));
            client_seq += request.len() as u32;
            server_seq += response.len() as u32;
        }
        frames
    }

    #[test]
    fn live_capture_needs_an_interface() {
        let config = Config {
            interfaces: vec![],
            ..Config::default()
        };
        assert!(matches!(
            Controller::new(config, CaptureMode::Live),
            Err(ControllerError::ConfigurationError(ConfigError::InterfacesEmpty(_)))
        ));
    }

    #[tokio::test]
    async fn replay_runs_the_whole_pipeline() {
        let dir = tempdir().unwrap();
        let pcap = dir.path().join("traffic.pcap");
        std::fs::write(&pcap, pcap_bytes(1, &exchange_frames())).unwrap();

        let mut config = Config {
            node_name: "node-a".to_string(),
            capture_log: dir.path().join("exchanges.jsonl"),
            ..Config::default()
        };
        config.platform.api_key = Some("k".to_string());
        config.services.insert(
            "users".to_string(),
            ServiceMapping {
                application_id: "app".to_string(),
                instance_id: "inst".to_string(),
            },
        );

        let platform = Arc::new(MockPlatform::default());
        let controller = Controller::new(config, CaptureMode::Replay(pcap))
            .unwrap()
            .with_platform(platform.clone());
        let seen = controller.seen();
        let report = controller.run().await.unwrap();

        assert_eq!(report.records, 4);
        assert_eq!(report.written, 4);
        assert_eq!(report.endpoints, 1);
        assert_eq!(Calls::get(&platform.calls.preview), 1);
        assert_eq!(Calls::get(&platform.calls.create_endpoint), 1);

        let key = EndpointKey {
            service: "users".to_string(),
            method: "GET".to_string(),
            template: "/api/v1/users/{id}".to_string(),
        };
        assert!(matches!(seen.state(&key), Some(SyncState::Synced { .. })));

        let log = std::fs::read_to_string(dir.path().join("exchanges.jsonl")).unwrap();
        assert_eq!(log.lines().count(), 4);
        assert!(log.lines().all(|l| l.contains("\"node\":\"node-a\"")));
    }

    #[tokio::test]
    async fn missing_pcap_is_a_capture_error() {
        let dir = tempdir().unwrap();
        let config = Config {
            capture_log: dir.path().join("exchanges.jsonl"),
            ..Config::default()
        };
        let controller =
            Controller::new(config, CaptureMode::Replay(dir.path().join("absent.pcap"))).unwrap();
        assert!(matches!(
            controller.run().await,
            Err(ControllerError::CaptureError(CaptureError::ReadError(_)))
        ));
    }
}
