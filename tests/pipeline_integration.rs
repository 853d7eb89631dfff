//! Drives synthetic packets through capture, reconstruction, the capture log
//! and endpoint sync using a recorded pcap replay.

use std::net::SocketAddrV4;
use std::path::Path;
use std::sync::Arc;

use apiscope::configuration::config::Config;
use apiscope::configuration::types::ServiceMapping;
use apiscope::controller::controller_handler::{CaptureMode, Controller};
use apiscope::endpoint_discovery::{EndpointKey, SyncState};
use apiscope::error_handling::types::SyncError;
use apiscope::sync_client::{ApplicationRef, PreviewOutcome, RemotePlatform};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tempfile::tempdir;

const PSH_ACK: u8 = 0x18;

/// Remembers every call in arrival order.
#[derive(Default)]
struct RecordingPlatform {
    calls: Mutex<Vec<String>>,
}

impl RecordingPlatform {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }
}

#[async_trait]
impl RemotePlatform for RecordingPlatform {
    async fn preview_endpoint(
        &self,
        mapping: &ServiceMapping,
        method: &str,
        path: &str,
    ) -> Result<PreviewOutcome, SyncError> {
        self.calls
            .lock()
            .push(format!("preview {} {} {}", mapping.application_id, method, path));
        if path.starts_with("/known") {
            Ok(PreviewOutcome::Matched {
                endpoint_id: Some("ep-known".to_string()),
                template: Some(path.to_string()),
            })
        } else {
            Ok(PreviewOutcome::NoMatch)
        }
    }

    async fn create_endpoint(
        &self,
        mapping: &ServiceMapping,
        method: &str,
        template: &str,
    ) -> Result<Option<String>, SyncError> {
        self.calls
            .lock()
            .push(format!("create {} {} {}", mapping.application_id, method, template));
        Ok(None)
    }

    async fn find_application(&self, name: &str) -> Result<Option<ApplicationRef>, SyncError> {
        self.calls.lock().push(format!("find {}", name));
        Ok(None)
    }

    async fn create_application(&self, name: &str) -> Result<String, SyncError> {
        self.calls.lock().push(format!("application {}", name));
        Ok(format!("app-{}", name))
    }

    async fn create_instance(&self, application_id: &str, _service: &str) -> Result<String, SyncError> {
        self.calls.lock().push(format!("instance {}", application_id));
        Ok("inst-auto".to_string())
    }
}

fn ethernet_frame(src: SocketAddrV4, dst: SocketAddrV4, seq: u32, payload: &[u8]) -> Vec<u8> {
    let mut tcp = Vec::new();
    tcp.extend_from_slice(&src.port().to_be_bytes());
    tcp.extend_from_slice(&dst.port().to_be_bytes());
    tcp.extend_from_slice(&seq.to_be_bytes());
    tcp.extend_from_slice(&0u32.to_be_bytes());
    tcp.push(5 << 4);
    tcp.push(PSH_ACK);
    tcp.extend_from_slice(&[0xff, 0xff, 0, 0, 0, 0]);
    tcp.extend_from_slice(payload);

    let mut ip = vec![0x45, 0];
    ip.extend_from_slice(&((20 + tcp.len()) as u16).to_be_bytes());
    ip.extend_from_slice(&[0, 0, 0x40, 0, 64, 6, 0, 0]);
    ip.extend_from_slice(&src.ip().octets());
    ip.extend_from_slice(&dst.ip().octets());
    ip.extend_from_slice(&tcp);

    let mut frame = vec![0u8; 12];
    frame.extend_from_slice(&0x0800u16.to_be_bytes());
    frame.extend_from_slice(&ip);
    frame
}

/// Keep-alive connection carrying each `(host, path)` request and a 200 reply.
fn connection(client: &str, server: &str, requests: &[(&str, &str)]) -> Vec<Vec<u8>> {
    let client: SocketAddrV4 = client.parse().unwrap();
    let server: SocketAddrV4 = server.parse().unwrap();
    let (mut client_seq, mut server_seq) = (100u32, 7_000u32);
    let mut frames = Vec::new();
    for (host, path) in requests {
        let request = format!("GET {} HTTP/1.1\r\nHost: {}\r\nAccept: */*\r\n\r\n", path, host);
        let response = b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 2\r\n\r\nok";
        frames.push(ethernet_frame(client, server, client_seq, request.as_bytes()));
        frames.push(ethernet_frame(server, client, server_seq, response));
        client_seq += request.len() as u32;
        server_seq += response.len() as u32;
    }
    frames
}

fn write_pcap(path: &Path, frames: &[Vec<u8>]) {
    let mut out = Vec::new();
    out.extend_from_slice(&0xa1b2_c3d4u32.to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&4u16.to_le_bytes());
    out.extend_from_slice(&[0u8; 8]);
    out.extend_from_slice(&65_535u32.to_le_bytes());
    out.extend_from_slice(&1u32.to_le_bytes());
    for (n, frame) in frames.iter().enumerate() {
        out.extend_from_slice(&1_700_000_000u32.to_le_bytes());
        out.extend_from_slice(&(n as u32 * 1_000).to_le_bytes());
        out.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        out.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        out.extend_from_slice(frame);
    }
    std::fs::write(path, out).unwrap();
}

fn config(dir: &Path, auto_onboard: bool) -> Config {
    let toml = format!(
        r#"
node_name = "worker-1"
ports = [8080]
capture_log = "{}"

[platform]
base_url = "http://127.0.0.1:9"
api_key = "secret"
auto_onboard = {}

[services.orders]
application_id = "app-orders"
instance_id = "inst-orders"
"#,
        dir.join("exchanges.jsonl").display(),
        auto_onboard
    );
    Config::from_toml_str(&toml).unwrap()
}

fn key(service: &str, template: &str) -> EndpointKey {
    EndpointKey {
        service: service.to_string(),
        method: "GET".to_string(),
        template: template.to_string(),
    }
}

#[tokio::test]
async fn replayed_traffic_is_logged_normalized_and_synced() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempdir().unwrap();
    let pcap = dir.path().join("capture.pcap");
    let host = "orders.shop.svc.cluster.local:8080";
    let mut frames = connection(
        "10.244.1.10:50000",
        "10.96.3.4:8080",
        &[
            (host, "/api/v1/users/1"),
            (host, "/api/v1/users/2?verbose=true"),
            (host, "/healthz"),
            (host, "/known/thing"),
        ],
    );
    frames.extend(connection("10.244.1.11:50001", "10.96.3.5:8080", &[("billing", "/invoices/42")]));
    write_pcap(&pcap, &frames);

    let platform = Arc::new(RecordingPlatform::default());
    let controller = Controller::new(config(dir.path(), false), CaptureMode::Replay(pcap))
        .unwrap()
        .with_platform(platform.clone());
    let seen = controller.seen();
    let report = controller.run().await.unwrap();

    assert_eq!(report.records, 10);
    assert_eq!(report.written, 10);
    assert_eq!(report.endpoints, 3);

    assert_eq!(platform.count("preview"), 2);
    assert_eq!(
        platform.calls().iter().filter(|c| c.starts_with("create")).collect::<Vec<_>>(),
        vec!["create app-orders GET /api/v1/users/{id}"]
    );
    assert_eq!(platform.count("find"), 0);

    assert_eq!(
        seen.state(&key("orders", "/api/v1/users/{id}")),
        Some(SyncState::Synced { endpoint_id: None })
    );
    assert_eq!(
        seen.state(&key("orders", "/known/thing")),
        Some(SyncState::Matched {
            endpoint_id: Some("ep-known".to_string())
        })
    );
    assert_eq!(seen.state(&key("billing", "/invoices/{id}")), Some(SyncState::Skipped));
    assert_eq!(seen.state(&key("orders", "/healthz")), None);

    let log = std::fs::read_to_string(dir.path().join("exchanges.jsonl")).unwrap();
    let lines: Vec<Value> = log.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    assert_eq!(lines.len(), 10);
    assert_eq!(lines[0]["direction"], "request");
    assert_eq!(lines[0]["service"], "orders");
    assert_eq!(lines[0]["node"], "worker-1");
    assert_eq!(lines[1]["direction"], "response");
    assert_eq!(lines[1]["status_code"], 200);
    assert_eq!(lines[0]["correlation_id"], lines[1]["correlation_id"]);
}

#[tokio::test]
async fn unmapped_service_is_onboarded_once_before_preview() {
    let dir = tempdir().unwrap();
    let pcap = dir.path().join("capture.pcap");
    write_pcap(
        &pcap,
        &connection(
            "10.244.1.11:50001",
            "10.96.3.5:8080",
            &[("billing", "/invoices/42"), ("billing", "/invoices/42/lines")],
        ),
    );

    let platform = Arc::new(RecordingPlatform::default());
    let controller = Controller::new(config(dir.path(), true), CaptureMode::Replay(pcap))
        .unwrap()
        .with_platform(platform.clone());
    let report = controller.run().await.unwrap();
    assert_eq!(report.endpoints, 2);

    let calls = platform.calls();
    assert_eq!(platform.count("application"), 1);
    assert_eq!(platform.count("instance"), 1);
    let first_preview = calls.iter().position(|c| c.starts_with("preview")).unwrap();
    let instance = calls.iter().position(|c| c.starts_with("instance")).unwrap();
    assert!(instance < first_preview);
    assert!(calls
        .iter()
        .filter(|c| c.starts_with("preview"))
        .all(|c| c.starts_with("preview app-billing")));
}
