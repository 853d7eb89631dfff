pub mod connection_tracker;
pub mod network_listener;
pub mod packet;
pub mod packet_source;
pub mod service_detector;
pub mod service_registry;
pub mod types;

pub use network_listener::{CaptureStats, CaptureWorker};
pub use service_registry::{ServiceRegistry, StaticRegistry};
