pub mod config;
pub mod service_mapping;
pub mod types;

pub use config::{CliArgs, Config};
pub use service_mapping::ServiceMappings;
pub use types::ServiceMapping;
