pub mod configuration;
pub mod controller;
pub mod data_capture;
pub mod endpoint_discovery;
pub mod error_handling;
pub mod http_reconstruction;
pub mod network;
pub mod pipeline;
pub mod sync_client;
pub mod web_interface;
