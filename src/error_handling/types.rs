use std::fmt;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    JsonError(String),
    InterfacesEmpty(String),
    BadIpFormatting(String),
    BadUrl(String),
    NotInRange(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::JsonError(e) => write!(f, "Mapping file parsing error: {}", e),
            ConfigError::InterfacesEmpty(e) => write!(f, "Interfaces configuration error: {}", e),
            ConfigError::BadIpFormatting(e) => write!(f, "IP formatting error: {}", e),
            ConfigError::BadUrl(e) => write!(f, "Platform URL error: {}", e),
            ConfigError::NotInRange(e) => write!(f, "Value out of range: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

#[derive(Debug)]
pub enum CaptureError {
    SocketError(std::io::Error),
    InterfaceNotFound(String),
    PcapFormat(String),
    UnsupportedLinkType(u32),
    ReadError(std::io::Error),
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::SocketError(e) => write!(f, "Capture socket error: {}", e),
            CaptureError::InterfaceNotFound(e) => write!(f, "Interface not found: {}", e),
            CaptureError::PcapFormat(e) => write!(f, "Invalid pcap file: {}", e),
            CaptureError::UnsupportedLinkType(t) => write!(f, "Unsupported link type: {}", t),
            CaptureError::ReadError(e) => write!(f, "Packet read error: {}", e),
        }
    }
}

impl std::error::Error for CaptureError {}

#[derive(Debug)]
pub enum StorageError {
    OpenFailed(std::io::Error),
    WriteFailed(std::io::Error),
    SerializeFailed(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::OpenFailed(e) => write!(f, "Capture log open failed: {}", e),
            StorageError::WriteFailed(e) => write!(f, "Capture log write failed: {}", e),
            StorageError::SerializeFailed(e) => write!(f, "Record serialization failed: {}", e),
        }
    }
}

impl std::error::Error for StorageError {}

/// Failures of a remote platform call, classified by how the sync state
/// machine must react to them.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncError {
    /// Timeouts, connection failures, 5xx and 429 responses. Retried.
    Transient(String),
    /// 401 / 403. Never retried.
    Unauthorized(u16),
    /// Any other non-success status. Never retried.
    Rejected { status: u16, body: String },
    /// The platform answered with something we could not understand.
    InvalidResponse(String),
    /// Onboarding produced no usable application or instance.
    OnboardingFailed(String),
    /// No bearer credential is configured.
    MissingCredential,
}

impl SyncError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Transient(_))
    }

    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => SyncError::Unauthorized(status),
            429 | 500..=599 => SyncError::Transient(format!("HTTP {}: {}", status, body)),
            _ => SyncError::Rejected { status, body },
        }
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::Transient(e) => write!(f, "Transient platform error: {}", e),
            SyncError::Unauthorized(s) => write!(f, "Platform rejected credential (HTTP {})", s),
            SyncError::Rejected { status, body } => {
                write!(f, "Platform rejected request (HTTP {}): {}", status, body)
            }
            SyncError::InvalidResponse(e) => write!(f, "Invalid platform response: {}", e),
            SyncError::OnboardingFailed(e) => write!(f, "Onboarding failed: {}", e),
            SyncError::MissingCredential => write!(f, "No platform credential configured"),
        }
    }
}

impl std::error::Error for SyncError {}

#[derive(Debug)]
pub enum ControllerError {
    ConfigurationError(ConfigError),
    CaptureError(CaptureError),
    StorageError(StorageError),
    WebError(String),
    InitializationFailed(String),
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerError::ConfigurationError(e) => write!(f, "Configuration error: {}", e),
            ControllerError::CaptureError(e) => write!(f, "Capture error: {}", e),
            ControllerError::StorageError(e) => write!(f, "Storage error: {}", e),
            ControllerError::WebError(e) => write!(f, "Web server error: {}", e),
            ControllerError::InitializationFailed(e) => write!(f, "Initialization failed: {}", e),
        }
    }
}

impl std::error::Error for ControllerError {}

impl From<ConfigError> for ControllerError {
    fn from(err: ConfigError) -> Self {
        ControllerError::ConfigurationError(err)
    }
}

impl From<CaptureError> for ControllerError {
    fn from(err: CaptureError) -> Self {
        ControllerError::CaptureError(err)
    }
}

impl From<StorageError> for ControllerError {
    fn from(err: StorageError) -> Self {
        ControllerError::StorageError(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(SyncError::from_status(401, String::new()), SyncError::Unauthorized(401));
        assert_eq!(SyncError::from_status(403, String::new()), SyncError::Unauthorized(403));
        assert!(SyncError::from_status(503, "busy".into()).is_transient());
        assert!(SyncError::from_status(429, String::new()).is_transient());
        assert!(matches!(
            SyncError::from_status(422, "bad".into()),
            SyncError::Rejected { status: 422, .. }
        ));
    }
}
