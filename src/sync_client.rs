//! Pushes discovered endpoints to the remote platform.
//!
//! ```text
//!  NormalizedEndpoint
//!        |
//!        v
//!  Synchronizer ---- SingleFlight (per endpoint key)
//!        |
//!        +---- Onboarder ---- SingleFlight (per service)
//!        |
//!        v
//!  RemotePlatform (HttpPlatform over reqwest)
//! ```

pub mod http_platform;
pub mod onboarding;
pub mod platform;
pub mod retry;
pub mod single_flight;
pub mod synchronizer;

pub use http_platform::HttpPlatform;
pub use platform::{ApplicationRef, PreviewOutcome, RemotePlatform};
pub use retry::BackoffConfig;
pub use synchronizer::Synchronizer;
