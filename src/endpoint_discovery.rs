pub mod normalizer;
pub mod seen_set;
pub mod types;

pub use normalizer::EndpointNormalizer;
pub use seen_set::SeenSet;
pub use types::{Dedupe, EndpointKey, NormalizedEndpoint, SyncState};
