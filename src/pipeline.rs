//! Hand-off between the capture workers and the async side.
//!
//! ```text
//! CaptureWorker (thread) --+
//! CaptureWorker (thread) --+--> ExchangeQueue --> Consumer --> capture log
//!                                                     |
//!                                                     +--> normalize / dedupe
//!                                                     |
//!                                                     +--> sync tasks (JoinSet)
//! ```

pub mod consumer;
pub mod exchange_queue;

pub use consumer::{Consumer, ConsumerReport};
pub use exchange_queue::ExchangeQueue;
