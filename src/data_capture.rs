pub mod file_storage;
pub mod recorder;
pub mod storage;

pub use file_storage::JsonLinesStorage;
pub use recorder::ExchangeRecorder;
pub use storage::Storage;
