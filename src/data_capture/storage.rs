use crate::error_handling::types::StorageError;
use crate::http_reconstruction::types::ExchangeRecord;

/// Durable, append-only destination for exchange records.
pub trait Storage: Send {
    fn append(&mut self, record: &ExchangeRecord) -> Result<(), StorageError>;
}
