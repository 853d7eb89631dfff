use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::info;

use super::storage::Storage;
use crate::error_handling::types::StorageError;
use crate::http_reconstruction::types::ExchangeRecord;

/// Append-only JSON-lines log; one record per line, flushed per record.
pub struct JsonLinesStorage {
    path: PathBuf,
    writer: BufWriter<File>,
    records_written: u64,
}

impl JsonLinesStorage {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(StorageError::OpenFailed)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(StorageError::OpenFailed)?;
        info!("Capture log opened at {}", path.display());

        Ok(Self {
            path,
            writer: BufWriter::new(file),
            records_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records_written(&self) -> u64 {
        self.records_written
    }
}

impl Storage for JsonLinesStorage {
    fn append(&mut self, record: &ExchangeRecord) -> Result<(), StorageError> {
        let mut line = serde_json::to_vec(record)
            .map_err(|e| StorageError::SerializeFailed(e.to_string()))?;
        line.push(b'\n');
        self.writer
            .write_all(&line)
            .map_err(StorageError::WriteFailed)?;
        self.writer.flush().map_err(StorageError::WriteFailed)?;
        self.records_written += 1;
        Ok(())
    }
}
