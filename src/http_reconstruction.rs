pub mod parser;
pub mod reconstructor;
pub mod types;

pub use reconstructor::{HttpConnection, Reconstructor};
pub use types::{Direction, ExchangeRecord, Header, Headers};
