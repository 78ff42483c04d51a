pub mod manager;
pub mod record;

pub use manager::{quote_identifier, validate_identifier, DatabaseError, DatabaseManager};
pub use record::{Record, RecordError};
