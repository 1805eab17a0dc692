pub mod kv_store;
pub mod migrations;
pub mod record_store;

pub use kv_store::{KeyValueStore, MemoryKvStore, SqliteKvStore};
pub use record_store::{CleanupReport, RecordStore};
