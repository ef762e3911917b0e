// tasklist - Single-user task list with key-value persistence and JSON import/export

pub mod config;
pub mod error;
pub mod filter;
pub mod kv;
pub mod models;
pub mod snapshot;
pub mod store;
pub mod transfer;

// Re-export main types for convenience
pub use config::Config;
pub use error::{Result, TaskError};
pub use filter::TaskFilter;
pub use kv::{FileKv, KeyValueStore, MemoryKv, SqliteKv};
pub use models::{Clock, CounterSummary, SystemClock, Task};
pub use store::{DEFAULT_STORAGE_KEY, ImportPreview, LoadReport, NoticeLevel, StoreEvent, TaskStore};
