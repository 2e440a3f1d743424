pub mod api;
pub mod runner;
pub mod server;
pub mod service;
pub mod storage;

pub use runner::{CollectorError, CollectorRunner};
pub use service::CollectorService;
pub use storage::{PartitionStore, StorageError};
