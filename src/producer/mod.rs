pub mod runner;
pub mod supervisor;
pub mod uploader;

pub use runner::{ProducerError, ProducerRunner};
pub use supervisor::{IngestSupervisor, PathLocks, SupervisorError};
pub use uploader::{
    BatchUploader, MalformedAction, PassFailure, PassOutcome, RetryPolicy, UploadError,
    UploadReport,
};
