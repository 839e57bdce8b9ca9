pub mod error;
pub mod model;

pub use error::WorkflowError;
pub use model::{
    default_targets, DownloadId, DownloadStatus, DownloadTarget, LoginCredentials, Phase, Session,
    SignedHeaders, StoreCredentials, SyncCategory, SyncOptions, SystemMessage, TrackedDownload,
    UploadStatus,
};
