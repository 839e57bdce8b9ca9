use thiserror::Error;

/// Everything that can go wrong across a batch run. Per-target and
/// per-upload failures are recorded on the affected item and surfaced as
/// events; only run-level conditions propagate out of the engine.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("anti-automation challenge detected, manual resolution required")]
    ChallengeDetected,

    #[error("login not confirmed within the polling window")]
    AuthTimeout,

    #[error("auto-login is not configured, manual sign-in required")]
    ManualAuthRequired,

    #[error("no download targets enabled")]
    NoTargetsEnabled,

    #[error("{target}: download did not start in time")]
    DownloadTimeout { target: String },

    #[error("{target}: download was interrupted")]
    DownloadInterrupted { target: String },

    #[error("{target}: no file matched session prefix (discovered: {discovered:?})")]
    FileNotFound {
        target: String,
        discovered: Vec<String>,
    },

    #[error("{0}: file content is empty (0 bytes)")]
    EmptyPayload(String),

    #[error("upload transport error: {0}")]
    UploadTransport(String),

    #[error("upload rejected: {status} {body}")]
    UploadRejected { status: u16, body: String },

    #[error("sync is rate limited for {remaining_secs} more second(s)")]
    RateLimited { remaining_secs: u64 },

    #[error("cannot sync while a download or upload batch is in progress")]
    BatchInProgress,

    #[error("i/o error: {0}")]
    Io(String),
}
