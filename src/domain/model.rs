use std::fmt;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::{sanitize_filename, session_id};

/// Handle assigned by the download subsystem to one transfer.
pub type DownloadId = u64;

/// One configured export: where to find the link on the listing page and
/// where the produced file should end up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadTarget {
    pub id: String,
    pub name: String,
    pub locator: String,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_key: Option<String>,
}

/// The built-in export targets. Stored targets are merged over these so
/// fields added later (like `remote_key`) keep their defaults.
pub fn default_targets() -> Vec<DownloadTarget> {
    vec![
        DownloadTarget {
            id: "stock".to_string(),
            name: "Stock Qtys".to_string(),
            locator: "#maincontent > div.columns > div.column.main > table > tbody > tr:nth-child(11) > td:nth-child(4) > a".to_string(),
            enabled: true,
            filename: Some("stock.csv".to_string()),
            remote_key: Some("stock.csv".to_string()),
        },
        DownloadTarget {
            id: "pricing".to_string(),
            name: "Pricing".to_string(),
            locator: "#maincontent > div.columns > div.column.main > table > tbody > tr:nth-child(13) > td:nth-child(4) > a".to_string(),
            enabled: true,
            filename: Some("pricing.csv".to_string()),
            remote_key: Some("pricing.csv".to_string()),
        },
        DownloadTarget {
            id: "products".to_string(),
            name: "Products".to_string(),
            locator: "#maincontent > div.columns > div.column.main > table > tbody > tr:nth-child(2) > td:nth-child(4) > a".to_string(),
            enabled: true,
            filename: Some("products.csv".to_string()),
            remote_key: Some("products.csv".to_string()),
        },
    ]
}

/// One batch run. Every file the batch produces carries the session id as
/// a filename prefix, which is what lets a later directory scan separate
/// this run's files from leftovers of earlier ones.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
}

impl Session {
    pub fn begin() -> Self {
        Self { id: session_id() }
    }

    /// Deterministic filename for a target: `{session}-{target}.{ext}`.
    pub fn filename_for(&self, target: &DownloadTarget) -> String {
        let ext = target
            .filename
            .as_deref()
            .and_then(|f| Path::new(f).extension().and_then(|e| e.to_str()))
            .unwrap_or("csv");
        sanitize_filename(&format!("{}-{}.{}", self.id, target.id, ext))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStatus {
    Pending,
    Downloading,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStatus {
    Pending,
    Uploading,
    Uploaded,
    Failed,
}

/// Per-target runtime record for one session. Status moves forward only,
/// except the upload side which may cycle back to pending on retry.
#[derive(Debug, Clone)]
pub struct TrackedDownload {
    pub target_id: String,
    pub target_name: String,
    pub download_id: Option<DownloadId>,
    pub filename: String,
    pub status: DownloadStatus,
    pub filesize: Option<u64>,
    pub duration: Option<Duration>,
    pub error: Option<String>,
    pub upload_status: Option<UploadStatus>,
    pub remote_url: Option<String>,
    pub session_id: String,
}

impl TrackedDownload {
    pub fn pending(target: &DownloadTarget, session: &Session) -> Self {
        Self {
            target_id: target.id.clone(),
            target_name: target.name.clone(),
            download_id: None,
            filename: session.filename_for(target),
            status: DownloadStatus::Pending,
            filesize: None,
            duration: None,
            error: None,
            upload_status: None,
            remote_url: None,
            session_id: session.id.clone(),
        }
    }

}

/// Sign-in credentials for the gated source. Debug output never shows the
/// password.
#[derive(Clone)]
pub struct LoginCredentials {
    pub email: String,
    pub password: String,
}

impl fmt::Debug for LoginCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginCredentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Object-store credentials and placement.
#[derive(Clone)]
pub struct StoreCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
    pub bucket: String,
}

impl StoreCredentials {
    /// Whether enough is configured to attempt uploads at all.
    pub fn is_complete(&self) -> bool {
        !self.bucket.is_empty() && !self.access_key_id.is_empty() && !self.secret_access_key.is_empty()
    }
}

impl fmt::Debug for StoreCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .finish()
    }
}

/// Header set authorizing a single signed PUT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub authorization: String,
    pub content_type: String,
    pub content_sha256: String,
    pub amz_date: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncCategory {
    Stock,
    Pricing,
}

impl SyncCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncCategory::Stock => "stock",
            SyncCategory::Pricing => "pricing",
        }
    }
}

impl fmt::Display for SyncCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which sync categories are enabled. At least one must stay on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    pub stock: bool,
    pub pricing: bool,
}

impl SyncOptions {
    /// Both toggles off is not a meaningful state; fall back to stock-only.
    pub fn normalized(self) -> Self {
        if !self.stock && !self.pricing {
            Self { stock: true, pricing: false }
        } else {
            self
        }
    }
}

/// One operator-facing message from the sync API.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemMessage {
    pub id: String,
    pub message: String,
    pub category: String,
    pub created_at: DateTime<Utc>,
}

/// Where the engine currently is. Emitted on the event channel at every
/// transition so a front-end can render progress without polling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Idle,
    CheckingPage,
    Navigating,
    Authenticating,
    Downloading { index: usize, total: usize },
    AwaitingReconciliation,
    AwaitingUpload,
    Uploading,
    Done,
    Failed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_filename_uses_target_extension() {
        let session = Session {
            id: "session-1-abc".to_string(),
        };
        let mut target = default_targets().remove(0);
        assert_eq!(session.filename_for(&target), "session-1-abc-stock.csv");

        target.filename = Some("stock.tsv".to_string());
        assert_eq!(session.filename_for(&target), "session-1-abc-stock.tsv");

        target.filename = None;
        assert_eq!(session.filename_for(&target), "session-1-abc-stock.csv");
    }

    #[test]
    fn sync_options_normalize_to_stock_only() {
        let both_off = SyncOptions { stock: false, pricing: false }.normalized();
        assert_eq!(both_off, SyncOptions { stock: true, pricing: false });

        let pricing_only = SyncOptions { stock: false, pricing: true }.normalized();
        assert_eq!(pricing_only, SyncOptions { stock: false, pricing: true });
    }

    #[test]
    fn credentials_debug_redacts_secrets() {
        let login = LoginCredentials {
            email: "ops@example.com".to_string(),
            password: "hunter2".to_string(),
        };
        let rendered = format!("{:?}", login);
        assert!(rendered.contains("ops@example.com"));
        assert!(!rendered.contains("hunter2"));

        let store = StoreCredentials {
            access_key_id: "AKIDEXAMPLE".to_string(),
            secret_access_key: "sekrit".to_string(),
            region: "us-east-1".to_string(),
            bucket: "exports".to_string(),
        };
        let rendered = format!("{:?}", store);
        assert!(!rendered.contains("sekrit"));
    }
}
