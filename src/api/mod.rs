use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;

use crate::domain::{DownloadId, LoginCredentials, SignedHeaders, SyncCategory, SystemMessage};

pub mod bridge;
pub mod downloads;
pub mod picker;
pub mod store;
pub mod sync;

pub use bridge::{BridgeClient, BridgeError};
pub use downloads::{FsDownloadHub, HubError};
pub use picker::FolderPicker;
pub use store::{HttpObjectStore, StoreError, StoreResponse};
pub use sync::{SyncClient, SyncError};

/// Observed state of the remote page, as reported by the page agent.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageState {
    pub url: String,
    pub on_listing_page: bool,
    pub is_authenticated: bool,
    pub challenge_present: bool,
    #[serde(default)]
    pub has_export_link: bool,
}

/// Inspection of the remote page context. All methods observe or poke the
/// live page; none of them block on navigation settling.
#[async_trait]
pub trait PageProbe {
    async fn page_state(&self) -> Result<PageState, BridgeError>;
    async fn export_url(&self, locator: &str) -> Result<String, BridgeError>;
    async fn click_export(&self, locator: &str) -> Result<(), BridgeError>;
    /// Fire-and-forget: the submission outcome is observed by polling
    /// `page_state` afterwards.
    async fn submit_credentials(&self, credentials: &LoginCredentials) -> Result<(), BridgeError>;
}

/// Drives the remote page to another URL.
#[async_trait]
pub trait Navigator {
    async fn navigate_to(&self, url: &str) -> Result<(), BridgeError>;
    async fn navigate_to_listing(&self) -> Result<(), BridgeError>;
    async fn navigate_to_login(
        &self,
        auto_submit: bool,
        credentials: Option<&LoginCredentials>,
    ) -> Result<(), BridgeError>;
}

/// Lifecycle state reported for one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    InProgress,
    Complete,
    Interrupted,
}

/// Events emitted by the download subsystem.
#[derive(Debug, Clone)]
pub enum DownloadEvent {
    Created {
        id: DownloadId,
        filename: String,
        url: String,
    },
    StateChanged {
        id: DownloadId,
        state: TransferState,
    },
}

/// Metadata held by the download subsystem for one transfer.
#[derive(Debug, Clone)]
pub struct DownloadRecord {
    pub path: PathBuf,
    pub filename: String,
    pub filesize: Option<u64>,
    pub mime: String,
    pub exists: bool,
}

/// The download subsystem: starts transfers to local storage and reports
/// their lifecycle as events.
#[async_trait]
pub trait DownloadHub {
    async fn start_download(&mut self, url: &str, destination: &Path)
        -> Result<DownloadId, HubError>;
    /// Next lifecycle event, or None once the event stream is closed.
    async fn next_event(&mut self) -> Option<DownloadEvent>;
    async fn search(&self, id: DownloadId) -> Option<DownloadRecord>;
    async fn remove_file(&mut self, id: DownloadId) -> Result<(), HubError>;
    async fn erase_record(&mut self, id: DownloadId);
}

/// The privileged, user-gesture-gated directory selection. Returns the
/// session's files as name -> content, or None if the user cancelled.
#[async_trait]
pub trait SessionFilePicker {
    async fn pick_session_files(&self, session_id: &str) -> Option<HashMap<String, Vec<u8>>>;
}

/// One PUT against the remote object store. The endpoint is derived
/// deterministically from bucket, region and key.
#[async_trait]
pub trait ObjectStore {
    async fn put_object(
        &self,
        bucket: &str,
        region: &str,
        key: &str,
        body: Bytes,
        headers: &SignedHeaders,
    ) -> Result<StoreResponse, StoreError>;
}

/// The remote sync-trigger API.
#[async_trait]
pub trait SyncApi {
    async fn trigger(&self, category: SyncCategory) -> Result<(), SyncError>;
    async fn system_messages(
        &self,
        category: SyncCategory,
    ) -> Result<Vec<SystemMessage>, SyncError>;
}
