use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{DownloadEvent, DownloadHub, DownloadRecord, TransferState};
use crate::domain::DownloadId;

#[derive(Error, Debug)]
pub enum HubError {
    #[error("download request failed: {0}")]
    Http(String),

    #[error("download i/o error: {0}")]
    Io(String),
}

/// Download subsystem backed by direct HTTP transfers to the local
/// filesystem. Each transfer runs on its own task; lifecycle is reported
/// through the event stream, never by mutating shared engine state.
pub struct FsDownloadHub {
    client: Client,
    next_id: DownloadId,
    records: Arc<Mutex<HashMap<DownloadId, DownloadRecord>>>,
    events_tx: mpsc::UnboundedSender<DownloadEvent>,
    events_rx: mpsc::UnboundedReceiver<DownloadEvent>,
}

impl FsDownloadHub {
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            client: Client::new(),
            next_id: 0,
            records: Arc::new(Mutex::new(HashMap::new())),
            events_tx,
            events_rx,
        }
    }
}

impl Default for FsDownloadHub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DownloadHub for FsDownloadHub {
    async fn start_download(
        &mut self,
        url: &str,
        destination: &Path,
    ) -> Result<DownloadId, HubError> {
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| HubError::Io(e.to_string()))?;
        }

        self.next_id += 1;
        let id = self.next_id;
        let filename = destination
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unknown".to_string());

        self.records.lock().unwrap().insert(
            id,
            DownloadRecord {
                path: destination.to_path_buf(),
                filename: filename.clone(),
                filesize: None,
                mime: mime_for(&filename).to_string(),
                exists: false,
            },
        );
        let _ = self.events_tx.send(DownloadEvent::Created {
            id,
            filename,
            url: url.to_string(),
        });

        let client = self.client.clone();
        let records = self.records.clone();
        let events = self.events_tx.clone();
        let url = url.to_string();
        let destination = destination.to_path_buf();
        tokio::spawn(async move {
            let state = match stream_to_file(&client, &url, &destination).await {
                Ok(written) => {
                    debug!("download {} complete, {} bytes", id, written);
                    if let Some(record) = records.lock().unwrap().get_mut(&id) {
                        record.filesize = Some(written);
                        record.exists = true;
                    }
                    TransferState::Complete
                }
                Err(e) => {
                    warn!("download {} interrupted: {}", id, e);
                    let _ = tokio::fs::remove_file(&destination).await;
                    TransferState::Interrupted
                }
            };
            let _ = events.send(DownloadEvent::StateChanged { id, state });
        });

        Ok(id)
    }

    async fn next_event(&mut self) -> Option<DownloadEvent> {
        self.events_rx.recv().await
    }

    async fn search(&self, id: DownloadId) -> Option<DownloadRecord> {
        self.records.lock().unwrap().get(&id).cloned()
    }

    async fn remove_file(&mut self, id: DownloadId) -> Result<(), HubError> {
        let path = self
            .records
            .lock()
            .unwrap()
            .get(&id)
            .map(|record| record.path.clone());
        if let Some(path) = path {
            tokio::fs::remove_file(&path)
                .await
                .map_err(|e| HubError::Io(e.to_string()))?;
            if let Some(record) = self.records.lock().unwrap().get_mut(&id) {
                record.exists = false;
            }
        }
        Ok(())
    }

    async fn erase_record(&mut self, id: DownloadId) {
        self.records.lock().unwrap().remove(&id);
    }
}

async fn stream_to_file(client: &Client, url: &str, destination: &PathBuf) -> Result<u64, HubError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| HubError::Http(e.to_string()))?
        .error_for_status()
        .map_err(|e| HubError::Http(e.to_string()))?;

    let mut file = tokio::fs::File::create(destination)
        .await
        .map_err(|e| HubError::Io(e.to_string()))?;

    let mut stream = response.bytes_stream();
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| HubError::Http(e.to_string()))?;
        file.write_all(&chunk)
            .await
            .map_err(|e| HubError::Io(e.to_string()))?;
        written += chunk.len() as u64;
    }

    file.sync_all()
        .await
        .map_err(|e| HubError::Io(e.to_string()))?;
    Ok(written)
}

fn mime_for(filename: &str) -> &'static str {
    match Path::new(filename).extension().and_then(|e| e.to_str()) {
        Some("csv") => "text/csv",
        Some("tsv") => "text/tab-separated-values",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn drain_until_terminal(hub: &mut FsDownloadHub, id: DownloadId) -> TransferState {
        loop {
            match hub.next_event().await.expect("event stream closed") {
                DownloadEvent::StateChanged { id: seen, state } if seen == id => return state,
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn download_streams_body_to_destination() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/export/stock")
            .with_status(200)
            .with_body("sku,qty\nA100,4\n")
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("session-1-stock.csv");
        let mut hub = FsDownloadHub::new();

        let url = format!("{}/export/stock", server.url());
        let id = hub.start_download(&url, &dest).await.unwrap();

        // Created is emitted before the transfer settles.
        match hub.next_event().await.unwrap() {
            DownloadEvent::Created { id: seen, filename, .. } => {
                assert_eq!(seen, id);
                assert_eq!(filename, "session-1-stock.csv");
            }
            other => panic!("expected Created, got {:?}", other),
        }

        assert_eq!(drain_until_terminal(&mut hub, id).await, TransferState::Complete);
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "sku,qty\nA100,4\n");

        let record = hub.search(id).await.unwrap();
        assert_eq!(record.filesize, Some(15));
        assert!(record.exists);
        assert_eq!(record.mime, "text/csv");
    }

    #[tokio::test]
    async fn failed_download_reports_interrupted_and_leaves_no_file() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/export/stock")
            .with_status(500)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("session-2-stock.csv");
        let mut hub = FsDownloadHub::new();

        let url = format!("{}/export/stock", server.url());
        let id = hub.start_download(&url, &dest).await.unwrap();

        assert_eq!(
            drain_until_terminal(&mut hub, id).await,
            TransferState::Interrupted
        );
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn remove_file_and_erase_record_forget_the_download() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/export/pricing")
            .with_status(200)
            .with_body("sku,price\n")
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("session-3-pricing.csv");
        let mut hub = FsDownloadHub::new();

        let url = format!("{}/export/pricing", server.url());
        let id = hub.start_download(&url, &dest).await.unwrap();
        drain_until_terminal(&mut hub, id).await;

        hub.remove_file(id).await.unwrap();
        assert!(!dest.exists());

        hub.erase_record(id).await;
        assert!(hub.search(id).await.is_none());
    }
}
