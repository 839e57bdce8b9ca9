use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::api::{DownloadEvent, DownloadHub, TransferState};
use crate::domain::DownloadId;

/// What the tracker tells its subscriber after folding one event.
#[derive(Debug, Clone)]
pub enum TrackerReport {
    Started {
        id: DownloadId,
        filename: String,
    },
    Completed {
        id: DownloadId,
        filename: String,
        filepath: Option<std::path::PathBuf>,
        filesize: Option<u64>,
        duration: Duration,
    },
    Failed {
        id: DownloadId,
        filename: String,
        error: String,
    },
}

#[derive(Debug)]
struct InFlight {
    started_at: Instant,
    filename: String,
}

/// Folds download-subsystem events into per-transfer state. Owns the
/// handle map exclusively; event sources never touch it directly. An
/// interrupted transfer is terminal here — re-issuing a fresh download
/// for the target is the workflow's decision.
#[derive(Debug, Default)]
pub struct DownloadTracker {
    inflight: HashMap<DownloadId, InFlight>,
}

impl DownloadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event. Events for unknown handles are ignored; a repeated
    /// Created for a known handle does not reset its start time.
    pub async fn on_event<H: DownloadHub>(
        &mut self,
        event: DownloadEvent,
        hub: &H,
    ) -> Option<TrackerReport> {
        match event {
            DownloadEvent::Created { id, filename, .. } => {
                if self.inflight.contains_key(&id) {
                    return None;
                }
                self.inflight.insert(
                    id,
                    InFlight {
                        started_at: Instant::now(),
                        filename: filename.clone(),
                    },
                );
                Some(TrackerReport::Started { id, filename })
            }
            DownloadEvent::StateChanged { id, state } => match state {
                TransferState::InProgress => None,
                TransferState::Complete => {
                    let entry = self.inflight.remove(&id)?;
                    let duration = entry.started_at.elapsed();
                    let record = hub.search(id).await;
                    let (filepath, filesize, filename) = match record {
                        Some(record) => {
                            debug!(
                                "{}: {} byte(s), {}",
                                record.filename,
                                record.filesize.unwrap_or(0),
                                record.mime
                            );
                            (Some(record.path), record.filesize, record.filename)
                        }
                        None => {
                            debug!("no metadata for completed download {}", id);
                            (None, None, entry.filename)
                        }
                    };
                    Some(TrackerReport::Completed {
                        id,
                        filename,
                        filepath,
                        filesize,
                        duration,
                    })
                }
                TransferState::Interrupted => {
                    let entry = self.inflight.remove(&id)?;
                    Some(TrackerReport::Failed {
                        id,
                        filename: entry.filename,
                        error: "download was interrupted".to_string(),
                    })
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};

    use async_trait::async_trait;

    use crate::api::{DownloadRecord, HubError};

    struct StubHub {
        record: Option<DownloadRecord>,
    }

    #[async_trait]
    impl DownloadHub for StubHub {
        async fn start_download(
            &mut self,
            _url: &str,
            _destination: &Path,
        ) -> Result<DownloadId, HubError> {
            unimplemented!("not used by tracker tests")
        }

        async fn next_event(&mut self) -> Option<DownloadEvent> {
            None
        }

        async fn search(&self, _id: DownloadId) -> Option<DownloadRecord> {
            self.record.clone()
        }

        async fn remove_file(&mut self, _id: DownloadId) -> Result<(), HubError> {
            Ok(())
        }

        async fn erase_record(&mut self, _id: DownloadId) {}
    }

    fn created(id: DownloadId) -> DownloadEvent {
        DownloadEvent::Created {
            id,
            filename: format!("session-1-target-{}.csv", id),
            url: "https://portal.example.com/export".to_string(),
        }
    }

    #[tokio::test]
    async fn complete_event_yields_duration_and_metadata() {
        let hub = StubHub {
            record: Some(DownloadRecord {
                path: PathBuf::from("/tmp/session-1-target-7.csv"),
                filename: "session-1-target-7.csv".to_string(),
                filesize: Some(2048),
                mime: "text/csv".to_string(),
                exists: true,
            }),
        };
        let mut tracker = DownloadTracker::new();

        assert!(matches!(
            tracker.on_event(created(7), &hub).await,
            Some(TrackerReport::Started { id: 7, .. })
        ));
        assert_eq!(tracker.inflight.len(), 1);

        let report = tracker
            .on_event(
                DownloadEvent::StateChanged {
                    id: 7,
                    state: TransferState::Complete,
                },
                &hub,
            )
            .await
            .unwrap();

        match report {
            TrackerReport::Completed {
                filesize, filepath, ..
            } => {
                assert_eq!(filesize, Some(2048));
                assert!(filepath.is_some());
            }
            other => panic!("expected Completed, got {:?}", other),
        }
        assert_eq!(tracker.inflight.len(), 0);
    }

    #[tokio::test]
    async fn interrupted_event_is_terminal_with_fixed_error() {
        let hub = StubHub { record: None };
        let mut tracker = DownloadTracker::new();
        tracker.on_event(created(3), &hub).await;

        let report = tracker
            .on_event(
                DownloadEvent::StateChanged {
                    id: 3,
                    state: TransferState::Interrupted,
                },
                &hub,
            )
            .await
            .unwrap();

        match report {
            TrackerReport::Failed { error, .. } => {
                assert_eq!(error, "download was interrupted");
            }
            other => panic!("expected Failed, got {:?}", other),
        }
        assert_eq!(tracker.inflight.len(), 0);
    }

    #[tokio::test]
    async fn events_for_unknown_handles_are_ignored() {
        let hub = StubHub { record: None };
        let mut tracker = DownloadTracker::new();

        let report = tracker
            .on_event(
                DownloadEvent::StateChanged {
                    id: 99,
                    state: TransferState::Complete,
                },
                &hub,
            )
            .await;
        assert!(report.is_none());
    }

    #[tokio::test]
    async fn duplicate_created_does_not_reset_tracking() {
        let hub = StubHub { record: None };
        let mut tracker = DownloadTracker::new();

        assert!(tracker.on_event(created(1), &hub).await.is_some());
        assert!(tracker.on_event(created(1), &hub).await.is_none());
        assert_eq!(tracker.inflight.len(), 1);
    }

    #[tokio::test]
    async fn progress_events_are_folded_silently() {
        let hub = StubHub { record: None };
        let mut tracker = DownloadTracker::new();
        tracker.on_event(created(4), &hub).await;

        let report = tracker
            .on_event(
                DownloadEvent::StateChanged {
                    id: 4,
                    state: TransferState::InProgress,
                },
                &hub,
            )
            .await;
        assert!(report.is_none());
        assert_eq!(tracker.inflight.len(), 1);
    }
}
