use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use regex::Regex;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::api::{
    DownloadHub, Navigator, ObjectStore, PageProbe, PageState, SessionFilePicker,
};
use crate::application::matcher::{match_files, ExpectedTarget};
use crate::application::tracker::{DownloadTracker, TrackerReport};
use crate::application::uploader::Uploader;
use crate::domain::{
    DownloadId, DownloadStatus, DownloadTarget, LoginCredentials, Phase, Session,
    StoreCredentials, TrackedDownload, UploadStatus, WorkflowError,
};

/// Waits and ceilings for the cooperative workflow. Defaults reproduce the
/// production cadence; tests shrink them.
#[derive(Debug, Clone)]
pub struct Timings {
    /// Settle after steering the page somewhere new.
    pub navigation_settle: Duration,
    /// Settle after submitting credentials, before polling begins.
    pub auth_settle: Duration,
    pub auth_poll_interval: Duration,
    pub auth_poll_attempts: u32,
    /// Ceiling on waiting for a download-created event.
    pub created_wait: Duration,
    /// Pause between targets, to stay under the source's radar.
    pub inter_target_delay: Duration,
    /// Pause after a target fails before moving on.
    pub failure_cooldown: Duration,
    pub upload_retry_pause: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            navigation_settle: Duration::from_secs(3),
            auth_settle: Duration::from_secs(3),
            auth_poll_interval: Duration::from_secs(1),
            auth_poll_attempts: 20,
            created_wait: Duration::from_secs(5),
            inter_target_delay: Duration::from_secs(3),
            failure_cooldown: Duration::from_secs(1),
            upload_retry_pause: Duration::from_secs(2),
        }
    }
}

#[derive(Debug)]
pub struct EngineConfig {
    pub output_folder: PathBuf,
    pub auto_login: bool,
    pub login: Option<LoginCredentials>,
    /// URL patterns that, off the login page, confirm a successful login.
    pub login_success_patterns: Vec<Regex>,
    pub store: StoreCredentials,
    /// Ceiling on pick-and-upload passes before the run gives up.
    pub max_upload_passes: u32,
    pub timings: Timings,
}

/// State transitions and per-item outcomes, emitted on the event channel
/// so any front-end can observe the run without the engine knowing about
/// rendering.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Phase(Phase),
    TargetStarted {
        target_id: String,
        name: String,
    },
    TargetCompleted {
        target_id: String,
        name: String,
        filesize: Option<u64>,
        duration: Duration,
    },
    TargetFailed {
        target_id: String,
        name: String,
        error: String,
    },
    FileDiscarded {
        target_id: String,
        filename: String,
    },
    UploadQueued {
        target_id: String,
        remote_key: String,
    },
    UploadStarted {
        target_id: String,
    },
    Uploaded {
        target_id: String,
        url: String,
    },
    UploadFailed {
        target_id: String,
        error: String,
    },
    PickerCancelled,
    SessionCleaned {
        session_id: String,
    },
    BatchFinished {
        uploaded: usize,
        failed: usize,
        pending_uploads: usize,
    },
}

/// Summary of one batch run.
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub session_id: String,
    pub completed: usize,
    pub failed: usize,
    pub uploaded: usize,
    pub discarded: usize,
    pub pending_uploads: usize,
}

#[derive(Debug, Clone)]
struct PendingUpload {
    target_id: String,
    target_name: String,
    download_id: DownloadId,
    filename: String,
    remote_key: String,
}

enum Terminal {
    Completed {
        filesize: Option<u64>,
        duration: Duration,
    },
    Failed,
}

/// The batch orchestrator: sequences navigation, authentication, the
/// sequential per-target download loop, reconciliation and the signed
/// upload phase. One engine drives one batch at a time; all shared state
/// (tracked downloads, the upload queue) is owned here exclusively.
pub struct WorkflowEngine<P, N, H, S> {
    probe: P,
    nav: N,
    hub: H,
    uploader: Uploader<S>,
    config: EngineConfig,
    targets: Vec<DownloadTarget>,
    session_targets: Vec<DownloadTarget>,
    tracker: DownloadTracker,
    downloads: Vec<TrackedDownload>,
    pending_uploads: Vec<PendingUpload>,
    phase: Phase,
    events: UnboundedSender<EngineEvent>,
}

impl<P, N, H, S> WorkflowEngine<P, N, H, S>
where
    P: PageProbe,
    N: Navigator,
    H: DownloadHub,
    S: ObjectStore,
{
    pub fn new(
        probe: P,
        nav: N,
        hub: H,
        uploader: Uploader<S>,
        config: EngineConfig,
        targets: Vec<DownloadTarget>,
        events: UnboundedSender<EngineEvent>,
    ) -> Self {
        Self {
            probe,
            nav,
            hub,
            uploader,
            config,
            targets,
            session_targets: Vec::new(),
            tracker: DownloadTracker::new(),
            downloads: Vec::new(),
            pending_uploads: Vec::new(),
            phase: Phase::Idle,
            events,
        }
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn downloads(&self) -> &[TrackedDownload] {
        &self.downloads
    }

    /// Drive one full batch. Failed targets never abort the run; only
    /// run-level conditions (navigation, challenge, auth) do.
    pub async fn run<F: SessionFilePicker>(
        &mut self,
        picker: &F,
    ) -> Result<BatchReport, WorkflowError> {
        let result = self.run_inner(picker).await;
        match &result {
            Ok(report) => self.emit(EngineEvent::BatchFinished {
                uploaded: report.uploaded,
                failed: report.failed,
                pending_uploads: report.pending_uploads,
            }),
            Err(err) => self.set_phase(Phase::Failed(err.to_string())),
        }
        result
    }

    async fn run_inner<F: SessionFilePicker>(
        &mut self,
        picker: &F,
    ) -> Result<BatchReport, WorkflowError> {
        let state = self.ensure_listing_page().await?;
        self.ensure_authenticated(&state).await?;

        let session = self.begin_session()?;
        self.run_downloads(&session).await;
        self.reconcile().await;
        self.process_uploads(picker, &session).await;

        Ok(self.report())
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }

    fn set_phase(&mut self, phase: Phase) {
        if self.phase != phase {
            debug!("phase: {:?} -> {:?}", self.phase, phase);
            self.phase = phase.clone();
            self.emit(EngineEvent::Phase(phase));
        }
    }

    // --- page and authentication -----------------------------------------

    async fn ensure_listing_page(&mut self) -> Result<PageState, WorkflowError> {
        self.set_phase(Phase::CheckingPage);
        let state = match self.probe.page_state().await {
            Ok(state) => state,
            Err(e) => {
                debug!("page state unavailable ({}), navigating to listing", e);
                self.navigate_to_listing_and_check().await?
            }
        };

        if state.challenge_present {
            return Err(WorkflowError::ChallengeDetected);
        }
        if state.on_listing_page {
            return Ok(state);
        }

        let state = self.navigate_to_listing_and_check().await?;
        if state.challenge_present {
            return Err(WorkflowError::ChallengeDetected);
        }
        if !state.on_listing_page {
            return Err(WorkflowError::Navigation(
                "could not reach the export listing page".to_string(),
            ));
        }
        Ok(state)
    }

    async fn navigate_to_listing_and_check(&mut self) -> Result<PageState, WorkflowError> {
        self.set_phase(Phase::Navigating);
        self.nav
            .navigate_to_listing()
            .await
            .map_err(|e| WorkflowError::Navigation(e.to_string()))?;
        sleep(self.config.timings.navigation_settle).await;
        self.set_phase(Phase::CheckingPage);
        self.probe
            .page_state()
            .await
            .map_err(|e| WorkflowError::Navigation(e.to_string()))
    }

    async fn ensure_authenticated(&mut self, state: &PageState) -> Result<(), WorkflowError> {
        if state.is_authenticated {
            return Ok(());
        }
        self.set_phase(Phase::Authenticating);

        let credentials = if self.config.auto_login {
            self.config.login.clone()
        } else {
            None
        };
        let Some(credentials) = credentials else {
            // Leave the operator on the login page and hand the run back.
            let _ = self.nav.navigate_to_login(false, None).await;
            return Err(WorkflowError::ManualAuthRequired);
        };

        info!("not signed in, submitting stored credentials");
        self.nav
            .navigate_to_login(true, Some(&credentials))
            .await
            .map_err(|e| WorkflowError::Navigation(e.to_string()))?;
        self.wait_for_login().await?;

        info!("login confirmed, returning to listing page");
        let state = self.navigate_to_listing_and_check().await?;
        if state.challenge_present {
            return Err(WorkflowError::ChallengeDetected);
        }
        if !state.is_authenticated {
            return Err(WorkflowError::AuthTimeout);
        }
        Ok(())
    }

    /// Poll for either success signal: the page reports a signed-in
    /// session, or the URL moved to a known post-login pattern while off
    /// the login page. Either alone suffices.
    async fn wait_for_login(&mut self) -> Result<(), WorkflowError> {
        sleep(self.config.timings.auth_settle).await;
        for attempt in 0..self.config.timings.auth_poll_attempts {
            sleep(self.config.timings.auth_poll_interval).await;
            let state = match self.probe.page_state().await {
                Ok(state) => state,
                Err(_) => continue,
            };
            if state.is_authenticated {
                return Ok(());
            }
            let on_login_page = state.url.contains("login");
            if !on_login_page
                && self
                    .config
                    .login_success_patterns
                    .iter()
                    .any(|pattern| pattern.is_match(&state.url))
            {
                return Ok(());
            }
            if on_login_page && attempt > 0 && attempt % 5 == 0 {
                debug!("still on login page after {} poll(s)", attempt);
            }
        }
        Err(WorkflowError::AuthTimeout)
    }

    // --- downloads --------------------------------------------------------

    fn begin_session(&mut self) -> Result<Session, WorkflowError> {
        let enabled: Vec<DownloadTarget> =
            self.targets.iter().filter(|t| t.enabled).cloned().collect();
        if enabled.is_empty() {
            return Err(WorkflowError::NoTargetsEnabled);
        }
        let session = Session::begin();
        info!(
            "session {} started with {} target(s)",
            session.id,
            enabled.len()
        );
        self.downloads = enabled
            .iter()
            .map(|target| TrackedDownload::pending(target, &session))
            .collect();
        self.session_targets = enabled;
        self.pending_uploads.clear();
        Ok(session)
    }

    async fn run_downloads(&mut self, session: &Session) {
        let targets = self.session_targets.clone();
        let total = targets.len();
        for (index, target) in targets.iter().enumerate() {
            self.set_phase(Phase::Downloading {
                index: index + 1,
                total,
            });
            match self.download_one(index, target, session).await {
                Ok(()) => {
                    if index + 1 < total {
                        sleep(self.config.timings.inter_target_delay).await;
                    }
                }
                Err(err) => {
                    warn!("{}", err);
                    self.downloads[index].status = DownloadStatus::Failed;
                    self.downloads[index].error = Some(err.to_string());
                    self.emit(EngineEvent::TargetFailed {
                        target_id: target.id.clone(),
                        name: target.name.clone(),
                        error: err.to_string(),
                    });
                    sleep(self.config.timings.failure_cooldown).await;
                }
            }
        }
    }

    async fn download_one(
        &mut self,
        index: usize,
        target: &DownloadTarget,
        session: &Session,
    ) -> Result<(), WorkflowError> {
        let filename = session.filename_for(target);
        let destination = self.config.output_folder.join(&filename);

        let id = match self.probe.export_url(&target.locator).await {
            Ok(url) => self
                .hub
                .start_download(&url, &destination)
                .await
                .map_err(|e| WorkflowError::Io(e.to_string()))?,
            Err(e) => {
                debug!("{}: no export url ({}), falling back to click", target.name, e);
                self.probe
                    .click_export(&target.locator)
                    .await
                    .map_err(|e| WorkflowError::Navigation(e.to_string()))?;
                let (id, actual_name) =
                    self.wait_for_created()
                        .await
                        .ok_or_else(|| WorkflowError::DownloadTimeout {
                            target: target.name.clone(),
                        })?;
                self.downloads[index].filename = actual_name;
                id
            }
        };

        self.downloads[index].download_id = Some(id);
        self.downloads[index].status = DownloadStatus::Downloading;
        self.emit(EngineEvent::TargetStarted {
            target_id: target.id.clone(),
            name: target.name.clone(),
        });

        match self.wait_for_terminal(id).await {
            Terminal::Completed { filesize, duration } => {
                let download = &mut self.downloads[index];
                download.status = DownloadStatus::Completed;
                download.filesize = filesize;
                download.duration = Some(duration);
                info!(
                    "{}: download completed in {:?}",
                    target.name, duration
                );
                self.emit(EngineEvent::TargetCompleted {
                    target_id: target.id.clone(),
                    name: target.name.clone(),
                    filesize,
                    duration,
                });
                Ok(())
            }
            Terminal::Failed => Err(WorkflowError::DownloadInterrupted {
                target: target.name.clone(),
            }),
        }
    }

    /// Pull one event off the download subsystem and fold it through the
    /// tracker.
    async fn pump_event(&mut self) -> Option<TrackerReport> {
        let event = self.hub.next_event().await?;
        self.tracker.on_event(event, &self.hub).await
    }

    async fn wait_for_created(&mut self) -> Option<(DownloadId, String)> {
        let wait = self.config.timings.created_wait;
        tokio::time::timeout(wait, async {
            loop {
                match self.pump_event().await {
                    Some(TrackerReport::Started { id, filename }) => return Some((id, filename)),
                    Some(_) => continue,
                    None => return None,
                }
            }
        })
        .await
        .ok()
        .flatten()
    }

    async fn wait_for_terminal(&mut self, id: DownloadId) -> Terminal {
        loop {
            match self.pump_event().await {
                Some(TrackerReport::Completed {
                    id: seen,
                    filesize,
                    duration,
                    ..
                }) if seen == id => return Terminal::Completed { filesize, duration },
                Some(TrackerReport::Failed { id: seen, .. }) if seen == id => {
                    return Terminal::Failed
                }
                Some(_) => continue,
                None => return Terminal::Failed,
            }
        }
    }

    // --- reconciliation and upload ----------------------------------------

    /// Split completed targets into delete-now (no remote key) and the
    /// upload queue (remote key plus usable store credentials).
    async fn reconcile(&mut self) {
        self.set_phase(Phase::AwaitingReconciliation);
        let store_ready = self.config.store.is_complete();

        for index in 0..self.downloads.len() {
            if self.downloads[index].status != DownloadStatus::Completed {
                continue;
            }
            let Some(id) = self.downloads[index].download_id else {
                continue;
            };
            let target_id = self.downloads[index].target_id.clone();
            let target_name = self.downloads[index].target_name.clone();
            let filename = self.downloads[index].filename.clone();

            // The file may have vanished between completion and now.
            let still_exists = self
                .hub
                .search(id)
                .await
                .map_or(false, |record| record.exists);
            if !still_exists {
                warn!("{} no longer exists on disk, skipping", filename);
                continue;
            }

            let remote_key = self
                .session_targets
                .iter()
                .find(|t| t.id == target_id)
                .and_then(|t| t.remote_key.clone())
                .filter(|key| !key.is_empty());

            match remote_key {
                Some(remote_key) if store_ready => {
                    self.downloads[index].upload_status = Some(UploadStatus::Pending);
                    self.emit(EngineEvent::UploadQueued {
                        target_id: target_id.clone(),
                        remote_key: remote_key.clone(),
                    });
                    self.pending_uploads.push(PendingUpload {
                        target_id,
                        target_name,
                        download_id: id,
                        filename,
                        remote_key,
                    });
                }
                _ => {
                    if let Err(e) = self.hub.remove_file(id).await {
                        warn!("could not delete {}: {}", filename, e);
                    }
                    self.hub.erase_record(id).await;
                    self.emit(EngineEvent::FileDiscarded {
                        target_id,
                        filename,
                    });
                }
            }
        }
    }

    /// The pick-and-upload loop. Each pass asks the picker for the
    /// session's files and uploads what matches; items that fail stay
    /// queued. Re-running a pass never touches items already uploaded, so
    /// repeated passes are idempotent. A cancelled selection consumes a
    /// pass and leaves the queue intact.
    async fn process_uploads<F: SessionFilePicker>(&mut self, picker: &F, session: &Session) {
        if self.pending_uploads.is_empty() {
            self.finish(session);
            return;
        }

        let max_passes = self.config.max_upload_passes.max(1);
        let mut passes = 0;
        while !self.pending_uploads.is_empty() && passes < max_passes {
            self.set_phase(Phase::AwaitingUpload);
            passes += 1;

            let Some(files) = picker.pick_session_files(&session.id).await else {
                info!(
                    "directory selection cancelled, {} upload(s) still queued",
                    self.pending_uploads.len()
                );
                self.emit(EngineEvent::PickerCancelled);
                continue;
            };

            self.set_phase(Phase::Uploading);
            self.upload_pass(session, &files).await;

            if !self.pending_uploads.is_empty() && passes < max_passes {
                sleep(self.config.timings.upload_retry_pause).await;
            }
        }

        if self.pending_uploads.is_empty() {
            self.finish(session);
        } else {
            warn!(
                "{} upload(s) still pending after {} pass(es)",
                self.pending_uploads.len(),
                passes
            );
            self.set_phase(Phase::AwaitingUpload);
        }
    }

    async fn upload_pass(&mut self, session: &Session, files: &HashMap<String, Vec<u8>>) {
        let expected: Vec<ExpectedTarget> = self
            .pending_uploads
            .iter()
            .map(|item| ExpectedTarget {
                target_id: item.target_id.clone(),
                filename: item.filename.clone(),
            })
            .collect();
        let outcome = match_files(&session.id, &expected, files);

        let queue = std::mem::take(&mut self.pending_uploads);
        for item in queue {
            self.set_upload_status(&item.target_id, UploadStatus::Uploading, None, None);
            self.emit(EngineEvent::UploadStarted {
                target_id: item.target_id.clone(),
            });

            let result = match outcome.matched.get(&item.target_id) {
                Some(name) => {
                    self.uploader
                        .upload(&files[name], &item.remote_key, &item.target_name)
                        .await
                }
                None => {
                    let mut discovered: Vec<String> = files.keys().cloned().collect();
                    discovered.sort_unstable();
                    Err(WorkflowError::FileNotFound {
                        target: item.target_name.clone(),
                        discovered,
                    })
                }
            };

            match result {
                Ok(object) => {
                    if let Err(e) = self.hub.remove_file(item.download_id).await {
                        warn!("could not delete {}: {}", item.filename, e);
                    }
                    self.hub.erase_record(item.download_id).await;
                    self.set_upload_status(
                        &item.target_id,
                        UploadStatus::Uploaded,
                        Some(object.url.clone()),
                        None,
                    );
                    self.emit(EngineEvent::Uploaded {
                        target_id: item.target_id.clone(),
                        url: object.url,
                    });
                }
                Err(err) => {
                    warn!("{}", err);
                    self.set_upload_status(
                        &item.target_id,
                        UploadStatus::Failed,
                        None,
                        Some(err.to_string()),
                    );
                    self.emit(EngineEvent::UploadFailed {
                        target_id: item.target_id.clone(),
                        error: err.to_string(),
                    });
                    self.pending_uploads.push(item);
                }
            }
        }
    }

    fn set_upload_status(
        &mut self,
        target_id: &str,
        status: UploadStatus,
        url: Option<String>,
        error: Option<String>,
    ) {
        if let Some(download) = self
            .downloads
            .iter_mut()
            .find(|d| d.target_id == target_id)
        {
            download.upload_status = Some(status);
            if url.is_some() {
                download.remote_url = url;
            }
            if error.is_some() {
                download.error = error;
            }
        }
    }

    fn finish(&mut self, session: &Session) {
        self.set_phase(Phase::Done);
        self.emit(EngineEvent::SessionCleaned {
            session_id: session.id.clone(),
        });
    }

    /// Derived entirely from the tracked state; every record carries the
    /// session it belongs to.
    fn report(&self) -> BatchReport {
        let session_id = self
            .downloads
            .first()
            .map(|d| d.session_id.clone())
            .unwrap_or_default();
        let completed = self
            .downloads
            .iter()
            .filter(|d| d.status == DownloadStatus::Completed)
            .count();
        let failed = self
            .downloads
            .iter()
            .filter(|d| d.status == DownloadStatus::Failed)
            .count();
        let uploaded = self
            .downloads
            .iter()
            .filter(|d| d.upload_status == Some(UploadStatus::Uploaded))
            .count();
        let discarded = self
            .downloads
            .iter()
            .filter(|d| d.status == DownloadStatus::Completed && d.upload_status.is_none())
            .count();
        BatchReport {
            session_id,
            completed,
            failed,
            uploaded,
            discarded,
            pending_uploads: self.pending_uploads.len(),
        }
    }
}
