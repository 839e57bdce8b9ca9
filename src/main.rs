mod api;
mod application;
mod config;
mod domain;
mod utils;

use std::time::Instant;

use regex::Regex;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::api::{BridgeClient, FolderPicker, FsDownloadHub, HttpObjectStore, SyncApi, SyncClient};
use crate::application::sync::{MessageFeed, SyncRunner};
use crate::application::{EngineConfig, EngineEvent, Timings, Uploader, WorkflowEngine};
use crate::config::Settings;
use crate::domain::SyncCategory;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let settings = Settings::new().expect("failed to load configuration");
    settings.validate_urls().expect("invalid URL in configuration");

    tracing_subscriber::fmt()
        .with_env_filter(&settings.log_level)
        .init();

    info!("starting portal-exporter");

    if !settings.output_folder.exists() {
        std::fs::create_dir_all(&settings.output_folder)
            .expect("failed to create output folder");
    }

    let targets = settings.load_targets();
    let enabled = targets.iter().filter(|t| t.enabled).count();
    info!("{} target(s) configured, {} enabled", targets.len(), enabled);

    // First run: write the merged list out so the operator has a file to
    // edit.
    if !settings.targets_file.exists() {
        if let Err(e) = settings.save_targets(&targets) {
            warn!("could not write {:?}: {}", settings.targets_file, e);
        }
    }

    let login_success_patterns: Vec<Regex> = settings
        .login_success_patterns
        .iter()
        .map(|p| Regex::new(p).expect("invalid login success pattern"))
        .collect();

    let engine_config = EngineConfig {
        output_folder: settings.output_folder.clone(),
        auto_login: settings.auto_login,
        login: settings.login_credentials(),
        login_success_patterns,
        store: settings.store_credentials(),
        max_upload_passes: settings.max_upload_passes,
        timings: Timings {
            upload_retry_pause: std::time::Duration::from_secs(settings.upload_retry_pause_secs),
            ..Timings::default()
        },
    };

    let bridge = BridgeClient::new(&settings.agent_url, &settings.listing_url, &settings.login_url);
    let store = if settings.store_endpoint.is_empty() {
        HttpObjectStore::new()
    } else {
        HttpObjectStore::with_endpoint(settings.store_endpoint.as_str())
    };
    let uploader = Uploader::new(store, settings.store_credentials());

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            match event {
                EngineEvent::Phase(phase) => info!("phase: {:?}", phase),
                other => info!("{:?}", other),
            }
        }
    });

    let mut engine = WorkflowEngine::new(
        bridge.clone(),
        bridge,
        FsDownloadHub::new(),
        uploader,
        engine_config,
        targets,
        events_tx,
    );

    let report = match engine.run(&FolderPicker).await {
        Ok(report) => {
            info!(
                "batch {} finished: {} completed, {} failed, {} uploaded, {} discarded, {} still queued",
                report.session_id,
                report.completed,
                report.failed,
                report.uploaded,
                report.discarded,
                report.pending_uploads
            );
            report
        }
        Err(e) => {
            error!("batch failed: {}", e);
            return;
        }
    };

    if settings.sync_after_batch && report.pending_uploads == 0 && report.uploaded > 0 {
        run_sync(&settings).await;
    }
}

async fn run_sync(settings: &Settings) {
    if settings.sync_api_key.is_empty() {
        warn!("sync requested but no API key configured");
        return;
    }

    let client = SyncClient::new(&settings.sync_base_url, &settings.sync_api_key);
    let mut runner = SyncRunner::new(client);
    match runner
        .trigger(settings.sync_options(), false, Instant::now())
        .await
    {
        Ok(report) => {
            for (category, result) in &report.results {
                match result {
                    Ok(()) => info!("{} sync triggered", category),
                    Err(e) => warn!("{} sync failed: {}", category, e),
                }
            }
        }
        Err(e) => {
            warn!("sync not started: {}", e);
            return;
        }
    }

    // Surface any operator-facing messages the sync produced.
    let client = SyncClient::new(&settings.sync_base_url, &settings.sync_api_key);
    let options = settings.sync_options();
    let categories = [
        (options.stock, SyncCategory::Stock),
        (options.pricing, SyncCategory::Pricing),
    ];
    let mut feed = MessageFeed::new(SyncCategory::Stock);
    for (enabled, category) in categories {
        if !enabled {
            continue;
        }
        feed.set_category(category);
        match client.system_messages(category).await {
            Ok(messages) => {
                feed.absorb(messages);
                for message in feed.messages() {
                    info!("[{}] {}", message.category, message.message);
                }
            }
            Err(e) => warn!("could not fetch {} messages: {}", category, e),
        }
    }
}
