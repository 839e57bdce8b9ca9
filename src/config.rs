use std::path::PathBuf;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use tracing::warn;
use url::Url;

use crate::domain::{
    default_targets, DownloadTarget, LoginCredentials, StoreCredentials, SyncOptions,
};

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub listing_url: String,
    pub login_url: String,
    pub agent_url: String,
    pub output_folder: PathBuf,
    pub targets_file: PathBuf,
    pub auto_login: bool,
    pub login_email: String,
    pub login_password: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
    pub bucket: String,
    /// Non-empty to aim uploads at an S3-compatible endpoint instead of
    /// the derived virtual-host address.
    pub store_endpoint: String,
    pub sync_base_url: String,
    pub sync_api_key: String,
    pub sync_stock: bool,
    pub sync_pricing: bool,
    pub sync_after_batch: bool,
    pub login_success_patterns: Vec<String>,
    pub max_upload_passes: u32,
    pub upload_retry_pause_secs: u64,
    pub log_level: String,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let builder = Config::builder()
            // Default settings
            .set_default("listing_url", "https://portal.example.com/orderwise/stock/")?
            .set_default("login_url", "https://portal.example.com/customer/account/login")?
            .set_default("agent_url", "http://127.0.0.1:8924")?
            .set_default("output_folder", "./export-batches")?
            .set_default("targets_file", "./targets.json")?
            .set_default("auto_login", false)?
            .set_default("login_email", "")?
            .set_default("login_password", "")?
            .set_default("access_key_id", "")?
            .set_default("secret_access_key", "")?
            .set_default("region", "us-east-1")?
            .set_default("bucket", "oro")?
            .set_default("store_endpoint", "")?
            .set_default("sync_base_url", "https://admin.example.com/api/v1/extension")?
            .set_default("sync_api_key", "")?
            .set_default("sync_stock", true)?
            .set_default("sync_pricing", true)?
            .set_default("sync_after_batch", false)?
            .set_default("login_success_patterns", vec!["/customer/account".to_string()])?
            .set_default("max_upload_passes", 3)?
            .set_default("upload_retry_pause_secs", 2)?
            .set_default("log_level", "info")?
            // Config file (optional)
            .add_source(File::with_name("config").required(false))
            // Environment variables (e.g. PORTAL_EXPORTER_BUCKET=exports)
            .add_source(Environment::with_prefix("PORTAL_EXPORTER"));

        builder.build()?.try_deserialize()
    }

    /// Cheap sanity check on the configured endpoints before anything
    /// tries to talk to them.
    pub fn validate_urls(&self) -> Result<(), url::ParseError> {
        Url::parse(&self.agent_url)?;
        Url::parse(&self.listing_url)?;
        Url::parse(&self.login_url)?;
        Url::parse(&self.sync_base_url)?;
        Ok(())
    }

    pub fn login_credentials(&self) -> Option<LoginCredentials> {
        if self.login_email.is_empty() || self.login_password.is_empty() {
            return None;
        }
        Some(LoginCredentials {
            email: self.login_email.clone(),
            password: self.login_password.clone(),
        })
    }

    pub fn store_credentials(&self) -> StoreCredentials {
        StoreCredentials {
            access_key_id: self.access_key_id.clone(),
            secret_access_key: self.secret_access_key.clone(),
            region: self.region.clone(),
            bucket: self.bucket.clone(),
        }
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            stock: self.sync_stock,
            pricing: self.sync_pricing,
        }
        .normalized()
    }

    /// Read the persisted target list, merging it over the defaults.
    /// A missing or unreadable file yields the defaults unchanged.
    pub fn load_targets(&self) -> Vec<DownloadTarget> {
        match std::fs::read_to_string(&self.targets_file) {
            Ok(raw) => match serde_json::from_str::<Vec<DownloadTarget>>(&raw) {
                Ok(stored) => merge_targets(stored),
                Err(e) => {
                    warn!("ignoring malformed target file {:?}: {}", self.targets_file, e);
                    default_targets()
                }
            },
            Err(_) => default_targets(),
        }
    }

    /// Persist the target list. Only called on an explicit save.
    pub fn save_targets(&self, targets: &[DownloadTarget]) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(targets)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(&self.targets_file, json)
    }
}

/// Merge stored targets over the defaults: stored values win, but optional
/// fields absent from storage fall back to the default for that id. Stored
/// targets with ids the defaults don't know are kept as-is.
pub fn merge_targets(stored: Vec<DownloadTarget>) -> Vec<DownloadTarget> {
    let mut merged: Vec<DownloadTarget> = default_targets()
        .into_iter()
        .map(|default| match stored.iter().find(|t| t.id == default.id) {
            Some(saved) => DownloadTarget {
                filename: saved.filename.clone().or(default.filename),
                remote_key: saved.remote_key.clone().or(default.remote_key),
                ..saved.clone()
            },
            None => default,
        })
        .collect();

    for extra in stored {
        if !merged.iter().any(|t| t.id == extra.id) {
            merged.push(extra);
        }
    }
    merged
}
