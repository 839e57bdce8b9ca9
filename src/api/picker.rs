use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{info, warn};

use super::SessionFilePicker;

/// Directory selection backed by the native folder dialog. The dialog is
/// the user-gesture boundary: nothing is read from disk until the user
/// picks a folder, and only files carrying the session prefix are read.
pub struct FolderPicker;

#[async_trait]
impl SessionFilePicker for FolderPicker {
    async fn pick_session_files(&self, session_id: &str) -> Option<HashMap<String, Vec<u8>>> {
        let title = format!("Select the folder holding {}-* files", session_id);
        let folder = rfd::AsyncFileDialog::new()
            .set_title(title.as_str())
            .pick_folder()
            .await?;

        match read_session_files(folder.path(), session_id).await {
            Ok(files) => {
                info!("read {} file(s) for session {}", files.len(), session_id);
                Some(files)
            }
            Err(e) => {
                warn!("failed to read selected folder: {}", e);
                Some(HashMap::new())
            }
        }
    }
}

/// Collect `{session_id}*.csv` files under `root` (recursing into
/// subdirectories) as name -> content. Empty files are skipped: a
/// zero-byte export is treated as absent, not matchable.
pub async fn read_session_files(
    root: &Path,
    session_id: &str,
) -> std::io::Result<HashMap<String, Vec<u8>>> {
    let mut files = HashMap::new();
    let mut pending: Vec<PathBuf> = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(path);
                continue;
            }

            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.to_lowercase().ends_with(".csv") || !name.starts_with(session_id) {
                continue;
            }

            let content = tokio::fs::read(&path).await?;
            if content.is_empty() {
                warn!("{} is empty (0 bytes), skipping", name);
                continue;
            }
            files.insert(name, content);
        }
    }

    Ok(files)
}
