//! Delivery of a finished run: the dubbed container and its texts.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;

use crate::error::Result;
use crate::model::DubbedOutput;

/// File name used when the caller does not choose one
pub fn default_file_name(output: &DubbedOutput, at: DateTime<Utc>) -> String {
    format!(
        "dubbed_video_{}_to_{}_{}.{}",
        output.source_language,
        output.target_language,
        at.timestamp_millis(),
        output.extension()
    )
}

/// Write the dubbed container to `path`, or to a default name in `dir`
pub async fn save_video(output: &DubbedOutput, path: Option<&Path>, dir: &Path) -> Result<PathBuf> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => dir.join(default_file_name(output, Utc::now())),
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }
    fs::write(&path, &output.payload).await?;

    info!("Saved dubbed video to {} ({} bytes)", path.display(), output.payload.len());
    Ok(path)
}

/// Write transcript and translation next to a saved video as `<stem>.txt`
pub async fn export_texts(output: &DubbedOutput, video_path: &Path) -> Result<PathBuf> {
    let path = video_path.with_extension("txt");
    fs::write(&path, render_texts(output)).await?;

    info!("Exported transcript and translation to {}", path.display());
    Ok(path)
}

fn render_texts(output: &DubbedOutput) -> String {
    format!(
        "Original ({}):\n{}\n\nTranslation ({}):\n{}\n",
        output.source_label, output.transcript, output.target_label, output.translation
    )
}
