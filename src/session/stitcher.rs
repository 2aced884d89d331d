//! Segment stitching
//!
//! Turns the ordered segment files of a session into one deliverable file.
//! A single segment is moved into place; several segments are handed to a
//! [`SegmentMerger`] and deleted once the merge succeeded.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::capture::ffmpeg::muxer_name;
use crate::capture::OutputFileType;
use crate::{Result, ScreencapError};

/// Losslessly concatenates segment files back to back
#[async_trait]
pub trait SegmentMerger: Send + Sync {
    /// Merge `segments` in order into `destination`.
    ///
    /// On failure the destination must not be created or overwritten.
    async fn merge(
        &self,
        segments: &[PathBuf],
        destination: &Path,
        file_type: OutputFileType,
    ) -> Result<PathBuf>;
}

/// Stitches segments with a pluggable merge strategy
#[derive(Clone)]
pub struct SegmentStitcher {
    merger: Arc<dyn SegmentMerger>,
}

impl SegmentStitcher {
    pub fn new(merger: Arc<dyn SegmentMerger>) -> Self {
        Self { merger }
    }

    pub async fn stitch(
        &self,
        segments: &[PathBuf],
        destination: &Path,
        file_type: OutputFileType,
    ) -> Result<PathBuf> {
        match segments {
            [] => Err(ScreencapError::FileWriteFailed(
                "No segments to stitch".to_string(),
            )),
            [single] => {
                move_into_place(single, destination).await?;
                info!("Moved single segment to {}", destination.display());
                Ok(destination.to_path_buf())
            }
            many => {
                info!(
                    "Stitching {} segments into {}",
                    many.len(),
                    destination.display()
                );
                let merged = self.merger.merge(many, destination, file_type).await?;

                for segment in many {
                    if let Err(e) = tokio::fs::remove_file(segment).await {
                        warn!("Failed to delete segment {}: {}", segment.display(), e);
                    }
                }
                Ok(merged)
            }
        }
    }
}

async fn move_into_place(source: &Path, destination: &Path) -> Result<()> {
    if source == destination {
        return Ok(());
    }

    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    if tokio::fs::try_exists(destination).await.unwrap_or(false) {
        tokio::fs::remove_file(destination).await?;
    }

    if let Err(e) = tokio::fs::rename(source, destination).await {
        // Cross-device moves cannot rename.
        debug!("Rename failed ({}), copying instead", e);
        tokio::fs::copy(source, destination).await?;
        tokio::fs::remove_file(source).await?;
    }
    Ok(())
}

/// Merges with ffmpeg's concat demuxer and stream copy
pub struct FfmpegConcatMerger {
    ffmpeg: PathBuf,
}

impl FfmpegConcatMerger {
    pub fn new(ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
        }
    }
}

/// Render a concat demuxer list for `segments`
pub fn concat_list(segments: &[PathBuf]) -> String {
    segments
        .iter()
        .map(|path| {
            let escaped = path.to_string_lossy().replace('\'', r"'\''");
            format!("file '{}'\n", escaped)
        })
        .collect()
}

fn staging_path(destination: &Path, file_type: OutputFileType) -> PathBuf {
    let stem = destination
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "recording".to_string());
    destination.with_file_name(format!(".{}.stitching.{}", stem, file_type.extension()))
}

#[async_trait]
impl SegmentMerger for FfmpegConcatMerger {
    async fn merge(
        &self,
        segments: &[PathBuf],
        destination: &Path,
        file_type: OutputFileType,
    ) -> Result<PathBuf> {
        let dir = destination
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        tokio::fs::create_dir_all(&dir).await?;

        let list = tempfile::Builder::new()
            .prefix(".segments")
            .suffix(".txt")
            .tempfile_in(&dir)?;
        tokio::fs::write(list.path(), concat_list(segments)).await?;

        let staging = staging_path(destination, file_type);
        let output = Command::new(&self.ffmpeg)
            .args(["-hide_banner", "-loglevel", "error", "-y"])
            .args(["-f", "concat", "-safe", "0", "-i"])
            .arg(list.path())
            .args(["-map", "0", "-c", "copy", "-f", muxer_name(file_type)])
            .arg(&staging)
            .output()
            .await
            .map_err(|e| {
                ScreencapError::FileWriteFailed(format!(
                    "Failed to run {}: {}",
                    self.ffmpeg.display(),
                    e
                ))
            })?;

        if !output.status.success() {
            let _ = tokio::fs::remove_file(&staging).await;
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ScreencapError::FileWriteFailed(format!(
                "Segment merge failed: {}",
                stderr.trim()
            )));
        }

        if let Err(e) = tokio::fs::rename(&staging, destination).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(e.into());
        }
        Ok(destination.to_path_buf())
    }
}
