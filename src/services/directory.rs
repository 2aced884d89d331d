//! Output directory provider

use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;

use crate::engine::OutputDirectoryProvider;
use crate::{Result, ScreencapError};

/// A fixed directory, created on demand
#[derive(Debug, Clone)]
pub struct SimpleDirectoryProvider {
    directory: PathBuf,
}

impl SimpleDirectoryProvider {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }
}

#[async_trait]
impl OutputDirectoryProvider for SimpleDirectoryProvider {
    async fn recordings_directory(&self) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.directory)
            .await
            .map_err(|e| {
                ScreencapError::InvalidSaveLocation(format!(
                    "{}: {}",
                    self.directory.display(),
                    e
                ))
            })?;

        if !self.directory.is_dir() {
            return Err(ScreencapError::InvalidSaveLocation(format!(
                "{} is not a directory",
                self.directory.display()
            )));
        }
        Ok(self.directory.clone())
    }

    fn stop_accessing(&self) {
        debug!("Released {}", self.directory.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a/b");
        let provider = SimpleDirectoryProvider::new(&target);

        assert_eq!(provider.recordings_directory().await.unwrap(), target);
        assert!(target.is_dir());
    }

    #[tokio::test]
    async fn file_in_the_way_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("taken");
        std::fs::write(&target, b"").unwrap();

        let result = SimpleDirectoryProvider::new(&target).recordings_directory().await;
        assert!(matches!(result, Err(ScreencapError::InvalidSaveLocation(_))));
    }
}
