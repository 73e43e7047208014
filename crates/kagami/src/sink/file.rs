use super::MirrorSink;
use crate::error::MirrorResult;
use std::path::Path;
use tokio::{fs::File, io::AsyncWriteExt};

/// Writes resources to the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileSink;

impl FileSink {
    pub fn new() -> Self {
        Self
    }
}

impl MirrorSink for FileSink {
    async fn write(&self, path: &Path, data: &[u8]) -> MirrorResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = File::create(path).await?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(())
    }

    async fn rename(&self, from: &Path, to: &Path) -> MirrorResult<()> {
        tokio::fs::rename(from, to).await?;
        Ok(())
    }

    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or_default()
    }
}
