pub mod file;
pub mod memory;

use crate::error::MirrorResult;
use std::{future::Future, path::Path, sync::Arc};

pub use file::FileSink;
pub use memory::MemorySink;

/// Destination of mirrored resources.
pub trait MirrorSink: Send + Sync + 'static {
    /// Write `data` to `path`, creating missing parent directories.
    fn write(&self, path: &Path, data: &[u8]) -> impl Future<Output = MirrorResult<()>> + Send;

    fn rename(&self, from: &Path, to: &Path) -> impl Future<Output = MirrorResult<()>> + Send;

    fn exists(&self, path: &Path) -> impl Future<Output = bool> + Send;
}

impl<S> MirrorSink for Arc<S>
where
    S: MirrorSink,
{
    fn write(&self, path: &Path, data: &[u8]) -> impl Future<Output = MirrorResult<()>> + Send {
        self.as_ref().write(path, data)
    }

    fn rename(&self, from: &Path, to: &Path) -> impl Future<Output = MirrorResult<()>> + Send {
        self.as_ref().rename(from, to)
    }

    fn exists(&self, path: &Path) -> impl Future<Output = bool> + Send {
        self.as_ref().exists(path)
    }
}
