pub mod dash;
pub mod decrypt;
pub mod error;
pub mod fetch;
mod hls;
pub mod manifest;
pub mod materialize;
pub mod resource;
pub mod sink;
pub mod util;
pub mod walk;

use std::{
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::Arc,
};

use url::Url;

pub use error::{MirrorError, MirrorResult};
pub use fetch::{Fetched, Fetcher};
pub use materialize::{MaterializeOptions, MaterializeReport, Materializer};
pub use resource::Resource;
pub use sink::{FileSink, MemorySink, MirrorSink};
pub use util::http::HttpClient;
pub use walk::{walk, WalkOptions};

/// File name of the entry manifest in the output directory.
pub const ROOT_MANIFEST: &str = "master.m3u8";

///  ┌──────────────┐  manifests   ┌─────────┐  resources   ┌──────────────┐
///  │   Fetcher    ├──────────────►  walk   ├──────────────► Materializer │
///  └──────┬───────┘              └─────────┘              └──────┬───────┘
///         │                 segments / keys                      │ write
///         └──────────────────────────────────────────────────────►  Sink
///
/// Mirrors a manifest and everything it references. The walk finishes before any
/// segment is downloaded.
pub struct Mirror<F> {
    fetcher: Arc<F>,
    output: PathBuf,
    concurrency: NonZeroUsize,
    decrypt: bool,
}

#[derive(Debug)]
pub struct MirrorReport {
    pub resources: Vec<Resource>,
    pub materialized: MaterializeReport,
}

impl<F> Mirror<F>
where
    F: Fetcher,
{
    pub fn new(fetcher: F, output: impl Into<PathBuf>) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            output: output.into(),
            concurrency: walk::DEFAULT_CONCURRENCY,
            decrypt: false,
        }
    }

    pub fn concurrency(mut self, concurrency: NonZeroUsize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn decrypt(mut self, decrypt: bool) -> Self {
        self.decrypt = decrypt;
        self
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Mirror `input` into the output directory.
    pub async fn run(&self, input: Url) -> MirrorResult<MirrorReport> {
        self.run_with_sink(input, FileSink::new()).await
    }

    pub async fn run_with_sink<S>(&self, input: Url, sink: S) -> MirrorResult<MirrorReport>
    where
        S: MirrorSink,
    {
        let options = WalkOptions::new(self.output.clone())
            .decrypt(self.decrypt)
            .concurrency(self.concurrency);
        let mut resources = walk(self.fetcher.clone(), input, options).await?;
        tracing::info!("Found {} resources.", resources.len());

        let options = MaterializeOptions::new()
            .decrypt(self.decrypt)
            .concurrency(self.concurrency);
        let materialized = Materializer::new(self.fetcher.clone(), sink, options)
            .materialize(&mut resources)
            .await?;

        Ok(MirrorReport {
            resources,
            materialized,
        })
    }
}
