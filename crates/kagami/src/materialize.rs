use std::{
    collections::HashSet,
    ffi::OsStr,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use bytes::Bytes;
use futures::{stream, TryStreamExt};
use url::Url;

use crate::{
    decrypt::decrypt_aes128,
    error::{MirrorError, MirrorResult, ResultUriExt},
    fetch::Fetcher,
    resource::{KeyResource, ManifestResource, Resource, SegmentResource},
    sink::MirrorSink,
    util::retry::RetryPolicy,
    walk::DEFAULT_CONCURRENCY,
    ROOT_MANIFEST,
};

#[derive(Debug, Clone)]
pub struct MaterializeOptions {
    decrypt: bool,
    concurrency: NonZeroUsize,
    timeout: Duration,
    retry: RetryPolicy,
}

impl MaterializeOptions {
    pub fn new() -> Self {
        Self {
            decrypt: false,
            concurrency: DEFAULT_CONCURRENCY,
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::linear(),
        }
    }

    /// Decrypt segments whose key material is known.
    pub fn decrypt(mut self, decrypt: bool) -> Self {
        self.decrypt = decrypt;
        self
    }

    pub fn concurrency(mut self, concurrency: NonZeroUsize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for MaterializeOptions {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaterializeReport {
    /// Number of writes performed, each preceded by at most one fetch.
    pub operations: usize,
    /// New location of the entry manifest, when it had to be renamed.
    pub renamed_root: Option<PathBuf>,
}

enum Operation<'a> {
    Write {
        file: &'a Path,
        content: &'a str,
    },
    Fetch {
        uri: &'a Url,
        file: &'a Path,
    },
    FetchDecrypt {
        uri: &'a Url,
        file: &'a Path,
        key: &'a [u8; 16],
        iv: &'a [u8; 16],
    },
}

impl<'a> Operation<'a> {
    fn uri(&self) -> Option<&'a Url> {
        match self {
            Operation::Write { .. } => None,
            Operation::Fetch { uri, .. } | Operation::FetchDecrypt { uri, .. } => Some(*uri),
        }
    }
}

/// Downloads, decrypts and stores the resources found by a walk.
pub struct Materializer<F, S> {
    fetcher: F,
    sink: S,
    options: MaterializeOptions,
}

impl<F, S> Materializer<F, S>
where
    F: Fetcher,
    S: MirrorSink,
{
    pub fn new(fetcher: F, sink: S, options: MaterializeOptions) -> Self {
        Self {
            fetcher,
            sink,
            options,
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Store every resource, then give the entry manifest its canonical name.
    ///
    /// A url is fetched at most once per call even if several resources share it.
    /// The first failing operation aborts the whole run.
    pub async fn materialize(&self, resources: &mut [Resource]) -> MirrorResult<MaterializeReport> {
        let operations = self.plan(resources);
        let total = operations.len();
        let step = (total / 10).max(1);
        let finished = AtomicUsize::new(0);
        let finished = &finished;

        tracing::info!(
            "Start mirroring {total} resources with {} concurrent operation(s).",
            self.options.concurrency.get()
        );
        stream::iter(operations.into_iter().map(Ok::<_, MirrorError>))
            .try_for_each_concurrent(self.options.concurrency.get(), move |operation| async move {
                self.run(operation).await?;

                let finished = finished.fetch_add(1, Ordering::Relaxed) + 1;
                if finished % step == 0 || finished == total {
                    let percentage = finished as f32 / total as f32 * 100.;
                    tracing::info!("Mirrored {finished} / {total} ({percentage:.2}%)");
                }
                Ok(())
            })
            .await?;

        let renamed_root = self.rename_root(resources).await;
        Ok(MaterializeReport {
            operations: total,
            renamed_root,
        })
    }

    fn plan<'a>(&self, resources: &'a [Resource]) -> Vec<Operation<'a>> {
        let mut scheduled: HashSet<&Url> = HashSet::new();
        let mut operations = Vec::new();

        for resource in resources {
            let operation = match resource {
                Resource::Manifest(ManifestResource {
                    file,
                    content: Some(content),
                    ..
                }) => Operation::Write { file, content },
                // inline renditions are already contained in their parent
                Resource::Manifest(_) => continue,
                Resource::Key(KeyResource { uri, file }) => Operation::Fetch { uri, file },
                Resource::Segment(SegmentResource { uri, file, key }) => {
                    let decrypt_with = key
                        .as_ref()
                        .filter(|_| self.options.decrypt)
                        .and_then(|key| Some((key.bytes()?, &key.iv)));
                    match decrypt_with {
                        Some((key, iv)) => Operation::FetchDecrypt { uri, file, key, iv },
                        None => Operation::Fetch { uri, file },
                    }
                }
            };

            if let Some(uri) = operation.uri() {
                if !scheduled.insert(uri) {
                    continue;
                }
            }
            operations.push(operation);
        }
        operations
    }

    async fn run(&self, operation: Operation<'_>) -> MirrorResult<()> {
        match operation {
            Operation::Write { file, content } => self
                .sink
                .write(file, content.as_bytes())
                .await
                .with_uri(file.display()),
            Operation::Fetch { uri, file } => {
                let body = self.fetch(uri).await?;
                self.sink.write(file, &body).await.with_uri(uri)
            }
            Operation::FetchDecrypt { uri, file, key, iv } => {
                let body = self.fetch(uri).await?;
                let body = decrypt_aes128(key, iv, &body).with_uri(uri)?;
                self.sink.write(file, &body).await.with_uri(uri)
            }
        }
    }

    async fn fetch(&self, uri: &Url) -> MirrorResult<Bytes> {
        let fetcher = &self.fetcher;
        let timeout = self.options.timeout;
        let fetched = self
            .options
            .retry
            .run(move || fetcher.fetch(uri, timeout))
            .await
            .with_uri(uri)?;
        Ok(fetched.body)
    }

    /// Rename an entry manifest stored under another name to `master.m3u8`.
    async fn rename_root(&self, resources: &mut [Resource]) -> Option<PathBuf> {
        let root = resources.iter_mut().find_map(|resource| match resource {
            Resource::Manifest(manifest)
                if manifest.parent.is_none()
                    && manifest.file.file_name() != Some(OsStr::new(ROOT_MANIFEST)) =>
            {
                Some(manifest)
            }
            _ => None,
        })?;

        if !self.sink.exists(&root.file).await {
            return None;
        }

        let target = root.file.with_file_name(ROOT_MANIFEST);
        match self.sink.rename(&root.file, &target).await {
            Ok(()) => {
                tracing::info!("Renamed {} to {}", root.file.display(), target.display());
                root.file = target.clone();
                Some(target)
            }
            Err(e) => {
                tracing::warn!("Failed to rename {}: {e}", root.file.display());
                None
            }
        }
    }
}
