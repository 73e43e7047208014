//! Discovery of every resource reachable from an entry manifest.
//!
//! The walker fetches and parses manifests only. Segments and mirrored keys are
//! emitted with their source url and destination file, to be downloaded later by
//! the [materializer](crate::materialize).
//!
//! A walk runs in two passes. Discovery fetches every reachable manifest
//! concurrently. Placement then assigns files depth first without any concurrency,
//! so the result does not depend on the order in which responses arrive.

use std::{
    collections::{HashMap, HashSet},
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use tokio::sync::Semaphore;
use url::Url;

use crate::{
    decrypt::{key_from_bytes, parse_iv, ContentKey},
    error::{MirrorResult, ResultUriExt},
    fetch::{Fetched, Fetcher},
    manifest::{
        rewrite_reference, strip_key_lines, KeyMethod, KeyRef, ManifestFormat, ParsedManifest,
        PlaylistRef,
    },
    resource::{KeyResource, ManifestResource, Resource, SegmentKey, SegmentResource},
    util::{
        path::{mirrored_path, relative_path, url_basename},
        retry::RetryPolicy,
    },
    ROOT_MANIFEST,
};

pub(crate) const DEFAULT_CONCURRENCY: NonZeroUsize = match NonZeroUsize::new(10) {
    Some(concurrency) => concurrency,
    None => unreachable!(),
};

#[derive(Debug, Clone)]
pub struct WalkOptions {
    basedir: PathBuf,
    decrypt: bool,
    timeout: Duration,
    retry: RetryPolicy,
    concurrency: NonZeroUsize,
}

impl WalkOptions {
    pub fn new(basedir: impl Into<PathBuf>) -> Self {
        Self {
            basedir: basedir.into(),
            decrypt: false,
            timeout: Duration::from_secs(15),
            retry: RetryPolicy::exponential(),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Fetch AES-128 keys instead of mirroring them, so segments can be decrypted.
    pub fn decrypt(mut self, decrypt: bool) -> Self {
        self.decrypt = decrypt;
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

    /// Max number of manifests and keys fetched at the same time.
    pub fn concurrency(mut self, concurrency: NonZeroUsize) -> Self {
        self.concurrency = concurrency;
        self
    }
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self::new(PathBuf::new())
    }
}

/// Walk the manifest graph starting at `uri`.
///
/// Resources are ordered depth first: a manifest, its key, its segments, then the
/// expansion of each child playlist in order. Every manifest body in the result has
/// its references rewritten to paths relative to its own file.
pub async fn walk<F>(fetcher: F, uri: Url, options: WalkOptions) -> MirrorResult<Vec<Resource>>
where
    F: Fetcher,
{
    let file = options.basedir.join(ROOT_MANIFEST);
    let context = WalkContext {
        fetcher,
        pages: Mutex::default(),
        claimed: Mutex::new(HashSet::from([uri.clone()])),
        ledger: Mutex::new(HashMap::from([(uri.clone(), file.clone())])),
        permits: Semaphore::new(options.concurrency.get()),
        options,
    };

    context.discover(uri.clone()).await?;
    context
        .visit(Node {
            uri,
            file,
            parent: None,
            parent_dir: None,
            inline: None,
        })
        .await
}

struct WalkContext<F> {
    fetcher: F,
    options: WalkOptions,
    /// Manifests fetched by discovery, taken out again when they are placed.
    pages: Mutex<HashMap<Url, Page>>,
    /// Manifest urls discovery has already started fetching.
    claimed: Mutex<HashSet<Url>>,
    /// Manifest url to the file planned for it. Shared by the whole walk.
    ledger: Mutex<HashMap<Url, PathBuf>>,
    permits: Semaphore,
}

struct Page {
    content: String,
    manifest: ParsedManifest,
}

struct Node {
    uri: Url,
    file: PathBuf,
    parent: Option<Url>,
    parent_dir: Option<PathBuf>,
    /// Already parsed rendition of a DASH manifest.
    inline: Option<ParsedManifest>,
}

impl<F> WalkContext<F>
where
    F: Fetcher,
{
    /// Fetch `uri` and every manifest reachable from it that was not claimed yet.
    #[async_recursion::async_recursion]
    async fn discover(&self, uri: Url) -> MirrorResult<()> {
        let page = self.load(&uri).await?;
        let mut children = Vec::new();
        remote_children(&page.manifest, &uri, &mut children).with_uri(&uri)?;
        self.pages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(uri, page);

        let unclaimed: Vec<Url> = {
            let mut claimed = self.claimed.lock().unwrap_or_else(PoisonError::into_inner);
            children
                .into_iter()
                .filter(|child| claimed.insert(child.clone()))
                .collect()
        };
        futures::future::try_join_all(unclaimed.into_iter().map(|child| self.discover(child)))
            .await?;
        Ok(())
    }

    async fn load(&self, uri: &Url) -> MirrorResult<Page> {
        let fetched = self.fetch(uri).await?;
        let format = ManifestFormat::detect(fetched.content_type.as_deref(), &fetched.body);
        let manifest = ParsedManifest::parse(format, &fetched.body, uri).with_uri(uri)?;
        let content = String::from_utf8_lossy(&fetched.body).into_owned();
        Ok(Page { content, manifest })
    }

    #[async_recursion::async_recursion]
    async fn visit(&self, node: Node) -> MirrorResult<Vec<Resource>> {
        let uri = node.uri.clone();
        self.expand(node).await.with_uri(uri)
    }

    async fn expand(&self, node: Node) -> MirrorResult<Vec<Resource>> {
        let Node {
            uri,
            file,
            parent,
            parent_dir,
            inline,
        } = node;
        let dir = file.parent().map(Path::to_path_buf).unwrap_or_default();
        // DASH renditions keep the layout of the MPD, which is written unmodified.
        let mirrored = inline.is_some();

        let (mut content, manifest) = match inline {
            Some(manifest) => (None, manifest),
            None => {
                let cached = self
                    .pages
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&uri);
                let page = match cached {
                    Some(page) => page,
                    None => self.load(&uri).await?,
                };
                (Some(page.content), page.manifest)
            }
        };
        tracing::debug!(
            "Found {} segments and {} playlists in {uri}",
            manifest.segments.len(),
            manifest.children().len()
        );

        let key_dir = parent_dir.as_deref().unwrap_or(&dir);
        let (key, key_resource) = match manifest.segments.first().and_then(|s| s.key.as_ref()) {
            Some(key) => self.resolve_key(key, &uri, &dir, key_dir, &mut content).await?,
            None => (None, None),
        };

        let mut segments = Vec::new();
        for (index, segment) in manifest.segments.iter().enumerate() {
            let (segment_uri, segment_file) =
                place_leaf(&uri, &dir, &segment.uri, "segment", mirrored, &mut content)?;
            segments.push(Resource::Segment(SegmentResource {
                uri: segment_uri,
                file: segment_file,
                key: key.as_ref().map(|key| SegmentKey {
                    iv: key.segment_iv(manifest.media_sequence, index),
                    key: key.clone(),
                }),
            }));
        }

        // Initialization segments are shared, and often the same file as the media.
        let segment_uris: HashSet<&str> =
            manifest.segments.iter().map(|s| s.uri.as_str()).collect();
        let mut maps: Vec<(usize, &str)> = Vec::new();
        for (index, segment) in manifest.segments.iter().enumerate() {
            let Some(map) = segment.map.as_deref() else {
                continue;
            };
            if !segment_uris.contains(map) && maps.iter().all(|(_, m)| *m != map) {
                maps.push((index, map));
            }
        }
        for (index, map) in maps {
            let (map_uri, map_file) =
                place_leaf(&uri, &dir, map, "init", mirrored, &mut content)?;
            // a map declared after a key tag is encrypted with that key
            let encrypted = manifest.segments[..=index]
                .iter()
                .rev()
                .find_map(|s| s.key.as_ref())
                .is_some_and(|k| k.method != KeyMethod::None);
            segments.push(Resource::Segment(SegmentResource {
                uri: map_uri,
                file: map_file,
                key: key.as_ref().filter(|_| encrypted).map(|key| SegmentKey {
                    iv: key.segment_iv(manifest.media_sequence, index),
                    key: key.clone(),
                }),
            }));
        }

        let mut planned = Vec::new();
        for (index, child) in manifest.children().into_iter().enumerate() {
            let child_dir = dir.join(format!("manifest{index}"));
            match child {
                PlaylistRef::Remote(None) => continue,
                PlaylistRef::Remote(Some(reference)) => {
                    let child_uri = uri.join(reference)?;
                    let child_file = child_dir.join(url_basename(&child_uri, "index.m3u8"));

                    let target = match self.register(&child_uri, &child_file) {
                        Some(visited) => {
                            tracing::warn!(
                                "Playlist {child_uri} was visited before, skipped. Referenced by {uri}"
                            );
                            visited
                        }
                        None => {
                            planned.push(Node {
                                uri: child_uri,
                                file: child_file.clone(),
                                parent: Some(uri.clone()),
                                parent_dir: Some(dir.clone()),
                                inline: None,
                            });
                            child_file
                        }
                    };

                    if let Some(content) = &mut content {
                        *content = rewrite_reference(content, reference, &relative_path(&dir, &target));
                    }
                }
                PlaylistRef::Inline { id, manifest } => {
                    tracing::debug!("Rendition {id} of {uri} has {} segments", manifest.segments.len());
                    planned.push(Node {
                        uri: uri.clone(),
                        file: file.clone(),
                        parent: Some(uri.clone()),
                        parent_dir: Some(dir.clone()),
                        inline: Some((**manifest).clone()),
                    });
                }
            }
        }

        let mut resources = Vec::with_capacity(segments.len() + 2);
        resources.push(Resource::Manifest(ManifestResource {
            uri,
            file,
            content,
            parent,
        }));
        resources.extend(key_resource.map(Resource::Key));
        resources.extend(segments);

        for node in planned {
            resources.extend(self.visit(node).await?);
        }

        Ok(resources)
    }

    /// Resolve the key of a manifest.
    ///
    /// When decrypting, the key is fetched and its tag removed from `content`.
    /// Otherwise the key becomes a resource of its own and its reference is rewritten.
    async fn resolve_key(
        &self,
        key: &KeyRef,
        manifest_uri: &Url,
        dir: &Path,
        key_dir: &Path,
        content: &mut Option<String>,
    ) -> MirrorResult<(Option<Arc<ContentKey>>, Option<KeyResource>)> {
        let Some(reference) = key.uri.as_deref() else {
            return Ok((None, None));
        };
        let decrypt = match &key.method {
            KeyMethod::None => return Ok((None, None)),
            KeyMethod::Aes128 => self.options.decrypt,
            KeyMethod::Other(method) => {
                if self.options.decrypt {
                    tracing::warn!("Decryption of {method} is not supported, segments are kept as is.");
                }
                false
            }
        };

        let key_uri = manifest_uri.join(reference)?;
        if !matches!(key_uri.scheme(), "http" | "https") {
            tracing::warn!("Key {key_uri} can not be downloaded, leaving it untouched.");
            return Ok((None, None));
        }
        let iv = key.iv.as_deref().map(parse_iv).transpose()?;

        if decrypt {
            let bytes = match self.fetch(&key_uri).await.and_then(|k| key_from_bytes(&k.body)) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::error!("Failed to fetch key {key_uri}: {e}");
                    return Err(e.with_uri(&key_uri));
                }
            };
            if let Some(content) = content {
                *content = strip_key_lines(content, reference);
            }

            let key = ContentKey {
                uri: key_uri,
                bytes: Some(bytes),
                iv,
            };
            return Ok((Some(Arc::new(key)), None));
        }

        let file = key_dir.join(url_basename(&key_uri, "key"));
        if let Some(content) = content {
            *content = rewrite_reference(content, reference, &relative_path(dir, &file));
        }

        let key = ContentKey {
            uri: key_uri.clone(),
            bytes: None,
            iv,
        };
        let resource = KeyResource { uri: key_uri, file };
        Ok((Some(Arc::new(key)), Some(resource)))
    }

    /// Record `file` as the destination of `uri`, or return the file recorded earlier.
    fn register(&self, uri: &Url, file: &Path) -> Option<PathBuf> {
        let mut ledger = self.ledger.lock().unwrap_or_else(PoisonError::into_inner);
        match ledger.get(uri) {
            Some(visited) => Some(visited.clone()),
            None => {
                ledger.insert(uri.clone(), file.to_path_buf());
                None
            }
        }
    }

    async fn fetch(&self, uri: &Url) -> MirrorResult<Fetched> {
        let _permit = self.permits.acquire().await?;
        let fetcher = &self.fetcher;
        let timeout = self.options.timeout;
        self.options
            .retry
            .run(move || fetcher.fetch(uri, timeout))
            .await
            .with_uri(uri)
    }
}

/// Urls of every playlist fetched on its own, including those below inline renditions.
fn remote_children(manifest: &ParsedManifest, base: &Url, found: &mut Vec<Url>) -> MirrorResult<()> {
    for child in manifest.children() {
        match child {
            PlaylistRef::Remote(None) => {}
            PlaylistRef::Remote(Some(reference)) => found.push(base.join(reference)?),
            PlaylistRef::Inline { manifest, .. } => remote_children(manifest, base, found)?,
        }
    }
    Ok(())
}

/// Resolve a segment or init segment reference and place it beside its manifest.
///
/// With `mirrored`, the path below the manifest's remote directory is kept.
fn place_leaf(
    manifest_uri: &Url,
    dir: &Path,
    reference: &str,
    fallback: &str,
    mirrored: bool,
    content: &mut Option<String>,
) -> MirrorResult<(Url, PathBuf)> {
    let uri = manifest_uri.join(reference)?;
    let file = if mirrored {
        dir.join(mirrored_path(manifest_uri, &uri, fallback))
    } else {
        dir.join(url_basename(&uri, fallback))
    };
    if let Some(content) = content {
        *content = rewrite_reference(content, reference, &relative_path(dir, &file));
    }
    Ok((uri, file))
}
