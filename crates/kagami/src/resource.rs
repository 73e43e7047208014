use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use url::Url;

use crate::decrypt::ContentKey;

/// One entry of the walk result, fully resolved: an absolute source url and the
/// destination file it is mirrored to.
#[derive(Debug, Clone, PartialEq)]
pub enum Resource {
    Manifest(ManifestResource),
    Key(KeyResource),
    Segment(SegmentResource),
}

impl Resource {
    pub fn uri(&self) -> &Url {
        match self {
            Resource::Manifest(manifest) => &manifest.uri,
            Resource::Key(key) => &key.uri,
            Resource::Segment(segment) => &segment.uri,
        }
    }

    pub fn file(&self) -> &Path {
        match self {
            Resource::Manifest(manifest) => &manifest.file,
            Resource::Key(key) => &key.file,
            Resource::Segment(segment) => &segment.file,
        }
    }

    /// Body already held in memory, which is written without fetching.
    pub fn content(&self) -> Option<&str> {
        match self {
            Resource::Manifest(manifest) => manifest.content.as_deref(),
            _ => None,
        }
    }

    pub fn as_manifest(&self) -> Option<&ManifestResource> {
        match self {
            Resource::Manifest(manifest) => Some(manifest),
            _ => None,
        }
    }

    pub fn as_segment(&self) -> Option<&SegmentResource> {
        match self {
            Resource::Segment(segment) => Some(segment),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ManifestResource {
    pub uri: Url,
    pub file: PathBuf,
    /// Manifest body with every resolved reference rewritten to a local relative path.
    ///
    /// `None` for a rendition described inline by its parent, which is never fetched.
    pub content: Option<String>,
    /// Url of the manifest referencing this one. `None` for the entry manifest.
    pub parent: Option<Url>,
}

/// An encryption key mirrored verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyResource {
    pub uri: Url,
    pub file: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SegmentResource {
    pub uri: Url,
    pub file: PathBuf,
    pub key: Option<SegmentKey>,
}

/// The key of a segment's manifest together with the IV of this segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentKey {
    pub key: Arc<ContentKey>,
    pub iv: [u8; 16],
}

impl SegmentKey {
    /// Key material, present only when it was fetched for decryption.
    pub fn bytes(&self) -> Option<&[u8; 16]> {
        self.key.bytes.as_ref()
    }
}
