//! Format independent view of a manifest.
//!
//! Both HLS playlists and DASH MPDs are normalized into a [`ParsedManifest`], so
//! the walker never needs to know which format it is looking at.

mod rewrite;

pub use rewrite::{rewrite_reference, strip_key_lines};

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use crate::{dash, error::MirrorResult, hls};

static DASH_CONTENT_TYPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^application/dash\+xml").unwrap());
static XML_DECLARATION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^<\?xml").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestFormat {
    Hls,
    Dash,
}

impl ManifestFormat {
    /// DASH when the server says so or the body is an XML document, HLS otherwise.
    pub fn detect(content_type: Option<&str>, body: &[u8]) -> Self {
        if content_type.is_some_and(|c| DASH_CONTENT_TYPE.is_match(c)) {
            return Self::Dash;
        }

        let head = &body[..body.len().min(64)];
        let head = String::from_utf8_lossy(head);
        let head = head.trim_start_matches('\u{feff}');
        if XML_DECLARATION.is_match(head) {
            Self::Dash
        } else {
            Self::Hls
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedManifest {
    pub media_sequence: u64,
    pub segments: Vec<SegmentRef>,
    pub playlists: Vec<PlaylistRef>,
    pub media_groups: MediaGroups,
}

impl ParsedManifest {
    pub fn parse(format: ManifestFormat, body: &[u8], url: &Url) -> MirrorResult<Self> {
        match format {
            ManifestFormat::Hls => hls::parse(body),
            ManifestFormat::Dash => dash::parse(body, url),
        }
    }

    /// Child playlists in traversal order: playlists first, then every media group
    /// rendition. The position in this list is the child index.
    pub fn children(&self) -> Vec<&PlaylistRef> {
        self.playlists
            .iter()
            .chain(self.media_groups.renditions())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SegmentRef {
    /// Reference as written in the manifest, or absolute for DASH.
    pub uri: String,
    pub key: Option<KeyRef>,
    /// Initialization segment this segment depends on.
    pub map: Option<String>,
    pub byte_range: Option<String>,
}

impl SegmentRef {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            key: None,
            map: None,
            byte_range: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRef {
    pub method: KeyMethod,
    pub uri: Option<String>,
    pub iv: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyMethod {
    None,
    Aes128,
    Other(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlaylistRef {
    /// A playlist fetched on its own. Entries without a uri still take a child index.
    Remote(Option<String>),
    /// A rendition already described by its parent, as in DASH.
    Inline {
        id: String,
        manifest: Box<ParsedManifest>,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaGroups {
    pub audio: Vec<MediaGroup>,
    pub video: Vec<MediaGroup>,
    pub closed_captions: Vec<MediaGroup>,
    pub subtitles: Vec<MediaGroup>,
}

impl MediaGroups {
    /// Renditions of AUDIO, VIDEO, CLOSED-CAPTIONS and SUBTITLES groups, in that order.
    pub fn renditions(&self) -> impl Iterator<Item = &PlaylistRef> {
        self.audio
            .iter()
            .chain(&self.video)
            .chain(&self.closed_captions)
            .chain(&self.subtitles)
            .flat_map(|group| group.renditions.iter())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaGroup {
    pub id: String,
    pub renditions: Vec<PlaylistRef>,
}

impl MediaGroup {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            renditions: Vec::new(),
        }
    }
}

/// Append `rendition` to the group called `id`, creating it when missing.
pub(crate) fn push_rendition(groups: &mut Vec<MediaGroup>, id: &str, rendition: PlaylistRef) {
    match groups.iter_mut().find(|g| g.id == id) {
        Some(group) => group.renditions.push(rendition),
        None => {
            let mut group = MediaGroup::new(id);
            group.renditions.push(rendition);
            groups.push(group);
        }
    }
}
