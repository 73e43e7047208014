use m3u8_rs::{AlternativeMediaType, MasterPlaylist, MediaPlaylist, Playlist};

use crate::{
    error::{MirrorError, MirrorResult},
    manifest::{push_rendition, KeyMethod, KeyRef, ParsedManifest, PlaylistRef, SegmentRef},
};

pub(crate) fn parse(body: &[u8]) -> MirrorResult<ParsedManifest> {
    match m3u8_rs::parse_playlist_res(body) {
        Ok(Playlist::MasterPlaylist(playlist)) => Ok(from_master(playlist)),
        Ok(Playlist::MediaPlaylist(playlist)) => Ok(from_media(playlist)),
        Err(error) => Err(MirrorError::M3u8ParseError(error.to_string())),
    }
}

fn from_master(playlist: MasterPlaylist) -> ParsedManifest {
    let mut manifest = ParsedManifest::default();

    // I-frame playlists are kept in declaration order together with normal variants
    manifest.playlists = playlist
        .variants
        .into_iter()
        .map(|variant| PlaylistRef::Remote(Some(variant.uri)))
        .collect();

    for media in playlist.alternatives {
        let groups = &mut manifest.media_groups;
        let groups = match media.media_type {
            AlternativeMediaType::Audio => &mut groups.audio,
            AlternativeMediaType::Video => &mut groups.video,
            AlternativeMediaType::ClosedCaptions => &mut groups.closed_captions,
            AlternativeMediaType::Subtitles => &mut groups.subtitles,
            AlternativeMediaType::Other(kind) => {
                tracing::warn!("Ignored media of unknown type {kind}: {:?}", media.uri);
                continue;
            }
        };
        push_rendition(groups, &media.group_id, PlaylistRef::Remote(media.uri));
    }

    manifest
}

fn from_media(playlist: MediaPlaylist) -> ParsedManifest {
    let segments = playlist
        .segments
        .into_iter()
        .map(|segment| SegmentRef {
            uri: segment.uri,
            key: segment.key.map(|key| KeyRef {
                method: match key.method {
                    m3u8_rs::KeyMethod::None => KeyMethod::None,
                    m3u8_rs::KeyMethod::AES128 => KeyMethod::Aes128,
                    m3u8_rs::KeyMethod::SampleAES => KeyMethod::Other("SAMPLE-AES".to_string()),
                    m3u8_rs::KeyMethod::Other(method) => KeyMethod::Other(method),
                },
                uri: key.uri,
                iv: key.iv,
            }),
            map: segment.map.map(|map| map.uri),
            byte_range: segment.byte_range.map(|range| match range.offset {
                Some(offset) => format!("{}@{offset}", range.length),
                None => range.length.to_string(),
            }),
        })
        .collect();

    ParsedManifest {
        media_sequence: playlist.media_sequence,
        segments,
        ..Default::default()
    }
}
