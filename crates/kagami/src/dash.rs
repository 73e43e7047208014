//! Conversion of an MPD into the playlist shape used for HLS.
//!
//! Every representation becomes one inline child playlist whose segments are
//! absolute urls:
//!
//! * video (and anything unclassified) representations are listed in `playlists`
//! * audio representations form the `audio` media group
//! * text representations form the `subs` subtitle group
//!
//! Representations sharing an id across periods are concatenated. A representation
//! addressed with `SegmentBase@indexRange` gets its segment index appended as an
//! extra segment after its media segments.

mod template;
mod url;

use std::time::Duration;

use ::url::Url;
use dash_mpd::{AdaptationSet, Representation, SegmentBase, SegmentList, SegmentTemplate};

use crate::{
    error::{MirrorError, MirrorResult},
    manifest::{push_rendition, ParsedManifest, PlaylistRef, SegmentRef},
};

pub use template::TemplateVars;
use self::url::{merge_baseurls, resolve_base};

pub const AUDIO_GROUP: &str = "audio";
pub const SUBTITLE_GROUP: &str = "subs";

pub(crate) fn parse(body: &[u8], mpd_url: &Url) -> MirrorResult<ParsedManifest> {
    let xml = std::str::from_utf8(body).map_err(|e| MirrorError::MpdParsing(e.to_string()))?;
    let mpd = dash_mpd::parse(xml)?;

    let base_url = resolve_base(mpd_url, mpd.base_url.first().map(|u| u.base.as_str()))?;
    let single_period = mpd.periods.len() == 1;

    let mut renditions: Vec<Rendition> = Vec::new();
    for period in &mpd.periods {
        let period_base = resolve_base(&base_url, period.BaseURL.first().map(|u| u.base.as_str()))?;
        // a lone period may leave its length to the presentation
        let period_duration = period
            .duration
            .or(mpd.mediaPresentationDuration.filter(|_| single_period));
        let period_addressing = Addressing {
            template: period.SegmentTemplate.as_ref(),
            list: period.SegmentList.as_ref(),
            base: period.SegmentBase.as_ref(),
        };

        for adaptation in &period.adaptations {
            let adaptation_base =
                resolve_base(&period_base, adaptation.BaseURL.first().map(|u| u.base.as_str()))?;
            let adaptation_addressing = Addressing {
                template: adaptation.SegmentTemplate.as_ref(),
                list: adaptation.SegmentList.as_ref(),
                base: adaptation.SegmentBase.as_ref(),
            }
            .inherit(&period_addressing);

            for representation in &adaptation.representations {
                let base = resolve_base(
                    &adaptation_base,
                    representation.BaseURL.first().map(|u| u.base.as_str()),
                )?;
                let addressing = Addressing {
                    template: representation.SegmentTemplate.as_ref(),
                    list: representation.SegmentList.as_ref(),
                    base: representation.SegmentBase.as_ref(),
                }
                .inherit(&adaptation_addressing);

                let (segments, sidx) = addressing.segments(&base, representation, period_duration)?;
                let rendition = Rendition {
                    kind: RenditionKind::classify(adaptation, representation),
                    id: representation.id.clone(),
                    segments,
                    sidx,
                };
                merge_rendition(&mut renditions, rendition);
            }
        }
    }

    Ok(into_manifest(renditions))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RenditionKind {
    Video,
    Audio,
    Text,
}

impl RenditionKind {
    fn classify(adaptation: &AdaptationSet, representation: &Representation) -> Self {
        let hints = [
            adaptation.contentType.as_deref(),
            adaptation.mimeType.as_deref(),
            representation.contentType.as_deref(),
            representation.mimeType.as_deref(),
        ];
        for hint in hints.into_iter().flatten() {
            let hint = hint.to_ascii_lowercase();
            if hint.starts_with("audio") {
                return Self::Audio;
            }
            if hint.starts_with("text") || hint.contains("ttml") || hint.contains("vtt") {
                return Self::Text;
            }
            if hint.starts_with("video") {
                return Self::Video;
            }
        }
        Self::Video
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Text => "text",
        }
    }
}

struct Rendition {
    kind: RenditionKind,
    id: Option<String>,
    segments: Vec<SegmentRef>,
    sidx: Option<SegmentRef>,
}

fn merge_rendition(renditions: &mut Vec<Rendition>, rendition: Rendition) {
    let existing = rendition.id.as_ref().and_then(|id| {
        renditions
            .iter()
            .position(|r| r.kind == rendition.kind && r.id.as_ref() == Some(id))
    });

    match existing {
        Some(position) => {
            let existing = &mut renditions[position];
            existing.segments.extend(rendition.segments);
            if existing.sidx.is_none() {
                existing.sidx = rendition.sidx;
            }
        }
        None => renditions.push(rendition),
    }
}

fn into_manifest(renditions: Vec<Rendition>) -> ParsedManifest {
    let mut manifest = ParsedManifest::default();

    for (index, rendition) in renditions.into_iter().enumerate() {
        let mut segments = rendition.segments;
        segments.extend(rendition.sidx);

        let id = rendition
            .id
            .unwrap_or_else(|| format!("{}-{index}", rendition.kind.name()));
        let playlist = PlaylistRef::Inline {
            id,
            manifest: Box::new(ParsedManifest {
                segments,
                ..Default::default()
            }),
        };

        match rendition.kind {
            RenditionKind::Video => manifest.playlists.push(playlist),
            RenditionKind::Audio => {
                push_rendition(&mut manifest.media_groups.audio, AUDIO_GROUP, playlist)
            }
            RenditionKind::Text => {
                push_rendition(&mut manifest.media_groups.subtitles, SUBTITLE_GROUP, playlist)
            }
        }
    }

    manifest
}

/// The addressing elements in effect for a representation. The innermost level
/// declaring an element wins.
#[derive(Clone, Copy, Default)]
struct Addressing<'a> {
    template: Option<&'a SegmentTemplate>,
    list: Option<&'a SegmentList>,
    base: Option<&'a SegmentBase>,
}

impl<'a> Addressing<'a> {
    fn inherit(self, outer: &Addressing<'a>) -> Self {
        Self {
            template: self.template.or(outer.template),
            list: self.list.or(outer.list),
            base: self.base.or(outer.base),
        }
    }

    /// Media segments of the representation, and its segment index if declared.
    fn segments(
        &self,
        base: &Url,
        representation: &Representation,
        period_duration: Option<Duration>,
    ) -> MirrorResult<(Vec<SegmentRef>, Option<SegmentRef>)> {
        if let Some(template) = self.template {
            let vars = TemplateVars::new(representation.id.clone(), representation.bandwidth);
            return Ok((template_segments(base, template, vars, period_duration)?, None));
        }

        if let Some(list) = self.list {
            return Ok((list_segments(base, list)?, None));
        }

        // SegmentBase or a bare BaseURL: the whole representation is one file
        let whole = SegmentRef::new(base.as_str());
        let sidx = self
            .base
            .and_then(|segment_base| segment_base.indexRange.as_ref())
            .map(|index_range| SegmentRef {
                uri: base.to_string(),
                key: None,
                map: Some(base.to_string()),
                byte_range: Some(index_range.clone()),
            });
        Ok((vec![whole], sidx))
    }
}

fn template_segments(
    base: &Url,
    template: &SegmentTemplate,
    mut vars: TemplateVars,
    period_duration: Option<Duration>,
) -> MirrorResult<Vec<SegmentRef>> {
    let media = template.media.as_deref().ok_or_else(|| {
        MirrorError::MpdParsing("Missing media url template in SegmentTemplate".to_string())
    })?;
    let map = template
        .initialization
        .as_deref()
        .map(|initialization| merge_baseurls(base, &vars.resolve(initialization)))
        .transpose()?
        .map(|u| u.to_string());

    let start_number = template.startNumber.unwrap_or(1);
    let timescale = template.timescale.unwrap_or(1).max(1);
    let push = |vars: &TemplateVars, segments: &mut Vec<SegmentRef>| -> MirrorResult<()> {
        let uri = merge_baseurls(base, &vars.resolve(media))?;
        segments.push(SegmentRef {
            uri: uri.to_string(),
            key: None,
            map: map.clone(),
            byte_range: None,
        });
        Ok(())
    };

    let mut segments = Vec::new();
    if let Some(timeline) = &template.SegmentTimeline {
        let period_end = period_duration.map(|d| d.as_secs_f64() * timescale as f64);
        let mut time = 0u64;
        let mut number = start_number;

        for s in &timeline.segments {
            if let Some(t) = s.t {
                time = t;
            }
            // S@r counts additional segments, a negative value repeats to the period end
            let repeat = match s.r.unwrap_or(0) {
                r if r >= 0 => r as u64,
                _ => match period_end {
                    Some(end) if s.d > 0 && end > time as f64 => {
                        ((end - time as f64) / s.d as f64).ceil() as u64 - 1
                    }
                    _ => 0,
                },
            };

            for _ in 0..=repeat {
                vars.number(number).time(time);
                push(&vars, &mut segments)?;
                number += 1;
                time += s.d;
            }
        }
    } else if let Some(duration) = template.duration {
        let period_duration = period_duration.ok_or_else(|| {
            MirrorError::MpdParsing("Unknown period duration for SegmentTemplate@duration".to_string())
        })?;
        let segment_seconds = duration / timescale as f64;
        if segment_seconds <= 0. {
            return Err(MirrorError::MpdParsing(
                "Invalid duration in SegmentTemplate".to_string(),
            ));
        }

        let count = (period_duration.as_secs_f64() / segment_seconds).ceil() as u64;
        for index in 0..count {
            vars.number(start_number + index)
                .time((index as f64 * duration) as u64);
            push(&vars, &mut segments)?;
        }
    } else {
        return Err(MirrorError::MpdParsing(
            "SegmentTemplate lacks both SegmentTimeline and duration".to_string(),
        ));
    }

    Ok(segments)
}

fn list_segments(base: &Url, list: &SegmentList) -> MirrorResult<Vec<SegmentRef>> {
    let map = list
        .Initialization
        .as_ref()
        .and_then(|initialization| initialization.sourceURL.as_deref())
        .map(|source| merge_baseurls(base, source))
        .transpose()?
        .map(|u| u.to_string());

    list.segment_urls
        .iter()
        .map(|segment_url| {
            let uri = match segment_url.media.as_deref() {
                Some(media) => merge_baseurls(base, media)?,
                None => base.clone(),
            };
            Ok(SegmentRef {
                uri: uri.to_string(),
                key: None,
                map: map.clone(),
                byte_range: segment_url.mediaRange.clone(),
            })
        })
        .collect()
}
