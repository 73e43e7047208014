use url::Url;

use crate::error::MirrorResult;

fn has_scheme(s: &str) -> bool {
    Url::parse(s).is_ok()
}

/// Resolve a BaseURL, media or initialization reference against `current`.
///
/// The query of `current` (the manifest url or an inherited BaseURL) is carried over
/// when the new reference has none, so signed manifests keep signing their segments.
///
/// ```text
/// https://example.com/manifest.mpd?auth=secret + video42.mp4
///   => https://example.com/video42.mp4?auth=secret
/// https://example.com/manifest.mpd?auth=old + video42.mp4?auth=new
///   => https://example.com/video42.mp4?auth=new
/// ```
pub(crate) fn merge_baseurls(current: &Url, new: &str) -> MirrorResult<Url> {
    if has_scheme(new) {
        return Ok(Url::parse(new)?);
    }

    let mut merged = current.join(new)?;
    if merged.query().is_none() {
        merged.set_query(current.query());
    }
    Ok(merged)
}

/// Resolve a chain of optional BaseURL elements from the outermost level inwards.
pub(crate) fn resolve_base(current: &Url, base: Option<&str>) -> MirrorResult<Url> {
    match base {
        Some(base) => merge_baseurls(current, base),
        None => Ok(current.clone()),
    }
}
