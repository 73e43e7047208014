use std::path::{Component, Path, PathBuf};

use url::Url;

/// Max file name length on OSX and linux, and close enough to the windows limit.
const MAX_FILE_NAME_BYTES: usize = 255;

/// Remove characters that are invalid in file names on common filesystems and
/// cap the result to [`MAX_FILE_NAME_BYTES`].
pub fn sanitize_file_name(name: &str) -> String {
    let mut sanitized: String = name
        .chars()
        .filter(|c| !c.is_control() && !matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*'))
        .collect();

    if sanitized.len() > MAX_FILE_NAME_BYTES {
        let mut end = MAX_FILE_NAME_BYTES;
        while !sanitized.is_char_boundary(end) {
            end -= 1;
        }
        sanitized.truncate(end);
    }

    match sanitized.as_str() {
        "." | ".." => String::new(),
        _ => sanitized,
    }
}

/// Local file name for a remote resource: the last path segment of `url`,
/// percent-decoded and sanitized. Query and fragment never take part in it.
///
/// `fallback` is used when the url has no usable path segment.
pub fn url_basename(url: &Url, fallback: &str) -> String {
    let segment = url
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .unwrap_or_default();
    let decoded = urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| segment.to_string());

    let name = sanitize_file_name(&decoded);
    if name.is_empty() {
        fallback.to_string()
    } else {
        name
    }
}

/// Local path of `url` relative to the directory of `base`, keeping the remote
/// directory layout below it. Urls on another origin or outside that directory
/// fall back to their [basename](url_basename).
pub fn mirrored_path(base: &Url, url: &Url, fallback: &str) -> PathBuf {
    let relative = base
        .join(".")
        .ok()
        .filter(|dir| dir.origin() == url.origin())
        .and_then(|dir| url.path().strip_prefix(dir.path()).map(str::to_string));

    let components: Option<Vec<String>> = relative.and_then(|relative| {
        relative
            .split('/')
            .map(|segment| {
                let decoded = urlencoding::decode(segment).ok()?;
                let name = sanitize_file_name(&decoded);
                (!name.is_empty()).then_some(name)
            })
            .collect()
    });

    match components {
        Some(components) if !components.is_empty() => components.iter().collect(),
        _ => PathBuf::from(url_basename(url, fallback)),
    }
}

/// Relative reference from the directory `from_dir` to `to`, always joined with `/`
/// so it can be written into a playlist.
pub fn relative_path(from_dir: &Path, to: &Path) -> String {
    let from: Vec<Component> = from_dir
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect();
    let to: Vec<Component> = to
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect();

    let common = from
        .iter()
        .zip(to.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut parts: Vec<String> = vec!["..".to_string(); from.len() - common];
    parts.extend(
        to[common..]
            .iter()
            .map(|c| c.as_os_str().to_string_lossy().into_owned()),
    );
    parts.join("/")
}
