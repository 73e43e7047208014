/// Replace every occurrence of `reference` in a playlist body with `replacement`.
///
/// Only whole references are replaced: a uri line equal to `reference`, or a quoted
/// attribute value such as `URI="reference"` on a tag line. `seg1.ts` therefore never
/// matches inside `seg10.ts`.
pub fn rewrite_reference(content: &str, reference: &str, replacement: &str) -> String {
    if reference.is_empty() || reference == replacement {
        return content.to_string();
    }

    let quoted = format!("\"{reference}\"");
    let quoted_replacement = format!("\"{replacement}\"");

    let mut result = String::with_capacity(content.len());
    for line in content.split_inclusive('\n') {
        let body = line.trim_end_matches(['\r', '\n']);
        let ending = &line[body.len()..];

        if body.trim() == reference {
            let start = body.len() - body.trim_start().len();
            result.push_str(&body[..start]);
            result.push_str(replacement);
            result.push_str(&body[start + reference.len()..]);
        } else if body.trim_start().starts_with('#') && body.contains(&quoted) {
            result.push_str(&body.replace(&quoted, &quoted_replacement));
        } else {
            result.push_str(body);
        }
        result.push_str(ending);
    }
    result
}

/// Remove every `#EXT-X-KEY` line that points at `key_uri`.
pub fn strip_key_lines(content: &str, key_uri: &str) -> String {
    let quoted = format!("\"{key_uri}\"");
    content
        .split_inclusive('\n')
        .filter(|line| {
            let line = line.trim_start();
            !(line.starts_with("#EXT-X-KEY") && line.contains(&quoted))
        })
        .collect()
}
