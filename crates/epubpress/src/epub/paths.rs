//! Resolution of manifest and content hrefs to archive entry names.

use std::borrow::Cow;

/// Directory part of an archive path (`"OEBPS/text/ch1.xhtml"` → `"OEBPS/text"`).
pub fn parent_dir(path: &str) -> &str {
    match path.rfind('/') {
        Some(pos) => &path[..pos],
        None => "",
    }
}

/// Final path segment (`"OEBPS/images/cover.jpg"` → `"cover.jpg"`).
pub fn file_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(pos) => &path[pos + 1..],
        None => path,
    }
}

/// Percent-decodes an href, falling back to the raw text on invalid escapes.
pub fn decode_href(href: &str) -> Cow<'_, str> {
    urlencoding::decode(href).unwrap_or(Cow::Borrowed(href))
}

/// Resolves `href` relative to `base_dir` inside the container.
///
/// Fragments and queries are dropped, percent escapes decoded and `.`/`..`
/// segments collapsed. External references (`http:`, `data:`, `mailto:` …)
/// resolve to `None` because they never name an archive entry.
pub fn resolve_href(base_dir: &str, href: &str) -> Option<String> {
    let href = href.trim();
    let href = href.split('#').next().unwrap_or("");
    let href = href.split('?').next().unwrap_or("");
    if href.is_empty() || is_external(href) {
        return None;
    }

    let decoded = decode_href(href);
    let (base, relative) = match decoded.strip_prefix('/') {
        Some(absolute) => ("", absolute),
        None => (base_dir, decoded.as_ref()),
    };

    let mut segments: Vec<&str> = base.split('/').filter(|s| !s.is_empty()).collect();
    for segment in relative.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    if segments.is_empty() {
        None
    } else {
        Some(segments.join("/"))
    }
}

fn is_external(href: &str) -> bool {
    let lower = href.to_ascii_lowercase();
    lower.contains("://")
        || lower.starts_with("data:")
        || lower.starts_with("mailto:")
        || lower.starts_with("javascript:")
        || lower.starts_with("res:")
}
