use std::sync::LazyLock;

use regex::Regex;

use crate::entities;

static RE_BODY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<body(?:\s[^>]*)?>(.*?)(?:</body\s*>|\z)").unwrap());
static RE_HEAD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<head(?:\s[^>]*)?>.*?(?:</head\s*>|\z)").unwrap());
static RE_HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</?html(?:\s[^>]*)?>").unwrap());
static RE_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<h[1-3](?:\s[^>]*)?>(.*?)</h[1-3]\s*>").unwrap());
static RE_TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title(?:\s[^>]*)?>(.*?)</title\s*>").unwrap());
static RE_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());

/// Inner markup of `<body>`, or the whole document minus `<head>` when the
/// document has no body.
pub(crate) fn body_markup(html: &str) -> String {
    if let Some(caps) = RE_BODY.captures(html) {
        return caps[1].trim().to_string();
    }
    let without_head = RE_HEAD.replace_all(html, "");
    RE_HTML_TAG.replace_all(&without_head, "").trim().to_string()
}

/// Chapter title from the first `h1`-`h3`, falling back to `<title>`.
pub(crate) fn derive_title(html: &str) -> Option<String> {
    let body = RE_BODY
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(html);

    RE_HEADING
        .captures_iter(body)
        .filter_map(|caps| plain_text(&caps[1]))
        .next()
        .or_else(|| RE_TITLE.captures(html).and_then(|caps| plain_text(&caps[1])))
}

fn plain_text(markup: &str) -> Option<String> {
    let text = RE_TAG.replace_all(markup, " ");
    let text = entities::decode(&text);
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    (!text.is_empty()).then_some(text)
}

/// Escapes `&` that does not start an entity and `<` that does not start a
/// tag, comment or declaration.
pub(crate) fn escape_stray(markup: &str) -> String {
    let mut out = String::with_capacity(markup.len() + 16);
    let mut rest = markup;

    while let Some(pos) = rest.find(['&', '<']) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if tail.starts_with('&') {
            if starts_entity(&tail[1..]) {
                out.push('&');
            } else {
                out.push_str("&amp;");
            }
        } else if starts_markup(&tail[1..]) {
            out.push('<');
        } else {
            out.push_str("&lt;");
        }
        rest = &tail[1..];
    }
    out.push_str(rest);
    out
}

fn starts_entity(after_amp: &str) -> bool {
    let Some(end) = after_amp.find(';') else {
        return false;
    };
    let name = &after_amp[..end];
    if name.is_empty() || name.len() > 32 {
        return false;
    }
    match name.strip_prefix('#') {
        Some(num) => match num.strip_prefix(['x', 'X']) {
            Some(hex) => !hex.is_empty() && hex.chars().all(|c| c.is_ascii_hexdigit()),
            None => !num.is_empty() && num.chars().all(|c| c.is_ascii_digit()),
        },
        None => {
            name.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
                && name.chars().all(|c| c.is_ascii_alphanumeric())
        }
    }
}

fn starts_markup(after_lt: &str) -> bool {
    after_lt
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || matches!(c, '/' | '!' | '?'))
}

/// Resource identifier → archive path, if `value` is one.
pub fn resource_path(value: &str) -> Option<&str> {
    value
        .strip_prefix(super::rewrite::RESOURCE_SCHEME)
        .filter(|path| !path.is_empty() && !path.ends_with('/'))
}
