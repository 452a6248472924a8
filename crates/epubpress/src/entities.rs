//! HTML5 character reference decoding on top of `quick-xml`'s entity table.
//! XHTML content documents routinely use HTML named entities that XML does
//! not define, and `quick-xml` reports them unresolved.

use std::borrow::Cow;
use std::sync::LazyLock;

use quick_xml::escape::{resolve_html5_entity, unescape_with};
use regex::Regex;

static RE_REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&(#[xX]?[0-9A-Fa-f]+|[A-Za-z][A-Za-z0-9]*);").unwrap());

/// Expansion of a reference given without `&` and `;`, if it is known.
pub(crate) fn resolve(name: &str) -> Option<String> {
    let reference = format!("&{};", name);
    unescape_with(&reference, resolve_html5_entity)
        .ok()
        .map(Cow::into_owned)
}

/// Appends the expansion of a reference to `out`, keeping the raw reference
/// text when it is unknown so no content is silently dropped.
pub(crate) fn push_reference(out: &mut String, name: &str) {
    match resolve(name) {
        Some(expansion) => out.push_str(&expansion),
        None => {
            out.push('&');
            out.push_str(name);
            out.push(';');
        }
    }
}

/// Decodes every well-formed reference in `text`. Stray ampersands and
/// unknown names are kept as written.
pub(crate) fn decode(text: &str) -> Cow<'_, str> {
    if !text.contains('&') {
        return Cow::Borrowed(text);
    }
    if let Ok(decoded) = unescape_with(text, resolve_html5_entity) {
        return decoded;
    }
    RE_REFERENCE.replace_all(text, |caps: &regex::Captures<'_>| {
        resolve(&caps[1]).unwrap_or_else(|| caps[0].to_string())
    })
}
