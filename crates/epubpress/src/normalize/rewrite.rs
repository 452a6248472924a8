//! Streaming markup rewrite: active content removal and resource references.

use std::cell::RefCell;

use lol_html::html_content::{ContentType, Element};
use lol_html::{element, rewrite_str, RewriteStrSettings};

use crate::epub::paths;
use crate::epub::ResourceMap;
use crate::error::ConversionError;

/// Prefix of resource identifiers left in normalized markup.
pub const RESOURCE_SCHEME: &str = "res:";

/// Active content, plus `<link>`: layout reads inline styles only.
const REMOVED_ELEMENTS: &str =
    "script, noscript, iframe, object, embed, form, audio, video, canvas, template, link";

#[derive(Debug, Default)]
pub(crate) struct Rewritten {
    pub html: String,
    pub images: Vec<String>,
    pub missing_images: Vec<String>,
}

pub(crate) fn rewrite(
    html: &str,
    chapter_href: &str,
    resources: &ResourceMap,
) -> Result<Rewritten, ConversionError> {
    let chapter_dir = paths::parent_dir(chapter_href);
    let images = RefCell::new(Vec::new());
    let missing = RefCell::new(Vec::new());

    let output = rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![
                element!(REMOVED_ELEMENTS, |el| {
                    el.remove();
                    Ok(())
                }),
                element!("*", |el| {
                    strip_active_attributes(el);
                    Ok(())
                }),
                element!("img", |el| {
                    let src = el.get_attribute("src").unwrap_or_default();
                    match resolve_image(chapter_dir, &src, resources) {
                        Some(href) => {
                            el.set_attribute("src", &format!("{}{}", RESOURCE_SCHEME, href))?;
                            images.borrow_mut().push(href);
                        }
                        None => {
                            let alt = el.get_attribute("alt").unwrap_or_default();
                            el.remove_attribute("src");
                            el.set_attribute("data-missing", alt.trim())?;
                            missing.borrow_mut().push(src);
                        }
                    }
                    Ok(())
                }),
                element!("svg image", |el| {
                    let href = el
                        .get_attribute("xlink:href")
                        .or_else(|| el.get_attribute("href"))
                        .unwrap_or_default();
                    match resolve_image(chapter_dir, &href, resources) {
                        Some(resolved) => {
                            el.replace(
                                &format!(r#"<img src="{}{}" alt=""/>"#, RESOURCE_SCHEME, resolved),
                                ContentType::Html,
                            );
                            images.borrow_mut().push(resolved);
                        }
                        None => {
                            el.replace(r#"<img data-missing="image"/>"#, ContentType::Html);
                            missing.borrow_mut().push(href);
                        }
                    }
                    Ok(())
                }),
            ],
            ..RewriteStrSettings::default()
        },
    )
    .map_err(|e| ConversionError::UnrenderableContent(format!("markup rewrite failed: {}", e)))?;

    Ok(Rewritten {
        html: output,
        images: dedup(images.into_inner()),
        missing_images: missing.into_inner(),
    })
}

fn strip_active_attributes(el: &mut Element) {
    let names: Vec<String> = el
        .attributes()
        .iter()
        .map(|attr| attr.name())
        .filter(|name| {
            let lower = name.to_ascii_lowercase();
            lower.starts_with("on")
                || (matches!(lower.as_str(), "href" | "src" | "xlink:href" | "action")
                    && el
                        .get_attribute(name)
                        .is_some_and(|v| v.trim().to_ascii_lowercase().starts_with("javascript:")))
        })
        .collect();
    for name in names {
        el.remove_attribute(&name);
    }
}

/// Looks an image reference up in the resource map, trying the spellings
/// books use in practice: relative to the chapter, percent-encoded or not,
/// relative to the archive root and finally by bare file name.
pub(crate) fn resolve_image(chapter_dir: &str, src: &str, resources: &ResourceMap) -> Option<String> {
    let src = src.trim();
    if src.is_empty() {
        return None;
    }
    let is_image = |href: &str| resources.contains(href);

    let raw_joined = if chapter_dir.is_empty() {
        src.trim_start_matches("./").to_string()
    } else {
        format!("{}/{}", chapter_dir, src.trim_start_matches("./"))
    };

    let candidates = [
        paths::resolve_href(chapter_dir, src),
        Some(raw_joined),
        paths::resolve_href("", src),
    ];
    if let Some(found) = candidates.into_iter().flatten().find(|c| is_image(c)) {
        return Some(found);
    }

    let decoded = paths::decode_href(src);
    let name = paths::file_name(decoded.split(['#', '?']).next().unwrap_or(""));
    if name.is_empty() {
        return None;
    }
    resources
        .find_by_file_name(name)
        .map(|r| r.href.clone())
}

fn dedup(items: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}
