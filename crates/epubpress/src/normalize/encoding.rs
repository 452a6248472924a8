//! Byte → UTF-8 decoding and removal of prolog declarations.

use std::sync::LazyLock;

use encoding_rs::{Encoding, UTF_16BE, UTF_16LE, WINDOWS_1252};
use regex::Regex;
use tracing::debug;

use crate::error::ConversionError;

static RE_DECLARED_CHARSET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:encoding|charset)\s*=\s*["']?\s*([a-z0-9_.:\-]+)"#).unwrap()
});
static RE_XML_DECL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<\?xml.*?\?>").unwrap());
static RE_DOCTYPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<!DOCTYPE[^>\[]*(?:\[.*?\])?\s*>").unwrap());
static RE_META_CHARSET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<meta\s[^>]*(?:charset|http-equiv\s*=\s*.?content-type)[^>]*>").unwrap()
});

/// Share of control or replacement characters above which a chapter is
/// treated as binary data.
const GARBAGE_RATIO: f64 = 0.05;

/// Decodes chapter bytes to a UTF-8 string. A byte order mark wins over a
/// declared charset; undeclared bytes that are not UTF-8 are read as
/// Windows-1252.
pub(crate) fn decode(bytes: &[u8]) -> Result<String, ConversionError> {
    let text = if let Some((encoding, bom_length)) = Encoding::for_bom(bytes) {
        let (text, _) = encoding.decode_without_bom_handling(&bytes[bom_length..]);
        text.into_owned()
    } else {
        match declared_encoding(bytes) {
            // Without a BOM the declaration was readable as ASCII, so a
            // UTF-16 label cannot be right.
            Some(encoding) if encoding != UTF_16LE && encoding != UTF_16BE => {
                let (text, _) = encoding.decode_without_bom_handling(bytes);
                text.into_owned()
            }
            declared => match std::str::from_utf8(bytes) {
                Ok(text) => text.to_string(),
                Err(_) if declared.is_none() => {
                    let (text, _) = WINDOWS_1252.decode_without_bom_handling(bytes);
                    text.into_owned()
                }
                Err(_) => String::from_utf8_lossy(bytes).into_owned(),
            },
        }
    };

    if looks_binary(&text) {
        return Err(ConversionError::UnrenderableContent(
            "content is binary data, not markup".to_string(),
        ));
    }

    Ok(text)
}

/// Removes XML declarations, doctypes and charset `<meta>` tags, which no
/// longer apply once the text is UTF-8.
pub(crate) fn strip_declarations(text: &str) -> String {
    let text = RE_XML_DECL.replace_all(text, "");
    let text = RE_DOCTYPE.replace_all(&text, "");
    RE_META_CHARSET.replace_all(&text, "").into_owned()
}

fn declared_encoding(bytes: &[u8]) -> Option<&'static Encoding> {
    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(1024)]);
    let caps = RE_DECLARED_CHARSET.captures(&head)?;
    let encoding = Encoding::for_label(caps[1].as_bytes());
    if encoding.is_none() {
        debug!("Unknown declared charset {:?}", &caps[1]);
    }
    encoding
}

fn looks_binary(text: &str) -> bool {
    if text.contains('\0') {
        return true;
    }
    let mut total = 0usize;
    let mut suspicious = 0usize;
    for c in text.chars() {
        total += 1;
        if c == char::REPLACEMENT_CHARACTER || (c.is_control() && !matches!(c, '\n' | '\r' | '\t'))
        {
            suspicious += 1;
        }
    }
    total > 0 && suspicious as f64 / total as f64 > GARBAGE_RATIO
}
