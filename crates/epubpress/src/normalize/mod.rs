//! Content normalization: decode, sanitize and self-contain chapter markup.

mod encoding;
mod repair;
mod rewrite;

use serde::Serialize;
use tracing::debug;

use crate::epub::{ChapterDocument, ResourceMap};
use crate::error::ConversionError;

pub use repair::resource_path;
pub use rewrite::RESOURCE_SCHEME;

/// A chapter reduced to UTF-8 body markup whose resource references are
/// `res:` identifiers into the book's [`ResourceMap`].
#[derive(Debug, Clone, Serialize)]
pub struct NormalizedChapter {
    pub index: usize,
    pub source_href: String,
    pub title: Option<String>,
    pub markup: String,
    pub images: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Normalizer;

impl Normalizer {
    pub fn new() -> Self {
        Self
    }

    pub fn normalize(
        &self,
        chapter: &ChapterDocument,
        resources: &ResourceMap,
    ) -> Result<NormalizedChapter, ConversionError> {
        let text = encoding::decode(&chapter.content)
            .map_err(|e| with_chapter(e, &chapter.href))?;
        let text = encoding::strip_declarations(&text);

        let rewritten = rewrite::rewrite(&text, &chapter.href, resources)
            .map_err(|e| with_chapter(e, &chapter.href))?;

        let title = repair::derive_title(&rewritten.html);
        let markup = repair::escape_stray(&repair::body_markup(&rewritten.html));

        let warnings = rewritten
            .missing_images
            .iter()
            .map(|src| format!("{}: image '{}' not found", chapter.href, src))
            .collect();

        debug!(
            chapter = %chapter.href,
            images = rewritten.images.len(),
            markup_len = markup.len(),
            "Normalized chapter"
        );

        Ok(NormalizedChapter {
            index: chapter.index,
            source_href: chapter.href.clone(),
            title,
            markup,
            images: rewritten.images,
            warnings,
        })
    }
}

fn with_chapter(error: ConversionError, href: &str) -> ConversionError {
    match error {
        ConversionError::UnrenderableContent(message) => {
            ConversionError::UnrenderableContent(format!("{}: {}", href, message))
        }
        other => other,
    }
}
