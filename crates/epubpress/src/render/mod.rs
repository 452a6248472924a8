//! PDF rendering: layout, pagination, image embedding and atomic output.

pub mod fonts;
pub mod images;
pub mod layout;
pub mod output;
pub mod typeset;
pub mod writer;

use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::{debug, warn};

use crate::config::Config;
use crate::epub::ResourceMap;
use crate::error::ConversionError;
use crate::normalize::NormalizedChapter;

pub use fonts::{FontSet, FontSource, UnicodeFont};
pub use images::{ImageSettings, PreparedImage};
pub use output::OverwriteRule;
pub use typeset::{PageSettings, PageSize};

use fonts::FontId;
use typeset::{PageItem, TitlePage, TypesetBook, Typesetter};
use writer::{OutlineEntry, PdfInfo};

#[derive(Debug, Clone, PartialEq)]
pub struct RenderOptions {
    pub page: PageSettings,
    pub images: ImageSettings,
    pub title_page: bool,
    pub fallback_font: FontSource,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            page: PageSettings::default(),
            images: ImageSettings::default(),
            title_page: true,
            fallback_font: FontSource::default(),
        }
    }
}

impl RenderOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            page: PageSettings {
                size: config.page.size,
                font_size: config.page.font_size,
                line_height: config.page.line_height,
            },
            images: ImageSettings {
                max_width: config.images.max_width,
                jpeg_quality: config.images.jpeg_quality,
            },
            title_page: config.title_page,
            fallback_font: config.page.fallback_font.clone(),
        }
    }
}

/// Everything the renderer needs from one book, in spine order.
pub struct RenderDocument<'a> {
    pub title: &'a str,
    pub authors: &'a [String],
    pub chapters: &'a [NormalizedChapter],
    pub resources: &'a ResourceMap,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTarget {
    pub path: PathBuf,
    pub overwrite: OverwriteRule,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderSummary {
    pub page_count: usize,
    /// 1-based page number of each chapter's first page.
    pub chapter_start_pages: Vec<usize>,
    pub warnings: Vec<String>,
}

pub trait PdfRenderer: Send {
    fn render(
        &mut self,
        document: &RenderDocument<'_>,
        target: &OutputTarget,
    ) -> Result<RenderSummary, ConversionError>;
}

pub struct LopdfRenderer {
    options: RenderOptions,
    fonts: FontSet,
}

impl LopdfRenderer {
    /// Loads the fallback font once. A font that cannot be loaded is logged
    /// and rendering continues with the standard fonts.
    pub fn new(options: RenderOptions) -> Self {
        let fallback = match options.fallback_font.load() {
            Ok(Some(font)) => Some(font),
            Ok(None) => {
                debug!(source = ?options.fallback_font, "No fallback font available");
                None
            }
            Err(e) => {
                warn!(
                    source = ?options.fallback_font,
                    error = %e,
                    "Fallback font could not be loaded"
                );
                None
            }
        };
        Self {
            options,
            fonts: FontSet::new(fallback),
        }
    }

    /// Renders to memory; returns the PDF bytes with the summary.
    pub fn render_bytes(
        &self,
        document: &RenderDocument<'_>,
    ) -> Result<(Vec<u8>, RenderSummary), ConversionError> {
        let mut warnings = Vec::new();

        let mut prepared = BTreeMap::new();
        for chapter in document.chapters {
            for href in &chapter.images {
                if prepared.contains_key(href) {
                    continue;
                }
                let Some(resource) = document.resources.get(href) else {
                    continue;
                };
                match images::prepare(&resource.data, &self.options.images) {
                    Ok(image) => {
                        prepared.insert(href.clone(), image);
                    }
                    Err(e) => {
                        warn!(image = %href, error = %e, "Image could not be embedded");
                        warnings.push(format!("{}: image cannot be embedded: {}", href, e));
                    }
                }
            }
        }

        let blocks: Vec<_> = document
            .chapters
            .iter()
            .map(|chapter| layout::layout(&chapter.markup))
            .collect();

        let title_page = self.options.title_page.then_some(TitlePage {
            title: document.title,
            authors: document.authors,
        });
        let book = Typesetter::new(self.options.page, self.fonts.clone()).typeset(
            title_page,
            &blocks,
            &prepared,
        );
        for warning in replacement_warnings(&book, document.chapters, &self.fonts) {
            warn!("{}", warning);
            warnings.push(warning);
        }

        let outline: Vec<OutlineEntry> = document
            .chapters
            .iter()
            .zip(&book.chapter_starts)
            .enumerate()
            .map(|(n, (chapter, &page))| OutlineEntry {
                title: chapter
                    .title
                    .clone()
                    .unwrap_or_else(|| format!("Chapter {}", n + 1)),
                page,
            })
            .collect();

        let info = PdfInfo {
            title: Some(document.title.to_string()).filter(|t| !t.is_empty()),
            author: Some(document.authors.join(", ")).filter(|a| !a.is_empty()),
        };

        let bytes = writer::write_pdf(&book, &prepared, &self.fonts, &info, &outline)?;

        debug!(
            pages = book.pages.len(),
            chapters = book.chapter_starts.len(),
            images = prepared.len(),
            bytes = bytes.len(),
            "Rendered PDF"
        );

        let summary = RenderSummary {
            page_count: book.pages.len(),
            chapter_start_pages: book.chapter_starts.iter().map(|p| p + 1).collect(),
            warnings,
        };
        Ok((bytes, summary))
    }
}

/// One warning per chapter (and the title page) that had characters drawn
/// as `?` because no font covers them.
fn replacement_warnings(
    book: &TypesetBook,
    chapters: &[NormalizedChapter],
    fonts: &FontSet,
) -> Vec<String> {
    let missing = |from: usize, to: usize| -> usize {
        book.pages[from..to]
            .iter()
            .flat_map(|page| &page.items)
            .map(|item| match item {
                PageItem::Text { font, text, .. } if *font != FontId::Unicode => {
                    fonts.count_missing(text)
                }
                _ => 0,
            })
            .sum()
    };
    let describe = |count: usize| {
        format!(
            "{} characters not covered by any font were replaced with '?'",
            count
        )
    };

    let mut warnings = Vec::new();
    let first_chapter = book
        .chapter_starts
        .first()
        .copied()
        .unwrap_or(book.pages.len());
    let title = missing(0, first_chapter);
    if title > 0 {
        warnings.push(format!("title page: {}", describe(title)));
    }
    for (n, (chapter, &start)) in chapters.iter().zip(&book.chapter_starts).enumerate() {
        let end = book
            .chapter_starts
            .get(n + 1)
            .copied()
            .unwrap_or(book.pages.len());
        let count = missing(start, end);
        if count > 0 {
            warnings.push(format!("chapter {}: {}", chapter.index + 1, describe(count)));
        }
    }
    warnings
}

impl Default for LopdfRenderer {
    fn default() -> Self {
        Self::new(RenderOptions::default())
    }
}

impl PdfRenderer for LopdfRenderer {
    fn render(
        &mut self,
        document: &RenderDocument<'_>,
        target: &OutputTarget,
    ) -> Result<RenderSummary, ConversionError> {
        let (bytes, summary) = self.render_bytes(document)?;
        output::write_atomic(&target.path, &bytes, target.overwrite)?;
        Ok(summary)
    }
}
