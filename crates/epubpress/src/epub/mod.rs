//! Document extraction: EPUB container → ordered chapters + resources.

pub mod container;
pub mod paths;

use std::collections::BTreeMap;
use std::path::Path;

use log::{debug, warn};
use rbook::ebook::element::Href;
use rbook::prelude::*;
use rbook::Epub;
use serde::{Deserialize, Serialize};

use crate::error::ConversionError;

use container::EpubArchive;

/// Default upper bound for a single decompressed archive entry.
pub const DEFAULT_MAX_ENTRY_BYTES: u64 = 64 * 1024 * 1024;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookMetadata {
    pub title: Option<String>,
    pub creators: Vec<String>,
    pub language: Option<String>,
}

/// One spine entry's raw content document.
#[derive(Debug, Clone)]
pub struct ChapterDocument {
    /// Position in the extracted chapter sequence.
    pub index: usize,
    /// Position of the itemref in the declared spine.
    pub spine_position: usize,
    pub id: String,
    /// Archive path of the content document.
    pub href: String,
    pub media_type: String,
    pub linear: bool,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct Resource {
    pub href: String,
    pub media_type: String,
    pub data: Vec<u8>,
}

/// Embedded images keyed by archive path.
#[derive(Debug, Clone, Default)]
pub struct ResourceMap {
    by_href: BTreeMap<String, Resource>,
}

impl ResourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, resource: Resource) {
        self.by_href.insert(resource.href.clone(), resource);
    }

    pub fn get(&self, href: &str) -> Option<&Resource> {
        self.by_href.get(href)
    }

    pub fn contains(&self, href: &str) -> bool {
        self.by_href.contains_key(href)
    }

    pub fn len(&self) -> usize {
        self.by_href.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_href.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.by_href.values()
    }

    /// Finds an image by bare file name, for content documents that refer to
    /// images with paths that do not match the manifest layout.
    pub fn find_by_file_name(&self, name: &str) -> Option<&Resource> {
        self.by_href
            .values()
            .find(|r| paths::file_name(&r.href) == name)
    }
}

#[derive(Debug, Clone)]
pub struct ExtractedBook {
    pub metadata: BookMetadata,
    pub chapters: Vec<ChapterDocument>,
    pub resources: ResourceMap,
    /// Non-fatal observations (skipped spine entries, missing resources).
    pub warnings: Vec<String>,
}

pub trait BookExtractor: Send {
    fn extract(&self, path: &Path) -> Result<ExtractedBook, ConversionError>;
}

pub struct EpubExtractor {
    max_entry_bytes: u64,
}

impl EpubExtractor {
    pub fn new() -> Self {
        Self::with_entry_limit(DEFAULT_MAX_ENTRY_BYTES)
    }

    pub fn with_entry_limit(max_entry_bytes: u64) -> Self {
        Self { max_entry_bytes }
    }
}

impl Default for EpubExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl BookExtractor for EpubExtractor {
    fn extract(&self, path: &Path) -> Result<ExtractedBook, ConversionError> {
        let mut archive = EpubArchive::open(path, self.max_entry_bytes)?;
        archive.check_protection()?;
        archive.check_package_sizes()?;

        let epub = Epub::options()
            .strict(false)
            .skip_toc(true)
            .open(path)
            .map_err(|e| ConversionError::malformed(format!("invalid package: {}", e)))?;

        let metadata = read_metadata(&epub);
        let manifest = epub.manifest();

        let mut warnings = Vec::new();
        let mut chapters = Vec::new();

        for (spine_position, itemref) in epub.spine().entries().enumerate() {
            let Some(item) = manifest.by_id(itemref.idref()) else {
                warnings.push(format!(
                    "spine entry {} refers to unknown manifest item '{}'",
                    spine_position + 1,
                    itemref.idref()
                ));
                continue;
            };

            let Some(href) = archive_path(&item.href()) else {
                warnings.push(format!("manifest item '{}' has an unusable href", item.id()));
                continue;
            };

            let media_type = media_type_of(item.media_type(), &href);
            if !is_content_document(&media_type) {
                warnings.push(format!(
                    "spine entry '{}' ({}) is not a content document",
                    item.id(),
                    media_type
                ));
                continue;
            }

            let content = archive.read(&href)?.ok_or_else(|| {
                ConversionError::malformed(format!(
                    "spine document '{}' is missing from the archive",
                    href
                ))
            })?;

            chapters.push(ChapterDocument {
                index: chapters.len(),
                spine_position,
                id: item.id().to_string(),
                href,
                media_type,
                linear: itemref.is_linear(),
                content,
            });
        }

        if chapters.is_empty() {
            return Err(ConversionError::malformed(
                "spine contains no readable content documents",
            ));
        }

        let mut resources = ResourceMap::new();
        for item in manifest.images() {
            let Some(href) = archive_path(&item.href()) else {
                continue;
            };
            let media_type = media_type_of(item.media_type(), &href);

            match archive.read(&href) {
                Ok(Some(data)) => resources.insert(Resource {
                    href,
                    media_type,
                    data,
                }),
                Ok(None) => {
                    warn!("Manifest image '{}' is missing from the archive", href);
                    warnings.push(format!("resource '{}' is missing from the archive", href));
                }
                Err(e @ ConversionError::UnsupportedProtection(_)) => return Err(e),
                Err(e) => {
                    warnings.push(format!("resource '{}' skipped: {}", href, e));
                }
            }
        }

        debug!(
            "Extracted {} chapters and {} images from {:?}",
            chapters.len(),
            resources.len(),
            path.file_name()
        );

        Ok(ExtractedBook {
            metadata,
            chapters,
            resources,
            warnings,
        })
    }
}

fn read_metadata(epub: &Epub) -> BookMetadata {
    let meta = epub.metadata();
    BookMetadata {
        title: meta
            .title()
            .map(|t| collapse_whitespace(t.value()))
            .filter(|t| !t.is_empty()),
        creators: meta
            .creators()
            .map(|c| collapse_whitespace(c.value()))
            .filter(|c| !c.is_empty())
            .collect(),
        language: meta
            .language()
            .map(|l| l.value().trim().to_string())
            .filter(|l| !l.is_empty()),
    }
}

/// Archive entry name for a resolved manifest href (`/OEBPS/a%20b.xhtml`
/// → `OEBPS/a b.xhtml`).
fn archive_path(href: &Href<'_>) -> Option<String> {
    let decoded = href.decode();
    let path = decoded.trim_start_matches('/');
    (!path.is_empty()).then(|| path.to_string())
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn media_type_of(declared: &str, href: &str) -> String {
    let declared = declared.trim().to_ascii_lowercase();
    if !declared.is_empty() {
        return declared;
    }
    mime_guess::from_path(href)
        .first_raw()
        .unwrap_or("application/octet-stream")
        .to_string()
}

fn is_content_document(media_type: &str) -> bool {
    matches!(media_type, "application/xhtml+xml" | "text/html")
}
