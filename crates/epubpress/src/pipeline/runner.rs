use std::sync::Arc;

use tracing::{debug, info_span, warn};

use crate::epub::{BookExtractor, EpubExtractor, ExtractedBook};
use crate::error::ConversionError;
use crate::normalize::{NormalizedChapter, Normalizer};
use crate::render::{LopdfRenderer, PdfRenderer, RenderDocument};
use crate::sanitize;

use super::config::PipelineConfig;
use super::context::{CancelFlag, JobOutcome, JobRequest};
use super::progress::{ProgressEvent, ProgressReporter};

const EXTRACTED: f32 = 0.2;
const NORMALIZED: f32 = 0.8;

pub struct Pipeline {
    extractor: Box<dyn BookExtractor>,
    normalizer: Normalizer,
    renderer: Box<dyn PdfRenderer>,
}

impl Pipeline {
    /// Production constructor: builds all stages from config.
    pub fn from_config(config: Arc<PipelineConfig>) -> Self {
        Self {
            extractor: Box::new(EpubExtractor::with_entry_limit(config.max_entry_bytes)),
            normalizer: Normalizer::new(),
            renderer: Box::new(LopdfRenderer::new(config.render.clone())),
        }
    }

    /// Inject specific stages.
    pub fn new(
        extractor: Box<dyn BookExtractor>,
        normalizer: Normalizer,
        renderer: Box<dyn PdfRenderer>,
    ) -> Self {
        Self {
            extractor,
            normalizer,
            renderer,
        }
    }

    /// Converts one EPUB. Cancellation is observed between stages and
    /// between chapters, never inside a stage.
    pub fn run(
        &mut self,
        request: &JobRequest,
        cancel: &CancelFlag,
        progress: &dyn ProgressReporter,
    ) -> Result<JobOutcome, ConversionError> {
        let filename = sanitize::redact_path(&request.source_path);
        let _pipeline_span = info_span!("pipeline",
            job_id = %request.id,
            filename = %filename,
        )
        .entered();

        // Step 1: Extract
        let book = {
            let _step = info_span!("extract").entered();
            check_cancelled(cancel)?;
            progress.report(ProgressEvent::Stage {
                progress: 0.0,
                message: "Reading EPUB...".to_string(),
            });
            let book = self.extractor.extract(&request.source_path)?;
            progress.report(ProgressEvent::Stage {
                progress: EXTRACTED,
                message: format!("Found {} chapters", book.chapters.len()),
            });
            book
        };

        let mut warnings = book.warnings.clone();
        for warning in &book.warnings {
            progress.report(ProgressEvent::Warning(warning.clone()));
        }

        // Step 2: Normalize
        let chapters = {
            let _step = info_span!("normalize", chapters = book.chapters.len()).entered();
            self.step_normalize(&book, cancel, progress, &mut warnings)?
        };

        // Step 3: Render
        let summary = {
            let _step = info_span!("render").entered();
            check_cancelled(cancel)?;
            progress.report(ProgressEvent::Stage {
                progress: NORMALIZED,
                message: "Rendering PDF...".to_string(),
            });

            let title = book
                .metadata
                .title
                .clone()
                .or_else(|| {
                    request
                        .source_path
                        .file_stem()
                        .map(|s| s.to_string_lossy().into_owned())
                })
                .unwrap_or_default();
            let document = RenderDocument {
                title: &title,
                authors: &book.metadata.creators,
                chapters: &chapters,
                resources: &book.resources,
            };
            self.renderer.render(&document, &request.output)?
        };

        for warning in &summary.warnings {
            progress.report(ProgressEvent::Warning(warning.clone()));
        }
        warnings.extend(summary.warnings);

        progress.report(ProgressEvent::Stage {
            progress: 1.0,
            message: format!("Wrote {} pages", summary.page_count),
        });

        Ok(JobOutcome {
            output_path: request.output.path.clone(),
            page_count: summary.page_count,
            chapter_start_pages: summary.chapter_start_pages,
            warnings,
        })
    }

    fn step_normalize(
        &self,
        book: &ExtractedBook,
        cancel: &CancelFlag,
        progress: &dyn ProgressReporter,
        warnings: &mut Vec<String>,
    ) -> Result<Vec<NormalizedChapter>, ConversionError> {
        let total = book.chapters.len();
        let mut normalized = Vec::with_capacity(total);
        let mut first_failure = None;

        for (n, chapter) in book.chapters.iter().enumerate() {
            check_cancelled(cancel)?;

            match self.normalizer.normalize(chapter, &book.resources) {
                Ok(done) => {
                    for warning in &done.warnings {
                        progress.report(ProgressEvent::Warning(warning.clone()));
                    }
                    warnings.extend(done.warnings.iter().cloned());
                    normalized.push(done);
                }
                Err(ConversionError::UnrenderableContent(message)) => {
                    warn!(chapter = %chapter.href, "Skipping chapter: {}", message);
                    let warning = format!("skipped chapter {}: {}", chapter.index + 1, message);
                    progress.report(ProgressEvent::Warning(warning.clone()));
                    warnings.push(warning);
                    first_failure.get_or_insert(message);
                }
                Err(e) => return Err(e),
            }

            let fraction = (n + 1) as f32 / total as f32;
            progress.report(ProgressEvent::Stage {
                progress: EXTRACTED + (NORMALIZED - EXTRACTED) * fraction,
                message: format!("Prepared chapter {} of {}", n + 1, total),
            });
        }

        if normalized.is_empty() {
            let reason = first_failure.unwrap_or_else(|| "the book has no chapters".to_string());
            return Err(ConversionError::render(format!(
                "no chapter could be rendered: {}",
                reason
            )));
        }

        debug!(
            normalized = normalized.len(),
            skipped = total - normalized.len(),
            "Normalized chapters"
        );
        Ok(normalized)
    }
}

fn check_cancelled(cancel: &CancelFlag) -> Result<(), ConversionError> {
    if cancel.is_cancelled() {
        Err(ConversionError::Cancelled)
    } else {
        Ok(())
    }
}
