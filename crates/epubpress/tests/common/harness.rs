//! Test harness for isolated queue runs.
//!
//! `TestHarness` owns a temp directory with a `library/` of input books and
//! an `output/` directory, builds queues over them, and inspects the PDFs
//! they produce.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::Receiver;
use lopdf::{Document, Object};
use tempfile::TempDir;

use epubpress::epub::{BookExtractor, EpubExtractor, ExtractedBook};
use epubpress::queue::PipelineFactory;
use epubpress::{
    ConversionError, ConversionQueue, DestinationPolicy, LopdfRenderer, Normalizer, Pipeline,
    PipelineConfig, QueueOptions,
};

use super::builders::EpubBuilder;

pub const WAIT: Duration = Duration::from_secs(60);

pub struct TestHarness {
    temp_dir: TempDir,
    pub library_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let library_dir = temp_dir.path().join("library");
        let output_dir = temp_dir.path().join("output");
        std::fs::create_dir_all(&library_dir).expect("Failed to create library dir");
        std::fs::create_dir_all(&output_dir).expect("Failed to create output dir");
        Self {
            temp_dir,
            library_dir,
            output_dir,
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `book` to `library/<name>`.
    pub fn write_book(&self, name: &str, book: &EpubBuilder) -> PathBuf {
        let path = self.library_dir.join(name);
        book.write_to(&path);
        path
    }

    pub fn write_file(&self, name: &str, content: &[u8]) -> PathBuf {
        let path = self.library_dir.join(name);
        std::fs::write(&path, content).expect("Failed to write input file");
        path
    }

    /// Options writing into `output/`.
    pub fn options(&self, workers: usize) -> QueueOptions {
        QueueOptions {
            worker_count: workers,
            destination: DestinationPolicy::Directory {
                path: self.output_dir.clone(),
            },
            ..QueueOptions::default()
        }
    }

    pub fn queue(&self, workers: usize) -> ConversionQueue {
        ConversionQueue::new(self.options(workers), PipelineConfig::default())
            .expect("Failed to start queue")
    }

    pub fn queue_with_extractor<E>(&self, workers: usize, extractor: E) -> ConversionQueue
    where
        E: BookExtractor + Clone + Sync + 'static,
    {
        let factory: PipelineFactory = Arc::new(move || {
            Pipeline::new(
                Box::new(extractor.clone()),
                Normalizer::new(),
                Box::new(LopdfRenderer::default()),
            )
        });
        ConversionQueue::with_pipeline_factory(self.options(workers), factory)
            .expect("Failed to start queue")
    }

    /// Files in `output/`, sorted by name.
    pub fn output_files(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(&self.output_dir)
            .expect("Failed to read output dir")
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}

pub fn load_pdf(path: &Path) -> Document {
    Document::load(path).unwrap_or_else(|e| panic!("{} is not a PDF: {}", path.display(), e))
}

/// Outline entries as (title, 1-based page number), in order.
pub fn outline(doc: &Document) -> Vec<(String, u32)> {
    let page_numbers: std::collections::HashMap<_, _> =
        doc.get_pages().into_iter().map(|(n, id)| (id, n)).collect();

    let catalog = doc.catalog().unwrap();
    let Ok(outlines) = catalog.get(b"Outlines") else {
        return Vec::new();
    };
    let outlines = doc.get_dictionary(outlines.as_reference().unwrap()).unwrap();

    let mut entries = Vec::new();
    let mut next = outlines.get(b"First").ok().map(|o| o.as_reference().unwrap());
    while let Some(id) = next {
        let item = doc.get_dictionary(id).unwrap();
        let title = match item.get(b"Title").unwrap() {
            Object::String(bytes, _) => decode_text_string(bytes),
            other => panic!("unexpected title object {:?}", other),
        };
        let dest = item.get(b"Dest").unwrap().as_array().unwrap();
        let page = page_numbers[&dest[0].as_reference().unwrap()];
        entries.push((title, page));
        next = item.get(b"Next").ok().map(|o| o.as_reference().unwrap());
    }
    entries
}

fn decode_text_string(bytes: &[u8]) -> String {
    if let Some(utf16) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = utf16
            .chunks(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        String::from_utf8_lossy(bytes).into_owned()
    }
}

pub fn page_text(doc: &Document, page: u32) -> String {
    doc.extract_text(&[page]).unwrap_or_default()
}

/// Wraps the real extractor; records every call and the peak number of
/// concurrent calls, and can hold each call for a while or until released.
#[derive(Clone)]
pub struct ObservingExtractor {
    inner: Arc<EpubExtractor>,
    seen: Arc<Mutex<Vec<PathBuf>>>,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    delay: Duration,
    gate: Option<Receiver<()>>,
}

impl ObservingExtractor {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(EpubExtractor::new()),
            seen: Arc::new(Mutex::new(Vec::new())),
            active: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
            delay: Duration::ZERO,
            gate: None,
        }
    }

    /// Each call sleeps for `delay` before extracting.
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new()
        }
    }

    /// Each call waits for one message (or disconnect) on `gate`.
    pub fn gated(gate: Receiver<()>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new()
        }
    }

    pub fn seen(&self) -> Vec<PathBuf> {
        self.seen.lock().unwrap().clone()
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl BookExtractor for ObservingExtractor {
    fn extract(&self, path: &Path) -> Result<ExtractedBook, ConversionError> {
        self.seen.lock().unwrap().push(path.to_path_buf());
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            let _ = gate.recv_timeout(WAIT);
        }
        std::thread::sleep(self.delay);

        let result = self.inner.extract(path);
        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
