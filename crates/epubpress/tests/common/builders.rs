//! Builders for EPUB test inputs.
//!
//! The archives are written with the `zip` crate in the same layout real
//! e-books use: a stored `mimetype` first, `META-INF/container.xml`, an OPF
//! package under `OEBPS/`.

#![allow(dead_code)]

use std::io::{Cursor, Write};
use std::path::Path;

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

const CONTAINER_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;

struct Chapter {
    href: String,
    content: Vec<u8>,
}

struct Extra {
    path: String,
    media_type: Option<String>,
    data: Vec<u8>,
}

/// Builder for EPUB archives.
pub struct EpubBuilder {
    title: Option<String>,
    authors: Vec<String>,
    chapters: Vec<Chapter>,
    resources: Vec<Extra>,
    raw_entries: Vec<(String, Vec<u8>)>,
    spine: Option<Vec<String>>,
}

impl EpubBuilder {
    pub fn new(title: &str) -> Self {
        Self {
            title: Some(title.to_string()),
            authors: Vec::new(),
            chapters: Vec::new(),
            resources: Vec::new(),
            raw_entries: Vec::new(),
            spine: None,
        }
    }

    pub fn untitled() -> Self {
        Self {
            title: None,
            ..Self::new("")
        }
    }

    pub fn author(mut self, author: &str) -> Self {
        self.authors.push(author.to_string());
        self
    }

    /// Adds an XHTML chapter with a heading and body paragraphs.
    pub fn chapter(self, heading: &str, body: &str) -> Self {
        let markup = format!("<h1>{}</h1>{}", heading, body);
        self.chapter_body(&markup)
    }

    /// Adds an XHTML chapter whose `<body>` is exactly `body`.
    pub fn chapter_body(self, body: &str) -> Self {
        let n = self.chapters.len() + 1;
        let doc = format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<!DOCTYPE html>\n<html xmlns=\"http://www.w3.org/1999/xhtml\"><head><title>Part {}</title></head><body>{}</body></html>",
            n, body
        );
        self.chapter_bytes(doc.into_bytes())
    }

    /// Adds a chapter document with arbitrary bytes.
    pub fn chapter_bytes(mut self, content: Vec<u8>) -> Self {
        let n = self.chapters.len() + 1;
        self.chapters.push(Chapter {
            href: format!("text/chapter{}.xhtml", n),
            content,
        });
        self
    }

    /// Adds a manifest resource at `OEBPS/<path>`.
    pub fn resource(mut self, path: &str, data: Vec<u8>) -> Self {
        self.resources.push(Extra {
            path: path.to_string(),
            media_type: None,
            data,
        });
        self
    }

    pub fn resource_typed(mut self, path: &str, media_type: &str, data: Vec<u8>) -> Self {
        self.resources.push(Extra {
            path: path.to_string(),
            media_type: Some(media_type.to_string()),
            data,
        });
        self
    }

    /// Adds an archive entry outside the manifest, such as `META-INF/rights.xml`.
    pub fn raw_entry(mut self, path: &str, data: &[u8]) -> Self {
        self.raw_entries.push((path.to_string(), data.to_vec()));
        self
    }

    /// Adobe ADEPT style rights file.
    pub fn drm_protected(self) -> Self {
        self.raw_entry(
            "META-INF/rights.xml",
            br#"<?xml version="1.0"?><adept:rights xmlns:adept="http://ns.adobe.com/adept"/>"#,
        )
    }

    /// Spine as manifest ids; chapters are `ch1`, `ch2`, ... in insertion order.
    pub fn spine(mut self, idrefs: &[&str]) -> Self {
        self.spine = Some(idrefs.iter().map(|s| s.to_string()).collect());
        self
    }

    fn opf(&self) -> String {
        let mut manifest = String::new();
        for (i, chapter) in self.chapters.iter().enumerate() {
            manifest.push_str(&format!(
                "\n    <item id=\"ch{}\" href=\"{}\" media-type=\"application/xhtml+xml\"/>",
                i + 1,
                chapter.href
            ));
        }
        for (i, extra) in self.resources.iter().enumerate() {
            let media_type = extra.media_type.clone().unwrap_or_else(|| {
                mime_guess::from_path(&extra.path)
                    .first_or_octet_stream()
                    .to_string()
            });
            manifest.push_str(&format!(
                "\n    <item id=\"res{}\" href=\"{}\" media-type=\"{}\"/>",
                i + 1,
                extra.path,
                media_type
            ));
        }

        let spine: Vec<String> = self
            .spine
            .clone()
            .unwrap_or_else(|| (1..=self.chapters.len()).map(|n| format!("ch{}", n)).collect());
        let spine: String = spine
            .iter()
            .map(|id| format!("\n    <itemref idref=\"{}\"/>", id))
            .collect();

        let mut metadata = String::new();
        if let Some(title) = &self.title {
            metadata.push_str(&format!("\n    <dc:title>{}</dc:title>", title));
        }
        for author in &self.authors {
            metadata.push_str(&format!("\n    <dc:creator>{}</dc:creator>", author));
        }

        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="uid">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:identifier id="uid">urn:uuid:test</dc:identifier>{}
    <dc:language>en</dc:language>
  </metadata>
  <manifest>{}
  </manifest>
  <spine>{}
  </spine>
</package>"#,
            metadata, manifest, spine
        )
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        zip.start_file("mimetype", stored).unwrap();
        zip.write_all(b"application/epub+zip").unwrap();

        zip.start_file("META-INF/container.xml", deflated).unwrap();
        zip.write_all(CONTAINER_XML.as_bytes()).unwrap();

        for (path, data) in &self.raw_entries {
            zip.start_file(path.as_str(), deflated).unwrap();
            zip.write_all(data).unwrap();
        }

        zip.start_file("OEBPS/content.opf", deflated).unwrap();
        zip.write_all(self.opf().as_bytes()).unwrap();

        for chapter in &self.chapters {
            zip.start_file(format!("OEBPS/{}", chapter.href), deflated)
                .unwrap();
            zip.write_all(&chapter.content).unwrap();
        }
        for extra in &self.resources {
            zip.start_file(format!("OEBPS/{}", extra.path), deflated).unwrap();
            zip.write_all(&extra.data).unwrap();
        }

        zip.finish().unwrap().into_inner()
    }

    pub fn write_to(&self, path: &Path) {
        std::fs::write(path, self.to_bytes()).unwrap();
    }
}

/// A small opaque PNG.
pub fn png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([40, 90, 160]));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
    buf.into_inner()
}

/// `n` short chapters titled "Chapter 1" ... "Chapter n".
pub fn numbered_book(title: &str, n: usize) -> EpubBuilder {
    (1..=n).fold(EpubBuilder::new(title).author("Test Author"), |book, i| {
        book.chapter(
            &format!("Chapter {}", i),
            &format!("<p>This is the text of chapter {}.</p>", i),
        )
    })
}
