//! In-crate EPUB builders for unit tests.

use std::io::{Cursor, Write};
use std::path::Path;

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Writes a zip at `path` with a `mimetype` entry, a container pointing at
/// `OEBPS/content.opf` and the given extra entries.
pub fn write_epub(path: &Path, entries: &[(&str, &[u8])]) {
    let file = std::fs::File::create(path).unwrap();
    let mut zip = ZipWriter::new(file);
    let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

    zip.start_file("mimetype", stored).unwrap();
    zip.write_all(b"application/epub+zip").unwrap();

    zip.start_file("META-INF/container.xml", SimpleFileOptions::default())
        .unwrap();
    zip.write_all(
        br#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#,
    )
    .unwrap();

    for (name, data) in entries {
        zip.start_file(*name, SimpleFileOptions::default()).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap();
}

/// A 4x3 opaque PNG.
pub fn tiny_png() -> Vec<u8> {
    let img = image::RgbImage::from_pixel(4, 3, image::Rgb([200, 30, 30]));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
    buf.into_inner()
}

pub struct EpubFixture {
    title: String,
    author: Option<String>,
    chapters: Vec<String>,
    images: Vec<(String, Vec<u8>)>,
    spine_order: Option<Vec<usize>>,
    drm: bool,
}

impl EpubFixture {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            author: None,
            chapters: Vec::new(),
            images: Vec::new(),
            spine_order: None,
            drm: false,
        }
    }

    pub fn author(mut self, author: &str) -> Self {
        self.author = Some(author.to_string());
        self
    }

    /// Adds `OEBPS/text/chN.xhtml` with `body` as the body markup.
    pub fn chapter(mut self, body: &str) -> Self {
        self.chapters.push(body.to_string());
        self
    }

    /// Adds `OEBPS/images/<name>`.
    pub fn image(mut self, name: &str, data: Vec<u8>) -> Self {
        self.images.push((name.to_string(), data));
        self
    }

    /// Spine order as indices into the added chapters.
    pub fn spine_order(mut self, order: &[usize]) -> Self {
        self.spine_order = Some(order.to_vec());
        self
    }

    pub fn drm_protected(mut self) -> Self {
        self.drm = true;
        self
    }

    pub fn write_to(self, path: &Path) {
        let mut manifest = String::new();
        for i in 0..self.chapters.len() {
            manifest.push_str(&format!(
                r#"<item id="ch{n}" href="text/ch{n}.xhtml" media-type="application/xhtml+xml"/>"#,
                n = i + 1
            ));
        }
        for (i, (name, _)) in self.images.iter().enumerate() {
            let media_type = mime_guess::from_path(name)
                .first_raw()
                .unwrap_or("application/octet-stream");
            manifest.push_str(&format!(
                r#"<item id="img{}" href="images/{}" media-type="{}"/>"#,
                i + 1,
                name,
                media_type
            ));
        }

        let order = self
            .spine_order
            .clone()
            .unwrap_or_else(|| (0..self.chapters.len()).collect());
        let spine: String = order
            .iter()
            .map(|i| format!(r#"<itemref idref="ch{}"/>"#, i + 1))
            .collect();

        let creator = self
            .author
            .as_ref()
            .map(|a| format!("<dc:creator>{}</dc:creator>", a))
            .unwrap_or_default();

        let opf = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:title>{}</dc:title>{}<dc:language>en</dc:language>
  </metadata>
  <manifest>{}</manifest>
  <spine>{}</spine>
</package>"#,
            self.title, creator, manifest, spine
        );

        let chapter_docs: Vec<(String, String)> = self
            .chapters
            .iter()
            .enumerate()
            .map(|(i, body)| {
                (
                    format!("OEBPS/text/ch{}.xhtml", i + 1),
                    format!(
                        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<html xmlns=\"http://www.w3.org/1999/xhtml\"><head><title>Chapter {}</title></head><body>{}</body></html>",
                        i + 1,
                        body
                    ),
                )
            })
            .collect();

        let image_paths: Vec<String> = self
            .images
            .iter()
            .map(|(name, _)| format!("OEBPS/images/{}", name))
            .collect();

        let mut entries: Vec<(&str, &[u8])> = vec![("OEBPS/content.opf", opf.as_bytes())];
        for (name, doc) in &chapter_docs {
            entries.push((name.as_str(), doc.as_bytes()));
        }
        for (path, (_, data)) in image_paths.iter().zip(&self.images) {
            entries.push((path.as_str(), data.as_slice()));
        }
        if self.drm {
            entries.push(("META-INF/rights.xml", b"<rights/>".as_slice()));
        }

        write_epub(path, &entries);
    }
}

/// A minimal TrueType font mapping each of `chars` to its own empty glyph,
/// 600 units wide at 1000 units per em. Glyph ids follow code point order.
pub fn test_font(chars: &str) -> Vec<u8> {
    let mut codes: Vec<u32> = chars.chars().map(u32::from).collect();
    codes.sort_unstable();
    codes.dedup();
    let glyph_count = codes.len() as u16 + 1;

    let mut head = vec![0u8; 54];
    head[0..4].copy_from_slice(&0x0001_0000u32.to_be_bytes());
    head[12..16].copy_from_slice(&0x5F0F_3CF5u32.to_be_bytes());
    head[18..20].copy_from_slice(&1000u16.to_be_bytes());
    head[42..44].copy_from_slice(&800i16.to_be_bytes()); // yMax

    let mut hhea = vec![0u8; 36];
    hhea[0..4].copy_from_slice(&0x0001_0000u32.to_be_bytes());
    hhea[4..6].copy_from_slice(&800i16.to_be_bytes());
    hhea[6..8].copy_from_slice(&(-200i16).to_be_bytes());
    hhea[34..36].copy_from_slice(&glyph_count.to_be_bytes());

    let mut maxp = 0x0000_5000u32.to_be_bytes().to_vec();
    maxp.extend_from_slice(&glyph_count.to_be_bytes());

    let mut hmtx = Vec::new();
    for _ in 0..glyph_count {
        hmtx.extend_from_slice(&600u16.to_be_bytes());
        hmtx.extend_from_slice(&0i16.to_be_bytes());
    }

    // Format 12 subtable, one group per character.
    let mut subtable = Vec::new();
    subtable.extend_from_slice(&12u16.to_be_bytes());
    subtable.extend_from_slice(&0u16.to_be_bytes());
    subtable.extend_from_slice(&(16 + 12 * codes.len() as u32).to_be_bytes());
    subtable.extend_from_slice(&0u32.to_be_bytes());
    subtable.extend_from_slice(&(codes.len() as u32).to_be_bytes());
    for (i, code) in codes.iter().enumerate() {
        subtable.extend_from_slice(&code.to_be_bytes());
        subtable.extend_from_slice(&code.to_be_bytes());
        subtable.extend_from_slice(&(i as u32 + 1).to_be_bytes());
    }
    let mut cmap = Vec::new();
    cmap.extend_from_slice(&0u16.to_be_bytes());
    cmap.extend_from_slice(&1u16.to_be_bytes());
    cmap.extend_from_slice(&0u16.to_be_bytes()); // Unicode platform
    cmap.extend_from_slice(&4u16.to_be_bytes()); // full repertoire
    cmap.extend_from_slice(&12u32.to_be_bytes());
    cmap.extend_from_slice(&subtable);

    // Table records must be sorted by tag.
    let tables: [(&[u8; 4], Vec<u8>); 5] = [
        (b"cmap", cmap),
        (b"head", head),
        (b"hhea", hhea),
        (b"hmtx", hmtx),
        (b"maxp", maxp),
    ];
    let mut font = Vec::new();
    font.extend_from_slice(&0x0001_0000u32.to_be_bytes());
    font.extend_from_slice(&(tables.len() as u16).to_be_bytes());
    font.extend_from_slice(&[0u8; 6]);
    let mut offset = 12 + 16 * tables.len();
    let mut body = Vec::new();
    for (tag, data) in &tables {
        font.extend_from_slice(*tag);
        font.extend_from_slice(&0u32.to_be_bytes());
        font.extend_from_slice(&(offset as u32).to_be_bytes());
        font.extend_from_slice(&(data.len() as u32).to_be_bytes());
        body.extend_from_slice(data);
        while body.len() % 4 != 0 {
            body.push(0);
        }
        offset = 12 + 16 * tables.len() + body.len();
    }
    font.extend_from_slice(&body);
    font
}
