//! PDF serialization with lopdf.

use std::collections::{BTreeMap, BTreeSet};

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};

use crate::error::ConversionError;

use super::fonts::{encode_win_ansi, FontId, FontSet, UnicodeFont};
use super::images::PreparedImage;
use super::typeset::{PageItem, TypesetBook};

/// bfchar blocks are limited to 100 entries.
const BFCHAR_LIMIT: usize = 100;

/// Prefix of the `/Producer` entry; identifies files this crate wrote.
pub const PRODUCER_PREFIX: &str = "epubpress";

pub fn producer() -> String {
    format!("{} {}", PRODUCER_PREFIX, env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Clone, Default)]
pub struct PdfInfo {
    pub title: Option<String>,
    pub author: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutlineEntry {
    pub title: String,
    /// Index into the typeset pages.
    pub page: usize,
}

pub fn write_pdf(
    book: &TypesetBook,
    images: &BTreeMap<String, PreparedImage>,
    fonts: &FontSet,
    info: &PdfInfo,
    outline: &[OutlineEntry],
) -> Result<Vec<u8>, ConversionError> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    // Fonts
    let mut font_resources = Dictionary::new();
    for font in FontId::STANDARD {
        let Some(base_font) = font.base_font() else {
            continue;
        };
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => base_font,
            "Encoding" => "WinAnsiEncoding",
        });
        font_resources.set(font.resource_name(), font_id);
    }
    let unicode_text: BTreeSet<char> = book
        .pages
        .iter()
        .flat_map(|page| &page.items)
        .filter_map(|item| match item {
            PageItem::Text {
                font: FontId::Unicode,
                text,
                ..
            } => Some(text.chars()),
            _ => None,
        })
        .flatten()
        .collect();
    if !unicode_text.is_empty() {
        let fallback = fonts.fallback().ok_or_else(missing_fallback)?;
        let font_id = add_unicode_font(&mut doc, fallback, &unicode_text);
        font_resources.set(FontId::Unicode.resource_name(), font_id);
    }

    // Images actually placed, named in resource order
    let mut image_names: BTreeMap<&str, String> = BTreeMap::new();
    for page in &book.pages {
        for item in &page.items {
            if let PageItem::Image { resource, .. } = item {
                image_names.entry(resource.as_str()).or_default();
            }
        }
    }
    let mut xobjects = Dictionary::new();
    for (n, (resource, name)) in image_names.iter_mut().enumerate() {
        let image = images.get(*resource).ok_or_else(|| {
            ConversionError::render(format!("image '{}' was placed but never prepared", resource))
        })?;
        let mut stream = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => image.width as i64,
                "Height" => image.height as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
                "Filter" => "DCTDecode",
            },
            image.jpeg.clone(),
        );
        stream.allows_compression = false;
        let image_id = doc.add_object(Object::Stream(stream));
        *name = format!("Im{}", n + 1);
        xobjects.set(name.as_str(), image_id);
    }

    // Resources
    let resources_id = doc.add_object(dictionary! {
        "Font" => font_resources,
        "XObject" => xobjects,
    });

    // Pages
    let mut page_ids = Vec::with_capacity(book.pages.len());
    for page in &book.pages {
        let content = page_content(&page.items, &image_names, fonts)?;
        let content_id = doc.add_object(Stream::new(dictionary! {}, content));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Resources" => resources_id,
            "Contents" => content_id,
        });
        page_ids.push(page_id);
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => page_ids.iter().map(|id| Object::Reference(*id)).collect::<Vec<_>>(),
            "Count" => page_ids.len() as i64,
            "MediaBox" => vec![0.into(), 0.into(), book.width.into(), book.height.into()],
        }),
    );

    // Catalog
    let mut catalog = dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    };
    if let Some(outlines_id) = add_outline(&mut doc, outline, &page_ids) {
        catalog.set("Outlines", outlines_id);
        catalog.set("PageMode", "UseOutlines");
    }
    let catalog_id = doc.add_object(catalog);
    doc.trailer.set("Root", catalog_id);

    // Document information, without dates so output is reproducible
    let mut info_dict = dictionary! {
        "Producer" => Object::string_literal(producer()),
    };
    if let Some(title) = info.title.as_deref() {
        info_dict.set("Title", text_string(title));
    }
    if let Some(author) = info.author.as_deref() {
        info_dict.set("Author", text_string(author));
    }
    let info_id = doc.add_object(info_dict);
    doc.trailer.set("Info", info_id);

    doc.compress();

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer)
        .map_err(|e| ConversionError::render(format!("PDF serialization failed: {}", e)))?;

    Ok(buffer)
}

fn add_outline(doc: &mut Document, entries: &[OutlineEntry], page_ids: &[ObjectId]) -> Option<ObjectId> {
    let entries: Vec<(&OutlineEntry, ObjectId)> = entries
        .iter()
        .filter_map(|entry| page_ids.get(entry.page).map(|id| (entry, *id)))
        .collect();
    if entries.is_empty() {
        return None;
    }

    let outlines_id = doc.new_object_id();
    let item_ids: Vec<ObjectId> = entries.iter().map(|_| doc.new_object_id()).collect();

    for (i, (entry, page_id)) in entries.iter().enumerate() {
        let mut item = dictionary! {
            "Title" => text_string(&entry.title),
            "Parent" => outlines_id,
            "Dest" => vec![Object::Reference(*page_id), "Fit".into()],
        };
        if i > 0 {
            item.set("Prev", item_ids[i - 1]);
        }
        if let Some(next) = item_ids.get(i + 1) {
            item.set("Next", *next);
        }
        doc.objects.insert(item_ids[i], Object::Dictionary(item));
    }

    doc.objects.insert(
        outlines_id,
        Object::Dictionary(dictionary! {
            "Type" => "Outlines",
            "First" => item_ids[0],
            "Last" => item_ids[item_ids.len() - 1],
            "Count" => item_ids.len() as i64,
        }),
    );

    Some(outlines_id)
}

/// PDF text string: literal for ASCII, UTF-16BE with byte order mark
/// otherwise.
fn text_string(text: &str) -> Object {
    if text.is_ascii() {
        return Object::string_literal(text);
    }
    let mut bytes = vec![0xFE, 0xFF];
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(bytes, StringFormat::Hexadecimal)
}

/// Embeds the whole font as a CID-keyed Type0 font. Glyph ids are used as
/// CIDs (Identity-H), and a ToUnicode map keeps the text extractable.
fn add_unicode_font(doc: &mut Document, font: &UnicodeFont, used: &BTreeSet<char>) -> ObjectId {
    let name = Object::Name(font.postscript_name().as_bytes().to_vec());

    let file_id = doc.add_object(Stream::new(
        dictionary! { "Length1" => font.data().len() as i64 },
        font.data().to_vec(),
    ));

    let [x_min, y_min, x_max, y_max] = font.bbox();
    let descriptor_id = doc.add_object(dictionary! {
        "Type" => "FontDescriptor",
        "FontName" => name.clone(),
        // Nonsymbolic
        "Flags" => 32,
        "FontBBox" => vec![
            font.scale(x_min.into()).into(),
            font.scale(y_min.into()).into(),
            font.scale(x_max.into()).into(),
            font.scale(y_max.into()).into(),
        ],
        "ItalicAngle" => font.italic_angle(),
        "Ascent" => font.scale(font.ascent().into()),
        "Descent" => font.scale(font.descent().into()),
        "CapHeight" => font.scale(font.cap_height().into()),
        "StemV" => 80,
        "FontFile2" => file_id,
    });

    // First character per glyph wins the ToUnicode entry.
    let mut glyphs: BTreeMap<u16, (char, i64)> = BTreeMap::new();
    for &c in used {
        if let Some(glyph) = font.glyph(c) {
            glyphs
                .entry(glyph.id)
                .or_insert((c, font.scale(glyph.advance.into())));
        }
    }
    let widths: Vec<Object> = glyphs
        .iter()
        .flat_map(|(id, (_, width))| {
            [
                Object::Integer(i64::from(*id)),
                Object::Array(vec![Object::Integer(*width)]),
            ]
        })
        .collect();

    let cid_font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "CIDFontType2",
        "BaseFont" => name.clone(),
        "CIDSystemInfo" => dictionary! {
            "Registry" => Object::string_literal("Adobe"),
            "Ordering" => Object::string_literal("Identity"),
            "Supplement" => 0,
        },
        "FontDescriptor" => descriptor_id,
        "W" => widths,
        "CIDToGIDMap" => "Identity",
    });

    let to_unicode_id = doc.add_object(Stream::new(dictionary! {}, to_unicode_cmap(&glyphs)));

    doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type0",
        "BaseFont" => name,
        "Encoding" => "Identity-H",
        "DescendantFonts" => vec![Object::Reference(cid_font_id)],
        "ToUnicode" => to_unicode_id,
    })
}

fn to_unicode_cmap(glyphs: &BTreeMap<u16, (char, i64)>) -> Vec<u8> {
    let mut cmap = String::from(
        "/CIDInit /ProcSet findresource begin\n\
         12 dict begin\n\
         begincmap\n\
         /CIDSystemInfo\n\
         << /Registry (Adobe)\n\
         /Ordering (UCS)\n\
         /Supplement 0\n\
         >> def\n\
         /CMapName /Adobe-Identity-UCS def\n\
         /CMapType 2 def\n\
         1 begincodespacerange\n\
         <0000> <FFFF>\n\
         endcodespacerange\n",
    );
    let entries: Vec<_> = glyphs.iter().collect();
    for block in entries.chunks(BFCHAR_LIMIT) {
        cmap.push_str(&format!("{} beginbfchar\n", block.len()));
        for (id, (c, _)) in block {
            let mut units = [0u16; 2];
            let target: String = c
                .encode_utf16(&mut units)
                .iter()
                .map(|unit| format!("{:04X}", unit))
                .collect();
            cmap.push_str(&format!("<{:04X}> <{}>\n", id, target));
        }
        cmap.push_str("endbfchar\n");
    }
    cmap.push_str(
        "endcmap\n\
         CMapName currentdict /CMap defineresource pop\n\
         end\n\
         end\n",
    );
    cmap.into_bytes()
}

fn missing_fallback() -> ConversionError {
    ConversionError::render("text was set in a fallback font that is not loaded")
}

/// Text operand for a run: WinAnsi bytes for the standard fonts, big-endian
/// glyph ids for the embedded one.
fn shown_text(font: FontId, text: &str, fonts: &FontSet) -> Result<Object, ConversionError> {
    if font != FontId::Unicode {
        return Ok(Object::string_literal(encode_win_ansi(text)));
    }
    let fallback = fonts.fallback().ok_or_else(missing_fallback)?;
    let mut glyph_ids = Vec::with_capacity(text.len() * 2);
    for c in text.chars() {
        let glyph = fallback.glyph(c).ok_or_else(|| {
            ConversionError::render(format!("fallback font has no glyph for U+{:04X}", c as u32))
        })?;
        glyph_ids.extend_from_slice(&glyph.id.to_be_bytes());
    }
    Ok(Object::String(glyph_ids, StringFormat::Hexadecimal))
}

fn page_content(
    items: &[PageItem],
    image_names: &BTreeMap<&str, String>,
    fonts: &FontSet,
) -> Result<Vec<u8>, ConversionError> {
    let mut operations = Vec::new();
    for item in items {
        match item {
            PageItem::Text {
                x,
                y,
                font,
                size,
                text,
            } => {
                operations.push(Operation::new("BT", vec![]));
                operations.push(Operation::new(
                    "Tf",
                    vec![font.resource_name().into(), (*size).into()],
                ));
                operations.push(Operation::new("Td", vec![(*x).into(), (*y).into()]));
                operations.push(Operation::new("Tj", vec![shown_text(*font, text, fonts)?]));
                operations.push(Operation::new("ET", vec![]));
            }
            PageItem::Image {
                resource,
                x,
                y,
                width,
                height,
            } => {
                if let Some(name) = image_names.get(resource.as_str()) {
                    operations.push(Operation::new("q", vec![]));
                    operations.push(Operation::new(
                        "cm",
                        vec![
                            (*width).into(),
                            0.into(),
                            0.into(),
                            (*height).into(),
                            (*x).into(),
                            (*y).into(),
                        ],
                    ));
                    operations.push(Operation::new("Do", vec![name.as_str().into()]));
                    operations.push(Operation::new("Q", vec![]));
                }
            }
            PageItem::Rule { x1, x2, y, width } => {
                operations.push(Operation::new("w", vec![(*width).into()]));
                operations.push(Operation::new("m", vec![(*x1).into(), (*y).into()]));
                operations.push(Operation::new("l", vec![(*x2).into(), (*y).into()]));
                operations.push(Operation::new("S", vec![]));
            }
        }
    }
    Content { operations }
        .encode()
        .map_err(|e| ConversionError::render(format!("content stream: {}", e)))
}
