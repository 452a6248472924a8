//! Font metrics and text encoding.
//!
//! Text is set in the base-14 Helvetica and Courier faces whenever WinAnsi
//! covers it. Everything else goes to an optional embedded TrueType font
//! (`FontId::Unicode`); characters neither can show are drawn as `?` and
//! counted so the job can report them.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;
use ttf_parser::{name_id, Face};

use crate::error::FontError;

const REPLACEMENT: char = '?';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FontId {
    Regular,
    Bold,
    Italic,
    BoldItalic,
    Mono,
    /// The embedded fallback font.
    Unicode,
}

impl FontId {
    /// The five standard fonts every page resource dictionary carries.
    pub const STANDARD: [FontId; 5] = [
        FontId::Regular,
        FontId::Bold,
        FontId::Italic,
        FontId::BoldItalic,
        FontId::Mono,
    ];

    pub fn select(bold: bool, italic: bool, mono: bool) -> Self {
        match (mono, bold, italic) {
            (true, _, _) => FontId::Mono,
            (false, true, true) => FontId::BoldItalic,
            (false, true, false) => FontId::Bold,
            (false, false, true) => FontId::Italic,
            (false, false, false) => FontId::Regular,
        }
    }

    /// Name in the page `/Font` resource dictionary.
    pub fn resource_name(self) -> &'static str {
        match self {
            FontId::Regular => "F1",
            FontId::Bold => "F2",
            FontId::Italic => "F3",
            FontId::BoldItalic => "F4",
            FontId::Mono => "F5",
            FontId::Unicode => "F6",
        }
    }

    /// Standard font name; `None` for the embedded font, which carries its own.
    pub fn base_font(self) -> Option<&'static str> {
        match self {
            FontId::Regular => Some("Helvetica"),
            FontId::Bold => Some("Helvetica-Bold"),
            FontId::Italic => Some("Helvetica-Oblique"),
            FontId::BoldItalic => Some("Helvetica-BoldOblique"),
            FontId::Mono => Some("Courier"),
            FontId::Unicode => None,
        }
    }

    fn is_bold(self) -> bool {
        matches!(self, FontId::Bold | FontId::BoldItalic)
    }
}

/// Helvetica advance widths for 0x20..=0x7E, in 1/1000 em.
const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // ' '../
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556, // 0..?
    1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778, // @..O
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556, // P.._
    333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556, // `..o
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584, // p..~
];

const COURIER_WIDTH: u16 = 600;
const DEFAULT_WIDTH: u16 = 556;

/// Helvetica-Bold runs roughly this much wider than the regular cut.
const BOLD_FACTOR: f32 = 1.08;

/// Width of a WinAnsi character in a standard font, in 1/1000 em.
fn standard_width(c: char, font: FontId) -> f32 {
    if font == FontId::Mono {
        return COURIER_WIDTH as f32;
    }
    let base = f32::from(match c {
        ' '..='~' => HELVETICA_WIDTHS[(c as u32 - 0x20) as usize],
        '\u{A0}' => 278,
        _ => DEFAULT_WIDTH,
    });
    if font.is_bold() {
        base * BOLD_FACTOR
    } else {
        base
    }
}

/// Replaces characters with close equivalents the standard fonts can show,
/// and drops invisible ones.
pub fn fold_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\u{00AD}' | '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{FEFF}' => {}
            '\u{2002}'..='\u{200A}' | '\u{202F}' => out.push(' '),
            '\u{2010}' | '\u{2011}' | '\u{2212}' => out.push('-'),
            '\u{FB00}' => out.push_str("ff"),
            '\u{FB01}' => out.push_str("fi"),
            '\u{FB02}' => out.push_str("fl"),
            '\u{FB03}' => out.push_str("ffi"),
            '\u{FB04}' => out.push_str("ffl"),
            '\u{2032}' => out.push('\''),
            '\u{2033}' => out.push('"'),
            _ => out.push(c),
        }
    }
    out
}

/// Encodes text as WinAnsi bytes; unmappable characters become `?`.
pub fn encode_win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| win_ansi_byte(c).unwrap_or(REPLACEMENT as u8))
        .collect()
}

fn win_ansi_byte(c: char) -> Option<u8> {
    let byte = match c {
        ' '..='~' => c as u8,
        '\u{A0}'..='\u{FF}' => c as u32 as u8,
        '€' => 0x80,
        '‚' => 0x82,
        'ƒ' => 0x83,
        '„' => 0x84,
        '…' => 0x85,
        '†' => 0x86,
        '‡' => 0x87,
        'ˆ' => 0x88,
        '‰' => 0x89,
        'Š' => 0x8A,
        '‹' => 0x8B,
        'Œ' => 0x8C,
        'Ž' => 0x8E,
        '‘' => 0x91,
        '’' => 0x92,
        '“' => 0x93,
        '”' => 0x94,
        '•' => 0x95,
        '–' => 0x96,
        '—' => 0x97,
        '˜' => 0x98,
        '™' => 0x99,
        'š' => 0x9A,
        '›' => 0x9B,
        'œ' => 0x9C,
        'ž' => 0x9E,
        'Ÿ' => 0x9F,
        _ => return None,
    };
    Some(byte)
}

/// Where the fallback font for non-WinAnsi text comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FontSource {
    /// First usable font from a list of common system locations.
    #[default]
    System,
    File { path: PathBuf },
    /// Standard fonts only.
    Disabled,
}

/// TrueType fonts with wide coverage, in order of preference.
const SYSTEM_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu-sans-fonts/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/noto/NotoSans-Regular.ttf",
    "/usr/share/fonts/truetype/freefont/FreeSans.ttf",
    "/System/Library/Fonts/Supplemental/Arial Unicode.ttf",
    "/Library/Fonts/Arial Unicode.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

impl FontSource {
    pub fn load(&self) -> Result<Option<UnicodeFont>, FontError> {
        match self {
            FontSource::Disabled => Ok(None),
            FontSource::File { path } => UnicodeFont::load(path).map(Some),
            FontSource::System => Ok(SYSTEM_FONTS
                .iter()
                .map(Path::new)
                .filter(|path| path.is_file())
                .find_map(|path| match UnicodeFont::load(path) {
                    Ok(font) => Some(font),
                    Err(e) => {
                        debug!(font = %path.display(), error = %e, "Skipping system font");
                        None
                    }
                })),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Glyph {
    pub id: u16,
    /// Advance width in font units.
    pub advance: u16,
}

/// A TrueType font embedded whole as a CID font.
pub struct UnicodeFont {
    postscript_name: String,
    units_per_em: u16,
    ascent: i16,
    descent: i16,
    cap_height: i16,
    italic_angle: f32,
    bbox: [i16; 4],
    glyphs: HashMap<char, Glyph>,
    data: Vec<u8>,
}

impl fmt::Debug for UnicodeFont {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnicodeFont")
            .field("postscript_name", &self.postscript_name)
            .field("glyphs", &self.glyphs.len())
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl UnicodeFont {
    pub fn load(path: &Path) -> Result<Self, FontError> {
        let data = std::fs::read(path).map_err(|e| FontError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_bytes(data)
    }

    pub fn from_bytes(data: Vec<u8>) -> Result<Self, FontError> {
        // FontFile2 takes a single face with TrueType outlines.
        if data.starts_with(b"ttcf") || data.starts_with(b"OTTO") {
            return Err(FontError::Parse(
                "only single-face TrueType fonts can be embedded".to_string(),
            ));
        }
        let face = Face::parse(&data, 0).map_err(|e| FontError::Parse(e.to_string()))?;

        let mut glyphs = HashMap::new();
        if let Some(cmap) = face.tables().cmap {
            for subtable in cmap.subtables.into_iter().filter(|s| s.is_unicode()) {
                subtable.codepoints(|code| {
                    let Some(c) = char::from_u32(code) else {
                        return;
                    };
                    if glyphs.contains_key(&c) {
                        return;
                    }
                    if let Some(id) = subtable.glyph_index(code).filter(|id| id.0 != 0) {
                        let advance = face.glyph_hor_advance(id).unwrap_or(0);
                        glyphs.insert(c, Glyph { id: id.0, advance });
                    }
                });
            }
        }
        if glyphs.is_empty() {
            return Err(FontError::NoUnicodeMap);
        }

        let postscript_name = face
            .names()
            .into_iter()
            .filter(|name| name.name_id == name_id::POST_SCRIPT_NAME)
            .find_map(|name| name.to_string())
            .map(|name| {
                name.chars()
                    .filter(|c| c.is_ascii_graphic() && !"/[](){}<>%#".contains(*c))
                    .collect::<String>()
            })
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "EpubpressFallback".to_string());

        let rect = face.global_bounding_box();
        let ascent = face.ascender();
        let font = Self {
            postscript_name,
            units_per_em: face.units_per_em(),
            ascent,
            descent: face.descender(),
            cap_height: face.capital_height().unwrap_or(ascent),
            italic_angle: face.italic_angle(),
            bbox: [rect.x_min, rect.y_min, rect.x_max, rect.y_max],
            glyphs,
            data,
        };
        debug!(font = %font.postscript_name, glyphs = font.glyphs.len(), "Loaded fallback font");
        Ok(font)
    }

    pub fn glyph(&self, c: char) -> Option<Glyph> {
        self.glyphs.get(&c).copied()
    }

    pub fn postscript_name(&self) -> &str {
        &self.postscript_name
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Font units to 1/1000 em.
    pub fn scale(&self, units: i32) -> i64 {
        (units as i64 * 1000) / i64::from(self.units_per_em)
    }

    pub fn ascent(&self) -> i16 {
        self.ascent
    }

    pub fn descent(&self) -> i16 {
        self.descent
    }

    pub fn cap_height(&self) -> i16 {
        self.cap_height
    }

    pub fn italic_angle(&self) -> f32 {
        self.italic_angle
    }

    pub fn bbox(&self) -> [i16; 4] {
        self.bbox
    }

    fn width(&self, glyph: Glyph) -> f32 {
        f32::from(glyph.advance) * 1000.0 / f32::from(self.units_per_em)
    }
}

/// The standard fonts plus the optional fallback. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct FontSet {
    fallback: Option<Arc<UnicodeFont>>,
}

impl FontSet {
    pub fn new(fallback: Option<UnicodeFont>) -> Self {
        Self {
            fallback: fallback.map(Arc::new),
        }
    }

    pub fn fallback(&self) -> Option<&UnicodeFont> {
        self.fallback.as_deref()
    }

    /// The font that draws `c` when the surrounding text is set in `font`.
    fn face_for(&self, c: char, font: FontId) -> FontId {
        if win_ansi_byte(c).is_some() {
            return font;
        }
        match &self.fallback {
            Some(fallback) if fallback.glyph(c).is_some() => FontId::Unicode,
            _ => font,
        }
    }

    fn char_width(&self, c: char, font: FontId) -> f32 {
        match self.face_for(c, font) {
            FontId::Unicode => self
                .fallback()
                .and_then(|fallback| fallback.glyph(c).map(|glyph| fallback.width(glyph)))
                .unwrap_or(DEFAULT_WIDTH as f32),
            face if win_ansi_byte(c).is_some() => standard_width(c, face),
            face => standard_width(REPLACEMENT, face),
        }
    }

    /// Width of `text` set in `font` at `size` points.
    pub fn text_width(&self, text: &str, font: FontId, size: f32) -> f32 {
        text.chars().map(|c| self.char_width(c, font)).sum::<f32>() * size / 1000.0
    }

    /// Splits a run set in `font` into runs per drawing font.
    pub fn segments(&self, font: FontId, text: &str) -> Vec<(FontId, String)> {
        let mut segments: Vec<(FontId, String)> = Vec::new();
        for c in text.chars() {
            let face = self.face_for(c, font);
            match segments.last_mut() {
                Some((last, run)) if *last == face => run.push(c),
                _ => segments.push((face, c.to_string())),
            }
        }
        segments
    }

    /// Characters of `text` that no available font can draw.
    pub fn count_missing(&self, text: &str) -> usize {
        text.chars()
            .filter(|c| {
                !c.is_control()
                    && win_ansi_byte(*c).is_none()
                    && self.face_for(*c, FontId::Regular) != FontId::Unicode
            })
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::test_font;

    fn standard() -> FontSet {
        FontSet::default()
    }

    fn with_fallback(chars: &str) -> FontSet {
        FontSet::new(Some(UnicodeFont::from_bytes(test_font(chars)).unwrap()))
    }

    #[test]
    fn test_helvetica_widths() {
        let fonts = standard();
        assert_eq!(fonts.text_width(" ", FontId::Regular, 1000.0), 278.0);
        assert_eq!(fonts.text_width("W", FontId::Regular, 1000.0), 944.0);
        assert_eq!(fonts.text_width("~", FontId::Regular, 1000.0), 584.0);
        assert!((fonts.text_width("Hello", FontId::Regular, 10.0) - 22.78).abs() < 0.01);
    }

    #[test]
    fn test_mono_and_bold_widths() {
        let fonts = standard();
        assert_eq!(fonts.text_width("iiii", FontId::Mono, 10.0), 24.0);
        assert!(
            fonts.text_width("abc", FontId::Bold, 10.0)
                > fonts.text_width("abc", FontId::Regular, 10.0)
        );
    }

    #[test]
    fn test_win_ansi_encoding() {
        assert_eq!(encode_win_ansi("café"), vec![b'c', b'a', b'f', 0xE9]);
        assert_eq!(encode_win_ansi("“—”"), vec![0x93, 0x97, 0x94]);
        assert_eq!(encode_win_ansi("日"), vec![b'?']);
    }

    #[test]
    fn test_fold_text() {
        assert_eq!(fold_text("ﬁne\u{00AD}ly\u{2009}done"), "finely done");
    }

    #[test]
    fn test_font_selection() {
        assert_eq!(FontId::select(true, true, false), FontId::BoldItalic);
        assert_eq!(FontId::select(true, false, true), FontId::Mono);
        assert_eq!(FontId::Italic.base_font(), Some("Helvetica-Oblique"));
        assert_eq!(FontId::Unicode.base_font(), None);
    }

    #[test]
    fn test_fallback_font_metrics() {
        let font = UnicodeFont::from_bytes(test_font("Жж")).unwrap();
        assert_eq!(font.glyph('Ж'), Some(Glyph { id: 1, advance: 600 }));
        assert_eq!(font.glyph('ж'), Some(Glyph { id: 2, advance: 600 }));
        assert_eq!(font.glyph('Z'), None);
        assert_eq!(font.scale(600), 600);
    }

    #[test]
    fn test_rejects_non_fonts() {
        assert!(matches!(
            UnicodeFont::from_bytes(b"definitely not a font".to_vec()),
            Err(FontError::Parse(_))
        ));
        assert!(UnicodeFont::from_bytes(b"OTTO\0\0\0\0".to_vec()).is_err());
    }

    #[test]
    fn test_segments_route_by_coverage() {
        let fonts = with_fallback("Привет");
        assert_eq!(
            fonts.segments(FontId::Bold, "Hi Привет 日"),
            vec![
                (FontId::Bold, "Hi ".to_string()),
                (FontId::Unicode, "Привет".to_string()),
                (FontId::Bold, " 日".to_string()),
            ]
        );
        assert_eq!(fonts.count_missing("Hi Привет 日"), 1);
        assert_eq!(standard().count_missing("Hi Привет 日"), 7);
    }

    #[test]
    fn test_fallback_widths() {
        let fonts = with_fallback("日");
        // 600 font units at 1000 per em.
        assert_eq!(fonts.text_width("日", FontId::Regular, 1000.0), 600.0);
        // Uncovered characters take the width of the replacement.
        assert_eq!(
            fonts.text_width("本", FontId::Regular, 1000.0),
            fonts.text_width("?", FontId::Regular, 1000.0)
        );
    }
}
