//! Pagination: greedy line breaking of laid-out blocks onto fixed-size pages.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::fonts::{FontId, FontSet};
use super::images::PreparedImage;
use super::layout::{Align, Block, BlockKind, InlineStyle, Span};

/// 2 cm.
const MARGIN_VERTICAL: f32 = 56.69;
/// 2.5 cm.
const MARGIN_HORIZONTAL: f32 = 70.87;
const INDENT_STEP: f32 = 18.0;
const MARKER_GAP: f32 = 6.0;
/// CSS pixels are 0.75 pt.
const PX_TO_PT: f32 = 0.75;
const FOOTER_SIZE: f32 = 9.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageSize {
    #[default]
    A4,
    Letter,
}

impl PageSize {
    /// Width and height in points.
    pub fn dimensions(self) -> (f32, f32) {
        match self {
            PageSize::A4 => (595.28, 841.89),
            PageSize::Letter => (612.0, 792.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSettings {
    pub size: PageSize,
    /// Body text size in points.
    pub font_size: f32,
    /// Body line height as a multiple of the font size.
    pub line_height: f32,
}

impl Default for PageSettings {
    fn default() -> Self {
        Self {
            size: PageSize::A4,
            font_size: 11.0,
            line_height: 1.6,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PageItem {
    Text {
        x: f32,
        y: f32,
        font: FontId,
        size: f32,
        text: String,
    },
    Image {
        resource: String,
        x: f32,
        y: f32,
        width: f32,
        height: f32,
    },
    Rule {
        x1: f32,
        x2: f32,
        y: f32,
        width: f32,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub items: Vec<PageItem>,
}

#[derive(Debug, Clone)]
pub struct TypesetBook {
    pub width: f32,
    pub height: f32,
    pub pages: Vec<Page>,
    /// Index into `pages` of each chapter's first page.
    pub chapter_starts: Vec<usize>,
}

pub struct TitlePage<'a> {
    pub title: &'a str,
    pub authors: &'a [String],
}

struct Metrics {
    size: f32,
    leading: f32,
    space_before: f32,
    space_after: f32,
    base: InlineStyle,
    align: Option<Align>,
}

#[derive(Debug, Default)]
struct Line {
    runs: Vec<(FontId, String)>,
    width: f32,
}

impl Line {
    fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    fn push(&mut self, font: FontId, text: &str, width: f32) {
        match self.runs.last_mut() {
            Some((last, run)) if *last == font => run.push_str(text),
            _ => self.runs.push((font, text.to_string())),
        }
        self.width += width;
    }
}

pub struct Typesetter {
    settings: PageSettings,
    fonts: FontSet,
    width: f32,
    height: f32,
    pages: Vec<Page>,
    y: f32,
}

impl Typesetter {
    pub fn new(settings: PageSettings, fonts: FontSet) -> Self {
        let (width, height) = settings.size.dimensions();
        Self {
            settings,
            fonts,
            width,
            height,
            pages: Vec::new(),
            y: height - MARGIN_VERTICAL,
        }
    }

    pub fn typeset(
        mut self,
        title_page: Option<TitlePage<'_>>,
        chapters: &[Vec<Block>],
        images: &BTreeMap<String, PreparedImage>,
    ) -> TypesetBook {
        let has_title_page = title_page.is_some();
        if let Some(title) = title_page {
            self.title_page(&title);
        }

        let mut chapter_starts = Vec::with_capacity(chapters.len());
        for blocks in chapters {
            self.new_page();
            chapter_starts.push(self.pages.len() - 1);
            for block in blocks {
                self.block(block, images);
            }
        }

        if self.pages.is_empty() {
            self.new_page();
        }
        self.number_pages(has_title_page);

        TypesetBook {
            width: self.width,
            height: self.height,
            pages: self.pages,
            chapter_starts,
        }
    }

    fn content_width(&self) -> f32 {
        self.width - 2.0 * MARGIN_HORIZONTAL
    }

    fn content_height(&self) -> f32 {
        self.height - 2.0 * MARGIN_VERTICAL
    }

    fn new_page(&mut self) {
        self.pages.push(Page::default());
        self.y = self.height - MARGIN_VERTICAL;
    }

    fn page_is_empty(&self) -> bool {
        self.pages.last().map_or(true, |p| p.items.is_empty())
    }

    fn page(&mut self) -> &mut Page {
        if self.pages.is_empty() {
            self.new_page();
        }
        let last = self.pages.len() - 1;
        &mut self.pages[last]
    }

    /// Starts a new page unless `height` still fits above the bottom margin.
    fn reserve(&mut self, height: f32) {
        if self.y - height < MARGIN_VERTICAL && !self.page_is_empty() {
            self.new_page();
        }
    }

    fn metrics(&self, kind: &BlockKind) -> Metrics {
        let body = self.settings.font_size;
        let plain = InlineStyle::default();
        match kind {
            BlockKind::Paragraph => Metrics {
                size: body,
                leading: body * self.settings.line_height,
                space_before: 0.0,
                space_after: body * 0.5,
                base: plain,
                align: None,
            },
            BlockKind::ListItem { .. } => Metrics {
                size: body,
                leading: body * self.settings.line_height,
                space_before: 0.0,
                space_after: body * 0.25,
                base: plain,
                align: None,
            },
            BlockKind::Heading(level) => {
                let size = match level {
                    1 => 24.0,
                    2 => 18.0,
                    3 => 14.0,
                    4 => 12.0,
                    _ => body,
                };
                Metrics {
                    size,
                    leading: size * 1.25,
                    space_before: size * 0.9,
                    space_after: size * 0.45,
                    base: InlineStyle {
                        bold: true,
                        ..plain
                    },
                    align: None,
                }
            }
            BlockKind::Preformatted => {
                let size = (body * 0.82).max(6.0);
                Metrics {
                    size,
                    leading: size * 1.35,
                    space_before: body * 0.3,
                    space_after: body * 0.6,
                    base: InlineStyle {
                        mono: true,
                        ..plain
                    },
                    align: Some(Align::Left),
                }
            }
            BlockKind::Caption => {
                let size = body * 0.85;
                Metrics {
                    size,
                    leading: size * 1.4,
                    space_before: 0.0,
                    space_after: body * 0.6,
                    base: InlineStyle {
                        italic: true,
                        ..plain
                    },
                    align: Some(Align::Center),
                }
            }
        }
    }

    fn block(&mut self, block: &Block, images: &BTreeMap<String, PreparedImage>) {
        match block {
            Block::Text {
                kind,
                spans,
                align,
                indent,
            } => self.text_block(kind, spans, *align, *indent),
            Block::Image { resource, alt } => match images.get(resource) {
                Some(image) => self.image(resource, image),
                None => self.placeholder(alt),
            },
            Block::MissingImage { alt } => self.placeholder(alt),
            Block::Rule => {
                self.reserve(12.0);
                let y = self.y - 6.0;
                let x2 = self.width - MARGIN_HORIZONTAL;
                self.page().items.push(PageItem::Rule {
                    x1: MARGIN_HORIZONTAL,
                    x2,
                    y,
                    width: 0.5,
                });
                self.y -= 12.0;
            }
            Block::PageBreak => {
                if !self.page_is_empty() {
                    self.new_page();
                }
            }
        }
    }

    fn placeholder(&mut self, alt: &str) {
        let text = if alt.trim().is_empty() {
            "[Image]".to_string()
        } else {
            format!("[Image: {}]", alt.trim())
        };
        let spans = vec![Span {
            text,
            style: InlineStyle::default(),
        }];
        self.text_block(&BlockKind::Caption, &spans, Align::Center, 0);
    }

    fn image(&mut self, resource: &str, image: &PreparedImage) {
        let mut width = image.width as f32 * PX_TO_PT;
        let mut height = image.height as f32 * PX_TO_PT;
        let scale = (self.content_width() / width)
            .min(self.content_height() / height)
            .min(1.0);
        width *= scale;
        height *= scale;

        self.reserve(height);
        let x = MARGIN_HORIZONTAL + (self.content_width() - width) / 2.0;
        let y = self.y - height;
        self.page().items.push(PageItem::Image {
            resource: resource.to_string(),
            x,
            y,
            width,
            height,
        });
        self.y -= height + self.settings.font_size * 0.5;
    }

    fn text_block(&mut self, kind: &BlockKind, spans: &[Span], align: Align, indent: u8) {
        let metrics = self.metrics(kind);
        let align = metrics.align.unwrap_or(align);
        let indent = indent as f32 * INDENT_STEP;
        let available = (self.content_width() - indent).max(metrics.size * 4.0);
        let preformatted = matches!(kind, BlockKind::Preformatted);

        let lines = break_lines(
            &self.fonts,
            spans,
            metrics.base,
            metrics.size,
            available,
            preformatted,
        );
        if lines.is_empty() {
            return;
        }

        if !self.page_is_empty() {
            self.y -= metrics.space_before;
        }

        let x0 = MARGIN_HORIZONTAL + indent;
        for (i, line) in lines.iter().enumerate() {
            self.reserve(metrics.leading);
            let baseline = self.y - metrics.leading * 0.5 - metrics.size * 0.3;

            if i == 0 {
                if let BlockKind::ListItem { marker } = kind {
                    let size = metrics.size;
                    let x = x0 - self.fonts.text_width(marker, FontId::Regular, size) - MARKER_GAP;
                    self.push_runs(x, baseline, size, &[(FontId::Regular, marker.clone())]);
                }
            }

            let x = x0
                + match align {
                    Align::Center => (available - line.width) / 2.0,
                    Align::Right => available - line.width,
                    Align::Left | Align::Justify => 0.0,
                };
            self.push_runs(x, baseline, metrics.size, &line.runs);
            self.y -= metrics.leading;
        }

        self.y -= metrics.space_after;
    }

    fn title_page(&mut self, title: &TitlePage<'_>) {
        self.new_page();
        self.y = self.height * 0.62;
        let spans = [Span {
            text: title.title.to_string(),
            style: InlineStyle {
                bold: true,
                ..InlineStyle::default()
            },
        }];
        let size = 28.0;
        let width = self.content_width();
        for line in break_lines(&self.fonts, &spans, InlineStyle::default(), size, width, false) {
            self.centered_line(&line, size, size * 1.3);
        }

        if !title.authors.is_empty() {
            self.y -= 24.0;
            let spans = [Span {
                text: title.authors.join(", "),
                style: InlineStyle::default(),
            }];
            let size = 16.0;
            let width = self.content_width();
            for line in break_lines(&self.fonts, &spans, InlineStyle::default(), size, width, false)
            {
                self.centered_line(&line, size, size * 1.4);
            }
        }
    }

    fn centered_line(&mut self, line: &Line, size: f32, leading: f32) {
        let x = MARGIN_HORIZONTAL + (self.content_width() - line.width) / 2.0;
        let baseline = self.y - leading * 0.5 - size * 0.3;
        self.push_runs(x, baseline, size, &line.runs);
        self.y -= leading;
    }

    /// Emits runs left to right, split wherever the drawing font changes.
    fn push_runs(&mut self, mut x: f32, baseline: f32, size: f32, runs: &[(FontId, String)]) {
        let fonts = self.fonts.clone();
        for (font, text) in runs {
            for (face, segment) in fonts.segments(*font, text) {
                let width = fonts.text_width(&segment, face, size);
                self.page().items.push(PageItem::Text {
                    x,
                    y: baseline,
                    font: face,
                    size,
                    text: segment,
                });
                x += width;
            }
        }
    }

    fn number_pages(&mut self, skip_first: bool) {
        let center = self.width / 2.0;
        let y = MARGIN_VERTICAL / 2.0;
        for (i, page) in self.pages.iter_mut().enumerate() {
            if skip_first && i == 0 {
                continue;
            }
            let label = (i + 1).to_string();
            let width = self.fonts.text_width(&label, FontId::Regular, FOOTER_SIZE);
            page.items.push(PageItem::Text {
                x: center - width / 2.0,
                y,
                font: FontId::Regular,
                size: FOOTER_SIZE,
                text: label,
            });
        }
    }
}

/// Greedy line breaking. Preformatted text only breaks at newlines and,
/// when a line is wider than the column, between characters.
fn break_lines(
    fonts: &FontSet,
    spans: &[Span],
    base: InlineStyle,
    size: f32,
    available: f32,
    preformatted: bool,
) -> Vec<Line> {
    let mut lines = Vec::new();
    let mut line = Line::default();
    let mut pending_space: Option<FontId> = None;

    for span in spans {
        let font = InlineStyle {
            bold: span.style.bold || base.bold,
            italic: span.style.italic || base.italic,
            mono: span.style.mono || base.mono,
        }
        .font();

        for (i, segment) in span.text.split('\n').enumerate() {
            if i > 0 {
                lines.push(std::mem::take(&mut line));
                pending_space = None;
            }

            if preformatted {
                place_word(fonts, &mut lines, &mut line, segment, font, size, available, None);
                continue;
            }

            let mut rest = segment;
            while !rest.is_empty() {
                let space_len = rest.len() - rest.trim_start_matches(' ').len();
                if space_len > 0 {
                    if !line.is_empty() {
                        pending_space = Some(font);
                    }
                    rest = &rest[space_len..];
                    continue;
                }
                let word_len = rest.find(' ').unwrap_or(rest.len());
                let word = &rest[..word_len];
                place_word(
                    fonts,
                    &mut lines,
                    &mut line,
                    word,
                    font,
                    size,
                    available,
                    pending_space.take(),
                );
                rest = &rest[word_len..];
            }
        }
    }

    if !line.is_empty() {
        lines.push(line);
    }
    // Trailing forced breaks leave empty lines; keep inner ones for spacing.
    while lines.last().is_some_and(Line::is_empty) {
        lines.pop();
    }
    lines
}

#[allow(clippy::too_many_arguments)]
fn place_word(
    fonts: &FontSet,
    lines: &mut Vec<Line>,
    line: &mut Line,
    word: &str,
    font: FontId,
    size: f32,
    available: f32,
    space: Option<FontId>,
) {
    if word.is_empty() {
        return;
    }
    let word_width = fonts.text_width(word, font, size);
    let space_width = match (space, line.is_empty()) {
        (Some(space_font), false) => fonts.text_width(" ", space_font, size),
        _ => 0.0,
    };

    if line.width + space_width + word_width <= available {
        if let (Some(space_font), false) = (space, line.is_empty()) {
            line.push(space_font, " ", space_width);
        }
        line.push(font, word, word_width);
        return;
    }

    if !line.is_empty() {
        lines.push(std::mem::take(line));
    }

    if word_width <= available {
        line.push(font, word, word_width);
        return;
    }

    // Break overlong words between characters.
    let mut chunk = String::new();
    let mut chunk_width = 0.0;
    for c in word.chars() {
        let mut buf = [0u8; 4];
        let c_width = fonts.text_width(c.encode_utf8(&mut buf), font, size);
        if chunk_width + c_width > available && !chunk.is_empty() {
            line.push(font, &chunk, chunk_width);
            lines.push(std::mem::take(line));
            chunk.clear();
            chunk_width = 0.0;
        }
        chunk.push(c);
        chunk_width += c_width;
    }
    if !chunk.is_empty() {
        line.push(font, &chunk, chunk_width);
    }
}
