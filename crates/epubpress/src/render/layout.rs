//! Markup → block tree. The tokenizer is deliberately forgiving: unknown
//! tags are transparent, unmatched end tags are ignored and a tokenizer
//! error resumes at the next `<`.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::entities;
use crate::normalize::resource_path;

use super::fonts::{fold_text, FontId};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InlineStyle {
    pub bold: bool,
    pub italic: bool,
    pub mono: bool,
}

impl InlineStyle {
    pub fn font(self) -> FontId {
        FontId::select(self.bold, self.italic, self.mono)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Span {
    pub text: String,
    pub style: InlineStyle,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Align {
    #[default]
    Left,
    Center,
    Right,
    Justify,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockKind {
    Paragraph,
    Heading(u8),
    Preformatted,
    ListItem { marker: String },
    Caption,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Text {
        kind: BlockKind,
        spans: Vec<Span>,
        align: Align,
        /// Nesting level of lists and quotations.
        indent: u8,
    },
    Image {
        resource: String,
        alt: String,
    },
    MissingImage {
        alt: String,
    },
    Rule,
    PageBreak,
}

impl Block {
    /// Concatenated text of a text block.
    pub fn text(&self) -> String {
        match self {
            Block::Text { spans, .. } => spans.iter().map(|s| s.text.as_str()).collect(),
            _ => String::new(),
        }
    }
}

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

const SKIPPED_ELEMENTS: &[&str] = &["head", "title", "style", "script", "template", "noscript"];

const BLOCK_ELEMENTS: &[&str] = &[
    "p", "div", "section", "article", "header", "footer", "aside", "nav", "main", "figure",
    "address", "center", "table", "thead", "tbody", "tfoot", "tr", "dl", "dt", "hgroup", "body",
];

/// What a start tag changed, so the matching end tag can undo it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Effect {
    None,
    Block,
    Heading,
    Pre,
    Quote,
    List,
    Item,
    Caption,
    Skip,
    Svg,
}

#[derive(Debug)]
struct Frame {
    tag: String,
    effect: Effect,
    prev_style: InlineStyle,
    prev_align: Align,
    break_after: bool,
}

#[derive(Debug)]
struct ListState {
    ordered: bool,
    next: u32,
}

#[derive(Debug)]
struct TextBlock {
    kind: BlockKind,
    spans: Vec<Span>,
    align: Align,
    indent: u8,
}

impl TextBlock {
    fn has_content(&self) -> bool {
        match self.kind {
            BlockKind::Preformatted => self.spans.iter().any(|s| !s.text.is_empty()),
            _ => self.spans.iter().any(|s| !s.text.trim().is_empty()),
        }
    }
}

#[derive(Debug, Default)]
struct LayoutBuilder {
    blocks: Vec<Block>,
    current: Option<TextBlock>,
    frames: Vec<Frame>,
    style: InlineStyle,
    align: Align,
    lists: Vec<ListState>,
    heading: Option<u8>,
    quote_depth: u8,
    pre_depth: usize,
    caption_depth: usize,
    skip_depth: usize,
    svg_depth: usize,
}

/// Lays normalized chapter markup out as a flat block sequence.
pub fn layout(markup: &str) -> Vec<Block> {
    let mut builder = LayoutBuilder::default();
    let mut offset = 0usize;

    'outer: while offset < markup.len() {
        let input = &markup[offset..];
        let mut reader = Reader::from_str(input);
        {
            let config = reader.config_mut();
            config.check_end_names = false;
            config.allow_unmatched_ends = true;
            config.check_comments = false;
            config.allow_dangling_amp = true;
        }

        loop {
            match reader.read_event() {
                Ok(Event::Start(ref e)) => builder.start(e, false),
                Ok(Event::Empty(ref e)) => builder.start(e, true),
                Ok(Event::End(ref e)) => {
                    builder.end(&String::from_utf8_lossy(e.local_name().as_ref()).to_ascii_lowercase())
                }
                Ok(Event::Text(ref t)) => builder.text(&String::from_utf8_lossy(t)),
                Ok(Event::CData(ref t)) => builder.text(&String::from_utf8_lossy(t)),
                Ok(Event::GeneralRef(ref r)) => {
                    let mut resolved = String::new();
                    entities::push_reference(&mut resolved, &String::from_utf8_lossy(r));
                    builder.text(&resolved);
                }
                Ok(Event::Eof) => break 'outer,
                Ok(_) => {}
                Err(_) => {
                    let failed_at = offset + reader.buffer_position() as usize;
                    match next_tag_start(markup, failed_at.max(offset + 1)) {
                        Some(next) => {
                            offset = next;
                            continue 'outer;
                        }
                        None => break 'outer,
                    }
                }
            }
        }
    }

    builder.finish()
}

fn next_tag_start(markup: &str, from: usize) -> Option<usize> {
    let mut from = from.min(markup.len());
    while !markup.is_char_boundary(from) {
        from += 1;
    }
    markup[from..].find('<').map(|pos| from + pos)
}

impl LayoutBuilder {
    fn start(&mut self, e: &BytesStart<'_>, self_closing: bool) {
        let tag = String::from_utf8_lossy(e.local_name().as_ref()).to_ascii_lowercase();
        let attrs = Attributes::read(e);

        if self.skip_depth > 0 {
            if !self_closing && !VOID_ELEMENTS.contains(&tag.as_str()) {
                self.push_frame(tag, Effect::None, false);
            }
            return;
        }

        if self.svg_depth > 0 {
            if tag == "img" {
                self.image(&attrs);
            } else if !self_closing {
                self.push_frame(tag, Effect::None, false);
            }
            return;
        }

        if VOID_ELEMENTS.contains(&tag.as_str()) {
            self.void_element(&tag, &attrs);
            return;
        }

        let css = InlineCss::parse(attrs.style.as_deref());
        if css.break_before && is_block_tag(&tag) {
            self.page_break();
        }

        let prev_style = self.style;
        let prev_align = self.align;
        let effect = self.open(&tag, &attrs, &css);
        if self_closing {
            self.close_effect(effect);
            self.style = prev_style;
            self.align = prev_align;
            if css.break_after {
                self.page_break();
            }
            return;
        }

        self.apply_css(&css, attrs.align.as_deref());
        // Blocks opened by the tag itself take the tag's own alignment.
        if let Some(block) = self.current.as_mut() {
            if block.spans.is_empty() {
                block.align = self.align;
            }
        }
        self.frames.push(Frame {
            tag,
            effect,
            prev_style,
            prev_align,
            break_after: css.break_after,
        });
    }

    fn push_frame(&mut self, tag: String, effect: Effect, break_after: bool) {
        self.frames.push(Frame {
            tag,
            effect,
            prev_style: self.style,
            prev_align: self.align,
            break_after,
        });
    }

    /// Applies the structural effect of a start tag and returns it.
    fn open(&mut self, tag: &str, attrs: &Attributes, css: &InlineCss) -> Effect {
        match tag {
            t if SKIPPED_ELEMENTS.contains(&t) => {
                self.skip_depth += 1;
                Effect::Skip
            }
            "svg" => {
                self.svg_depth += 1;
                Effect::Svg
            }
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                self.flush();
                let level = tag.as_bytes()[1] - b'0';
                self.heading = Some(level);
                self.begin(BlockKind::Heading(level));
                Effect::Heading
            }
            "pre" => {
                self.flush();
                self.pre_depth += 1;
                self.begin(BlockKind::Preformatted);
                Effect::Pre
            }
            "blockquote" | "dd" => {
                self.flush();
                self.quote_depth = self.quote_depth.saturating_add(1);
                Effect::Quote
            }
            "ul" | "ol" | "menu" => {
                self.flush();
                let next = attrs
                    .start
                    .as_deref()
                    .and_then(|s| s.trim().parse().ok())
                    .unwrap_or(1);
                self.lists.push(ListState {
                    ordered: tag == "ol",
                    next,
                });
                Effect::List
            }
            "li" => {
                self.flush();
                let marker = match self.lists.last_mut() {
                    Some(list) if list.ordered => {
                        let marker = format!("{}.", list.next);
                        list.next += 1;
                        marker
                    }
                    _ => "•".to_string(),
                };
                self.begin(BlockKind::ListItem { marker });
                Effect::Item
            }
            "figcaption" | "caption" => {
                self.flush();
                self.caption_depth += 1;
                self.begin(BlockKind::Caption);
                Effect::Caption
            }
            "b" | "strong" => {
                self.style.bold = true;
                Effect::None
            }
            "i" | "em" | "cite" | "dfn" | "var" => {
                self.style.italic = true;
                Effect::None
            }
            "code" | "tt" | "kbd" | "samp" => {
                self.style.mono = true;
                Effect::None
            }
            "td" | "th" => {
                if let Some(block) = self.current.as_mut() {
                    block.spans.push(Span {
                        text: "  ".to_string(),
                        style: self.style,
                    });
                }
                if tag == "th" {
                    self.style.bold = true;
                }
                Effect::None
            }
            t if BLOCK_ELEMENTS.contains(&t) || css.is_block => {
                self.flush();
                if t == "dt" {
                    self.style.bold = true;
                }
                Effect::Block
            }
            _ => Effect::None,
        }
    }

    fn void_element(&mut self, tag: &str, attrs: &Attributes) {
        match tag {
            "br" => self.push_text("\n".to_string()),
            "hr" => {
                self.flush();
                self.blocks.push(Block::Rule);
            }
            "img" => self.image(attrs),
            _ => {}
        }
    }

    fn image(&mut self, attrs: &Attributes) {
        let alt = attrs.alt.clone().unwrap_or_default();
        if let Some(resource) = attrs.src.as_deref().and_then(resource_path) {
            self.flush();
            self.blocks.push(Block::Image {
                resource: resource.to_string(),
                alt,
            });
            self.reopen_after_interruption();
        } else if let Some(missing) = attrs.missing.as_ref() {
            self.flush();
            let alt = if missing.is_empty() { alt } else { missing.clone() };
            self.blocks.push(Block::MissingImage { alt });
            self.reopen_after_interruption();
        }
    }

    /// Keeps the enclosing heading or list item styling for text that
    /// follows an inline image.
    fn reopen_after_interruption(&mut self) {
        if let Some(level) = self.heading {
            self.begin(BlockKind::Heading(level));
        } else if self.caption_depth > 0 {
            self.begin(BlockKind::Caption);
        } else if self.pre_depth > 0 {
            self.begin(BlockKind::Preformatted);
        }
    }

    fn end(&mut self, tag: &str) {
        let Some(pos) = self.frames.iter().rposition(|f| f.tag == tag) else {
            return;
        };
        while self.frames.len() > pos {
            let Some(frame) = self.frames.pop() else {
                break;
            };
            self.close_effect(frame.effect);
            self.style = frame.prev_style;
            self.align = frame.prev_align;
            if frame.break_after {
                self.page_break();
            }
        }
    }

    fn close_effect(&mut self, effect: Effect) {
        match effect {
            Effect::None => {}
            Effect::Block | Effect::Item => self.flush(),
            Effect::Heading => {
                self.flush();
                self.heading = None;
            }
            Effect::Pre => {
                self.flush();
                self.pre_depth = self.pre_depth.saturating_sub(1);
            }
            Effect::Quote => {
                self.flush();
                self.quote_depth = self.quote_depth.saturating_sub(1);
            }
            Effect::List => {
                self.flush();
                self.lists.pop();
            }
            Effect::Caption => {
                self.flush();
                self.caption_depth = self.caption_depth.saturating_sub(1);
            }
            Effect::Skip => self.skip_depth = self.skip_depth.saturating_sub(1),
            Effect::Svg => self.svg_depth = self.svg_depth.saturating_sub(1),
        }
    }

    fn apply_css(&mut self, css: &InlineCss, align_attr: Option<&str>) {
        if let Some(bold) = css.bold {
            self.style.bold = bold;
        }
        if let Some(italic) = css.italic {
            self.style.italic = italic;
        }
        if let Some(align) = css.align.or_else(|| align_attr.and_then(parse_align)) {
            self.align = align;
        }
    }

    fn text(&mut self, raw: &str) {
        if self.skip_depth > 0 || self.svg_depth > 0 {
            return;
        }
        let text = fold_text(raw);
        if self.pre_depth > 0 {
            self.push_text(text.replace('\r', "").replace('\t', "    "));
        } else {
            let mut collapsed = String::with_capacity(text.len());
            let mut in_space = false;
            for c in text.chars() {
                if c.is_whitespace() && c != '\u{A0}' {
                    if !in_space {
                        collapsed.push(' ');
                    }
                    in_space = true;
                } else {
                    collapsed.push(c);
                    in_space = false;
                }
            }
            if collapsed.trim().is_empty() && self.current.is_none() {
                return;
            }
            self.push_text(collapsed);
        }
    }

    fn push_text(&mut self, text: String) {
        if self.current.is_none() {
            let kind = self.implicit_kind();
            self.begin(kind);
        }
        let style = self.style;
        if let Some(block) = self.current.as_mut() {
            match block.spans.last_mut() {
                Some(last) if last.style == style => last.text.push_str(&text),
                _ => block.spans.push(Span { text, style }),
            }
        }
    }

    fn implicit_kind(&self) -> BlockKind {
        if let Some(level) = self.heading {
            BlockKind::Heading(level)
        } else if self.pre_depth > 0 {
            BlockKind::Preformatted
        } else if self.caption_depth > 0 {
            BlockKind::Caption
        } else {
            BlockKind::Paragraph
        }
    }

    fn indent(&self) -> u8 {
        self.quote_depth
            .saturating_add(self.lists.len().min(u8::MAX as usize) as u8)
    }

    fn begin(&mut self, kind: BlockKind) {
        self.flush();
        self.current = Some(TextBlock {
            kind,
            spans: Vec::new(),
            align: self.align,
            indent: self.indent(),
        });
    }

    fn flush(&mut self) {
        if let Some(block) = self.current.take() {
            if block.has_content() {
                self.blocks.push(Block::Text {
                    kind: block.kind,
                    spans: trim_spans(block.spans),
                    align: block.align,
                    indent: block.indent,
                });
            }
        }
    }

    fn page_break(&mut self) {
        self.flush();
        if !self.blocks.is_empty() && self.blocks.last() != Some(&Block::PageBreak) {
            self.blocks.push(Block::PageBreak);
        }
    }

    fn finish(mut self) -> Vec<Block> {
        self.flush();
        while self.blocks.last() == Some(&Block::PageBreak) {
            self.blocks.pop();
        }
        self.blocks
    }
}

fn is_block_tag(tag: &str) -> bool {
    BLOCK_ELEMENTS.contains(&tag)
        || matches!(
            tag,
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "pre" | "blockquote" | "ul" | "ol" | "li"
        )
}

/// Drops leading whitespace of the first span and trailing whitespace of
/// the last one.
fn trim_spans(mut spans: Vec<Span>) -> Vec<Span> {
    if let Some(first) = spans.first_mut() {
        first.text = first.text.trim_start_matches(' ').to_string();
    }
    if let Some(last) = spans.last_mut() {
        last.text = last.text.trim_end_matches(' ').to_string();
    }
    spans.retain(|s| !s.text.is_empty());
    spans
}

#[derive(Debug, Default)]
struct Attributes {
    src: Option<String>,
    alt: Option<String>,
    missing: Option<String>,
    style: Option<String>,
    align: Option<String>,
    start: Option<String>,
}

impl Attributes {
    fn read(e: &BytesStart<'_>) -> Self {
        let mut attrs = Attributes::default();
        for attr in e.html_attributes().with_checks(false).flatten() {
            let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).to_ascii_lowercase();
            let value = entities::decode(&String::from_utf8_lossy(&attr.value)).into_owned();
            match key.as_str() {
                "src" => attrs.src = Some(value),
                "alt" => attrs.alt = Some(value),
                "data-missing" => attrs.missing = Some(value),
                "style" => attrs.style = Some(value),
                "align" => attrs.align = Some(value),
                "start" => attrs.start = Some(value),
                _ => {}
            }
        }
        attrs
    }
}

/// The handful of inline declarations the layout honors.
#[derive(Debug, Default, PartialEq)]
struct InlineCss {
    align: Option<Align>,
    bold: Option<bool>,
    italic: Option<bool>,
    break_before: bool,
    break_after: bool,
    is_block: bool,
}

impl InlineCss {
    fn parse(style: Option<&str>) -> Self {
        let mut css = InlineCss::default();
        let Some(style) = style else {
            return css;
        };
        for declaration in style.split(';') {
            let Some((property, value)) = declaration.split_once(':') else {
                continue;
            };
            let property = property.trim().to_ascii_lowercase();
            let value = value.trim().trim_end_matches("!important").trim().to_ascii_lowercase();
            match property.as_str() {
                "text-align" => css.align = parse_align(&value),
                "font-weight" => {
                    css.bold = Some(match value.as_str() {
                        "bold" | "bolder" => true,
                        v => v.parse::<u16>().map(|w| w >= 600).unwrap_or(false),
                    })
                }
                "font-style" => css.italic = Some(value == "italic" || value == "oblique"),
                "page-break-before" | "break-before" => {
                    css.break_before = matches!(value.as_str(), "always" | "page" | "left" | "right")
                }
                "page-break-after" | "break-after" => {
                    css.break_after = matches!(value.as_str(), "always" | "page" | "left" | "right")
                }
                "display" => css.is_block = value == "block",
                _ => {}
            }
        }
        css
    }
}

fn parse_align(value: &str) -> Option<Align> {
    match value.trim().to_ascii_lowercase().as_str() {
        "left" | "start" => Some(Align::Left),
        "center" | "middle" => Some(Align::Center),
        "right" | "end" => Some(Align::Right),
        "justify" => Some(Align::Justify),
        _ => None,
    }
}
