//! Lenient chapter markup scanning
//!
//! Chapter files are nominally XHTML but real archives contain plenty of
//! plain HTML: unclosed void elements, unquoted attributes, stray `<`. This
//! module drives quick-xml with end-name checks off and turns its events into
//! a flat sequence of nodes with byte spans. When the reader rejects a piece
//! of markup, the offending `<` becomes text and reading resumes right after
//! it. The spans let the assembler splice rewritten image URLs into the
//! original markup without re-serializing anything else.

use std::borrow::Cow;
use std::collections::VecDeque;
use std::ops::Range;

use quick_xml::escape::{resolve_predefined_entity, unescape_with};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

/// Elements whose content is raw text up to the matching close tag.
const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

const BOM: char = '\u{feff}';

/// Kind of a scanned markup node
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    /// Character data between tags
    Text,
    /// `&name;` or `&#NNN;` reference
    Reference,
    /// Start tag (possibly self-closing)
    Open,
    /// End tag
    Close,
    /// `<!-- ... -->`
    Comment,
    /// Doctype, processing instruction, XML declaration or CDATA section
    Declaration,
}

/// A node with its byte span in the scanned markup
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Node<'a> {
    /// Node kind
    pub kind: NodeKind,
    /// Byte span in the source
    pub span: Range<usize>,
    /// ASCII-lowercased tag name (empty for non-tag nodes)
    pub name: String,
    self_closing: bool,
    source: &'a str,
}

impl<'a> Node<'a> {
    /// Raw source text of the node.
    pub fn raw(&self) -> &'a str {
        &self.source[self.span.clone()]
    }

    /// Tag name without a namespace prefix.
    pub fn local_name(&self) -> &str {
        self.name.rsplit(':').next().unwrap_or(&self.name)
    }

    /// True for `<tag ... />`.
    pub fn is_self_closing(&self) -> bool {
        self.self_closing
    }

    /// Parse the attributes of a start tag.
    ///
    /// Quoted, unquoted and bare (`hidden`) attributes are accepted. Each
    /// value keeps its byte span in the scanned source.
    pub fn attributes(&self) -> Vec<Attribute<'a>> {
        if self.kind != NodeKind::Open {
            return Vec::new();
        }
        let raw = self.raw();
        let content = raw.strip_prefix('<').unwrap_or(raw);
        let content = content.strip_suffix('>').unwrap_or(content);
        let content = if self.self_closing {
            content.strip_suffix('/').unwrap_or(content)
        } else {
            content
        };
        let name_len = content
            .find(|c: char| c.is_ascii_whitespace())
            .unwrap_or(content.len());

        let tag = BytesStart::from_content(content, name_len);
        tag.html_attributes()
            .with_checks(false)
            .flatten()
            .filter_map(|attr| {
                let key_span = subslice_range(self.source, attr.key.as_ref())?;
                let value_span = match &attr.value {
                    Cow::Borrowed(value) if !value.is_empty() => {
                        subslice_range(self.source, value)?
                    }
                    _ => key_span.end..key_span.end,
                };
                Some(Attribute {
                    name: self.source.get(key_span)?.to_ascii_lowercase(),
                    raw_value: self.source.get(value_span.clone())?,
                    value_span,
                })
            })
            .collect()
    }

    /// Value of the first attribute named `name` (lowercase), entity-decoded.
    pub fn attribute(&self, name: &str) -> Option<String> {
        self.attributes()
            .into_iter()
            .find(|attr| attr.name == name)
            .map(|attr| attr.value())
    }
}

/// A start-tag attribute with the span of its raw value
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attribute<'a> {
    /// ASCII-lowercased attribute name, prefix included (`xlink:href`)
    pub name: String,
    /// Raw value as written, without quotes
    pub raw_value: &'a str,
    /// Byte span of the raw value in the source
    pub value_span: Range<usize>,
}

impl Attribute<'_> {
    /// Entity-decoded value.
    pub fn value(&self) -> String {
        decode_entities(self.raw_value).into_owned()
    }
}

/// Byte range of `part` inside `source`, when `part` borrows from it.
fn subslice_range(source: &str, part: &[u8]) -> Option<Range<usize>> {
    let start = (part.as_ptr() as usize).checked_sub(source.as_ptr() as usize)?;
    let end = start.checked_add(part.len())?;
    (end <= source.len()).then_some(start..end)
}

/// Iterator over the nodes of a markup string.
pub struct Scanner<'a> {
    source: &'a str,
    /// Offset of the current reader's input within `source`
    base: usize,
    reader: Reader<&'a [u8]>,
    pending: VecDeque<Node<'a>>,
    done: bool,
}

/// Scan `source` into text and tag nodes.
pub fn scan(source: &str) -> Scanner<'_> {
    let mut scanner = Scanner {
        source,
        base: 0,
        reader: html_reader(source),
        pending: VecDeque::new(),
        done: false,
    };
    scanner.restart(0);
    scanner
}

fn html_reader(source: &str) -> Reader<&[u8]> {
    let mut reader = Reader::from_str(source);
    let config = reader.config_mut();
    config.trim_text(false);
    config.expand_empty_elements = false;
    config.check_end_names = false;
    config.allow_unmatched_ends = true;
    config.allow_dangling_amp = true;
    reader
}

impl<'a> Scanner<'a> {
    fn position(&self) -> usize {
        self.base
            .saturating_add(usize::try_from(self.reader.buffer_position()).unwrap_or(usize::MAX))
            .min(self.source.len())
    }

    /// Continue with a fresh reader at byte `pos`.
    fn restart(&mut self, pos: usize) {
        let mut pos = pos.min(self.source.len());
        // The reader drops a leading BOM without counting it.
        if self.source[pos..].starts_with(BOM) {
            let end = pos + BOM.len_utf8();
            let bom = self.node(NodeKind::Text, pos..end, String::new());
            self.pending.push_back(bom);
            pos = end;
        }
        let source = self.source;
        self.base = pos;
        self.reader = html_reader(&source[pos..]);
    }

    fn node(&self, kind: NodeKind, span: Range<usize>, name: String) -> Node<'a> {
        Node {
            kind,
            span,
            name,
            self_closing: false,
            source: self.source,
        }
    }

    /// Emit the character at `at` as text and resume after it.
    fn stray_char(&mut self, at: usize) -> Node<'a> {
        let len = self.source[at..].chars().next().map_or(1, char::len_utf8);
        let node = self.node(NodeKind::Text, at..at + len, String::new());
        self.restart(at + len);
        node
    }

    fn tag(
        &self,
        kind: NodeKind,
        span: Range<usize>,
        raw_name: &[u8],
        self_closing: bool,
    ) -> Node<'a> {
        let name = String::from_utf8_lossy(raw_name).to_ascii_lowercase();
        let mut node = self.node(kind, span, name);
        node.self_closing = self_closing;
        node
    }

    /// Queue the raw content of a `<script>`/`<style>` element and resume
    /// reading at its close tag.
    fn skip_raw_text(&mut self, element: &str, from: usize) {
        let close = format!("</{}", element);
        let end = find_ci(self.source, &close, from).unwrap_or(self.source.len());
        if end > from {
            let content = self.node(NodeKind::Text, from..end, String::new());
            self.pending.push_back(content);
        }
        self.restart(end);
    }
}

impl<'a> Iterator for Scanner<'a> {
    type Item = Node<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(node) = self.pending.pop_front() {
            return Some(node);
        }
        if self.done {
            return None;
        }

        let before = Scanner::position(self);
        let event = match self.reader.read_event() {
            Ok(Event::Eof) => {
                self.done = true;
                return None;
            }
            Ok(event) => event,
            Err(err) => {
                if before >= self.source.len() {
                    self.done = true;
                    return None;
                }
                log::trace!("[MARKUP] Treating '<' at {} as text: {}", before, err);
                return Some(self.stray_char(before));
            }
        };
        let span = before..Scanner::position(self);

        let node = match event {
            Event::Text(_) => self.node(NodeKind::Text, span, String::new()),
            Event::GeneralRef(_) => self.node(NodeKind::Reference, span, String::new()),
            Event::Comment(_) => self.node(NodeKind::Comment, span, String::new()),
            Event::CData(_) | Event::Decl(_) | Event::PI(_) | Event::DocType(_) => {
                self.node(NodeKind::Declaration, span, String::new())
            }
            Event::Start(e) | Event::Empty(e) if !is_tag_name(e.name().as_ref()) => {
                return Some(self.stray_char(before));
            }
            Event::End(e) if !is_tag_name(e.name().as_ref()) => {
                return Some(self.stray_char(before));
            }
            Event::Start(e) => {
                let node = self.tag(NodeKind::Open, span, e.name().as_ref(), false);
                if let Some(element) = RAW_TEXT_ELEMENTS
                    .iter()
                    .copied()
                    .find(|element| *element == node.name)
                {
                    self.skip_raw_text(element, node.span.end);
                }
                node
            }
            Event::Empty(e) => self.tag(NodeKind::Open, span, e.name().as_ref(), true),
            Event::End(e) => self.tag(NodeKind::Close, span, e.name().as_ref(), false),
            Event::Eof => return None,
        };
        Some(node)
    }
}

/// A tag name starts with an ASCII letter; anything else after `<` is text.
fn is_tag_name(name: &[u8]) -> bool {
    name.first().is_some_and(u8::is_ascii_alphabetic) && !name.contains(&b'<')
}

/// Decode character references; unknown named entities are kept verbatim.
///
/// Named references resolve against the HTML5 entity set.
pub fn decode_entities(text: &str) -> Cow<'_, str> {
    if !text.contains('&') {
        return Cow::Borrowed(text);
    }
    match unescape_with(text, resolve_predefined_entity) {
        Ok(decoded) => decoded,
        Err(_) => Cow::Owned(decode_each_reference(text)),
    }
}

/// Reference-by-reference fallback used when the whole string does not
/// decode; anything unrecognized is copied through.
fn decode_each_reference(text: &str) -> String {
    let mut pieces = text.split('&');
    let mut out = String::with_capacity(text.len());
    out.push_str(pieces.next().unwrap_or_default());
    for piece in pieces {
        let resolved = piece.find(';').and_then(|semi| {
            let reference = format!("&{};", &piece[..semi]);
            unescape_with(&reference, resolve_predefined_entity)
                .ok()
                .map(|value| (value.into_owned(), semi + 1))
        });
        match resolved {
            Some((value, consumed)) => {
                out.push_str(&value);
                out.push_str(&piece[consumed..]);
            }
            None => {
                out.push('&');
                out.push_str(piece);
            }
        }
    }
    out
}

/// Case-insensitive search for an ASCII needle starting at `from`.
fn find_ci(haystack: &str, needle: &str, from: usize) -> Option<usize> {
    let hay = haystack.as_bytes();
    let needle = needle.as_bytes();
    if needle.is_empty() || from >= hay.len() {
        return None;
    }
    hay[from..]
        .windows(needle.len())
        .position(|window| window.eq_ignore_ascii_case(needle))
        .map(|i| from + i)
}

/// Inner markup of `<body>`, or the document minus its wrapper when there
/// is no body element. The result is trimmed.
pub fn extract_body(html: &str) -> &str {
    let nodes: Vec<Node<'_>> = scan(html).collect();

    let open = nodes
        .iter()
        .find(|n| n.kind == NodeKind::Open && n.name == "body");
    if let Some(open) = open {
        if open.is_self_closing() {
            return "";
        }
        let start = open.span.end;
        let end = nodes
            .iter()
            .rev()
            .find(|n| n.kind == NodeKind::Close && n.name == "body" && n.span.start >= start)
            .map(|n| n.span.start)
            .or_else(|| {
                nodes
                    .iter()
                    .rev()
                    .find(|n| n.kind == NodeKind::Close && n.name == "html" && n.span.start >= start)
                    .map(|n| n.span.start)
            })
            .unwrap_or(html.len());
        return html[start..end].trim();
    }

    strip_document_wrapper(html, &nodes)
}

/// Without a body element the content is whatever remains after removing the
/// prolog, doctype, `<html>` tags and the `<head>` block. That remainder is
/// contiguous in any sane document, so the first and last surviving nodes
/// bound it.
fn strip_document_wrapper<'a>(html: &'a str, nodes: &[Node<'a>]) -> &'a str {
    let mut head_depth = 0usize;
    let mut first = None;
    let mut last = None;

    for node in nodes {
        let wrapper = match node.kind {
            NodeKind::Declaration => true,
            NodeKind::Open if node.name == "html" => true,
            NodeKind::Close if node.name == "html" => true,
            NodeKind::Open if node.name == "head" => {
                if !node.is_self_closing() {
                    head_depth += 1;
                }
                true
            }
            NodeKind::Close if node.name == "head" => {
                head_depth = head_depth.saturating_sub(1);
                true
            }
            _ => head_depth > 0,
        };
        if wrapper {
            continue;
        }
        if node.kind == NodeKind::Text && node.raw().trim().is_empty() && first.is_none() {
            continue;
        }
        first.get_or_insert(node.span.start);
        last = Some(node.span.end);
    }

    match (first, last) {
        (Some(start), Some(end)) => html[start..end].trim(),
        _ => "",
    }
}

/// Visible text of a markup fragment: tags, comments and the contents of
/// `<script>`/`<style>` removed, entities decoded, result trimmed.
pub fn strip_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_raw_text = false;
    for node in scan(html) {
        match node.kind {
            NodeKind::Text if !in_raw_text => out.push_str(node.raw()),
            NodeKind::Reference if !in_raw_text => out.push_str(&decode_entities(node.raw())),
            NodeKind::Open => {
                in_raw_text = !node.is_self_closing()
                    && RAW_TEXT_ELEMENTS.contains(&node.name.as_str());
            }
            NodeKind::Close => in_raw_text = false,
            _ => {}
        }
    }
    out.trim().to_string()
}

/// A style sheet referenced or embedded by a chapter
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StyleSource {
    /// Text of a `<style>` block, as written
    Inline(String),
    /// `href` of a `<link rel="stylesheet">`, as written
    Linked(String),
}

/// Inline `<style>` blocks and linked style sheets, in document order.
///
/// Blank blocks and links without an `href` are left out.
pub fn style_sources(html: &str) -> Vec<StyleSource> {
    let mut out = Vec::new();
    let mut in_style = false;
    for node in scan(html) {
        match node.kind {
            NodeKind::Open if node.name == "style" => in_style = !node.is_self_closing(),
            NodeKind::Close if node.name == "style" => in_style = false,
            NodeKind::Text if in_style => {
                let css = node.raw();
                if !css.trim().is_empty() {
                    out.push(StyleSource::Inline(css.to_string()));
                }
            }
            NodeKind::Open if node.name == "link" && is_stylesheet_link(&node) => {
                if let Some(href) = node.attribute("href").filter(|h| !h.trim().is_empty()) {
                    out.push(StyleSource::Linked(href.trim().to_string()));
                }
            }
            _ => {}
        }
    }
    out
}

fn is_stylesheet_link(node: &Node<'_>) -> bool {
    node.attribute("rel").is_some_and(|rel| {
        rel.split_whitespace()
            .any(|v| v.eq_ignore_ascii_case("stylesheet"))
    })
}

/// An embedded image reference found in markup
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageRef {
    /// Span of the whole element (start tag, plus an immediately following
    /// end tag for non-void elements)
    pub element_span: Range<usize>,
    /// Span of the raw attribute value holding the reference
    pub value_span: Range<usize>,
    /// Entity-decoded reference
    pub reference: String,
}

/// Raster (`<img src>`) and SVG (`<image href>` / `<image xlink:href>`)
/// image references, in document order.
pub fn image_refs(html: &str) -> Vec<ImageRef> {
    let nodes: Vec<Node<'_>> = scan(html).collect();
    let mut out = Vec::new();

    for (i, node) in nodes.iter().enumerate() {
        if node.kind != NodeKind::Open {
            continue;
        }
        let attrs = node.attributes();
        let attr = match node.local_name() {
            "img" => attrs.iter().find(|a| a.name == "src"),
            "image" => attrs
                .iter()
                .find(|a| a.name == "href")
                .or_else(|| attrs.iter().find(|a| a.name == "xlink:href")),
            _ => None,
        };
        let Some(attr) = attr else {
            continue;
        };
        if attr.raw_value.trim().is_empty() {
            continue;
        }

        let mut element_end = node.span.end;
        if !node.is_self_closing() {
            if let Some(close) = nodes[i + 1..]
                .iter()
                .find(|n| !(n.kind == NodeKind::Text && n.raw().trim().is_empty()))
                .filter(|n| n.kind == NodeKind::Close && n.name == node.name)
            {
                element_end = close.span.end;
            }
        }

        out.push(ImageRef {
            element_span: node.span.start..element_end,
            value_span: attr.value_span.clone(),
            reference: attr.value().trim().to_string(),
        });
    }

    out
}
