//! Chapter assembly
//!
//! Walks the spine in reading order and turns each referenced document into
//! a [`ParsedChapter`]: body markup with images rehomed through an
//! [`AssetSink`], a character count of the visible text, and a running
//! character offset. Style sheets from every chapter are merged into one
//! deduplicated string.
//!
//! Nothing in here is fatal. Broken references, missing files and sink
//! failures are logged, counted in [`ParseStats`] and skipped over.

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};

use quick_xml::escape::escape;

use crate::markup::{extract_body, image_refs, strip_tags, style_sources, StyleSource};
use crate::package::{Package, SpineItem};
use crate::path::{is_external, resolve, sanitize_asset_name};
use crate::sink::AssetSink;
use crate::zip::EntryTable;

/// Class of the element that replaces an image that could not be rehomed.
pub const MISSING_IMAGE_CLASS: &str = "epub-image-missing";

/// Knobs for chapter assembly.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AssembleOptions {
    /// Keep chapters with no text when they contain at least one image.
    /// Such chapters get `char_length == 0`.
    pub keep_image_only_chapters: bool,
    /// Leave out spine items marked `linear="no"`.
    pub skip_non_linear: bool,
    /// Prepended to every suggested asset name.
    pub asset_prefix: String,
}

impl AssembleOptions {
    /// Set whether image-only chapters are kept.
    pub fn with_keep_image_only_chapters(mut self, keep: bool) -> Self {
        self.keep_image_only_chapters = keep;
        self
    }

    /// Set whether non-linear spine items are skipped.
    pub fn with_skip_non_linear(mut self, skip: bool) -> Self {
        self.skip_non_linear = skip;
        self
    }

    /// Set the asset name prefix.
    pub fn with_asset_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.asset_prefix = prefix.into();
        self
    }
}

/// One chapter of the output reading order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedChapter {
    /// 0-based position in the output list
    pub index: usize,
    /// Manifest href of the source document
    pub href: String,
    /// Body markup with image URLs rewritten
    pub html: String,
    /// Unicode scalar values in the visible text of the body.
    ///
    /// Counted after tags are stripped and the text is trimmed. A decoded
    /// entity such as `&amp;` or `&#x4E2D;` counts as one character; unknown
    /// named entities stay verbatim and count as written. Comments and the
    /// contents of `<script>` and `<style>` elements are excluded. Image
    /// rewriting never changes this value.
    pub char_length: usize,
    /// Sum of `char_length` over all previous chapters
    pub char_offset: usize,
}

impl ParsedChapter {
    /// Offset one past the last character of this chapter.
    pub fn char_end(&self) -> usize {
        self.char_offset + self.char_length
    }
}

/// Counters for everything that was skipped or degraded during a parse.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ParseStats {
    /// Archive entries left out of the entry table
    pub skipped_entries: usize,
    /// Spine items naming a manifest id that does not exist
    pub dangling_idrefs: usize,
    /// Spine items whose document is not in the archive
    pub missing_chapters: usize,
    /// Chapters dropped because they have no visible text
    pub dropped_empty_chapters: usize,
    /// Linked style sheets that could not be found
    pub missing_styles: usize,
    /// Images replaced by the missing-image placeholder
    pub image_placeholders: usize,
    /// Successful `AssetSink::store` calls
    pub images_stored: usize,
}

/// Output of a parse.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EpubParseResult {
    /// Chapters in reading order
    pub chapters: Vec<ParsedChapter>,
    /// Deduplicated style sheet text, joined by newlines
    pub styles: String,
    /// Total characters across all chapters
    pub total_characters: usize,
    /// What was skipped along the way
    pub stats: ParseStats,
}

impl EpubParseResult {
    /// Chapter containing the global character `offset`.
    ///
    /// Chapters without text never contain an offset. Returns `None` when
    /// `offset >= total_characters`.
    pub fn chapter_at_offset(&self, offset: usize) -> Option<&ParsedChapter> {
        if offset >= self.total_characters {
            return None;
        }
        let idx = self.chapters.partition_point(|c| c.char_end() <= offset);
        self.chapters.get(idx)
    }
}

/// Assemble chapters with default options.
pub fn assemble<S: AssetSink + ?Sized>(
    entries: &EntryTable,
    package: &Package,
    sink: &mut S,
) -> EpubParseResult {
    assemble_with_options(entries, package, sink, &AssembleOptions::default())
}

/// Assemble chapters with explicit options.
pub fn assemble_with_options<S: AssetSink + ?Sized>(
    entries: &EntryTable,
    package: &Package,
    sink: &mut S,
    options: &AssembleOptions,
) -> EpubParseResult {
    let mut assembler = Assembler {
        entries,
        sink,
        options,
        images: HashMap::new(),
        styles: StyleAccumulator::default(),
        stats: ParseStats {
            skipped_entries: entries.skipped_entries(),
            ..ParseStats::default()
        },
    };

    let mut chapters: Vec<ParsedChapter> = Vec::with_capacity(package.spine.len());
    let mut char_offset = 0usize;
    for item in &package.spine {
        if let Some((href, html, char_length)) = assembler.chapter(package, item) {
            chapters.push(ParsedChapter {
                index: chapters.len(),
                href,
                html,
                char_length,
                char_offset,
            });
            char_offset += char_length;
        }
    }

    let stats = assembler.stats;
    log::debug!(
        "[ASSEMBLE] {} chapters from {} spine items, {} characters, {} images stored",
        chapters.len(),
        package.spine.len(),
        char_offset,
        stats.images_stored
    );

    EpubParseResult {
        chapters,
        styles: assembler.styles.finish(),
        total_characters: char_offset,
        stats,
    }
}

/// Style sheet text in first-seen order, deduplicated by exact text.
///
/// Blank blocks are ignored. Texts that differ only in surrounding
/// whitespace are distinct sheets.
#[derive(Debug, Default)]
struct StyleAccumulator {
    seen: HashSet<String>,
    sheets: Vec<String>,
}

impl StyleAccumulator {
    fn add(&mut self, css: &str) {
        if css.trim().is_empty() || !self.seen.insert(css.to_string()) {
            return;
        }
        self.sheets.push(css.to_string());
    }

    fn finish(self) -> String {
        self.sheets.join("\n")
    }
}

struct Assembler<'a, S: AssetSink + ?Sized> {
    entries: &'a EntryTable,
    sink: &'a mut S,
    options: &'a AssembleOptions,
    /// Resolved image path -> issued URL, or `None` for a remembered failure.
    images: HashMap<String, Option<String>>,
    styles: StyleAccumulator,
    stats: ParseStats,
}

impl<S: AssetSink + ?Sized> Assembler<'_, S> {
    /// Process one spine item; `None` when it contributes no chapter.
    fn chapter(&mut self, package: &Package, item: &SpineItem) -> Option<(String, String, usize)> {
        let Some(manifest_item) = package.manifest_item(&item.idref) else {
            log::warn!("[ASSEMBLE] Spine idref '{}' not in manifest", item.idref);
            self.stats.dangling_idrefs += 1;
            return None;
        };
        if !item.linear && self.options.skip_non_linear {
            log::debug!("[ASSEMBLE] Skipping non-linear item '{}'", item.idref);
            return None;
        }

        let chapter_path = package.resolve_href(&manifest_item.href);
        let Some(bytes) = self.entries.find(&chapter_path, &manifest_item.href) else {
            log::warn!("[ASSEMBLE] Chapter '{}' not found in archive", chapter_path);
            self.stats.missing_chapters += 1;
            return None;
        };
        let source = decode_text(bytes);

        self.collect_styles(&source, &chapter_path);

        let body = extract_body(&source);
        let char_length = strip_tags(body).chars().count();
        let images = image_refs(body);
        if char_length == 0 && !(self.options.keep_image_only_chapters && !images.is_empty()) {
            log::debug!("[ASSEMBLE] Dropping chapter '{}' with no text", chapter_path);
            self.stats.dropped_empty_chapters += 1;
            return None;
        }

        let mut html = String::with_capacity(body.len());
        let mut cursor = 0usize;
        for image in &images {
            if image.element_span.start < cursor || is_external(&image.reference) {
                continue;
            }
            let resolved = resolve(&image.reference, &chapter_path);
            match self.store_image(&resolved, &image.reference) {
                Some(url) => {
                    html.push_str(&body[cursor..image.value_span.start]);
                    let quoted = image.value_span.start > 0
                        && matches!(body.as_bytes()[image.value_span.start - 1], b'"' | b'\'');
                    if quoted {
                        html.push_str(&escape(url.as_str()));
                    } else {
                        html.push('"');
                        html.push_str(&escape(url.as_str()));
                        html.push('"');
                    }
                    cursor = image.value_span.end;
                }
                None => {
                    html.push_str(&body[cursor..image.element_span.start]);
                    html.push_str(&missing_image_placeholder(&image.reference));
                    self.stats.image_placeholders += 1;
                    cursor = image.element_span.end;
                }
            }
        }
        html.push_str(&body[cursor..]);

        Some((manifest_item.href.clone(), html, char_length))
    }

    fn collect_styles(&mut self, source: &str, chapter_path: &str) {
        for style in style_sources(source) {
            match style {
                StyleSource::Inline(css) => self.styles.add(&css),
                StyleSource::Linked(href) => {
                    if is_external(&href) {
                        continue;
                    }
                    let sheet_path = resolve(&href, chapter_path);
                    match self.entries.find(&sheet_path, &href) {
                        Some(bytes) => self.styles.add(&decode_text(bytes)),
                        None => {
                            log::warn!("[ASSEMBLE] Style sheet '{}' not found", sheet_path);
                            self.stats.missing_styles += 1;
                        }
                    }
                }
            }
        }
    }

    /// Store an image once per parse and return its URL.
    fn store_image(&mut self, resolved: &str, original: &str) -> Option<String> {
        if let Some(cached) = self.images.get(resolved) {
            return cached.clone();
        }

        let outcome = match self.entries.find(resolved, original) {
            None => {
                log::warn!("[ASSEMBLE] Image '{}' not found", resolved);
                None
            }
            Some(bytes) => {
                let name = format!("{}{}", self.options.asset_prefix, sanitize_asset_name(resolved));
                match self.sink.store(bytes, &name) {
                    Ok(url) => {
                        self.stats.images_stored += 1;
                        Some(url)
                    }
                    Err(err) => {
                        log::warn!("[ASSEMBLE] Storing image '{}' failed: {}", resolved, err);
                        None
                    }
                }
            }
        };

        self.images.insert(resolved.to_string(), outcome.clone());
        outcome
    }
}

/// Inert element standing in for an image that could not be rehomed.
pub fn missing_image_placeholder(reference: &str) -> String {
    format!(
        r#"<span class="{}" data-src="{}"></span>"#,
        MISSING_IMAGE_CLASS,
        escape(reference)
    )
}

/// Lossy UTF-8 with a leading byte order mark removed.
fn decode_text(bytes: &[u8]) -> Cow<'_, str> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    String::from_utf8_lossy(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SinkError;
    use crate::package::ManifestItem;
    use crate::sink::MemorySink;

    struct FailingSink {
        calls: usize,
    }

    impl AssetSink for FailingSink {
        fn store(&mut self, _bytes: &[u8], _name: &str) -> Result<String, SinkError> {
            self.calls += 1;
            Err(SinkError::Backend("offline".into()))
        }
    }

    fn package(items: &[(&str, &str)], spine: &[(&str, bool)]) -> Package {
        Package {
            package_path: "OEBPS/content.opf".into(),
            package_dir: "OEBPS".into(),
            manifest: items
                .iter()
                .map(|(id, href)| ManifestItem {
                    id: id.to_string(),
                    href: href.to_string(),
                    media_type: "application/xhtml+xml".into(),
                })
                .collect(),
            spine: spine
                .iter()
                .map(|(idref, linear)| SpineItem {
                    idref: idref.to_string(),
                    linear: *linear,
                })
                .collect(),
        }
    }

    fn table(files: &[(&str, &[u8])]) -> EntryTable {
        files
            .iter()
            .map(|(path, bytes)| (path.to_string(), bytes.to_vec()))
            .collect()
    }

    fn xhtml(body: &str) -> Vec<u8> {
        format!(
            "<?xml version=\"1.0\"?><html xmlns=\"http://www.w3.org/1999/xhtml\"><head><title>t</title></head><body>{}</body></html>",
            body
        )
        .into_bytes()
    }

    #[test]
    fn test_offsets_accumulate() {
        let entries = table(&[
            ("OEBPS/a.xhtml", &xhtml("<p>Hello</p>")),
            ("OEBPS/b.xhtml", &xhtml("<p>World!!</p>")),
        ]);
        let pkg = package(&[("a", "a.xhtml"), ("b", "b.xhtml")], &[("a", true), ("b", true)]);
        let result = assemble(&entries, &pkg, &mut MemorySink::default());

        assert_eq!(result.chapters.len(), 2);
        assert_eq!(result.chapters[0].char_length, 5);
        assert_eq!(result.chapters[1].char_offset, 5);
        assert_eq!(result.chapters[1].char_length, 7);
        assert_eq!(result.total_characters, 12);
        assert_eq!(result.chapters[1].index, 1);
    }

    #[test]
    fn test_empty_chapter_consumes_no_index() {
        let entries = table(&[
            ("OEBPS/a.xhtml", &xhtml("<p>One</p>")),
            ("OEBPS/b.xhtml", &xhtml("  <div> </div> ")),
            ("OEBPS/c.xhtml", &xhtml("<p>Three</p>")),
        ]);
        let pkg = package(
            &[("a", "a.xhtml"), ("b", "b.xhtml"), ("c", "c.xhtml")],
            &[("a", true), ("b", true), ("c", true)],
        );
        let result = assemble(&entries, &pkg, &mut MemorySink::default());

        assert_eq!(result.chapters.len(), 2);
        assert_eq!(result.chapters[1].href, "c.xhtml");
        assert_eq!(result.chapters[1].index, 1);
        assert_eq!(result.chapters[1].char_offset, 3);
        assert_eq!(result.stats.dropped_empty_chapters, 1);
    }

    #[test]
    fn test_dangling_and_missing_chapters_are_counted() {
        let entries = table(&[("OEBPS/a.xhtml", &xhtml("<p>A</p>"))]);
        let pkg = package(
            &[("a", "a.xhtml"), ("gone", "gone.xhtml")],
            &[("nope", true), ("gone", true), ("a", true)],
        );
        let result = assemble(&entries, &pkg, &mut MemorySink::default());
        assert_eq!(result.chapters.len(), 1);
        assert_eq!(result.stats.dangling_idrefs, 1);
        assert_eq!(result.stats.missing_chapters, 1);
    }

    #[test]
    fn test_non_linear_items_follow_option() {
        let entries = table(&[
            ("OEBPS/a.xhtml", &xhtml("<p>A</p>")),
            ("OEBPS/notes.xhtml", &xhtml("<p>Notes</p>")),
        ]);
        let pkg = package(
            &[("a", "a.xhtml"), ("n", "notes.xhtml")],
            &[("a", true), ("n", false)],
        );
        let result = assemble(&entries, &pkg, &mut MemorySink::default());
        assert_eq!(result.chapters.len(), 2);

        let options = AssembleOptions::default().with_skip_non_linear(true);
        let result = assemble_with_options(&entries, &pkg, &mut MemorySink::default(), &options);
        assert_eq!(result.chapters.len(), 1);
    }

    #[test]
    fn test_images_are_stored_once_and_rewritten() {
        let entries = table(&[
            ("OEBPS/a.xhtml", &xhtml(r#"<p>A</p><img src="img/x.png" alt=""/>"#)),
            ("OEBPS/b.xhtml", &xhtml(r#"<p>B</p><img src="./img/x.png"/><img src=img/x.png>"#)),
            ("OEBPS/img/x.png", b"png"),
        ]);
        let pkg = package(&[("a", "a.xhtml"), ("b", "b.xhtml")], &[("a", true), ("b", true)]);
        let mut sink = MemorySink::new("/u/");
        let result = assemble(&entries, &pkg, &mut sink);

        assert_eq!(sink.len(), 1);
        assert_eq!(sink.stored()[0].name, "OEBPS_img_x.png");
        assert_eq!(result.stats.images_stored, 1);
        assert_eq!(
            result.chapters[0].html,
            r#"<p>A</p><img src="/u/OEBPS_img_x.png" alt=""/>"#
        );
        assert_eq!(
            result.chapters[1].html,
            r#"<p>B</p><img src="/u/OEBPS_img_x.png"/><img src="/u/OEBPS_img_x.png">"#
        );
    }

    #[test]
    fn test_missing_image_becomes_placeholder() {
        let entries = table(&[(
            "OEBPS/a.xhtml",
            &xhtml(r#"<p>A</p><img src="img/none&amp;x.png"/><p>B</p>"#),
        )]);
        let pkg = package(&[("a", "a.xhtml")], &[("a", true)]);
        let result = assemble(&entries, &pkg, &mut MemorySink::default());

        assert_eq!(
            result.chapters[0].html,
            r#"<p>A</p><span class="epub-image-missing" data-src="img/none&amp;x.png"></span><p>B</p>"#
        );
        assert_eq!(result.stats.image_placeholders, 1);
    }

    #[test]
    fn test_sink_failure_is_cached() {
        let entries = table(&[
            ("OEBPS/a.xhtml", &xhtml(r#"<p>A</p><img src="x.png"/><img src="x.png"/>"#)),
            ("OEBPS/x.png", b"png"),
        ]);
        let pkg = package(&[("a", "a.xhtml")], &[("a", true)]);
        let mut sink = FailingSink { calls: 0 };
        let result = assemble(&entries, &pkg, &mut sink);

        assert_eq!(sink.calls, 1);
        assert_eq!(result.stats.image_placeholders, 2);
        assert_eq!(result.chapters[0].html.matches(MISSING_IMAGE_CLASS).count(), 2);
    }

    #[test]
    fn test_external_and_data_images_untouched() {
        let body = r#"<p>A</p><img src="https://example.com/a.png"/><img src="data:image/png;base64,AAAA"/>"#;
        let entries = table(&[("OEBPS/a.xhtml", &xhtml(body))]);
        let pkg = package(&[("a", "a.xhtml")], &[("a", true)]);
        let mut sink = MemorySink::default();
        let result = assemble(&entries, &pkg, &mut sink);

        assert!(sink.is_empty());
        assert_eq!(result.chapters[0].html, body);
    }

    #[test]
    fn test_svg_image_rewritten() {
        let entries = table(&[
            (
                "OEBPS/a.xhtml",
                &xhtml(r#"<p>A</p><svg><image xlink:href="../cover.jpg"></image></svg>"#),
            ),
            ("cover.jpg", b"jpg"),
        ]);
        let pkg = package(&[("a", "a.xhtml")], &[("a", true)]);
        let mut sink = MemorySink::new("/u/");
        let result = assemble(&entries, &pkg, &mut sink);
        assert_eq!(
            result.chapters[0].html,
            r#"<p>A</p><svg><image xlink:href="/u/cover.jpg"></image></svg>"#
        );
    }

    #[test]
    fn test_image_only_chapter_option() {
        let entries = table(&[
            ("OEBPS/cover.xhtml", &xhtml(r#"<img src="c.png"/>"#)),
            ("OEBPS/a.xhtml", &xhtml("<p>Text</p>")),
            ("OEBPS/c.png", b"png"),
        ]);
        let pkg = package(
            &[("cover", "cover.xhtml"), ("a", "a.xhtml")],
            &[("cover", true), ("a", true)],
        );

        let result = assemble(&entries, &pkg, &mut MemorySink::default());
        assert_eq!(result.chapters.len(), 1);

        let options = AssembleOptions::default()
            .with_keep_image_only_chapters(true)
            .with_asset_prefix("book1-");
        let mut sink = MemorySink::default();
        let result = assemble_with_options(&entries, &pkg, &mut sink, &options);
        assert_eq!(result.chapters.len(), 2);
        assert_eq!(result.chapters[0].char_length, 0);
        assert_eq!(result.chapters[1].char_offset, 0);
        assert_eq!(sink.stored()[0].name, "book1-OEBPS_c.png");
    }

    #[test]
    fn test_styles_deduplicated_in_first_seen_order() {
        let head = r#"<html><head><link rel="stylesheet" href="css/main.css"/>
<link rel="stylesheet" href="css/missing.css"/><style> p { margin: 0 } </style></head>"#;
        let a = format!("{}<body><p>A</p></body></html>", head);
        let b = format!("{}<body><style>h1 {{ color: red }}</style><p>B</p></body></html>", head);
        let entries = table(&[
            ("OEBPS/a.xhtml", a.as_bytes()),
            ("OEBPS/b.xhtml", b.as_bytes()),
            ("OEBPS/css/main.css", b"\xEF\xBB\xBFbody { font-size: 1em; }\n"),
        ]);
        let pkg = package(&[("a", "a.xhtml"), ("b", "b.xhtml")], &[("a", true), ("b", true)]);
        let result = assemble(&entries, &pkg, &mut MemorySink::default());

        assert_eq!(
            result.styles,
            "body { font-size: 1em; }\n\n p { margin: 0 } \nh1 { color: red }"
        );
        assert_eq!(result.stats.missing_styles, 2);
        assert_eq!(result.chapters[1].char_length, 1);
    }

    #[test]
    fn test_chapter_at_offset() {
        let entries = table(&[
            ("OEBPS/a.xhtml", &xhtml("<p>abc</p>")),
            ("OEBPS/b.xhtml", &xhtml("<p>de</p>")),
        ]);
        let pkg = package(&[("a", "a.xhtml"), ("b", "b.xhtml")], &[("a", true), ("b", true)]);
        let result = assemble(&entries, &pkg, &mut MemorySink::default());

        assert_eq!(result.chapter_at_offset(0).unwrap().index, 0);
        assert_eq!(result.chapter_at_offset(2).unwrap().index, 0);
        assert_eq!(result.chapter_at_offset(3).unwrap().index, 1);
        assert_eq!(result.chapter_at_offset(4).unwrap().index, 1);
        assert!(result.chapter_at_offset(5).is_none());
    }

    #[test]
    fn test_char_length_counts_scalar_values() {
        let entries = table(&[("OEBPS/a.xhtml", &xhtml("<p>caf\u{e9} &mdash; \u{1F600}</p>"))]);
        let pkg = package(&[("a", "a.xhtml")], &[("a", true)]);
        let result = assemble(&entries, &pkg, &mut MemorySink::default());
        assert_eq!(result.chapters[0].char_length, 8);
    }

    #[test]
    fn test_char_length_entities_and_hidden_content() {
        let body = "<script>var x = 1 < 2;</script><style>p{}</style><!-- note -->\
<p>&amp;&#x4E2D;&#25991;&bogus;</p>";
        let entries = table(&[("OEBPS/a.xhtml", &xhtml(body))]);
        let pkg = package(&[("a", "a.xhtml")], &[("a", true)]);
        let result = assemble(&entries, &pkg, &mut MemorySink::default());
        // `&`, `中`, `文` plus the seven characters of `&bogus;`
        assert_eq!(result.chapters[0].char_length, 10);
    }

    #[test]
    fn test_style_dedup_uses_exact_text() {
        let a = "<html><head><style>p { margin: 0 }</style></head><body><p>A</p></body></html>";
        let b = "<html><head><style>p { margin: 0 }</style><style>\np { margin: 0 }\n</style>\
<style>  </style></head><body><p>B</p></body></html>";
        let entries = table(&[("OEBPS/a.xhtml", a.as_bytes()), ("OEBPS/b.xhtml", b.as_bytes())]);
        let pkg = package(&[("a", "a.xhtml"), ("b", "b.xhtml")], &[("a", true), ("b", true)]);
        let result = assemble(&entries, &pkg, &mut MemorySink::default());
        assert_eq!(result.styles, "p { margin: 0 }\n\np { margin: 0 }\n");
    }
}
