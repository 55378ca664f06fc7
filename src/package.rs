//! Package resolution: container bootstrap, manifest and spine
//!
//! Reads `META-INF/container.xml` to find the package document, then scans
//! the package document with quick-xml for `<item>` and `<itemref>` elements.
//! The scan is deliberately lenient: attribute order, namespace prefixes and
//! unknown sibling elements do not matter, and a syntax error part-way
//! through keeps everything collected up to that point.

use std::borrow::Cow;

use quick_xml::escape::unescape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use crate::error::EpubError;
use crate::zip::EntryTable;

/// Fixed location of the bootstrap file naming the package document.
pub const CONTAINER_PATH: &str = "META-INF/container.xml";

/// A single item in the package manifest (id -> href mapping)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManifestItem {
    /// Resource identifier
    pub id: String,
    /// Path relative to the package document
    pub href: String,
    /// MIME type (empty when the attribute is missing)
    pub media_type: String,
}

/// A single reading-order position
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpineItem {
    /// Manifest item this spine entry references
    pub idref: String,
    /// Whether this item is part of the linear reading order
    pub linear: bool,
}

/// Resolved package: where the package document lives plus its manifest and
/// spine, both in document order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Package {
    /// Archive path of the package document (from `full-path`)
    pub package_path: String,
    /// Directory portion of `package_path` (`""` at archive root)
    pub package_dir: String,
    /// Declared resources
    pub manifest: Vec<ManifestItem>,
    /// Reading order
    pub spine: Vec<SpineItem>,
}

impl Package {
    /// Get manifest item by id
    pub fn manifest_item(&self, id: &str) -> Option<&ManifestItem> {
        self.manifest.iter().find(|item| item.id == id)
    }

    /// Archive path of a manifest href, resolved against the package directory.
    pub fn resolve_href(&self, href: &str) -> String {
        crate::path::resolve(href, &self.package_path)
    }

    /// Spine items that are part of the linear reading order.
    pub fn linear_spine(&self) -> impl Iterator<Item = &SpineItem> {
        self.spine.iter().filter(|item| item.linear)
    }
}

/// Locate and parse the package declared by the archive's container file.
pub fn resolve_package(entries: &EntryTable) -> Result<Package, EpubError> {
    let container = find_container(entries).ok_or(EpubError::MissingContainer)?;
    let package_path = parse_container_xml(container)?;

    let opf = entries
        .get(&package_path)
        .or_else(|| entries.get(package_path.trim_start_matches('/')))
        .ok_or_else(|| EpubError::MissingPackageDocument {
            path: package_path.clone(),
        })?;

    let (manifest, spine) = parse_package_document(opf);
    let package_path = package_path.trim_start_matches('/').to_string();
    let package_dir = package_path
        .rsplit_once('/')
        .map(|(dir, _)| dir.to_string())
        .unwrap_or_default();

    log::debug!(
        "[OPF] Package '{}': {} manifest items, {} spine items",
        package_path,
        manifest.len(),
        spine.len()
    );

    Ok(Package {
        package_path,
        package_dir,
        manifest,
        spine,
    })
}

fn find_container(entries: &EntryTable) -> Option<&[u8]> {
    entries.get(CONTAINER_PATH).or_else(|| {
        entries
            .iter()
            .find(|(path, _)| path.eq_ignore_ascii_case(CONTAINER_PATH))
            .map(|(_, bytes)| bytes)
    })
}

/// Parse container.xml to find the package document path
///
/// Returns the `full-path` attribute of the first `rootfile` element.
pub fn parse_container_xml(content: &[u8]) -> Result<String, EpubError> {
    let mut reader = Reader::from_reader(content);
    reader.config_mut().trim_text(true);
    reader.config_mut().check_end_names = false;

    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"rootfile" {
                    let full_path = attribute(&e, &reader, "full-path")
                        .map(|value| value.trim().to_string())
                        .unwrap_or_default();
                    if full_path.is_empty() {
                        return Err(EpubError::MissingPackagePath(
                            "rootfile has no full-path attribute".into(),
                        ));
                    }
                    return Ok(full_path);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(EpubError::MissingPackagePath(format!(
                    "XML parse error: {:?}",
                    e
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    Err(EpubError::MissingPackagePath(
        "no rootfile found in container.xml".into(),
    ))
}

/// Scan a package document for manifest items and spine itemrefs.
///
/// Items without `id`/`href` and itemrefs without `idref` are ignored.
pub fn parse_package_document(content: &[u8]) -> (Vec<ManifestItem>, Vec<SpineItem>) {
    let mut reader = Reader::from_reader(content);
    reader.config_mut().trim_text(true);
    reader.config_mut().check_end_names = false;

    let mut buf = Vec::new();
    let mut manifest = Vec::new();
    let mut spine = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"item" => {
                    if let Some(item) = parse_manifest_item(&e, &reader) {
                        manifest.push(item);
                    }
                }
                b"itemref" => {
                    if let Some(item) = parse_spine_item(&e, &reader) {
                        spine.push(item);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                log::warn!(
                    "[OPF] Stopping package scan at byte {}: {:?}",
                    reader.buffer_position(),
                    e
                );
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    (manifest, spine)
}

fn parse_manifest_item(e: &BytesStart<'_>, reader: &Reader<&[u8]>) -> Option<ManifestItem> {
    let mut id = None;
    let mut href = None;
    let mut media_type = String::new();

    for (key, value) in attributes(e, reader) {
        match key.as_str() {
            "id" => id = Some(value),
            "href" => href = Some(value),
            "media-type" => media_type = value,
            _ => {}
        }
    }

    Some(ManifestItem {
        id: id.filter(|id| !id.is_empty())?,
        href: href.filter(|href| !href.is_empty())?,
        media_type,
    })
}

fn parse_spine_item(e: &BytesStart<'_>, reader: &Reader<&[u8]>) -> Option<SpineItem> {
    let mut idref = None;
    let mut linear = true;

    for (key, value) in attributes(e, reader) {
        match key.as_str() {
            "idref" => idref = Some(value),
            "linear" => linear = value != "no",
            _ => {}
        }
    }

    Some(SpineItem {
        idref: idref.filter(|idref| !idref.is_empty())?,
        linear,
    })
}

/// Decode all well-formed attributes of an element as `(local name, value)`.
///
/// Malformed attributes are skipped rather than failing the element.
fn attributes(e: &BytesStart<'_>, reader: &Reader<&[u8]>) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for attr in e.attributes().with_checks(false).flatten() {
        let local = attr.key.local_name();
        let Ok(key) = reader.decoder().decode(local.as_ref()) else {
            continue;
        };
        let Ok(raw) = reader.decoder().decode(&attr.value) else {
            continue;
        };
        let value = match unescape(&raw) {
            Ok(Cow::Owned(value)) => value,
            _ => raw.to_string(),
        };
        out.push((key.to_string(), value));
    }
    out
}

fn attribute(e: &BytesStart<'_>, reader: &Reader<&[u8]>, name: &str) -> Option<String> {
    attributes(e, reader)
        .into_iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value)
}
