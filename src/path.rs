//! Reference resolution against archive-internal paths
//!
//! Chapter markup refers to stylesheets and images relative to the chapter's
//! own location. These helpers turn such references into entry-table keys and
//! implement the fallback lookup chain used for every resource fetch, since
//! real archives are inconsistent about percent-encoding and `./` prefixes.

use percent_encoding::percent_decode_str;

use crate::zip::EntryTable;

/// Check whether a reference points outside the archive.
///
/// True for inline `data:` URIs and for anything carrying a URL scheme
/// (`https://…`, `mailto:…`). Single-letter schemes are treated as Windows
/// drive letters and therefore as archive paths.
pub fn is_external(reference: &str) -> bool {
    let reference = reference.trim();
    if reference
        .get(..5)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("data:"))
    {
        return true;
    }
    if reference.contains("://") {
        return true;
    }
    match reference.split_once(':') {
        Some((scheme, _)) => {
            scheme.len() > 1
                && scheme
                    .chars()
                    .next()
                    .is_some_and(|c| c.is_ascii_alphabetic())
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}

/// Resolve `reference` against the directory of `base_path`.
///
/// External references are returned unchanged. Fragment and query suffixes
/// are dropped, `.` and `..` segments collapse, and a leading `/` anchors the
/// reference at the archive root. The result never starts with `/`.
pub fn resolve(reference: &str, base_path: &str) -> String {
    let reference = reference.trim();
    if is_external(reference) {
        return reference.to_string();
    }

    let reference = strip_suffixes(reference);
    if reference.is_empty() {
        return normalize_path(base_path);
    }
    if reference.starts_with('/') {
        return normalize_path(reference.trim_start_matches('/'));
    }

    let base_dir = parent_dir(base_path);
    if base_dir.is_empty() {
        normalize_path(reference)
    } else {
        normalize_path(&format!("{}/{}", base_dir, reference))
    }
}

/// Directory portion of an archive path (`""` for root-level files).
pub fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

/// Collapse `.`/`..`/empty segments of a `/`-separated path.
pub fn normalize_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            _ => parts.push(part),
        }
    }
    parts.join("/")
}

/// Candidate entry-table keys for a reference, in lookup order.
///
/// The resolved path, the reference as written, the reference without a
/// leading `./`, and the percent-decoded resolved path. Duplicates are
/// removed while keeping the first position.
pub fn lookup_candidates(resolved: &str, original: &str) -> Vec<String> {
    let original = strip_suffixes(original.trim());
    let decoded = percent_decode_str(resolved).decode_utf8_lossy();

    let mut candidates: Vec<String> = Vec::with_capacity(4);
    for candidate in [
        resolved,
        original,
        original.strip_prefix("./").unwrap_or(original),
        &*decoded,
    ] {
        if !candidate.is_empty() && !candidates.iter().any(|c| c == candidate) {
            candidates.push(candidate.to_string());
        }
    }
    candidates
}

/// Fetch a resource through the lookup chain.
///
/// Returns the key that matched together with the bytes, or `None` when the
/// resource is unavailable.
pub fn find_entry<'a>(
    entries: &'a EntryTable,
    resolved: &str,
    original: &str,
) -> Option<(String, &'a [u8])> {
    lookup_candidates(resolved, original)
        .into_iter()
        .find_map(|key| entries.get(&key).map(|bytes| (key, bytes)))
}

/// Derive a storage-safe asset name from a resolved archive path.
///
/// ASCII alphanumerics, `.`, `-` and `_` are kept; every other run of
/// characters (including `/`) collapses to a single `_`.
pub fn sanitize_asset_name(path: &str) -> String {
    let decoded = percent_decode_str(path).decode_utf8_lossy();
    let mut out = String::with_capacity(decoded.len());
    let mut pending_sep = false;
    for ch in decoded.chars() {
        if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_') {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(ch);
        } else {
            pending_sep = true;
        }
    }
    let out = out.trim_matches(|c: char| c == '.' || c == '_');
    if out.is_empty() {
        "asset".to_string()
    } else {
        out.to_string()
    }
}

fn strip_suffixes(reference: &str) -> &str {
    let end = reference.find(['#', '?']).unwrap_or(reference.len());
    &reference[..end]
}
