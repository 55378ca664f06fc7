//! Asset sink boundary
//!
//! The assembler hands every extracted image to an [`AssetSink`] and splices
//! the returned URL into the chapter markup. Durable storage is the caller's
//! business; two small implementations are provided: [`MemorySink`] keeps
//! blobs in memory, [`DirectorySink`] writes them under a per-owner directory
//! and returns server-relative URLs.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::SinkError;

/// Durable storage for rehomed images.
///
/// The assembler calls `store` at most once per distinct resolved path per
/// parse, so implementations need not deduplicate within a parse.
pub trait AssetSink {
    /// Persist `bytes` and return the URL they can be retrieved from.
    fn store(&mut self, bytes: &[u8], suggested_name: &str) -> Result<String, SinkError>;
}

impl<S: AssetSink + ?Sized> AssetSink for &mut S {
    fn store(&mut self, bytes: &[u8], suggested_name: &str) -> Result<String, SinkError> {
        (**self).store(bytes, suggested_name)
    }
}

impl<S: AssetSink + ?Sized> AssetSink for Box<S> {
    fn store(&mut self, bytes: &[u8], suggested_name: &str) -> Result<String, SinkError> {
        (**self).store(bytes, suggested_name)
    }
}

/// An asset recorded by [`MemorySink`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredAsset {
    /// Name passed to `store`
    pub name: String,
    /// Stored bytes
    pub bytes: Vec<u8>,
    /// URL returned to the caller
    pub url: String,
}

/// Keeps every stored asset in memory.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MemorySink {
    url_prefix: String,
    stored: Vec<StoredAsset>,
}

impl MemorySink {
    /// Create a sink returning `{url_prefix}{name}` URLs.
    pub fn new(url_prefix: impl Into<String>) -> Self {
        Self {
            url_prefix: url_prefix.into(),
            stored: Vec::new(),
        }
    }

    /// All assets in the order they were stored.
    pub fn stored(&self) -> &[StoredAsset] {
        &self.stored
    }

    /// Number of `store` calls.
    pub fn len(&self) -> usize {
        self.stored.len()
    }

    /// Check if nothing was stored.
    pub fn is_empty(&self) -> bool {
        self.stored.is_empty()
    }

    /// Take ownership of the stored assets.
    pub fn into_assets(self) -> Vec<StoredAsset> {
        self.stored
    }
}

impl AssetSink for MemorySink {
    fn store(&mut self, bytes: &[u8], suggested_name: &str) -> Result<String, SinkError> {
        let url = format!("{}{}", self.url_prefix, suggested_name);
        self.stored.push(StoredAsset {
            name: suggested_name.to_string(),
            bytes: bytes.to_vec(),
            url: url.clone(),
        });
        Ok(url)
    }
}

/// Writes assets to `{root}/{owner}/{name}` and returns
/// `{url_prefix}/{owner}/{name}`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirectorySink {
    root: PathBuf,
    owner: String,
    url_prefix: String,
}

impl DirectorySink {
    /// Default URL prefix for stored assets.
    pub const DEFAULT_URL_PREFIX: &'static str = "/uploads";

    /// Create a sink rooted at `root` for one owner (user) directory.
    pub fn new(root: impl Into<PathBuf>, owner: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            owner: owner.into(),
            url_prefix: Self::DEFAULT_URL_PREFIX.to_string(),
        }
    }

    /// Set the URL prefix the returned URLs start with.
    pub fn with_url_prefix(mut self, url_prefix: impl Into<String>) -> Self {
        self.url_prefix = url_prefix.into();
        self
    }

    /// Directory assets are written to.
    pub fn directory(&self) -> PathBuf {
        self.root.join(&self.owner)
    }

    fn validate_component<'a>(&self, name: &'a str) -> Result<&'a str, SinkError> {
        let invalid = name.is_empty()
            || name.contains(['/', '\\', '\0'])
            || name == "."
            || name == ".."
            || Path::new(name).is_absolute();
        if invalid {
            return Err(SinkError::InvalidName(name.to_string()));
        }
        Ok(name)
    }
}

impl AssetSink for DirectorySink {
    fn store(&mut self, bytes: &[u8], suggested_name: &str) -> Result<String, SinkError> {
        let name = self.validate_component(suggested_name)?;
        let owner = self.validate_component(&self.owner)?;

        let dir = self.root.join(owner);
        fs::create_dir_all(&dir).map_err(|e| SinkError::Io(e.to_string()))?;
        fs::write(dir.join(name), bytes).map_err(|e| SinkError::Io(e.to_string()))?;

        log::debug!("[SINK] Wrote {} bytes to {}/{}", bytes.len(), owner, name);
        Ok(format!(
            "{}/{}/{}",
            self.url_prefix.trim_end_matches('/'),
            owner,
            name
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_records_calls() {
        let mut sink = MemorySink::new("https://cdn.example.com/books/");
        let url = sink.store(b"png", "OEBPS_img_a.png").unwrap();
        assert_eq!(url, "https://cdn.example.com/books/OEBPS_img_a.png");
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.stored()[0].bytes, b"png");
    }

    #[test]
    fn test_sink_through_mut_reference_and_box() {
        fn store_via<S: AssetSink>(mut sink: S, name: &str) -> String {
            sink.store(b"a", name).unwrap()
        }

        let mut inner = MemorySink::default();
        assert_eq!(store_via(&mut inner, "a.png"), "a.png");
        let mut boxed: Box<dyn AssetSink> = Box::new(MemorySink::default());
        assert_eq!(boxed.store(b"b", "b.png").unwrap(), "b.png");
        assert_eq!(inner.len(), 1);
    }

    #[test]
    fn test_directory_sink_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = DirectorySink::new(dir.path(), "user-42");
        let url = sink.store(b"\x89PNG", "OEBPS_img_a.png").unwrap();
        assert_eq!(url, "/uploads/user-42/OEBPS_img_a.png");
        let written = std::fs::read(dir.path().join("user-42").join("OEBPS_img_a.png")).unwrap();
        assert_eq!(written, b"\x89PNG");
    }

    #[test]
    fn test_directory_sink_custom_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = DirectorySink::new(dir.path(), "u").with_url_prefix("/static/");
        assert_eq!(sink.store(b"x", "x.png").unwrap(), "/static/u/x.png");
        assert_eq!(sink.directory(), dir.path().join("u"));
    }

    #[test]
    fn test_directory_sink_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = DirectorySink::new(dir.path(), "u");
        assert!(matches!(
            sink.store(b"x", "../escape.png"),
            Err(SinkError::InvalidName(_))
        ));
        assert!(matches!(sink.store(b"x", ".."), Err(SinkError::InvalidName(_))));
        let mut sink = DirectorySink::new(dir.path(), "../other");
        assert!(matches!(sink.store(b"x", "a.png"), Err(SinkError::InvalidName(_))));
    }
}
