//! Optional async helpers for file-based ingestion.
//!
//! This module is available with the `async` feature. Only the file read is
//! asynchronous; the parse itself runs synchronously on the loaded bytes.

use std::path::Path;

use crate::assemble::EpubParseResult;
use crate::error::EpubError;
use crate::ingest::{parse_epub_with_options, ParseOptions};
use crate::sink::AssetSink;

/// Read an archive asynchronously and parse it.
pub async fn parse_epub_file_async<P: AsRef<Path>, S: AssetSink + ?Sized>(
    path: P,
    sink: &mut S,
) -> Result<EpubParseResult, EpubError> {
    parse_epub_file_async_with_options(path, sink, &ParseOptions::default()).await
}

/// Read an archive asynchronously and parse it with explicit options.
pub async fn parse_epub_file_async_with_options<P: AsRef<Path>, S: AssetSink + ?Sized>(
    path: P,
    sink: &mut S,
    options: &ParseOptions,
) -> Result<EpubParseResult, EpubError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| EpubError::Io(e.to_string()))?;
    parse_epub_with_options(&bytes, sink, options)
}
