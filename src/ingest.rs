//! High-level ingestion entry points
//!
//! Runs the whole pipeline over an archive held in memory: container reader,
//! package resolver, chapter assembler.

use std::path::Path;

use crate::assemble::{assemble_with_options, AssembleOptions, EpubParseResult};
use crate::error::EpubError;
use crate::package::resolve_package;
use crate::sink::AssetSink;
use crate::zip::{read_entries_with_limits, ZipLimits};

/// Configuration for a parse invocation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParseOptions {
    /// Optional ZIP safety limits used while reading archive entries.
    ///
    /// When `None`, no explicit file-size caps are enforced by this crate.
    pub zip_limits: Option<ZipLimits>,
    /// Chapter assembly behavior.
    pub assemble: AssembleOptions,
}

/// Builder for [`ParseOptions`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParseOptionsBuilder {
    options: ParseOptions,
}

impl ParseOptionsBuilder {
    /// Create a new builder with no explicit limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set explicit ZIP limits.
    pub fn with_zip_limits(mut self, limits: ZipLimits) -> Self {
        self.options.zip_limits = Some(limits);
        self
    }

    /// Keep chapters that only contain images.
    pub fn keep_image_only_chapters(mut self) -> Self {
        self.options.assemble.keep_image_only_chapters = true;
        self
    }

    /// Leave `linear="no"` spine items out of the chapter list.
    pub fn skip_non_linear(mut self) -> Self {
        self.options.assemble.skip_non_linear = true;
        self
    }

    /// Prefix every suggested asset name.
    pub fn asset_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.options.assemble.asset_prefix = prefix.into();
        self
    }

    /// Finish building.
    pub fn build(self) -> ParseOptions {
        self.options
    }

    /// Parse an in-memory archive with the built options.
    pub fn parse<S: AssetSink + ?Sized>(
        self,
        bytes: &[u8],
        sink: &mut S,
    ) -> Result<EpubParseResult, EpubError> {
        parse_epub_with_options(bytes, sink, &self.options)
    }
}

/// Parse an in-memory archive into reading-order chapters.
pub fn parse_epub<S: AssetSink + ?Sized>(
    bytes: &[u8],
    sink: &mut S,
) -> Result<EpubParseResult, EpubError> {
    parse_epub_with_options(bytes, sink, &ParseOptions::default())
}

/// Parse an in-memory archive with explicit options.
pub fn parse_epub_with_options<S: AssetSink + ?Sized>(
    bytes: &[u8],
    sink: &mut S,
    options: &ParseOptions,
) -> Result<EpubParseResult, EpubError> {
    let entries = read_entries_with_limits(bytes, options.zip_limits)?;
    let package = resolve_package(&entries)?;
    Ok(assemble_with_options(
        &entries,
        &package,
        sink,
        &options.assemble,
    ))
}

/// Read an archive from disk and parse it.
pub fn parse_epub_file<P: AsRef<Path>, S: AssetSink + ?Sized>(
    path: P,
    sink: &mut S,
) -> Result<EpubParseResult, EpubError> {
    parse_epub_file_with_options(path, sink, &ParseOptions::default())
}

/// Read an archive from disk and parse it with explicit options.
pub fn parse_epub_file_with_options<P: AsRef<Path>, S: AssetSink + ?Sized>(
    path: P,
    sink: &mut S,
    options: &ParseOptions,
) -> Result<EpubParseResult, EpubError> {
    let bytes = std::fs::read(path).map_err(|e| EpubError::Io(e.to_string()))?;
    parse_epub_with_options(&bytes, sink, options)
}
