//! epub-ingest -- EPUB ingestion into reading-order chapters
//!
//! Takes an EPUB archive as a byte slice and produces a flat list of
//! chapters in reading order: body markup, visible character counts with
//! running offsets, a merged style sheet, and images rehomed through a
//! caller-supplied [`AssetSink`].
//!
//! # Pipeline
//!
//! 1. [`zip`] decodes the archive into an [`EntryTable`].
//! 2. [`package`] reads `META-INF/container.xml` and the package document.
//! 3. [`path`] resolves references and implements the lookup fallbacks.
//! 4. [`assemble`] walks the spine and builds the [`EpubParseResult`].
//! 5. [`sink`] is the storage boundary for extracted images.
//!
//! Only structural problems (no ZIP trailer, ZIP64, no container file, no
//! package document) are errors. Everything else degrades: broken entries
//! are skipped, missing images become placeholders, and the damage is
//! reported in [`ParseStats`].
//!
//! # Features
//!
//! - `async` -- `tokio`-based file reading helpers
//! - `cli` -- the `epub-ingest` inspection binary
//!
//! # Example
//!
//! ```no_run
//! use epub_ingest::{parse_epub_file, MemorySink};
//!
//! let mut sink = MemorySink::new("/assets/");
//! let book = parse_epub_file("book.epub", &mut sink)?;
//! for chapter in &book.chapters {
//!     println!("{} {} chars @ {}", chapter.href, chapter.char_length, chapter.char_offset);
//! }
//! # Ok::<(), epub_ingest::EpubError>(())
//! ```

#![warn(missing_docs)]
#![deny(clippy::large_enum_variant, clippy::large_stack_arrays, clippy::redundant_clone)]
#![warn(
    clippy::box_collection,
    clippy::needless_collect,
    clippy::map_clone,
    clippy::implicit_clone,
    clippy::inefficient_to_string
)]

pub mod assemble;
pub mod error;
pub mod ingest;
pub mod markup;
pub mod package;
pub mod path;
pub mod sink;
pub mod zip;

#[cfg(feature = "async")]
pub mod async_api;

// Re-export key types for convenience
pub use assemble::{
    assemble, assemble_with_options, AssembleOptions, EpubParseResult, ParseStats, ParsedChapter,
};
#[cfg(feature = "async")]
pub use async_api::{parse_epub_file_async, parse_epub_file_async_with_options};
pub use error::{EpubError, SinkError, ZipError, ZipErrorKind};
pub use ingest::{
    parse_epub, parse_epub_file, parse_epub_file_with_options, parse_epub_with_options,
    ParseOptions, ParseOptionsBuilder,
};
pub use package::{resolve_package, ManifestItem, Package, SpineItem};
pub use path::resolve;
pub use sink::{AssetSink, DirectorySink, MemorySink, StoredAsset};
pub use zip::{read_entries, read_entries_with_limits, EntryTable, ZipLimits};
