//! Unified error types for epub-ingest
//!
//! Provides a top-level `EpubError` for fatal pipeline failures, the ZIP kind
//! enum used by the container reader, and `SinkError` for the asset sink
//! boundary. `From` impls let `?` work across module boundaries.

use core::fmt;

/// Top-level error type for a parse invocation.
///
/// Every variant is fatal: recoverable problems (missing images, broken
/// entries, dangling spine references) are logged and counted instead.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum EpubError {
    /// ZIP archive error
    Zip(ZipError),
    /// `META-INF/container.xml` is not present in the archive
    MissingContainer,
    /// The container file has no usable `full-path` attribute
    MissingPackagePath(String),
    /// The package document named by the container is not in the archive
    MissingPackageDocument {
        /// Path taken from the container's `full-path` attribute.
        path: String,
    },
    /// I/O error (description only, since `std::io::Error` is not `Clone`)
    Io(String),
}

impl fmt::Display for EpubError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EpubError::Zip(kind) => write!(f, "ZIP error: {}", kind),
            EpubError::MissingContainer => {
                write!(f, "Invalid EPUB: META-INF/container.xml not found")
            }
            EpubError::MissingPackagePath(msg) => {
                write!(f, "Invalid EPUB: no package path in container.xml ({})", msg)
            }
            EpubError::MissingPackageDocument { path } => {
                write!(f, "Invalid EPUB: package document '{}' not found", path)
            }
            EpubError::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

/// ZIP-specific error variants
///
/// Only `InvalidFormat` and `UnsupportedZip64` abort a parse; the others
/// describe why a single entry was left out of the entry table.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ZipErrorKind {
    /// Invalid ZIP format (no end-of-central-directory record, bad offsets)
    InvalidFormat,
    /// ZIP64 structures are present but unsupported
    UnsupportedZip64,
    /// Unsupported compression method
    UnsupportedCompression(u16),
    /// Entry is encrypted
    Encrypted,
    /// Local file header is missing or does not match
    BadLocalHeader,
    /// Entry payload runs past the end of the archive
    Truncated,
    /// Decompression failed
    DecompressError,
    /// CRC32 mismatch
    CrcMismatch,
    /// Entry exceeds maximum allowed size
    FileTooLarge,
}

/// Public ZIP error type alias used across the crate API.
pub type ZipError = ZipErrorKind;

impl fmt::Display for ZipErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ZipErrorKind::InvalidFormat => write!(f, "invalid ZIP format"),
            ZipErrorKind::UnsupportedZip64 => write!(f, "ZIP64 is not supported"),
            ZipErrorKind::UnsupportedCompression(method) => {
                write!(f, "unsupported compression method {}", method)
            }
            ZipErrorKind::Encrypted => write!(f, "encrypted entries are not supported"),
            ZipErrorKind::BadLocalHeader => write!(f, "bad local file header"),
            ZipErrorKind::Truncated => write!(f, "entry data truncated"),
            ZipErrorKind::DecompressError => write!(f, "decompression failed"),
            ZipErrorKind::CrcMismatch => write!(f, "CRC32 checksum mismatch"),
            ZipErrorKind::FileTooLarge => write!(f, "file too large"),
        }
    }
}

impl std::error::Error for EpubError {}

impl std::error::Error for ZipErrorKind {}

impl From<ZipError> for EpubError {
    fn from(err: ZipError) -> Self {
        EpubError::Zip(err)
    }
}

/// Failure reported by an [`AssetSink`](crate::sink::AssetSink).
///
/// Kept separate from `EpubError`: a sink failure never aborts a parse, it
/// turns the image into a placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SinkError {
    /// The suggested name cannot be stored safely
    InvalidName(String),
    /// Backend write failed
    Io(String),
    /// Backend-specific failure
    Backend(String),
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkError::InvalidName(name) => write!(f, "invalid asset name: {}", name),
            SinkError::Io(msg) => write!(f, "asset I/O error: {}", msg),
            SinkError::Backend(msg) => write!(f, "asset backend error: {}", msg),
        }
    }
}

impl std::error::Error for SinkError {}
