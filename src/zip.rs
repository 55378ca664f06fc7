//! In-memory ZIP reader for EPUB archives
//!
//! Decodes a fully buffered archive into an [`EntryTable`] mapping each
//! internal path to its decompressed bytes. The end-of-central-directory
//! record is located by scanning backward from the tail, the central
//! directory is walked sequentially, and each entry's payload is located via
//! its own local file header. Supports stored and DEFLATE entries
//! (raw inflate via miniz_oxide).
//!
//! Broken entries are left out of the table instead of failing the archive;
//! only a missing EOCD record or ZIP64 structures are fatal.

use std::collections::BTreeMap;

/// Runtime-configurable ZIP safety limits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ZipLimits {
    /// Maximum compressed or uncompressed size of a single entry.
    pub max_entry_size: usize,
    /// Whether a truncated or garbled central directory is fatal.
    pub strict: bool,
    /// Maximum bytes scanned from the archive tail while searching for EOCD.
    pub max_eocd_scan: usize,
}

impl ZipLimits {
    /// Create explicit ZIP limits.
    pub fn new(max_entry_size: usize) -> Self {
        Self {
            max_entry_size,
            strict: false,
            max_eocd_scan: MAX_EOCD_SCAN,
        }
    }

    /// Enable or disable strict ZIP parsing behavior.
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Set a cap for EOCD tail scan bytes.
    pub fn with_max_eocd_scan(mut self, max_eocd_scan: usize) -> Self {
        self.max_eocd_scan = max_eocd_scan.clamp(EOCD_MIN_SIZE, MAX_EOCD_SCAN);
        self
    }
}

impl Default for ZipLimits {
    fn default() -> Self {
        Self::new(usize::MAX)
    }
}

/// Local file header signature (little-endian)
const SIG_LOCAL_FILE_HEADER: u32 = 0x04034b50;

/// Central directory entry signature (little-endian)
const SIG_CD_ENTRY: u32 = 0x02014b50;

/// End of central directory signature (little-endian)
const SIG_EOCD: u32 = 0x06054b50;
/// ZIP64 end of central directory locator signature (little-endian)
const SIG_ZIP64_EOCD_LOCATOR: u32 = 0x07064b50;
/// Minimum EOCD record size in bytes
const EOCD_MIN_SIZE: usize = 22;
/// Maximum EOCD search window (EOCD + max comment length)
const MAX_EOCD_SCAN: usize = EOCD_MIN_SIZE + u16::MAX as usize;
/// Fixed part of a central directory record
const CD_FIXED_SIZE: usize = 46;
/// Fixed part of a local file header
const LOCAL_HEADER_FIXED_SIZE: usize = 30;

/// Compression methods
const METHOD_STORED: u16 = 0;
const METHOD_DEFLATED: u16 = 8;

/// General purpose flag: entry is encrypted
const FLAG_ENCRYPTED: u16 = 0x0001;

pub use crate::error::ZipError;

#[derive(Clone, Copy, Debug)]
struct EocdInfo {
    cd_offset: usize,
    num_entries: u16,
}

/// Central directory entry metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CdEntry {
    /// General purpose bit flags
    pub flags: u16,
    /// Compression method (0=stored, 8=deflated)
    pub method: u16,
    /// Compressed size in bytes
    pub compressed_size: u32,
    /// Uncompressed size in bytes
    pub uncompressed_size: u32,
    /// Offset to local file header
    pub local_header_offset: u32,
    /// CRC32 checksum
    pub crc32: u32,
    /// Entry path inside the archive
    pub filename: String,
}

/// Decompressed archive contents keyed by internal path.
///
/// Built once by [`read_entries`] and read-only afterwards. A missing key
/// means "resource unavailable": the entry may never have existed or may
/// have been dropped because it could not be decoded.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EntryTable {
    entries: BTreeMap<String, Vec<u8>>,
    skipped: usize,
}

impl EntryTable {
    /// Get decompressed bytes for an exact internal path.
    pub fn get(&self, path: &str) -> Option<&[u8]> {
        self.entries.get(path).map(Vec::as_slice)
    }

    /// Check whether an exact internal path is present.
    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// Fetch a resource through the reference lookup chain.
    ///
    /// See [`crate::path::find_entry`].
    pub fn find(&self, resolved: &str, original: &str) -> Option<&[u8]> {
        crate::path::find_entry(self, resolved, original).map(|(_, bytes)| bytes)
    }

    /// Number of decoded entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no entry could be decoded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of file entries that were declared but left out.
    pub fn skipped_entries(&self) -> usize {
        self.skipped
    }

    /// Iterate over entry paths in lexical order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Iterate over `(path, bytes)` pairs in lexical order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.entries
            .iter()
            .map(|(path, bytes)| (path.as_str(), bytes.as_slice()))
    }
}

impl FromIterator<(String, Vec<u8>)> for EntryTable {
    fn from_iter<I: IntoIterator<Item = (String, Vec<u8>)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
            skipped: 0,
        }
    }
}

/// Decode a whole archive with default limits.
pub fn read_entries(data: &[u8]) -> Result<EntryTable, ZipError> {
    read_entries_with_limits(data, None)
}

/// Decode a whole archive with explicit runtime limits.
pub fn read_entries_with_limits(
    data: &[u8],
    limits: Option<ZipLimits>,
) -> Result<EntryTable, ZipError> {
    let limits = limits.unwrap_or_default();
    let eocd = find_eocd(data, limits.max_eocd_scan)?;

    let mut table = EntryTable::default();
    let mut pos = eocd.cd_offset;

    for _ in 0..eocd.num_entries {
        let Some((entry, next)) = read_cd_entry(data, pos) else {
            if limits.strict {
                return Err(ZipError::InvalidFormat);
            }
            log::warn!(
                "[ZIP] Central directory ends early at offset {} ({} of {} entries read)",
                pos,
                table.entries.len() + table.skipped,
                eocd.num_entries
            );
            break;
        };
        pos = next;

        if entry.filename.ends_with('/') {
            continue;
        }

        match extract_entry(data, &entry, &limits) {
            Ok(bytes) => {
                table.entries.insert(entry.filename, bytes);
            }
            Err(err) => {
                log::warn!("[ZIP] Skipping entry '{}': {}", entry.filename, err);
                table.skipped += 1;
            }
        }
    }

    log::debug!(
        "[ZIP] Decoded {} entries, skipped {} (central directory offset {})",
        table.entries.len(),
        table.skipped,
        eocd.cd_offset
    );

    Ok(table)
}

/// Find EOCD and extract central directory info
fn find_eocd(data: &[u8], max_eocd_scan: usize) -> Result<EocdInfo, ZipError> {
    if data.len() < EOCD_MIN_SIZE {
        return Err(ZipError::InvalidFormat);
    }

    // Scan last (EOCD + max comment) bytes for EOCD signature.
    let scan_range = data.len().min(max_eocd_scan.max(EOCD_MIN_SIZE));
    let scan_base = data.len() - scan_range;
    let mut fallback = None;

    for i in (scan_base..=data.len() - EOCD_MIN_SIZE).rev() {
        if read_u32_le(data, i) != Some(SIG_EOCD) {
            continue;
        }
        let comment_len = read_u16_le(data, i + 20).unwrap_or(0) as usize;
        if i + EOCD_MIN_SIZE + comment_len == data.len() {
            return parse_eocd(data, i);
        }
        // Signature bytes inside a comment, or trailing junk after the
        // record: remember the last record seen and keep looking.
        if fallback.is_none() {
            fallback = Some(i);
        }
    }

    match fallback {
        Some(i) => {
            log::warn!("[ZIP] EOCD comment length does not match archive tail");
            parse_eocd(data, i)
        }
        None => Err(ZipError::InvalidFormat),
    }
}

fn parse_eocd(data: &[u8], eocd_pos: usize) -> Result<EocdInfo, ZipError> {
    let num_entries = read_u16_le(data, eocd_pos + 10).ok_or(ZipError::InvalidFormat)?;
    let cd_size = read_u32_le(data, eocd_pos + 12).ok_or(ZipError::InvalidFormat)?;
    let cd_offset = read_u32_le(data, eocd_pos + 16).ok_or(ZipError::InvalidFormat)?;

    let uses_zip64_sentinel =
        num_entries == u16::MAX || cd_size == u32::MAX || cd_offset == u32::MAX;
    let uses_zip64_locator = eocd_pos >= 20
        && read_u32_le(data, eocd_pos - 20) == Some(SIG_ZIP64_EOCD_LOCATOR);
    if uses_zip64_sentinel || uses_zip64_locator {
        return Err(ZipError::UnsupportedZip64);
    }

    let cd_offset = cd_offset as usize;
    if cd_offset > eocd_pos {
        return Err(ZipError::InvalidFormat);
    }

    Ok(EocdInfo {
        cd_offset,
        num_entries,
    })
}

/// Read the central directory record at `pos`, returning it together with
/// the offset of the next record.
fn read_cd_entry(data: &[u8], pos: usize) -> Option<(CdEntry, usize)> {
    if read_u32_le(data, pos)? != SIG_CD_ENTRY {
        return None;
    }
    let fixed = data.get(pos..pos.checked_add(CD_FIXED_SIZE)?)?;

    let name_len = u16::from_le_bytes([fixed[28], fixed[29]]) as usize;
    let extra_len = u16::from_le_bytes([fixed[30], fixed[31]]) as usize;
    let comment_len = u16::from_le_bytes([fixed[32], fixed[33]]) as usize;

    let name_start = pos + CD_FIXED_SIZE;
    let name = data.get(name_start..name_start + name_len)?;
    let next = name_start + name_len + extra_len + comment_len;
    if next > data.len() {
        return None;
    }

    let entry = CdEntry {
        flags: u16::from_le_bytes([fixed[8], fixed[9]]),
        method: u16::from_le_bytes([fixed[10], fixed[11]]),
        crc32: u32::from_le_bytes([fixed[16], fixed[17], fixed[18], fixed[19]]),
        compressed_size: u32::from_le_bytes([fixed[20], fixed[21], fixed[22], fixed[23]]),
        uncompressed_size: u32::from_le_bytes([fixed[24], fixed[25], fixed[26], fixed[27]]),
        local_header_offset: u32::from_le_bytes([fixed[42], fixed[43], fixed[44], fixed[45]]),
        filename: String::from_utf8_lossy(name).into_owned(),
    };

    Some((entry, next))
}

/// Calculate the offset to the actual file data (past local header).
///
/// The local header's name/extra lengths may differ from the central copy,
/// so they are always read from the local header itself.
fn calc_data_offset(data: &[u8], entry: &CdEntry) -> Result<usize, ZipError> {
    let offset = entry.local_header_offset as usize;
    if read_u32_le(data, offset) != Some(SIG_LOCAL_FILE_HEADER) {
        return Err(ZipError::BadLocalHeader);
    }
    let name_len = read_u16_le(data, offset + 26).ok_or(ZipError::BadLocalHeader)? as usize;
    let extra_len = read_u16_le(data, offset + 28).ok_or(ZipError::BadLocalHeader)? as usize;
    Ok(offset + LOCAL_HEADER_FIXED_SIZE + name_len + extra_len)
}

/// Decompress one entry's payload.
fn extract_entry(data: &[u8], entry: &CdEntry, limits: &ZipLimits) -> Result<Vec<u8>, ZipError> {
    if entry.flags & FLAG_ENCRYPTED != 0 {
        return Err(ZipError::Encrypted);
    }
    if entry.method != METHOD_STORED && entry.method != METHOD_DEFLATED {
        return Err(ZipError::UnsupportedCompression(entry.method));
    }
    if entry.compressed_size as usize > limits.max_entry_size
        || entry.uncompressed_size as usize > limits.max_entry_size
    {
        return Err(ZipError::FileTooLarge);
    }

    let start = calc_data_offset(data, entry)?;
    let end = start
        .checked_add(entry.compressed_size as usize)
        .ok_or(ZipError::Truncated)?;
    let payload = data.get(start..end).ok_or(ZipError::Truncated)?;

    let bytes = match entry.method {
        METHOD_STORED => payload.to_vec(),
        _ => miniz_oxide::inflate::decompress_to_vec_with_limit(payload, limits.max_entry_size)
            .map_err(|_| ZipError::DecompressError)?,
    };

    if entry.crc32 != 0 && crc32fast::hash(&bytes) != entry.crc32 {
        return Err(ZipError::CrcMismatch);
    }

    Ok(bytes)
}

/// Read u16 from buffer at offset (little-endian)
fn read_u16_le(buf: &[u8], offset: usize) -> Option<u16> {
    let bytes = buf.get(offset..offset.checked_add(2)?)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

/// Read u32 from buffer at offset (little-endian)
fn read_u32_le(buf: &[u8], offset: usize) -> Option<u32> {
    let bytes = buf.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}
