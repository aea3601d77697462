//! Plaintext to ciphertext range resolution for packetised containers.
//!
//! Plaintext is split into fixed-size packets of `PACKET_SIZE` bytes. Each
//! packet is stored as `PACKET_SIZE + PACKET_OVERHEAD` bytes. The ciphertext
//! stream starts with a container header (`header_offset` bytes) and the
//! logical plaintext stream starts with an encoded metadata blob
//! (`metadata_offset` bytes) which consumes packet space like file data.
//!
//! A `RequestRange` is built from the caller's `Range` header, completed with
//! the framing offsets and file size, and then answers both questions: which
//! ciphertext bytes to fetch, and how to trim the decrypted packets.

use std::fmt;

use thiserror::Error;

/// Plaintext packet size (64 KiB).
pub const PACKET_SIZE: u64 = 64 * 1024;

/// Per-packet overhead on disk: packet header and authentication tag.
pub const PACKET_OVERHEAD: u64 = 32;

/// Size of one stored (encrypted) packet.
pub const STORED_PACKET_SIZE: u64 = PACKET_SIZE + PACKET_OVERHEAD;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RangeError {
    #[error("Invalid range")]
    Invalid,
    #[error("Multiple ranges are not supported")]
    MultipleRanges,
}

/// A single plaintext byte range requested against one file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestRange {
    /// First plaintext byte requested.
    pub start: u64,
    /// Number of plaintext bytes requested; 0 means "until the end of the file".
    pub length: u64,
    /// Size of the container header, including its length prefix.
    pub header_offset: u64,
    /// Size of the encoded metadata blob, including its length prefix.
    pub metadata_offset: u64,
    /// File size; acts as a hard cap once set.
    pub file_size: u64,
}

impl RequestRange {
    pub fn new(start: u64, length: u64) -> Self {
        Self {
            start,
            length,
            ..Default::default()
        }
    }

    /// Set the file size and clamp `start`/`length` to the file bounds.
    pub fn set_file_size(&mut self, size: u64) {
        self.file_size = size;
        if size == 0 {
            self.start = 0;
            self.length = 0;
            return;
        }
        if self.start > size {
            self.start = size;
            self.length = 0;
        } else if self.length == 0 || self.length > size - self.start {
            self.length = size - self.start;
        }
    }

    /// First packet to fetch (rounded down).
    pub fn start_package(&self) -> u64 {
        self.start.saturating_add(self.metadata_offset) / PACKET_SIZE
    }

    /// One past the last packet to fetch. Always at least `start_package() + 1`.
    pub fn end_package(&self) -> u64 {
        self.start
            .saturating_add(self.length)
            .saturating_add(self.metadata_offset)
            / PACKET_SIZE
            + 1
    }

    #[cfg(test)]
    pub fn length_packages(&self) -> u64 {
        self.end_package() - self.start_package()
    }

    /// First ciphertext byte to fetch.
    pub fn start_bytes(&self) -> u64 {
        self.start_package()
            .saturating_mul(STORED_PACKET_SIZE)
            .saturating_add(self.header_offset)
    }

    /// One past the last ciphertext byte to fetch.
    pub fn end_bytes(&self) -> u64 {
        self.end_package()
            .saturating_mul(STORED_PACKET_SIZE)
            .saturating_add(self.header_offset)
    }

    #[cfg(test)]
    pub fn length_bytes(&self) -> u64 {
        self.length_packages().saturating_mul(STORED_PACKET_SIZE)
    }

    /// Bytes to discard from the front of the decrypted packet stream.
    pub fn skip_beginning(&self) -> u64 {
        self.start.saturating_add(self.metadata_offset) % PACKET_SIZE
    }

    /// Whether the (clamped) start lies at or beyond the end of the file.
    pub fn is_unsatisfiable(&self) -> bool {
        self.start >= self.file_size
    }

    /// `Range` header value for the upstream ciphertext request.
    pub fn request_header_value(&self) -> String {
        format!("bytes={}-{}", self.start_bytes(), self.end_bytes() - 1)
    }

    /// `Content-Range` header value for the plaintext response.
    ///
    /// An empty range starting at 0 has no last byte, so it is rendered as
    /// `bytes */<size>`.
    pub fn response_header_value(&self) -> String {
        let total = if self.file_size > 0 {
            self.file_size.to_string()
        } else {
            "*".to_string()
        };
        match self.start.saturating_add(self.length).checked_sub(1) {
            Some(last) => format!("bytes {}-{}/{}", self.start, last, total),
            None => format!("bytes */{}", total),
        }
    }

    /// Trim a decrypted packet stream (starting at `start_package()`) down to
    /// exactly the requested plaintext bytes. Streaming responses apply
    /// `skip_beginning()` and `length` packet by packet instead.
    #[cfg(test)]
    pub fn trim<'a>(&self, decrypted: &'a [u8]) -> &'a [u8] {
        let skip = (self.skip_beginning() as usize).min(decrypted.len());
        let end = skip.saturating_add(self.length as usize).min(decrypted.len());
        &decrypted[skip..end]
    }
}

impl fmt::Display for RequestRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RequestRange{{Start: {}, Length: {}, FileSize: {}, HeaderOffset: {}, MetadataOffset: {}}}",
            self.start, self.length, self.file_size, self.header_offset, self.metadata_offset
        )
    }
}

/// Parse a `Range` request header into `(start, length)`.
///
/// Returns `Ok(None)` when the header is empty, meaning the whole file.
/// An open-ended range (`bytes=100-`) yields a length of 0.
pub fn parse_range_header(value: &str) -> Result<Option<(u64, u64)>, RangeError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    let spec = value.strip_prefix("bytes=").ok_or(RangeError::Invalid)?;
    if spec.contains(',') {
        return Err(RangeError::MultipleRanges);
    }
    let spec = spec.trim();
    if spec.is_empty() {
        return Ok(None);
    }

    let (start, end) = spec.split_once('-').ok_or(RangeError::Invalid)?;
    let start: u64 = start.trim().parse().map_err(|_| RangeError::Invalid)?;
    let end = end.trim();
    if end.is_empty() {
        return Ok(Some((start, 0)));
    }
    let end: u64 = end.parse().map_err(|_| RangeError::Invalid)?;
    if start > end {
        return Err(RangeError::Invalid);
    }
    Ok(Some((start, end - start + 1)))
}
