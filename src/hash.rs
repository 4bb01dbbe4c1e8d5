//! ByteRange substitution and SHA-256 hashing over the signed ranges.

use sha2::{Digest, Sha256};

use crate::error::{PdfSignError, Result};
use crate::scanner;

/// `(a, b, c, d)`: `a=0`, `a+b == contentsGapStart`, `c ==
/// contentsGapEnd`, `c+d == totalLen`. The gap `[b, c)` covers the
/// `/Contents` hex string including its `<`/`>` delimiters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ByteRange {
  pub a: u64,
  pub b: u64,
  pub c: u64,
  pub d: u64,
}

impl ByteRange {
  pub fn new(a: u64, b: u64, c: u64, d: u64) -> Self {
    Self { a, b, c, d }
  }

  /// Validates the four invariants against a document of `total_len`
  /// bytes.
  pub fn validate(&self, total_len: u64) -> Result<()> {
    if self.a != 0 {
      return Err(PdfSignError::InvalidByteRange(format!(
        "a must be 0, got {}",
        self.a
      )));
    }
    if self.c + self.d != total_len {
      return Err(PdfSignError::InvalidByteRange(format!(
        "c+d ({}) does not equal document length ({})",
        self.c + self.d,
        total_len
      )));
    }
    if self.c < self.a + self.b {
      return Err(PdfSignError::InvalidByteRange(
        "ranges overlap: c < a+b".into(),
      ));
    }
    Ok(())
  }

  /// `[a b c d]`, the raw (unpadded) PDF array literal.
  pub fn to_array_string(&self) -> String {
    format!("[{} {} {} {}]", self.a, self.b, self.c, self.d)
  }

  fn first_range(&self) -> (usize, usize) {
    (self.a as usize, self.b as usize)
  }

  fn second_range(&self) -> (usize, usize) {
    (self.c as usize, self.d as usize)
  }
}

/// Computes `SHA256(buf[0:contentsGapStart] || buf[contentsGapEnd:totalLen])`.
/// The two ranges exclude the `<...hex...>` window so overwriting the
/// hex later does not change the digest.
pub fn compute_byte_range_hash(buf: &[u8], byte_range: &ByteRange) -> Result<[u8; 32]> {
  byte_range.validate(buf.len() as u64)?;
  let (a, b) = byte_range.first_range();
  let (c, d) = byte_range.second_range();
  let first = buf
    .get(a..a + b)
    .ok_or_else(|| PdfSignError::InvalidByteRange("first range out of bounds".into()))?;
  let second = buf
    .get(c..c + d)
    .ok_or_else(|| PdfSignError::InvalidByteRange("second range out of bounds".into()))?;

  let mut hasher = Sha256::new();
  hasher.update(first);
  hasher.update(second);
  Ok(hasher.finalize().into())
}

/// Writes `byte_range`'s `[a b c d]` literal into the ByteRange
/// placeholder at `placeholder_offset`, space-padded to exactly
/// `placeholder_len` bytes (the placeholder's own width, so no other
/// offset in the document shifts).
pub fn substitute_byte_range(
  output: &mut [u8],
  placeholder_offset: usize,
  placeholder_len: usize,
  byte_range: &ByteRange,
) -> Result<()> {
  let raw = byte_range.to_array_string();
  if raw.len() > placeholder_len {
    return Err(PdfSignError::InvalidByteRange(format!(
      "ByteRange literal ({} bytes) does not fit the {}-byte placeholder",
      raw.len(),
      placeholder_len
    )));
  }
  let padded = format!("{:<width$}", raw, width = placeholder_len);
  output[placeholder_offset..placeholder_offset + placeholder_len]
    .copy_from_slice(padded.as_bytes());
  Ok(())
}

/// Locates the `/ByteRange` placeholder near `near` and computes the
/// `ByteRange` that covers everything except the `/Contents` gap
/// `[contents_gap_start, contents_gap_end)`.
pub fn locate_byte_range_placeholder(
  buf: &[u8],
  placeholder: &[u8],
  near: usize,
  placeholder_size: usize,
) -> Result<usize> {
  scanner::find_marker(placeholder, buf, near, placeholder_size).ok_or(
    PdfSignError::ByteRangePlaceholderNotFound { near },
  )
}

pub fn byte_range_for_gap(total_len: u64, contents_gap_start: u64, contents_gap_end: u64) -> ByteRange {
  ByteRange {
    a: 0,
    b: contents_gap_start,
    c: contents_gap_end,
    d: total_len - contents_gap_end,
  }
}
