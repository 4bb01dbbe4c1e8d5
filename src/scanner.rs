//! Byte-level PDF lexical scanning.
//!
//! Every offset here is a byte offset into the document buffer, never
//! a character index. See `DESIGN.md`'s note on ISO-Latin-1 scanning
//! vs. UTF-8 measurement.

use std::ops::Range;

use once_cell::sync::Lazy;
use regex::bytes::Regex;

use crate::config::EOF_SEARCH_WINDOW;
use crate::error::{PdfSignError, Result};

static INDIRECT_REF: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?-u)\d+\s+\d+\s+R").unwrap());

static BYTE_RANGE: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"(?-u)/ByteRange\s*\[\s*(\d+)\s+(\d+)\s+(\d+)\s+(\d+)\s*\]").unwrap());

/// Scans the last [`EOF_SEARCH_WINDOW`] bytes of `buf` backwards for
/// the literal `%%EOF` marker and returns its byte range.
pub fn find_eof(buf: &[u8]) -> Result<Range<usize>> {
  let window_start = buf.len().saturating_sub(EOF_SEARCH_WINDOW);
  let window = &buf[window_start..];
  window
    .windows(5)
    .rposition(|w| w == b"%%EOF")
    .map(|rel| (window_start + rel)..(window_start + rel + 5))
    .ok_or(PdfSignError::EofNotFound {
      window: EOF_SEARCH_WINDOW,
    })
}

/// Finds the *last* occurrence of the indirect-object header
/// `"<objNum> 0 obj"`, applying a word-boundary check so that a search
/// for object `2` does not match inside `12 0 obj`. Then walks forward
/// to the first `<<` and balances nested `<<`/`>>` pairs to find the
/// matching close, returning the byte range *between* (but excluding)
/// the outer delimiters.
///
/// Matching the last occurrence is required: incrementally updated
/// PDFs (including ones this engine itself produced) redefine objects,
/// and only the last definition is reachable via standard traversal.
pub fn find_object_dict(buf: &[u8], obj_num: u32) -> Result<Range<usize>> {
  let header = format!("{obj_num} 0 obj");
  let header_bytes = header.as_bytes();

  let mut search_end = buf.len();
  let header_start = loop {
    if search_end < header_bytes.len() {
      return Err(PdfSignError::InvalidPdf(format!(
        "object {obj_num} 0 obj not found"
      )));
    }
    let hay = &buf[..search_end];
    let pos = hay
      .windows(header_bytes.len())
      .rposition(|w| w == header_bytes)
      .ok_or_else(|| PdfSignError::InvalidPdf(format!("object {obj_num} 0 obj not found")))?;
    let preceding_is_digit = pos > 0 && buf[pos - 1].is_ascii_digit();
    if !preceding_is_digit {
      break pos;
    }
    search_end = pos;
  };

  let after_header = header_start + header_bytes.len();
  Ok(scan_balanced_dict(buf, after_header)?.inner)
}

/// The result of [`scan_balanced_dict`]: both the whole `<< ... >>`
/// span (delimiters included, so callers can splice it out) and the
/// inner content span (delimiters excluded).
#[derive(Debug, Clone)]
pub struct BalancedDict {
  pub whole: Range<usize>,
  pub inner: Range<usize>,
}

/// Finds the first `<<` at or after `search_from` and walks forward
/// with a nesting counter (incrementing on `<<`, decrementing on `>>`)
/// to find its matching close. Dictionary nesting cannot be balanced
/// with a regex, so this hand-written walker is required.
pub fn scan_balanced_dict(buf: &[u8], search_from: usize) -> Result<BalancedDict> {
  let open_rel = buf
    .get(search_from..)
    .ok_or_else(|| PdfSignError::InvalidPdf("scan_balanced_dict: search_from past end".into()))?
    .windows(2)
    .position(|w| w == b"<<")
    .ok_or_else(|| PdfSignError::InvalidPdf("no << found".into()))?;
  let outer_start = search_from + open_rel;
  let inner_start = outer_start + 2;

  let mut depth: i32 = 1;
  let mut i = inner_start;
  while i + 1 < buf.len() {
    if &buf[i..i + 2] == b"<<" {
      depth += 1;
      i += 2;
    } else if &buf[i..i + 2] == b">>" {
      depth -= 1;
      if depth == 0 {
        return Ok(BalancedDict {
          whole: outer_start..i + 2,
          inner: inner_start..i,
        });
      }
      i += 2;
    } else {
      i += 1;
    }
  }
  Err(PdfSignError::InvalidPdf("unbalanced << >>".into()))
}

/// Searches for `marker` within `[near - 100, near + placeholder_size*3)`,
/// clamped to the buffer bounds.
pub fn find_marker(marker: &[u8], buf: &[u8], near: usize, placeholder_size: usize) -> Option<usize> {
  let lo = near.saturating_sub(100);
  let hi = (near + placeholder_size.saturating_mul(3)).min(buf.len());
  if lo >= hi || marker.len() > hi - lo {
    return None;
  }
  buf[lo..hi]
    .windows(marker.len())
    .position(|w| w == marker)
    .map(|rel| lo + rel)
}

/// Searches the entire buffer for `marker`. Used only by
/// `complete_external_signing`, which has no other anchor to search
/// near.
pub fn find_marker_wide(marker: &[u8], buf: &[u8]) -> Option<usize> {
  if marker.len() > buf.len() {
    return None;
  }
  buf.windows(marker.len()).position(|w| w == marker)
}

/// Extracts every `N G R` indirect reference inside `haystack`
/// (typically the body of an array like `/Annots [ ... ]`).
pub fn find_indirect_refs(haystack: &[u8]) -> Vec<String> {
  INDIRECT_REF
    .find_iter(haystack)
    .map(|m| String::from_utf8_lossy(m.as_bytes()).into_owned())
    .collect()
}

/// Parses a `/ByteRange [a b c d]` array into its four integers.
pub fn parse_byte_range(haystack: &[u8]) -> Option<[u64; 4]> {
  let caps = BYTE_RANGE.captures(haystack)?;
  let parse = |i: usize| -> Option<u64> {
    std::str::from_utf8(caps.get(i)?.as_bytes()).ok()?.parse().ok()
  };
  Some([parse(1)?, parse(2)?, parse(3)?, parse(4)?])
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn finds_eof_in_tail_window() {
    let buf = b"whatever\n%%EOF".to_vec();
    let r = find_eof(&buf).unwrap();
    assert_eq!(&buf[r], b"%%EOF");
  }

  #[test]
  fn eof_not_found_fails() {
    let buf = b"no marker here".to_vec();
    assert!(find_eof(&buf).is_err());
  }

  #[test]
  fn eof_outside_window_is_not_found() {
    let mut buf = b"%%EOF".to_vec();
    buf.extend(std::iter::repeat(b' ').take(EOF_SEARCH_WINDOW + 10));
    assert!(find_eof(&buf).is_err());
  }

  #[test]
  fn object_dict_word_boundary_rejects_prefix_match() {
    let buf = b"12 0 obj\n<< /Foo 1 >>\nendobj\n".to_vec();
    // Searching for object 2 must not match inside "12 0 obj".
    assert!(find_object_dict(&buf, 2).is_err());
  }

  #[test]
  fn object_dict_picks_last_occurrence() {
    let buf = b"5 0 obj\n<< /V 1 >>\nendobj\n5 0 obj\n<< /V 2 >>\nendobj\n".to_vec();
    let r = find_object_dict(&buf, 5).unwrap();
    assert_eq!(String::from_utf8_lossy(&buf[r]).trim(), "/V 2");
  }

  #[test]
  fn object_dict_balances_nesting() {
    let buf = b"7 0 obj\n<< /A << /B 1 >> /C 2 >>\nendobj\n".to_vec();
    let r = find_object_dict(&buf, 7).unwrap();
    assert_eq!(
      String::from_utf8_lossy(&buf[r]).trim(),
      "/A << /B 1 >> /C 2"
    );
  }

  #[test]
  fn indirect_refs_extracted_in_order() {
    let refs = find_indirect_refs(b"[4 0 R 9 0 R]");
    assert_eq!(refs, vec!["4 0 R", "9 0 R"]);
  }

  #[test]
  fn byte_range_parses_four_integers() {
    let v = parse_byte_range(b"/ByteRange [0 100 200 50]").unwrap();
    assert_eq!(v, [0, 100, 200, 50]);
  }
}
