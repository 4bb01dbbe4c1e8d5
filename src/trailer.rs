//! Trailer and catalog resolution.
//!
//! Parses the last-defined trailer (or falls back to reading an
//! xref-stream dictionary directly) and walks `Root -> Pages ->
//! Kids[0]` to find the first page, preserving incremental-update
//! semantics throughout.

use once_cell::sync::Lazy;
use regex::bytes::Regex;

use crate::error::{PdfSignError, Result};
use crate::scanner::{self, find_indirect_refs};

static ROOT_REF: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?-u)/Root\s+(\d+)\s+\d+\s+R").unwrap());
static SIZE_VAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?-u)/Size\s+(\d+)").unwrap());
static PAGES_REF: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?-u)/Pages\s+(\d+)\s+\d+\s+R").unwrap());
static KIDS_ARRAY: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?-u)/Kids\s*\[([^\]]*)\]").unwrap());
static ANNOTS_ARRAY: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?-u)/Annots\s*\[([^\]]*)\]").unwrap());

/// How much of an xref-stream object to read when no classic
/// `trailer` keyword is found (§4.3 step 3).
const XREF_STREAM_SCAN_WINDOW: usize = 2000;

fn parse_u64(bytes: &[u8]) -> Result<u64> {
  std::str::from_utf8(bytes)
    .ok()
    .and_then(|s| s.parse::<u64>().ok())
    .ok_or_else(|| PdfSignError::CannotParseTrailer(format!("not an integer: {bytes:?}")))
}

/// `{ rootObjNum, size, prevStartXref }`. See crate docs for invariants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrailerInfo {
  pub root_obj_num: u32,
  pub size: u32,
  pub prev_start_xref: usize,
}

/// Parses the document's trailer. `eof_pos` is the byte offset of the
/// last `%%EOF` marker (from [`scanner::find_eof`]).
pub fn parse_trailer(buf: &[u8], eof_pos: usize) -> Result<TrailerInfo> {
  log::trace!("parse_trailer: scanning {} bytes up to eof at {eof_pos}", buf.len());
  let head = &buf[..eof_pos.min(buf.len())];

  let startxref_pos = head
    .windows(b"startxref".len())
    .rposition(|w| w == b"startxref")
    .ok_or_else(|| PdfSignError::CannotParseTrailer("startxref not found".into()))?;
  let after_keyword = startxref_pos + b"startxref".len();
  let digits_start = buf[after_keyword..]
    .iter()
    .position(|b| b.is_ascii_digit())
    .map(|p| after_keyword + p)
    .ok_or_else(|| PdfSignError::CannotParseTrailer("no integer after startxref".into()))?;
  let digits_end = buf[digits_start..]
    .iter()
    .position(|b| !b.is_ascii_digit())
    .map(|p| digits_start + p)
    .unwrap_or(buf.len());
  let prev_start_xref = parse_u64(&buf[digits_start..digits_end])? as usize;

  let before_startxref = &buf[..startxref_pos];
  if let Some(trailer_pos) = before_startxref
    .windows(b"trailer".len())
    .rposition(|w| w == b"trailer")
  {
    let dict_region = &buf[trailer_pos..startxref_pos];
    let root_obj_num = ROOT_REF
      .captures(dict_region)
      .and_then(|c| c.get(1))
      .ok_or_else(|| PdfSignError::CannotParseTrailer("/Root not found in trailer".into()))?;
    let size = SIZE_VAL
      .captures(dict_region)
      .and_then(|c| c.get(1))
      .ok_or_else(|| PdfSignError::CannotParseTrailer("/Size not found in trailer".into()))?;
    let info = TrailerInfo {
      root_obj_num: parse_u64(root_obj_num.as_bytes())? as u32,
      size: parse_u64(size.as_bytes())? as u32,
      prev_start_xref,
    };
    log::debug!("parsed classic trailer at offset {trailer_pos}: {info:?}");
    return Ok(info);
  }

  // No classic trailer keyword: fall back to reading the xref-stream
  // object's dictionary directly.
  log::warn!(
    "no classic trailer keyword before startxref at {startxref_pos}; \
     falling back to the xref-stream dictionary at {prev_start_xref}"
  );
  let window_end = (prev_start_xref + XREF_STREAM_SCAN_WINDOW).min(buf.len());
  if prev_start_xref >= buf.len() {
    return Err(PdfSignError::CannotParseTrailer(
      "prevStartXref points past end of document".into(),
    ));
  }
  let window = &buf[prev_start_xref..window_end];
  let root_obj_num = ROOT_REF
    .captures(window)
    .and_then(|c| c.get(1))
    .ok_or_else(|| PdfSignError::CannotParseTrailer("/Root not found in xref stream".into()))?;
  let size = SIZE_VAL
    .captures(window)
    .and_then(|c| c.get(1))
    .ok_or_else(|| PdfSignError::CannotParseTrailer("/Size not found in xref stream".into()))?;
  let info = TrailerInfo {
    root_obj_num: parse_u64(root_obj_num.as_bytes())? as u32,
    size: parse_u64(size.as_bytes())? as u32,
    prev_start_xref,
  };
  log::debug!("recovered trailer from xref stream: {info:?}");
  Ok(info)
}

/// Catalog dictionary content, kept verbatim (byte-for-byte) so
/// non-standard keys survive round-tripping.
#[derive(Debug, Clone)]
pub struct CatalogInfo {
  pub obj_num: u32,
  pub dict_content: Vec<u8>,
}

/// Page dictionary content plus any pre-existing `/Annots` references.
#[derive(Debug, Clone)]
pub struct PageInfo {
  pub obj_num: u32,
  pub dict_content: Vec<u8>,
  pub existing_annot_refs: Vec<String>,
}

/// Reads the catalog dictionary for `root_obj_num`.
pub fn read_catalog_info(buf: &[u8], root_obj_num: u32) -> Result<CatalogInfo> {
  let range = scanner::find_object_dict(buf, root_obj_num)
    .map_err(|e| PdfSignError::CannotReadRootCatalog(e.to_string()))?;
  Ok(CatalogInfo {
    obj_num: root_obj_num,
    dict_content: buf[range].to_vec(),
  })
}

/// Walks `Root -> /Pages -> /Kids[0]` to find the first page's object
/// number.
pub fn find_first_page_obj_num(buf: &[u8], root_obj_num: u32) -> Result<u32> {
  let catalog = read_catalog_info(buf, root_obj_num)
    .map_err(|e| PdfSignError::CannotFindFirstPage(e.to_string()))?;
  let pages_obj_num = PAGES_REF
    .captures(&catalog.dict_content)
    .and_then(|c| c.get(1))
    .ok_or_else(|| PdfSignError::CannotFindFirstPage("/Pages not found in catalog".into()))?;
  let pages_obj_num = parse_u64(pages_obj_num.as_bytes())
    .map_err(|e| PdfSignError::CannotFindFirstPage(e.to_string()))? as u32;

  let pages_dict = scanner::find_object_dict(buf, pages_obj_num)
    .map_err(|e| PdfSignError::CannotFindFirstPage(e.to_string()))?;
  let pages_dict = &buf[pages_dict];
  let kids = KIDS_ARRAY
    .captures(pages_dict)
    .and_then(|c| c.get(1))
    .ok_or_else(|| PdfSignError::CannotFindFirstPage("/Kids not found".into()))?;
  let refs = find_indirect_refs(kids.as_bytes());
  let first = refs
    .first()
    .ok_or_else(|| PdfSignError::CannotFindFirstPage("/Kids array is empty".into()))?;
  let first_obj_num: u32 = first
    .split_whitespace()
    .next()
    .and_then(|s| s.parse().ok())
    .ok_or_else(|| PdfSignError::CannotFindFirstPage(format!("malformed kid ref {first:?}")))?;
  Ok(first_obj_num)
}

/// Reads the first page's dictionary content and any pre-existing
/// `/Annots` references.
pub fn read_page_info(buf: &[u8], page_obj_num: u32) -> Result<PageInfo> {
  let range = scanner::find_object_dict(buf, page_obj_num)
    .map_err(|e| PdfSignError::CannotReadPageInfo(e.to_string()))?;
  let dict_content = buf[range].to_vec();
  let existing_annot_refs = ANNOTS_ARRAY
    .captures(&dict_content)
    .and_then(|c| c.get(1))
    .map(|m| find_indirect_refs(m.as_bytes()))
    .unwrap_or_default();
  Ok(PageInfo {
    obj_num: page_obj_num,
    dict_content,
    existing_annot_refs,
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  fn minimal_pdf() -> Vec<u8> {
    let mut pdf = Vec::new();
    pdf.extend_from_slice(b"%PDF-1.4\n");
    pdf.extend_from_slice(b"1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n");
    pdf.extend_from_slice(b"2 0 obj\n<< /Type /Pages /Kids [3 0 R] /Count 1 >>\nendobj\n");
    pdf.extend_from_slice(b"3 0 obj\n<< /Type /Page /Parent 2 0 R /Annots [9 0 R] >>\nendobj\n");
    let xref_pos = pdf.len();
    pdf.extend_from_slice(b"xref\n0 4\n0000000000 65535 f \n");
    pdf.extend_from_slice(b"trailer\n<< /Size 4 /Root 1 0 R >>\nstartxref\n");
    pdf.extend_from_slice(xref_pos.to_string().as_bytes());
    pdf.extend_from_slice(b"\n%%EOF");
    pdf
  }

  #[test]
  fn parses_classic_trailer() {
    let pdf = minimal_pdf();
    let eof = scanner::find_eof(&pdf).unwrap();
    let info = parse_trailer(&pdf, eof.start).unwrap();
    assert_eq!(info.root_obj_num, 1);
    assert_eq!(info.size, 4);
  }

  #[test]
  fn finds_first_page_through_catalog_and_pages() {
    let pdf = minimal_pdf();
    let page = find_first_page_obj_num(&pdf, 1).unwrap();
    assert_eq!(page, 3);
  }

  #[test]
  fn reads_page_info_with_existing_annots() {
    let pdf = minimal_pdf();
    let info = read_page_info(&pdf, 3).unwrap();
    assert_eq!(info.existing_annot_refs, vec!["9 0 R"]);
  }

  #[test]
  fn missing_startxref_is_an_error() {
    let pdf = b"%PDF-1.4\n%%EOF".to_vec();
    let eof = scanner::find_eof(&pdf).unwrap();
    assert!(parse_trailer(&pdf, eof.start).is_err());
  }
}
