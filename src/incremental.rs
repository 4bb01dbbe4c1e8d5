//! Incremental-update builder.
//!
//! Emits an append-only byte stream containing the four new indirect
//! objects (signature value, widget/field, updated page, updated
//! catalog), a cross-reference subsection and a trailer. Tracks the
//! exact byte offsets of the `/ByteRange` and `/Contents` placeholders
//! as it writes them.

use std::ops::Range;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::bytes::Regex;

use crate::config::SignatureMetadata;
use crate::error::{PdfSignError, Result};
use crate::scanner::{self, find_indirect_refs};
use crate::trailer::{CatalogInfo, PageInfo, TrailerInfo};

/// `[0 0000000000 0000000000 0000000000]`. Length is derived from this
/// literal, never hardcoded, so the rest of the module can't drift out
/// of sync with it.
pub const BYTE_RANGE_PLACEHOLDER: &[u8] = b"[0 0000000000 0000000000 0000000000]";

static ACROFORM_INDIRECT: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"(?-u)/AcroForm\s+(\d+)\s+\d+\s+R").unwrap());
static FIELDS_ARRAY: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?-u)/Fields\s*\[([^\]]*)\]").unwrap());
static ANNOTS_ARRAY: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?-u)/Annots\s*\[([^\]]*)\]").unwrap());

/// Output of the incremental-update builder.
///
/// `contents_hex_byte_offset` and `byte_range_placeholder_byte_offset`
/// are offsets *within `bytes`*, i.e. relative to the start of this
/// update. Callers add their own `appendOffset` (the length of the
/// original document) to get absolute positions (§4.5).
#[derive(Debug, Clone)]
pub struct IncrementalUpdate {
  pub bytes: Vec<u8>,
  pub contents_hex_byte_offset: usize,
  pub byte_range_placeholder_byte_offset: usize,
  pub byte_range_placeholder_byte_length: usize,
}

/// Escapes `\`, `(`, `)`, `\n`, `\r`, `\t` for a PDF literal string.
pub fn escape_pdf_string(s: &str) -> String {
  let mut out = String::with_capacity(s.len());
  for c in s.chars() {
    match c {
      '\\' => out.push_str("\\\\"),
      '(' => out.push_str("\\("),
      ')' => out.push_str("\\)"),
      '\n' => out.push_str("\\n"),
      '\r' => out.push_str("\\r"),
      '\t' => out.push_str("\\t"),
      other => out.push(other),
    }
  }
  out
}

/// Reverses [`escape_pdf_string`], used by the verifier to recover the
/// original `/Reason` text.
pub fn unescape_pdf_string(s: &str) -> String {
  let mut out = String::with_capacity(s.len());
  let mut chars = s.chars();
  while let Some(c) = chars.next() {
    if c != '\\' {
      out.push(c);
      continue;
    }
    match chars.next() {
      Some('n') => out.push('\n'),
      Some('r') => out.push('\r'),
      Some('t') => out.push('\t'),
      Some('(') => out.push('('),
      Some(')') => out.push(')'),
      Some('\\') => out.push('\\'),
      Some(other) => out.push(other),
      None => {}
    }
  }
  out
}

/// Finds the smallest positive `K` such that `/T (SignatureK)` does
/// not occur anywhere in `pdf`. Required so a PDF that already
/// contains `/T (Signature1)` gets a non-colliding field name (P8).
fn unique_signature_field_name(pdf: &[u8]) -> String {
  let mut k: u32 = 1;
  loop {
    let candidate = format!("/T (Signature{k})");
    if !pdf
      .windows(candidate.len())
      .any(|w| w == candidate.as_bytes())
    {
      return format!("Signature{k}");
    }
    k += 1;
  }
}

/// Strips a top-level `/Annots [ ... ]` entry from a page dictionary
/// body, returning the cleaned body. The caller re-adds a fresh
/// `/Annots` entry carrying over the refs it extracted beforehand.
fn strip_annots(dict_content: &[u8]) -> Vec<u8> {
  match ANNOTS_ARRAY.find(dict_content) {
    Some(m) => {
      let mut out = Vec::with_capacity(dict_content.len());
      out.extend_from_slice(&dict_content[..m.start()]);
      out.extend_from_slice(&dict_content[m.end()..]);
      out
    }
    None => dict_content.to_vec(),
  }
}

/// Strips a pre-existing `/AcroForm` entry from a catalog dictionary
/// body, handling both the inline-dictionary and indirect-reference
/// forms, and returns `(cleaned_body, prior_field_refs)`. Field refs
/// found inside a removed inline `/AcroForm` (or inside the dictionary
/// an indirect `/AcroForm` reference points to) are carried over.
fn strip_acroform(dict_content: &[u8], original_pdf: &[u8]) -> Result<(Vec<u8>, Vec<String>)> {
  // Inline dictionary form: "/AcroForm << ... >>".
  if let Some(keyword_pos) = find_acroform_keyword(dict_content) {
    let after_keyword = keyword_pos + "/AcroForm".len();
    let next_non_ws = dict_content[after_keyword..]
      .iter()
      .position(|b| !b.is_ascii_whitespace())
      .map(|p| after_keyword + p);
    if let Some(p) = next_non_ws {
      if dict_content.get(p..p + 2) == Some(b"<<".as_slice()) {
        let balanced = scanner::scan_balanced_dict(dict_content, p)?;
        let inner = &dict_content[balanced.inner.clone()];
        let fields = FIELDS_ARRAY
          .captures(inner)
          .and_then(|c| c.get(1))
          .map(|m| find_indirect_refs(m.as_bytes()))
          .unwrap_or_default();
        let mut cleaned = Vec::with_capacity(dict_content.len());
        cleaned.extend_from_slice(&dict_content[..keyword_pos]);
        cleaned.extend_from_slice(&dict_content[balanced.whole.end..]);
        return Ok((cleaned, fields));
      }
    }
  }

  // Indirect-reference form: "/AcroForm N G R".
  if let Some(caps) = ACROFORM_INDIRECT.captures(dict_content) {
    let whole = caps.get(0).unwrap();
    let acroform_obj_num: u32 = std::str::from_utf8(caps.get(1).unwrap().as_bytes())
      .ok()
      .and_then(|s| s.parse().ok())
      .ok_or_else(|| PdfSignError::CannotReadRootCatalog("malformed /AcroForm ref".into()))?;
    let acroform_dict = scanner::find_object_dict(original_pdf, acroform_obj_num)
      .map_err(|e| PdfSignError::CannotReadRootCatalog(e.to_string()))?;
    let fields = FIELDS_ARRAY
      .captures(&original_pdf[acroform_dict])
      .and_then(|c| c.get(1))
      .map(|m| find_indirect_refs(m.as_bytes()))
      .unwrap_or_default();
    let mut cleaned = Vec::with_capacity(dict_content.len());
    cleaned.extend_from_slice(&dict_content[..whole.start()]);
    cleaned.extend_from_slice(&dict_content[whole.end()..]);
    return Ok((cleaned, fields));
  }

  Ok((dict_content.to_vec(), Vec::new()))
}

/// Finds `/AcroForm` as a whole token (not a prefix of some other
/// key) by requiring the character after it to be whitespace.
fn find_acroform_keyword(dict_content: &[u8]) -> Option<usize> {
  let needle = b"/AcroForm";
  dict_content
    .windows(needle.len() + 1)
    .position(|w| &w[..needle.len()] == needle && w[needle.len()].is_ascii_whitespace())
}

struct ObjectWrite {
  obj_num: u32,
  offset: usize,
}

/// Builds the incremental update appended after a document of length
/// `append_offset`. `signed_at` is captured once by the caller so the
/// PDF `/M` entry and the CMS `signingTime` attribute (built from the
/// same instant, separately) agree exactly.
#[allow(clippy::too_many_arguments)]
pub fn build_incremental_update(
  original_pdf: &[u8],
  trailer: &TrailerInfo,
  page: &PageInfo,
  catalog: &CatalogInfo,
  metadata: &SignatureMetadata,
  signed_at: DateTime<Utc>,
  placeholder_size: usize,
) -> Result<IncrementalUpdate> {
  let sig_obj_num = trailer.size;
  let field_obj_num = trailer.size + 1;
  let new_size = trailer.size + 2;
  let field_name = unique_signature_field_name(original_pdf);
  log::debug!(
    "building incremental update: sig obj {sig_obj_num}, field obj {field_obj_num} ({field_name}), \
     placeholder size {placeholder_size}"
  );

  let mut buf = Vec::new();
  let mut writes = Vec::new();

  // 1. Signature value object.
  writes.push(ObjectWrite {
    obj_num: sig_obj_num,
    offset: buf.len(),
  });
  buf.extend_from_slice(format!("{sig_obj_num} 0 obj\n<<\n").as_bytes());
  buf.extend_from_slice(b"/Type /Sig\n/Filter /Adobe.PPKLite\n/SubFilter /ETSI.CAdES.detached\n");
  buf.extend_from_slice(b"/ByteRange ");
  let byte_range_placeholder_byte_offset = buf.len();
  buf.extend_from_slice(BYTE_RANGE_PLACEHOLDER);
  buf.push(b'\n');
  buf.extend_from_slice(b"/Contents <");
  let contents_hex_byte_offset = buf.len() - 1;
  buf.extend(std::iter::repeat(b'0').take(2 * placeholder_size));
  buf.extend_from_slice(b">\n");
  buf.extend_from_slice(
    format!(
      "/Reason ({})\n/Location ({})\n/ContactInfo ({})\n",
      escape_pdf_string(&metadata.reason),
      escape_pdf_string(&metadata.location),
      escape_pdf_string(&metadata.contact_info),
    )
    .as_bytes(),
  );
  buf.extend_from_slice(format!("/M (D:{})\n", signed_at.format("%Y%m%d%H%M%S+00'00'")).as_bytes());
  buf.extend_from_slice(b">>\nendobj\n");

  // 2. Widget + SigField object.
  writes.push(ObjectWrite {
    obj_num: field_obj_num,
    offset: buf.len(),
  });
  buf.extend_from_slice(
    format!(
      "{field_obj_num} 0 obj\n<<\n/Type /Annot\n/Subtype /Widget\n/FT /Sig\n/T ({field_name})\n/V {sig_obj_num} 0 R\n/Rect [0 0 0 0]\n/F 132\n/P {} 0 R\n>>\nendobj\n",
      page.obj_num
    )
    .as_bytes(),
  );

  // 3. Updated page object: original body minus /Annots, plus a fresh
  // /Annots carrying over existing refs and the new field.
  writes.push(ObjectWrite {
    obj_num: page.obj_num,
    offset: buf.len(),
  });
  let page_obj_num = page.obj_num;
  buf.extend_from_slice(format!("{page_obj_num} 0 obj\n<<\n").as_bytes());
  buf.extend_from_slice(&strip_annots(&page.dict_content));
  buf.push(b'\n');
  buf.extend_from_slice(b"/Annots [ ");
  for r in &page.existing_annot_refs {
    buf.extend_from_slice(r.as_bytes());
    buf.push(b' ');
  }
  buf.extend_from_slice(format!("{field_obj_num} 0 R").as_bytes());
  buf.extend_from_slice(b" ]\n>>\nendobj\n");

  // 4. Updated catalog: original body minus /AcroForm, plus a fresh
  // /AcroForm carrying over existing fields and the new field.
  writes.push(ObjectWrite {
    obj_num: catalog.obj_num,
    offset: buf.len(),
  });
  let root_obj_num = catalog.obj_num;
  let (cleaned_catalog, prior_fields) = strip_acroform(&catalog.dict_content, original_pdf)?;
  buf.extend_from_slice(format!("{root_obj_num} 0 obj\n<<\n").as_bytes());
  buf.extend_from_slice(&cleaned_catalog);
  buf.push(b'\n');
  buf.extend_from_slice(b"/AcroForm << /Fields [ ");
  for f in &prior_fields {
    buf.extend_from_slice(f.as_bytes());
    buf.push(b' ');
  }
  buf.extend_from_slice(format!("{field_obj_num} 0 R").as_bytes());
  buf.extend_from_slice(b" ] /SigFlags 3 >>\n>>\nendobj\n");

  // Cross-reference subsection: sort ascending, group into contiguous
  // runs of object numbers.
  writes.sort_by_key(|w| w.obj_num);
  let xref_offset = buf.len();
  buf.extend_from_slice(b"xref\n");
  let mut i = 0;
  while i < writes.len() {
    let mut j = i + 1;
    while j < writes.len() && writes[j].obj_num == writes[j - 1].obj_num + 1 {
      j += 1;
    }
    let run = &writes[i..j];
    buf.extend_from_slice(format!("{} {}\n", run[0].obj_num, run.len()).as_bytes());
    for w in run {
      buf.extend_from_slice(format!("{:010} 00000 n \n", w.offset).as_bytes());
    }
    i = j;
  }

  buf.extend_from_slice(
    format!(
      "trailer\n<< /Size {new_size} /Root {root_obj_num} 0 R /Prev {} >>\n",
      trailer.prev_start_xref
    )
    .as_bytes(),
  );
  buf.extend_from_slice(format!("startxref\n{xref_offset}\n%%EOF\n").as_bytes());
  log::trace!(
    "incremental update is {} bytes, contents hex at {contents_hex_byte_offset}, xref at {xref_offset}",
    buf.len()
  );

  Ok(IncrementalUpdate {
    bytes: buf,
    contents_hex_byte_offset,
    byte_range_placeholder_byte_offset,
    byte_range_placeholder_byte_length: BYTE_RANGE_PLACEHOLDER.len(),
  })
}

/// The `<` + hex + `>` gap, including delimiters, as a byte range
/// *within `update.bytes`*.
pub fn contents_gap_range(update: &IncrementalUpdate, placeholder_size: usize) -> Range<usize> {
  let start = update.contents_hex_byte_offset;
  start..(start + 1 + 2 * placeholder_size + 1)
}
