//! Orchestration: the four public entry points, composing the scanner,
//! trailer resolver, incremental-update builder, hasher, CMS builder
//! and TSA client into the documented state machine:
//!
//! ```text
//! NEW -> PARSED -> UPDATED -> HASHED -> SIGNED [-> TIMESTAMPED] -> EMBEDDED -> WRITTEN
//! ```
//!
//! Every transition either advances or fails terminally. There are no
//! retries anywhere in this module.

use std::path::Path;

use chrono::Utc;

use crate::cms;
use crate::config::{SignatureMetadata, PLACEHOLDER_SIZE};
use crate::error::{PdfSignError, Result};
use crate::hash::{self, ByteRange};
use crate::identity::SigningIdentity;
use crate::incremental;
use crate::scanner;
use crate::trailer;

/// Output of [`prepare_for_external_signing`]: a PDF with the
/// placeholders already in place and the hash an external signer
/// (e.g. an HSM or a remote KMS) must produce a CMS signature over.
#[derive(Debug, Clone)]
pub struct PreparedSigning {
  pub prepared_pdf: Vec<u8>,
  pub hash: [u8; 32],
  pub hash_algorithm: &'static str,
}

/// One scanned `/Type /Sig` signature, as reported by
/// [`verify_signatures`]. `trusted` is always `false`; chain
/// verification is out of scope for this engine.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SignatureInfo {
  pub signer_name: Option<String>,
  pub signed_at: Option<String>,
  pub valid: bool,
  pub trusted: bool,
  pub reason: Option<String>,
}

struct PreparedUpdate {
  pdf_with_update: Vec<u8>,
  byte_range: ByteRange,
  byte_range_placeholder_offset: usize,
  byte_range_placeholder_len: usize,
  contents_hex_offset: usize,
}

/// PARSED -> UPDATED -> HASHED. Appends the incremental update to
/// `pdf` and fills in the real `/ByteRange`, leaving only `/Contents`
/// as an all-zero placeholder.
fn prepare(pdf: &[u8], metadata: &SignatureMetadata, placeholder_size: usize) -> Result<PreparedUpdate> {
  let eof = scanner::find_eof(pdf)?;
  let trailer_info = trailer::parse_trailer(pdf, eof.start)?;
  let catalog = trailer::read_catalog_info(pdf, trailer_info.root_obj_num)?;
  let page_obj_num = trailer::find_first_page_obj_num(pdf, trailer_info.root_obj_num)?;
  let page = trailer::read_page_info(pdf, page_obj_num)?;

  let update = incremental::build_incremental_update(
    pdf,
    &trailer_info,
    &page,
    &catalog,
    metadata,
    Utc::now(),
    placeholder_size,
  )?;

  let append_offset = pdf.len();
  let mut pdf_with_update = Vec::with_capacity(pdf.len() + update.bytes.len());
  pdf_with_update.extend_from_slice(pdf);
  pdf_with_update.extend_from_slice(&update.bytes);

  let gap = incremental::contents_gap_range(&update, placeholder_size);
  let byte_range = hash::byte_range_for_gap(
    pdf_with_update.len() as u64,
    (append_offset + gap.start) as u64,
    (append_offset + gap.end) as u64,
  );
  let byte_range_placeholder_offset = append_offset + update.byte_range_placeholder_byte_offset;
  hash::substitute_byte_range(
    &mut pdf_with_update,
    byte_range_placeholder_offset,
    update.byte_range_placeholder_byte_length,
    &byte_range,
  )?;

  Ok(PreparedUpdate {
    pdf_with_update,
    byte_range,
    byte_range_placeholder_offset,
    byte_range_placeholder_len: update.byte_range_placeholder_byte_length,
    contents_hex_offset: append_offset + update.contents_hex_byte_offset,
  })
}

/// Replaces the `/Contents` placeholder's hex digits in place with
/// `cms_der`, hex-encoded and zero-padded on the right. Fails if
/// `cms_der` does not fit `2 * placeholder_size` hex characters.
fn embed_cms(pdf: &mut [u8], contents_hex_offset: usize, placeholder_size: usize, cms_der: &[u8]) -> Result<()> {
  let max_hex_chars = 2 * placeholder_size;
  let hex = hex::encode(cms_der);
  if hex.len() > max_hex_chars {
    return Err(PdfSignError::CmsSignatureTooLarge {
      actual: hex.len(),
      max: max_hex_chars,
    });
  }
  let hex_start = contents_hex_offset + 1; // skip the leading '<'
  let padded = format!("{:0<width$}", hex, width = max_hex_chars);
  pdf[hex_start..hex_start + max_hex_chars].copy_from_slice(padded.as_bytes());
  Ok(())
}

/// `signPdf`: prepares the incremental update, builds the CMS signature
/// (optionally timestamped), and embeds it. A single call, end to end.
pub fn sign_pdf(
  pdf: &[u8],
  identity: &SigningIdentity,
  metadata: &SignatureMetadata,
  tsa_url: Option<&str>,
) -> Result<Vec<u8>> {
  log::debug!("sign_pdf: {} input bytes, tsa_url present: {}", pdf.len(), tsa_url.is_some());
  let mut prepared = prepare(pdf, metadata, PLACEHOLDER_SIZE)?;
  let message_digest = hash::compute_byte_range_hash(&prepared.pdf_with_update, &prepared.byte_range)?;
  let cms_der = cms::build_signed_data(identity, &message_digest, tsa_url)?;
  embed_cms(
    &mut prepared.pdf_with_update,
    prepared.contents_hex_offset,
    PLACEHOLDER_SIZE,
    &cms_der,
  )?;
  log::trace!("sign_pdf: produced {} output bytes", prepared.pdf_with_update.len());
  Ok(prepared.pdf_with_update)
}

/// `prepareForExternalSigning`: PARSED -> UPDATED -> HASHED, then hands
/// the prepared bytes and hash back to the caller, who is expected to
/// produce a CMS signature out of band and call
/// [`complete_external_signing`].
pub fn prepare_for_external_signing(pdf: &[u8], metadata: &SignatureMetadata) -> Result<PreparedSigning> {
  let prepared = prepare(pdf, metadata, PLACEHOLDER_SIZE)?;
  let hash = hash::compute_byte_range_hash(&prepared.pdf_with_update, &prepared.byte_range)?;
  // byte_range_placeholder_offset/len are already baked into
  // prepared_pdf's /ByteRange; nothing further to track once this
  // function returns, by design (§6's state machine has no
  // resume-from-partial-state requirement).
  let _ = (
    prepared.byte_range_placeholder_offset,
    prepared.byte_range_placeholder_len,
  );
  Ok(PreparedSigning {
    prepared_pdf: prepared.pdf_with_update,
    hash,
    hash_algorithm: "SHA-256",
  })
}

/// `completeExternalSigning`: EMBEDDED -> WRITTEN. Locates the
/// remaining all-zero `/Contents` placeholder by its exact width and
/// splices in `cms_der`, hex-encoded. Not idempotent: calling this
/// twice on an already-completed document finds no all-zero run left
/// to fill and fails with `ContentsPlaceholderNotFound`.
pub fn complete_external_signing(prepared_pdf: &[u8], cms_der: &[u8]) -> Result<Vec<u8>> {
  let placeholder = vec![b'0'; 2 * PLACEHOLDER_SIZE];
  let offset = scanner::find_marker_wide(&placeholder, prepared_pdf)
    .ok_or(PdfSignError::ContentsPlaceholderNotFound)?;
  log::debug!("complete_external_signing: placeholder found at offset {offset}, cms_der is {} bytes", cms_der.len());

  let mut output = prepared_pdf.to_vec();
  embed_cms(&mut output, offset - 1, PLACEHOLDER_SIZE, cms_der)?;
  Ok(output)
}

/// Room for the dictionary keys around `/Contents` (`/Filter`,
/// `/SubFilter`, `/ByteRange`, `/Reason`, `/Location`, `/ContactInfo`,
/// `/M`) on top of the hex gap itself. The gap's own width is derived
/// from `PLACEHOLDER_SIZE`, the same source of truth
/// `incremental::contents_gap_range` uses, not a separate constant.
const SIG_DICT_SLOP: usize = 4096;

fn sig_dict_window_len() -> usize {
  2 * PLACEHOLDER_SIZE + SIG_DICT_SLOP
}

/// `verifySignatures`: scans for every `/Type /Sig` occurrence, recovers
/// its `/ByteRange` and `/Contents`, recomputes the ByteRange hash and
/// compares it with the CMS `messageDigest` attribute.
pub fn verify_signatures(pdf: &[u8]) -> Result<Vec<SignatureInfo>> {
  let needle = b"/Type /Sig";
  let mut infos = Vec::new();
  let mut search_from = 0;
  let window_len = sig_dict_window_len();
  while let Some(rel) = pdf[search_from..].windows(needle.len()).position(|w| w == needle) {
    let marker_pos = search_from + rel;
    let window_end = (marker_pos + window_len).min(pdf.len());
    let window = &pdf[marker_pos..window_end];

    if let Some(info) = verify_one(pdf, window) {
      infos.push(info);
    }
    search_from = marker_pos + needle.len();
  }
  log::debug!("verify_signatures: found {} signature(s) in {} bytes", infos.len(), pdf.len());
  Ok(infos)
}

fn verify_one(pdf: &[u8], window: &[u8]) -> Option<SignatureInfo> {
  let byte_range = scanner::parse_byte_range(window)?;
  let byte_range = ByteRange::new(byte_range[0], byte_range[1], byte_range[2], byte_range[3]);

  let contents_start = window.windows(b"/Contents <".len()).position(|w| w == b"/Contents <")?;
  let hex_start = contents_start + b"/Contents <".len();
  let hex_end = window[hex_start..].iter().position(|&b| b == b'>')? + hex_start;
  let hex_str = std::str::from_utf8(&window[hex_start..hex_end]).ok()?;
  // Decodes the whole placeholder including its trailing zero padding;
  // the DER length in the leading SEQUENCE bounds the real content, and
  // the padding tail is harmless noise for the OID scans that follow.
  let cms_der = hex::decode(hex_str).ok()?;
  if cms_der.len() <= 100 {
    return None;
  }

  let valid = byte_range
    .validate(pdf.len() as u64)
    .ok()
    .and_then(|_| hash::compute_byte_range_hash(pdf, &byte_range).ok())
    .and_then(|recomputed| cms::find_message_digest(&cms_der).ok().map(|embedded| embedded == recomputed))
    .unwrap_or(false);

  let signer_name = x509_leaf_cn(&cms_der);
  let reason = parse_parenthesized_field(window, b"/Reason (");

  Some(SignatureInfo {
    signer_name,
    signed_at: parse_parenthesized_field(window, b"/M (D:"),
    valid,
    trusted: false,
    reason,
  })
}

/// Best-effort: the CMS `certificates [0] IMPLICIT CertificateSet` field
/// is a concatenation of whole `Certificate SEQUENCE`s, leaf first.
/// Finds that `[0]` wrapper, reads the first certificate out of it and
/// hands it to `cert::subject_common_name`.
fn x509_leaf_cn(cms_der: &[u8]) -> Option<String> {
  use crate::der;
  for i in 0..cms_der.len() {
    if cms_der[i] != 0xa0 {
      continue;
    }
    let Ok((_, certs_body, _)) = der::read_tlv(cms_der, i) else {
      continue;
    };
    let Ok((cert_tag, _, cert_end)) = der::read_tlv(cms_der, certs_body.start) else {
      continue;
    };
    if cert_tag != 0x30 {
      continue;
    }
    if let Some(cn) = crate::cert::subject_common_name(&cms_der[certs_body.start..cert_end]) {
      return Some(cn);
    }
  }
  None
}

/// Parses a PDF literal-string field like `/Reason (...)` or
/// `/M (D:...)`, honoring balanced parens and backslash escapes.
fn parse_parenthesized_field(window: &[u8], prefix: &[u8]) -> Option<String> {
  let start = window.windows(prefix.len()).position(|w| w == prefix)? + prefix.len();
  let mut depth = 1i32;
  let mut i = start;
  let mut escaped = false;
  while i < window.len() {
    let b = window[i];
    if escaped {
      escaped = false;
    } else if b == b'\\' {
      escaped = true;
    } else if b == b'(' {
      depth += 1;
    } else if b == b')' {
      depth -= 1;
      if depth == 0 {
        break;
      }
    }
    i += 1;
  }
  if depth != 0 {
    return None;
  }
  let raw = std::str::from_utf8(&window[start..i]).ok()?;
  Some(incremental::unescape_pdf_string(raw))
}

/// Convenience wrapper over [`sign_pdf`] reading `pdf_path` from disk
/// and returning the signed bytes, matching the path-taking signature
/// of the engine this crate was built from.
pub fn sign_pdf_file(
  pdf_path: impl AsRef<Path>,
  identity: &SigningIdentity,
  metadata: &SignatureMetadata,
  tsa_url: Option<&str>,
) -> Result<Vec<u8>> {
  let pdf = std::fs::read(pdf_path).map_err(PdfSignError::Io)?;
  sign_pdf(&pdf, identity, metadata, tsa_url)
}

/// Convenience wrapper over [`prepare_for_external_signing`] reading
/// `pdf_path` from disk.
pub fn prepare_for_external_signing_file(
  pdf_path: impl AsRef<Path>,
  metadata: &SignatureMetadata,
) -> Result<PreparedSigning> {
  let pdf = std::fs::read(pdf_path).map_err(PdfSignError::Io)?;
  prepare_for_external_signing(&pdf, metadata)
}

/// Convenience wrapper over [`verify_signatures`] reading `pdf_path`
/// from disk.
pub fn verify_signatures_file(pdf_path: impl AsRef<Path>) -> Result<Vec<SignatureInfo>> {
  let pdf = std::fs::read(pdf_path).map_err(PdfSignError::Io)?;
  verify_signatures(&pdf)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn embed_cms_rejects_oversized_signature() {
    let mut pdf = vec![b'<'];
    pdf.extend(std::iter::repeat(b'0').take(8));
    pdf.push(b'>');
    let err = embed_cms(&mut pdf, 0, 2, &[0xAA; 10]);
    assert!(matches!(err, Err(PdfSignError::CmsSignatureTooLarge { .. })));
  }

  #[test]
  fn embed_cms_pads_hex_on_the_right() {
    let mut pdf = vec![b'<'];
    pdf.extend(std::iter::repeat(b'0').take(8));
    pdf.push(b'>');
    embed_cms(&mut pdf, 0, 4, &[0xAB, 0xCD]).unwrap();
    assert_eq!(&pdf[1..9], b"abcd0000");
  }

  #[test]
  fn parse_parenthesized_field_handles_nested_parens_and_escapes() {
    let window = b"/Reason (I approve \\(really\\))\n".to_vec();
    let got = parse_parenthesized_field(&window, b"/Reason (").unwrap();
    assert_eq!(got, "I approve (really)");
  }

  #[test]
  fn parse_parenthesized_field_returns_none_when_absent() {
    let window = b"/Type /Sig\n".to_vec();
    assert!(parse_parenthesized_field(&window, b"/Reason (").is_none());
  }

  #[test]
  fn verify_signatures_finds_nothing_in_an_unsigned_pdf() {
    let pdf = b"%PDF-1.4\n%%EOF".to_vec();
    let infos = verify_signatures(&pdf).unwrap();
    assert!(infos.is_empty());
  }

  #[test]
  fn verify_signatures_file_surfaces_io_errors() {
    let err = verify_signatures_file("/nonexistent/path/does-not-exist.pdf");
    assert!(matches!(err, Err(PdfSignError::Io(_))));
  }
}
