//! A minimal, dependency-free ASN.1 DER encoder/decoder.
//!
//! This covers exactly the subset CMS/PKCS#7 and X.509 navigation need:
//! SEQUENCE, SET, INTEGER, OCTET STRING, NULL, OBJECT IDENTIFIER and
//! context-specific tags. It is deliberately hand-rolled rather than
//! built on a general ASN.1 crate. See `DESIGN.md` for why.

use crate::error::{PdfSignError, Result};

const TAG_INTEGER: u8 = 0x02;
const TAG_OCTET_STRING: u8 = 0x04;
const TAG_NULL: u8 = 0x05;
const TAG_OID: u8 = 0x06;
const TAG_UTF8_STRING: u8 = 0x0c;
const TAG_SEQUENCE: u8 = 0x30;
const TAG_SET: u8 = 0x31;

/// Encodes a DER length per X.690: short form under 128, else the
/// long form `0x80 | k` followed by `k` big-endian length bytes.
fn encode_length(len: usize) -> Vec<u8> {
  if len < 128 {
    return vec![len as u8];
  }
  let mut be = len.to_be_bytes().to_vec();
  while be.first() == Some(&0) {
    be.remove(0);
  }
  let mut out = Vec::with_capacity(1 + be.len());
  out.push(0x80 | be.len() as u8);
  out.extend_from_slice(&be);
  out
}

fn tlv(tag: u8, body: &[u8]) -> Vec<u8> {
  let mut out = Vec::with_capacity(1 + 5 + body.len());
  out.push(tag);
  out.extend_from_slice(&encode_length(body.len()));
  out.extend_from_slice(body);
  out
}

/// `SEQUENCE { body }`.
pub fn sequence(body: &[u8]) -> Vec<u8> {
  tlv(TAG_SEQUENCE, body)
}

/// `SET { body }`, given the member TLVs already concatenated in the
/// order the caller wants them to appear (DER canonical SET-OF sorting
/// is the caller's responsibility; CMS signed attributes are encoded
/// in a fixed, spec-mandated order, not sorted).
pub fn set(body: &[u8]) -> Vec<u8> {
  tlv(TAG_SET, body)
}

/// `OCTET STRING { body }`.
pub fn octet_string(body: &[u8]) -> Vec<u8> {
  tlv(TAG_OCTET_STRING, body)
}

/// `NULL`.
pub fn null() -> Vec<u8> {
  vec![TAG_NULL, 0x00]
}

/// `UTF8String { s }`, used for RDN attribute values in hand-built
/// test fixtures (real certificates may use `PrintableString` instead;
/// this crate never constructs Name TLVs outside of tests).
pub fn utf8_string(s: &str) -> Vec<u8> {
  tlv(TAG_UTF8_STRING, s.as_bytes())
}

/// `INTEGER`, given the big-endian two's-complement-free magnitude.
/// Prepends `0x00` when the magnitude's high bit is set so the value
/// decodes as non-negative, and strips redundant leading zero bytes.
pub fn integer(magnitude_big_endian: &[u8]) -> Vec<u8> {
  let mut mag = magnitude_big_endian;
  while mag.len() > 1 && mag[0] == 0 && mag[1] & 0x80 == 0 {
    mag = &mag[1..];
  }
  if mag.is_empty() {
    return tlv(TAG_INTEGER, &[0x00]);
  }
  if mag[0] & 0x80 != 0 {
    let mut body = Vec::with_capacity(mag.len() + 1);
    body.push(0x00);
    body.extend_from_slice(mag);
    tlv(TAG_INTEGER, &body)
  } else {
    tlv(TAG_INTEGER, mag)
  }
}

/// `INTEGER` from a small non-negative value, e.g. CMS/SignerInfo
/// `version` fields.
pub fn integer_u64(value: u64) -> Vec<u8> {
  let be = value.to_be_bytes();
  let first_nonzero = be.iter().position(|&b| b != 0).unwrap_or(be.len() - 1);
  integer(&be[first_nonzero..])
}

/// `OBJECT IDENTIFIER`, given an already-DER-encoded arc body (the
/// base-128 encoded subidentifiers). Use [`oid_from_str`] to build
/// that body from dotted notation.
pub fn oid(encoded_arcs: &[u8]) -> Vec<u8> {
  tlv(TAG_OID, encoded_arcs)
}

/// Builds a full `OBJECT IDENTIFIER` TLV from dotted notation, e.g.
/// `"1.2.840.113549.1.7.2"` (id-signedData).
pub fn oid_from_str(dotted: &str) -> Result<Vec<u8>> {
  let arcs: Vec<u64> = dotted
    .split('.')
    .map(|s| {
      s.parse::<u64>()
        .map_err(|_| PdfSignError::InvalidDer(format!("bad OID arc {s:?} in {dotted:?}")))
    })
    .collect::<Result<_>>()?;
  if arcs.len() < 2 {
    return Err(PdfSignError::InvalidDer(format!(
      "OID {dotted:?} needs at least two arcs"
    )));
  }
  let mut body = Vec::new();
  body.extend_from_slice(&base128(arcs[0] * 40 + arcs[1]));
  for &arc in &arcs[2..] {
    body.extend_from_slice(&base128(arc));
  }
  Ok(oid(&body))
}

fn base128(mut value: u64) -> Vec<u8> {
  let mut groups = vec![(value & 0x7f) as u8];
  value >>= 7;
  while value > 0 {
    groups.push((value & 0x7f) as u8 | 0x80);
    value >>= 7;
  }
  groups.reverse();
  groups
}

/// A context-specific tag, e.g. `[0] EXPLICIT`/`IMPLICIT`.
///
/// `constructed` must be `true` for EXPLICIT tagging (the body is
/// itself a full TLV) and for IMPLICIT tagging of constructed types
/// (SEQUENCE OF, SET OF); `false` only for IMPLICIT tagging of a
/// primitive type.
pub fn context_tag(n: u8, constructed: bool, body: &[u8]) -> Vec<u8> {
  let class_and_constructed = 0x80 | if constructed { 0x20 } else { 0x00 };
  tlv(class_and_constructed | (n & 0x1f), body)
}

/// Re-tags an already-encoded TLV's outer tag byte to a context tag,
/// keeping its length and content as-is. Used to turn an explicitly
/// `SET OF Attribute` encoding (tag `0x31`) into the `[0] IMPLICIT SET
/// OF Attribute` form CMS's `signedAttrs` field requires, without
/// re-deriving the length.
pub fn retag_implicit(tlv_bytes: &[u8], n: u8, constructed: bool) -> Result<Vec<u8>> {
  let (content_start, length) = parse_length(tlv_bytes, 1)?;
  let end = content_start
    .checked_add(length)
    .ok_or_else(|| PdfSignError::InvalidDer("retag: length overflow".into()))?;
  if end > tlv_bytes.len() {
    return Err(PdfSignError::InvalidDer(
      "retag: TLV longer than buffer".into(),
    ));
  }
  let class_and_constructed = 0x80 | if constructed { 0x20 } else { 0x00 };
  let mut out = Vec::with_capacity(tlv_bytes.len());
  out.push(class_and_constructed | (n & 0x1f));
  out.extend_from_slice(&tlv_bytes[1..end]);
  Ok(out)
}

/// Parses a DER length field starting at `buf[off]` being the first
/// length byte (i.e. `off` is one past the tag byte). Returns
/// `(content_start, length)`. Refuses length fields declaring more
/// than four length bytes, and clamps to the buffer bounds.
pub fn parse_length(buf: &[u8], off: usize) -> Result<(usize, usize)> {
  let first = *buf
    .get(off)
    .ok_or_else(|| PdfSignError::InvalidDer("truncated length".into()))?;
  if first & 0x80 == 0 {
    return Ok((off + 1, first as usize));
  }
  let k = (first & 0x7f) as usize;
  if k == 0 || k > 4 {
    return Err(PdfSignError::InvalidDer(format!(
      "unsupported DER length-of-length {k}"
    )));
  }
  let bytes = buf
    .get(off + 1..off + 1 + k)
    .ok_or_else(|| PdfSignError::InvalidDer("truncated long-form length".into()))?;
  let mut len: usize = 0;
  for &b in bytes {
    len = len
      .checked_shl(8)
      .and_then(|v| v.checked_add(b as usize))
      .ok_or_else(|| PdfSignError::InvalidDer("DER length overflow".into()))?;
  }
  Ok((off + 1 + k, len))
}

/// Skips one full TLV starting at `buf[off]` (the tag byte) and
/// returns the offset immediately after its value.
pub fn skip_tlv(buf: &[u8], off: usize) -> Result<usize> {
  if off >= buf.len() {
    return Err(PdfSignError::InvalidDer("skip_tlv past end of buffer".into()));
  }
  let (content_start, length) = parse_length(buf, off + 1)?;
  let end = content_start
    .checked_add(length)
    .ok_or_else(|| PdfSignError::InvalidDer("skip_tlv: length overflow".into()))?;
  if end > buf.len() {
    return Err(PdfSignError::InvalidDer("skip_tlv: TLV exceeds buffer".into()));
  }
  Ok(end)
}

/// Reads one TLV starting at `buf[off]`, returning
/// `(tag, content_range, offset_after_value)`.
pub fn read_tlv(buf: &[u8], off: usize) -> Result<(u8, std::ops::Range<usize>, usize)> {
  let tag = *buf
    .get(off)
    .ok_or_else(|| PdfSignError::InvalidDer("read_tlv past end of buffer".into()))?;
  let (content_start, length) = parse_length(buf, off + 1)?;
  let end = content_start
    .checked_add(length)
    .ok_or_else(|| PdfSignError::InvalidDer("read_tlv: length overflow".into()))?;
  if end > buf.len() {
    return Err(PdfSignError::InvalidDer("read_tlv: TLV exceeds buffer".into()));
  }
  Ok((tag, content_start..end, end))
}
