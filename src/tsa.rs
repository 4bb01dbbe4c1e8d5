//! RFC 3161 time-stamp protocol client: builds a `TimeStampReq`, POSTs
//! it to the configured TSA, and hands back the `TimeStampToken` bytes
//! verbatim for `cms::build_signed_data` to embed as an unsigned
//! attribute.

use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::config::TSA_TIMEOUT_SECONDS;
use crate::der;
use crate::error::{PdfSignError, Result};

const OID_SHA256: &str = "2.16.840.1.101.3.4.2.1";
const CONTENT_TYPE: &str = "application/timestamp-query";

/// `TimeStampReq ::= SEQUENCE { version INTEGER 1, messageImprint
/// SEQUENCE { hashAlgorithm AlgorithmIdentifier(sha256, NULL),
/// hashedMessage OCTET STRING }, certReq BOOLEAN TRUE }`.
fn build_request(signature_octets: &[u8]) -> Result<Vec<u8>> {
  let hashed_message: [u8; 32] = Sha256::digest(signature_octets).into();

  let mut alg_id_body = der::oid_from_str(OID_SHA256)?;
  alg_id_body.extend_from_slice(&der::null());
  let hash_algorithm = der::sequence(&alg_id_body);

  let message_imprint = der::sequence(
    &[hash_algorithm, der::octet_string(&hashed_message)].concat(),
  );

  let cert_req = vec![0x01, 0x01, 0xff]; // BOOLEAN TRUE

  let body = [der::integer_u64(1), message_imprint, cert_req].concat();
  Ok(der::sequence(&body))
}

/// Parses a `TimeStampResp`: `SEQUENCE { status PKIStatusInfo, timeStampToken
/// ContentInfo OPTIONAL }`, where `PKIStatusInfo ::= SEQUENCE { status
/// INTEGER, ... }`. Accepts `status` 0 (granted) or 1 (grantedWithMods)
/// and returns the remaining `TimeStampToken` bytes unparsed.
fn parse_response(resp: &[u8]) -> Result<Vec<u8>> {
  let (outer_tag, outer_body, _) = der::read_tlv(resp, 0)?;
  if outer_tag != 0x30 {
    return Err(PdfSignError::TsaRequestFailed(format!(
      "TimeStampResp: expected SEQUENCE, got tag {outer_tag:#04x}"
    )));
  }
  let (status_info_tag, status_info_body, after_status_info) =
    der::read_tlv(resp, outer_body.start)?;
  if status_info_tag != 0x30 {
    return Err(PdfSignError::TsaRequestFailed(format!(
      "PKIStatusInfo: expected SEQUENCE, got tag {status_info_tag:#04x}"
    )));
  }
  let (status_tag, status_body, _) = der::read_tlv(resp, status_info_body.start)?;
  if status_tag != 0x02 {
    return Err(PdfSignError::TsaRequestFailed(format!(
      "PKIStatusInfo.status: expected INTEGER, got tag {status_tag:#04x}"
    )));
  }
  let status = resp[status_body]
    .iter()
    .fold(0i64, |acc, &b| (acc << 8) | b as i64);
  if status != 0 && status != 1 {
    return Err(PdfSignError::TsaRequestFailed(format!(
      "TSA rejected timestamp request with status {status}"
    )));
  }

  let token = &resp[after_status_info..outer_body.end];
  if token.is_empty() {
    return Err(PdfSignError::TsaRequestFailed(
      "TSA response carried no TimeStampToken".into(),
    ));
  }
  Ok(token.to_vec())
}

/// Requests a timestamp over `signature_octets` (the CMS `signature`
/// field's raw bytes) from `tsa_url`, returning the raw `TimeStampToken`
/// DER. One attempt, no retries, 30-second timeout, matching the
/// concurrency model's single suspension point.
pub fn timestamp(tsa_url: &str, signature_octets: &[u8]) -> Result<Vec<u8>> {
  let request = build_request(signature_octets)?;
  log::debug!("tsa::timestamp: requesting from {tsa_url}, request is {} bytes", request.len());

  let client = reqwest::blocking::Client::builder()
    .timeout(Duration::from_secs(TSA_TIMEOUT_SECONDS))
    .build()
    .map_err(|e| PdfSignError::TsaRequestFailed(e.to_string()))?;

  let response = client
    .post(tsa_url)
    .header("Content-Type", CONTENT_TYPE)
    .body(request)
    .send()
    .map_err(|e| PdfSignError::TsaRequestFailed(e.to_string()))?;

  if !response.status().is_success() {
    return Err(PdfSignError::TsaRequestFailed(format!(
      "TSA responded with HTTP {}",
      response.status()
    )));
  }

  let body = response
    .bytes()
    .map_err(|e| PdfSignError::TsaRequestFailed(e.to_string()))?;
  if body.is_empty() {
    return Err(PdfSignError::TsaRequestFailed("empty TSA response body".into()));
  }
  log::trace!("tsa::timestamp: received {} byte response", body.len());

  parse_response(&body)
}
