//! X.509 certificate DER navigation.
//!
//! CMS's `IssuerAndSerialNumber` and ESS's `IssuerSerial` both need the
//! signing certificate's issuer `Name` and serial number exactly as the
//! certificate encodes them, not re-derived through a general-purpose
//! ASN.1 mapping. This walks the handful of TLVs between the start of
//! the certificate and the issuer field using only `der::read_tlv` /
//! `der::skip_tlv`, per the fixed `Certificate ::= SEQUENCE {
//! tbsCertificate, signatureAlgorithm, signatureValue }` /
//! `TBSCertificate ::= SEQUENCE { [0] version OPTIONAL, serialNumber,
//! signature, issuer, ... }` shape RFC 5280 guarantees.

use sha2::{Digest, Sha256};

use crate::der;
use crate::error::{PdfSignError, Result};

const TAG_VERSION_CONTEXT: u8 = 0xa0;
const TAG_SEQUENCE: u8 = 0x30;
const TAG_INTEGER: u8 = 0x02;

/// The pieces of a DER-encoded X.509 certificate the CMS builder needs:
/// the whole certificate, its issuer `Name` as a raw re-embeddable TLV,
/// and its serial number as a raw `INTEGER` content.
#[derive(Debug, Clone)]
pub struct CertNavigator {
  pub der: Vec<u8>,
  issuer_name_tlv: Vec<u8>,
  serial_number: Vec<u8>,
}

impl CertNavigator {
  pub fn parse(cert_der: &[u8]) -> Result<Self> {
    let (cert_tag, cert_body, _) = der::read_tlv(cert_der, 0)?;
    if cert_tag != TAG_SEQUENCE {
      return Err(PdfSignError::InvalidDer(format!(
        "certificate: expected outer SEQUENCE, got tag {cert_tag:#04x}"
      )));
    }
    let (tbs_tag, tbs_body, _) = der::read_tlv(cert_der, cert_body.start)?;
    if tbs_tag != TAG_SEQUENCE {
      return Err(PdfSignError::InvalidDer(format!(
        "tbsCertificate: expected SEQUENCE, got tag {tbs_tag:#04x}"
      )));
    }

    let mut off = tbs_body.start;
    let first_tag = *cert_der
      .get(off)
      .ok_or_else(|| PdfSignError::InvalidDer("tbsCertificate: empty body".into()))?;
    if first_tag == TAG_VERSION_CONTEXT {
      off = der::skip_tlv(cert_der, off)?;
    }

    let (serial_tag, serial_body, after_serial) = der::read_tlv(cert_der, off)?;
    if serial_tag != TAG_INTEGER {
      return Err(PdfSignError::InvalidDer(format!(
        "tbsCertificate: expected serialNumber INTEGER, got tag {serial_tag:#04x}"
      )));
    }
    let serial_number = cert_der[serial_body].to_vec();

    // signature AlgorithmIdentifier, not needed, just stepped over.
    let after_signature_alg = der::skip_tlv(cert_der, after_serial)?;

    let (issuer_tag, _, issuer_end) = der::read_tlv(cert_der, after_signature_alg)?;
    if issuer_tag != TAG_SEQUENCE {
      return Err(PdfSignError::InvalidDer(format!(
        "tbsCertificate: expected issuer Name SEQUENCE, got tag {issuer_tag:#04x}"
      )));
    }
    let issuer_name_tlv = cert_der[after_signature_alg..issuer_end].to_vec();

    Ok(CertNavigator {
      der: cert_der.to_vec(),
      issuer_name_tlv,
      serial_number,
    })
  }

  /// `SHA-256` of the whole certificate DER. This is `ESSCertIDv2.certHash`
  /// when `hashAlgorithm` is the (implied) default of SHA-256.
  pub fn cert_hash_sha256(&self) -> [u8; 32] {
    Sha256::digest(&self.der).into()
  }

  /// `IssuerAndSerialNumber ::= SEQUENCE { issuer Name, serialNumber
  /// CertificateSerialNumber }`, `SignerIdentifier`'s non-SKI form.
  pub fn issuer_and_serial_number_der(&self) -> Vec<u8> {
    let mut body = Vec::with_capacity(self.issuer_name_tlv.len() + self.serial_number.len() + 8);
    body.extend_from_slice(&self.issuer_name_tlv);
    body.extend_from_slice(&der::integer(&self.serial_number));
    der::sequence(&body)
  }

  /// `IssuerSerial ::= SEQUENCE { issuer GeneralNames, serialNumber
  /// CertificateSerialNumber }` for `ESSCertIDv2.issuerSerial`.
  /// `GeneralNames` holds a single `directoryName [4] Name` choice;
  /// `Name` is itself a CHOICE type so RFC 5280 tags it EXPLICIT.
  pub fn issuer_serial_der(&self) -> Vec<u8> {
    let directory_name = der::context_tag(4, true, &self.issuer_name_tlv);
    let general_names = der::sequence(&directory_name);
    let mut body = Vec::with_capacity(general_names.len() + self.serial_number.len() + 8);
    body.extend_from_slice(&general_names);
    body.extend_from_slice(&der::integer(&self.serial_number));
    der::sequence(&body)
  }
}

/// Best-effort human-readable subject common name, for populating
/// `SignatureInfo.signer_name` in verification output. Never used for
/// trust decisions and never fails the caller. A cert this library
/// itself produced the signature over is assumed parseable, but if
/// `x509-parser` disagrees, `None` is a safe fallback.
pub fn subject_common_name(cert_der: &[u8]) -> Option<String> {
  use der_parser::asn1_rs::FromDer;
  use x509_parser::prelude::X509Certificate;

  let (_, cert) = X509Certificate::from_der(cert_der).ok()?;
  cert
    .subject()
    .iter_common_name()
    .next()
    .and_then(|cn| cn.as_str().ok())
    .map(str::to_string)
}
