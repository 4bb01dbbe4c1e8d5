//! CMS/PKCS#7 `SignedData` container, built and read by hand-rolled DER
//! TLVs (see `der.rs`). Grounded in RFC 5652 §5 and RFC 5035 (ESS
//! signing-certificate attributes), following the field order and
//! naming of the `cms` crate's `ContentInfo`/`SignedData`/`SignerInfo`
//! types without depending on it.

use crate::cert::CertNavigator;
use crate::der;
use crate::error::{PdfSignError, Result};
use crate::identity::{KeyType, SignatureAlgorithm, SigningIdentity};

const OID_SIGNED_DATA: &str = "1.2.840.113549.1.7.2";
const OID_DATA: &str = "1.2.840.113549.1.7.1";
const OID_SHA256: &str = "2.16.840.1.101.3.4.2.1";
const OID_RSA_SHA256: &str = "1.2.840.113549.1.1.11";
const OID_ECDSA_SHA256: &str = "1.2.840.10045.4.3.2";
const OID_ECDSA_SHA512: &str = "1.2.840.10045.4.3.4";
const OID_CONTENT_TYPE_ATTR: &str = "1.2.840.113549.1.9.3";
const OID_MESSAGE_DIGEST_ATTR: &str = "1.2.840.113549.1.9.4";
const OID_SIGNING_CERTIFICATE_V2_ATTR: &str = "1.2.840.113549.1.9.16.2.47";
const OID_SIGNATURE_TIMESTAMP_TOKEN_ATTR: &str = "1.2.840.113549.1.9.16.2.14";

fn choose_algorithm(identity: &SigningIdentity) -> SignatureAlgorithm {
  let attrs = identity.private_key().attributes();
  match attrs.key_type {
    KeyType::Rsa => SignatureAlgorithm::RsaPkcs1Sha256,
    KeyType::Ec if attrs.key_bits <= 384 => SignatureAlgorithm::EcdsaSha256,
    KeyType::Ec => SignatureAlgorithm::EcdsaSha512,
  }
}

/// `AlgorithmIdentifier(sha256, NULL)`, used for both `digestAlgorithms`
/// entries and `SignerInfo.digestAlgorithm`.
fn sha256_algorithm_identifier() -> Result<Vec<u8>> {
  let mut body = der::oid_from_str(OID_SHA256)?;
  body.extend_from_slice(&der::null());
  Ok(der::sequence(&body))
}

/// `SignerInfo.signatureAlgorithm`: RSA carries `NULL` parameters,
/// ECDSA carries none.
fn signature_algorithm_identifier(algorithm: SignatureAlgorithm) -> Result<Vec<u8>> {
  let (oid, has_null_params) = match algorithm {
    SignatureAlgorithm::RsaPkcs1Sha256 => (OID_RSA_SHA256, true),
    SignatureAlgorithm::EcdsaSha256 => (OID_ECDSA_SHA256, false),
    SignatureAlgorithm::EcdsaSha512 => (OID_ECDSA_SHA512, false),
  };
  let mut body = der::oid_from_str(oid)?;
  if has_null_params {
    body.extend_from_slice(&der::null());
  }
  Ok(der::sequence(&body))
}

/// `Attribute ::= SEQUENCE { attrType OID, attrValues SET OF AttributeValue }`,
/// with exactly one value. Every attribute this module emits is
/// single-valued.
fn attribute(oid_dotted: &str, value: Vec<u8>) -> Result<Vec<u8>> {
  let oid = der::oid_from_str(oid_dotted)?;
  let values = der::set(&value);
  Ok(der::sequence(&[oid, values].concat()))
}

/// `SigningCertificateV2 ::= SEQUENCE { certs SEQUENCE OF ESSCertIDv2 }`,
/// one `ESSCertIDv2` describing the leaf certificate.
/// `ESSCertIDv2.hashAlgorithm` is omitted: SHA-256 is its DEFAULT.
fn signing_certificate_v2(leaf: &CertNavigator) -> Vec<u8> {
  let ess_cert_id_v2 = der::sequence(
    &[der::octet_string(&leaf.cert_hash_sha256()), leaf.issuer_serial_der()].concat(),
  );
  let certs = der::sequence(&ess_cert_id_v2);
  der::sequence(&certs)
}

/// Builds the full CMS `ContentInfo { SignedData }` detached signature
/// over `message_digest` (the ByteRange SHA-256, from `hash.rs`).
/// `timestamp_token` is the raw RFC 3161 `TimeStampToken` DER (already
/// a `ContentInfo`) to embed as an unsigned attribute, when a TSA was
/// used. `tsa_url`, when given, is called exactly once, over the
/// signature just produced, before the CMS is assembled. It is never
/// called over a re-computed signature, since ECDSA signing is not
/// deterministic.
pub fn build_signed_data(
  identity: &SigningIdentity,
  message_digest: &[u8; 32],
  tsa_url: Option<&str>,
) -> Result<Vec<u8>> {
  let leaf = CertNavigator::parse(identity.certificate())?;
  let algorithm = choose_algorithm(identity);
  log::debug!("build_signed_data: algorithm {algorithm:?}, tsa requested: {}", tsa_url.is_some());

  let content_type_attr = attribute(OID_CONTENT_TYPE_ATTR, der::oid_from_str(OID_DATA)?)?;
  let message_digest_attr = attribute(OID_MESSAGE_DIGEST_ATTR, der::octet_string(message_digest))?;
  let signing_cert_attr = attribute(OID_SIGNING_CERTIFICATE_V2_ATTR, signing_certificate_v2(&leaf))?;

  // Fixed order: contentType, messageDigest, signing-certificate-v2.
  let signed_attrs_concat = [content_type_attr, message_digest_attr, signing_cert_attr].concat();
  // The value actually signed is the explicit `SET OF` (tag 0x31), not
  // the `[0] IMPLICIT` form later embedded in SignerInfo.
  let signed_attrs_explicit_set = der::set(&signed_attrs_concat);

  let signature = identity
    .private_key()
    .sign(algorithm, &signed_attrs_explicit_set)?;

  let signed_attrs_implicit = der::retag_implicit(&signed_attrs_explicit_set, 0, true)?;
  let sid = leaf.issuer_and_serial_number_der();
  let digest_algorithm = sha256_algorithm_identifier()?;
  let signature_algorithm = signature_algorithm_identifier(algorithm)?;

  let mut signer_info_body = der::integer_u64(1);
  signer_info_body.extend_from_slice(&sid);
  signer_info_body.extend_from_slice(&digest_algorithm);
  signer_info_body.extend_from_slice(&signed_attrs_implicit);
  signer_info_body.extend_from_slice(&signature_algorithm);
  signer_info_body.extend_from_slice(&der::octet_string(&signature));

  if let Some(url) = tsa_url {
    let token = crate::tsa::timestamp(url, &signature)?;
    let tsa_attr = attribute(OID_SIGNATURE_TIMESTAMP_TOKEN_ATTR, token)?;
    let unsigned_attrs_explicit_set = der::set(&tsa_attr);
    let unsigned_attrs_implicit = der::retag_implicit(&unsigned_attrs_explicit_set, 1, true)?;
    signer_info_body.extend_from_slice(&unsigned_attrs_implicit);
  }
  let signer_info = der::sequence(&signer_info_body);
  let signer_infos = der::set(&signer_info);

  let certificates_concat: Vec<u8> = identity.certificate_chain().iter().flatten().copied().collect();
  let certificates_implicit = der::retag_implicit(&der::set(&certificates_concat), 0, true)?;

  let digest_algorithms = der::set(&sha256_algorithm_identifier()?);
  // Detached: encapContentInfo carries only contentType, no eContent.
  let encap_content_info = der::sequence(&der::oid_from_str(OID_DATA)?);

  let mut signed_data_body = der::integer_u64(1);
  signed_data_body.extend_from_slice(&digest_algorithms);
  signed_data_body.extend_from_slice(&encap_content_info);
  signed_data_body.extend_from_slice(&certificates_implicit);
  signed_data_body.extend_from_slice(&signer_infos);
  let signed_data = der::sequence(&signed_data_body);

  let content_type = der::oid_from_str(OID_SIGNED_DATA)?;
  let content = der::context_tag(0, true, &signed_data);
  Ok(der::sequence(&[content_type, content].concat()))
}

/// Locates `SignerInfo.signedAttrs`'s `messageDigest` attribute value
/// inside a full CMS `ContentInfo` blob by scanning for the
/// `messageDigest` OID and stepping past the `SET` and `OCTET STRING`
/// headers that follow it. This is the byte-scan `verify_signatures`
/// uses, rather than a full CMS decode.
pub fn find_message_digest(cms_der: &[u8]) -> Result<[u8; 32]> {
  let oid = der::oid_from_str(OID_MESSAGE_DIGEST_ATTR)?;
  let oid_pos = cms_der
    .windows(oid.len())
    .position(|w| w == oid.as_slice())
    .ok_or_else(|| PdfSignError::InvalidDer("messageDigest OID not found in CMS".into()))?;
  let after_oid = oid_pos + oid.len();

  let (set_tag, set_body, _) = der::read_tlv(cms_der, after_oid)?;
  if set_tag != 0x31 {
    return Err(PdfSignError::InvalidDer(format!(
      "messageDigest: expected SET after OID, got tag {set_tag:#04x}"
    )));
  }
  let (octet_tag, octet_body, _) = der::read_tlv(cms_der, set_body.start)?;
  if octet_tag != 0x04 {
    return Err(PdfSignError::InvalidDer(format!(
      "messageDigest: expected OCTET STRING inside SET, got tag {octet_tag:#04x}"
    )));
  }
  let digest = &cms_der[octet_body];
  if digest.len() != 32 {
    return Err(PdfSignError::InvalidDer(format!(
      "messageDigest: expected 32 bytes, got {}",
      digest.len()
    )));
  }
  let mut out = [0u8; 32];
  out.copy_from_slice(digest);
  Ok(out)
}
