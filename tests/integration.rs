//! End-to-end scenarios against minimal, hand-built PDF and X.509
//! fixtures. No external cert-generation dependency, no running
//! toolchain assumptions beyond what the crate itself already needs.

use std::io::{Read, Write};
use std::net::TcpListener;

use padeslite::{
  complete_external_signing, der, prepare_for_external_signing, sign_pdf, verify_signatures,
  EcP256PrivateKeyHandle, RsaPrivateKeyHandle, SignatureMetadata, SigningIdentity,
};

/// A one-page PDF: `1 0 obj` catalog, `2 0 obj` pages, `3 0 obj` page.
/// `acroform` and `annots` let scenarios 3/4 seed pre-existing state.
fn minimal_pdf(acroform: Option<&str>, annots: Option<&str>) -> Vec<u8> {
  let mut pdf = Vec::new();
  pdf.extend_from_slice(b"%PDF-1.7\n%\xe2\xe3\xcf\xd3\n");

  let catalog_acroform = acroform
    .map(|a| format!(" /AcroForm << /Fields [{a}] /SigFlags 0 >>"))
    .unwrap_or_default();
  pdf.extend_from_slice(
    format!("1 0 obj\n<< /Type /Catalog /Pages 2 0 R{catalog_acroform} >>\nendobj\n").as_bytes(),
  );
  pdf.extend_from_slice(b"2 0 obj\n<< /Type /Pages /Kids [3 0 R] /Count 1 >>\nendobj\n");

  let page_annots = annots.map(|a| format!(" /Annots [{a}]")).unwrap_or_default();
  pdf.extend_from_slice(
    format!(
      "3 0 obj\n<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792]{page_annots} >>\nendobj\n"
    )
    .as_bytes(),
  );

  if let Some(a) = annots {
    // The fixture references an annotation object (e.g. `4 0 R`); give
    // it a trivial body so `find_object_dict` can resolve it if needed.
    for tok in a.split_whitespace() {
      if let Ok(n) = tok.parse::<u32>() {
        pdf.extend_from_slice(format!("{n} 0 obj\n<< /Type /Annot /Subtype /Link >>\nendobj\n").as_bytes());
        break;
      }
    }
  }
  if let Some(a) = acroform {
    for tok in a.split_whitespace() {
      if let Ok(n) = tok.parse::<u32>() {
        pdf.extend_from_slice(
          format!("{n} 0 obj\n<< /Type /Annot /Subtype /Widget /FT /Tx >>\nendobj\n").as_bytes(),
        );
        break;
      }
    }
  }

  let xref_pos = pdf.len();
  pdf.extend_from_slice(b"xref\n0 6\n0000000000 65535 f \n");
  for _ in 0..5 {
    pdf.extend_from_slice(b"0000000000 00000 n \n");
  }
  pdf.extend_from_slice(b"trailer\n<< /Size 6 /Root 1 0 R >>\nstartxref\n");
  pdf.extend_from_slice(xref_pos.to_string().as_bytes());
  pdf.extend_from_slice(b"\n%%EOF");
  pdf
}

/// A syntactically valid but not cryptographically meaningful
/// `Certificate` DER. This crate never validates a certificate's own
/// signature or chain, so a fixture only needs the right TLV shape for
/// `CertNavigator` to walk (see `cert.rs`'s own fixtures).
fn fake_certificate(cn: &str, serial: u64) -> Vec<u8> {
  let version = der::context_tag(0, true, &der::integer_u64(2));
  let serial_number = der::integer_u64(serial);
  let alg_id = der::sequence(&der::oid_from_str("1.2.840.113549.1.1.11").unwrap());
  let name = der::sequence(&der::set(&der::sequence(
    &[der::oid_from_str("2.5.4.3").unwrap(), der::utf8_string(cn)].concat(),
  )));
  let validity = der::sequence(&[der::utf8_string("before"), der::utf8_string("after")].concat());
  let spki = der::sequence(&[alg_id.clone(), der::octet_string(&[0])].concat());
  let tbs = der::sequence(
    &[version, serial_number, alg_id.clone(), name.clone(), validity, name, spki].concat(),
  );
  der::sequence(&[tbs, alg_id, der::octet_string(&[0xAA; 8])].concat())
}

fn rsa_identity() -> SigningIdentity {
  let mut rng = rand::thread_rng();
  let key = rsa::RsaPrivateKey::new(&mut rng, 2048).unwrap();
  let handle = RsaPrivateKeyHandle::new(key);
  SigningIdentity::new(Box::new(handle), vec![fake_certificate("RSA Signer", 1)]).unwrap()
}

fn ec_identity() -> SigningIdentity {
  let mut rng = rand::thread_rng();
  let signing_key = p256::ecdsa::SigningKey::random(&mut rng);
  let handle = EcP256PrivateKeyHandle::new(signing_key);
  SigningIdentity::new(Box::new(handle), vec![fake_certificate("EC Signer", 2)]).unwrap()
}

fn approve_metadata() -> SignatureMetadata {
  SignatureMetadata {
    reason: "I approve".into(),
    location: "NYC".into(),
    contact_info: "".into(),
  }
}

fn count_occurrences(haystack: &[u8], needle: &[u8]) -> usize {
  haystack.windows(needle.len()).filter(|w| *w == needle).count()
}

#[test]
fn scenario_1_rsa_signs_and_verifies() {
  let pdf = minimal_pdf(None, None);
  let identity = rsa_identity();
  let signed = sign_pdf(&pdf, &identity, &approve_metadata(), None).unwrap();

  assert!(signed.len() > 34_000, "signed output was only {} bytes", signed.len());
  assert_eq!(count_occurrences(&signed, b"/Type /Sig"), 1);

  let infos = verify_signatures(&signed).unwrap();
  assert_eq!(infos.len(), 1);
  assert!(infos[0].valid);
  assert_eq!(infos[0].reason.as_deref(), Some("I approve"));
  assert!(!infos[0].trusted);
}

#[test]
fn scenario_2_ecdsa_p256_uses_the_correct_oid_and_no_null_params() {
  let pdf = minimal_pdf(None, None);
  let identity = ec_identity();
  let signed = sign_pdf(&pdf, &identity, &approve_metadata(), None).unwrap();

  let oid = der::oid_from_str("1.2.840.10045.4.3.2").unwrap();
  assert!(signed.windows(oid.len()).any(|w| w == oid.as_slice()));

  let infos = verify_signatures(&signed).unwrap();
  assert_eq!(infos.len(), 1);
  assert!(infos[0].valid);
}

#[test]
fn scenario_3_preexisting_acroform_fields_are_preserved() {
  let pdf = minimal_pdf(Some("5 0 R"), None);
  let identity = rsa_identity();
  let signed = sign_pdf(&pdf, &identity, &approve_metadata(), None).unwrap();

  let fields_pos = signed
    .windows(b"/Fields [".len())
    .rposition(|w| w == b"/Fields [")
    .unwrap();
  let fields_end = signed[fields_pos..].iter().position(|&b| b == b']').unwrap() + fields_pos;
  let fields_text = String::from_utf8_lossy(&signed[fields_pos..fields_end]);
  assert!(fields_text.contains("5 0 R"));
  let five_pos = fields_text.find("5 0 R").unwrap();
  let new_field_pos = fields_text.rfind("0 R").unwrap();
  assert!(five_pos < new_field_pos || fields_text.matches("0 R").count() >= 2);
}

#[test]
fn scenario_4_preexisting_annots_are_preserved_and_not_rewritten() {
  let pdf = minimal_pdf(None, Some("4 0 R"));
  let identity = rsa_identity();
  let signed = sign_pdf(&pdf, &identity, &approve_metadata(), None).unwrap();

  let annots_pos = signed
    .windows(b"/Annots [".len())
    .rposition(|w| w == b"/Annots [")
    .unwrap();
  let annots_end = signed[annots_pos..].iter().position(|&b| b == b']').unwrap() + annots_pos;
  let annots_text = String::from_utf8_lossy(&signed[annots_pos..annots_end]);
  assert!(annots_text.contains("4 0 R"));

  // The original `4 0 obj` annotation dictionary must survive untouched.
  assert_eq!(count_occurrences(&signed, b"4 0 obj\n<< /Type /Annot /Subtype /Link >>"), 1);
}

#[test]
fn scenario_5_external_signing_matches_direct_signing_up_to_the_m_field() {
  let pdf = minimal_pdf(None, None);
  let identity = rsa_identity();
  let metadata = approve_metadata();

  let prepared = prepare_for_external_signing(&pdf, &metadata).unwrap();
  assert_eq!(prepared.hash.len(), 32);
  assert_eq!(prepared.hash_algorithm, "SHA-256");

  let cms_der = padeslite::cms::build_signed_data(&identity, &prepared.hash, None).unwrap();
  let externally_signed = complete_external_signing(&prepared.prepared_pdf, &cms_der).unwrap();

  let directly_signed = sign_pdf(&pdf, &identity, &metadata, None).unwrap();

  fn mask_m_field(buf: &[u8]) -> Vec<u8> {
    let marker = b"/M (D:";
    let mut out = buf.to_vec();
    if let Some(pos) = out.windows(marker.len()).position(|w| w == marker) {
      let start = pos + marker.len();
      if let Some(end_rel) = out[start..].iter().position(|&b| b == b')') {
        for b in &mut out[start..start + end_rel] {
          *b = b'0';
        }
      }
    }
    out
  }

  assert_eq!(externally_signed.len(), directly_signed.len());
  assert_eq!(mask_m_field(&externally_signed), mask_m_field(&directly_signed));
}

#[test]
fn scenario_6_tampering_outside_contents_invalidates_the_signature() {
  let pdf = minimal_pdf(None, None);
  let identity = rsa_identity();
  let mut signed = sign_pdf(&pdf, &identity, &approve_metadata(), None).unwrap();

  // Flip a byte inside the original, already-signed page content,
  // well outside the `/Contents` hex window.
  let page_marker = b"/MediaBox";
  let pos = signed.windows(page_marker.len()).position(|w| w == page_marker).unwrap();
  signed[pos] ^= 0xFF;

  let infos = verify_signatures(&signed).unwrap();
  assert_eq!(infos.len(), 1);
  assert!(!infos[0].valid);
}

#[test]
fn scenario_7_tampering_inside_contents_invalidates_the_signature() {
  let pdf = minimal_pdf(None, None);
  let identity = rsa_identity();
  let mut signed = sign_pdf(&pdf, &identity, &approve_metadata(), None).unwrap();

  let marker = b"/Contents <";
  let pos = signed.windows(marker.len()).position(|w| w == marker).unwrap() + marker.len();
  // Flip a hex digit a safe distance into the CMS content, away from
  // the zero padding tail.
  let target = pos + 40;
  signed[target] = if signed[target] == b'a' { b'b' } else { b'a' };

  let infos = verify_signatures(&signed).unwrap();
  assert_eq!(infos.len(), 1);
  assert!(!infos[0].valid);
}

#[test]
fn property_p9_reason_escaping_round_trips_through_verification() {
  let pdf = minimal_pdf(None, None);
  let identity = rsa_identity();
  let metadata = SignatureMetadata {
    reason: "weird: \\ ( ) \n \r \t end".into(),
    location: "".into(),
    contact_info: "".into(),
  };
  let signed = sign_pdf(&pdf, &identity, &metadata, None).unwrap();
  let infos = verify_signatures(&signed).unwrap();
  assert_eq!(infos[0].reason.as_deref(), Some(metadata.reason.as_str()));
}

/// A single-shot RFC 3161 TSA double: accepts one connection, reads the
/// request up through its declared `Content-Length`, and replies with a
/// minimal well-formed `TimeStampResp` (status granted, an arbitrary
/// non-empty token).
fn spawn_fake_tsa() -> String {
  let listener = TcpListener::bind("127.0.0.1:0").unwrap();
  let addr = listener.local_addr().unwrap();

  std::thread::spawn(move || {
    let (mut stream, _) = listener.accept().unwrap();
    let mut buf = Vec::new();
    let mut chunk = [0u8; 512];
    let header_end = loop {
      let n = stream.read(&mut chunk).unwrap();
      buf.extend_from_slice(&chunk[..n]);
      if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
        break pos + 4;
      }
    };
    let headers = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let content_length: usize = headers
      .lines()
      .find_map(|l| l.to_lowercase().strip_prefix("content-length:").map(|v| v.trim().to_string()))
      .and_then(|v| v.parse().ok())
      .unwrap_or(0);
    while buf.len() < header_end + content_length {
      let n = stream.read(&mut chunk).unwrap();
      if n == 0 {
        break;
      }
      buf.extend_from_slice(&chunk[..n]);
    }

    let status_info = der::sequence(&der::integer_u64(0));
    let token = der::sequence(&der::oid_from_str("1.2.840.113549.1.7.2").unwrap());
    let resp_body = der::sequence(&[status_info, token].concat());
    let response = format!(
      "HTTP/1.1 200 OK\r\nContent-Type: application/timestamp-reply\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
      resp_body.len()
    );
    stream.write_all(response.as_bytes()).unwrap();
    stream.write_all(&resp_body).unwrap();
    stream.flush().unwrap();
  });

  format!("http://{addr}")
}

#[test]
fn signing_with_a_tsa_embeds_the_timestamp_token_as_an_unsigned_attribute() {
  let tsa_url = spawn_fake_tsa();
  let pdf = minimal_pdf(None, None);
  let identity = rsa_identity();
  let signed = sign_pdf(&pdf, &identity, &approve_metadata(), Some(&tsa_url)).unwrap();

  let timestamp_attr_oid = der::oid_from_str("1.2.840.113549.1.9.16.2.14").unwrap();
  assert!(signed.windows(timestamp_attr_oid.len()).any(|w| w == timestamp_attr_oid.as_slice()));

  let infos = verify_signatures(&signed).unwrap();
  assert_eq!(infos.len(), 1);
  assert!(infos[0].valid);
}
