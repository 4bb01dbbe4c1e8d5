//! The signing-identity boundary.
//!
//! The engine never touches raw key material on its own. Every
//! signature over the `SignedAttributes` DER is produced by calling
//! back into a caller-supplied [`PrivateKeyHandle`]. This keeps key
//! custody (file, PKCS#11 session, HSM, cloud KMS) entirely outside
//! this crate.

use crate::error::{PdfSignError, Result};

/// The key family a [`PrivateKeyHandle`] reports, used by `cms` to pick
/// a `SignatureAlgorithmIdentifier` OID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
  Rsa,
  Ec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyAttributes {
  pub key_type: KeyType,
  pub key_bits: u32,
}

/// The algorithm `cms` asks a [`PrivateKeyHandle`] to sign with, chosen
/// from its reported [`KeyAttributes`]: RSA always signs with SHA-256;
/// EC keys of 384 bits or fewer sign with SHA-256, larger ones with
/// SHA-512.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlgorithm {
  RsaPkcs1Sha256,
  EcdsaSha256,
  EcdsaSha512,
}

/// An opaque private-key handle. `sign` receives the exact bytes that
/// must be signed (the `SET OF Attribute` re-encoding of
/// `SignedAttributes`, never the `[0] IMPLICIT` form) and must return
/// the raw signature octets for `algorithm`: DER `ECDSA-Sig-Value` for
/// EC, not the fixed-width IEEE P1363 form.
pub trait PrivateKeyHandle: Send {
  fn sign(&self, algorithm: SignatureAlgorithm, data: &[u8]) -> Result<Vec<u8>>;
  fn attributes(&self) -> KeyAttributes;
}

/// `{ privateKey, certificate, certificateChain }` per the external
/// signing-identity contract. `certificate()` is always
/// `certificate_chain()[0]`; the chain is leaf-first and non-empty.
/// Fields are private so the non-empty invariant can only be
/// established through [`SigningIdentity::new`].
pub struct SigningIdentity {
  private_key: Box<dyn PrivateKeyHandle>,
  certificate_chain: Vec<Vec<u8>>,
}

impl SigningIdentity {
  pub fn new(private_key: Box<dyn PrivateKeyHandle>, certificate_chain: Vec<Vec<u8>>) -> Result<Self> {
    if certificate_chain.is_empty() {
      return Err(PdfSignError::EmptyCertificateChain);
    }
    Ok(Self {
      private_key,
      certificate_chain,
    })
  }

  pub fn private_key(&self) -> &dyn PrivateKeyHandle {
    self.private_key.as_ref()
  }

  pub fn certificate_chain(&self) -> &[Vec<u8>] {
    &self.certificate_chain
  }

  pub fn certificate(&self) -> &[u8] {
    &self.certificate_chain[0]
  }
}

/// Convenience [`PrivateKeyHandle`] wrapping an in-memory RSA key, the
/// common case, and what the test fixtures in `tests/` use.
pub struct RsaPrivateKeyHandle {
  signing_key: rsa::pkcs1v15::SigningKey<sha2::Sha256>,
  key_bits: u32,
}

impl RsaPrivateKeyHandle {
  pub fn new(key: rsa::RsaPrivateKey) -> Self {
    let key_bits = key.size() as u32 * 8;
    Self {
      signing_key: rsa::pkcs1v15::SigningKey::<sha2::Sha256>::new(key),
      key_bits,
    }
  }
}

impl PrivateKeyHandle for RsaPrivateKeyHandle {
  fn sign(&self, algorithm: SignatureAlgorithm, data: &[u8]) -> Result<Vec<u8>> {
    use signature::{SignatureEncoding, Signer};
    if algorithm != SignatureAlgorithm::RsaPkcs1Sha256 {
      return Err(PdfSignError::SignatureCreationFailed(format!(
        "RSA key cannot honor algorithm {algorithm:?}"
      )));
    }
    let sig = self
      .signing_key
      .try_sign(data)
      .map_err(|e| PdfSignError::SignatureCreationFailed(e.to_string()))?;
    Ok(sig.to_vec())
  }

  fn attributes(&self) -> KeyAttributes {
    KeyAttributes {
      key_type: KeyType::Rsa,
      key_bits: self.key_bits,
    }
  }
}

/// Convenience [`PrivateKeyHandle`] wrapping an in-memory NIST P-256
/// key. 256 bits falls in the "EC <= 384 bits" bucket, so this always
/// signs with SHA-256.
pub struct EcP256PrivateKeyHandle {
  signing_key: p256::ecdsa::SigningKey,
}

impl EcP256PrivateKeyHandle {
  pub fn new(signing_key: p256::ecdsa::SigningKey) -> Self {
    Self { signing_key }
  }
}

impl PrivateKeyHandle for EcP256PrivateKeyHandle {
  fn sign(&self, algorithm: SignatureAlgorithm, data: &[u8]) -> Result<Vec<u8>> {
    use p256::ecdsa::signature::Signer;
    if algorithm != SignatureAlgorithm::EcdsaSha256 {
      return Err(PdfSignError::SignatureCreationFailed(format!(
        "P-256 key cannot honor algorithm {algorithm:?}"
      )));
    }
    let sig: p256::ecdsa::Signature = self
      .signing_key
      .try_sign(data)
      .map_err(|e| PdfSignError::SignatureCreationFailed(e.to_string()))?;
    // PAdES mandates the X9.62 DER `ECDSA-Sig-Value` form, not raw r||s.
    Ok(sig.to_der().as_bytes().to_vec())
  }

  fn attributes(&self) -> KeyAttributes {
    KeyAttributes {
      key_type: KeyType::Ec,
      key_bits: 256,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn signing_identity_rejects_empty_chain() {
    struct Dummy;
    impl PrivateKeyHandle for Dummy {
      fn sign(&self, _: SignatureAlgorithm, _: &[u8]) -> Result<Vec<u8>> {
        Ok(Vec::new())
      }
      fn attributes(&self) -> KeyAttributes {
        KeyAttributes {
          key_type: KeyType::Rsa,
          key_bits: 2048,
        }
      }
    }
    let err = SigningIdentity::new(Box::new(Dummy), Vec::new());
    assert!(matches!(err, Err(PdfSignError::EmptyCertificateChain)));
  }

  #[test]
  fn signing_identity_certificate_is_chain_head() {
    struct Dummy;
    impl PrivateKeyHandle for Dummy {
      fn sign(&self, _: SignatureAlgorithm, _: &[u8]) -> Result<Vec<u8>> {
        Ok(Vec::new())
      }
      fn attributes(&self) -> KeyAttributes {
        KeyAttributes {
          key_type: KeyType::Rsa,
          key_bits: 2048,
        }
      }
    }
    let identity = SigningIdentity::new(Box::new(Dummy), vec![vec![1, 2, 3], vec![4, 5]]).unwrap();
    assert_eq!(identity.certificate(), &[1, 2, 3]);
  }

  #[test]
  fn rsa_handle_rejects_ec_algorithm() {
    use rsa::RsaPrivateKey;
    let mut rng = rand::thread_rng();
    let key = RsaPrivateKey::new(&mut rng, 2048).unwrap();
    let handle = RsaPrivateKeyHandle::new(key);
    assert!(handle.sign(SignatureAlgorithm::EcdsaSha256, b"data").is_err());
  }

  #[test]
  fn rsa_handle_reports_attributes() {
    use rsa::RsaPrivateKey;
    let mut rng = rand::thread_rng();
    let key = RsaPrivateKey::new(&mut rng, 2048).unwrap();
    let handle = RsaPrivateKeyHandle::new(key);
    let attrs = handle.attributes();
    assert_eq!(attrs.key_type, KeyType::Rsa);
    assert_eq!(attrs.key_bits, 2048);
  }

  #[test]
  fn ec_p256_handle_produces_der_signature() {
    use p256::ecdsa::SigningKey;
    let mut rng = rand::thread_rng();
    let signing_key = SigningKey::random(&mut rng);
    let handle = EcP256PrivateKeyHandle::new(signing_key);
    let sig = handle.sign(SignatureAlgorithm::EcdsaSha256, b"some signed attributes").unwrap();
    // A DER SEQUENCE of two INTEGERs always opens with 0x30.
    assert_eq!(sig[0], 0x30);
  }
}
