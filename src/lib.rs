#![deny(clippy::all)]
//! A PAdES-B-B / B-T PDF signing engine.
//!
//! Given a PDF and a [`SigningIdentity`], [`sign_pdf`] appends an
//! incremental update carrying a detached CMS/PKCS#7 `SignedData`
//! signature over the document's `/ByteRange`, optionally timestamped
//! against an RFC 3161 TSA. [`prepare_for_external_signing`] and
//! [`complete_external_signing`] split that same flow in two for
//! callers whose private key lives behind an HSM or a remote signing
//! API and can't implement [`PrivateKeyHandle`] as an in-process call.
//! [`verify_signatures`] recomputes the ByteRange hash of every `/Type
//! /Sig` signature already embedded in a document and compares it
//! against the signature's own `messageDigest` attribute. It reports
//! whether each signature is intact, never whether it is trusted.

pub mod cert;
pub mod cms;
pub mod config;
pub mod der;
pub mod error;
pub mod hash;
pub mod identity;
pub mod incremental;
pub mod orchestrator;
pub mod scanner;
pub mod trailer;
pub mod tsa;

pub use config::SignatureMetadata;
pub use error::{PdfSignError, Result};
pub use hash::ByteRange;
pub use identity::{
  EcP256PrivateKeyHandle, KeyAttributes, KeyType, PrivateKeyHandle, RsaPrivateKeyHandle,
  SignatureAlgorithm, SigningIdentity,
};
pub use orchestrator::{
  complete_external_signing, prepare_for_external_signing, prepare_for_external_signing_file,
  sign_pdf, sign_pdf_file, verify_signatures, verify_signatures_file, PreparedSigning,
  SignatureInfo,
};
