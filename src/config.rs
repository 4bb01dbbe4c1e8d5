//! Fixed configuration constants and per-call signature metadata.
//!
//! These are constants, not a config-file layer: the engine has no
//! notion of a loaded configuration beyond what a caller passes into
//! a single signing call.

/// Bytes of CMS payload the `/Contents` placeholder reserves. The hex
/// encoding doubles this to `2 * PLACEHOLDER_SIZE` ASCII characters.
pub const PLACEHOLDER_SIZE: usize = 16_384;

/// How many trailing bytes of the document `find_eof` scans for `%%EOF`.
pub const EOF_SEARCH_WINDOW: usize = 1024;

/// Fixed timeout for the RFC 3161 TSA HTTP round trip.
pub const TSA_TIMEOUT_SECONDS: u64 = 30;

/// Per-signing metadata written into the signature dictionary and, for
/// `reason`, echoed back by [`crate::verify_signatures`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SignatureMetadata {
  /// `/Reason`: why the document was signed.
  pub reason: String,
  /// `/Location`: where the signing took place.
  pub location: String,
  /// `/ContactInfo`: how to reach the signer.
  pub contact_info: String,
}
