use thiserror::Error;

/// Stable error surface for the signing and verification engine.
///
/// Every variant corresponds to one of the typed failure kinds the
/// engine promises. All parse/locate/bounds failures are fatal and
/// non-retriable: the engine never recovers internally and never
/// falls back silently.
#[derive(Error, Debug)]
pub enum PdfSignError {
  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),

  #[error("%%EOF not found in the last {window} bytes of the document")]
  EofNotFound { window: usize },

  #[error("could not parse the trailer: {0}")]
  CannotParseTrailer(String),

  #[error("could not locate the first page object: {0}")]
  CannotFindFirstPage(String),

  #[error("could not read the page dictionary: {0}")]
  CannotReadPageInfo(String),

  #[error("could not read the root catalog: {0}")]
  CannotReadRootCatalog(String),

  #[error("/ByteRange placeholder not found near offset {near}")]
  ByteRangePlaceholderNotFound { near: usize },

  #[error("/Contents placeholder not found")]
  ContentsPlaceholderNotFound,

  #[error("signature creation failed: {0}")]
  SignatureCreationFailed(String),

  #[error("CMS signature ({actual} bytes) does not fit the {max}-byte placeholder")]
  CmsSignatureTooLarge { actual: usize, max: usize },

  #[error("signing identity has an empty certificate chain")]
  EmptyCertificateChain,

  #[error("invalid ByteRange: {0}")]
  InvalidByteRange(String),

  #[error("invalid DER: {0}")]
  InvalidDer(String),

  #[error("RFC 3161 timestamp request failed: {0}")]
  TsaRequestFailed(String),

  #[error("malformed PDF: {0}")]
  InvalidPdf(String),
}

pub type Result<T> = std::result::Result<T, PdfSignError>;
