//! Error types for the certification authority core
//!
//! Every failure mode has its own variant so callers can tell a malformed
//! distinguished name from a wrong key password or a storage outage without
//! string matching.

use openssl::error::ErrorStack;
use thiserror::Error;

/// Failures raised while scanning distinguished name text
///
/// `offset` is the byte position in the input where the problem was detected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// A quoted value has no closing `"`
    #[error("unterminated quoted value starting at offset {offset}")]
    UnterminatedQuotedValue { offset: usize },

    /// `#` was not followed by any hex digit
    #[error("missing hex value after '#' at offset {offset}")]
    MissingHexValue { offset: usize },

    /// An object identifier does not start with a digit string
    #[error("no object identifier at offset {offset}")]
    EmptyOid { offset: usize },

    /// An object identifier has a `.` that is not followed by digits
    #[error("missing number after '.' in object identifier at offset {offset}")]
    MissingOidArc { offset: usize },

    /// No key characters where an attribute key was expected
    #[error("not an attribute key at offset {offset}")]
    InvalidKey { offset: usize },

    /// `OID.`/`oid.` prefix followed by a malformed object identifier
    #[error("invalid OID key at offset {offset}")]
    InvalidOidKey { offset: usize },

    /// Attribute key not followed by `=`
    #[error("missing '=' sign at offset {offset}")]
    MissingEqualsSign { offset: usize },

    /// Name components not separated by `,` or `;`
    #[error("missing separator at offset {offset}")]
    MissingSeparator { offset: usize },

    /// `+` with nothing after it
    #[error("missing attribute after '+' at offset {offset}")]
    MissingAttribute { offset: usize },
}

/// Failures raised while mapping parsed attributes onto a certificate subject
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MappingError {
    /// Key is neither a known attribute nor `OID.<dotted-integers>`
    #[error("unrecognized attribute key: '{key}'")]
    UnrecognizedAttributeKey { key: String },

    /// CN or SERIALNUMBER given more than once
    #[error("attribute '{key}' may only appear once")]
    DuplicateSingleValuedAttribute { key: String },

    /// Value outside what X.509 allows for the attribute, such as a `C` that
    /// is not two letters or a CN over 64 characters
    #[error("attribute '{key}' cannot be encoded: {reason}")]
    UnencodableValue { key: String, reason: String },
}

/// A distinguished name that could not be turned into a subject
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DistinguishedNameError {
    #[error("invalid distinguished name syntax: {0}")]
    Parse(#[from] ParseError),

    #[error("invalid distinguished name attribute: {0}")]
    Mapping(#[from] MappingError),
}

/// PEM armor and private key encoding failures
#[derive(Debug, Error)]
pub enum EncodingError {
    #[error("malformed PEM armor: {0}")]
    InvalidPem(#[from] pem::PemError),

    #[error("unexpected PEM label '{0}'")]
    UnexpectedLabel(String),

    /// The key is encrypted and no password was supplied
    #[error("private key is encrypted but no password was supplied")]
    PasswordRequired,

    /// Wrong password or corrupted ciphertext
    #[error("unable to decrypt private key")]
    DecryptionFailed(#[source] ErrorStack),

    /// None of PKCS#8, PKCS#1 or SEC1 could parse the key bytes
    #[error("unsupported private key format")]
    UnsupportedKeyFormat(#[source] ErrorStack),

    #[error("private key encoding failed: {0}")]
    Encoding(#[source] ErrorStack),
}

impl EncodingError {
    /// True when the failure is about the password rather than the data
    pub fn is_decryption_failure(&self) -> bool {
        matches!(
            self,
            EncodingError::PasswordRequired | EncodingError::DecryptionFailed(_)
        )
    }
}

/// Failures reported by a [`crate::ca_storage::CaStorage`] backend
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("no CA named '{name}' in storage")]
    NotFound { name: String },

    #[error("a CA named '{name}' already exists")]
    DuplicateName { name: String },

    /// The stored private key could not be decrypted with the configured password
    #[error("failed to decrypt stored CA private key")]
    DecryptionFailure(#[source] EncodingError),

    #[error("stored CA data is corrupted: {reason}")]
    Corrupted { reason: String },

    #[error("storage I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage backend failure: {0}")]
    Backend(String),
}

impl From<EncodingError> for StorageError {
    fn from(err: EncodingError) -> Self {
        if err.is_decryption_failure() {
            StorageError::DecryptionFailure(err)
        } else {
            StorageError::Corrupted {
                reason: err.to_string(),
            }
        }
    }
}

/// Errors returned by [`crate::certificate_authority::CertificateAuthority`]
#[derive(Debug, Error)]
pub enum CaError {
    #[error(transparent)]
    InvalidDistinguishedName(#[from] DistinguishedNameError),

    #[error("signing failure: {0}")]
    SigningFailure(String),

    #[error("serial number allocation failed: {0}")]
    SerialNumberAllocationFailure(#[source] StorageError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("stored bytes are not a valid certificate")]
    CertificateDecodeError(#[source] ErrorStack),

    #[error(transparent)]
    Encoding(#[from] EncodingError),

    /// Building the certificate template failed inside openssl
    #[error("certificate template construction failed: {context}")]
    Certificate {
        context: &'static str,
        #[source]
        source: ErrorStack,
    },
}

impl From<ParseError> for CaError {
    fn from(err: ParseError) -> Self {
        CaError::InvalidDistinguishedName(err.into())
    }
}

impl From<MappingError> for CaError {
    fn from(err: MappingError) -> Self {
        CaError::InvalidDistinguishedName(err.into())
    }
}

/// Attach a context label to an openssl failure while building a template
pub(crate) trait TemplateContext<T> {
    fn template(self, context: &'static str) -> Result<T, CaError>;
}

impl<T> TemplateContext<T> for Result<T, ErrorStack> {
    fn template(self, context: &'static str) -> Result<T, CaError> {
        self.map_err(|source| CaError::Certificate { context, source })
    }
}
