//! Storage contract consumed by the certificate authority
//!
//! A backend keeps one CA: its certificate, its password-protected private key
//! and the serial-number counter. [`CaStorage::next_serial_number`] must be an
//! atomic fetch-and-increment; the authority relies on it alone for serial
//! uniqueness, including across processes sharing the same backend.
//!
//! [`MemoryCaStorage`] is the in-process reference backend. It still encrypts
//! the private key on store so loading goes through the same decryption path
//! as a persistent backend.

use std::fmt;
use std::sync::{Mutex, MutexGuard};

use openssl::bn::BigNum;
use openssl::error::ErrorStack;
use openssl::pkey::{PKey, Private};
use openssl::x509::X509Ref;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::certificate_authority::CertificateAuthority;
use crate::error::StorageError;
use crate::pem_utils;
use crate::subject::format_x509_name;

/// Backend identifier of a persisted CA; zero means not yet persisted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorageId(u64);

impl StorageId {
    pub const UNASSIGNED: StorageId = StorageId(0);

    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    pub fn is_assigned(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for StorageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything needed to rehydrate a [`CertificateAuthority`]
pub struct StoredCa {
    pub id: StorageId,
    pub certificate_der: Vec<u8>,
    pub private_key: PKey<Private>,
    pub next_serial: BigNum,
}

impl fmt::Debug for StoredCa {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredCa")
            .field("id", &self.id)
            .field("certificate_der", &format_args!("{} bytes", self.certificate_der.len()))
            .field("private_key", &"<redacted>")
            .field("next_serial", &self.next_serial)
            .finish()
    }
}

/// Descriptive data persisted next to the CA for operators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaMetadata {
    pub name: String,
    pub subject: String,
    pub issuer: String,
    /// Serial number of the CA certificate, decimal
    pub serial_number: String,
    pub not_before: String,
    pub not_after: String,
}

impl CaMetadata {
    pub fn from_certificate(name: &str, certificate: &X509Ref) -> Result<Self, ErrorStack> {
        let serial = certificate.serial_number().to_bn()?;
        Ok(Self {
            name: name.to_string(),
            subject: format_x509_name(certificate.subject_name()),
            issuer: format_x509_name(certificate.issuer_name()),
            serial_number: serial.to_dec_str()?.to_string(),
            not_before: certificate.not_before().to_string(),
            not_after: certificate.not_after().to_string(),
        })
    }
}

/// Capability the certificate authority uses to load, persist and number
pub trait CaStorage: Send + Sync {
    /// Fetch the configured CA with its private key already decrypted
    ///
    /// A wrong password must surface as [`StorageError::DecryptionFailure`],
    /// distinct from [`StorageError::NotFound`].
    fn load_ca(&self) -> Result<StoredCa, StorageError>;

    /// Persist certificate, encrypted key, metadata and the initial counter
    ///
    /// Fails with [`StorageError::DuplicateName`] if the logical name is taken.
    fn store_ca(&self, ca: &CertificateAuthority) -> Result<StorageId, StorageError>;

    /// Atomically return the current counter value and advance it by one
    fn next_serial_number(&self) -> Result<BigNum, StorageError>;
}

struct MemoryRecord {
    id: StorageId,
    certificate_der: Vec<u8>,
    private_key_pem: String,
    next_serial: BigNum,
    metadata: CaMetadata,
}

/// In-memory [`CaStorage`] holding a single CA under a logical name
pub struct MemoryCaStorage {
    name: String,
    password: Option<SecretString>,
    record: Mutex<Option<MemoryRecord>>,
}

impl MemoryCaStorage {
    pub fn new(name: impl Into<String>, password: Option<SecretString>) -> Self {
        Self {
            name: name.into(),
            password,
            record: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metadata(&self) -> Result<Option<CaMetadata>, StorageError> {
        Ok(self.lock()?.as_ref().map(|record| record.metadata.clone()))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<MemoryRecord>>, StorageError> {
        self.record
            .lock()
            .map_err(|_| StorageError::Backend("memory storage lock poisoned".to_string()))
    }

    fn password(&self) -> Option<&[u8]> {
        self.password.as_ref().map(|p| p.expose_secret().as_bytes())
    }

    fn not_found(&self) -> StorageError {
        StorageError::NotFound {
            name: self.name.clone(),
        }
    }
}

impl fmt::Debug for MemoryCaStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCaStorage")
            .field("name", &self.name)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl CaStorage for MemoryCaStorage {
    fn load_ca(&self) -> Result<StoredCa, StorageError> {
        let guard = self.lock()?;
        let record = guard.as_ref().ok_or_else(|| self.not_found())?;
        let private_key = pem_utils::private_key_from_pem(&record.private_key_pem, self.password())?;
        Ok(StoredCa {
            id: record.id,
            certificate_der: record.certificate_der.clone(),
            private_key,
            next_serial: record.next_serial.to_owned().map_err(backend)?,
        })
    }

    fn store_ca(&self, ca: &CertificateAuthority) -> Result<StorageId, StorageError> {
        let mut guard = self.lock()?;
        if guard.is_some() {
            return Err(StorageError::DuplicateName {
                name: self.name.clone(),
            });
        }
        let material = ca.export_private_key_material(self.password())?;
        let metadata = CaMetadata::from_certificate(&self.name, ca.certificate()).map_err(backend)?;
        let id = StorageId::new(1);
        *guard = Some(MemoryRecord {
            id,
            certificate_der: ca.certificate_der().to_vec(),
            private_key_pem: material.private_key_pem,
            next_serial: BigNum::from_slice(&material.next_serial_number).map_err(backend)?,
            metadata,
        });
        Ok(id)
    }

    fn next_serial_number(&self) -> Result<BigNum, StorageError> {
        let mut guard = self.lock()?;
        let record = guard.as_mut().ok_or_else(|| self.not_found())?;
        let serial = record.next_serial.to_owned().map_err(backend)?;
        record.next_serial.add_word(1).map_err(backend)?;
        debug!(ca = %self.name, serial = %serial, "allocated serial number");
        Ok(serial)
    }
}

pub(crate) fn backend(err: ErrorStack) -> StorageError {
    StorageError::Backend(err.to_string())
}
