//! Directory-backed CA storage
//!
//! Each CA lives in its own directory under the storage root:
//!
//! ```text
//! <root>/
//!   .next-id          next storage identifier, decimal
//!   <name>/
//!     ca.crt          CA certificate, PEM
//!     ca.key          PKCS#8 PEM, encrypted when a password is configured (0600)
//!     metadata.toml   identifier plus subject, issuer and validity for operators
//!     serial          next unused serial number, decimal
//! ```
//!
//! A CA is written into a hidden staging directory under `root` and renamed
//! into place once every file is synced, so `<name>/` is either complete or
//! absent. A directory left behind without a `serial` file, e.g. by an older
//! writer, is treated as absent and replaced on the next store.
//!
//! Serial allocation holds an exclusive OS lock on `serial` for the whole
//! read-increment-write-sync sequence, so several processes may issue from the
//! same directory without handing out a serial twice. Storage identifiers are
//! allocated the same way from `.next-id`.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use openssl::bn::BigNum;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::ca_storage::{backend, CaMetadata, CaStorage, StorageId, StoredCa};
use crate::certificate_authority::CertificateAuthority;
use crate::error::StorageError;
use crate::pem_utils;

const CERTIFICATE_FILE: &str = "ca.crt";
const PRIVATE_KEY_FILE: &str = "ca.key";
const METADATA_FILE: &str = "metadata.toml";
const SERIAL_FILE: &str = "serial";
const ID_COUNTER_FILE: &str = ".next-id";
const FIRST_STORAGE_ID: u64 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct MetadataFile {
    id: u64,
    #[serde(flatten)]
    metadata: CaMetadata,
}

/// [`CaStorage`] keeping one named CA in a directory under `root`
pub struct FileCaStorage {
    root: PathBuf,
    name: String,
    password: Option<SecretString>,
}

impl FileCaStorage {
    /// Open the storage root, creating it if needed
    ///
    /// Names starting with `.` are reserved for the storage's own files.
    pub fn new(
        root: impl Into<PathBuf>,
        name: impl Into<String>,
        password: Option<SecretString>,
    ) -> Result<Self, StorageError> {
        let root = root.into();
        let name = name.into();
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(StorageError::Backend(format!("invalid CA name '{}'", name)));
        }
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            name,
            password,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Directory holding this CA's files
    pub fn ca_directory(&self) -> PathBuf {
        self.root.join(&self.name)
    }

    pub fn contains_ca(&self) -> bool {
        self.ca_directory().join(SERIAL_FILE).is_file()
    }

    pub fn metadata(&self) -> Result<CaMetadata, StorageError> {
        Ok(self.read_metadata()?.metadata)
    }

    fn password(&self) -> Option<&[u8]> {
        self.password.as_ref().map(|p| p.expose_secret().as_bytes())
    }

    fn not_found(&self) -> StorageError {
        StorageError::NotFound {
            name: self.name.clone(),
        }
    }

    fn read_file(&self, file: &str) -> Result<String, StorageError> {
        fs::read_to_string(self.ca_directory().join(file)).map_err(|e| self.missing_or_io(e))
    }

    fn missing_or_io(&self, err: io::Error) -> StorageError {
        if err.kind() == io::ErrorKind::NotFound {
            self.not_found()
        } else {
            StorageError::Io(err)
        }
    }

    fn read_metadata(&self) -> Result<MetadataFile, StorageError> {
        let text = self.read_file(METADATA_FILE)?;
        toml::from_str(&text).map_err(|e| StorageError::Corrupted {
            reason: format!("{}: {}", METADATA_FILE, e),
        })
    }

    fn open_serial(&self) -> Result<File, StorageError> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .open(self.ca_directory().join(SERIAL_FILE))
            .map_err(|e| self.missing_or_io(e))
    }

    fn next_storage_id(&self) -> Result<StorageId, StorageError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.root.join(ID_COUNTER_FILE))?;
        file.lock()?;
        let allocated = allocate_id(&mut file);
        file.unlock()?;
        Ok(StorageId::new(allocated?))
    }

    // Fails with DuplicateName when a complete CA already holds the name; an
    // incomplete directory is removed so the store can proceed.
    fn claim_name(&self) -> Result<(), StorageError> {
        let directory = self.ca_directory();
        if self.contains_ca() {
            return Err(self.duplicate());
        }
        if directory.exists() {
            warn!(directory = %directory.display(), "removing incomplete CA directory");
            fs::remove_dir_all(&directory)?;
        }
        Ok(())
    }

    fn duplicate(&self) -> StorageError {
        StorageError::DuplicateName {
            name: self.name.clone(),
        }
    }
}

impl std::fmt::Debug for FileCaStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileCaStorage")
            .field("root", &self.root)
            .field("name", &self.name)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl CaStorage for FileCaStorage {
    fn load_ca(&self) -> Result<StoredCa, StorageError> {
        if !self.contains_ca() {
            return Err(self.not_found());
        }
        let metadata = self.read_metadata()?;
        let certificate_der = pem_utils::certificate_from_pem(&self.read_file(CERTIFICATE_FILE)?)?;
        let private_key =
            pem_utils::private_key_from_pem(&self.read_file(PRIVATE_KEY_FILE)?, self.password())?;

        let mut serial_file = self.open_serial()?;
        serial_file.lock_shared()?;
        let next_serial = read_serial(&mut serial_file);
        serial_file.unlock()?;

        Ok(StoredCa {
            id: StorageId::new(metadata.id),
            certificate_der,
            private_key,
            next_serial: next_serial?,
        })
    }

    fn store_ca(&self, ca: &CertificateAuthority) -> Result<StorageId, StorageError> {
        let directory = self.ca_directory();
        self.claim_name()?;

        let material = ca.export_private_key_material(self.password())?;
        let id = self.next_storage_id()?;
        let metadata = MetadataFile {
            id: id.value(),
            metadata: CaMetadata::from_certificate(&self.name, ca.certificate()).map_err(backend)?,
        };
        let metadata = toml::to_string(&metadata)
            .map_err(|e| StorageError::Backend(format!("failed to encode metadata: {}", e)))?;
        let next_serial = BigNum::from_slice(&material.next_serial_number).map_err(backend)?;

        // Removed on drop if anything below fails
        let staging = tempfile::Builder::new()
            .prefix(&format!(".{}.staging-", self.name))
            .tempdir_in(&self.root)?;
        stage(&staging, ca, &material.private_key_pem, &metadata, &next_serial)?;

        match fs::rename(staging.path(), &directory) {
            Ok(()) => {}
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::AlreadyExists | io::ErrorKind::DirectoryNotEmpty
                ) =>
            {
                return Err(self.duplicate());
            }
            Err(e) => return Err(e.into()),
        }
        sync_directory(&self.root)?;

        info!(name = %self.name, id = %id, directory = %directory.display(), "stored certificate authority");
        Ok(id)
    }

    fn next_serial_number(&self) -> Result<BigNum, StorageError> {
        let mut file = self.open_serial()?;
        file.lock()?;
        let allocated = allocate(&mut file);
        file.unlock()?;
        let serial = allocated?;
        debug!(ca = %self.name, serial = %serial, "allocated serial number");
        Ok(serial)
    }
}

fn stage(
    staging: &TempDir,
    ca: &CertificateAuthority,
    private_key_pem: &str,
    metadata: &str,
    next_serial: &BigNum,
) -> Result<(), StorageError> {
    let dir = staging.path();
    write_synced(&dir.join(CERTIFICATE_FILE), ca.certificate_pem().as_bytes())?;
    write_private(&dir.join(PRIVATE_KEY_FILE), private_key_pem.as_bytes())?;
    write_synced(&dir.join(METADATA_FILE), metadata.as_bytes())?;
    write_synced(&dir.join(SERIAL_FILE), serial_text(next_serial)?.as_bytes())?;
    sync_directory(dir)
}

// Caller holds the exclusive lock.
fn allocate_id(file: &mut File) -> Result<u64, StorageError> {
    let mut text = String::new();
    file.seek(SeekFrom::Start(0))?;
    file.read_to_string(&mut text)?;
    let text = text.trim();
    let id = if text.is_empty() {
        FIRST_STORAGE_ID
    } else {
        text.parse::<u64>().map_err(|_| StorageError::Corrupted {
            reason: format!("{} does not hold a decimal number", ID_COUNTER_FILE),
        })?
    };
    let next = id.checked_add(1).ok_or_else(|| StorageError::Corrupted {
        reason: format!("{} is exhausted", ID_COUNTER_FILE),
    })?;
    file.seek(SeekFrom::Start(0))?;
    file.set_len(0)?;
    writeln!(file, "{}", next)?;
    file.sync_all()?;
    Ok(id)
}

// Caller holds the exclusive lock.
fn allocate(file: &mut File) -> Result<BigNum, StorageError> {
    let serial = read_serial(file)?;
    let mut next = serial.to_owned().map_err(backend)?;
    next.add_word(1).map_err(backend)?;
    file.seek(SeekFrom::Start(0))?;
    file.set_len(0)?;
    file.write_all(serial_text(&next)?.as_bytes())?;
    file.sync_all()?;
    Ok(serial)
}

fn read_serial(file: &mut File) -> Result<BigNum, StorageError> {
    let mut text = String::new();
    file.seek(SeekFrom::Start(0))?;
    file.read_to_string(&mut text)?;
    let text = text.trim();
    if text.is_empty() || !text.bytes().all(|c| c.is_ascii_digit()) {
        return Err(StorageError::Corrupted {
            reason: format!("{} does not hold a decimal number", SERIAL_FILE),
        });
    }
    BigNum::from_dec_str(text).map_err(backend)
}

fn serial_text(serial: &BigNum) -> Result<String, StorageError> {
    Ok(format!("{}\n", serial.to_dec_str().map_err(backend)?))
}

fn write_synced(path: &Path, contents: &[u8]) -> Result<(), StorageError> {
    let mut file = File::create(path)?;
    file.write_all(contents)?;
    file.sync_all()?;
    Ok(())
}

#[cfg(unix)]
fn sync_directory(path: &Path) -> Result<(), StorageError> {
    File::open(path)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_directory(_path: &Path) -> Result<(), StorageError> {
    Ok(())
}

fn write_private(path: &Path, contents: &[u8]) -> Result<(), StorageError> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.sync_all()?;
    Ok(())
}
