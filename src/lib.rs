//! PKI CA Core - Minimal Certificate Authority Library
//!
//! Creates a self-signed CA, issues TLS client and server certificates signed
//! by it, and keeps the CA key, certificate and serial counter in a pluggable
//! storage backend. Certificate subjects are given as RFC 1779 style
//! distinguished name text.
//!
//! # Overview
//!
//! ```text
//! "CN=www.example.org, O=Example"
//!   └── distinguished_name   text → RDN groups of attributes
//!       └── subject          attributes → canonical subject / X509Name
//!           └── certificate_authority   template, serial, signature
//!               └── ca_storage          load / store / next serial
//! ```
//!
//! # Serial numbers
//!
//! Serials are allocated by [`CaStorage::next_serial_number`], never by the
//! in-memory CA. Any number of threads may share one [`CertificateAuthority`],
//! and any number of processes may share one [`FileCaStorage`] directory,
//! without two certificates receiving the same serial.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use openssl::pkey::PKey;
//! use openssl::rsa::Rsa;
//! use pki_ca_core::{CaStorage, CertificateAuthority, FileCaStorage};
//!
//! fn main() -> anyhow::Result<()> {
//!     let storage: Arc<dyn CaStorage> = Arc::new(FileCaStorage::new("data/ca", "root", None)?);
//!     let key = PKey::from_rsa(Rsa::generate(4096)?)?;
//!     let mut ca = CertificateAuthority::create(storage, "CN=Root CA, O=Example", 20, &key, key.clone())?;
//!     ca.persist()?;
//!
//!     let client_key = PKey::from_rsa(Rsa::generate(2048)?)?;
//!     let client = ca.create_tls_client_certificate("CN=client-01, O=Example", &client_key)?;
//!     println!("{}", String::from_utf8(client.to_pem()?)?);
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`distinguished_name`]: DN text parser
//! - [`subject`]: mapping of DN attributes onto a certificate subject
//! - [`certificate_authority`]: CA creation, loading and issuance
//! - [`ca_storage`]: storage contract and in-memory backend
//! - [`file_storage`]: directory backend with locked serial allocation
//! - [`pem_utils`]: certificate and private key PEM encoding
//! - [`configs`]: TOML configuration for the `pki-ca` binary

pub mod ca_storage;
pub mod certificate_authority;
pub mod configs;
pub mod distinguished_name;
pub mod error;
pub mod file_storage;
pub mod pem_utils;
pub mod subject;

pub use ca_storage::{CaMetadata, CaStorage, MemoryCaStorage, StorageId, StoredCa};
pub use certificate_authority::{CertificateAuthority, PrivateKeyMaterial};
pub use distinguished_name::{
    parse_distinguished_name, Attribute, DistinguishedName, RelativeDistinguishedName,
};
pub use error::{
    CaError, DistinguishedNameError, EncodingError, MappingError, ParseError, StorageError,
};
pub use file_storage::FileCaStorage;
pub use subject::{ObjectIdentifier, Subject};
