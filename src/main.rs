//! pki-ca - bootstrap a certificate authority
//!
//! Reads `config.toml` (or the path given as first argument), loads the CA from
//! its storage directory or creates and persists one, and optionally issues a
//! TLS client certificate for a registration authority.
//!
//! ```bash
//! PKI_CA_KEY_PASSWORD=secret ./target/release/pki-ca config.toml
//! ```
//!
//! Set `RUST_LOG=debug` to see every allocated serial number.

use anyhow::{Context, Result};
use openssl::pkey::PKey;
use openssl::rsa::Rsa;
use pki_ca_core::configs::{AppConfig, AuthorityConfig, RegistrationAuthorityConfig};
use pki_ca_core::{
    pem_utils, CaError, CaStorage, CertificateAuthority, FileCaStorage, StorageError,
};
use secrecy::{ExposeSecret, SecretString};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = "config.toml";

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = AppConfig::from_file(&config_path)?;
    let file_storage = FileCaStorage::new(
        &config.storage.directory,
        &config.authority.name,
        config.storage.password()?,
    )
    .with_context(|| {
        format!(
            "Failed to open CA storage at {}",
            config.storage.directory.display()
        )
    })?;
    let storage: Arc<dyn CaStorage> = Arc::new(file_storage);

    let ca = load_or_create(storage, &config.authority)?;
    info!(id = %ca.storage_id(), subject = %ca.subject_name(), "certificate authority ready");

    if let Some(ra) = &config.registration_authority {
        let password = config.storage.password()?;
        issue_registration_authority(&ca, ra, password.as_ref())?;
    }
    Ok(())
}

fn load_or_create(
    storage: Arc<dyn CaStorage>,
    authority: &AuthorityConfig,
) -> Result<CertificateAuthority> {
    match CertificateAuthority::load(Arc::clone(&storage)) {
        Ok(ca) => return Ok(ca),
        Err(CaError::Storage(StorageError::NotFound { .. })) => {}
        Err(e) => return Err(e).context("Failed to load certificate authority"),
    }

    info!(name = %authority.name, key_size = authority.key_size, "no CA in storage, generating one");
    let rsa = Rsa::generate(authority.key_size).context("Failed to generate RSA keypair")?;
    let private_key = PKey::from_rsa(rsa).context("Failed to create private key")?;
    let mut ca = CertificateAuthority::create(
        storage,
        &authority.distinguished_name,
        authority.validity_years,
        &private_key,
        private_key.clone(),
    )
    .context("Failed to create certificate authority")?;
    ca.persist()
        .context("Failed to persist certificate authority")?;
    Ok(ca)
}

fn issue_registration_authority(
    ca: &CertificateAuthority,
    ra: &RegistrationAuthorityConfig,
    password: Option<&SecretString>,
) -> Result<()> {
    let rsa = Rsa::generate(ra.key_size).context("Failed to generate RA keypair")?;
    let private_key = PKey::from_rsa(rsa).context("Failed to create RA private key")?;
    let certificate = ca
        .create_tls_client_certificate(&ra.distinguished_name, &private_key)
        .context("Failed to issue RA certificate")?;

    let certificate_der = certificate
        .to_der()
        .context("Failed to encode RA certificate")?;
    let key_pem = pem_utils::private_key_to_pem(
        &private_key,
        password.map(|p| p.expose_secret().as_bytes()),
    )
    .context("Failed to encode RA private key")?;

    fs::create_dir_all(&ra.export_directory).with_context(|| {
        format!(
            "Failed to create export directory {}",
            ra.export_directory.display()
        )
    })?;
    let cert_path = ra.export_directory.join("ra.crt");
    let key_path = ra.export_directory.join("ra.key");
    fs::write(&cert_path, pem_utils::certificate_to_pem(&certificate_der))
        .with_context(|| format!("Failed to write {}", cert_path.display()))?;
    write_key(&key_path, key_pem.as_bytes())?;

    let serial = certificate
        .serial_number()
        .to_bn()
        .context("Failed to read RA serial number")?;
    info!(
        serial = %serial,
        certificate = %cert_path.display(),
        "registration authority certificate issued"
    );
    Ok(())
}

fn write_key(path: &Path, contents: &[u8]) -> Result<()> {
    if path.exists() {
        fs::remove_file(path).context("Failed to remove existing RA key file")?;
    }
    fs::write(path, contents).with_context(|| format!("Failed to write {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}
