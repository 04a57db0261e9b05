use anyhow::{anyhow, Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub authority: AuthorityConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    pub registration_authority: Option<RegistrationAuthorityConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthorityConfig {
    #[serde(default = "default_authority_name")]
    pub name: String,
    pub distinguished_name: String,
    #[serde(default = "default_validity_years")]
    pub validity_years: u32,
    #[serde(default = "default_authority_key_size")]
    pub key_size: u32,
}

fn default_authority_name() -> String {
    "bootstrap".to_string()
}

fn default_validity_years() -> u32 {
    20
}

fn default_authority_key_size() -> u32 {
    4096
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_storage_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_password_env")]
    pub password_env: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            directory: default_storage_directory(),
            password_env: default_password_env(),
        }
    }
}

fn default_storage_directory() -> PathBuf {
    PathBuf::from("data/ca")
}

fn default_password_env() -> String {
    "PKI_CA_KEY_PASSWORD".to_string()
}

impl StorageConfig {
    /// Key-encryption password from the configured environment variable
    ///
    /// Unset or empty means the CA key is stored unencrypted.
    pub fn password(&self) -> Result<Option<SecretString>> {
        match std::env::var(&self.password_env) {
            Ok(value) if value.is_empty() => Ok(None),
            Ok(value) => Ok(Some(SecretString::from(value))),
            Err(std::env::VarError::NotPresent) => Ok(None),
            Err(e) => Err(anyhow!("Invalid value in {}: {}", self.password_env, e)),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RegistrationAuthorityConfig {
    pub distinguished_name: String,
    #[serde(default = "default_ra_key_size")]
    pub key_size: u32,
    #[serde(default = "default_export_directory")]
    pub export_directory: PathBuf,
}

fn default_ra_key_size() -> u32 {
    2048
}

fn default_export_directory() -> PathBuf {
    PathBuf::from("exports")
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config_str = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: AppConfig =
            toml::from_str(&config_str).context("Failed to parse config file")?;

        Ok(config)
    }
}
