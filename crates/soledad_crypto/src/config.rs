//! Configuration for the key manager.

use std::path::{Path, PathBuf};

/// Default length of a generated secret, in characters.
pub const DEFAULT_SECRET_LENGTH: usize = 50;

/// Where the key manager keeps its files and how it generates secrets.
///
/// Built once per process and handed to [`crate::KeyManager::open`].
#[derive(Debug, Clone)]
pub struct SecretsConfig {
    /// Directory holding the keypair store and the encrypted secret.
    pub config_dir: PathBuf,
    /// Identity the keypair is bound to (e.g. `user@provider`).
    pub owner_id: String,
    /// Length of a newly generated secret.
    pub secret_length: usize,
    /// File name of the keypair store inside `config_dir`.
    pub identity_file: String,
    /// File name of the encrypted secret inside `config_dir`.
    pub secret_file: String,
}

impl SecretsConfig {
    /// Creates a configuration with default file names and secret length.
    pub fn new(config_dir: impl Into<PathBuf>, owner_id: impl Into<String>) -> Self {
        Self {
            config_dir: config_dir.into(),
            owner_id: owner_id.into(),
            secret_length: DEFAULT_SECRET_LENGTH,
            identity_file: "identity.json".into(),
            secret_file: "secret.asc".into(),
        }
    }

    /// Sets the length of newly generated secrets.
    pub fn with_secret_length(mut self, length: usize) -> Self {
        self.secret_length = length;
        self
    }

    /// Sets the keypair store file name.
    pub fn with_identity_file(mut self, name: impl Into<String>) -> Self {
        self.identity_file = name.into();
        self
    }

    /// Sets the encrypted secret file name.
    pub fn with_secret_file(mut self, name: impl Into<String>) -> Self {
        self.secret_file = name.into();
        self
    }

    /// Full path of the keypair store.
    pub fn identity_path(&self) -> PathBuf {
        self.config_dir.join(&self.identity_file)
    }

    /// Full path of the encrypted secret.
    pub fn secret_path(&self) -> PathBuf {
        self.config_dir.join(&self.secret_file)
    }

    /// Returns the configuration directory.
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secrets_config_builder() {
        let config = SecretsConfig::new("/var/lib/soledad", "user@example.org")
            .with_secret_length(64)
            .with_secret_file("storage_secret.asc");

        assert_eq!(config.secret_length, 64);
        assert_eq!(config.owner_id, "user@example.org");
        assert_eq!(
            config.secret_path(),
            PathBuf::from("/var/lib/soledad/storage_secret.asc")
        );
        assert_eq!(
            config.identity_path(),
            PathBuf::from("/var/lib/soledad/identity.json")
        );
    }

    #[test]
    fn default_secret_length() {
        let config = SecretsConfig::new("/tmp", "owner");
        assert_eq!(config.secret_length, DEFAULT_SECRET_LENGTH);
    }
}
