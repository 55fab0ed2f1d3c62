//! Encryption at rest for `Password` fields.
//!
//! Secrets are stored as Fernet tokens; the record itself only ever carries
//! a mask of the same length.

use base64::Engine;
use fernet::Fernet;
use std::{fs, path::Path, sync::Arc};
use tracing::{info, warn};

use crate::config::EncryptionConfig;
use crate::error::SettingsError;

const MASK_CHAR: char = '*';

/// Placeholder shown instead of a stored secret.
pub fn mask(secret: &str) -> String {
    MASK_CHAR.to_string().repeat(secret.chars().count().max(1))
}

/// True for a non-empty string of mask characters only.
pub fn is_mask(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| c == MASK_CHAR)
}

#[derive(Clone)]
pub struct SecretCipher {
    fernet: Arc<Fernet>,
}

impl SecretCipher {
    /// Build from a URL-safe base64 encoded 32-byte key.
    pub fn new(key: &str) -> Result<Self, SettingsError> {
        let key = key.trim();
        let raw = base64::engine::general_purpose::URL_SAFE
            .decode(key)
            .map_err(|e| SettingsError::Crypto(format!("encryption key is not base64: {e}")))?;
        if raw.len() != 32 {
            return Err(SettingsError::Crypto(format!(
                "encryption key must decode to 32 bytes, got {}",
                raw.len()
            )));
        }
        let fernet = Fernet::new(key)
            .ok_or_else(|| SettingsError::Crypto("invalid encryption key".to_string()))?;
        Ok(Self {
            fernet: Arc::new(fernet),
        })
    }

    pub fn generate() -> Result<Self, SettingsError> {
        Self::new(&Fernet::generate_key())
    }

    /// Key from config, else from the key file, else a new key written to
    /// the key file.
    pub fn load_or_create(cfg: &EncryptionConfig) -> Result<Self, SettingsError> {
        if let Some(key) = cfg.key.as_deref().filter(|k| !k.trim().is_empty()) {
            return Self::new(key);
        }

        let path = cfg.key_file.as_path();
        if path.exists() {
            info!(path = %path.display(), "loading encryption key from file");
            return Self::new(&fs::read_to_string(path)?);
        }

        warn!(
            path = %path.display(),
            "no encryption key configured; generating a new one"
        );
        let key = Fernet::generate_key();
        write_key_file(path, &key)?;
        Self::new(&key)
    }

    pub fn encrypt(&self, plaintext: &str) -> String {
        self.fernet.encrypt(plaintext.as_bytes())
    }

    pub fn decrypt(&self, token: &str) -> Result<String, SettingsError> {
        let bytes = self.fernet.decrypt(token).map_err(|_| {
            SettingsError::Crypto(
                "stored secret cannot be decrypted with the configured key".to_string(),
            )
        })?;
        String::from_utf8(bytes)
            .map_err(|e| SettingsError::Crypto(format!("stored secret is not UTF-8: {e}")))
    }
}

fn write_key_file(path: &Path, key: &str) -> Result<(), SettingsError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, key)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    #[test]
    fn encrypts_and_decrypts() {
        let cipher = SecretCipher::generate().unwrap();
        let token = cipher.encrypt("tok-123");
        assert_ne!(token, "tok-123");
        assert_eq!(cipher.decrypt(&token).unwrap(), "tok-123");
    }

    #[test]
    fn wrong_key_fails_loudly() {
        let token = SecretCipher::generate().unwrap().encrypt("tok-123");
        let other = SecretCipher::generate().unwrap();
        assert!(matches!(other.decrypt(&token), Err(SettingsError::Crypto(_))));
    }

    #[test]
    fn rejects_short_keys() {
        assert!(matches!(SecretCipher::new("c2hvcnQ="), Err(SettingsError::Crypto(_))));
        assert!(matches!(SecretCipher::new("%%%"), Err(SettingsError::Crypto(_))));
    }

    #[test]
    fn masks() {
        assert_eq!(mask("abc"), "***");
        assert!(is_mask("***"));
        assert!(!is_mask(""));
        assert!(!is_mask("a**"));
    }

    #[test]
    fn key_file_is_created_once_and_reused() {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time before UNIX_EPOCH")
            .as_nanos();
        let mut dir = std::env::temp_dir();
        dir.push(format!("banking-settings-key-{}-{}", std::process::id(), nanos));
        let cfg = EncryptionConfig {
            key: None,
            key_file: dir.join("encryption.key"),
        };

        let first = SecretCipher::load_or_create(&cfg).unwrap();
        let token = first.encrypt("persisted");
        let second = SecretCipher::load_or_create(&cfg).unwrap();
        assert_eq!(second.decrypt(&token).unwrap(), "persisted");

        let _ = fs::remove_dir_all(&dir);
    }
}
