//! Secret resolution and the credential vault.
//!
//! Operator-supplied secrets (OAuth client secrets, the vault key) are
//! resolved from a direct value, a file, or an environment variable, in that
//! order. Per-account provider credentials are stored as opaque sealed blobs
//! produced by [`CredentialVault`].

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};
use std::fs;

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("No secret source provided (need one of: direct value, file path, or env var name)")]
    NoSourceProvided,

    #[error("Failed to read secret from file '{path}': {source}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Environment variable '{name}' not set")]
    EnvVarNotSet { name: String },

    #[error("Environment variable '{name}' contains invalid UTF-8")]
    EnvVarNotUnicode { name: String },

    #[error("Seal failed: {0}")]
    SealFailed(String),

    #[error("Open failed: {0}")]
    OpenFailed(String),

    #[error("Invalid vault key: {0}")]
    InvalidKey(String),

    #[error("Credential payload encoding error: {0}")]
    Encoding(String),
}

pub type Result<T> = std::result::Result<T, SecretError>;

/// Resolves a secret from a direct value, then a file, then an env var.
///
/// Empty strings count as "not provided" so YAML placeholders like
/// `client_secret: ""` fall through to the next source.
pub fn resolve_secret(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<SecretString> {
    if let Some(value) = direct.filter(|v| !v.is_empty()) {
        return Ok(SecretString::from(value.to_string()));
    }

    if let Some(path) = file_path.filter(|p| !p.is_empty()) {
        let expanded = expand_home(path);
        return fs::read_to_string(&expanded)
            .map(|content| SecretString::from(content.trim().to_string()))
            .map_err(|source| SecretError::FileReadError {
                path: expanded,
                source,
            });
    }

    if let Some(var_name) = env_var.filter(|n| !n.is_empty()) {
        return match std::env::var(var_name) {
            Ok(value) => Ok(SecretString::from(value.trim())),
            Err(std::env::VarError::NotPresent) => Err(SecretError::EnvVarNotSet {
                name: var_name.to_string(),
            }),
            Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::EnvVarNotUnicode {
                name: var_name.to_string(),
            }),
        };
    }

    Err(SecretError::NoSourceProvided)
}

/// Like [`resolve_secret`] but treats "no source configured" as `None`.
pub fn resolve_secret_optional(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<Option<SecretString>> {
    match resolve_secret(direct, file_path, env_var) {
        Ok(secret) => Ok(Some(secret)),
        Err(SecretError::NoSourceProvided) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Expands a leading `~` to the current user's home directory.
fn expand_home(path: &str) -> String {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            let home = home.to_string_lossy();
            if path == "~" {
                return home.into_owned();
            }
            return path.replacen('~', &home, 1);
        }
    }
    path.to_string()
}

/// Default env var holding the vault key.
pub const VAULT_KEY_ENV_VAR: &str = "MAILSORT_CREDENTIAL_KEY";

/// AES-GCM nonce size (96 bits).
const NONCE_SIZE: usize = 12;

/// Symmetric authenticated encryption for credential blobs.
///
/// The key is 32 bytes, supplied URL-safe base64 encoded (the same shape as a
/// Fernet key). Blobs are `base64(nonce || ciphertext)`.
pub struct CredentialVault {
    cipher: Aes256Gcm,
}

impl CredentialVault {
    /// Builds a vault from an already resolved key.
    pub fn from_secret(key: &SecretString) -> Result<Self> {
        Self::from_base64_key(key.expose_secret())
    }

    pub fn from_base64_key(key_b64: &str) -> Result<Self> {
        let key_bytes = URL_SAFE
            .decode(key_b64.trim())
            .or_else(|_| STANDARD.decode(key_b64.trim()))
            .map_err(|e| SecretError::InvalidKey(format!("Key is not valid base64: {}", e)))?;

        if key_bytes.len() != 32 {
            return Err(SecretError::InvalidKey(format!(
                "Key must decode to 32 bytes, got {}",
                key_bytes.len()
            )));
        }

        let cipher = Aes256Gcm::new_from_slice(&key_bytes)
            .map_err(|e| SecretError::InvalidKey(e.to_string()))?;
        Ok(Self { cipher })
    }

    /// Generates a fresh random key, URL-safe base64 encoded.
    pub fn generate_key() -> Result<String> {
        let key = rand_bytes::<32>()?;
        Ok(URL_SAFE.encode(key))
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<String> {
        let nonce_bytes = rand_bytes::<NONCE_SIZE>()?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| SecretError::SealFailed(e.to_string()))?;

        let mut combined = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend(ciphertext);
        Ok(STANDARD.encode(combined))
    }

    pub fn open(&self, blob: &str) -> Result<Vec<u8>> {
        let combined = STANDARD
            .decode(blob.trim())
            .map_err(|e| SecretError::OpenFailed(format!("Blob is not valid base64: {}", e)))?;

        if combined.len() <= NONCE_SIZE {
            return Err(SecretError::OpenFailed("Blob too short".to_string()));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
        self.cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| SecretError::OpenFailed(e.to_string()))
    }
}

fn rand_bytes<const N: usize>() -> Result<[u8; N]> {
    let mut bytes = [0u8; N];
    getrandom::fill(&mut bytes)
        .map_err(|e| SecretError::SealFailed(format!("Random source failed: {}", e)))?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    #[serial]
    fn test_direct_value_takes_priority() {
        std::env::set_var("MAILSORT_TEST_SECRET_1", "env_value");
        let result =
            resolve_secret(Some("direct_value"), None, Some("MAILSORT_TEST_SECRET_1")).unwrap();
        assert_eq!(result.expose_secret(), "direct_value");
        std::env::remove_var("MAILSORT_TEST_SECRET_1");
    }

    #[test]
    #[serial]
    fn test_file_takes_priority_over_env() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "file_value").unwrap();

        std::env::set_var("MAILSORT_TEST_SECRET_2", "env_value");
        let result = resolve_secret(
            None,
            Some(temp_file.path().to_str().unwrap()),
            Some("MAILSORT_TEST_SECRET_2"),
        )
        .unwrap();
        assert_eq!(result.expose_secret(), "file_value");
        std::env::remove_var("MAILSORT_TEST_SECRET_2");
    }

    #[test]
    #[serial]
    fn test_empty_strings_fall_through_to_env() {
        std::env::set_var("MAILSORT_TEST_SECRET_3", "  env_value\n");
        let result = resolve_secret(Some(""), Some(""), Some("MAILSORT_TEST_SECRET_3")).unwrap();
        assert_eq!(result.expose_secret(), "env_value");
        std::env::remove_var("MAILSORT_TEST_SECRET_3");
    }

    #[test]
    fn test_missing_sources() {
        assert!(matches!(
            resolve_secret(None, None, None),
            Err(SecretError::NoSourceProvided)
        ));
        assert!(matches!(
            resolve_secret(None, Some("/nonexistent/mailsort/secret"), None),
            Err(SecretError::FileReadError { .. })
        ));
        assert!(matches!(
            resolve_secret(None, None, Some("MAILSORT_DEFINITELY_UNSET_12345")),
            Err(SecretError::EnvVarNotSet { .. })
        ));
        assert!(resolve_secret_optional(None, None, None).unwrap().is_none());
    }

    const TEST_KEY: &str = "MDEyMzQ1Njc4OWFiY2RlZjAxMjM0NTY3ODlhYmNkZWY=";

    #[test]
    fn test_vault_seal_then_open() {
        let vault = CredentialVault::from_base64_key(TEST_KEY).unwrap();
        let blob = vault.seal(br#"{"kind":"password"}"#).unwrap();
        assert_eq!(vault.open(&blob).unwrap(), br#"{"kind":"password"}"#);
    }

    #[test]
    fn test_vault_nonce_differs_per_seal() {
        let vault = CredentialVault::from_base64_key(TEST_KEY).unwrap();
        let a = vault.seal(b"same").unwrap();
        let b = vault.seal(b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_vault_rejects_tampered_blob() {
        let vault = CredentialVault::from_base64_key(TEST_KEY).unwrap();
        let blob = vault.seal(b"secret").unwrap();
        let mut raw = STANDARD.decode(&blob).unwrap();
        if let Some(last) = raw.last_mut() {
            *last ^= 0xff;
        }
        let tampered = STANDARD.encode(raw);
        assert!(matches!(
            vault.open(&tampered),
            Err(SecretError::OpenFailed(_))
        ));
        assert!(matches!(vault.open("!!"), Err(SecretError::OpenFailed(_))));
        assert!(matches!(vault.open("AAAA"), Err(SecretError::OpenFailed(_))));
    }

    #[test]
    fn test_vault_key_validation() {
        assert!(matches!(
            CredentialVault::from_base64_key("c2hvcnQ="),
            Err(SecretError::InvalidKey(_))
        ));
        assert!(matches!(
            CredentialVault::from_base64_key("not base64 at all!"),
            Err(SecretError::InvalidKey(_))
        ));
        let generated = CredentialVault::generate_key().unwrap();
        assert!(CredentialVault::from_base64_key(&generated).is_ok());
    }

    #[test]
    fn test_vault_from_different_key_cannot_open() {
        let vault = CredentialVault::from_base64_key(TEST_KEY).unwrap();
        let other =
            CredentialVault::from_base64_key(&CredentialVault::generate_key().unwrap()).unwrap();
        let blob = vault.seal(b"secret").unwrap();
        assert!(other.open(&blob).is_err());
    }
}
