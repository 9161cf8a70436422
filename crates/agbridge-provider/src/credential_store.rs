//! Per-account encrypted credential files.
//!
//! Each account lives in `<config>/credentials/<sanitized-email>.json` as an
//! AES-256-GCM blob with the email bound as associated data, so a file copied
//! onto another account's name fails authentication. Any failure to decrypt
//! reads as "no credentials" and never falls back to other data.

use std::{
    path::{Path, PathBuf},
    sync::OnceLock,
};

use aes_gcm::{
    aead::{rand_core::RngCore as _, Aead, KeyInit, OsRng, Payload},
    Aes256Gcm,
};
use agbridge_core::{ensure_private_dir, write_private_atomic};
use anyhow::{anyhow, bail, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use zeroize::Zeroizing;

use crate::key_source::{KeySource, ResolvedKey, PBKDF2_ITERATIONS};
use crate::types::{
    EncryptedBlob, KeySourceKind, KeySourcePreference, OAuthCredentials, ENCRYPTION_ALGORITHM,
};

pub const CONFIG_DIR_ENV: &str = "AGBRIDGE_CONFIG_DIR";
pub const CREDENTIALS_DIR_NAME: &str = "credentials";
pub const ACTIVE_ACCOUNT_FILE_NAME: &str = "active_account";

const IV_BYTES: usize = 12;
const TAG_BYTES: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialStoreConfig {
    pub config_dir: PathBuf,
    pub key_preference: KeySourcePreference,
    pub pbkdf2_iterations: u32,
}

impl CredentialStoreConfig {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            key_preference: KeySourcePreference::Auto,
            pbkdf2_iterations: PBKDF2_ITERATIONS,
        }
    }
}

impl Default for CredentialStoreConfig {
    fn default() -> Self {
        Self::new(default_config_dir())
    }
}

/// `AGBRIDGE_CONFIG_DIR`, else the platform config directory joined with `agbridge`.
pub fn default_config_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV).filter(|dir| !dir.is_empty()) {
        return PathBuf::from(dir);
    }
    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("agbridge")
}

/// Maps an email to a file stem that is safe on every platform and reversible.
pub fn sanitize_account(email: &str) -> String {
    let mut sanitized = String::with_capacity(email.len());
    for (position, byte) in email.bytes().enumerate() {
        let keep = byte.is_ascii_alphanumeric()
            || matches!(byte, b'@' | b'_' | b'-' | b'+')
            || (byte == b'.' && position > 0);
        if keep {
            sanitized.push(char::from(byte));
        } else {
            sanitized.push_str(&format!("%{byte:02X}"));
        }
    }
    sanitized
}

pub fn unsanitize_account(stem: &str) -> Option<String> {
    let bytes = stem.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut index = 0;
    while index < bytes.len() {
        if bytes[index] == b'%' {
            let hex = stem.get(index + 1..index + 3)?;
            decoded.push(u8::from_str_radix(hex, 16).ok()?);
            index += 3;
        } else {
            decoded.push(bytes[index]);
            index += 1;
        }
    }
    String::from_utf8(decoded).ok()
}

#[derive(Debug)]
pub struct CredentialStore {
    config_dir: PathBuf,
    key_source: KeySource,
    key: OnceLock<ResolvedKey>,
}

impl CredentialStore {
    pub fn new(config: CredentialStoreConfig) -> Self {
        let key_source = KeySource::new(&config.config_dir, config.key_preference)
            .with_iterations(config.pbkdf2_iterations);
        Self::with_key_source(config.config_dir, key_source)
    }

    pub fn with_key_source(config_dir: impl Into<PathBuf>, key_source: KeySource) -> Self {
        Self {
            config_dir: config_dir.into(),
            key_source,
            key: OnceLock::new(),
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn credentials_dir(&self) -> PathBuf {
        self.config_dir.join(CREDENTIALS_DIR_NAME)
    }

    pub fn credential_path(&self, email: &str) -> PathBuf {
        self.credentials_dir()
            .join(format!("{}.json", sanitize_account(email)))
    }

    fn key(&self) -> Result<&ResolvedKey> {
        if let Some(key) = self.key.get() {
            return Ok(key);
        }
        let resolved = self.key_source.resolve()?;
        Ok(self.key.get_or_init(|| resolved))
    }

    /// Which key source backs the store.
    pub fn key_source_kind(&self) -> Result<KeySourceKind> {
        Ok(self.key()?.kind())
    }

    /// Encrypts and writes `credentials` for `email`, replacing any earlier file.
    pub fn store(&self, email: &str, credentials: &OAuthCredentials) -> Result<()> {
        if email.trim().is_empty() {
            bail!("account email must not be empty");
        }
        let plaintext = Zeroizing::new(
            serde_json::to_vec(credentials).context("failed to encode credentials")?,
        );
        let blob = encrypt_blob(self.key()?, email, &plaintext)?;
        let encoded =
            serde_json::to_vec_pretty(&blob).context("failed to encode credential file")?;

        ensure_private_dir(&self.config_dir)?;
        ensure_private_dir(&self.credentials_dir())?;
        let path = self.credential_path(email);
        write_private_atomic(&path, &encoded)
            .with_context(|| format!("failed to write credentials {}", path.display()))?;
        tracing::debug!(account = email, path = %path.display(), "stored credentials");
        Ok(())
    }

    /// Reads credentials for `email`. Any failure reads as absent.
    pub fn load(&self, email: &str) -> Option<OAuthCredentials> {
        let path = self.credential_path(email);
        if !path.exists() {
            return None;
        }
        match self.try_load(&path, email) {
            Ok(credentials) => Some(credentials),
            Err(error) => {
                tracing::warn!(
                    account = email,
                    path = %path.display(),
                    error = %error,
                    "stored credentials are unreadable; treating as signed out"
                );
                None
            }
        }
    }

    fn try_load(&self, path: &Path, email: &str) -> Result<OAuthCredentials> {
        let raw = std::fs::read(path)
            .with_context(|| format!("failed to read credentials {}", path.display()))?;
        let blob: EncryptedBlob = serde_json::from_slice(&raw)
            .with_context(|| format!("failed to parse credentials {}", path.display()))?;
        let plaintext = decrypt_blob(self.key()?, email, &blob)?;
        let credentials: OAuthCredentials = serde_json::from_slice(&plaintext)
            .context("decrypted credentials have an unexpected shape")?;
        if credentials.email != email {
            bail!("decrypted credentials belong to a different account");
        }
        Ok(credentials)
    }

    /// Removes the credential file. Returns whether one existed.
    pub fn delete(&self, email: &str) -> Result<bool> {
        let path = self.credential_path(email);
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(&path)
            .with_context(|| format!("failed to delete credentials {}", path.display()))?;
        if self.active_account().as_deref() == Some(email) {
            self.clear_active_account()?;
        }
        tracing::debug!(account = email, "deleted credentials");
        Ok(true)
    }

    /// Account emails with a credential file, sorted.
    pub fn accounts(&self) -> Result<Vec<String>> {
        let dir = self.credentials_dir();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut accounts = Vec::new();
        for entry in std::fs::read_dir(&dir)
            .with_context(|| format!("failed to list {}", dir.display()))?
        {
            let path = entry
                .with_context(|| format!("failed to list {}", dir.display()))?
                .path();
            let Some(stem) = path
                .file_name()
                .and_then(|name| name.to_str())
                .filter(|name| !name.starts_with('.'))
                .and_then(|name| name.strip_suffix(".json"))
            else {
                continue;
            };
            if let Some(email) = unsanitize_account(stem) {
                accounts.push(email);
            }
        }
        accounts.sort();
        Ok(accounts)
    }

    pub fn active_account(&self) -> Option<String> {
        let raw = std::fs::read_to_string(self.config_dir.join(ACTIVE_ACCOUNT_FILE_NAME)).ok()?;
        let email = raw.trim();
        (!email.is_empty()).then(|| email.to_string())
    }

    pub fn set_active_account(&self, email: &str) -> Result<()> {
        write_private_atomic(
            &self.config_dir.join(ACTIVE_ACCOUNT_FILE_NAME),
            format!("{email}\n").as_bytes(),
        )
    }

    pub fn clear_active_account(&self) -> Result<()> {
        let path = self.config_dir.join(ACTIVE_ACCOUNT_FILE_NAME);
        if path.exists() {
            std::fs::remove_file(&path)
                .with_context(|| format!("failed to remove {}", path.display()))?;
        }
        Ok(())
    }
}

fn cipher_for(key: &ResolvedKey) -> Result<Aes256Gcm> {
    Aes256Gcm::new_from_slice(key.material())
        .map_err(|_| anyhow!("credential key material has invalid length"))
}

fn encrypt_blob(key: &ResolvedKey, email: &str, plaintext: &[u8]) -> Result<EncryptedBlob> {
    let cipher = cipher_for(key)?;
    let mut iv = [0u8; IV_BYTES];
    OsRng.fill_bytes(&mut iv);
    let mut sealed = cipher
        .encrypt(
            (&iv).into(),
            Payload {
                msg: plaintext,
                aad: email.as_bytes(),
            },
        )
        .map_err(|_| anyhow!("credential encryption failed"))?;
    if sealed.len() < TAG_BYTES {
        bail!("credential ciphertext is truncated");
    }
    let tag = sealed.split_off(sealed.len() - TAG_BYTES);
    Ok(EncryptedBlob {
        iv: BASE64_STANDARD.encode(iv),
        auth_tag: BASE64_STANDARD.encode(tag),
        data: BASE64_STANDARD.encode(sealed),
        algorithm: ENCRYPTION_ALGORITHM.to_string(),
    })
}

fn decrypt_blob(
    key: &ResolvedKey,
    email: &str,
    blob: &EncryptedBlob,
) -> Result<Zeroizing<Vec<u8>>> {
    if blob.algorithm != ENCRYPTION_ALGORITHM {
        bail!("unsupported credential algorithm '{}'", blob.algorithm);
    }
    let decode = |field: &str, value: &str| {
        BASE64_STANDARD
            .decode(value)
            .map_err(|_| anyhow!("credential field '{field}' is not valid base64"))
    };
    let iv = decode("iv", &blob.iv)?;
    let tag = decode("authTag", &blob.auth_tag)?;
    let mut sealed = decode("data", &blob.data)?;
    if iv.len() != IV_BYTES {
        bail!("credential iv has {} bytes (expected {IV_BYTES})", iv.len());
    }
    if tag.len() != TAG_BYTES {
        bail!("credential tag has {} bytes (expected {TAG_BYTES})", tag.len());
    }
    sealed.extend_from_slice(&tag);

    let plaintext = cipher_for(key)?
        .decrypt(
            iv.as_slice().into(),
            Payload {
                msg: &sealed,
                aad: email.as_bytes(),
            },
        )
        .map_err(|_| anyhow!("credential integrity check failed"))?;
    Ok(Zeroizing::new(plaintext))
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
    use tempfile::tempdir;

    use super::{sanitize_account, unsanitize_account, CredentialStore};
    use crate::key_source::{tests::MemoryKeychain, KeySource};
    use crate::types::{EncryptedBlob, KeySourceKind, KeySourcePreference, OAuthCredentials};

    fn store_in(dir: &Path) -> CredentialStore {
        let key_source = KeySource::new(dir, KeySourcePreference::Derived).with_iterations(10);
        CredentialStore::with_key_source(dir, key_source)
    }

    fn sample(email: &str) -> OAuthCredentials {
        OAuthCredentials {
            access_token: "ya29.access".to_string(),
            refresh_token: Some("1//refresh".to_string()),
            expires_unix: 1_900_000_000,
            email: email.to_string(),
        }
    }

    #[test]
    fn functional_store_then_load_returns_equal_credentials() {
        let dir = tempdir().expect("tempdir");
        let store = store_in(dir.path());
        let credentials = sample("dev@example.com");
        store.store("dev@example.com", &credentials).expect("store");

        let raw = std::fs::read_to_string(store.credential_path("dev@example.com"))
            .expect("read file");
        assert!(!raw.contains("ya29.access"));
        let blob: EncryptedBlob = serde_json::from_str(&raw).expect("blob");
        assert_eq!(blob.algorithm, "aes-256-gcm");
        assert_eq!(BASE64_STANDARD.decode(&blob.iv).expect("iv").len(), 12);
        assert_eq!(BASE64_STANDARD.decode(&blob.auth_tag).expect("tag").len(), 16);

        let reopened = store_in(dir.path());
        assert_eq!(reopened.load("dev@example.com"), Some(credentials));
        assert_eq!(reopened.accounts().expect("accounts"), vec!["dev@example.com"]);
    }

    #[test]
    fn regression_tampered_ciphertext_reads_as_absent() {
        let dir = tempdir().expect("tempdir");
        let store = store_in(dir.path());
        store
            .store("dev@example.com", &sample("dev@example.com"))
            .expect("store");
        let path = store.credential_path("dev@example.com");
        let mut blob: EncryptedBlob =
            serde_json::from_slice(&std::fs::read(&path).expect("read")).expect("blob");
        let mut data = BASE64_STANDARD.decode(&blob.data).expect("data");
        data[0] ^= 0x01;
        blob.data = BASE64_STANDARD.encode(data);
        std::fs::write(&path, serde_json::to_vec(&blob).expect("encode")).expect("write");

        assert_eq!(store.load("dev@example.com"), None);
    }

    #[test]
    fn regression_file_moved_to_other_account_fails_closed() {
        let dir = tempdir().expect("tempdir");
        let store = store_in(dir.path());
        store
            .store("alice@example.com", &sample("alice@example.com"))
            .expect("store");
        std::fs::copy(
            store.credential_path("alice@example.com"),
            store.credential_path("mallory@example.com"),
        )
        .expect("copy");
        assert_eq!(store.load("mallory@example.com"), None);
    }

    #[test]
    fn unit_unknown_algorithm_and_garbage_read_as_absent() {
        let dir = tempdir().expect("tempdir");
        let store = store_in(dir.path());
        store
            .store("dev@example.com", &sample("dev@example.com"))
            .expect("store");
        let path = store.credential_path("dev@example.com");
        let mut blob: EncryptedBlob =
            serde_json::from_slice(&std::fs::read(&path).expect("read")).expect("blob");
        blob.algorithm = "aes-128-cbc".to_string();
        std::fs::write(&path, serde_json::to_vec(&blob).expect("encode")).expect("write");
        assert_eq!(store.load("dev@example.com"), None);

        std::fs::write(&path, "not json").expect("write");
        assert_eq!(store.load("dev@example.com"), None);
        assert_eq!(store.load("nobody@example.com"), None);
    }

    #[test]
    fn functional_delete_removes_file_and_active_account() {
        let dir = tempdir().expect("tempdir");
        let store = store_in(dir.path());
        store
            .store("dev@example.com", &sample("dev@example.com"))
            .expect("store");
        store.set_active_account("dev@example.com").expect("active");
        assert_eq!(store.active_account().as_deref(), Some("dev@example.com"));

        assert!(store.delete("dev@example.com").expect("delete"));
        assert!(!store.delete("dev@example.com").expect("second delete"));
        assert_eq!(store.load("dev@example.com"), None);
        assert_eq!(store.active_account(), None);
        assert!(store.accounts().expect("accounts").is_empty());
    }

    #[test]
    fn unit_keychain_backed_store_reports_source() {
        let dir = tempdir().expect("tempdir");
        let key_source = KeySource::new(dir.path(), KeySourcePreference::Auto)
            .with_keychain(Some(Box::new(MemoryKeychain::default())));
        let store = CredentialStore::with_key_source(dir.path(), key_source);
        store
            .store("dev@example.com", &sample("dev@example.com"))
            .expect("store");
        assert_eq!(store.key_source_kind().expect("kind"), KeySourceKind::Keychain);
        assert!(store.load("dev@example.com").is_some());
    }

    #[cfg(unix)]
    #[test]
    fn unit_credential_file_and_directory_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().expect("tempdir");
        let store = store_in(dir.path());
        store
            .store("dev@example.com", &sample("dev@example.com"))
            .expect("store");
        let file_mode = std::fs::metadata(store.credential_path("dev@example.com"))
            .expect("file metadata")
            .permissions()
            .mode();
        let dir_mode = std::fs::metadata(store.credentials_dir())
            .expect("dir metadata")
            .permissions()
            .mode();
        assert_eq!(file_mode & 0o777, 0o600);
        assert_eq!(dir_mode & 0o777, 0o700);
    }

    #[test]
    fn unit_account_names_round_trip_through_file_stems() {
        for email in [
            "dev@example.com",
            "a/b@example.com",
            ".hidden@example.com",
            "ünï@example.com",
        ] {
            let stem = sanitize_account(email);
            assert!(!stem.contains('/'));
            assert!(!stem.starts_with('.'));
            assert_eq!(unsanitize_account(&stem).as_deref(), Some(email));
        }
    }
}
