//! Encryption key resolution for the credential store.
//!
//! The preferred source is a random 256-bit key held by the platform secret
//! store: the macOS Keychain and the Windows Credential Manager through their
//! native APIs, and the Secret Service on Linux through `secret-tool`, which
//! takes the secret on stdin. The secret never appears on a command line. When
//! no secret store is usable the key is derived with PBKDF2-HMAC-SHA256 from
//! the machine identifier and a per-installation salt recorded in
//! `keyinfo.json`. The source that was first used is recorded too, so later
//! runs keep decrypting with the same key.

use std::{
    fmt,
    io::Write,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    time::Duration,
};

use aes_gcm::aead::{rand_core::RngCore as _, OsRng};
use agbridge_core::write_private_atomic;
use anyhow::{anyhow, bail, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use wait_timeout::ChildExt;
use zeroize::Zeroizing;

use crate::types::{KeySourceKind, KeySourcePreference};

pub const KEYCHAIN_SERVICE: &str = "agbridge";
pub const KEYCHAIN_ACCOUNT: &str = "credential-store-key";
pub const PBKDF2_ITERATIONS: u32 = 600_000;
pub const KEYINFO_FILE_NAME: &str = "keyinfo.json";

const KEY_BYTES: usize = 32;
const SALT_BYTES: usize = 16;
const PLATFORM_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);
const MACHINE_KEY_CONTEXT: &str = "agbridge-credential-store-machine-key-v2";
const MACHINE_ID_CANDIDATE_PATHS: [&str; 2] = ["/etc/machine-id", "/var/lib/dbus/machine-id"];
const WINDOWS_CRYPTOGRAPHY_KEY: &str = r"HKLM\SOFTWARE\Microsoft\Cryptography";

/// A place that can hold the store key as a base64 string.
pub trait SecretBackend: Send + Sync {
    fn name(&self) -> &'static str;
    fn read_secret(&self) -> Result<Option<Zeroizing<String>>>;
    fn write_secret(&self, secret: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Platform secret store for the running OS.
pub enum PlatformKeychain {
    MacKeychain,
    WindowsCredentialManager,
    LinuxSecretTool,
}

impl PlatformKeychain {
    /// Returns the secret store for the running OS when it is reachable.
    pub fn detect() -> Option<Self> {
        match std::env::consts::OS {
            "macos" => Some(Self::MacKeychain),
            "windows" => Some(Self::WindowsCredentialManager),
            "linux" if is_executable_available("secret-tool") => Some(Self::LinuxSecretTool),
            _ => None,
        }
    }
}

impl SecretBackend for PlatformKeychain {
    fn name(&self) -> &'static str {
        match self {
            Self::MacKeychain => "macos-keychain",
            Self::WindowsCredentialManager => "windows-credential-manager",
            Self::LinuxSecretTool => "secret-tool",
        }
    }

    fn read_secret(&self) -> Result<Option<Zeroizing<String>>> {
        match self {
            Self::MacKeychain | Self::WindowsCredentialManager => native_store::read_secret(),
            Self::LinuxSecretTool => {
                let output = run_platform_command(
                    "secret-tool",
                    &[
                        "lookup",
                        "service",
                        KEYCHAIN_SERVICE,
                        "account",
                        KEYCHAIN_ACCOUNT,
                    ],
                    None,
                )?;
                if !output.success {
                    return Ok(None);
                }
                Ok(non_blank_secret(&output.stdout))
            }
        }
    }

    fn write_secret(&self, secret: &str) -> Result<()> {
        match self {
            Self::MacKeychain | Self::WindowsCredentialManager => {
                native_store::write_secret(secret)
            }
            Self::LinuxSecretTool => {
                let output = run_platform_command(
                    "secret-tool",
                    &[
                        "store",
                        "--label=agbridge credential store key",
                        "service",
                        KEYCHAIN_SERVICE,
                        "account",
                        KEYCHAIN_ACCOUNT,
                    ],
                    Some(secret),
                )?;
                if !output.success {
                    bail!("secret-tool refused to store the credential key");
                }
                Ok(())
            }
        }
    }
}

fn non_blank_secret(raw: &str) -> Option<Zeroizing<String>> {
    let secret = raw.trim();
    (!secret.is_empty()).then(|| Zeroizing::new(secret.to_string()))
}

#[cfg(any(target_os = "macos", target_os = "windows"))]
mod native_store {
    use anyhow::{Context, Result};
    use zeroize::Zeroizing;

    use super::{non_blank_secret, KEYCHAIN_ACCOUNT, KEYCHAIN_SERVICE};

    fn entry() -> Result<keyring::Entry> {
        keyring::Entry::new(KEYCHAIN_SERVICE, KEYCHAIN_ACCOUNT)
            .context("failed to open the platform credential entry")
    }

    pub(super) fn read_secret() -> Result<Option<Zeroizing<String>>> {
        match entry()?.get_password() {
            Ok(secret) => Ok(non_blank_secret(&Zeroizing::new(secret))),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(error) => {
                Err(anyhow::Error::new(error).context("failed to read the credential key"))
            }
        }
    }

    pub(super) fn write_secret(secret: &str) -> Result<()> {
        entry()?
            .set_password(secret)
            .context("failed to store the credential key")
    }
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
mod native_store {
    use anyhow::{bail, Result};
    use zeroize::Zeroizing;

    pub(super) fn read_secret() -> Result<Option<Zeroizing<String>>> {
        bail!("the native secret store is not available on this platform")
    }

    pub(super) fn write_secret(_secret: &str) -> Result<()> {
        bail!("the native secret store is not available on this platform")
    }
}

struct PlatformOutput {
    success: bool,
    stdout: Zeroizing<String>,
}

/// Runs a platform client with a bounded wait. `stdin` is written to a pipe.
fn run_platform_command(
    program: &str,
    args: &[&str],
    stdin: Option<&str>,
) -> Result<PlatformOutput> {
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::null());
    let mut child = command
        .spawn()
        .with_context(|| format!("failed to spawn {program}"))?;

    if let Some(secret) = stdin {
        let pipe = child
            .stdin
            .as_mut()
            .ok_or_else(|| anyhow!("failed to open {program} stdin"))?;
        pipe.write_all(secret.as_bytes())
            .with_context(|| format!("failed to write to {program} stdin"))?;
    }
    child.stdin.take();

    if child
        .wait_timeout(PLATFORM_COMMAND_TIMEOUT)
        .with_context(|| format!("failed while waiting for {program}"))?
        .is_none()
    {
        let _ = child.kill();
        let _ = child.wait();
        bail!(
            "{program} timed out after {} ms",
            PLATFORM_COMMAND_TIMEOUT.as_millis()
        );
    }
    let output = child
        .wait_with_output()
        .with_context(|| format!("failed to collect {program} output"))?;
    let stdout = Zeroizing::new(String::from_utf8_lossy(&output.stdout).into_owned());
    Ok(PlatformOutput {
        success: output.status.success(),
        stdout,
    })
}

/// Returns true when `executable` resolves to an executable file.
pub fn is_executable_available(executable: &str) -> bool {
    let trimmed = executable.trim();
    if trimmed.is_empty() {
        return false;
    }
    let candidate = Path::new(trimmed);
    if candidate.is_absolute() || trimmed.contains(std::path::MAIN_SEPARATOR) {
        return is_executable_file(candidate);
    }
    let Some(path_var) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&path_var).any(|dir| is_executable_file(&dir.join(trimmed)))
}

fn is_executable_file(path: &Path) -> bool {
    let Ok(metadata) = std::fs::metadata(path) else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct KeyInfo {
    source: KeySourceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    salt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    iterations: Option<u32>,
}

/// A resolved 256-bit key. Zeroed on drop.
pub struct ResolvedKey {
    material: Zeroizing<[u8; KEY_BYTES]>,
    kind: KeySourceKind,
}

impl ResolvedKey {
    pub fn kind(&self) -> KeySourceKind {
        self.kind
    }

    pub fn material(&self) -> &[u8; KEY_BYTES] {
        &self.material
    }
}

impl fmt::Debug for ResolvedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedKey")
            .field("material", &"[REDACTED]")
            .field("kind", &self.kind)
            .finish()
    }
}

pub struct KeySource {
    config_dir: PathBuf,
    preference: KeySourcePreference,
    iterations: u32,
    keychain: Option<Box<dyn SecretBackend>>,
}

impl fmt::Debug for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeySource")
            .field("config_dir", &self.config_dir)
            .field("preference", &self.preference)
            .field("iterations", &self.iterations)
            .field("keychain", &self.keychain.as_ref().map(|backend| backend.name()))
            .finish()
    }
}

impl KeySource {
    pub fn new(config_dir: impl Into<PathBuf>, preference: KeySourcePreference) -> Self {
        let keychain = match preference {
            KeySourcePreference::Derived => None,
            _ => PlatformKeychain::detect()
                .map(|keychain| Box::new(keychain) as Box<dyn SecretBackend>),
        };
        Self {
            config_dir: config_dir.into(),
            preference,
            iterations: PBKDF2_ITERATIONS,
            keychain,
        }
    }

    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations.max(1);
        self
    }

    pub fn with_keychain(mut self, keychain: Option<Box<dyn SecretBackend>>) -> Self {
        self.keychain = keychain;
        self
    }

    pub fn preference(&self) -> KeySourcePreference {
        self.preference
    }

    pub fn keyinfo_path(&self) -> PathBuf {
        self.config_dir.join(KEYINFO_FILE_NAME)
    }

    /// Resolves the store key according to the preference and the recorded source.
    pub fn resolve(&self) -> Result<ResolvedKey> {
        let recorded = self.read_keyinfo()?;
        match self.preference {
            KeySourcePreference::Derived => self.derived_key(recorded.as_ref()),
            KeySourcePreference::Keychain => self.keychain_key(recorded.as_ref()),
            KeySourcePreference::Auto => {
                if let Some(info) = recorded
                    .as_ref()
                    .filter(|info| info.source == KeySourceKind::Derived)
                {
                    return self.derived_key(Some(info));
                }
                match self.keychain_key(recorded.as_ref()) {
                    Ok(key) => Ok(key),
                    Err(error) => {
                        tracing::warn!(
                            %error,
                            "platform secret store unavailable; deriving credential key from machine identity"
                        );
                        self.derived_key(None)
                    }
                }
            }
        }
    }

    fn keychain_key(&self, recorded: Option<&KeyInfo>) -> Result<ResolvedKey> {
        let backend = self
            .keychain
            .as_deref()
            .ok_or_else(|| anyhow!("no platform secret store is available"))?;
        let encoded = match backend.read_secret()? {
            Some(secret) => secret,
            None => {
                let mut fresh = Zeroizing::new([0u8; KEY_BYTES]);
                OsRng.fill_bytes(&mut fresh[..]);
                let encoded = Zeroizing::new(BASE64_STANDARD.encode(&fresh[..]));
                backend.write_secret(&encoded)?;
                tracing::debug!(backend = backend.name(), "stored new credential key");
                encoded
            }
        };
        let decoded = Zeroizing::new(
            BASE64_STANDARD
                .decode(encoded.as_bytes())
                .map_err(|_| anyhow!("credential key in {} is not valid base64", backend.name()))?,
        );
        if decoded.len() != KEY_BYTES {
            bail!(
                "credential key in {} has {} bytes (expected {KEY_BYTES})",
                backend.name(),
                decoded.len()
            );
        }
        let mut material = Zeroizing::new([0u8; KEY_BYTES]);
        material.copy_from_slice(&decoded);

        if recorded.map(|info| info.source) != Some(KeySourceKind::Keychain) {
            self.write_keyinfo(&KeyInfo {
                source: KeySourceKind::Keychain,
                salt: None,
                iterations: None,
            })?;
        }
        Ok(ResolvedKey {
            material,
            kind: KeySourceKind::Keychain,
        })
    }

    fn derived_key(&self, recorded: Option<&KeyInfo>) -> Result<ResolvedKey> {
        let recorded = recorded.filter(|info| info.source == KeySourceKind::Derived);
        let (salt, iterations) = match recorded.and_then(|info| info.salt.as_deref()) {
            Some(encoded) => {
                let salt = BASE64_STANDARD
                    .decode(encoded)
                    .map_err(|_| anyhow!("credential key salt is not valid base64"))?;
                let iterations = recorded
                    .and_then(|info| info.iterations)
                    .unwrap_or(self.iterations);
                (salt, iterations)
            }
            None => {
                let mut salt = vec![0u8; SALT_BYTES];
                OsRng.fill_bytes(&mut salt);
                self.write_keyinfo(&KeyInfo {
                    source: KeySourceKind::Derived,
                    salt: Some(BASE64_STANDARD.encode(&salt)),
                    iterations: Some(self.iterations),
                })?;
                (salt, self.iterations)
            }
        };
        tracing::warn!("using machine-derived credential key; no platform secret store in use");
        let seed = Zeroizing::new(machine_key_seed());
        Ok(ResolvedKey {
            material: derive_key(seed.as_bytes(), &salt, iterations),
            kind: KeySourceKind::Derived,
        })
    }

    fn read_keyinfo(&self) -> Result<Option<KeyInfo>> {
        let path = self.keyinfo_path();
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let info = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(Some(info))
    }

    fn write_keyinfo(&self, info: &KeyInfo) -> Result<()> {
        let encoded = serde_json::to_vec_pretty(info).context("failed to encode key info")?;
        write_private_atomic(&self.keyinfo_path(), &encoded)
    }
}

/// PBKDF2-HMAC-SHA256 into a 256-bit key.
pub fn derive_key(seed: &[u8], salt: &[u8], iterations: u32) -> Zeroizing<[u8; KEY_BYTES]> {
    let mut material = Zeroizing::new([0u8; KEY_BYTES]);
    pbkdf2::pbkdf2_hmac::<Sha256>(seed, salt, iterations, &mut material[..]);
    material
}

/// Seed for the derived key: the OS-level machine identifier only.
///
/// Environment variables are never consulted; they differ between shells,
/// services and schedulers on the same machine.
fn machine_key_seed() -> String {
    let machine_id = platform_machine_id();
    if machine_id.is_none() {
        tracing::warn!(
            "no machine identifier found; derived credential key relies on the salt alone"
        );
    }
    machine_key_seed_from(machine_id.as_deref())
}

fn machine_key_seed_from(machine_id: Option<&str>) -> String {
    let mut segments = vec![
        MACHINE_KEY_CONTEXT.to_string(),
        format!("os={}", std::env::consts::OS),
        format!("arch={}", std::env::consts::ARCH),
    ];
    if let Some(machine_id) = machine_id {
        segments.push(format!("machine_id={machine_id}"));
    }
    segments.join("|")
}

fn platform_machine_id() -> Option<String> {
    match std::env::consts::OS {
        "macos" => command_machine_id(
            "ioreg",
            &["-rd1", "-c", "IOPlatformExpertDevice"],
            parse_ioreg_platform_uuid,
        ),
        "windows" => command_machine_id(
            "reg",
            &["query", WINDOWS_CRYPTOGRAPHY_KEY, "/v", "MachineGuid"],
            parse_reg_machine_guid,
        ),
        _ => read_machine_id_file(),
    }
}

fn command_machine_id(
    program: &str,
    args: &[&str],
    parse: fn(&str) -> Option<String>,
) -> Option<String> {
    match run_platform_command(program, args, None) {
        Ok(output) if output.success => parse(&output.stdout),
        Ok(_) => None,
        Err(error) => {
            tracing::debug!(%error, program, "machine identifier lookup failed");
            None
        }
    }
}

fn parse_ioreg_platform_uuid(output: &str) -> Option<String> {
    output
        .lines()
        .find(|line| line.contains("\"IOPlatformUUID\""))
        .and_then(|line| line.split_once('='))
        .map(|(_, value)| value.trim().trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
}

fn parse_reg_machine_guid(output: &str) -> Option<String> {
    output
        .lines()
        .find(|line| line.trim_start().starts_with("MachineGuid"))
        .and_then(|line| line.split_whitespace().last())
        .map(str::to_string)
        .filter(|value| value != "MachineGuid")
}

fn read_machine_id_file() -> Option<String> {
    MACHINE_ID_CANDIDATE_PATHS.iter().find_map(|path| {
        let raw = std::fs::read_to_string(path).ok()?;
        let value = raw.trim();
        (!value.is_empty()).then(|| value.to_string())
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    };

    use anyhow::{bail, Result};
    use tempfile::tempdir;
    use zeroize::Zeroizing;

    use super::{
        derive_key, machine_key_seed, machine_key_seed_from, parse_ioreg_platform_uuid,
        parse_reg_machine_guid, KeySource, PlatformKeychain, SecretBackend, KEYINFO_FILE_NAME,
    };
    use crate::types::{KeySourceKind, KeySourcePreference};

    #[derive(Clone, Default)]
    pub(crate) struct MemoryKeychain {
        secret: Arc<Mutex<Option<String>>>,
        reads: Arc<AtomicUsize>,
        unavailable: bool,
    }

    impl MemoryKeychain {
        pub(crate) fn unavailable() -> Self {
            Self {
                unavailable: true,
                ..Self::default()
            }
        }

        pub(crate) fn reads(&self) -> usize {
            self.reads.load(Ordering::SeqCst)
        }
    }

    impl SecretBackend for MemoryKeychain {
        fn name(&self) -> &'static str {
            "memory"
        }

        fn read_secret(&self) -> Result<Option<Zeroizing<String>>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            if self.unavailable {
                bail!("secret service is not running");
            }
            let secret = self.secret.lock().expect("secret lock").clone();
            Ok(secret.map(Zeroizing::new))
        }

        fn write_secret(&self, secret: &str) -> Result<()> {
            if self.unavailable {
                bail!("secret service is not running");
            }
            *self.secret.lock().expect("secret lock") = Some(secret.to_string());
            Ok(())
        }
    }

    #[test]
    fn functional_keychain_key_is_generated_once_and_reused() {
        let dir = tempdir().expect("tempdir");
        let keychain = MemoryKeychain::default();
        let first = KeySource::new(dir.path(), KeySourcePreference::Auto)
            .with_keychain(Some(Box::new(keychain.clone())))
            .resolve()
            .expect("first resolve");
        let second = KeySource::new(dir.path(), KeySourcePreference::Auto)
            .with_keychain(Some(Box::new(keychain.clone())))
            .resolve()
            .expect("second resolve");
        assert_eq!(first.kind(), KeySourceKind::Keychain);
        assert_eq!(first.material(), second.material());
        assert!(dir.path().join(KEYINFO_FILE_NAME).exists());
    }

    #[test]
    fn functional_unavailable_keychain_falls_back_to_stable_derived_key() {
        let dir = tempdir().expect("tempdir");
        let keychain = MemoryKeychain::unavailable();
        let first = KeySource::new(dir.path(), KeySourcePreference::Auto)
            .with_iterations(10)
            .with_keychain(Some(Box::new(keychain.clone())))
            .resolve()
            .expect("fallback resolve");
        assert_eq!(first.kind(), KeySourceKind::Derived);

        let working = MemoryKeychain::default();
        let second = KeySource::new(dir.path(), KeySourcePreference::Auto)
            .with_iterations(10)
            .with_keychain(Some(Box::new(working.clone())))
            .resolve()
            .expect("second resolve");
        assert_eq!(second.kind(), KeySourceKind::Derived);
        assert_eq!(first.material(), second.material());
        assert_eq!(working.reads(), 0);
    }

    #[test]
    fn unit_keychain_preference_without_backend_fails() {
        let dir = tempdir().expect("tempdir");
        let error = KeySource::new(dir.path(), KeySourcePreference::Keychain)
            .with_keychain(None)
            .resolve()
            .expect_err("keychain preference requires a backend");
        assert!(error.to_string().contains("no platform secret store"));
    }

    #[test]
    fn unit_derive_key_depends_on_salt() {
        let one = derive_key(b"machine", b"salt-one-16bytes", 10);
        let two = derive_key(b"machine", b"salt-two-16bytes", 10);
        assert_ne!(one[..], two[..]);
        assert_eq!(one[..], derive_key(b"machine", b"salt-one-16bytes", 10)[..]);
    }

    #[test]
    fn regression_derived_key_ignores_shell_environment() {
        let dir = tempdir().expect("tempdir");
        let source = KeySource::new(dir.path(), KeySourcePreference::Derived).with_iterations(10);

        std::env::set_var("HOSTNAME", "interactive-shell-host");
        std::env::set_var("USER", "someone");
        let seed_in_shell = machine_key_seed();
        let key_in_shell = source.resolve().expect("derive in shell");

        std::env::remove_var("HOSTNAME");
        std::env::set_var("USER", "service-account");
        assert_eq!(machine_key_seed(), seed_in_shell);
        assert_eq!(
            source.resolve().expect("derive under a service").material()[..],
            key_in_shell.material()[..]
        );
        assert!(!seed_in_shell.contains("interactive-shell-host"));
    }

    #[test]
    fn unit_machine_seed_changes_only_with_machine_id() {
        assert_eq!(machine_key_seed_from(Some("abc")), machine_key_seed_from(Some("abc")));
        assert_ne!(machine_key_seed_from(Some("abc")), machine_key_seed_from(Some("abd")));
        assert!(machine_key_seed_from(None)
            .starts_with("agbridge-credential-store-machine-key-v2|"));
    }

    #[test]
    fn unit_platform_machine_id_parsers_read_tool_output() {
        let ioreg = r#"+-o J316sAP  <class IOPlatformExpertDevice, id 0x100000213>
    {
      "IOPlatformSerialNumber" = "C02XXXXXXX"
      "IOPlatformUUID" = "6A1B2C3D-0000-1111-2222-333344445555"
    }"#;
        assert_eq!(
            parse_ioreg_platform_uuid(ioreg).as_deref(),
            Some("6A1B2C3D-0000-1111-2222-333344445555")
        );
        let reg = "\r\nHKEY_LOCAL_MACHINE\\SOFTWARE\\Microsoft\\Cryptography\r\n    MachineGuid    REG_SZ    0f1e2d3c-aaaa-bbbb-cccc-ddddeeeeffff\r\n";
        assert_eq!(
            parse_reg_machine_guid(reg).as_deref(),
            Some("0f1e2d3c-aaaa-bbbb-cccc-ddddeeeeffff")
        );
        assert_eq!(parse_reg_machine_guid("ERROR: not found"), None);
    }

    #[test]
    fn unit_platform_keychain_names_the_store_in_use() {
        assert_eq!(PlatformKeychain::MacKeychain.name(), "macos-keychain");
        assert_eq!(
            PlatformKeychain::WindowsCredentialManager.name(),
            "windows-credential-manager"
        );
        assert_eq!(PlatformKeychain::LinuxSecretTool.name(), "secret-tool");
        if cfg!(target_os = "windows") || cfg!(target_os = "macos") {
            assert!(PlatformKeychain::detect().is_some());
        }
    }
}
