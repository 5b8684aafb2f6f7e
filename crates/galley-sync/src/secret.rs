//! # Secret Store
//!
//! Encrypts small secrets (the device token) at rest with a per-installation
//! AES-256-GCM key.
//!
//! ## Key Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      get_or_create_key()                                │
//! │                                                                         │
//! │  cached? ──yes──► return                                               │
//! │     │no                                                                 │
//! │     ▼                                                                   │
//! │  read <data_dir>/device.key                                            │
//! │     ├── 32 bytes ─────────────────────────────► cache + return          │
//! │     ├── other length ─────────────────────────► KeyFileCorrupt          │
//! │     └── missing                                                         │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  write random key to .device.key.<uuid>.tmp (0600)                     │
//! │  hard_link(tmp, device.key)      ← atomic create-if-absent             │
//! │     ├── ok ──────────────► our key wins                                │
//! │     └── AlreadyExists ───► another process won, read theirs            │
//! │  remove tmp                                                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Ciphertext Format
//! `base64(nonce[12] ‖ ciphertext ‖ tag[16])`. The empty string encrypts to
//! and decrypts from the empty string.

use std::fmt;
use std::fs;
use std::io::{ErrorKind as IoErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::{debug, info};
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{SyncError, SyncResult};

/// File name of the installation key inside the data directory.
pub const KEY_FILE_NAME: &str = "device.key";

/// Installation key length in bytes (AES-256).
pub const KEY_LEN: usize = 32;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

// =============================================================================
// Installation Key
// =============================================================================

/// The 256-bit key that protects secrets on this device. Wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct InstallationKey([u8; KEY_LEN]);

impl InstallationKey {
    fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut bytes);
        InstallationKey(bytes)
    }

    fn from_file_bytes(path: &Path, bytes: &[u8]) -> SyncResult<Self> {
        if bytes.len() != KEY_LEN {
            return Err(SyncError::KeyFileCorrupt {
                path: path.display().to_string(),
                len: bytes.len(),
            });
        }
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(bytes);
        Ok(InstallationKey(key))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for InstallationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("InstallationKey([REDACTED])")
    }
}

impl PartialEq for InstallationKey {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

// =============================================================================
// Secret Store
// =============================================================================

/// Envelope encryption for small secrets, keyed by the installation key.
///
/// The key is loaded lazily on first use and cached for the lifetime of the
/// store.
pub struct SecretStore {
    key_path: PathBuf,
    cached: Mutex<Option<InstallationKey>>,
}

impl fmt::Debug for SecretStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretStore")
            .field("key_path", &self.key_path)
            .finish_non_exhaustive()
    }
}

impl SecretStore {
    /// Creates a store backed by the key file at `key_path`.
    pub fn new(key_path: impl Into<PathBuf>) -> Self {
        SecretStore {
            key_path: key_path.into(),
            cached: Mutex::new(None),
        }
    }

    /// Creates a store whose key lives at `<dir>/device.key`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(KEY_FILE_NAME))
    }

    pub fn key_path(&self) -> &Path {
        &self.key_path
    }

    /// Returns the installation key, creating and persisting it on first use.
    pub fn get_or_create_key(&self) -> SyncResult<InstallationKey> {
        // A poisoned lock only means another thread panicked mid-load; the
        // cached Option is still either empty or a complete key.
        let mut cached = self.cached.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(key) = cached.as_ref() {
            return Ok(key.clone());
        }

        let key = self.load_or_create()?;
        *cached = Some(key.clone());
        Ok(key)
    }

    fn load_or_create(&self) -> SyncResult<InstallationKey> {
        match fs::read(&self.key_path) {
            Ok(bytes) => {
                let bytes = Zeroizing::new(bytes);
                debug!(path = %self.key_path.display(), "Loaded installation key");
                InstallationKey::from_file_bytes(&self.key_path, &bytes)
            }
            Err(e) if e.kind() == IoErrorKind::NotFound => self.create_key_file(),
            Err(e) => Err(self.storage_error(e)),
        }
    }

    fn create_key_file(&self) -> SyncResult<InstallationKey> {
        let dir = self
            .key_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir).map_err(|e| self.storage_error(e))?;

        let key = InstallationKey::generate();
        let tmp = dir.join(format!(".{}.{}.tmp", KEY_FILE_NAME, Uuid::new_v4()));
        write_private(&tmp, key.as_bytes()).map_err(|e| self.storage_error(e))?;

        let linked = fs::hard_link(&tmp, &self.key_path);
        // The tmp name is unique to this call; leftovers are harmless.
        let _ = fs::remove_file(&tmp);

        match linked {
            Ok(()) => {
                info!(path = %self.key_path.display(), "Created installation key");
                Ok(key)
            }
            Err(e) if e.kind() == IoErrorKind::AlreadyExists => {
                debug!(
                    path = %self.key_path.display(),
                    "Installation key created concurrently, using existing key"
                );
                let bytes = Zeroizing::new(fs::read(&self.key_path).map_err(|e| self.storage_error(e))?);
                InstallationKey::from_file_bytes(&self.key_path, &bytes)
            }
            Err(e) => Err(self.storage_error(e)),
        }
    }

    fn storage_error(&self, err: std::io::Error) -> SyncError {
        SyncError::KeyStorage {
            path: self.key_path.display().to_string(),
            reason: err.to_string(),
        }
    }

    fn cipher(&self) -> SyncResult<Aes256Gcm> {
        let key = self.get_or_create_key()?;
        Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|_| SyncError::Crypto("cipher initialization failed".into()))
    }

    // =========================================================================
    // Encryption
    // =========================================================================

    /// Encrypts `plaintext` into `base64(nonce ‖ ciphertext)`.
    pub fn encrypt(&self, plaintext: &str) -> SyncResult<String> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }

        let cipher = self.cipher()?;

        let mut nonce = [0u8; NONCE_LEN];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut nonce);

        let sealed = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|_| SyncError::Crypto("encryption failed".into()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(STANDARD.encode(out))
    }

    /// Decrypts a value produced by [`SecretStore::encrypt`].
    pub fn decrypt(&self, ciphertext: &str) -> SyncResult<String> {
        if ciphertext.is_empty() {
            return Ok(String::new());
        }

        let raw = STANDARD
            .decode(ciphertext)
            .map_err(|e| SyncError::Crypto(format!("malformed base64: {}", e)))?;
        if raw.len() < NONCE_LEN + TAG_LEN {
            return Err(SyncError::Crypto(format!(
                "ciphertext too short: {} bytes",
                raw.len()
            )));
        }

        let cipher = self.cipher()?;
        let (nonce, sealed) = raw.split_at(NONCE_LEN);
        let plain = Zeroizing::new(
            cipher
                .decrypt(Nonce::from_slice(nonce), sealed)
                .map_err(|_| SyncError::Crypto("authentication failed".into()))?,
        );

        String::from_utf8(plain.to_vec())
            .map_err(|_| SyncError::Crypto("decrypted value is not UTF-8".into()))
    }

    /// Returns `value` unchanged if it already decrypts, otherwise treats it
    /// as legacy plaintext and encrypts it.
    ///
    /// A plaintext that happens to be valid base64 of at least 28 bytes and
    /// authenticates under this key would be misclassified. With a 128-bit
    /// tag that is not a practical concern.
    pub fn encrypt_if_needed(&self, value: &str) -> SyncResult<String> {
        match self.decrypt(value) {
            Ok(_) => Ok(value.to_string()),
            Err(SyncError::Crypto(reason)) => {
                debug!(%reason, "Value is not ciphertext, encrypting");
                self.encrypt(value)
            }
            Err(other) => Err(other),
        }
    }
}

fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

// =============================================================================
// Unit Tests
// =============================================================================
