use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use argon2::Argon2;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::VaultError;

const MAGIC: &[u8; 8] = b"TALLYSV1";
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 24;
const KEY_LEN: usize = 32;

/// Credential fields for one account, e.g. username/password/answers.
///
/// Only ever exists in plaintext in memory, momentarily, on its way into a
/// fetch provider call. Everything else in the system refers to it by the
/// opaque `secret_ref` string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretBundle(pub HashMap<String, String>);

impl SecretBundle {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }
}

/// Encrypted at-rest store for credential bundles, keyed by reference.
///
/// One container file holds the whole map. Every operation reads the file
/// fully, decrypts it, and (for writes) re-encrypts and rewrites it under a
/// fresh nonce — the credential set is small and writes are rare, so the
/// read-modify-write cycle stays serialized behind a single mutex.
///
/// The 32-byte cipher key is derived once at `open` with Argon2id from the
/// master passphrase and a per-container random salt, then cached for the
/// process lifetime.
#[derive(Debug)]
pub struct SecretVault {
    path: PathBuf,
    salt: [u8; SALT_LEN],
    key: [u8; KEY_LEN],
    io: Mutex<()>,
}

impl SecretVault {
    /// Open or create the container at `path`.
    ///
    /// Fails with `VaultError::Crypto` when an existing container does not
    /// decrypt under the derived key — callers at startup treat that as
    /// fatal, request-time callers surface it as a store-unavailable fetch
    /// failure.
    pub fn open(path: &Path, passphrase: &str) -> Result<Self, VaultError> {
        let salt = match read_salt(path)? {
            Some(salt) => salt,
            None => {
                let mut salt = [0u8; SALT_LEN];
                rand::rngs::OsRng.fill_bytes(&mut salt);
                salt
            }
        };

        let key = derive_key(passphrase, &salt)?;
        let vault = Self {
            path: path.to_path_buf(),
            salt,
            key,
            io: Mutex::new(()),
        };

        if path.exists() {
            // Validate the key against the existing container up front.
            vault.load_container()?;
        } else {
            vault.write_container(&HashMap::new())?;
        }
        Ok(vault)
    }

    /// Fetch the bundle stored under `secret_ref`. A missing reference is a
    /// normal absent result, not an error.
    pub fn get(&self, secret_ref: &str) -> Result<Option<SecretBundle>, VaultError> {
        let _guard = self.lock_io();
        let map = self.load_container()?;
        Ok(map.get(secret_ref).cloned())
    }

    pub fn set(&self, secret_ref: &str, bundle: SecretBundle) -> Result<(), VaultError> {
        let _guard = self.lock_io();
        let mut map = self.load_container()?;
        map.insert(secret_ref.to_string(), bundle);
        self.write_container(&map)
    }

    pub fn delete(&self, secret_ref: &str) -> Result<(), VaultError> {
        let _guard = self.lock_io();
        let mut map = self.load_container()?;
        map.remove(secret_ref);
        self.write_container(&map)
    }

    pub fn list_refs(&self) -> Result<Vec<String>, VaultError> {
        let _guard = self.lock_io();
        let map = self.load_container()?;
        let mut refs: Vec<String> = map.into_keys().collect();
        refs.sort();
        Ok(refs)
    }

    fn load_container(&self) -> Result<HashMap<String, SecretBundle>, VaultError> {
        let raw = std::fs::read(&self.path)?;
        let (salt, nonce, ciphertext) = split_container(&raw)?;
        if salt != self.salt {
            return Err(VaultError::Malformed(
                "container salt changed since open".into(),
            ));
        }
        let cipher = XChaCha20Poly1305::new((&self.key).into());
        let plaintext = cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| VaultError::Crypto)?;
        serde_json::from_slice(&plaintext)
            .map_err(|e| VaultError::Malformed(format!("container payload: {e}")))
    }

    fn write_container(&self, map: &HashMap<String, SecretBundle>) -> Result<(), VaultError> {
        let plaintext = serde_json::to_vec(map)
            .map_err(|e| VaultError::Malformed(format!("serialize payload: {e}")))?;

        let mut nonce = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce);

        let cipher = XChaCha20Poly1305::new((&self.key).into());
        let ciphertext = cipher
            .encrypt(XNonce::from_slice(&nonce), plaintext.as_slice())
            .map_err(|_| VaultError::Crypto)?;

        let mut out = Vec::with_capacity(MAGIC.len() + SALT_LEN + NONCE_LEN + ciphertext.len());
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&self.salt);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);

        write_private(&self.path, &out)?;
        Ok(())
    }

    fn lock_io(&self) -> std::sync::MutexGuard<'_, ()> {
        match self.io.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn derive_key(passphrase: &str, salt: &[u8; SALT_LEN]) -> Result<[u8; KEY_LEN], VaultError> {
    let mut key = [0u8; KEY_LEN];
    Argon2::default()
        .hash_password_into(passphrase.as_bytes(), salt, &mut key)
        .map_err(|e| VaultError::Malformed(format!("key derivation: {e}")))?;
    Ok(key)
}

fn read_salt(path: &Path) -> Result<Option<[u8; SALT_LEN]>, VaultError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read(path)?;
    let (salt, _, _) = split_container(&raw)?;
    let mut out = [0u8; SALT_LEN];
    out.copy_from_slice(salt);
    Ok(Some(out))
}

fn split_container(raw: &[u8]) -> Result<(&[u8], &[u8], &[u8]), VaultError> {
    let header = MAGIC.len() + SALT_LEN + NONCE_LEN;
    if raw.len() < header || &raw[..MAGIC.len()] != MAGIC {
        return Err(VaultError::Malformed("bad header".into()));
    }
    let salt = &raw[MAGIC.len()..MAGIC.len() + SALT_LEN];
    let nonce = &raw[MAGIC.len() + SALT_LEN..header];
    let ciphertext = &raw[header..];
    Ok((salt, nonce, ciphertext))
}

/// Write the container readable by the owning user only.
#[cfg(unix)]
fn write_private(path: &Path, data: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(data)?;
    file.sync_all()
}

#[cfg(not(unix))]
fn write_private(path: &Path, data: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, data)
}
