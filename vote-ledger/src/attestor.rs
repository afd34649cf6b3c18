//! Signing key lifecycle and Merkle root attestation
//!
//! The attestor owns one long-lived Ed25519 key pair persisted as a raw
//! 32-byte seed file. The key is created the first time it is needed and
//! loaded on every later start.
//!
//! # Creation
//!
//! 1. Write a fresh seed to a uniquely named temp file next to `key_path`
//!    (mode 0600 on unix) and fsync it.
//! 2. Hard-link the temp file to `key_path`. The link either appears
//!    complete or fails with `AlreadyExists`, so two processes racing on
//!    first start end up with one key: the loser drops its seed and loads
//!    the winner's.
//!
//! Within one process the key sits in a `OnceCell`, so concurrent first
//! callers block on a single initialisation and later signs share the
//! loaded key without locking.

use crate::{
    crypto::{verify_signature, KeyPair},
    types::Signature,
    Error, Result,
};
use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// A signature over a Merkle root at a point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attestation {
    /// Root that was signed
    pub merkle_root: [u8; 32],
    /// Signature over the raw root bytes
    pub signature: Signature,
    /// Public key of the attestor
    pub public_key: [u8; 32],
    /// Signing time
    pub signed_at: DateTime<Utc>,
}

impl Attestation {
    /// Check the signature against the embedded root and key
    pub fn verify(&self) -> bool {
        verify_signature(&self.merkle_root, &self.signature, &self.public_key)
    }
}

/// Owner of the ledger's signing key
#[derive(Debug)]
pub struct SignatureAttestor {
    key_path: PathBuf,
    key: OnceCell<KeyPair>,
}

impl SignatureAttestor {
    /// Create an attestor; the key file is not touched until first use
    pub fn new(key_path: impl Into<PathBuf>) -> Self {
        Self {
            key_path: key_path.into(),
            key: OnceCell::new(),
        }
    }

    /// Path of the persisted seed
    pub fn key_path(&self) -> &Path {
        &self.key_path
    }

    /// Load or create the key, once per process
    pub fn ensure_key(&self) -> Result<&KeyPair> {
        self.key
            .get_or_try_init(|| load_or_create(&self.key_path))
            .map_err(|e| {
                tracing::error!(
                    key_path = %self.key_path.display(),
                    error = %e,
                    "Attestation key unavailable, signing disabled"
                );
                e
            })
    }

    /// Sign arbitrary bytes
    pub fn sign(&self, message: &[u8]) -> Result<Signature> {
        Ok(self.ensure_key()?.sign(message))
    }

    /// Public key bytes
    pub fn public_key(&self) -> Result<[u8; 32]> {
        Ok(self.ensure_key()?.public_key())
    }

    /// Sign a Merkle root
    pub fn attest(&self, merkle_root: [u8; 32]) -> Result<Attestation> {
        let key = self.ensure_key()?;
        Ok(Attestation {
            merkle_root,
            signature: key.sign(&merkle_root),
            public_key: key.public_key(),
            signed_at: Utc::now(),
        })
    }

    /// Verify a signature produced by any attestor
    pub fn verify(message: &[u8], signature: &Signature, public_key: &[u8; 32]) -> bool {
        verify_signature(message, signature, public_key)
    }
}

fn load_or_create(path: &Path) -> Result<KeyPair> {
    match fs::read(path) {
        Ok(bytes) => {
            let keypair = parse_seed(path, bytes)?;
            tracing::info!(
                key_path = %path.display(),
                public_key = %hex::encode(keypair.public_key()),
                "Loaded attestation key"
            );
            Ok(keypair)
        }
        Err(e) if e.kind() == ErrorKind::NotFound => create_key(path),
        Err(e) => Err(Error::KeyInitialization(format!(
            "cannot read {}: {}",
            path.display(),
            e
        ))),
    }
}

fn parse_seed(path: &Path, bytes: Vec<u8>) -> Result<KeyPair> {
    let seed: [u8; 32] = bytes.try_into().map_err(|raw: Vec<u8>| {
        Error::KeyInitialization(format!(
            "{} holds {} bytes, expected a 32-byte seed",
            path.display(),
            raw.len()
        ))
    })?;
    Ok(KeyPair::from_seed(&seed))
}

fn create_key(path: &Path) -> Result<KeyPair> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| {
            Error::KeyInitialization(format!("cannot create {}: {}", parent.display(), e))
        })?;
    }

    let keypair = KeyPair::generate();
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(format!(".tmp-{}", uuid::Uuid::new_v4()));
    let tmp_path = PathBuf::from(tmp_name);

    write_seed(&tmp_path, &keypair.seed())?;
    let linked = fs::hard_link(&tmp_path, path);
    if let Err(e) = fs::remove_file(&tmp_path) {
        tracing::warn!(tmp_path = %tmp_path.display(), error = %e, "Failed to remove temp key file");
    }

    match linked {
        Ok(()) => {
            tracing::info!(
                key_path = %path.display(),
                public_key = %hex::encode(keypair.public_key()),
                "Generated attestation key"
            );
            Ok(keypair)
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            tracing::info!(key_path = %path.display(), "Key created concurrently, loading it");
            let bytes = fs::read(path).map_err(|e| {
                Error::KeyInitialization(format!("cannot read {}: {}", path.display(), e))
            })?;
            parse_seed(path, bytes)
        }
        Err(e) => Err(Error::KeyInitialization(format!(
            "cannot publish key at {}: {}",
            path.display(),
            e
        ))),
    }
}

fn write_seed(path: &Path, seed: &[u8; 32]) -> Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path).map_err(|e| {
        Error::KeyInitialization(format!("cannot create {}: {}", path.display(), e))
    })?;
    file.write_all(seed)
        .and_then(|_| file.sync_all())
        .map_err(|e| Error::KeyInitialization(format!("cannot write {}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_generates_key_on_first_use() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("keys").join("attestor.seed");
        let attestor = SignatureAttestor::new(&path);

        assert!(!path.exists());
        let public_key = attestor.public_key().unwrap();
        assert_eq!(fs::read(&path).unwrap().len(), 32);

        // No temp files left behind
        let entries: Vec<_> = fs::read_dir(path.parent().unwrap()).unwrap().collect();
        assert_eq!(entries.len(), 1);

        assert_eq!(attestor.public_key().unwrap(), public_key);
    }

    #[test]
    fn test_reload_keeps_same_key() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("attestor.seed");

        let first = SignatureAttestor::new(&path);
        let root = [5u8; 32];
        let signature = first.sign(&root).unwrap();
        let public_key = first.public_key().unwrap();

        let reloaded = SignatureAttestor::new(&path);
        assert_eq!(reloaded.public_key().unwrap(), public_key);
        assert!(SignatureAttestor::verify(&root, &signature, &public_key));
        assert!(SignatureAttestor::verify(
            &root,
            &reloaded.sign(&root).unwrap(),
            &public_key
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_key_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("attestor.seed");
        SignatureAttestor::new(&path).ensure_key().unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o077, 0);
    }

    #[test]
    fn test_corrupted_key_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("attestor.seed");
        fs::write(&path, b"not a seed").unwrap();

        let attestor = SignatureAttestor::new(&path);
        let err = attestor.sign(b"root").unwrap_err();
        assert!(matches!(err, Error::KeyInitialization(_)));

        // The corrupted file is never overwritten
        assert_eq!(fs::read(&path).unwrap(), b"not a seed");
    }

    #[test]
    fn test_racing_attestors_agree_on_one_key() {
        let dir = TempDir::new().unwrap();
        let path = Arc::new(dir.path().join("attestor.seed"));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let path = Arc::clone(&path);
                std::thread::spawn(move || {
                    SignatureAttestor::new(path.as_path()).public_key().unwrap()
                })
            })
            .collect();

        let keys: Vec<[u8; 32]> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(keys.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(
            KeyPair::from_seed(&fs::read(path.as_path()).unwrap().try_into().unwrap())
                .public_key(),
            keys[0]
        );
    }

    #[test]
    fn test_attestation_verifies() {
        let dir = TempDir::new().unwrap();
        let attestor = SignatureAttestor::new(dir.path().join("attestor.seed"));

        let mut attestation = attestor.attest([1u8; 32]).unwrap();
        assert!(attestation.verify());

        attestation.merkle_root = [2u8; 32];
        assert!(!attestation.verify());
    }
}
