//! Node identity: ed25519 keypairs stored as base64 text files, and the set
//! of public keys a node will cluster with.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ed25519_dalek::{SigningKey, VerifyingKey};
use tracing::warn;

use crate::error::{ClusterError, JoinError};

pub fn generate_signing_key() -> SigningKey {
    let mut rng = rand::rngs::OsRng;
    SigningKey::generate(&mut rng)
}

/// Write `<prefix>.secret` (base64 32-byte seed, mode 0600 on Unix) and
/// `<prefix>.pub` (base64 verifying key). Returns both paths.
pub fn write_keypair(
    signing_key: &SigningKey,
    output_prefix: &str,
) -> Result<(PathBuf, PathBuf), ClusterError> {
    let secret_path = PathBuf::from(format!("{output_prefix}.secret"));
    let pub_path = PathBuf::from(format!("{output_prefix}.pub"));

    std::fs::write(&secret_path, BASE64.encode(signing_key.to_bytes())).map_err(|e| {
        ClusterError::Config(format!(
            "error writing secret key to '{}': {}",
            secret_path.display(),
            e
        ))
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        if let Err(e) = std::fs::set_permissions(&secret_path, perms) {
            warn!(path = %secret_path.display(), error = %e, "failed to restrict secret key permissions");
        }
    }

    std::fs::write(&pub_path, public_key_b64(&signing_key.verifying_key())).map_err(|e| {
        ClusterError::Config(format!(
            "error writing public key to '{}': {}",
            pub_path.display(),
            e
        ))
    })?;
    Ok((secret_path, pub_path))
}

pub fn read_signing_key(path: &Path) -> Result<SigningKey, ClusterError> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        ClusterError::Config(format!("error reading secret key '{}': {}", path.display(), e))
    })?;
    let bytes = BASE64.decode(contents.trim()).map_err(|e| {
        ClusterError::Config(format!("error decoding secret key '{}': {}", path.display(), e))
    })?;
    let seed: [u8; 32] = bytes.try_into().map_err(|_| {
        ClusterError::Config(format!(
            "invalid secret key length in '{}': expected 32 bytes",
            path.display()
        ))
    })?;
    Ok(SigningKey::from_bytes(&seed))
}

pub fn public_key_b64(key: &VerifyingKey) -> String {
    BASE64.encode(key.to_bytes())
}

pub fn parse_public_key(encoded: &str) -> Result<VerifyingKey, JoinError> {
    let bytes = BASE64
        .decode(encoded.trim())
        .map_err(|e| JoinError::BadKey(e.to_string()))?;
    let key: [u8; 32] = bytes
        .try_into()
        .map_err(|_| JoinError::BadKey("expected 32 bytes".to_string()))?;
    VerifyingKey::from_bytes(&key).map_err(|e| JoinError::BadKey(e.to_string()))
}

/// Short hex fingerprint: the first 8 bytes of the key.
pub fn key_fingerprint(key: &VerifyingKey) -> String {
    key.to_bytes()[..8].iter().map(|b| format!("{b:02x}")).collect()
}

/// Public keys this node accepts as cluster peers.
#[derive(Debug, Clone, Default)]
pub struct TrustedKeys {
    keys: BTreeSet<[u8; 32]>,
}

impl TrustedKeys {
    pub fn from_base64<S: AsRef<str>>(encoded: &[S]) -> Result<Self, JoinError> {
        let mut keys = BTreeSet::new();
        for key in encoded {
            keys.insert(parse_public_key(key.as_ref())?.to_bytes());
        }
        Ok(TrustedKeys { keys })
    }

    pub fn insert(&mut self, key: &VerifyingKey) {
        self.keys.insert(key.to_bytes());
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Parse `encoded` and require it to be trusted.
    pub fn require(&self, encoded: &str) -> Result<VerifyingKey, JoinError> {
        let key = parse_public_key(encoded)?;
        if self.keys.contains(&key.to_bytes()) {
            Ok(key)
        } else {
            Err(JoinError::Untrusted {
                fingerprint: key_fingerprint(&key),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn keypair_files_round_trip() {
        let tmp = TempDir::new().unwrap();
        let prefix = tmp.path().join("node");
        let key = generate_signing_key();
        let (secret, public) = write_keypair(&key, prefix.to_str().unwrap()).unwrap();

        let read_back = read_signing_key(&secret).unwrap();
        assert_eq!(read_back.to_bytes(), key.to_bytes());
        let public_text = std::fs::read_to_string(public).unwrap();
        assert_eq!(
            parse_public_key(&public_text).unwrap(),
            key.verifying_key()
        );
    }

    #[test]
    fn garbage_secret_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bad.secret");
        std::fs::write(&path, "not-valid-base64!!!").unwrap();
        assert!(read_signing_key(&path).is_err());
        assert!(read_signing_key(&tmp.path().join("missing.secret")).is_err());
    }

    #[test]
    fn trust_set_names_untrusted_fingerprint() {
        let trusted = generate_signing_key().verifying_key();
        let stranger = generate_signing_key().verifying_key();
        let keys = TrustedKeys::from_base64(&[public_key_b64(&trusted)]).unwrap();

        assert!(keys.require(&public_key_b64(&trusted)).is_ok());
        match keys.require(&public_key_b64(&stranger)) {
            Err(JoinError::Untrusted { fingerprint }) => {
                assert_eq!(fingerprint, key_fingerprint(&stranger));
                assert_eq!(fingerprint.len(), 16);
            }
            other => panic!("expected Untrusted, got {other:?}"),
        }
        assert!(matches!(keys.require("AAAA"), Err(JoinError::BadKey(_))));
    }
}
