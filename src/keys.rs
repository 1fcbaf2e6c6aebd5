//! secp256k1 key pair with Schnorr signing and password-protected storage.

use std::{
    fmt, fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use rand::{rngs::OsRng, RngCore};
use secp256k1::{schnorr::Signature, Keypair, Message, Secp256k1, XOnlyPublicKey};
use tracing::info;
use zeroize::Zeroizing;

use crate::{
    error::{Error, Result},
    keyfile::KeyCipher,
};

/// A user's signing identity.
///
/// Signing only reads the key, so a `KeyPair` can be shared by reference
/// between tasks.
pub struct KeyPair {
    keypair: Keypair,
    key_file: Option<PathBuf>,
}

impl KeyPair {
    /// Create a key from 32 bytes of OS randomness.
    pub fn generate() -> Result<Self> {
        let mut bytes = Zeroizing::new([0u8; 32]);
        loop {
            OsRng
                .try_fill_bytes(&mut bytes[..])
                .map_err(|e| Error::Random(e.to_string()))?;
            // Out-of-range scalars (zero or >= curve order) are redrawn.
            if let Ok(key) = Self::from_secret_bytes(&bytes[..]) {
                return Ok(key);
            }
        }
    }

    /// Rebuild a key pair from a raw 32-byte secret scalar.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self> {
        let secp = Secp256k1::new();
        let keypair = Keypair::from_seckey_slice(&secp, bytes)
            .map_err(|e| Error::InvalidKey(e.to_string()))?;
        Ok(Self {
            keypair,
            key_file: None,
        })
    }

    /// X-only public key as lowercase hex (parity byte dropped).
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.keypair.x_only_public_key().0.serialize())
    }

    pub fn secret_key_hex(&self) -> String {
        hex::encode(self.keypair.secret_bytes())
    }

    /// File this key was last saved to or loaded from.
    pub fn key_file(&self) -> Option<&Path> {
        self.key_file.as_deref()
    }

    /// BIP-340 Schnorr signature over a 32-byte digest, hex encoded.
    ///
    /// The nonce is derived deterministically from the key and digest (no
    /// auxiliary randomness), so the same inputs always produce the same
    /// signature. Each signature is verified before it is returned.
    pub fn sign(&self, digest: &[u8]) -> Result<String> {
        let msg = Message::from_digest_slice(digest)
            .map_err(|_| Error::Encoding(format!("digest must be 32 bytes, got {}", digest.len())))?;
        let secp = Secp256k1::signing_only();
        let sig = hex::encode(secp.sign_schnorr_no_aux_rand(&msg, &self.keypair).as_ref());
        if !self.verify(digest, &sig) {
            return Err(Error::InvalidKey("signature failed verification".into()));
        }
        Ok(sig)
    }

    /// Check a hex signature over `digest` against this key's public key.
    /// Malformed input simply fails verification.
    pub fn verify(&self, digest: &[u8], signature: &str) -> bool {
        verify_schnorr(&self.keypair.x_only_public_key().0, digest, signature)
    }

    /// Encrypt the secret scalar under `password` and write it to `path`,
    /// replacing any previous contents.
    pub fn save(&mut self, path: impl AsRef<Path>, password: &str) -> Result<()> {
        let path = path.as_ref();
        if password.is_empty() {
            return Err(Error::EmptyPassword);
        }
        let secret = Zeroizing::new(self.keypair.secret_bytes());
        let token = KeyCipher::for_password(password)?.encrypt(&secret[..])?;
        fs::write(path, token)?;
        info!(path = %path.display(), "saved encrypted key");
        self.key_file = Some(path.to_path_buf());
        Ok(())
    }

    /// Decrypt the key stored at `path`.
    ///
    /// Returns `Ok(None)` when the file exists but holds no key yet, and
    /// [`Error::Authentication`] when `password` does not match.
    pub fn load(path: impl AsRef<Path>, password: &str) -> Result<Option<Self>> {
        let path = path.as_ref();
        let token = fs::read_to_string(path).map_err(|e| not_found_or_io(e, path))?;
        if token.trim().is_empty() {
            return Ok(None);
        }
        let secret = KeyCipher::for_password(password)?.decrypt(&token)?;
        if secret.len() != 32 {
            return Err(Error::CorruptKeyFile(format!(
                "expected a 32-byte secret, found {} bytes",
                secret.len()
            )));
        }
        let mut key = Self::from_secret_bytes(&secret)
            .map_err(|e| Error::CorruptKeyFile(e.to_string()))?;
        key.key_file = Some(path.to_path_buf());
        info!(path = %path.display(), pubkey = %key.public_key_hex(), "loaded key");
        Ok(Some(key))
    }

    /// Whether `path` exists and holds something to decrypt.
    pub fn has_stored_key(path: impl AsRef<Path>) -> Result<bool> {
        match fs::read_to_string(path) {
            Ok(s) => Ok(!s.trim().is_empty()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove the backing key file.
    pub fn delete_file(&mut self) -> Result<()> {
        let path = self
            .key_file
            .as_ref()
            .ok_or_else(|| Error::NotFound("no key file is associated with this key".into()))?;
        fs::remove_file(path).map_err(|e| not_found_or_io(e, path))?;
        info!(path = %path.display(), "deleted key file");
        self.key_file = None;
        Ok(())
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("pubkey", &self.public_key_hex())
            .field("key_file", &self.key_file)
            .finish_non_exhaustive()
    }
}

/// Verify a hex Schnorr signature over `digest` for an x-only public key.
pub fn verify_schnorr(pubkey: &XOnlyPublicKey, digest: &[u8], signature: &str) -> bool {
    let Ok(sig_bytes) = hex::decode(signature) else {
        return false;
    };
    let Ok(sig) = Signature::from_slice(&sig_bytes) else {
        return false;
    };
    let Ok(msg) = Message::from_digest_slice(digest) else {
        return false;
    };
    Secp256k1::verification_only()
        .verify_schnorr(&sig, &msg, pubkey)
        .is_ok()
}

fn not_found_or_io(e: std::io::Error, path: &Path) -> Error {
    if e.kind() == ErrorKind::NotFound {
        Error::NotFound(path.display().to_string())
    } else {
        Error::Io(e)
    }
}
