//! Password-derived Fernet cipher for the encrypted key file.
//!
//! The Fernet key is the base64url encoding of SHA-256(password), so files
//! written by other clients using the same scheme open here unchanged. A token
//! is `0x80 || timestamp (u64 BE) || iv (16) || ciphertext || hmac (32)`,
//! base64url encoded with padding.

use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use fernet::Fernet;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::{
    error::{Error, Result},
    event::unix_now,
};

const VERSION: u8 = 0x80;
const HEADER_LEN: usize = 1 + 8 + 16;
const MAC_LEN: usize = 32;
const BLOCK_LEN: usize = 16;

pub struct KeyCipher(Fernet);

impl KeyCipher {
    pub fn for_password(password: &str) -> Result<Self> {
        let digest: Zeroizing<[u8; 32]> = Zeroizing::new(Sha256::digest(password.as_bytes()).into());
        let key = Zeroizing::new(URL_SAFE.encode(&digest[..]));
        Fernet::new(&key)
            .map(Self)
            .ok_or_else(|| Error::Encoding("derived key rejected by fernet".into()))
    }

    /// Encrypt `plaintext` stamped with the current time.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String> {
        Ok(self.0.encrypt_at_time(plaintext, unix_now()?))
    }

    /// Authenticate and decrypt a token. No TTL is enforced.
    ///
    /// Input that is not shaped like a Fernet token is
    /// [`Error::CorruptKeyFile`]; a well-formed token that fails to
    /// authenticate is [`Error::Authentication`].
    pub fn decrypt(&self, token: &str) -> Result<Zeroizing<Vec<u8>>> {
        let token = token.trim();
        check_shape(token)?;
        self.0
            .decrypt(token)
            .map(Zeroizing::new)
            .map_err(|_| Error::Authentication)
    }
}

fn check_shape(token: &str) -> Result<()> {
    let raw = URL_SAFE
        .decode(token)
        .map_err(|e| Error::CorruptKeyFile(format!("not base64url: {e}")))?;
    if raw.len() < HEADER_LEN + BLOCK_LEN + MAC_LEN {
        return Err(Error::CorruptKeyFile("token too short".into()));
    }
    if raw[0] != VERSION {
        return Err(Error::CorruptKeyFile(format!(
            "unknown token version {:#04x}",
            raw[0]
        )));
    }
    if (raw.len() - HEADER_LEN - MAC_LEN) % BLOCK_LEN != 0 {
        return Err(Error::CorruptKeyFile("ciphertext not block aligned".into()));
    }
    Ok(())
}
