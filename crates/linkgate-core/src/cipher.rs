//! ============================================================================
//! URL Cipher - Confidentiality for gated link destinations at rest
//! ============================================================================
//! Record format: `hex(salt) ":" hex(iv) ":" hex(ciphertext)`
//!
//! # Algorithms
//!
//! - **Key Derivation**: PBKDF2-HMAC-SHA256 over the server secret and a
//!   per-record random salt
//! - **Encryption**: AES-256-CBC with PKCS7 padding and a per-record random IV
//!
//! Salt and IV are fresh for every call, so encrypting the same URL twice
//! yields two different records. The empty string is a "no URL" sentinel and
//! passes through both directions unchanged.
//! ============================================================================

use aes::cipher::{block_padding::Pkcs7, generic_array::GenericArray};
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::config::{GateConfig, Secret};
use crate::types::GateError;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Salt length for key derivation (16 bytes)
pub const SALT_LEN: usize = 16;

/// AES-CBC IV length (16 bytes)
pub const IV_LEN: usize = 16;

/// AES-256 key length (32 bytes)
pub const KEY_LEN: usize = 32;

/// AES block size; ciphertext length is always a multiple of this
const BLOCK_LEN: usize = 16;

/// Segment separator in an encrypted record
const SEPARATOR: char = ':';

/// Encrypts and decrypts gated link URLs with a server-held secret.
#[derive(Debug, Clone)]
pub struct UrlCipher {
    secret: Secret,
    iterations: u32,
}

/// Decoded segments of an encrypted record
struct RecordParts {
    salt: Vec<u8>,
    iv: Vec<u8>,
    ciphertext: Vec<u8>,
}

impl UrlCipher {
    pub fn new(config: &GateConfig) -> Result<Self, GateError> {
        Self::with_iterations(config.encryption_secret.clone(), config.cipher_iterations)
    }

    pub fn with_iterations(secret: Secret, iterations: u32) -> Result<Self, GateError> {
        if secret.expose().is_empty() {
            return Err(GateError::Config("encryption secret is empty".into()));
        }
        if iterations == 0 {
            return Err(GateError::Config("cipher iterations must be > 0".into()));
        }
        Ok(Self { secret, iterations })
    }

    /// Encrypt a URL into a `salt:iv:ciphertext` record.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, GateError> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }

        let mut salt = [0u8; SALT_LEN];
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut salt);
        OsRng.fill_bytes(&mut iv);

        let key = self.derive_key(&salt);
        let ciphertext = Aes256CbcEnc::new(
            GenericArray::from_slice(&key[..]),
            GenericArray::from_slice(&iv),
        )
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

        Ok(format!(
            "{}{sep}{}{sep}{}",
            hex::encode(salt),
            hex::encode(iv),
            hex::encode(ciphertext),
            sep = SEPARATOR
        ))
    }

    /// Decrypt a record produced by [`UrlCipher::encrypt`].
    ///
    /// # Errors
    ///
    /// - `MalformedRecord` if the record is not three hex segments of the
    ///   expected sizes
    /// - `DecryptionFailure` if padding or UTF-8 validation fails (wrong
    ///   secret, corrupted ciphertext)
    pub fn decrypt(&self, record: &str) -> Result<String, GateError> {
        if record.is_empty() {
            return Ok(String::new());
        }

        let parts = parse_record(record)?;
        let key = self.derive_key(&parts.salt);

        let plaintext = Aes256CbcDec::new(
            GenericArray::from_slice(&key[..]),
            GenericArray::from_slice(&parts.iv),
        )
        .decrypt_padded_vec_mut::<Pkcs7>(&parts.ciphertext)
        .map_err(|_| GateError::DecryptionFailure)?;

        String::from_utf8(plaintext).map_err(|_| GateError::DecryptionFailure)
    }

    /// Heuristic: structurally a record AND decrypts under this secret.
    ///
    /// This is NOT an authorization check. Whether a link is gated is decided
    /// by `Link::token_gated`; the write path uses this to tell sealed values
    /// from plaintext when a link's gating changes.
    pub fn is_encrypted(&self, text: &str) -> bool {
        looks_encrypted(text) && self.decrypt(text).is_ok()
    }

    fn derive_key(&self, salt: &[u8]) -> Zeroizing<[u8; KEY_LEN]> {
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        pbkdf2_hmac::<Sha256>(self.secret.expose(), salt, self.iterations, &mut key[..]);
        key
    }
}

/// Structural half of [`UrlCipher::is_encrypted`]; performs no decryption.
///
/// A plaintext URL such as `https://host:8080/x` splits into three segments
/// but fails the hex and length checks.
pub fn looks_encrypted(text: &str) -> bool {
    parse_record(text).is_ok()
}

fn parse_record(record: &str) -> Result<RecordParts, GateError> {
    let segments: Vec<&str> = record.split(SEPARATOR).collect();
    if segments.len() != 3 || segments.iter().any(|s| s.is_empty()) {
        return Err(GateError::MalformedRecord);
    }

    let decode = |s: &str| hex::decode(s).map_err(|_| GateError::MalformedRecord);
    let salt = decode(segments[0])?;
    let iv = decode(segments[1])?;
    let ciphertext = decode(segments[2])?;

    if salt.len() != SALT_LEN || iv.len() != IV_LEN || ciphertext.len() % BLOCK_LEN != 0 {
        return Err(GateError::MalformedRecord);
    }

    Ok(RecordParts {
        salt,
        iv,
        ciphertext,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher(secret: &str) -> UrlCipher {
        UrlCipher::with_iterations(Secret::new(secret), 1_000).unwrap()
    }

    #[test]
    fn test_round_trip() {
        let c = cipher("server-secret");
        for url in [
            "https://example.com/x",
            "https://discord.gg/invite?code=abc:def",
            "mailto:someone@example.com",
            "ünïcödé://🔒",
            "a",
        ] {
            let record = c.encrypt(url).unwrap();
            assert_ne!(record, url);
            assert_eq!(c.decrypt(&record).unwrap(), url);
        }
    }

    #[test]
    fn test_encrypt_is_non_deterministic() {
        let c = cipher("server-secret");
        let a = c.encrypt("https://example.com/x").unwrap();
        let b = c.encrypt("https://example.com/x").unwrap();
        assert_ne!(a, b);

        let salt_a = a.split(':').next().unwrap();
        let salt_b = b.split(':').next().unwrap();
        assert_ne!(salt_a, salt_b);
    }

    #[test]
    fn test_empty_is_sentinel() {
        let c = cipher("server-secret");
        assert_eq!(c.encrypt("").unwrap(), "");
        assert_eq!(c.decrypt("").unwrap(), "");
        assert!(!c.is_encrypted(""));
    }

    #[test]
    fn test_record_format() {
        let c = cipher("server-secret");
        let record = c.encrypt("https://example.com/x").unwrap();
        let segments: Vec<&str> = record.split(':').collect();
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].len(), SALT_LEN * 2);
        assert_eq!(segments[1].len(), IV_LEN * 2);
        assert_eq!(hex::decode(segments[2]).unwrap().len() % BLOCK_LEN, 0);
    }

    #[test]
    fn test_is_encrypted_heuristic() {
        let c = cipher("server-secret");
        assert!(!c.is_encrypted("https://example.com/x"));
        assert!(!c.is_encrypted("https://example.com:8080/x"));
        let record = c.encrypt("https://example.com/x").unwrap();
        assert!(c.is_encrypted(&record));
    }

    #[test]
    fn test_heuristic_rejects_hex_looking_plaintext() {
        // Two colons and hex segments, but not the sizes of a real record
        let c = cipher("server-secret");
        assert!(!looks_encrypted("dead:beef:cafe"));
        assert!(!c.is_encrypted("dead:beef:cafe"));

        // Right shape, not produced under this secret
        let forged = format!("{}:{}:{}", "00".repeat(16), "11".repeat(16), "22".repeat(16));
        assert!(looks_encrypted(&forged));
        assert!(!c.is_encrypted(&forged));
    }

    #[test]
    fn test_malformed_records() {
        let c = cipher("server-secret");
        assert_eq!(c.decrypt("abc"), Err(GateError::MalformedRecord));
        assert_eq!(c.decrypt("ab:cd"), Err(GateError::MalformedRecord));
        assert_eq!(c.decrypt("ab:cd:ef:01"), Err(GateError::MalformedRecord));
        assert_eq!(c.decrypt("zz:yy:xx"), Err(GateError::MalformedRecord));
        assert_eq!(
            c.decrypt("https://example.com:8080/x"),
            Err(GateError::MalformedRecord)
        );
    }

    #[test]
    fn test_wrong_secret_fails() {
        let record = cipher("secret-a").encrypt("https://example.com/members").unwrap();
        assert_eq!(
            cipher("secret-b").decrypt(&record),
            Err(GateError::DecryptionFailure)
        );
        assert!(!cipher("secret-b").is_encrypted(&record));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let c = cipher("server-secret");
        let record = c.encrypt("https://example.com/x").unwrap();
        let mut segments: Vec<String> = record.split(':').map(String::from).collect();

        // In CBC, flipping a byte of the previous block flips the same byte
        // of the final plaintext block: here the padding byte 0x0b -> 0xf4
        let mut ct = hex::decode(&segments[2]).unwrap();
        assert_eq!(ct.len(), 2 * BLOCK_LEN);
        let idx = ct.len() - BLOCK_LEN - 1;
        ct[idx] ^= 0xff;
        segments[2] = hex::encode(ct);

        assert_eq!(
            c.decrypt(&segments.join(":")),
            Err(GateError::DecryptionFailure)
        );
    }

    #[test]
    fn test_rejects_empty_secret() {
        assert!(matches!(
            UrlCipher::with_iterations(Secret::new(""), 1_000),
            Err(GateError::Config(_))
        ));
        assert!(matches!(
            UrlCipher::with_iterations(Secret::new("x"), 0),
            Err(GateError::Config(_))
        ));
    }
}
