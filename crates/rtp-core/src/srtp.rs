//! SRTP master key handling for SDES (`a=crypto`) negotiation
//!
//! Only `AES_CM_128_HMAC_SHA1_80` is supported, so the inline key is always
//! a 16 byte master key followed by a 14 byte master salt.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::RngCore;

use crate::constants::{SRTP_KEY_LEN, SRTP_SALT_LEN};
use crate::error::{Error, Result};

/// The only crypto suite intercom devices negotiate
pub const SRTP_CRYPTO_SUITE: &str = "AES_CM_128_HMAC_SHA1_80";

/// SRTP master key and salt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrtpKeyMaterial {
    pub key: [u8; SRTP_KEY_LEN],
    pub salt: [u8; SRTP_SALT_LEN],
}

impl SrtpKeyMaterial {
    /// The `a=crypto` line announcing this key material
    pub fn to_crypto_attribute(&self) -> String {
        format!("a=crypto:1 {} inline:{}", SRTP_CRYPTO_SUITE, encode_srtp(self))
    }
}

/// Decode the base64 inline value of an `a=crypto` attribute.
///
/// Anything after a `|` (lifetime or MKI parameters) is ignored.
pub fn decode_srtp(inline: &str) -> Result<SrtpKeyMaterial> {
    let encoded = inline.split('|').next().unwrap_or_default().trim();
    let raw = STANDARD
        .decode(encoded)
        .map_err(|e| Error::InvalidCrypto(format!("inline key is not base64: {}", e)))?;

    if raw.len() < SRTP_KEY_LEN + SRTP_SALT_LEN {
        return Err(Error::InvalidCrypto(format!(
            "inline key is {} bytes, expected {}",
            raw.len(),
            SRTP_KEY_LEN + SRTP_SALT_LEN
        )));
    }

    let mut key = [0u8; SRTP_KEY_LEN];
    let mut salt = [0u8; SRTP_SALT_LEN];
    key.copy_from_slice(&raw[..SRTP_KEY_LEN]);
    salt.copy_from_slice(&raw[SRTP_KEY_LEN..SRTP_KEY_LEN + SRTP_SALT_LEN]);

    Ok(SrtpKeyMaterial { key, salt })
}

/// Encode key and salt as the base64 inline value
pub fn encode_srtp(material: &SrtpKeyMaterial) -> String {
    let mut raw = Vec::with_capacity(SRTP_KEY_LEN + SRTP_SALT_LEN);
    raw.extend_from_slice(&material.key);
    raw.extend_from_slice(&material.salt);
    STANDARD.encode(raw)
}

/// Fresh random key material for a local offer
pub fn generate_srtp_key() -> SrtpKeyMaterial {
    let mut rng = rand::thread_rng();
    let mut key = [0u8; SRTP_KEY_LEN];
    let mut salt = [0u8; SRTP_SALT_LEN];
    rng.fill_bytes(&mut key);
    rng.fill_bytes(&mut salt);
    SrtpKeyMaterial { key, salt }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_splits_key_and_salt() {
        let raw: Vec<u8> = (0u8..30).collect();
        let inline = STANDARD.encode(&raw);

        let material = decode_srtp(&inline).expect("valid key material");
        assert_eq!(&material.key[..], &raw[..16]);
        assert_eq!(&material.salt[..], &raw[16..]);
        assert_eq!(encode_srtp(&material), inline);
    }

    #[test]
    fn test_decode_ignores_lifetime_suffix() {
        let inline = format!("{}|2^31|1:1", STANDARD.encode([7u8; 30]));
        let material = decode_srtp(&inline).unwrap();
        assert_eq!(material.key, [7u8; 16]);
        assert_eq!(material.salt, [7u8; 14]);
    }

    #[test]
    fn test_decode_rejects_short_keys() {
        let inline = STANDARD.encode([1u8; 20]);
        assert!(matches!(decode_srtp(&inline), Err(Error::InvalidCrypto(_))));
        assert!(decode_srtp("not base64!").is_err());
    }

    #[test]
    fn test_crypto_attribute() {
        let material = generate_srtp_key();
        let line = material.to_crypto_attribute();
        assert!(line.starts_with("a=crypto:1 AES_CM_128_HMAC_SHA1_80 inline:"));

        let inline = line.rsplit("inline:").next().unwrap();
        assert_eq!(decode_srtp(inline).unwrap(), material);
    }
}
