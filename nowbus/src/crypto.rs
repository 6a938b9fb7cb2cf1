//! Software crypto backend.

use hmac::{Hmac, Mac as _};
use sha2::{Digest, Sha256};

use crate::traits::Crypto;

type HmacSha256 = Hmac<Sha256>;

/// SHA-256 / HMAC-SHA-256 in software.
///
/// Stateless; a single instance serves the whole bus. Platforms with a
/// hardware digest engine can provide their own [`Crypto`] instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct SoftwareCrypto;

impl Crypto for SoftwareCrypto {
    fn sha256(&self, data: &[u8]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hasher.finalize().into()
    }

    fn hmac_sha256(&self, key: &[u8], data: &[u8]) -> [u8; 32] {
        // HMAC accepts any key length; ours are the 16-byte derived keys.
        let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
        mac.update(data);
        mac.finalize().into_bytes().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(bytes: &[u8]) -> alloc::string::String {
        use core::fmt::Write;
        let mut s = alloc::string::String::new();
        for b in bytes {
            write!(s, "{b:02x}").unwrap();
        }
        s
    }

    #[test]
    fn sha256_known_answer() {
        let crypto = SoftwareCrypto;
        assert_eq!(
            hex(&crypto.sha256(b"abc")),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn hmac_sha256_rfc4231_case_2() {
        let crypto = SoftwareCrypto;
        let tag = crypto.hmac_sha256(b"Jefe", b"what do ya want for nothing?");
        assert_eq!(
            hex(&tag),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn hmac_differs_per_key() {
        let crypto = SoftwareCrypto;
        let a = crypto.hmac_sha256(&[1u8; 16], b"frame");
        let b = crypto.hmac_sha256(&[2u8; 16], b"frame");
        assert_ne!(a, b);
    }
}
