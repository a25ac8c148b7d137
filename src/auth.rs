//! Password digests and the MD5 helper behind `MD5(...)`.

use md5::Md5;
use sha2::{Digest, Sha256};

/// One-way password digest used when storing and verifying user passwords
pub trait PasswordDigest: Send + Sync {
    fn digest(&self, password: &str) -> String;

    fn verify(&self, password: &str, stored: &str) -> bool {
        self.digest(password) == stored
    }
}

/// SHA-256, hex encoded
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha256Digest;

impl PasswordDigest for Sha256Digest {
    fn digest(&self, password: &str) -> String {
        hex(&Sha256::digest(password.as_bytes()))
    }
}

/// Lowercase hex MD5 of the input
pub fn md5_hex(input: &str) -> String {
    hex(&Md5::digest(input.as_bytes()))
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::{PasswordDigest, Sha256Digest, md5_hex};

    #[test]
    fn test_md5() {
        assert_eq!(md5_hex(""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(md5_hex("abc"), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn test_sha256_digest() {
        let digest = Sha256Digest;
        let stored = digest.digest("abc");
        assert_eq!(stored, "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad");
        assert!(digest.verify("abc", &stored));
        assert!(!digest.verify("abd", &stored));
    }
}
