//! File digests used to verify downloaded plugin path entries.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use super::clause::{SHA1_ATTR, SHA256_ATTR};

const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Sha1,
    Sha256,
}

impl DigestAlgorithm {
    /// Attribute carrying the expected digest.
    pub fn attribute(self) -> &'static str {
        match self {
            Self::Sha1 => SHA1_ATTR,
            Self::Sha256 => SHA256_ATTR,
        }
    }

    /// Digest the contents of `path`.
    pub fn digest_file(self, path: &Path) -> std::io::Result<Vec<u8>> {
        let mut file = File::open(path)?;
        let mut buf = vec![0u8; CHUNK_SIZE];
        match self {
            Self::Sha1 => {
                let mut ctx = ring::digest::Context::new(&ring::digest::SHA1_FOR_LEGACY_USE_ONLY);
                loop {
                    let n = file.read(&mut buf)?;
                    if n == 0 {
                        break;
                    }
                    ctx.update(&buf[..n]);
                }
                Ok(ctx.finish().as_ref().to_vec())
            }
            Self::Sha256 => {
                let mut hasher = Sha256::new();
                loop {
                    let n = file.read(&mut buf)?;
                    if n == 0 {
                        break;
                    }
                    hasher.update(&buf[..n]);
                }
                Ok(hasher.finalize().to_vec())
            }
        }
    }
}

impl std::fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.attribute())
    }
}

/// Whether `value` is a non-empty, even-length hexadecimal string.
pub fn is_hex(value: &str) -> bool {
    !value.is_empty() && value.len() % 2 == 0 && value.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Decode a hexadecimal digest, surrounding whitespace ignored.
pub fn parse_hex(value: &str) -> Option<Vec<u8>> {
    let value = value.trim();
    if !is_hex(value) {
        return None;
    }
    hex::decode(value).ok()
}
