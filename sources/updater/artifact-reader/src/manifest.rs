use crate::error::{self, Result};
use snafu::ensure;
use std::collections::BTreeMap;

/// The parsed `manifest` member: a map from archive-relative path to the expected SHA-256
/// digest of that path's bytes, plus the raw manifest bytes (the detached signature, when
/// present, is computed over exactly these bytes).
pub struct Manifest {
    pub digests: BTreeMap<String, [u8; 32]>,
    pub raw: Vec<u8>,
}

impl Manifest {
    pub fn parse(raw: Vec<u8>) -> Result<Self> {
        let text = String::from_utf8_lossy(&raw);
        let mut digests = BTreeMap::new();
        for line in text.lines() {
            if line.is_empty() {
                continue;
            }
            let (hex_digest, path) = line.split_once("  ").ok_or_else(|| error::Error::Parse {
                reason: format!("malformed manifest line: '{line}'"),
            })?;
            ensure!(
                hex_digest.len() == 64 && hex_digest.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()),
                error::ParseSnafu {
                    reason: format!("invalid digest field in manifest line: '{line}'"),
                }
            );
            let mut digest = [0u8; 32];
            hex::decode_to_slice(hex_digest, &mut digest).map_err(|_| error::Error::Parse {
                reason: format!("invalid hex digest in manifest line: '{line}'"),
            })?;
            digests.insert(path.to_string(), digest);
        }
        Ok(Manifest { digests, raw })
    }

    pub fn expected_digest(&self, path: &str) -> Result<[u8; 32]> {
        self.digests
            .get(path)
            .copied()
            .ok_or_else(|| error::Error::MissingManifestEntry {
                path: path.to_string(),
            })
    }
}
