use crate::error::{self, Result};
use sha2::{Digest, Sha256};
use snafu::ensure;
use std::io::{self, Read};

/// Wraps an inner byte source and accumulates a running SHA-256 digest as bytes are read
/// through it. On `finish()` the accumulated digest is compared against the expected value
/// given at construction; any mismatch is reported as `Error::ChecksumMismatch`.
///
/// The reader does not fail early on mismatch -- the artifact format requires the full file to
/// be streamed to its destination (e.g. an update module) before the digest can be known, so the
/// check necessarily happens at end-of-stream.
pub struct ShaVerifyingReader<R> {
    inner: R,
    hasher: Sha256,
    expected: [u8; 32],
    path: String,
    finished: bool,
}

impl<R: Read> ShaVerifyingReader<R> {
    pub fn new(inner: R, expected: [u8; 32], path: impl Into<String>) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            expected,
            path: path.into(),
            finished: false,
        }
    }

    /// Consumes the reader, verifying the digest accumulated so far against the expected value.
    /// Safe to call without having read to EOF, though doing so means the digest will not match
    /// unless the expected digest happens to be that of a prefix.
    pub fn finish(mut self) -> Result<()> {
        self.verify()
    }

    fn verify(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        let computed: [u8; 32] = self.hasher.clone().finalize().into();
        ensure!(
            computed == self.expected,
            error::ChecksumMismatchSnafu {
                path: self.path.clone(),
                expected: hex::encode(self.expected),
                computed: hex::encode(computed),
            }
        );
        Ok(())
    }
}

impl<R: Read> Read for ShaVerifyingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n == 0 {
            // EOF: verify now so that callers who drain the reader to completion and then drop
            // it (rather than calling `finish`) still get the check. `io::Error` can't carry our
            // rich error type, so we fold the mismatch into an InvalidData error here; callers
            // that care about the structured error should call `finish()` explicitly instead of
            // relying on read() returning Err.
            if let Err(e) = self.verify() {
                return Err(io::Error::new(io::ErrorKind::InvalidData, e.to_string()));
            }
        } else {
            self.hasher.update(&buf[..n]);
        }
        Ok(n)
    }
}

/// Computes the SHA-256 digest of an entire byte slice, for the cases (manifest, manifest
/// signature) where the whole object is already in memory.
pub fn digest_bytes(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read as _;

    #[test]
    fn matching_digest_reads_cleanly() {
        let data = b"hello artifact";
        let expected = digest_bytes(data);
        let mut reader = ShaVerifyingReader::new(&data[..], expected, "hello");
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
        reader.finish().unwrap();
    }

    #[test]
    fn mismatched_digest_fails_on_finish() {
        let data = b"hello artifact";
        let wrong = digest_bytes(b"something else");
        let mut reader = ShaVerifyingReader::new(&data[..], wrong, "hello");
        let mut out = Vec::new();
        reader.read_to_end(&mut out).ok();
        let err = reader.finish().unwrap_err();
        assert!(matches!(err, error::Error::ChecksumMismatch { .. }));
    }

    #[test]
    fn mismatch_surfaces_during_read_to_end() {
        let data = b"tampered payload bytes";
        let wrong = digest_bytes(b"original payload bytes");
        let mut reader = ShaVerifyingReader::new(&data[..], wrong, "payload");
        let mut out = Vec::new();
        let result = reader.read_to_end(&mut out);
        assert!(result.is_err());
    }
}
