//! SHA-256 streaming verification, RSA/EC signature sign+verify, and the base64 codec used by
//! the detached manifest signature. Shared by the artifact reader and by offline signing tools.

pub mod base64;
pub mod error;
mod sha256;
mod sigverify;
#[cfg(feature = "test-support")]
pub mod test_support;

pub use sha256::{digest_bytes, ShaVerifyingReader};
pub use sigverify::{sign, verify, PrivateKey, PublicKey};
