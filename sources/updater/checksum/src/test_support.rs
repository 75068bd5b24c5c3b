//! Key generation for other crates' tests. Gated behind the `test-support` feature so it never
//! ships in a release build.

use crate::{PrivateKey, PublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};

/// A freshly generated 2048-bit RSA keypair, suitable for signing and verifying in tests.
pub fn rsa_keypair() -> (PrivateKey, PublicKey) {
    let mut rng = rsa::rand_core::OsRng;
    let private = RsaPrivateKey::new(&mut rng, 2048).expect("key generation");
    let public = RsaPublicKey::from(&private);
    (PrivateKey::Rsa(private), PublicKey::Rsa(public))
}
