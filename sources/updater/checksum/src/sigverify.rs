use crate::error::{self, Result};
use p256::ecdsa::{Signature as EcSignature, SigningKey as EcSigningKey, VerifyingKey as EcVerifyingKey};
use rsa::pkcs1v15::{Signature as RsaSignature, SigningKey as RsaSigningKey, VerifyingKey as RsaVerifyingKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use signature::{Signer, Verifier};
use snafu::ResultExt;
use std::path::Path;

/// A public key used to verify a detached manifest signature. The artifact format doesn't tag
/// which algorithm a key file uses, so we detect it from the key material itself.
pub enum PublicKey {
    Rsa(RsaPublicKey),
    Ec(EcVerifyingKey),
}

/// A private key used to produce a detached manifest signature (used by signing tooling, not by
/// the device-side verifier, but kept alongside it since both sides agree on the digest and
/// padding scheme).
pub enum PrivateKey {
    Rsa(RsaPrivateKey),
    Ec(EcSigningKey),
}

impl PublicKey {
    pub fn from_pem_file(path: &Path) -> Result<Self> {
        let pem = std::fs::read_to_string(path).context(error::KeyReadSnafu { path })?;
        Self::from_pem(&pem, path)
    }

    pub fn from_pem(pem: &str, path: &Path) -> Result<Self> {
        if let Ok(key) = RsaPublicKey::from_public_key_pem(pem) {
            return Ok(PublicKey::Rsa(key));
        }
        if let Ok(key) = EcVerifyingKey::from_public_key_pem(pem) {
            return Ok(PublicKey::Ec(key));
        }
        error::UnrecognizedKeySnafu { path }.fail()
    }
}

impl PrivateKey {
    pub fn from_pem_file(path: &Path) -> Result<Self> {
        let pem = std::fs::read_to_string(path).context(error::KeyReadSnafu { path })?;
        Self::from_pem(&pem, path)
    }

    pub fn from_pem(pem: &str, path: &Path) -> Result<Self> {
        if let Ok(key) = RsaPrivateKey::from_pkcs8_pem(pem) {
            return Ok(PrivateKey::Rsa(key));
        }
        if let Ok(key) = EcSigningKey::from_pkcs8_pem(pem) {
            return Ok(PrivateKey::Ec(key));
        }
        error::UnrecognizedKeySnafu { path }.fail()
    }
}

/// Signs the SHA-256 digest of the manifest byte range with `key`, returning raw signature
/// bytes in the form they'd be written to `manifest.sig`.
pub fn sign(digest: &[u8; 32], key: &PrivateKey) -> Result<Vec<u8>> {
    match key {
        PrivateKey::Rsa(rsa_key) => {
            let signing_key = RsaSigningKey::<Sha256>::new(rsa_key.clone());
            let sig: RsaSignature = signing_key.try_sign(digest).context(error::SignSnafu)?;
            Ok(sig.to_vec())
        }
        PrivateKey::Ec(ec_key) => {
            let sig: EcSignature = ec_key.try_sign(digest).context(error::SignSnafu)?;
            Ok(sig.to_der().as_bytes().to_vec())
        }
    }
}

/// Verifies `sig` over `digest` against each key in `keys`, in order, succeeding on the first
/// match. Returns `true` on a match, `false` if no key verifies it.
pub fn verify(digest: &[u8; 32], sig: &[u8], keys: &[PublicKey]) -> bool {
    for key in keys {
        let verified = match key {
            PublicKey::Rsa(rsa_key) => RsaSignature::try_from(sig)
                .ok()
                .map(|signature| {
                    RsaVerifyingKey::<Sha256>::new(rsa_key.clone())
                        .verify(digest, &signature)
                        .is_ok()
                })
                .unwrap_or(false),
            PublicKey::Ec(ec_key) => EcSignature::from_der(sig)
                .ok()
                .map(|signature| ec_key.verify(digest, &signature).is_ok())
                .unwrap_or(false),
        };
        if verified {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sha256::digest_bytes;
    use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey};

    fn rsa_pair() -> (PrivateKey, PublicKey) {
        let mut rng = rsa::rand_core::OsRng;
        let private = RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let public = RsaPublicKey::from(&private);
        (PrivateKey::Rsa(private), PublicKey::Rsa(public))
    }

    fn ec_pair() -> (PrivateKey, PublicKey) {
        let signing_key = EcSigningKey::random(&mut rsa::rand_core::OsRng);
        let verifying_key = *signing_key.verifying_key();
        (PrivateKey::Ec(signing_key), PublicKey::Ec(verifying_key))
    }

    #[test]
    fn rsa_round_trip() {
        let (private, public) = rsa_pair();
        let digest = digest_bytes(b"manifest contents");
        let sig = sign(&digest, &private).unwrap();
        assert!(verify(&digest, &sig, &[public]));
    }

    #[test]
    fn ec_round_trip() {
        let (private, public) = ec_pair();
        let digest = digest_bytes(b"manifest contents");
        let sig = sign(&digest, &private).unwrap();
        assert!(verify(&digest, &sig, &[public]));
    }

    #[test]
    fn wrong_key_does_not_verify() {
        let (private, _) = rsa_pair();
        let (_, wrong_public) = rsa_pair();
        let digest = digest_bytes(b"manifest contents");
        let sig = sign(&digest, &private).unwrap();
        assert!(!verify(&digest, &sig, &[wrong_public]));
    }

    #[test]
    fn first_matching_key_in_list_succeeds() {
        let (private, public) = rsa_pair();
        let (_, decoy) = rsa_pair();
        let digest = digest_bytes(b"manifest contents");
        let sig = sign(&digest, &private).unwrap();
        assert!(verify(&digest, &sig, &[decoy, public]));
    }

    #[test]
    fn pem_round_trip_detects_algorithm() {
        let (private, _) = rsa_pair();
        let PrivateKey::Rsa(key) = &private else {
            unreachable!()
        };
        let pem = key
            .to_pkcs8_pem(rsa::pkcs8::LineEnding::LF)
            .unwrap()
            .to_string();
        let loaded = PrivateKey::from_pem(&pem, Path::new("test.pem")).unwrap();
        assert!(matches!(loaded, PrivateKey::Rsa(_)));

        let public = RsaPublicKey::from(key);
        let pub_pem = public.to_public_key_pem(rsa::pkcs8::LineEnding::LF).unwrap();
        let loaded_pub = PublicKey::from_pem(&pub_pem, Path::new("test.pub.pem")).unwrap();
        assert!(matches!(loaded_pub, PublicKey::Rsa(_)));
    }
}
