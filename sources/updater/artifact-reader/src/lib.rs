//! Streaming reader and verifier for the layered-tar artifact format: outer tar of
//! `version`/`manifest`/`manifest.sig`/`header.tar*`/`data/0000.tar*`, each inner tar checksummed
//! as a whole against the manifest and, for the outer signature, verified against caller-supplied
//! public keys.

pub mod compression;
pub mod error;
pub mod header;
pub mod manifest;
mod reader;
pub mod version;

pub use compression::Codec;
pub use header::{ArtifactDepends, ArtifactProvides, HeaderInfo, PayloadDeclaration, PayloadInfo, TypeInfo};
pub use manifest::Manifest;
pub use reader::{read_artifact, ParsedArtifact};
pub use version::ArtifactVersion;

#[cfg(test)]
mod tests {
    use super::*;
    use checksum::PrivateKey;
    use std::io::{Read, Write};

    fn build_artifact(sign_with: Option<&PrivateKey>) -> Vec<u8> {
        let header_info = br#"{"payloads":[{"type":"rootfs-image"}],"artifact_provides":{"artifact_name":"release-1","artifact_group":null},"artifact_depends":{"device_type":["test-board"],"artifact_group":[]},"clears_artifact_provides":[]}"#;
        let type_info = br#"{"type":"rootfs-image","artifact_provides":{"rootfs-image.version":"release-1"},"artifact_depends":{},"clears_artifact_provides":[]}"#;

        let mut header_tar = Vec::new();
        {
            let mut builder = tar::Builder::new(&mut header_tar);
            add_tar_entry(&mut builder, "header-info", header_info);
            add_tar_entry(&mut builder, "0000/type-info", type_info);
            builder.finish().unwrap();
        }

        let payload_bytes = b"#!/bin/sh\necho hello\n";
        let mut data_tar = Vec::new();
        {
            let mut builder = tar::Builder::new(&mut data_tar);
            add_tar_entry(&mut builder, "rootfs.img", payload_bytes);
            builder.finish().unwrap();
        }

        let header_digest = checksum::digest_bytes(&header_tar);
        let data_digest = checksum::digest_bytes(&data_tar);
        let manifest_text = format!(
            "{}  header.tar\n{}  data/0000.tar\n",
            hex::encode(header_digest),
            hex::encode(data_digest),
        );

        let mut outer = Vec::new();
        {
            let mut builder = tar::Builder::new(&mut outer);
            add_tar_entry(&mut builder, "version", br#"{"format":"mender","version":3}"#);
            add_tar_entry(&mut builder, "manifest", manifest_text.as_bytes());
            if let Some(key) = sign_with {
                let digest = checksum::digest_bytes(manifest_text.as_bytes());
                let sig = checksum::sign(&digest, key).unwrap();
                add_tar_entry(&mut builder, "manifest.sig", &sig);
            }
            add_tar_entry(&mut builder, "header.tar", &header_tar);
            add_tar_entry(&mut builder, "data/0000.tar", &data_tar);
            builder.finish().unwrap();
        }
        outer
    }

    fn add_tar_entry<W: Write>(builder: &mut tar::Builder<W>, name: &str, content: &[u8]) {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, content).unwrap();
    }

    #[test]
    fn reads_unsigned_artifact_end_to_end() {
        let artifact = build_artifact(None);
        let mut collected = Vec::new();
        let parsed = read_artifact(artifact.as_slice(), &[], |index, name, reader| {
            let mut buf = Vec::new();
            reader.read_to_end(&mut buf)?;
            collected.push((index, name.to_string(), buf));
            Ok(())
        })
        .unwrap();

        assert!(!parsed.manifest_signed);
        assert_eq!(parsed.header.artifact_provides.artifact_name, "release-1");
        assert_eq!(parsed.payloads.len(), 1);
        assert_eq!(collected.len(), 1);
        assert_eq!(collected[0].1, "rootfs.img");
        assert_eq!(collected[0].2, b"#!/bin/sh\necho hello\n");
    }

    #[test]
    fn verifies_signed_manifest_against_matching_key() {
        let (private, public) = checksum::test_support::rsa_keypair();
        let artifact = build_artifact(Some(&private));
        let parsed = read_artifact(artifact.as_slice(), &[public], |_, _, reader| {
            std::io::copy(reader, &mut std::io::sink()).map(|_| ())
        })
        .unwrap();
        assert!(parsed.manifest_signed);
    }

    #[test]
    fn rejects_signature_from_wrong_key() {
        let (private, _) = checksum::test_support::rsa_keypair();
        let (_, other_public) = checksum::test_support::rsa_keypair();
        let artifact = build_artifact(Some(&private));
        let result = read_artifact(artifact.as_slice(), &[other_public], |_, _, reader| {
            std::io::copy(reader, &mut std::io::sink()).map(|_| ())
        });
        assert!(matches!(result, Err(error::Error::SignatureVerification)));
    }

    #[test]
    fn detects_corrupted_payload_checksum() {
        let mut artifact = build_artifact(None);
        let tail = artifact.len() - 200;
        artifact[tail] ^= 0xff;
        let result = read_artifact(artifact.as_slice(), &[], |_, _, reader| {
            std::io::copy(reader, &mut std::io::sink()).map(|_| ())
        });
        assert!(result.is_err());
    }
}
