use crate::compression::{Codec, Decoder};
use crate::error::{self, Result};
use crate::header::{HeaderInfo, PayloadInfo, TypeInfo};
use crate::manifest::Manifest;
use crate::version::ArtifactVersion;
use checksum::{PublicKey, ShaVerifyingReader};
use snafu::ResultExt;
use std::io::{self, Read};

/// What came out of a fully verified artifact: the parsed version/header metadata and whether a
/// detached manifest signature was present and checked. Payload file bytes are *not* buffered
/// here -- they're streamed straight to `sink` as they're read, per §4.B's "exposes payload
/// entries to update modules" contract.
pub struct ParsedArtifact {
    pub version: ArtifactVersion,
    pub manifest_signed: bool,
    pub header: HeaderInfo,
    pub payloads: Vec<PayloadInfo>,
}

fn entry_name<R: Read>(entry: &tar::Entry<'_, R>) -> Result<String> {
    Ok(entry
        .path()
        .map_err(|source| error::Error::TarEntry {
            entry: "<unknown>".to_string(),
            source,
        })?
        .to_string_lossy()
        .into_owned())
}

fn read_to_vec<R: Read>(mut entry: tar::Entry<'_, R>, name: &str) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    entry
        .read_to_end(&mut buf)
        .context(error::TarEntrySnafu { entry: name })?;
    Ok(buf)
}

fn next_entry<'a, R: Read>(
    entries: &mut tar::Entries<'a, R>,
    expected: &str,
) -> Result<tar::Entry<'a, R>> {
    let entry = entries
        .next()
        .ok_or_else(|| error::Error::Eof {
            expected: expected.to_string(),
        })?
        .context(error::TarEntrySnafu { entry: expected })?;
    Ok(entry)
}

/// Streams and verifies an artifact tar from `source`, handing each payload file's (checksum
/// verified) bytes to `sink` as they're read.
///
/// `sink` receives the payload index (always 0 for artifacts produced by the current emitter),
/// the archive-relative file name within that payload, and a reader over its bytes; any error it
/// returns aborts the read.
pub fn read_artifact<R, F>(source: R, keys: &[PublicKey], mut sink: F) -> Result<ParsedArtifact>
where
    R: Read,
    F: FnMut(u32, &str, &mut dyn Read) -> io::Result<()>,
{
    let mut archive = tar::Archive::new(source);
    let mut entries = archive
        .entries()
        .context(error::TarEntrySnafu { entry: "version" })?;

    // 1. version
    let version_entry = next_entry(&mut entries, "version")?;
    let version_name = entry_name(&version_entry)?;
    snafu::ensure!(
        version_name == "version",
        error::ParseSnafu {
            reason: format!("expected 'version' entry, found '{version_name}'"),
        }
    );
    let version_bytes = read_to_vec(version_entry, "version")?;
    let version = ArtifactVersion::parse(&version_bytes)?;

    // 2. manifest
    let manifest_entry = next_entry(&mut entries, "manifest")?;
    let manifest_name = entry_name(&manifest_entry)?;
    snafu::ensure!(
        manifest_name == "manifest",
        error::ParseSnafu {
            reason: format!("expected 'manifest' entry, found '{manifest_name}'"),
        }
    );
    let manifest_raw = read_to_vec(manifest_entry, "manifest")?;
    let manifest = Manifest::parse(manifest_raw)?;

    // 3. optional manifest.sig, then header.tar*
    let peeked = next_entry(&mut entries, "manifest.sig or header.tar")?;
    let peeked_name = entry_name(&peeked)?;
    let (header_entry, manifest_signed) = if peeked_name == "manifest.sig" {
        let sig_bytes = read_to_vec(peeked, "manifest.sig")?;
        if !keys.is_empty() {
            let digest = checksum::digest_bytes(&manifest.raw);
            snafu::ensure!(
                checksum::verify(&digest, &sig_bytes, keys),
                error::SignatureVerificationSnafu
            );
        }
        (next_entry(&mut entries, "header.tar")?, true)
    } else {
        (peeked, false)
    };

    // 4. header.tar[.gz|.xz|.zst]
    let header_name = entry_name(&header_entry)?;
    let codec = Codec::detect(&header_name, "header.tar").ok_or_else(|| error::Error::Parse {
        reason: format!("expected 'header.tar[.gz|.xz|.zst]' entry, found '{header_name}'"),
    })?;
    let expected_header_digest = manifest.expected_digest(&header_name)?;
    let header_sha = ShaVerifyingReader::new(header_entry, expected_header_digest, header_name.clone());
    let header_decoder = Decoder::new(codec, header_sha, &header_name)?;
    let mut header_archive = tar::Archive::new(header_decoder);
    let (header, payloads) = parse_header_tar(&mut header_archive)?;

    let header_decoder = header_archive.into_inner();
    let header_sha = header_decoder.into_inner_drained()?;
    header_sha
        .finish()
        .map_err(|source| error::Error::ChecksumMismatch { source })?;

    // 5/6. payload data, unless this is an empty-payload artifact
    match entries.next() {
        None => {
            snafu::ensure!(
                header.is_empty_payload(),
                error::EofSnafu {
                    expected: "data/0000.tar".to_string(),
                }
            );
        }
        Some(entry_result) => {
            snafu::ensure!(!header.is_empty_payload(), error::UnexpectedPayloadSnafu);
            let data_entry = entry_result.context(error::TarEntrySnafu {
                entry: "data/0000.tar",
            })?;
            let data_name = entry_name(&data_entry)?;
            let data_codec =
                Codec::detect(&data_name, "data/0000.tar").ok_or_else(|| error::Error::Parse {
                    reason: format!(
                        "expected 'data/0000.tar[.gz|.xz|.zst]' entry, found '{data_name}'"
                    ),
                })?;
            let expected_data_digest = manifest.expected_digest(&data_name)?;
            let data_sha =
                ShaVerifyingReader::new(data_entry, expected_data_digest, data_name.clone());
            let data_decoder = Decoder::new(data_codec, data_sha, &data_name)?;
            let mut payload_archive = tar::Archive::new(data_decoder);
            stream_payload_files(&mut payload_archive, &manifest, &mut sink)?;

            let data_decoder = payload_archive.into_inner();
            let data_sha = data_decoder.into_inner_drained()?;
            data_sha
                .finish()
                .map_err(|source| error::Error::ChecksumMismatch { source })?;
        }
    }

    Ok(ParsedArtifact {
        version,
        manifest_signed,
        header,
        payloads,
    })
}

fn parse_header_tar<R: Read>(
    archive: &mut tar::Archive<R>,
) -> Result<(HeaderInfo, Vec<PayloadInfo>)> {
    let mut entries = archive
        .entries()
        .context(error::TarEntrySnafu { entry: "header-info" })?;

    let info_entry = next_entry(&mut entries, "header-info")?;
    let info_name = entry_name(&info_entry)?;
    snafu::ensure!(
        info_name == "header-info",
        error::ParseSnafu {
            reason: format!("expected 'header-info' entry, found '{info_name}'"),
        }
    );
    let info_bytes = read_to_vec(info_entry, "header-info")?;
    let header: HeaderInfo =
        serde_json::from_slice(&info_bytes).map_err(|source| error::Error::Json {
            entry: "header-info".to_string(),
            source,
        })?;

    let mut payloads: Vec<PayloadInfo> = Vec::new();
    for entry_result in entries {
        let entry = entry_result.context(error::TarEntrySnafu { entry: "type-info" })?;
        let name = entry_name(&entry)?;
        let (idx_str, rest) = name.split_once('/').ok_or_else(|| error::Error::Parse {
            reason: format!("unexpected header.tar entry '{name}'"),
        })?;
        let index: u32 = idx_str.parse().map_err(|_| error::Error::Parse {
            reason: format!("non-numeric payload index in '{name}'"),
        })?;
        match rest {
            "type-info" => {
                let bytes = read_to_vec(entry, &name)?;
                let type_info: TypeInfo =
                    serde_json::from_slice(&bytes).map_err(|source| error::Error::Json {
                        entry: name.clone(),
                        source,
                    })?;
                payloads.push(PayloadInfo {
                    index,
                    type_info,
                    meta_data: None,
                });
            }
            "meta-data" => {
                let bytes = read_to_vec(entry, &name)?;
                let payload = payloads
                    .iter_mut()
                    .find(|p| p.index == index)
                    .ok_or_else(|| error::Error::Parse {
                        reason: format!("meta-data for payload {index} with no prior type-info"),
                    })?;
                payload.meta_data = Some(bytes);
            }
            _ => {
                return error::ParseSnafu {
                    reason: format!("unexpected header.tar entry '{name}'"),
                }
                .fail()
            }
        }
    }

    Ok((header, payloads))
}

fn stream_payload_files<R, F>(
    archive: &mut tar::Archive<R>,
    manifest: &Manifest,
    sink: &mut F,
) -> Result<()>
where
    R: Read,
    F: FnMut(u32, &str, &mut dyn Read) -> io::Result<()>,
{
    let entries = archive
        .entries()
        .context(error::TarEntrySnafu { entry: "data/0000/*" })?;
    for entry_result in entries {
        let mut entry = entry_result.context(error::TarEntrySnafu {
            entry: "data/0000/*",
        })?;
        let file_name = entry_name(&entry)?;
        let manifest_key = format!("data/0000/{file_name}");
        let expected = manifest.expected_digest(&manifest_key)?;
        let mut file_sha = ShaVerifyingReader::new(&mut entry, expected, manifest_key);
        sink(0, &file_name, &mut file_sha).map_err(|source| error::Error::TarEntry {
            entry: file_name.clone(),
            source,
        })?;
        file_sha
            .finish()
            .map_err(|source| error::Error::ChecksumMismatch { source })?;
    }
    Ok(())
}
