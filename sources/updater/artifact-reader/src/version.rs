use crate::error::{self, Result};
use serde::Deserialize;
use snafu::ensure;

const SUPPORTED_VERSION: u32 = 3;
const SUPPORTED_FORMAT: &str = "mender";

#[derive(Debug, Deserialize)]
pub struct ArtifactVersion {
    pub format: String,
    pub version: u32,
}

impl ArtifactVersion {
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let version: Self =
            serde_json::from_slice(raw).map_err(|source| error::Error::Json {
                entry: "version".to_string(),
                source,
            })?;
        ensure!(
            version.format == SUPPORTED_FORMAT,
            error::UnsupportedFormatSnafu {
                format: version.format.clone(),
            }
        );
        ensure!(
            version.version == SUPPORTED_VERSION,
            error::UnsupportedVersionSnafu {
                version: version.version,
            }
        );
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_canonical_version() {
        let raw = br#"{"format":"mender","version":3}"#;
        assert!(ArtifactVersion::parse(raw).is_ok());
    }

    #[test]
    fn rejects_wrong_version_number() {
        let raw = br#"{"format":"mender","version":2}"#;
        assert!(matches!(
            ArtifactVersion::parse(raw),
            Err(error::Error::UnsupportedVersion { version: 2 })
        ));
    }

    #[test]
    fn rejects_wrong_format_name() {
        let raw = br#"{"format":"not-mender","version":3}"#;
        assert!(matches!(
            ArtifactVersion::parse(raw),
            Err(error::Error::UnsupportedFormat { .. })
        ));
    }
}
