use snafu::Snafu;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("unexpected end of artifact stream, expected '{}'", expected))]
    Eof { expected: String },

    #[snafu(display("malformed artifact: {}", reason))]
    Parse { reason: String },

    #[snafu(display("failed to read tar entry '{}': {}", entry, source))]
    TarEntry {
        entry: String,
        source: std::io::Error,
    },

    #[snafu(display("failed to decompress '{}': {}", entry, source))]
    Decompress {
        entry: String,
        source: std::io::Error,
    },

    #[snafu(display("failed to drain compressed stream: {}", source))]
    Io { source: std::io::Error },

    #[snafu(display("failed to parse JSON in '{}': {}", entry, source))]
    Json {
        entry: String,
        source: serde_json::Error,
    },

    #[snafu(display("unsupported artifact version {} (only 3 is supported)", version))]
    UnsupportedVersion { version: u32 },

    #[snafu(display("unsupported artifact format '{}' (only \"mender\" is supported)", format))]
    UnsupportedFormat { format: String },

    #[snafu(display("checksum mismatch: {}", source))]
    ChecksumMismatch { source: checksum::error::Error },

    #[snafu(display("manifest signature did not verify against any configured key"))]
    SignatureVerification,

    #[snafu(display("manifest has no entry for path '{}'", path))]
    MissingManifestEntry { path: String },

    #[snafu(display("payload entry present for empty-payload artifact"))]
    UnexpectedPayload,
}
