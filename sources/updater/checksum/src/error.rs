use snafu::Snafu;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display(
        "checksum mismatch for '{}': expected {}, computed {}",
        path,
        expected,
        computed
    ))]
    ChecksumMismatch {
        path: String,
        expected: String,
        computed: String,
    },

    #[snafu(display("failed to read key file '{}': {}", path.display(), source))]
    KeyRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("key file '{}' is not a recognized RSA or EC key", path.display()))]
    UnrecognizedKey { path: PathBuf },

    #[snafu(display("failed to sign digest: {}", source))]
    Sign { source: signature::Error },

    #[snafu(display("base64 encoding length mismatch: expected {}, got {}", expected, actual))]
    Base64Error { expected: usize, actual: usize },

    #[snafu(display("failed to decode base64 data: {}", source))]
    Base64Decode { source: base64::DecodeError },
}
