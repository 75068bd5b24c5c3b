use snafu::Snafu;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("control map id '{}' is not a valid UUID", id))]
    InvalidId { id: String },

    #[snafu(display("control map '{}' priority {} is outside [-10, 10]", id, priority))]
    InvalidPriority { id: String, priority: i8 },

    #[snafu(display("control map '{}' has state key '{}', not one of the allowed control points", id, state))]
    InvalidStateKey { id: String, state: String },

    #[snafu(display("control map id '{}' already present in the pool", id))]
    DuplicateId { id: String },

    #[snafu(display("failed to read control map file '{}': {}", path.display(), source))]
    MapRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("failed to parse control map file '{}': {}", path.display(), source))]
    MapParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[snafu(display("failed to serialize control map: {}", source))]
    MapSerialize { source: serde_json::Error },

    #[snafu(display("failed to write control map file '{}': {}", path.display(), source))]
    MapWrite {
        path: PathBuf,
        source: std::io::Error,
    },
}
