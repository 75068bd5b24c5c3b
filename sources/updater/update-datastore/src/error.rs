use snafu::Snafu;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("failed to open datastore at '{}': {}", path.display(), source))]
    Open {
        path: std::path::PathBuf,
        source: redb::DatabaseError,
    },

    #[snafu(display("failed to begin write transaction: {}", source))]
    BeginWrite { source: redb::TransactionError },

    #[snafu(display("failed to begin read transaction: {}", source))]
    BeginRead { source: redb::TransactionError },

    #[snafu(display("failed to open table: {}", source))]
    OpenTable { source: redb::TableError },

    #[snafu(display("failed to read key '{}': {}", key, source))]
    Read {
        key: String,
        source: redb::StorageError,
    },

    #[snafu(display("failed to write key '{}': {}", key, source))]
    Write {
        key: String,
        source: redb::StorageError,
    },

    #[snafu(display("failed to remove key '{}': {}", key, source))]
    Remove {
        key: String,
        source: redb::StorageError,
    },

    #[snafu(display("failed to commit transaction: {}", source))]
    Commit { source: redb::CommitError },

    #[snafu(display("caller aborted transaction: {}", reason))]
    Aborted { reason: String },

    #[snafu(display("required key '{}' is absent from the datastore", key))]
    MissingKey { key: String },

    #[snafu(display("failed to (de)serialize value for key '{}': {}", key, source))]
    Serde {
        key: String,
        source: serde_json::Error,
    },
}
