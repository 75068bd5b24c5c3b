//! Process-exclusive transactional key/value store backing the state machine's persisted
//! progress, artifact provides, and control-map scratch data.

pub mod error;
pub mod keys;

use error::Result;
use redb::{Database, ReadableTable, TableDefinition};
use snafu::{ensure, ResultExt};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("kv");

/// A process-exclusive handle on the on-disk store. `redb` takes an OS file lock for the
/// lifetime of the `Database`, so only one process may hold one open at a time.
pub struct Datastore {
    db: Database,
    path: PathBuf,
}

impl Datastore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let db = Database::create(&path).context(error::OpenSnafu { path: path.clone() })?;
        {
            let txn = db.begin_write().context(error::BeginWriteSnafu)?;
            txn.open_table(TABLE).context(error::OpenTableSnafu)?;
            txn.commit().context(error::CommitSnafu)?;
        }
        Ok(Self { db, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runs `f` against a fresh write transaction. If `f` returns `Ok`, every write it made is
    /// committed atomically; if it returns `Err`, the transaction is dropped unwritten and the
    /// store is left exactly as it was.
    pub fn write_transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut WriteTxn<'_>) -> Result<T>,
    {
        let txn = self.db.begin_write().context(error::BeginWriteSnafu)?;
        let result = {
            let table = txn.open_table(TABLE).context(error::OpenTableSnafu)?;
            let mut wtxn = WriteTxn { table };
            f(&mut wtxn)
        };
        match result {
            Ok(value) => {
                txn.commit().context(error::CommitSnafu)?;
                Ok(value)
            }
            Err(e) => {
                // Dropping `txn` without calling `commit` discards every write made through it.
                Err(e)
            }
        }
    }

    pub fn read_transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&ReadTxn) -> Result<T>,
    {
        let txn = self.db.begin_read().context(error::BeginReadSnafu)?;
        let table = txn.open_table(TABLE).context(error::OpenTableSnafu)?;
        let rtxn = ReadTxn { table };
        f(&rtxn)
    }
}

pub struct ReadTxn {
    table: redb::ReadOnlyTable<&'static str, &'static [u8]>,
}

pub struct WriteTxn<'txn> {
    table: redb::Table<'txn, &'static str, &'static [u8]>,
}

impl ReadTxn {
    pub fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let value = self
            .table
            .get(key)
            .context(error::ReadSnafu { key })?
            .map(|v| v.value().to_vec());
        Ok(value)
    }

    pub fn read_required(&self, key: &str) -> Result<Vec<u8>> {
        self.read(key)?.ok_or_else(|| error::Error::MissingKey {
            key: key.to_string(),
        })
    }

    pub fn read_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.read(key)? {
            Some(bytes) => {
                let value = serde_json::from_slice(&bytes)
                    .context(error::SerdeSnafu { key: key.to_string() })?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }
}

impl<'txn> WriteTxn<'txn> {
    pub fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let value = self
            .table
            .get(key)
            .context(error::ReadSnafu { key })?
            .map(|v| v.value().to_vec());
        Ok(value)
    }

    pub fn write(&mut self, key: &str, value: &[u8]) -> Result<()> {
        self.table
            .insert(key, value)
            .context(error::WriteSnafu { key })?;
        Ok(())
    }

    pub fn write_json<T: serde::Serialize>(&mut self, key: &str, value: &T) -> Result<()> {
        let bytes =
            serde_json::to_vec(value).context(error::SerdeSnafu { key: key.to_string() })?;
        self.write(key, &bytes)
    }

    pub fn remove(&mut self, key: &str) -> Result<()> {
        self.table.remove(key).context(error::RemoveSnafu { key })?;
        Ok(())
    }
}

/// The artifact-provides map as parsed from persisted JSON: `provides key -> value`.
pub type Provides = BTreeMap<String, String>;

fn matches_any(key: &str, clears: &[String]) -> bool {
    clears.iter().any(|pattern| glob_match(pattern, key))
}

/// Minimal shell-glob matcher supporting `*` as the only wildcard, matching the patterns used in
/// `clears_artifact_provides` (e.g. `rootfs-image.*`).
fn glob_match(pattern: &str, candidate: &str) -> bool {
    match pattern.split_once('*') {
        None => pattern == candidate,
        Some((prefix, suffix)) => {
            candidate.len() >= prefix.len() + suffix.len()
                && candidate.starts_with(prefix)
                && candidate.ends_with(suffix)
        }
    }
}

/// Applies a successful install's provides/group to the datastore in one write transaction, per
/// the clear/merge rule: if `clears` is empty, the new provides entirely replace the existing
/// ones; otherwise the existing entries not matched by any clear pattern are preserved and the
/// new entries are merged over them. `artifact_group` is tracked outside the provides map and is
/// removed if cleared (directly or via a wildcard) unless the new artifact re-sets it.
pub fn commit_artifact_data(
    txn: &mut WriteTxn<'_>,
    artifact_name: &str,
    artifact_group: Option<&str>,
    new_provides: &Provides,
    clears: &[String],
) -> Result<()> {
    ensure!(
        !artifact_name.is_empty(),
        error::AbortedSnafu {
            reason: "artifact_name must not be empty".to_string(),
        }
    );

    let existing: Provides = txn.read_json(keys::ARTIFACT_PROVIDES)?.unwrap_or_default();

    let merged = if clears.is_empty() {
        new_provides.clone()
    } else {
        let mut preserved: Provides = existing
            .into_iter()
            .filter(|(k, _)| !matches_any(k, clears))
            .collect();
        for (k, v) in new_provides {
            preserved.insert(k.clone(), v.clone());
        }
        preserved
    };
    txn.write_json(keys::ARTIFACT_PROVIDES, &merged)?;

    let group_cleared = clears.is_empty() || matches_any("artifact_group", clears);
    match artifact_group {
        Some(group) => txn.write(keys::ARTIFACT_GROUP, group.as_bytes())?,
        None if group_cleared => txn.remove(keys::ARTIFACT_GROUP)?,
        None => {}
    }

    txn.write(keys::ARTIFACT_NAME, artifact_name.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_temp() -> (Datastore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Datastore::open(dir.path().join("state.redb")).unwrap();
        (store, dir)
    }

    #[test]
    fn write_then_read_round_trips() {
        let (store, _dir) = open_temp();
        store
            .write_transaction(|txn| {
                txn.write(keys::STATE, b"idle")?;
                Ok(())
            })
            .unwrap();
        let value = store
            .read_transaction(|txn| txn.read(keys::STATE))
            .unwrap();
        assert_eq!(value, Some(b"idle".to_vec()));
    }

    #[test]
    fn failed_write_transaction_discards_all_writes() {
        let (store, _dir) = open_temp();
        let result: Result<()> = store.write_transaction(|txn| {
            txn.write(keys::STATE, b"update-install")?;
            Err(error::Error::Aborted {
                reason: "simulated failure".to_string(),
            })
        });
        assert!(result.is_err());
        let value = store
            .read_transaction(|txn| txn.read(keys::STATE))
            .unwrap();
        assert_eq!(value, None);
    }

    #[test]
    fn commit_artifact_data_full_replace_when_clears_empty() {
        let (store, _dir) = open_temp();
        let mut initial = Provides::new();
        initial.insert("rootfs-image.version".to_string(), "v1".to_string());
        store
            .write_transaction(|txn| {
                txn.write_json(keys::ARTIFACT_PROVIDES, &initial)?;
                txn.write(keys::ARTIFACT_GROUP, b"fleet-a")?;
                Ok(())
            })
            .unwrap();

        let mut new_provides = Provides::new();
        new_provides.insert("rootfs-image.version".to_string(), "v2".to_string());
        store
            .write_transaction(|txn| {
                commit_artifact_data(txn, "release-2", None, &new_provides, &[])
            })
            .unwrap();

        let (provides, group, name) = store
            .read_transaction(|txn| {
                Ok((
                    txn.read_json::<Provides>(keys::ARTIFACT_PROVIDES)?
                        .unwrap_or_default(),
                    txn.read(keys::ARTIFACT_GROUP)?,
                    txn.read_required(keys::ARTIFACT_NAME)?,
                ))
            })
            .unwrap();
        assert_eq!(provides.get("rootfs-image.version").unwrap(), "v2");
        assert_eq!(group, None);
        assert_eq!(name, b"release-2");
    }

    #[test]
    fn commit_artifact_data_preserves_unmatched_keys_when_clearing() {
        let (store, _dir) = open_temp();
        let mut initial = Provides::new();
        initial.insert("rootfs-image.version".to_string(), "v1".to_string());
        initial.insert("bootloader.version".to_string(), "b1".to_string());
        store
            .write_transaction(|txn| {
                txn.write_json(keys::ARTIFACT_PROVIDES, &initial)?;
                txn.write(keys::ARTIFACT_GROUP, b"fleet-a")?;
                Ok(())
            })
            .unwrap();

        let new_provides = Provides::new();
        let clears = vec!["rootfs-image.*".to_string()];
        store
            .write_transaction(|txn| {
                commit_artifact_data(txn, "release-3", Some("fleet-a"), &new_provides, &clears)
            })
            .unwrap();

        let provides = store
            .read_transaction(|txn| {
                Ok(txn
                    .read_json::<Provides>(keys::ARTIFACT_PROVIDES)?
                    .unwrap_or_default())
            })
            .unwrap();
        assert!(!provides.contains_key("rootfs-image.version"));
        assert_eq!(provides.get("bootloader.version").unwrap(), "b1");
    }

    #[test]
    fn glob_match_supports_single_wildcard() {
        assert!(glob_match("rootfs-image.*", "rootfs-image.version"));
        assert!(!glob_match("rootfs-image.*", "bootloader.version"));
        assert!(glob_match("artifact_group", "artifact_group"));
    }
}
