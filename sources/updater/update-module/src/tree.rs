use crate::error::{self, Result};
use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use snafu::ResultExt;
use std::fs;
use std::path::{Path, PathBuf};

/// Metadata about one payload, enough to lay out its working directory.
pub struct PayloadMeta<'a> {
    pub artifact_name: &'a str,
    pub artifact_group: Option<&'a str>,
    pub device_type: &'a str,
    pub payload_type: &'a str,
    pub header_info: &'a [u8],
    pub type_info: &'a [u8],
    pub meta_data: Option<&'a [u8]>,
}

/// The on-disk working directory an update module is invoked against:
/// `<work>/payloads/<NNNN>/tree/{version, current_*, header/, tmp/, streams/, files/, stream-next}`.
pub struct PayloadTree {
    root: PathBuf,
}

const ARTIFACT_FORMAT_VERSION: &[u8] = b"3";

impl PayloadTree {
    pub fn create(work_dir: &Path, index: u32, meta: &PayloadMeta<'_>) -> Result<Self> {
        let root = work_dir.join("payloads").join(format!("{index:04}")).join("tree");
        let header = root.join("header");
        let tmp = root.join("tmp");
        let streams = root.join("streams");
        let files = root.join("files");
        for dir in [&root, &header, &tmp, &streams, &files] {
            fs::create_dir_all(dir).context(error::CreateDirSnafu { path: dir.clone() })?;
        }

        write_file(&root.join("version"), ARTIFACT_FORMAT_VERSION)?;
        write_file(
            &root.join("current_artifact_name"),
            meta.artifact_name.as_bytes(),
        )?;
        write_file(
            &root.join("current_artifact_group"),
            meta.artifact_group.unwrap_or_default().as_bytes(),
        )?;
        write_file(
            &root.join("current_device_type"),
            meta.device_type.as_bytes(),
        )?;
        write_file(
            &header.join("artifact_name"),
            meta.artifact_name.as_bytes(),
        )?;
        write_file(
            &header.join("artifact_group"),
            meta.artifact_group.unwrap_or_default().as_bytes(),
        )?;
        write_file(&header.join("payload_type"), meta.payload_type.as_bytes())?;
        write_file(&header.join("header-info"), meta.header_info)?;
        write_file(&header.join("type-info"), meta.type_info)?;
        if let Some(data) = meta.meta_data {
            write_file(&header.join("meta-data"), data)?;
        }

        let stream_next = root.join("stream-next");
        mkfifo(&stream_next, Mode::S_IRUSR | Mode::S_IWUSR).context(error::MkfifoSnafu {
            path: stream_next.clone(),
        })?;

        Ok(PayloadTree { root })
    }

    /// Reopens a tree laid out by an earlier `create` call in this same update, without
    /// recreating its directories or `stream-next` FIFO.
    pub fn open(work_dir: &Path, index: u32) -> Self {
        let root = work_dir.join("payloads").join(format!("{index:04}")).join("tree");
        PayloadTree { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn stream_next_path(&self) -> PathBuf {
        self.root.join("stream-next")
    }

    pub fn streams_dir(&self) -> PathBuf {
        self.root.join("streams")
    }

    pub fn files_dir(&self) -> PathBuf {
        self.root.join("files")
    }
}

fn write_file(path: &Path, contents: &[u8]) -> Result<()> {
    fs::write(path, contents).context(error::WriteFileSnafu {
        path: path.to_path_buf(),
    })
}
