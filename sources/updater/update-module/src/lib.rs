//! The update-module protocol: per-payload-type executables the state machine invokes against a
//! working directory it lays out, including the `stream-next` FIFO download handshake.

pub mod error;
mod protocol;
mod tree;

use error::Result;
use snafu::ResultExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

pub use protocol::{run_download, OfferedFile};
pub use tree::{PayloadMeta, PayloadTree};

/// A module subcommand invoked with the working directory as `cwd` and no other arguments, per
/// the capability calls the runner makes outside the download phase.
#[derive(Debug, Clone, Copy)]
pub enum Capability {
    Prepare,
    NeedsRestart,
    SupportsRollback,
    Install,
    Rollback,
    Commit,
    Cleanup,
}

impl Capability {
    fn arg(self) -> &'static str {
        match self {
            Capability::Prepare => "Prepare",
            Capability::NeedsRestart => "NeedsRestart",
            Capability::SupportsRollback => "SupportsRollback",
            Capability::Install => "Install",
            Capability::Rollback => "Rollback",
            Capability::Commit => "Commit",
            Capability::Cleanup => "Cleanup",
        }
    }
}

/// A handle on one installed update module executable, bound to a payload's working directory.
pub struct UpdateModule {
    command: PathBuf,
    timeout: Duration,
}

impl UpdateModule {
    pub fn new(command: PathBuf, timeout: Duration) -> Self {
        UpdateModule { command, timeout }
    }

    pub fn command(&self) -> &Path {
        &self.command
    }

    /// Invokes `capability` against `tree`'s working directory and classifies the exit status.
    /// Non-zero exit, signal termination, and timeout are all reported as distinct errors so the
    /// runner can attribute the right failure class.
    pub fn invoke(&self, capability: Capability, tree: &PayloadTree) -> Result<()> {
        let mut child = Command::new(&self.command)
            .arg(capability.arg())
            .current_dir(tree.root())
            .spawn()
            .context(error::SpawnSnafu {
                command: self.command.clone(),
            })?;
        protocol::wait_for_exit(&mut child, self.timeout, &self.command)
    }

    /// Runs the download phase: spawns the module with `Download`, then streams or falls back to
    /// copying every offered payload file per the `stream-next` protocol.
    pub fn download(&self, tree: &PayloadTree, files: &[OfferedFile<'_>]) -> Result<()> {
        run_download(
            &self.command,
            &["Download".to_string()],
            tree,
            self.timeout,
            files,
        )
    }

    /// Runs a boolean-query capability (`NeedsRestart`, `SupportsRollback`): exit status `0`
    /// means yes, exit status `1` means no. Any other outcome -- a higher exit code, a signal, a
    /// timeout -- is a genuine module failure, not a "no".
    pub fn query(&self, capability: Capability, tree: &PayloadTree) -> Result<bool> {
        let mut child = Command::new(&self.command)
            .arg(capability.arg())
            .current_dir(tree.root())
            .spawn()
            .context(error::SpawnSnafu {
                command: self.command.clone(),
            })?;
        match protocol::wait_for_exit(&mut child, self.timeout, &self.command) {
            Ok(()) => Ok(true),
            Err(error::Error::AbnormalExit { code: 1 }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> PayloadMeta<'static> {
        PayloadMeta {
            artifact_name: "release-1",
            artifact_group: None,
            device_type: "test-board",
            payload_type: "rootfs-image",
            header_info: b"{}",
            type_info: b"{}",
            meta_data: None,
        }
    }

    #[test]
    fn query_exit_zero_is_yes() {
        let work = tempfile::tempdir().unwrap();
        let tree = PayloadTree::create(work.path(), 0, &meta()).unwrap();
        let module = UpdateModule::new(PathBuf::from("/bin/true"), Duration::from_secs(5));
        assert!(module.query(Capability::NeedsRestart, &tree).unwrap());
    }

    #[test]
    fn query_exit_one_is_no() {
        let work = tempfile::tempdir().unwrap();
        let tree = PayloadTree::create(work.path(), 0, &meta()).unwrap();
        let module = UpdateModule::new(PathBuf::from("/bin/false"), Duration::from_secs(5));
        assert!(!module.query(Capability::SupportsRollback, &tree).unwrap());
    }

    #[test]
    fn query_nonzero_non_one_exit_is_a_real_error() {
        let work = tempfile::tempdir().unwrap();
        let tree = PayloadTree::create(work.path(), 0, &meta()).unwrap();
        // "NeedsRestart" isn't a real script; sh exits 127 trying to run it as one, which must
        // surface as an error rather than being mistaken for a "no" answer.
        let module = UpdateModule::new(PathBuf::from("/bin/sh"), Duration::from_secs(5));
        let result = module.query(Capability::NeedsRestart, &tree);
        assert!(matches!(
            result,
            Err(error::Error::AbnormalExit { code }) if code != 1
        ));
    }
}
