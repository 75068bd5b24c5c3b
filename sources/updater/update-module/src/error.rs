use snafu::Snafu;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("failed to create working directory '{}': {}", path.display(), source))]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("failed to write '{}': {}", path.display(), source))]
    WriteFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("failed to create FIFO '{}': {}", path.display(), source))]
    Mkfifo {
        path: PathBuf,
        source: nix::Error,
    },

    #[snafu(display("failed to probe FIFO '{}' for a reader: {}", path.display(), source))]
    OpenFifo {
        path: PathBuf,
        source: nix::Error,
    },

    #[snafu(display("no 'files/' backup directory could be created at '{}'", path.display()))]
    NoFilesDir { path: PathBuf },

    #[snafu(display("failed to spawn update module '{}': {}", command.display(), source))]
    Spawn {
        command: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("update module terminated abnormally: exit status {}", code))]
    AbnormalExit { code: i32 },

    #[snafu(display("update module terminated by signal"))]
    KilledBySignal,

    #[snafu(display("update module timed out and was killed after {:?}", timeout))]
    Timeout { timeout: std::time::Duration },

    #[snafu(display("update module read only a short prefix of '{}'", path.display()))]
    ShortRead { path: PathBuf },

    #[snafu(display("filesystem blocked by unexpected file at '{}'", path.display()))]
    FileExists { path: PathBuf },

    #[snafu(display("I/O error streaming payload files: {}", source))]
    Io { source: std::io::Error },
}
