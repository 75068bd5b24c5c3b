use crate::error::{self, Result};
use crate::tree::PayloadTree;
use nix::fcntl::{open, OFlag};
use nix::sys::stat::Mode;
use nix::unistd::{close, mkfifo, unlink};
use snafu::{ensure, ResultExt};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;
use std::process::{Child, Command};
use std::time::{Duration, Instant};
use wait_timeout::ChildExt;

/// One payload file the engine offers to the module, by archive-relative name and the path on
/// disk holding its (already checksum-verified) bytes.
pub struct OfferedFile<'a> {
    pub name: &'a str,
    pub path: &'a Path,
}

/// Runs the download phase of the module protocol: spawns `command` against `tree`'s working
/// directory, then either streams each file through `stream-next`/`streams/<name>` if the module
/// is reading from the FIFO, or falls back to copying every file straight into `files/<name>`
/// when it isn't.
pub fn run_download(
    command: &Path,
    args: &[String],
    tree: &PayloadTree,
    timeout: Duration,
    files: &[OfferedFile<'_>],
) -> Result<()> {
    let mut child = Command::new(command)
        .args(args)
        .current_dir(tree.root())
        .spawn()
        .context(error::SpawnSnafu {
            command: command.to_path_buf(),
        })?;

    let stream_next = tree.stream_next_path();
    if module_is_reading(&stream_next)? {
        stream_files(&stream_next, &tree.streams_dir(), files)?;
    } else {
        copy_to_files_dir(&tree.files_dir(), files)?;
    }

    wait_for_exit(&mut child, timeout, command)
}

/// A module that intends to read the download protocol is expected to open `stream-next` for
/// reading shortly after it starts; this is how long the engine polls for that before concluding
/// the module wants the plain `files/` fallback instead.
const READER_PROBE_WINDOW: Duration = Duration::from_millis(500);
const READER_PROBE_INTERVAL: Duration = Duration::from_millis(20);

/// Attempts a non-blocking open of `stream_next` for writing. A FIFO open for write with
/// `O_NONBLOCK` fails with `ENXIO` when no reader has it open, which is exactly the "module did
/// nothing" case; any other outcome means a reader (the module) is present. Retried for a short
/// window since the module may not have reached its own open() call yet.
fn module_is_reading(stream_next: &Path) -> Result<bool> {
    let deadline = Instant::now() + READER_PROBE_WINDOW;
    loop {
        match open(stream_next, OFlag::O_WRONLY | OFlag::O_NONBLOCK, Mode::empty()) {
            Ok(fd) => {
                close(fd).ok();
                return Ok(true);
            }
            Err(nix::errno::Errno::ENXIO) if Instant::now() < deadline => {
                std::thread::sleep(READER_PROBE_INTERVAL);
            }
            Err(nix::errno::Errno::ENXIO) => return Ok(false),
            Err(source) => {
                return Err(error::Error::OpenFifo {
                    path: stream_next.to_path_buf(),
                    source,
                })
            }
        }
    }
}

fn stream_files(stream_next: &Path, streams_dir: &Path, files: &[OfferedFile<'_>]) -> Result<()> {
    let mut next = File::options()
        .write(true)
        .open(stream_next)
        .context(error::WriteFileSnafu {
            path: stream_next.to_path_buf(),
        })?;

    for offered in files {
        let stream_path = streams_dir.join(offered.name);
        ensure!(
            !stream_path.exists(),
            error::FileExistsSnafu {
                path: stream_path.clone(),
            }
        );
        mkfifo(&stream_path, Mode::S_IRUSR | Mode::S_IWUSR).context(error::MkfifoSnafu {
            path: stream_path.clone(),
        })?;

        writeln!(next, "{}", offered.name).context(error::WriteFileSnafu {
            path: stream_next.to_path_buf(),
        })?;

        let mut src = File::open(offered.path).context(error::WriteFileSnafu {
            path: offered.path.to_path_buf(),
        })?;
        let mut dst = File::options()
            .write(true)
            .open(&stream_path)
            .context(error::WriteFileSnafu {
                path: stream_path.clone(),
            })?;
        let expected_len = src
            .metadata()
            .context(error::WriteFileSnafu {
                path: offered.path.to_path_buf(),
            })?
            .len();
        let copied = io::copy(&mut src, &mut dst).context(error::IoSnafu)?;
        ensure!(
            copied == expected_len,
            error::ShortReadSnafu {
                path: stream_path.clone(),
            }
        );
        unlink(&stream_path).ok();
    }

    // An empty line on `stream-next` signals completion.
    writeln!(next).context(error::WriteFileSnafu {
        path: stream_next.to_path_buf(),
    })?;
    Ok(())
}

fn copy_to_files_dir(files_dir: &Path, files: &[OfferedFile<'_>]) -> Result<()> {
    ensure!(
        files_dir.is_dir(),
        error::NoFilesDirSnafu {
            path: files_dir.to_path_buf(),
        }
    );
    for offered in files {
        let dest = files_dir.join(offered.name);
        fs::copy(offered.path, &dest).context(error::WriteFileSnafu { path: dest })?;
    }
    Ok(())
}

pub(crate) fn wait_for_exit(child: &mut Child, timeout: Duration, command: &Path) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match child
            .wait_timeout(remaining)
            .context(error::SpawnSnafu {
                command: command.to_path_buf(),
            })? {
            Some(status) => return classify_exit(status),
            None => {
                if Instant::now() >= deadline {
                    child.kill().ok();
                    child.wait().ok();
                    return error::TimeoutSnafu { timeout }.fail();
                }
            }
        }
    }
}

fn classify_exit(status: std::process::ExitStatus) -> Result<()> {
    match status.code() {
        Some(0) => Ok(()),
        Some(code) => error::AbnormalExitSnafu { code }.fail(),
        None => error::KilledBySignalSnafu.fail(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::PayloadMeta;

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
    fn falls_back_to_files_dir_when_module_ignores_stream_next() {
        let work = tempfile::tempdir().unwrap();
        let tree = PayloadTree::create(work.path(), 0, &meta()).unwrap();
        let payload_dir = tempfile::tempdir().unwrap();
        let payload_path = payload_dir.path().join("rootfs.img");
        fs::write(&payload_path, b"payload bytes").unwrap();

        let files = vec![OfferedFile {
            name: "rootfs.img",
            path: &payload_path,
        }];
        run_download(
            Path::new("/bin/true"),
            &[],
            &tree,
            Duration::from_secs(5),
            &files,
        )
        .unwrap();

        let copied = fs::read(tree.files_dir().join("rootfs.img")).unwrap();
        assert_eq!(copied, b"payload bytes");
    }

    #[test]
    fn streams_file_when_module_reads_stream_next() {
        let work = tempfile::tempdir().unwrap();
        let tree = PayloadTree::create(work.path(), 0, &meta()).unwrap();
        let payload_dir = tempfile::tempdir().unwrap();
        let payload_path = payload_dir.path().join("rootfs.img");
        fs::write(&payload_path, b"payload bytes").unwrap();

        // A shell module that reads one filename from stream-next, drains the matching stream
        // file, then reads the empty-line terminator and exits.
        let script = format!(
            "read name < {stream_next}; cat {streams}/$name > /dev/null; read done < {stream_next}",
            stream_next = tree.stream_next_path().display(),
            streams = tree.streams_dir().display(),
        );

        let files = vec![OfferedFile {
            name: "rootfs.img",
            path: &payload_path,
        }];
        run_download(
            Path::new("/bin/sh"),
            &["-c".to_string(), script],
            &tree,
            Duration::from_secs(5),
            &files,
        )
        .unwrap();

        assert!(!tree.files_dir().join("rootfs.img").exists());
    }

    #[test]
    fn nonzero_exit_is_abnormal_exit_error() {
        let status = Command::new("/bin/sh")
            .arg("-c")
            .arg("exit 3")
            .status()
            .unwrap();
        let result = classify_exit(status);
        assert!(matches!(result, Err(error::Error::AbnormalExit { code: 3 })));
    }

    #[test]
    fn timeout_kills_child_and_reports_timeout() {
        let mut child = Command::new("/bin/sh")
            .arg("-c")
            .arg("sleep 5")
            .spawn()
            .unwrap();
        let result = wait_for_exit(&mut child, Duration::from_millis(50), Path::new("/bin/sh"));
        assert!(matches!(result, Err(error::Error::Timeout { .. })));
    }
}
