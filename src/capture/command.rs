//! External command runner shared by the capture adapters
//!
//! A command either streams its capture to stdout or is handed the
//! destination path as an argument. Either way the output lands in
//! `<destination>.partial` first and is renamed only after the command exits
//! successfully, so a failed capture never leaves a file under its final name.

use std::ffi::{OsStr, OsString};
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{BackupError, BackupResult};
use crate::interrupt;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Diagnostics kept from a failing command's stderr
const MAX_DIAGNOSTIC_BYTES: usize = 8 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
enum CommandArg {
    Literal(OsString),
    Destination,
}

/// An external command that produces one capture file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandCapture {
    program: OsString,
    args: Vec<CommandArg>,
}

impl CommandCapture {
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            program: program.as_ref().to_os_string(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(CommandArg::Literal(arg.as_ref().to_os_string()));
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        for arg in args {
            self = self.arg(arg);
        }
        self
    }

    /// Pass the output path as the next argument instead of capturing stdout
    pub fn destination_arg(mut self) -> Self {
        self.args.push(CommandArg::Destination);
        self
    }

    fn writes_to_argument(&self) -> bool {
        self.args.contains(&CommandArg::Destination)
    }

    /// The command line rendered for a destination, for logs and tests
    pub fn render(&self, destination: &Path) -> Vec<OsString> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().map(|arg| match arg {
                CommandArg::Literal(value) => value.clone(),
                CommandArg::Destination => destination.as_os_str().to_os_string(),
            }))
            .collect()
    }

    /// Run the command, leaving its output at `destination` only on success
    pub fn run(
        &self,
        source_id: &str,
        destination: &Path,
        timeout: Option<Duration>,
    ) -> BackupResult<()> {
        let partial = partial_path(destination);

        match self.run_into(source_id, &partial, timeout) {
            Ok(()) => fs::rename(&partial, destination).map_err(|e| {
                let _ = fs::remove_file(&partial);
                BackupError::capture(
                    source_id,
                    format!("failed to move capture into place: {}", e),
                )
            }),
            Err(err) => {
                let _ = fs::remove_file(&partial);
                Err(err)
            }
        }
    }

    fn run_into(
        &self,
        source_id: &str,
        target: &Path,
        timeout: Option<Duration>,
    ) -> BackupResult<()> {
        let rendered = self.render(target);
        let mut cmd = Command::new(&rendered[0]);
        cmd.args(&rendered[1..]).stdin(Stdio::null());

        if self.writes_to_argument() {
            cmd.stdout(Stdio::null());
        } else {
            let file = File::create(target).map_err(|e| {
                BackupError::capture(source_id, format!("failed to create output file: {}", e))
            })?;
            cmd.stdout(Stdio::from(file));
        }

        // stderr goes to an anonymous file so a chatty command can't block on a full pipe
        let mut stderr_log = tempfile::tempfile()?;
        cmd.stderr(Stdio::from(stderr_log.try_clone()?));

        debug!(source = source_id, command = ?rendered, "starting capture command");
        let mut child = cmd.spawn().map_err(|e| {
            BackupError::capture(
                source_id,
                format!("failed to start {}: {}", self.program.to_string_lossy(), e),
            )
        })?;

        let outcome = wait_for(&mut child, timeout);
        let diagnostics = read_diagnostics(&mut stderr_log);

        let reason = match outcome {
            Ok(WaitOutcome::Exited(status)) if status.success() => return Ok(()),
            Ok(WaitOutcome::Exited(status)) => match status.code() {
                Some(code) => format!("command exited with status {}", code),
                None => "command terminated by signal".to_string(),
            },
            Ok(WaitOutcome::TimedOut(limit)) => {
                format!("command timed out after {}s", limit.as_secs())
            }
            Ok(WaitOutcome::Interrupted) => "interrupted".to_string(),
            Err(e) => format!("failed waiting for command: {}", e),
        };

        warn!(source = source_id, %reason, "capture command failed");
        Err(BackupError::Capture {
            source_id: source_id.to_string(),
            reason,
            diagnostics,
        })
    }
}

enum WaitOutcome {
    Exited(ExitStatus),
    TimedOut(Duration),
    Interrupted,
}

fn wait_for(child: &mut Child, timeout: Option<Duration>) -> std::io::Result<WaitOutcome> {
    let started = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(WaitOutcome::Exited(status));
        }

        if interrupt::requested() {
            stop(child);
            return Ok(WaitOutcome::Interrupted);
        }

        if let Some(limit) = timeout {
            if started.elapsed() >= limit {
                stop(child);
                return Ok(WaitOutcome::TimedOut(limit));
            }
        }

        thread::sleep(POLL_INTERVAL);
    }
}

fn stop(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

fn read_diagnostics(log: &mut File) -> String {
    let mut bytes = Vec::new();
    if log.seek(SeekFrom::Start(0)).is_err() || log.read_to_end(&mut bytes).is_err() {
        return String::new();
    }
    let start = bytes.len().saturating_sub(MAX_DIAGNOSTIC_BYTES);
    String::from_utf8_lossy(&bytes[start..]).into_owned()
}

/// Path a capture is written to before it is moved into place
pub fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(OsStr::to_os_string)
        .unwrap_or_default();
    name.push(".partial");
    destination.with_file_name(name)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sh(script: &str) -> CommandCapture {
        CommandCapture::new("sh").arg("-c").arg(script)
    }

    #[test]
    fn test_stdout_capture() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("dump.sql");

        sh("printf 'CREATE TABLE t;'").run("db", &dest, None).unwrap();

        assert_eq!(fs::read_to_string(&dest).unwrap(), "CREATE TABLE t;");
        assert!(!partial_path(&dest).exists());
    }

    #[test]
    fn test_destination_argument_capture() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("tree.tar");

        CommandCapture::new("sh")
            .arg("-c")
            .arg("printf tree > \"$0\"")
            .destination_arg()
            .run("tree", &dest, None)
            .unwrap();

        assert_eq!(fs::read_to_string(&dest).unwrap(), "tree");
    }

    #[test]
    fn test_failure_removes_output_and_keeps_stderr() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("dump.sql");

        let err = sh("printf partial; echo 'access denied' >&2; exit 3")
            .run("kimai", &dest, None)
            .unwrap_err();

        match err {
            BackupError::Capture {
                source_id,
                reason,
                diagnostics,
            } => {
                assert_eq!(source_id, "kimai");
                assert_eq!(reason, "command exited with status 3");
                assert!(diagnostics.contains("access denied"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!dest.exists());
        assert!(!partial_path(&dest).exists());
    }

    #[test]
    fn test_timeout_kills_command() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("slow.tar.gz");

        let started = Instant::now();
        let err = sh("sleep 30")
            .run("slow", &dest, Some(Duration::from_millis(200)))
            .unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(err.to_string().contains("timed out"));
        assert!(!dest.exists());
    }

    #[test]
    fn test_missing_program() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("out");

        let err = CommandCapture::new("definitely-not-a-real-binary-tierback")
            .run("ghost", &dest, None)
            .unwrap_err();

        assert!(err.is_capture());
        assert!(!dest.exists());
    }

    #[test]
    fn test_render_places_destination() {
        let cmd = CommandCapture::new("tar")
            .arg("-cf")
            .destination_arg()
            .args(["-C", "/srv"]);
        let rendered = cmd.render(Path::new("/tmp/out.tar"));
        assert_eq!(rendered, vec!["tar", "-cf", "/tmp/out.tar", "-C", "/srv"]);
    }

    #[test]
    fn test_partial_path() {
        assert_eq!(
            partial_path(Path::new("/a/b/dump.sql")),
            PathBuf::from("/a/b/dump.sql.partial")
        );
    }
}
