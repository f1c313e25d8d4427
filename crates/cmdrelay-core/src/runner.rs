//! Process Runner
//!
//! Spawns a session's command through the host shell and drains stdout and
//! stderr into the session's [`OutputBuffer`](crate::buffer::OutputBuffer).
//! The runner is the buffer's only writer. It never watches subscribers: the
//! child runs to completion whether or not anyone is attached.
//!
//! Completion follows the shell process, not its pipes. Once the shell has
//! exited, output still open (held by a backgrounded grandchild, say) is read
//! for at most [`RunnerConfig::drain_grace`] before the exit chunk is sealed.

use crate::chunk::ChunkKind;
use crate::error::{Error, Result};
use crate::buffer::OutputBuffer;
use crate::session::Session;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Default read size for each output pipe
pub const DEFAULT_READ_BUFFER_BYTES: usize = 8 * 1024;

/// Default time to keep reading output after the shell has exited
pub const DEFAULT_DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Words the shell resolves itself; preflight never looks these up on PATH.
const SHELL_WORDS: &[&str] = &[
    // Keywords
    "if", "then", "else", "elif", "fi", "case", "esac", "for", "select", "while", "until",
    "do", "done", "in", "function", "time", "!", "[[", "]]", "{", "}",
    // POSIX special and regular builtins
    ".", ":", "[", "alias", "bg", "break", "cd", "command", "continue", "eval", "exec",
    "exit", "export", "false", "fc", "fg", "getopts", "hash", "jobs", "kill", "pwd",
    "read", "readonly", "return", "set", "shift", "test", "times", "trap", "true",
    "type", "ulimit", "umask", "unalias", "unset", "wait",
    // Common shell builtins
    "echo", "printf", "source", "local", "declare", "typeset", "let", "builtin",
    "enable", "shopt", "pushd", "popd", "dirs", "disown", "suspend", "logout",
    "coproc", "readarray", "mapfile", "help",
];

/// Shell used to interpret command text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellSpec {
    /// Shell program
    pub program: String,
    /// Flag that makes the shell run its next argument as a command string
    pub flag: String,
}

impl ShellSpec {
    /// The host's default shell (`/bin/sh -c`, or `cmd /C` on Windows).
    #[must_use]
    pub fn host() -> Self {
        if cfg!(windows) {
            Self::from_program("cmd")
        } else {
            Self::from_program("/bin/sh")
        }
    }

    /// Use `program`, picking the command-string flag from its name.
    #[must_use]
    pub fn from_program(program: impl Into<String>) -> Self {
        let program = program.into();
        let name = Path::new(&program)
            .file_stem()
            .map(|s| s.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let flag = if name == "cmd" { "/C" } else { "-c" };
        Self {
            program,
            flag: flag.to_string(),
        }
    }

    fn command(&self, text: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg(&self.flag).arg(text);
        cmd
    }
}

impl Default for ShellSpec {
    fn default() -> Self {
        Self::host()
    }
}

/// Runner configuration
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Shell used for every command
    pub shell: ShellSpec,
    /// Working directory for spawned commands (inherits the service's if unset)
    pub working_dir: Option<PathBuf>,
    /// Read size for each output pipe
    pub read_buffer_bytes: usize,
    /// Resolve the leading program before spawning
    pub preflight: bool,
    /// How long output may stay open after the shell has exited
    pub drain_grace: Duration,
}

impl RunnerConfig {
    /// Create a config with the host shell and default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shell: ShellSpec::host(),
            working_dir: None,
            read_buffer_bytes: DEFAULT_READ_BUFFER_BYTES,
            preflight: true,
            drain_grace: DEFAULT_DRAIN_GRACE,
        }
    }

    /// Use a specific shell program.
    #[must_use]
    pub fn with_shell(mut self, program: impl Into<String>) -> Self {
        self.shell = ShellSpec::from_program(program);
        self
    }

    /// Run commands in `dir`.
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Set the pipe read size.
    #[must_use]
    pub fn with_read_buffer(mut self, bytes: usize) -> Self {
        self.read_buffer_bytes = bytes.max(1);
        self
    }

    /// Enable or disable program preflight.
    #[must_use]
    pub fn with_preflight(mut self, enabled: bool) -> Self {
        self.preflight = enabled;
        self
    }

    /// Set how long to keep reading output once the shell has exited.
    #[must_use]
    pub fn with_drain_grace(mut self, grace: Duration) -> Self {
        self.drain_grace = grace;
        self
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Which pipe a chunk of output came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Stdout,
    Stderr,
}

impl Origin {
    fn chunk(self, text: String) -> ChunkKind {
        match self {
            Self::Stdout => ChunkKind::Stdout(text),
            Self::Stderr => ChunkKind::Stderr(text),
        }
    }
}

/// Spawns commands and records their output.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    config: RunnerConfig,
}

impl ProcessRunner {
    /// Create a runner.
    #[must_use]
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    /// Runner configuration.
    #[must_use]
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Run the session's command to completion.
    ///
    /// Returns once the exit (or error) chunk has been appended. Spawn
    /// failures are recorded in the buffer, not returned; the only error is
    /// [`Error::AlreadyStarted`] when the session already had a runner.
    pub async fn run(&self, session: &Arc<Session>) -> Result<()> {
        if !session.mark_runner_started() {
            return Err(Error::AlreadyStarted(session.id().to_string()));
        }
        let buffer = session.buffer();

        if self.config.preflight {
            if let Err(e) = preflight(session.command(), self.config.working_dir.as_deref()) {
                warn!(session_id = %session.id(), error = %e, "Command failed preflight");
                return record_failure(buffer, &e).await;
            }
        }

        let mut cmd = self.config.shell.command(session.command());
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);
        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let err = Error::Spawn(e.to_string());
                warn!(session_id = %session.id(), error = %err, "Failed to spawn command");
                return record_failure(buffer, &err).await;
            }
        };
        info!(
            session_id = %session.id(),
            pid = ?child.id(),
            command = %session.command(),
            "Process spawned"
        );

        let size = self.config.read_buffer_bytes;
        let (stdout, stderr) = (child.stdout.take(), child.stderr.take());
        let mut pipes = Box::pin(async {
            tokio::join!(
                drain(stdout, buffer, Origin::Stdout, size),
                drain(stderr, buffer, Origin::Stderr, size),
            )
        });

        let (status, drained) = tokio::select! {
            drained = &mut pipes => (child.wait().await, Some(drained)),
            status = child.wait() => {
                let drained = tokio::time::timeout(self.config.drain_grace, &mut pipes)
                    .await
                    .ok();
                (status, drained)
            }
        };
        // Closes any pipe a lingering grandchild still holds.
        drop(pipes);
        match drained {
            Some((out, err)) => {
                for (origin, result) in [(Origin::Stdout, out), (Origin::Stderr, err)] {
                    match result {
                        Ok(bytes) => {
                            debug!(session_id = %session.id(), ?origin, bytes, "Pipe drained");
                        }
                        Err(e) => {
                            warn!(session_id = %session.id(), ?origin, error = %e, "Pipe read failed");
                        }
                    }
                }
            }
            None => warn!(
                session_id = %session.id(),
                grace_ms = self.config.drain_grace.as_millis() as u64,
                "Output still open after exit; closing pipes"
            ),
        }

        match status {
            Ok(status) => {
                let code = exit_code(status);
                buffer.append(ChunkKind::Exit(code)).await?;
                info!(session_id = %session.id(), exit_code = code, "Process exited");
            }
            Err(e) => {
                warn!(session_id = %session.id(), error = %e, "Failed to wait for process");
                buffer
                    .append(ChunkKind::Error(format!("Failed to wait for process: {e}")))
                    .await?;
            }
        }
        Ok(())
    }
}

async fn record_failure(buffer: &OutputBuffer, err: &Error) -> Result<()> {
    buffer.append(ChunkKind::Error(err.to_string())).await?;
    Ok(())
}

/// Copy a pipe into the buffer until EOF. Returns the number of bytes read.
async fn drain<R>(
    reader: Option<R>,
    buffer: &OutputBuffer,
    origin: Origin,
    read_size: usize,
) -> Result<u64>
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return Ok(0);
    };
    let mut buf = vec![0u8; read_size];
    let mut decoder = Utf8Decoder::default();
    let mut total = 0u64;

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        total += n as u64;
        let text = decoder.decode(&buf[..n]);
        if !text.is_empty() {
            buffer.append(origin.chunk(text)).await?;
        }
    }

    let rest = decoder.finish();
    if !rest.is_empty() {
        buffer.append(origin.chunk(rest)).await?;
    }
    Ok(total)
}

/// Shell-style exit code: the process's own code, or 128 + signal number.
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

/// Check that the leading program of a simple command can be started.
///
/// Only plain words are checked; anything the shell has to interpret first
/// (assignments, expansions, subshells, quoting it cannot split) is left to
/// the shell.
pub fn preflight(command: &str, working_dir: Option<&Path>) -> Result<()> {
    let Some(words) = shlex::split(command.trim()) else {
        return Ok(());
    };
    let Some(program) = words.first() else {
        return Ok(());
    };
    if !is_plain_word(program) || SHELL_WORDS.contains(&program.as_str()) {
        return Ok(());
    }

    if program.contains('/') {
        let path = Path::new(program);
        let path = match working_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        };
        if path.is_file() {
            return Ok(());
        }
        return Err(Error::Spawn(format!("{program}: No such file or directory")));
    }

    which::which(program)
        .map(|_| ())
        .map_err(|_| Error::Spawn(format!("{program}: command not found")))
}

fn is_plain_word(word: &str) -> bool {
    !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | '+' | '@' | ','))
}

/// Decodes a byte stream as UTF-8 across read boundaries.
///
/// An incomplete trailing sequence is held back for the next read;
/// invalid bytes become U+FFFD.
#[derive(Debug, Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return out;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        None => {
                            self.pending.drain(..valid);
                            return out;
                        }
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                    }
                }
            }
        }
    }

    fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

#[cfg(test)]
mod tests;
