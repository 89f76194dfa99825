//! Local subprocess backend.
//!
//! Spawns the interpreter directly on the host, which is assumed to already
//! be isolated (container, VM). On Unix the child leads its own process
//! group so a timeout can take down anything it forked.

use std::io;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use super::{ExecError, ExecutionBackend, Invocation, ProcessOutput};

/// How long output readers may keep draining after the child exits or is killed.
const DEFAULT_DRAIN_GRACE: Duration = Duration::from_millis(250);

const READ_CHUNK: usize = 8 * 1024;

/// Backend that runs interpreters as plain child processes.
#[derive(Debug, Clone)]
pub struct ProcessBackend {
    drain_grace: Duration,
}

impl Default for ProcessBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessBackend {
    /// Create a new process backend.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            drain_grace: DEFAULT_DRAIN_GRACE,
        }
    }

    /// Override the post-exit drain window.
    #[must_use]
    pub const fn with_drain_grace(mut self, grace: Duration) -> Self {
        self.drain_grace = grace;
        self
    }
}

#[async_trait]
impl ExecutionBackend for ProcessBackend {
    #[instrument(skip(self, invocation), fields(program = %invocation.program, timeout = ?invocation.timeout))]
    async fn run(&self, invocation: &Invocation) -> Result<ProcessOutput, ExecError> {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .current_dir(&invocation.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        {
            cmd.process_group(0);
        }

        let mut child = cmd.spawn().map_err(|source| ExecError::Spawn {
            program: invocation.program.clone(),
            source,
        })?;
        let pid = child.id();
        debug!(?pid, "Spawned child process");

        // Anything the child left behind dies with it, even if this future is dropped.
        let mut group = ProcessGroup::new(pid);

        // Readers run in their own tasks so `child` stays free for wait/kill.
        let stdout = Capture::start(child.stdout.take(), invocation.max_output_bytes);
        let stderr = Capture::start(child.stderr.take(), invocation.max_output_bytes);

        let waited = tokio::time::timeout(invocation.timeout, child.wait()).await;
        let (exit_code, timed_out) = match waited {
            Ok(Ok(status)) => {
                group.kill();
                (status.code(), false)
            }
            Ok(Err(e)) => {
                kill_tree(&mut child, &mut group).await;
                return Err(ExecError::Wait(e));
            }
            Err(_) => {
                warn!(?pid, "Execution timed out, killing process group");
                kill_tree(&mut child, &mut group).await;
                (None, true)
            }
        };

        let (stdout, stdout_truncated) = stdout.finish(self.drain_grace).await;
        let (stderr, stderr_truncated) = stderr.finish(self.drain_grace).await;

        let output = ProcessOutput {
            exit_code,
            stdout,
            stderr,
            timed_out,
            stdout_truncated,
            stderr_truncated,
        };

        debug!(
            exit_code = ?output.exit_code,
            timed_out,
            stdout_len = output.stdout.len(),
            stderr_len = output.stderr.len(),
            "Execution completed"
        );

        Ok(output)
    }
}

/// Kill the child's process group and the child itself, then reap it.
async fn kill_tree(child: &mut Child, group: &mut ProcessGroup) {
    group.kill();
    if let Err(e) = child.kill().await {
        debug!(error = %e, "Child already gone");
    }
}

/// The process group led by a spawned child.
///
/// Signalled once, either explicitly or on drop. On non-Unix targets there
/// is no group and this does nothing.
struct ProcessGroup {
    pgid: Option<u32>,
}

impl ProcessGroup {
    const fn new(pgid: Option<u32>) -> Self {
        Self { pgid }
    }

    fn kill(&mut self) {
        let Some(pgid) = self.pgid.take() else {
            return;
        };
        #[cfg(unix)]
        {
            signal_process_group(pgid);
        }
        #[cfg(not(unix))]
        {
            let _ = pgid;
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(unix)]
#[allow(unsafe_code)]
fn signal_process_group(pid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: kill(2) only takes integers; a stale group id yields ESRCH.
    let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if rc != 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            debug!(pgid, error = %err, "Process group kill failed");
        }
    }
}

#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    truncated: bool,
}

/// One output stream being read in the background.
///
/// Bytes land in a shared buffer so a reader that has to be aborted still
/// leaves behind what it already read.
struct Capture {
    buffer: Arc<Mutex<Captured>>,
    task: Option<JoinHandle<()>>,
}

impl Capture {
    fn start<R>(reader: Option<R>, limit: usize) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(Captured::default()));
        let task = reader.map(|reader| tokio::spawn(pump(reader, Arc::clone(&buffer), limit)));
        Self { buffer, task }
    }

    async fn finish(mut self, grace: Duration) -> (String, bool) {
        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(grace, &mut task).await.is_err() {
                // A descendant is still holding the pipe open.
                task.abort();
            }
        }

        let captured = std::mem::take(
            &mut *self.buffer.lock().unwrap_or_else(PoisonError::into_inner),
        );
        (
            String::from_utf8_lossy(&captured.bytes).into_owned(),
            captured.truncated,
        )
    }
}

/// Read `reader` to EOF, keeping at most `limit` bytes and discarding the rest.
///
/// The stream is drained past the limit so the child never blocks on a full pipe.
async fn pump<R: AsyncRead + Unpin>(mut reader: R, sink: Arc<Mutex<Captured>>, limit: usize) {
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!(error = %e, "Output stream read failed");
                break;
            }
        };

        let mut captured = sink.lock().unwrap_or_else(PoisonError::into_inner);
        if captured.truncated {
            continue;
        }
        let room = limit.saturating_sub(captured.bytes.len());
        let keep = n.min(room);
        captured.bytes.extend_from_slice(&chunk[..keep]);
        if keep < n {
            let end = char_floor(&captured.bytes);
            captured.bytes.truncate(end);
            captured.truncated = true;
        }
    }
}

/// Length of `bytes` without a trailing incomplete UTF-8 sequence.
fn char_floor(bytes: &[u8]) -> usize {
    let len = bytes.len();
    // A sequence is at most four bytes, so its lead is within the last three.
    for start in (len.saturating_sub(3)..len).rev() {
        let byte = bytes[start];
        if byte & 0xC0 == 0x80 {
            continue;
        }
        let width = match byte {
            0xF0..=0xFF => 4,
            0xE0..=0xEF => 3,
            0xC0..=0xDF => 2,
            _ => 1,
        };
        return if start + width > len { start } else { len };
    }
    len
}
