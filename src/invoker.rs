//! External tool invocation.
//!
//! Runs one external command as a child process with a wall-clock timeout
//! and a cap on combined stdout+stderr. Commands are executed directly from
//! an argument vector; nothing is ever passed through a shell, so payload
//! and path content cannot change what runs.
//!
//! The invoker never interprets tool output beyond byte capture. A non-zero
//! exit, a timeout kill, or an overflowed output buffer each surface as a
//! distinct error for the orchestrator to classify.

use std::io::{self, Read};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;

/// How often the wait loop polls the child and the deadline.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How much trailing stderr is kept in a non-zero-exit error.
const STDERR_TAIL_BYTES: usize = 512;

/// Errors from a tool invocation.
#[derive(Debug, Error)]
pub enum InvokerError {
    #[error("tool not found: {0}")]
    NotFound(String),

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("tool exceeded {timeout_secs}s timeout and was killed")]
    Timeout { timeout_secs: u64 },

    #[error("tool output exceeded {max_bytes} byte cap")]
    OutputOverflow { max_bytes: u64 },

    #[error("tool exited with status {code}: {stderr_tail}")]
    NonZeroExit { code: i32, stderr_tail: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Captured outcome of a successful invocation.
#[derive(Debug)]
pub struct ToolOutput {
    /// Captured stdout (lossy UTF-8).
    pub stdout: String,
    /// Captured stderr (lossy UTF-8).
    pub stderr: String,
    /// Exit code (always 0 here; non-zero exits are errors).
    pub exit_code: i32,
    /// Wall-clock duration of the invocation.
    pub duration: Duration,
}

/// Runs external commands with a timeout and an output cap.
#[derive(Debug, Clone, Copy)]
pub struct ToolInvoker {
    timeout: Duration,
    max_output_bytes: u64,
}

impl ToolInvoker {
    /// Create an invoker with the given bounds.
    pub fn new(timeout: Duration, max_output_bytes: u64) -> Self {
        Self {
            timeout,
            max_output_bytes,
        }
    }

    /// Run `program` with `args` inside `working_dir`.
    ///
    /// Blocks the calling thread until the child exits, times out, or
    /// overflows the output cap. Side effects are confined to what the tool
    /// itself does under `working_dir`.
    pub fn run(
        &self,
        program: &str,
        args: &[String],
        working_dir: &Path,
    ) -> Result<ToolOutput, InvokerError> {
        let start = Instant::now();

        let mut child = Command::new(program)
            .args(args)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == io::ErrorKind::NotFound {
                    InvokerError::NotFound(program.to_string())
                } else {
                    InvokerError::Spawn {
                        program: program.to_string(),
                        source: e,
                    }
                }
            })?;

        // Combined byte counter and overflow flag shared with both readers.
        let total_bytes = Arc::new(AtomicU64::new(0));
        let overflowed = Arc::new(AtomicBool::new(false));

        let stdout_buf = Arc::new(Mutex::new(Vec::new()));
        let stderr_buf = Arc::new(Mutex::new(Vec::new()));

        let stdout_handle = child.stdout.take().map(|stream| {
            spawn_capture(
                stream,
                Arc::clone(&stdout_buf),
                Arc::clone(&total_bytes),
                self.max_output_bytes,
                Arc::clone(&overflowed),
            )
        });
        let stderr_handle = child.stderr.take().map(|stream| {
            spawn_capture(
                stream,
                Arc::clone(&stderr_buf),
                Arc::clone(&total_bytes),
                self.max_output_bytes,
                Arc::clone(&overflowed),
            )
        });

        // Poll for exit, the deadline, and the output cap. A reader that hits
        // the cap stops draining its pipe, which stalls the child; the kill
        // here is what unwedges it.
        // On the kill paths the capture threads are NOT joined: a killed
        // tool's grandchildren can inherit the pipes and hold them open, and
        // the readers only exit once those close. The threads are detached
        // and die with the pipes.
        let deadline = start + self.timeout;
        let status = loop {
            if overflowed.load(Ordering::SeqCst) {
                kill_and_reap(&mut child);
                return Err(InvokerError::OutputOverflow {
                    max_bytes: self.max_output_bytes,
                });
            }

            match child.try_wait()? {
                Some(status) => break status,
                None => {
                    if Instant::now() >= deadline {
                        kill_and_reap(&mut child);
                        return Err(InvokerError::Timeout {
                            timeout_secs: self.timeout.as_secs(),
                        });
                    }
                    thread::sleep(POLL_INTERVAL);
                }
            }
        };

        join_capture(stdout_handle, stderr_handle);

        // The child may have raced the cap right before exiting.
        if overflowed.load(Ordering::SeqCst) {
            return Err(InvokerError::OutputOverflow {
                max_bytes: self.max_output_bytes,
            });
        }

        let stdout = take_buffer(&stdout_buf);
        let stderr = take_buffer(&stderr_buf);

        if !status.success() {
            let code = status.code().unwrap_or(-1);
            return Err(InvokerError::NonZeroExit {
                code,
                stderr_tail: tail_of(&stderr, STDERR_TAIL_BYTES),
            });
        }

        Ok(ToolOutput {
            stdout,
            stderr,
            exit_code: 0,
            duration: start.elapsed(),
        })
    }
}

/// Spawn a reader thread draining `stream` into `sink` until EOF or the
/// shared cap is exceeded.
fn spawn_capture<R: Read + Send + 'static>(
    mut stream: R,
    sink: Arc<Mutex<Vec<u8>>>,
    total_bytes: Arc<AtomicU64>,
    max_bytes: u64,
    overflowed: Arc<AtomicBool>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut buffer = [0u8; 8192];
        loop {
            let n = match stream.read(&mut buffer) {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };

            let seen = total_bytes.fetch_add(n as u64, Ordering::SeqCst) + n as u64;
            if seen > max_bytes {
                overflowed.store(true, Ordering::SeqCst);
                break;
            }

            if let Ok(mut sink) = sink.lock() {
                sink.extend_from_slice(&buffer[..n]);
            }
        }
    })
}

fn join_capture(stdout: Option<JoinHandle<()>>, stderr: Option<JoinHandle<()>>) {
    if let Some(handle) = stdout {
        let _ = handle.join();
    }
    if let Some(handle) = stderr {
        let _ = handle.join();
    }
}

fn kill_and_reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

fn take_buffer(buf: &Arc<Mutex<Vec<u8>>>) -> String {
    let bytes = buf.lock().map(|b| b.clone()).unwrap_or_default();
    String::from_utf8_lossy(&bytes).into_owned()
}

fn tail_of(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.trim_end().to_string();
    }
    let mut start = text.len() - max_bytes;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].trim_end().to_string()
}
