//! Privileged command execution
//!
//! Provides:
//! - A [`CommandRunner`] seam so reconcilers never spawn processes directly
//! - Bounded-timeout execution of argument vectors (never a shell string)
//! - Best-effort mode that reports success-shaped results

use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

/// How a command finished
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exit {
    /// Exit status 0
    Success,
    /// Non-zero exit status (None if killed by a signal)
    Failed(Option<i32>),
    /// Killed after exceeding its time budget
    TimedOut(Duration),
    /// The process could not be started at all
    SpawnFailed,
}

/// Options for a single command run
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    /// Report success-shaped results even when the command fails
    pub ignore_error: bool,
    /// Maximum time the command may run
    pub timeout: Duration,
}

impl RunOptions {
    /// Hard command with the given time budget
    pub fn checked(timeout: Duration) -> Self {
        Self {
            ignore_error: false,
            timeout,
        }
    }

    /// Best-effort command with the given time budget
    pub fn best_effort(timeout: Duration) -> Self {
        Self {
            ignore_error: true,
            timeout,
        }
    }
}

/// Result of running a command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Control-flow result (always true for best-effort runs)
    pub ok: bool,
    /// Standard output on success, a descriptive error otherwise
    pub output: String,
    /// How the process actually finished
    pub exit: Exit,
}

impl CommandOutput {
    /// Build an output from the real exit and the requested mode
    pub fn new(exit: Exit, output: String, opts: RunOptions) -> Self {
        let ok = opts.ignore_error || exit == Exit::Success;
        Self { ok, output, exit }
    }

    /// Whether the process really exited 0, regardless of best-effort mode
    pub fn succeeded(&self) -> bool {
        self.exit == Exit::Success
    }
}

/// Something that can run privileged commands
///
/// Implementations must never panic or return early on failure: every
/// problem is folded into [`CommandOutput`].
pub trait CommandRunner: Send + Sync {
    fn run(&self, argv: &[String], opts: RunOptions) -> CommandOutput;
}

/// Runs commands on the host with `std::process`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, argv: &[String], opts: RunOptions) -> CommandOutput {
        let Some((program, args)) = argv.split_first() else {
            return CommandOutput::new(Exit::SpawnFailed, "empty command".to_string(), opts);
        };

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();

        let mut child = match child {
            Ok(child) => child,
            Err(e) => {
                let message = format!("failed to start {}: {}", program, e);
                log_failure(argv, &message, opts);
                return CommandOutput::new(Exit::SpawnFailed, message, opts);
            }
        };

        // Drain pipes on their own threads so a chatty command cannot fill
        // the pipe buffer and stall while we poll for exit.
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let exit = wait_with_timeout(&mut child, opts.timeout);
        // A daemonizing child may keep the pipe open after we are done.
        let stdout = stdout.recv_timeout(PIPE_GRACE).unwrap_or_default();
        let stderr = stderr.recv_timeout(PIPE_GRACE).unwrap_or_default();

        let output = match &exit {
            Exit::Success => stdout,
            Exit::Failed(code) => {
                let stderr = stderr.trim();
                if !stderr.is_empty() {
                    stderr.to_string()
                } else if let Some(code) = code {
                    format!("exit status {}", code)
                } else {
                    "terminated by signal".to_string()
                }
            }
            Exit::TimedOut(limit) => format!("timed out after {:?}", limit),
            Exit::SpawnFailed => stderr,
        };

        if exit == Exit::Success {
            tracing::debug!(command = %argv.join(" "), "command succeeded");
        } else {
            log_failure(argv, &output, opts);
        }

        CommandOutput::new(exit, output, opts)
    }
}

/// How long to wait for pipe contents after the process has exited
const PIPE_GRACE: Duration = Duration::from_millis(250);

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = String::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_string(&mut buf);
        }
        let _ = tx.send(buf);
    });
    rx
}

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Exit {
    let start = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) if status.success() => return Exit::Success,
            Ok(Some(status)) => return Exit::Failed(status.code()),
            Ok(None) => {
                if start.elapsed() > timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Exit::TimedOut(timeout);
                }
                thread::sleep(Duration::from_millis(20));
            }
            Err(_) => {
                let _ = child.kill();
                let _ = child.wait();
                return Exit::Failed(None);
            }
        }
    }
}

fn log_failure(argv: &[String], message: &str, opts: RunOptions) {
    if opts.ignore_error {
        tracing::debug!(command = %argv.join(" "), error = %message, "best-effort command failed");
    } else {
        tracing::warn!(command = %argv.join(" "), error = %message, "command failed");
    }
}
