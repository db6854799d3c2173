//! External command execution
//!
//! Every OS control command (jail, jls, jexec, mount, ifconfig, route, zfs)
//! goes through the [`Runner`] trait so lifecycle code can be exercised
//! without a real jail subsystem. [`HostRunner`] is the production
//! implementation and enforces a per-command timeout.

use crate::error::{Error, Result};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::fmt;
use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub const JAIL: &str = "/usr/sbin/jail";
pub const JEXEC: &str = "/usr/sbin/jexec";
pub const JLS: &str = "/usr/sbin/jls";
pub const MOUNT: &str = "/sbin/mount";
pub const UMOUNT: &str = "/sbin/umount";
pub const IFCONFIG: &str = "/sbin/ifconfig";
pub const ROUTE: &str = "/sbin/route";
pub const ZFS: &str = "/sbin/zfs";

/// Default timeout applied to each external command
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Grace period between SIGTERM and SIGKILL on timeout
const KILL_GRACE: Duration = Duration::from_secs(2);

/// A program and its argument list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append a single argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Run `program args...` inside a jail through jexec(8)
    pub fn in_jail(jail: &str, program: &str) -> Self {
        Self::new(JEXEC).arg(jail).arg(program)
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Result of a finished command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    /// Exit code, `None` when terminated by a signal
    pub code: Option<i32>,
    /// Standard output alone, for commands whose output is parsed
    pub stdout: String,
    /// Standard output followed by standard error
    pub combined: String,
}

impl Output {
    pub fn success() -> Self {
        Self::ok(String::new())
    }

    /// Successful exit with the given standard output
    pub fn ok(stdout: impl Into<String>) -> Self {
        let stdout = stdout.into();
        Self {
            code: Some(0),
            combined: stdout.clone(),
            stdout,
        }
    }

    /// Non-zero exit with the given standard error
    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            combined: stderr.into(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.code == Some(0)
    }

    /// Combined output with surrounding whitespace removed, for error messages
    pub fn text(&self) -> String {
        self.combined.trim().to_string()
    }
}

/// Executes external commands
///
/// `Err` is reserved for commands that could not be run to completion
/// (spawn failure, timeout). A non-zero exit is returned as `Ok` so the
/// caller can map it to its own error kind with the captured output.
pub trait Runner: Send + Sync {
    fn run(&self, invocation: &Invocation) -> Result<Output>;
}

/// Runs commands on the host
#[derive(Debug, Clone)]
pub struct HostRunner {
    timeout: Option<Duration>,
}

impl Default for HostRunner {
    fn default() -> Self {
        Self {
            timeout: Some(DEFAULT_TIMEOUT),
        }
    }
}

impl HostRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-command timeout, `None` waits forever
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn wait(&self, child: &mut Child, invocation: &Invocation) -> Result<ExitStatus> {
        let Some(timeout) = self.timeout else {
            return child.wait().map_err(|e| Error::CommandSpawn {
                command: invocation.to_string(),
                source: e,
            });
        };

        let start = Instant::now();
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => {
                    if start.elapsed() > timeout {
                        terminate(child);
                        return Err(Error::Timeout {
                            command: invocation.to_string(),
                            secs: timeout.as_secs(),
                        });
                    }
                    thread::sleep(Duration::from_millis(50));
                }
                Err(e) => {
                    return Err(Error::CommandSpawn {
                        command: invocation.to_string(),
                        source: e,
                    });
                }
            }
        }
    }
}

impl Runner for HostRunner {
    fn run(&self, invocation: &Invocation) -> Result<Output> {
        debug!(command = %invocation, "running command");

        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::CommandSpawn {
                command: invocation.to_string(),
                source: e,
            })?;

        // Drain both pipes concurrently so a chatty command can't block on a full pipe
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let status = self.wait(&mut child, invocation)?;

        let stdout = collect(stdout);
        let stderr = collect(stderr);
        let mut combined = stdout.clone();
        if !combined.is_empty() && !stderr.is_empty() && !combined.ends_with('\n') {
            combined.push('\n');
        }
        combined.push_str(&stderr);

        let output = Output {
            code: status.code(),
            stdout,
            combined,
        };
        debug!(command = %invocation, code = ?output.code, "command finished");
        Ok(output)
    }
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn collect(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .map(|buf| String::from_utf8_lossy(&buf).into_owned())
        .unwrap_or_default()
}

/// SIGTERM, short grace period, then SIGKILL
fn terminate(child: &mut Child) {
    let pid = Pid::from_raw(child.id() as i32);
    if let Err(e) = kill(pid, Signal::SIGTERM) {
        warn!(pid = child.id(), error = %e, "failed to send SIGTERM");
    }

    let start = Instant::now();
    while start.elapsed() < KILL_GRACE {
        if let Ok(Some(_)) = child.try_wait() {
            return;
        }
        thread::sleep(Duration::from_millis(50));
    }

    let _ = child.kill();
    // Reap after kill
    let _ = child.wait();
}
