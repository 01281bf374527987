//! Line-oriented helper process
//!
//! Spawned lazily, one JSON document per line in each direction. Pipe I/O
//! happens on a writer and a reader thread joined by channels, so a stalled
//! helper can never block the caller past a read deadline. Any I/O failure
//! or missed deadline tears the process down so the next call starts a
//! fresh one.

use std::io::{self, BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, info, warn};

use super::BridgeError;

/// How long a helper may take to answer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HelperTimeouts {
    /// Allowance for the first line after a spawn (model and device warm-up)
    pub startup: Duration,
    /// Allowance for every later line
    pub reply: Duration,
}

struct Running {
    child: Child,
    requests: Sender<String>,
    lines: Receiver<io::Result<String>>,
    answered: bool,
}

pub struct HelperProcess {
    command: String,
    timeouts: HelperTimeouts,
    running: Option<Running>,
}

impl HelperProcess {
    /// `command` is split on whitespace; no shell is involved
    pub fn new(command: &str, timeouts: HelperTimeouts) -> Self {
        Self {
            command: command.to_string(),
            timeouts,
            running: None,
        }
    }

    fn spawn(&self) -> Result<Running, BridgeError> {
        let mut parts = self.command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| BridgeError::Spawn(self.command.clone(), "empty command".into()))?;

        let mut child = Command::new(program)
            .args(parts)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| BridgeError::Spawn(self.command.clone(), e.to_string()))?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        match (stdin, stdout) {
            (Some(stdin), Some(stdout)) => {
                info!(command = %self.command, pid = child.id(), "helper started");
                Ok(Running {
                    child,
                    requests: forward_requests(stdin),
                    lines: forward_lines(stdout),
                    answered: false,
                })
            }
            _ => {
                let _ = child.kill();
                let _ = child.wait();
                Err(BridgeError::Spawn(self.command.clone(), "stdio not captured".into()))
            }
        }
    }

    fn running(&mut self) -> Result<&mut Running, BridgeError> {
        if self.running.is_none() {
            self.running = Some(self.spawn()?);
        }
        self.running.as_mut().ok_or(BridgeError::Closed)
    }

    /// Queue one line for the helper (a newline is appended)
    pub fn send_line(&mut self, line: &str) -> Result<(), BridgeError> {
        let running = self.running()?;
        if running.requests.send(line.to_string()).is_err() {
            debug!(command = %self.command, "helper stopped reading its input");
            self.stop();
            return Err(BridgeError::Closed);
        }
        Ok(())
    }

    /// Read one line without its terminator; `None` once the helper closed stdout
    pub fn read_line(&mut self) -> Result<Option<String>, BridgeError> {
        let timeouts = self.timeouts;
        let running = self.running()?;
        let deadline = if running.answered {
            timeouts.reply
        } else {
            timeouts.startup
        };

        match running.lines.recv_timeout(deadline) {
            Ok(Ok(line)) => {
                running.answered = true;
                Ok(Some(line))
            }
            Ok(Err(e)) => {
                self.stop();
                Err(BridgeError::Io(e))
            }
            Err(RecvTimeoutError::Disconnected) => {
                debug!(command = %self.command, "helper closed its output");
                self.stop();
                Ok(None)
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(command = %self.command, ?deadline, "helper did not answer in time");
                self.stop();
                Err(BridgeError::Timeout(deadline))
            }
        }
    }

    /// One request line, one reply line
    pub fn request(&mut self, line: &str) -> Result<String, BridgeError> {
        self.send_line(line)?;
        self.read_line()?.ok_or(BridgeError::Closed)
    }

    /// Terminate the helper if it is running
    pub fn stop(&mut self) {
        if let Some(mut running) = self.running.take() {
            if let Err(e) = running.child.kill() {
                debug!(?e, "helper already exited");
            }
            match running.child.wait() {
                Ok(status) => debug!(command = %self.command, %status, "helper stopped"),
                Err(e) => warn!(?e, command = %self.command, "failed to reap helper"),
            }
        }
    }
}

impl Drop for HelperProcess {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Write queued lines to stdin until the queue closes or the pipe breaks
fn forward_requests(mut stdin: ChildStdin) -> Sender<String> {
    let (tx, rx) = crossbeam_channel::unbounded::<String>();

    thread::spawn(move || {
        for line in rx {
            let result = stdin
                .write_all(line.as_bytes())
                .and_then(|_| stdin.write_all(b"\n"))
                .and_then(|_| stdin.flush());
            if let Err(e) = result {
                debug!(?e, "helper input closed");
                break;
            }
        }
    });

    tx
}

/// Pump stdout lines into a channel until EOF, a read error, or the
/// receiving side goes away
fn forward_lines(stdout: ChildStdout) -> Receiver<io::Result<String>> {
    let (tx, rx) = crossbeam_channel::unbounded();

    thread::spawn(move || {
        let mut reader = BufReader::new(stdout);
        loop {
            let mut line = String::new();
            match reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {
                    let line = line.trim_end_matches(['\r', '\n']).to_string();
                    if tx.send(Ok(line)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(e));
                    break;
                }
            }
        }
    });

    rx
}
