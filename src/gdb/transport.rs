//! Debugger process transport
//!
//! Launches the debugger with stdout and stderr merged into a single
//! non-blocking pipe, frames the byte stream into lines and classifies each
//! line into a [`Record`]. Commands go out through a [`LineSink`].

use crate::gdb::error::{GdbError, Result};
use crate::gdb::parser::classify_line;
use crate::gdb::types::{GdbConfig, Record, RecordType};
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use os_pipe::PipeReader;
use std::io::{ErrorKind, Read, Write};
use std::os::fd::AsRawFd;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, trace, warn};

const READ_CHUNK: usize = 4096;
const IDLE_POLL: Duration = Duration::from_millis(100);
const BUSY_POLL: Duration = Duration::from_millis(10);
const READ_ERROR_LIMIT: u32 = 5;
const READ_ERROR_BACKOFF: Duration = Duration::from_secs(1);
const WRITE_RETRY_LIMIT: u32 = 100;

/// Destination for outgoing command lines
pub trait LineSink: Send + Sync {
    /// Write one full line. A trailing newline is appended when missing.
    fn write_line(&self, line: &str) -> Result<()>;
}

/// Writes commands to the debugger's stdin
pub struct StdinSink {
    stdin: Mutex<ChildStdin>,
}

impl StdinSink {
    pub fn new(stdin: ChildStdin) -> Self {
        Self {
            stdin: Mutex::new(stdin),
        }
    }
}

impl LineSink for StdinSink {
    fn write_line(&self, line: &str) -> Result<()> {
        let mut stdin = self.stdin.lock().unwrap_or_else(PoisonError::into_inner);
        write_all_retrying(&mut *stdin, &with_newline(line))
    }
}

fn with_newline(line: &str) -> Vec<u8> {
    let mut bytes = line.as_bytes().to_vec();
    if !line.ends_with('\n') {
        bytes.push(b'\n');
    }
    bytes
}

/// Write the whole buffer, retrying short writes and transient errors
pub fn write_all_retrying<W: Write>(writer: &mut W, bytes: &[u8]) -> Result<()> {
    let total = bytes.len();
    let mut written = 0;
    let mut retries = 0;

    while written < total {
        match writer.write(&bytes[written..]) {
            Ok(0) => return Err(GdbError::Closed),
            Ok(n) => {
                written += n;
                retries = 0;
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                retries += 1;
                if retries > WRITE_RETRY_LIMIT {
                    return Err(GdbError::Write {
                        written,
                        total,
                        source: e,
                    });
                }
                thread::sleep(Duration::from_millis(1));
            }
            Err(e) => {
                return Err(GdbError::Write {
                    written,
                    total,
                    source: e,
                })
            }
        }
    }

    writer.flush().map_err(|source| GdbError::Write {
        written,
        total,
        source,
    })
}

/// Splits a byte stream on `\n`, keeping an unterminated tail for the next chunk
#[derive(Debug, Default)]
pub struct LineFramer {
    buf: Vec<u8>,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes and return every complete, non-empty line
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if !line.is_empty() {
                lines.push(String::from_utf8_lossy(&line).into_owned());
            }
        }
        lines
    }

    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

fn is_prompt(line: &str) -> bool {
    line.trim_end() == "(gdb)"
}

/// Debugger child process plus the two ends of its pipes
pub struct Spawned {
    pub child: Child,
    pub output: PipeReader,
    pub sink: Arc<StdinSink>,
}

fn set_nonblocking(pipe: &impl AsRawFd) -> Result<()> {
    let fd = pipe.as_raw_fd();
    let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
    fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}

/// Launch the debugger with stdout and stderr sharing one non-blocking pipe.
/// The child's stdin is non-blocking too, so a peer that stops reading makes
/// writes fail after a bounded number of retries.
pub fn spawn(config: &GdbConfig) -> Result<Spawned> {
    let (output, writer) = os_pipe::pipe().map_err(GdbError::Pipe)?;
    let stderr_writer = writer.try_clone().map_err(GdbError::Pipe)?;

    let mut cmd = Command::new(&config.gdb_path);
    cmd.args(&config.gdb_args)
        .stdin(Stdio::piped())
        .stdout(writer)
        .stderr(stderr_writer);

    let mut child = cmd.spawn().map_err(|source| GdbError::Spawn {
        path: config.gdb_path.clone(),
        source,
    })?;
    // The command still owns our copies of the write end; EOF never arrives while they live
    drop(cmd);

    let stdin = child.stdin.take().ok_or(GdbError::Closed)?;

    set_nonblocking(&output)?;
    set_nonblocking(&stdin)?;

    Ok(Spawned {
        child,
        output,
        sink: Arc::new(StdinSink::new(stdin)),
    })
}

/// Read loop (runs in background thread).
///
/// Stops on end of file, when `running` is cleared or when the receiving side
/// of `records` is gone.
pub fn read_records<R: Read>(mut output: R, records: Sender<Record>, running: Arc<AtomicBool>) {
    let mut framer = LineFramer::new();
    let mut chunk = [0u8; READ_CHUNK];
    let mut errors = 0;
    let mut idle = IDLE_POLL;

    while running.load(Ordering::SeqCst) {
        match output.read(&mut chunk) {
            Ok(0) => {
                debug!("Debugger output closed");
                break;
            }
            Ok(n) => {
                errors = 0;
                idle = BUSY_POLL;
                for line in framer.push(&chunk[..n]) {
                    if !forward_line(&line, &records) {
                        return;
                    }
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                thread::sleep(idle);
                idle = IDLE_POLL;
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                errors += 1;
                if errors >= READ_ERROR_LIMIT {
                    error!("Error reading debugger output ({} in a row): {}", errors, e);
                    thread::sleep(READ_ERROR_BACKOFF);
                    errors = 0;
                } else {
                    warn!("Error reading debugger output: {}", e);
                }
            }
        }
    }

    if framer.pending() > 0 {
        debug!("Discarding {} bytes of unterminated output", framer.pending());
    }
}

/// Classify one line and pass it on. Returns false once nobody is listening.
fn forward_line(line: &str, records: &Sender<Record>) -> bool {
    if is_prompt(line) {
        return true;
    }
    trace!("Debugger output: {}", line);

    let record = classify_line(line);
    if record.kind == RecordType::Invalid {
        warn!("Failed to parse line: {}", line);
        return true;
    }
    records.send(record).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io::{self, Cursor};
    use std::sync::mpsc;
    use std::time::Instant;

    #[test]
    fn test_framer_splits_lines() {
        let mut framer = LineFramer::new();
        assert_eq!(framer.push(b"^done\n*running\n"), vec!["^done", "*running"]);
        assert_eq!(framer.pending(), 0);
    }

    #[test]
    fn test_framer_keeps_partial_tail() {
        let mut framer = LineFramer::new();
        assert!(framer.push(b"12^do").is_empty());
        assert_eq!(framer.pending(), 5);
        assert_eq!(framer.push(b"ne\r\n\n=thread"), vec!["12^done"]);
        assert_eq!(framer.push(b"-created\n"), vec!["=thread-created"]);
    }

    #[test]
    fn test_framer_lossy_utf8() {
        let mut framer = LineFramer::new();
        let lines = framer.push(b"~\"\xff\"\n");
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with('~'));
    }

    #[test]
    fn test_read_records_skips_prompts_and_noise() {
        let output = Cursor::new(b"(gdb) \nwarning: noise\n5^done\n~\"hi\\n\"\n".to_vec());
        let (tx, rx) = mpsc::channel();
        read_records(output, tx, Arc::new(AtomicBool::new(true)));

        let records: Vec<Record> = rx.try_iter().collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].token, Some(5));
        assert_eq!(records[1].kind, RecordType::ConsoleStream);
    }

    #[test]
    fn test_write_all_appends_newline() {
        let mut out = Vec::new();
        write_all_retrying(&mut out, &with_newline("12-exec-run --start")).unwrap();
        assert_eq!(out, b"12-exec-run --start\n");
        assert_eq!(with_newline("x\n"), b"x\n");
    }

    struct Trickle {
        out: Vec<u8>,
        stalls: u32,
    }

    impl Write for Trickle {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if self.stalls > 0 {
                self.stalls -= 1;
                return Err(ErrorKind::WouldBlock.into());
            }
            self.out.push(buf[0]);
            Ok(1)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_retries_partial_writes() {
        let mut trickle = Trickle {
            out: Vec::new(),
            stalls: 3,
        };
        write_all_retrying(&mut trickle, b"-gdb-exit\n").unwrap();
        assert_eq!(trickle.out, b"-gdb-exit\n");
    }

    /// Reader that plays back a fixed sequence of results
    struct Scripted {
        steps: VecDeque<io::Result<Vec<u8>>>,
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.steps.pop_front() {
                Some(Ok(bytes)) => {
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
                Some(Err(e)) => Err(e),
                None => Ok(0),
            }
        }
    }

    #[test]
    fn test_read_records_survives_idle_and_errors() {
        let mut steps = VecDeque::new();
        steps.push_back(Err(io::Error::from(ErrorKind::WouldBlock)));
        for _ in 0..READ_ERROR_LIMIT {
            steps.push_back(Err(io::Error::new(ErrorKind::Other, "transient")));
        }
        steps.push_back(Err(io::Error::from(ErrorKind::WouldBlock)));
        steps.push_back(Ok(b"7^done,value=\"1\"\n".to_vec()));
        let (tx, rx) = mpsc::channel();

        read_records(Scripted { steps }, tx, Arc::new(AtomicBool::new(true)));

        let records: Vec<Record> = rx.try_iter().collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].token, Some(7));
        assert_eq!(records[0].class, "done");
    }

    #[test]
    fn test_write_to_stalled_child_gives_up() {
        let config = GdbConfig {
            gdb_path: "sleep".to_string(),
            gdb_args: vec!["3".to_string()],
            ..GdbConfig::default()
        };
        let mut spawned = spawn(&config).unwrap();
        let line = "x".repeat(256 * 1024);

        let started = Instant::now();
        let result = spawned.sink.write_line(&line);
        let elapsed = started.elapsed();
        let _ = spawned.child.kill();
        let _ = spawned.child.wait();

        assert!(matches!(result, Err(GdbError::Write { .. })));
        assert!(elapsed < Duration::from_secs(1));
    }
}
