//! Line-oriented command input that never blocks the control loop.

use std::collections::VecDeque;
use std::io::{ErrorKind, Read};
use std::os::unix::io::{AsRawFd, RawFd};
use std::str::FromStr;
use std::sync::mpsc::{Receiver, TryRecvError};

use crate::{Error, Result};

const READ_CHUNK: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Exit,
    /// Overwrite the counter.
    Set(i64),
}

impl FromStr for Command {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self> {
        let line = line.trim();
        if line == "EXIT" {
            return Ok(Command::Exit);
        }
        line.parse::<i64>()
            .map(Command::Set)
            .map_err(|_| Error::InvalidCommand(line.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    Line(String),
    /// Nothing complete is available right now.
    Idle,
    /// End of input; no further lines will arrive.
    Closed,
}

pub trait CommandSource: Send {
    /// Returns at most one line without waiting for input.
    fn poll_line(&mut self) -> Result<InputEvent>;
}

/// Reads lines from a descriptor, checking readiness with `poll(2)` first.
///
/// Bytes are pulled straight from the descriptor (no hidden buffering), split
/// on `\n`, and handed out one line per call. A trailing unterminated line is
/// delivered at end of input.
pub struct PollingReader<R> {
    inner: R,
    pending: Vec<u8>,
    lines: VecDeque<String>,
    eof: bool,
}

impl<R: Read + AsRawFd + Send> PollingReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            pending: Vec::new(),
            lines: VecDeque::new(),
            eof: false,
        }
    }

    fn readable(&self) -> Result<bool> {
        let mut pfd = libc::pollfd {
            fd: self.inner.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let res = unsafe { libc::poll(&mut pfd, 1, 0) };
        if res < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == ErrorKind::Interrupted {
                return Ok(false);
            }
            return Err(Error::Io(err));
        }
        let ready = libc::POLLIN | libc::POLLHUP | libc::POLLERR | libc::POLLNVAL;
        Ok(res > 0 && pfd.revents & ready != 0)
    }

    fn fill(&mut self) -> Result<()> {
        let mut chunk = [0u8; READ_CHUNK];
        let n = match self.inner.read(&mut chunk) {
            Ok(n) => n,
            Err(err) if matches!(err.kind(), ErrorKind::Interrupted | ErrorKind::WouldBlock) => {
                return Ok(())
            }
            Err(err) => return Err(Error::Io(err)),
        };
        if n == 0 {
            self.eof = true;
            if !self.pending.is_empty() {
                let rest = std::mem::take(&mut self.pending);
                self.lines.push_back(decode_line(&rest));
            }
            return Ok(());
        }
        self.pending.extend_from_slice(&chunk[..n]);
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.lines.push_back(decode_line(&line[..pos]));
        }
        Ok(())
    }
}

impl<R: Read + AsRawFd + Send> CommandSource for PollingReader<R> {
    fn poll_line(&mut self) -> Result<InputEvent> {
        if self.lines.is_empty() && !self.eof && self.readable()? {
            self.fill()?;
        }
        if let Some(line) = self.lines.pop_front() {
            return Ok(InputEvent::Line(line));
        }
        if self.eof {
            return Ok(InputEvent::Closed);
        }
        Ok(InputEvent::Idle)
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    text.strip_suffix('\r').unwrap_or(&*text).to_string()
}

/// Standard input as a raw descriptor.
///
/// `std::io::Stdin` buffers internally, which would hide data from `poll(2)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawStdin;

impl Read for RawStdin {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = unsafe { libc::read(libc::STDIN_FILENO, buf.as_mut_ptr() as *mut _, buf.len()) };
        if n < 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(n as usize)
    }
}

impl AsRawFd for RawStdin {
    fn as_raw_fd(&self) -> RawFd {
        libc::STDIN_FILENO
    }
}

pub fn stdin_source() -> PollingReader<RawStdin> {
    PollingReader::new(RawStdin)
}

/// Lines delivered in-process; dropping the sender ends the input.
pub struct ChannelSource {
    rx: Receiver<String>,
}

impl ChannelSource {
    pub fn new(rx: Receiver<String>) -> Self {
        Self { rx }
    }
}

impl CommandSource for ChannelSource {
    fn poll_line(&mut self) -> Result<InputEvent> {
        match self.rx.try_recv() {
            Ok(line) => Ok(InputEvent::Line(line)),
            Err(TryRecvError::Empty) => Ok(InputEvent::Idle),
            Err(TryRecvError::Disconnected) => Ok(InputEvent::Closed),
        }
    }
}
