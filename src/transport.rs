//! Byte-stream side of the link.
//!
//! A connection is split into a [`LineWriter`] kept by the sending side and a
//! [`LineReader`] owned by the receive thread. The two halves share a closed
//! flag: closing the writer makes the next poll of the reader fail with
//! [`TransportError::Closed`], which is how a blocked receive loop is released.

use crate::error::TransportError;
use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const LINE_TERMINATOR: char = '\r';
/// Longest inbound line kept while waiting for a terminator.
pub const MAX_LINE_LEN: usize = 256;

pub trait LineWriter: Send {
    /// Write `line` followed by exactly one `\r`, as UTF-8.
    fn write_line(&mut self, line: &str) -> Result<(), TransportError>;

    fn close(&mut self);

    fn is_connected(&self) -> bool {
        true
    }
}

pub trait LineReader: Send {
    /// Block until a non-empty line arrives. The terminator is not included.
    fn read_line(&mut self) -> Result<String, TransportError>;
}

/// Pull the first complete non-empty line out of `pending`.
///
/// Either `\r` or `\n` ends a line, so `\r\n` produces one line and an empty
/// one that is skipped. Unterminated data longer than [`MAX_LINE_LEN`] is
/// dropped as a malformed sentence.
fn take_line(pending: &mut Vec<u8>) -> Option<String> {
    loop {
        let Some(end) = pending.iter().position(|b| *b == b'\r' || *b == b'\n') else {
            if pending.len() > MAX_LINE_LEN {
                debug!("dropping {} bytes with no line terminator", pending.len());
                pending.clear();
            }
            return None;
        };
        let raw: Vec<u8> = pending.drain(..=end).collect();
        let line = String::from_utf8_lossy(&raw[..end]).into_owned();
        if !line.trim().is_empty() {
            return Some(line);
        }
    }
}

pub struct SerialWriter {
    port: Box<dyn serialport::SerialPort>,
    closed: Arc<AtomicBool>,
}

pub struct SerialReader {
    port: Box<dyn serialport::SerialPort>,
    pending: Vec<u8>,
    closed: Arc<AtomicBool>,
}

/// Open the radio modem's serial port.
///
/// `poll` is the read timeout used to notice a closed connection; it does not
/// limit how long a line may take to arrive.
pub fn open_serial(port: &str, baud: u32, poll: Duration) -> Result<(SerialWriter, SerialReader), TransportError> {
    let writer_port = serialport::new(port, baud)
        .timeout(poll)
        .open()
        .map_err(|source| TransportError::Open {
            port: port.to_string(),
            baud,
            source,
        })?;
    let reader_port = writer_port.try_clone()?;
    let closed = Arc::new(AtomicBool::new(false));

    info!("opened {} at {} baud", port, baud);

    Ok((
        SerialWriter {
            port: writer_port,
            closed: Arc::clone(&closed),
        },
        SerialReader {
            port: reader_port,
            pending: Vec::with_capacity(128),
            closed,
        },
    ))
}

/// Names of the serial ports present on this machine.
pub fn available_ports() -> Result<Vec<String>, TransportError> {
    Ok(serialport::available_ports()?
        .into_iter()
        .map(|p| p.port_name)
        .collect())
}

impl LineWriter for SerialWriter {
    fn write_line(&mut self, line: &str) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let mut wire = String::with_capacity(line.len() + 1);
        wire.push_str(line);
        wire.push(LINE_TERMINATOR);
        self.port.write_all(wire.as_bytes())?;
        self.port.flush()?;
        Ok(())
    }

    fn close(&mut self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!("serial connection closed");
        }
    }

    fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }
}

impl LineReader for SerialReader {
    fn read_line(&mut self) -> Result<String, TransportError> {
        let mut chunk = [0u8; 64];
        loop {
            if let Some(line) = take_line(&mut self.pending) {
                return Ok(line);
            }
            if self.closed.load(Ordering::Acquire) {
                return Err(TransportError::Closed);
            }
            match self.port.read(&mut chunk) {
                Ok(0) => return Err(TransportError::Closed),
                Ok(n) => self.pending.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::TimedOut => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Writer used when the radio could not be opened. Lines are logged and dropped.
#[derive(Debug, Default)]
pub struct DisconnectedWriter;

impl LineWriter for DisconnectedWriter {
    fn write_line(&mut self, line: &str) -> Result<(), TransportError> {
        warn!("not connected; dropping {:?}", line);
        Ok(())
    }

    fn close(&mut self) {}

    fn is_connected(&self) -> bool {
        false
    }
}

type Inbound = std::io::Result<String>;

/// In-process stand-in for the radio, for tests and dry runs.
///
/// Returns the link-side writer and reader plus a [`MemoryRobot`] handle that
/// plays the robot: it feeds inbound lines and records what was written.
pub fn memory_pair(poll: Duration) -> (MemoryWriter, MemoryReader, MemoryRobot) {
    let (tx, rx) = mpsc::channel();
    let wire = Arc::new(Mutex::new(String::new()));
    let closed = Arc::new(AtomicBool::new(false));

    (
        MemoryWriter {
            wire: Arc::clone(&wire),
            closed: Arc::clone(&closed),
        },
        MemoryReader {
            inbound: rx,
            poll,
            closed: Arc::clone(&closed),
        },
        MemoryRobot { inbound: tx, wire, closed },
    )
}

pub struct MemoryWriter {
    wire: Arc<Mutex<String>>,
    closed: Arc<AtomicBool>,
}

pub struct MemoryReader {
    inbound: mpsc::Receiver<Inbound>,
    poll: Duration,
    closed: Arc<AtomicBool>,
}

#[derive(Clone)]
pub struct MemoryRobot {
    inbound: mpsc::Sender<Inbound>,
    wire: Arc<Mutex<String>>,
    closed: Arc<AtomicBool>,
}

impl LineWriter for MemoryWriter {
    fn write_line(&mut self, line: &str) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let mut wire = self.wire.lock().unwrap_or_else(PoisonError::into_inner);
        wire.push_str(line);
        wire.push(LINE_TERMINATOR);
        Ok(())
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::Release);
    }

    fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }
}

impl LineReader for MemoryReader {
    fn read_line(&mut self) -> Result<String, TransportError> {
        loop {
            match self.inbound.recv_timeout(self.poll) {
                Ok(Ok(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    return Ok(line);
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(RecvTimeoutError::Timeout) => {
                    if self.closed.load(Ordering::Acquire) {
                        return Err(TransportError::Closed);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return Err(TransportError::Closed),
            }
        }
    }
}

impl MemoryRobot {
    /// Queue a line as if the robot had sent it.
    pub fn send(&self, line: &str) {
        if self.inbound.send(Ok(line.to_string())).is_err() {
            debug!("memory link reader is gone; dropping {:?}", line);
        }
    }

    /// Make the link's next read fail with an I/O error.
    pub fn fail_read(&self, kind: ErrorKind) {
        if self.inbound.send(Err(std::io::Error::new(kind, "injected read failure"))).is_err() {
            debug!("memory link reader is gone; dropping read failure");
        }
    }

    /// Everything written so far, exactly as it went over the wire.
    pub fn wire(&self) -> String {
        self.wire.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Written lines with their terminators removed.
    pub fn sent_lines(&self) -> Vec<String> {
        self.wire()
            .split_terminator(LINE_TERMINATOR)
            .map(str::to_string)
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
