//! Half-duplex serial transport to the motor controller
//!
//! [`Transport`] owns the open link for the whole process lifetime and is the
//! only thing that touches the wire. Closing is idempotent and also happens on
//! drop, so every exit path releases the device exactly once.

use std::io::{self, ErrorKind, Read, Write};
use std::time::Duration;

use serialport::SerialPort;
use tracing::{info, warn};

use super::protocol::{Direction, InboundCommand};

/// Byte-level access to a serial endpoint
pub trait SerialLink: Send {
    /// Number of unread inbound bytes, without blocking
    fn bytes_pending(&mut self) -> io::Result<usize>;

    /// Read one byte; `None` if nothing arrived within the link timeout
    fn read_byte(&mut self) -> io::Result<Option<u8>>;

    /// Write and flush all bytes
    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()>;
}

impl SerialLink for Box<dyn SerialPort> {
    fn bytes_pending(&mut self) -> io::Result<usize> {
        Ok(self.bytes_to_read()? as usize)
    }

    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        let mut buf = [0u8; 1];
        match self.read(&mut buf) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(buf[0])),
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.write_all(bytes)?;
        self.flush()
    }
}

/// Errors raised by the serial transport
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("serial link {path} unavailable: {source}; candidate devices: [{}]", .candidates.join(", "))]
    Unavailable {
        path: String,
        candidates: Vec<String>,
        #[source]
        source: serialport::Error,
    },

    #[error("failed to read from serial link: {0}")]
    ReadFailed(#[source] io::Error),

    #[error("failed to write to serial link: {0}")]
    WriteFailed(#[source] io::Error),

    #[error("read_command called with no inbound byte pending")]
    NoPendingByte,

    #[error("serial link already closed")]
    Closed,
}

/// Where and how to open the link
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub path: String,
    pub baud_rate: u32,
    /// Upper bound on a single blocking read
    pub read_timeout: Duration,
}

/// The open link session
pub struct Transport<L: SerialLink> {
    link: Option<L>,
    path: String,
}

impl Transport<Box<dyn SerialPort>> {
    /// Open the configured serial device. Failure is fatal for the caller
    /// and is not retried here.
    pub fn open(config: &LinkConfig) -> Result<Self, LinkError> {
        info!(path = %config.path, baud = config.baud_rate, "opening serial link");

        let port = serialport::new(&config.path, config.baud_rate)
            .timeout(config.read_timeout)
            .open()
            .map_err(|source| LinkError::Unavailable {
                path: config.path.clone(),
                candidates: candidate_devices(),
                source,
            })?;

        info!(path = %config.path, "serial link opened");
        Ok(Self::new(port, &config.path))
    }
}

impl<L: SerialLink> Transport<L> {
    /// Wrap an already open link
    pub fn new(link: L, path: &str) -> Self {
        Self {
            link: Some(link),
            path: path.to_string(),
        }
    }

    fn link(&mut self) -> Result<&mut L, LinkError> {
        self.link.as_mut().ok_or(LinkError::Closed)
    }

    /// Non-blocking check for unread inbound bytes
    pub fn has_pending(&mut self) -> Result<bool, LinkError> {
        let link = self.link()?;
        link.bytes_pending()
            .map(|n| n > 0)
            .map_err(LinkError::ReadFailed)
    }

    /// Consume exactly one inbound byte and decode it.
    ///
    /// Callers must check [`has_pending`](Self::has_pending) first; an empty link
    /// yields [`LinkError::NoPendingByte`] after at most the read timeout.
    pub fn read_command(&mut self) -> Result<InboundCommand, LinkError> {
        let link = self.link()?;
        match link.read_byte().map_err(LinkError::ReadFailed)? {
            Some(byte) => Ok(InboundCommand::decode(byte)),
            None => Err(LinkError::NoPendingByte),
        }
    }

    /// Write one directive as `<name>\n`
    pub fn write_line(&mut self, direction: Direction) -> Result<(), LinkError> {
        let line = direction.to_line();
        self.link()?
            .write_bytes(&line)
            .map_err(LinkError::WriteFailed)
    }

    /// Write a single unterminated byte (mode-switch acknowledgements)
    pub fn write_line_raw(&mut self, byte: u8) -> Result<(), LinkError> {
        self.link()?
            .write_bytes(&[byte])
            .map_err(LinkError::WriteFailed)
    }

    /// Release the underlying handle. Safe to call any number of times;
    /// returns true only for the call that actually released it.
    pub fn close(&mut self) -> bool {
        match self.link.take() {
            Some(link) => {
                drop(link);
                info!(path = %self.path, "serial link closed");
                true
            }
            None => false,
        }
    }
}

impl<L: SerialLink> Drop for Transport<L> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Devices worth suggesting when the configured one cannot be opened
fn candidate_devices() -> Vec<String> {
    let mut candidates: Vec<String> = match serialport::available_ports() {
        Ok(ports) => ports.into_iter().map(|p| p.port_name).collect(),
        Err(e) => {
            warn!(?e, "failed to enumerate serial ports");
            Vec::new()
        }
    };

    if let Ok(entries) = std::fs::read_dir("/dev") {
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with("tty") || name.starts_with("serial") {
                candidates.push(format!("/dev/{}", name));
            }
        }
    }

    candidates.sort();
    candidates.dedup();
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::mock::MockLink;

    #[test]
    fn test_write_line_appends_newline() {
        let mock = MockLink::new();
        let mut transport = Transport::new(mock.endpoint(), "mock");

        transport.write_line(Direction::Forward).unwrap();
        transport.write_line_raw(b'3').unwrap();

        assert_eq!(mock.tx(), b"forward\n3");
    }

    #[test]
    fn test_pending_and_read_command() {
        let mock = MockLink::new();
        let mut transport = Transport::new(mock.endpoint(), "mock");
        assert!(!transport.has_pending().unwrap());

        mock.inject(b"4q");
        assert!(transport.has_pending().unwrap());
        assert_eq!(transport.read_command().unwrap(), InboundCommand::SwitchFace);
        assert_eq!(transport.read_command().unwrap(), InboundCommand::Quit);
        assert!(!transport.has_pending().unwrap());
    }

    #[test]
    fn test_read_without_pending_byte() {
        let mock = MockLink::new();
        let mut transport = Transport::new(mock.endpoint(), "mock");
        assert!(matches!(transport.read_command(), Err(LinkError::NoPendingByte)));
    }

    #[test]
    fn test_io_failures_are_classified() {
        let mock = MockLink::new();
        let mut transport = Transport::new(mock.endpoint(), "mock");

        mock.fail_writes(true);
        assert!(matches!(
            transport.write_line(Direction::Stop),
            Err(LinkError::WriteFailed(_))
        ));

        mock.inject(b"3");
        mock.fail_reads(true);
        assert!(matches!(transport.has_pending(), Err(LinkError::ReadFailed(_))));
        assert!(matches!(transport.read_command(), Err(LinkError::ReadFailed(_))));
    }

    #[test]
    fn test_close_is_idempotent() {
        let mock = MockLink::new();
        let mut transport = Transport::new(mock.endpoint(), "mock");

        assert!(transport.close());
        assert!(!transport.close());
        drop(transport);

        assert_eq!(mock.releases(), 1);
    }

    #[test]
    fn test_drop_releases_once() {
        let mock = MockLink::new();
        {
            let _transport = Transport::new(mock.endpoint(), "mock");
        }
        assert_eq!(mock.releases(), 1);
    }

    #[test]
    fn test_closed_link_rejects_io() {
        let mock = MockLink::new();
        let mut transport = Transport::new(mock.endpoint(), "mock");
        transport.close();

        assert!(matches!(transport.write_line(Direction::Stop), Err(LinkError::Closed)));
        assert!(matches!(transport.has_pending(), Err(LinkError::Closed)));
    }

    #[test]
    fn test_unavailable_message_lists_candidates() {
        let err = LinkError::Unavailable {
            path: "/dev/ttyAMA0".into(),
            candidates: vec!["/dev/ttyS0".into(), "/dev/ttyUSB0".into()],
            source: serialport::Error::new(serialport::ErrorKind::NoDevice, "no such device"),
        };
        let msg = err.to_string();
        assert!(msg.contains("/dev/ttyAMA0"));
        assert!(msg.contains("/dev/ttyS0, /dev/ttyUSB0"));
    }
}
