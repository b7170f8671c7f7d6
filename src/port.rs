//! Serial transport: channel lifecycle and raw, timeout-bounded I/O.

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, trace};

/// Longest single wait while draining stale input.
const DRAIN_POLL: Duration = Duration::from_millis(20);

#[derive(Debug, Error)]
pub enum PortError {
    #[error("channel {path} unavailable: {source}")]
    ChannelUnavailable {
        path: String,
        #[source]
        source: serialport::Error,
    },
    #[error("line configuration rejected: {0}")]
    Configuration(#[source] serialport::Error),
    #[error("short write: {written} of {expected} bytes accepted")]
    Write { written: usize, expected: usize },
    #[error("channel i/o: {0}")]
    Io(#[from] std::io::Error),
}

/// Line discipline applied after open. Data bits, parity, stop bits and flow
/// control are fixed at 8-N-1 without flow control; only the baud rate varies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineSettings {
    pub baud: u32,
}

impl Default for LineSettings {
    fn default() -> Self {
        Self { baud: 115_200 }
    }
}

/// An open, exclusively owned communication line. Dropping it closes it.
pub trait Channel: Send {
    fn configure(&mut self, settings: &LineSettings) -> Result<(), PortError>;

    /// Wait up to `timeout` for input. Returning `Ok(0)` means nothing arrived.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, PortError>;

    /// Single write attempt; returns how many bytes the line accepted.
    fn write_some(&mut self, bytes: &[u8]) -> Result<usize, PortError>;

    /// Ask the OS to drop whatever is queued on the input side.
    fn clear_input(&mut self) -> Result<(), PortError> {
        Ok(())
    }

    /// Write the whole buffer or fail. Short writes are not retried here.
    fn write(&mut self, bytes: &[u8]) -> Result<(), PortError> {
        let written = self.write_some(bytes)?;
        if written < bytes.len() {
            return Err(PortError::Write {
                written,
                expected: bytes.len(),
            });
        }
        Ok(())
    }

    /// Discard pending input for at most `window`, stopping early once the
    /// line goes quiet. Returns the number of bytes thrown away.
    fn discard_input(&mut self, window: Duration) -> Result<usize, PortError> {
        self.clear_input()?;
        let deadline = Instant::now() + window;
        let mut buf = [0u8; 64];
        let mut dropped = 0;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let n = self.read(&mut buf, remaining.min(DRAIN_POLL))?;
            if n == 0 {
                break;
            }
            dropped += n;
        }
        if dropped > 0 {
            debug!(bytes = dropped, "discarded stale input");
        }
        Ok(dropped)
    }
}

/// Produces channels by path.
pub trait Opener {
    type Channel: Channel;

    fn open(&mut self, path: &str, settings: &LineSettings) -> Result<Self::Channel, PortError>;
}

/// A real serial line backed by the `serialport` crate. The port is put in
/// raw mode on open and every read waits with `poll`, so each call honours
/// its own timeout.
pub struct SerialChannel {
    port: Box<dyn SerialPort>,
}

impl Channel for SerialChannel {
    fn configure(&mut self, settings: &LineSettings) -> Result<(), PortError> {
        let port = &mut self.port;
        port.set_baud_rate(settings.baud)
            .map_err(PortError::Configuration)?;
        port.set_data_bits(DataBits::Eight)
            .map_err(PortError::Configuration)?;
        port.set_parity(Parity::None)
            .map_err(PortError::Configuration)?;
        port.set_stop_bits(StopBits::One)
            .map_err(PortError::Configuration)?;
        port.set_flow_control(FlowControl::None)
            .map_err(PortError::Configuration)
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, PortError> {
        self.port
            .set_timeout(timeout)
            .map_err(PortError::Configuration)?;
        match self.port.read(buf) {
            Ok(n) => {
                trace!(bytes = n, "read");
                Ok(n)
            }
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => Ok(0),
            Err(e) => Err(PortError::Io(e)),
        }
    }

    fn write_some(&mut self, bytes: &[u8]) -> Result<usize, PortError> {
        let n = self.port.write(bytes)?;
        self.port.flush()?;
        Ok(n)
    }

    fn clear_input(&mut self) -> Result<(), PortError> {
        self.port
            .clear(ClearBuffer::Input)
            .map_err(|e| PortError::Io(e.into()))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SerialOpener;

impl Opener for SerialOpener {
    type Channel = SerialChannel;

    fn open(&mut self, path: &str, settings: &LineSettings) -> Result<SerialChannel, PortError> {
        let port = serialport::new(path, settings.baud)
            .timeout(Duration::from_millis(100))
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open()
            .map_err(|source| PortError::ChannelUnavailable {
                path: path.to_string(),
                source,
            })?;
        debug!(path, baud = settings.baud, "channel open");
        Ok(SerialChannel { port })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Hands out queued chunks, one per read, then goes quiet.
    struct Scripted {
        chunks: VecDeque<Vec<u8>>,
        accept: usize,
        cleared: bool,
    }

    impl Channel for Scripted {
        fn configure(&mut self, _: &LineSettings) -> Result<(), PortError> {
            Ok(())
        }
        fn read(&mut self, buf: &mut [u8], _: Duration) -> Result<usize, PortError> {
            match self.chunks.pop_front() {
                Some(c) => {
                    buf[..c.len()].copy_from_slice(&c);
                    Ok(c.len())
                }
                None => Ok(0),
            }
        }
        fn write_some(&mut self, bytes: &[u8]) -> Result<usize, PortError> {
            Ok(bytes.len().min(self.accept))
        }
        fn clear_input(&mut self) -> Result<(), PortError> {
            self.cleared = true;
            Ok(())
        }
    }

    fn scripted(chunks: &[&[u8]], accept: usize) -> Scripted {
        Scripted {
            chunks: chunks.iter().map(|c| c.to_vec()).collect(),
            accept,
            cleared: false,
        }
    }

    #[test]
    fn short_write_is_an_error() {
        let mut ch = scripted(&[], 3);
        match ch.write(b"GOTO 2\n") {
            Err(PortError::Write { written, expected }) => {
                assert_eq!(written, 3);
                assert_eq!(expected, 7);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn full_write_succeeds() {
        let mut ch = scripted(&[], usize::MAX);
        assert!(ch.write(b"ID\n").is_ok());
    }

    #[test]
    fn discard_drains_until_quiet() {
        let mut ch = scripted(&[b"\x00\xffboot", b"loader v2\r\n"], usize::MAX);
        let dropped = ch.discard_input(Duration::from_millis(200)).unwrap();
        assert_eq!(dropped, 17);
        assert!(ch.cleared);
        let mut buf = [0u8; 8];
        assert_eq!(ch.read(&mut buf, Duration::ZERO).unwrap(), 0);
    }

    /// Never goes quiet.
    struct Babbling;

    impl Channel for Babbling {
        fn configure(&mut self, _: &LineSettings) -> Result<(), PortError> {
            Ok(())
        }
        fn read(&mut self, buf: &mut [u8], _: Duration) -> Result<usize, PortError> {
            std::thread::sleep(Duration::from_millis(1));
            let n = buf.len().min(8);
            buf[..n].fill(b'~');
            Ok(n)
        }
        fn write_some(&mut self, bytes: &[u8]) -> Result<usize, PortError> {
            Ok(bytes.len())
        }
    }

    #[test]
    fn discard_stops_at_window_on_endless_noise() {
        let started = Instant::now();
        let dropped = Babbling.discard_input(Duration::from_millis(100)).unwrap();
        let elapsed = started.elapsed();
        assert!(dropped > 0);
        assert!(elapsed >= Duration::from_millis(100), "{:?}", elapsed);
        assert!(elapsed < Duration::from_millis(300), "{:?}", elapsed);
    }

    #[test]
    fn discard_with_zero_window_reads_nothing() {
        let mut ch = scripted(&[b"noise"], usize::MAX);
        assert_eq!(ch.discard_input(Duration::ZERO).unwrap(), 0);
        assert_eq!(ch.chunks.len(), 1);
    }

    #[test]
    fn open_missing_path_is_unavailable() {
        let err = SerialOpener
            .open("/dev/does-not-exist-wheel", &LineSettings::default())
            .err()
            .expect("open should fail");
        assert!(matches!(err, PortError::ChannelUnavailable { .. }));
    }
}
