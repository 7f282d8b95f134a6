use anyhow::Result;
use log::{debug, info};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::time::Duration;

use crate::adc::Adc;
use crate::error::MeterError;
use crate::probe::{identify, open_port};

/// Reply lines for other channels tolerated before a request is given up.
const MAX_STALE_REPLIES: usize = 4;

/// ADC behind a serial bridge. Each sample is a `R<idx>\n` request
/// answered by one `<idx>:<raw>` line.
pub struct SerialAdc {
    port: Box<dyn serialport::SerialPort>,
    timeout: Duration,
}

impl SerialAdc {
    /// Open a port directly and log what the bridge identifies as.
    pub fn open(path: &str, baud: u32, timeout: Duration) -> Result<Self> {
        info!("Opening {} for ADC sampling", path);
        let mut port = open_port(path, baud, timeout)?;
        let id = identify(&mut *port)?;
        info!("ADC bridge identifies as {:?}", id);
        Ok(Self { port, timeout })
    }

    /// Wrap a port found by `find_adc_port`, switching it to the sampling timeout.
    pub fn from_probe(mut port: Box<dyn serialport::SerialPort>, timeout: Duration) -> Result<Self> {
        port.set_timeout(timeout)?;
        Ok(Self { port, timeout })
    }
}

impl Adc for SerialAdc {
    fn read(&mut self, channel: u32) -> Result<f64, MeterError> {
        // a reply that arrived after an earlier timeout must not answer this request
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(|e| MeterError::HardwareReadFault {
                channel,
                reason: format!("failed to clear input buffer: {}", e),
            })?;
        sample(&mut *self.port, channel, self.timeout)
    }
}

/// Request one sample over `port` and wait for the reply tagged with `channel`.
pub fn sample<P: Read + Write + ?Sized>(port: &mut P, channel: u32, timeout: Duration) -> Result<f64, MeterError> {
    match exchange(port, channel) {
        Ok(Some(raw)) => parse_sample(channel, &raw),
        Ok(None) => Err(MeterError::HardwareReadFault {
            channel,
            reason: format!("no reply for this channel within {} lines", MAX_STALE_REPLIES + 1),
        }),
        Err(e) if e.kind() == io::ErrorKind::TimedOut => Err(MeterError::HardwareReadTimeout { channel, timeout }),
        Err(e) => Err(MeterError::HardwareReadFault {
            channel,
            reason: e.to_string(),
        }),
    }
}

/// Send `R<channel>` and return the value part of the first reply for that channel.
fn exchange<P: Read + Write + ?Sized>(port: &mut P, channel: u32) -> io::Result<Option<String>> {
    writeln!(port, "R{}", channel)?;
    port.flush()?;

    let mut reader = BufReader::new(port);
    for _ in 0..=MAX_STALE_REPLIES {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "serial port returned EOF"));
        }
        match line.trim().split_once(':') {
            Some((idx, value)) if idx.trim().parse::<u32>().ok() == Some(channel) => {
                return Ok(Some(value.to_string()))
            }
            _ => debug!("Dropping reply {:?} while waiting for channel {}", line.trim(), channel),
        }
    }
    Ok(None)
}

/// Parse the value part of a reply into a raw sample.
pub fn parse_sample(channel: u32, value: &str) -> Result<f64, MeterError> {
    let trimmed = value.trim();
    match trimmed.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => {
            debug!("Unexpected reply for channel {}: {:?}", channel, trimmed);
            Err(MeterError::HardwareReadFault {
                channel,
                reason: format!("unexpected reply {:?}", trimmed),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    const TIMEOUT: Duration = Duration::from_millis(500);

    /// Serial link stand-in: each read hands out the next scripted chunk or error.
    struct ScriptedPort {
        written: Vec<u8>,
        replies: VecDeque<io::Result<Vec<u8>>>,
    }

    impl ScriptedPort {
        fn new(replies: Vec<io::Result<&str>>) -> Self {
            Self {
                written: Vec::new(),
                replies: replies
                    .into_iter()
                    .map(|r| r.map(|s| s.as_bytes().to_vec()))
                    .collect(),
            }
        }
    }

    impl Read for ScriptedPort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.replies.pop_front() {
                None => Ok(0),
                Some(Err(e)) => Err(e),
                Some(Ok(bytes)) => {
                    let n = bytes.len().min(buf.len());
                    buf[..n].copy_from_slice(&bytes[..n]);
                    if n < bytes.len() {
                        self.replies.push_front(Ok(bytes[n..].to_vec()));
                    }
                    Ok(n)
                }
            }
        }
    }

    impl Write for ScriptedPort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn sample_sends_request_and_reads_tagged_reply() {
        let mut port = ScriptedPort::new(vec![Ok("3:511.75\r\n")]);
        let value = sample(&mut port, 3, TIMEOUT).unwrap();
        assert!((value - 511.75).abs() < 1e-9);
        assert_eq!(port.written, b"R3\n");
    }

    #[test]
    fn late_reply_for_another_channel_is_skipped() {
        let mut port = ScriptedPort::new(vec![Ok("0:700\r\n1:512\r\n")]);
        assert_eq!(sample(&mut port, 1, TIMEOUT).unwrap(), 512.0);
    }

    #[test]
    fn only_foreign_replies_is_a_fault() {
        let mut port = ScriptedPort::new(vec![Ok("0:1\n0:2\n0:3\n0:4\n0:5\n1:6\n")]);
        let err = sample(&mut port, 1, TIMEOUT).unwrap_err();
        assert!(matches!(err, MeterError::HardwareReadFault { channel: 1, .. }));
    }

    #[test]
    fn timeout_maps_to_read_timeout() {
        let mut port = ScriptedPort::new(vec![Err(io::Error::new(io::ErrorKind::TimedOut, "timed out"))]);
        let err = sample(&mut port, 2, TIMEOUT).unwrap_err();
        assert!(matches!(
            err,
            MeterError::HardwareReadTimeout { channel: 2, timeout } if timeout == TIMEOUT
        ));
        assert!(err.is_transient());
    }

    #[test]
    fn eof_maps_to_read_fault() {
        let mut port = ScriptedPort::new(vec![]);
        let err = sample(&mut port, 0, TIMEOUT).unwrap_err();
        assert!(matches!(err, MeterError::HardwareReadFault { channel: 0, .. }));
    }

    #[test]
    fn io_error_maps_to_read_fault() {
        let mut port = ScriptedPort::new(vec![Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged"))]);
        let err = sample(&mut port, 5, TIMEOUT).unwrap_err();
        assert!(matches!(err, MeterError::HardwareReadFault { channel: 5, .. }));
    }

    #[test]
    fn parse_integer_sample() {
        assert_eq!(parse_sample(0, "512\r\n").unwrap(), 512.0);
    }

    #[test]
    fn garbage_is_a_fault() {
        for value in ["", "\r\n", "ERR", "NaN", "12 13"] {
            let err = parse_sample(2, value).unwrap_err();
            assert!(matches!(err, MeterError::HardwareReadFault { channel: 2, .. }), "{:?}", value);
        }
        let mut port = ScriptedPort::new(vec![Ok("2:ERR\n")]);
        assert!(matches!(
            sample(&mut port, 2, TIMEOUT).unwrap_err(),
            MeterError::HardwareReadFault { channel: 2, .. }
        ));
    }
}
