use anyhow::{bail, Context, Result};
use log::{debug, info, warn};
use std::io::{BufRead, BufReader, Write};
use std::time::Duration;

pub const IDENTIFY_REQUEST: &[u8] = b"I\n";

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Open the ADC bridge's serial port (8N1).
pub fn open_port(path: &str, baud: u32, timeout: Duration) -> Result<Box<dyn serialport::SerialPort>> {
    serialport::new(path, baud)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .timeout(timeout)
        .open()
        .with_context(|| format!("Failed to open serial port {}", path))
}

/// Ask the bridge to identify itself and return the first reply line.
pub fn identify(port: &mut dyn serialport::SerialPort) -> Result<String> {
    port.clear(serialport::ClearBuffer::Input)
        .context("Failed to clear serial input buffer")?;
    port.write_all(IDENTIFY_REQUEST)?;
    port.flush()?;

    let mut reader = BufReader::new(port);
    let mut line = String::new();
    reader
        .read_line(&mut line)
        .context("Failed to read identification line")?;
    Ok(line.trim().to_string())
}

/// A bridge located on one of the USB serial ports.
pub struct ProbeResult {
    pub port: Box<dyn serialport::SerialPort>,
    pub path: String,
    pub device_id: String,
}

fn is_usb_serial(info: &serialport::SerialPortInfo) -> bool {
    matches!(info.port_type, serialport::SerialPortType::UsbPort(_))
        || info.port_name.contains("ttyUSB")
        || info.port_name.contains("ttyACM")
}

/// Ask every USB serial port to identify itself and keep the first one
/// whose reply mentions `device_id`. Ports that fail to open or answer are skipped.
pub fn find_adc_port(device_id: &str, baud: u32) -> Result<ProbeResult> {
    let candidates: Vec<String> = serialport::available_ports()
        .context("Failed to enumerate serial ports")?
        .into_iter()
        .filter(is_usb_serial)
        .map(|info| info.port_name)
        .collect();

    if candidates.is_empty() {
        bail!("No USB serial ports to search for ADC bridge {}", device_id);
    }
    debug!("Searching {:?} for ADC bridge {}", candidates, device_id);

    let found = candidates.iter().find_map(|path| {
        let attempt = open_port(path, baud, PROBE_TIMEOUT).and_then(|mut port| {
            let reply = identify(&mut *port)?;
            Ok((port, reply))
        });
        match attempt {
            Ok((port, reply)) if reply.contains(device_id) => Some(ProbeResult {
                port,
                path: path.clone(),
                device_id: reply,
            }),
            Ok((_, reply)) => {
                debug!("{} answered {:?}, skipping", path, reply);
                None
            }
            Err(e) => {
                warn!("Skipping {}: {:#}", path, e);
                None
            }
        }
    });

    match found {
        Some(result) => {
            info!("ADC bridge {} answered on {}", result.device_id, result.path);
            Ok(result)
        }
        None => bail!("ADC bridge {} did not answer on {}", device_id, candidates.join(", ")),
    }
}
