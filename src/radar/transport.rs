use std::io::Write;
use std::path::Path;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use serialport::{SerialPort, SerialPortInfo};
use tracing::{debug, info, warn};

pub const DEFAULT_CONTROL_BAUD: u32 = 115_200;
pub const DEFAULT_DATA_BAUD: u32 = 921_600;

/// Settle time between configuration commands.
const COMMAND_DELAY: Duration = Duration::from_millis(50);
/// The sensor needs longer after `sensorStart` before data flows.
const SENSOR_START_SETTLE: Duration = Duration::from_secs(2);

/// List available serial ports.
pub fn list_ports() -> Result<Vec<SerialPortInfo>> {
    serialport::available_ports().context("Failed to enumerate serial ports")
}

/// Open the data UART carrying the binary frame stream. Reads time out so
/// the processing loop can interleave stop checks; a timeout is "no data
/// yet", not an error.
pub fn open_data_port(path: &str, baud: u32, timeout_ms: u64) -> Result<Box<dyn SerialPort>> {
    info!(port = path, baud, "opening data port");
    serialport::new(path, baud)
        .timeout(Duration::from_millis(timeout_ms))
        .open()
        .with_context(|| format!("Failed to open data port {path}"))
}

/// Lines worth sending from a radar profile file: non-empty and not a `%`
/// comment.
fn is_command_line(line: &str) -> bool {
    !line.is_empty() && !line.starts_with('%')
}

/// Control UART: line-oriented ASCII commands sent once before capture.
pub struct RadarControl {
    port: Box<dyn SerialPort>,
}

impl RadarControl {
    pub fn open(path: &str, baud: u32, timeout_ms: u64) -> Result<Self> {
        info!(port = path, baud, "opening control port");
        let port = serialport::new(path, baud)
            .timeout(Duration::from_millis(timeout_ms))
            .open()
            .with_context(|| format!("Failed to open control port {path}"))?;
        Ok(Self { port })
    }

    /// Send one command terminated with a newline.
    pub fn send_command(&mut self, command: &str) -> Result<()> {
        debug!(command, "sending control command");
        self.port
            .write_all(command.as_bytes())
            .and_then(|_| self.port.write_all(b"\n"))
            .with_context(|| format!("Failed to send command '{command}'"))?;
        self.port.flush().context("Failed to flush control port")?;
        Ok(())
    }

    /// Stream a profile configuration file to the sensor, line by line.
    pub fn send_profile(&mut self, profile: &Path) -> Result<()> {
        let content = std::fs::read_to_string(profile)
            .with_context(|| format!("Failed to read profile file {}", profile.display()))?;

        info!(profile = %profile.display(), "sending radar configuration");
        for line in content.lines() {
            let line = line.trim();
            if !is_command_line(line) {
                continue;
            }
            self.send_command(line)?;
            thread::sleep(COMMAND_DELAY);
            if line.contains("sensorStart") {
                thread::sleep(SENSOR_START_SETTLE);
            }
        }
        info!("radar configuration sent");
        Ok(())
    }

    /// Stop the sensor. Best effort when tearing a session down.
    pub fn stop_sensor(&mut self) {
        if let Err(e) = self.send_command("sensorStop") {
            warn!(error = %e, "sensorStop may have failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_filter() {
        assert!(is_command_line("sensorStart"));
        assert!(is_command_line("profileCfg 0 60.75 30.00"));
        assert!(!is_command_line(""));
        assert!(!is_command_line("% comment line"));
    }

    #[test]
    fn list_ports_does_not_panic() {
        // Available ports depend on the machine; just exercise the call.
        if let Ok(ports) = list_ports() {
            println!("found {} serial ports", ports.len());
        }
    }
}
