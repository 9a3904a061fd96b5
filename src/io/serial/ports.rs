// src/io/serial/ports.rs
//
// Serial port discovery. The dongle enumerates as a USB CDC device exposing
// one or two ports; callers either name the ports directly or look them up
// by the dongle's USB VID/PID.

use serde::Serialize;
use serialport::{SerialPortInfo, SerialPortType};

use crate::error::{DongleError, Result};

/// Serial port as reported by the operating system.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DonglePortInfo {
    pub port_name: String,
    pub port_type: String,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
}

impl From<SerialPortInfo> for DonglePortInfo {
    fn from(p: SerialPortInfo) -> Self {
        let (port_type, manufacturer, product, serial_number, vid, pid) = match p.port_type {
            SerialPortType::UsbPort(info) => (
                "USB",
                info.manufacturer,
                info.product,
                info.serial_number,
                Some(info.vid),
                Some(info.pid),
            ),
            SerialPortType::BluetoothPort => ("Bluetooth", None, None, None, None, None),
            SerialPortType::PciPort => ("PCI", None, None, None, None, None),
            SerialPortType::Unknown => ("Unknown", None, None, None, None, None),
        };
        DonglePortInfo {
            port_name: p.port_name,
            port_type: port_type.to_string(),
            manufacturer,
            product,
            serial_number,
            vid,
            pid,
        }
    }
}

/// Whether a port should be offered to callers.
///
/// On macOS only /dev/cu.* (calling unit) devices are kept. The matching
/// /dev/tty.* devices block on open waiting for carrier detect.
fn is_usable_port(port_name: &str) -> bool {
    #[cfg(target_os = "macos")]
    {
        !port_name.starts_with("/dev/tty.")
    }
    #[cfg(not(target_os = "macos"))]
    {
        let _ = port_name;
        true
    }
}

/// List available serial ports.
pub fn list_serial_ports() -> Result<Vec<DonglePortInfo>> {
    let ports = serialport::available_ports()
        .map_err(|e| DongleError::transport("port enumeration", format!("Failed to enumerate ports: {}", e)))?;

    Ok(ports
        .into_iter()
        .filter(|p| is_usable_port(&p.port_name))
        .map(DonglePortInfo::from)
        .collect())
}

/// Ports whose USB VID/PID match, sorted by name so link A comes first.
pub fn find_ports_by_usb_id(vid: u16, pid: u16) -> Result<Vec<DonglePortInfo>> {
    let mut ports = filter_by_usb_id(list_serial_ports()?, vid, pid);
    ports.sort_by(|a, b| a.port_name.cmp(&b.port_name));
    Ok(ports)
}

fn filter_by_usb_id(ports: Vec<DonglePortInfo>, vid: u16, pid: u16) -> Vec<DonglePortInfo> {
    ports
        .into_iter()
        .filter(|p| p.vid == Some(vid) && p.pid == Some(pid))
        .collect()
}
