//! Device spec parsing and USB tty enumeration.
//!
//! A device spec selects which board (or daemon socket) to open:
//! - `any` — first matching USB tty
//! - 16 hex chars — match by serial number substring
//! - `<cell>:<addr>` or `:<addr>` — probe candidates by status (hex fields)
//! - absolute path — open directly
//! - decimal, up to 3 digits — `/dev/ttyACM<n>`
//! - `unix://<socket>[@<tty-spec>]` — proxy client, or server owning `<tty-spec>`

use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;
use tokio_serial::SerialPortType;
use tracing::debug;

/// USB vendor id of the Cloud Chaser CDC-ACM interface.
pub const USB_VID: u16 = 0xCCCC;
/// USB product id of the Cloud Chaser CDC-ACM interface.
pub const USB_PID: u16 = 0xCCCC;

/// A parsed device spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSpec {
    /// First enumerated board.
    Any,
    /// Match by serial-number substring (16 hex chars).
    Serial(String),
    /// Probe candidates for a status with this cell/address.
    CellAddr { cell: Option<u8>, addr: u16 },
    /// Literal tty path.
    Path(String),
    /// `/dev/ttyACM<n>` shorthand.
    AcmIndex(u32),
    /// Proxy socket; with `tty` the opener becomes the serving daemon.
    Unix {
        socket: String,
        tty: Option<String>,
    },
}

impl FromStr for DeviceSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<DeviceSpec> {
        if s.is_empty() {
            return Err(Error::InvalidArgument("empty device spec".to_owned()));
        }
        if let Some(rest) = s.strip_prefix("unix://") {
            if rest.is_empty() {
                return Err(Error::InvalidArgument(
                    "unix:// spec needs a socket path".to_owned(),
                ));
            }
            return Ok(match rest.split_once('@') {
                Some((socket, tty)) if !tty.is_empty() => DeviceSpec::Unix {
                    socket: socket.to_owned(),
                    tty: Some(tty.to_owned()),
                },
                Some((socket, _)) => DeviceSpec::Unix {
                    socket: socket.to_owned(),
                    tty: None,
                },
                None => DeviceSpec::Unix {
                    socket: rest.to_owned(),
                    tty: None,
                },
            });
        }
        if s == "any" {
            return Ok(DeviceSpec::Any);
        }
        if s.starts_with('/') {
            return Ok(DeviceSpec::Path(s.to_owned()));
        }
        if s.len() == 16 && s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Ok(DeviceSpec::Serial(s.to_lowercase()));
        }
        if let Some((cell, addr)) = s.split_once(':') {
            let cell = if cell.is_empty() {
                None
            } else {
                Some(u8::from_str_radix(cell, 16).map_err(|_| {
                    Error::InvalidArgument(format!("bad cell in device spec '{s}'"))
                })?)
            };
            let addr = u16::from_str_radix(addr, 16)
                .map_err(|_| Error::InvalidArgument(format!("bad addr in device spec '{s}'")))?;
            return Ok(DeviceSpec::CellAddr { cell, addr });
        }
        if s.len() <= 3 && s.chars().all(|c| c.is_ascii_digit()) {
            return Ok(DeviceSpec::AcmIndex(s.parse().unwrap_or(0)));
        }
        Err(Error::InvalidArgument(format!(
            "unrecognized device spec '{s}'"
        )))
    }
}

impl fmt::Display for DeviceSpec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DeviceSpec::Any => write!(f, "any"),
            DeviceSpec::Serial(serial) => write!(f, "{serial}"),
            DeviceSpec::CellAddr {
                cell: Some(cell),
                addr,
            } => write!(f, "{cell:02x}:{addr:04x}"),
            DeviceSpec::CellAddr { cell: None, addr } => write!(f, ":{addr:04x}"),
            DeviceSpec::Path(path) => write!(f, "{path}"),
            DeviceSpec::AcmIndex(n) => write!(f, "{n}"),
            DeviceSpec::Unix {
                socket,
                tty: Some(tty),
            } => write!(f, "unix://{socket}@{tty}"),
            DeviceSpec::Unix { socket, tty: None } => write!(f, "unix://{socket}"),
        }
    }
}

/// One enumerated candidate board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub path: String,
    pub serial: Option<String>,
}

/// List attached boards (USB ttys matching the vendor/product ids).
pub fn enumerate() -> Result<Vec<DeviceInfo>> {
    let mut out = Vec::new();
    for port in tokio_serial::available_ports()? {
        if let SerialPortType::UsbPort(usb) = &port.port_type {
            if usb.vid != USB_VID || usb.pid != USB_PID {
                continue;
            }
            debug!(path = %port.port_name, serial = ?usb.serial_number, "candidate device");
            out.push(DeviceInfo {
                path: port.port_name.clone(),
                serial: usb.serial_number.as_ref().map(|s| s.to_lowercase()),
            });
        }
    }
    Ok(out)
}

/// Resolve the specs that do not require probing a live device.
/// `CellAddr` resolution (status probing) lives in the façade.
pub fn resolve_static(spec: &DeviceSpec) -> Result<Option<String>> {
    match spec {
        DeviceSpec::Path(path) => Ok(Some(path.clone())),
        DeviceSpec::AcmIndex(n) => Ok(Some(format!("/dev/ttyACM{n}"))),
        DeviceSpec::Any => {
            let found = enumerate()?
                .into_iter()
                .next()
                .ok_or_else(|| Error::DeviceNotMatched("any".to_owned()))?;
            Ok(Some(found.path))
        }
        DeviceSpec::Serial(serial) => {
            let found = enumerate()?
                .into_iter()
                .find(|d| d.serial.as_deref().is_some_and(|s| s.contains(serial)))
                .ok_or_else(|| Error::DeviceNotMatched(serial.clone()))?;
            Ok(Some(found.path))
        }
        DeviceSpec::CellAddr { .. } | DeviceSpec::Unix { .. } => Ok(None),
    }
}
