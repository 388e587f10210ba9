use serialport::{SerialPortInfo, SerialPortType};
use std::collections::HashSet;

/// Available serial ports, USB adapters first
pub fn available_ports_sorted() -> Vec<SerialPortInfo> {
    match serialport::available_ports() {
        Ok(ports) => sort_and_dedup_ports(ports),
        Err(err) => {
            log::warn!("Failed to enumerate serial ports: {err}");
            Vec::new()
        }
    }
}

/// One-line description of a port for listings
pub fn describe_port(port: &SerialPortInfo) -> String {
    match &port.port_type {
        SerialPortType::UsbPort(usb) => format!(
            "{} (usb {:04x}:{:04x}{})",
            port.port_name,
            usb.vid,
            usb.pid,
            usb.product
                .as_deref()
                .map(|p| format!(" {p}"))
                .unwrap_or_default()
        ),
        SerialPortType::PciPort => format!("{} (pci)", port.port_name),
        SerialPortType::BluetoothPort => format!("{} (bluetooth)", port.port_name),
        _ => port.port_name.clone(),
    }
}

fn priority(name: &str) -> i32 {
    let n = name.to_lowercase();
    if n.contains("ttyusb") || n.contains("usb") {
        0
    } else if n.contains("acm") {
        1
    } else if n.contains("ttys") || n.contains("serial") || n.starts_with("com") {
        2
    } else {
        10
    }
}

pub(crate) fn sort_and_dedup_ports(raw_ports: Vec<SerialPortInfo>) -> Vec<SerialPortInfo> {
    let mut seen = HashSet::new();
    let mut ports: Vec<SerialPortInfo> = raw_ports
        .into_iter()
        .filter(|p| seen.insert(p.port_name.to_lowercase()))
        .collect();

    ports.sort_by(|a, b| {
        priority(&a.port_name)
            .cmp(&priority(&b.port_name))
            .then_with(|| a.port_name.cmp(&b.port_name))
    });
    ports
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make(name: &str) -> SerialPortInfo {
        SerialPortInfo {
            port_name: name.to_string(),
            port_type: SerialPortType::Unknown,
        }
    }

    #[test]
    fn test_usb_ports_sorted_first_and_deduped() {
        let input = vec![
            make("/dev/ttyS1"),
            make("/dev/ttyUSB0"),
            make("/dev/ttyACM0"),
            make("/dev/ttyS0"),
            make("/dev/ttyUSB0"),
        ];
        let names: Vec<String> = sort_and_dedup_ports(input)
            .into_iter()
            .map(|p| p.port_name)
            .collect();

        assert_eq!(
            names,
            vec!["/dev/ttyUSB0", "/dev/ttyACM0", "/dev/ttyS0", "/dev/ttyS1"]
        );
    }
}
