//! List-ports command implementation.

use anyhow::{Context, Result};
use console::style;

/// List available serial ports with their USB metadata.
pub(crate) fn cmd_list_ports() -> Result<()> {
    let ports = nrfdfu::list_ports().context("failed to enumerate serial ports")?;

    if ports.is_empty() {
        eprintln!("{} No serial ports found", style("!").yellow());
        return Ok(());
    }

    for port in ports {
        let mut line = port.name;
        if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            line.push_str(&format!("  [{vid:04x}:{pid:04x}]"));
        }
        if let Some(product) = port.product {
            line.push_str(&format!("  {product}"));
        }
        if let Some(serial) = port.serial_number {
            line.push_str(&format!("  (serial: {serial})"));
        }
        println!("{line}");
    }

    Ok(())
}
