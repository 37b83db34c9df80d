//! MAC address file: up to `MAC_ADDRESS_COUNT` lines, each
//! a comment, blank slot, or `XX:XX:XX:XX:XX:XX`, applied to consecutive
//! hardware MAC registers at startup.

use std::path::Path;

use panda_hw::HardwareAccess;

use crate::error::PersistError;
use crate::error::Result;

/// Number of MAC address slots the hardware exposes.
pub const MAC_ADDRESS_COUNT: usize = 4;

fn parse_octets(line: &str) -> std::result::Result<[u8; 6], String> {
    let parts: Vec<&str> = line.split(':').collect();
    if parts.len() != 6 {
        return Err(format!("{line:?} is not a MAC address"));
    }
    let mut octets = [0u8; 6];
    for (slot, part) in octets.iter_mut().zip(parts) {
        *slot = u8::from_str_radix(part, 16).map_err(|_| format!("{part:?} is not a hex octet"))?;
    }
    Ok(octets)
}

/// Loads the MAC file and writes every non-blank, non-comment line to its
/// corresponding hardware register. Missing trailing slots are left alone.
pub fn load_and_apply(path: &Path, hw: &dyn HardwareAccess) -> Result<()> {
    let text = std::fs::read_to_string(path)?;
    for (lineno, line) in text.lines().enumerate() {
        if lineno >= MAC_ADDRESS_COUNT {
            break;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let octets = parse_octets(trimmed).map_err(|msg| PersistError::Malformed(path.display().to_string(), lineno + 1, msg))?;
        hw.write_mac(lineno, octets).map_err(|e| PersistError::Malformed(path.display().to_string(), lineno + 1, e.to_string()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_and_comment_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mac.txt");
        std::fs::write(&path, "# first port\n\n00:11:22:33:44:55\n").unwrap();
        let hw = panda_hw::NullHardware::new();
        load_and_apply(&path, &hw).unwrap();
        assert_eq!(hw.last_mac(2), Some([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]));
    }

    #[test]
    fn malformed_line_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mac.txt");
        std::fs::write(&path, "not-a-mac\n").unwrap();
        let hw = panda_hw::NullHardware::new();
        assert!(load_and_apply(&path, &hw).is_err());
    }
}
