//! Named-register validation: the registers database's
//! `*REG` block assigns symbolic names to fixed offsets. `DeviceHardware`
//! hard-codes a handful of these offsets directly (the bit/position bus
//! reset and burst-read words), so at startup every name it depends on
//! must be present in the parsed database and bound to the same value.

use crate::HwError;
use crate::Result;

pub const BIT_READ_RST_WORD: u32 = 0;
pub const BIT_READ_VALUE_WORD: u32 = 1;
pub const POS_READ_RST_WORD: u32 = 2;
pub const POS_READ_VALUE_WORD: u32 = 3;

/// `(name, offset)` pairs the build hard-codes, in the order the
/// corresponding `*REG` entries are expected to appear.
const EXPECTED: &[(&str, u32)] = &[
    ("BIT_READ_RST", BIT_READ_RST_WORD),
    ("BIT_READ_VALUE", BIT_READ_VALUE_WORD),
    ("POS_READ_RST", POS_READ_RST_WORD),
    ("POS_READ_VALUE", POS_READ_VALUE_WORD),
];

/// Fails with [`HwError::NamedRegisterMissing`] if a name the build
/// depends on is absent from `named`, or [`HwError::NamedRegisterBaseMismatch`]
/// if it's present but bound to a different offset than the one hard-coded
/// into `DeviceHardware`. Extra names present in `named` that the build
/// doesn't reference are ignored.
pub fn validate_named_registers(named: &[(String, u32)]) -> Result<()> {
    for (name, expected) in EXPECTED {
        match named.iter().find(|(n, _)| n == name) {
            None => return Err(HwError::NamedRegisterMissing(name)),
            Some((_, found)) if found != expected => {
                return Err(HwError::NamedRegisterBaseMismatch {
                    block: (*name).to_string(),
                    expected: *expected,
                    found: *found,
                })
            }
            Some(_) => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_a_complete_matching_table() {
        let named = vec![
            ("BIT_READ_RST".to_string(), 0),
            ("BIT_READ_VALUE".to_string(), 1),
            ("POS_READ_RST".to_string(), 2),
            ("POS_READ_VALUE".to_string(), 3),
            ("PCAP_ARM".to_string(), 14),
        ];
        assert!(validate_named_registers(&named).is_ok());
    }

    #[test]
    fn rejects_a_missing_name() {
        let named = vec![("BIT_READ_RST".to_string(), 0)];
        let err = validate_named_registers(&named).unwrap_err();
        assert!(matches!(err, HwError::NamedRegisterMissing("BIT_READ_VALUE")));
    }

    #[test]
    fn rejects_a_mismatched_offset() {
        let named = vec![
            ("BIT_READ_RST".to_string(), 5),
            ("BIT_READ_VALUE".to_string(), 1),
            ("POS_READ_RST".to_string(), 2),
            ("POS_READ_VALUE".to_string(), 3),
        ];
        let err = validate_named_registers(&named).unwrap_err();
        assert!(matches!(err, HwError::NamedRegisterBaseMismatch { expected: 0, found: 5, .. }));
    }
}
