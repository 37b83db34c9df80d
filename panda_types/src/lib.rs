//! The field value type system: one formatter/parser pair per `Type`
//! variant named in the data model (uint, int, bit, scalar, time, enum,
//! lut, position, bit_mux, pos_mux, table_descriptor).
//!
//! Every field in the entity model is bound to exactly one of these at
//! parse time; the entity layer calls `format`/`parse` without knowing
//! which variant it is holding.

mod error;
mod lut;
mod table_descriptor;
mod time_unit;

pub use error::TypeError;
pub use table_descriptor::TableField;
pub use table_descriptor::TableFieldType;
pub use time_unit::TimeUnit;
pub use time_unit::CLOCK_PERIOD_NS;

pub type Result<T> = std::result::Result<T, TypeError>;

/// Resolves bit_mux / pos_mux names, i.e. the live set of `bit_out` /
/// `pos_out` field names each instance may be wired to. Supplied by the
/// entity layer at format/parse time rather than stored in the `Type`
/// itself, because the same `Type` is shared by every field of a class
/// while the name tables are global server state.
pub trait MuxNames {
    fn bit_name(&self, index: u32) -> Option<&str>;
    fn bit_index(&self, name: &str) -> Option<u32>;
    fn pos_name(&self, index: u32) -> Option<&str>;
    fn pos_index(&self, name: &str) -> Option<u32>;
}

/// A `MuxNames` that resolves nothing; used by types that never reach the
/// mux branch and by tests that don't care about bus name tables.
pub struct NoMuxNames;

impl MuxNames for NoMuxNames {
    fn bit_name(&self, _index: u32) -> Option<&str> {
        None
    }
    fn bit_index(&self, _name: &str) -> Option<u32> {
        None
    }
    fn pos_name(&self, _index: u32) -> Option<&str> {
        None
    }
    fn pos_index(&self, _name: &str) -> Option<u32> {
        None
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    Uint { max: Option<u64> },
    Int,
    Bit,
    Scalar { scale: f64, offset: f64, units: String },
    Time { unit: TimeUnit },
    Enum { entries: Vec<(u32, String)> },
    Lut,
    Position,
    BitMux,
    PosMux,
    TableDescriptor { fields: Vec<TableField> },
}

impl FieldType {
    pub fn name(&self) -> &'static str {
        match self {
            FieldType::Uint { .. } => "uint",
            FieldType::Int => "int",
            FieldType::Bit => "bit",
            FieldType::Scalar { .. } => "scalar",
            FieldType::Time { .. } => "time",
            FieldType::Enum { .. } => "enum",
            FieldType::Lut => "lut",
            FieldType::Position => "position",
            FieldType::BitMux => "bit_mux",
            FieldType::PosMux => "pos_mux",
            FieldType::TableDescriptor { .. } => "table_descriptor",
        }
    }

    /// Formats one raw 32-bit register value as the wire-protocol string.
    pub fn format(&self, raw: u32, mux: &dyn MuxNames) -> Result<String> {
        match self {
            FieldType::Uint { .. } => Ok(raw.to_string()),
            FieldType::Int => Ok((raw as i32).to_string()),
            FieldType::Bit => Ok(if raw & 1 != 0 { "1" } else { "0" }.to_string()),
            FieldType::Scalar { scale, offset, .. } => {
                let value = (raw as i32) as f64 * scale + offset;
                Ok(format_f64(value))
            }
            FieldType::Time { unit } => Ok(format_f64(unit.ticks_to_value(raw as u64))),
            FieldType::Enum { entries } => entries
                .iter()
                .find(|(value, _)| *value == raw)
                .map(|(_, name)| name.clone())
                .ok_or(TypeError::InvalidEnumValue(raw)),
            FieldType::Lut => Ok(format!("0x{raw:08X}")),
            FieldType::Position => Ok((raw as i32).to_string()),
            FieldType::BitMux => mux
                .bit_name(raw)
                .map(str::to_string)
                .ok_or(TypeError::InvalidMuxIndex(raw)),
            FieldType::PosMux => mux
                .pos_name(raw)
                .map(str::to_string)
                .ok_or(TypeError::InvalidMuxIndex(raw)),
            FieldType::TableDescriptor { .. } => Err(TypeError::NotScalar),
        }
    }

    /// Parses a wire-protocol string into the raw 32-bit value to be
    /// written to hardware / cached in the field.
    pub fn parse(&self, text: &str, mux: &dyn MuxNames) -> Result<u32> {
        let text = text.trim();
        match self {
            FieldType::Uint { max } => {
                let value: u64 = text
                    .parse()
                    .map_err(|_| TypeError::InvalidValue(text.to_string()))?;
                if let Some(max) = max {
                    if value > *max {
                        return Err(TypeError::OutOfRange(value, *max));
                    }
                }
                Ok(value as u32)
            }
            FieldType::Int => {
                let value: i32 = text
                    .parse()
                    .map_err(|_| TypeError::InvalidValue(text.to_string()))?;
                Ok(value as u32)
            }
            FieldType::Bit => match text {
                "0" | "Off" | "off" => Ok(0),
                "1" | "On" | "on" => Ok(1),
                _ => Err(TypeError::InvalidValue(text.to_string())),
            },
            FieldType::Scalar { scale, offset, .. } => {
                let value: f64 = text
                    .parse()
                    .map_err(|_| TypeError::InvalidValue(text.to_string()))?;
                let raw = ((value - offset) / scale).round();
                Ok(raw as i32 as u32)
            }
            FieldType::Time { unit } => {
                let value: f64 = text
                    .parse()
                    .map_err(|_| TypeError::InvalidValue(text.to_string()))?;
                Ok(unit.value_to_ticks(value) as u32)
            }
            FieldType::Enum { entries } => entries
                .iter()
                .find(|(_, name)| name == text)
                .map(|(value, _)| *value)
                .ok_or_else(|| TypeError::InvalidEnumName(text.to_string())),
            FieldType::Lut => lut::parse_lut(text),
            FieldType::Position => {
                let value: i32 = text
                    .parse()
                    .map_err(|_| TypeError::InvalidValue(text.to_string()))?;
                Ok(value as u32)
            }
            FieldType::BitMux => mux
                .bit_index(text)
                .ok_or_else(|| TypeError::InvalidMuxName(text.to_string())),
            FieldType::PosMux => mux
                .pos_index(text)
                .ok_or_else(|| TypeError::InvalidMuxName(text.to_string())),
            FieldType::TableDescriptor { .. } => Err(TypeError::NotScalar),
        }
    }

    /// Enumeration values for `get_enumeration`, in declaration order.
    pub fn enumeration(&self) -> Option<Vec<String>> {
        match self {
            FieldType::Enum { entries } => Some(entries.iter().map(|(_, n)| n.clone()).collect()),
            FieldType::Bit => Some(vec!["0".to_string(), "1".to_string()]),
            _ => None,
        }
    }
}

/// Mirrors the corpus's preference for compact, locale-free numeric
/// formatting: trims a trailing `.0` so integral scaled values read like
/// the C implementation's `%g`-style output.
fn format_f64(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.0}")
    } else {
        let mut s = format!("{value:.10}");
        while s.ends_with('0') {
            s.pop();
        }
        if s.ends_with('.') {
            s.pop();
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uint_round_trips() {
        let t = FieldType::Uint { max: Some(255) };
        let raw = t.parse("200", &NoMuxNames).unwrap();
        assert_eq!(raw, 200);
        assert_eq!(t.format(raw, &NoMuxNames).unwrap(), "200");
        assert!(t.parse("256", &NoMuxNames).is_err());
    }

    #[test]
    fn int_handles_negative() {
        let t = FieldType::Int;
        let raw = t.parse("-5", &NoMuxNames).unwrap();
        assert_eq!(t.format(raw, &NoMuxNames).unwrap(), "-5");
    }

    #[test]
    fn scalar_applies_scale_and_offset() {
        let t = FieldType::Scalar {
            scale: 0.5,
            offset: 1.0,
            units: "V".to_string(),
        };
        // raw 10 -> 10*0.5+1 = 6
        assert_eq!(t.format(10, &NoMuxNames).unwrap(), "6");
        let raw = t.parse("6", &NoMuxNames).unwrap();
        assert_eq!(raw, 10);
    }

    #[test]
    fn enum_round_trips_and_rejects_unknown() {
        let t = FieldType::Enum {
            entries: vec![(0, "Zero".to_string()), (1, "One".to_string())],
        };
        assert_eq!(t.parse("One", &NoMuxNames).unwrap(), 1);
        assert_eq!(t.format(1, &NoMuxNames).unwrap(), "One");
        assert!(t.parse("Two", &NoMuxNames).is_err());
    }

    struct FakeMux;
    impl MuxNames for FakeMux {
        fn bit_name(&self, index: u32) -> Option<&str> {
            if index == 3 {
                Some("TTLIN1.VAL")
            } else {
                None
            }
        }
        fn bit_index(&self, name: &str) -> Option<u32> {
            if name == "TTLIN1.VAL" {
                Some(3)
            } else {
                None
            }
        }
        fn pos_name(&self, _index: u32) -> Option<&str> {
            None
        }
        fn pos_index(&self, _name: &str) -> Option<u32> {
            None
        }
    }

    #[test]
    fn bit_mux_resolves_through_name_table() {
        let t = FieldType::BitMux;
        assert_eq!(t.parse("TTLIN1.VAL", &FakeMux).unwrap(), 3);
        assert_eq!(t.format(3, &FakeMux).unwrap(), "TTLIN1.VAL");
        assert!(t.parse("NOPE", &FakeMux).is_err());
    }
}
