//! Per-sample conversion: turns one fixed-layout raw
//! record from the capture buffer into the wire values a data client
//! asked for. `RAW` is a passthrough; `UNSCALED` and `SCALED` each apply
//! a fixed width/type per [`FieldCategory`] as described in the base
//! spec's "Conversion" subsection.

use panda_entity::CaptureOption;
use panda_types::CLOCK_PERIOD_NS;

use crate::plan::CapturePlan;
use crate::plan::FieldCategory;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Process {
    Raw,
    Unscaled,
    Scaled,
}

impl Process {
    pub fn label(&self) -> &'static str {
        match self {
            Process::Raw => "Raw",
            Process::Unscaled => "Unscaled",
            Process::Scaled => "Scaled",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum FieldValue {
    U32(u32),
    I32(i32),
    I64(i64),
    F64(f64),
}

impl FieldValue {
    pub fn byte_width(&self) -> usize {
        match self {
            FieldValue::U32(_) | FieldValue::I32(_) => 4,
            FieldValue::I64(_) | FieldValue::F64(_) => 8,
        }
    }

    pub fn write_le(&self, out: &mut Vec<u8>) {
        match self {
            FieldValue::U32(v) => out.extend_from_slice(&v.to_le_bytes()),
            FieldValue::I32(v) => out.extend_from_slice(&v.to_le_bytes()),
            FieldValue::I64(v) => out.extend_from_slice(&v.to_le_bytes()),
            FieldValue::F64(v) => out.extend_from_slice(&v.to_le_bytes()),
        }
    }

    pub fn to_ascii(self) -> String {
        match self {
            FieldValue::U32(v) => v.to_string(),
            FieldValue::I32(v) => v.to_string(),
            FieldValue::I64(v) => v.to_string(),
            FieldValue::F64(v) => format_double(v),
        }
    }
}

fn format_double(value: f64) -> String {
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

fn read_u32(raw: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(raw[offset..offset + 4].try_into().unwrap())
}

fn read_i64(raw: &[u8], offset: usize) -> i64 {
    i64::from_le_bytes(raw[offset..offset + 8].try_into().unwrap())
}

/// Per-session conversion state the DMA reader's per-client transform
/// carries forward: the first TS_OFFSET timestamp observed becomes the
/// baseline every later sample's offset is computed against.
#[derive(Default)]
pub struct ConvertState {
    ts_baseline: Option<i64>,
}

/// Converts one raw sample record (`raw.len() == plan.sample_bytes`) into
/// one [`FieldValue`] per plan field, in plan order.
pub fn convert_values(plan: &CapturePlan, process: Process, raw: &[u8], state: &mut ConvertState) -> Vec<FieldValue> {
    let sample_count = plan
        .fields
        .iter()
        .find(|f| f.category == FieldCategory::SampleCount)
        .map(|f| read_u32(raw, f.offset).max(1))
        .unwrap_or(1);

    plan.fields
        .iter()
        .map(|field| match field.category {
            FieldCategory::Timestamp => {
                let mut ticks = read_i64(raw, field.offset);
                if field.capture == CaptureOption::Diff {
                    let baseline = *state.ts_baseline.get_or_insert(ticks);
                    ticks -= baseline;
                }
                match process {
                    Process::Scaled => FieldValue::F64(ticks as f64 * CLOCK_PERIOD_NS),
                    _ => FieldValue::I64(ticks),
                }
            }
            FieldCategory::Unscaled32 => FieldValue::U32(read_u32(raw, field.offset)),
            FieldCategory::Scaled32 => {
                let raw_value = read_u32(raw, field.offset) as i32;
                match process {
                    Process::Scaled => {
                        let (scale, offset, _) = scaling(field);
                        FieldValue::F64(raw_value as f64 * scale + offset)
                    }
                    _ => FieldValue::I32(raw_value),
                }
            }
            FieldCategory::Scaled64 => {
                let raw_value = read_i64(raw, field.offset);
                match process {
                    Process::Scaled => {
                        let (scale, offset, _) = scaling(field);
                        FieldValue::F64(raw_value as f64 * scale + offset)
                    }
                    _ => FieldValue::I64(raw_value),
                }
            }
            FieldCategory::AdcMean => {
                let sum = read_i64(raw, field.offset);
                match process {
                    Process::Scaled => {
                        let (scale, offset, _) = scaling(field);
                        FieldValue::F64((sum as f64 / sample_count as f64) * scale + offset)
                    }
                    _ => FieldValue::I32(((sum * 256) / sample_count as i64) as i32),
                }
            }
            FieldCategory::SampleCount => FieldValue::U32(read_u32(raw, field.offset)),
            FieldCategory::BitsGroup => {
                let word = read_u32(raw, field.offset);
                let bit = field.bit_slot.expect("bits-group field without a bit slot");
                FieldValue::U32((word >> bit) & 1)
            }
        })
        .collect()
}

fn scaling(field: &crate::plan::PlanField) -> (f64, f64, String) {
    field.scaling.clone().unwrap_or((1.0, 0.0, String::new()))
}

/// Converts one raw sample record into its wire bytes for a binary format
/// (`FRAMED`/`UNFRAMED`/`BASE64`). `RAW` copies the record unchanged.
pub fn convert_binary(plan: &CapturePlan, process: Process, raw: &[u8], state: &mut ConvertState, out: &mut Vec<u8>) {
    if process == Process::Raw {
        out.extend_from_slice(raw);
        return;
    }
    for value in convert_values(plan, process, raw, state) {
        value.write_le(out);
    }
}

/// Converts one raw sample record into a single space-separated `ASCII`
/// row (no trailing newline).
pub fn convert_ascii_row(plan: &CapturePlan, process: Process, raw: &[u8], state: &mut ConvertState) -> String {
    convert_values(plan, process, raw, state)
        .into_iter()
        .map(FieldValue::to_ascii)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Bytes per converted sample for a given (process, format) pair —
/// exactly the sum of each plan field's output width. `RAW` reports the
/// untouched raw-record size.
pub fn sample_bytes(plan: &CapturePlan, process: Process) -> usize {
    if process == Process::Raw {
        return plan.sample_bytes;
    }
    plan.fields
        .iter()
        .map(|field| match field.category {
            FieldCategory::Timestamp => match process {
                Process::Scaled => 8,
                _ => 8,
            },
            FieldCategory::Unscaled32 => 4,
            FieldCategory::Scaled32 => match process {
                Process::Scaled => 8,
                _ => 4,
            },
            FieldCategory::Scaled64 => match process {
                Process::Scaled => 8,
                _ => 8,
            },
            FieldCategory::AdcMean => match process {
                Process::Scaled => 8,
                _ => 4,
            },
            FieldCategory::SampleCount => 4,
            FieldCategory::BitsGroup => 4,
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::FieldCategory;
    use crate::plan::PlanField;

    fn plan_with(fields: Vec<PlanField>, sample_bytes: usize) -> CapturePlan {
        CapturePlan { fields, include_timestamp: false, include_sample_count: false, bit_group_words: 0, sample_bytes }
    }

    #[test]
    fn scaled_conversion_matches_linear_formula() {
        let field = PlanField {
            block: "INENC".to_string(),
            instance: 0,
            field: "VAL".to_string(),
            capture: CaptureOption::Value,
            category: FieldCategory::Scaled32,
            offset: 0,
            scaling: Some((0.001, 2.0, "mm".to_string())),
            bit_slot: None,
        };
        let plan = plan_with(vec![field], 4);
        let raw = 1000i32.to_le_bytes();
        let mut state = ConvertState::default();
        let values = convert_values(&plan, Process::Scaled, &raw, &mut state);
        match values[0] {
            FieldValue::F64(v) => assert!((v - (1000.0 * 0.001 + 2.0)).abs() < 1e-9),
            other => panic!("expected F64, got {other:?}"),
        }
    }

    #[test]
    fn unscaled_adc_mean_matches_fixed_point_formula() {
        let count_field = PlanField {
            block: "PCAP".to_string(),
            instance: 0,
            field: "SAMPLES".to_string(),
            capture: CaptureOption::Value,
            category: FieldCategory::SampleCount,
            offset: 0,
            scaling: None,
            bit_slot: None,
        };
        let adc_field = PlanField {
            block: "PCAP".to_string(),
            instance: 0,
            field: "ADC".to_string(),
            capture: CaptureOption::Mean,
            category: FieldCategory::AdcMean,
            offset: 4,
            scaling: Some((1.0, 0.0, String::new())),
            bit_slot: None,
        };
        let plan = plan_with(vec![count_field, adc_field], 12);
        let mut raw = Vec::new();
        raw.extend_from_slice(&4u32.to_le_bytes());
        raw.extend_from_slice(&100i64.to_le_bytes());
        let mut state = ConvertState::default();
        let values = convert_values(&plan, Process::Unscaled, &raw, &mut state);
        match values[1] {
            FieldValue::I32(v) => assert_eq!(v, (100i64 * 256 / 4) as i32),
            other => panic!("expected I32, got {other:?}"),
        }
    }

    #[test]
    fn ts_offset_subtracts_first_sample_baseline() {
        let field = PlanField {
            block: "PCAP".to_string(),
            instance: 0,
            field: "TS".to_string(),
            capture: CaptureOption::Diff,
            category: FieldCategory::Timestamp,
            offset: 0,
            scaling: None,
            bit_slot: None,
        };
        let plan = plan_with(vec![field], 8);
        let mut state = ConvertState::default();
        let first = 1_000_000i64.to_le_bytes();
        let second = 1_000_125i64.to_le_bytes();
        let v1 = convert_values(&plan, Process::Unscaled, &first, &mut state);
        let v2 = convert_values(&plan, Process::Unscaled, &second, &mut state);
        assert!(matches!(v1[0], FieldValue::I64(0)));
        assert!(matches!(v2[0], FieldValue::I64(125)));
    }
}
