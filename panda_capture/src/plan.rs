//! Capture plan construction: snapshots the registered-outputs list
//! at arm time and derives the fixed per-sample
//! byte layout every captured record follows for the lifetime of one
//! capture session.

use panda_entity::CaptureCapability;
use panda_entity::CaptureOption;
use panda_entity::EntityRegistry;
use panda_entity::RegisteredOutput;

use crate::error::CaptureError;
use crate::error::Result;

/// Which slot of the fixed raw-sample layout a captured output lands in.
/// Order here is the order the groups appear in the raw record:
/// `[timestamp][unscaled32][scaled32][scaled64][adc_sum]` followed by
/// the bit-group tail appended after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldCategory {
    Unscaled32,
    Scaled32,
    Scaled64,
    AdcMean,
    Timestamp,
    SampleCount,
    BitsGroup,
}

/// One captured field's position and metadata within the plan.
#[derive(Debug, Clone)]
pub struct PlanField {
    pub block: String,
    pub instance: u32,
    pub field: String,
    pub capture: CaptureOption,
    pub category: FieldCategory,
    /// Byte offset of this field's value within the raw sample record.
    pub offset: usize,
    /// `(scale, offset, units)`; `None` for unscaled/bit/hidden entries.
    pub scaling: Option<(f64, f64, String)>,
    /// Bit position (0..31) within the 32-bit word at `offset`, for
    /// [`FieldCategory::BitsGroup`] entries only. `None` otherwise.
    pub bit_slot: Option<u32>,
}

impl PlanField {
    pub fn capture_label(&self) -> String {
        format!("{}{}.{}", self.block, self.instance + 1, self.field)
    }
}

/// The full arm-time plan: ordered fields plus the derived raw-sample
/// byte layout every DMA record conforms to.
#[derive(Debug, Clone, Default)]
pub struct CapturePlan {
    pub fields: Vec<PlanField>,
    /// Whether the hidden 8-byte timestamp prefix is present in every
    /// raw sample (true whenever any `ext_out timestamp` field is armed).
    pub include_timestamp: bool,
    /// Whether the hidden sample-count word is present (true whenever any
    /// ADC-mean-style output, or an `ext_out samples` field, is armed).
    pub include_sample_count: bool,
    /// Number of 32-bit words the packed bit-out/ext_out-bits tail needs.
    pub bit_group_words: usize,
    pub sample_bytes: usize,
}

impl CapturePlan {
    /// Builds the plan from whatever is currently registered for capture.
    /// Returns [`CaptureError::NothingRegistered`] if nothing is armed.
    pub fn build(registry: &EntityRegistry) -> Result<CapturePlan> {
        let outputs = registry.registered_outputs();
        if outputs.is_empty() {
            return Err(CaptureError::NothingRegistered);
        }

        let mut unscaled32 = Vec::new();
        let mut scaled32 = Vec::new();
        let mut scaled64 = Vec::new();
        let mut adc_mean = Vec::new();
        let mut timestamps = Vec::new();
        let mut sample_counts = Vec::new();
        let mut bit_count = 0usize;
        let mut bit_fields = Vec::new();

        for out in outputs {
            match out.capability {
                CaptureCapability::Bit | CaptureCapability::ExtBits => {
                    bit_count += 1;
                    bit_fields.push(out);
                }
                CaptureCapability::PosPlain => unscaled32.push(out),
                CaptureCapability::PosAdc => match out.option {
                    CaptureOption::Value | CaptureOption::Diff | CaptureOption::Min | CaptureOption::Max => {
                        scaled32.push(out)
                    }
                    CaptureOption::Sum => scaled64.push(out),
                    CaptureOption::Mean | CaptureOption::MinMax | CaptureOption::MinMaxMean => adc_mean.push(out),
                    CaptureOption::No => {}
                },
                CaptureCapability::PosEncoder => scaled32.push(out),
                CaptureCapability::ExtTimestamp => timestamps.push(out),
                CaptureCapability::ExtSamples => sample_counts.push(out),
            }
        }

        let include_timestamp = !timestamps.is_empty();
        let include_sample_count = !sample_counts.is_empty() || !adc_mean.is_empty();
        let bit_group_words = bit_count.div_ceil(32).max(usize::from(!bit_fields.is_empty()));

        let mut fields = Vec::new();
        let mut offset = 0usize;

        if include_timestamp {
            for out in &timestamps {
                fields.push(PlanField {
                    block: out.block.clone(),
                    instance: out.instance,
                    field: out.field.clone(),
                    capture: out.option,
                    category: FieldCategory::Timestamp,
                    offset,
                    scaling: None,
                    bit_slot: None,
                });
            }
            offset += 8;
        }

        for out in &unscaled32 {
            fields.push(plan_field(out, FieldCategory::Unscaled32, offset));
            offset += 4;
        }
        for out in &scaled32 {
            fields.push(plan_field(out, FieldCategory::Scaled32, offset));
            offset += 4;
        }
        for out in &scaled64 {
            fields.push(plan_field(out, FieldCategory::Scaled64, offset));
            offset += 8;
        }
        for out in &adc_mean {
            fields.push(plan_field(out, FieldCategory::AdcMean, offset));
            offset += 8;
        }
        if include_sample_count {
            for out in &sample_counts {
                fields.push(PlanField {
                    block: out.block.clone(),
                    instance: out.instance,
                    field: out.field.clone(),
                    capture: out.option,
                    category: FieldCategory::SampleCount,
                    offset,
                    scaling: None,
                    bit_slot: None,
                });
            }
            offset += 4;
        }
        let bits_base_offset = offset;
        for (slot, out) in bit_fields.iter().enumerate() {
            let word = slot / 32;
            let bit = (slot % 32) as u32;
            fields.push(PlanField {
                block: out.block.clone(),
                instance: out.instance,
                field: out.field.clone(),
                capture: out.option,
                category: FieldCategory::BitsGroup,
                offset: bits_base_offset + word * 4,
                scaling: None,
                bit_slot: Some(bit),
            });
        }
        offset += bit_group_words * 4;

        Ok(CapturePlan {
            fields,
            include_timestamp,
            include_sample_count,
            bit_group_words,
            sample_bytes: offset,
        })
    }
}

fn plan_field(out: &RegisteredOutput, category: FieldCategory, offset: usize) -> PlanField {
    PlanField {
        block: out.block.clone(),
        instance: out.instance,
        field: out.field.clone(),
        capture: out.option,
        category,
        offset,
        scaling: out.scaling.clone(),
        bit_slot: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use panda_parser::parse_config;
    use panda_parser::parse_description;
    use panda_parser::parse_registers;

    fn registry_with_one_capture() -> EntityRegistry {
        let config = parse_config("config", "PCAP 1\n    OUT pos_out 0 adc\n").unwrap();
        let registers = parse_registers("registers", "PCAP 0\n    OUT 0\n").unwrap();
        let description = Default::default();
        let registry = EntityRegistry::build(&config, &registers, &description).unwrap();
        let (_, field, instance, attr) = registry.lookup("PCAP.OUT.CAPTURE").unwrap();
        field.put(instance, attr.as_deref(), "Value", &panda_hw::NullHardware::new(), &registry.mux, &registry.change_index).unwrap();
        registry
    }

    #[test]
    fn rejects_empty_plan() {
        let config = parse_config("config", "PCAP 1\n    ARM write bit\n").unwrap();
        let registers = parse_registers("registers", "PCAP 0\n    ARM 0\n").unwrap();
        let registry = EntityRegistry::build(&config, &registers, &Default::default()).unwrap();
        assert!(matches!(CapturePlan::build(&registry), Err(CaptureError::NothingRegistered)));
    }

    #[test]
    fn single_adc_value_lands_in_scaled32_group() {
        let registry = registry_with_one_capture();
        let plan = CapturePlan::build(&registry).unwrap();
        assert_eq!(plan.fields.len(), 1);
        assert_eq!(plan.fields[0].category, FieldCategory::Scaled32);
        assert_eq!(plan.sample_bytes, 4);
        assert!(!plan.include_timestamp);
    }
}
