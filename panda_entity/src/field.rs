//! Field/class model. A `Class` is a tagged variant
//! per capability set; `Field` wraps one plus its per-instance change
//! index and optional description. Attribute dispatch (`.LABELS?`,
//! `.CAPTURE=`, table multi-line writes, ...) lives on `Field` so the
//! command server never matches on `Class` itself.

use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use panda_hw::HardwareAccess;
use panda_hw::RegAddr;
use panda_types::FieldType;
use panda_types::TableField;

use crate::change::ChangeGroup;
use crate::change::ChangeIndex;
use crate::error::EntityError;
use crate::error::Result;
use crate::mux::BusState;
use crate::mux::CaptureCapability;
use crate::mux::CaptureOption;
use crate::mux::MuxTable;
use crate::table::TableBinding;
use crate::table::TableBuffer;
use base::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtOutKind {
    Timestamp,
    Samples,
    Bits,
}

pub enum Class {
    Param { field_type: FieldType, regs: Vec<RegAddr>, cache: Vec<Mutex<u32>> },
    Read { field_type: FieldType, regs: Vec<RegAddr> },
    Write { field_type: FieldType, regs: Vec<RegAddr> },
    BitIn { regs: Vec<RegAddr>, cache: Vec<Mutex<u32>> },
    PosIn { regs: Vec<RegAddr>, cache: Vec<Mutex<u32>> },
    BitOut { bus_index: Vec<u32>, capture: Vec<Mutex<CaptureOption>> },
    PosOut {
        bus_index: Vec<u32>,
        capability: CaptureCapability,
        capture: Vec<Mutex<CaptureOption>>,
        /// Per-instance (scale, offset, units) applied when converting a
        /// captured raw count to an engineering-unit double.
        scaling: Vec<Mutex<(f64, f64, String)>>,
    },
    ExtOut { kind: ExtOutKind, capture: Vec<Mutex<CaptureOption>> },
    Table { binding: Vec<TableBinding>, buffers: Vec<Mutex<TableBuffer>>, fields: Vec<TableField> },
}

impl Class {
    pub fn keyword(&self) -> &'static str {
        match self {
            Class::Param { .. } => "param",
            Class::Read { .. } => "read",
            Class::Write { .. } => "write",
            Class::BitIn { .. } => "bit_in",
            Class::PosIn { .. } => "pos_in",
            Class::BitOut { .. } => "bit_out",
            Class::PosOut { .. } => "pos_out",
            Class::ExtOut { .. } => "ext_out",
            Class::Table { .. } => "table",
        }
    }

    pub fn change_group(&self) -> ChangeGroup {
        match self {
            Class::Param { .. } | Class::BitIn { .. } | Class::PosIn { .. } => ChangeGroup::Config,
            Class::Read { .. } => ChangeGroup::Read,
            Class::Write { .. } => ChangeGroup::Config,
            Class::BitOut { .. } => ChangeGroup::Bits,
            Class::PosOut { .. } | Class::ExtOut { .. } => ChangeGroup::Position,
            Class::Table { .. } => ChangeGroup::Table,
        }
    }

    pub fn count(&self) -> usize {
        match self {
            Class::Param { regs, .. } | Class::Read { regs, .. } | Class::Write { regs, .. } => regs.len(),
            Class::BitIn { regs, .. } | Class::PosIn { regs, .. } => regs.len(),
            Class::BitOut { bus_index, .. } => bus_index.len(),
            Class::PosOut { bus_index, .. } => bus_index.len(),
            Class::ExtOut { capture, .. } => capture.len(),
            Class::Table { buffers, .. } => buffers.len(),
        }
    }
}

pub struct Field {
    pub name: String,
    pub description: Option<String>,
    pub class: Class,
    value_change: Vec<AtomicU64>,
    attr_change: Mutex<HashMap<String, Vec<AtomicU64>>>,
}

impl Field {
    pub fn new(name: String, description: Option<String>, class: Class) -> Field {
        let n = class.count();
        Field {
            name,
            description,
            class,
            value_change: (0..n).map(|_| AtomicU64::new(0)).collect(),
            attr_change: Mutex::new(HashMap::new()),
        }
    }

    pub fn instance_count(&self) -> usize {
        self.class.count()
    }

    fn check_instance(&self, instance: usize) -> Result<()> {
        if instance >= self.instance_count() {
            return Err(EntityError::IndexOutOfRange(instance as u32, self.name.clone(), self.instance_count() as u32));
        }
        Ok(())
    }

    pub fn value_change_index(&self, instance: usize) -> u64 {
        self.value_change.get(instance).map(|a| a.load(Ordering::SeqCst)).unwrap_or(0)
    }

    pub fn attr_change_index(&self, attr: &str, instance: usize) -> u64 {
        self.attr_change
            .lock()
            .get(attr)
            .and_then(|v| v.get(instance))
            .map(|a| a.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Names of every attribute whose change index for `instance` exceeds
    /// `threshold` — the ATTR change group's view of this field, since
    /// attribute mutations (`CAPTURE=`, `SCALE=`, ...) stamp a separate
    /// per-attribute index rather than the field's own value-change index.
    pub fn changed_attrs(&self, instance: usize, threshold: u64) -> Vec<String> {
        self.attr_change
            .lock()
            .iter()
            .filter_map(|(attr, slots)| {
                let idx = slots.get(instance).map(|a| a.load(Ordering::SeqCst)).unwrap_or(0);
                if idx > threshold {
                    Some(attr.clone())
                } else {
                    None
                }
            })
            .collect()
    }

    pub(crate) fn bump_value(&self, instance: usize, idx: &ChangeIndex) {
        if let Some(slot) = self.value_change.get(instance) {
            slot.store(idx.next(), Ordering::SeqCst);
        }
    }

    fn bump_attr(&self, attr: &str, instance: usize, idx: &ChangeIndex) {
        let mut map = self.attr_change.lock();
        let slots = map
            .entry(attr.to_string())
            .or_insert_with(|| (0..self.instance_count()).map(|_| AtomicU64::new(0)).collect());
        if let Some(slot) = slots.get(instance) {
            slot.store(idx.next(), Ordering::SeqCst);
        }
    }

    /// `name[.attr]?` — formats the current value as the wire string.
    pub fn format(
        &self,
        instance: usize,
        attr: Option<&str>,
        hw: &dyn HardwareAccess,
        mux: &MuxTable,
        bus: &BusState,
    ) -> Result<String> {
        self.check_instance(instance)?;
        match (&self.class, attr) {
            (Class::Param { field_type, cache, .. }, None) => {
                Ok(field_type.format(*cache[instance].lock(), mux)?)
            }
            (Class::Read { field_type, regs }, None) => {
                let raw = hw.read_reg(regs[instance]).map_err(|e| EntityError::Invalid(e.to_string()))?;
                Ok(field_type.format(raw, mux)?)
            }
            (Class::BitIn { cache, .. }, None) => Ok(FieldType::BitMux.format(*cache[instance].lock(), mux)?),
            (Class::PosIn { cache, .. }, None) => Ok(FieldType::PosMux.format(*cache[instance].lock(), mux)?),
            (Class::BitOut { bus_index, .. }, None) => {
                Ok(if bus.bit(bus_index[instance] as usize) { "1".to_string() } else { "0".to_string() })
            }
            (Class::PosOut { bus_index, .. }, None) => Ok((bus.position(bus_index[instance] as usize) as i32).to_string()),
            (Class::BitOut { capture, .. }, Some("CAPTURE")) => Ok(capture[instance].lock().name().to_string()),
            (Class::PosOut { capture, .. }, Some("CAPTURE")) => Ok(capture[instance].lock().name().to_string()),
            (Class::PosOut { scaling, .. }, Some("SCALE")) => Ok(scaling[instance].lock().0.to_string()),
            (Class::PosOut { scaling, .. }, Some("OFFSET")) => Ok(scaling[instance].lock().1.to_string()),
            (Class::PosOut { scaling, .. }, Some("UNITS")) => Ok(scaling[instance].lock().2.clone()),
            (Class::ExtOut { capture, .. }, Some("CAPTURE")) => Ok(capture[instance].lock().name().to_string()),
            (Class::Table { buffers, .. }, Some("LENGTH")) => Ok(buffers[instance].lock().live().len().to_string()),
            (Class::Table { binding, .. }, Some("MAX_LENGTH")) => Ok(binding[instance].max_len().to_string()),
            (Class::Write { .. }, None) => Err(EntityError::NoSuchAttribute(self.name.clone(), "?".to_string())),
            _ => Err(EntityError::NoSuchAttribute(self.name.clone(), attr.unwrap_or("").to_string())),
        }
    }

    /// `name[.attr]=value` — parses and applies a write.
    pub fn put(
        &self,
        instance: usize,
        attr: Option<&str>,
        value: &str,
        hw: &dyn HardwareAccess,
        mux: &MuxTable,
        change_idx: &ChangeIndex,
    ) -> Result<()> {
        self.check_instance(instance)?;
        match (&self.class, attr) {
            (Class::Param { field_type, regs, cache }, None) => {
                let raw = field_type.parse(value, mux)?;
                hw.write_reg(regs[instance], raw).map_err(|e| EntityError::Invalid(e.to_string()))?;
                *cache[instance].lock() = raw;
                self.bump_value(instance, change_idx);
                Ok(())
            }
            (Class::Write { field_type, regs }, None) => {
                let raw = field_type.parse(value, mux)?;
                hw.write_reg(regs[instance], raw).map_err(|e| EntityError::Invalid(e.to_string()))?;
                self.bump_value(instance, change_idx);
                Ok(())
            }
            (Class::BitIn { regs, cache }, None) => {
                let raw = FieldType::BitMux.parse(value, mux)?;
                hw.write_reg(regs[instance], raw).map_err(|e| EntityError::Invalid(e.to_string()))?;
                *cache[instance].lock() = raw;
                self.bump_value(instance, change_idx);
                Ok(())
            }
            (Class::PosIn { regs, cache }, None) => {
                let raw = FieldType::PosMux.parse(value, mux)?;
                hw.write_reg(regs[instance], raw).map_err(|e| EntityError::Invalid(e.to_string()))?;
                *cache[instance].lock() = raw;
                self.bump_value(instance, change_idx);
                Ok(())
            }
            (Class::BitOut { capture, .. }, Some("CAPTURE")) => {
                let option = CaptureOption::from_name(value)
                    .filter(|o| CaptureCapability::Bit.allowed_options().contains(o))
                    .ok_or_else(|| EntityError::Invalid(format!("{value:?} is not a valid CAPTURE option")))?;
                *capture[instance].lock() = option;
                self.bump_attr("CAPTURE", instance, change_idx);
                Ok(())
            }
            (Class::PosOut { capture, capability, .. }, Some("CAPTURE")) => {
                let option = CaptureOption::from_name(value)
                    .filter(|o| capability.allowed_options().contains(o))
                    .ok_or_else(|| EntityError::Invalid(format!("{value:?} is not a valid CAPTURE option")))?;
                *capture[instance].lock() = option;
                self.bump_attr("CAPTURE", instance, change_idx);
                Ok(())
            }
            (Class::PosOut { scaling, .. }, Some("SCALE")) => {
                let scale: f64 = value.parse().map_err(|_| EntityError::Invalid(format!("{value:?} is not numeric")))?;
                scaling[instance].lock().0 = scale;
                self.bump_attr("SCALE", instance, change_idx);
                Ok(())
            }
            (Class::PosOut { scaling, .. }, Some("OFFSET")) => {
                let offset: f64 = value.parse().map_err(|_| EntityError::Invalid(format!("{value:?} is not numeric")))?;
                scaling[instance].lock().1 = offset;
                self.bump_attr("OFFSET", instance, change_idx);
                Ok(())
            }
            (Class::PosOut { scaling, .. }, Some("UNITS")) => {
                scaling[instance].lock().2 = value.to_string();
                self.bump_attr("UNITS", instance, change_idx);
                Ok(())
            }
            (Class::ExtOut { capture, kind }, Some("CAPTURE")) => {
                let capability = match kind {
                    ExtOutKind::Timestamp => CaptureCapability::ExtTimestamp,
                    ExtOutKind::Samples => CaptureCapability::ExtSamples,
                    ExtOutKind::Bits => CaptureCapability::ExtBits,
                };
                let option = CaptureOption::from_name(value)
                    .filter(|o| capability.allowed_options().contains(o))
                    .ok_or_else(|| EntityError::Invalid(format!("{value:?} is not a valid CAPTURE option")))?;
                *capture[instance].lock() = option;
                self.bump_attr("CAPTURE", instance, change_idx);
                Ok(())
            }
            _ => Err(EntityError::NoSuchAttribute(self.name.clone(), attr.unwrap_or("=").to_string())),
        }
    }

    /// Snapshot of a `pos_out` instance's (scale, offset, units), used by
    /// the capture plan to convert raw counts to engineering units.
    pub fn pos_out_scaling(&self, instance: usize) -> Option<(f64, f64, String)> {
        match &self.class {
            Class::PosOut { scaling, .. } => scaling.get(instance).map(|s| s.lock().clone()),
            _ => None,
        }
    }

    pub fn get_enumeration(&self, attr: Option<&str>) -> Option<Vec<String>> {
        match (&self.class, attr) {
            (Class::Param { field_type, .. }, None) => field_type.enumeration(),
            (Class::BitOut { .. }, Some("CAPTURE")) => {
                Some(CaptureCapability::Bit.allowed_options().iter().map(|o| o.name().to_string()).collect())
            }
            (Class::PosOut { capability, .. }, Some("CAPTURE")) => {
                Some(capability.allowed_options().iter().map(|o| o.name().to_string()).collect())
            }
            _ => None,
        }
    }

    /// Begins a multi-line `TABLE<`/`TABLE<<` write; returns an error if
    /// a write is already open: table writes don't overlap.
    pub fn table_begin_write(&self, instance: usize) -> Result<()> {
        self.check_instance(instance)?;
        match &self.class {
            Class::Table { buffers, .. } => buffers[instance]
                .lock()
                .begin_write()
                .map_err(|_| EntityError::TableBusy(self.name.clone())),
            _ => Err(EntityError::NoSuchAttribute(self.name.clone(), "TABLE".to_string())),
        }
    }

    pub fn table_abort_write(&self, instance: usize) {
        if let Class::Table { buffers, .. } = &self.class {
            buffers[instance].lock().abort_write();
        }
    }

    /// Commits an accumulated table write: pushes to hardware (short
    /// burst or long DMA commit) then swaps in the new live contents.
    pub fn table_commit(
        &self,
        instance: usize,
        words: Vec<u32>,
        hw: &dyn HardwareAccess,
        change_idx: &ChangeIndex,
    ) -> Result<()> {
        self.check_instance(instance)?;
        let (binding, buffers) = match &self.class {
            Class::Table { binding, buffers, .. } => (&binding[instance], buffers),
            _ => return Err(EntityError::NoSuchAttribute(self.name.clone(), "TABLE".to_string())),
        };
        if words.len() > binding.max_len() {
            return Err(EntityError::Invalid(format!(
                "table write of {} words exceeds max length {}",
                words.len(),
                binding.max_len()
            )));
        }
        match binding {
            TableBinding::Short { reset, fill, length, max_len } => {
                hw.write_short_table(*reset, *fill, *length, &words, *max_len)
                    .map_err(|e| EntityError::Invalid(e.to_string()))?;
            }
            TableBinding::Long { order, base, length, .. } => {
                let mut writer = hw.open_long_table(*order, *base, *length).map_err(|e| EntityError::Invalid(e.to_string()))?;
                writer.write_fragment(&words, false).map_err(|e| EntityError::Invalid(e.to_string()))?;
            }
        }
        buffers[instance].lock().commit(words);
        self.bump_value(instance, change_idx);
        Ok(())
    }

    pub fn table_rows(&self, instance: usize) -> Result<Vec<String>> {
        self.check_instance(instance)?;
        match &self.class {
            Class::Table { buffers, .. } => Ok(buffers[instance].lock().live().iter().map(|w| w.to_string()).collect()),
            _ => Err(EntityError::NoSuchAttribute(self.name.clone(), "TABLE".to_string())),
        }
    }

    pub fn table_field_descriptions(&self) -> Option<Vec<String>> {
        match &self.class {
            Class::Table { fields, .. } => Some(fields.iter().map(|f| f.describe()).collect()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use panda_hw::NullHardware;

    fn mux() -> MuxTable {
        MuxTable::new()
    }

    #[test]
    fn param_write_then_read_round_trips() {
        let hw = NullHardware::new();
        let idx = ChangeIndex::new();
        let m = mux();
        let bus = BusState::new();
        let field = Field::new(
            "TERM".to_string(),
            None,
            Class::Param {
                field_type: FieldType::Uint { max: Some(255) },
                regs: vec![RegAddr::new(1, 0, 2)],
                cache: vec![Mutex::new(0)],
            },
        );
        field.put(0, None, "42", &hw, &m, &idx).unwrap();
        assert_eq!(field.format(0, None, &hw, &m, &bus).unwrap(), "42");
        assert!(field.value_change_index(0) > 0);
    }

    #[test]
    fn capture_rejects_option_outside_capability() {
        let hw = NullHardware::new();
        let idx = ChangeIndex::new();
        let m = mux();
        let bus = BusState::new();
        let field = Field::new(
            "OUT".to_string(),
            None,
            Class::PosOut {
                bus_index: vec![0],
                capability: CaptureCapability::PosPlain,
                capture: vec![Mutex::new(CaptureOption::No)],
                scaling: vec![Mutex::new((1.0, 0.0, String::new()))],
            },
        );
        assert!(field.put(0, Some("CAPTURE"), "Mean", &hw, &m, &idx).is_err());
        field.put(0, Some("CAPTURE"), "Value", &hw, &m, &idx).unwrap();
        assert_eq!(field.format(0, Some("CAPTURE"), &hw, &m, &bus).unwrap(), "Value");
    }

    #[test]
    fn table_write_rejects_overlength() {
        let hw = NullHardware::new();
        let idx = ChangeIndex::new();
        let field = Field::new(
            "TABLE".to_string(),
            None,
            Class::Table {
                binding: vec![TableBinding::Short {
                    reset: RegAddr::new(0, 0, 0),
                    fill: RegAddr::new(0, 0, 1),
                    length: RegAddr::new(0, 0, 2),
                    max_len: 2,
                }],
                buffers: vec![Mutex::new(crate::table::TableBuffer::default())],
                fields: vec![],
            },
        );
        field.table_begin_write(0).unwrap();
        let err = field.table_commit(0, vec![1, 2, 3], &hw, &idx);
        assert!(err.is_err());
    }
}
