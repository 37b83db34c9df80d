//! Combines the three parsed startup databases into the live entity
//! registry: resolves every field's register binding, assigns bit/position
//! bus slots, and exposes the `block[index].field[.attr]` lookup path
//! used by the command server.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use base::Mutex;
use base::ShutdownFlag;
use panda_hw::HardwareAccess;
use panda_hw::RegAddr;
use panda_parser::ast::ClassSpec as AstClass;
use panda_parser::ast::ConfigDb;
use panda_parser::ast::DescriptionDb;
use panda_parser::ast::ExtOutKind as AstExtOutKind;
use panda_parser::ast::PosOutKind;
use panda_parser::ast::RegisterBinding;
use panda_parser::ast::RegistersDb;

use crate::block::Block;
use crate::change::ChangeGroup;
use crate::change::ChangeIndex;
use crate::error::EntityError;
use crate::error::Result;
use crate::field::Class;
use crate::field::ExtOutKind;
use crate::field::Field;
use crate::mux::BusState;
use crate::mux::CaptureCapability;
use crate::mux::CaptureOption;
use crate::mux::MuxTable;
use crate::mux::BIT_BUS_LEN;
use crate::mux::POS_BUS_LEN;

/// One enabled capture source, snapshotted at arm time by `panda_capture`.
#[derive(Debug, Clone)]
pub struct RegisteredOutput {
    pub block: String,
    /// 0-based instance.
    pub instance: u32,
    pub field: String,
    pub bus_index: u32,
    pub capability: CaptureCapability,
    pub option: CaptureOption,
    /// `(scale, offset, units)`, present only for `pos_out` outputs.
    pub scaling: Option<(f64, f64, String)>,
}

pub struct EntityRegistry {
    block_order: Vec<String>,
    blocks: HashMap<String, Block>,
    pub change_index: ChangeIndex,
    pub bus: BusState,
    pub mux: MuxTable,
    metadata: Mutex<HashMap<String, String>>,
    metadata_multi: Mutex<HashMap<String, Vec<String>>>,
}

impl EntityRegistry {
    pub fn build(config: &ConfigDb, registers: &RegistersDb, description: &DescriptionDb) -> Result<EntityRegistry> {
        let reg_blocks: HashMap<&str, &panda_parser::ast::RegisterBlock> =
            registers.blocks.iter().map(|b| (b.name.as_str(), b)).collect();
        let desc_blocks: HashMap<&str, &panda_parser::ast::DescriptionBlock> =
            description.blocks.iter().map(|b| (b.name.as_str(), b)).collect();

        let mut block_order = Vec::new();
        let mut blocks = HashMap::new();
        let mut mux = MuxTable::new();
        let mut used_bit_slots: HashSet<u32> = HashSet::new();
        let mut used_pos_slots: HashSet<u32> = HashSet::new();

        for cfg_block in &config.blocks {
            let reg_block = reg_blocks
                .get(cfg_block.name.as_str())
                .ok_or_else(|| EntityError::Invalid(format!("no registers entry for block {:?}", cfg_block.name)))?;
            let reg_fields: HashMap<&str, &panda_parser::ast::RegisterField> =
                reg_block.fields.iter().map(|f| (f.name.as_str(), f)).collect();
            let desc_block = desc_blocks.get(cfg_block.name.as_str());
            let desc_fields: HashMap<&str, &str> = desc_block
                .map(|b| b.fields.iter().map(|f| (f.name.as_str(), f.text.as_str())).collect())
                .unwrap_or_default();

            let block_type = reg_block.base as u8;
            let n = cfg_block.count;
            let mut block = Block::new(cfg_block.name.clone(), n, desc_block.map(|b| b.text.clone()));

            for cfg_field in &cfg_block.fields {
                let binding = reg_fields.get(cfg_field.name.as_str()).map(|f| &f.binding);
                let description = desc_fields.get(cfg_field.name.as_str()).map(|s| s.to_string());

                let class = build_class(
                    block_type,
                    n,
                    &cfg_block.name,
                    &cfg_field.name,
                    &cfg_field.class,
                    binding,
                    &mut mux,
                    &mut used_bit_slots,
                    &mut used_pos_slots,
                )?;
                block.insert(Field::new(cfg_field.name.clone(), description, class));
            }

            block_order.push(cfg_block.name.clone());
            blocks.insert(cfg_block.name.clone(), block);
        }

        Ok(EntityRegistry {
            block_order,
            blocks,
            change_index: ChangeIndex::new(),
            bus: BusState::new(),
            mux,
            metadata: Mutex::new(HashMap::new()),
            metadata_multi: Mutex::new(HashMap::new()),
        })
    }

    pub fn block(&self, name: &str) -> Option<&Block> {
        self.blocks.get(name)
    }

    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.block_order.iter().map(move |name| &self.blocks[name])
    }

    /// Parses `block[index].field[.attr]` into its resolved parts.
    pub fn lookup(&self, path: &str) -> Result<(&Block, &Field, usize, Option<String>)> {
        let mut parts = path.split('.');
        let head = parts.next().ok_or_else(|| EntityError::Invalid("empty entity path".to_string()))?;
        let field_name = parts.next().ok_or_else(|| EntityError::Invalid(format!("{path:?} has no field component")))?;
        let attr: Vec<&str> = parts.collect();
        let attr = if attr.is_empty() { None } else { Some(attr.join(".")) };

        let split_at = head.find(|c: char| c.is_ascii_digit()).unwrap_or(head.len());
        let (name, digits) = head.split_at(split_at);
        let block = self.blocks.get(name).ok_or_else(|| EntityError::NoSuchBlock(name.to_string()))?;

        let instance = if digits.is_empty() {
            if block.count != 1 {
                return Err(EntityError::Invalid(format!("{name} requires an instance index")));
            }
            0
        } else {
            let one_based: u32 = digits.parse().map_err(|_| EntityError::Invalid(format!("bad index {digits:?}")))?;
            if one_based == 0 || one_based > block.count {
                return Err(EntityError::IndexOutOfRange(one_based, name.to_string(), block.count));
            }
            (one_based - 1) as usize
        };

        let field = block
            .field(field_name)
            .ok_or_else(|| EntityError::NoSuchField(name.to_string(), field_name.to_string()))?;

        Ok((block, field, instance, attr))
    }

    pub fn set_metadata(&self, key: &str, value: String) {
        self.metadata.lock().insert(key.to_string(), value);
        self.change_index.next();
    }

    pub fn get_metadata(&self, key: &str) -> Option<String> {
        self.metadata.lock().get(key).cloned()
    }

    pub fn set_metadata_multi(&self, key: &str, lines: Vec<String>) {
        self.metadata_multi.lock().insert(key.to_string(), lines);
        self.change_index.next();
    }

    pub fn get_metadata_multi(&self, key: &str) -> Option<Vec<String>> {
        self.metadata_multi.lock().get(key).cloned()
    }

    /// Snapshot of every field/instance whose `CAPTURE` attribute is
    /// currently enabled, in stable (block, instance, field) order. Used
    /// by `panda_capture` to build the capture plan at arm time.
    pub fn registered_outputs(&self) -> Vec<RegisteredOutput> {
        let mut out = Vec::new();
        for block in self.blocks() {
            for field in block.fields() {
                match &field.class {
                    Class::BitOut { bus_index, capture } => {
                        for (instance, slot) in bus_index.iter().enumerate() {
                            let option = *capture[instance].lock();
                            if option != CaptureOption::No {
                                out.push(RegisteredOutput {
                                    block: block.name.clone(),
                                    instance: instance as u32,
                                    field: field.name.clone(),
                                    bus_index: *slot,
                                    capability: CaptureCapability::Bit,
                                    option,
                                    scaling: None,
                                });
                            }
                        }
                    }
                    Class::PosOut { bus_index, capability, capture, .. } => {
                        for (instance, slot) in bus_index.iter().enumerate() {
                            let option = *capture[instance].lock();
                            if option != CaptureOption::No {
                                out.push(RegisteredOutput {
                                    block: block.name.clone(),
                                    instance: instance as u32,
                                    field: field.name.clone(),
                                    bus_index: *slot,
                                    capability: *capability,
                                    option,
                                    scaling: field.pos_out_scaling(instance),
                                });
                            }
                        }
                    }
                    Class::ExtOut { kind, capture } => {
                        for (instance, slot) in capture.iter().enumerate() {
                            let option = *slot.lock();
                            if option != CaptureOption::No {
                                let capability = match kind {
                                    ExtOutKind::Timestamp => CaptureCapability::ExtTimestamp,
                                    ExtOutKind::Samples => CaptureCapability::ExtSamples,
                                    ExtOutKind::Bits => CaptureCapability::ExtBits,
                                };
                                out.push(RegisteredOutput {
                                    block: block.name.clone(),
                                    instance: instance as u32,
                                    field: field.name.clone(),
                                    bus_index: 0,
                                    capability,
                                    option,
                                    scaling: None,
                                });
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
        out
    }

    pub fn reset_captures(&self) {
        for block in self.blocks() {
            for field in block.fields() {
                match &field.class {
                    Class::BitOut { capture, .. } | Class::PosOut { capture, .. } | Class::ExtOut { capture, .. } => {
                        for slot in capture {
                            *slot.lock() = CaptureOption::No;
                        }
                    }
                    _ => {}
                }
            }
        }
        self.change_index.next();
    }

    /// Performs one atomic burst read of the bit and position buses (base
    /// spec §4.4) and bumps the change index of every `bit_out`/`pos_out`
    /// instance whose bus slot came back changed.
    pub fn refresh_bus(&self, hw: &dyn HardwareAccess) -> Result<()> {
        let (bit_values, bit_changed) = hw.read_bits().map_err(|e| EntityError::Invalid(e.to_string()))?;
        self.bus.refresh_bits(bit_values, bit_changed);
        let (pos_values, pos_changed) = hw.read_positions().map_err(|e| EntityError::Invalid(e.to_string()))?;
        self.bus.refresh_positions(pos_values, pos_changed);

        for block in self.blocks() {
            for field in block.fields() {
                match &field.class {
                    Class::BitOut { bus_index, .. } => {
                        for (instance, slot) in bus_index.iter().enumerate() {
                            if self.bus.take_bit_changed(*slot as usize) {
                                field.bump_value(instance, &self.change_index);
                            }
                        }
                    }
                    Class::PosOut { bus_index, .. } => {
                        for (instance, slot) in bus_index.iter().enumerate() {
                            if self.bus.take_position_changed(*slot as usize) {
                                field.bump_value(instance, &self.change_index);
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    /// Every field's current change group + per-instance change index,
    /// for `*CHANGES` reporting. Attribute mutations (`CAPTURE=`, `SCALE=`,
    /// ...) stamp a separate per-attribute change index, so the ATTR group
    /// is reported from that index rather than a field class mapping to
    /// `ChangeGroup::Attr` — no class's value changes belong to ATTR, only
    /// its attributes' do.
    pub fn changed_since(&self, group: ChangeGroup, threshold: u64) -> Vec<(String, usize)> {
        let mut out = Vec::new();
        let want_values = group == ChangeGroup::All;
        let want_attrs = group == ChangeGroup::Attr || group == ChangeGroup::All;
        for block in self.blocks() {
            for field in block.fields() {
                if want_values || field.class.change_group() == group {
                    for instance in 0..field.instance_count() {
                        if field.value_change_index(instance) > threshold {
                            out.push((format!("{}{}.{}", block.name, instance + 1, field.name), instance));
                        }
                    }
                }
                if want_attrs {
                    for instance in 0..field.instance_count() {
                        for attr in field.changed_attrs(instance, threshold) {
                            out.push((format!("{}{}.{}.{attr}", block.name, instance + 1, field.name), instance));
                        }
                    }
                }
            }
        }
        out
    }
}

/// Runs for the process lifetime: refreshes the bit/position buses every
/// `interval` until told to shut down. Hardware errors are logged and
/// skipped rather than aborting the loop, since a single failed burst
/// read should not take the server down.
pub fn run_bus_refresh_thread(registry: Arc<EntityRegistry>, hw: Arc<dyn HardwareAccess>, interval: Duration, shutdown: ShutdownFlag) {
    loop {
        if shutdown.wait_timeout(interval) {
            break;
        }
        if let Err(e) = registry.refresh_bus(hw.as_ref()) {
            log::error!("bus refresh failed: {e}");
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn build_class(
    block_type: u8,
    n: u32,
    block_name: &str,
    field_name: &str,
    spec: &AstClass,
    binding: Option<&RegisterBinding>,
    mux: &mut MuxTable,
    used_bit_slots: &mut HashSet<u32>,
    used_pos_slots: &mut HashSet<u32>,
) -> Result<Class> {
    let single_offset = || match binding {
        Some(RegisterBinding::Single(offset)) => Ok(*offset),
        _ => Err(EntityError::UnassignedRegister(format!("{block_name}.{field_name}"))),
    };
    let regs_for = |offset: u32| -> Vec<RegAddr> {
        (0..n).map(|i| RegAddr::new(block_type, i as u8, offset as u8)).collect()
    };

    Ok(match spec {
        AstClass::Param(ft) => {
            let regs = regs_for(single_offset()?);
            let cache = (0..n).map(|_| Mutex::new(0)).collect();
            Class::Param { field_type: ft.clone(), regs, cache }
        }
        AstClass::Read(ft) => Class::Read { field_type: ft.clone(), regs: regs_for(single_offset()?) },
        AstClass::Write(ft) => Class::Write { field_type: ft.clone(), regs: regs_for(single_offset()?) },
        AstClass::BitIn => {
            let regs = regs_for(single_offset()?);
            let cache = (0..n).map(|_| Mutex::new(0)).collect();
            Class::BitIn { regs, cache }
        }
        AstClass::PosIn => {
            let regs = regs_for(single_offset()?);
            let cache = (0..n).map(|_| Mutex::new(0)).collect();
            Class::PosIn { regs, cache }
        }
        AstClass::BitOut(base_index) => {
            let mut bus_index = Vec::with_capacity(n as usize);
            for i in 0..n {
                let slot = base_index + i;
                if slot as usize >= BIT_BUS_LEN {
                    return Err(EntityError::Invalid(format!("{block_name}{}.{field_name} bit index {slot} out of range", i + 1)));
                }
                if !used_bit_slots.insert(slot) {
                    return Err(EntityError::CaptureBusOverlap(
                        format!("{block_name}{}.{field_name}", i + 1),
                        "<earlier bit_out>".to_string(),
                        format!("bit {slot}"),
                    ));
                }
                mux.register_bit(slot, format!("{block_name}{}.{field_name}", i + 1));
                bus_index.push(slot);
            }
            let capture = (0..n).map(|_| Mutex::new(CaptureOption::No)).collect();
            Class::BitOut { bus_index, capture }
        }
        AstClass::PosOut(base_index, kind) => {
            let mut bus_index = Vec::with_capacity(n as usize);
            for i in 0..n {
                let slot = base_index + i;
                if slot as usize >= POS_BUS_LEN {
                    return Err(EntityError::Invalid(format!("{block_name}{}.{field_name} pos index {slot} out of range", i + 1)));
                }
                if !used_pos_slots.insert(slot) {
                    return Err(EntityError::CaptureBusOverlap(
                        format!("{block_name}{}.{field_name}", i + 1),
                        "<earlier pos_out>".to_string(),
                        format!("position {slot}"),
                    ));
                }
                mux.register_position(slot, format!("{block_name}{}.{field_name}", i + 1));
                bus_index.push(slot);
            }
            let capability = match kind {
                PosOutKind::Plain => CaptureCapability::PosPlain,
                PosOutKind::Adc => CaptureCapability::PosAdc,
                PosOutKind::Encoder => CaptureCapability::PosEncoder,
            };
            let capture = (0..n).map(|_| Mutex::new(CaptureOption::No)).collect();
            let scaling = (0..n).map(|_| Mutex::new((1.0, 0.0, String::new()))).collect();
            Class::PosOut { bus_index, capability, capture, scaling }
        }
        AstClass::ExtOut(kind) => {
            let kind = match kind {
                AstExtOutKind::Timestamp => ExtOutKind::Timestamp,
                AstExtOutKind::Samples => ExtOutKind::Samples,
                AstExtOutKind::Bits => ExtOutKind::Bits,
            };
            let capture = (0..n).map(|_| Mutex::new(CaptureOption::No)).collect();
            Class::ExtOut { kind, capture }
        }
        AstClass::Table(spec) => {
            let mut binding_vec = Vec::with_capacity(n as usize);
            for i in 0..n {
                let b = match binding {
                    Some(RegisterBinding::ShortTable { reset, fill, length }) => crate::table::TableBinding::Short {
                        reset: RegAddr::new(block_type, i as u8, *reset as u8),
                        fill: RegAddr::new(block_type, i as u8, *fill as u8),
                        length: RegAddr::new(block_type, i as u8, *length as u8),
                        max_len: spec.max_length as usize,
                    },
                    Some(RegisterBinding::LongTable { order, base, length }) => crate::table::TableBinding::Long {
                        order: *order,
                        base: RegAddr::new(block_type, i as u8, *base as u8),
                        length: RegAddr::new(block_type, i as u8, *length as u8),
                        max_len: spec.max_length as usize,
                    },
                    Some(RegisterBinding::Single(_)) | None => {
                        return Err(EntityError::UnassignedRegister(format!("{block_name}.{field_name}")))
                    }
                };
                binding_vec.push(b);
            }
            let buffers = (0..n).map(|_| Mutex::new(crate::table::TableBuffer::default())).collect();
            Class::Table { binding: binding_vec, buffers, fields: spec.fields.clone() }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use panda_parser::parse_config;
    use panda_parser::parse_description;
    use panda_parser::parse_registers;

    fn sample() -> (ConfigDb, RegistersDb, DescriptionDb) {
        let config = parse_config(
            "config",
            "TTLIN 2\n    TERM param enum\n        0 50-Ohm\n        1 High-Z\nPCAP 1\n    ARM write bit\n    ACTIVE bit_out 0\n",
        )
        .unwrap();
        let registers = parse_registers(
            "registers",
            "TTLIN 0\n    TERM 2\nPCAP 1\n    ARM 0\n    ACTIVE 1\n",
        )
        .unwrap();
        let description = parse_description("description", "TTLIN TTL input\n    TERM Termination\n").unwrap();
        (config, registers, description)
    }

    #[test]
    fn builds_registry_and_resolves_lookup_path() {
        let (config, registers, description) = sample();
        let registry = EntityRegistry::build(&config, &registers, &description).unwrap();
        let (block, field, instance, attr) = registry.lookup("TTLIN1.TERM").unwrap();
        assert_eq!(block.name, "TTLIN");
        assert_eq!(field.name, "TERM");
        assert_eq!(instance, 0);
        assert_eq!(attr, None);
    }

    #[test]
    fn single_instance_block_allows_bare_name() {
        let (config, registers, description) = sample();
        let registry = EntityRegistry::build(&config, &registers, &description).unwrap();
        let (block, field, instance, _attr) = registry.lookup("PCAP.ARM").unwrap();
        assert_eq!(block.name, "PCAP");
        assert_eq!(field.name, "ARM");
        assert_eq!(instance, 0);
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let (config, registers, description) = sample();
        let registry = EntityRegistry::build(&config, &registers, &description).unwrap();
        assert!(matches!(registry.lookup("TTLIN9.TERM"), Err(EntityError::IndexOutOfRange(..))));
    }

    #[test]
    fn bus_refresh_bumps_bit_out_change_index() {
        let (config, registers, description) = sample();
        let registry = EntityRegistry::build(&config, &registers, &description).unwrap();
        let hw = panda_hw::NullHardware::new();
        let before = registry.lookup("PCAP.ACTIVE").unwrap().1.value_change_index(0);

        hw.set_bit(0, true);
        registry.refresh_bus(&hw).unwrap();

        let (_, field, instance, _) = registry.lookup("PCAP.ACTIVE").unwrap();
        assert!(field.value_change_index(instance) > before);
        assert_eq!(field.format(instance, None, &hw, &registry.mux, &registry.bus).unwrap(), "1");
    }

    #[test]
    fn attr_group_reports_capture_attribute_changes() {
        let (config, registers, description) = sample();
        let registry = EntityRegistry::build(&config, &registers, &description).unwrap();
        let hw = panda_hw::NullHardware::new();
        let before = registry.change_index.current();

        let (_, field, instance, attr) = registry.lookup("PCAP.ACTIVE.CAPTURE").unwrap();
        field.put(instance, attr.as_deref(), "Value", &hw, &registry.mux, &registry.change_index).unwrap();

        let entries = registry.changed_since(ChangeGroup::Attr, before);
        assert!(entries.iter().any(|(label, _)| label == "PCAP1.ACTIVE.CAPTURE"));
        // the BITS group (ACTIVE's own value_change) must not pick up an
        // attribute-only mutation.
        assert!(registry.changed_since(ChangeGroup::Bits, before).is_empty());
    }

    #[test]
    fn overlapping_bit_out_slots_are_rejected() {
        let config = parse_config(
            "config",
            "PCAP 1\n    A bit_out 0\n    B bit_out 0\n",
        )
        .unwrap();
        let registers = parse_registers("registers", "PCAP 0\n    A 0\n    B 1\n").unwrap();
        let description = DescriptionDb::default();
        let err = EntityRegistry::build(&config, &registers, &description).unwrap_err();
        assert!(matches!(err, EntityError::CaptureBusOverlap(..)));
    }
}
