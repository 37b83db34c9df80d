//! Persistence writer: polls the CONFIG/ATTR/TABLE change
//! groups, and when anything has moved, waits out a holdoff, dumps every
//! settable entity's current value to a temp file, and renames it over
//! the target path atomically.

use std::io::Write as _;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use base::ShutdownFlag;
use panda_entity::ChangeGroup;
use panda_entity::Class;
use panda_entity::EntityRegistry;
use panda_hw::HardwareAccess;

use crate::error::Result;

/// Every currently-settable entity's value, rendered as it would appear
/// on the wire (`name=value` or a `name.TABLE<` block), in block/field
/// declaration order.
pub fn generate_records(registry: &EntityRegistry, hw: &dyn HardwareAccess) -> Vec<String> {
    let mut records = Vec::new();
    for block in registry.blocks() {
        for field in block.fields() {
            for instance in 0..field.instance_count() {
                let label = format!("{}{}.{}", block.name, instance + 1, field.name);
                match &field.class {
                    Class::Param { .. } | Class::BitIn { .. } | Class::PosIn { .. } => {
                        if let Ok(value) = field.format(instance, None, hw, &registry.mux, &registry.bus) {
                            records.push(format!("{label}={value}"));
                        }
                    }
                    Class::BitOut { .. } | Class::ExtOut { .. } => {
                        if let Ok(value) = field.format(instance, Some("CAPTURE"), hw, &registry.mux, &registry.bus) {
                            records.push(format!("{label}.CAPTURE={value}"));
                        }
                    }
                    Class::PosOut { .. } => {
                        for attr in ["CAPTURE", "SCALE", "OFFSET", "UNITS"] {
                            if let Ok(value) = field.format(instance, Some(attr), hw, &registry.mux, &registry.bus) {
                                records.push(format!("{label}.{attr}={value}"));
                            }
                        }
                    }
                    Class::Table { .. } => {
                        if let Ok(rows) = field.table_rows(instance) {
                            let mut block_text = format!("{label}.TABLE<\n");
                            for row in rows {
                                block_text.push_str(&row);
                                block_text.push('\n');
                            }
                            block_text.push('\n');
                            records.push(block_text.trim_end_matches('\n').to_string() + "\n");
                        }
                    }
                    Class::Read { .. } | Class::Write { .. } => {}
                }
            }
        }
    }
    records
}

fn write_atomically(path: &Path, records: &[String]) -> Result<()> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    for record in records {
        writeln!(tmp, "{record}")?;
    }
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Runs for the process lifetime: polls every `poll_interval`, and on a
/// detected change in CONFIG/ATTR/TABLE waits `holdoff` for the change
/// burst to settle before writing, then `backoff` before resuming polls.
/// A final write is forced right before returning on shutdown.
pub fn run_persistence_thread(
    registry: std::sync::Arc<EntityRegistry>,
    hw: std::sync::Arc<dyn HardwareAccess>,
    path: PathBuf,
    poll_interval: Duration,
    holdoff: Duration,
    backoff: Duration,
    shutdown: ShutdownFlag,
) {
    let mut last_written = 0u64;
    loop {
        if shutdown.wait_timeout(poll_interval) {
            break;
        }
        if !has_settable_changes(&registry, last_written) {
            continue;
        }
        shutdown.wait_timeout(holdoff);
        last_written = registry.change_index.current();
        if let Err(e) = write_atomically(&path, &generate_records(&registry, hw.as_ref())) {
            log::error!("persistence write failed: {e}");
            continue;
        }
        shutdown.wait_timeout(backoff);
    }

    if let Err(e) = write_atomically(&path, &generate_records(&registry, hw.as_ref())) {
        log::error!("final persistence write failed: {e}");
    }
}

fn has_settable_changes(registry: &EntityRegistry, threshold: u64) -> bool {
    !registry.changed_since(ChangeGroup::Config, threshold).is_empty()
        || !registry.changed_since(ChangeGroup::Attr, threshold).is_empty()
        || !registry.changed_since(ChangeGroup::Table, threshold).is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use panda_parser::parse_config;
    use panda_parser::parse_registers;

    #[test]
    fn generates_a_record_for_a_param_field() {
        let config = parse_config("config", "TTLIN 1\n    TERM param uint 255\n").unwrap();
        let registers = parse_registers("registers", "TTLIN 0\n    TERM 0\n").unwrap();
        let registry = EntityRegistry::build(&config, &registers, &Default::default()).unwrap();
        let hw = panda_hw::NullHardware::new();
        let (_, field, instance, _) = registry.lookup("TTLIN1.TERM").unwrap();
        field.put(instance, None, "7", &hw, &registry.mux, &registry.change_index).unwrap();
        let records = generate_records(&registry, &hw);
        assert!(records.contains(&"TTLIN1.TERM=7".to_string()));
    }

    #[test]
    fn round_trip_write_then_replay_is_idempotent() {
        let config = parse_config("config", "TTLIN 1\n    TERM param uint 255\n").unwrap();
        let registers = parse_registers("registers", "TTLIN 0\n    TERM 0\n").unwrap();
        let registry = EntityRegistry::build(&config, &registers, &Default::default()).unwrap();
        let hw = panda_hw::NullHardware::new();
        let (_, field, instance, _) = registry.lookup("TTLIN1.TERM").unwrap();
        field.put(instance, None, "9", &hw, &registry.mux, &registry.change_index).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("persist.txt");
        write_atomically(&path, &generate_records(&registry, &hw)).unwrap();
        crate::replay::replay(&path, &registry, &hw).unwrap();

        let second = dir.path().join("persist2.txt");
        write_atomically(&second, &generate_records(&registry, &hw)).unwrap();

        let first_contents = std::fs::read_to_string(&path).unwrap();
        let second_contents = std::fs::read_to_string(&second).unwrap();
        assert_eq!(first_contents, second_contents);
    }
}
