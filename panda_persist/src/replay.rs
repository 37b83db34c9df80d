//! Startup replay of a persistence file: re-applies every
//! `name=value` and `name.TABLE<` record through the same write path a
//! live connection would use, before the command/data sockets open.

use std::io::BufRead;
use std::path::Path;

use panda_entity::EntityRegistry;
use panda_hw::HardwareAccess;

use crate::error::PersistError;
use crate::error::Result;

/// Reads `path` line by line and replays each record. Missing files are
/// not an error — a fresh install simply has nothing to replay.
pub fn replay(path: &Path, registry: &EntityRegistry, hw: &dyn HardwareAccess) -> Result<()> {
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    let mut lines = text.lines().enumerate().peekable();
    while let Some((lineno, line)) = lines.next() {
        if line.trim().is_empty() {
            continue;
        }
        if let Some(path_part) = line.strip_suffix("<") {
            let label = path_part.strip_suffix(".TABLE").ok_or_else(|| {
                PersistError::Malformed(display(path), lineno + 1, format!("{line:?} is not a TABLE record"))
            })?;
            let mut words = Vec::new();
            loop {
                match lines.next() {
                    Some((_, row)) if row.is_empty() => break,
                    Some((n, row)) => {
                        let word: u32 = row
                            .parse()
                            .map_err(|_| PersistError::Malformed(display(path), n + 1, format!("{row:?} is not a table word")))?;
                        words.push(word);
                    }
                    None => break,
                }
            }
            apply_table(registry, hw, label, words).map_err(|msg| PersistError::Malformed(display(path), lineno + 1, msg))?;
            continue;
        }

        let (name, value) = line
            .split_once('=')
            .ok_or_else(|| PersistError::Malformed(display(path), lineno + 1, format!("{line:?} is not a name=value record")))?;
        apply_scalar(registry, hw, name, value).map_err(|msg| PersistError::Malformed(display(path), lineno + 1, msg))?;
    }
    Ok(())
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

fn apply_scalar(registry: &EntityRegistry, hw: &dyn HardwareAccess, label: &str, value: &str) -> std::result::Result<(), String> {
    let (_, field, instance, attr) = registry.lookup(label).map_err(|e| e.to_string())?;
    field.put(instance, attr.as_deref(), value, hw, &registry.mux, &registry.change_index).map_err(|e| e.to_string())
}

fn apply_table(registry: &EntityRegistry, hw: &dyn HardwareAccess, label: &str, words: Vec<u32>) -> std::result::Result<(), String> {
    let (_, field, instance, _) = registry.lookup(label).map_err(|e| e.to_string())?;
    field.table_begin_write(instance).map_err(|e| e.to_string())?;
    field.table_commit(instance, words, hw, &registry.change_index).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use panda_parser::parse_config;
    use panda_parser::parse_registers;

    #[test]
    fn replays_a_scalar_record() {
        let config = parse_config("config", "TTLIN 1\n    TERM param uint 255\n").unwrap();
        let registers = parse_registers("registers", "TTLIN 0\n    TERM 0\n").unwrap();
        let registry = EntityRegistry::build(&config, &registers, &Default::default()).unwrap();
        let hw = panda_hw::NullHardware::new();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("persist.txt");
        std::fs::write(&path, "TTLIN1.TERM=11\n").unwrap();
        replay(&path, &registry, &hw).unwrap();

        let (_, field, instance, _) = registry.lookup("TTLIN1.TERM").unwrap();
        assert_eq!(field.format(instance, None, &hw, &registry.mux, &registry.bus).unwrap(), "11");
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let config = parse_config("config", "TTLIN 1\n    TERM param uint 255\n").unwrap();
        let registers = parse_registers("registers", "TTLIN 0\n    TERM 0\n").unwrap();
        let registry = EntityRegistry::build(&config, &registers, &Default::default()).unwrap();
        let hw = panda_hw::NullHardware::new();
        assert!(replay(Path::new("/nonexistent/persist.txt"), &registry, &hw).is_ok());
    }
}
