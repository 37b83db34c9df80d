//! System commands: everything addressed with a leading
//! `*`. Dispatched from the command connection loop; each call returns a
//! [`Response`] the connection loop renders to wire text exactly like an
//! ordinary entity command.

use panda_entity::ChangeGroup;
use panda_entity::Class;
use panda_entity::ConnectionChangeState;
use panda_entity::EntityRegistry;

use crate::command::Response;
use crate::Shared;

pub const IDN: &str = "PandA Server 1.0";

pub fn dispatch(cmd: &str, shared: &Shared, change_state: &mut ConnectionChangeState) -> Response {
    if cmd == "IDN?" {
        return Response::Value(IDN.to_string());
    }
    if let Some(text) = cmd.strip_prefix("ECHO ").and_then(|rest| rest.strip_suffix('?')) {
        return Response::Value(text.to_string());
    }
    if cmd == "BLOCKS?" {
        let lines = shared.registry.blocks().map(|b| format!("{} {}", b.name, b.count)).collect();
        return Response::Multi(lines);
    }
    if let Some(rest) = cmd.strip_prefix("DESC.").and_then(|r| r.strip_suffix('?')) {
        return describe(&shared.registry, rest);
    }
    if cmd == "CHANGES?" || cmd.starts_with("CHANGES.") {
        return changes(cmd, &shared.registry, shared.hw.as_ref(), change_state);
    }
    if cmd == "CAPTURE?" {
        let lines = shared
            .registry
            .registered_outputs()
            .into_iter()
            .map(|out| format!("{}{}.{} {}", out.block, out.instance + 1, out.field, out.option.name()))
            .collect();
        return Response::Multi(lines);
    }
    if cmd == "CAPTURE=" {
        shared.registry.reset_captures();
        return Response::Ok;
    }
    if cmd == "CAPTURE.LABELS?" {
        return Response::Multi(capture_labels(&shared.registry));
    }
    if cmd == "PCAP.ARM" {
        return match shared.capture.arm() {
            Ok(()) => Response::Ok,
            Err(e) => Response::Err(e.to_string()),
        };
    }
    if cmd == "PCAP.DISARM" {
        return match shared.capture.disarm() {
            Ok(()) => Response::Ok,
            Err(e) => Response::Err(e.to_string()),
        };
    }
    if cmd == "PCAP.STATUS?" {
        return Response::Value(shared.capture.status().to_string());
    }
    if let Some(rest) = cmd.strip_prefix("METADATA.") {
        return metadata(&shared.registry, rest);
    }
    Response::Err(format!("no such system command {cmd:?}"))
}

fn describe(registry: &EntityRegistry, path: &str) -> Response {
    let mut parts = path.splitn(2, '.');
    let block_name = match parts.next() {
        Some(name) => name,
        None => return Response::Err("missing block name".to_string()),
    };
    let block = match registry.block(block_name) {
        Some(b) => b,
        None => return Response::Err(format!("no such block {block_name:?}")),
    };
    match parts.next() {
        None => Response::Value(block.description.clone().unwrap_or_default()),
        Some(field_name) => match block.field(field_name) {
            Some(field) => Response::Value(field.description.clone().unwrap_or_default()),
            None => Response::Err(format!("{block_name} has no field {field_name:?}")),
        },
    }
}

fn changes(
    cmd: &str,
    registry: &EntityRegistry,
    hw: &dyn panda_hw::HardwareAccess,
    change_state: &mut ConnectionChangeState,
) -> Response {
    let group_name = cmd.strip_prefix("CHANGES.").and_then(|r| r.strip_suffix('?')).unwrap_or("");
    let group = match ChangeGroup::from_name(group_name) {
        Some(g) => g,
        None => return Response::Err(format!("no such change group {group_name:?}")),
    };
    let threshold = change_state.last(group);
    let current = registry.change_index.current();
    let entries = registry.changed_since(group, threshold);
    change_state.advance(group, current);

    let lines = entries
        .into_iter()
        .map(|(label, instance)| match registry.lookup(&label) {
            Ok((_, field, _, _)) => match field.format(instance, None, hw, &registry.mux, &registry.bus) {
                Ok(value) => format!("{label}={value}"),
                Err(_) => label,
            },
            Err(_) => label,
        })
        .collect();
    Response::Multi(lines)
}

fn metadata(registry: &EntityRegistry, rest: &str) -> Response {
    if let Some(key) = rest.strip_suffix('?') {
        return match registry.get_metadata(key) {
            Some(value) => Response::Value(value),
            None => match registry.get_metadata_multi(key) {
                Some(lines) => Response::Multi(lines),
                None => Response::Err(format!("no such metadata key {key:?}")),
            },
        };
    }
    if let Some((key, value)) = rest.split_once('=') {
        registry.set_metadata(key, value.to_string());
        return Response::Ok;
    }
    Response::Err(format!("malformed METADATA command {rest:?}"))
}

fn capture_labels(registry: &EntityRegistry) -> Vec<String> {
    let mut labels = Vec::new();
    for block in registry.blocks() {
        for field in block.fields() {
            match &field.class {
                Class::BitOut { bus_index, .. } => {
                    for instance in 0..bus_index.len() {
                        labels.push(format!("{}{}.{}", block.name, instance + 1, field.name));
                    }
                }
                Class::PosOut { bus_index, .. } => {
                    for instance in 0..bus_index.len() {
                        labels.push(format!("{}{}.{}", block.name, instance + 1, field.name));
                    }
                }
                Class::ExtOut { .. } => {
                    for instance in 0..field.instance_count() {
                        labels.push(format!("{}{}.{}", block.name, instance + 1, field.name));
                    }
                }
                _ => {}
            }
        }
    }
    labels
}
