//! Command protocol connection handling: one thread per accepted
//! connection, a line-buffered reader, and a flush-after-
//! every-response writer. Table multi-line writes are the one place a
//! connection consumes more than a single line per request.

use std::io::BufRead;
use std::io::BufReader;
use std::io::Write;
use std::net::TcpListener;
use std::net::TcpStream;
use std::time::Duration;

use base::ShutdownFlag;
use panda_entity::ConnectionChangeState;

use crate::system;
use crate::Shared;

/// What a dispatched request produces, rendered to wire text by
/// [`render`].
pub enum Response {
    Ok,
    Value(String),
    Multi(Vec<String>),
    Err(String),
}

fn render(response: Response, out: &mut impl Write) -> std::io::Result<()> {
    match response {
        Response::Ok => writeln!(out, "OK"),
        Response::Value(value) => writeln!(out, "OK ={value}"),
        Response::Multi(lines) => {
            for line in lines {
                writeln!(out, "!{line}")?;
            }
            writeln!(out, ".")
        }
        Response::Err(message) => writeln!(out, "ERR {message}"),
    }
}

/// Accepts connections until `shutdown` is signalled, spawning one worker
/// thread per connection.
pub fn serve(listener: TcpListener, shared: std::sync::Arc<Shared>, shutdown: ShutdownFlag) {
    listener.set_nonblocking(true).expect("failed to set command listener non-blocking");
    loop {
        if shutdown.is_set() {
            return;
        }
        match listener.accept() {
            Ok((stream, addr)) => {
                log::info!("command connection from {addr}");
                let shared = shared.clone();
                std::thread::spawn(move || handle_connection(stream, shared));
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                shutdown.wait_timeout(Duration::from_millis(200));
            }
            Err(e) => {
                log::warn!("command accept failed: {e}");
            }
        }
    }
}

fn handle_connection(stream: TcpStream, shared: std::sync::Arc<Shared>) {
    let mut reader = BufReader::new(match stream.try_clone() {
        Ok(s) => s,
        Err(e) => {
            log::warn!("failed to clone command socket: {e}");
            return;
        }
    });
    let mut writer = stream;
    let mut change_state = ConnectionChangeState::new();
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => return,
            Ok(_) => {}
            Err(e) => {
                log::debug!("command read error: {e}");
                return;
            }
        }
        let trimmed = line.trim_end_matches(['\n', '\r']);
        if trimmed.is_empty() {
            continue;
        }

        let response = if let Some(cmd) = trimmed.strip_prefix('*') {
            system::dispatch(cmd, &shared, &mut change_state)
        } else {
            dispatch_entity(trimmed, &mut reader, &shared)
        };

        if render(response, &mut writer).is_err() {
            log::debug!("command write failed, closing connection");
            return;
        }
        if writer.flush().is_err() {
            return;
        }
    }
}

fn dispatch_entity(line: &str, reader: &mut BufReader<TcpStream>, shared: &Shared) -> Response {
    if let Some(path) = line.strip_suffix('?') {
        return query(path, shared);
    }
    if let Some(path) = line.strip_suffix("<<") {
        return table_write(path, reader, shared, TableMode::Append);
    }
    if let Some(path) = line.strip_suffix("<B") {
        return table_write(path, reader, shared, TableMode::Base64);
    }
    if let Some(path) = line.strip_suffix('<') {
        return table_write(path, reader, shared, TableMode::Replace);
    }
    if let Some((path, value)) = line.split_once('=') {
        return write_value(path, value, shared);
    }
    Response::Err(format!("malformed request {line:?}"))
}

fn query(path: &str, shared: &Shared) -> Response {
    let (_, field, instance, attr) = match shared.registry.lookup(path) {
        Ok(v) => v,
        Err(e) => return Response::Err(e.to_string()),
    };
    if attr.as_deref() == Some("TABLE") {
        return Response::Multi(match field.table_rows(instance) {
            Ok(rows) => rows,
            Err(e) => return Response::Err(e.to_string()),
        });
    }
    match field.format(instance, attr.as_deref(), shared.hw.as_ref(), &shared.registry.mux, &shared.registry.bus) {
        Ok(value) => Response::Value(value),
        Err(e) => Response::Err(e.to_string()),
    }
}

fn write_value(path: &str, value: &str, shared: &Shared) -> Response {
    let (_, field, instance, attr) = match shared.registry.lookup(path) {
        Ok(v) => v,
        Err(e) => return Response::Err(e.to_string()),
    };
    match field.put(instance, attr.as_deref(), value, shared.hw.as_ref(), &shared.registry.mux, &shared.registry.change_index) {
        Ok(()) => Response::Ok,
        Err(e) => Response::Err(e.to_string()),
    }
}

enum TableMode {
    Replace,
    Append,
    Base64,
}

fn table_write(path: &str, reader: &mut BufReader<TcpStream>, shared: &Shared, mode: TableMode) -> Response {
    let path = path.strip_suffix(".TABLE").unwrap_or(path);
    let (_, field, instance, _) = match shared.registry.lookup(path) {
        Ok(v) => v,
        Err(e) => return Response::Err(e.to_string()),
    };

    if let Err(e) = field.table_begin_write(instance) {
        return Response::Err(e.to_string());
    }

    let mut new_words = Vec::new();
    let mut line = String::new();
    let parse_ok = loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => break false,
            Ok(_) => {}
            Err(_) => break false,
        }
        let trimmed = line.trim_end_matches(['\n', '\r']);
        if trimmed.is_empty() {
            break true;
        }
        match &mode {
            TableMode::Base64 => match base64::Engine::decode(&base64::engine::general_purpose::STANDARD, trimmed) {
                Ok(bytes) => {
                    for chunk in bytes.chunks_exact(4) {
                        new_words.push(u32::from_le_bytes(chunk.try_into().unwrap()));
                    }
                }
                Err(_) => {
                    field.table_abort_write(instance);
                    return Response::Err(format!("invalid base64 payload line {trimmed:?}"));
                }
            },
            _ => match trimmed.parse::<u32>() {
                Ok(word) => new_words.push(word),
                Err(_) => {
                    field.table_abort_write(instance);
                    return Response::Err(format!("invalid table word {trimmed:?}"));
                }
            },
        }
    };

    if !parse_ok {
        field.table_abort_write(instance);
        return Response::Err("connection closed mid-table-write".to_string());
    }

    let words = if matches!(mode, TableMode::Append) {
        match field.table_rows(instance) {
            Ok(rows) => {
                let mut existing: Vec<u32> = rows.iter().filter_map(|r| r.parse().ok()).collect();
                existing.extend(new_words);
                existing
            }
            Err(e) => {
                field.table_abort_write(instance);
                return Response::Err(e.to_string());
            }
        }
    } else {
        new_words
    };

    match field.table_commit(instance, words, shared.hw.as_ref(), &shared.registry.change_index) {
        Ok(()) => Response::Ok,
        Err(e) => Response::Err(e.to_string()),
    }
}
