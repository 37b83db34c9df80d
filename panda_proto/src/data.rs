//! Data protocol connection handling: option negotiation, then zero
//! or more capture sessions, each an optional
//! header, a run of data blocks, and an optional `END` status line.

use std::io::BufRead;
use std::io::BufReader;
use std::io::Write;
use std::net::TcpListener;
use std::net::TcpStream;
use std::time::Duration;

use base::ShutdownFlag;
use panda_capture::convert_ascii_row;
use panda_capture::convert_binary;
use panda_capture::header_plain_text;
use panda_capture::header_xml;
use panda_capture::CapturePlan;
use panda_capture::ConvertState;
use panda_capture::HeaderFormat;
use panda_capture::Process;

use crate::options;
use crate::options::DataOptions;
use crate::Shared;

const READ_POLL: Duration = Duration::from_millis(200);

pub fn serve(listener: TcpListener, shared: std::sync::Arc<Shared>, shutdown: ShutdownFlag) {
    listener.set_nonblocking(true).expect("failed to set data listener non-blocking");
    loop {
        if shutdown.is_set() {
            return;
        }
        match listener.accept() {
            Ok((stream, addr)) => {
                log::info!("data connection from {addr}");
                let shared = shared.clone();
                let shutdown = shutdown.clone();
                std::thread::spawn(move || handle_connection(stream, shared, shutdown));
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                shutdown.wait_timeout(Duration::from_millis(200));
            }
            Err(e) => {
                log::warn!("data accept failed: {e}");
            }
        }
    }
}

fn handle_connection(stream: TcpStream, shared: std::sync::Arc<Shared>, shutdown: ShutdownFlag) {
    let mut reader = BufReader::new(match stream.try_clone() {
        Ok(s) => s,
        Err(e) => {
            log::warn!("failed to clone data socket: {e}");
            return;
        }
    });
    let mut writer = stream;
    writer.set_write_timeout(Some(shared.write_timeout)).ok();

    let mut first_line = String::new();
    if reader.read_line(&mut first_line).unwrap_or(0) == 0 {
        return;
    }
    let options = match options::parse(first_line.trim_end_matches(['\n', '\r'])) {
        Ok(o) => o,
        Err(e) => {
            let _ = writeln!(writer, "ERR {e}");
            return;
        }
    };
    if writeln!(writer, "OK").is_err() {
        return;
    }

    let mut after_generation = 0u64;
    loop {
        let (plan, generation, start_cursor) = match shared.capture.wait_for_session_start(after_generation, &shutdown) {
            Some(v) => v,
            None => return,
        };
        after_generation = generation;

        if !options.no_header && write_header(&mut writer, &plan, &options).is_err() {
            return;
        }

        match stream_session(&mut writer, &shared, &plan, &options, generation, start_cursor, &shutdown) {
            StreamOutcome::Closed => return,
            StreamOutcome::Overrun => {
                let _ = writeln!(writer, "ERR overrun");
                return;
            }
            StreamOutcome::Completed { samples, completion } => {
                if !options.no_status && writeln!(writer, "END {samples} {}", completion.display()).is_err() {
                    return;
                }
            }
        }

        if options.one_shot {
            return;
        }
    }
}

fn write_header(writer: &mut TcpStream, plan: &CapturePlan, options: &DataOptions) -> std::io::Result<()> {
    let text = if options.xml {
        header_xml(plan, options.process, options.format, 0)
    } else {
        header_plain_text(plan, options.process, options.format, 0)
    };
    writer.write_all(text.as_bytes())
}

enum StreamOutcome {
    Closed,
    Overrun,
    Completed { samples: u64, completion: panda_hw::CompletionCode },
}

#[allow(clippy::too_many_arguments)]
fn stream_session(
    writer: &mut TcpStream,
    shared: &Shared,
    plan: &CapturePlan,
    options: &DataOptions,
    generation: u64,
    start_cursor: u64,
    shutdown: &ShutdownFlag,
) -> StreamOutcome {
    let mut cursor = start_cursor;
    let mut convert_state = ConvertState::default();
    let mut samples = 0u64;

    loop {
        if shutdown.is_set() {
            return StreamOutcome::Closed;
        }
        match shared.capture.buffer().read_at_timeout(cursor, READ_POLL) {
            Ok(Some((block, next_cursor))) => {
                cursor = next_cursor;
                if plan.sample_bytes == 0 || block.is_empty() {
                    continue;
                }
                let block_samples = block.len() / plan.sample_bytes;
                samples += block_samples as u64;
                if write_block(writer, plan, options, &block, &mut convert_state).is_err() {
                    return StreamOutcome::Closed;
                }
            }
            Ok(None) => {
                if let Some((completion, _)) = shared.capture.try_completion(generation) {
                    return StreamOutcome::Completed { samples, completion };
                }
            }
            Err(_) => return StreamOutcome::Overrun,
        }
    }
}

/// Writes one whole DMA-reader block's worth of samples. `FRAMED`/`BASE64`
/// carry a single length prefix per block, not per sample: the DMA reader already hands data to every
/// client reader one block at a time, so the block is the natural framing
/// unit.
fn write_block(
    writer: &mut TcpStream,
    plan: &CapturePlan,
    options: &DataOptions,
    block: &[u8],
    state: &mut ConvertState,
) -> std::io::Result<()> {
    match options.format {
        HeaderFormat::Ascii => {
            for raw_sample in block.chunks_exact(plan.sample_bytes) {
                let row = convert_ascii_row(plan, options.process, raw_sample, state);
                writeln!(writer, "{row}")?;
            }
            Ok(())
        }
        HeaderFormat::Unframed => {
            let mut payload = Vec::new();
            for raw_sample in block.chunks_exact(plan.sample_bytes) {
                convert_binary(plan, options.process, raw_sample, state, &mut payload);
            }
            writer.write_all(&payload)
        }
        HeaderFormat::Framed => {
            let mut payload = Vec::new();
            for raw_sample in block.chunks_exact(plan.sample_bytes) {
                convert_binary(plan, options.process, raw_sample, state, &mut payload);
            }
            writer.write_all(&(payload.len() as u32).to_le_bytes())?;
            writer.write_all(&payload)
        }
        HeaderFormat::Base64 => {
            let mut payload = Vec::new();
            for raw_sample in block.chunks_exact(plan.sample_bytes) {
                convert_binary(plan, options.process, raw_sample, state, &mut payload);
            }
            let encoded = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &payload);
            writeln!(writer, "{encoded}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_sample_round_trips_through_conversion() {
        use panda_capture::FieldCategory;
        use panda_capture::PlanField;
        use panda_entity::CaptureOption;

        let plan = CapturePlan {
            fields: vec![PlanField {
                block: "PCAP".to_string(),
                instance: 0,
                field: "VAL".to_string(),
                capture: CaptureOption::Value,
                category: FieldCategory::Unscaled32,
                offset: 0,
                scaling: None,
                bit_slot: None,
            }],
            include_timestamp: false,
            include_sample_count: false,
            bit_group_words: 0,
            sample_bytes: 4,
        };
        let mut state = ConvertState::default();
        let row = convert_ascii_row(&plan, Process::Unscaled, &7u32.to_le_bytes(), &mut state);
        assert_eq!(row, "7");
    }
}
