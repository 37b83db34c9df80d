//! Capture session control: `capture_mutex` plus the
//! `armed` flag live on [`CaptureController`]; `arm`/`disarm` take it
//! exclusively, and the dedicated DMA reader thread (spawned once by the
//! binary crate and run for the process lifetime) blocks on it between
//! sessions rather than being respawned per arm.

use std::sync::Arc;
use std::sync::Condvar;
use std::time::Duration;

use base::Mutex;
use base::ShutdownFlag;
use panda_entity::EntityRegistry;
use panda_hw::CompletionCode;
use panda_hw::HardwareAccess;
use panda_hw::StreamEvent;

use crate::buffer::CaptureBuffer;
use crate::error::CaptureError;
use crate::error::Result;
use crate::plan::CapturePlan;

struct State {
    armed: bool,
    plan: Option<CapturePlan>,
    /// Bumped on every `arm`; lets the DMA reader and data-client readers
    /// distinguish "still this session" from "a new one started".
    generation: u64,
    /// Absolute buffer cursor at the moment this session's `arm` ran.
    session_start_cursor: u64,
    completion: Option<(u64, CompletionCode, u64)>,
}

/// Owns the armed flag, the frozen capture plan, and the handoff between
/// the DMA reader thread and every connected data client's reader.
pub struct CaptureController {
    registry: Arc<EntityRegistry>,
    hw: Arc<dyn HardwareAccess>,
    buffer: Arc<CaptureBuffer>,
    state: Mutex<State>,
    cv: Condvar,
}

impl CaptureController {
    pub fn new(registry: Arc<EntityRegistry>, hw: Arc<dyn HardwareAccess>, buffer: Arc<CaptureBuffer>) -> CaptureController {
        CaptureController {
            registry,
            hw,
            buffer,
            state: Mutex::new(State {
                armed: false,
                plan: None,
                generation: 0,
                session_start_cursor: 0,
                completion: None,
            }),
            cv: Condvar::new(),
        }
    }

    pub fn buffer(&self) -> &Arc<CaptureBuffer> {
        &self.buffer
    }

    /// `*PCAP.ARM`: freezes the registered-outputs snapshot, builds the
    /// plan, and arms hardware. Rejected while already armed: a second
    /// `*PCAP.ARM` returns `ERR Capture already in progress`.
    pub fn arm(&self) -> Result<()> {
        let plan = CapturePlan::build(&self.registry)?;
        let mut state = self.state.lock();
        if state.armed {
            return Err(CaptureError::AlreadyArmed);
        }
        self.hw.arm()?;
        state.armed = true;
        state.generation += 1;
        state.session_start_cursor = self.buffer.new_cursor();
        state.completion = None;
        state.plan = Some(plan);
        drop(state);
        self.cv.notify_all();
        Ok(())
    }

    /// `*PCAP.DISARM`: idempotent if not currently armed.
    pub fn disarm(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.armed {
            self.hw.disarm()?;
            state.armed = false;
            self.cv.notify_all();
        }
        Ok(())
    }

    /// `*PCAP.STATUS?` string.
    pub fn status(&self) -> &'static str {
        if self.state.lock().armed {
            "Capturing"
        } else {
            "Idle"
        }
    }

    pub fn is_armed(&self) -> bool {
        self.state.lock().armed
    }

    /// Blocks until a capture session starts after `after_generation`, or
    /// shutdown is signalled. Used by each data-client reader to learn
    /// the plan and its starting buffer cursor.
    pub fn wait_for_session_start(&self, after_generation: u64, shutdown: &ShutdownFlag) -> Option<(CapturePlan, u64, u64)> {
        let mut state = self.state.lock();
        loop {
            if let Some(plan) = &state.plan {
                if state.armed && state.generation > after_generation {
                    return Some((plan.clone(), state.generation, state.session_start_cursor));
                }
            }
            if shutdown.is_set() {
                return None;
            }
            state = self.cv.wait_timeout(state, Duration::from_millis(200)).0;
        }
    }

    /// Blocks until `generation`'s session completes (disarm or DMA
    /// completion) or shutdown is signalled.
    pub fn wait_for_completion(&self, generation: u64, shutdown: &ShutdownFlag) -> Option<(CompletionCode, u64)> {
        let mut state = self.state.lock();
        loop {
            if let Some((gen, code, samples)) = state.completion {
                if gen == generation {
                    return Some((code, samples));
                }
            }
            if !state.armed && state.generation == generation {
                // Disarmed without a recorded completion (e.g. manual
                // `*PCAP.DISARM`) — report as `Disarmed`.
                return Some((CompletionCode::Disarmed, 0));
            }
            if shutdown.is_set() {
                return None;
            }
            state = self.cv.wait_timeout(state, Duration::from_millis(200)).0;
        }
    }

    /// Non-blocking peek: `Some` once `generation`'s session has ended
    /// (disarm or DMA completion), `None` while still running.
    pub fn try_completion(&self, generation: u64) -> Option<(CompletionCode, u64)> {
        let state = self.state.lock();
        if let Some((gen, code, samples)) = state.completion {
            if gen == generation {
                return Some((code, samples));
            }
        }
        if !state.armed && state.generation == generation {
            return Some((CompletionCode::Disarmed, 0));
        }
        None
    }

    fn record_completion(&self, generation: u64, code: CompletionCode, samples: u64) {
        let mut state = self.state.lock();
        if state.generation == generation {
            state.completion = Some((generation, code, samples));
            state.armed = false;
        }
        drop(state);
        self.cv.notify_all();
    }

    fn current_generation(&self) -> u64 {
        self.state.lock().generation
    }
}

/// The DMA reader thread body: runs for the process
/// lifetime, blocking between sessions, draining whole hardware blocks
/// into the capture buffer for the duration of one arm/disarm cycle.
pub fn run_dma_reader(controller: Arc<CaptureController>, shutdown: ShutdownFlag) {
    let mut after_generation = 0u64;
    loop {
        let (plan, generation, _start_cursor) = match controller.wait_for_session_start(after_generation, &shutdown) {
            Some(v) => v,
            None => return,
        };
        after_generation = generation;

        let mut stream = match controller.hw.open_stream() {
            Ok(stream) => stream,
            Err(e) => {
                log::error!("failed to open capture stream: {e}");
                controller.record_completion(generation, CompletionCode::Unexpected(u32::MAX), 0);
                continue;
            }
        };

        let block_size = controller.buffer.block_size().max(plan.sample_bytes.max(1));
        let mut block = vec![0u8; block_size];
        let mut filled = 0usize;
        let mut samples = 0u64;

        let completion = loop {
            if shutdown.is_set() {
                break CompletionCode::Disarmed;
            }
            if controller.current_generation() != generation {
                break CompletionCode::Disarmed;
            }
            match stream.read_block(&mut block[filled..]) {
                Ok(StreamEvent::Data(0)) | Ok(StreamEvent::Timeout) => continue,
                Ok(StreamEvent::Data(n)) => {
                    filled += n;
                    if filled >= block_size {
                        controller.buffer.push(std::mem::replace(&mut block, vec![0u8; block_size]));
                        if plan.sample_bytes > 0 {
                            samples += (filled / plan.sample_bytes) as u64;
                        }
                        filled = 0;
                    }
                }
                Ok(StreamEvent::EndOfCapture) => {
                    if filled > 0 {
                        if plan.sample_bytes > 0 {
                            samples += (filled / plan.sample_bytes) as u64;
                        }
                        controller.buffer.push(block[..filled].to_vec());
                    }
                    break stream.completion().unwrap_or(CompletionCode::Unexpected(u32::MAX));
                }
                Err(e) => {
                    log::error!("capture stream error: {e}");
                    break CompletionCode::Unexpected(u32::MAX);
                }
            }
        };

        controller.record_completion(generation, completion, samples);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use panda_hw::NullHardware;
    use panda_parser::parse_config;
    use panda_parser::parse_registers;
    use std::thread;

    fn controller_with_capture() -> (Arc<CaptureController>, Arc<NullHardware>) {
        let config = parse_config("config", "PCAP 1\n    OUT pos_out 0 adc\n").unwrap();
        let registers = parse_registers("registers", "PCAP 0\n    OUT 0\n").unwrap();
        let registry = Arc::new(EntityRegistry::build(&config, &registers, &Default::default()).unwrap());
        let (_, field, instance, attr) = registry.lookup("PCAP.OUT.CAPTURE").unwrap();
        let hw = Arc::new(NullHardware::new());
        field.put(instance, attr.as_deref(), "Value", hw.as_ref(), &registry.mux, &registry.change_index).unwrap();
        let buffer = Arc::new(CaptureBuffer::new(64, 8));
        let hw_dyn: Arc<dyn HardwareAccess> = hw.clone();
        (Arc::new(CaptureController::new(registry, hw_dyn, buffer)), hw)
    }

    #[test]
    fn second_arm_while_armed_is_rejected() {
        let (controller, _hw) = controller_with_capture();
        controller.arm().unwrap();
        assert!(matches!(controller.arm(), Err(CaptureError::AlreadyArmed)));
    }

    #[test]
    fn disarm_is_idempotent_when_not_armed() {
        let (controller, _hw) = controller_with_capture();
        assert!(controller.disarm().is_ok());
        assert_eq!(controller.status(), "Idle");
    }

    #[test]
    fn dma_reader_completes_session_and_reports_ok() {
        let (controller, hw) = controller_with_capture();
        let shutdown = ShutdownFlag::new();
        let reader_controller = controller.clone();
        let reader_shutdown = shutdown.clone();
        let handle = thread::spawn(move || run_dma_reader(reader_controller, reader_shutdown));

        hw.push_capture_block(vec![0u8; 4]);
        hw.set_completion(0);
        controller.arm().unwrap();

        let (code, samples) = controller.wait_for_completion(1, &shutdown).unwrap();
        assert_eq!(code, CompletionCode::Ok);
        assert_eq!(samples, 1);

        shutdown.signal();
        handle.join().unwrap();
    }
}
