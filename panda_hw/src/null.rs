//! In-process `HardwareAccess` used by unit/integration tests and the
//! `--simulate` CLI flag. Registers are a flat `Vec<u32>` behind a mutex;
//! the capture stream is a queue of pre-recorded byte blocks fed by tests
//! (or, for `--simulate`, generated by a trivial free-running counter).

use std::collections::VecDeque;
use std::sync::Arc;

use base::Mutex;

use crate::CompletionCode;
use crate::DmaStream;
use crate::HardwareAccess;
use crate::LongTableWriter;
use crate::RegAddr;
use crate::Result;
use crate::StreamEvent;

const REG_SPACE_WORDS: usize = 1 << 15;

#[derive(Default)]
struct State {
    registers: Vec<u32>,
    bit_values: [bool; 128],
    bit_changes: [bool; 128],
    pos_values: [u32; 32],
    pos_changes: [bool; 32],
    armed: bool,
    mac: [[u8; 6]; 4],
    stream_blocks: VecDeque<Vec<u8>>,
    completion: u32,
    start_ts_ns: i64,
}

/// Hands the test harness a way to pre-load bit/position values and
/// capture blocks before exercising the command/data servers against it.
pub struct NullHardware {
    state: Arc<Mutex<State>>,
}

impl Default for NullHardware {
    fn default() -> Self {
        NullHardware::new()
    }
}

impl NullHardware {
    pub fn new() -> NullHardware {
        let mut state = State {
            registers: vec![0; REG_SPACE_WORDS],
            ..Default::default()
        };
        state.registers.resize(REG_SPACE_WORDS, 0);
        NullHardware { state: Arc::new(Mutex::new(state)) }
    }

    pub fn set_bit(&self, index: usize, value: bool) {
        let mut s = self.state.lock();
        s.bit_values[index] = value;
        s.bit_changes[index] = true;
    }

    pub fn set_position(&self, index: usize, value: u32) {
        let mut s = self.state.lock();
        s.pos_values[index] = value;
        s.pos_changes[index] = true;
    }

    /// Queues one raw capture block to be handed out by the next
    /// `read_block` call on a stream opened from this point on.
    pub fn push_capture_block(&self, block: Vec<u8>) {
        self.state.lock().stream_blocks.push_back(block);
    }

    pub fn set_completion(&self, code: u32) {
        self.state.lock().completion = code;
    }

    /// Test/persistence-replay helper: the MAC octets last written to slot
    /// `index`, if any.
    pub fn last_mac(&self, index: usize) -> Option<[u8; 6]> {
        self.state.lock().mac.get(index).copied()
    }
}

impl HardwareAccess for NullHardware {
    fn read_reg(&self, addr: RegAddr) -> Result<u32> {
        Ok(self.state.lock().registers[addr.word_index() as usize])
    }

    fn write_reg(&self, addr: RegAddr, value: u32) -> Result<()> {
        self.state.lock().registers[addr.word_index() as usize] = value;
        Ok(())
    }

    fn read_bits(&self) -> Result<([bool; 128], [bool; 128])> {
        let mut s = self.state.lock();
        let values = s.bit_values;
        let changes = s.bit_changes;
        s.bit_changes = [false; 128];
        Ok((values, changes))
    }

    fn read_positions(&self) -> Result<([u32; 32], [bool; 32])> {
        let mut s = self.state.lock();
        let values = s.pos_values;
        let changes = s.pos_changes;
        s.pos_changes = [false; 32];
        Ok((values, changes))
    }

    fn write_short_table(
        &self,
        _reset_reg: RegAddr,
        _fill_reg: RegAddr,
        _length_reg: RegAddr,
        words: &[u32],
        max_len: usize,
    ) -> Result<()> {
        if words.len() > max_len {
            return Err(crate::HwError::TableTooLong { len: words.len(), max: max_len });
        }
        Ok(())
    }

    fn open_long_table(&self, _order: u32, _base_reg: RegAddr, _length_reg: RegAddr) -> Result<Box<dyn LongTableWriter>> {
        Ok(Box::new(NullLongTable))
    }

    fn arm(&self) -> Result<()> {
        self.state.lock().armed = true;
        Ok(())
    }

    fn disarm(&self) -> Result<()> {
        self.state.lock().armed = false;
        Ok(())
    }

    fn open_stream(&self) -> Result<Box<dyn DmaStream>> {
        Ok(Box::new(NullStream { state: self.state.clone() }))
    }

    fn write_mac(&self, index: usize, octets: [u8; 6]) -> Result<()> {
        self.state.lock().mac[index] = octets;
        Ok(())
    }
}

struct NullLongTable;

impl LongTableWriter for NullLongTable {
    fn write_fragment(&mut self, _words: &[u32], _more: bool) -> Result<()> {
        Ok(())
    }
}

struct NullStream {
    state: Arc<Mutex<State>>,
}

impl DmaStream for NullStream {
    fn read_block(&mut self, buf: &mut [u8]) -> Result<StreamEvent> {
        let mut s = self.state.lock();
        match s.stream_blocks.pop_front() {
            Some(block) => {
                let n = block.len().min(buf.len());
                buf[..n].copy_from_slice(&block[..n]);
                Ok(StreamEvent::Data(n))
            }
            None => Ok(StreamEvent::EndOfCapture),
        }
    }

    fn completion(&mut self) -> Result<CompletionCode> {
        Ok(CompletionCode::from_raw(self.state.lock().completion))
    }

    fn start_timestamp_ns(&mut self) -> Result<i64> {
        Ok(self.state.lock().start_ts_ns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_read_write_round_trips() {
        let hw = NullHardware::new();
        let addr = RegAddr::new(3, 1, 5);
        hw.write_reg(addr, 0xdead_beef).unwrap();
        assert_eq!(hw.read_reg(addr).unwrap(), 0xdead_beef);
    }

    #[test]
    fn bit_change_flags_clear_after_read() {
        let hw = NullHardware::new();
        hw.set_bit(3, true);
        let (values, changes) = hw.read_bits().unwrap();
        assert!(values[3]);
        assert!(changes[3]);
        let (_, changes) = hw.read_bits().unwrap();
        assert!(!changes[3]);
    }

    #[test]
    fn stream_yields_queued_blocks_then_eof() {
        let hw = NullHardware::new();
        hw.push_capture_block(vec![1, 2, 3, 4]);
        let mut stream = hw.open_stream().unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(stream.read_block(&mut buf).unwrap(), StreamEvent::Data(4));
        assert_eq!(stream.read_block(&mut buf).unwrap(), StreamEvent::EndOfCapture);
    }
}
