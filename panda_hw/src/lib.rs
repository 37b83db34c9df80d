//! `HardwareAccess`: the single seam the rest of the server uses to reach
//! the FPGA register map, the bit/position bus, table DMA, and the
//! capture data stream. Two implementations ship: [`DeviceHardware`],
//! which opens the kernel driver's character devices, and
//! [`NullHardware`], an in-process stand-in used by tests and by
//! `--simulate` for development without real hardware.

mod device;
mod error;
pub mod ioctl;
mod named;
mod null;

pub use device::DeviceHardware;
pub use error::HwError;
pub use error::Result;
pub use named::validate_named_registers;
pub use null::NullHardware;

/// Addresses a single 32-bit register: 5-bit block type, 4-bit instance,
/// 6-bit register id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegAddr {
    pub block_type: u8,
    pub instance: u8,
    pub reg: u8,
}

impl RegAddr {
    pub fn new(block_type: u8, instance: u8, reg: u8) -> RegAddr {
        RegAddr { block_type, instance, reg }
    }

    /// Word index within the memory-mapped register region.
    pub fn word_index(&self) -> u32 {
        ((self.block_type as u32) << 10) | ((self.instance as u32) << 6) | (self.reg as u32)
    }
}

/// Outcome of one blocking read from the DMA stream device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEvent {
    /// `n` bytes of capture data were read into the caller's buffer.
    Data(usize),
    /// A zero-length read completed successfully: driver-level timeout,
    /// not an error. Callers use this to flush idle status.
    Timeout,
    /// End of file: the capture has completed.
    EndOfCapture,
}

/// Hardware capture-engine completion code, translated from the driver's
/// raw `u32` via a fixed table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionCode {
    Ok,
    DmaDataError,
    DriverDataOverrun,
    FramingError,
    Disarmed,
    Unexpected(u32),
}

impl CompletionCode {
    pub fn from_raw(code: u32) -> CompletionCode {
        match code {
            0 => CompletionCode::Ok,
            1 => CompletionCode::DmaDataError,
            2 => CompletionCode::DriverDataOverrun,
            3 => CompletionCode::FramingError,
            4 => CompletionCode::Disarmed,
            other => CompletionCode::Unexpected(other),
        }
    }

    pub fn display(&self) -> &'static str {
        match self {
            CompletionCode::Ok => "Ok",
            CompletionCode::DmaDataError => "DMA data error",
            CompletionCode::DriverDataOverrun => "Driver data overrun",
            CompletionCode::FramingError => "Framing error",
            CompletionCode::Disarmed => "Disarmed",
            CompletionCode::Unexpected(_) => "Unexpected",
        }
    }
}

/// A handle to an opened long (DMA-backed) table; `write_fragment` mirrors
/// `ioctl(PANDA_BLOCK_SEND)`'s `{ptr, length, more}` framing, and
/// `commit` is the `more=0` final fragment for static-mode writes.
pub trait LongTableWriter: Send {
    fn write_fragment(&mut self, words: &[u32], more: bool) -> Result<()>;
}

/// A handle to the DMA capture-data stream device. Owned by the DMA
/// reader thread for the lifetime of one arm/disarm cycle.
pub trait DmaStream: Send {
    fn read_block(&mut self, buf: &mut [u8]) -> Result<StreamEvent>;
    fn completion(&mut self) -> Result<CompletionCode>;
    fn start_timestamp_ns(&mut self) -> Result<i64>;
}

/// The narrow interface the entity, capture, and persistence layers use
/// to reach hardware.
pub trait HardwareAccess: Send + Sync {
    fn read_reg(&self, addr: RegAddr) -> Result<u32>;
    fn write_reg(&self, addr: RegAddr, value: u32) -> Result<()>;

    /// Burst-reads the 128-wide bit bus: `(values, change-flags)`.
    fn read_bits(&self) -> Result<([bool; 128], [bool; 128])>;

    /// Burst-reads the 32-wide position bus: `(values, change-flags)`.
    fn read_positions(&self) -> Result<([u32; 32], [bool; 32])>;

    /// Short-table write: reset, burst fill, then word-count commit.
    fn write_short_table(
        &self,
        reset_reg: RegAddr,
        fill_reg: RegAddr,
        length_reg: RegAddr,
        words: &[u32],
        max_len: usize,
    ) -> Result<()>;

    fn open_long_table(&self, order: u32, base_reg: RegAddr, length_reg: RegAddr) -> Result<Box<dyn LongTableWriter>>;

    fn arm(&self) -> Result<()>;
    fn disarm(&self) -> Result<()>;

    fn open_stream(&self) -> Result<Box<dyn DmaStream>>;

    fn write_mac(&self, index: usize, octets: [u8; 6]) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_code_translates_fixed_table() {
        assert_eq!(CompletionCode::from_raw(0), CompletionCode::Ok);
        assert_eq!(CompletionCode::from_raw(2), CompletionCode::DriverDataOverrun);
        assert_eq!(CompletionCode::from_raw(99), CompletionCode::Unexpected(99));
    }

    #[test]
    fn reg_addr_packs_fields_into_distinct_words() {
        let a = RegAddr::new(1, 0, 0).word_index();
        let b = RegAddr::new(0, 1, 0).word_index();
        let c = RegAddr::new(0, 0, 1).word_index();
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_ne!(a, c);
    }
}
