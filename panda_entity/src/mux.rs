//! Bit/position bus state and capture-selection taxonomy. Two
//! fixed-width arrays cache the most recently refreshed
//! hardware values; every `bit_out`/`pos_out` field owns an index into
//! one of them plus a `CAPTURE` attribute selecting what derivation of
//! that slot, if any, is recorded during a capture.

use base::Mutex;
use panda_types::MuxNames;

pub const BIT_BUS_LEN: usize = 128;
pub const POS_BUS_LEN: usize = 32;

#[derive(Default)]
struct BusValues {
    bit_values: [bool; BIT_BUS_LEN],
    bit_changed: [bool; BIT_BUS_LEN],
    pos_values: [u32; POS_BUS_LEN],
    pos_changed: [bool; POS_BUS_LEN],
}

/// The shared bus-state object behind `state_mutex`: accessors take
/// immutable snapshots, never held across socket I/O.
pub struct BusState {
    values: Mutex<BusValues>,
}

impl Default for BusState {
    fn default() -> Self {
        BusState::new()
    }
}

impl BusState {
    pub fn new() -> BusState {
        BusState { values: Mutex::new(BusValues::default()) }
    }

    pub fn refresh_bits(&self, values: [bool; BIT_BUS_LEN], changed: [bool; BIT_BUS_LEN]) {
        let mut v = self.values.lock();
        v.bit_values = values;
        for i in 0..BIT_BUS_LEN {
            v.bit_changed[i] |= changed[i];
        }
    }

    pub fn refresh_positions(&self, values: [u32; POS_BUS_LEN], changed: [bool; POS_BUS_LEN]) {
        let mut v = self.values.lock();
        v.pos_values = values;
        for i in 0..POS_BUS_LEN {
            v.pos_changed[i] |= changed[i];
        }
    }

    pub fn bit(&self, index: usize) -> bool {
        self.values.lock().bit_values[index]
    }

    pub fn position(&self, index: usize) -> u32 {
        self.values.lock().pos_values[index]
    }

    /// Returns and clears the changed flag for a bit-bus slot (used by
    /// `bit_out`'s `read` refresh to decide whether its change index
    /// needs bumping).
    pub fn take_bit_changed(&self, index: usize) -> bool {
        let mut v = self.values.lock();
        std::mem::replace(&mut v.bit_changed[index], false)
    }

    pub fn take_position_changed(&self, index: usize) -> bool {
        let mut v = self.values.lock();
        std::mem::replace(&mut v.pos_changed[index], false)
    }
}

/// Resolves `bit_out`/`pos_out` field names for `bit_mux`/`pos_mux`
/// fields (`bit_in`/`pos_in`). Built once at startup from the entity
/// registry and handed to `panda_types::FieldType::format`/`parse`.
#[derive(Default)]
pub struct MuxTable {
    bit_names: Vec<Option<String>>,
    pos_names: Vec<Option<String>>,
}

impl MuxTable {
    pub fn new() -> MuxTable {
        MuxTable {
            bit_names: vec![None; BIT_BUS_LEN],
            pos_names: vec![None; POS_BUS_LEN],
        }
    }

    pub fn register_bit(&mut self, index: u32, name: String) {
        self.bit_names[index as usize] = Some(name);
    }

    pub fn register_position(&mut self, index: u32, name: String) {
        self.pos_names[index as usize] = Some(name);
    }
}

impl MuxNames for MuxTable {
    fn bit_name(&self, index: u32) -> Option<&str> {
        self.bit_names.get(index as usize)?.as_deref()
    }

    fn bit_index(&self, name: &str) -> Option<u32> {
        self.bit_names.iter().position(|n| n.as_deref() == Some(name)).map(|i| i as u32)
    }

    fn pos_name(&self, index: u32) -> Option<&str> {
        self.pos_names.get(index as usize)?.as_deref()
    }

    fn pos_index(&self, name: &str) -> Option<u32> {
        self.pos_names.iter().position(|n| n.as_deref() == Some(name)).map(|i| i as u32)
    }
}

/// The `capture_mode` taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    Scaled32,
    Scaled64,
    Average,
    StdDev,
    Unscaled,
    TsNormal,
    TsOffset,
}

/// One `CAPTURE` enum value. `No` means the field is not currently
/// captured; every other value both selects a [`CaptureMode`] and
/// implies which bus sub-field(s) must be requested from hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOption {
    No,
    Value,
    Diff,
    Sum,
    Mean,
    Min,
    Max,
    MinMax,
    MinMaxMean,
}

impl CaptureOption {
    pub fn name(&self) -> &'static str {
        match self {
            CaptureOption::No => "No",
            CaptureOption::Value => "Value",
            CaptureOption::Diff => "Diff",
            CaptureOption::Sum => "Sum",
            CaptureOption::Mean => "Mean",
            CaptureOption::Min => "Min",
            CaptureOption::Max => "Max",
            CaptureOption::MinMax => "Min Max",
            CaptureOption::MinMaxMean => "Min Max Mean",
        }
    }

    pub fn from_name(name: &str) -> Option<CaptureOption> {
        CaptureOption::ALL.iter().copied().find(|o| o.name() == name)
    }

    pub const ALL: [CaptureOption; 9] = [
        CaptureOption::No,
        CaptureOption::Value,
        CaptureOption::Diff,
        CaptureOption::Sum,
        CaptureOption::Mean,
        CaptureOption::Min,
        CaptureOption::Max,
        CaptureOption::MinMax,
        CaptureOption::MinMaxMean,
    ];

    /// `None` for `No` (field not captured), else the mode that applies.
    pub fn mode(&self) -> Option<CaptureMode> {
        match self {
            CaptureOption::No => None,
            CaptureOption::Value | CaptureOption::Diff | CaptureOption::Min | CaptureOption::Max => {
                Some(CaptureMode::Scaled32)
            }
            CaptureOption::Sum => Some(CaptureMode::Scaled64),
            CaptureOption::Mean | CaptureOption::MinMax | CaptureOption::MinMaxMean => Some(CaptureMode::Average),
        }
    }
}

/// What kind of `pos_out`/`ext_out` a field is, which bounds which
/// `CAPTURE` options are legal for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureCapability {
    Bit,
    PosPlain,
    PosAdc,
    PosEncoder,
    ExtTimestamp,
    ExtSamples,
    ExtBits,
}

impl CaptureCapability {
    pub fn from_name(name: &str) -> Option<CaptureCapability> {
        match name {
            "plain" => Some(CaptureCapability::PosPlain),
            "adc" => Some(CaptureCapability::PosAdc),
            "encoder" => Some(CaptureCapability::PosEncoder),
            _ => None,
        }
    }

    pub fn allowed_options(&self) -> &'static [CaptureOption] {
        match self {
            CaptureCapability::Bit => &[CaptureOption::No, CaptureOption::Value],
            CaptureCapability::PosPlain => &[CaptureOption::No, CaptureOption::Value],
            CaptureCapability::PosAdc => &[
                CaptureOption::No,
                CaptureOption::Value,
                CaptureOption::Mean,
                CaptureOption::Min,
                CaptureOption::Max,
                CaptureOption::MinMax,
                CaptureOption::MinMaxMean,
            ],
            CaptureCapability::PosEncoder => &[CaptureOption::No, CaptureOption::Value, CaptureOption::Diff],
            // `Value` selects TS_NORMAL (absolute raw ticks); `Diff`
            // selects TS_OFFSET (ticks relative to the first sample of
            // the capture session) — see DESIGN.md.
            CaptureCapability::ExtTimestamp => &[CaptureOption::No, CaptureOption::Value, CaptureOption::Diff],
            CaptureCapability::ExtSamples => &[CaptureOption::No, CaptureOption::Value],
            CaptureCapability::ExtBits => &[CaptureOption::No, CaptureOption::Value],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bus_refresh_round_trips_values() {
        let bus = BusState::new();
        let mut values = [false; BIT_BUS_LEN];
        values[5] = true;
        let mut changed = [false; BIT_BUS_LEN];
        changed[5] = true;
        bus.refresh_bits(values, changed);
        assert!(bus.bit(5));
        assert!(bus.take_bit_changed(5));
        assert!(!bus.take_bit_changed(5));
    }

    #[test]
    fn mux_table_resolves_both_directions() {
        let mut table = MuxTable::new();
        table.register_bit(3, "TTLIN1.VAL".to_string());
        assert_eq!(table.bit_name(3), Some("TTLIN1.VAL"));
        assert_eq!(table.bit_index("TTLIN1.VAL"), Some(3));
        assert_eq!(table.bit_index("NOPE"), None);
    }

    #[test]
    fn adc_allows_statistics_plain_does_not() {
        assert!(CaptureCapability::PosAdc.allowed_options().contains(&CaptureOption::Mean));
        assert!(!CaptureCapability::PosPlain.allowed_options().contains(&CaptureOption::Mean));
    }
}
