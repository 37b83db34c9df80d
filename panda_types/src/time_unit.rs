/// FPGA clock period backing every `TIME` field's raw tick count. The
/// capture pipeline's `SCALED` timestamp conversion (raw * 8 ns) uses the
/// same constant, so it lives here rather than being duplicated.
pub const CLOCK_PERIOD_NS: f64 = 8.0;

/// Display unit for a `time(prescale)` field, selected per-field by its
/// `.UNITS` attribute and persisted like any other setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Min,
    Sec,
    Milli,
    Micro,
}

impl TimeUnit {
    pub fn from_name(name: &str) -> Option<TimeUnit> {
        match name {
            "min" => Some(TimeUnit::Min),
            "s" => Some(TimeUnit::Sec),
            "ms" => Some(TimeUnit::Milli),
            "us" => Some(TimeUnit::Micro),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TimeUnit::Min => "min",
            TimeUnit::Sec => "s",
            TimeUnit::Milli => "ms",
            TimeUnit::Micro => "us",
        }
    }

    fn seconds_per_unit(&self) -> f64 {
        match self {
            TimeUnit::Min => 60.0,
            TimeUnit::Sec => 1.0,
            TimeUnit::Milli => 1e-3,
            TimeUnit::Micro => 1e-6,
        }
    }

    /// Converts a raw FPGA-clock tick count into this unit's display value.
    pub fn ticks_to_value(&self, ticks: u64) -> f64 {
        let seconds = ticks as f64 * CLOCK_PERIOD_NS * 1e-9;
        seconds / self.seconds_per_unit()
    }

    /// Converts a display value in this unit back into FPGA-clock ticks.
    pub fn value_to_ticks(&self, value: f64) -> u64 {
        let seconds = value * self.seconds_per_unit();
        (seconds / (CLOCK_PERIOD_NS * 1e-9)).round() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seconds_round_trip() {
        let unit = TimeUnit::Sec;
        let ticks = unit.value_to_ticks(1.0);
        // 1s / 8ns = 125_000_000 ticks
        assert_eq!(ticks, 125_000_000);
        assert!((unit.ticks_to_value(ticks) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn milliseconds_scale() {
        let unit = TimeUnit::Milli;
        let ticks = unit.value_to_ticks(10.0);
        assert_eq!(unit.ticks_to_value(ticks).round(), 10.0);
    }
}
