//! Dual-ADC multiplexed analog input scanning.
//!
//! Four 8-input multiplexers share three select lines; two physical ADCs each sample two fixed
//! inputs per multiplexer position, yielding up to 32 logical channels. The [`ScanSequencer`] is
//! the pure state machine behind the scan: the firmware drives the select lines and ADCs, reports
//! each conversion result here, and is told what to do next. A scan is re-triggered on a fixed
//! timer period and is a no-op while the previous scan is still in flight, so the scan cadence is
//! fully decoupled from the control loop.
//!
//! Scanned values land in an [`AnalogFrame`], normalized to `0.0..=1.0`. Each channel slot is
//! written only by its owning ADC/position combination and only when that conversion completes,
//! so the frame never exposes a torn or partial reading.

use core::sync::atomic::{AtomicU32, Ordering};

/// Number of multiplexer positions per scan cycle.
pub const MUX_POSITIONS: usize = 8;

/// Number of logical analog channels (2 ADCs x 2 conversions x 8 positions).
pub const ANALOG_CHANNELS: usize = 32;

/// Scale factor turning a raw 12-bit reading into `0.0..=1.0`.
const ADC_SCALE: f32 = 1.0 / 4095.0;

/// The shared array of normalized analog readings.
///
/// Written from the ADC completion context, read by the control loop; individual slots go through
/// acquire/release atomics so a reader always sees a fully written value.
pub struct AnalogFrame {
    values: [AtomicU32; ANALOG_CHANNELS],
}

impl AnalogFrame {
    /// Constructs a frame with every channel at 0.0.
    pub const fn new() -> Self {
        Self {
            values: [const { AtomicU32::new(0) }; ANALOG_CHANNELS],
        }
    }

    /// Most recently completed reading for `channel`, or 0.0 for an out-of-range index.
    pub fn get(&self, channel: usize) -> f32 {
        self.values
            .get(channel)
            .map_or(0.0, |v| f32::from_bits(v.load(Ordering::Acquire)))
    }

    /// Publishes a completed reading.
    fn store(&self, channel: usize, value: f32) {
        if let Some(v) = self.values.get(channel) {
            v.store(value.to_bits(), Ordering::Release);
        }
    }
}

impl Default for AnalogFrame {
    fn default() -> Self {
        Self::new()
    }
}

/// One of the two physical ADCs taking part in the scan.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AdcUnit {
    /// First ADC, converting inputs 0 then 1.
    A,
    /// Second ADC, converting inputs 2 then 3.
    B,
}

impl AdcUnit {
    fn index(self) -> usize {
        match self {
            Self::A => 0,
            Self::B => 1,
        }
    }

    /// Input converted first at each multiplexer position.
    pub fn primary_input(self) -> u8 {
        match self {
            Self::A => 0,
            Self::B => 2,
        }
    }

    /// Input converted second, after the primary conversion completes.
    pub fn secondary_input(self) -> u8 {
        match self {
            Self::A => 1,
            Self::B => 3,
        }
    }
}

/// What the hardware layer must do after reporting a conversion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ScanAction {
    /// Switch the reporting ADC to `input` and start its second conversion.
    ConvertSecondary {
        /// ADC input number to select.
        input: u8,
    },
    /// This ADC has finished both conversions; the other one is still working.
    Wait,
    /// Both ADCs have finished both conversions. Drive the multiplexer select lines to
    /// `next_position`; the scan is complete and may be re-triggered.
    Advance {
        /// The new multiplexer position.
        next_position: u8,
    },
}

/// Instructions for starting a scan: the primary input to select on each ADC.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ScanStart {
    /// Primary inputs for [`AdcUnit::A`] and [`AdcUnit::B`], in that order.
    pub inputs: [u8; 2],
}

/// State machine sequencing the dual-ADC scan across multiplexer positions.
pub struct ScanSequencer {
    position: usize,
    /// Completed conversions (0, 1 or 2) per ADC for the current position.
    conversions: [u8; 2],
    pending: bool,
}

impl ScanSequencer {
    /// Constructs a sequencer at multiplexer position 0 with no scan in flight.
    pub const fn new() -> Self {
        Self {
            position: 0,
            conversions: [0; 2],
            pending: false,
        }
    }

    /// Current multiplexer position.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Whether a scan is currently in flight.
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Triggers a new scan. Returns `None` (a no-op) while the previous scan has not fully
    /// completed; this is what keeps the fixed-period trigger timer harmless.
    pub fn begin(&mut self) -> Option<ScanStart> {
        if self.pending {
            return None;
        }
        self.conversions = [0; 2];
        self.pending = true;
        Some(ScanStart {
            inputs: [AdcUnit::A.primary_input(), AdcUnit::B.primary_input()],
        })
    }

    /// Reports a completed conversion on `unit`, storing the normalized reading into `frame`,
    /// and returns the next step for the hardware layer.
    pub fn conversion_complete(
        &mut self,
        unit: AdcUnit,
        raw: u16,
        frame: &AnalogFrame,
    ) -> ScanAction {
        let u = unit.index();
        let conversion = usize::from(self.conversions[u].min(1));
        frame.store(
            channel_index(self.position, unit, conversion),
            f32::from(raw) * ADC_SCALE,
        );
        self.conversions[u] += 1;

        if self.conversions[u] == 1 {
            return ScanAction::ConvertSecondary {
                input: unit.secondary_input(),
            };
        }

        if self.conversions.iter().all(|&c| c > 1) {
            self.position = (self.position + 1) % MUX_POSITIONS;
            self.conversions = [0; 2];
            self.pending = false;
            ScanAction::Advance {
                next_position: self.position as u8,
            }
        } else {
            ScanAction::Wait
        }
    }
}

impl Default for ScanSequencer {
    fn default() -> Self {
        Self::new()
    }
}

/// Channel index a conversion result is stored at: one block of 8 positions per
/// (ADC, conversion) combination.
pub fn channel_index(position: usize, unit: AdcUnit, conversion: usize) -> usize {
    position + 16 * unit.index() + 8 * conversion
}
