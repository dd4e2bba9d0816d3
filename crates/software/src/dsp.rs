//! Contract with the external DSP voice engine.
//!
//! The numeric voice engine is generated code and lives outside this crate; we consume it
//! through [`DspEngine`]: a `compute` call plus a discovered table of named control parameters
//! and string-keyed metadata. Controls are addressed by [`ControlId`] — a stable integer handle
//! issued at engine initialization — rather than by raw parameter address.
//!
//! Two pieces of metadata drive the orchestrator's startup wiring:
//! - the global key `"polyphony"` sets the voice count (defaulting to 1);
//! - a per-control key `"analog"` names a physical input connector and pin (`"a1"`..`"d10"`),
//!   binding that control to an analog scan channel for continuous per-block updates.

use tinyvec::ArrayVec;

/// Metadata key naming the physical analog input a control is wired to.
pub const ANALOG_METADATA_KEY: &str = "analog";

/// Global metadata key carrying the engine's voice count.
pub const POLYPHONY_METADATA_KEY: &str = "polyphony";

/// Upper bound on analog control bindings.
pub const MAX_BINDINGS: usize = 32;

/// Stable handle for one control parameter, valid for the lifetime of the engine that issued it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ControlId(usize);

impl ControlId {
    /// Index of the control in the engine's descriptor table.
    pub fn index(self) -> usize {
        self.0
    }
}

impl From<usize> for ControlId {
    fn from(index: usize) -> Self {
        Self(index)
    }
}

/// Descriptor of one named control parameter exposed by the engine.
#[derive(Clone, Copy, Debug)]
pub struct ControlDesc {
    /// Parameter name, e.g. `"cutoff"` or `"gate_0"`.
    pub name: &'static str,
    /// Lower bound of the parameter range.
    pub min: f32,
    /// Upper bound of the parameter range.
    pub max: f32,
    /// Startup value.
    pub default: f32,
    /// Declared step size (informational; the control core does not quantize).
    pub step: f32,
    /// Arbitrary string-keyed metadata declared alongside the control.
    pub metadata: &'static [(&'static str, &'static str)],
}

impl ControlDesc {
    /// Looks up a metadata value by key.
    pub fn metadata_value(&self, key: &str) -> Option<&'static str> {
        self.metadata
            .iter()
            .find(|(k, _)| *k == key)
            .map(|&(_, v)| v)
    }
}

/// The external voice engine as seen by the control core.
pub trait DspEngine {
    /// Control descriptor table. A control's position in this slice is its [`ControlId`].
    fn controls(&self) -> &[ControlDesc];

    /// Global engine metadata.
    fn metadata(&self) -> &[(&'static str, &'static str)];

    /// Writes a control parameter. Called between `compute` invocations only, never during one,
    /// so a block is always rendered from a consistent parameter set.
    fn set_control(&mut self, id: ControlId, value: f32);

    /// Renders `frames` samples into `outputs` from `inputs`.
    fn compute(&mut self, frames: usize, inputs: &[&[f32]], outputs: &mut [&mut [f32]]);

    /// Handle for the control named `name`, if the engine exposes one.
    fn control_by_name(&self, name: &str) -> Option<ControlId> {
        self.controls()
            .iter()
            .position(|c| c.name == name)
            .map(ControlId)
    }

    /// Global metadata value for `key`.
    fn metadata_value(&self, key: &str) -> Option<&'static str> {
        self.metadata()
            .iter()
            .find(|(k, _)| *k == key)
            .map(|&(_, v)| v)
    }
}

/// Voice count declared by the engine, defaulting to 1 when the metadata is absent or
/// unparseable.
pub fn polyphony_from_metadata(dsp: &impl DspEngine) -> usize {
    dsp.metadata_value(POLYPHONY_METADATA_KEY)
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|&n| n > 0)
        .unwrap_or(1)
}

/// Reasons an `"analog"` metadata value does not name a physical input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PinError {
    /// The name is shorter than a connector letter plus a pin number.
    TooShort,
    /// The connector letter is not one of `a`..`d`.
    BadConnector,
    /// The pin number is not in `1..=10`.
    BadPin,
}

/// Multiplexer input for each connector pin. Pins 1 and 2 carry VCC and GND and resolve to
/// input 0, as does pin 7; the remaining pins follow the board routing.
const PIN_TO_MUX_INPUT: [usize; 10] = [0, 0, 1, 6, 2, 4, 0, 7, 3, 5];

/// Decodes a physical input name (`"<letter a-d><pin 1-10>"`, e.g. `"b3"`) into an analog scan
/// channel index.
pub fn analog_input_channel(name: &str) -> Result<usize, PinError> {
    let bytes = name.as_bytes();
    if bytes.len() < 2 {
        return Err(PinError::TooShort);
    }

    let connector = match bytes[0].to_ascii_lowercase() {
        c @ b'a'..=b'd' => usize::from(c - b'a'),
        _ => return Err(PinError::BadConnector),
    };

    let pin: usize = name[1..].parse().map_err(|_| PinError::BadPin)?;
    if !(1..=10).contains(&pin) {
        return Err(PinError::BadPin);
    }

    Ok(connector * 8 + PIN_TO_MUX_INPUT[pin - 1])
}

/// One control kept in continuous sync with an analog scan channel.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct AnalogBinding {
    /// The bound control.
    pub control: ControlId,
    /// Scan channel index feeding it.
    pub channel: usize,
    /// Lower bound of the control range; the normalized reading is mapped onto
    /// `min..=max` linearly.
    pub min: f32,
    /// Upper bound of the control range.
    pub max: f32,
}

impl AnalogBinding {
    /// Maps a normalized analog reading onto the control's declared range.
    pub fn apply(&self, normalized: f32) -> f32 {
        self.min + (self.max - self.min) * normalized
    }
}

/// Derives the analog control bindings from the engine's metadata. Controls without an
/// `"analog"` tag, or with one that does not decode to a physical input, are left unbound.
pub fn bind_analog_controls(dsp: &impl DspEngine) -> ArrayVec<[AnalogBinding; MAX_BINDINGS]> {
    let mut bindings = ArrayVec::new();
    for (index, desc) in dsp.controls().iter().enumerate() {
        let Some(name) = desc.metadata_value(ANALOG_METADATA_KEY) else {
            continue;
        };
        let Ok(channel) = analog_input_channel(name) else {
            continue;
        };
        let binding = AnalogBinding {
            control: ControlId(index),
            channel,
            min: desc.min,
            max: desc.max,
        };
        if bindings.try_push(binding).is_some() {
            break;
        }
    }
    bindings
}
