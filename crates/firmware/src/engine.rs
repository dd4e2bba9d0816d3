//! Built-in wavetable voice engine.
//!
//! A six-voice engine exposing the control surface the orchestrator expects: `note_<i>`,
//! `gain_<i>` and `gate_<i>` parameters per voice, a wavetable position and a master volume
//! bound to front-panel potentiometers, and a `"polyphony"` metadata entry. Each voice is a
//! phase accumulator reading from a decoded wavetable bank; gates are smoothed into a short
//! attack/release ramp so note edges don't click.

use polywave_lib::dsp::{ControlDesc, ControlId, DspEngine};
use polywave_lib::wavetable::{WavetableBank, decode_wavetables};

/// Voices rendered by this engine, mirrored in the `"polyphony"` metadata below.
pub const POLYPHONY: usize = 6;

const SAMPLE_RATE: f32 = 48_000.0;

/// One-pole gate smoothing coefficient, roughly a 3ms ramp at 48kHz.
const GATE_RAMP: f32 = 0.007;

/// Headroom so six voices at full velocity stay inside full scale.
const MASTER_GAIN: f32 = 0.15;

/// A single factory wavetable: key frames every 20 slots, morphing through the raw waveform
/// space from one end of the table to the other.
const FACTORY_TABLES: &[u8] = &[0x00, 0, 0, 20, 20, 40, 40, 60, 60];

const NOTE: [usize; POLYPHONY] = [0, 3, 6, 9, 12, 15];
const GAIN: [usize; POLYPHONY] = [1, 4, 7, 10, 13, 16];
const GATE: [usize; POLYPHONY] = [2, 5, 8, 11, 14, 17];
const TABLE_POS: usize = 18;
const VOLUME: usize = 19;

const CONTROLS: &[ControlDesc] = &[
    ControlDesc { name: "note_0", min: 0.0, max: 127.0, default: 0.0, step: 0.01, metadata: &[] },
    ControlDesc { name: "gain_0", min: 0.0, max: 2.0, default: 0.0, step: 0.01, metadata: &[] },
    ControlDesc { name: "gate_0", min: 0.0, max: 1.0, default: 0.0, step: 1.0, metadata: &[] },
    ControlDesc { name: "note_1", min: 0.0, max: 127.0, default: 0.0, step: 0.01, metadata: &[] },
    ControlDesc { name: "gain_1", min: 0.0, max: 2.0, default: 0.0, step: 0.01, metadata: &[] },
    ControlDesc { name: "gate_1", min: 0.0, max: 1.0, default: 0.0, step: 1.0, metadata: &[] },
    ControlDesc { name: "note_2", min: 0.0, max: 127.0, default: 0.0, step: 0.01, metadata: &[] },
    ControlDesc { name: "gain_2", min: 0.0, max: 2.0, default: 0.0, step: 0.01, metadata: &[] },
    ControlDesc { name: "gate_2", min: 0.0, max: 1.0, default: 0.0, step: 1.0, metadata: &[] },
    ControlDesc { name: "note_3", min: 0.0, max: 127.0, default: 0.0, step: 0.01, metadata: &[] },
    ControlDesc { name: "gain_3", min: 0.0, max: 2.0, default: 0.0, step: 0.01, metadata: &[] },
    ControlDesc { name: "gate_3", min: 0.0, max: 1.0, default: 0.0, step: 1.0, metadata: &[] },
    ControlDesc { name: "note_4", min: 0.0, max: 127.0, default: 0.0, step: 0.01, metadata: &[] },
    ControlDesc { name: "gain_4", min: 0.0, max: 2.0, default: 0.0, step: 0.01, metadata: &[] },
    ControlDesc { name: "gate_4", min: 0.0, max: 1.0, default: 0.0, step: 1.0, metadata: &[] },
    ControlDesc { name: "note_5", min: 0.0, max: 127.0, default: 0.0, step: 0.01, metadata: &[] },
    ControlDesc { name: "gain_5", min: 0.0, max: 2.0, default: 0.0, step: 0.01, metadata: &[] },
    ControlDesc { name: "gate_5", min: 0.0, max: 1.0, default: 0.0, step: 1.0, metadata: &[] },
    ControlDesc {
        name: "table_pos",
        min: 0.0,
        max: 0.999,
        default: 0.0,
        step: 0.001,
        metadata: &[("analog", "a3")],
    },
    ControlDesc {
        name: "volume",
        min: 0.0,
        max: 1.0,
        default: 0.7,
        step: 0.01,
        metadata: &[("analog", "a5")],
    },
];

const METADATA: &[(&str, &str)] = &[("name", "polywave"), ("polyphony", "6")];

#[derive(Clone, Copy, Default)]
struct Voice {
    phase: f32,
    level: f32,
}

/// Raw waveform `wave_id` (0..=60) sampled at `phase` in `[0, 1)`: a morph from sawtooth at one
/// end of the id space to triangle at the other.
fn wave_sample(wave_id: u8, phase: f32) -> f32 {
    let saw = 2.0 * phase - 1.0;
    let tri = 1.0 - 4.0 * libm::fabsf(phase - 0.5);
    let t = f32::from(wave_id) / 60.0;
    saw + (tri - saw) * t
}

/// The engine behind the orchestrator's [`DspEngine`] seam.
pub struct WavetableEngine {
    values: [f32; CONTROLS.len()],
    voices: [Voice; POLYPHONY],
    bank: WavetableBank,
}

impl WavetableEngine {
    /// Builds the engine with its factory wavetable bank and every control at its default.
    pub fn new() -> Self {
        let mut values = [0.0f32; CONTROLS.len()];
        for (value, desc) in values.iter_mut().zip(CONTROLS) {
            *value = desc.default;
        }
        Self {
            values,
            voices: [Voice::default(); POLYPHONY],
            bank: decode_wavetables(FACTORY_TABLES),
        }
    }
}

impl Default for WavetableEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DspEngine for WavetableEngine {
    fn controls(&self) -> &[ControlDesc] {
        CONTROLS
    }

    fn metadata(&self) -> &[(&'static str, &'static str)] {
        METADATA
    }

    fn set_control(&mut self, id: ControlId, value: f32) {
        if let Some(slot) = self.values.get_mut(id.index()) {
            *slot = value;
        }
    }

    fn compute(&mut self, frames: usize, _inputs: &[&[f32]], outputs: &mut [&mut [f32]]) {
        let Some(out) = outputs.first_mut() else {
            return;
        };

        // The table position only changes between blocks, so the crossfade pair is constant
        // for the whole render.
        let crossfade = self.bank.first().map(|table| {
            table.get_interpolation_data(self.values[TABLE_POS].clamp(0.0, 0.999))
        });
        let volume = self.values[VOLUME] * MASTER_GAIN;

        for sample in out.iter_mut().take(frames) {
            let mut mix = 0.0f32;
            for (i, voice) in self.voices.iter_mut().enumerate() {
                let gate = self.values[GATE[i]];
                voice.level += (gate - voice.level) * GATE_RAMP;
                if voice.level < 1e-4 {
                    continue;
                }

                let note = self.values[NOTE[i]];
                let freq = 440.0 * libm::exp2f((note - 69.0) / 12.0);
                voice.phase += freq / SAMPLE_RATE;
                if voice.phase >= 1.0 {
                    voice.phase -= 1.0;
                }

                let Some((wave_a, wave_b, factor)) = crossfade else {
                    continue;
                };
                let a = wave_sample(wave_a, voice.phase);
                let b = wave_sample(wave_b, voice.phase);
                mix += (a + (b - a) * factor) * self.values[GAIN[i]] * voice.level;
            }
            *sample = mix * volume;
        }
    }
}
