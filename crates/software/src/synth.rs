//! The per-block control loop tying everything together.
//!
//! Once per audio block the orchestrator drains pending MIDI bytes into voice state, pushes the
//! per-voice note/gain/gate signals and the scanned analog readings into the DSP engine's control
//! parameters, and invokes `compute` to render the block. Dispatching the rendered samples to the
//! transmit exchange is the firmware's job — this type never touches hardware.
//!
//! Control wiring is discovered once at construction: the voice count from the engine's
//! `"polyphony"` metadata, the analog bindings from per-control `"analog"` tags, and the per-voice
//! parameter handles by name (`note_<i>`, `gain_<i>`, `gate_<i>`). A missing per-voice control
//! degrades to a no-op binding rather than failing — the engine simply has fewer knobs than we
//! would like.

use crate::analog::AnalogFrame;
use crate::dsp::{
    AnalogBinding, ControlId, DspEngine, MAX_BINDINGS, bind_analog_controls,
    polyphony_from_metadata,
};
use crate::midi::MidiParser;
use crate::voices::{MAX_VOICES, VoiceAllocator};
use tinyvec::ArrayVec;

/// Handles for one voice's control parameters. Any of them may be absent.
#[derive(Clone, Copy, Debug, Default)]
struct VoiceControls {
    note: Option<ControlId>,
    gain: Option<ControlId>,
    gate: Option<ControlId>,
}

/// The synthesizer control core: MIDI in, control parameters and rendered samples out.
pub struct Synth<D: DspEngine> {
    dsp: D,
    parser: MidiParser,
    voices: VoiceAllocator,
    bindings: ArrayVec<[AnalogBinding; MAX_BINDINGS]>,
    voice_controls: ArrayVec<[VoiceControls; MAX_VOICES]>,
}

impl<D: DspEngine> Synth<D> {
    /// Wires the control core to `dsp`, reporting MIDI events on `midi_channel` only.
    pub fn new(dsp: D, midi_channel: u8) -> Self {
        let polyphony = polyphony_from_metadata(&dsp);
        let voices = VoiceAllocator::new(polyphony);
        let bindings = bind_analog_controls(&dsp);

        let mut voice_controls: ArrayVec<[VoiceControls; MAX_VOICES]> = ArrayVec::new();
        for _ in 0..voices.polyphony() {
            voice_controls.push(VoiceControls::default());
        }
        for (index, desc) in dsp.controls().iter().enumerate() {
            let id = ControlId::from(index);
            for (prefix, pick) in [
                ("note_", 0usize),
                ("gain_", 1),
                ("gate_", 2),
            ] {
                let Some(rest) = desc.name.strip_prefix(prefix) else {
                    continue;
                };
                let Ok(voice) = rest.parse::<usize>() else {
                    continue;
                };
                if let Some(vc) = voice_controls.get_mut(voice) {
                    match pick {
                        0 => vc.note = Some(id),
                        1 => vc.gain = Some(id),
                        _ => vc.gate = Some(id),
                    }
                }
            }
        }

        Self {
            dsp,
            parser: MidiParser::new(midi_channel),
            voices,
            bindings,
            voice_controls,
        }
    }

    /// The voice allocator, for diagnostics.
    pub fn voices(&self) -> &VoiceAllocator {
        &self.voices
    }

    /// The wrapped engine.
    pub fn dsp(&self) -> &D {
        &self.dsp
    }

    /// Runs one control-loop iteration: drains `midi_bytes` into voice state, refreshes the
    /// DSP control parameters from voice state and `frame`, and renders `out`.
    ///
    /// Parameters are only ever written between `compute` calls, so a block cannot observe a
    /// half-applied update.
    pub fn process_block(&mut self, midi_bytes: &[u8], frame: &AnalogFrame, out: &mut [f32]) {
        for &byte in midi_bytes {
            if let Some(event) = self.parser.feed(byte) {
                self.voices.handle(event);
            }
        }

        for (i, vc) in self.voice_controls.iter().enumerate() {
            if let Some(id) = vc.note {
                self.dsp.set_control(id, self.voices.voice_note(i));
            }
            if let Some(id) = vc.gain {
                self.dsp.set_control(id, self.voices.voice_gain(i));
            }
            if let Some(id) = vc.gate {
                self.dsp.set_control(id, self.voices.voice_gate(i));
            }
        }

        for binding in &self.bindings {
            self.dsp
                .set_control(binding.control, binding.apply(frame.get(binding.channel)));
        }

        let frames = out.len();
        self.dsp.compute(frames, &[], &mut [out]);
    }
}
