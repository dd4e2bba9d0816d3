//! Polyphonic voice allocation with voice stealing.
//!
//! A fixed pool of voice slots is shared between all sounding notes. Idle and busy voices are
//! tracked in two fixed-capacity ring queues which always partition the full id range; when a
//! note arrives and no voice is idle, the oldest busy voice is stolen (FIFO order, so the note
//! held longest is evicted first). The per-voice note/gain/gate values are the continuous control
//! signals handed to the DSP engine each block.

use crate::midi::MidiEvent;

/// Upper bound on the voice pool. The effective polyphony is usually discovered from DSP metadata
/// at startup and is clamped to this.
pub const MAX_VOICES: usize = 16;

/// Pitch-bend range in semitones at full wheel deflection.
const BEND_SEMITONES: f32 = 2.0;

/// Fixed-capacity FIFO of voice ids backed by a ring buffer. No allocation, no spare capacity
/// beyond the voice cap.
#[derive(Clone, Debug)]
struct VoiceQueue {
    slots: [u8; MAX_VOICES],
    head: usize,
    len: usize,
}

impl VoiceQueue {
    const fn new() -> Self {
        Self {
            slots: [0; MAX_VOICES],
            head: 0,
            len: 0,
        }
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.len
    }

    /// Appends an id. The queues can never hold more than `MAX_VOICES` ids between them, so a
    /// full queue indicates a broken partition invariant; the push is dropped in that case.
    fn push_back(&mut self, id: u8) {
        if self.len < MAX_VOICES {
            self.slots[(self.head + self.len) % MAX_VOICES] = id;
            self.len += 1;
        }
    }

    fn pop_front(&mut self) -> Option<u8> {
        if self.len == 0 {
            return None;
        }
        let id = self.slots[self.head];
        self.head = (self.head + 1) % MAX_VOICES;
        self.len -= 1;
        Some(id)
    }

    /// Removes the first occurrence of `id`, preserving the order of the remaining entries.
    /// Returns whether the id was present.
    fn remove(&mut self, id: u8) -> bool {
        for i in 0..self.len {
            if self.slots[(self.head + i) % MAX_VOICES] == id {
                // Shift everything behind the hole forward by one.
                for j in i..self.len - 1 {
                    self.slots[(self.head + j) % MAX_VOICES] =
                        self.slots[(self.head + j + 1) % MAX_VOICES];
                }
                self.len -= 1;
                return true;
            }
        }
        false
    }

    #[cfg(test)]
    fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        (0..self.len).map(move |i| self.slots[(self.head + i) % MAX_VOICES])
    }
}

/// Maps MIDI key events onto a fixed pool of voice slots.
///
/// The allocator owns three per-voice control signals consumed by the DSP engine:
/// the note number, a gain derived from strike velocity, and a 0/1 gate driving the
/// amplitude envelope. Voice slots are never destroyed — releasing a key only clears
/// the gate, leaving note and gain in place for a natural envelope release.
pub struct VoiceAllocator {
    polyphony: usize,
    idle: VoiceQueue,
    busy: VoiceQueue,
    /// Key number → voice id currently sounding it. Always the exact inverse of the busy
    /// queue's key assignments.
    key_to_voice: [Option<u8>; 128],
    /// Voice id → key it is assigned to, used to unmap a stolen voice's previous key.
    assigned_key: [Option<u8>; MAX_VOICES],
    notes: [f32; MAX_VOICES],
    gains: [f32; MAX_VOICES],
    gates: [f32; MAX_VOICES],
    /// Normalized pitch-bend offset, -1.0..=1.0 around center.
    bend: f32,
}

impl VoiceAllocator {
    /// Constructs an allocator with `polyphony` voices (clamped to `1..=MAX_VOICES`), all idle.
    pub fn new(polyphony: usize) -> Self {
        let polyphony = polyphony.clamp(1, MAX_VOICES);
        let mut idle = VoiceQueue::new();
        for id in 0..polyphony {
            idle.push_back(id as u8);
        }
        Self {
            polyphony,
            idle,
            busy: VoiceQueue::new(),
            key_to_voice: [None; 128],
            assigned_key: [None; MAX_VOICES],
            notes: [0.0; MAX_VOICES],
            gains: [0.0; MAX_VOICES],
            gates: [0.0; MAX_VOICES],
            bend: 0.0,
        }
    }

    /// Number of voices in the pool.
    pub fn polyphony(&self) -> usize {
        self.polyphony
    }

    /// Routes a decoded MIDI event into voice state. Controller and program changes are not
    /// the allocator's business and are ignored here.
    pub fn handle(&mut self, event: MidiEvent) {
        match event {
            MidiEvent::NoteOn { key, velocity } => self.note_on(key, velocity),
            MidiEvent::NoteOff { key, velocity } => self.note_off(key, velocity),
            MidiEvent::PitchBend { value } => self.pitch_bend(value),
            MidiEvent::Reset => self.reset(),
            MidiEvent::ControllerChange { .. } | MidiEvent::ProgramChange { .. } => {}
        }
    }

    /// Assigns a voice to `key`, stealing the oldest busy voice if none is idle.
    pub fn note_on(&mut self, key: u8, velocity: u8) {
        if key > 127 {
            return;
        }

        // Prevent one key from ever mapping to two voices.
        self.note_off(key, 0);

        let id = match self.idle.pop_front() {
            Some(id) => id,
            None => {
                // Steal the oldest still-held note and unmap its key.
                let Some(id) = self.busy.pop_front() else {
                    return;
                };
                if let Some(old_key) = self.assigned_key[usize::from(id)].take() {
                    self.key_to_voice[usize::from(old_key)] = None;
                }
                id
            }
        };

        self.busy.push_back(id);
        self.key_to_voice[usize::from(key)] = Some(id);
        self.assigned_key[usize::from(id)] = Some(key);

        let n = usize::from(id);
        self.notes[n] = f32::from(key);
        self.gains[n] = f32::from(velocity) * (1.0 / 64.0);
        self.gates[n] = 1.0;
    }

    /// Releases the voice sounding `key`, if any, by clearing its gate. Note and gain are
    /// retained so the DSP envelope can ring out.
    pub fn note_off(&mut self, key: u8, _velocity: u8) {
        if key > 127 {
            return;
        }

        let Some(id) = self.key_to_voice[usize::from(key)].take() else {
            return;
        };
        self.assigned_key[usize::from(id)] = None;

        if self.busy.remove(id) {
            self.idle.push_back(id);
        }
        self.gates[usize::from(id)] = 0.0;
    }

    /// Returns every busy voice to the idle queue and clears all key mappings.
    ///
    /// Per-voice gain and gate are deliberately left untouched; a caller that needs immediate
    /// silence must clear the gates itself (the DSP envelope otherwise decays naturally).
    pub fn reset(&mut self) {
        while let Some(id) = self.busy.pop_front() {
            self.idle.push_back(id);
            self.assigned_key[usize::from(id)] = None;
        }
        self.key_to_voice = [None; 128];
    }

    /// Records a 14-bit pitch-bend value (centered at 8192). The bend is applied to the
    /// reported note values at read time, not stored per voice.
    pub fn pitch_bend(&mut self, value: u16) {
        self.bend = (f32::from(value) - 8192.0) * (1.0 / 8192.0);
    }

    /// Note control signal for voice `n`, with the pitch-bend offset applied.
    pub fn voice_note(&self, n: usize) -> f32 {
        self.notes.get(n).copied().unwrap_or(0.0) + self.bend * BEND_SEMITONES
    }

    /// Gain control signal for voice `n`.
    pub fn voice_gain(&self, n: usize) -> f32 {
        self.gains.get(n).copied().unwrap_or(0.0)
    }

    /// Gate control signal for voice `n` (1.0 sustains, 0.0 releases).
    pub fn voice_gate(&self, n: usize) -> f32 {
        self.gates.get(n).copied().unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Asserts that the idle and busy queues are disjoint and together cover the whole id range.
    fn assert_partition(alloc: &VoiceAllocator) {
        let mut seen = [0u8; MAX_VOICES];
        for id in alloc.idle.iter().chain(alloc.busy.iter()) {
            seen[usize::from(id)] += 1;
        }
        for id in 0..alloc.polyphony {
            assert_eq!(1, seen[id], "Voice {id} must appear in exactly one queue");
        }
        assert_eq!(
            alloc.polyphony,
            alloc.idle.len() + alloc.busy.len(),
            "Queues must partition the id range"
        );
    }

    #[test]
    fn note_on_acquires_an_idle_voice() {
        let mut alloc = VoiceAllocator::new(4);
        alloc.note_on(60, 64);

        assert_eq!(Some(0), alloc.key_to_voice[60]);
        assert_eq!(60.0, alloc.voice_note(0));
        assert_eq!(1.0, alloc.voice_gain(0));
        assert_eq!(1.0, alloc.voice_gate(0));
        assert_partition(&alloc);
    }

    #[test]
    fn note_off_clears_gate_but_keeps_note_and_gain() {
        let mut alloc = VoiceAllocator::new(4);
        alloc.note_on(60, 127);
        alloc.note_off(60, 0);

        assert_eq!(None, alloc.key_to_voice[60]);
        assert_eq!(60.0, alloc.voice_note(0), "Note is retained for release");
        assert!(alloc.voice_gain(0) > 1.9, "Gain is retained for release");
        assert_eq!(0.0, alloc.voice_gate(0));
        assert_partition(&alloc);
    }

    #[test]
    fn note_off_for_unmapped_key_is_a_no_op() {
        let mut alloc = VoiceAllocator::new(2);
        alloc.note_on(60, 64);
        alloc.note_off(61, 0);

        assert_eq!(Some(0), alloc.key_to_voice[60]);
        assert_partition(&alloc);
    }

    #[test]
    fn repeated_note_on_maps_the_key_to_exactly_one_voice() {
        let mut alloc = VoiceAllocator::new(4);
        alloc.note_on(60, 64);
        alloc.note_on(60, 100);

        let mapped = alloc
            .key_to_voice
            .iter()
            .filter(|v| v.is_some())
            .count();
        assert_eq!(1, mapped, "Key 60 must be mapped to exactly one voice");
        assert_partition(&alloc);
    }

    #[test]
    fn stealing_evicts_the_oldest_note_first() {
        let mut alloc = VoiceAllocator::new(2);
        alloc.note_on(60, 64); // voice 0, oldest
        alloc.note_on(62, 64); // voice 1
        alloc.note_on(64, 64); // pool exhausted: steals voice 0

        assert_eq!(None, alloc.key_to_voice[60], "Oldest note must be unmapped");
        assert_eq!(Some(0), alloc.key_to_voice[64]);
        assert_eq!(Some(1), alloc.key_to_voice[62], "Newer note must survive");
        assert_eq!(64.0, alloc.voice_note(0));
        assert_partition(&alloc);
    }

    #[test]
    fn steal_order_is_fifo_across_many_notes() {
        let mut alloc = VoiceAllocator::new(3);
        for key in [60, 61, 62, 63, 64] {
            alloc.note_on(key, 64);
            assert_partition(&alloc);
        }
        // 60 and 61 were stolen; 62..=64 remain.
        assert_eq!(None, alloc.key_to_voice[60]);
        assert_eq!(None, alloc.key_to_voice[61]);
        for key in [62u8, 63, 64] {
            assert!(alloc.key_to_voice[usize::from(key)].is_some());
        }
    }

    #[test]
    fn released_voice_is_reused_before_stealing() {
        let mut alloc = VoiceAllocator::new(2);
        alloc.note_on(60, 64);
        alloc.note_on(62, 64);
        alloc.note_off(60, 0);
        alloc.note_on(64, 64);

        assert_eq!(
            Some(1),
            alloc.key_to_voice[62],
            "Held note must not be stolen while an idle voice exists"
        );
        assert_partition(&alloc);
    }

    #[test]
    fn reset_idles_everything_without_touching_gates() {
        let mut alloc = VoiceAllocator::new(4);
        alloc.note_on(60, 64);
        alloc.note_on(62, 64);
        alloc.reset();

        assert!(alloc.busy.is_empty());
        assert_eq!(4, alloc.idle.len());
        assert!(alloc.key_to_voice.iter().all(Option::is_none));
        assert_eq!(1.0, alloc.voice_gate(0), "Reset leaves gates as-is");
        assert_partition(&alloc);
    }

    #[test]
    fn pitch_bend_offsets_reported_notes_at_read_time() {
        let mut alloc = VoiceAllocator::new(1);
        alloc.note_on(60, 64);

        alloc.pitch_bend(16383); // nearly +2 semitones
        assert!(alloc.voice_note(0) > 61.9 && alloc.voice_note(0) <= 62.0);

        alloc.pitch_bend(0); // -2 semitones
        assert_eq!(58.0, alloc.voice_note(0));

        alloc.pitch_bend(8192); // center
        assert_eq!(60.0, alloc.voice_note(0));
    }

    #[test]
    fn velocity_scales_gain_by_one_sixty_fourth() {
        let mut alloc = VoiceAllocator::new(1);
        alloc.note_on(60, 32);
        assert_eq!(0.5, alloc.voice_gain(0));
    }

    #[test]
    fn polyphony_is_clamped_to_the_pool_bound() {
        let alloc = VoiceAllocator::new(1000);
        assert_eq!(MAX_VOICES, alloc.polyphony());

        let alloc = VoiceAllocator::new(0);
        assert_eq!(1, alloc.polyphony());
    }

    #[test]
    fn events_route_through_handle() {
        let mut alloc = VoiceAllocator::new(2);
        alloc.handle(MidiEvent::NoteOn {
            key: 60,
            velocity: 64,
        });
        assert_eq!(1.0, alloc.voice_gate(0));

        alloc.handle(MidiEvent::NoteOff {
            key: 60,
            velocity: 0,
        });
        assert_eq!(0.0, alloc.voice_gate(0));

        alloc.handle(MidiEvent::ControllerChange {
            controller: 1,
            value: 10,
        });
        assert_partition(&alloc);
    }
}
