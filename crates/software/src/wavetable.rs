//! Sparse wavetable decode and interpolation.
//!
//! PPG-format wavetable descriptions name only a handful of key frames — explicitly authored
//! waveforms pinned to specific table positions. [`decode_wavetables`] parses the binary stream
//! and fills in every one of the 61 slots with precomputed crossfade data, so that resolving a
//! continuous table position at audio time is a single array lookup plus one multiply.
//!
//! A table is only usable if key frames exist at both ends (slot 0 and slot 60); tables missing
//! either are skipped without aborting the rest of the stream.

use tinyvec::ArrayVec;

/// Number of wave positions per table.
pub const WAVETABLE_SLOTS: usize = 61;

/// Upper bound on decoded tables held in a [`WavetableBank`].
pub const MAX_WAVETABLES: usize = 32;

/// A slot index at or above this value terminates the current table in the stream.
const TERMINATOR_SLOT: u8 = 0x3C;

/// Bank of decoded wavetables, in stream order.
pub type WavetableBank = ArrayVec<[Wavetable; MAX_WAVETABLES]>;

/// Reasons a table in the stream is rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WavetableError {
    /// No key frame was named at slot 0.
    MissingFirstKeyFrame,
    /// No key frame was named at slot 60.
    MissingLastKeyFrame,
}

/// Per-position interpolation data, fully resolved by [`Wavetable::interpolate`].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Slot {
    /// Whether this slot was explicitly named as a key frame.
    key: bool,
    /// Source wave id of the key frame on or to the left of this slot.
    wave_left: u8,
    /// Source wave id of the next key frame to the right.
    wave_right: u8,
    /// Whole-slot distance from the left key frame (1.0 for the terminal slot).
    left_distance: f32,
    /// Per-slot interpolation factor, `1 / distance_between_key_frames`.
    factor: f32,
}

/// One decoded wavetable: 61 positions, each resolving to a crossfade between two raw waveforms.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Wavetable {
    slots: [Slot; WAVETABLE_SLOTS],
}

impl Default for Wavetable {
    fn default() -> Self {
        Self {
            slots: [Slot::default(); WAVETABLE_SLOTS],
        }
    }
}

impl Wavetable {
    /// Marks `slot` as a key frame sourcing `wave_id`.
    fn set_key_frame(&mut self, slot: usize, wave_id: u8) {
        let s = &mut self.slots[slot];
        s.wave_left = wave_id;
        s.wave_right = wave_id;
        s.key = true;
    }

    /// Fills every slot by walking left to right between key frames.
    ///
    /// Requires key frames at both slot 0 and slot 60; everything in between is linear in the
    /// slot distance to its neighbouring key frames.
    fn interpolate(&mut self) -> Result<(), WavetableError> {
        if !self.slots[0].key {
            return Err(WavetableError::MissingFirstKeyFrame);
        }
        if !self.slots[WAVETABLE_SLOTS - 1].key {
            return Err(WavetableError::MissingLastKeyFrame);
        }

        // Nearest key frame on the left and right of the cursor. Both are set on the first
        // iteration because slot 0 is a key frame.
        let mut left = 0;
        let mut right = 0;

        for i in 0..WAVETABLE_SLOTS {
            if self.slots[i].key {
                left = i;
                right = match (i + 1..WAVETABLE_SLOTS).find(|&j| self.slots[j].key) {
                    Some(j) => j,
                    // Only possible for the terminal slot, which is special-cased below.
                    None => i,
                };
            }

            let wave_left = self.slots[left].wave_left;
            let wave_right = self.slots[right].wave_left;
            let slot = &mut self.slots[i];
            slot.wave_left = wave_left;
            slot.wave_right = wave_right;

            if i == WAVETABLE_SLOTS - 1 {
                // The terminal slot crossfades a wave with itself; pinning the distance at 1
                // with factor 0 keeps the lookup formula total.
                slot.factor = 0.0;
                slot.left_distance = 1.0;
            } else {
                slot.factor = 1.0 / (right - left) as f32;
                slot.left_distance = (i - left) as f32;
            }
        }

        Ok(())
    }

    /// Resolves a continuous table position `x` in `[0, 1)` to a pair of source wave ids and a
    /// crossfade factor (0.0 selects the left wave entirely).
    pub fn get_interpolation_data(&self, x: f32) -> (u8, u8, f32) {
        let scaled = x * WAVETABLE_SLOTS as f32;
        let slot_id = (scaled as usize).min(WAVETABLE_SLOTS - 1);
        let slot_rem = scaled - slot_id as f32;

        let slot = &self.slots[slot_id];
        (
            slot.wave_left,
            slot.wave_right,
            slot.factor * (slot.left_distance + slot_rem),
        )
    }
}

/// Decodes a stream of PPG-format wavetable descriptions.
///
/// Each table starts with one ignorable header byte followed by (wave id, slot index) pairs;
/// a slot index of `0x3C` or greater ends the table. Tables that fail interpolation are skipped
/// and decoding continues with the next table in the stream. Decoding stops early if the bank
/// fills up or the stream ends mid-pair.
pub fn decode_wavetables(data: &[u8]) -> WavetableBank {
    let mut tables = WavetableBank::new();
    let mut pos = 0;

    while pos < data.len() {
        pos += 1; // header byte carries nothing we need

        let mut table = Wavetable::default();
        loop {
            let Some(&wave_id) = data.get(pos) else { break };
            pos += 1;
            let Some(&slot_id) = data.get(pos) else { break };
            pos += 1;

            if usize::from(slot_id) >= WAVETABLE_SLOTS {
                break;
            }
            table.set_key_frame(usize::from(slot_id), wave_id);

            if slot_id >= TERMINATOR_SLOT {
                break;
            }
        }

        if table.interpolate().is_ok() && tables.try_push(table).is_some() {
            // Bank is full; drop the remainder of the stream.
            break;
        }
    }

    tables
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A table naming every slot as a key frame whose wave id equals its own index.
    fn dense_identity_stream() -> [u8; 1 + 2 * WAVETABLE_SLOTS] {
        let mut data = [0u8; 1 + 2 * WAVETABLE_SLOTS];
        for i in 0..WAVETABLE_SLOTS {
            data[1 + 2 * i] = i as u8;
            data[2 + 2 * i] = i as u8;
        }
        data
    }

    /// A minimal valid table: key frames at the two mandatory end slots only.
    fn sparse_stream(first_wave: u8, last_wave: u8) -> [u8; 5] {
        [0x00, first_wave, 0, last_wave, 60]
    }

    #[test]
    fn dense_identity_table_resolves_each_slot_to_its_own_wave() {
        let bank = decode_wavetables(&dense_identity_stream());
        assert_eq!(1, bank.len(), "Expected left but got right");
        let table = &bank[0];

        for i in 0..WAVETABLE_SLOTS - 1 {
            assert_eq!(i as u8, table.slots[i].wave_left);
            assert_eq!((i + 1) as u8, table.slots[i].wave_right);
            assert_eq!(0.0, table.slots[i].left_distance);
            assert_eq!(1.0, table.slots[i].factor);
        }

        // Nudging x just inside a slot's lower boundary must select that slot's own wave
        // with a vanishing crossfade factor.
        for i in 0..WAVETABLE_SLOTS {
            let x = (i as f32 + 1e-3) / WAVETABLE_SLOTS as f32;
            let (wave_a, _, factor) = table.get_interpolation_data(x);
            assert_eq!(i as u8, wave_a);
            assert!(factor < 0.01, "Factor at slot {i} boundary was {factor}");
        }

        let (wave_a, _, factor) = table.get_interpolation_data(0.0);
        assert_eq!(0, wave_a);
        assert_eq!(0.0, factor);
    }

    #[test]
    fn sparse_table_interpolates_linearly_between_end_frames() {
        let bank = decode_wavetables(&sparse_stream(10, 20));
        assert_eq!(1, bank.len());
        let table = &bank[0];

        let mid = &table.slots[30];
        assert_eq!(10, mid.wave_left);
        assert_eq!(20, mid.wave_right);
        assert_eq!(30.0, mid.left_distance);
        assert_eq!(1.0 / 60.0, mid.factor);

        let (wave_a, wave_b, factor) = table.get_interpolation_data(0.5);
        assert_eq!((10, 20), (wave_a, wave_b));
        assert!((factor - 0.5).abs() < 0.02, "Factor was {factor}");
    }

    #[test]
    fn terminal_slot_uses_the_same_wave_on_both_sides() {
        let bank = decode_wavetables(&sparse_stream(10, 20));
        let last = &bank[0].slots[WAVETABLE_SLOTS - 1];
        assert_eq!(20, last.wave_left);
        assert_eq!(20, last.wave_right);
        assert_eq!(0.0, last.factor);
        assert_eq!(1.0, last.left_distance);
    }

    #[test]
    fn table_missing_first_key_frame_is_skipped() {
        // Key frames at 30 and 60 only.
        let data = [0x00, 5, 30, 7, 60];
        let bank = decode_wavetables(&data);
        assert!(bank.is_empty(), "Table without slot 0 must be rejected");
    }

    #[test]
    fn table_missing_last_key_frame_is_skipped() {
        // Slot 70 terminates the table without creating a key frame.
        let data = [0x00, 1, 0, 2, 30, 3, 70];
        let bank = decode_wavetables(&data);
        assert!(bank.is_empty(), "Table without slot 60 must be rejected");
    }

    #[test]
    fn rejected_table_does_not_poison_the_rest_of_the_stream() {
        // Invalid (no slot 0), then valid.
        let data = [0x00, 5, 30, 7, 60, 0x00, 10, 0, 20, 60];
        let bank = decode_wavetables(&data);
        assert_eq!(1, bank.len(), "Expected left but got right");
        assert_eq!(10, bank[0].slots[0].wave_left);
    }

    #[test]
    fn stream_ending_mid_pair_is_tolerated() {
        let data = [0x00, 10, 0, 20, 60, 0x00, 42];
        let bank = decode_wavetables(&data);
        assert_eq!(1, bank.len());

        assert!(decode_wavetables(&[]).is_empty());
        assert!(decode_wavetables(&[0x00]).is_empty());
    }

    #[test]
    fn multiple_tables_decode_in_stream_order() {
        let mut data = [0u8; 10];
        data[..5].copy_from_slice(&sparse_stream(1, 2));
        data[5..].copy_from_slice(&sparse_stream(3, 4));
        let bank = decode_wavetables(&data);
        assert_eq!(2, bank.len());
        assert_eq!(1, bank[0].slots[0].wave_left);
        assert_eq!(3, bank[1].slots[0].wave_left);
    }
}
