//! Single-byte-at-a-time MIDI interpreter.
//!
//! The parser consumes the raw byte stream from the MIDI UART and produces discrete [`MidiEvent`]s.
//! It understands the channel-voice subset of MIDI 1.0 (note on/off, controller change, program
//! change, pitch bend) plus a non-standard single-byte reset sentinel (`0xFF`) layered on top, and
//! supports "running status" — consecutive events of the same type may omit repeated status bytes.
//!
//! Only events addressed to the configured channel are reported; data bytes belonging to other
//! channels are discarded without disturbing the parser state.

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

/// The single-byte reset sentinel. Not part of standard MIDI framing; emitted by some controllers
/// (and our own test rig) as a panic/reset marker.
const RESET_BYTE: u8 = 0xFF;

/// A discrete musical event decoded from the MIDI byte stream.
///
/// Consumers are free to ignore any variant; the parser attaches no meaning beyond the decode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MidiEvent {
    /// A key was struck. `velocity` is the raw 7-bit value.
    NoteOn {
        /// MIDI key number, 0..=127.
        key: u8,
        /// Strike velocity, 0..=127.
        velocity: u8,
    },
    /// A key was released.
    NoteOff {
        /// MIDI key number, 0..=127.
        key: u8,
        /// Release velocity, 0..=127.
        velocity: u8,
    },
    /// A continuous controller moved.
    ControllerChange {
        /// Controller number, 0..=127.
        controller: u8,
        /// New controller value, 0..=127.
        value: u8,
    },
    /// A program (patch) selection.
    ProgramChange {
        /// Program number, 0..=127.
        program: u8,
    },
    /// Pitch wheel movement. The value is the reconstructed 14-bit quantity, centered at 8192.
    PitchBend {
        /// `data[0] | (data[1] << 7)`, 0..=16383.
        value: u16,
    },
    /// The reset sentinel (`0xFF`) was seen. Reported regardless of channel filtering.
    Reset,
}

/// The 3-bit command class carried in bits 4..=6 of a status byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive)]
enum CommandClass {
    NoteOff = 0x0,
    NoteOn = 0x1,
    ControllerChange = 0x3,
    ProgramChange = 0x4,
    PitchBend = 0x6,
}

impl CommandClass {
    /// Number of data bytes that follow a status byte of this class.
    fn data_bytes(self) -> u8 {
        match self {
            Self::NoteOff | Self::NoteOn | Self::ControllerChange | Self::PitchBend => 2,
            Self::ProgramChange => 1,
        }
    }
}

/// Channel-filtered MIDI byte-stream parser.
///
/// Feed bytes one at a time with [`feed`][Self::feed]; a decoded event is returned as soon as its
/// last data byte arrives. The status byte persists between events, so running status works without
/// any special handling by the caller.
#[derive(Clone, Debug)]
pub struct MidiParser {
    /// Expected number of data bytes for the current command class.
    data_limit: u8,
    /// Number of data bytes received so far.
    data_count: u8,
    /// Command class of the last status byte, if it was one we recognize.
    status: Option<CommandClass>,
    /// Channel nibble of the last status byte. Starts at an impossible value so that stray data
    /// bytes arriving before any status byte are discarded.
    channel: u8,
    /// Data byte accumulator.
    data: [u8; 4],
    /// Only events on this channel are reported.
    channel_filter: u8,
}

impl MidiParser {
    /// Constructs a parser reporting events addressed to `channel_filter` (0..=15).
    pub fn new(channel_filter: u8) -> Self {
        Self {
            data_limit: 0,
            data_count: 0,
            status: None,
            channel: 0xFF,
            data: [0; 4],
            channel_filter,
        }
    }

    /// Consumes one byte from the stream. Returns an event once its final data byte has arrived.
    pub fn feed(&mut self, byte: u8) -> Option<MidiEvent> {
        if byte == RESET_BYTE {
            // The sentinel takes effect immediately, whatever the parser was in the middle of.
            self.data_count = 0;
            return Some(MidiEvent::Reset);
        }

        if byte & 0x80 != 0 {
            // Status byte: latch command class and channel, restart data accumulation.
            self.status = CommandClass::from_u8((byte >> 4) & 0x07);
            self.channel = byte & 0x0F;
            self.data_count = 0;
            self.data_limit = self.status.map_or(0, CommandClass::data_bytes);
            return None;
        }

        // Data byte: only accept data meant for this device.
        if self.channel != self.channel_filter {
            return None;
        }

        self.data[usize::from(self.data_count)] = byte;
        self.data_count += 1;

        if self.data_count >= self.data_limit {
            self.data_count = 0;
            return self.synthesize();
        }

        None
    }

    /// Builds the event for the current status byte from the accumulated data bytes.
    fn synthesize(&self) -> Option<MidiEvent> {
        let event = match self.status? {
            CommandClass::NoteOff => MidiEvent::NoteOff {
                key: self.data[0],
                velocity: self.data[1],
            },
            CommandClass::NoteOn => MidiEvent::NoteOn {
                key: self.data[0],
                velocity: self.data[1],
            },
            CommandClass::ControllerChange => MidiEvent::ControllerChange {
                controller: self.data[0],
                value: self.data[1],
            },
            CommandClass::ProgramChange => MidiEvent::ProgramChange {
                program: self.data[0],
            },
            CommandClass::PitchBend => MidiEvent::PitchBend {
                value: u16::from(self.data[0]) | (u16::from(self.data[1]) << 7),
            },
        };
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Feeds a byte sequence and collects every event produced.
    fn events(parser: &mut MidiParser, bytes: &[u8]) -> [Option<MidiEvent>; 8] {
        let mut out = [None; 8];
        let mut n = 0;
        for &b in bytes {
            if let Some(ev) = parser.feed(b) {
                out[n] = Some(ev);
                n += 1;
            }
        }
        out
    }

    #[test]
    fn note_on_on_matching_channel() {
        let mut parser = MidiParser::new(0);
        let got = events(&mut parser, &[0x90, 0x40, 0x7F]);
        assert_eq!(
            Some(MidiEvent::NoteOn {
                key: 0x40,
                velocity: 0x7F
            }),
            got[0],
            "Expected left but got right"
        );
        assert_eq!(None, got[1], "Exactly one event expected");
    }

    #[test]
    fn note_on_on_other_channel_is_filtered() {
        let mut parser = MidiParser::new(0);
        let got = events(&mut parser, &[0x91, 0x40, 0x7F]);
        assert_eq!(None, got[0], "No event should pass the channel filter");
    }

    #[test]
    fn running_status() {
        let mut parser = MidiParser::new(0);
        let got = events(&mut parser, &[0x90, 0x40, 0x7F, 0x41, 0x10]);
        assert_eq!(
            Some(MidiEvent::NoteOn {
                key: 0x40,
                velocity: 0x7F
            }),
            got[0]
        );
        assert_eq!(
            Some(MidiEvent::NoteOn {
                key: 0x41,
                velocity: 0x10
            }),
            got[1],
            "Second note should decode without a second status byte"
        );
    }

    #[test]
    fn note_off() {
        let mut parser = MidiParser::new(3);
        let got = events(&mut parser, &[0x83, 0x40, 0x02]);
        assert_eq!(
            Some(MidiEvent::NoteOff {
                key: 0x40,
                velocity: 0x02
            }),
            got[0]
        );
    }

    #[test]
    fn program_change_takes_one_data_byte() {
        let mut parser = MidiParser::new(0);
        let got = events(&mut parser, &[0xC0, 0x2A]);
        assert_eq!(Some(MidiEvent::ProgramChange { program: 0x2A }), got[0]);
    }

    #[test]
    fn pitch_bend_reconstructs_14_bits() {
        let mut parser = MidiParser::new(0);
        // 8192 = center: lsb 0, msb 64
        let got = events(&mut parser, &[0xE0, 0x00, 0x40]);
        assert_eq!(Some(MidiEvent::PitchBend { value: 8192 }), got[0]);

        let got = events(&mut parser, &[0xE0, 0x7F, 0x7F]);
        assert_eq!(Some(MidiEvent::PitchBend { value: 16383 }), got[0]);
    }

    #[test]
    fn reset_fires_mid_message() {
        let mut parser = MidiParser::new(0);
        assert_eq!(None, parser.feed(0x90));
        assert_eq!(None, parser.feed(0x40));
        assert_eq!(
            Some(MidiEvent::Reset),
            parser.feed(0xFF),
            "Reset should be reported regardless of parser state"
        );
        // The interrupted note must not resume from the stale data byte.
        assert_eq!(None, parser.feed(0x10));
    }

    #[test]
    fn unrecognized_command_class_is_ignored() {
        let mut parser = MidiParser::new(0);
        // 0xA0 (polyphonic aftertouch) is not handled; its data bytes must produce nothing.
        let got = events(&mut parser, &[0xA0, 0x40, 0x7F, 0x90, 0x41, 0x01]);
        assert_eq!(
            Some(MidiEvent::NoteOn {
                key: 0x41,
                velocity: 0x01
            }),
            got[0],
            "Parser should recover at the next recognized status byte"
        );
    }

    #[test]
    fn data_bytes_before_any_status_are_discarded() {
        let mut parser = MidiParser::new(0);
        let got = events(&mut parser, &[0x40, 0x7F, 0x12]);
        assert_eq!(None, got[0]);
    }

    #[test]
    fn controller_change() {
        let mut parser = MidiParser::new(0);
        let got = events(&mut parser, &[0xB0, 0x07, 0x65]);
        assert_eq!(
            Some(MidiEvent::ControllerChange {
                controller: 0x07,
                value: 0x65
            }),
            got[0]
        );
    }
}
