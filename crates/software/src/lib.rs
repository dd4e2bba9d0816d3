//! This crate contains the architecture-agnostic control core of Polywave, a polyphonic
//! [PPG-style](https://en.wikipedia.org/wiki/PPG_Wave) wavetable synthesizer. It turns a raw MIDI byte
//! stream and scanned potentiometer voltages into per-block control parameters for a numeric DSP voice
//! engine, and moves the rendered samples to the audio codec through a double-buffered transmit exchange.
//!
//! Everything here runs equally well on the target microcontroller and on a development host, which is
//! where the test suite lives. Peripheral wiring (I2S/DMA, the ADCs, the MIDI UART) belongs to the
//! firmware crate.

#![deny(missing_docs)]
#![no_std]

pub mod analog;
pub mod audio;
pub mod dsp;
pub mod midi;
pub mod synth;
pub mod voices;
pub mod wavetable;
