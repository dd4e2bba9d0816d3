//! Double-buffered audio transmit exchange with underrun accounting.
//!
//! The hardware streams continuously from a single buffer split into two halves. While one half
//! (the front) is being consumed by the DMA transfer, the other half (the back) is writable by
//! the control loop. A completion signal per half marks the just-consumed half writable again and
//! sets the ready flag; [`TransmitExchange::dispatch_mono`] busy-waits on that flag, so the only
//! blocking point in the whole system is bounded by one block's playback time.
//!
//! If a completion signal arrives while the ready flag is still set, the control loop failed to
//! supply data in time: the hardware replays stale samples and the underrun counter increments.
//! Underruns never corrupt playback state; the counter is the only evidence they happened.

use core::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, AtomicUsize, Ordering};

/// Length in 16-bit words of one transmit half (stereo interleaved).
pub const BLOCK_WORDS: usize = 512;

/// Samples per dispatched stereo block.
pub const STEREO_BLOCK_LEN: usize = BLOCK_WORDS;

/// Samples per dispatched mono block (each sample is duplicated across both channels).
pub const MONO_BLOCK_LEN: usize = BLOCK_WORDS / 2;

/// Identifies one half of the transmit buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Half {
    /// The first half of the buffer.
    First,
    /// The second half of the buffer.
    Second,
}

impl Half {
    fn index(self) -> usize {
        match self {
            Self::First => 0,
            Self::Second => 1,
        }
    }

    /// The other half.
    pub fn other(self) -> Self {
        match self {
            Self::First => Self::Second,
            Self::Second => Self::First,
        }
    }
}

/// Converts a float sample to the signed-16-bit PCM word the codec expects, clamping to `[-1, 1]`.
pub fn sample_to_pcm(x: f32) -> u16 {
    (x.clamp(-1.0, 1.0) * 32767.0) as i16 as u16
}

/// The hardware-visible double buffer and its synchronization state.
///
/// Ownership of each half alternates exclusively between the hardware transfer and the producer;
/// the ready flag is the sole synchronization token between the two. All fields are atomics so the
/// exchange can live in a `static` and be touched from both the control loop and the transfer
/// completion context.
pub struct TransmitExchange {
    halves: [[AtomicU16; BLOCK_WORDS]; 2],
    /// Index of the currently writable (back) half.
    back: AtomicUsize,
    /// Set by the completion signal, cleared by dispatch.
    ready: AtomicBool,
    underruns: AtomicU32,
}

impl TransmitExchange {
    /// Constructs a silent, not-yet-started exchange.
    pub const fn new() -> Self {
        Self {
            halves: [const { [const { AtomicU16::new(0) }; BLOCK_WORDS] }; 2],
            back: AtomicUsize::new(1),
            ready: AtomicBool::new(false),
            underruns: AtomicU32::new(0),
        }
    }

    /// Arms the exchange for streaming: both halves silenced, the second half writable, and the
    /// first dispatch guaranteed not to block.
    pub fn start(&self) {
        for half in &self.halves {
            for word in half {
                word.store(0, Ordering::Relaxed);
            }
        }
        self.back.store(1, Ordering::Relaxed);
        self.underruns.store(0, Ordering::Relaxed);
        self.ready.store(true, Ordering::Release);
    }

    /// Whether the next dispatch would complete without blocking.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Copies a mono block into the back half, duplicating each sample across both channels of
    /// its stereo transmit slot. Busy-waits until the previously dispatched half has been fully
    /// consumed. `block` is expected to hold [`MONO_BLOCK_LEN`] samples.
    pub fn dispatch_mono(&self, block: &[f32]) {
        self.wait_ready();
        let back = &self.halves[self.back.load(Ordering::Acquire)];
        for (i, &sample) in block.iter().take(MONO_BLOCK_LEN).enumerate() {
            let word = sample_to_pcm(sample);
            back[2 * i].store(word, Ordering::Relaxed);
            back[2 * i + 1].store(word, Ordering::Relaxed);
        }
        self.ready.store(false, Ordering::Release);
    }

    /// Copies a stereo-interleaved block into the back half. Busy-waits like
    /// [`dispatch_mono`][Self::dispatch_mono]. `block` is expected to hold
    /// [`STEREO_BLOCK_LEN`] samples.
    pub fn dispatch_stereo(&self, block: &[f32]) {
        self.wait_ready();
        let back = &self.halves[self.back.load(Ordering::Acquire)];
        for (i, &sample) in block.iter().take(STEREO_BLOCK_LEN).enumerate() {
            back[i].store(sample_to_pcm(sample), Ordering::Relaxed);
        }
        self.ready.store(false, Ordering::Release);
    }

    /// Reports that the hardware finished consuming `half`. That half becomes writable, the
    /// ready flag is raised, and an underrun is recorded if the flag was still up (meaning the
    /// producer never refilled the other half in time).
    pub fn transfer_complete(&self, half: Half) {
        self.back.store(half.index(), Ordering::Release);
        if self.ready.swap(true, Ordering::AcqRel) {
            self.underruns.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Drains the underrun counter, returning the number of underruns since the last drain.
    pub fn take_underruns(&self) -> u32 {
        self.underruns.swap(0, Ordering::Relaxed)
    }

    /// Copies one half into `dst` for the hardware transfer path.
    pub fn copy_half(&self, half: Half, dst: &mut [u16; BLOCK_WORDS]) {
        let src = &self.halves[half.index()];
        for (d, s) in dst.iter_mut().zip(src) {
            *d = s.load(Ordering::Relaxed);
        }
    }

    fn wait_ready(&self) {
        // Bounded by one block's playback duration: the transfer completion signal always fires.
        while !self.ready.load(Ordering::Acquire) {
            core::hint::spin_loop();
        }
    }
}

impl Default for TransmitExchange {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_conversion_clamps_and_scales() {
        assert_eq!(0, sample_to_pcm(0.0));
        assert_eq!(32767, sample_to_pcm(1.0));
        assert_eq!(32767, sample_to_pcm(2.5), "Above full scale must clamp");
        assert_eq!((-32767i16) as u16, sample_to_pcm(-1.0));
        assert_eq!((-32767i16) as u16, sample_to_pcm(-7.0));
        assert_eq!(16383, sample_to_pcm(0.5) & 0x7FFF);
    }

    #[test]
    fn dispatch_clears_readiness_and_completion_restores_it() {
        let exchange = TransmitExchange::new();
        exchange.start();
        assert!(exchange.is_ready(), "Start must arm the first dispatch");

        let block = [0.0; MONO_BLOCK_LEN];
        exchange.dispatch_mono(&block);
        assert!(
            !exchange.is_ready(),
            "A second dispatch would have to block now"
        );

        exchange.transfer_complete(Half::First);
        assert!(exchange.is_ready());
        assert_eq!(0, exchange.take_underruns());
    }

    #[test]
    fn mono_dispatch_duplicates_samples_across_both_channels() {
        let exchange = TransmitExchange::new();
        exchange.start();

        let mut block = [0.0; MONO_BLOCK_LEN];
        block[0] = 1.0;
        block[1] = -1.0;
        exchange.dispatch_mono(&block);

        // start() leaves the second half writable.
        let mut words = [0u16; BLOCK_WORDS];
        exchange.copy_half(Half::Second, &mut words);
        assert_eq!(32767, words[0]);
        assert_eq!(32767, words[1], "Left sample must appear on both channels");
        assert_eq!((-32767i16) as u16, words[2]);
        assert_eq!((-32767i16) as u16, words[3]);
    }

    #[test]
    fn completion_selects_the_consumed_half_as_writable() {
        let exchange = TransmitExchange::new();
        exchange.start();

        let mut block = [0.0; MONO_BLOCK_LEN];
        block[0] = 1.0;

        // The first half was just consumed, so the next dispatch must land there.
        exchange.dispatch_mono(&block);
        exchange.transfer_complete(Half::First);
        exchange.dispatch_mono(&block);

        let mut words = [0u16; BLOCK_WORDS];
        exchange.copy_half(Half::First, &mut words);
        assert_eq!(32767, words[0]);
    }

    #[test]
    fn underrun_is_counted_iff_readiness_was_still_set() {
        let exchange = TransmitExchange::new();
        exchange.start();

        // Producer never dispatched: the completion signal finds the flag still up.
        exchange.transfer_complete(Half::First);
        assert_eq!(1, exchange.take_underruns());

        // Normal operation: dispatch, then completion. No underrun.
        exchange.dispatch_mono(&[0.0; MONO_BLOCK_LEN]);
        exchange.transfer_complete(Half::Second);
        assert_eq!(0, exchange.take_underruns());
    }

    #[test]
    fn underruns_accumulate_until_drained() {
        let exchange = TransmitExchange::new();
        exchange.start();
        exchange.transfer_complete(Half::First);
        exchange.transfer_complete(Half::Second);
        exchange.transfer_complete(Half::First);
        assert_eq!(3, exchange.take_underruns());
        assert_eq!(0, exchange.take_underruns(), "Drain must reset the counter");
    }

    #[test]
    fn stale_data_is_replayed_unchanged_on_underrun() {
        let exchange = TransmitExchange::new();
        exchange.start();

        let mut block = [0.0; MONO_BLOCK_LEN];
        block[0] = 0.5;
        exchange.dispatch_mono(&block);

        exchange.transfer_complete(Half::Second);
        exchange.transfer_complete(Half::First); // underrun

        let mut words = [0u16; BLOCK_WORDS];
        exchange.copy_half(Half::Second, &mut words);
        assert_eq!(
            sample_to_pcm(0.5),
            words[0],
            "Underrun must not clobber previously dispatched samples"
        );
        assert_eq!(1, exchange.take_underruns());
    }
}
