//! Polywave is [Embassy](https://embassy.dev)-based firmware for a polyphonic wavetable
//! synthesizer built around an STM32F407 and a TLV320AIC23B audio codec.
//!
//! The portable control core lives in `polywave_lib`; this crate is the hardware shell around
//! it. It receives MIDI over UART, scans the front-panel potentiometers through four
//! multiplexers shared between two ADCs, and streams rendered audio to the codec over I2S.
//! Rendering runs block by block: the control loop drains buffered MIDI bytes, refreshes the
//! engine's control parameters from voice state and the analog scan, renders one block, and
//! hands it to the transmit exchange. A high-priority pump task feeds the exchange's halves to
//! the I2S peripheral and reports each completed transfer back, which is where underruns get
//! counted.

#![no_std]
#![no_main]

mod codec;
mod engine;

use crate::engine::WavetableEngine;
use defmt::{panic, *};
use embassy_executor::{InterruptExecutor, Spawner};
use embassy_stm32::{
    Config, bind_interrupts,
    adc::{Adc, AdcChannel, AnyAdcChannel, SampleTime},
    gpio::{Level, Output, Speed},
    i2c::I2c,
    i2s,
    interrupt::{self, InterruptExt, Priority},
    mode::Async,
    peripherals,
    time::Hertz,
    usart::{self, UartRx},
};
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, channel::Channel};
use embassy_time::{Duration, Ticker};
use polywave_lib::analog::{AdcUnit, AnalogFrame, ScanAction, ScanSequencer};
use polywave_lib::audio::{BLOCK_WORDS, Half, MONO_BLOCK_LEN, TransmitExchange};
use polywave_lib::synth::Synth;
use static_cell::StaticCell;

use {defmt_rtt as _, panic_probe as _};

bind_interrupts!(
    #[doc(hidden)]
    struct Irqs {
        USART3 => usart::InterruptHandler<peripherals::USART3>;
    }
);

/// MIDI channel the synthesizer listens on.
const MIDI_CHANNEL: u8 = 0;

/// Capacity of the MIDI byte buffer between the UART receiver and the control loop.
const MIDI_BUFFER: usize = 32;

/// The transmit double buffer shared between the control loop and the audio pump.
static AUDIO: TransmitExchange = TransmitExchange::new();

/// Most recent completed analog readings, one slot per scanned input.
static ANALOG: AnalogFrame = AnalogFrame::new();

/// Raw MIDI bytes on their way to the control loop. Bytes arriving while the buffer is full
/// are dropped; the parser resynchronizes on the next status byte.
static MIDI_BYTES: Channel<CriticalSectionRawMutex, u8, MIDI_BUFFER> = Channel::new();

static EXECUTOR_AUDIO: InterruptExecutor = InterruptExecutor::new();
static EXECUTOR_IO: InterruptExecutor = InterruptExecutor::new();

#[embassy_stm32::interrupt]
unsafe fn TIM2() {
    EXECUTOR_AUDIO.on_interrupt();
}

#[embassy_stm32::interrupt]
unsafe fn TIM3() {
    EXECUTOR_IO.on_interrupt();
}

/// The two ADCs and the four fixed inputs they sample at each multiplexer position.
struct ScanIo {
    adc_a: Adc<'static, peripherals::ADC1>,
    /// Inputs 0 and 1, in that order.
    a_inputs: [AnyAdcChannel<peripherals::ADC1>; 2],
    adc_b: Adc<'static, peripherals::ADC3>,
    /// Inputs 2 and 3, in that order.
    b_inputs: [AnyAdcChannel<peripherals::ADC3>; 2],
}

impl ScanIo {
    fn read(&mut self, unit: AdcUnit, input: u8) -> u16 {
        match unit {
            AdcUnit::A => {
                let pin = &mut self.a_inputs[usize::from(input - AdcUnit::A.primary_input())];
                self.adc_a.blocking_read(pin)
            }
            AdcUnit::B => {
                let pin = &mut self.b_inputs[usize::from(input - AdcUnit::B.primary_input())];
                self.adc_b.blocking_read(pin)
            }
        }
    }
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("Initializing Polywave");

    let mut config = Config::default();
    {
        use embassy_stm32::rcc::*;
        config.rcc.hse = Some(Hse {
            freq: Hertz(8_000_000),
            mode: HseMode::Oscillator,
        });
        config.rcc.pll_src = PllSource::HSE;
        config.rcc.pll = Some(Pll {
            prediv: PllPreDiv::DIV8,
            mul: PllMul::MUL336,
            divp: Some(PllPDiv::DIV2), // 8MHz / 8 * 336 / 2 = 168MHz
            divq: Some(PllQDiv::DIV7),
            divr: None,
        });
        config.rcc.sys = Sysclk::PLL1_P;
        config.rcc.ahb_pre = AHBPrescaler::DIV1;
        config.rcc.apb1_pre = APBPrescaler::DIV4;
        config.rcc.apb2_pre = APBPrescaler::DIV2;
        // The codec derives its bit and frame clocks from the MCLK we feed it, so the I2S PLL
        // has to land close to 256 * 48kHz: 8MHz / 8 * 258 / 3 / 7 = 12.288MHz.
        config.rcc.plli2s = Some(Pll {
            prediv: PllPreDiv::DIV8,
            mul: PllMul::MUL258,
            divp: None,
            divq: None,
            divr: Some(PllRDiv::DIV3),
        });
    }
    let p = embassy_stm32::init(config);

    let mut i2c_config = embassy_stm32::i2c::Config::default();
    i2c_config.frequency = Hertz(100_000);
    let mut i2c = I2c::new_blocking(p.I2C1, p.PB6, p.PB7, i2c_config);
    let mut codec_cs = Output::new(p.PB8, Level::High, Speed::Low);
    if let Err(e) = codec::init(&mut i2c, &mut codec_cs).await {
        error!("Codec configuration failed: {}", Debug2Format(&e));
        // There is no audio path to run without; stop here so the fault is visible.
        panic!("Unreachable codec");
    }
    info!("Codec configured");

    let mut i2s_config = i2s::Config::default();
    i2s_config.format = i2s::Format::Data16Channel16;
    i2s_config.frequency = Hertz(48_000);
    static DMA_BUFFER: StaticCell<[u16; 2 * BLOCK_WORDS]> = StaticCell::new();
    let i2s = i2s::I2S::new_txonly(
        p.SPI2,
        p.PB15, // sd
        p.PB12, // ws
        p.PB13, // ck
        p.PC6,  // mck, feeds the codec
        p.DMA1_CH4,
        DMA_BUFFER.init([0u16; 2 * BLOCK_WORDS]),
        i2s_config,
    );

    let mut uart_config = usart::Config::default();
    uart_config.baudrate = 31_250;
    let uart_rx = unwrap!(UartRx::new(p.USART3, Irqs, p.PB11, p.DMA1_CH1, uart_config));

    let mut adc_a = Adc::new(p.ADC1);
    adc_a.set_sample_time(SampleTime::CYCLES84);
    let mut adc_b = Adc::new(p.ADC3);
    adc_b.set_sample_time(SampleTime::CYCLES84);
    let scan_io = ScanIo {
        adc_a,
        a_inputs: [p.PA0.degrade_adc(), p.PA1.degrade_adc()],
        adc_b,
        b_inputs: [p.PA2.degrade_adc(), p.PA3.degrade_adc()],
    };
    let select = [
        Output::new(p.PC4, Level::Low, Speed::Low),
        Output::new(p.PC5, Level::Low, Speed::Low),
        Output::new(p.PB0, Level::Low, Speed::Low),
    ];

    let leds = [
        Output::new(p.PA11, Level::Low, Speed::Low),
        Output::new(p.PA12, Level::Low, Speed::Low),
    ];

    let synth = Synth::new(WavetableEngine::new(), MIDI_CHANNEL);
    info!("Engine reports {} voices", synth.voices().polyphony());

    AUDIO.start();

    interrupt::TIM2.set_priority(Priority::P3);
    let audio_spawner = EXECUTOR_AUDIO.start(interrupt::TIM2);
    interrupt::TIM3.set_priority(Priority::P5);
    let io_spawner = EXECUTOR_IO.start(interrupt::TIM3);

    unwrap!(audio_spawner.spawn(audio_pump_task(i2s)));
    unwrap!(io_spawner.spawn(midi_rx_task(uart_rx)));
    unwrap!(io_spawner.spawn(analog_scan_task(scan_io, select)));
    unwrap!(spawner.spawn(control_task(synth, leds)));

    info!("Polywave running");
}

/// Task streaming the exchange's halves to the I2S peripheral.
///
/// Each completed write stands in for the DMA half-transfer interrupt: it reports the consumed
/// half back to the exchange, making it writable again and counting an underrun if the control
/// loop never refilled the other half in time.
#[embassy_executor::task]
async fn audio_pump_task(mut i2s: i2s::I2S<'static, u16>) -> ! {
    let mut front = Half::First;
    let mut words = [0u16; BLOCK_WORDS];
    i2s.start();
    loop {
        AUDIO.copy_half(front, &mut words);
        if let Err(e) = i2s.write(&words).await {
            error!("I2S write error: {}", Debug2Format(&e));
            i2s.clear();
            continue;
        }
        AUDIO.transfer_complete(front);
        front = front.other();
    }
}

/// Task forwarding raw UART bytes into the MIDI buffer.
#[embassy_executor::task]
async fn midi_rx_task(mut rx: UartRx<'static, Async>) -> ! {
    let mut byte = [0u8; 1];
    loop {
        match rx.read(&mut byte).await {
            Ok(()) => {
                // A full buffer means the control loop is behind; the byte is dropped.
                let _ = MIDI_BYTES.try_send(byte[0]);
            }
            Err(e) => warn!("MIDI UART error: {}", Debug2Format(&e)),
        }
    }
}

/// Task driving the analog scan on a fixed period.
///
/// The sequencer owns the ordering; this task just performs the conversions it asks for and
/// moves the multiplexer select lines when a position completes. Blocking ADC reads finish
/// well within the scan period, so the begin guard only matters if that ever stops being true.
#[embassy_executor::task]
async fn analog_scan_task(mut scan_io: ScanIo, mut select: [Output<'static>; 3]) -> ! {
    let mut scan = ScanSequencer::new();
    set_mux(&mut select, 0);

    let mut ticker = Ticker::every(Duration::from_millis(5));
    loop {
        ticker.next().await;
        if scan.begin().is_none() {
            continue;
        }

        for unit in [AdcUnit::A, AdcUnit::B] {
            let raw = scan_io.read(unit, unit.primary_input());
            match scan.conversion_complete(unit, raw, &ANALOG) {
                ScanAction::ConvertSecondary { input } => {
                    let raw = scan_io.read(unit, input);
                    if let ScanAction::Advance { next_position } =
                        scan.conversion_complete(unit, raw, &ANALOG)
                    {
                        set_mux(&mut select, next_position);
                    }
                }
                ScanAction::Wait => {}
                ScanAction::Advance { next_position } => set_mux(&mut select, next_position),
            }
        }
    }
}

/// Drives the three shared multiplexer select lines to `position`.
fn set_mux(select: &mut [Output<'static>; 3], position: u8) {
    for (bit, pin) in select.iter_mut().enumerate() {
        pin.set_level(Level::from(position & (1 << bit) != 0));
    }
}

/// The per-block control loop.
///
/// Runs on the thread executor at the lowest priority: the dispatch at the end of each
/// iteration busy-waits for a free buffer half, which paces the whole loop to the audio
/// stream. Both LEDs light for a block whenever underruns were recorded during the previous
/// one.
#[embassy_executor::task]
async fn control_task(mut synth: Synth<WavetableEngine>, mut leds: [Output<'static>; 2]) -> ! {
    let mut block = [0.0f32; MONO_BLOCK_LEN];
    let mut bytes = [0u8; MIDI_BUFFER];
    loop {
        let mut len = 0;
        while len < bytes.len() {
            match MIDI_BYTES.try_receive() {
                Ok(b) => {
                    bytes[len] = b;
                    len += 1;
                }
                Err(_) => break,
            }
        }

        synth.process_block(&bytes[..len], &ANALOG, &mut block);
        AUDIO.dispatch_mono(&block);

        let underruns = AUDIO.take_underruns();
        if underruns > 0 {
            warn!("{} audio underruns", underruns);
        }
        for led in &mut leds {
            led.set_level(Level::from(underruns > 0));
        }
    }
}
