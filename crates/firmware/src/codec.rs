//! TLV320AIC23B codec bring-up over I2C.
//!
//! The codec is configured as the I2S clock master at 48kHz with 16-bit words, so the MCU side
//! only ever acts as a transmitting slave. Register writes that fail are surfaced to the caller;
//! running with a half-configured audio path risks silent corruption, so the caller is expected
//! to halt rather than continue.

use embassy_stm32::gpio::Output;
use embassy_stm32::i2c::{Error, I2c};
use embassy_stm32::mode::Blocking;
use embassy_time::Timer;

/// 7-bit I2C address with the CS pin low.
const CODEC_ADDR: u8 = 0x1A;

const REG_DIGITAL_AUDIO_PATH: u8 = 5;
const REG_POWER_DOWN: u8 = 6;
const REG_DIGITAL_AUDIO_FMT: u8 = 7;
const REG_SAMPLE_RATE: u8 = 8;
const REG_DIGITAL_IF_ACT: u8 = 9;
const REG_RESET: u8 = 10;

const FMT_MASTER: u16 = 1 << 6;
const FMT_LEN16: u16 = 0 << 2;
const FMT_I2S: u16 = 2 << 0;

/// 48kHz in normal (256fs) mode.
const SR_NORMAL: u16 = 0;

/// Writes one 9-bit value to a 7-bit register: the register number and the value's top bit share
/// the first byte on the wire.
fn write_reg(
    i2c: &mut I2c<'_, Blocking>,
    cs: &mut Output<'_>,
    reg: u8,
    value: u16,
) -> Result<(), Error> {
    cs.set_low();
    let result = i2c.blocking_write(
        CODEC_ADDR,
        &[(reg << 1) | ((value >> 8) as u8 & 1), value as u8],
    );
    cs.set_high();
    result
}

/// Resets and configures the codec. `cs` drives the codec's CS pin, which doubles as the I2C
/// address select.
pub async fn init(i2c: &mut I2c<'_, Blocking>, cs: &mut Output<'_>) -> Result<(), Error> {
    write_reg(i2c, cs, REG_RESET, 0)?;
    Timer::after_millis(100).await;

    write_reg(i2c, cs, REG_DIGITAL_AUDIO_PATH, 0)?;
    write_reg(i2c, cs, REG_POWER_DOWN, 0)?;
    write_reg(
        i2c,
        cs,
        REG_DIGITAL_AUDIO_FMT,
        FMT_MASTER | FMT_LEN16 | FMT_I2S,
    )?;
    write_reg(i2c, cs, REG_SAMPLE_RATE, SR_NORMAL)?;
    write_reg(i2c, cs, REG_DIGITAL_IF_ACT, 1)?;
    Timer::after_millis(100).await;

    Ok(())
}
