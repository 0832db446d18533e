//! ST VL6180X proximity (time-of-flight ranging) and ambient light sensor
//! driver.
//!
//! The device comes up in a "fresh out of reset" state and must be programmed
//! with a fixed sequence of vendor tuning registers before it produces valid
//! measurements; the sequence is applied at most once per power cycle unless
//! explicitly forced. Measurements are started register-by-register and
//! polled to completion under a bounded retry budget.

use core::marker::PhantomData;

use crate::interface::{ByteOrder, RegisterInterface};
use crate::Result;

/// Default I2C address of the VL6180X.
pub const VL6180X_ADDR: u8 = 0x29;

/// Model identification register value.
const MODEL_ID_VALUE: u8 = 0xB4;

/// Documented registers of the 16-bit-addressed register map.
#[derive(Copy, Clone, Debug)]
#[repr(u16)]
pub enum Register {
    ModelId = 0x000,
    ModeGpio1 = 0x011,
    InterruptConfig = 0x014,
    InterruptClear = 0x015,
    FreshOutOfReset = 0x016,
    RangeStart = 0x018,
    RangeInterMeasurementPeriod = 0x01B,
    VhvRecalibrate = 0x02E,
    VhvRepeatRate = 0x031,
    AlsStart = 0x038,
    AlsInterMeasurementPeriod = 0x03E,
    AlsAnalogGain = 0x03F,
    AlsIntegrationPeriod = 0x040,
    InterruptStatus = 0x04F,
    AlsResult = 0x050,
    RangeResult = 0x062,
    AveragingSamplePeriod = 0x10A,
}

// Polling policy shared by the range and ALS paths. The source history of
// this driver family carries several divergent retry/interval combinations;
// these values are the canonical ones.
const MAX_POLL_ATTEMPTS: u8 = 10;
const POLL_INTERVAL_MS: u32 = 100;

// Interrupt status decoding: a 3-bit field per measurement type, value 0x04
// meaning "new sample ready". The ALS field sits three bits above the range
// field.
const STATUS_MASK: u8 = 0x07;
const READY_PATTERN: u8 = 0x04;
const RANGE_STATUS_SHIFT: u8 = 0;
const ALS_STATUS_SHIFT: u8 = 3;
const INTERRUPT_CLEAR_ALL: u8 = 0x07;

const SINGLE_SHOT_START: u8 = 0x01;

/// Factory calibrated lux per ALS count at 1x analog gain and 100 ms
/// integration.
const LUX_PER_COUNT: f32 = 0.32;

const DEFAULT_ALS_INTEGRATION_MS: u16 = 100;

/// Mandatory private tuning registers, applied in this exact order on a fresh
/// device (vendor application note). These must be written before the public
/// configuration registers below.
const PRIVATE_TUNING: [(u16, u8); 30] = [
    (0x0207, 0x01),
    (0x0208, 0x01),
    (0x0096, 0x00),
    (0x0097, 0xFD),
    (0x00E3, 0x00),
    (0x00E4, 0x04),
    (0x00E5, 0x02),
    (0x00E6, 0x01),
    (0x00E7, 0x03),
    (0x00F5, 0x02),
    (0x00D9, 0x05),
    (0x00DB, 0xCE),
    (0x00DC, 0x03),
    (0x00DD, 0xF8),
    (0x009F, 0x00),
    (0x00A3, 0x3C),
    (0x00B7, 0x00),
    (0x00BB, 0x3C),
    (0x00B2, 0x09),
    (0x00CA, 0x09),
    (0x0198, 0x01),
    (0x01B0, 0x17),
    (0x01AD, 0x00),
    (0x00FF, 0x05),
    (0x0100, 0x05),
    (0x0199, 0x05),
    (0x01A6, 0x1B),
    (0x01AC, 0x3E),
    (0x01A7, 0x1F),
    (0x0030, 0x00),
];

/// Documented configuration applied after the private block.
const PUBLIC_CONFIG: [(u16, u8); 9] = [
    // GPIO1 as interrupt output
    (Register::ModeGpio1 as u16, 0x10),
    // Averaging sample period (compromise between speed and low noise)
    (Register::AveragingSamplePeriod as u16, 0x30),
    // ALS analog gain 1x (upper nibble must be set)
    (Register::AlsAnalogGain as u16, 0x46),
    // Auto-calibrate every 255 range measurements
    (Register::VhvRepeatRate as u16, 0xFF),
    // ALS integration period 100 ms
    (Register::AlsIntegrationPeriod as u16, 0x63),
    // One-shot temperature recalibration
    (Register::VhvRecalibrate as u16, 0x01),
    // Range inter-measurement period 100 ms
    (Register::RangeInterMeasurementPeriod as u16, 0x09),
    // ALS inter-measurement period 500 ms
    (Register::AlsInterMeasurementPeriod as u16, 0x31),
    // Interrupt on new sample ready for both measurement types
    (Register::InterruptConfig as u16, 0x24),
];

/// Bring-up state of the device, observed via the fresh-out-of-reset flag.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ResetState {
    FreshOutOfReset,
    Configured,
}

/// Analog gain for ambient light measurements.
///
/// The scale is non-linear; the register encoding is the code below OR'd
/// with 0x40.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum AlsGain {
    Gain20 = 0x00,
    Gain10 = 0x01,
    Gain5 = 0x02,
    Gain2_5 = 0x03,
    Gain1_67 = 0x04,
    Gain1_25 = 0x05,
    Gain1 = 0x06,
    Gain40 = 0x07,
}

impl AlsGain {
    /// Maps a raw gain code to the enum. Codes above the highest one clamp to
    /// the maximum gain instead of failing.
    pub fn from_code(code: u8) -> Self {
        match code {
            0x00 => AlsGain::Gain20,
            0x01 => AlsGain::Gain10,
            0x02 => AlsGain::Gain5,
            0x03 => AlsGain::Gain2_5,
            0x04 => AlsGain::Gain1_67,
            0x05 => AlsGain::Gain1_25,
            0x06 => AlsGain::Gain1,
            _ => AlsGain::Gain40,
        }
    }

    /// Converts the gain into the corresponding register value.
    pub fn register_value(self) -> u8 {
        0x40 | self as u8
    }
}

impl From<AlsGain> for f32 {
    fn from(gain: AlsGain) -> Self {
        match gain {
            AlsGain::Gain20 => 20.0,
            AlsGain::Gain10 => 10.0,
            AlsGain::Gain5 => 5.0,
            AlsGain::Gain2_5 => 2.5,
            AlsGain::Gain1_67 => 1.67,
            AlsGain::Gain1_25 => 1.25,
            AlsGain::Gain1 => 1.0,
            AlsGain::Gain40 => 40.0,
        }
    }
}

/// Converts a raw ALS count into lux for a given analog gain and integration
/// time.
///
/// A zero integration period cannot produce counts; it yields 0 lux rather
/// than a division by zero.
pub fn convert_lux(raw: u16, gain: AlsGain, integration_time_ms: u16) -> f32 {
    if integration_time_ms == 0 {
        return 0.0;
    }

    f32::from(raw) * LUX_PER_COUNT * 100.0 / (f32::from(gain) * f32::from(integration_time_ms))
}

/// Represents an I2C-connected VL6180X sensor.
#[derive(Copy, Clone, Debug)]
pub struct Vl6180x<I2C, D> {
    /// Marker to satisfy the compiler.
    _delay: PhantomData<D>,

    /// Marker to satisfy the compiler.
    _i2c: PhantomData<I2C>,

    /// Register access for this device.
    iface: RegisterInterface,

    /// Analog gain currently programmed for ALS measurements.
    gain: AlsGain,

    /// Integration time currently programmed for ALS measurements.
    als_integration_ms: u16,

    /// Bring-up state after the last `initialize` call.
    state: ResetState,
}

impl<I2C, D> Vl6180x<I2C, D>
where
    D: embedded_hal::blocking::delay::DelayMs<u32>,
    I2C: embedded_hal::blocking::i2c::Write + embedded_hal::blocking::i2c::WriteRead,
{
    /// Creates a connection with a VL6180X sensor at the default address.
    ///
    /// Verifies the model identification register (a mismatch is logged as a
    /// warning but does not fail construction) and applies the vendor tuning
    /// sequence if the device is fresh out of reset.
    pub fn new(i2c: &mut I2C) -> Result<Self> {
        Self::with_address(i2c, VL6180X_ADDR)
    }

    /// Creates a connection with a VL6180X sensor at a specific address.
    pub fn with_address(i2c: &mut I2C, address: u8) -> Result<Self> {
        let iface = RegisterInterface::new(address, ByteOrder::BigEndian);

        let model_id = iface.read_u8_wide(i2c, Register::ModelId as u16)?;
        if model_id == MODEL_ID_VALUE {
            log::debug!("VL6180X found: model id is 0x{:02X}", model_id);
        } else {
            log::warn!(
                "no VL6180X found: model id is 0x{:02X}, should be 0x{:02X}",
                model_id,
                MODEL_ID_VALUE
            );
        }

        let mut sensor = Self {
            _delay: PhantomData,
            _i2c: PhantomData,
            iface,
            gain: AlsGain::Gain1,
            als_integration_ms: DEFAULT_ALS_INTEGRATION_MS,
            state: ResetState::FreshOutOfReset,
        };
        sensor.initialize(i2c, false)?;

        Ok(sensor)
    }

    /// Applies the tuning register sequence if the device is fresh out of
    /// reset (or unconditionally when `force` is set) and clears the
    /// fresh-out-of-reset flag.
    ///
    /// On an already configured device without `force`, no tuning writes are
    /// issued.
    pub fn initialize(&mut self, i2c: &mut I2C, force: bool) -> Result<()> {
        let fresh = self
            .iface
            .read_u8_wide(i2c, Register::FreshOutOfReset as u16)?
            & 0x01
            != 0;

        if !fresh && !force {
            log::debug!("VL6180X already configured, skipping tuning sequence");
            self.state = ResetState::Configured;
            return Ok(());
        }

        for &(register, value) in PRIVATE_TUNING.iter() {
            self.iface.write_u8_wide(i2c, register, value)?;
        }
        for &(register, value) in PUBLIC_CONFIG.iter() {
            self.iface.write_u8_wide(i2c, register, value)?;
        }
        self.iface
            .write_u8_wide(i2c, Register::FreshOutOfReset as u16, 0x00)?;

        self.state = ResetState::Configured;

        Ok(())
    }

    /// Bring-up state after construction or the last
    /// [`initialize`](Self::initialize) call.
    pub fn reset_state(&self) -> ResetState {
        self.state
    }

    /// Sets the analog gain for subsequent ambient light measurements.
    pub fn set_als_gain(&mut self, gain: AlsGain, i2c: &mut I2C) -> Result<()> {
        self.gain = gain;
        self.iface
            .write_u8_wide(i2c, Register::AlsAnalogGain as u16, gain.register_value())
    }

    /// Reads the analog gain currently programmed into the device.
    pub fn read_als_gain(&mut self, i2c: &mut I2C) -> Result<AlsGain> {
        let value = self
            .iface
            .read_u8_wide(i2c, Register::AlsAnalogGain as u16)?;

        Ok(AlsGain::from_code(value & 0x07))
    }

    /// Sets the integration time for subsequent ambient light measurements.
    ///
    /// The device supports periods of 1 to 256 ms; values outside that range
    /// saturate, so the period used in the lux conversion always matches the
    /// one programmed into the device.
    pub fn set_als_integration_time(&mut self, time_ms: u16, i2c: &mut I2C) -> Result<()> {
        let clamped = time_ms.clamp(1, 256);
        self.als_integration_ms = clamped;
        // The register holds the period minus one (0x63 == 100 ms).
        self.iface.write_u8_wide(
            i2c,
            Register::AlsIntegrationPeriod as u16,
            (clamped - 1) as u8,
        )
    }

    /// Performs a single-shot range measurement, in millimetres.
    ///
    /// Returns `Ok(None)` if the measurement did not complete within the
    /// polling budget; the caller decides whether to retry.
    pub fn read_range_single_shot(&mut self, delay: &mut D, i2c: &mut I2C) -> Result<Option<u8>> {
        self.poll_measurement(
            delay,
            i2c,
            Register::RangeStart,
            RANGE_STATUS_SHIFT,
            |iface, i2c| iface.read_u8_wide(i2c, Register::RangeResult as u16),
        )
    }

    /// Performs a single-shot ambient light measurement and returns the raw
    /// ALS count.
    pub fn read_ambient_light_raw(&mut self, delay: &mut D, i2c: &mut I2C) -> Result<Option<u16>> {
        self.poll_measurement(
            delay,
            i2c,
            Register::AlsStart,
            ALS_STATUS_SHIFT,
            |iface, i2c| iface.read_u16_wide(i2c, Register::AlsResult as u16),
        )
    }

    /// Performs a single-shot ambient light measurement, in lux.
    pub fn read_ambient_light(&mut self, delay: &mut D, i2c: &mut I2C) -> Result<Option<f32>> {
        let raw = self.read_ambient_light_raw(delay, i2c)?;

        Ok(raw.map(|raw| convert_lux(raw, self.gain, self.als_integration_ms)))
    }

    /// Starts a measurement and polls the interrupt status until the ready
    /// pattern appears or the attempt budget is exhausted. The interrupt
    /// flags are cleared on both exit paths.
    fn poll_measurement<T, F>(
        &mut self,
        delay: &mut D,
        i2c: &mut I2C,
        start_register: Register,
        status_shift: u8,
        read_result: F,
    ) -> Result<Option<T>>
    where
        F: Fn(&RegisterInterface, &mut I2C) -> Result<T>,
    {
        self.iface
            .write_u8_wide(i2c, start_register as u16, SINGLE_SHOT_START)?;

        let mut result = None;
        for _ in 0..MAX_POLL_ATTEMPTS {
            let status = self
                .iface
                .read_u8_wide(i2c, Register::InterruptStatus as u16)?;
            if (status >> status_shift) & STATUS_MASK == READY_PATTERN {
                result = Some(read_result(&self.iface, &mut *i2c)?);
                break;
            }
            delay.delay_ms(POLL_INTERVAL_MS);
        }

        self.iface
            .write_u8_wide(i2c, Register::InterruptClear as u16, INTERRUPT_CLEAR_ALL)?;

        if result.is_none() {
            log::warn!("measurement did not complete within the polling budget");
        }

        Ok(result)
    }
}
