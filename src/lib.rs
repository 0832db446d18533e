//! This crate provides platform agnostic no_std drivers for two I2C-attached
//! environmental sensors: the Bosch BMP180 barometric pressure/temperature
//! sensor and the ST VL6180X proximity/ambient light sensor. The drivers are
//! compatible with the [`embedded-hal`](https://crates.io/crates/embedded-hal)
//! blocking traits.
//!
//! ## Supported features
//! * BMP180: calibration loading, fixed-point temperature and pressure
//!   compensation, selectable oversampling, altitude and mmHg conversions
//! * VL6180X: one-time tuning register bring-up after reset, single-shot
//!   range measurements, ambient light measurements with configurable analog
//!   gain and integration time, lux conversion
//!
//! ## Unsupported features
//! * Bus or device discovery beyond the fixed-address identity check
//! * Interrupt-driven (GPIO) measurement completion; results are polled
//! * Async
//!
//! ## Usage
//!
//! Both drivers borrow the bus and delay objects per call, so several sensor
//! instances can share one physical bus: open the bus once at program start
//! and lend the same `&mut` handle to every driver. The crate itself holds no
//! bus state and provides no locking; serializing concurrent access to one
//! bus is the caller's responsibility.
//!
//! ### Reading temperature and pressure
//!
//! ```ignore
//! use enviro_sensors::{Bmp180, Oversampling};
//!
//! let mut i2c = hal::I2cdev::new("/dev/i2c-1").unwrap();
//! let mut delay = hal::Delay;
//!
//! let mut bmp180 = Bmp180::new(&mut i2c, Oversampling::Standard).unwrap();
//! let (celsius, pascal) = bmp180
//!     .read_temperature_and_pressure(&mut delay, &mut i2c)
//!     .unwrap();
//!
//! println!("{} C, {} Pa", celsius, pascal);
//! ```
//!
//! ### Reading range and ambient light
//!
//! ```ignore
//! use enviro_sensors::Vl6180x;
//!
//! // Applies the vendor tuning sequence if the sensor is fresh out of reset.
//! let mut vl6180x = Vl6180x::new(&mut i2c).unwrap();
//!
//! // `None` means the measurement did not complete within the polling
//! // budget; this is an expected outcome, not a bus failure.
//! if let Some(mm) = vl6180x.read_range_single_shot(&mut delay, &mut i2c).unwrap() {
//!     println!("range: {} mm", mm);
//! }
//! if let Some(lux) = vl6180x.read_ambient_light(&mut delay, &mut i2c).unwrap() {
//!     println!("ambient light: {} lux", lux);
//! }
//! ```

#![cfg_attr(not(test), no_std)]

pub mod bmp180;
pub mod interface;
pub mod vl6180x;

pub use bmp180::{Bmp180, Calibration, Oversampling, BMP180_ADDR};
pub use interface::{ByteOrder, RegisterInterface};
pub use vl6180x::{AlsGain, ResetState, Vl6180x, VL6180X_ADDR};

/// Shorthand for all functions returning an error in this crate.
pub type Result<T> = core::result::Result<T, SensorError>;

/// Represents any error that may happen during communication or compensation.
#[derive(Copy, Clone, Debug, Ord, PartialOrd, Eq, PartialEq)]
pub enum SensorError {
    /// An error occurred while reading from the sensor.
    ReadI2CError,
    /// An error occurred while writing to the sensor.
    WriteI2CError,
    /// A compensation intermediate left its valid domain. Only possible with
    /// corrupt calibration data.
    ComputationError,
}
