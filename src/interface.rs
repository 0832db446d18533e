//! Typed register access over a borrowed I2C bus handle.
//!
//! Each sensor owns a [`RegisterInterface`] describing its bus address and
//! word byte order and lends the actual bus object into every call. Bus
//! failures are mapped to [`SensorError`] and propagate to the caller
//! unmodified; this layer never retries.

use crate::{Result, SensorError};

/// Byte order used to assemble 16-bit register values, fixed at construction.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ByteOrder {
    BigEndian,
    LittleEndian,
}

/// Addressing parameters for one device on the bus.
///
/// Registers are addressed either with a single byte (`read_u8`, `read_u16`,
/// `write_u8`) or, for devices with a register map larger than 256 entries,
/// with a 16-bit index whose two bytes (MSB, LSB) are written before the data
/// transfer (the `_wide` variants).
#[derive(Copy, Clone, Debug)]
pub struct RegisterInterface {
    address: u8,
    byte_order: ByteOrder,
}

impl RegisterInterface {
    pub const fn new(address: u8, byte_order: ByteOrder) -> Self {
        Self {
            address,
            byte_order,
        }
    }

    /// The device address on the bus.
    pub fn address(&self) -> u8 {
        self.address
    }

    /// Reads a single byte register.
    pub fn read_u8<I2C>(&self, i2c: &mut I2C, register: u8) -> Result<u8>
    where
        I2C: embedded_hal::blocking::i2c::WriteRead,
    {
        let mut data = [0; 1];

        i2c.write_read(self.address, &[register], &mut data)
            .map_err(|_| SensorError::ReadI2CError)?;

        Ok(data[0])
    }

    /// Reads a 16-bit register, assembling the two bytes per the configured
    /// byte order.
    pub fn read_u16<I2C>(&self, i2c: &mut I2C, register: u8) -> Result<u16>
    where
        I2C: embedded_hal::blocking::i2c::WriteRead,
    {
        let mut data = [0; 2];

        i2c.write_read(self.address, &[register], &mut data)
            .map_err(|_| SensorError::ReadI2CError)?;

        Ok(self.assemble_u16(data))
    }

    /// Reads a 16-bit register and reinterprets it as two's complement
    /// (values >= 0x8000 map to value - 65536).
    pub fn read_i16<I2C>(&self, i2c: &mut I2C, register: u8) -> Result<i16>
    where
        I2C: embedded_hal::blocking::i2c::WriteRead,
    {
        Ok(self.read_u16(i2c, register)? as i16)
    }

    /// Writes a single byte register.
    pub fn write_u8<I2C>(&self, i2c: &mut I2C, register: u8, value: u8) -> Result<()>
    where
        I2C: embedded_hal::blocking::i2c::Write,
    {
        i2c.write(self.address, &[register, value])
            .map_err(|_| SensorError::WriteI2CError)
    }

    /// Reads a byte from a 16-bit-indexed register.
    pub fn read_u8_wide<I2C>(&self, i2c: &mut I2C, register: u16) -> Result<u8>
    where
        I2C: embedded_hal::blocking::i2c::WriteRead,
    {
        let mut data = [0; 1];

        i2c.write_read(self.address, &register.to_be_bytes(), &mut data)
            .map_err(|_| SensorError::ReadI2CError)?;

        log::debug!("read [0x{:04X}] => 0x{:02X}", register, data[0]);

        Ok(data[0])
    }

    /// Reads a 16-bit value from a 16-bit-indexed register.
    pub fn read_u16_wide<I2C>(&self, i2c: &mut I2C, register: u16) -> Result<u16>
    where
        I2C: embedded_hal::blocking::i2c::WriteRead,
    {
        let mut data = [0; 2];

        i2c.write_read(self.address, &register.to_be_bytes(), &mut data)
            .map_err(|_| SensorError::ReadI2CError)?;

        let value = self.assemble_u16(data);
        log::debug!("read [0x{:04X}] => 0x{:04X}", register, value);

        Ok(value)
    }

    /// Writes a byte to a 16-bit-indexed register.
    pub fn write_u8_wide<I2C>(&self, i2c: &mut I2C, register: u16, value: u8) -> Result<()>
    where
        I2C: embedded_hal::blocking::i2c::Write,
    {
        let index = register.to_be_bytes();

        i2c.write(self.address, &[index[0], index[1], value])
            .map_err(|_| SensorError::WriteI2CError)?;

        log::debug!("write [0x{:04X}] <= 0x{:02X}", register, value);

        Ok(())
    }

    fn assemble_u16(&self, bytes: [u8; 2]) -> u16 {
        match self.byte_order {
            ByteOrder::BigEndian => u16::from_be_bytes(bytes),
            ByteOrder::LittleEndian => u16::from_le_bytes(bytes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal_mock::i2c::Mock as I2cMock;
    use embedded_hal_mock::i2c::Transaction as I2cTransaction;
    use embedded_hal_mock::MockError;

    const ADDR: u8 = 0x29;

    #[test]
    fn test_read_u16_byte_order() {
        let expectations = [
            I2cTransaction::write_read(ADDR, [0x10].to_vec(), [0x12, 0x34].to_vec()),
            I2cTransaction::write_read(ADDR, [0x10].to_vec(), [0x12, 0x34].to_vec()),
        ];
        let mut i2c_mock = I2cMock::new(&expectations);

        let big = RegisterInterface::new(ADDR, ByteOrder::BigEndian);
        assert_eq!(big.read_u16(&mut i2c_mock, 0x10), Ok(0x1234));

        let little = RegisterInterface::new(ADDR, ByteOrder::LittleEndian);
        assert_eq!(little.read_u16(&mut i2c_mock, 0x10), Ok(0x3412));

        i2c_mock.done();
    }

    #[test]
    fn test_read_i16_sign_extension() {
        let samples: [u16; 6] = [0x0000, 0x0001, 0x7FFF, 0x8000, 0x8001, 0xFFFF];

        let expectations: Vec<I2cTransaction> = samples
            .iter()
            .map(|value| {
                I2cTransaction::write_read(ADDR, [0x20].to_vec(), value.to_be_bytes().to_vec())
            })
            .collect();
        let mut i2c_mock = I2cMock::new(&expectations);

        let iface = RegisterInterface::new(ADDR, ByteOrder::BigEndian);
        for value in samples {
            let expected = if value < 0x8000 {
                i32::from(value)
            } else {
                i32::from(value) - 65536
            };
            let read = iface.read_i16(&mut i2c_mock, 0x20).unwrap();
            assert_eq!(i32::from(read), expected);
        }

        i2c_mock.done();
    }

    #[test]
    fn test_wide_addressing() {
        let expectations = [
            I2cTransaction::write_read(ADDR, [0x01, 0x0A].to_vec(), [0x30].to_vec()),
            I2cTransaction::write_read(ADDR, [0x00, 0x50].to_vec(), [0x01, 0x2C].to_vec()),
            I2cTransaction::write(ADDR, [0x02, 0x07, 0x01].to_vec()),
        ];
        let mut i2c_mock = I2cMock::new(&expectations);

        let iface = RegisterInterface::new(ADDR, ByteOrder::BigEndian);
        assert_eq!(iface.read_u8_wide(&mut i2c_mock, 0x010A), Ok(0x30));
        assert_eq!(iface.read_u16_wide(&mut i2c_mock, 0x0050), Ok(300));
        assert_eq!(iface.write_u8_wide(&mut i2c_mock, 0x0207, 0x01), Ok(()));

        i2c_mock.done();
    }

    #[test]
    fn test_bus_errors_propagate() {
        let expectations = [
            I2cTransaction::write_read(ADDR, [0x00].to_vec(), [0x00].to_vec())
                .with_error(MockError::Io(std::io::ErrorKind::Other)),
            I2cTransaction::write(ADDR, [0x00, 0x00].to_vec())
                .with_error(MockError::Io(std::io::ErrorKind::Other)),
        ];
        let mut i2c_mock = I2cMock::new(&expectations);

        let iface = RegisterInterface::new(ADDR, ByteOrder::BigEndian);
        assert_eq!(
            iface.read_u8(&mut i2c_mock, 0x00),
            Err(SensorError::ReadI2CError)
        );
        assert_eq!(
            iface.write_u8(&mut i2c_mock, 0x00, 0x00),
            Err(SensorError::WriteI2CError)
        );

        i2c_mock.done();
    }
}
