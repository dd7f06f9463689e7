use embedded_hal::i2c::{self, SevenBitAddress};

device_driver::create_device! {
  device_name: Device,
  dsl: {
    config {
      type RegisterAddressType = u8;
    }
    /// Main Control. Holds the INT latch (bit 0), which keeps ALERT
    /// asserted until it is cleared.
    register MainControl {
      const ADDRESS = 0x00;
      const SIZE_BITS = 8;

      value: uint = 0..8,
    },
    /// Sensor Input Status. One bit per electrode, CS1 in bit 0.
    register SensorInputStatus {
      type Access = RO;
      const ADDRESS = 0x03;
      const SIZE_BITS = 8;

      value: uint = 0..8,
    },
    /// Configuration. Bit 5 enables the standby channels on this board.
    register Configuration {
      const ADDRESS = 0x20;
      const SIZE_BITS = 8;
      const RESET_VALUE = 0x20;

      value: uint = 0..8,
    },
    /// Sensor Input Enable. Electrodes with a cleared bit are not sampled
    /// in active mode.
    register SensorInputEnable {
      const ADDRESS = 0x21;
      const SIZE_BITS = 8;
      const RESET_VALUE = 0x3F;

      value: uint = 0..8,
    },
    /// Sensor Input Configuration.
    /// [`max_duration`]: time before a held touch is recalibrated away
    /// [`repeat_rate`]: interval between repeated interrupts while held
    register SensorInputConfig {
      const ADDRESS = 0x22;
      const SIZE_BITS = 8;
      const RESET_VALUE = 0xA4;

      repeat_rate: uint as crate::config::Interval = 0..4,
      max_duration: uint as crate::config::MaxDuration = 4..8,
    },
    /// Sensor Input Configuration 2. Minimum hold time before a touch is
    /// treated as press-and-hold.
    register SensorInputPressConfig {
      const ADDRESS = 0x23;
      const SIZE_BITS = 8;
      const RESET_VALUE = 0x07;

      min_press: uint as crate::config::Interval = 0..4,
    },
    /// Standby Channel. Electrodes sampled while in standby.
    register StandbyChannel {
      const ADDRESS = 0x40;
      const SIZE_BITS = 8;

      value: uint = 0..8,
    },
    /// Standby Sensitivity (STBY_SENSE).
    register StandbySensitivity {
      const ADDRESS = 0x42;
      const SIZE_BITS = 8;
      const RESET_VALUE = 0x02;

      sensitivity: uint as crate::config::StandbySensitivity = 0..3,
    },
    /// Standby Threshold.
    /// Range: 0-127
    /// Default: 64
    register StandbyThreshold {
      const ADDRESS = 0x43;
      const SIZE_BITS = 8;
      const RESET_VALUE = 0x40;

      value: uint = 0..7,
    },
    /// Product ID, reads 0x55 on the CAP1106
    register ProductId {
      type Access = RO;
      const ADDRESS = 0xFD;
      const SIZE_BITS = 8;

      value: uint = 0..8,
    },
    /// Manufacturer ID, reads 0x5D for Microchip/SMSC
    register ManufacturerId {
      type Access = RO;
      const ADDRESS = 0xFE;
      const SIZE_BITS = 8;

      value: uint = 0..8,
    },
    /// Silicon revision
    register Revision {
      type Access = RO;
      const ADDRESS = 0xFF;
      const SIZE_BITS = 8;

      value: uint = 0..8,
    },
  }
}

/// INT latch in [`MainControl`](field_sets::MainControl).
pub const MAIN_CONTROL_INT: u8 = 1 << 0;
/// Standby enable in [`Configuration`](field_sets::Configuration).
pub const CONFIGURATION_STANDBY: u8 = 1 << 5;

pub(crate) struct DeviceInterface<I2C> {
    device_address: SevenBitAddress,
    i2c: I2C,
}

impl<I2C> DeviceInterface<I2C> {
    pub(crate) const fn new(i2c: I2C, device_address: SevenBitAddress) -> Self {
        Self {
            i2c,
            device_address,
        }
    }
}

impl<BUS: i2c::I2c> device_driver::RegisterInterface for DeviceInterface<BUS> {
    type Error = DeviceError<BUS::Error>;

    type AddressType = u8;

    /// One `[register, value]` write per call, every register is a single byte.
    fn write_register(
        &mut self,
        address: Self::AddressType,
        _size_bits: u32,
        data: &[u8],
    ) -> Result<(), Self::Error> {
        let mut frame = [address, 0];
        let len = data.len().min(1);
        frame[1..=len].copy_from_slice(&data[..len]);
        self.i2c.write(self.device_address, &frame[..=len])?;
        Ok(())
    }

    fn read_register(
        &mut self,
        address: Self::AddressType,
        _size_bits: u32,
        data: &mut [u8],
    ) -> Result<(), Self::Error> {
        self.i2c.write_read(self.device_address, &[address], data)?;
        Ok(())
    }
}

/// Low level interface error that wraps the I2C error
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct DeviceError<I2c>(pub I2c);

impl<I2c> From<I2c> for DeviceError<I2c> {
    fn from(value: I2c) -> Self {
        Self(value)
    }
}

impl<I2c> core::ops::Deref for DeviceError<I2c> {
    type Target = I2c;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
