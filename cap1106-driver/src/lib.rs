//! Driver for the Microchip CAP1106 capacitive touch controller and the
//! status LEDs it drives.
//!
//! The crate is split the way the data flows:
//!
//! - [`CAP1106`] talks to the controller: the one-shot initialization
//!   sequence, reading the touch state and clearing the INT latch.
//! - [`deferral`] turns the ALERT interrupt into a read scheduled outside
//!   of interrupt context.
//! - [`leds`] maps a [`TouchMask`] to LED states.
//! - [`panel`] ties the three together and remembers the last state shown.
//!
//! Board specifics (electrode count, pins, calibration) live in [`config`].
#![cfg_attr(not(test), no_std)]

use core::fmt::Debug;

use embedded_hal::i2c::{I2c, SevenBitAddress};
use log::{debug, error, info, warn};

pub mod config;
pub mod deferral;
pub mod device;
pub mod leds;
pub mod panel;

use config::{Calibration, ElectrodeCount};
use device::{Device, DeviceError, DeviceInterface, CONFIGURATION_STANDBY, MAIN_CONTROL_INT};

/// Per-electrode touch bits, electrode 1 in bit 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct TouchMask(pub u8);

impl TouchMask {
    pub const fn is_touched(self, electrode: usize) -> bool {
        electrode < 8 && self.0 & (1 << electrode) != 0
    }

    /// Keep only the wired electrodes.
    pub const fn masked(self, electrodes: ElectrodeCount) -> Self {
        Self(self.0 & electrodes.mask())
    }
}

/// The two snapshots taken by [`CAP1106::read_touch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct TouchReading {
    /// Sensor input before the latch was cleared. May still show a touch
    /// that has already been released. Diagnostic only.
    pub latched: TouchMask,
    /// Sensor input after the latch was cleared.
    pub current: TouchMask,
}

impl TouchReading {
    /// The settled touch state.
    pub const fn state(&self) -> TouchMask {
        self.current
    }
}

/// Identification registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct Identity {
    pub product_id: u8,
    pub manufacturer_id: u8,
    pub revision: u8,
}

/// Steps of the initialization sequence, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum InitStep {
    SensorEnable,
    StandbyChannel,
    StandbySensitivity,
    StandbyThreshold,
    Configuration,
    SensorConfig,
    PressConfig,
}

/// Errors reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Error<E> {
    /// A bus transaction failed during initialization.
    Init(InitStep, E),
    /// Reading the sensor input register failed.
    Read(E),
    /// Clearing the INT latch failed. ALERT may stay asserted.
    LatchClear(E),
    /// The ALERT line could not be set up as a falling edge interrupt.
    PinConfig,
}

/// The controller's ALERT line as seen by the driver.
///
/// Implement this on top of the HAL's input pin. The interrupt routine
/// itself belongs to the platform and must only forward to
/// [`AlertHandler::on_falling_edge`](deferral::AlertHandler::on_falling_edge).
pub trait AlertLine {
    type Error: Debug;

    fn set_input(&mut self) -> Result<(), Self::Error>;
    fn listen_falling_edge(&mut self) -> Result<(), Self::Error>;
    fn enable_interrupt(&mut self) -> Result<(), Self::Error>;
}

/// CAP1106 on an I²C bus.
///
/// The bus is taken by value; pass `&mut bus` or a shared bus device to keep
/// using a bus that was created elsewhere.
pub struct CAP1106<I2C> {
    device: Device<DeviceInterface<I2C>>,
    electrodes: ElectrodeCount,
    calibration: Calibration,
    installed: bool,
}

impl<I2C, E> CAP1106<I2C>
where
    I2C: I2c<SevenBitAddress, Error = E>,
    E: Debug,
{
    pub fn new(i2c: I2C, address: SevenBitAddress, electrodes: ElectrodeCount) -> Self {
        Self::with_calibration(i2c, address, electrodes, Calibration::default())
    }

    pub fn with_calibration(
        i2c: I2C,
        address: SevenBitAddress,
        electrodes: ElectrodeCount,
        calibration: Calibration,
    ) -> Self {
        Self {
            device: Device::new(DeviceInterface::new(i2c, address)),
            electrodes,
            calibration,
            installed: false,
        }
    }

    /// Whether [`init`](Self::init) ran to completion.
    pub fn is_installed(&self) -> bool {
        self.installed
    }

    pub fn electrodes(&self) -> ElectrodeCount {
        self.electrodes
    }

    pub fn read_identity(&mut self) -> Result<Identity, DeviceError<E>> {
        Ok(Identity {
            product_id: self.device.product_id().read()?.value(),
            manufacturer_id: self.device.manufacturer_id().read()?.value(),
            revision: self.device.revision().read()?.value(),
        })
    }

    /// Configure the controller and arm ALERT.
    ///
    /// Runs once. The sequence stops at the first failing transaction and
    /// leaves whatever was already written in place. The identification
    /// read up front is informational and does not stop the sequence.
    pub fn init<A: AlertLine>(&mut self, alert: &mut A) -> Result<(), Error<E>> {
        match self.read_identity() {
            Ok(id) => info!(
                "CAP1106 product 0x{:02x}, manufacturer 0x{:02x}, revision 0x{:02x}",
                id.product_id, id.manufacturer_id, id.revision
            ),
            Err(err) => warn!("CAP1106 identification failed: {:?}", err.0),
        }

        self.configure()?;

        arm_alert(alert).map_err(|err| {
            error!("ALERT pin setup failed: {:?}", err);
            Error::PinConfig
        })?;

        self.installed = true;
        info!("CAP1106 initialized");
        Ok(())
    }

    fn configure(&mut self) -> Result<(), Error<E>> {
        let mask = self.electrodes.mask();
        let calibration = self.calibration;

        let enabled = self
            .device
            .sensor_input_enable()
            .read()
            .map_err(step_failed(InitStep::SensorEnable))?
            .value();
        debug!("SENSOR_ENABLE = 0x{:02x}", enabled);
        self.device
            .sensor_input_enable()
            .write(|reg| reg.set_value(enabled & mask))
            .map_err(step_failed(InitStep::SensorEnable))?;
        debug!("SENSOR_ENABLE <- 0x{:02x}", enabled & mask);

        let standby = self
            .device
            .standby_channel()
            .read()
            .map_err(step_failed(InitStep::StandbyChannel))?
            .value();
        debug!("STANDBY_CHANNEL = 0x{:02x}", standby);
        self.device
            .standby_channel()
            .write(|reg| reg.set_value(standby & mask))
            .map_err(step_failed(InitStep::StandbyChannel))?;
        debug!("STANDBY_CHANNEL <- 0x{:02x}", standby & mask);

        self.device
            .standby_sensitivity()
            .write(|reg| reg.set_sensitivity(calibration.standby_sensitivity))
            .map_err(step_failed(InitStep::StandbySensitivity))?;
        debug!("STANDBY_SENSITIVITY <- {:?}", calibration.standby_sensitivity);

        self.device
            .standby_threshold()
            .write(|reg| reg.set_value(calibration.standby_threshold.into()))
            .map_err(step_failed(InitStep::StandbyThreshold))?;
        debug!("STANDBY_THRESH <- {:?}", calibration.standby_threshold);

        let config = self
            .device
            .configuration()
            .read()
            .map_err(step_failed(InitStep::Configuration))?
            .value();
        debug!("CONFIG = 0x{:02x}", config);
        self.device
            .configuration()
            .write(|reg| reg.set_value(config | CONFIGURATION_STANDBY))
            .map_err(step_failed(InitStep::Configuration))?;
        debug!("CONFIG <- 0x{:02x}", config | CONFIGURATION_STANDBY);

        self.device
            .sensor_input_config()
            .write(|reg| {
                reg.set_max_duration(calibration.max_duration);
                reg.set_repeat_rate(calibration.repeat_rate);
            })
            .map_err(step_failed(InitStep::SensorConfig))?;
        debug!(
            "SENSOR_CONFIG <- repeat {}ms, max duration {}ms",
            calibration.repeat_rate.millis(),
            calibration.max_duration.millis()
        );

        self.device
            .sensor_input_press_config()
            .write(|reg| reg.set_min_press(calibration.min_press))
            .map_err(step_failed(InitStep::PressConfig))?;
        debug!("SENSOR_CONFIG2 <- press {}ms", calibration.min_press.millis());

        Ok(())
    }

    /// Read the touch state.
    ///
    /// Sensor input is read, the INT latch cleared, and sensor input read
    /// again. Only the second read, [`TouchReading::current`], reflects the
    /// settled state.
    pub fn read_touch(&mut self) -> Result<TouchReading, Error<E>> {
        let latched = self.read_sensor_input()?;
        self.clear_latch().map_err(|err| Error::LatchClear(err.0))?;
        let current = self.read_sensor_input()?;
        Ok(TouchReading { latched, current })
    }

    fn read_sensor_input(&mut self) -> Result<TouchMask, Error<E>> {
        match self.device.sensor_input_status().read() {
            Ok(status) => Ok(TouchMask(status.value()).masked(self.electrodes)),
            Err(err) => {
                error!("read SENSOR_INPUT failed: {:?}", err.0);
                Err(Error::Read(err.0))
            }
        }
    }

    /// Clear the INT bit in Main Control, releasing ALERT.
    pub fn clear_latch(&mut self) -> Result<(), DeviceError<E>> {
        let control = self
            .device
            .main_control()
            .read()
            .inspect_err(|err| error!("read MAIN_CONTROL failed: {:?}", err.0))?
            .value();
        self.device
            .main_control()
            .write(|reg| reg.set_value(control & !MAIN_CONTROL_INT))
            .inspect_err(|err| error!("write MAIN_CONTROL failed: {:?}", err.0))
    }
}

fn arm_alert<A: AlertLine>(alert: &mut A) -> Result<(), A::Error> {
    alert.set_input()?;
    alert.listen_falling_edge()?;
    alert.enable_interrupt()
}

fn step_failed<E: Debug>(step: InitStep) -> impl Fn(DeviceError<E>) -> Error<E> {
    move |err| {
        error!("CAP1106 init aborted at {:?}: {:?}", step, err.0);
        Error::Init(step, err.0)
    }
}
