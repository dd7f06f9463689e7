//! Touch panel: controller, deferral and LEDs wired together.

use core::fmt::Debug;

use embedded_hal::digital::OutputPin;
use embedded_hal::i2c::{I2c, SevenBitAddress};
use log::{debug, error, info, warn};

use crate::config::ElectrodeConfig;
use crate::deferral::{Deferral, Scheduler};
use crate::leds::{self, LedBank};
use crate::{AlertLine, Error, TouchMask, CAP1106};

/// Re-reads attempted after a failed latch clear before giving up on the
/// current alert.
pub const LATCH_CLEAR_RETRIES: u8 = 3;

/// Outcome of one deferred read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Cycle {
    /// The state changed and the LEDs now show it.
    Updated(TouchMask),
    /// Same state as last time, LEDs left alone.
    Unchanged(TouchMask),
    /// The read failed; nothing changed.
    Skipped,
    /// The latch could not be cleared and another read has been scheduled.
    Retrying,
    /// The controller is not installed; no read was attempted.
    Inactive,
}

/// Owns everything the touch pipeline mutates.
///
/// Interrupt code only ever gets the [`Deferral`]'s
/// [`AlertHandler`](crate::deferral::AlertHandler). The deferred task owns
/// the panel and calls [`run_deferred_read`](Self::run_deferred_read), so the
/// last observed state has a single writer.
pub struct TouchPanel<'d, I2C, P, S, const N: usize> {
    config: ElectrodeConfig,
    driver: CAP1106<I2C>,
    leds: LedBank<P, N>,
    deferral: &'d Deferral<S>,
    last: Option<TouchMask>,
    latch_failures: u8,
}

impl<'d, I2C, E, P, S, const N: usize> TouchPanel<'d, I2C, P, S, N>
where
    I2C: I2c<SevenBitAddress, Error = E>,
    E: Debug,
    P: OutputPin,
    S: Scheduler,
{
    /// # Panics
    ///
    /// If the board does not have exactly one LED per electrode.
    pub fn new(
        config: ElectrodeConfig,
        driver: CAP1106<I2C>,
        leds: LedBank<P, N>,
        deferral: &'d Deferral<S>,
    ) -> Self {
        assert!(config.is_consistent(), "LED pins do not match electrode count");
        assert_eq!(config.electrodes.count(), N, "LED bank size does not match electrode count");
        assert_eq!(driver.electrodes(), config.electrodes);

        Self {
            config,
            driver,
            leds,
            deferral,
            last: None,
            latch_failures: 0,
        }
    }

    /// Bring up the LEDs, then the controller.
    ///
    /// On a board with touch enabled the LEDs first show the untouched
    /// state, without recording it as observed. If the controller fails to
    /// initialize the error is returned, ALERT is never armed and the LEDs
    /// keep their boot state. With touch disabled only the LEDs are set up,
    /// all off.
    pub fn start<A: AlertLine>(&mut self, alert: &mut A) -> Result<(), Error<E>> {
        if !self.config.touch_enabled {
            info!("touch disabled, {} LEDs only", N);
            if let Err(err) = self.leds.set_all(false) {
                error!("LED init failed: {:?}", err);
            }
            return Ok(());
        }

        if let Err(err) = self.leds.apply(&leds::map(TouchMask(0))) {
            error!("LED init failed: {:?}", err);
        }

        if let Err(err) = self.driver.init(alert) {
            error!("touch controller not operational: {:?}", err);
            return Err(err);
        }
        self.deferral.arm();
        Ok(())
    }

    /// Body of the deferred task scheduled by an ALERT edge.
    ///
    /// Always leaves the deferral idle again unless it scheduled a retry.
    pub fn run_deferred_read(&mut self) -> Cycle {
        if !self.driver.is_installed() {
            self.deferral.complete();
            return Cycle::Inactive;
        }

        let cycle = match self.driver.read_touch() {
            Ok(reading) => {
                debug!("CAP read {:x} - {:x}", reading.latched.0, reading.current.0);
                self.observe(reading.state())
            }
            // Until a latch clear succeeds, any failure spends the retry budget.
            Err(err) if matches!(err, Error::LatchClear(_)) || self.latch_failures > 0 => {
                if self.latch_failures < LATCH_CLEAR_RETRIES {
                    self.latch_failures += 1;
                    warn!(
                        "latch not cleared ({}/{}), reading again: {:?}",
                        self.latch_failures, LATCH_CLEAR_RETRIES, err
                    );
                    self.deferral.reschedule();
                    return Cycle::Retrying;
                }
                error!(
                    "latch not cleared after {} retries, ALERT may stay asserted: {:?}",
                    LATCH_CLEAR_RETRIES, err
                );
                Cycle::Skipped
            }
            Err(_) => Cycle::Skipped,
        };

        self.latch_failures = 0;
        self.deferral.complete();
        cycle
    }

    fn observe(&mut self, current: TouchMask) -> Cycle {
        if self.last == Some(current) {
            return Cycle::Unchanged(current);
        }
        match self.leds.apply(&leds::map(current)) {
            Ok(()) => {
                self.last = Some(current);
                Cycle::Updated(current)
            }
            Err(err) => {
                error!("LED update failed: {:?}", err);
                Cycle::Skipped
            }
        }
    }

    /// Last state shown on the LEDs, `None` until the first read.
    pub fn last_observed(&self) -> Option<TouchMask> {
        self.last
    }

    pub fn is_operational(&self) -> bool {
        self.driver.is_installed()
    }

    pub fn config(&self) -> &ElectrodeConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ElectrodeCount;
    use crate::deferral::tests::FakeScheduler;
    use crate::tests::{init_sequence, read_cycle, FakeAlert, ADDR};
    use embedded_hal::i2c::ErrorKind;
    use embedded_hal_mock::eh1::digital::{
        Mock as PinMock, State, Transaction as PinTransaction,
    };
    use embedded_hal_mock::eh1::i2c::{Mock as I2cMock, Transaction};
    use embedded_hal_mock::eh1::MockError;

    /// One pin mock per LED, expecting `frames` to be applied in order.
    fn led_pins<const N: usize>(frames: &[[bool; N]]) -> [PinMock; N] {
        core::array::from_fn(|channel| {
            let expectations: Vec<_> = frames
                .iter()
                .map(|frame| PinTransaction::set(level(frame[channel])))
                .collect();
            PinMock::new(&expectations)
        })
    }

    fn level(on: bool) -> State {
        if on {
            State::High
        } else {
            State::Low
        }
    }

    fn done<const N: usize>(i2c: &mut I2cMock, pins: &mut [PinMock; N]) {
        i2c.done();
        for pin in pins.iter_mut() {
            pin.done();
        }
    }

    type Panel<'d, const N: usize> = TouchPanel<'d, I2cMock, PinMock, FakeScheduler, N>;

    fn panel<'d, const N: usize>(
        config: ElectrodeConfig,
        i2c: &I2cMock,
        pins: &[PinMock; N],
        deferral: &'d Deferral<FakeScheduler>,
    ) -> Panel<'d, N> {
        TouchPanel::new(
            config,
            CAP1106::new(i2c.clone(), ADDR, config.electrodes),
            LedBank::new(pins.clone()),
            deferral,
        )
    }

    const ALL_ON: [bool; 3] = [true; 3];

    #[test]
    fn touch_and_release_three_electrodes() {
        let mut sequence = init_sequence();
        sequence.extend(read_cycle(0b010, 0b010));
        sequence.extend(read_cycle(0b010, 0b000));
        let mut i2c = I2cMock::new(&sequence);
        let mut pins = led_pins(&[ALL_ON, [true, false, true], ALL_ON]);
        let deferral = Deferral::new(FakeScheduler::default());
        let mut alert = FakeAlert::default();

        let mut panel = panel(ElectrodeConfig::THREE_ELECTRODE, &i2c, &pins, &deferral);
        panel.start(&mut alert).unwrap();
        assert!(panel.is_operational());
        assert_eq!(panel.last_observed(), None);

        let handler = deferral.alert_handler();
        assert!(handler.on_falling_edge());
        assert_eq!(panel.run_deferred_read(), Cycle::Updated(TouchMask(0b010)));
        assert!(!deferral.is_pending());

        assert!(handler.on_falling_edge());
        assert_eq!(panel.run_deferred_read(), Cycle::Updated(TouchMask(0)));
        assert_eq!(panel.last_observed(), Some(TouchMask(0)));

        done(&mut i2c, &mut pins);
    }

    #[test]
    fn first_read_of_untouched_still_updates_once() {
        let mut sequence = init_sequence();
        sequence.extend(read_cycle(0, 0));
        sequence.extend(read_cycle(0, 0));
        let mut i2c = I2cMock::new(&sequence);
        // Boot frame, then exactly one update.
        let mut pins = led_pins(&[ALL_ON, ALL_ON]);
        let deferral = Deferral::new(FakeScheduler::default());

        let mut panel = panel(ElectrodeConfig::THREE_ELECTRODE, &i2c, &pins, &deferral);
        panel.start(&mut FakeAlert::default()).unwrap();

        assert_eq!(panel.run_deferred_read(), Cycle::Updated(TouchMask(0)));
        assert_eq!(panel.run_deferred_read(), Cycle::Unchanged(TouchMask(0)));

        done(&mut i2c, &mut pins);
    }

    #[test]
    fn repeated_state_is_not_reapplied() {
        let mut sequence = init_sequence();
        sequence.extend(read_cycle(0b001, 0b001));
        sequence.extend(read_cycle(0b001, 0b001));
        let mut i2c = I2cMock::new(&sequence);
        let mut pins = led_pins(&[ALL_ON, [false, true, true]]);
        let deferral = Deferral::new(FakeScheduler::default());

        let mut panel = panel(ElectrodeConfig::THREE_ELECTRODE, &i2c, &pins, &deferral);
        panel.start(&mut FakeAlert::default()).unwrap();

        assert_eq!(panel.run_deferred_read(), Cycle::Updated(TouchMask(0b001)));
        assert_eq!(panel.run_deferred_read(), Cycle::Unchanged(TouchMask(0b001)));

        done(&mut i2c, &mut pins);
    }

    #[test]
    fn read_error_keeps_last_state() {
        let mut sequence = init_sequence();
        sequence.extend(read_cycle(0b100, 0b100));
        sequence.push(failing_sensor_read());
        let mut i2c = I2cMock::new(&sequence);
        let mut pins = led_pins(&[ALL_ON, [true, true, false]]);
        let deferral = Deferral::new(FakeScheduler::default());

        let mut panel = panel(ElectrodeConfig::THREE_ELECTRODE, &i2c, &pins, &deferral);
        panel.start(&mut FakeAlert::default()).unwrap();
        assert_eq!(panel.run_deferred_read(), Cycle::Updated(TouchMask(0b100)));

        let handler = deferral.alert_handler();
        handler.on_falling_edge();
        assert_eq!(panel.run_deferred_read(), Cycle::Skipped);
        assert_eq!(panel.last_observed(), Some(TouchMask(0b100)));
        assert!(!deferral.is_pending());

        done(&mut i2c, &mut pins);
    }

    #[test]
    fn failed_init_never_arms_or_reads() {
        let mut sequence: Vec<_> = init_sequence().into_iter().take(4).collect();
        let last = sequence.pop().unwrap().with_error(ErrorKind::Other);
        sequence.push(last);
        let mut i2c = I2cMock::new(&sequence);
        let mut pins = led_pins(&[ALL_ON]);
        let deferral = Deferral::new(FakeScheduler::default());
        let mut alert = FakeAlert::default();

        let mut panel = panel(ElectrodeConfig::THREE_ELECTRODE, &i2c, &pins, &deferral);
        assert!(panel.start(&mut alert).is_err());
        assert!(!panel.is_operational());
        assert!(!alert.enabled);
        assert!(!deferral.is_armed());

        let handler = deferral.alert_handler();
        for _ in 0..5 {
            assert!(!handler.on_falling_edge());
        }
        // No further bus traffic is expected by the mock.
        assert_eq!(panel.run_deferred_read(), Cycle::Inactive);
        assert_eq!(panel.last_observed(), None);

        done(&mut i2c, &mut pins);
    }

    #[test]
    fn four_electrode_board_only_sets_up_leds() {
        let mut i2c = I2cMock::new(&[]);
        let mut pins = led_pins(&[[false; 4]]);
        let deferral = Deferral::new(FakeScheduler::default());
        let mut alert = FakeAlert::default();

        let mut panel = panel(ElectrodeConfig::FOUR_ELECTRODE, &i2c, &pins, &deferral);
        panel.start(&mut alert).unwrap();

        assert!(!panel.config().touch_enabled);
        assert!(!panel.is_operational());
        assert!(!alert.input);
        assert!(!deferral.alert_handler().on_falling_edge());
        assert_eq!(panel.run_deferred_read(), Cycle::Inactive);

        done(&mut i2c, &mut pins);
    }

    #[test]
    fn four_electrode_mapping_when_enabled() {
        let config = ElectrodeConfig {
            touch_enabled: true,
            ..ElectrodeConfig::FOUR_ELECTRODE
        };
        let mut sequence = crate::tests::identity();
        sequence.extend([
            Transaction::write_read(ADDR, vec![0x21], vec![0x3F]),
            Transaction::write(ADDR, vec![0x21, 0x0F]),
            Transaction::write_read(ADDR, vec![0x40], vec![0x3F]),
            Transaction::write(ADDR, vec![0x40, 0x0F]),
            Transaction::write(ADDR, vec![0x42, 0x00]),
            Transaction::write(ADDR, vec![0x43, 0x20]),
            Transaction::write_read(ADDR, vec![0x20], vec![0x00]),
            Transaction::write(ADDR, vec![0x20, 0x20]),
            Transaction::write(ADDR, vec![0x22, 0xCE]),
            Transaction::write(ADDR, vec![0x23, 0x0F]),
        ]);
        sequence.extend(read_cycle(0b1000, 0b1000));
        sequence.extend(read_cycle(0b1000, 0b0000));
        let mut i2c = I2cMock::new(&sequence);
        let mut pins = led_pins(&[[true; 4], [true, true, true, false], [true; 4]]);
        let deferral = Deferral::new(FakeScheduler::default());

        let mut panel = panel(config, &i2c, &pins, &deferral);
        panel.start(&mut FakeAlert::default()).unwrap();

        assert_eq!(panel.run_deferred_read(), Cycle::Updated(TouchMask(0b1000)));
        assert_eq!(panel.run_deferred_read(), Cycle::Updated(TouchMask(0)));

        done(&mut i2c, &mut pins);
    }

    fn failing_latch_clear() -> Vec<Transaction> {
        vec![
            Transaction::write_read(ADDR, vec![0x03], vec![0b001]),
            Transaction::write_read(ADDR, vec![0x00], vec![0x01]),
            Transaction::write(ADDR, vec![0x00, 0x00]).with_error(ErrorKind::Other),
        ]
    }

    fn failing_sensor_read() -> Transaction {
        Transaction::write_read(ADDR, vec![0x03], vec![0x00]).with_error(ErrorKind::Other)
    }

    #[test]
    fn latch_clear_failure_is_retried_then_abandoned() {
        let mut sequence = init_sequence();
        for _ in 0..=LATCH_CLEAR_RETRIES {
            sequence.extend(failing_latch_clear());
        }
        let mut i2c = I2cMock::new(&sequence);
        let mut pins = led_pins(&[ALL_ON]);
        let deferral = Deferral::new(FakeScheduler::default());

        let mut panel = panel(ElectrodeConfig::THREE_ELECTRODE, &i2c, &pins, &deferral);
        panel.start(&mut FakeAlert::default()).unwrap();
        deferral.alert_handler().on_falling_edge();

        for _ in 0..LATCH_CLEAR_RETRIES {
            assert_eq!(panel.run_deferred_read(), Cycle::Retrying);
            assert!(deferral.is_pending());
        }
        assert_eq!(panel.run_deferred_read(), Cycle::Skipped);
        assert!(!deferral.is_pending());
        assert_eq!(panel.last_observed(), None);
        assert_eq!(deferral_calls(&deferral), 1 + LATCH_CLEAR_RETRIES as usize);

        done(&mut i2c, &mut pins);
    }

    #[test]
    fn latch_clear_recovers_on_retry() {
        let mut sequence = init_sequence();
        sequence.extend(failing_latch_clear());
        sequence.extend(read_cycle(0b001, 0b001));
        let mut i2c = I2cMock::new(&sequence);
        let mut pins = led_pins(&[ALL_ON, [false, true, true]]);
        let deferral = Deferral::new(FakeScheduler::default());

        let mut panel = panel(ElectrodeConfig::THREE_ELECTRODE, &i2c, &pins, &deferral);
        panel.start(&mut FakeAlert::default()).unwrap();
        deferral.alert_handler().on_falling_edge();

        assert_eq!(panel.run_deferred_read(), Cycle::Retrying);
        assert_eq!(panel.run_deferred_read(), Cycle::Updated(TouchMask(0b001)));
        assert!(!deferral.is_pending());

        done(&mut i2c, &mut pins);
    }

    #[test]
    fn read_errors_while_latched_spend_the_retry_budget() {
        let mut sequence = init_sequence();
        sequence.extend(failing_latch_clear());
        for _ in 0..LATCH_CLEAR_RETRIES {
            sequence.push(failing_sensor_read());
        }
        // Next alert starts with a fresh budget.
        sequence.extend(failing_latch_clear());
        sequence.extend(read_cycle(0b001, 0b001));
        let mut i2c = I2cMock::new(&sequence);
        let mut pins = led_pins(&[ALL_ON, [false, true, true]]);
        let deferral = Deferral::new(FakeScheduler::default());

        let mut panel = panel(ElectrodeConfig::THREE_ELECTRODE, &i2c, &pins, &deferral);
        panel.start(&mut FakeAlert::default()).unwrap();
        let handler = deferral.alert_handler();
        handler.on_falling_edge();

        for _ in 0..LATCH_CLEAR_RETRIES {
            assert_eq!(panel.run_deferred_read(), Cycle::Retrying);
            assert!(deferral.is_pending());
        }
        assert_eq!(panel.run_deferred_read(), Cycle::Skipped);
        assert!(!deferral.is_pending());
        assert_eq!(panel.last_observed(), None);
        assert_eq!(deferral_calls(&deferral), 1 + LATCH_CLEAR_RETRIES as usize);

        assert!(handler.on_falling_edge());
        assert_eq!(panel.run_deferred_read(), Cycle::Retrying);
        assert_eq!(panel.run_deferred_read(), Cycle::Updated(TouchMask(0b001)));
        assert!(!deferral.is_pending());

        done(&mut i2c, &mut pins);
    }

    #[test]
    fn led_failure_does_not_record_state() {
        let mut sequence = init_sequence();
        sequence.extend(read_cycle(0b001, 0b001));
        sequence.extend(read_cycle(0b001, 0b001));
        let mut i2c = I2cMock::new(&sequence);
        // The first pin fails on the update frame, so the bank stops there.
        let mut pins = [
            PinMock::new(&[
                PinTransaction::set(State::High),
                PinTransaction::set(State::Low)
                    .with_error(MockError::Io(std::io::ErrorKind::NotConnected)),
                PinTransaction::set(State::Low),
            ]),
            PinMock::new(&[PinTransaction::set(State::High), PinTransaction::set(State::High)]),
            PinMock::new(&[PinTransaction::set(State::High), PinTransaction::set(State::High)]),
        ];
        let deferral = Deferral::new(FakeScheduler::default());

        let mut panel = panel(ElectrodeConfig::THREE_ELECTRODE, &i2c, &pins, &deferral);
        panel.start(&mut FakeAlert::default()).unwrap();

        assert_eq!(panel.run_deferred_read(), Cycle::Skipped);
        assert_eq!(panel.last_observed(), None);
        assert!(!deferral.is_pending());

        assert_eq!(panel.run_deferred_read(), Cycle::Updated(TouchMask(0b001)));
        assert_eq!(panel.last_observed(), Some(TouchMask(0b001)));

        done(&mut i2c, &mut pins);
    }

    #[test]
    #[should_panic]
    fn led_count_must_match_electrodes() {
        let mut i2c = I2cMock::new(&[]);
        let mut pins = led_pins::<2>(&[]);
        let deferral = Deferral::new(FakeScheduler::default());
        let driver = CAP1106::new(i2c.clone(), ADDR, ElectrodeCount::Three);
        let leds = LedBank::new(pins.clone());
        done(&mut i2c, &mut pins);

        let _ = TouchPanel::new(ElectrodeConfig::THREE_ELECTRODE, driver, leds, &deferral);
    }

    fn deferral_calls(deferral: &Deferral<FakeScheduler>) -> usize {
        deferral.scheduler().calls.get()
    }
}
