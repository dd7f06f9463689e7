#![no_std]
#![no_main]

use core::cell::{Cell, RefCell};

use cap1106_device_driver::{
    config::ElectrodeConfig,
    deferral::{Deferral, Scheduler},
    leds::LedBank,
    panel::TouchPanel,
    AlertLine, CAP1106,
};
use critical_section::Mutex;
use esp_backtrace as _;
use esp_hal::{
    clock::CpuClock,
    delay::Delay,
    gpio::{Event, Input, Io, Level, Output, Pull},
    handler, i2c, main, time,
};
use fugit::MillisDurationU32;
use log::{debug, error, info};

/// One-shot deadline polled by the main loop, in microseconds since boot.
struct DeadlineScheduler {
    deadline: Mutex<Cell<Option<u64>>>,
}

impl DeadlineScheduler {
    const fn new() -> Self {
        Self {
            deadline: Mutex::new(Cell::new(None)),
        }
    }

    /// Consume the deadline if it has passed.
    fn take_due(&self, now: u64) -> bool {
        critical_section::with(|cs| {
            let slot = self.deadline.borrow(cs);
            match slot.get() {
                Some(at) if at <= now => {
                    slot.set(None);
                    true
                }
                _ => false,
            }
        })
    }
}

impl Scheduler for DeadlineScheduler {
    fn schedule_once(&self, delay: MillisDurationU32) {
        let at = time::now().ticks() + u64::from(delay.to_micros());
        critical_section::with(|cs| self.deadline.borrow(cs).set(Some(at)));
    }
}

static DEFERRAL: Deferral<DeadlineScheduler> = Deferral::new(DeadlineScheduler::new());
static ALERT: Mutex<RefCell<Option<Input<'static>>>> = Mutex::new(RefCell::new(None));

/// ALERT pin that hands itself over to the GPIO interrupt once listening.
struct AlertPin {
    pin: Option<Input<'static>>,
    falling: bool,
}

#[derive(Debug)]
struct AlertPinTaken;

impl AlertLine for AlertPin {
    type Error = AlertPinTaken;

    fn set_input(&mut self) -> Result<(), Self::Error> {
        // Built as a pulled-up input already.
        self.pin.as_ref().map(|_| ()).ok_or(AlertPinTaken)
    }

    fn listen_falling_edge(&mut self) -> Result<(), Self::Error> {
        self.falling = true;
        self.set_input()
    }

    fn enable_interrupt(&mut self) -> Result<(), Self::Error> {
        let mut pin = self.pin.take().ok_or(AlertPinTaken)?;
        critical_section::with(|cs| {
            if self.falling {
                pin.listen(Event::FallingEdge);
            }
            ALERT.borrow_ref_mut(cs).replace(pin);
        });
        Ok(())
    }
}

#[handler]
fn alert_edge() {
    critical_section::with(|cs| {
        if let Some(pin) = ALERT.borrow_ref_mut(cs).as_mut() {
            if pin.is_interrupt_set() {
                pin.clear_interrupt();
                DEFERRAL.alert_handler().on_falling_edge();
            }
        }
    });
}

#[main]
fn main() -> ! {
    esp_println::logger::init_logger(log::LevelFilter::Debug);

    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);

    let board = ElectrodeConfig::THREE_ELECTRODE;
    info!("touch LEDs starting: {:?}", board);

    let mut io = Io::new(peripherals.IO_MUX);
    io.set_interrupt_handler(alert_edge);

    let bus = i2c::master::I2c::new(
        peripherals.I2C0,
        i2c::master::Config::default().with_frequency(board.bus_frequency),
    )
    .unwrap()
    .with_sda(peripherals.GPIO5)
    .with_scl(peripherals.GPIO18);

    let leds = LedBank::new([
        Output::new(peripherals.GPIO25, Level::Low),
        Output::new(peripherals.GPIO33, Level::Low),
        Output::new(peripherals.GPIO32, Level::Low),
    ]);

    let mut alert = AlertPin {
        pin: Some(Input::new(peripherals.GPIO17, Pull::Up)),
        falling: false,
    };

    let driver = CAP1106::new(bus, board.address, board.electrodes);
    let mut panel = TouchPanel::new(board, driver, leds, &DEFERRAL);

    if let Err(err) = panel.start(&mut alert) {
        error!("touch controller unavailable, LEDs only: {:?}", err);
    }

    let delay = Delay::new();
    loop {
        if DEFERRAL.scheduler().take_due(time::now().ticks()) {
            let cycle = panel.run_deferred_read();
            debug!("{:?}", cycle);
        }
        delay.delay_millis(1);
    }
}
