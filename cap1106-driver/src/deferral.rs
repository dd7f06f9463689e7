//! Moves work out of the ALERT interrupt.
//!
//! Register transactions block, so they must never run from the GPIO
//! interrupt. The interrupt only flips [`Deferral`] from idle to pending and
//! asks the platform [`Scheduler`] for a one-shot callback; the callback
//! runs [`TouchPanel::run_deferred_read`](crate::panel::TouchPanel::run_deferred_read)
//! which reports completion back here.
//!
//! Edges arriving while a read is pending are dropped. The controller keeps
//! its INT latch set until the pending read clears it, so no touch is lost.

use core::sync::atomic::{AtomicBool, Ordering};

use fugit::MillisDurationU32;

/// Delay between the ALERT edge and the deferred read.
pub const DEFAULT_READ_DELAY: MillisDurationU32 = MillisDurationU32::from_ticks(10);

/// Platform timer able to run the deferred read once, later, outside of
/// interrupt context.
///
/// `schedule_once` is called from interrupt context and must not block.
pub trait Scheduler {
    fn schedule_once(&self, delay: MillisDurationU32);
}

impl<S: Scheduler + ?Sized> Scheduler for &S {
    fn schedule_once(&self, delay: MillisDurationU32) {
        (**self).schedule_once(delay)
    }
}

/// Idle / pending-read state shared between the interrupt and the
/// deferred task.
pub struct Deferral<S> {
    scheduler: S,
    delay: MillisDurationU32,
    armed: AtomicBool,
    pending: AtomicBool,
}

impl<S: Scheduler> Deferral<S> {
    pub const fn new(scheduler: S) -> Self {
        Self::with_delay(scheduler, DEFAULT_READ_DELAY)
    }

    pub const fn with_delay(scheduler: S, delay: MillisDurationU32) -> Self {
        Self {
            scheduler,
            delay,
            armed: AtomicBool::new(false),
            pending: AtomicBool::new(false),
        }
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    /// Capability handed to the ALERT interrupt.
    pub fn alert_handler(&self) -> AlertHandler<'_, S> {
        AlertHandler { deferral: self }
    }

    /// Start accepting edges. Only called once the controller is installed.
    pub(crate) fn arm(&self) {
        self.armed.store(true, Ordering::Release);
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Idle -> pending. Returns `true` when a read was scheduled.
    fn on_edge(&self) -> bool {
        if !self.is_armed() {
            return false;
        }
        if self.pending.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.scheduler.schedule_once(self.delay);
        true
    }

    /// Schedule another read while staying pending. Only the deferred task
    /// calls this.
    pub(crate) fn reschedule(&self) {
        self.scheduler.schedule_once(self.delay);
    }

    /// Pending -> idle, whatever the outcome of the read.
    pub(crate) fn complete(&self) {
        self.pending.store(false, Ordering::Release);
    }
}

/// What interrupt code gets to see of the touch pipeline: it can note an
/// edge and nothing else. There is no path from here to the bus.
pub struct AlertHandler<'d, S> {
    deferral: &'d Deferral<S>,
}

impl<S> Clone for AlertHandler<'_, S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S> Copy for AlertHandler<'_, S> {}

impl<S: Scheduler> AlertHandler<'_, S> {
    /// Call on every falling edge of ALERT.
    ///
    /// Returns `true` if this edge scheduled a read.
    pub fn on_falling_edge(&self) -> bool {
        self.deferral.on_edge()
    }
}
