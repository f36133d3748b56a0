//! Low-power ticker on a 24-bit free-running timer
//!
//! The timer is clocked from LIRC so it keeps counting, and can wake the core, while the
//! processor is powered down. The counter runs in continuous mode and wraps silently every
//! 2^24 ticks; CMP is compared against it to raise the wake-up interrupt.
//!
//! Only the last observed counter value and the programmed deadlines are tracked here. Wrap
//! counting for a 64-bit time base is done by the embassy time driver.
//!
//! CMP is shared by two users: the application deadline set through
//! [`LpTicker::set_interrupt`] and the alarm of the time driver. Both are kept here and the
//! comparator is always programmed with whichever the counter reaches first.

use core::cell::Cell;

use embassy_sync::blocking_mutex::CriticalSectionMutex;
use portable_atomic::{AtomicBool, AtomicU32, Ordering};

use crate::intc::InterruptController;
use crate::interrupt::Interrupt;
use crate::rcc::SystemControl;
use crate::sleep::{Sleep, SleepContext};
use crate::time::{hz, khz, Hertz};
use crate::timer::{
    TimerRegisters, COUNTER_MASK, CTL_CNTDATEN, CTL_CNTEN, CTL_INTEN, CTL_OPMODE_CONTINUOUS, CTL_PSC_MSK, CTL_WKEN,
    INTSTS_TIF, INTSTS_TWKF,
};

/// Smallest value the comparator accepts
pub const MIN_COMPARE: u32 = 2;
/// Largest value the comparator accepts
pub const MAX_COMPARE: u32 = COUNTER_MASK;

/// The prescaler is programmed as a 7-bit value.
const PRESCALER_MAX: u32 = 127;

/// Number of ticks before the counter wraps.
const COUNTER_WRAP: u32 = COUNTER_MASK + 1;

/// Low-power ticker configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// Frequency of the clock feeding the timer (LIRC)
    pub clock: Hertz,
    /// Desired tick frequency
    pub tick: Hertz,
}

impl Config {
    pub const fn new() -> Self {
        Self {
            clock: khz(10),
            tick: hz(1_000),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

/// Prescaler dividing `clock` down to `tick`, i.e. `clock / tick - 1`.
///
/// `None` when the division fails (zero tick rate or a tick faster than the clock).
pub fn prescaler(clock: Hertz, tick: Hertz) -> Option<u32> {
    clock.0.checked_div(tick.0)?.checked_sub(1)
}

/// Ticks from `from` until the counter reads `to`.
fn ticks_until(from: u32, to: u32) -> u32 {
    to.wrapping_sub(from) & COUNTER_MASK
}

/// A compare value and the counter reading it was programmed at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Deadline {
    set_at: u32,
    at: u32,
}

impl Deadline {
    fn new(now: u32, at: u32) -> Self {
        Self { set_at: now, at }
    }

    /// Ticks left at `now`, `None` once the counter has passed `at`.
    fn remaining(&self, now: u32) -> Option<u32> {
        // A compare value equal to the current count matches after a full wrap
        let span = match ticks_until(self.set_at, self.at) {
            0 => COUNTER_WRAP,
            span => span,
        };
        span.checked_sub(ticks_until(self.set_at, now)).filter(|&left| left > 0)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Deadlines {
    /// Set through `set_interrupt`
    app: Option<Deadline>,
    /// Set by the time driver
    alarm: Option<Deadline>,
}

impl Deadlines {
    const fn new() -> Self {
        Self { app: None, alarm: None }
    }

    /// Drop expired deadlines and pick the compare value reached first from `now`.
    fn next(&mut self, now: u32) -> Option<u32> {
        self.app = self.app.filter(|d| d.remaining(now).is_some());
        self.alarm = self.alarm.filter(|d| d.remaining(now).is_some());

        [self.app, self.alarm]
            .into_iter()
            .flatten()
            .min_by_key(|d| d.remaining(now))
            .map(|d| d.at)
    }
}

/// Monotonic low-power time source.
///
/// A single instance lives for the lifetime of the program (see [`crate::lp_ticker`]). Once
/// initialised the timer is never stopped.
pub struct LpTicker<T, C> {
    timer: T,
    intc: C,
    config: CriticalSectionMutex<Cell<Config>>,
    inited: AtomicBool,
    counter_tick: AtomicU32,
    wakeup_tick: AtomicU32,
    deadlines: CriticalSectionMutex<Cell<Deadlines>>,
}

fn timer2_vector() {
    crate::lp_ticker().on_interrupt();

    #[cfg(feature = "time-driver")]
    crate::embassy::on_compare();
}

impl<T: TimerRegisters, C: InterruptController> LpTicker<T, C> {
    /// The TIMER2 vector installed by [`Self::init`] always services [`crate::lp_ticker`], so
    /// the crate builds exactly one instance on the hardware.
    pub(crate) const fn new(timer: T, intc: C) -> Self {
        Self {
            timer,
            intc,
            config: CriticalSectionMutex::new(Cell::new(Config::new())),
            inited: AtomicBool::new(false),
            counter_tick: AtomicU32::new(0),
            wakeup_tick: AtomicU32::new(MAX_COMPARE),
            deadlines: CriticalSectionMutex::new(Cell::new(Deadlines::new())),
        }
    }

    /// Replace the clock configuration. Only takes effect if the ticker is not running yet.
    pub fn configure(&self, config: Config) {
        if self.is_initialized() {
            warn!("lp_ticker: already running, configuration ignored");
            return;
        }
        self.config.lock(|c| c.set(config));
    }

    pub fn config(&self) -> Config {
        self.config.lock(|c| c.get())
    }

    pub fn is_initialized(&self) -> bool {
        self.inited.load(Ordering::Acquire)
    }

    /// Tick frequency of [`Self::read`].
    pub fn tick_rate(&self) -> Hertz {
        self.config().tick
    }

    /// Reset, configure and start the timer. Does nothing if it is already running.
    ///
    /// # Panics
    ///
    /// If the clock cannot be divided down to the tick rate with a 7-bit prescaler.
    pub fn init(&self) {
        if self.is_initialized() {
            return;
        }
        let config = self.config();
        let prescale = match prescaler(config.clock, config.tick) {
            Some(p) if p <= PRESCALER_MAX => p,
            _ => panic!("lp_ticker: cannot divide {} down to {}", config.clock, config.tick),
        };

        critical_section::with(|_| {
            if self.inited.swap(true, Ordering::AcqRel) {
                return;
            }
            self.counter_tick.store(0, Ordering::Relaxed);
            self.wakeup_tick.store(MAX_COMPARE, Ordering::Relaxed);
            self.deadlines.lock(|d| d.set(Deadlines::new()));

            self.timer.reset();
            self.timer.enable_lirc_clock();

            let cmp = self.wakeup_tick.load(Ordering::Relaxed);
            check_compare(cmp);

            self.timer
                .write_ctl(CTL_OPMODE_CONTINUOUS | (prescale & CTL_PSC_MSK) | CTL_CNTDATEN);
            self.timer.write_cmp(cmp);

            self.intc.set_vector(Interrupt::TMR2, timer2_vector);
            self.intc.enable(Interrupt::TMR2);
            self.timer
                .write_ctl(self.timer.ctl() | CTL_INTEN | CTL_WKEN);

            // Keep compare_match() consistent with the hardware
            self.set_interrupt(self.read(), cmp);

            self.timer.write_ctl(self.timer.ctl() | CTL_CNTEN);

            debug!("lp_ticker: running, prescaler {}", prescale);
        });
    }

    /// Current counter value. Initialises the timer on first use.
    pub fn read(&self) -> u32 {
        if !self.is_initialized() {
            self.init();
        }
        let now = self.timer.cnt() & COUNTER_MASK;
        self.counter_tick.store(now, Ordering::Relaxed);
        now
    }

    /// Counter value seen by the most recent [`Self::read`].
    pub fn last_read(&self) -> u32 {
        self.counter_tick.load(Ordering::Relaxed)
    }

    /// Last deadline passed to [`Self::set_interrupt`]. This is not read back from the
    /// hardware, and the time driver's alarm never shows up here.
    pub fn compare_match(&self) -> u32 {
        self.wakeup_tick.load(Ordering::Relaxed)
    }

    /// Program the wake-up comparator with the absolute tick `deadline`.
    ///
    /// `now` is not used for the deadline. If the time driver has an alarm that comes first,
    /// the comparator keeps that alarm and moves on to `deadline` once it has fired.
    ///
    /// # Panics
    ///
    /// If `deadline` is outside `MIN_COMPARE..=MAX_COMPARE`.
    pub fn set_interrupt(&self, now: u32, deadline: u32) {
        let _ = now;
        check_compare(deadline);
        self.wakeup_tick.store(deadline, Ordering::Relaxed);
        self.program(|d, cnt| d.app = Some(Deadline::new(cnt, deadline)));
    }

    /// Arm the time driver's alarm at compare value `cmp`.
    pub(crate) fn set_alarm(&self, cmp: u32) {
        check_compare(cmp);
        self.program(|d, cnt| d.alarm = Some(Deadline::new(cnt, cmp)));
    }

    /// Set the timer interrupt pending from software.
    pub(crate) fn pend_interrupt(&self) {
        self.intc.pend(Interrupt::TMR2);
    }

    /// Update the deadlines and write the earliest one to CMP.
    fn program(&self, update: impl FnOnce(&mut Deadlines, u32)) {
        critical_section::with(|_| {
            let cnt = self.timer.cnt() & COUNTER_MASK;
            let mut deadlines = self.deadlines.lock(|d| d.get());
            update(&mut deadlines, cnt);
            if let Some(cmp) = deadlines.next(cnt) {
                self.timer.write_cmp(cmp);
            }
            self.deadlines.lock(|d| d.set(deadlines));
        });
    }

    /// Program `deadline` and sleep until a wake-up source fires.
    ///
    /// An earlier alarm of the time driver also ends the sleep. Returns the completed sleep
    /// context.
    pub fn sleep_until<S: SystemControl>(&self, now: u32, deadline: u32, sleep: &Sleep<S>) -> SleepContext {
        self.set_interrupt(now, deadline);
        let mut ctx = SleepContext::new();
        sleep.enter_sleep(self, &mut ctx);
        sleep.exit_sleep(&mut ctx);
        ctx
    }

    /// Timer vector body: acknowledge the time-out and wake-up flags, then move the
    /// comparator on to the next pending deadline.
    pub fn on_interrupt(&self) {
        let flags = self.timer.intsts() & (INTSTS_TIF | INTSTS_TWKF);
        self.timer.write_intsts(flags);
        self.program(|_, _| {});
    }
}

#[inline]
fn check_compare(cmp: u32) {
    assert!(
        (MIN_COMPARE..=MAX_COMPARE).contains(&cmp),
        "lp_ticker: compare value {} out of range",
        cmp
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeIntc, FakeSystem, FakeTimer};

    #[test]
    fn prescaler_divides_clock_to_tick() {
        assert_eq!(prescaler(khz(10), hz(1_000)), Some(9));
        assert_eq!(prescaler(khz(10), khz(10)), Some(0));
        assert_eq!(prescaler(khz(10), khz(20)), None);
        assert_eq!(prescaler(khz(10), hz(0)), None);
    }

    #[test]
    fn init_starts_continuous_counter() {
        let (timer, intc) = (FakeTimer::default(), FakeIntc::default());
        let ticker = LpTicker::new(&timer, &intc);

        ticker.init();

        assert_eq!(timer.resets.get(), 1);
        assert!(timer.lirc.get());
        assert_eq!(
            timer.ctl.get(),
            CTL_OPMODE_CONTINUOUS | 9 | CTL_CNTDATEN | CTL_INTEN | CTL_WKEN | CTL_CNTEN
        );
        assert_eq!(timer.cmp.get(), MAX_COMPARE);
        assert_eq!(ticker.compare_match(), MAX_COMPARE);
        assert!(intc.has_vector(Interrupt::TMR2));
        assert!(intc.is_enabled(Interrupt::TMR2));
    }

    #[test]
    fn init_is_idempotent() {
        let (timer, intc) = (FakeTimer::default(), FakeIntc::default());
        let ticker = LpTicker::new(&timer, &intc);

        ticker.init();
        ticker.set_interrupt(0, 500);
        ticker.init();

        assert_eq!(timer.resets.get(), 1);
        assert_eq!(ticker.compare_match(), 500);
    }

    #[test]
    fn read_initialises_lazily() {
        let (timer, intc) = (FakeTimer::default(), FakeIntc::default());
        let ticker = LpTicker::new(&timer, &intc);
        timer.cnt.set(1234);

        assert!(!ticker.is_initialized());
        assert_eq!(ticker.read(), 1234);
        assert!(ticker.is_initialized());
        assert_eq!(ticker.last_read(), 1234);
        assert_eq!(timer.resets.get(), 1);
    }

    #[test]
    fn compare_bounds_are_inclusive() {
        let (timer, intc) = (FakeTimer::default(), FakeIntc::default());
        let ticker = LpTicker::new(&timer, &intc);

        ticker.set_interrupt(0, MAX_COMPARE);
        assert_eq!(timer.cmp.get(), MAX_COMPARE);
        ticker.set_interrupt(0, MIN_COMPARE);
        assert_eq!(timer.cmp.get(), MIN_COMPARE);
        assert_eq!(ticker.compare_match(), MIN_COMPARE);
    }

    #[test]
    #[should_panic]
    fn compare_past_max_is_fatal() {
        let (timer, intc) = (FakeTimer::default(), FakeIntc::default());
        let ticker = LpTicker::new(&timer, &intc);

        ticker.set_interrupt(0, MAX_COMPARE + 1);
    }

    #[test]
    #[should_panic]
    fn compare_below_min_is_fatal() {
        let (timer, intc) = (FakeTimer::default(), FakeIntc::default());
        let ticker = LpTicker::new(&timer, &intc);

        ticker.set_interrupt(0, MIN_COMPARE - 1);
    }

    #[test]
    #[should_panic]
    fn tick_faster_than_clock_is_fatal() {
        let (timer, intc) = (FakeTimer::default(), FakeIntc::default());
        let ticker = LpTicker::new(&timer, &intc);
        ticker.configure(Config {
            clock: khz(10),
            tick: khz(32),
        });

        ticker.init();
    }

    #[test]
    #[should_panic]
    fn prescaler_wider_than_seven_bits_is_fatal() {
        let (timer, intc) = (FakeTimer::default(), FakeIntc::default());
        let ticker = LpTicker::new(&timer, &intc);
        ticker.configure(Config {
            clock: khz(10),
            tick: hz(50),
        });

        ticker.init();
    }

    #[test]
    fn configure_after_start_is_ignored() {
        let (timer, intc) = (FakeTimer::default(), FakeIntc::default());
        let ticker = LpTicker::new(&timer, &intc);

        ticker.init();
        ticker.configure(Config {
            clock: khz(10),
            tick: khz(10),
        });

        assert_eq!(ticker.tick_rate(), hz(1_000));
    }

    #[test]
    fn deadline_expires_once_counter_passes_it() {
        let d = Deadline::new(100, 300);
        assert_eq!(d.remaining(100), Some(200));
        assert_eq!(d.remaining(299), Some(1));
        assert_eq!(d.remaining(300), None);
        assert_eq!(d.remaining(50), None);

        let wrapping = Deadline::new(0xFF_FF00, 0x80);
        assert_eq!(wrapping.remaining(0xFF_FFFF), Some(0x81));
        assert_eq!(wrapping.remaining(0x80), None);

        assert_eq!(Deadline::new(7, 7).remaining(7), Some(COUNTER_WRAP));
    }

    #[test]
    fn earlier_alarm_keeps_comparator() {
        let (timer, intc) = (FakeTimer::default(), FakeIntc::default());
        let ticker = LpTicker::new(&timer, &intc);
        ticker.init();
        timer.cnt.set(100);

        ticker.set_alarm(200);
        ticker.set_interrupt(100, 5_000);

        assert_eq!(timer.cmp.get(), 200);
        assert_eq!(ticker.compare_match(), 5_000);

        ticker.set_interrupt(100, 150);
        assert_eq!(timer.cmp.get(), 150);
    }

    #[test]
    fn comparator_moves_on_after_alarm_fires() {
        let (timer, intc) = (FakeTimer::default(), FakeIntc::default());
        let ticker = LpTicker::new(&timer, &intc);
        ticker.init();
        timer.cnt.set(100);
        ticker.set_alarm(200);
        ticker.set_interrupt(100, 5_000);

        timer.cnt.set(200);
        timer.intsts.set(INTSTS_TIF);
        ticker.on_interrupt();

        assert_eq!(timer.cmp.get(), 5_000);
        assert_eq!(ticker.compare_match(), 5_000);
    }

    #[test]
    fn far_deadline_does_not_push_out_alarm() {
        let (timer, intc) = (FakeTimer::default(), FakeIntc::default());
        let ticker = LpTicker::new(&timer, &intc);
        ticker.init();
        timer.cnt.set(100);

        ticker.set_alarm(100 + (1 << 23));
        ticker.set_interrupt(100, 99);

        assert_eq!(timer.cmp.get(), 100 + (1 << 23));
        assert_eq!(ticker.compare_match(), 99);
    }

    #[test]
    fn sleep_until_wakes_for_earlier_alarm() {
        let (timer, intc) = (FakeTimer::default(), FakeIntc::default());
        let ticker = LpTicker::new(&timer, &intc);
        ticker.init();
        let sys = FakeSystem::new(&timer, 20);
        let sleep = Sleep::new(&sys);
        timer.cnt.set(1_000);
        ticker.set_alarm(1_020);

        let ctx = ticker.sleep_until(1_000, 9_000, &sleep);

        assert_eq!(timer.cmp.get(), 1_020);
        assert_eq!(ctx.elapsed_ticks(), 20);
        assert_eq!(ticker.compare_match(), 9_000);
    }

    #[test]
    fn interrupt_acknowledges_flags() {
        let (timer, intc) = (FakeTimer::default(), FakeIntc::default());
        let ticker = LpTicker::new(&timer, &intc);
        timer.intsts.set(INTSTS_TIF | INTSTS_TWKF);

        ticker.on_interrupt();

        assert_eq!(timer.intsts.get(), 0);
    }
}
