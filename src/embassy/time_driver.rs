//! Time driver implementation for NUC472 using the low-power ticker (TIMER2).
//!
//! TIMER2 counts LIRC ticks in a 24-bit register, so it keeps running while the core is
//! powered down but wraps every 2^24 ticks. Wraps are counted in software: a read that
//! returns less than the previous one means the counter went round once. The comparator is
//! never armed more than half a period ahead, which guarantees a read at least twice per wrap
//! even when nothing is scheduled.
//!
//! The alarm goes through [`LpTicker::set_alarm`], so an application deadline set on the
//! ticker never displaces it.

use core::cell::RefCell;
use core::task::Waker;

use critical_section::CriticalSection;
use embassy_sync::blocking_mutex::CriticalSectionMutex;
use embassy_sync::waitqueue::MultiWakerRegistration;
use embassy_time_driver::Driver;

use crate::intc::InterruptController;
use crate::lp_ticker::{LpTicker, MAX_COMPARE, MIN_COMPARE};
use crate::timer::{TimerRegisters, COUNTER_MASK};

const COUNTER_BITS: u32 = 24;

/// Furthest ahead the comparator is armed.
const MAX_ARM_TICKS: u64 = 1 << (COUNTER_BITS - 1);
/// Closest the comparator is armed.
const MIN_ARM_TICKS: u64 = 2;

/// Tasks waiting on the alarm. A full table wakes everyone to re-register.
const WAKER_SLOTS: usize = 8;

/// Extends 24-bit counter readings to a 64-bit tick count.
#[derive(Clone, Copy, Debug, Default)]
struct Epoch {
    last_count: u32,
    high_bits: u64,
}

impl Epoch {
    const fn new() -> Self {
        Self {
            last_count: 0,
            high_bits: 0,
        }
    }

    /// Must be fed at least once per counter period.
    fn extend(&mut self, count: u32) -> u64 {
        let count = count & COUNTER_MASK;
        if count < self.last_count {
            self.high_bits += 1;
        }
        self.last_count = count;
        (self.high_bits << COUNTER_BITS) | count as u64
    }
}

/// Absolute tick at which the comparator should fire to serve a wake-up at `at`.
fn arm_target(now: u64, at: u64) -> u64 {
    now + at.saturating_sub(now).clamp(MIN_ARM_TICKS, MAX_ARM_TICKS)
}

/// Comparator value for the absolute tick `target`.
fn compare_value(target: u64) -> u32 {
    (target as u32 & COUNTER_MASK).clamp(MIN_COMPARE, MAX_COMPARE)
}

struct State {
    epoch: Epoch,
    alarm_at: u64,
    wakers: MultiWakerRegistration<WAKER_SLOTS>,
}

pub struct TimerDriver {
    state: CriticalSectionMutex<RefCell<State>>,
}

static DRIVER: TimerDriver = TimerDriver {
    state: CriticalSectionMutex::new(RefCell::new(State::new())),
};

impl State {
    const fn new() -> Self {
        Self {
            epoch: Epoch::new(),
            alarm_at: u64::MAX,
            wakers: MultiWakerRegistration::new(),
        }
    }

    fn tick<T: TimerRegisters, C: InterruptController>(&mut self, ticker: &LpTicker<T, C>) -> u64 {
        self.epoch.extend(ticker.read())
    }

    /// Wake expired waiters and program the comparator for the next event.
    fn rearm<T: TimerRegisters, C: InterruptController>(&mut self, ticker: &LpTicker<T, C>) {
        let now = self.tick(ticker);
        if now >= self.alarm_at {
            self.alarm_at = u64::MAX;
            self.wakers.wake();
        }

        let target = arm_target(now, self.alarm_at);
        ticker.set_alarm(compare_value(target));

        // The counter may have run past the compare value while it was being written
        if self.tick(ticker) >= target {
            ticker.pend_interrupt();
        }
    }

    fn schedule<T: TimerRegisters, C: InterruptController>(
        &mut self,
        ticker: &LpTicker<T, C>,
        at: u64,
        waker: &Waker,
    ) {
        self.wakers.register(waker);
        if at < self.alarm_at {
            self.alarm_at = at;
            self.rearm(ticker);
        }
    }
}

impl TimerDriver {
    fn init(&self, cs: CriticalSection) {
        let mut state = self.state.borrow(cs).borrow_mut();
        *state = State::new();
        state.rearm(crate::lp_ticker());
    }

    /// Get current time in ticks of the low-power ticker.
    pub fn now(&self) -> u64 {
        critical_section::with(|cs| self.state.borrow(cs).borrow_mut().tick(crate::lp_ticker()))
    }

    fn on_compare(&self) {
        critical_section::with(|cs| self.state.borrow(cs).borrow_mut().rearm(crate::lp_ticker()));
    }
}

impl Driver for TimerDriver {
    fn now(&self) -> u64 {
        TimerDriver::now(self)
    }

    fn schedule_wake(&self, at: u64, waker: &Waker) {
        critical_section::with(|cs| {
            self.state
                .borrow(cs)
                .borrow_mut()
                .schedule(crate::lp_ticker(), at, waker)
        });
    }
}

#[no_mangle]
fn _embassy_time_now() -> u64 {
    DRIVER.now()
}

#[no_mangle]
fn _embassy_time_schedule_wake(at: u64, waker: &Waker) {
    DRIVER.schedule_wake(at, waker);
}

pub(crate) fn init(cs: CriticalSection) {
    DRIVER.init(cs);
}

/// Called from the TIMER2 vector.
pub(crate) fn on_compare() {
    DRIVER.on_compare();
}
