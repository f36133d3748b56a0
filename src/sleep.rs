//! Sleep orchestration
//!
//! Before sleeping every peripheral driver that can veto power-down is asked whether it is
//! idle. If all agree the core enters power-down (only the low-speed oscillators keep running),
//! otherwise it only halts the CPU clock. The low-power ticker is sampled on both sides of the
//! sleep to measure how long the core was gone.

use core::cell::Cell;

use embassy_sync::blocking_mutex::CriticalSectionMutex;

use crate::intc::InterruptController;
use crate::lp_ticker::LpTicker;
use crate::rcc::{self, SystemControl};
use crate::time::Hertz;
use crate::timer::{TimerRegisters, COUNTER_MASK};

/// Number of ticks before the counter wraps.
const COUNTER_WRAP: u32 = COUNTER_MASK + 1;

/// Pipeline flush after wake-up.
const WAKE_NOPS: usize = 4;

/// Asks a peripheral driver whether power-down is allowed right now.
pub type PowerDownQuery = fn() -> bool;

fn allow() -> bool {
    true
}

/// One query per peripheral class that can keep the system out of power-down.
#[derive(Clone, Copy)]
pub struct PowerDownQueries {
    pub serial: PowerDownQuery,
    pub spi: PowerDownQuery,
    pub i2c: PowerDownQuery,
    pub pwm: PowerDownQuery,
}

impl PowerDownQueries {
    /// Every class allows power-down.
    pub const fn new() -> Self {
        Self {
            serial: allow,
            spi: allow,
            i2c: allow,
            pwm: allow,
        }
    }

    fn iter(&self) -> impl Iterator<Item = PowerDownQuery> {
        [self.serial, self.spi, self.i2c, self.pwm].into_iter()
    }
}

impl Default for PowerDownQueries {
    fn default() -> Self {
        Self::new()
    }
}

/// Hook run around each sleep, e.g. to arm a wake-up pin or re-sync an RTC.
pub trait WakeSource: Sync {
    /// Called after the start tick is taken. May veto power-down.
    fn prepare_for_sleep(&self, ctx: &mut SleepContext);

    /// Called after the end tick is taken.
    fn recover_from_sleep(&self, ctx: &mut SleepContext);
}

struct NoWakeSource;

impl WakeSource for NoWakeSource {
    fn prepare_for_sleep(&self, _ctx: &mut SleepContext) {}

    fn recover_from_sleep(&self, _ctx: &mut SleepContext) {}
}

static NO_WAKE_SOURCE: NoWakeSource = NoWakeSource;

/// Sleep configuration
#[derive(Clone, Copy)]
pub struct Config {
    pub queries: PowerDownQueries,
    pub wake_source: &'static dyn WakeSource,
}

impl Config {
    pub const fn new() -> Self {
        Self {
            queries: PowerDownQueries::new(),
            wake_source: &NO_WAKE_SOURCE,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

/// Where the sleep sequence currently is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SleepState {
    Awake,
    Entering,
    PoweredDown,
    Halted,
    Exiting,
}

/// Record of one sleep cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SleepContext {
    power_down: bool,
    start_tick: u32,
    end_tick: u32,
    elapsed_ticks: u32,
}

impl SleepContext {
    pub const fn new() -> Self {
        Self {
            power_down: true,
            start_tick: 0,
            end_tick: 0,
            elapsed_ticks: 0,
        }
    }

    /// Whether this sleep will be (or was) a power-down rather than a halt.
    pub fn power_down(&self) -> bool {
        self.power_down
    }

    /// Downgrade to a halt. Cannot be undone.
    pub fn veto_power_down(&mut self) {
        self.power_down = false;
    }

    pub fn start_tick(&self) -> u32 {
        self.start_tick
    }

    pub fn end_tick(&self) -> u32 {
        self.end_tick
    }

    pub fn elapsed_ticks(&self) -> u32 {
        self.elapsed_ticks
    }

    /// Time spent asleep for a ticker running at `tick`.
    pub fn elapsed_us(&self, tick: Hertz) -> u64 {
        match tick.0 {
            0 => 0,
            hz => self.elapsed_ticks as u64 * 1_000_000 / hz as u64,
        }
    }
}

impl Default for SleepContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Ticks from `start` to `end` on the 24-bit counter, assuming at most one wrap.
pub fn elapsed_ticks(start: u32, end: u32) -> u32 {
    if end >= start {
        end - start
    } else {
        end.wrapping_add(COUNTER_WRAP).wrapping_sub(start) & COUNTER_MASK
    }
}

pub struct Sleep<S> {
    sys: S,
    config: CriticalSectionMutex<Cell<Config>>,
    state: CriticalSectionMutex<Cell<SleepState>>,
}

impl<S: SystemControl> Sleep<S> {
    pub const fn new(sys: S) -> Self {
        Self {
            sys,
            config: CriticalSectionMutex::new(Cell::new(Config::new())),
            state: CriticalSectionMutex::new(Cell::new(SleepState::Awake)),
        }
    }

    pub fn configure(&self, config: Config) {
        self.config.lock(|c| c.set(config));
    }

    pub fn state(&self) -> SleepState {
        self.state.lock(|s| s.get())
    }

    fn set_state(&self, state: SleepState) {
        trace!("sleep: {:?}", state);
        self.state.lock(|s| s.set(state));
    }

    /// Sleep until the next wake-up event and fill in `ctx`.
    ///
    /// Every cycle starts out allowing power-down; it is downgraded to a halt if any
    /// peripheral class or the wake source refuses.
    ///
    /// # Panics
    ///
    /// If a previous sleep was not finished with [`Self::exit_sleep`].
    pub fn enter_sleep<T, C>(&self, ticker: &LpTicker<T, C>, ctx: &mut SleepContext)
    where
        T: TimerRegisters,
        C: InterruptController,
    {
        let entered = self.state.lock(|s| {
            let prev = s.get();
            if prev == SleepState::Awake {
                s.set(SleepState::Entering);
            }
            prev
        });
        assert!(entered == SleepState::Awake, "sleep: entered while not awake");

        let config = self.config.lock(|c| c.get());

        *ctx = SleepContext::new();
        for query in config.queries.iter() {
            if ctx.power_down && !query() {
                ctx.veto_power_down();
            }
        }

        ctx.start_tick = ticker.read();
        config.wake_source.prepare_for_sleep(ctx);

        if ctx.power_down {
            self.set_state(SleepState::PoweredDown);
            rcc::with_unlocked(&self.sys, || self.sys.power_down());
        } else {
            self.set_state(SleepState::Halted);
            rcc::with_unlocked(&self.sys, || self.sys.halt());
        }

        for _ in 0..WAKE_NOPS {
            self.sys.nop();
        }
        self.set_state(SleepState::Exiting);

        ctx.end_tick = ticker.read();
        ctx.elapsed_ticks = elapsed_ticks(ctx.start_tick, ctx.end_tick);
        config.wake_source.recover_from_sleep(ctx);

        debug!(
            "sleep: {} for {} ticks",
            if ctx.power_down { "powered down" } else { "halted" },
            ctx.elapsed_ticks
        );
    }

    /// Finish a sleep cycle started by [`Self::enter_sleep`].
    pub fn exit_sleep(&self, ctx: &mut SleepContext) {
        let _ = ctx;
        self.set_state(SleepState::Awake);
    }
}
