//! General purpose timer registers for NUC472
//!
//! Register layout per timer:
//! - CTL:    0x00 (prescaler, mode, interrupt/wake-up/count enables)
//! - CMP:    0x04 (24-bit compare value)
//! - INTSTS: 0x08 (TIF bit 0, TWKF bit 1; write 1 to clear)
//! - CNT:    0x0C (24-bit up counter)
//!
//! TIMER2 is the only timer that can be clocked from LIRC while the core is powered down, so it
//! backs the low-power ticker.

use crate::rcc::{self, Nuc472};

/// TIMER2 base address
const TIMER2_BASE: usize = 0x4001_1000;

const CTL_OFFSET: usize = 0x00;
const CMP_OFFSET: usize = 0x04;
const INTSTS_OFFSET: usize = 0x08;
const CNT_OFFSET: usize = 0x0C;

/// CTL: prescale counter, timer clock is divided by (PSC + 1)
pub const CTL_PSC_MSK: u32 = 0xFF;
/// CTL: latch CNT continuously
pub const CTL_CNTDATEN: u32 = 1 << 16;
/// CTL: wake the system from power-down on time-out
pub const CTL_WKEN: u32 = 1 << 23;
/// CTL: continuous counting mode, CNT keeps running past CMP
pub const CTL_OPMODE_CONTINUOUS: u32 = 3 << 27;
/// CTL: time-out interrupt enable
pub const CTL_INTEN: u32 = 1 << 29;
/// CTL: counter enable
pub const CTL_CNTEN: u32 = 1 << 30;

/// INTSTS: time-out interrupt flag
pub const INTSTS_TIF: u32 = 1 << 0;
/// INTSTS: time-out wake-up flag
pub const INTSTS_TWKF: u32 = 1 << 1;

/// CNT and CMP are 24 bits wide.
pub const COUNTER_MASK: u32 = 0x00FF_FFFF;

/// SYS->IPRST1: TIMER2 reset
const IPRST1_TMR2RST: u32 = 1 << 4;
/// CLK->APBCLK0: TIMER2 clock gate
const APBCLK0_TMR2CKEN: u32 = 1 << 4;
/// CLK->CLKSEL1: TIMER2 clock source field
const CLKSEL1_TMR2SEL_POS: u32 = 16;
const CLKSEL1_TMR2SEL_MSK: u32 = 0x7 << CLKSEL1_TMR2SEL_POS;
/// TIMER2 clock source: 10 kHz LIRC
const CLKSEL1_TMR2SEL_LIRC: u32 = 0x5 << CLKSEL1_TMR2SEL_POS;

/// One hardware timer module.
pub trait TimerRegisters {
    /// Pulse the module reset.
    fn reset(&self);

    /// Clock the timer from the low-speed internal oscillator and open its clock gate.
    fn enable_lirc_clock(&self);

    fn ctl(&self) -> u32;
    fn write_ctl(&self, val: u32);

    fn write_cmp(&self, val: u32);

    /// Current counter value.
    fn cnt(&self) -> u32;

    fn intsts(&self) -> u32;
    /// Write INTSTS. Set bits are cleared.
    fn write_intsts(&self, val: u32);
}

impl<T: TimerRegisters + ?Sized> TimerRegisters for &T {
    fn reset(&self) {
        (**self).reset()
    }

    fn enable_lirc_clock(&self) {
        (**self).enable_lirc_clock()
    }

    fn ctl(&self) -> u32 {
        (**self).ctl()
    }

    fn write_ctl(&self, val: u32) {
        (**self).write_ctl(val)
    }

    fn write_cmp(&self, val: u32) {
        (**self).write_cmp(val)
    }

    fn cnt(&self) -> u32 {
        (**self).cnt()
    }

    fn intsts(&self) -> u32 {
        (**self).intsts()
    }

    fn write_intsts(&self, val: u32) {
        (**self).write_intsts(val)
    }
}

/// Memory-mapped TIMER2.
#[derive(Clone, Copy, Debug, Default)]
pub struct Timer2;

impl TimerRegisters for Timer2 {
    fn reset(&self) {
        rcc::with_unlocked(&Nuc472, || {
            rcc::modify(rcc::SYS_IPRST1, |v| v | IPRST1_TMR2RST);
            rcc::modify(rcc::SYS_IPRST1, |v| v & !IPRST1_TMR2RST);
        });
    }

    fn enable_lirc_clock(&self) {
        rcc::with_unlocked(&Nuc472, || {
            rcc::modify(rcc::CLK_CLKSEL1, |v| (v & !CLKSEL1_TMR2SEL_MSK) | CLKSEL1_TMR2SEL_LIRC);
            rcc::modify(rcc::CLK_APBCLK0, |v| v | APBCLK0_TMR2CKEN);
        });
    }

    fn ctl(&self) -> u32 {
        rcc::read(TIMER2_BASE + CTL_OFFSET)
    }

    fn write_ctl(&self, val: u32) {
        rcc::write(TIMER2_BASE + CTL_OFFSET, val)
    }

    fn write_cmp(&self, val: u32) {
        rcc::write(TIMER2_BASE + CMP_OFFSET, val)
    }

    fn cnt(&self) -> u32 {
        rcc::read(TIMER2_BASE + CNT_OFFSET) & COUNTER_MASK
    }

    fn intsts(&self) -> u32 {
        rcc::read(TIMER2_BASE + INTSTS_OFFSET)
    }

    fn write_intsts(&self, val: u32) {
        rcc::write(TIMER2_BASE + INTSTS_OFFSET, val)
    }
}
