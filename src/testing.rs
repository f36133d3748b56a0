//! Register fakes for host tests.

use std::cell::{Cell, RefCell};
use std::vec::Vec;

use crate::gpio::{PortRegisters, PORT_COUNT};
use crate::intc::{InterruptController, IrqHandler};
use crate::interrupt::Interrupt;
use crate::rcc::SystemControl;
use crate::timer::{TimerRegisters, COUNTER_MASK};

/// All GPIO ports plus the shared debounce control register.
#[derive(Default)]
pub struct FakeGpio {
    pub intsrc: [Cell<u32>; PORT_COUNT],
    pub inten: [Cell<u32>; PORT_COUNT],
    pub inttype: [Cell<u32>; PORT_COUNT],
    pub dben: [Cell<u32>; PORT_COUNT],
    pub levels: [Cell<u32>; PORT_COUNT],
    pub dbctl: Cell<u32>,
}

impl FakeGpio {
    /// Drive a pin high and latch it as an interrupt source.
    pub fn raise(&self, port: usize, pin: usize) {
        self.levels[port].set(self.levels[port].get() | (1 << pin));
        self.intsrc[port].set(self.intsrc[port].get() | (1 << pin));
    }

    /// Drive a pin low and latch it as an interrupt source.
    pub fn lower(&self, port: usize, pin: usize) {
        self.levels[port].set(self.levels[port].get() & !(1 << pin));
        self.intsrc[port].set(self.intsrc[port].get() | (1 << pin));
    }
}

impl PortRegisters for FakeGpio {
    fn intsrc(&self, port: usize) -> u32 {
        self.intsrc[port].get()
    }

    fn write_intsrc(&self, port: usize, val: u32) {
        self.intsrc[port].set(self.intsrc[port].get() & !val);
    }

    fn inten(&self, port: usize) -> u32 {
        self.inten[port].get()
    }

    fn write_inten(&self, port: usize, val: u32) {
        self.inten[port].set(val);
    }

    fn inttype(&self, port: usize) -> u32 {
        self.inttype[port].get()
    }

    fn write_inttype(&self, port: usize, val: u32) {
        self.inttype[port].set(val);
    }

    fn dben(&self, port: usize) -> u32 {
        self.dben[port].get()
    }

    fn write_dben(&self, port: usize, val: u32) {
        self.dben[port].set(val);
    }

    fn pin_levels(&self, port: usize) -> u32 {
        self.levels[port].get()
    }

    fn write_dbctl(&self, val: u32) {
        self.dbctl.set(val);
    }
}

#[derive(Default)]
pub struct FakeIntc {
    vectors: RefCell<Vec<(Interrupt, IrqHandler)>>,
    enabled: RefCell<Vec<Interrupt>>,
    pended: RefCell<Vec<Interrupt>>,
}

impl FakeIntc {
    pub fn has_vector(&self, irq: Interrupt) -> bool {
        self.vectors.borrow().iter().any(|(i, _)| *i == irq)
    }

    pub fn is_enabled(&self, irq: Interrupt) -> bool {
        self.enabled.borrow().contains(&irq)
    }

    pub fn is_pending(&self, irq: Interrupt) -> bool {
        self.pended.borrow().contains(&irq)
    }
}

impl InterruptController for FakeIntc {
    fn set_vector(&self, irq: Interrupt, handler: IrqHandler) {
        let mut vectors = self.vectors.borrow_mut();
        vectors.retain(|(i, _)| *i != irq);
        vectors.push((irq, handler));
    }

    fn enable(&self, irq: Interrupt) {
        if !self.is_enabled(irq) {
            self.enabled.borrow_mut().push(irq);
        }
    }

    fn disable(&self, irq: Interrupt) {
        self.enabled.borrow_mut().retain(|i| *i != irq);
    }

    fn pend(&self, irq: Interrupt) {
        self.pended.borrow_mut().push(irq);
    }
}

#[derive(Default)]
pub struct FakeTimer {
    pub resets: Cell<u32>,
    pub lirc: Cell<bool>,
    pub ctl: Cell<u32>,
    pub cmp: Cell<u32>,
    pub cnt: Cell<u32>,
    /// Added to CNT after every read.
    pub step: Cell<u32>,
    pub intsts: Cell<u32>,
}

impl TimerRegisters for FakeTimer {
    fn reset(&self) {
        self.resets.set(self.resets.get() + 1);
        self.ctl.set(0);
        self.cmp.set(0);
        self.intsts.set(0);
    }

    fn enable_lirc_clock(&self) {
        self.lirc.set(true);
    }

    fn ctl(&self) -> u32 {
        self.ctl.get()
    }

    fn write_ctl(&self, val: u32) {
        self.ctl.set(val);
    }

    fn write_cmp(&self, val: u32) {
        self.cmp.set(val);
    }

    fn cnt(&self) -> u32 {
        let cnt = self.cnt.get();
        self.cnt.set(cnt.wrapping_add(self.step.get()) & COUNTER_MASK);
        cnt
    }

    fn intsts(&self) -> u32 {
        self.intsts.get()
    }

    fn write_intsts(&self, val: u32) {
        self.intsts.set(self.intsts.get() & !val);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SysCall {
    Unlock,
    Lock,
    PowerDown,
    Halt,
    Nop,
}

/// Power controller that advances a fake timer by a fixed amount per sleep.
pub struct FakeSystem<'a> {
    timer: &'a FakeTimer,
    sleep_ticks: u32,
    unlocked: Cell<bool>,
    calls: RefCell<Vec<SysCall>>,
}

impl<'a> FakeSystem<'a> {
    pub fn new(timer: &'a FakeTimer, sleep_ticks: u32) -> Self {
        Self {
            timer,
            sleep_ticks,
            unlocked: Cell::new(false),
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<SysCall> {
        self.calls.borrow().clone()
    }

    fn sleep(&self, call: SysCall) {
        self.calls.borrow_mut().push(call);
        let cnt = self.timer.cnt.get().wrapping_add(self.sleep_ticks) & COUNTER_MASK;
        self.timer.cnt.set(cnt);
    }
}

impl SystemControl for FakeSystem<'_> {
    fn unlock_registers(&self) {
        self.unlocked.set(true);
        self.calls.borrow_mut().push(SysCall::Unlock);
    }

    fn lock_registers(&self) {
        self.unlocked.set(false);
        self.calls.borrow_mut().push(SysCall::Lock);
    }

    fn is_unlocked(&self) -> bool {
        self.unlocked.get()
    }

    fn power_down(&self) {
        self.sleep(SysCall::PowerDown);
    }

    fn halt(&self) {
        self.sleep(SysCall::Halt);
    }

    fn nop(&self) {
        self.calls.borrow_mut().push(SysCall::Nop);
    }
}
