//! External interrupt (pin edge) dispatcher for NUC472 GPIO
//!
//! Every GPIO port raises one NVIC line (GPA..GPI) for all 16 of its pins. The dispatcher
//! keeps one [`PortVector`] per port: the NVIC line, the vector installed for it, and one
//! registration slot per pin.
//!
//! Per-port interrupt registers:
//! - INTEN: falling edge enable in bit `pin`, rising edge enable in bit `pin + 16`
//! - INTSRC: pending sources (write 1 to clear)
//! - DBEN: per-pin debounce enable
//! - PIN: current pin levels
//!
//! When a port vector fires, pending pins are scanned lowest first. The edge reported for a
//! pin is chosen by sampling its level after the fact: an armed rising edge is reported if the
//! pin now reads high, an armed falling edge if it reads low. A pin that toggles and returns
//! before the handler runs may be reported with the wrong edge or not at all.

use core::cell::Cell;
use core::fmt;

use embassy_sync::blocking_mutex::CriticalSectionMutex;

use crate::gpio::{
    dbctl, AnyPin, DebounceClock, DebounceCycles, Gpio, Level, Pin as GpioPin, PinName, PortRegisters, SealedPin,
    PINS_PER_PORT, PORT_COUNT,
};
use crate::intc::{InterruptController, IrqHandler, Nvic};
use crate::interrupt::typelevel::{self, Handler};
use crate::interrupt::Interrupt;
use crate::Peri;

/// INTEN falling edge enable, shifted by pin index
const INT_FALLING: u32 = 0x0000_0001;
/// INTEN rising edge enable, shifted by pin index
const INT_RISING: u32 = 0x0001_0000;

/// Pin edge event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IrqEvent {
    Rise,
    Fall,
}

impl IrqEvent {
    #[inline]
    fn inten_bit(self, pin: usize) -> u32 {
        match self {
            IrqEvent::Rise => INT_RISING << pin,
            IrqEvent::Fall => INT_FALLING << pin,
        }
    }
}

/// Pin interrupt callback, invoked from the port vector with the id given at registration.
///
/// Runs at interrupt level and must not block.
pub type EdgeHandler = fn(id: u32, event: IrqEvent);

/// Errors for pin addresses that cannot be routed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The pin is [`PinName::NC`].
    NoConnect,
    /// Port index past the last GPIO port.
    PortOutOfRange,
    /// Pin index past the end of its port.
    PinOutOfRange,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NoConnect => f.write_str("pin is not connected"),
            Error::PortOutOfRange => f.write_str("GPIO port out of range"),
            Error::PinOutOfRange => f.write_str("GPIO pin out of range"),
        }
    }
}

/// A registered pin interrupt
#[derive(Debug, Clone, Copy)]
pub struct Registration {
    pub pin: PinName,
    pub handler: EdgeHandler,
    pub id: u32,
}

type Slot = CriticalSectionMutex<Cell<Option<Registration>>>;

const EMPTY_SLOT: Slot = CriticalSectionMutex::new(Cell::new(None));

/// Interrupt routing for one GPIO port.
pub struct PortVector {
    irq: Interrupt,
    vector: IrqHandler,
    slots: [Slot; PINS_PER_PORT],
}

impl PortVector {
    const fn new(irq: Interrupt, vector: IrqHandler) -> Self {
        Self {
            irq,
            vector,
            slots: [EMPTY_SLOT; PINS_PER_PORT],
        }
    }

    /// NVIC line shared by every pin of the port.
    pub fn irq(&self) -> Interrupt {
        self.irq
    }

    /// Registration in the slot of `pin`, if any.
    pub fn registration(&self, pin: usize) -> Option<Registration> {
        self.slots.get(pin).and_then(|slot| slot.lock(|s| s.get()))
    }
}

fn port_vector<const PORT: usize>() {
    crate::exti().on_interrupt(PORT);
}

/// Validate a pin address and split it into `(port, pin)` indices.
fn locate(pin: PinName) -> Result<(usize, usize), Error> {
    if pin.is_nc() {
        return Err(Error::NoConnect);
    }
    let (port, index) = (pin.port(), pin.pin());
    if index >= PINS_PER_PORT {
        Err(Error::PinOutOfRange)
    } else if port >= PORT_COUNT {
        Err(Error::PortOutOfRange)
    } else {
        Ok((port, index))
    }
}

/// Pin interrupt dispatcher.
///
/// A single instance lives for the lifetime of the program (see [`crate::exti`]). Slot writes
/// from the foreground happen inside a short critical section so they cannot tear against the
/// port vectors.
pub struct Exti<R, C> {
    regs: R,
    intc: C,
    ports: [PortVector; PORT_COUNT],
}

impl<R: PortRegisters, C: InterruptController> Exti<R, C> {
    /// The port vectors installed by [`Self::enable`] always dispatch into [`crate::exti`],
    /// whatever instance installed them.
    pub(crate) const fn new(regs: R, intc: C) -> Self {
        Self {
            regs,
            intc,
            ports: [
                PortVector::new(Interrupt::GPA, port_vector::<0>),
                PortVector::new(Interrupt::GPB, port_vector::<1>),
                PortVector::new(Interrupt::GPC, port_vector::<2>),
                PortVector::new(Interrupt::GPD, port_vector::<3>),
                PortVector::new(Interrupt::GPE, port_vector::<4>),
                PortVector::new(Interrupt::GPF, port_vector::<5>),
                PortVector::new(Interrupt::GPG, port_vector::<6>),
                PortVector::new(Interrupt::GPH, port_vector::<7>),
                PortVector::new(Interrupt::GPI, port_vector::<8>),
            ],
        }
    }

    /// Routing table of `port`.
    pub fn port(&self, port: usize) -> Option<&PortVector> {
        self.ports.get(port)
    }

    /// Register `handler` for `pin`.
    ///
    /// Reprograms the shared debounce clock (10 kHz LIRC, sample every clock), which affects
    /// every port. A registration already present for the pin is replaced. Does not arm any
    /// edge or unmask the port line.
    pub fn init(&self, pin: PinName, handler: EdgeHandler, id: u32) -> Result<(), Error> {
        let (port, index) = locate(pin)?;

        self.regs
            .write_dbctl(dbctl(DebounceClock::Lirc, DebounceCycles(0)));

        self.ports[port].slots[index].lock(|slot| slot.set(Some(Registration { pin, handler, id })));

        trace!("exti: registered {} id={}", pin.raw(), id);
        Ok(())
    }

    /// Unregister `pin`.
    ///
    /// Masks the port line and clears the whole port INTEN register, so sibling pins on the
    /// same port stop receiving interrupts too even though they stay registered.
    pub fn free(&self, pin: PinName) -> Result<(), Error> {
        let (port, index) = locate(pin)?;
        let vector = &self.ports[port];

        self.intc.disable(vector.irq);
        self.regs.write_inten(port, 0);

        vector.slots[index].lock(|slot| slot.set(None));

        trace!("exti: freed {}", pin.raw());
        Ok(())
    }

    /// Arm or disarm one edge of `pin`.
    ///
    /// Arming enables debounce and edge triggering for the pin. Disarming clears only the
    /// enable bit of that edge.
    pub fn set(&self, pin: PinName, event: IrqEvent, enable: bool) -> Result<(), Error> {
        let (port, index) = locate(pin)?;
        let bit = 1u32 << index;
        let edge = event.inten_bit(index);

        critical_section::with(|_| {
            if enable {
                self.regs.write_dben(port, self.regs.dben(port) | bit);
                self.regs.write_inttype(port, self.regs.inttype(port) & !bit);
                self.regs.write_inten(port, self.regs.inten(port) | edge);
            } else {
                self.regs.write_inten(port, self.regs.inten(port) & !edge);
            }
        });

        Ok(())
    }

    /// Install the port vector of `pin` and unmask its line.
    ///
    /// The line is per port: every registered pin of the port with an armed edge can fire
    /// afterwards.
    pub fn enable(&self, pin: PinName) -> Result<(), Error> {
        let (port, _) = locate(pin)?;
        let vector = &self.ports[port];

        self.intc.set_vector(vector.irq, vector.vector);
        self.intc.enable(vector.irq);
        Ok(())
    }

    /// Mask the port line of `pin`.
    pub fn disable(&self, pin: PinName) -> Result<(), Error> {
        let (port, _) = locate(pin)?;
        self.intc.disable(self.ports[port].irq);
        Ok(())
    }

    /// Current level of `pin`.
    pub fn level(&self, pin: PinName) -> Result<Level, Error> {
        let (port, index) = locate(pin)?;
        Ok(self.is_high(port, index).into())
    }

    #[inline]
    fn is_high(&self, port: usize, index: usize) -> bool {
        (self.regs.pin_levels(port) >> index) & 1 != 0
    }

    /// Port vector body.
    ///
    /// Calls the handler of every pending pin whose armed edge matches its current level, then
    /// clears the port's pending register by writing its value back.
    pub fn on_interrupt(&self, port: usize) {
        let Some(vector) = self.ports.get(port) else {
            return;
        };

        let intsrc = self.regs.intsrc(port);
        let inten = self.regs.inten(port);

        for index in BitIter(intsrc) {
            let index = index as usize;
            let Some(reg) = vector.registration(index) else {
                warn!("exti: port {} pin {} pending without registration", port, index);
                continue;
            };

            let high = self.is_high(port, index);
            if inten & IrqEvent::Rise.inten_bit(index) != 0 && high {
                (reg.handler)(reg.id, IrqEvent::Rise);
            }
            if inten & IrqEvent::Fall.inten_bit(index) != 0 && !high {
                (reg.handler)(reg.id, IrqEvent::Fall);
            }
        }

        // Clear all interrupt flags
        self.regs.write_intsrc(port, self.regs.intsrc(port));
    }
}

struct BitIter(u32);

impl Iterator for BitIter {
    type Item = u32;

    fn next(&mut self) -> Option<Self::Item> {
        match self.0.trailing_zeros() {
            32 => None,
            b => {
                self.0 &= !(1 << b);
                Some(b)
            }
        }
    }
}

/// Interrupt handler for GPIO port interrupts.
///
/// Use with `bind_interrupts!` for compile-time binding:
/// ```ignore
/// bind_interrupts!(struct Irqs {
///     GPA => exti::InterruptHandler<interrupt::typelevel::GPA>;
/// });
/// ```
///
/// Note: [`Exti::enable`] installs the port vectors on its own, so `bind_interrupts!` is
/// optional for EXTI.
pub struct InterruptHandler<I> {
    _phantom: core::marker::PhantomData<I>,
}

foreach_port!(
    ($irq:ident, $port_num:expr) => {
        impl Handler<typelevel::$irq> for InterruptHandler<typelevel::$irq> {
            unsafe fn on_interrupt() {
                crate::exti().on_interrupt($port_num);
            }
        }
    };
);

/// Pin interrupt driver.
///
/// Registers on creation and frees the registration when dropped.
pub struct ExtiInput<'d, R: PortRegisters = Gpio, C: InterruptController = Nvic> {
    exti: &'d Exti<R, C>,
    pin: Peri<'d, AnyPin>,
}

impl<'d, R: PortRegisters, C: InterruptController> ExtiInput<'d, R, C> {
    /// Register `handler` for `pin`. No edge is armed yet.
    pub fn new<P: GpioPin + Into<AnyPin>>(
        exti: &'d Exti<R, C>,
        pin: Peri<'d, P>,
        handler: EdgeHandler,
        id: u32,
    ) -> Result<Self, Error> {
        let pin: Peri<'d, AnyPin> = pin.into();
        exti.init(pin.pin_name(), handler, id)?;
        Ok(Self { exti, pin })
    }

    pub fn pin_name(&self) -> PinName {
        self.pin.pin_name()
    }

    /// Arm or disarm the rising edge.
    pub fn rise(&mut self, enable: bool) {
        let _ = self.exti.set(self.pin_name(), IrqEvent::Rise, enable);
    }

    /// Arm or disarm the falling edge.
    pub fn fall(&mut self, enable: bool) {
        let _ = self.exti.set(self.pin_name(), IrqEvent::Fall, enable);
    }

    /// Unmask the port line.
    pub fn enable_irq(&mut self) {
        let _ = self.exti.enable(self.pin_name());
    }

    /// Mask the port line. This silences every pin of the port.
    pub fn disable_irq(&mut self) {
        let _ = self.exti.disable(self.pin_name());
    }

    pub fn is_high(&self) -> bool {
        self.exti.is_high(self.pin.port() as usize, self.pin.pin() as usize)
    }

    pub fn is_low(&self) -> bool {
        !self.is_high()
    }

    pub fn get_level(&self) -> Level {
        self.is_high().into()
    }
}

impl<'d, R: PortRegisters, C: InterruptController> Drop for ExtiInput<'d, R, C> {
    fn drop(&mut self) {
        let _ = self.exti.free(self.pin_name());
    }
}

impl<'d, R: PortRegisters, C: InterruptController> embedded_hal::digital::ErrorType for ExtiInput<'d, R, C> {
    type Error = core::convert::Infallible;
}

impl<'d, R: PortRegisters, C: InterruptController> embedded_hal::digital::InputPin for ExtiInput<'d, R, C> {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok((*self).is_high())
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok((*self).is_low())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::vec::Vec;

    use super::*;
    use crate::testing::{FakeGpio, FakeIntc};

    std::thread_local! {
        static EVENTS: RefCell<Vec<(u32, IrqEvent)>> = RefCell::new(Vec::new());
    }

    fn record(id: u32, event: IrqEvent) {
        EVENTS.with(|e| e.borrow_mut().push((id, event)));
    }

    fn take_events() -> Vec<(u32, IrqEvent)> {
        EVENTS.with(|e| core::mem::take(&mut *e.borrow_mut()))
    }

    fn rig<'a>(gpio: &'a FakeGpio, intc: &'a FakeIntc) -> Exti<&'a FakeGpio, &'a FakeIntc> {
        take_events();
        Exti::new(gpio, intc)
    }

    #[test]
    fn init_rejects_unroutable_pins() {
        let (gpio, intc) = (FakeGpio::default(), FakeIntc::default());
        let exti = rig(&gpio, &intc);

        assert_eq!(exti.init(PinName::NC, record, 1), Err(Error::NoConnect));
        assert_eq!(exti.init(PinName::new(0, 16), record, 1), Err(Error::PinOutOfRange));
        assert_eq!(exti.init(PinName::new(9, 0), record, 1), Err(Error::PortOutOfRange));
        assert_eq!(gpio.dbctl.get(), 0);
        assert_eq!(exti.free(PinName::NC), Err(Error::NoConnect));
        assert_eq!(exti.set(PinName::new(9, 0), IrqEvent::Rise, true), Err(Error::PortOutOfRange));
    }

    #[test]
    fn init_programs_shared_debounce_without_enabling() {
        let (gpio, intc) = (FakeGpio::default(), FakeIntc::default());
        let exti = rig(&gpio, &intc);

        exti.init(PinName::new(4, 2), record, 9).unwrap();

        assert_eq!(gpio.dbctl.get(), 0x30);
        assert_eq!(gpio.inten[4].get(), 0);
        assert!(!intc.is_enabled(Interrupt::GPE));
        let reg = exti.port(4).unwrap().registration(2).unwrap();
        assert_eq!(reg.id, 9);
        assert_eq!(reg.pin, PinName::new(4, 2));
    }

    #[test]
    fn rising_edge_dispatches_once_on_every_pin() {
        for port in 0..PORT_COUNT {
            for index in 0..PINS_PER_PORT {
                let (gpio, intc) = (FakeGpio::default(), FakeIntc::default());
                let exti = rig(&gpio, &intc);
                let pin = PinName::new(port as u8, index as u8);
                let id = (port * 100 + index) as u32;

                exti.init(pin, record, id).unwrap();
                exti.set(pin, IrqEvent::Rise, true).unwrap();
                exti.enable(pin).unwrap();
                assert!(intc.is_enabled(Interrupt::gpio_port(port).unwrap()));

                gpio.raise(port, index);
                exti.on_interrupt(port);

                assert_eq!(take_events(), [(id, IrqEvent::Rise)]);
                assert_eq!(gpio.intsrc[port].get(), 0);
            }
        }
    }

    #[test]
    fn falling_edge_requires_low_level() {
        let (gpio, intc) = (FakeGpio::default(), FakeIntc::default());
        let exti = rig(&gpio, &intc);
        let pin = PinName::new(1, 4);

        exti.init(pin, record, 7).unwrap();
        exti.set(pin, IrqEvent::Fall, true).unwrap();

        // Pending, but the pin already went back high.
        gpio.raise(1, 4);
        exti.on_interrupt(1);
        assert!(take_events().is_empty());
        assert_eq!(gpio.intsrc[1].get(), 0);

        gpio.lower(1, 4);
        exti.on_interrupt(1);
        assert_eq!(take_events(), [(7, IrqEvent::Fall)]);
    }

    #[test]
    fn both_edges_report_only_current_level() {
        let (gpio, intc) = (FakeGpio::default(), FakeIntc::default());
        let exti = rig(&gpio, &intc);
        let pin = PinName::new(2, 0);

        exti.init(pin, record, 3).unwrap();
        exti.set(pin, IrqEvent::Rise, true).unwrap();
        exti.set(pin, IrqEvent::Fall, true).unwrap();

        gpio.raise(2, 0);
        exti.on_interrupt(2);
        gpio.lower(2, 0);
        exti.on_interrupt(2);

        assert_eq!(take_events(), [(3, IrqEvent::Rise), (3, IrqEvent::Fall)]);
    }

    #[test]
    fn free_clears_slot_and_silences_port() {
        let (gpio, intc) = (FakeGpio::default(), FakeIntc::default());
        let exti = rig(&gpio, &intc);
        let freed = PinName::new(0, 3);
        let sibling = PinName::new(0, 5);

        exti.init(freed, record, 30).unwrap();
        exti.init(sibling, record, 50).unwrap();
        exti.set(freed, IrqEvent::Rise, true).unwrap();
        exti.set(sibling, IrqEvent::Rise, true).unwrap();
        exti.enable(freed).unwrap();

        exti.free(freed).unwrap();

        assert!(exti.port(0).unwrap().registration(3).is_none());
        assert!(exti.port(0).unwrap().registration(5).is_some());
        assert!(!intc.is_enabled(Interrupt::GPA));
        // Whole-port teardown: the sibling lost its edge enable as well.
        assert_eq!(gpio.inten[0].get(), 0);

        // Port still delivering with both edge bits set in hardware.
        gpio.inten[0].set((INT_RISING << 3) | (INT_RISING << 5));
        exti.enable(sibling).unwrap();
        gpio.raise(0, 3);
        gpio.raise(0, 5);
        exti.on_interrupt(0);

        assert_eq!(take_events(), [(50, IrqEvent::Rise)]);
        assert_eq!(gpio.intsrc[0].get(), 0);
    }

    #[test]
    fn disarming_one_edge_keeps_the_other() {
        let (gpio, intc) = (FakeGpio::default(), FakeIntc::default());
        let exti = rig(&gpio, &intc);
        let pin = PinName::new(6, 9);
        let other = PinName::new(6, 10);

        exti.init(pin, record, 1).unwrap();
        exti.init(other, record, 2).unwrap();
        exti.set(pin, IrqEvent::Rise, true).unwrap();
        exti.set(other, IrqEvent::Fall, true).unwrap();
        exti.set(pin, IrqEvent::Fall, true).unwrap();
        exti.set(pin, IrqEvent::Fall, false).unwrap();

        let inten = gpio.inten[6].get();
        assert_ne!(inten & (INT_RISING << 9), 0);
        assert_eq!(inten & (INT_FALLING << 9), 0);
        assert_ne!(inten & (INT_FALLING << 10), 0);
        assert_eq!(gpio.dben[6].get(), (1 << 9) | (1 << 10));
    }

    #[test]
    fn arming_selects_edge_trigger() {
        let (gpio, intc) = (FakeGpio::default(), FakeIntc::default());
        let exti = rig(&gpio, &intc);
        let pin = PinName::new(3, 1);
        gpio.inttype[3].set(0xFFFF);

        exti.init(pin, record, 1).unwrap();
        exti.set(pin, IrqEvent::Fall, true).unwrap();

        assert_eq!(gpio.inttype[3].get(), 0xFFFD);
    }

    #[test]
    fn dispatch_scans_lowest_pin_first_and_clears_pending() {
        let (gpio, intc) = (FakeGpio::default(), FakeIntc::default());
        let exti = rig(&gpio, &intc);

        for index in [7u8, 3] {
            let pin = PinName::new(5, index);
            exti.init(pin, record, index as u32).unwrap();
            exti.set(pin, IrqEvent::Rise, true).unwrap();
        }
        exti.enable(PinName::new(5, 3)).unwrap();

        gpio.raise(5, 3);
        gpio.raise(5, 7);
        exti.on_interrupt(5);

        assert_eq!(take_events(), [(3, IrqEvent::Rise), (7, IrqEvent::Rise)]);
        assert_eq!(gpio.intsrc[5].get(), 0);
    }

    #[test]
    fn pending_without_registration_is_skipped() {
        let (gpio, intc) = (FakeGpio::default(), FakeIntc::default());
        let exti = rig(&gpio, &intc);
        let pin = PinName::new(7, 2);

        exti.init(pin, record, 72).unwrap();
        exti.set(pin, IrqEvent::Rise, true).unwrap();
        gpio.inten[7].set(gpio.inten[7].get() | (INT_RISING << 1));

        gpio.raise(7, 1);
        gpio.raise(7, 2);
        exti.on_interrupt(7);

        assert_eq!(take_events(), [(72, IrqEvent::Rise)]);
        assert_eq!(gpio.intsrc[7].get(), 0);
    }

    #[test]
    fn reregistering_replaces_the_handler() {
        let (gpio, intc) = (FakeGpio::default(), FakeIntc::default());
        let exti = rig(&gpio, &intc);
        let pin = PinName::new(8, 15);

        exti.init(pin, record, 1).unwrap();
        exti.init(pin, record, 2).unwrap();
        exti.set(pin, IrqEvent::Rise, true).unwrap();

        gpio.raise(8, 15);
        exti.on_interrupt(8);

        assert_eq!(take_events(), [(2, IrqEvent::Rise)]);
    }

    #[test]
    fn enable_installs_port_vector() {
        let (gpio, intc) = (FakeGpio::default(), FakeIntc::default());
        let exti = rig(&gpio, &intc);
        let pin = PinName::new(3, 6);

        exti.init(pin, record, 1).unwrap();
        exti.enable(pin).unwrap();
        assert!(intc.has_vector(Interrupt::GPD));
        assert!(intc.is_enabled(Interrupt::GPD));

        exti.disable(pin).unwrap();
        assert!(!intc.is_enabled(Interrupt::GPD));
        assert!(exti.port(3).unwrap().registration(6).is_some());
    }

    #[test]
    fn exti_input_frees_on_drop() {
        let (gpio, intc) = (FakeGpio::default(), FakeIntc::default());
        let exti = rig(&gpio, &intc);

        {
            let pin = unsafe { crate::peripherals::PB4::steal() };
            let mut input = ExtiInput::new(&exti, pin, record, 44).unwrap();
            input.rise(true);
            input.enable_irq();
            assert_eq!(input.pin_name(), PinName::new(1, 4));

            gpio.raise(1, 4);
            assert!(input.is_high());
            assert_eq!(input.get_level(), Level::High);
            exti.on_interrupt(1);
            assert_eq!(take_events(), [(44, IrqEvent::Rise)]);
        }

        assert!(exti.port(1).unwrap().registration(4).is_none());
        assert!(!intc.is_enabled(Interrupt::GPB));
    }

    #[test]
    fn exti_input_rejects_nc() {
        let (gpio, intc) = (FakeGpio::default(), FakeIntc::default());
        let exti = rig(&gpio, &intc);

        let pin = unsafe { AnyPin::steal(PinName::NC) };
        assert_eq!(ExtiInput::new(&exti, pin, record, 0).err(), Some(Error::NoConnect));
    }

    #[test]
    fn bit_iter_yields_set_bits_in_order() {
        assert_eq!(BitIter(0).next(), None);
        let bits: Vec<u32> = BitIter(0x8000_0089).collect();
        assert_eq!(bits, [0, 3, 7, 31]);
    }
}
