//! GPIO port registers and pin naming for NUC472
//!
//! NUC472 has 9 GPIO ports (PA-PI) of up to 16 pins each.
//!
//! Register layout per port (base = 0x4000_4000 + port * 0x40):
//! - MODE:    0x00
//! - DINOFF:  0x04
//! - DOUT:    0x08
//! - DATMSK:  0x0C
//! - PIN:     0x10 (current pin levels)
//! - DBEN:    0x14 (per-pin debounce enable)
//! - INTTYPE: 0x18 (0 = edge, 1 = level)
//! - INTEN:   0x1C (falling/low enable in bits 0-15, rising/high enable in bits 16-31)
//! - INTSRC:  0x20 (pending sources, write 1 to clear)
//!
//! The debounce control register DBCTL (0x4000_4440) is shared by all ports.

use core::fmt;

use crate::{impl_peripheral, peripherals, Peri, PeripheralType};

/// GPIO base address
const GPIO_BASE: usize = 0x4000_4000;
/// Address stride between port register blocks
const PORT_STRIDE: usize = 0x40;

const PIN_OFFSET: usize = 0x10;
const DBEN_OFFSET: usize = 0x14;
const INTTYPE_OFFSET: usize = 0x18;
const INTEN_OFFSET: usize = 0x1C;
const INTSRC_OFFSET: usize = 0x20;

const DBCTL_ADDR: usize = GPIO_BASE + 0x440;

/// DBCTL: debounce clock always on
const DBCTL_ICLKON: u32 = 1 << 5;

/// Number of GPIO ports
pub const PORT_COUNT: usize = 9;

/// Pins per GPIO port
pub const PINS_PER_PORT: usize = 16;

const PORT_SHIFT: u32 = 12;

/// Encoded `(port, pin)` address of a GPIO pin.
///
/// The encoding is `(port << 12) | pin`. [`PinName::NC`] marks "not connected".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PinName(u32);

impl PinName {
    /// Not connected.
    pub const NC: PinName = PinName(0xFFFF_FFFF);

    /// Encode a port and pin index. The indices are not validated.
    pub const fn new(port: u8, pin: u8) -> Self {
        Self(((port as u32) << PORT_SHIFT) | pin as u32)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn is_nc(self) -> bool {
        self.0 == Self::NC.0
    }

    /// Port index (0 = PA).
    #[inline]
    pub const fn port(self) -> usize {
        (self.0 >> PORT_SHIFT) as usize
    }

    /// Pin index within the port.
    #[inline]
    pub const fn pin(self) -> usize {
        (self.0 & !(u32::MAX << PORT_SHIFT)) as usize
    }
}

impl fmt::Display for PinName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port() {
            _ if self.is_nc() => f.write_str("NC"),
            port if port < PORT_COUNT => write!(f, "P{}{}", (b'A' + port as u8) as char, self.pin()),
            _ => write!(f, "{:#x}", self.0),
        }
    }
}

/// Logic level
#[derive(Debug, Eq, PartialEq, Copy, Clone, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Level {
    #[default]
    Low,
    High,
}

impl From<bool> for Level {
    fn from(val: bool) -> Self {
        if val {
            Self::High
        } else {
            Self::Low
        }
    }
}

impl From<Level> for bool {
    fn from(level: Level) -> bool {
        matches!(level, Level::High)
    }
}

/// Access to the interrupt-related registers of the GPIO ports.
///
/// `port` is always a validated index below [`PORT_COUNT`].
pub trait PortRegisters {
    /// INTSRC: pending interrupt sources.
    fn intsrc(&self, port: usize) -> u32;
    /// Write INTSRC. Set bits are cleared.
    fn write_intsrc(&self, port: usize, val: u32);

    /// INTEN: falling edge bits `[15:0]`, rising edge bits `[31:16]`.
    fn inten(&self, port: usize) -> u32;
    fn write_inten(&self, port: usize, val: u32);

    /// INTTYPE: edge (0) or level (1) trigger per pin.
    fn inttype(&self, port: usize) -> u32;
    fn write_inttype(&self, port: usize, val: u32);

    /// DBEN: per-pin debounce enable.
    fn dben(&self, port: usize) -> u32;
    fn write_dben(&self, port: usize, val: u32);

    /// PIN: current input levels.
    fn pin_levels(&self, port: usize) -> u32;

    /// DBCTL: debounce clock source and sampling cycle, shared by every port.
    fn write_dbctl(&self, val: u32);
}

impl<T: PortRegisters + ?Sized> PortRegisters for &T {
    fn intsrc(&self, port: usize) -> u32 {
        (**self).intsrc(port)
    }

    fn write_intsrc(&self, port: usize, val: u32) {
        (**self).write_intsrc(port, val)
    }

    fn inten(&self, port: usize) -> u32 {
        (**self).inten(port)
    }

    fn write_inten(&self, port: usize, val: u32) {
        (**self).write_inten(port, val)
    }

    fn inttype(&self, port: usize) -> u32 {
        (**self).inttype(port)
    }

    fn write_inttype(&self, port: usize, val: u32) {
        (**self).write_inttype(port, val)
    }

    fn dben(&self, port: usize) -> u32 {
        (**self).dben(port)
    }

    fn write_dben(&self, port: usize, val: u32) {
        (**self).write_dben(port, val)
    }

    fn pin_levels(&self, port: usize) -> u32 {
        (**self).pin_levels(port)
    }

    fn write_dbctl(&self, val: u32) {
        (**self).write_dbctl(val)
    }
}

/// Debounce clock source (DBCTL.DBCLKSRC)
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub enum DebounceClock {
    Hclk = 0,
    /// 10 kHz internal low-speed oscillator
    Lirc = 1 << 4,
}

/// Sample a debounced input every 2^n debounce clocks (DBCTL.DBCLKSEL)
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DebounceCycles(pub u8);

/// DBCTL value for the given debounce clock and sampling cycle.
pub const fn dbctl(clock: DebounceClock, cycles: DebounceCycles) -> u32 {
    DBCTL_ICLKON | clock as u32 | (cycles.0 as u32 & 0xF)
}

/// Memory-mapped NUC472 GPIO block.
#[derive(Clone, Copy, Debug, Default)]
pub struct Gpio;

impl Gpio {
    #[inline]
    fn reg(port: usize, offset: usize) -> *mut u32 {
        (GPIO_BASE + port * PORT_STRIDE + offset) as *mut u32
    }

    #[inline]
    fn read(port: usize, offset: usize) -> u32 {
        unsafe { Self::reg(port, offset).read_volatile() }
    }

    #[inline]
    fn write(port: usize, offset: usize, val: u32) {
        unsafe { Self::reg(port, offset).write_volatile(val) }
    }
}

impl PortRegisters for Gpio {
    fn intsrc(&self, port: usize) -> u32 {
        Self::read(port, INTSRC_OFFSET)
    }

    fn write_intsrc(&self, port: usize, val: u32) {
        Self::write(port, INTSRC_OFFSET, val)
    }

    fn inten(&self, port: usize) -> u32 {
        Self::read(port, INTEN_OFFSET)
    }

    fn write_inten(&self, port: usize, val: u32) {
        Self::write(port, INTEN_OFFSET, val)
    }

    fn inttype(&self, port: usize) -> u32 {
        Self::read(port, INTTYPE_OFFSET)
    }

    fn write_inttype(&self, port: usize, val: u32) {
        Self::write(port, INTTYPE_OFFSET, val)
    }

    fn dben(&self, port: usize) -> u32 {
        Self::read(port, DBEN_OFFSET)
    }

    fn write_dben(&self, port: usize, val: u32) {
        Self::write(port, DBEN_OFFSET, val)
    }

    fn pin_levels(&self, port: usize) -> u32 {
        Self::read(port, PIN_OFFSET)
    }

    fn write_dbctl(&self, val: u32) {
        unsafe { (DBCTL_ADDR as *mut u32).write_volatile(val) }
    }
}

// ============ Low-level pin trait ============

pub(crate) trait SealedPin {
    fn pin_name(&self) -> PinName;
}

/// GPIO Pin trait
#[allow(private_bounds)]
pub trait Pin: PeripheralType + SealedPin + Sized + 'static {
    #[inline]
    fn pin(&self) -> u8 {
        self.pin_name().pin() as u8
    }

    #[inline]
    fn port(&self) -> u8 {
        self.pin_name().port() as u8
    }

    #[inline]
    fn degrade(self) -> AnyPin {
        AnyPin {
            name: self.pin_name(),
        }
    }
}

/// Type-erased GPIO pin
pub struct AnyPin {
    name: PinName,
}

impl AnyPin {
    /// # Safety
    /// The caller must own the pin.
    #[inline]
    pub unsafe fn steal(name: PinName) -> Peri<'static, Self> {
        Peri::new_unchecked(Self { name })
    }
}

impl_peripheral!(AnyPin);

impl Pin for AnyPin {}

impl SealedPin for AnyPin {
    #[inline]
    fn pin_name(&self) -> PinName {
        self.name
    }
}

// ============ Generate pin implementations ============

foreach_pin!(
    ($pin_name:ident, $port_num:expr, $pin_num:expr) => {
        impl Pin for peripherals::$pin_name {}

        impl SealedPin for peripherals::$pin_name {
            #[inline]
            fn pin_name(&self) -> PinName {
                PinName::new($port_num, $pin_num)
            }
        }

        impl From<peripherals::$pin_name> for AnyPin {
            fn from(x: peripherals::$pin_name) -> Self {
                x.degrade()
            }
        }
    };
);
