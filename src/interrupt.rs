//! Interrupt definitions and type-level interrupt infrastructure for NUC472.
//!
//! This module provides:
//! - `Interrupt` enum with the IRQ sources the HAL drives
//! - `InterruptExt` trait for enable/disable/pending operations
//! - Type-level interrupt types for compile-time binding checks
//! - `Handler` and `Binding` traits for the `bind_interrupts!` pattern

use core::sync::atomic::{compiler_fence, Ordering};

use crate::intc;

/// NUC472 Interrupt sources
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
#[allow(non_camel_case_types)]
pub enum Interrupt {
    BOD = 0,
    IRC = 1,
    PWRWU = 2,
    RTC = 6,
    EINT0 = 8,
    EINT1 = 9,
    EINT2 = 10,
    EINT3 = 11,
    EINT4 = 12,
    EINT5 = 13,
    EINT6 = 14,
    EINT7 = 15,
    GPA = 16,
    GPB = 17,
    GPC = 18,
    GPD = 19,
    GPE = 20,
    GPF = 21,
    GPG = 22,
    GPH = 23,
    GPI = 24,
    TMR0 = 32,
    TMR1 = 33,
    TMR2 = 34,
    TMR3 = 35,
}

impl Interrupt {
    /// Get the IRQ number
    pub fn number(self) -> u16 {
        self as u16
    }

    /// NVIC line of a GPIO port, `None` past port I.
    pub fn gpio_port(port: usize) -> Option<Self> {
        const PORTS: [Interrupt; 9] = [
            Interrupt::GPA,
            Interrupt::GPB,
            Interrupt::GPC,
            Interrupt::GPD,
            Interrupt::GPE,
            Interrupt::GPF,
            Interrupt::GPG,
            Interrupt::GPH,
            Interrupt::GPI,
        ];
        PORTS.get(port).copied()
    }
}

// SAFETY: every discriminant is a valid NUC472 IRQ number.
unsafe impl cortex_m::interrupt::InterruptNumber for Interrupt {
    #[inline]
    fn number(self) -> u16 {
        self as u16
    }
}

/// Extension trait for interrupt operations via the NVIC.
pub trait InterruptExt: Copy {
    /// Get the IRQ number.
    fn number(self) -> u16;

    /// Enable the interrupt in the NVIC.
    ///
    /// # Safety
    /// Enabling interrupts can cause handlers to execute immediately.
    unsafe fn enable(self);

    /// Disable the interrupt in the NVIC.
    fn disable(self);

    /// Check if interrupt is enabled in the NVIC.
    fn is_enabled(self) -> bool;

    /// Set interrupt pending.
    fn pend(self);

    /// Clear interrupt pending.
    fn unpend(self);
}

impl InterruptExt for Interrupt {
    fn number(self) -> u16 {
        self as u16
    }

    unsafe fn enable(self) {
        compiler_fence(Ordering::SeqCst);
        intc::enable_irq(self);
    }

    fn disable(self) {
        intc::disable_irq(self);
        compiler_fence(Ordering::SeqCst);
    }

    fn is_enabled(self) -> bool {
        intc::is_irq_enabled(self)
    }

    fn pend(self) {
        intc::pend_irq(self);
    }

    fn unpend(self) {
        intc::unpend_irq(self);
    }
}

/// Type-level interrupt infrastructure.
///
/// This module contains one *type* per interrupt. This is used for checking at compile time that
/// the interrupts are correctly bound to HAL drivers.
pub mod typelevel {
    use super::InterruptExt;

    trait SealedInterrupt {}

    /// Type-level interrupt.
    #[allow(private_bounds)]
    pub trait Interrupt: SealedInterrupt {
        /// Interrupt enum variant.
        const IRQ: super::Interrupt;

        /// Enable the interrupt.
        #[inline]
        unsafe fn enable() {
            Self::IRQ.enable()
        }

        /// Disable the interrupt.
        #[inline]
        fn disable() {
            Self::IRQ.disable()
        }

        /// Check if interrupt is enabled.
        #[inline]
        fn is_enabled() -> bool {
            Self::IRQ.is_enabled()
        }
    }

    /// Interrupt handler trait.
    ///
    /// Drivers that need to handle interrupts implement this trait.
    pub trait Handler<I: Interrupt> {
        /// Interrupt handler function.
        ///
        /// # Safety
        /// Must ONLY be called from the interrupt handler for `I`.
        unsafe fn on_interrupt();
    }

    /// Compile-time assertion that an interrupt has been bound to a handler.
    ///
    /// # Safety
    /// By implementing this trait, you assert that `H::on_interrupt()` will be called
    /// every time the `I` interrupt fires.
    pub unsafe trait Binding<I: Interrupt, H: Handler<I>> {}

    macro_rules! impl_irq_typelevel {
        ($name:ident) => {
            #[allow(non_camel_case_types)]
            #[doc = stringify!($name)]
            #[doc = " typelevel interrupt."]
            pub enum $name {}
            impl SealedInterrupt for $name {}
            impl Interrupt for $name {
                const IRQ: super::Interrupt = super::Interrupt::$name;
            }
        };
    }

    impl_irq_typelevel!(BOD);
    impl_irq_typelevel!(IRC);
    impl_irq_typelevel!(PWRWU);
    impl_irq_typelevel!(RTC);
    impl_irq_typelevel!(EINT0);
    impl_irq_typelevel!(EINT1);
    impl_irq_typelevel!(EINT2);
    impl_irq_typelevel!(EINT3);
    impl_irq_typelevel!(EINT4);
    impl_irq_typelevel!(EINT5);
    impl_irq_typelevel!(EINT6);
    impl_irq_typelevel!(EINT7);
    impl_irq_typelevel!(GPA);
    impl_irq_typelevel!(GPB);
    impl_irq_typelevel!(GPC);
    impl_irq_typelevel!(GPD);
    impl_irq_typelevel!(GPE);
    impl_irq_typelevel!(GPF);
    impl_irq_typelevel!(GPG);
    impl_irq_typelevel!(GPH);
    impl_irq_typelevel!(GPI);
    impl_irq_typelevel!(TMR0);
    impl_irq_typelevel!(TMR1);
    impl_irq_typelevel!(TMR2);
    impl_irq_typelevel!(TMR3);
}
