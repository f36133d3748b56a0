#![cfg_attr(not(test), no_std)]
#![allow(unexpected_cfgs)]

pub(crate) use embassy_hal_internal::{impl_peripheral, peripherals_definition, peripherals_struct};
pub use embassy_hal_internal::{Peri, PeripheralType};

// This must go FIRST so that all the other modules see its macros.
include!(concat!(env!("OUT_DIR"), "/_macros.rs"));

mod fmt;

pub mod time;

pub mod embassy;

pub mod rcc;

pub mod intc;

pub mod interrupt;

pub mod gpio;

pub mod exti;

pub mod timer;

pub mod lp_ticker;

pub mod sleep;

#[cfg(test)]
pub(crate) mod testing;

pub use crate::_generated::{peripherals, Peripherals};

// This must go last, so that it sees all the impl_foo! macros defined earlier.
pub(crate) mod _generated {
    #![allow(dead_code)]
    #![allow(unused_imports)]
    #![allow(non_snake_case)]
    #![allow(missing_docs)]

    include!(concat!(env!("OUT_DIR"), "/_generated.rs"));
}

/// Pin interrupt dispatcher wired to the NUC472 GPIO ports and the NVIC.
pub type Dispatcher = exti::Exti<gpio::Gpio, intc::Nvic>;

/// Low-power ticker running on TIMER2.
pub type Ticker = lp_ticker::LpTicker<timer::Timer2, intc::Nvic>;

/// Sleep orchestrator driving the NUC472 power controller.
pub type SleepControl = sleep::Sleep<rcc::Nuc472>;

static EXTI: Dispatcher = exti::Exti::new(gpio::Gpio, intc::Nvic);

static LP_TICKER: Ticker = lp_ticker::LpTicker::new(timer::Timer2, intc::Nvic);

static SLEEP: SleepControl = sleep::Sleep::new(rcc::Nuc472);

/// The process-wide pin interrupt dispatcher.
///
/// Port vectors installed by [`exti::Exti::enable`] dispatch into this instance.
#[inline]
pub fn exti() -> &'static Dispatcher {
    &EXTI
}

/// The process-wide low-power ticker.
///
/// The first [`lp_ticker::LpTicker::read`] initialises the timer if [`init`] has not done so yet.
#[inline]
pub fn lp_ticker() -> &'static Ticker {
    &LP_TICKER
}

/// The process-wide sleep orchestrator.
#[inline]
pub fn sleep() -> &'static SleepControl {
    &SLEEP
}

#[derive(Default)]
pub struct Config {
    pub lp_ticker: lp_ticker::Config,
    pub sleep: sleep::Config,
}

/// Initialize the HAL with the provided configuration.
///
/// This returns the peripheral singletons that can be used for creating drivers.
///
/// This should only be called once at startup, otherwise it panics.
pub fn init(config: Config) -> Peripherals {
    let p = Peripherals::take();

    // Relocate the vector table to RAM (must be before any interrupt users)
    unsafe {
        intc::init();
    }

    LP_TICKER.configure(config.lp_ticker);
    LP_TICKER.init();

    SLEEP.configure(config.sleep);

    // Initialize Embassy time driver (TIMER2 overflow tracking)
    unsafe {
        crate::embassy::init();
    }

    unsafe {
        cortex_m::interrupt::enable();
    }

    info!("nuc472-hal initialised");

    p
}

#[macro_export]
macro_rules! bind_interrupts {
    ($vis:vis struct $name:ident { $($irq:ident => $($handler:ty),*;)* }) => {
        #[derive(Copy, Clone)]
        $vis struct $name;

        $(
            $(
                unsafe impl $crate::interrupt::typelevel::Binding<$crate::interrupt::typelevel::$irq, $handler> for $name {}
            )*
        )*

        impl $name {
            /// Register all bound interrupt handlers into the RAM vector table.
            ///
            /// # Safety
            /// Must be called after HAL init and before the bound interrupts can fire.
            #[allow(unused)]
            pub unsafe fn init() {
                $(
                    $crate::intc::set_irq_handler(
                        $crate::interrupt::Interrupt::$irq,
                        || {
                            $(
                                <$handler as $crate::interrupt::typelevel::Handler<$crate::interrupt::typelevel::$irq>>::on_interrupt();
                            )*
                        },
                    );
                    $crate::intc::enable_irq($crate::interrupt::Interrupt::$irq);
                )*
            }
        }
    };
}
