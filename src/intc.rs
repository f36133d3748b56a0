//! NVIC vector management for NUC472
//!
//! Handlers are installed at run time, the way the vendor BSP uses `NVIC_SetVector`:
//! [`init`] copies the boot vector table into RAM and points VTOR at the copy, and
//! [`set_irq_handler`] records a handler in a software table and routes the RAM vector
//! for that line to a common trampoline. The trampoline looks up the active vector in
//! ICSR and dispatches.

use core::cell::Cell;
use core::ptr::addr_of_mut;

use cortex_m::peripheral::NVIC;
use embassy_sync::blocking_mutex::CriticalSectionMutex;

use crate::interrupt::Interrupt;

/// Number of device IRQ lines on NUC472
pub const IRQ_COUNT: usize = 142;

/// Cortex-M system exceptions preceding the device IRQs in the vector table
const EXCEPTION_COUNT: usize = 16;

const VECTOR_COUNT: usize = EXCEPTION_COUNT + IRQ_COUNT;

/// SCB->ICSR, VECTACTIVE in bits [8:0]
const SCB_ICSR: usize = 0xE000_ED04;
const ICSR_VECTACTIVE_MSK: u32 = 0x1FF;

/// IRQ handler function type
pub type IrqHandler = fn();

/// Installs vectors and gates NVIC lines.
///
/// Drivers take this as a type parameter so that they can be exercised against a recording
/// controller in tests.
pub trait InterruptController {
    /// Route `irq` to `handler`.
    fn set_vector(&self, irq: Interrupt, handler: IrqHandler);

    /// Unmask `irq`.
    fn enable(&self, irq: Interrupt);

    /// Mask `irq`.
    fn disable(&self, irq: Interrupt);

    /// Set `irq` pending from software.
    fn pend(&self, irq: Interrupt);
}

impl<T: InterruptController + ?Sized> InterruptController for &T {
    fn set_vector(&self, irq: Interrupt, handler: IrqHandler) {
        (**self).set_vector(irq, handler)
    }

    fn enable(&self, irq: Interrupt) {
        (**self).enable(irq)
    }

    fn disable(&self, irq: Interrupt) {
        (**self).disable(irq)
    }

    fn pend(&self, irq: Interrupt) {
        (**self).pend(irq)
    }
}

/// The Cortex-M NVIC.
#[derive(Clone, Copy, Debug, Default)]
pub struct Nvic;

impl InterruptController for Nvic {
    fn set_vector(&self, irq: Interrupt, handler: IrqHandler) {
        set_irq_handler(irq, handler);
    }

    fn enable(&self, irq: Interrupt) {
        enable_irq(irq);
    }

    fn disable(&self, irq: Interrupt) {
        disable_irq(irq);
    }

    fn pend(&self, irq: Interrupt) {
        pend_irq(irq);
    }
}

#[repr(C, align(1024))]
struct VectorTable([usize; VECTOR_COUNT]);

static mut RAM_VECTORS: VectorTable = VectorTable([0; VECTOR_COUNT]);

const NO_HANDLER: CriticalSectionMutex<Cell<Option<IrqHandler>>> = CriticalSectionMutex::new(Cell::new(None));

/// IRQ dispatch table
static IRQ_TABLE: [CriticalSectionMutex<Cell<Option<IrqHandler>>>; IRQ_COUNT] = [NO_HANDLER; IRQ_COUNT];

/// Relocate the vector table to RAM.
///
/// # Safety
/// Must be called once during HAL init, before any handler is installed and with interrupts
/// disabled.
pub unsafe fn init() {
    let cp = cortex_m::Peripherals::steal();

    let src = cp.SCB.vtor.read() as *const usize;
    let dst = addr_of_mut!(RAM_VECTORS.0) as *mut usize;
    for i in 0..VECTOR_COUNT {
        dst.add(i).write_volatile(src.add(i).read_volatile());
    }

    cp.SCB.vtor.write(dst as u32);

    // Mask everything; drivers enable the lines they own.
    for i in 0..IRQ_COUNT {
        NVIC::mask(RawIrq(i as u16));
    }
    cp.NVIC.icpr.iter().for_each(|r| r.write(0xFFFF_FFFF));

    debug!("vector table relocated to {=usize:#x}", dst as usize);
}

/// Register an IRQ handler for the given IRQ line.
pub fn set_irq_handler(irq: Interrupt, handler: IrqHandler) {
    let n = irq.number() as usize;
    if n >= IRQ_COUNT {
        return;
    }
    critical_section::with(|_| {
        IRQ_TABLE[n].lock(|slot| slot.set(Some(handler)));
        unsafe {
            let vectors = addr_of_mut!(RAM_VECTORS.0) as *mut usize;
            vectors
                .add(EXCEPTION_COUNT + n)
                .write_volatile(__irq_trampoline as usize);
        }
    });
}

/// Enable an IRQ line in the NVIC.
pub fn enable_irq(irq: Interrupt) {
    unsafe { NVIC::unmask(irq) };
}

/// Disable an IRQ line in the NVIC.
pub fn disable_irq(irq: Interrupt) {
    NVIC::mask(irq);
}

/// Check if an IRQ line is enabled in the NVIC.
pub fn is_irq_enabled(irq: Interrupt) -> bool {
    NVIC::is_enabled(irq)
}

/// Force an IRQ (software trigger).
pub fn pend_irq(irq: Interrupt) {
    NVIC::pend(irq);
}

/// Clear pending for an IRQ.
pub fn unpend_irq(irq: Interrupt) {
    NVIC::unpend(irq);
}

#[derive(Clone, Copy)]
struct RawIrq(u16);

unsafe impl cortex_m::interrupt::InterruptNumber for RawIrq {
    fn number(self) -> u16 {
        self.0
    }
}

/// Get the currently active IRQ line from ICSR.
#[inline]
fn active_irq() -> Option<usize> {
    let icsr = unsafe { (SCB_ICSR as *const u32).read_volatile() };
    ((icsr & ICSR_VECTACTIVE_MSK) as usize).checked_sub(EXCEPTION_COUNT)
}

/// Dispatch the IRQ to the registered handler.
fn dispatch(irq: usize) {
    let handler = IRQ_TABLE[irq].lock(|slot| slot.get());
    if let Some(h) = handler {
        h();
    }
}

/// Entry point placed in the RAM vector table for every line that has a handler.
unsafe extern "C" fn __irq_trampoline() {
    match active_irq() {
        Some(irq) if irq < IRQ_COUNT => dispatch(irq),
        _ => {}
    }
}
