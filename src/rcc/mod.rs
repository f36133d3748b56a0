//! System and clock control: protected register lock, module reset/clock gating and the
//! processor power states used by [`crate::sleep`].

mod nuc472;
pub use nuc472::*;

/// Power controller operations needed to put the core to sleep.
pub trait SystemControl {
    /// Open the write-protected system registers.
    fn unlock_registers(&self);

    /// Close the write-protected system registers.
    fn lock_registers(&self);

    /// Whether the write-protected system registers are currently open.
    fn is_unlocked(&self) -> bool;

    /// Enter power-down: SLEEPDEEP set, high-speed oscillators stopped, only LIRC/LXT running.
    /// Returns once a wake-up source fires.
    ///
    /// Registers must be unlocked.
    fn power_down(&self);

    /// Halt the CPU clock with every oscillator kept running. Returns on the next interrupt.
    ///
    /// Registers must be unlocked.
    fn halt(&self);

    /// One no-op instruction.
    fn nop(&self);
}

impl<T: SystemControl + ?Sized> SystemControl for &T {
    fn unlock_registers(&self) {
        (**self).unlock_registers()
    }

    fn lock_registers(&self) {
        (**self).lock_registers()
    }

    fn is_unlocked(&self) -> bool {
        (**self).is_unlocked()
    }

    fn power_down(&self) {
        (**self).power_down()
    }

    fn halt(&self) {
        (**self).halt()
    }

    fn nop(&self) {
        (**self).nop()
    }
}

/// Run `f` with the protected registers unlocked.
///
/// The registers are locked again afterwards only if they were locked on entry.
pub fn with_unlocked<S: SystemControl + ?Sized, R>(sys: &S, f: impl FnOnce() -> R) -> R {
    let was_locked = !sys.is_unlocked();
    if was_locked {
        sys.unlock_registers();
    }
    let r = f();
    if was_locked {
        sys.lock_registers();
    }
    r
}
