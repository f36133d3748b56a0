use super::SystemControl;

/// SYS->REGLCTL: write 0x59, 0x16, 0x88 to unlock, anything else to lock
const SYS_REGLCTL: usize = 0x4000_0100;
/// SYS->IPRST1: peripheral reset bits
pub(crate) const SYS_IPRST1: usize = 0x4000_000C;

/// CLK->PWRCTL
const CLK_PWRCTL: usize = 0x4000_0200;
/// CLK->APBCLK0: peripheral clock gates
pub(crate) const CLK_APBCLK0: usize = 0x4000_0208;
/// CLK->CLKSEL1: peripheral clock source selection
pub(crate) const CLK_CLKSEL1: usize = 0x4000_0214;

/// Power-down wake-up delay (wait for the clock to stabilise after wake-up)
const PWRCTL_PDWKDLY: u32 = 1 << 4;
/// Enter power-down instead of idle on WFI
const PWRCTL_PDEN: u32 = 1 << 7;

const REGLCTL_UNLOCK_KEYS: [u32; 3] = [0x59, 0x16, 0x88];

#[inline]
pub(crate) fn read(addr: usize) -> u32 {
    unsafe { (addr as *const u32).read_volatile() }
}

#[inline]
pub(crate) fn write(addr: usize, val: u32) {
    unsafe { (addr as *mut u32).write_volatile(val) }
}

#[inline]
pub(crate) fn modify(addr: usize, f: impl FnOnce(u32) -> u32) {
    write(addr, f(read(addr)))
}

/// NUC472 system manager, clock controller and Cortex-M4 system control block.
#[derive(Clone, Copy, Debug, Default)]
pub struct Nuc472;

impl SystemControl for Nuc472 {
    fn unlock_registers(&self) {
        while !self.is_unlocked() {
            for key in REGLCTL_UNLOCK_KEYS {
                write(SYS_REGLCTL, key);
            }
        }
    }

    fn lock_registers(&self) {
        write(SYS_REGLCTL, 0);
    }

    fn is_unlocked(&self) -> bool {
        read(SYS_REGLCTL) & 1 != 0
    }

    fn power_down(&self) {
        let mut cp = unsafe { cortex_m::Peripherals::steal() };
        cp.SCB.set_sleepdeep();
        modify(CLK_PWRCTL, |v| v | PWRCTL_PDEN | PWRCTL_PDWKDLY);
        cortex_m::asm::wfi();
    }

    fn halt(&self) {
        let mut cp = unsafe { cortex_m::Peripherals::steal() };
        cp.SCB.clear_sleepdeep();
        modify(CLK_PWRCTL, |v| v & !PWRCTL_PDEN);
        cortex_m::asm::wfi();
    }

    fn nop(&self) {
        cortex_m::asm::nop();
    }
}
