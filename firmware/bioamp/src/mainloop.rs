use core::sync::atomic::{AtomicBool, Ordering};

use ads1292_driver::traits::DrdyIrq;
use embedded_hal::{delay::DelayNs, digital::OutputPin};

use crate::{
    auxadc::AdcHw,
    bus::SpiHw,
    device::{Core, McuRegisters},
    link::UartHw,
};

/// Platform sleep primitive.
pub trait Park {
    /// Atomically re-enable interrupts and halt until one fires. Called
    /// with interrupts globally masked; the atomicity is what closes the
    /// window between the wake flag check and the halt.
    fn sleep_with_interrupts_enabled(&mut self);
}

/// The single wake flag shared by every interrupt handler and the main
/// loop.
pub struct InterruptGate {
    wake: AtomicBool,
}

impl InterruptGate {
    pub const fn new() -> Self {
        Self {
            wake: AtomicBool::new(false),
        }
    }

    /// Raise the wake flag. Every interrupt handler calls this on exit.
    pub fn notify(&self) {
        self.wake.store(true, Ordering::Release);
    }

    /// Consume the flag; true when any interrupt fired since the last
    /// take.
    pub fn take(&self) -> bool {
        self.wake.swap(false, Ordering::AcqRel)
    }

    /// Park the processor unless an interrupt is already pending. The
    /// re-check runs with interrupts masked so a wakeup between the check
    /// and the sleep cannot be lost.
    pub fn park(&self, park: &mut impl Park) {
        critical_section::with(|_| {
            if !self.wake.load(Ordering::Acquire) {
                park.sleep_with_interrupts_enabled();
            }
        });
    }
}

impl Default for InterruptGate {
    fn default() -> Self {
        Self::new()
    }
}

/// The main loop: service the core while interrupts keep arriving, then
/// sleep until the next one.
pub fn run<U, S, A, Irq, Rst, Cs, Delay, Regs>(
    core: &mut Core<'_, U, S, A, Irq, Rst, Cs, Delay, Regs>,
    gate: &InterruptGate,
    park: &mut impl Park,
) -> !
where
    U: UartHw,
    S: SpiHw,
    A: AdcHw,
    Irq: DrdyIrq,
    Rst: OutputPin,
    Cs: OutputPin,
    Delay: DelayNs,
    Regs: McuRegisters,
{
    loop {
        while gate.take() {
            core.service();
        }
        gate.park(park);
    }
}
