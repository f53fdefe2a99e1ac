//! Architecture support
//!
//! Only two things are architecture specific here: masking local interrupts
//! around the sink guard, and the AArch64 debug communications channel
//! registers used by the DCC transport. Hosted builds (tests, simulators)
//! get a no-op interrupt mask.

#[cfg(target_arch = "aarch64")]
pub mod aarch64;

/// Local interrupt mask held for the lifetime of the guard
///
/// Taking the sink lock with interrupts masked keeps an interrupt handler
/// that prints from spinning forever on a lock held by the code it
/// interrupted.
pub struct IrqGuard {
    #[cfg_attr(not(all(target_arch = "aarch64", target_os = "none")), allow(dead_code))]
    saved: u64,
}

impl IrqGuard {
    /// Mask local interrupts, remembering the previous state
    #[inline]
    pub fn save() -> Self {
        #[cfg(all(target_arch = "aarch64", target_os = "none"))]
        let saved = aarch64::local_irq_save();

        #[cfg(not(all(target_arch = "aarch64", target_os = "none")))]
        let saved = 0;

        Self { saved }
    }
}

impl Drop for IrqGuard {
    #[inline]
    fn drop(&mut self) {
        #[cfg(all(target_arch = "aarch64", target_os = "none"))]
        aarch64::local_irq_restore(self.saved);
    }
}
