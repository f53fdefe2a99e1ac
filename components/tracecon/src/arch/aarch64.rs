//! ARM64 system register access (interrupt mask, DCC)

use core::arch::asm;

/// MDCCSR_EL0.TXfull: DBGDTRTX_EL0 still holds a byte the debugger has not read
pub const MDCCSR_TX_FULL: u32 = 1 << 29;

/// Save DAIF and mask IRQ and FIQ
///
/// This and [`local_irq_restore`] are compiler barriers: no memory access
/// moves across a DAIF write.
#[inline(always)]
pub fn local_irq_save() -> u64 {
    let daif: u64;
    unsafe {
        asm!("mrs {}, daif", out(reg) daif, options(nomem, nostack, preserves_flags));
        asm!("msr daifset, #3", options(nostack, preserves_flags));
    }
    daif
}

/// Restore DAIF saved by [`local_irq_save`]
#[inline(always)]
pub fn local_irq_restore(daif: u64) {
    unsafe {
        asm!("msr daif, {}", in(reg) daif, options(nostack, preserves_flags));
    }
}

/// Read MDCCSR_EL0 (Debug Comms Channel Status Register)
#[inline(always)]
pub fn read_mdccsr_el0() -> u32 {
    let val: u64;
    unsafe {
        asm!("mrs {}, mdccsr_el0", out(reg) val, options(nomem, nostack, preserves_flags));
    }
    val as u32
}

/// Write DBGDTRTX_EL0 (Debug Comms Channel transmit data)
#[inline(always)]
pub fn write_dbgdtrtx_el0(val: u32) {
    unsafe {
        asm!("msr dbgdtrtx_el0, {}", in(reg) val as u64, options(nostack, preserves_flags));
    }
}
