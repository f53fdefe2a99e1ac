//! AArch64 debug communications channel (DCC)
//!
//! An attached debugger drains DBGDTRTX_EL0; MDCCSR_EL0.TXfull stays set
//! until it has. With no debugger attached the bit never clears and
//! writers stall, which is the documented behaviour of this transport.

use super::RegisterPair;
use crate::arch::aarch64::{read_mdccsr_el0, write_dbgdtrtx_el0, MDCCSR_TX_FULL};

/// DCC transmit registers of the executing core
#[derive(Clone, Copy, Default)]
pub struct DccRegisters;

impl RegisterPair for DccRegisters {
    #[inline]
    fn status(&self) -> u32 {
        read_mdccsr_el0()
    }

    #[inline]
    fn busy_mask(&self) -> u32 {
        MDCCSR_TX_FULL
    }

    #[inline]
    fn write_data(&self, byte: u8) {
        write_dbgdtrtx_el0(byte as u32);
    }
}
