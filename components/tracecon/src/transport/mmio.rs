//! Memory-mapped trace register pair

use core::ptr::{read_volatile, write_volatile};

use super::RegisterPair;
use crate::config::MmioConfig;

/// Status/data registers at fixed MMIO addresses
///
/// # Safety
/// This backend directly accesses MMIO registers. The caller of
/// [`MmioRegisters::new`] must ensure the region is mapped as device memory.
pub struct MmioRegisters {
    status: usize,
    data: usize,
    busy_mask: u32,
}

impl MmioRegisters {
    /// Create the register pair from configuration
    ///
    /// # Safety
    /// The caller must ensure `config.mmio_base` plus both offsets are valid,
    /// mapped, 32-bit aligned device registers for the lifetime of the value.
    pub const unsafe fn new(config: MmioConfig) -> Self {
        Self {
            status: config.mmio_base + config.status_offset,
            data: config.mmio_base + config.data_offset,
            busy_mask: config.busy_mask,
        }
    }
}

impl RegisterPair for MmioRegisters {
    #[inline]
    fn status(&self) -> u32 {
        unsafe { read_volatile(self.status as *const u32) }
    }

    #[inline]
    fn busy_mask(&self) -> u32 {
        self.busy_mask
    }

    #[inline]
    fn write_data(&self, byte: u8) {
        unsafe { write_volatile(self.data as *mut u32, byte as u32) }
    }
}

// Plain addresses; the sink guard serializes all access
unsafe impl Send for MmioRegisters {}
unsafe impl Sync for MmioRegisters {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Transport;

    #[test]
    fn test_polls_status_then_writes_data() {
        // Two words standing in for the device: [status, data]
        let mut regs = [0u32; 2];
        let config = MmioConfig {
            mmio_base: regs.as_mut_ptr() as usize,
            status_offset: 0,
            data_offset: 4,
            busy_mask: 1,
        };

        let transport = Transport::new(unsafe { MmioRegisters::new(config) });
        assert!(!transport.busy());
        transport.write_byte(b'Z');

        assert_eq!(unsafe { read_volatile(&regs[1]) }, b'Z' as u32);
    }
}
