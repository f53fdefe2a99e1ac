//! Trace transport
//!
//! The trace host is reached through a register pair: a status register
//! polled for a busy bit, and a data register taking one byte per write.
//! Backends implement [`RegisterPair`]; [`Transport`] owns the polling
//! protocol on top of them.
//!
//! There is no timeout. A trace host that never drains the data register
//! stalls the caller forever, and callers accept that in exchange for the
//! guarantee that every byte is eventually delivered.

/// Status/data register pair of a trace host
///
/// Implementations are plain register accessors: no locking, no polling.
pub trait RegisterPair: Send + Sync {
    /// Read the raw status register
    fn status(&self) -> u32;

    /// Bits of [`status`](Self::status) meaning the data register is occupied
    fn busy_mask(&self) -> u32;

    /// Write one byte to the data register
    fn write_data(&self, byte: u8);
}

/// Polled byte transport to the trace host
pub struct Transport<R: RegisterPair> {
    regs: R,
}

impl<R: RegisterPair> Transport<R> {
    /// Wrap a register pair
    pub const fn new(regs: R) -> Self {
        Self { regs }
    }

    /// Check whether the data register is still occupied
    #[inline]
    pub fn busy(&self) -> bool {
        self.regs.status() & self.regs.busy_mask() != 0
    }

    /// Write one byte, spinning until the register reports not busy
    ///
    /// Cannot fail. Bytes leave in call order, exactly one per call.
    #[inline]
    pub fn write_byte(&self, byte: u8) {
        while self.busy() {
            core::hint::spin_loop();
        }
        self.regs.write_data(byte);
    }
}

pub mod mmio;
pub mod null;

#[cfg(target_arch = "aarch64")]
pub mod dcc;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::SimRegisters;

    #[test]
    fn test_write_byte_waits_for_ready() {
        let regs = SimRegisters::with_busy_polls(3);
        let transport = Transport::new(regs.clone());

        transport.write_byte(b'a');
        transport.write_byte(b'b');

        assert_eq!(regs.captured(), b"ab");
        assert_eq!(regs.overruns(), 0);
        // The second byte had to wait out the busy window of the first
        assert!(regs.status_reads() >= 4);
    }

    #[test]
    fn test_control_bytes_pass_through() {
        let regs = SimRegisters::new();
        let transport = Transport::new(regs.clone());

        for &b in b"\r\n\0\x1b[0m" {
            transport.write_byte(b);
        }

        assert_eq!(regs.captured(), b"\r\n\0\x1b[0m");
    }
}
