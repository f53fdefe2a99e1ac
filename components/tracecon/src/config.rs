//! Trace console configuration and transport selection
//!
//! Configuration is compile-time only: const structs for identities and
//! addresses, cargo features for the register backend.
//! - `transport-mmio`: memory-mapped status/data pair (default)
//! - `transport-dcc`: AArch64 debug communications channel
//! - `transport-null`: no output

use crate::host::Termios;

/// Identity and policy of the trace console and its tty
#[derive(Debug, Clone, Copy)]
pub struct TraceConfig {
    /// Console name as seen by the console registry (`console=` matching)
    pub console_name: &'static str,
    /// Driver name in the tty registry
    pub driver_name: &'static str,
    /// Device node base name; the single unit is `<device_name>0`
    pub device_name: &'static str,
    /// Device major number
    pub major: u32,
    /// Minor number of the single unit
    pub minor_start: u32,
    /// Capacity reported by `write_room`
    pub write_room: usize,
    /// Default terminal settings of the tty
    pub termios: Termios,
}

impl TraceConfig {
    /// Write room reported to the tty layer
    ///
    /// There is no queue behind the transport, so this is just "large".
    pub const WRITE_ROOM: usize = 8192;

    pub const DEFAULT: TraceConfig = TraceConfig {
        console_name: "ttyTRC",
        driver_name: "tracecon",
        device_name: "ttyTRC",
        major: 204,
        minor_start: 0,
        write_room: Self::WRITE_ROOM,
        termios: Termios::TRACE_DEFAULT,
    };
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Placement of a memory-mapped trace register pair
#[derive(Debug, Clone, Copy)]
pub struct MmioConfig {
    /// Physical (identity-mapped) base address
    pub mmio_base: usize,
    /// Offset of the status register from the base
    pub status_offset: usize,
    /// Offset of the data register from the base
    pub data_offset: usize,
    /// Status bits meaning "data register occupied"
    pub busy_mask: u32,
}

impl MmioConfig {
    /// Trace port of the QEMU virt-based development board
    pub const DEFAULT: MmioConfig = MmioConfig {
        mmio_base: 0x0901_0000,
        status_offset: 0x00,
        data_offset: 0x04,
        busy_mask: 1 << 0,
    };
}

/// Register backend selected by cargo features
///
/// # Safety
/// With `transport-mmio` the caller must ensure [`MmioConfig::DEFAULT`] is
/// mapped as device memory.
#[cfg(feature = "transport-mmio")]
pub unsafe fn default_registers() -> crate::transport::mmio::MmioRegisters {
    crate::transport::mmio::MmioRegisters::new(MmioConfig::DEFAULT)
}

#[cfg(all(
    feature = "transport-dcc",
    target_arch = "aarch64",
    not(feature = "transport-mmio")
))]
pub unsafe fn default_registers() -> crate::transport::dcc::DccRegisters {
    crate::transport::dcc::DccRegisters
}

#[cfg(all(
    feature = "transport-null",
    not(feature = "transport-mmio"),
    not(all(feature = "transport-dcc", target_arch = "aarch64"))
))]
pub unsafe fn default_registers() -> crate::transport::null::NullRegisters {
    crate::transport::null::NullRegisters
}
