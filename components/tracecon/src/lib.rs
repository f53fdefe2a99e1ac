//! Trace Console - Kernel console and tty sink for an external trace host
//!
//! # Purpose
//! Relays textual diagnostic output to a trace host (JTAG probe, simulator,
//! debugger) over a narrow polled transport: one status register and one
//! data register. Two front ends share the transport:
//! - **console**: always-on kernel console, fed log lines directly
//! - **device**: a writable tty exposed to user-space processes
//!
//! # Integration Points
//! - Depends on: host console registry, host tty registry (see [`host`])
//! - Provides to: kernel logging, user-space writers of the trace tty
//! - Capabilities required: access to the trace register pair
//!
//! # Architecture
//! ```text
//! console producer ─┐
//!                   ├─> LineSink::write ─> Transport::write_byte ─> registers
//! tty writer ───────┘      (spin guard)       (poll until not busy)
//! ```
//! [`TraceConsole`] owns the stack and brings it up in the order
//! transport → sink → device → console, tearing down in exact reverse.
//!
//! # Testing Strategy
//! - Unit tests: transport polling, sink atomicity, port bookkeeping
//! - Integration tests: full bring-up/teardown against the mock host
//! - Hardware sim tests: [`mock::SimRegisters`] models the busy bit

#![no_std]

#[cfg(test)]
#[macro_use]
extern crate std;

extern crate alloc;

pub mod arch;
pub mod config;
pub mod console;
pub mod device;
pub mod host;
pub mod lifecycle;
pub mod sink;
pub mod transport;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use config::{MmioConfig, TraceConfig};
pub use console::ConsoleAdapter;
pub use device::{DeviceAdapter, DevicePort};
pub use lifecycle::{Stage, TraceConsole};
pub use sink::{LineSink, SinkWriter};
pub use transport::{RegisterPair, Transport};

use thiserror::Error;

/// Linux errno values used by the host registries
pub mod errno {
    pub const ENOMEM: i32 = 12;
    pub const EBUSY: i32 = 16;
    pub const ENODEV: i32 = 19;
    pub const EINVAL: i32 = 22;
    pub const EOPNOTSUPP: i32 = 95;
    /// Kernel-internal "ioctl not handled here, try the generic path"
    pub const ENOIOCTLCMD: i32 = 515;
}

/// Error types for trace console operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TraceError {
    #[error("Out of memory")]
    OutOfMemory,

    #[error("Already registered")]
    Busy,

    #[error("Host error (errno {errno})")]
    Host { errno: i32 },

    #[error("Invalid argument")]
    InvalidArgument,

    #[error("No such device")]
    NoDevice,

    #[error("{what} is not registered")]
    NotRegistered { what: &'static str },

    #[error("Operation not supported")]
    NotSupported,

    #[error("Ioctl command not recognized")]
    NoIoctlCommand,
}

impl TraceError {
    /// Negative errno reported to the host for this error
    pub fn errno(&self) -> i32 {
        match *self {
            TraceError::OutOfMemory => -errno::ENOMEM,
            TraceError::Busy => -errno::EBUSY,
            TraceError::Host { errno } => errno,
            TraceError::InvalidArgument => -errno::EINVAL,
            TraceError::NoDevice | TraceError::NotRegistered { .. } => -errno::ENODEV,
            TraceError::NotSupported => -errno::EOPNOTSUPP,
            TraceError::NoIoctlCommand => -errno::ENOIOCTLCMD,
        }
    }

    /// Classify a negative errno returned by a host registry
    ///
    /// Unknown codes are carried through unchanged as [`TraceError::Host`].
    pub fn from_errno(code: i32) -> Self {
        match code.wrapping_neg() {
            errno::ENOMEM => TraceError::OutOfMemory,
            errno::EBUSY => TraceError::Busy,
            errno::EINVAL => TraceError::InvalidArgument,
            errno::ENODEV => TraceError::NoDevice,
            errno::EOPNOTSUPP => TraceError::NotSupported,
            errno::ENOIOCTLCMD => TraceError::NoIoctlCommand,
            _ => TraceError::Host { errno: code },
        }
    }
}

pub type Result<T> = core::result::Result<T, TraceError>;

// Both front ends are shared across CPUs and callback tables
static_assertions::assert_impl_all!(LineSink<transport::null::NullRegisters>: Send, Sync);
static_assertions::assert_impl_all!(ConsoleAdapter<transport::null::NullRegisters>: Send, Sync);
static_assertions::assert_impl_all!(DeviceAdapter<transport::null::NullRegisters>: Send, Sync);
static_assertions::const_assert!(TraceConfig::WRITE_ROOM > 0);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(TraceError::InvalidArgument.errno(), -22);
        assert_eq!(TraceError::NotSupported.errno(), -95);
        assert_eq!(TraceError::NoIoctlCommand.errno(), -515);
        assert_eq!(TraceError::NotRegistered { what: "console" }.errno(), -19);
    }

    #[test]
    fn test_host_errno_passthrough() {
        assert_eq!(TraceError::from_errno(-12), TraceError::OutOfMemory);
        assert_eq!(TraceError::from_errno(-5), TraceError::Host { errno: -5 });
        assert_eq!(TraceError::from_errno(-5).errno(), -5);
    }
}
