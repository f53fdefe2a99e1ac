//! Host collaborator interfaces
//!
//! The console registry and the tty registry belong to the host kernel. This
//! module defines what the trace console needs from them, the descriptors it
//! registers, and the callbacks it exposes in return. Registries hold the
//! callbacks as `Arc<dyn ...>` and must drop them on unregister.

use alloc::sync::Arc;

use bitflags::bitflags;

use crate::Result;

/// Console index meaning "unnumbered" (matches any `console=<name>N`)
pub const CONSOLE_INDEX_UNNUMBERED: i32 = -1;

/// `TIOCCONS`: redirect `/dev/console` output to this tty
pub const TIOCCONS: u32 = 0x541D;

bitflags! {
    /// Console capability flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ConsoleFlags: u16 {
        /// Replay output logged before this console registered
        const PRINTBUFFER = 1 << 0;
        /// Preferred console (backs `/dev/console`)
        const CONSDEV     = 1 << 1;
        /// Set by the registry once the console is live
        const ENABLED     = 1 << 2;
    }
}

/// Console as registered with the host console registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsoleDescriptor {
    pub name: &'static str,
    pub flags: ConsoleFlags,
    pub index: i32,
}

/// Callbacks the console registry invokes on a registered console
pub trait ConsoleOps: Send + Sync {
    /// Emit a log buffer verbatim
    ///
    /// May run with interrupts masked and concurrently from several CPUs.
    /// Must not sleep or allocate.
    fn write(&self, buf: &[u8]) -> Result<()>;

    /// Called once by the registry before the first `write`
    fn setup(&self, options: Option<&str>) -> Result<()>;

    /// Tty driver backing this console, and the unit index to use
    fn device(&self, index: i32) -> Option<(DriverHandle, i32)>;
}

/// Host console registry
pub trait ConsoleRegistry: Send + Sync {
    /// Register a console; the registry calls `ops.setup` before returning
    fn register_console(&self, desc: ConsoleDescriptor, ops: Arc<dyn ConsoleOps>) -> Result<()>;

    /// Remove a console by name and drop the registry's callback handle
    fn unregister_console(&self, name: &str) -> Result<()>;
}

/// Opaque handle to a driver allocated by the tty registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DriverHandle(pub u32);

/// Identity of one open file on a tty, issued by the tty registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

/// Open tty session as handed to driver callbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtySession {
    pub id: SessionId,
    /// Unit index relative to the driver's first minor
    pub index: u32,
}

/// Tty driver class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    /// System device, console subtype
    SystemConsole,
}

bitflags! {
    /// Tty driver flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TtyDriverFlags: u32 {
        /// Driver does no parity/break processing of its own
        const REAL_RAW = 1 << 0;
    }
}

bitflags! {
    /// Terminal output modes (`c_oflag`)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OutputFlags: u32 {
        /// Enable output processing
        const OPOST  = 0o000001;
        /// Map NL to CR-NL
        const ONLCR  = 0o000004;
        /// Map CR to NL
        const OCRNL  = 0o000010;
        /// No CR output at column 0
        const ONOCR  = 0o000020;
        /// NL performs CR function
        const ONLRET = 0o000040;
    }
}

/// Default terminal settings of a tty driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Termios {
    pub iflag: u32,
    pub oflag: OutputFlags,
    pub cflag: u32,
    pub lflag: u32,
}

impl Termios {
    // ICRNL | IXON
    const STD_IFLAG: u32 = 0o000400 | 0o002000;
    // B38400 | CS8 | CREAD | HUPCL
    const STD_CFLAG: u32 = 0o000017 | 0o000060 | 0o000200 | 0o002000;
    // ISIG | ICANON | ECHO | ECHOE | ECHOK | ECHOCTL | ECHOKE | IEXTEN
    const STD_LFLAG: u32 =
        0o000001 | 0o000002 | 0o000010 | 0o000020 | 0o000040 | 0o001000 | 0o004000 | 0o100000;

    /// Host standard settings (cooked mode, NL to CR-NL on output)
    pub const STANDARD: Termios = Termios {
        iflag: Self::STD_IFLAG,
        oflag: OutputFlags::OPOST.union(OutputFlags::ONLCR),
        cflag: Self::STD_CFLAG,
        lflag: Self::STD_LFLAG,
    };

    /// Trace tty settings: CR mapped to NL, NL never expanded to CR-NL
    pub const TRACE_DEFAULT: Termios = Termios {
        oflag: OutputFlags::OPOST
            .union(OutputFlags::OCRNL)
            .union(OutputFlags::ONOCR)
            .union(OutputFlags::ONLRET),
        ..Self::STANDARD
    };
}

/// Tty driver as registered with the host tty registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtyDriverDescriptor {
    pub driver_name: &'static str,
    pub name: &'static str,
    pub major: u32,
    pub minor_start: u32,
    /// Number of units; always 1 here
    pub lines: u32,
    pub kind: DriverKind,
    pub flags: TtyDriverFlags,
    pub init_termios: Termios,
}

/// Callbacks the tty registry invokes on a registered driver
pub trait TtyOps: Send + Sync {
    fn open(&self, session: &TtySession) -> Result<()>;

    fn close(&self, session: &TtySession) -> Result<()>;

    /// Returns the number of bytes accepted
    fn write(&self, session: &TtySession, buf: &[u8]) -> Result<usize>;

    fn write_room(&self, session: &TtySession) -> Result<usize>;

    fn ioctl(&self, session: &TtySession, cmd: u32, arg: usize) -> Result<i32>;
}

/// Host tty registry
pub trait TtyRegistry: Send + Sync {
    /// Allocate a driver with room for `lines` units
    fn alloc_driver(&self, lines: u32) -> Result<DriverHandle>;

    /// Release a driver from [`alloc_driver`](Self::alloc_driver)
    fn free_driver(&self, handle: DriverHandle);

    /// Publish an allocated driver with its callbacks
    fn register_driver(
        &self,
        handle: DriverHandle,
        desc: TtyDriverDescriptor,
        ops: Arc<dyn TtyOps>,
    ) -> Result<()>;

    /// Withdraw a registered driver and drop the registry's callback handle
    fn unregister_driver(&self, handle: DriverHandle) -> Result<()>;

    /// Host port-open primitive, run for every open of a session
    fn port_open(&self, handle: DriverHandle, session: &TtySession) -> Result<()>;

    /// Host port-close primitive, releases session resources
    fn port_close(&self, handle: DriverHandle, session: &TtySession);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_termios_translates_cr_only() {
        let oflag = Termios::TRACE_DEFAULT.oflag;
        assert!(oflag.contains(OutputFlags::OPOST | OutputFlags::OCRNL));
        assert!(!oflag.contains(OutputFlags::ONLCR));
        assert_eq!(Termios::TRACE_DEFAULT.lflag, Termios::STANDARD.lflag);
    }
}
