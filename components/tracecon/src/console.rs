//! Trace console (console path)
//!
//! Registered with the host console registry as the preferred console. Every
//! line the registry hands over goes straight to the sink; the only policy
//! here is refusing output once unregistered.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};

use log::{info, trace};

use crate::config::TraceConfig;
use crate::device::DeviceAdapter;
use crate::host::{
    ConsoleDescriptor, ConsoleFlags, ConsoleOps, ConsoleRegistry, DriverHandle,
    CONSOLE_INDEX_UNNUMBERED,
};
use crate::sink::LineSink;
use crate::transport::RegisterPair;
use crate::{Result, TraceError};

/// Binds the line sink to the host console registry
pub struct ConsoleAdapter<R: RegisterPair + 'static> {
    sink: Arc<LineSink<R>>,
    device: Arc<DeviceAdapter<R>>,
    registry: Arc<dyn ConsoleRegistry>,
    descriptor: ConsoleDescriptor,
    registered: AtomicBool,
}

impl<R: RegisterPair + 'static> ConsoleAdapter<R> {
    pub fn new(
        sink: Arc<LineSink<R>>,
        device: Arc<DeviceAdapter<R>>,
        registry: Arc<dyn ConsoleRegistry>,
        config: &TraceConfig,
    ) -> Self {
        Self {
            sink,
            device,
            registry,
            descriptor: ConsoleDescriptor {
                name: config.console_name,
                flags: ConsoleFlags::PRINTBUFFER | ConsoleFlags::CONSDEV,
                index: CONSOLE_INDEX_UNNUMBERED,
            },
            registered: AtomicBool::new(false),
        }
    }

    pub fn descriptor(&self) -> ConsoleDescriptor {
        self.descriptor
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }

    /// Register with the console registry
    ///
    /// The adapter accepts writes from the moment registration starts, since
    /// the registry may replay buffered output before it returns.
    ///
    /// # Errors
    /// `Busy` if already registered, or whatever the registry (including
    /// `setup`) reports; the adapter is left unregistered in that case.
    pub fn register(self: &Arc<Self>) -> Result<()> {
        if self.registered.swap(true, Ordering::AcqRel) {
            return Err(TraceError::Busy);
        }

        let ops: Arc<dyn ConsoleOps> = self.clone();
        if let Err(err) = self.registry.register_console(self.descriptor, ops) {
            self.registered.store(false, Ordering::Release);
            return Err(err);
        }

        info!("tracecon: console [{}] enabled", self.descriptor.name);
        Ok(())
    }

    /// Unregister from the console registry
    ///
    /// The adapter keeps accepting writes until the registry has let go of
    /// it. If the registry refuses, the console stays registered and the
    /// call may be retried.
    ///
    /// # Errors
    /// `NotRegistered` if the console is not registered (double unregister),
    /// or whatever the registry reports.
    pub fn unregister(&self) -> Result<()> {
        if !self.is_registered() {
            return Err(TraceError::NotRegistered { what: "console" });
        }

        self.registry.unregister_console(self.descriptor.name)?;
        self.registered.store(false, Ordering::Release);
        info!("tracecon: console [{}] disabled", self.descriptor.name);
        Ok(())
    }
}

impl<R: RegisterPair + 'static> ConsoleOps for ConsoleAdapter<R> {
    fn write(&self, buf: &[u8]) -> Result<()> {
        if !self.is_registered() {
            return Err(TraceError::NotRegistered { what: "console" });
        }
        self.sink.write(buf);
        Ok(())
    }

    fn setup(&self, options: Option<&str>) -> Result<()> {
        // No options are defined yet; the sink only needs the tty layer up
        trace!("tracecon: console setup (options {:?})", options);
        self.device.bring_up().map(|_| ())
    }

    fn device(&self, index: i32) -> Option<(DriverHandle, i32)> {
        self.device.driver_handle().map(|handle| (handle, index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockConsoleRegistry, MockTtyRegistry, SimRegisters};
    use crate::transport::Transport;

    struct Fixture {
        console: Arc<ConsoleAdapter<SimRegisters>>,
        device: Arc<DeviceAdapter<SimRegisters>>,
        consoles: Arc<MockConsoleRegistry>,
        ttys: Arc<MockTtyRegistry>,
        regs: SimRegisters,
    }

    fn fixture() -> Fixture {
        let regs = SimRegisters::new();
        let sink = Arc::new(LineSink::new(Transport::new(regs.clone())));
        let consoles = Arc::new(MockConsoleRegistry::new());
        let ttys = Arc::new(MockTtyRegistry::new());
        let device = Arc::new(DeviceAdapter::new(
            sink.clone(),
            ttys.clone(),
            TraceConfig::DEFAULT,
        ));
        let console = Arc::new(ConsoleAdapter::new(
            sink,
            device.clone(),
            consoles.clone(),
            &TraceConfig::DEFAULT,
        ));
        Fixture { console, device, consoles, ttys, regs }
    }

    #[test]
    fn test_descriptor_is_preferred_and_unnumbered() {
        let f = fixture();
        let desc = f.console.descriptor();

        assert_eq!(desc.name, "ttyTRC");
        assert!(desc.flags.contains(ConsoleFlags::PRINTBUFFER | ConsoleFlags::CONSDEV));
        assert_eq!(desc.index, CONSOLE_INDEX_UNNUMBERED);
    }

    #[test]
    fn test_setup_brings_up_device_lazily() {
        let f = fixture();
        assert!(!f.ttys.is_registered());

        f.console.register().unwrap();

        // Registry ran setup, which registered the tty on demand
        assert!(f.ttys.is_registered());
        assert_eq!(
            f.consoles.console_device(),
            Some((f.device.driver_handle().unwrap(), CONSOLE_INDEX_UNNUMBERED))
        );
    }

    #[test]
    fn test_write_forwards_verbatim() {
        let f = fixture();
        f.console.register().unwrap();

        f.consoles.print(b"[    0.000000] Booting\r\n").unwrap();

        assert_eq!(f.regs.captured(), b"[    0.000000] Booting\r\n");
    }

    #[test]
    fn test_double_register_rejected() {
        let f = fixture();
        f.console.register().unwrap();
        assert_eq!(f.console.register(), Err(TraceError::Busy));
        assert!(f.console.is_registered());
    }

    #[test]
    fn test_write_after_unregister_rejected() {
        let f = fixture();
        f.console.register().unwrap();
        f.console.unregister().unwrap();

        assert_eq!(
            f.console.write(b"late"),
            Err(TraceError::NotRegistered { what: "console" })
        );
        assert_eq!(
            f.console.unregister(),
            Err(TraceError::NotRegistered { what: "console" })
        );
        assert!(f.regs.captured().is_empty());
    }

    #[test]
    fn test_refused_unregister_keeps_console_live() {
        let f = fixture();
        f.console.register().unwrap();
        f.consoles.fail_unregister(TraceError::Busy);

        assert_eq!(f.console.unregister(), Err(TraceError::Busy));
        assert!(f.console.is_registered());
        assert!(f.consoles.is_registered("ttyTRC"));
        f.consoles.print(b"still live").unwrap();
        assert_eq!(f.regs.captured(), b"still live");

        // A retry goes through once the registry lets go
        f.console.unregister().unwrap();
        assert!(!f.console.is_registered());
        assert!(!f.consoles.is_registered("ttyTRC"));
    }

    #[test]
    fn test_device_lookup_without_driver() {
        let f = fixture();
        assert_eq!(f.console.device(0), None);
    }
}
