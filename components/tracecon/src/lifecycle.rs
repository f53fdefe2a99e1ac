//! Bring-up and teardown of the trace console stack
//!
//! Init order: transport → sink → tty driver (allocate, port, register) →
//! console. Teardown runs the exact reverse. A failure part way through
//! undoes everything done so far before the error reaches the caller, so
//! nothing is ever left half registered.

use alloc::sync::Arc;

use bitflags::bitflags;
use log::{info, warn};

use crate::config::TraceConfig;
use crate::console::ConsoleAdapter;
use crate::device::DeviceAdapter;
use crate::host::{ConsoleRegistry, TtyRegistry};
use crate::sink::LineSink;
use crate::transport::{RegisterPair, Transport};
use crate::Result;

bitflags! {
    /// Init steps currently in effect
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Stage: u8 {
        const DRIVER_REGISTERED  = 1 << 0;
        const CONSOLE_REGISTERED = 1 << 1;
    }
}

/// Owner of the trace console stack
///
/// Holds the one transport, sink and port; the adapters and host
/// registries get shared handles. Dropping it runs [`exit`](Self::exit).
pub struct TraceConsole<R: RegisterPair + 'static> {
    sink: Arc<LineSink<R>>,
    device: Arc<DeviceAdapter<R>>,
    console: Arc<ConsoleAdapter<R>>,
}

impl<R: RegisterPair + 'static> TraceConsole<R> {
    /// Bring up the stack and register both front ends
    ///
    /// # Errors
    /// Any registry failure, after rolling back completed steps.
    pub fn init(
        regs: R,
        config: TraceConfig,
        consoles: Arc<dyn ConsoleRegistry>,
        ttys: Arc<dyn TtyRegistry>,
    ) -> Result<Self> {
        let sink = Arc::new(LineSink::new(Transport::new(regs)));
        let device = Arc::new(DeviceAdapter::new(Arc::clone(&sink), ttys, config));

        device.bring_up()?;

        let console = Arc::new(ConsoleAdapter::new(
            Arc::clone(&sink),
            Arc::clone(&device),
            consoles,
            &config,
        ));
        if let Err(err) = console.register() {
            warn!("tracecon: console registration failed: {}, rolling back", err);
            if let Err(undo) = device.tear_down() {
                warn!("tracecon: tty driver rollback failed: {}", undo);
            }
            return Err(err);
        }

        info!("tracecon: trace console ready");
        Ok(Self {
            sink,
            device,
            console,
        })
    }

    /// Unregister the console, then the tty driver
    ///
    /// Idempotent; steps already undone are skipped. A step the host refuses
    /// stops teardown there, leaving everything after it registered, and
    /// `exit` may be called again.
    ///
    /// # Errors
    /// The first registry failure.
    pub fn exit(&self) -> Result<()> {
        if self.console.is_registered() {
            self.console.unregister()?;
        }
        self.device.tear_down()
    }

    /// Init steps currently in effect
    pub fn stage(&self) -> Stage {
        let mut stage = Stage::empty();
        if self.device.driver_handle().is_some() {
            stage |= Stage::DRIVER_REGISTERED;
        }
        if self.console.is_registered() {
            stage |= Stage::CONSOLE_REGISTERED;
        }
        stage
    }

    pub fn sink(&self) -> &Arc<LineSink<R>> {
        &self.sink
    }

    pub fn console(&self) -> &Arc<ConsoleAdapter<R>> {
        &self.console
    }

    pub fn device(&self) -> &Arc<DeviceAdapter<R>> {
        &self.device
    }
}

impl<R: RegisterPair + 'static> Drop for TraceConsole<R> {
    fn drop(&mut self) {
        if let Err(err) = self.exit() {
            warn!("tracecon: teardown incomplete: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{FailPoint, MockConsoleRegistry, MockTtyRegistry, SimRegisters};
    use crate::TraceError;

    fn registries() -> (Arc<MockConsoleRegistry>, Arc<MockTtyRegistry>) {
        (Arc::new(MockConsoleRegistry::new()), Arc::new(MockTtyRegistry::new()))
    }

    #[test]
    fn test_init_registers_both_front_ends() {
        let (consoles, ttys) = registries();
        let trace = TraceConsole::init(
            SimRegisters::new(),
            TraceConfig::DEFAULT,
            consoles.clone(),
            ttys.clone(),
        )
        .unwrap();

        assert_eq!(trace.stage(), Stage::all());
        assert!(consoles.is_registered("ttyTRC"));
        assert!(ttys.is_registered());
        assert_eq!(ttys.allocated_drivers(), 1);
    }

    #[test]
    fn test_exit_reverses_init() {
        let (consoles, ttys) = registries();
        let trace = TraceConsole::init(
            SimRegisters::new(),
            TraceConfig::DEFAULT,
            consoles.clone(),
            ttys.clone(),
        )
        .unwrap();

        trace.exit().unwrap();

        assert_eq!(trace.stage(), Stage::empty());
        assert!(!consoles.is_registered("ttyTRC"));
        assert!(!ttys.is_registered());
        assert_eq!(ttys.allocated_drivers(), 0);

        // Second exit (and the one from Drop) find nothing left to undo
        trace.exit().unwrap();
        assert_eq!(consoles.unregistrations(), 1);
    }

    #[test]
    fn test_refused_console_unregister_keeps_driver() {
        let (consoles, ttys) = registries();
        let trace = TraceConsole::init(
            SimRegisters::new(),
            TraceConfig::DEFAULT,
            consoles.clone(),
            ttys.clone(),
        )
        .unwrap();
        consoles.fail_unregister(TraceError::Busy);

        assert_eq!(trace.exit(), Err(TraceError::Busy));

        // The console still points at the tty, so the tty stays too
        assert_eq!(trace.stage(), Stage::all());
        assert!(consoles.is_registered("ttyTRC"));
        assert!(ttys.is_registered());
        consoles.print(b"after refusal\n").unwrap();
        assert!(consoles.console_device().is_some());

        trace.exit().unwrap();
        assert_eq!(trace.stage(), Stage::empty());
        assert!(!consoles.is_registered("ttyTRC"));
        assert!(!ttys.is_registered());
        assert_eq!(ttys.allocated_drivers(), 0);
    }

    #[test]
    fn test_refused_driver_unregister_is_retryable() {
        let (consoles, ttys) = registries();
        let trace = TraceConsole::init(
            SimRegisters::new(),
            TraceConfig::DEFAULT,
            consoles.clone(),
            ttys.clone(),
        )
        .unwrap();
        ttys.fail_at(FailPoint::UnregisterDriver, TraceError::Busy);

        assert_eq!(trace.exit(), Err(TraceError::Busy));
        assert_eq!(trace.stage(), Stage::DRIVER_REGISTERED);
        assert!(ttys.is_registered());
        assert_eq!(ttys.allocated_drivers(), 1);

        trace.exit().unwrap();
        assert!(!ttys.is_registered());
        assert_eq!(ttys.allocated_drivers(), 0);
    }

    #[test]
    fn test_console_failure_rolls_back_driver() {
        let (consoles, ttys) = registries();
        consoles.fail_register(TraceError::Host { errno: -5 });

        let result = TraceConsole::init(
            SimRegisters::new(),
            TraceConfig::DEFAULT,
            consoles.clone(),
            ttys.clone(),
        );

        assert_eq!(result.err(), Some(TraceError::Host { errno: -5 }));
        assert!(!ttys.is_registered());
        assert_eq!(ttys.allocated_drivers(), 0);
        assert!(!consoles.is_registered("ttyTRC"));
    }

    #[test]
    fn test_alloc_failure_registers_nothing() {
        let (consoles, ttys) = registries();
        ttys.fail_at(FailPoint::AllocDriver, TraceError::OutOfMemory);

        let result = TraceConsole::init(
            SimRegisters::new(),
            TraceConfig::DEFAULT,
            consoles.clone(),
            ttys.clone(),
        );

        assert_eq!(result.err(), Some(TraceError::OutOfMemory));
        assert_eq!(ttys.allocated_drivers(), 0);
        assert!(!consoles.is_registered("ttyTRC"));
    }

    #[test]
    fn test_drop_tears_down() {
        let (consoles, ttys) = registries();
        let trace = TraceConsole::init(
            SimRegisters::new(),
            TraceConfig::DEFAULT,
            consoles.clone(),
            ttys.clone(),
        )
        .unwrap();

        drop(trace);

        assert!(!consoles.is_registered("ttyTRC"));
        assert!(!ttys.is_registered());
    }
}
