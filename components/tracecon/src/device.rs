//! Trace tty (device path)
//!
//! Exposes the sink to user space as a single write-only terminal unit.
//! Sessions are counted in a [`DevicePort`]; idling the port does not touch
//! the transport, only driver teardown does.

use alloc::sync::Arc;
use alloc::vec::Vec;

use log::{debug, info, trace, warn};
use spin::Mutex;

use crate::config::TraceConfig;
use crate::host::{
    DriverHandle, DriverKind, SessionId, TtyDriverDescriptor, TtyDriverFlags, TtyOps,
    TtyRegistry, TtySession, TIOCCONS,
};
use crate::sink::LineSink;
use crate::transport::RegisterPair;
use crate::{Result, TraceError};

/// Open-session bookkeeping behind the trace tty
pub struct DevicePort {
    state: Mutex<PortState>,
}

struct PortState {
    /// Total opens not yet matched by a close
    count: usize,
    /// Per-session open counts (a session may be opened more than once)
    sessions: Vec<(SessionId, usize)>,
}

impl DevicePort {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(PortState {
                count: 0,
                sessions: Vec::new(),
            }),
        }
    }

    /// Number of opens not yet closed
    pub fn count(&self) -> usize {
        self.state.lock().count
    }

    /// Check whether `id` currently holds the port open
    pub fn is_open(&self, id: SessionId) -> bool {
        self.state.lock().sessions.iter().any(|&(s, _)| s == id)
    }

    /// Record an open, returning the new count
    fn open(&self, id: SessionId) -> usize {
        let mut state = self.state.lock();
        match state.sessions.iter_mut().find(|(s, _)| *s == id) {
            Some((_, opens)) => *opens += 1,
            None => state.sessions.push((id, 1)),
        }
        state.count += 1;
        state.count
    }

    /// Record a close, returning the new count
    ///
    /// # Errors
    /// `InvalidArgument` if `id` has no open outstanding; the count is left
    /// untouched.
    fn close(&self, id: SessionId) -> Result<usize> {
        let mut state = self.state.lock();
        let pos = state
            .sessions
            .iter()
            .position(|&(s, _)| s == id)
            .ok_or(TraceError::InvalidArgument)?;

        state.sessions[pos].1 -= 1;
        if state.sessions[pos].1 == 0 {
            state.sessions.swap_remove(pos);
        }
        state.count -= 1;
        Ok(state.count)
    }

    /// Forget all sessions
    fn reset(&self) -> usize {
        let mut state = self.state.lock();
        let stale = state.count;
        state.count = 0;
        state.sessions.clear();
        stale
    }
}

impl Default for DevicePort {
    fn default() -> Self {
        Self::new()
    }
}

/// Registration state of the tty driver
///
/// The two transitional states cover the host calls, which run with the
/// state lock released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DriverState {
    Idle,
    Registering,
    Registered(DriverHandle),
    Unregistering(DriverHandle),
}

/// Binds the line sink to the host tty registry
pub struct DeviceAdapter<R: RegisterPair + 'static> {
    sink: Arc<LineSink<R>>,
    port: DevicePort,
    registry: Arc<dyn TtyRegistry>,
    config: TraceConfig,
    driver: Mutex<DriverState>,
}

impl<R: RegisterPair + 'static> DeviceAdapter<R> {
    pub fn new(sink: Arc<LineSink<R>>, registry: Arc<dyn TtyRegistry>, config: TraceConfig) -> Self {
        Self {
            sink,
            port: DevicePort::new(),
            registry,
            config,
            driver: Mutex::new(DriverState::Idle),
        }
    }

    /// Driver descriptor published to the tty registry
    pub fn descriptor(&self) -> TtyDriverDescriptor {
        TtyDriverDescriptor {
            driver_name: self.config.driver_name,
            name: self.config.device_name,
            major: self.config.major,
            minor_start: self.config.minor_start,
            lines: 1,
            kind: DriverKind::SystemConsole,
            flags: TtyDriverFlags::REAL_RAW,
            init_termios: self.config.termios,
        }
    }

    /// Allocate and register the tty driver unless already registered
    ///
    /// Idempotent: the console path calls this from `setup`, which may run
    /// before or after the lifecycle manager has done it. On failure every
    /// step taken so far is undone before the error is returned.
    ///
    /// Callbacks the registry makes before `register_driver` returns see an
    /// unregistered driver.
    ///
    /// # Errors
    /// `Busy` while another bring-up or teardown is in flight, or whatever
    /// the registry reports.
    pub fn bring_up(self: &Arc<Self>) -> Result<DriverHandle> {
        {
            let mut driver = self.driver.lock();
            match *driver {
                DriverState::Registered(handle) => return Ok(handle),
                DriverState::Registering | DriverState::Unregistering(_) => {
                    return Err(TraceError::Busy)
                }
                DriverState::Idle => *driver = DriverState::Registering,
            }
        }

        match self.register() {
            Ok(handle) => {
                *self.driver.lock() = DriverState::Registered(handle);
                info!(
                    "tracecon: registered {}0 (major {}, minor {})",
                    self.config.device_name, self.config.major, self.config.minor_start
                );
                Ok(handle)
            }
            Err(err) => {
                *self.driver.lock() = DriverState::Idle;
                Err(err)
            }
        }
    }

    fn register(self: &Arc<Self>) -> Result<DriverHandle> {
        let handle = self.registry.alloc_driver(1)?;
        trace!("tracecon: allocated tty driver {:?}", handle);

        self.port.reset();

        let ops: Arc<dyn TtyOps> = self.clone();
        if let Err(err) = self.registry.register_driver(handle, self.descriptor(), ops) {
            warn!("tracecon: tty driver registration failed: {}", err);
            self.registry.free_driver(handle);
            self.port.reset();
            return Err(err);
        }
        Ok(handle)
    }

    /// Unregister and release the tty driver
    ///
    /// Safe to call in any state; steps already undone are skipped. If the
    /// registry refuses to unregister, the driver is neither freed nor
    /// forgotten and the call may be retried.
    ///
    /// # Errors
    /// `Busy` while a bring-up or another teardown is in flight, or whatever
    /// `unregister_driver` reports.
    pub fn tear_down(&self) -> Result<()> {
        let handle = {
            let mut driver = self.driver.lock();
            match *driver {
                DriverState::Idle => return Ok(()),
                DriverState::Registering | DriverState::Unregistering(_) => {
                    return Err(TraceError::Busy)
                }
                DriverState::Registered(handle) => {
                    *driver = DriverState::Unregistering(handle);
                    handle
                }
            }
        };

        if let Err(err) = self.registry.unregister_driver(handle) {
            warn!("tracecon: tty driver unregister failed: {}", err);
            *self.driver.lock() = DriverState::Registered(handle);
            return Err(err);
        }
        self.registry.free_driver(handle);

        let stale = self.port.reset();
        if stale > 0 {
            warn!("tracecon: tty driver removed with {} open session(s)", stale);
        }
        *self.driver.lock() = DriverState::Idle;
        debug!("tracecon: released tty driver {:?}", handle);
        Ok(())
    }

    /// Handle of the registered driver, if any
    ///
    /// Still reported while an unregister is in flight, since the registry
    /// may keep calling in until it returns.
    pub fn driver_handle(&self) -> Option<DriverHandle> {
        match *self.driver.lock() {
            DriverState::Registered(handle) | DriverState::Unregistering(handle) => Some(handle),
            DriverState::Idle | DriverState::Registering => None,
        }
    }

    /// Current number of open sessions
    pub fn open_count(&self) -> usize {
        self.port.count()
    }

    fn registered_handle(&self) -> Result<DriverHandle> {
        self.driver_handle()
            .ok_or(TraceError::NotRegistered { what: "tty driver" })
    }

    /// Handle of a driver that accepts new sessions
    fn accepting_handle(&self) -> Result<DriverHandle> {
        match *self.driver.lock() {
            DriverState::Registered(handle) => Ok(handle),
            _ => Err(TraceError::NotRegistered { what: "tty driver" }),
        }
    }

    fn check_session(&self, session: &TtySession) -> Result<()> {
        self.registered_handle()?;
        if self.port.is_open(session.id) {
            Ok(())
        } else {
            Err(TraceError::InvalidArgument)
        }
    }
}

impl<R: RegisterPair + 'static> TtyOps for DeviceAdapter<R> {
    fn open(&self, session: &TtySession) -> Result<()> {
        let handle = self.accepting_handle()?;
        if session.index != 0 {
            return Err(TraceError::NoDevice);
        }

        self.registry.port_open(handle, session)?;
        let count = self.port.open(session.id);

        // Teardown started meanwhile; its port reset may already have run
        if self.accepting_handle() != Ok(handle) {
            let _ = self.port.close(session.id);
            return Err(TraceError::NotRegistered { what: "tty driver" });
        }
        debug!("tracecon: open {:?} (count {})", session.id, count);
        Ok(())
    }

    fn close(&self, session: &TtySession) -> Result<()> {
        let count = self.port.close(session.id)?;
        if let Some(handle) = self.driver_handle() {
            self.registry.port_close(handle, session);
        }
        debug!("tracecon: close {:?} (count {})", session.id, count);
        Ok(())
    }

    fn write(&self, session: &TtySession, buf: &[u8]) -> Result<usize> {
        self.check_session(session)?;
        self.sink.write(buf);
        Ok(buf.len())
    }

    fn write_room(&self, session: &TtySession) -> Result<usize> {
        self.check_session(session)?;
        Ok(self.config.write_room)
    }

    fn ioctl(&self, session: &TtySession, cmd: u32, _arg: usize) -> Result<i32> {
        self.check_session(session)?;
        match cmd {
            // The trace tty is permanently the console sink; never redirect it
            TIOCCONS => Err(TraceError::NotSupported),
            _ => Err(TraceError::NoIoctlCommand),
        }
    }
}
