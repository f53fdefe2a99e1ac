//! Simulated trace hardware and host registries
//!
//! Stand-ins for the pieces the trace console plugs into, so the whole
//! stack runs on a development host:
//! - [`SimRegisters`]: register pair with a busy bit and a capture buffer
//! - [`MockConsoleRegistry`]: one-console registry with early log buffering
//! - [`MockTtyRegistry`]: one-driver tty registry with fault injection
//!
//! Registry locks are never held while calling into driver callbacks; the
//! callbacks call back into the registry.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use spin::Mutex;

use crate::host::{
    ConsoleDescriptor, ConsoleFlags, ConsoleOps, ConsoleRegistry, DriverHandle, SessionId,
    TtyDriverDescriptor, TtyOps, TtyRegistry, TtySession,
};
use crate::transport::RegisterPair;
use crate::{Result, TraceError};

/// Status bit reported while the simulated data register is occupied
pub const SIM_BUSY: u32 = 1 << 0;

struct SimState {
    /// Status reads that report busy after each byte
    busy_polls: u32,
    /// Busy reads left before the current byte is drained
    remaining: AtomicU32,
    status_reads: AtomicUsize,
    overruns: AtomicUsize,
    captured: Mutex<Vec<u8>>,
}

/// Simulated trace register pair
///
/// Clones share the same registers, so a test can keep one handle and give
/// another to the transport.
#[derive(Clone)]
pub struct SimRegisters {
    state: Arc<SimState>,
}

impl SimRegisters {
    /// Registers that are ready again immediately after each byte
    pub fn new() -> Self {
        Self::with_busy_polls(0)
    }

    /// Registers that stay busy for `polls` status reads after each byte
    pub fn with_busy_polls(polls: u32) -> Self {
        Self {
            state: Arc::new(SimState {
                busy_polls: polls,
                remaining: AtomicU32::new(0),
                status_reads: AtomicUsize::new(0),
                overruns: AtomicUsize::new(0),
                captured: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Everything the trace host has received so far
    pub fn captured(&self) -> Vec<u8> {
        self.state.captured.lock().clone()
    }

    pub fn status_reads(&self) -> usize {
        self.state.status_reads.load(Ordering::Relaxed)
    }

    /// Bytes written while the register still reported busy
    pub fn overruns(&self) -> usize {
        self.state.overruns.load(Ordering::Relaxed)
    }
}

impl Default for SimRegisters {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterPair for SimRegisters {
    fn status(&self) -> u32 {
        self.state.status_reads.fetch_add(1, Ordering::Relaxed);
        let drained = self
            .state
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |left| left.checked_sub(1));
        if drained.is_ok() {
            SIM_BUSY
        } else {
            0
        }
    }

    fn busy_mask(&self) -> u32 {
        SIM_BUSY
    }

    fn write_data(&self, byte: u8) {
        if self.state.remaining.load(Ordering::Acquire) != 0 {
            self.state.overruns.fetch_add(1, Ordering::Relaxed);
        }
        self.state.captured.lock().push(byte);
        self.state
            .remaining
            .store(self.state.busy_polls, Ordering::Release);
    }
}

struct ConsoleRegistryState {
    console: Option<(ConsoleDescriptor, Arc<dyn ConsoleOps>)>,
    /// Output logged while no console was registered
    log_buffer: Vec<u8>,
    fail_register: Option<TraceError>,
    fail_unregister: Option<TraceError>,
    unregistrations: usize,
}

/// Host console registry holding at most one console
pub struct MockConsoleRegistry {
    state: Mutex<ConsoleRegistryState>,
}

impl MockConsoleRegistry {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ConsoleRegistryState {
                console: None,
                log_buffer: Vec::new(),
                fail_register: None,
                fail_unregister: None,
                unregistrations: 0,
            }),
        }
    }

    /// Make the next `register_console` fail with `err`
    pub fn fail_register(&self, err: TraceError) {
        self.state.lock().fail_register = Some(err);
    }

    /// Make the next `unregister_console` fail with `err`, keeping the console
    pub fn fail_unregister(&self, err: TraceError) {
        self.state.lock().fail_unregister = Some(err);
    }

    /// Log a line the way the kernel's printk would
    ///
    /// # Errors
    /// `NotRegistered` when no console is registered; the line is kept in the
    /// log buffer for replay.
    pub fn print(&self, buf: &[u8]) -> Result<()> {
        let ops = {
            let mut state = self.state.lock();
            let ops = state.console.as_ref().map(|(_, ops)| Arc::clone(ops));
            match ops {
                Some(ops) => ops,
                None => {
                    state.log_buffer.extend_from_slice(buf);
                    return Err(TraceError::NotRegistered { what: "console" });
                }
            }
        };
        ops.write(buf)
    }

    pub fn is_registered(&self, name: &str) -> bool {
        matches!(&self.state.lock().console, Some((desc, _)) if desc.name == name)
    }

    /// Descriptor of the registered console, as enabled by the registry
    pub fn descriptor(&self) -> Option<ConsoleDescriptor> {
        self.state.lock().console.as_ref().map(|(desc, _)| *desc)
    }

    /// Resolve the tty behind the registered console (`/dev/console` lookup)
    pub fn console_device(&self) -> Option<(DriverHandle, i32)> {
        let (desc, ops) = {
            let state = self.state.lock();
            let (desc, ops) = state.console.as_ref()?;
            (*desc, Arc::clone(ops))
        };
        ops.device(desc.index)
    }

    pub fn unregistrations(&self) -> usize {
        self.state.lock().unregistrations
    }
}

impl Default for MockConsoleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleRegistry for MockConsoleRegistry {
    fn register_console(&self, desc: ConsoleDescriptor, ops: Arc<dyn ConsoleOps>) -> Result<()> {
        {
            let mut state = self.state.lock();
            if let Some(err) = state.fail_register.take() {
                return Err(err);
            }
            if state.console.is_some() {
                return Err(TraceError::Busy);
            }
        }

        ops.setup(None)?;

        let backlog = {
            let mut state = self.state.lock();
            let enabled = ConsoleDescriptor {
                flags: desc.flags | ConsoleFlags::ENABLED,
                ..desc
            };
            state.console = Some((enabled, Arc::clone(&ops)));
            core::mem::take(&mut state.log_buffer)
        };
        if desc.flags.contains(ConsoleFlags::PRINTBUFFER) && !backlog.is_empty() {
            ops.write(&backlog)?;
        }
        Ok(())
    }

    fn unregister_console(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(err) = state.fail_unregister.take() {
            return Err(err);
        }
        if state.console.as_ref().map(|(desc, _)| desc.name) != Some(name) {
            return Err(TraceError::NotRegistered { what: "console" });
        }
        state.console = None;
        state.unregistrations += 1;
        Ok(())
    }
}

/// Registry step that can be made to fail once
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    AllocDriver,
    RegisterDriver,
    UnregisterDriver,
    PortOpen,
}

struct RegisteredDriver {
    handle: DriverHandle,
    desc: TtyDriverDescriptor,
    ops: Arc<dyn TtyOps>,
}

struct TtyRegistryState {
    next_handle: u32,
    next_session: u64,
    allocated: Vec<DriverHandle>,
    driver: Option<RegisteredDriver>,
    fault: Option<(FailPoint, TraceError)>,
    port_opens: usize,
    port_closes: usize,
}

impl TtyRegistryState {
    fn take_fault(&mut self, point: FailPoint) -> Result<()> {
        match self.fault {
            Some((at, err)) if at == point => {
                self.fault = None;
                Err(err)
            }
            _ => Ok(()),
        }
    }
}

/// Host tty registry holding at most one driver
///
/// Also plays the part of user space: [`open`](Self::open),
/// [`write`](Self::write) and friends go through the registered callbacks
/// like system calls on the device node would.
pub struct MockTtyRegistry {
    state: Mutex<TtyRegistryState>,
}

impl MockTtyRegistry {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TtyRegistryState {
                next_handle: 1,
                next_session: 1,
                allocated: Vec::new(),
                driver: None,
                fault: None,
                port_opens: 0,
                port_closes: 0,
            }),
        }
    }

    /// Make the next call at `point` fail with `err`
    pub fn fail_at(&self, point: FailPoint, err: TraceError) {
        self.state.lock().fault = Some((point, err));
    }

    /// Drivers allocated and not yet freed
    pub fn allocated_drivers(&self) -> usize {
        self.state.lock().allocated.len()
    }

    pub fn is_registered(&self) -> bool {
        self.state.lock().driver.is_some()
    }

    pub fn registered_handle(&self) -> Option<DriverHandle> {
        self.state.lock().driver.as_ref().map(|d| d.handle)
    }

    pub fn descriptor(&self) -> Option<TtyDriverDescriptor> {
        self.state.lock().driver.as_ref().map(|d| d.desc)
    }

    pub fn port_opens(&self) -> usize {
        self.state.lock().port_opens
    }

    pub fn port_closes(&self) -> usize {
        self.state.lock().port_closes
    }

    fn ops(&self) -> Result<Arc<dyn TtyOps>> {
        self.state
            .lock()
            .driver
            .as_ref()
            .map(|d| Arc::clone(&d.ops))
            .ok_or(TraceError::NoDevice)
    }

    /// Open unit `index` of the registered driver as a new session
    pub fn open(&self, index: u32) -> Result<TtySession> {
        let ops = self.ops()?;
        let session = {
            let mut state = self.state.lock();
            let id = SessionId(state.next_session);
            state.next_session += 1;
            TtySession { id, index }
        };
        ops.open(&session)?;
        Ok(session)
    }

    /// Open an already-open session again (second `open` of the same tty)
    pub fn reopen(&self, session: &TtySession) -> Result<()> {
        self.ops()?.open(session)
    }

    pub fn close(&self, session: &TtySession) -> Result<()> {
        self.ops()?.close(session)
    }

    pub fn write(&self, session: &TtySession, buf: &[u8]) -> Result<usize> {
        self.ops()?.write(session, buf)
    }

    pub fn write_room(&self, session: &TtySession) -> Result<usize> {
        self.ops()?.write_room(session)
    }

    pub fn ioctl(&self, session: &TtySession, cmd: u32, arg: usize) -> Result<i32> {
        self.ops()?.ioctl(session, cmd, arg)
    }
}

impl Default for MockTtyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TtyRegistry for MockTtyRegistry {
    fn alloc_driver(&self, _lines: u32) -> Result<DriverHandle> {
        let mut state = self.state.lock();
        state.take_fault(FailPoint::AllocDriver)?;
        let handle = DriverHandle(state.next_handle);
        state.next_handle += 1;
        state.allocated.push(handle);
        Ok(handle)
    }

    fn free_driver(&self, handle: DriverHandle) {
        self.state.lock().allocated.retain(|&h| h != handle);
    }

    fn register_driver(
        &self,
        handle: DriverHandle,
        desc: TtyDriverDescriptor,
        ops: Arc<dyn TtyOps>,
    ) -> Result<()> {
        let mut state = self.state.lock();
        state.take_fault(FailPoint::RegisterDriver)?;
        if !state.allocated.contains(&handle) {
            return Err(TraceError::InvalidArgument);
        }
        if state.driver.is_some() {
            return Err(TraceError::Busy);
        }
        state.driver = Some(RegisteredDriver { handle, desc, ops });
        Ok(())
    }

    fn unregister_driver(&self, handle: DriverHandle) -> Result<()> {
        // Drop the callback handle after releasing the lock
        let removed = {
            let mut state = self.state.lock();
            state.take_fault(FailPoint::UnregisterDriver)?;
            if state.driver.as_ref().map(|d| d.handle) == Some(handle) {
                state.driver.take()
            } else {
                None
            }
        };
        match removed {
            Some(_) => Ok(()),
            None => Err(TraceError::NotRegistered { what: "tty driver" }),
        }
    }

    fn port_open(&self, _handle: DriverHandle, _session: &TtySession) -> Result<()> {
        let mut state = self.state.lock();
        state.take_fault(FailPoint::PortOpen)?;
        state.port_opens += 1;
        Ok(())
    }

    fn port_close(&self, _handle: DriverHandle, _session: &TtySession) {
        self.state.lock().port_closes += 1;
    }
}
