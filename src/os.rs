//! Userland Surface
//!
//! [`Os`] is the handle a user program calls into. Every method posts a
//! typed request to the kernel channel, parks the calling thread on its
//! run gate, and unpacks the typed response once the kernel releases it.
//!
//! Memory access is the one exception to "every call is a syscall": reads
//! and writes go straight at the simulated hardware and only trap into the
//! kernel on a TLB miss. A mapping fault (segfault, out of memory) never
//! returns here; the kernel terminates the process and the thread unwinds.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::hw::Hardware;
use crate::ipc::Message;
use crate::syscall::{KernelChannel, SyscallRequest, SyscallResponse};
use crate::sys::exec::{ExecutionUnit, Resume};
use crate::sys::process::{Pid, Priority, TickState};
use crate::KernelResult;

/// A user program, run on its own thread by the kernel.
///
/// `main` returning is an implicit exit.
pub trait UserProgram: Send {
    /// Program name, used by `pid_by_name` lookups
    fn name(&self) -> &str {
        "user"
    }

    /// Program body
    fn main(&mut self, os: &Os);
}

/// Unwind payload for terminated processes, caught at the thread boundary
pub(crate) struct ProcessKilled;

/// Per-process syscall handle
pub struct Os {
    pid: Pid,
    channel: Arc<KernelChannel>,
    unit: Arc<ExecutionUnit>,
    tick: Arc<TickState>,
    hw: Arc<Mutex<Hardware>>,
}

impl Os {
    pub(crate) fn new(
        pid: Pid,
        channel: Arc<KernelChannel>,
        unit: Arc<ExecutionUnit>,
        tick: Arc<TickState>,
        hw: Arc<Mutex<Hardware>>,
    ) -> Self {
        Self {
            pid,
            channel,
            unit,
            tick,
            hw,
        }
    }

    fn call(&self, request: SyscallRequest) -> SyscallResponse {
        log::trace!("pid {} syscall {}", self.pid, request.name());
        self.channel.post(self.pid, request);

        match self.unit.block_until_started() {
            Resume::Run => {}
            Resume::Kill => std::panic::panic_any(ProcessKilled),
        }

        match self.unit.take_response() {
            Some(response) => response,
            None => unreachable!("pid {} released without a response", self.pid),
        }
    }

    /// Spawn a new process; returns the child's pid
    pub fn create_process(&self, program: Box<dyn UserProgram>, priority: Priority) -> Pid {
        match self.call(SyscallRequest::CreateProcess { program, priority }) {
            SyscallResponse::Pid(pid) => pid,
            other => unreachable!("create_process answered {:?}", other),
        }
    }

    /// Voluntarily hand the CPU to the next lottery winner
    pub fn switch_process(&self) {
        match self.call(SyscallRequest::SwitchProcess) {
            SyscallResponse::Done => {}
            other => unreachable!("switch_process answered {:?}", other),
        }
    }

    /// Stay off the CPU for at least `duration`
    pub fn sleep(&self, duration: Duration) {
        match self.call(SyscallRequest::Sleep { duration }) {
            SyscallResponse::Done => {}
            other => unreachable!("sleep answered {:?}", other),
        }
    }

    /// The caller's pid
    pub fn pid(&self) -> Pid {
        match self.call(SyscallRequest::GetPid) {
            SyscallResponse::Pid(pid) => pid,
            other => unreachable!("get_pid answered {:?}", other),
        }
    }

    /// Pid of the first live process with the given program name
    pub fn pid_by_name(&self, name: &str) -> Option<Pid> {
        match self.call(SyscallRequest::GetPidByName { name: name.into() }) {
            SyscallResponse::PidLookup(found) => found,
            other => unreachable!("get_pid_by_name answered {:?}", other),
        }
    }

    /// Terminate the calling process; never returns
    pub fn exit(&self) -> ! {
        self.exit_quietly();
        std::panic::panic_any(ProcessKilled)
    }

    /// Post the exit request and wait for the kill verdict without
    /// unwinding; used at the top of the process thread
    pub(crate) fn exit_quietly(&self) {
        self.channel.post(self.pid, SyscallRequest::Exit);
        let _ = self.unit.block_until_started();
    }

    /// Open a device (`"file <path>"`, `"random [seed]"`); returns a
    /// process-local descriptor
    pub fn open(&self, name: &str) -> Option<usize> {
        match self.call(SyscallRequest::Open { name: name.into() }) {
            SyscallResponse::Descriptor(descriptor) => descriptor,
            other => unreachable!("open answered {:?}", other),
        }
    }

    /// Close a descriptor
    pub fn close(&self, descriptor: usize) {
        match self.call(SyscallRequest::Close { descriptor }) {
            SyscallResponse::Done => {}
            other => unreachable!("close answered {:?}", other),
        }
    }

    /// Read up to `len` bytes from a descriptor
    pub fn read(&self, descriptor: usize, len: usize) -> Vec<u8> {
        match self.call(SyscallRequest::Read { descriptor, len }) {
            SyscallResponse::Data(data) => data,
            other => unreachable!("read answered {:?}", other),
        }
    }

    /// Reposition a descriptor
    pub fn seek(&self, descriptor: usize, offset: u64) {
        match self.call(SyscallRequest::Seek { descriptor, offset }) {
            SyscallResponse::Done => {}
            other => unreachable!("seek answered {:?}", other),
        }
    }

    /// Write through a descriptor; returns bytes accepted
    pub fn write(&self, descriptor: usize, data: &[u8]) -> usize {
        match self.call(SyscallRequest::Write {
            descriptor,
            data: data.to_vec(),
        }) {
            SyscallResponse::Written(written) => written,
            other => unreachable!("write answered {:?}", other),
        }
    }

    /// Queue a message for another process
    pub fn send_message(&self, message: Message) {
        match self.call(SyscallRequest::SendMessage { message }) {
            SyscallResponse::Done => {}
            other => unreachable!("send_message answered {:?}", other),
        }
    }

    /// Block until a message arrives, then return it
    pub fn wait_for_message(&self) -> Message {
        match self.call(SyscallRequest::WaitForMessage) {
            SyscallResponse::Message(message) => message,
            other => unreachable!("wait_for_message answered {:?}", other),
        }
    }

    /// Reserve `size` bytes of virtual memory; returns the start address
    pub fn allocate_memory(&self, size: usize) -> KernelResult<usize> {
        match self.call(SyscallRequest::AllocateMemory { size }) {
            SyscallResponse::Memory(result) => result,
            other => unreachable!("allocate_memory answered {:?}", other),
        }
    }

    /// Release a region returned by [`allocate_memory`](Self::allocate_memory)
    pub fn free_memory(&self, address: usize, size: usize) -> KernelResult<()> {
        match self.call(SyscallRequest::FreeMemory { address, size }) {
            SyscallResponse::Freed(result) => result,
            other => unreachable!("free_memory answered {:?}", other),
        }
    }

    fn resolve_miss(&self, virtual_page: usize) {
        // A failed mapping kills the process inside this call; Done is the
        // only answer that comes back
        match self.call(SyscallRequest::GetMapping { virtual_page }) {
            SyscallResponse::Done => {}
            other => unreachable!("get_mapping answered {:?}", other),
        }
    }

    /// Read one byte of virtual memory
    pub fn read_byte(&self, address: usize) -> u8 {
        loop {
            let attempt = self.hw.lock().read(address);
            match attempt {
                Ok(value) => return value,
                Err(miss) => self.resolve_miss(miss.virtual_page),
            }
        }
    }

    /// Write one byte of virtual memory
    pub fn write_byte(&self, address: usize, value: u8) {
        loop {
            let attempt = self.hw.lock().write(address, value);
            match attempt {
                Ok(()) => return,
                Err(miss) => self.resolve_miss(miss.virtual_page),
            }
        }
    }

    /// Yield if the quantum timer has asked for the CPU back.
    ///
    /// Long-running programs call this inside their loops; a process that
    /// never cooperates keeps timing out and drifts down the priority
    /// tiers instead.
    pub fn cooperate(&self) {
        if self.unit.clear_expired() {
            self.tick.reset_timeouts();
            self.switch_process();
        }
    }
}
