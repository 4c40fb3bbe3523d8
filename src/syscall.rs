//! Syscall Requests, Responses and the Kernel Channel
//!
//! Every kernel entry is a typed request posted into a single-slot channel
//! and serviced by the kernel thread. The slot holds at most one request
//! because at most one process executes userland code at a time; a second
//! pending request means the hand-off contract was broken.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::ipc::Message;
use crate::os::UserProgram;
use crate::sys::process::{Pid, Priority};
use crate::KernelResult;

/// A request for kernel service
pub enum SyscallRequest {
    /// Spawn a new process running `program`
    CreateProcess {
        /// Program to run
        program: Box<dyn UserProgram>,
        /// Starting scheduling tier
        priority: Priority,
    },
    /// Voluntarily yield the CPU
    SwitchProcess,
    /// Yield and stay off every ready queue for at least `duration`
    Sleep {
        /// Minimum time asleep
        duration: Duration,
    },
    /// Ask for the caller's pid
    GetPid,
    /// Look up a pid by program name
    GetPidByName {
        /// Program name to search for
        name: String,
    },
    /// Terminate the caller
    Exit,
    /// Open a device by routing string (`"file <path>"`, `"random [seed]"`)
    Open {
        /// Device routing string
        name: String,
    },
    /// Close a process-local descriptor
    Close {
        /// Descriptor from a previous `Open`
        descriptor: usize,
    },
    /// Read up to `len` bytes from a descriptor
    Read {
        /// Descriptor from a previous `Open`
        descriptor: usize,
        /// Bytes requested
        len: usize,
    },
    /// Reposition a descriptor
    Seek {
        /// Descriptor from a previous `Open`
        descriptor: usize,
        /// Absolute offset
        offset: u64,
    },
    /// Write bytes through a descriptor
    Write {
        /// Descriptor from a previous `Open`
        descriptor: usize,
        /// Bytes to write
        data: Vec<u8>,
    },
    /// Queue a message in another process's mailbox
    SendMessage {
        /// Message to deliver; the kernel stamps the sender
        message: Message,
    },
    /// Block until a message is available
    WaitForMessage,
    /// Reserve `size` bytes of virtual address space
    AllocateMemory {
        /// Bytes requested, must be a multiple of the page size
        size: usize,
    },
    /// Release a previously allocated region
    FreeMemory {
        /// Start address returned by `AllocateMemory`
        address: usize,
        /// Bytes to release
        size: usize,
    },
    /// Resolve a TLB miss for the caller
    GetMapping {
        /// Virtual page that missed
        virtual_page: usize,
    },
}

impl SyscallRequest {
    /// Short name for trace logging
    pub fn name(&self) -> &'static str {
        match self {
            SyscallRequest::CreateProcess { .. } => "create_process",
            SyscallRequest::SwitchProcess => "switch_process",
            SyscallRequest::Sleep { .. } => "sleep",
            SyscallRequest::GetPid => "get_pid",
            SyscallRequest::GetPidByName { .. } => "get_pid_by_name",
            SyscallRequest::Exit => "exit",
            SyscallRequest::Open { .. } => "open",
            SyscallRequest::Close { .. } => "close",
            SyscallRequest::Read { .. } => "read",
            SyscallRequest::Seek { .. } => "seek",
            SyscallRequest::Write { .. } => "write",
            SyscallRequest::SendMessage { .. } => "send_message",
            SyscallRequest::WaitForMessage => "wait_for_message",
            SyscallRequest::AllocateMemory { .. } => "allocate_memory",
            SyscallRequest::FreeMemory { .. } => "free_memory",
            SyscallRequest::GetMapping { .. } => "get_mapping",
        }
    }
}

/// Typed result of a syscall, written into the caller's response slot
#[derive(Debug)]
pub enum SyscallResponse {
    /// Nothing to report
    Done,
    /// A pid (caller's own, or a freshly created child's)
    Pid(Pid),
    /// Result of a name lookup
    PidLookup(Option<Pid>),
    /// Process-local descriptor, or `None` if the open failed
    Descriptor(Option<usize>),
    /// Bytes read (possibly short or empty)
    Data(Vec<u8>),
    /// Bytes actually written
    Written(usize),
    /// A delivered mailbox message
    Message(Message),
    /// Result of an allocation: start address or error
    Memory(KernelResult<usize>),
    /// Result of a free
    Freed(KernelResult<()>),
}

/// Single-slot request channel into the kernel thread
pub struct KernelChannel {
    pending: Mutex<Option<(Pid, SyscallRequest)>>,
    cond: Condvar,
}

impl KernelChannel {
    /// Empty channel
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(None),
            cond: Condvar::new(),
        }
    }

    /// Post a request. The slot must be empty; an occupied slot means two
    /// processes ran userland code at once.
    pub fn post(&self, pid: Pid, request: SyscallRequest) {
        let mut pending = self.pending.lock();
        if let Some((other, stale)) = pending.as_ref() {
            log::error!(
                "syscall slot occupied by pid {} ({}) while pid {} posts {}",
                other,
                stale.name(),
                pid,
                request.name()
            );
        }
        *pending = Some((pid, request));
        self.cond.notify_one();
    }

    /// Block until a request arrives and take it
    pub fn take_blocking(&self) -> (Pid, SyscallRequest) {
        let mut pending = self.pending.lock();
        loop {
            if let Some(request) = pending.take() {
                return request;
            }
            self.cond.wait(&mut pending);
        }
    }
}

impl Default for KernelChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_post_then_take() {
        let channel = KernelChannel::new();
        channel.post(3, SyscallRequest::GetPid);

        let (pid, request) = channel.take_blocking();
        assert_eq!(pid, 3);
        assert_eq!(request.name(), "get_pid");
    }

    #[test]
    fn test_take_blocks_until_posted() {
        let channel = Arc::new(KernelChannel::new());
        let poster = channel.clone();

        let handle = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            poster.post(1, SyscallRequest::SwitchProcess);
        });

        let (pid, request) = channel.take_blocking();
        assert_eq!(pid, 1);
        assert_eq!(request.name(), "switch_process");
        handle.join().unwrap();
    }
}
