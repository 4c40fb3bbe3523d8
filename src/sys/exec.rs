//! Execution Hand-off
//!
//! Each simulated process runs on its own host thread, gated so that at
//! most one of them executes userland code at a time. The contract:
//!
//! - `start` releases one run permit.
//! - `block_until_started` parks the caller until a permit (or a kill
//!   verdict) arrives, then consumes the permit.
//! - `wait_idle` blocks the kernel until the unit has parked or finished,
//!   so a stopped process is guaranteed off-CPU before the next one starts.
//! - `kill` permanently wakes any parked thread with `Resume::Kill`; a
//!   killed unit never runs userland code again.
//!
//! The expired flag is level-triggered: the quantum timer sets it, the
//! process observes and clears it at its next cooperation point.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Condvar, Mutex};

use crate::syscall::SyscallResponse;

/// Verdict delivered to a parked process thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resume {
    /// Run permit granted
    Run,
    /// Process was terminated while parked; unwind without running
    Kill,
}

#[derive(Default)]
struct GateState {
    permits: u32,
    parked: bool,
    killed: bool,
    finished: bool,
}

/// Per-process run gate, expired flag and syscall response slot
pub struct ExecutionUnit {
    state: Mutex<GateState>,
    cond: Condvar,
    expired: AtomicBool,
    response: Mutex<Option<SyscallResponse>>,
}

impl ExecutionUnit {
    /// New unit, parked-side state empty
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GateState::default()),
            cond: Condvar::new(),
            expired: AtomicBool::new(false),
            response: Mutex::new(None),
        }
    }

    /// Release one run permit
    pub fn start(&self) {
        let mut state = self.state.lock();
        state.permits += 1;
        self.cond.notify_all();
    }

    /// Park the calling process thread until started or killed
    pub fn block_until_started(&self) -> Resume {
        let mut state = self.state.lock();
        state.parked = true;
        self.cond.notify_all();

        while state.permits == 0 && !state.killed {
            self.cond.wait(&mut state);
        }

        if state.killed {
            return Resume::Kill;
        }

        state.permits -= 1;
        state.parked = false;
        Resume::Run
    }

    /// Block the kernel until the unit is parked with no pending permit,
    /// or its thread has finished
    pub fn wait_idle(&self) {
        let mut state = self.state.lock();
        while !state.finished && !(state.parked && state.permits == 0) {
            self.cond.wait(&mut state);
        }
    }

    /// Terminate the unit; any parked thread wakes with [`Resume::Kill`]
    pub fn kill(&self) {
        let mut state = self.state.lock();
        state.killed = true;
        self.cond.notify_all();
    }

    /// Mark the process thread as gone (called as the thread unwinds)
    pub fn mark_finished(&self) {
        let mut state = self.state.lock();
        state.finished = true;
        self.cond.notify_all();
    }

    /// Quantum timer: demand the process yield at its next cooperation point
    pub fn request_stop(&self) {
        self.expired.store(true, Ordering::SeqCst);
    }

    /// Consume the expired flag, reporting whether it was set
    pub fn clear_expired(&self) -> bool {
        self.expired.swap(false, Ordering::SeqCst)
    }

    /// Place the result of the unit's pending syscall
    pub fn set_response(&self, response: SyscallResponse) {
        *self.response.lock() = Some(response);
    }

    /// Take the result of the last syscall (called after waking)
    pub fn take_response(&self) -> Option<SyscallResponse> {
        self.response.lock().take()
    }
}

impl Default for ExecutionUnit {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_start_releases_parked_thread() {
        let unit = Arc::new(ExecutionUnit::new());
        let worker_unit = unit.clone();

        let worker = std::thread::spawn(move || worker_unit.block_until_started());

        unit.wait_idle();
        unit.start();
        assert_eq!(worker.join().unwrap(), Resume::Run);
    }

    #[test]
    fn test_kill_wakes_with_kill_verdict() {
        let unit = Arc::new(ExecutionUnit::new());
        let worker_unit = unit.clone();

        let worker = std::thread::spawn(move || worker_unit.block_until_started());

        unit.wait_idle();
        unit.kill();
        assert_eq!(worker.join().unwrap(), Resume::Kill);
    }

    #[test]
    fn test_wait_idle_blocks_until_parked() {
        let unit = Arc::new(ExecutionUnit::new());
        let worker_unit = unit.clone();

        let worker = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            worker_unit.block_until_started()
        });

        // Returns only once the worker has actually parked
        unit.wait_idle();
        unit.start();
        assert_eq!(worker.join().unwrap(), Resume::Run);
    }

    #[test]
    fn test_expired_flag_is_level_triggered() {
        let unit = ExecutionUnit::new();
        assert!(!unit.clear_expired());

        unit.request_stop();
        unit.request_stop();
        assert!(unit.clear_expired());
        assert!(!unit.clear_expired());
    }
}
