//! Process Records and the Process Table
//!
//! The table is an arena of `Option<ProcessRecord>` indexed by pid. Pids
//! are assigned monotonically and never reused, so the arena only grows;
//! a terminated process leaves a `None` hole behind. Subsystems refer to
//! processes by pid, never by holding the record.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

use crate::ipc::Message;
use crate::mm::page::PageTable;
use crate::sys::exec::ExecutionUnit;
use crate::MAX_OPEN_DEVICES;

/// Process identifier
pub type Pid = u32;

/// Scheduling tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// Highest tier, wins the lottery 60% of the time
    RealTime,
    /// Middle tier
    Interactive,
    /// Lowest tier; demotion stops here
    Background,
}

impl Priority {
    /// The tier one step down, or `None` from Background
    pub fn demoted(self) -> Option<Priority> {
        match self {
            Priority::RealTime => Some(Priority::Interactive),
            Priority::Interactive => Some(Priority::Background),
            Priority::Background => None,
        }
    }

    fn from_u8(value: u8) -> Priority {
        match value {
            0 => Priority::RealTime,
            1 => Priority::Interactive,
            _ => Priority::Background,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Priority::RealTime => 0,
            Priority::Interactive => 1,
            Priority::Background => 2,
        }
    }
}

/// Priority cell and timeout counter, shared with the quantum timer.
///
/// Only atomics live here: the timer thread mutates this state without
/// touching the scheduler, and queue membership is recomputed from the
/// priority at the next enqueue.
pub struct TickState {
    priority: AtomicU8,
    timeouts: AtomicU32,
}

impl TickState {
    /// New state at the given starting tier
    pub fn new(priority: Priority) -> Self {
        Self {
            priority: AtomicU8::new(priority.as_u8()),
            timeouts: AtomicU32::new(0),
        }
    }

    /// Current scheduling tier
    pub fn priority(&self) -> Priority {
        Priority::from_u8(self.priority.load(Ordering::SeqCst))
    }

    /// Count one expired quantum. Past `threshold` consecutive timeouts the
    /// process drops a tier; returns the new tier when that happens.
    pub fn record_timeout(&self, threshold: u32) -> Option<Priority> {
        let count = self.timeouts.fetch_add(1, Ordering::SeqCst) + 1;
        if count <= threshold {
            return None;
        }

        self.timeouts.store(0, Ordering::SeqCst);
        let lower = self.priority().demoted()?;
        self.priority.store(lower.as_u8(), Ordering::SeqCst);
        Some(lower)
    }

    /// Voluntary yield observed: the process is cooperating again
    pub fn reset_timeouts(&self) {
        self.timeouts.store(0, Ordering::SeqCst);
    }
}

/// Everything the kernel tracks about one process
pub struct ProcessRecord {
    /// Process identifier
    pub pid: Pid,
    /// Program name, for `get_pid_by_name`
    pub name: String,
    /// Priority and timeout counter, shared with the quantum timer
    pub tick: Arc<TickState>,
    /// Virtual-to-physical mappings
    pub page_table: PageTable,
    /// Process-local descriptor to VFS id table
    pub open_devices: [Option<usize>; MAX_OPEN_DEVICES],
    /// Undelivered incoming messages
    pub mailbox: VecDeque<Message>,
    /// Parked in `wait_for_message` with an empty mailbox
    pub waiting_for_message: bool,
    /// Run gate for the process's host thread
    pub unit: Arc<ExecutionUnit>,
}

impl ProcessRecord {
    /// New record with empty tables
    pub fn new(pid: Pid, name: String, priority: Priority, unit: Arc<ExecutionUnit>) -> Self {
        Self {
            pid,
            name,
            tick: Arc::new(TickState::new(priority)),
            page_table: PageTable::default(),
            open_devices: [None; MAX_OPEN_DEVICES],
            mailbox: VecDeque::new(),
            waiting_for_message: false,
            unit,
        }
    }

    /// First free slot in the open-device table
    pub fn free_device_slot(&self) -> Option<usize> {
        self.open_devices.iter().position(|slot| slot.is_none())
    }
}

/// Arena of process records indexed by pid
pub struct ProcessTable {
    slots: Vec<Option<ProcessRecord>>,
    next_pid: Pid,
}

impl ProcessTable {
    /// Empty table; pid 0 is never assigned
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            next_pid: 1,
        }
    }

    /// Reserve the next pid
    pub fn allocate_pid(&mut self) -> Pid {
        let pid = self.next_pid;
        self.next_pid += 1;
        pid
    }

    /// Store a record under its pid
    pub fn insert(&mut self, record: ProcessRecord) {
        let idx = record.pid as usize;
        if idx >= self.slots.len() {
            self.slots.resize_with(idx + 1, || None);
        }
        self.slots[idx] = Some(record);
    }

    /// Look up a record
    pub fn get(&self, pid: Pid) -> Option<&ProcessRecord> {
        self.slots.get(pid as usize).and_then(|s| s.as_ref())
    }

    /// Look up a record mutably
    pub fn get_mut(&mut self, pid: Pid) -> Option<&mut ProcessRecord> {
        self.slots.get_mut(pid as usize).and_then(|s| s.as_mut())
    }

    /// Remove a record, returning it
    pub fn remove(&mut self, pid: Pid) -> Option<ProcessRecord> {
        self.slots.get_mut(pid as usize).and_then(|s| s.take())
    }

    /// First live pid whose program name matches
    pub fn find_by_name(&self, name: &str) -> Option<Pid> {
        self.slots
            .iter()
            .flatten()
            .find(|record| record.name == name)
            .map(|record| record.pid)
    }

    /// Pids of every live process
    pub fn pids(&self) -> Vec<Pid> {
        self.slots.iter().flatten().map(|record| record.pid).collect()
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(table: &mut ProcessTable, name: &str) -> Pid {
        let pid = table.allocate_pid();
        table.insert(ProcessRecord::new(
            pid,
            name.into(),
            Priority::Interactive,
            Arc::new(ExecutionUnit::new()),
        ));
        pid
    }

    #[test]
    fn test_pids_are_never_reused() {
        let mut table = ProcessTable::new();
        let a = record(&mut table, "a");
        table.remove(a);
        let b = record(&mut table, "b");
        assert_ne!(a, b);
        assert!(table.get(a).is_none());
        assert!(table.get(b).is_some());
    }

    #[test]
    fn test_find_by_name() {
        let mut table = ProcessTable::new();
        record(&mut table, "ping");
        let pong = record(&mut table, "pong");
        assert_eq!(table.find_by_name("pong"), Some(pong));
        assert_eq!(table.find_by_name("missing"), None);
    }

    #[test]
    fn test_demotion_after_threshold() {
        let tick = TickState::new(Priority::RealTime);

        for _ in 0..5 {
            assert_eq!(tick.record_timeout(5), None);
        }
        assert_eq!(tick.record_timeout(5), Some(Priority::Interactive));

        // Counter restarts after a demotion
        for _ in 0..5 {
            assert_eq!(tick.record_timeout(5), None);
        }
        assert_eq!(tick.record_timeout(5), Some(Priority::Background));
    }

    #[test]
    fn test_background_is_terminal() {
        let tick = TickState::new(Priority::Background);
        for _ in 0..20 {
            assert_eq!(tick.record_timeout(5), None);
        }
        assert_eq!(tick.priority(), Priority::Background);
    }

    #[test]
    fn test_cooperation_resets_counter() {
        let tick = TickState::new(Priority::RealTime);
        for _ in 0..5 {
            tick.record_timeout(5);
        }
        tick.reset_timeouts();
        assert_eq!(tick.record_timeout(5), None);
        assert_eq!(tick.priority(), Priority::RealTime);
    }
}
