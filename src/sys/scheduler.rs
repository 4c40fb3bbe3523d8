//! Lottery Scheduler
//!
//! Three priority-tier ready queues, a wake-time-ordered sleep set, and a
//! weighted lottery draw on every switch:
//!
//! - Real-time runnable: 60% real-time, 30% interactive, 10% background
//! - Otherwise, interactive runnable: 75% interactive, 25% background
//! - Otherwise background, then the idle process as last resort
//!
//! A draw landing on an empty queue falls back to the tier that anchored
//! the branch. The idle process lives outside every queue and never enters
//! the lottery.
//!
//! The quantum timer interacts with the scheduler only through [`TickSlot`]:
//! the scheduler publishes the running process's gate and tick state on
//! every switch, and the timer flips atomics on whatever it finds there.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::hw::Hardware;
use crate::ipc::Message;
use crate::sys::exec::ExecutionUnit;
use crate::sys::process::{Pid, Priority, ProcessRecord, ProcessTable, TickState};

/// The outcome of a process switch
pub struct Switch {
    /// Process selected to run next
    pub pid: Pid,
    /// Its run gate
    pub unit: Arc<ExecutionUnit>,
    /// Mailbox head, when the selected process was blocked waiting for it
    pub delivered: Option<Message>,
}

/// The currently running process, as seen by the quantum timer
pub struct TickSlot {
    running: Mutex<Option<(Arc<ExecutionUnit>, Arc<TickState>)>>,
}

impl TickSlot {
    /// Empty slot
    pub fn new() -> Self {
        Self {
            running: Mutex::new(None),
        }
    }

    fn set(&self, unit: Arc<ExecutionUnit>, tick: Arc<TickState>) {
        *self.running.lock() = Some((unit, tick));
    }

    fn clear(&self) {
        *self.running.lock() = None;
    }

    /// One quantum expiry: demand a yield and count the timeout, demoting
    /// past `threshold` consecutive timeouts
    pub fn tick(&self, threshold: u32) {
        let running = self.running.lock();
        if let Some((unit, tick)) = running.as_ref() {
            unit.request_stop();
            if let Some(lower) = tick.record_timeout(threshold) {
                log::debug!("quantum hog demoted to {:?}", lower);
            }
        }
    }
}

impl Default for TickSlot {
    fn default() -> Self {
        Self::new()
    }
}

struct Sleeper {
    wake_at: Instant,
    pid: Pid,
}

impl PartialEq for Sleeper {
    fn eq(&self, other: &Self) -> bool {
        self.wake_at == other.wake_at && self.pid == other.pid
    }
}

impl Eq for Sleeper {}

impl PartialOrd for Sleeper {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Sleeper {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.wake_at
            .cmp(&other.wake_at)
            .then(self.pid.cmp(&other.pid))
    }
}

/// Process scheduler
pub struct Scheduler {
    /// The process arena; the scheduler is its single owner
    pub table: ProcessTable,
    realtime: VecDeque<Pid>,
    interactive: VecDeque<Pid>,
    background: VecDeque<Pid>,
    sleeping: BinaryHeap<Reverse<Sleeper>>,
    current: Option<Pid>,
    idle: Option<Pid>,
    rng: StdRng,
    tick_slot: Arc<TickSlot>,
}

impl Scheduler {
    /// New scheduler; `seed` fixes the lottery for deterministic runs
    pub fn new(seed: Option<u64>) -> Self {
        Self {
            table: ProcessTable::new(),
            realtime: VecDeque::new(),
            interactive: VecDeque::new(),
            background: VecDeque::new(),
            sleeping: BinaryHeap::new(),
            current: None,
            idle: None,
            rng: seed
                .map(StdRng::seed_from_u64)
                .unwrap_or_else(StdRng::from_entropy),
            tick_slot: Arc::new(TickSlot::new()),
        }
    }

    /// The timer's view of the running process
    pub fn tick_slot(&self) -> Arc<TickSlot> {
        self.tick_slot.clone()
    }

    /// Pid of the running process
    pub fn current(&self) -> Option<Pid> {
        self.current
    }

    /// Admit a process into the table and its ready queue
    pub fn admit(&mut self, record: ProcessRecord) {
        let pid = record.pid;
        let priority = record.tick.priority();
        self.table.insert(record);
        self.enqueue(pid);
        log::debug!("process {} admitted at {:?}", pid, priority);
    }

    /// Register the idle process; it is kept out of every ready queue
    pub fn register_idle(&mut self, record: ProcessRecord) {
        let pid = record.pid;
        self.table.insert(record);
        self.idle = Some(pid);
    }

    fn queue_mut(&mut self, tier: Priority) -> &mut VecDeque<Pid> {
        match tier {
            Priority::RealTime => &mut self.realtime,
            Priority::Interactive => &mut self.interactive,
            Priority::Background => &mut self.background,
        }
    }

    fn enqueue(&mut self, pid: Pid) {
        let Some(record) = self.table.get(pid) else {
            return;
        };
        let tier = record.tick.priority();
        self.queue_mut(tier).push_back(pid);
    }

    /// Hand the CPU to the next lottery winner.
    ///
    /// The previous process is re-enqueued unless it is gone, asleep, or
    /// blocked on its mailbox; the TLB is flushed; due sleepers wake; and
    /// if the winner was blocked on its mailbox, the head message rides
    /// along as its syscall result.
    pub fn switch_process(&mut self, hw: &mut Hardware) -> Option<Switch> {
        if let Some(prev) = self.current.take() {
            let is_idle = self.idle == Some(prev);
            if let Some(record) = self.table.get(prev) {
                if !is_idle && !record.waiting_for_message {
                    self.enqueue(prev);
                }
            }
        }
        self.tick_slot.clear();

        hw.flush_tlb();
        self.wake_sleepers();

        let next = self.select_next()?;
        let record = self.table.get_mut(next)?;

        let delivered = if record.waiting_for_message {
            record.waiting_for_message = false;
            let head = record.mailbox.pop_front();
            if head.is_none() {
                log::error!("process {} selected while waiting on an empty mailbox", next);
            }
            head
        } else {
            None
        };

        let unit = record.unit.clone();
        self.tick_slot.set(unit.clone(), record.tick.clone());
        self.current = Some(next);
        log::trace!("switch to process {}", next);

        Some(Switch {
            pid: next,
            unit,
            delivered,
        })
    }

    fn select_next(&mut self) -> Option<Pid> {
        let draw: f64 = self.rng.gen();

        if !self.realtime.is_empty() {
            // A draw landing on an empty lower tier falls back to real-time
            let pid = if draw < 0.6 {
                self.realtime.pop_front()
            } else if draw < 0.9 {
                self.interactive
                    .pop_front()
                    .or_else(|| self.background.pop_front())
                    .or_else(|| self.realtime.pop_front())
            } else {
                self.background
                    .pop_front()
                    .or_else(|| self.realtime.pop_front())
            };
            return pid;
        }

        if !self.interactive.is_empty() {
            let pid = if draw < 0.75 {
                self.interactive.pop_front()
            } else {
                self.background
                    .pop_front()
                    .or_else(|| self.interactive.pop_front())
            };
            return pid;
        }

        self.background.pop_front().or(self.idle)
    }

    /// Move the running process into the sleep set for at least `duration`
    pub fn sleep(&mut self, duration: Duration) {
        if let Some(pid) = self.current.take() {
            self.tick_slot.clear();
            self.sleeping.push(Reverse(Sleeper {
                wake_at: Instant::now() + duration,
                pid,
            }));
            log::trace!("process {} sleeping for {:?}", pid, duration);
        }
    }

    fn wake_sleepers(&mut self) {
        let now = Instant::now();
        while let Some(Reverse(sleeper)) = self.sleeping.peek() {
            if sleeper.wake_at > now {
                break;
            }
            let pid = sleeper.pid;
            self.sleeping.pop();
            self.enqueue(pid);
        }
    }

    /// Put a mailbox-blocked process back in the running for selection.
    /// Its waiting flag stays set so the next switch-in delivers the head;
    /// a second wake before that switch must not queue it twice.
    pub fn wake(&mut self, pid: Pid) {
        let queued = self.realtime.contains(&pid)
            || self.interactive.contains(&pid)
            || self.background.contains(&pid);
        if !queued {
            self.enqueue(pid);
        }
    }

    /// Drop a process from the table and every scheduler structure
    pub fn remove_process(&mut self, pid: Pid) -> Option<ProcessRecord> {
        self.realtime.retain(|p| *p != pid);
        self.interactive.retain(|p| *p != pid);
        self.background.retain(|p| *p != pid);
        self.sleeping.retain(|Reverse(s)| s.pid != pid);
        if self.current == Some(pid) {
            self.current = None;
            self.tick_slot.clear();
        }
        self.table.remove(pid)
    }

    /// Pids eligible as swap-out victims: everyone but the faulting
    /// process and the idle process
    pub fn swap_victim_candidates(&self) -> Vec<Pid> {
        self.table
            .pids()
            .into_iter()
            .filter(|pid| Some(*pid) != self.current && Some(*pid) != self.idle)
            .collect()
    }

    /// Spawn the preemption timer; `quantum` must be nonzero
    pub fn spawn_quantum_timer(&self, quantum: Duration, threshold: u32) {
        let slot = self.tick_slot.clone();
        let spawned = std::thread::Builder::new()
            .name("quantum-timer".into())
            .spawn(move || loop {
                std::thread::sleep(quantum);
                slot.tick(threshold);
            });
        match spawned {
            Ok(_) => log::debug!("quantum timer armed at {:?}", quantum),
            Err(e) => log::error!("quantum timer thread failed to start, no preemption: {}", e),
        }
    }

    #[cfg(test)]
    pub(crate) fn force_current(&mut self, pid: Pid) {
        self.current = Some(pid);
    }
}
