//! The Kernel
//!
//! Owns every subsystem and runs the trampoline loop on its own thread:
//! take one request from the channel, dispatch it, release exactly one run
//! gate. Boot sequence:
//!
//! 1. Validate configuration and open the swap store through the VFS
//! 2. Arm the quantum timer (unless the quantum is zero)
//! 3. Spawn the idle process and the caller's init program
//! 4. Run the first switch and hand the CPU to the winner

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::KernelConfig;
use crate::dev::vfs::Vfs;
use crate::hw::Hardware;
use crate::mm::MemoryManager;
use crate::os::{Os, ProcessKilled, UserProgram};
use crate::syscall::{KernelChannel, SyscallRequest, SyscallResponse};
use crate::sys::exec::{ExecutionUnit, Resume};
use crate::sys::process::{Pid, Priority, ProcessRecord};
use crate::sys::scheduler::Scheduler;
use crate::{KernelError, KernelResult};

/// The simulated kernel
pub struct Kernel {
    sched: Scheduler,
    mm: MemoryManager,
    vfs: Vfs,
    hw: Arc<Mutex<Hardware>>,
    channel: Arc<KernelChannel>,
}

/// Handle to a booted kernel; the kernel thread runs until the host exits
pub struct KernelHandle {
    _thread: std::thread::JoinHandle<()>,
}

impl Kernel {
    fn build(config: &KernelConfig) -> KernelResult<Self> {
        config.validate()?;

        log::debug!("initializing hardware ({} frames)...", config.physical_frames);
        let hw = Arc::new(Mutex::new(Hardware::new(config.physical_frames)));

        log::debug!("opening swap store at {}...", config.swap_path().display());
        let mut vfs = Vfs::new();
        let swap = vfs
            .open(&format!("file {}", config.swap_path().display()))
            .ok_or_else(|| {
                KernelError::DeviceUnavailable(format!(
                    "swap store {}",
                    config.swap_path().display()
                ))
            })?;

        log::debug!("initializing memory manager...");
        let mm = MemoryManager::new(config.physical_frames, swap, config.deterministic_seed);

        log::debug!("initializing scheduler...");
        let sched = Scheduler::new(config.deterministic_seed);

        Ok(Self {
            sched,
            mm,
            vfs,
            hw,
            channel: Arc::new(KernelChannel::new()),
        })
    }

    /// Boot the kernel: spawn idle and `init`, start the first process,
    /// and leave the kernel running on its own thread.
    pub fn boot(
        config: KernelConfig,
        init: Box<dyn UserProgram>,
        priority: Priority,
    ) -> KernelResult<KernelHandle> {
        silence_kill_unwinds();

        let mut kernel = Self::build(&config)?;

        if config.quantum_ms > 0 {
            kernel.sched.spawn_quantum_timer(
                Duration::from_millis(config.quantum_ms),
                config.demotion_threshold,
            );
        } else {
            log::debug!("quantum timer disabled, cooperative only");
        }

        kernel.spawn_process(Box::new(IdleProgram), Priority::Background, true);
        let init_pid = kernel.spawn_process(init, priority, false);
        log::info!("init process created with pid {}", init_pid);

        kernel.reschedule(None);

        let thread = std::thread::Builder::new()
            .name("kernel".into())
            .spawn(move || kernel.run())
            .map_err(|e| KernelError::DeviceUnavailable(format!("kernel thread: {}", e)))?;

        Ok(KernelHandle { _thread: thread })
    }

    fn run(mut self) {
        loop {
            let (pid, request) = self.channel.take_blocking();
            if self.sched.current() != Some(pid) {
                log::error!(
                    "pid {} posted {} while pid {:?} holds the cpu",
                    pid,
                    request.name(),
                    self.sched.current()
                );
            }
            log::trace!("dispatch {} for pid {}", request.name(), pid);
            self.dispatch(pid, request);
        }
    }

    fn dispatch(&mut self, pid: Pid, request: SyscallRequest) {
        match request {
            SyscallRequest::CreateProcess { program, priority } => {
                let child = self.spawn_process(program, priority, false);
                self.respond_and_resume(pid, SyscallResponse::Pid(child));
            }

            SyscallRequest::SwitchProcess => {
                let prev = self.unit_of(pid);
                self.reschedule(prev);
            }

            SyscallRequest::Sleep { duration } => {
                let prev = self.unit_of(pid);
                self.sched.sleep(duration);
                self.reschedule(prev);
            }

            SyscallRequest::GetPid => {
                self.respond_and_resume(pid, SyscallResponse::Pid(pid));
            }

            SyscallRequest::GetPidByName { name } => {
                let found = self.sched.table.find_by_name(&name);
                self.respond_and_resume(pid, SyscallResponse::PidLookup(found));
            }

            SyscallRequest::Exit => {
                self.terminate(pid);
            }

            SyscallRequest::Open { name } => {
                let descriptor = self.open_device(pid, &name);
                self.respond_and_resume(pid, SyscallResponse::Descriptor(descriptor));
            }

            SyscallRequest::Close { descriptor } => {
                if let Some(record) = self.sched.table.get_mut(pid) {
                    if let Some(vfs_id) = record.open_devices.get_mut(descriptor).and_then(Option::take) {
                        self.vfs.close(vfs_id);
                    }
                }
                self.respond_and_resume(pid, SyscallResponse::Done);
            }

            SyscallRequest::Read { descriptor, len } => {
                let data = match self.vfs_id(pid, descriptor) {
                    Some(vfs_id) => self.vfs.read(vfs_id, len),
                    None => Vec::new(),
                };
                self.respond_and_resume(pid, SyscallResponse::Data(data));
            }

            SyscallRequest::Seek { descriptor, offset } => {
                if let Some(vfs_id) = self.vfs_id(pid, descriptor) {
                    self.vfs.seek(vfs_id, offset);
                }
                self.respond_and_resume(pid, SyscallResponse::Done);
            }

            SyscallRequest::Write { descriptor, data } => {
                let written = match self.vfs_id(pid, descriptor) {
                    Some(vfs_id) => self.vfs.write(vfs_id, &data),
                    None => 0,
                };
                self.respond_and_resume(pid, SyscallResponse::Written(written));
            }

            SyscallRequest::SendMessage { mut message } => {
                message.sender = pid;
                let receiver = message.receiver;
                let wake = match self.sched.table.get_mut(receiver) {
                    Some(record) => {
                        record.mailbox.push_back(message);
                        record.waiting_for_message
                    }
                    None => {
                        log::warn!("pid {} sent a message to nonexistent pid {}", pid, receiver);
                        false
                    }
                };
                if wake {
                    self.sched.wake(receiver);
                }
                self.respond_and_resume(pid, SyscallResponse::Done);
            }

            SyscallRequest::WaitForMessage => {
                let head = self
                    .sched
                    .table
                    .get_mut(pid)
                    .and_then(|record| record.mailbox.pop_front());
                match head {
                    Some(message) => {
                        self.respond_and_resume(pid, SyscallResponse::Message(message));
                    }
                    None => {
                        let prev = self.unit_of(pid);
                        if let Some(record) = self.sched.table.get_mut(pid) {
                            record.waiting_for_message = true;
                        }
                        self.reschedule(prev);
                    }
                }
            }

            SyscallRequest::AllocateMemory { size } => {
                let result = match self.sched.table.get_mut(pid) {
                    Some(record) => self.mm.allocate(&mut record.page_table, size),
                    None => Err(KernelError::InvalidArgument("no such process")),
                };
                self.respond_and_resume(pid, SyscallResponse::Memory(result));
            }

            SyscallRequest::FreeMemory { address, size } => {
                let result = match self.sched.table.get_mut(pid) {
                    Some(record) => {
                        let mut hw = self.hw.lock();
                        self.mm.free(&mut record.page_table, &mut hw, address, size)
                    }
                    None => Err(KernelError::InvalidArgument("no such process")),
                };
                self.respond_and_resume(pid, SyscallResponse::Freed(result));
            }

            SyscallRequest::GetMapping { virtual_page } => {
                let result = {
                    let mut hw = self.hw.lock();
                    self.mm
                        .get_mapping(&mut self.sched, &mut hw, &mut self.vfs, virtual_page)
                };
                match result {
                    Ok(()) => self.respond_and_resume(pid, SyscallResponse::Done),
                    Err(e) => {
                        log::warn!("pid {} killed by memory fault: {}", pid, e);
                        self.terminate(pid);
                    }
                }
            }
        }
    }

    /// Spawn a process thread and admit it to the scheduler (or register
    /// it as the idle fallback)
    fn spawn_process(
        &mut self,
        program: Box<dyn UserProgram>,
        priority: Priority,
        idle: bool,
    ) -> Pid {
        let pid = self.sched.table.allocate_pid();
        let unit = Arc::new(ExecutionUnit::new());
        let record = ProcessRecord::new(pid, program.name().into(), priority, unit.clone());
        let os = Os::new(
            pid,
            self.channel.clone(),
            unit.clone(),
            record.tick.clone(),
            self.hw.clone(),
        );
        let thread_name = format!("user-{}-{}", record.name, pid);

        if idle {
            self.sched.register_idle(record);
        } else {
            self.sched.admit(record);
        }

        if let Err(e) = std::thread::Builder::new()
            .name(thread_name)
            .spawn(move || run_user(program, os, unit))
        {
            panic!("could not spawn thread for process {}: {}", pid, e);
        }

        pid
    }

    /// Stop the previous process, run one switch, and release the winner
    /// with its syscall response in place
    fn reschedule(&mut self, prev: Option<Arc<ExecutionUnit>>) {
        let switch = {
            let mut hw = self.hw.lock();
            self.sched.switch_process(&mut hw)
        };
        let Some(switch) = switch else {
            panic!("no runnable process and no idle process registered");
        };

        if let Some(prev) = prev {
            // The winner must not run until the loser is actually parked
            if !Arc::ptr_eq(&prev, &switch.unit) {
                prev.wait_idle();
            }
        }

        let response = match switch.delivered {
            Some(message) => SyscallResponse::Message(message),
            None => SyscallResponse::Done,
        };
        switch.unit.set_response(response);
        switch.unit.start();
    }

    /// Answer a non-switching syscall and let the caller keep the CPU
    fn respond_and_resume(&mut self, pid: Pid, response: SyscallResponse) {
        if let Some(record) = self.sched.table.get(pid) {
            record.unit.set_response(response);
            record.unit.start();
        }
    }

    /// Tear a process down: purge it from the scheduler, force-close its
    /// descriptors, release its frames, kill its thread, and move on
    fn terminate(&mut self, pid: Pid) {
        let Some(record) = self.sched.remove_process(pid) else {
            log::warn!("terminate of unknown pid {}", pid);
            return;
        };
        log::info!("process {} ({}) terminated", pid, record.name);

        for vfs_id in record.open_devices.iter().flatten() {
            self.vfs.close(*vfs_id);
        }

        {
            let mut hw = self.hw.lock();
            self.mm.free_all(&record.page_table, &mut hw);
        }

        record.unit.kill();
        self.reschedule(Some(record.unit.clone()));
    }

    fn unit_of(&self, pid: Pid) -> Option<Arc<ExecutionUnit>> {
        self.sched.table.get(pid).map(|record| record.unit.clone())
    }

    fn vfs_id(&self, pid: Pid, descriptor: usize) -> Option<usize> {
        self.sched
            .table
            .get(pid)
            .and_then(|record| record.open_devices.get(descriptor).copied().flatten())
    }

    fn open_device(&mut self, pid: Pid, name: &str) -> Option<usize> {
        let slot = self.sched.table.get(pid)?.free_device_slot()?;
        let vfs_id = self.vfs.open(name)?;
        if let Some(record) = self.sched.table.get_mut(pid) {
            record.open_devices[slot] = Some(vfs_id);
            Some(slot)
        } else {
            self.vfs.close(vfs_id);
            None
        }
    }
}

/// Top of every process thread: wait for the first permit, run the
/// program, and turn every way out into a clean exit
fn run_user(mut program: Box<dyn UserProgram>, os: Os, unit: Arc<ExecutionUnit>) {
    if unit.block_until_started() == Resume::Run {
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| program.main(&os)));
        match outcome {
            Ok(()) => os.exit_quietly(),
            Err(payload) => {
                if payload.downcast_ref::<ProcessKilled>().is_none() {
                    log::warn!("user program panicked, exiting its process");
                    os.exit_quietly();
                }
            }
        }
    }
    unit.mark_finished();
}

/// Keep the default panic hook from spamming stderr every time a process
/// thread unwinds with the kill payload
fn silence_kill_unwinds() {
    use std::sync::Once;
    static HOOK: Once = Once::new();
    HOOK.call_once(|| {
        let default = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if info.payload().downcast_ref::<ProcessKilled>().is_none() {
                default(info);
            }
        }));
    });
}

/// Last-resort process: yields in a tight loop so the scheduler always
/// has someone to hand the CPU to
struct IdleProgram;

impl UserProgram for IdleProgram {
    fn name(&self) -> &str {
        "idle"
    }

    fn main(&mut self, os: &Os) {
        loop {
            std::thread::sleep(Duration::from_millis(1));
            os.switch_process();
        }
    }
}
