//! End-to-end tests: boot a whole kernel and watch user programs run.
//!
//! Programs report progress through an mpsc channel captured at spawn
//! time; a killed program drops its sender, so process death shows up as
//! a disconnect on the test side.

use std::sync::mpsc;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use simkern::config::KernelConfig;
use simkern::ipc::Message;
use simkern::kernel::Kernel;
use simkern::os::{Os, UserProgram};
use simkern::sys::process::Priority;
use simkern::PAGE_SIZE;

const STEP: Duration = Duration::from_secs(5);

fn test_config(tmp: &TempDir, frames: usize, quantum_ms: u64) -> KernelConfig {
    KernelConfig {
        data_dir: tmp.path().to_path_buf(),
        physical_frames: frames,
        quantum_ms,
        demotion_threshold: 5,
        swap_file: "swap.bin".into(),
        deterministic_seed: Some(99),
    }
}

/// Init program that hands a list of children to the kernel
struct Spawner {
    children: Vec<(Box<dyn UserProgram>, Priority)>,
}

impl UserProgram for Spawner {
    fn name(&self) -> &str {
        "init"
    }

    fn main(&mut self, os: &Os) {
        for (program, priority) in self.children.drain(..) {
            os.create_process(program, priority);
        }
    }
}

fn boot(tmp: &TempDir, quantum_ms: u64, children: Vec<(Box<dyn UserProgram>, Priority)>) {
    boot_with_frames(tmp, 64, quantum_ms, children)
}

fn boot_with_frames(
    tmp: &TempDir,
    frames: usize,
    quantum_ms: u64,
    children: Vec<(Box<dyn UserProgram>, Priority)>,
) {
    let config = test_config(tmp, frames, quantum_ms);
    Kernel::boot(config, Box::new(Spawner { children }), Priority::Interactive).expect("boot");
}

// ---------------------------------------------------------------------------
// Memory lifecycle
// ---------------------------------------------------------------------------

struct MemoryScenario {
    events: mpsc::Sender<String>,
}

impl UserProgram for MemoryScenario {
    fn name(&self) -> &str {
        "scenario"
    }

    fn main(&mut self, os: &Os) {
        let size = 2 * PAGE_SIZE;
        let base = os.allocate_memory(size).unwrap();
        self.events.send(format!("allocated {}", base)).unwrap();

        os.write_byte(base, 0xAB);
        os.write_byte(base + size - 1, 0xCD);
        self.events
            .send(format!(
                "bytes {} {}",
                os.read_byte(base),
                os.read_byte(base + size - 1)
            ))
            .unwrap();

        os.free_memory(base, size).unwrap();
        self.events.send("freed".into()).unwrap();

        // Touching the freed region is a segfault; the kernel kills us
        // right here and "survived" must never arrive
        let _ = os.read_byte(base);
        self.events.send("survived".into()).unwrap();
    }
}

#[test]
fn test_memory_lifecycle_ends_in_termination() {
    let tmp = TempDir::new().unwrap();
    let (events, seen) = mpsc::channel();
    boot(
        &tmp,
        0,
        vec![(Box::new(MemoryScenario { events }), Priority::Interactive)],
    );

    assert_eq!(seen.recv_timeout(STEP).unwrap(), "allocated 0");
    assert_eq!(seen.recv_timeout(STEP).unwrap(), "bytes 171 205");
    assert_eq!(seen.recv_timeout(STEP).unwrap(), "freed");

    // The only remaining signal is the sender dropping with the process
    match seen.recv_timeout(STEP) {
        Err(_) => {}
        Ok(event) => panic!("process outlived its segfault: {:?}", event),
    }
}

// ---------------------------------------------------------------------------
// Message passing
// ---------------------------------------------------------------------------

struct Echo;

impl UserProgram for Echo {
    fn name(&self) -> &str {
        "echo"
    }

    fn main(&mut self, os: &Os) {
        loop {
            let message = os.wait_for_message();
            let mut payload = message.payload.clone();
            payload.extend_from_slice(b"!");
            os.send_message(Message::to(message.sender, message.kind, payload));
        }
    }
}

struct Caller {
    replies: mpsc::Sender<(u32, i32, Vec<u8>)>,
}

impl UserProgram for Caller {
    fn name(&self) -> &str {
        "caller"
    }

    fn main(&mut self, os: &Os) {
        let echo = loop {
            match os.pid_by_name("echo") {
                Some(pid) => break pid,
                None => os.switch_process(),
            }
        };

        for round in 0..3i32 {
            os.send_message(Message::to(echo, round, format!("hi {}", round).into_bytes()));
            let reply = os.wait_for_message();
            self.replies
                .send((reply.sender, reply.kind, reply.payload))
                .unwrap();
        }
    }
}

#[test]
fn test_messages_roundtrip_with_stamped_senders() {
    let tmp = TempDir::new().unwrap();
    let (replies, seen) = mpsc::channel();
    boot(
        &tmp,
        25,
        vec![
            (Box::new(Echo), Priority::Interactive),
            (Box::new(Caller { replies }), Priority::Interactive),
        ],
    );

    let mut echo_pid = None;
    for round in 0..3i32 {
        let (sender, kind, payload) = seen.recv_timeout(STEP).unwrap();
        assert_eq!(kind, round);
        assert_eq!(payload, format!("hi {}!", round).into_bytes());
        // Every reply is stamped with the same real pid, whatever the
        // echo program claimed
        match echo_pid {
            None => echo_pid = Some(sender),
            Some(expected) => assert_eq!(sender, expected),
        }
    }
}

// ---------------------------------------------------------------------------
// Fault isolation
// ---------------------------------------------------------------------------

struct WildWrite {
    events: mpsc::Sender<String>,
}

impl UserProgram for WildWrite {
    fn name(&self) -> &str {
        "wild"
    }

    fn main(&mut self, os: &Os) {
        os.write_byte(50 * PAGE_SIZE, 1);
        self.events.send("survived".into()).unwrap();
    }
}

struct Worker {
    events: mpsc::Sender<String>,
}

impl UserProgram for Worker {
    fn name(&self) -> &str {
        "worker"
    }

    fn main(&mut self, os: &Os) {
        let base = os.allocate_memory(PAGE_SIZE).unwrap();
        for i in 0..10u8 {
            os.write_byte(base + i as usize, i);
            os.cooperate();
        }
        for i in 0..10u8 {
            assert_eq!(os.read_byte(base + i as usize), i);
        }
        self.events.send("worker done".into()).unwrap();
    }
}

#[test]
fn test_segfault_kills_one_process_not_the_kernel() {
    let tmp = TempDir::new().unwrap();
    let (events, seen) = mpsc::channel();
    boot(
        &tmp,
        25,
        vec![
            (
                Box::new(WildWrite {
                    events: events.clone(),
                }),
                Priority::Interactive,
            ),
            (Box::new(Worker { events }), Priority::Interactive),
        ],
    );

    assert_eq!(seen.recv_timeout(STEP).unwrap(), "worker done");
}

struct Panicker;

impl UserProgram for Panicker {
    fn name(&self) -> &str {
        "panicker"
    }

    fn main(&mut self, _os: &Os) {
        panic!("user bug");
    }
}

#[test]
fn test_user_panic_is_contained() {
    let tmp = TempDir::new().unwrap();
    let (events, seen) = mpsc::channel();
    boot(
        &tmp,
        25,
        vec![
            (Box::new(Panicker), Priority::Interactive),
            (Box::new(Worker { events }), Priority::Interactive),
        ],
    );

    assert_eq!(seen.recv_timeout(STEP).unwrap(), "worker done");
}

// ---------------------------------------------------------------------------
// Sleep
// ---------------------------------------------------------------------------

struct Napper {
    events: mpsc::Sender<Duration>,
}

impl UserProgram for Napper {
    fn name(&self) -> &str {
        "napper"
    }

    fn main(&mut self, os: &Os) {
        let before = Instant::now();
        os.sleep(Duration::from_millis(100));
        self.events.send(before.elapsed()).unwrap();
    }
}

#[test]
fn test_sleep_blocks_for_at_least_the_request() {
    let tmp = TempDir::new().unwrap();
    let (events, seen) = mpsc::channel();
    boot(
        &tmp,
        25,
        vec![(Box::new(Napper { events }), Priority::Interactive)],
    );

    let elapsed = seen.recv_timeout(STEP).unwrap();
    assert!(elapsed >= Duration::from_millis(100), "woke after {:?}", elapsed);
}

// ---------------------------------------------------------------------------
// Swap under pressure
// ---------------------------------------------------------------------------

struct PatternWriter {
    tag: u8,
    events: mpsc::Sender<String>,
}

impl UserProgram for PatternWriter {
    fn name(&self) -> &str {
        "pattern"
    }

    fn main(&mut self, os: &Os) {
        let pages = 4;
        let base = os.allocate_memory(pages * PAGE_SIZE).unwrap();
        for page in 0..pages {
            os.write_byte(base + page * PAGE_SIZE, self.tag + page as u8);
            os.switch_process();
        }
        for page in 0..pages {
            let value = os.read_byte(base + page * PAGE_SIZE);
            assert_eq!(value, self.tag + page as u8, "page {} corrupted", page);
            os.switch_process();
        }
        self.events.send(format!("pattern {} intact", self.tag)).unwrap();
    }
}

#[test]
fn test_patterns_survive_swapping_under_memory_pressure() {
    // Two processes, four pages each, five frames: eight pages cannot all
    // be resident, so some must bounce through swap and still read back
    // intact. Five frames also keep a victim available on every fault,
    // since one process alone can hold at most four.
    let tmp = TempDir::new().unwrap();
    let (events, seen) = mpsc::channel();
    boot_with_frames(
        &tmp,
        5,
        25,
        vec![
            (
                Box::new(PatternWriter {
                    tag: 10,
                    events: events.clone(),
                }),
                Priority::Interactive,
            ),
            (
                Box::new(PatternWriter {
                    tag: 50,
                    events,
                }),
                Priority::Interactive,
            ),
        ],
    );

    let first = seen.recv_timeout(STEP).unwrap();
    let second = seen.recv_timeout(STEP).unwrap();
    let mut intact = vec![first, second];
    intact.sort();
    assert_eq!(intact, vec!["pattern 10 intact", "pattern 50 intact"]);
}

// ---------------------------------------------------------------------------
// Devices from userland
// ---------------------------------------------------------------------------

struct FileUser {
    path: String,
    events: mpsc::Sender<Vec<u8>>,
}

impl UserProgram for FileUser {
    fn name(&self) -> &str {
        "fileuser"
    }

    fn main(&mut self, os: &Os) {
        let fd = os.open(&format!("file {}", self.path)).unwrap();
        os.write(fd, b"persisted");
        os.seek(fd, 0);
        let data = os.read(fd, 9);
        os.close(fd);
        self.events.send(data).unwrap();
    }
}

#[test]
fn test_file_device_from_userland() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("user.bin").display().to_string();
    let (events, seen) = mpsc::channel();
    boot(
        &tmp,
        25,
        vec![(Box::new(FileUser { path, events }), Priority::Interactive)],
    );

    assert_eq!(seen.recv_timeout(STEP).unwrap(), b"persisted");
}
