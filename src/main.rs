//! simkern CLI
//!
//! Boots the simulated kernel with a small set of demo programs and lets
//! it run for a while:
//!
//! ```bash
//! # Default workload, info logging
//! simkern
//!
//! # Deterministic run with a short quantum and verbose paging logs
//! simkern -vv --seed 7 --quantum-ms 50 --duration-secs 5
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use simkern::config::KernelConfig;
use simkern::ipc::Message;
use simkern::kernel::Kernel;
use simkern::os::{Os, UserProgram};
use simkern::sys::process::Priority;
use simkern::PAGE_SIZE;

/// simkern - operating-system kernel simulator
#[derive(Parser)]
#[command(name = "simkern")]
#[command(version)]
#[command(about = "Boot the kernel simulator with a demo workload", long_about = None)]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Data directory for the swap file
    #[arg(short, long, env = "SIMKERN_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Number of physical frames
    #[arg(long)]
    frames: Option<usize>,

    /// Quantum in milliseconds (0 disables preemption)
    #[arg(long)]
    quantum_ms: Option<u64>,

    /// Seed for the scheduler lottery and paging decisions
    #[arg(long)]
    seed: Option<u64>,

    /// How long to let the simulation run
    #[arg(long, default_value = "10")]
    duration_secs: u64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .init();

    let mut config = KernelConfig::default();
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(frames) = cli.frames {
        config.physical_frames = frames;
    }
    if let Some(quantum_ms) = cli.quantum_ms {
        config.quantum_ms = quantum_ms;
    }
    config.deterministic_seed = cli.seed;

    tracing::info!("booting simkern v{}", simkern::VERSION);
    Kernel::boot(config, Box::new(InitProgram), Priority::Interactive)?;

    std::thread::sleep(Duration::from_secs(cli.duration_secs));
    tracing::info!("simulation window over, shutting down");
    Ok(())
}

/// First process: spawns the demo workload, then exits
struct InitProgram;

impl UserProgram for InitProgram {
    fn name(&self) -> &str {
        "init"
    }

    fn main(&mut self, os: &Os) {
        os.create_process(Box::new(PongProgram), Priority::Interactive);
        os.create_process(Box::new(PingProgram), Priority::Interactive);
        os.create_process(Box::new(MemoryProgram), Priority::Background);
        os.create_process(Box::new(SleeperProgram), Priority::RealTime);
        tracing::info!("init: demo workload spawned");
    }
}

/// Sends numbered pings to the pong process and prints its replies
struct PingProgram;

impl UserProgram for PingProgram {
    fn name(&self) -> &str {
        "ping"
    }

    fn main(&mut self, os: &Os) {
        // Pong may not have been looked-up-able yet; yield until it shows
        let pong = loop {
            match os.pid_by_name("pong") {
                Some(pid) => break pid,
                None => os.switch_process(),
            }
        };

        for round in 0..5i32 {
            os.send_message(Message::to(pong, round, format!("ping {}", round).into_bytes()));
            let reply = os.wait_for_message();
            tracing::info!(
                "ping: round {} answered by pid {} ({})",
                reply.kind,
                reply.sender,
                String::from_utf8_lossy(&reply.payload)
            );
            os.cooperate();
        }
    }
}

/// Echoes every message back to its sender
struct PongProgram;

impl UserProgram for PongProgram {
    fn name(&self) -> &str {
        "pong"
    }

    fn main(&mut self, os: &Os) {
        loop {
            let message = os.wait_for_message();
            os.send_message(Message::to(message.sender, message.kind, b"pong".to_vec()));
            os.cooperate();
        }
    }
}

/// Allocates a few pages, checks a pattern written through the TLB, frees
struct MemoryProgram;

impl UserProgram for MemoryProgram {
    fn name(&self) -> &str {
        "memhog"
    }

    fn main(&mut self, os: &Os) {
        let size = 4 * PAGE_SIZE;
        let base = match os.allocate_memory(size) {
            Ok(base) => base,
            Err(e) => {
                tracing::warn!("memhog: allocation failed: {}", e);
                return;
            }
        };

        for page in 0..4 {
            os.write_byte(base + page * PAGE_SIZE, page as u8 + 1);
            os.cooperate();
        }
        for page in 0..4 {
            let value = os.read_byte(base + page * PAGE_SIZE);
            assert_eq!(value, page as u8 + 1);
        }
        tracing::info!("memhog: pattern survived {} pages", 4);

        if let Err(e) = os.free_memory(base, size) {
            tracing::warn!("memhog: free failed: {}", e);
        }
    }
}

/// Sleeps in a loop, exercising the sleep set and wakeups
struct SleeperProgram;

impl UserProgram for SleeperProgram {
    fn name(&self) -> &str {
        "sleeper"
    }

    fn main(&mut self, os: &Os) {
        for _ in 0..20 {
            os.sleep(Duration::from_millis(200));
        }
        tracing::info!("sleeper: done napping");
    }
}
