//! simkern: an operating-system kernel simulator
//!
//! A user-space simulation of a small OS kernel:
//! - Cooperative execution hand-off (one host thread per simulated process)
//! - Priority-tiered lottery scheduling with quantum-based demotion
//! - Paged virtual memory with a 2-entry TLB and disk-backed swap
//! - Message-passing IPC through per-process mailboxes
//! - A tiny device layer (files, seedable random source) behind a VFS
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     User Programs                           │
//! │  ┌──────────┐ ┌──────────┐ ┌──────────┐ ┌────────────────┐ │
//! │  │   Ping   │ │   Pong   │ │  Memory  │ │  Idle / yours  │ │
//! │  │          │ │          │ │ Exerciser│ │                │ │
//! │  └────┬─────┘ └────┬─────┘ └────┬─────┘ └───────┬────────┘ │
//! │       │            │            │               │          │
//! │  ═════╪════════════╪════════════╪═══════════════╪════════  │
//! │       │   syscalls via Os handle (KernelChannel)│          │
//! │       ▼            ▼            ▼               ▼          │
//! ├─────────────────────────────────────────────────────────────┤
//! │                       Kernel                                │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────────┐  │
//! │  │  Scheduler   │  │    Memory    │  │       VFS        │  │
//! │  │ (lottery +   │  │   Manager    │  │ (file / random   │  │
//! │  │  sleep set)  │  │ (pages+swap) │  │    devices)      │  │
//! │  └──────────────┘  └──────────────┘  └──────────────────┘  │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────────┐  │
//! │  │ ProcessTable │  │   Hardware   │  │  Quantum Timer   │  │
//! │  │   (arena)    │  │ (RAM + TLB)  │  │    (thread)      │  │
//! │  └──────────────┘  └──────────────┘  └──────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! At most one simulated process executes userland code at a time. Every
//! syscall parks the calling thread on its run gate; the kernel thread
//! services the request and releases exactly one gate. The quantum timer
//! only flips atomics, so preemption still requires the preempted process
//! to reach a `cooperate()` point.

#![warn(missing_docs)]

pub mod config;
pub mod dev;
pub mod hw;
pub mod ipc;
pub mod kernel;
pub mod mm;
pub mod os;
pub mod syscall;
pub mod sys;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Page size in bytes (also the frame size)
pub const PAGE_SIZE: usize = 1024;

/// Virtual pages per process
pub const PAGES_PER_PROCESS: usize = 100;

/// Default number of physical frames
pub const PHYSICAL_FRAMES: usize = 1024;

/// Entries in the hardware TLB
pub const TLB_SLOTS: usize = 2;

/// Open-device slots per process (and per device table)
pub const MAX_OPEN_DEVICES: usize = 10;

/// Kernel result type
pub type KernelResult<T> = Result<T, KernelError>;

/// Kernel error types
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KernelError {
    /// Malformed request (bad size, bad pointer, bad descriptor)
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// No contiguous run of free virtual pages
    #[error("no contiguous run of free virtual pages")]
    OutOfAddressSpace,
    /// All frames in use and swap-out could not reclaim one
    #[error("out of physical memory and swap reclaim failed")]
    OutOfMemory,
    /// Access to a virtual page with no mapping
    #[error("segmentation fault at virtual page {0}")]
    SegmentationFault(usize),
    /// Scheduler found every queue empty and no idle process registered
    #[error("no runnable process")]
    NoRunnableProcess,
    /// Device or backing store could not be opened
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),
}
