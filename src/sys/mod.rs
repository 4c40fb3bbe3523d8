//! Process and scheduling subsystem

pub mod exec;
pub mod process;
pub mod scheduler;
