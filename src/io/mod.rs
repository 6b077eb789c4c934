//! I/O utilities for the relay phase

mod copy;

pub use copy::{relay_with_idle, CopyResult};

/// Default per-session buffer size (16 KiB)
pub const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;
