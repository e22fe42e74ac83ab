//! Per-identity compose buffers with a crash-recovery file.

mod manager;

pub use manager::DraftManager;
