//! Shared infrastructure utilities for Tether.
//!
//! - **`atomic_write`**: crash-safe file persistence (temp + rename)
//! - **`diff`**: line diff stats and compact unified diffs

pub mod atomic_write;
pub mod diff;

pub use atomic_write::{PersistMode, atomic_write, atomic_write_with_mode, recover_bak_file};
pub use diff::{DiffStats, compute_diff_stats, format_unified_diff};
