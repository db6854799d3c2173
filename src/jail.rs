//! Jail management module
//!
//! This module provides:
//! - The jail aggregate and its mount/option records
//! - Root path resolution with boot environment selection
//! - The mount sequencer
//! - State machine for jail lifecycle tracking

pub mod mounts;
pub mod path;
pub mod state;
pub mod types;

// Re-exports
pub use mounts::MountSequencer;
pub use state::{Lifecycle, State};
pub use types::{Jail, JailOption, MountPoint};
