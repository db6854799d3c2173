//! Gaoler - FreeBSD jail lifecycle orchestrator
//!
//! Brings jails online and offline by UUID: resolves the root path (with
//! ZFS boot environment selection), mounts devfs and auxiliary filesystems
//! in order, drives the jail supervisor, and wires up VNET networking.
//!
//! All external effects go through the [`process::Runner`],
//! [`zfs::Storage`] and [`network::NetworkDevice`] traits. Recording
//! implementations of each live in `fakes`, built for tests or with the
//! `testing` feature.

pub mod cli;
pub mod error;
#[cfg(any(test, feature = "testing"))]
pub mod fakes;
pub mod jail;
pub mod manifest;
pub mod network;
pub mod orchestrator;
pub mod process;
pub mod zfs;

pub use error::{Error, Result};
pub use jail::{Jail, JailOption, MountPoint, State};
pub use orchestrator::{Orchestrator, StartOutcome, StopOutcome};
