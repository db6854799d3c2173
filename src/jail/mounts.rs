//! Mounting and unmounting a jail's auxiliary filesystems
//!
//! Mounts are made from the host against `<root>/<destination>`, so they do
//! not depend on the jail already running. Apply order is ascending `order`
//! (stable for ties); teardown is the exact reverse.
//!
//! A target is only used when it stays lexically under the root and no
//! existing component below the root is a symbolic link.

use crate::error::{Error, Result};
use crate::jail::MountPoint;
use crate::process::{Invocation, Runner, MOUNT, UMOUNT};
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Issues mount(8)/umount(8) for one jail root
pub struct MountSequencer<'a> {
    runner: &'a dyn Runner,
    root: &'a Path,
}

impl<'a> MountSequencer<'a> {
    pub fn new(runner: &'a dyn Runner, root: &'a Path) -> Self {
        Self { runner, root }
    }

    /// Host path of `destination` under the root, or why it cannot be used
    fn confine(&self, destination: &str) -> std::result::Result<PathBuf, String> {
        let mut parts = Vec::new();
        for component in Path::new(destination).components() {
            match component {
                Component::Normal(part) => parts.push(part),
                Component::RootDir | Component::CurDir => {}
                Component::ParentDir | Component::Prefix(_) => {
                    return Err(format!("destination '{}' escapes the jail root", destination));
                }
            }
        }

        let mut target = self.root.to_path_buf();
        let mut existing = true;
        for part in parts {
            target.push(part);
            if !existing {
                continue;
            }
            match fs::symlink_metadata(&target) {
                Ok(meta) if meta.file_type().is_symlink() => {
                    return Err(format!("'{}' is a symbolic link", target.display()));
                }
                Ok(_) => {}
                Err(_) => existing = false,
            }
        }

        Ok(target)
    }

    fn mount_target(&self, destination: &str) -> Result<PathBuf> {
        self.confine(destination).map_err(|output| Error::Mount {
            target: self.root.join(destination.trim_start_matches('/')),
            output,
        })
    }

    fn unmount_target(&self, destination: &str) -> Result<PathBuf> {
        self.confine(destination).map_err(|output| Error::Unmount {
            target: self.root.join(destination.trim_start_matches('/')),
            output,
        })
    }

    /// Mount a fresh devfs at `<root>/dev`
    pub fn mount_devfs(&self) -> Result<()> {
        let target = self.mount_target("dev")?;
        let invocation = Invocation::new(MOUNT)
            .args(["-t", "devfs", "devfs"])
            .arg(target.to_string_lossy());
        self.mount_at(invocation, target)
    }

    pub fn unmount_devfs(&self) -> Result<()> {
        self.unmount_at(self.unmount_target("dev")?)
    }

    pub fn mount(&self, mount: &MountPoint) -> Result<()> {
        let target = self.mount_target(&mount.destination)?;

        let mut invocation = Invocation::new(MOUNT);
        if let Some(driver) = mount.driver.as_deref().filter(|d| !d.is_empty()) {
            invocation = invocation.arg("-t").arg(driver);
        }
        if !mount.options.is_empty() {
            invocation = invocation.arg("-o").arg(&mount.options);
        }
        let invocation = invocation.arg(&mount.source).arg(target.to_string_lossy());

        self.mount_at(invocation, target)
    }

    pub fn unmount(&self, mount: &MountPoint) -> Result<()> {
        self.unmount_at(self.unmount_target(&mount.destination)?)
    }

    fn mount_at(&self, invocation: Invocation, target: PathBuf) -> Result<()> {
        let output = self.runner.run(&invocation)?;
        if !output.succeeded() {
            return Err(Error::Mount {
                target,
                output: output.text(),
            });
        }
        debug!(target = %target.display(), "mounted");
        Ok(())
    }

    fn unmount_at(&self, target: PathBuf) -> Result<()> {
        let output = self
            .runner
            .run(&Invocation::new(UMOUNT).arg(target.to_string_lossy()))?;
        if !output.succeeded() {
            return Err(Error::Unmount {
                target,
                output: output.text(),
            });
        }
        debug!(target = %target.display(), "unmounted");
        Ok(())
    }
}

/// Mounts in the order they are applied
pub fn apply_order(mounts: &[MountPoint]) -> Vec<&MountPoint> {
    let mut ordered: Vec<&MountPoint> = mounts.iter().collect();
    // sort_by_key is stable
    ordered.sort_by_key(|m| m.order);
    ordered
}

/// Mounts in the order they are torn down
pub fn teardown_order(mounts: &[MountPoint]) -> Vec<&MountPoint> {
    let mut ordered = apply_order(mounts);
    ordered.reverse();
    ordered
}
