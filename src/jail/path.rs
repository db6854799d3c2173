//! Jail root path resolution
//!
//! A jail's root is the mountpoint of its base dataset, unless boot
//! environments are present, in which case it is the mountpoint of the single
//! active one. The result is memoized on the jail until [`Jail::reset_path`].

use crate::error::{Error, Result};
use crate::jail::Jail;
use crate::zfs::Storage;
use std::path::PathBuf;
use tracing::debug;

impl Jail {
    /// Resolve (once) and return the absolute root path of this jail
    pub fn resolve_path(&mut self, storage: &dyn Storage) -> Result<PathBuf> {
        if let Some(path) = &self.resolved_path {
            return Ok(path.clone());
        }

        let path = if self.boot_environments.is_empty() {
            storage.dataset_path(&self.dataset)?
        } else {
            let be = self.active_boot_environment()?;
            storage
                .dataset_path(&be)
                .map_err(|e| Error::NoActiveBootEnvironment {
                    dataset: self.dataset.clone(),
                    reason: format!("boot environment '{}' did not resolve: {}", be, e),
                })?
        };

        if !path.is_absolute() {
            let reason = format!("mountpoint '{}' is not absolute", path.display());
            return Err(if self.boot_environments.is_empty() {
                Error::DatasetNotFound {
                    dataset: self.dataset.clone(),
                    output: reason,
                }
            } else {
                Error::NoActiveBootEnvironment {
                    dataset: self.dataset.clone(),
                    reason,
                }
            });
        }

        debug!(jail = %self.name, path = %path.display(), "resolved root path");
        self.resolved_path = Some(path.clone());
        Ok(path)
    }

    /// Forget the memoized root path
    pub fn reset_path(&mut self) {
        self.resolved_path = None;
    }

    /// Cached root path, if already resolved
    pub fn path(&self) -> Option<&PathBuf> {
        self.resolved_path.as_ref()
    }

    /// Replace `boot_environments` with what the storage reports under the
    /// base dataset
    pub fn load_boot_environments(&mut self, storage: &dyn Storage) -> Result<()> {
        let tree = storage.dataset_metadata(&self.dataset)?;
        self.boot_environments = tree.boot_environments();
        debug!(
            jail = %self.name,
            count = self.boot_environments.len(),
            "loaded boot environments"
        );
        Ok(())
    }

    fn active_boot_environment(&self) -> Result<String> {
        let active: Vec<String> = self
            .boot_environments
            .iter()
            .filter(|(_, active)| **active)
            .map(|(name, _)| name.clone())
            .collect();

        match active.as_slice() {
            [] => Err(Error::NoActiveBootEnvironment {
                dataset: self.dataset.clone(),
                reason: "no boot environment is marked active".to_string(),
            }),
            [be] => Ok(be.clone()),
            _ => Err(Error::AmbiguousBootEnvironment {
                dataset: self.dataset.clone(),
                active,
            }),
        }
    }
}
