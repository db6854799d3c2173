//! Jail aggregate and its records

use crate::error::{Error, Result};
use crate::jail::state::{Lifecycle, State};
use crate::network::{NetworkDevice, Route};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// One auxiliary filesystem attached to a jail
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MountPoint {
    /// What to mount (device, directory or pseudo-filesystem name)
    pub source: String,
    /// Mountpoint relative to the jail root
    pub destination: String,
    /// Mount flags passed with `-o`
    #[serde(default)]
    pub options: String,
    /// Filesystem type passed with `-t`
    #[serde(default)]
    pub driver: Option<String>,
    /// Apply order, ascending
    #[serde(default)]
    pub order: i32,
}

impl MountPoint {
    pub fn new(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            options: String::new(),
            driver: None,
            order: 0,
        }
    }

    pub fn driver(mut self, driver: impl Into<String>) -> Self {
        self.driver = Some(driver.into());
        self
    }

    pub fn options(mut self, options: impl Into<String>) -> Self {
        self.options = options.into();
        self
    }

    pub fn order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    fn key(&self) -> (&str, &str) {
        (&self.source, &self.destination)
    }
}

/// One jail(8) parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JailOption {
    pub key: String,
    pub value: Option<String>,
}

impl JailOption {
    /// Render as a jail(8) argument: `key=value`, or the bare key
    pub fn to_arg(&self) -> String {
        match &self.value {
            Some(value) => format!("{}={}", self.key, value),
            None => self.key.clone(),
        }
    }
}

/// A FreeBSD jail managed by UUID
#[derive(Debug, Default)]
pub struct Jail {
    /// Version-4 UUID, used as the supervisor's jail name; empty until assigned
    pub uuid: String,
    pub name: String,
    /// Falls back to `name` when empty
    pub hostname: String,
    /// ZFS dataset backing the root
    pub dataset: String,
    /// Boot environment dataset -> active flag
    pub boot_environments: BTreeMap<String, bool>,
    pub mounts: Vec<MountPoint>,
    /// jail(8) parameters applied verbatim at creation
    pub options: BTreeMap<String, Option<String>>,
    pub network_devices: Vec<Arc<dyn NetworkDevice>>,
    pub routes: Vec<Route>,
    /// Unsaved in-memory changes
    pub dirty: bool,

    pub(crate) resolved_path: Option<PathBuf>,
    pub(crate) lifecycle: Lifecycle,
}

impl Jail {
    pub fn new(name: impl Into<String>, dataset: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dataset: dataset.into(),
            ..Default::default()
        }
    }

    pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = uuid.into();
        self
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// Hostname handed to the supervisor
    pub fn effective_hostname(&self) -> &str {
        if self.hostname.is_empty() {
            &self.name
        } else {
            &self.hostname
        }
    }

    /// Last lifecycle state this process observed or drove
    pub fn state(&self) -> State {
        self.lifecycle.state()
    }

    /// Add a mount, rejecting a duplicate (source, destination) pair
    pub fn add_mount(&mut self, mount: MountPoint) -> Result<()> {
        if self.mounts.iter().any(|m| m.key() == mount.key()) {
            return Err(Error::ConfigValidation(format!(
                "Duplicate mount {} -> {} for jail '{}'",
                mount.source, mount.destination, self.name
            )));
        }
        self.mounts.push(mount);
        self.dirty = true;
        Ok(())
    }

    pub fn remove_mount(&mut self, source: &str, destination: &str) -> Option<MountPoint> {
        let index = self
            .mounts
            .iter()
            .position(|m| m.key() == (source, destination))?;
        self.dirty = true;
        Some(self.mounts.remove(index))
    }

    pub fn set_option(&mut self, key: impl Into<String>, value: Option<String>) {
        self.options.insert(key.into(), value);
        self.dirty = true;
    }

    pub fn remove_option(&mut self, key: &str) -> Option<JailOption> {
        let value = self.options.remove(key)?;
        self.dirty = true;
        Some(JailOption {
            key: key.to_string(),
            value,
        })
    }

    /// Options in the order they are passed to jail(8)
    pub fn jail_options(&self) -> impl Iterator<Item = JailOption> + '_ {
        self.options.iter().map(|(key, value)| JailOption {
            key: key.clone(),
            value: value.clone(),
        })
    }

    pub fn add_network_device(&mut self, device: Arc<dyn NetworkDevice>) {
        self.network_devices.push(device);
        self.dirty = true;
    }

    pub fn add_route(&mut self, route: Route) {
        self.routes.push(route);
        self.dirty = true;
    }

    /// Reject duplicate (source, destination) mounts
    pub fn check_mounts(&self) -> Result<()> {
        for (i, mount) in self.mounts.iter().enumerate() {
            if self.mounts[..i].iter().any(|m| m.key() == mount.key()) {
                return Err(Error::ConfigValidation(format!(
                    "Duplicate mount {} -> {} for jail '{}'",
                    mount.source, mount.destination, self.name
                )));
            }
        }
        Ok(())
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }
}
