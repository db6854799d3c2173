//! Configuration file parsing for Gaoler
//!
//! Parses `gaoler.toml` manifests using serde

use crate::error::{Error, Result};
use crate::jail::{Jail, MountPoint};
use crate::network::{EpairDevice, Route};
use crate::process::{Runner, DEFAULT_TIMEOUT};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Load a manifest from a file and validate it
pub fn load(path: &Path) -> Result<GaolerConfig> {
    let content = fs::read_to_string(path).map_err(|e| Error::ConfigRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let config: GaolerConfig = toml::from_str(&content)?;
    config.validate()?;

    Ok(config)
}

/// Root configuration structure
#[derive(Debug, Default, Deserialize)]
pub struct GaolerConfig {
    /// Global configuration
    #[serde(default)]
    pub config: GlobalConfig,

    /// Jail definitions
    #[serde(default)]
    pub jails: Vec<JailDef>,
}

impl GaolerConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        let mut uuids = HashSet::new();

        for jail in &self.jails {
            if !names.insert(&jail.name) {
                return Err(Error::ConfigValidation(format!(
                    "Duplicate jail name: {}",
                    jail.name
                )));
            }

            if jail.dataset.trim().is_empty() {
                return Err(Error::ConfigValidation(format!(
                    "Jail '{}' has no dataset",
                    jail.name
                )));
            }

            if let Some(uuid) = &jail.uuid {
                let parsed = Uuid::parse_str(uuid).map_err(|source| Error::InvalidIdentifier {
                    uuid: uuid.clone(),
                    source,
                })?;
                if !uuids.insert(parsed) {
                    return Err(Error::ConfigValidation(format!(
                        "Duplicate jail uuid: {}",
                        uuid
                    )));
                }
            }

            let mut mounts = HashSet::new();
            for mount in &jail.mounts {
                if !mounts.insert((&mount.source, &mount.destination)) {
                    return Err(Error::ConfigValidation(format!(
                        "Duplicate mount {} -> {} for jail '{}'",
                        mount.source, mount.destination, jail.name
                    )));
                }
            }

            let mut devices = HashSet::new();
            for device in &jail.devices {
                if !devices.insert(device.id) {
                    return Err(Error::ConfigValidation(format!(
                        "Duplicate device epair{} for jail '{}'",
                        device.id, jail.name
                    )));
                }
            }
        }

        Ok(())
    }

    /// Get a jail definition by name
    pub fn get_jail(&self, name: &str) -> Option<&JailDef> {
        self.jails.iter().find(|j| j.name == name)
    }

    /// Jail definitions selected by an optional name
    pub fn select(&self, name: Option<&str>) -> Result<Vec<&JailDef>> {
        match name {
            Some(name) => self
                .get_jail(name)
                .map(|j| vec![j])
                .ok_or_else(|| Error::JailNotFound(name.to_string())),
            None => Ok(self.jails.iter().collect()),
        }
    }
}

/// Global configuration options
#[derive(Debug, Deserialize)]
pub struct GlobalConfig {
    /// Per-command timeout in seconds (0 disables it)
    #[serde(default = "default_command_timeout")]
    pub command_timeout: u64,

    /// Bridge for epair host sides when a device names none
    #[serde(default)]
    pub bridge: Option<String>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            command_timeout: default_command_timeout(),
            bridge: None,
        }
    }
}

impl GlobalConfig {
    pub fn timeout(&self) -> Option<Duration> {
        match self.command_timeout {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

fn default_command_timeout() -> u64 {
    DEFAULT_TIMEOUT.as_secs()
}

/// Jail definition
#[derive(Debug, Clone, Deserialize)]
pub struct JailDef {
    /// Jail name (unique)
    pub name: String,

    /// Identifier used as the supervisor's jail name
    #[serde(default)]
    pub uuid: Option<String>,

    /// Hostname (defaults to name)
    #[serde(default)]
    pub hostname: Option<String>,

    /// ZFS dataset backing the root
    pub dataset: String,

    /// Look for boot environments under `<dataset>/ROOT`
    #[serde(default)]
    pub boot_environments: bool,

    /// jail(8) parameters; an empty value renders as the bare key
    #[serde(default)]
    pub options: BTreeMap<String, String>,

    #[serde(default)]
    pub mounts: Vec<MountPoint>,

    #[serde(default)]
    pub routes: Vec<Route>,

    #[serde(default)]
    pub devices: Vec<DeviceDef>,
}

impl JailDef {
    /// Build the in-memory jail, wiring epair devices to `runner`
    pub fn to_jail(&self, global: &GlobalConfig, runner: &Arc<dyn Runner>) -> Result<Jail> {
        let mut jail = Jail::new(&self.name, &self.dataset);
        if let Some(uuid) = &self.uuid {
            jail.uuid = uuid.clone();
        }
        if let Some(hostname) = &self.hostname {
            jail.hostname = hostname.clone();
        }

        for (key, value) in &self.options {
            let value = Some(value.clone()).filter(|v| !v.is_empty());
            jail.set_option(key.clone(), value);
        }

        for mount in &self.mounts {
            jail.add_mount(mount.clone())?;
        }

        for route in &self.routes {
            jail.add_route(route.clone());
        }

        for device in &self.devices {
            let mut epair = EpairDevice::new(device.id, device.addresses.clone(), Arc::clone(runner));
            if let Some(bridge) = device.bridge.as_ref().or(global.bridge.as_ref()) {
                epair = epair.with_bridge(bridge);
            }
            jail.add_network_device(Arc::new(epair));
        }

        jail.mark_clean();
        Ok(jail)
    }
}

/// An epair device attached to a jail
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceDef {
    /// Epair unit number
    pub id: u32,

    /// Guest-side addresses, optionally with prefix length
    #[serde(default)]
    pub addresses: Vec<String>,

    /// Bridge for the host side (overrides `[config].bridge`)
    #[serde(default)]
    pub bridge: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FakeRunner;

    const FULL: &str = r#"
[config]
command_timeout = 60
bridge = "bridge0"

[[jails]]
name = "web1"
uuid = "4f0c2a8e-7d51-4c3b-9a6e-2b1f7c9d0e11"
hostname = "web1.local"
dataset = "tank/jails/web1"

[jails.options]
"allow.raw_sockets" = "1"
"mount.nodevfs" = ""

[[jails.mounts]]
source = "/proc"
destination = "proc"
driver = "procfs"
order = 0

[[jails.mounts]]
source = "/usr/ports"
destination = "usr/ports"
driver = "nullfs"
options = "ro"
order = 5

[[jails.routes]]
source = "default"
destination = "10.0.0.1"

[[jails.devices]]
id = 0
addresses = ["10.0.0.5/24", "2001:db8::5/64"]

[[jails.devices]]
id = 1
bridge = "bridge1"

[[jails]]
name = "db1"
dataset = "tank/jails/db1"
boot_environments = true
"#;

    #[test]
    fn test_parse_minimal_config() {
        let toml = r#"
[[jails]]
name = "test"
dataset = "tank/jails/test"
"#;

        let config: GaolerConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.jails.len(), 1);
        assert_eq!(config.config.command_timeout, 300);
        assert_eq!(config.config.timeout(), Some(Duration::from_secs(300)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_config() {
        let config: GaolerConfig = toml::from_str(FULL).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.config.timeout(), Some(Duration::from_secs(60)));

        let web1 = config.get_jail("web1").unwrap();
        assert_eq!(web1.mounts.len(), 2);
        assert_eq!(web1.mounts[1].options, "ro");
        assert_eq!(web1.mounts[0].driver.as_deref(), Some("procfs"));
        assert_eq!(web1.devices[0].addresses.len(), 2);

        let db1 = config.get_jail("db1").unwrap();
        assert!(db1.boot_environments);
        assert!(db1.uuid.is_none());
    }

    #[test]
    fn test_to_jail() {
        let config: GaolerConfig = toml::from_str(FULL).unwrap();
        let runner: Arc<dyn Runner> = FakeRunner::new();
        let jail = config
            .get_jail("web1")
            .unwrap()
            .to_jail(&config.config, &runner)
            .unwrap();

        assert_eq!(jail.uuid, "4f0c2a8e-7d51-4c3b-9a6e-2b1f7c9d0e11");
        assert_eq!(jail.effective_hostname(), "web1.local");
        assert_eq!(jail.options.get("mount.nodevfs"), Some(&None));
        assert_eq!(jail.options.get("allow.raw_sockets"), Some(&Some("1".to_string())));
        assert_eq!(jail.network_devices.len(), 2);
        assert!(jail.network_devices[0].has_ipv6());
        assert_eq!(jail.routes, vec![Route::new("default", "10.0.0.1")]);
        assert!(!jail.dirty);
    }

    #[test]
    fn test_device_bridge_falls_back_to_global() {
        let config: GaolerConfig = toml::from_str(FULL).unwrap();
        let runner = FakeRunner::new();
        let shared: Arc<dyn Runner> = runner.clone();
        let jail = config
            .get_jail("web1")
            .unwrap()
            .to_jail(&config.config, &shared)
            .unwrap();

        for device in &jail.network_devices {
            device.bring_host_online().unwrap();
        }
        let lines = runner.command_lines();
        assert!(lines.contains(&"/sbin/ifconfig bridge0 addm epair0a".to_string()));
        assert!(lines.contains(&"/sbin/ifconfig bridge1 addm epair1a".to_string()));
    }

    #[test]
    fn test_duplicate_name_error() {
        let toml = r#"
[[jails]]
name = "test"
dataset = "tank/a"

[[jails]]
name = "test"
dataset = "tank/b"
"#;

        let config: GaolerConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_uuid_error() {
        let toml = r#"
[[jails]]
name = "a"
uuid = "4f0c2a8e-7d51-4c3b-9a6e-2b1f7c9d0e11"
dataset = "tank/a"

[[jails]]
name = "b"
uuid = "4F0C2A8E-7D51-4C3B-9A6E-2B1F7C9D0E11"
dataset = "tank/b"
"#;

        let config: GaolerConfig = toml::from_str(toml).unwrap();
        assert!(matches!(config.validate(), Err(Error::ConfigValidation(_))));
    }

    #[test]
    fn test_invalid_uuid_error() {
        let toml = r#"
[[jails]]
name = "a"
uuid = "nope"
dataset = "tank/a"
"#;

        let config: GaolerConfig = toml::from_str(toml).unwrap();
        assert!(matches!(config.validate(), Err(Error::InvalidIdentifier { .. })));
    }

    #[test]
    fn test_empty_dataset_error() {
        let toml = r#"
[[jails]]
name = "a"
dataset = ""
"#;

        let config: GaolerConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_mount_and_device_errors() {
        let toml = r#"
[[jails]]
name = "a"
dataset = "tank/a"

[[jails.mounts]]
source = "/proc"
destination = "proc"

[[jails.mounts]]
source = "/proc"
destination = "proc"
order = 2
"#;
        let config: GaolerConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());

        let toml = r#"
[[jails]]
name = "a"
dataset = "tank/a"

[[jails.devices]]
id = 3

[[jails.devices]]
id = 3
"#;
        let config: GaolerConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_select() {
        let config: GaolerConfig = toml::from_str(FULL).unwrap();
        assert_eq!(config.select(None).unwrap().len(), 2);
        assert_eq!(config.select(Some("db1")).unwrap()[0].name, "db1");
        assert!(matches!(config.select(Some("nope")), Err(Error::JailNotFound(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let err = load(Path::new("/nonexistent/gaoler.toml")).unwrap_err();
        assert!(matches!(err, Error::ConfigRead { .. }));
    }
}
