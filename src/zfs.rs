//! ZFS storage collaborator for jail roots
//!
//! Provides:
//! - Dataset mountpoint resolution
//! - Dataset tree listing with user properties
//! - Boot environment discovery under `<dataset>/ROOT`

use crate::error::{Error, Result};
use crate::process::{Invocation, Runner, ZFS};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// User property marking a boot environment as the active one
pub const BE_ACTIVE_PROPERTY: &str = "jailadmin:be_active";

/// Storage operations the lifecycle code depends on
pub trait Storage: Send + Sync {
    /// Absolute mountpoint of a dataset
    fn dataset_path(&self, dataset: &str) -> Result<PathBuf>;

    /// The dataset and all of its descendants with their user properties
    fn dataset_metadata(&self, dataset: &str) -> Result<Dataset>;
}

/// A node in a dataset tree
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dataset {
    /// Full dataset name (e.g., "tank/jails/web1/ROOT/default")
    pub name: String,
    /// Properties that are set on this dataset
    pub properties: BTreeMap<String, String>,
    /// Direct children
    pub children: Vec<Dataset>,
}

impl Dataset {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_child(mut self, child: Dataset) -> Self {
        self.children.push(child);
        self
    }

    /// Place a descendant under the child it belongs to, or directly here
    fn insert(&mut self, dataset: Dataset) {
        let parent = self
            .children
            .iter_mut()
            .find(|c| dataset.name.starts_with(&format!("{}/", c.name)));

        match parent {
            Some(parent) => parent.insert(dataset),
            None => self.children.push(dataset),
        }
    }

    /// Boot environments found under this dataset
    ///
    /// The first child whose name starts with `<name>/ROOT` holds the boot
    /// environments; each of its children carrying [`BE_ACTIVE_PROPERTY`]
    /// contributes one entry.
    pub fn boot_environments(&self) -> BTreeMap<String, bool> {
        let prefix = format!("{}/ROOT", self.name);

        self.children
            .iter()
            .find(|c| c.name.starts_with(&prefix))
            .map(|root| {
                root.children
                    .iter()
                    .filter_map(|be| {
                        be.properties
                            .get(BE_ACTIVE_PROPERTY)
                            .map(|v| (be.name.clone(), parse_bool(v).unwrap_or(false)))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Parse a boolean literal the way property values are written
fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

/// Storage backed by the zfs(8) command
pub struct ZfsStorage {
    runner: Arc<dyn Runner>,
}

impl ZfsStorage {
    pub fn new(runner: Arc<dyn Runner>) -> Self {
        Self { runner }
    }

    /// Build a dataset tree from `zfs list -H -o name,<property>` output
    fn parse_listing(dataset: &str, listing: &str) -> Result<Dataset> {
        let mut entries: Vec<Dataset> = Vec::new();

        for line in listing.lines().filter(|l| !l.trim().is_empty()) {
            let mut parts = line.split('\t');
            let name = parts.next().unwrap_or_default().trim();
            let mut entry = Dataset::new(name);
            if let Some(value) = parts.next() {
                let value = value.trim();
                // zfs prints "-" for an unset user property
                if value != "-" {
                    entry.properties.insert(BE_ACTIVE_PROPERTY.to_string(), value.to_string());
                }
            }
            entries.push(entry);
        }

        let root_index = entries
            .iter()
            .position(|d| d.name == dataset)
            .ok_or_else(|| Error::DatasetNotFound {
                dataset: dataset.to_string(),
                output: "dataset missing from zfs list output".to_string(),
            })?;
        let mut root = entries.remove(root_index);

        // Parents sort before their children
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        for entry in entries {
            if entry.name.starts_with(&format!("{}/", root.name)) {
                root.insert(entry);
            }
        }

        Ok(root)
    }
}

impl Storage for ZfsStorage {
    fn dataset_path(&self, dataset: &str) -> Result<PathBuf> {
        let output = self.runner.run(
            &Invocation::new(ZFS).args(["get", "-H", "-o", "value", "mountpoint", dataset]),
        )?;

        if !output.succeeded() {
            return Err(Error::DatasetNotFound {
                dataset: dataset.to_string(),
                output: output.text(),
            });
        }

        let mountpoint = output.stdout.trim().to_string();
        if !mountpoint.starts_with('/') {
            // "none", "legacy" or "-"
            return Err(Error::DatasetNotFound {
                dataset: dataset.to_string(),
                output: format!("dataset has no usable mountpoint ({})", mountpoint),
            });
        }

        Ok(PathBuf::from(mountpoint))
    }

    fn dataset_metadata(&self, dataset: &str) -> Result<Dataset> {
        let columns = format!("name,{}", BE_ACTIVE_PROPERTY);
        let output = self.runner.run(
            &Invocation::new(ZFS).args(["list", "-H", "-r", "-o", columns.as_str(), dataset]),
        )?;

        if !output.succeeded() {
            return Err(Error::DatasetNotFound {
                dataset: dataset.to_string(),
                output: output.text(),
            });
        }

        Self::parse_listing(dataset, &output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FakeRunner;
    use crate::process::Output;

    const LISTING: &str = "tank/jails/web1\t-\n\
tank/jails/web1/ROOT\t-\n\
tank/jails/web1/ROOT/2024-01\tfalse\n\
tank/jails/web1/ROOT/2024-02\ttrue\n\
tank/jails/web1/ROOT/scratch\t-\n\
tank/jails/web1/data\t-\n";

    #[test]
    fn test_parse_listing_builds_tree() {
        let tree = ZfsStorage::parse_listing("tank/jails/web1", LISTING).unwrap();
        assert_eq!(tree.name, "tank/jails/web1");
        assert_eq!(tree.children.len(), 2);
        assert_eq!(tree.children[0].name, "tank/jails/web1/ROOT");
        assert_eq!(tree.children[0].children.len(), 3);
        assert!(tree.properties.is_empty());
    }

    #[test]
    fn test_boot_environments_from_tree() {
        let tree = ZfsStorage::parse_listing("tank/jails/web1", LISTING).unwrap();
        let bes = tree.boot_environments();
        assert_eq!(bes.len(), 2);
        assert_eq!(bes.get("tank/jails/web1/ROOT/2024-01"), Some(&false));
        assert_eq!(bes.get("tank/jails/web1/ROOT/2024-02"), Some(&true));
    }

    #[test]
    fn test_boot_environments_absent() {
        let tree = Dataset::new("tank/jails/db").with_child(Dataset::new("tank/jails/db/data"));
        assert!(tree.boot_environments().is_empty());
    }

    #[test]
    fn test_unparseable_flag_is_inactive() {
        let tree = Dataset::new("t/j").with_child(
            Dataset::new("t/j/ROOT")
                .with_child(Dataset::new("t/j/ROOT/a").with_property(BE_ACTIVE_PROPERTY, "yes"))
                .with_child(Dataset::new("t/j/ROOT/b").with_property(BE_ACTIVE_PROPERTY, "T")),
        );
        let bes = tree.boot_environments();
        assert_eq!(bes.get("t/j/ROOT/a"), Some(&false));
        assert_eq!(bes.get("t/j/ROOT/b"), Some(&true));
    }

    #[test]
    fn test_dataset_path() {
        let runner = FakeRunner::new();
        runner.respond("mountpoint tank/jails/web1", Output::ok("/tank/jails/web1\n"));
        let storage = ZfsStorage::new(runner.clone());

        let path = storage.dataset_path("tank/jails/web1").unwrap();
        assert_eq!(path, PathBuf::from("/tank/jails/web1"));
        assert_eq!(
            runner.command_lines(),
            vec!["/sbin/zfs get -H -o value mountpoint tank/jails/web1"]
        );
    }

    #[test]
    fn test_dataset_path_missing() {
        let runner = FakeRunner::new();
        runner.respond(
            "mountpoint tank/nope",
            Output::failure(1, "cannot open 'tank/nope': dataset does not exist"),
        );
        let storage = ZfsStorage::new(runner);

        let err = storage.dataset_path("tank/nope").unwrap_err();
        assert!(matches!(err, Error::DatasetNotFound { .. }));
        assert!(err.output().unwrap().contains("does not exist"));
    }

    #[test]
    fn test_dataset_path_legacy_mountpoint() {
        let runner = FakeRunner::new();
        runner.respond("mountpoint tank/legacy", Output::ok("legacy\n"));
        let storage = ZfsStorage::new(runner);

        assert!(matches!(
            storage.dataset_path("tank/legacy"),
            Err(Error::DatasetNotFound { .. })
        ));
    }

    #[test]
    fn test_dataset_metadata() {
        let runner = FakeRunner::new();
        runner.respond("list -H -r", Output::ok(LISTING));
        let storage = ZfsStorage::new(runner.clone());

        let tree = storage.dataset_metadata("tank/jails/web1").unwrap();
        assert_eq!(tree.boot_environments().len(), 2);
        assert_eq!(
            runner.command_lines(),
            vec!["/sbin/zfs list -H -r -o name,jailadmin:be_active tank/jails/web1"]
        );
    }

    #[test]
    fn test_dataset_metadata_ignores_stderr() {
        let runner = FakeRunner::new();
        runner.respond(
            "list -H -r",
            Output {
                code: Some(0),
                stdout: LISTING.to_string(),
                combined: format!("{LISTING}tank/jails/web1/ROOT/2024-03: permission denied\n"),
            },
        );
        let storage = ZfsStorage::new(runner);

        let tree = storage.dataset_metadata("tank/jails/web1").unwrap();
        let mut names = Vec::new();
        let mut stack = vec![&tree];
        while let Some(dataset) = stack.pop() {
            names.push(dataset.name.clone());
            stack.extend(dataset.children.iter());
        }
        assert_eq!(names.len(), 6);
        assert!(!names.iter().any(|n| n.contains("permission denied")));
    }
}
