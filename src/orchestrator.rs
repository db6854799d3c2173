//! Jail lifecycle orchestration
//!
//! Sequences validation, path resolution, devfs, the jail supervisor,
//! auxiliary mounts, guest init and networking for a single jail:
//!
//! - `start`: devfs -> `jail -c` -> mounts (ascending) -> `/etc/rc`, with
//!   every completed step undone in reverse if a later one fails
//! - `stop`: `jail -r` -> mounts (descending) -> devices offline -> devfs
//! - `boot`: host networking -> `start` -> guest networking -> IPv6 fix-up
//!
//! Liveness is always probed with jls(8); the in-memory lifecycle state is
//! reconciled against that probe before anything else happens.

use crate::error::{Error, Result};
use crate::jail::mounts::{apply_order, teardown_order};
use crate::jail::{Jail, MountPoint, MountSequencer, State};
use crate::network::{self, release_devices};
use crate::process::{Invocation, Runner, JAIL, JLS};
use crate::zfs::Storage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Guest startup script run through jexec
const GUEST_SHELL: &str = "/bin/sh";
const GUEST_RC: &str = "/etc/rc";

/// Result of a successful `start`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// The jail was created and initialized by this call
    Started,
    /// The jail was already running; nothing was done
    AlreadyOnline,
}

/// Result of a successful `stop`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The jail was removed and torn down by this call
    Stopped,
    /// The jail was not running; nothing was done
    AlreadyOffline,
    /// The supervisor refused removal because the jail had already exited;
    /// the rest of the teardown ran
    SupervisorGone,
}

/// Inverse of a completed start step
#[derive(Debug)]
enum Undo {
    UnmountDevfs,
    RemoveJail,
    Unmount(MountPoint),
}

/// Drives jails through their lifecycle using injected collaborators
pub struct Orchestrator {
    runner: Arc<dyn Runner>,
    storage: Arc<dyn Storage>,
}

impl Orchestrator {
    pub fn new(runner: Arc<dyn Runner>, storage: Arc<dyn Storage>) -> Self {
        Self { runner, storage }
    }

    pub fn runner(&self) -> &dyn Runner {
        self.runner.as_ref()
    }

    pub fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }

    /// Check identity and root path, assigning a UUID if the jail has none
    ///
    /// Runs before every lifecycle transition. Returns the resolved root.
    pub fn validate(&self, jail: &mut Jail) -> Result<PathBuf> {
        if jail.uuid.is_empty() {
            jail.uuid = Uuid::new_v4().to_string();
            jail.dirty = true;
            debug!(jail = %jail.name, uuid = %jail.uuid, "assigned identifier");
        }

        Uuid::parse_str(&jail.uuid).map_err(|source| Error::InvalidIdentifier {
            uuid: jail.uuid.clone(),
            source,
        })?;

        jail.check_mounts()?;

        jail.resolve_path(self.storage.as_ref())
            .map_err(|e| Error::InvalidPath {
                dataset: jail.dataset.clone(),
                source: Box::new(e),
            })
    }

    /// Live supervisor probe: `jls -j <uuid>` exiting zero means online
    pub fn is_online(&self, jail: &Jail) -> bool {
        if jail.uuid.is_empty() {
            return false;
        }

        match self.runner.run(&probe_invocation(&jail.uuid)) {
            Ok(output) => output.succeeded(),
            Err(e) => {
                warn!(jail = %jail.name, error = %e, "liveness probe failed");
                false
            }
        }
    }

    /// Probe the jail and reconcile its tracked state
    pub fn status(&self, jail: &mut Jail) -> State {
        let online = self.is_online(jail);
        if let Err(e) = jail.lifecycle.observe(online) {
            warn!(jail = %jail.name, error = %e, "could not reconcile lifecycle state");
        }

        if online { State::Online } else { State::Offline }
    }

    /// Bring the jail online
    ///
    /// Idempotent: an already running jail is left untouched. If any step
    /// fails, everything done so far is undone in reverse before the error
    /// is returned.
    pub fn start(&self, jail: &mut Jail) -> Result<StartOutcome> {
        let root = self.validate(jail)?;

        let online = self.is_online(jail);
        jail.lifecycle.observe(online)?;
        if online {
            info!(jail = %jail.name, uuid = %jail.uuid, "already online");
            return Ok(StartOutcome::AlreadyOnline);
        }

        jail.lifecycle.start()?;
        info!(jail = %jail.name, uuid = %jail.uuid, path = %root.display(), "starting");

        let mut undo = Vec::new();
        match self.bring_up(jail, &root, &mut undo) {
            Ok(()) => {
                jail.lifecycle.started()?;
                info!(jail = %jail.name, uuid = %jail.uuid, "online");
                Ok(StartOutcome::Started)
            }
            Err(e) => {
                warn!(jail = %jail.name, error = %e, steps = undo.len(), "start failed, rolling back");
                jail.lifecycle.fail().ok();
                if self.unwind(&jail.uuid, &root, undo) {
                    jail.lifecycle.recover().ok();
                }
                Err(e)
            }
        }
    }

    fn bring_up(&self, jail: &Jail, root: &Path, undo: &mut Vec<Undo>) -> Result<()> {
        let mounts = MountSequencer::new(self.runner.as_ref(), root);

        mounts.mount_devfs()?;
        undo.push(Undo::UnmountDevfs);

        let output = self.runner.run(&self.create_invocation(jail, root))?;
        if !output.succeeded() {
            return Err(Error::JailCreation {
                jail: jail.uuid.clone(),
                output: output.text(),
            });
        }
        undo.push(Undo::RemoveJail);
        debug!(jail = %jail.name, "supervisor jail created");

        for mount in apply_order(&jail.mounts) {
            mounts.mount(mount)?;
            undo.push(Undo::Unmount(mount.clone()));
        }

        let output = self
            .runner
            .run(&Invocation::in_jail(&jail.uuid, GUEST_SHELL).arg(GUEST_RC))?;
        if !output.succeeded() {
            return Err(Error::GuestInit {
                jail: jail.uuid.clone(),
                output: output.text(),
            });
        }

        Ok(())
    }

    /// `jail -c vnet name=<uuid> host.hostname=<host> path=<root> persist [options...]`
    fn create_invocation(&self, jail: &Jail, root: &Path) -> Invocation {
        Invocation::new(JAIL)
            .args(["-c", "vnet"])
            .arg(format!("name={}", jail.uuid))
            .arg(format!("host.hostname={}", jail.effective_hostname()))
            .arg(format!("path={}", root.display()))
            .arg("persist")
            .args(jail.jail_options().map(|o| o.to_arg()))
    }

    /// Run the undo steps most recent first; returns whether all succeeded
    fn unwind(&self, jail_id: &str, root: &Path, undo: Vec<Undo>) -> bool {
        let mounts = MountSequencer::new(self.runner.as_ref(), root);
        let mut clean = true;

        for step in undo.into_iter().rev() {
            let result = match &step {
                Undo::Unmount(mount) => mounts.unmount(mount),
                Undo::RemoveJail => self.remove_jail(jail_id),
                Undo::UnmountDevfs => mounts.unmount_devfs(),
            };
            if let Err(e) = result {
                warn!(step = ?step, error = %e, "rollback step failed");
                clean = false;
            }
        }

        clean
    }

    fn remove_jail(&self, jail_id: &str) -> Result<()> {
        let output = self.runner.run(&Invocation::new(JAIL).arg("-r").arg(jail_id))?;
        if !output.succeeded() {
            return Err(Error::JailRemoval {
                jail: jail_id.to_string(),
                output: output.text(),
            });
        }
        Ok(())
    }

    /// Take the jail offline
    ///
    /// A jail that is not running is left untouched.
    pub fn stop(&self, jail: &mut Jail) -> Result<StopOutcome> {
        let root = self.validate(jail)?;

        let online = self.is_online(jail);
        jail.lifecycle.observe(online)?;
        if !online {
            info!(jail = %jail.name, uuid = %jail.uuid, "already offline");
            return Ok(StopOutcome::AlreadyOffline);
        }

        jail.lifecycle.stop()?;
        info!(jail = %jail.name, uuid = %jail.uuid, "stopping");

        match self.tear_down(jail, &root) {
            Ok(outcome) => {
                jail.lifecycle.stopped()?;
                info!(jail = %jail.name, uuid = %jail.uuid, outcome = ?outcome, "offline");
                Ok(outcome)
            }
            Err(e) => {
                jail.lifecycle.fail().ok();
                Err(e)
            }
        }
    }

    fn tear_down(&self, jail: &Jail, root: &Path) -> Result<StopOutcome> {
        let mut outcome = StopOutcome::Stopped;

        if let Err(e) = self.remove_jail(&jail.uuid) {
            // Only a probe that ran and found nothing proves the jail is gone
            match self.runner.run(&probe_invocation(&jail.uuid)) {
                Ok(probe) if !probe.succeeded() => {}
                Ok(_) => return Err(e),
                Err(probe) => {
                    warn!(jail = %jail.name, error = %probe, "liveness probe failed after removal error");
                    return Err(e);
                }
            }
            warn!(jail = %jail.name, error = %e, "jail exited before removal, continuing teardown");
            outcome = StopOutcome::SupervisorGone;
        }

        let mounts = MountSequencer::new(self.runner.as_ref(), root);
        for mount in teardown_order(&jail.mounts) {
            mounts.unmount(mount)?;
        }

        for device in &jail.network_devices {
            device.bring_offline()?;
        }

        mounts.unmount_devfs()?;

        Ok(outcome)
    }

    /// Materialize the host side of every network device
    pub fn prepare_host_networking(&self, jail: &Jail) -> Result<()> {
        network::prepare_host_networking(&jail.network_devices)
    }

    /// Attach devices inside the jail, bring up loopback and install routes
    pub fn prepare_guest_networking(&self, jail: &Jail) -> Result<()> {
        network::prepare_guest_networking(
            self.runner.as_ref(),
            &jail.uuid,
            &jail.network_devices,
            &jail.routes,
        )
    }

    /// Post-start IPv6 fix-up; nothing is unwound on failure
    pub fn post_start(&self, jail: &Jail) -> Result<()> {
        network::post_start(self.runner.as_ref(), &jail.uuid, &jail.network_devices)
    }

    /// Full bring-up: host networking, start, guest networking, post-start
    ///
    /// Host devices are released if host networking or the start fails, but
    /// not when another caller brought the jail online in the meantime.
    /// A guest networking failure stops the jail again before returning.
    pub fn boot(&self, jail: &mut Jail) -> Result<StartOutcome> {
        self.validate(jail)?;
        if self.is_online(jail) {
            jail.lifecycle.observe(true)?;
            info!(jail = %jail.name, uuid = %jail.uuid, "already online");
            return Ok(StartOutcome::AlreadyOnline);
        }

        self.prepare_host_networking(jail)?;

        match self.start(jail) {
            Ok(StartOutcome::Started) => {}
            Ok(StartOutcome::AlreadyOnline) => {
                // Someone else started it between the probes; its devices are in use
                warn!(jail = %jail.name, uuid = %jail.uuid, "jail came online during host networking");
                return Ok(StartOutcome::AlreadyOnline);
            }
            Err(e) => {
                release_devices(&jail.network_devices);
                return Err(e);
            }
        }

        if let Err(e) = self.prepare_guest_networking(jail) {
            warn!(jail = %jail.name, error = %e, "guest networking failed, stopping jail");
            if let Err(stop) = self.stop(jail) {
                warn!(jail = %jail.name, error = %stop, "failed to stop jail");
            }
            return Err(e);
        }

        self.post_start(jail)?;
        Ok(StartOutcome::Started)
    }

    pub fn create_snapshot(&self, _jail: &Jail, _name: &str) -> Result<()> {
        Err(Error::Unsupported("Snapshot creation"))
    }

    pub fn restore_snapshot(&self, _jail: &Jail, _name: &str) -> Result<()> {
        Err(Error::Unsupported("Snapshot restore"))
    }

    pub fn delete_snapshot(&self, _jail: &Jail, _name: &str) -> Result<()> {
        Err(Error::Unsupported("Snapshot deletion"))
    }

    pub fn delete(&self, _jail: &Jail) -> Result<()> {
        Err(Error::Unsupported("Deletion"))
    }

    pub fn archive(&self, _jail: &Jail) -> Result<()> {
        Err(Error::Unsupported("Archiving"))
    }
}

/// `jls -j <uuid>`
fn probe_invocation(jail_id: &str) -> Invocation {
    Invocation::new(JLS).arg("-j").arg(jail_id)
}
