//! Recording fakes for the external collaborators
//!
//! - [`FakeRunner`] records every invocation and simulates the jail
//!   supervisor (`jail -c`, `jail -r`, `jls -j`), with canned responses
//!   (or runner errors) for anything else.
//! - [`FakeStorage`] serves dataset paths and trees from memory and counts
//!   lookups.
//! - [`FakeDevice`] logs device transitions to a shared event log.

use crate::error::{Error, Result};
use crate::network::NetworkDevice;
use crate::process::{Invocation, Output, Runner, JAIL, JLS};
use crate::zfs::{Dataset, Storage};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// A runner that records invocations instead of executing them
#[derive(Default)]
pub struct FakeRunner {
    calls: Mutex<Vec<Invocation>>,
    online: Mutex<BTreeSet<String>>,
    responses: Mutex<Vec<Canned>>,
}

struct Canned {
    needle: String,
    reply: Reply,
    once: bool,
}

enum Reply {
    Output(Output),
    /// The command could not be run to completion
    Error(fn() -> Error),
}

impl FakeRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Answer any invocation whose command line contains `needle` with `output`
    ///
    /// Responses take precedence over the simulated supervisor; the first
    /// registered match wins.
    pub fn respond(&self, needle: impl Into<String>, output: Output) {
        self.push_response(needle.into(), Reply::Output(output), false);
    }

    /// Like [`FakeRunner::respond`], but only for the next matching invocation
    pub fn respond_once(&self, needle: impl Into<String>, output: Output) {
        self.push_response(needle.into(), Reply::Output(output), true);
    }

    /// Fail matching invocations with a runner error (spawn failure, timeout)
    pub fn respond_err(&self, needle: impl Into<String>, error: fn() -> Error) {
        self.push_response(needle.into(), Reply::Error(error), false);
    }

    /// Like [`FakeRunner::respond_err`], but only for the next matching invocation
    pub fn respond_err_once(&self, needle: impl Into<String>, error: fn() -> Error) {
        self.push_response(needle.into(), Reply::Error(error), true);
    }

    fn push_response(&self, needle: String, reply: Reply, once: bool) {
        self.responses.lock().unwrap().push(Canned {
            needle,
            reply,
            once,
        });
    }

    /// Pretend a jail with this name is already running
    pub fn set_online(&self, name: &str) {
        self.online.lock().unwrap().insert(name.to_string());
    }

    pub fn is_online(&self, name: &str) -> bool {
        self.online.lock().unwrap().contains(name)
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    /// Recorded invocations rendered as command lines
    pub fn command_lines(&self) -> Vec<String> {
        self.calls().iter().map(ToString::to_string).collect()
    }

    /// Forget recorded invocations (responses and supervisor state are kept)
    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn supervise(&self, invocation: &Invocation) -> Output {
        let mut online = self.online.lock().unwrap();
        let args: Vec<&str> = invocation.args.iter().map(String::as_str).collect();

        match (invocation.program.as_str(), args.as_slice()) {
            (JLS, ["-j", name, ..]) => {
                if online.contains(*name) {
                    Output::ok(format!("   JID  IP Address      Hostname  Path\n     1                  {name}\n"))
                } else {
                    Output::failure(1, format!("jls: jail \"{name}\" not found"))
                }
            }
            (JAIL, ["-c", rest @ ..]) => {
                if let Some(name) = rest.iter().find_map(|a| a.strip_prefix("name=")) {
                    online.insert(name.to_string());
                }
                Output::success()
            }
            (JAIL, ["-r", name, ..]) => {
                if online.remove(*name) {
                    Output::success()
                } else {
                    Output::failure(1, format!("jail: \"{name}\" not found"))
                }
            }
            _ => Output::success(),
        }
    }
}

impl Runner for FakeRunner {
    fn run(&self, invocation: &Invocation) -> Result<Output> {
        self.calls.lock().unwrap().push(invocation.clone());

        let line = invocation.to_string();
        let canned = {
            let mut responses = self.responses.lock().unwrap();
            match responses.iter().position(|c| line.contains(c.needle.as_str())) {
                Some(index) if responses[index].once => Some(responses.remove(index).reply),
                Some(index) => Some(match &responses[index].reply {
                    Reply::Output(output) => Reply::Output(output.clone()),
                    Reply::Error(error) => Reply::Error(*error),
                }),
                None => None,
            }
        };

        match canned {
            Some(Reply::Output(output)) => Ok(output),
            Some(Reply::Error(error)) => Err(error()),
            None => Ok(self.supervise(invocation)),
        }
    }
}

/// In-memory storage
#[derive(Default)]
pub struct FakeStorage {
    paths: HashMap<String, PathBuf>,
    trees: HashMap<String, Dataset>,
    path_lookups: AtomicUsize,
}

impl FakeStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_path(mut self, dataset: &str, path: impl AsRef<Path>) -> Self {
        self.paths.insert(dataset.to_string(), path.as_ref().to_path_buf());
        self
    }

    pub fn with_metadata(mut self, tree: Dataset) -> Self {
        self.trees.insert(tree.name.clone(), tree);
        self
    }

    /// Number of `dataset_path` calls served so far
    pub fn path_lookups(&self) -> usize {
        self.path_lookups.load(Ordering::SeqCst)
    }
}

impl Storage for FakeStorage {
    fn dataset_path(&self, dataset: &str) -> Result<PathBuf> {
        self.path_lookups.fetch_add(1, Ordering::SeqCst);
        self.paths
            .get(dataset)
            .cloned()
            .ok_or_else(|| Error::DatasetNotFound {
                dataset: dataset.to_string(),
                output: format!("cannot open '{}': dataset does not exist", dataset),
            })
    }

    fn dataset_metadata(&self, dataset: &str) -> Result<Dataset> {
        self.trees
            .get(dataset)
            .cloned()
            .ok_or_else(|| Error::DatasetNotFound {
                dataset: dataset.to_string(),
                output: format!("cannot open '{}': dataset does not exist", dataset),
            })
    }
}

/// Shared, ordered log of device events
pub type EventLog = Arc<Mutex<Vec<String>>>;

/// A network device that only records what was asked of it
#[derive(Debug)]
pub struct FakeDevice {
    id: u32,
    addresses: Vec<String>,
    log: EventLog,
    fail_host: AtomicBool,
    fail_guest: AtomicBool,
    fail_offline: AtomicBool,
}

impl FakeDevice {
    pub fn new(id: u32, addresses: &[&str], log: &EventLog) -> Self {
        Self {
            id,
            addresses: addresses.iter().map(|a| a.to_string()).collect(),
            log: Arc::clone(log),
            fail_host: AtomicBool::new(false),
            fail_guest: AtomicBool::new(false),
            fail_offline: AtomicBool::new(false),
        }
    }

    /// A fresh event log to share between devices
    pub fn log() -> EventLog {
        Arc::new(Mutex::new(Vec::new()))
    }

    pub fn events(log: &EventLog) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    pub fn failing_host(self) -> Self {
        self.fail_host.store(true, Ordering::SeqCst);
        self
    }

    pub fn failing_guest(self) -> Self {
        self.fail_guest.store(true, Ordering::SeqCst);
        self
    }

    pub fn failing_offline(self) -> Self {
        self.fail_offline.store(true, Ordering::SeqCst);
        self
    }

    fn record(&self, event: String, fail: &AtomicBool) -> Result<()> {
        self.log.lock().unwrap().push(event.clone());
        if fail.load(Ordering::SeqCst) {
            return Err(Error::NetworkDevice {
                device: format!("epair{}", self.id),
                message: format!("{} failed", event),
            });
        }
        Ok(())
    }
}

impl NetworkDevice for FakeDevice {
    fn device_id(&self) -> u32 {
        self.id
    }

    fn addresses(&self) -> &[String] {
        &self.addresses
    }

    fn bring_host_online(&self) -> Result<()> {
        self.record(format!("host-online {}", self.id), &self.fail_host)
    }

    fn bring_guest_online(&self, jail_id: &str) -> Result<()> {
        self.record(format!("guest-online {} {}", self.id, jail_id), &self.fail_guest)
    }

    fn bring_offline(&self) -> Result<()> {
        self.record(format!("offline {}", self.id), &self.fail_offline)
    }
}
