//! Jail lifecycle state machine
//!
//! Type-safe state machine for jail lifecycle tracking using state-machines crate.
//! Liveness itself is always re-queried from the supervisor; the machine
//! records the last transition this process drove and is reconciled with
//! the live probe before every operation.

use crate::error::Error;
use state_machines::state_machine;
use std::fmt;

state_machine! {
    name: LifecycleMachine,
    dynamic: true,
    initial: Offline,
    states: [Offline, Starting, Online, Stopping, Failed],
    events {
        start {
            transition: { from: Offline, to: Starting }
        }
        started {
            transition: { from: Starting, to: Online }
        }
        stop {
            transition: { from: Online, to: Stopping }
        }
        stopped {
            transition: { from: Stopping, to: Offline }
        }
        fail {
            transition: { from: [Starting, Stopping], to: Failed }
        }
        recover {
            transition: { from: Failed, to: Offline }
        }
        appeared {
            transition: { from: [Offline, Failed], to: Online }
        }
        vanished {
            transition: { from: [Online, Failed], to: Offline }
        }
    }
}

/// Simple state enum for external use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Offline,
    Starting,
    Online,
    Stopping,
    Failed,
}

impl State {
    /// Parse state from string representation
    pub fn from_str(s: &str) -> Self {
        match s {
            "Offline" => State::Offline,
            "Starting" => State::Starting,
            "Online" => State::Online,
            "Stopping" => State::Stopping,
            "Failed" => State::Failed,
            _ => State::Offline, // Fallback
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            State::Offline => "Offline",
            State::Starting => "Starting",
            State::Online => "Online",
            State::Stopping => "Stopping",
            State::Failed => "Failed",
        };
        write!(f, "{}", s)
    }
}

/// Lifecycle tracker held by each jail
pub struct Lifecycle {
    machine: DynamicLifecycleMachine<()>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Lifecycle").field(&self.state()).finish()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            machine: LifecycleMachine::new(()).into_dynamic(),
        }
    }

    /// Get current state as enum
    pub fn state(&self) -> State {
        State::from_str(self.machine.current_state())
    }

    fn fire(&mut self, event: LifecycleMachineEvent, name: &'static str) -> crate::error::Result<()> {
        let state = self.state();
        self.machine
            .handle(event)
            .map_err(|e| Error::InvalidTransition {
                state: state.to_string(),
                event: name,
                message: format!("{:?}", e),
            })
    }

    pub fn start(&mut self) -> crate::error::Result<()> {
        self.fire(LifecycleMachineEvent::Start, "start")
    }

    pub fn started(&mut self) -> crate::error::Result<()> {
        self.fire(LifecycleMachineEvent::Started, "started")
    }

    pub fn stop(&mut self) -> crate::error::Result<()> {
        self.fire(LifecycleMachineEvent::Stop, "stop")
    }

    pub fn stopped(&mut self) -> crate::error::Result<()> {
        self.fire(LifecycleMachineEvent::Stopped, "stopped")
    }

    pub fn fail(&mut self) -> crate::error::Result<()> {
        self.fire(LifecycleMachineEvent::Fail, "fail")
    }

    pub fn recover(&mut self) -> crate::error::Result<()> {
        self.fire(LifecycleMachineEvent::Recover, "recover")
    }

    /// Bring the tracked state in line with what the supervisor reports
    pub fn observe(&mut self, online: bool) -> crate::error::Result<()> {
        match (self.state(), online) {
            (State::Online, true) | (State::Offline, false) => Ok(()),
            (State::Offline | State::Failed, true) => {
                self.fire(LifecycleMachineEvent::Appeared, "appeared")
            }
            (State::Online | State::Failed, false) => {
                self.fire(LifecycleMachineEvent::Vanished, "vanished")
            }
            // An operation was abandoned mid-flight
            (State::Starting | State::Stopping, _) => {
                self.fail()?;
                self.observe(online)
            }
        }
    }
}
