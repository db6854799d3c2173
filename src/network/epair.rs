//! Epair devices for VNET jails
//!
//! An epair is a virtual Ethernet pair. The `a` end stays on the host (and
//! is optionally added to a bridge), the `b` end is moved into the jail.

use crate::error::{Error, Result};
use crate::network::NetworkDevice;
use crate::process::{Invocation, Runner, IFCONFIG};
use ipnet::IpNet;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, warn};

/// An epair with a fixed unit number (`epair<N>a` / `epair<N>b`)
pub struct EpairDevice {
    id: u32,
    addresses: Vec<String>,
    bridge: Option<String>,
    runner: Arc<dyn Runner>,
}

impl fmt::Debug for EpairDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EpairDevice")
            .field("id", &self.id)
            .field("addresses", &self.addresses)
            .field("bridge", &self.bridge)
            .finish()
    }
}

impl EpairDevice {
    pub fn new(id: u32, addresses: Vec<String>, runner: Arc<dyn Runner>) -> Self {
        Self {
            id,
            addresses,
            bridge: None,
            runner,
        }
    }

    /// Add the host side to this bridge when brought online
    pub fn with_bridge(mut self, bridge: impl Into<String>) -> Self {
        self.bridge = Some(bridge.into());
        self
    }

    fn unit(&self) -> String {
        format!("epair{}", self.id)
    }

    /// Host-side interface name
    pub fn host_interface(&self) -> String {
        format!("epair{}a", self.id)
    }

    /// Run a command, turning a non-zero exit into a device error
    fn ifconfig(&self, invocation: Invocation, what: &str) -> Result<()> {
        let output = self.runner.run(&invocation)?;
        if output.succeeded() {
            Ok(())
        } else {
            Err(Error::NetworkDevice {
                device: self.unit(),
                message: format!("{}: {}", what, output.text()),
            })
        }
    }

    fn destroy(&self) -> Result<()> {
        let output = self
            .runner
            .run(&Invocation::new(IFCONFIG).arg(self.host_interface()).arg("destroy"))?;

        // Destroying either end destroys both; already gone is fine
        if !output.succeeded() && !output.combined.contains("does not exist") {
            return Err(Error::NetworkDevice {
                device: self.unit(),
                message: format!("Failed to destroy {}: {}", self.host_interface(), output.text()),
            });
        }

        Ok(())
    }

    /// ifconfig(8) family keyword for an address literal
    fn family(address: &str) -> Result<&'static str> {
        let ip = address
            .parse::<IpNet>()
            .map(|net| net.addr())
            .or_else(|_| address.parse::<IpAddr>())
            .map_err(|_| Error::NetworkDevice {
                device: address.to_string(),
                message: format!("Invalid address '{}'", address),
            })?;

        Ok(match ip {
            IpAddr::V4(_) => "inet",
            IpAddr::V6(_) => "inet6",
        })
    }
}

impl NetworkDevice for EpairDevice {
    fn device_id(&self) -> u32 {
        self.id
    }

    fn addresses(&self) -> &[String] {
        &self.addresses
    }

    fn bring_host_online(&self) -> Result<()> {
        self.ifconfig(
            Invocation::new(IFCONFIG).arg(self.unit()).arg("create"),
            "Failed to create epair",
        )?;
        debug!(host = %self.host_interface(), guest = %self.guest_interface(), "created epair");

        let attach = self
            .ifconfig(
                Invocation::new(IFCONFIG).arg(self.host_interface()).arg("up"),
                "Failed to bring up host side",
            )
            .and_then(|_| match &self.bridge {
                Some(bridge) => self.ifconfig(
                    Invocation::new(IFCONFIG)
                        .arg(bridge)
                        .arg("addm")
                        .arg(self.host_interface()),
                    &format!("Failed to add {} to {}", self.host_interface(), bridge),
                ),
                None => Ok(()),
            });

        if let Err(e) = attach {
            // Don't leave a half-configured pair behind
            if let Err(cleanup) = self.destroy() {
                warn!(device = %self.unit(), error = %cleanup, "failed to clean up epair");
            }
            return Err(e);
        }

        Ok(())
    }

    fn bring_guest_online(&self, jail_id: &str) -> Result<()> {
        let iface = self.guest_interface();

        self.ifconfig(
            Invocation::new(IFCONFIG).arg(&iface).arg("vnet").arg(jail_id),
            &format!("Failed to move {} to jail {}", iface, jail_id),
        )?;

        for address in &self.addresses {
            let family = Self::family(address)?;
            self.ifconfig(
                Invocation::in_jail(jail_id, IFCONFIG)
                    .arg(&iface)
                    .arg(family)
                    .arg(address)
                    .arg("alias"),
                &format!("Failed to configure {} on {}", address, iface),
            )?;
        }

        self.ifconfig(
            Invocation::in_jail(jail_id, IFCONFIG).arg(&iface).arg("up"),
            &format!("Failed to bring up {} in jail {}", iface, jail_id),
        )
    }

    fn bring_offline(&self) -> Result<()> {
        self.destroy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FakeRunner;
    use crate::process::Output;

    #[test]
    fn test_family() {
        assert_eq!(EpairDevice::family("10.0.0.5/24").unwrap(), "inet");
        assert_eq!(EpairDevice::family("10.0.0.5").unwrap(), "inet");
        assert_eq!(EpairDevice::family("2001:db8::5/64").unwrap(), "inet6");
        assert_eq!(EpairDevice::family("fe80::1").unwrap(), "inet6");
        assert!(EpairDevice::family("not-an-ip").is_err());
    }

    #[test]
    fn test_host_online_with_bridge() {
        let runner = FakeRunner::new();
        let dev = EpairDevice::new(3, vec![], runner.clone()).with_bridge("bridge0");

        dev.bring_host_online().unwrap();
        assert_eq!(
            runner.command_lines(),
            vec![
                "/sbin/ifconfig epair3 create",
                "/sbin/ifconfig epair3a up",
                "/sbin/ifconfig bridge0 addm epair3a",
            ]
        );
    }

    #[test]
    fn test_host_online_destroys_on_bridge_failure() {
        let runner = FakeRunner::new();
        runner.respond("addm", Output::failure(1, "ifconfig: BRDGADD: File exists"));
        let dev = EpairDevice::new(0, vec![], runner.clone()).with_bridge("bridge0");

        let err = dev.bring_host_online().unwrap_err();
        assert!(matches!(err, Error::NetworkDevice { .. }));
        assert_eq!(
            runner.command_lines().last().map(String::as_str),
            Some("/sbin/ifconfig epair0a destroy")
        );
    }

    #[test]
    fn test_guest_online() {
        let runner = FakeRunner::new();
        let dev = EpairDevice::new(
            1,
            vec!["10.0.0.5/24".to_string(), "2001:db8::5/64".to_string()],
            runner.clone(),
        );

        dev.bring_guest_online("j1").unwrap();
        assert_eq!(
            runner.command_lines(),
            vec![
                "/sbin/ifconfig epair1b vnet j1",
                "/usr/sbin/jexec j1 /sbin/ifconfig epair1b inet 10.0.0.5/24 alias",
                "/usr/sbin/jexec j1 /sbin/ifconfig epair1b inet6 2001:db8::5/64 alias",
                "/usr/sbin/jexec j1 /sbin/ifconfig epair1b up",
            ]
        );
    }

    #[test]
    fn test_offline_tolerates_missing_interface() {
        let runner = FakeRunner::new();
        runner.respond(
            "epair2a destroy",
            Output::failure(1, "ifconfig: interface epair2a does not exist"),
        );
        let dev = EpairDevice::new(2, vec![], runner);
        assert!(dev.bring_offline().is_ok());
    }
}
