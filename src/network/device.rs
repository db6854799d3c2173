//! Network device contract

use crate::error::Result;
use std::fmt;

/// A network device attached to a jail
///
/// Devices are owned by the network subsystem; a jail only holds shared
/// references to them. Implementations do their own command execution.
pub trait NetworkDevice: Send + Sync + fmt::Debug {
    /// Numeric device identifier (epair unit number)
    fn device_id(&self) -> u32;

    /// Address literals configured on the guest side, optionally with a prefix
    fn addresses(&self) -> &[String];

    /// Name of the interface as seen inside the jail
    fn guest_interface(&self) -> String {
        format!("epair{}b", self.device_id())
    }

    /// Whether any configured address is IPv6
    fn has_ipv6(&self) -> bool {
        self.addresses().iter().any(|a| a.contains(':'))
    }

    /// Materialize the host-side endpoint
    fn bring_host_online(&self) -> Result<()>;

    /// Materialize the guest-side endpoint and attach it to the jail
    fn bring_guest_online(&self, jail_id: &str) -> Result<()>;

    /// Release the device
    fn bring_offline(&self) -> Result<()>;
}
