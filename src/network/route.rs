//! Static routes installed inside a jail's network stack

use crate::process::{Invocation, ROUTE};
use serde::Deserialize;

/// A static route
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Route {
    /// Route target (e.g., "default" or "192.168.10.0/24")
    pub source: String,
    /// Gateway for the target
    pub destination: String,
}

impl Route {
    pub fn new(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
        }
    }

    /// route(8) address family flag, chosen from the source literal
    pub fn family(&self) -> &'static str {
        if self.source.contains(':') {
            "-inet6"
        } else {
            "-inet"
        }
    }

    /// `route add` invocation inside the given jail
    pub fn install_invocation(&self, jail_id: &str) -> Invocation {
        Invocation::in_jail(jail_id, ROUTE)
            .arg("add")
            .arg(self.family())
            .arg(&self.source)
            .arg(&self.destination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family() {
        assert_eq!(Route::new("10.0.0.0/8", "10.0.0.1").family(), "-inet");
        assert_eq!(Route::new("default", "192.168.1.1").family(), "-inet");
        assert_eq!(Route::new("2001:db8::/32", "fe80::1").family(), "-inet6");
        assert_eq!(Route::new("::/0", "2001:db8::1").family(), "-inet6");
    }

    #[test]
    fn test_install_invocation() {
        let inv = Route::new("2001:db8::/32", "2001:db8::1").install_invocation("j1");
        assert_eq!(
            inv.to_string(),
            "/usr/sbin/jexec j1 /sbin/route add -inet6 2001:db8::/32 2001:db8::1"
        );
    }
}
