//! VNET jail network bring-up
//!
//! Device-specific work is delegated to [`NetworkDevice`]; this module
//! sequences it and handles what lives inside the jail itself (loopback,
//! static routes, the IPv6 fix-up).

use crate::error::{Error, Result};
use crate::network::{NetworkDevice, Route};
use crate::process::{Invocation, Runner, IFCONFIG};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Materialize the host side of every device, stopping at the first failure
///
/// Devices brought online before the failure are taken offline again.
pub fn prepare_host_networking(devices: &[Arc<dyn NetworkDevice>]) -> Result<()> {
    for (index, device) in devices.iter().enumerate() {
        if let Err(e) = device.bring_host_online() {
            release_devices(&devices[..index]);
            return Err(e);
        }
        debug!(device = device.device_id(), "host side online");
    }

    Ok(())
}

/// Best-effort offline of every device, most recent first
pub fn release_devices(devices: &[Arc<dyn NetworkDevice>]) {
    for device in devices.iter().rev() {
        if let Err(e) = device.bring_offline() {
            warn!(device = device.device_id(), error = %e, "failed to release device");
        }
    }
}

/// Attach every device to the jail, bring up loopback, then install routes
pub fn prepare_guest_networking(
    runner: &dyn Runner,
    jail_id: &str,
    devices: &[Arc<dyn NetworkDevice>],
    routes: &[Route],
) -> Result<()> {
    for device in devices {
        device.bring_guest_online(jail_id)?;
        debug!(device = device.device_id(), jail = %jail_id, "guest side online");
    }

    let output = runner.run(
        &Invocation::in_jail(jail_id, IFCONFIG).args(["lo0", "inet", "127.0.0.1", "up"]),
    )?;
    if !output.succeeded() {
        return Err(Error::Loopback {
            jail: jail_id.to_string(),
            output: output.text(),
        });
    }

    for route in routes {
        let output = runner.run(&route.install_invocation(jail_id))?;
        if !output.succeeded() {
            return Err(Error::RouteInstall {
                route: route.clone(),
                output: output.text(),
            });
        }
        debug!(source = %route.source, destination = %route.destination, "route installed");
    }

    Ok(())
}

/// Clear `ifdisabled` on every IPv6-carrying guest interface
///
/// FreeBSD's duplicate address detection can leave a freshly moved interface
/// with IPv6 disabled. Nothing is unwound on failure.
pub fn post_start(
    runner: &dyn Runner,
    jail_id: &str,
    devices: &[Arc<dyn NetworkDevice>],
) -> Result<()> {
    for device in devices.iter().filter(|d| d.has_ipv6()) {
        let interface = device.guest_interface();
        let output = runner.run(
            &Invocation::in_jail(jail_id, IFCONFIG)
                .arg(&interface)
                .args(["inet6", "-ifdisabled"]),
        )?;

        if !output.succeeded() {
            return Err(Error::Ipv6Enable {
                interface,
                output: output.text(),
            });
        }
        info!(interface = %interface, jail = %jail_id, "enabled IPv6");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FakeDevice, FakeRunner};
    use crate::process::Output;

    #[test]
    fn test_host_networking_stops_at_first_failure() {
        let log = FakeDevice::log();
        let devices: Vec<Arc<dyn NetworkDevice>> = vec![
            Arc::new(FakeDevice::new(0, &[], &log)),
            Arc::new(FakeDevice::new(1, &[], &log).failing_host()),
            Arc::new(FakeDevice::new(2, &[], &log)),
        ];

        assert!(prepare_host_networking(&devices).is_err());
        assert_eq!(
            FakeDevice::events(&log),
            vec!["host-online 0", "host-online 1", "offline 0"]
        );
    }

    #[test]
    fn test_release_devices_continues_past_failures() {
        let log = FakeDevice::log();
        let devices: Vec<Arc<dyn NetworkDevice>> = vec![
            Arc::new(FakeDevice::new(0, &[], &log)),
            Arc::new(FakeDevice::new(1, &[], &log).failing_offline()),
        ];

        release_devices(&devices);
        assert_eq!(FakeDevice::events(&log), vec!["offline 1", "offline 0"]);
    }

    #[test]
    fn test_guest_networking_sequence() {
        let runner = FakeRunner::new();
        let log = FakeDevice::log();
        let devices: Vec<Arc<dyn NetworkDevice>> =
            vec![Arc::new(FakeDevice::new(4, &["10.0.0.5/24"], &log))];
        let routes = vec![
            Route::new("default", "10.0.0.1"),
            Route::new("default", "2001:db8::1"),
            Route::new("2001:db8:1::/48", "2001:db8::1"),
        ];

        prepare_guest_networking(runner.as_ref(), "j1", &devices, &routes).unwrap();

        assert_eq!(FakeDevice::events(&log), vec!["guest-online 4 j1"]);
        assert_eq!(
            runner.command_lines(),
            vec![
                "/usr/sbin/jexec j1 /sbin/ifconfig lo0 inet 127.0.0.1 up",
                "/usr/sbin/jexec j1 /sbin/route add -inet default 10.0.0.1",
                "/usr/sbin/jexec j1 /sbin/route add -inet default 2001:db8::1",
                "/usr/sbin/jexec j1 /sbin/route add -inet6 2001:db8:1::/48 2001:db8::1",
            ]
        );
    }

    #[test]
    fn test_route_failure_carries_route() {
        let runner = FakeRunner::new();
        runner.respond("route add", Output::failure(1, "route: writing to routing socket: File exists"));
        let routes = vec![Route::new("10.1.0.0/16", "10.0.0.1"), Route::new("10.2.0.0/16", "10.0.0.1")];

        let err = prepare_guest_networking(runner.as_ref(), "j1", &[], &routes).unwrap_err();
        match err {
            Error::RouteInstall { route, output } => {
                assert_eq!(route, Route::new("10.1.0.0/16", "10.0.0.1"));
                assert!(output.contains("File exists"));
            }
            other => panic!("unexpected error: {other}"),
        }
        // Second route never attempted
        assert_eq!(runner.command_lines().len(), 2);
    }

    #[test]
    fn test_loopback_failure() {
        let runner = FakeRunner::new();
        runner.respond("lo0", Output::failure(1, "ifconfig: lo0: no such interface"));

        let err = prepare_guest_networking(runner.as_ref(), "j1", &[], &[]).unwrap_err();
        assert!(matches!(err, Error::Loopback { .. }));
    }

    #[test]
    fn test_post_start_only_touches_ipv6_devices() {
        let runner = FakeRunner::new();
        let log = FakeDevice::log();
        let devices: Vec<Arc<dyn NetworkDevice>> = vec![
            Arc::new(FakeDevice::new(0, &["10.0.0.5"], &log)),
            Arc::new(FakeDevice::new(1, &["2001:db8::1"], &log)),
        ];

        post_start(runner.as_ref(), "j1", &devices).unwrap();
        assert_eq!(
            runner.command_lines(),
            vec!["/usr/sbin/jexec j1 /sbin/ifconfig epair1b inet6 -ifdisabled"]
        );
    }

    #[test]
    fn test_post_start_ipv4_only_is_silent() {
        let runner = FakeRunner::new();
        let log = FakeDevice::log();
        let devices: Vec<Arc<dyn NetworkDevice>> =
            vec![Arc::new(FakeDevice::new(0, &["10.0.0.5"], &log))];

        post_start(runner.as_ref(), "j1", &devices).unwrap();
        assert!(runner.command_lines().is_empty());
    }

    #[test]
    fn test_post_start_failure() {
        let runner = FakeRunner::new();
        runner.respond("-ifdisabled", Output::failure(1, "ifconfig: SIOCSIFINFO_IN6: Invalid argument"));
        let log = FakeDevice::log();
        let devices: Vec<Arc<dyn NetworkDevice>> =
            vec![Arc::new(FakeDevice::new(7, &["2001:db8::7/64"], &log))];

        let err = post_start(runner.as_ref(), "j1", &devices).unwrap_err();
        match err {
            Error::Ipv6Enable { interface, .. } => assert_eq!(interface, "epair7b"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
