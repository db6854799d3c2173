//! Network management module for VNET jails
//!
//! Provides:
//! - The network device contract the lifecycle code drives
//! - Epair devices for VNET jails
//! - Static routes installed inside a jail
//! - Host/guest bring-up and the IPv6 post-start fix-up

pub mod device;
pub mod epair;
pub mod route;
pub mod vnet;

pub use device::NetworkDevice;
pub use epair::EpairDevice;
pub use route::Route;
pub use vnet::{post_start, prepare_guest_networking, prepare_host_networking, release_devices};
