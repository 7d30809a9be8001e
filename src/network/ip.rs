//! Static IPv4 addressing for the WAN uplink
//!
//! Checks an address/prefix/gateway triple before any of it is handed
//! to the host.

use crate::error::{Error, Result};
use ipnet::Ipv4Net;
use std::net::Ipv4Addr;

/// Validate a manual WAN network and return the derived network
///
/// Rejections, each with its own message:
/// - the address is the network or broadcast address
/// - the gateway lies outside the network
/// - the gateway is the network or broadcast address
/// - the gateway is the address itself
pub fn validate_manual_network(ip: Ipv4Addr, mask: u8, gateway: Ipv4Addr) -> Result<Ipv4Net> {
    let net = Ipv4Net::new(ip, mask)
        .map_err(|_| Error::Validation(format!("mask /{} is outside 0-32", mask)))?
        .trunc();

    let network = net.network();
    let broadcast = net.broadcast();

    if ip == network {
        return Err(Error::Validation(format!(
            "IP {} is the network address of {}",
            ip, net
        )));
    }
    if ip == broadcast {
        return Err(Error::Validation(format!(
            "IP {} is the broadcast address of {}",
            ip, net
        )));
    }
    if !net.contains(&gateway) {
        return Err(Error::Validation(format!(
            "gateway {} is outside network {}",
            gateway, net
        )));
    }
    if gateway == network || gateway == broadcast {
        return Err(Error::Validation(format!(
            "gateway {} cannot be the network or broadcast address of {}",
            gateway, net
        )));
    }
    if gateway == ip {
        return Err(Error::Validation(format!(
            "gateway {} cannot be the same as the IP address",
            gateway
        )));
    }

    Ok(net)
}
