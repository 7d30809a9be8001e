//! Live network state of the appliance
//!
//! Provides:
//! - Bridge VLAN table parsing and bridge queries
//! - Link/address/route inspection and interface name validation
//! - VLAN id and VLAN list types
//! - Static IPv4 network validation

pub mod bridge;
pub mod ip;
pub mod link;
pub mod vlan;
