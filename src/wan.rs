//! WAN uplink lifecycle
//!
//! Provides:
//! - The stored WAN document and the `wan config` request
//! - The Inactive/Pending/Active lifecycle state machine
//! - Manual and DHCP start, stop and status
//! - Background DHCP lease verification

pub mod config;
pub mod dhcp;
pub mod lifecycle;
pub mod manager;
pub mod report;

pub use manager::WanManager;
