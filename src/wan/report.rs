//! WAN reports: live status and the stored document

use crate::store::ModuleStatus;
use crate::wan::config::{WanDocument, WanMode};
use ipnet::Ipv4Net;
use serde::Serialize;
use std::fmt;

/// Result of `wan status`
#[derive(Debug, Clone, Serialize)]
pub struct WanStatus {
    pub interface: String,
    pub mode: Option<WanMode>,
    pub status: ModuleStatus,
    pub link_up: bool,
    pub addresses: Vec<Ipv4Net>,
    pub default_route: bool,
    /// Raw `ip addr show` output
    pub details: String,
    /// Raw `ip route show` output
    pub routes: String,
}

impl fmt::Display for WanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "WAN status: {}", self.status)?;
        writeln!(f, "Interface: {}", self.interface)?;
        if let Some(mode) = self.mode {
            writeln!(f, "Mode: {}", mode)?;
        }
        writeln!(f, "Link: {}", if self.link_up { "UP" } else { "DOWN" })?;
        if self.addresses.is_empty() {
            writeln!(f, "Addresses: none")?;
        } else {
            let addrs: Vec<String> = self.addresses.iter().map(|a| a.to_string()).collect();
            writeln!(f, "Addresses: {}", addrs.join(", "))?;
        }
        writeln!(
            f,
            "Default route: {}",
            if self.default_route { "present" } else { "missing" }
        )?;

        writeln!(f, "\nInterface details:")?;
        for line in self.details.lines() {
            writeln!(f, "  {}", line)?;
        }
        writeln!(f, "\nRoutes:")?;
        if self.routes.trim().is_empty() {
            writeln!(f, "  (none)")?;
        }
        for line in self.routes.lines() {
            writeln!(f, "  {}", line)?;
        }
        Ok(())
    }
}

impl fmt::Display for WanDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(interface) = &self.interface else {
            return writeln!(f, "WAN is not configured");
        };
        writeln!(f, "Interface: {}", interface)?;
        match self.mode {
            Some(mode) => writeln!(f, "Mode: {}", mode)?,
            None => writeln!(f, "Mode: (unset)")?,
        }
        if let (Some(ip), Some(mask)) = (self.ip, self.mask) {
            writeln!(f, "Address: {}/{}", ip, mask)?;
        }
        if let Some(gateway) = self.gateway {
            writeln!(f, "Gateway: {}", gateway)?;
        }
        if !self.dns.is_empty() {
            let dns: Vec<String> = self.dns.iter().map(|d| d.to_string()).collect();
            writeln!(f, "DNS: {}", dns.join(", "))?;
        }
        writeln!(f, "Status: {}", self.status)
    }
}
