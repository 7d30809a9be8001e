//! Tagging reports: status and the binding list

use crate::network::bridge::BridgeVlanTable;
use crate::store::ModuleStatus;
use crate::tagging::binding::{InterfaceVlanBinding, Membership};
use serde::Serialize;
use std::fmt;

/// Live view of one configured interface
#[derive(Debug, Clone, Serialize)]
pub struct InterfaceStatus {
    pub name: String,
    pub exists: bool,
    pub up: bool,
    /// Enslaved to the managed bridge
    pub attached: bool,
    pub binding: InterfaceVlanBinding,
}

/// Result of `tagging status`
#[derive(Debug, Clone, Serialize)]
pub struct TaggingStatus {
    pub bridge: String,
    pub bridge_exists: bool,
    pub bridge_up: bool,
    pub status: ModuleStatus,
    pub interfaces: Vec<InterfaceStatus>,
    /// Parsed `bridge vlan show`; empty if it could not be read
    pub vlan_table: BridgeVlanTable,
}

impl fmt::Display for TaggingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Tagging status: {}", self.status)?;
        if !self.bridge_exists {
            writeln!(f, "Bridge {}: missing", self.bridge)?;
            return writeln!(f, "Tagging requires the bridge {} to exist", self.bridge);
        }
        writeln!(
            f,
            "Bridge {}: {}",
            self.bridge,
            if self.bridge_up { "UP" } else { "DOWN" }
        )?;

        writeln!(f, "\nConfigured interfaces: {}", self.interfaces.len())?;
        for iface in &self.interfaces {
            let state = match (iface.exists, iface.up) {
                (false, _) => "MISSING",
                (true, true) => "UP",
                (true, false) => "DOWN",
            };
            let attached = if !iface.exists {
                ""
            } else if iface.attached {
                ", attached"
            } else {
                ", not attached"
            };
            writeln!(f, "  {} [{}{}]", iface.name, state, attached)?;
            match &iface.binding.membership {
                Membership::Access(vlan) => writeln!(f, "    untagged VLAN: {}", vlan)?,
                Membership::Trunk(vlans) => writeln!(f, "    tagged VLANs: {}", vlans)?,
            }
        }

        writeln!(f, "\nBridge VLAN table:")?;
        if self.vlan_table.is_empty() {
            writeln!(f, "  (no data)")?;
        }
        for (port, vlans) in &self.vlan_table {
            write!(f, "  {:<16} {}", port, vlans.vlans)?;
            if !vlans.pvids.is_empty() {
                write!(f, " (PVID {})", vlans.pvids)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Result of `tagging config show`
#[derive(Debug, Clone, Serialize)]
#[serde(transparent)]
pub struct BindingList(pub Vec<InterfaceVlanBinding>);

impl fmt::Display for BindingList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return writeln!(f, "No interfaces configured");
        }
        for binding in &self.0 {
            writeln!(f, "{}: {}", binding.name, binding.membership)?;
        }
        Ok(())
    }
}
