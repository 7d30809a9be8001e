//! Tagging reconciler
//!
//! Converges the declared bindings onto the managed bridge. Items are
//! applied independently: a failing step is recorded against its item and
//! the rest of the work continues.

use crate::error::{Error, Result};
use crate::gate::{DependencyGate, Module};
use crate::host::{Host, LinkState, VlanFlags};
use crate::network::bridge::{Bridge, BridgeVlanTable};
use crate::network::link::{validate_interface_name, LinkInfo};
use crate::network::vlan::{VlanId, DEFAULT_VLAN};
use crate::peers::{IsolationClaims, VlanRegistry};
use crate::store::{ConfigStore, ModuleStatus};
use crate::tagging::binding::{InterfaceVlanBinding, Membership, TaggingConfig};
use crate::tagging::report::{BindingList, InterfaceStatus, TaggingStatus};
use std::sync::Arc;

/// Full id range stripped from a port on stop
const ALL_VLANS: &str = "1-4094";

/// Drives bridge membership and VLAN tagging of physical interfaces
pub struct TaggingReconciler {
    host: Host,
    store: ConfigStore,
    gate: Arc<DependencyGate>,
    bridge: Bridge,
}

impl TaggingReconciler {
    pub fn new(host: Host, store: ConfigStore, gate: Arc<DependencyGate>, bridge: &str) -> Self {
        Self {
            host,
            store,
            gate,
            bridge: Bridge::new(bridge),
        }
    }

    fn validate_name(&self, name: &str) -> Result<()> {
        validate_interface_name(name).map_err(Error::Validation)?;
        if self.bridge.is_reserved(name) {
            return Err(Error::Validation(format!(
                "'{}' is the bridge {} or one of its sub-interfaces",
                name,
                self.bridge.name()
            )));
        }
        Ok(())
    }

    fn load(&self) -> Result<TaggingConfig> {
        self.store.load(Module::Tagging)
    }

    fn persist_status(&self, config: &mut TaggingConfig, status: ModuleStatus) {
        config.status = status;
        self.store.save_or_warn(Module::Tagging, &*config);
    }

    /// Apply every declared binding
    pub fn start(&self) -> Result<String> {
        self.gate.check(Module::Tagging, &self.store)?;

        let mut config = self.load()?;
        if config.interfaces.is_empty() {
            return Err(Error::NotConfigured("Tagging".to_string()));
        }
        let bindings = config.bindings()?;
        for binding in &bindings {
            self.validate_name(&binding.name)?;
        }
        if !self.bridge.exists(&self.host) {
            return Err(Error::InterfaceNotFound(self.bridge.name().to_string()));
        }

        if self.already_applied(&bindings) {
            if config.status != ModuleStatus::Active {
                self.persist_status(&mut config, ModuleStatus::Active);
            }
            tracing::info!("tagging already matches live state");
            return Ok("Tagging already started".to_string());
        }

        // The bridge's own default untagged VLAN would leak between ports
        self.host.best_effort(self.host.cmd().bridge_vlan_del(
            self.bridge.name(),
            &DEFAULT_VLAN.to_string(),
            VlanFlags::PvidUntagged,
        ));

        let mut configured = Vec::new();
        let mut failed = Vec::new();
        for binding in &bindings {
            let errors = self.apply(binding);
            if errors.is_empty() {
                tracing::info!(interface = %binding.name, membership = %binding.membership, "interface configured");
                configured.push(format!("  {}: {}", binding.name, binding.membership));
            } else {
                tracing::warn!(interface = %binding.name, errors = ?errors, "interface failed");
                failed.push(format!("  {}: {}", binding.name, errors.join(", ")));
            }
        }

        let success = !configured.is_empty();
        let status = if success {
            ModuleStatus::Active
        } else {
            ModuleStatus::Inactive
        };
        self.persist_status(&mut config, status);

        let mut report = String::new();
        if !configured.is_empty() {
            report.push_str("Configured interfaces:\n");
            report.push_str(&configured.join("\n"));
        }
        if !failed.is_empty() {
            if !report.is_empty() {
                report.push_str("\n\n");
            }
            report.push_str("Failed interfaces:\n");
            report.push_str(&failed.join("\n"));
        }

        if success {
            Ok(report)
        } else {
            Err(Error::ApplyFailed(report))
        }
    }

    /// Every binding exists, is attached and carries exactly its VLANs
    fn already_applied(&self, bindings: &[InterfaceVlanBinding]) -> bool {
        let table = match self.bridge.vlan_table(&self.host) {
            Ok(table) => table,
            Err(e) => {
                tracing::debug!(error = %e, "cannot read VLAN table, reapplying");
                return false;
            }
        };

        bindings.iter().all(|binding| {
            let attached = LinkInfo::query(&self.host, &binding.name)
                .is_some_and(|link| link.is_attached_to(self.bridge.name()));
            attached
                && table
                    .get(&binding.name)
                    .is_some_and(|port| binding.matches(port))
        })
    }

    /// Apply one binding, returning the failed steps
    fn apply(&self, binding: &InterfaceVlanBinding) -> Vec<String> {
        let cmd = self.host.cmd();
        let name = binding.name.as_str();
        let mut errors = Vec::new();

        let out = self.host.probe(cmd.link_show(name));
        if !out.ok {
            errors.push(format!("interface not found: {}", out.output.trim()));
            return errors;
        }

        let out = self
            .host
            .best_effort(cmd.link_master(name, self.bridge.name()));
        if !out.succeeded() {
            errors.push(format!("attach to {}: {}", self.bridge.name(), out.output.trim()));
        }

        let out = self.host.run(cmd.link_set(name, LinkState::Up));
        if !out.ok {
            errors.push(format!("bring up: {}", out.output.trim()));
        }

        self.host.best_effort(cmd.bridge_vlan_del(
            name,
            &DEFAULT_VLAN.to_string(),
            VlanFlags::PvidUntagged,
        ));

        match &binding.membership {
            Membership::Access(vlan) => {
                self.add_vlan(name, *vlan, VlanFlags::PvidUntagged, "UNTAG", &mut errors);
            }
            Membership::Trunk(vlans) => {
                for vlan in vlans.iter() {
                    self.add_vlan(name, vlan, VlanFlags::Tagged, "TAG", &mut errors);
                }
            }
        }
        errors
    }

    /// Add a VLAN to a port and register it on the bridge itself
    fn add_vlan(
        &self,
        port: &str,
        vlan: VlanId,
        flags: VlanFlags,
        label: &str,
        errors: &mut Vec<String>,
    ) {
        let cmd = self.host.cmd();
        let vid = vlan.to_string();

        let out = self.host.run(cmd.bridge_vlan_add(port, &vid, flags));
        if !out.ok {
            errors.push(format!("{} VLAN {}: {}", label, vlan, out.output.trim()));
        }
        let out = self
            .host
            .run(cmd.bridge_vlan_add(self.bridge.name(), &vid, VlanFlags::OnBridge));
        if !out.ok {
            errors.push(format!("VLAN {} on bridge: {}", vlan, out.output.trim()));
        }
    }

    /// Detach every declared interface; always succeeds
    pub fn stop(&self) -> Result<String> {
        let mut config = self.load()?;
        let cmd = self.host.cmd();

        for stored in &config.interfaces {
            let name = stored.name.trim();
            if let Err(e) = self.validate_name(name) {
                tracing::warn!(interface = %name, error = %e, "skipping invalid stored interface");
                continue;
            }
            self.host.best_effort(cmd.link_nomaster(name));
            self.host
                .best_effort(cmd.bridge_vlan_del(name, ALL_VLANS, VlanFlags::Tagged));
        }

        self.persist_status(&mut config, ModuleStatus::Inactive);
        tracing::info!("tagging stopped");
        Ok("Tagging stopped".to_string())
    }

    pub fn restart(&self) -> Result<String> {
        self.stop()?;
        self.start()
    }

    /// Live view of the bridge and every declared interface
    pub fn status(&self) -> Result<TaggingStatus> {
        let config = self.load()?;
        let bridge_link = self.bridge.link(&self.host);

        let interfaces = config
            .valid_bindings()
            .into_iter()
            .map(|binding| {
                let link = LinkInfo::query(&self.host, &binding.name);
                InterfaceStatus {
                    name: binding.name.clone(),
                    exists: link.is_some(),
                    up: link.as_ref().is_some_and(|l| l.up),
                    attached: link
                        .as_ref()
                        .is_some_and(|l| l.is_attached_to(self.bridge.name())),
                    binding,
                }
            })
            .collect();

        let vlan_table = if bridge_link.is_some() {
            self.bridge.vlan_table(&self.host).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "bridge VLAN table unavailable");
                BridgeVlanTable::new()
            })
        } else {
            BridgeVlanTable::new()
        };

        Ok(TaggingStatus {
            bridge: self.bridge.name().to_string(),
            bridge_exists: bridge_link.is_some(),
            bridge_up: bridge_link.is_some_and(|l| l.up),
            status: config.status,
            interfaces,
            vlan_table,
        })
    }

    /// Declare or replace the binding of one interface
    pub fn add(&self, name: &str, untag: Option<&str>, tag: Option<&str>) -> Result<String> {
        let name = name.trim();
        self.validate_name(name)?;
        let binding = InterfaceVlanBinding::new(name, untag, tag)?;
        VlanRegistry::load(&self.store).check(binding.vlan_ids())?;

        let mut config = self.load()?;
        if let Some(stored) = config.find(name) {
            let existing = stored.parse().ok().and_then(|b| b.untag());
            let claims = IsolationClaims::load(&self.store)?;
            if let Some(vlan) = claims.claimant(name) {
                let unchanged = binding.untag().is_some() && binding.untag() == existing;
                if !unchanged {
                    return Err(Error::StateConflict(format!(
                        "interface {} is isolated in VLAN {}; release VLAN {} from isolation before changing it",
                        name, vlan, vlan
                    )));
                }
            }
        }

        let summary = binding.membership.to_string();
        config.upsert(binding);
        self.store.save(Module::Tagging, &config)?;
        tracing::info!(interface = %name, membership = %summary, "binding saved");
        Ok(format!("Interface {} added ({})", name, summary))
    }

    /// Drop the binding of one interface
    pub fn remove(&self, name: &str) -> Result<String> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::Validation("interface name is empty".to_string()));
        }

        let claims = IsolationClaims::load(&self.store)?;
        if let Some(vlan) = claims.claimant(name) {
            return Err(Error::StateConflict(format!(
                "interface {} is isolated in VLAN {}; release VLAN {} from isolation first",
                name, vlan, vlan
            )));
        }

        let mut config = self.load()?;
        if !config.remove(name) {
            return Err(Error::NotConfigured(format!("Interface {}", name)));
        }
        self.store.save(Module::Tagging, &config)?;
        tracing::info!(interface = %name, "binding removed");
        Ok(format!("Interface {} removed", name))
    }

    pub fn show(&self) -> Result<BindingList> {
        Ok(BindingList(self.load()?.valid_bindings()))
    }
}
