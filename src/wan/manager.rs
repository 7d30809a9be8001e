//! WAN lifecycle manager
//!
//! Handles:
//! - Manual addressing as an ordered step sequence with rollback
//! - DHCP launch plus the background lease verification
//! - Stop, restart, status (read-once DHCP errors) and reconfiguration
//!
//! Every status change goes through [`WanLifecycle`] and bumps the
//! document generation under the WAN document lock, so a verification
//! started for an older generation can no longer commit.

use crate::error::{Error, Result};
use crate::gate::{DependencyGate, Module};
use crate::host::{Host, LinkState};
use crate::manifest::DhcpConfig;
use crate::network::ip::validate_manual_network;
use crate::network::link::{has_default_route, interface_exists, validate_interface_name, LinkInfo};
use crate::store::{ConfigStore, ModuleStatus};
use crate::wan::config::{Addressing, ManualAddressing, WanConfigRequest, WanDocument};
use crate::wan::dhcp::{DhcpVerifier, LeaseProbe, VerificationTask};
use crate::wan::lifecycle::{WanEvent, WanLifecycle};
use crate::wan::report::WanStatus;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;

/// Drives the uplink interface
pub struct WanManager {
    host: Host,
    store: ConfigStore,
    gate: Arc<DependencyGate>,
    runtime: Handle,
    dhcp: DhcpConfig,
    /// Serializes document writes with the verification task
    lock: Arc<Mutex<()>>,
    task: Option<VerificationTask>,
}

impl WanManager {
    pub fn new(
        host: Host,
        store: ConfigStore,
        gate: Arc<DependencyGate>,
        runtime: Handle,
        dhcp: DhcpConfig,
    ) -> Self {
        Self {
            host,
            store,
            gate,
            runtime,
            dhcp,
            lock: Arc::new(Mutex::new(())),
            task: None,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn load(&self) -> Result<WanDocument> {
        self.store.load(Module::Wan)
    }

    /// Apply a lifecycle event to the stored document
    ///
    /// Returns the new generation. The write itself is best-effort.
    fn transition(&self, event: WanEvent, edit: impl FnOnce(&mut WanDocument)) -> Result<u64> {
        let _guard = self.lock();
        let mut doc = self.load()?;
        let mut lifecycle = WanLifecycle::from_status(doc.status);
        doc.status = lifecycle.apply(event)?;
        edit(&mut doc);
        doc.generation += 1;
        self.store.save_or_warn(Module::Wan, &doc);
        tracing::debug!(event = %event, status = %doc.status, generation = doc.generation, "WAN transition");
        Ok(doc.generation)
    }

    fn deactivate(&self) {
        if let Err(e) = self.transition(WanEvent::Deactivate, |_| {}) {
            tracing::warn!(error = %e, "failed to record WAN as inactive");
        }
    }

    fn cancel_verification(&mut self) {
        if let Some(task) = self.task.take() {
            if !task.is_finished() {
                tracing::info!(generation = task.generation(), "cancelling DHCP verification");
            }
            task.abort();
        }
    }

    /// Hand the running verification to the caller
    pub fn take_verification(&mut self) -> Option<VerificationTask> {
        self.task.take()
    }

    /// Bring the uplink up in its configured mode
    pub fn start(&mut self) -> Result<String> {
        self.gate.check(Module::Wan, &self.store)?;

        let settings = self.load()?.settings()?;
        if !interface_exists(&self.host, &settings.interface) {
            return Err(Error::InterfaceNotFound(settings.interface));
        }
        self.cancel_verification();

        match &settings.addressing {
            Addressing::Dhcp => self.start_dhcp(&settings.interface),
            Addressing::Manual(manual) => self.start_manual(&settings.interface, manual),
        }
    }

    fn start_dhcp(&mut self, iface: &str) -> Result<String> {
        let out = self.host.run(self.host.cmd().dhcp_start(iface));
        if !out.ok {
            return Err(Error::ExternalCommand {
                step: "launch DHCP client".to_string(),
                message: out.output,
            });
        }

        let generation = self.transition(WanEvent::Negotiate, |doc| doc.dhcp_error = None)?;
        let verifier = DhcpVerifier::new(
            self.host.clone(),
            self.store.clone(),
            self.lock.clone(),
            &self.dhcp,
        );
        let handle = self.runtime.spawn(verifier.run(iface.to_string(), generation));
        self.task = Some(VerificationTask::new(handle, generation));

        tracing::info!(interface = %iface, generation, "DHCP client launched");
        Ok(format!(
            "DHCP client started on {}; lease verification continues in the background",
            iface
        ))
    }

    fn start_manual(&mut self, iface: &str, manual: &ManualAddressing) -> Result<String> {
        let cmd = self.host.cmd();
        let steps = [
            ("flush addresses", cmd.addr_flush(iface)),
            ("assign address", cmd.addr_add(iface, manual.ip, manual.mask)),
            ("bring link up", cmd.link_set(iface, LinkState::Up)),
            ("add default route", cmd.route_add_default(manual.gateway, iface)),
        ];
        for (step, argv) in steps {
            self.step(iface, step, argv)?;
        }

        if !manual.dns.is_empty() {
            self.step(iface, "revert DNS", cmd.dns_revert(iface))?;
            self.step(iface, "configure DNS", cmd.dns_set(iface, &manual.dns))?;
        }

        let probe = LeaseProbe::observe(&self.host, iface);
        if !probe.complete() {
            self.deactivate();
            return Err(Error::IncompleteConfiguration(format!(
                "{} did not come up: {}",
                iface,
                probe.missing()
            )));
        }

        self.transition(WanEvent::Configure, |doc| doc.dhcp_error = None)?;
        tracing::info!(interface = %iface, ip = %manual.ip, "WAN started");
        Ok(format!(
            "WAN started on {} ({}/{} via {})",
            iface, manual.ip, manual.mask, manual.gateway
        ))
    }

    /// One hard step of the manual sequence; rolls back on failure
    fn step(&self, iface: &str, step: &str, argv: Vec<String>) -> Result<()> {
        let out = self.host.run(argv);
        if out.ok {
            return Ok(());
        }
        tracing::warn!(interface = %iface, step, output = %out.output, "WAN step failed, rolling back");
        self.rollback(iface);
        self.deactivate();
        Err(Error::ExternalCommand {
            step: step.to_string(),
            message: out.output,
        })
    }

    fn rollback(&self, iface: &str) {
        let cmd = self.host.cmd();
        self.host.best_effort(cmd.dns_revert(iface));
        self.host.best_effort(cmd.route_flush(iface));
        self.host.best_effort(cmd.addr_flush(iface));
        self.host.best_effort(cmd.link_set(iface, LinkState::Down));
    }

    /// Tear the uplink down
    pub fn stop(&mut self) -> Result<String> {
        let doc = self.load()?;
        let Some(iface) = doc.interface else {
            return Err(Error::NotConfigured("WAN interface".to_string()));
        };
        validate_interface_name(&iface).map_err(Error::Validation)?;

        self.host.best_effort(self.host.cmd().dns_revert(&iface));
        let out = self.host.run(self.host.cmd().link_set(&iface, LinkState::Down));
        if !out.ok {
            return Err(Error::ExternalCommand {
                step: "bring link down".to_string(),
                message: out.output,
            });
        }

        self.cancel_verification();
        let cmd = self.host.cmd();
        self.host.best_effort(cmd.addr_flush(&iface));
        self.host.best_effort(cmd.route_flush(&iface));
        self.host.best_effort(cmd.dhcp_stop(&iface));

        self.transition(WanEvent::Deactivate, |_| {})?;
        tracing::info!(interface = %iface, "WAN stopped");
        Ok("WAN stopped".to_string())
    }

    pub fn restart(&mut self) -> Result<String> {
        self.stop()?;
        self.start()
    }

    /// Live status; a recorded DHCP error is reported once instead
    pub fn status(&self) -> Result<WanStatus> {
        let doc = {
            let _guard = self.lock();
            let mut doc = self.load()?;
            if let Some(message) = doc.dhcp_error.take() {
                self.store.save_or_warn(Module::Wan, &doc);
                return Err(Error::DhcpFailed(message));
            }
            doc
        };

        let Some(iface) = doc.interface.clone() else {
            return Err(Error::NotConfigured("WAN interface".to_string()));
        };
        let details = self.host.probe(self.host.cmd().addr_show(&iface));
        if !details.ok {
            return Err(Error::InterfaceNotFound(iface));
        }
        let link = LinkInfo::parse(&details.output).unwrap_or_default();
        let routes = self.host.probe(self.host.cmd().route_show());
        let routes = if routes.ok { routes.output } else { String::new() };

        Ok(WanStatus {
            default_route: has_default_route(&routes, &iface),
            interface: iface,
            mode: doc.mode,
            status: doc.status,
            link_up: link.up,
            addresses: link.addresses,
            details: details.output,
            routes,
        })
    }

    pub fn show(&self) -> Result<WanDocument> {
        self.load()
    }

    /// Replace the stored configuration
    pub fn config(&mut self, request: WanConfigRequest) -> Result<String> {
        validate_interface_name(&request.interface).map_err(Error::Validation)?;
        let manual = request.manual_addressing()?;
        if let Some(m) = &manual {
            validate_manual_network(m.ip, m.mask, m.gateway)?;
        }
        if !interface_exists(&self.host, &request.interface) {
            return Err(Error::InterfaceNotFound(request.interface));
        }

        self.cancel_verification();
        let _guard = self.lock();
        let previous = self.load().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "replacing unreadable WAN document");
            WanDocument::default()
        });

        let mut doc = WanDocument {
            interface: Some(request.interface.clone()),
            mode: Some(request.mode),
            status: match previous.status {
                ModuleStatus::Pending => ModuleStatus::Inactive,
                status => status,
            },
            generation: previous.generation + 1,
            ..WanDocument::default()
        };
        match manual {
            Some(m) => {
                doc.ip = Some(m.ip);
                doc.mask = Some(m.mask);
                doc.gateway = Some(m.gateway);
                doc.dns = m.dns;
            }
            None => doc.dhcp_error = previous.dhcp_error,
        }
        self.store.save(Module::Wan, &doc)?;

        tracing::info!(interface = %request.interface, mode = %request.mode, "WAN configured");
        Ok(format!(
            "WAN configured on {} ({} mode)",
            request.interface, request.mode
        ))
    }
}
