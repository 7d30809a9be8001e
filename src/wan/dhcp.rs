//! Background DHCP lease verification
//!
//! Provides:
//! - [`LeaseProbe`]: one look at link, address and default route
//! - [`DhcpVerifier`]: polls until the lease is complete or the budget runs out
//! - [`VerificationTask`]: handle to a running verification
//!
//! The verifier writes the WAN document exactly once, and only if the
//! document's generation still matches the one it was started for.

use crate::gate::Module;
use crate::host::Host;
use crate::manifest::DhcpConfig;
use crate::network::link::{has_default_route, LinkInfo};
use crate::store::{ConfigStore, ModuleStatus};
use crate::wan::config::WanDocument;
use crate::wan::lifecycle::{WanEvent, WanLifecycle};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Observed uplink state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LeaseProbe {
    pub link_up: bool,
    pub has_address: bool,
    pub has_route: bool,
}

impl LeaseProbe {
    /// Inspect the live state of `iface`
    pub fn observe(host: &Host, iface: &str) -> Self {
        let Some(link) = LinkInfo::query(host, iface) else {
            return Self::default();
        };
        let routes = host.probe(host.cmd().route_show());
        Self {
            link_up: link.up,
            has_address: !link.addresses.is_empty(),
            has_route: routes.ok && has_default_route(&routes.output, iface),
        }
    }

    pub fn complete(&self) -> bool {
        self.link_up && self.has_address && self.has_route
    }

    /// What is still missing, for error messages
    pub fn missing(&self) -> String {
        let mut missing = Vec::new();
        if !self.has_address {
            missing.push("no IPv4 address");
        }
        if !self.link_up {
            missing.push("link is not up");
        }
        if !self.has_route {
            missing.push("no default route");
        }
        missing.join(", ")
    }
}

/// How a verification ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// Lease complete, status set Active
    Confirmed,
    /// Budget exhausted, error recorded for the next status query
    Failed(String),
    /// A later start, stop or reconfiguration owns the document now
    Superseded,
    /// The task was aborted before it could commit
    Cancelled,
}

impl fmt::Display for VerifyOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifyOutcome::Confirmed => write!(f, "DHCP lease confirmed"),
            VerifyOutcome::Failed(reason) => write!(f, "DHCP verification failed: {}", reason),
            VerifyOutcome::Superseded => write!(f, "DHCP verification superseded"),
            VerifyOutcome::Cancelled => write!(f, "DHCP verification cancelled"),
        }
    }
}

/// Polls the uplink after the DHCP client was launched
pub struct DhcpVerifier {
    host: Host,
    store: ConfigStore,
    lock: Arc<Mutex<()>>,
    poll_interval: Duration,
    max_wait: Duration,
}

impl DhcpVerifier {
    pub fn new(host: Host, store: ConfigStore, lock: Arc<Mutex<()>>, dhcp: &DhcpConfig) -> Self {
        Self {
            host,
            store,
            lock,
            poll_interval: dhcp.poll_interval(),
            max_wait: dhcp.max_wait(),
        }
    }

    /// Poll until the lease is complete or the budget is exhausted
    pub async fn run(self, iface: String, generation: u64) -> VerifyOutcome {
        let deadline = Instant::now() + self.max_wait;

        loop {
            tokio::time::sleep(self.poll_interval).await;

            let host = self.host.clone();
            let name = iface.clone();
            let probe = tokio::task::spawn_blocking(move || LeaseProbe::observe(&host, &name))
                .await
                .unwrap_or_default();

            if probe.complete() {
                return self.finish(generation, Ok(())).await;
            }
            if Instant::now() >= deadline {
                let reason = format!(
                    "no lease on {} after {}s: {}",
                    iface,
                    self.max_wait.as_secs(),
                    probe.missing()
                );
                return self.finish(generation, Err(reason)).await;
            }
            tracing::debug!(interface = %iface, missing = %probe.missing(), "waiting for DHCP lease");
        }
    }

    /// Record the result off the async workers; the commit blocks on the
    /// document lock and file I/O
    async fn finish(self, generation: u64, result: std::result::Result<(), String>) -> VerifyOutcome {
        tokio::task::spawn_blocking(move || self.commit(generation, result))
            .await
            .unwrap_or_else(|e| VerifyOutcome::Failed(format!("DHCP result not recorded: {}", e)))
    }

    /// Single write of the verification result
    fn commit(&self, generation: u64, result: std::result::Result<(), String>) -> VerifyOutcome {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut doc: WanDocument = match self.store.load(Module::Wan) {
            Ok(doc) => doc,
            Err(e) => {
                tracing::warn!(error = %e, "cannot read WAN document to record DHCP result");
                return VerifyOutcome::Failed(e.to_string());
            }
        };

        let mut lifecycle = WanLifecycle::from_status(doc.status);
        if doc.generation != generation || lifecycle.status() != ModuleStatus::Pending {
            tracing::info!(
                expected = generation,
                found = doc.generation,
                status = %doc.status,
                "DHCP verification superseded"
            );
            return VerifyOutcome::Superseded;
        }

        let (event, outcome) = match result {
            Ok(()) => (WanEvent::Confirm, VerifyOutcome::Confirmed),
            Err(reason) => {
                doc.dhcp_error = Some(reason.clone());
                (WanEvent::Deactivate, VerifyOutcome::Failed(reason))
            }
        };
        match lifecycle.apply(event) {
            Ok(status) => doc.status = status,
            Err(e) => {
                tracing::warn!(error = %e, "DHCP verification could not commit");
                return VerifyOutcome::Superseded;
            }
        }

        self.store.save_or_warn(Module::Wan, &doc);
        match &outcome {
            VerifyOutcome::Failed(reason) => tracing::warn!(reason = %reason, "DHCP verification failed"),
            _ => tracing::info!("DHCP lease confirmed"),
        }
        outcome
    }
}

/// Handle to a running verification
#[derive(Debug)]
pub struct VerificationTask {
    handle: JoinHandle<VerifyOutcome>,
    generation: u64,
}

impl VerificationTask {
    pub fn new(handle: JoinHandle<VerifyOutcome>, generation: u64) -> Self {
        Self { handle, generation }
    }

    /// Document generation this task may commit to
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn abort(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the task's outcome
    pub async fn outcome(self) -> VerifyOutcome {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_cancelled() => VerifyOutcome::Cancelled,
            Err(e) => VerifyOutcome::Failed(format!("verification task panicked: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeHost, Lease};
    use crate::wan::config::WanMode;
    use tempfile::TempDir;

    fn dhcp_config() -> DhcpConfig {
        DhcpConfig {
            poll_interval_ms: 10,
            max_wait_secs: 1,
        }
    }

    fn pending_doc(store: &ConfigStore, generation: u64) {
        let doc = WanDocument {
            interface: Some("eth0".into()),
            mode: Some(WanMode::Dhcp),
            status: ModuleStatus::Pending,
            generation,
            ..WanDocument::default()
        };
        store.save(Module::Wan, &doc).unwrap();
    }

    #[test]
    fn test_probe_reports_missing_parts() {
        let fake = FakeHost::new();
        fake.add_link("eth0");
        let probe = LeaseProbe::observe(&fake.host(), "eth0");
        assert!(!probe.complete());
        assert_eq!(probe.missing(), "no IPv4 address, link is not up, no default route");

        assert_eq!(LeaseProbe::observe(&fake.host(), "eth7"), LeaseProbe::default());
    }

    #[tokio::test]
    async fn test_confirms_lease() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path());
        pending_doc(&store, 3);

        let fake = FakeHost::new();
        fake.add_link("eth0");
        fake.offer_lease("eth0", Lease::new("100.64.0.10/24", "100.64.0.1"));
        let host = fake.host();
        host.run(host.cmd().dhcp_start("eth0"));

        let verifier = DhcpVerifier::new(host, store.clone(), Arc::default(), &dhcp_config());
        assert_eq!(verifier.run("eth0".into(), 3).await, VerifyOutcome::Confirmed);

        let doc: WanDocument = store.load(Module::Wan).unwrap();
        assert_eq!(doc.status, ModuleStatus::Active);
        assert!(doc.dhcp_error.is_none());
    }

    #[tokio::test]
    async fn test_records_failure() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path());
        pending_doc(&store, 1);

        let fake = FakeHost::new();
        fake.add_link("eth0");
        let verifier = DhcpVerifier::new(fake.host(), store.clone(), Arc::default(), &dhcp_config());
        let outcome = verifier.run("eth0".into(), 1).await;
        assert!(matches!(outcome, VerifyOutcome::Failed(ref r) if r.contains("no IPv4 address")));

        let doc: WanDocument = store.load(Module::Wan).unwrap();
        assert_eq!(doc.status, ModuleStatus::Inactive);
        assert!(doc.dhcp_error.unwrap().contains("eth0"));
    }

    #[tokio::test]
    async fn test_stale_generation_does_not_write() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path());
        pending_doc(&store, 5);

        let fake = FakeHost::new();
        fake.add_link("eth0");
        fake.offer_lease("eth0", Lease::new("100.64.0.10/24", "100.64.0.1"));
        let host = fake.host();
        host.run(host.cmd().dhcp_start("eth0"));

        let verifier = DhcpVerifier::new(host, store.clone(), Arc::default(), &dhcp_config());
        assert_eq!(verifier.run("eth0".into(), 4).await, VerifyOutcome::Superseded);

        let doc: WanDocument = store.load(Module::Wan).unwrap();
        assert_eq!(doc.status, ModuleStatus::Pending);
    }

    #[tokio::test]
    async fn test_commit_waits_for_lock_off_the_runtime() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path());
        pending_doc(&store, 2);

        let fake = FakeHost::new();
        fake.add_link("eth0");
        fake.offer_lease("eth0", Lease::new("100.64.0.10/24", "100.64.0.1"));
        let host = fake.host();
        host.run(host.cmd().dhcp_start("eth0"));

        let lock: Arc<Mutex<()>> = Arc::default();
        let held = lock.clone();
        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let holder = std::thread::spawn(move || {
            let _guard = held.lock().unwrap();
            locked_tx.send(()).unwrap();
            std::thread::sleep(Duration::from_millis(300));
        });
        locked_rx.recv().unwrap();

        let verifier = DhcpVerifier::new(host, store.clone(), lock, &dhcp_config());
        let task = tokio::spawn(verifier.run("eth0".into(), 2));

        // The lease is seen on the first poll; the commit then waits on the lock
        let started = std::time::Instant::now();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(started.elapsed() < Duration::from_millis(250));
        assert!(!task.is_finished());

        holder.join().unwrap();
        assert_eq!(task.await.unwrap(), VerifyOutcome::Confirmed);
        let doc: WanDocument = store.load(Module::Wan).unwrap();
        assert_eq!(doc.status, ModuleStatus::Active);
    }

    #[tokio::test]
    async fn test_aborted_task_is_cancelled() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path());
        pending_doc(&store, 1);

        let fake = FakeHost::new();
        fake.add_link("eth0");
        let verifier = DhcpVerifier::new(fake.host(), store.clone(), Arc::default(), &dhcp_config());
        let task = VerificationTask::new(tokio::spawn(verifier.run("eth0".into(), 1)), 1);
        task.abort();
        assert_eq!(task.outcome().await, VerifyOutcome::Cancelled);

        let doc: WanDocument = store.load(Module::Wan).unwrap();
        assert_eq!(doc.status, ModuleStatus::Pending);
    }
}
