//! Read-only views of documents owned by neighbouring modules
//!
//! Provides:
//! - [`VlanRegistry`]: VLAN ids declared by the VLAN module
//! - [`IsolationClaims`]: interfaces the isolation module holds per VLAN

use crate::error::{Error, Result};
use crate::gate::Module;
use crate::network::vlan::{VlanId, VlanSet};
use crate::store::ConfigStore;
use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Deserialize)]
struct RegistryDoc {
    #[serde(default)]
    vlans: Vec<RegistryEntry>,
}

#[derive(Deserialize)]
struct RegistryEntry {
    id: VlanId,
}

/// VLAN ids declared by the VLAN module
#[derive(Debug, Clone, Default)]
pub struct VlanRegistry {
    ids: VlanSet,
}

impl VlanRegistry {
    /// Load the registry
    ///
    /// An absent or unreadable registry is empty: the VLAN module may not
    /// be provisioned yet.
    pub fn load(store: &ConfigStore) -> Self {
        match store.load_optional::<RegistryDoc>(Module::Vlans) {
            Ok(Some(doc)) => Self::from_ids(doc.vlans.into_iter().map(|v| v.id).collect()),
            Ok(None) => Self::default(),
            Err(e) => {
                tracing::debug!(error = %e, "VLAN registry unreadable, not enforcing");
                Self::default()
            }
        }
    }

    pub fn from_ids(ids: VlanSet) -> Self {
        Self { ids }
    }

    /// Reject the first id the registry does not declare
    ///
    /// An empty registry accepts everything.
    pub fn check(&self, ids: impl IntoIterator<Item = VlanId>) -> Result<()> {
        if self.ids.is_empty() {
            return Ok(());
        }
        for id in ids {
            if !self.ids.contains(id) {
                return Err(Error::Validation(format!(
                    "VLAN {} does not exist; declare it in the vlans module first",
                    id
                )));
            }
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct ClaimEntry {
    #[serde(default)]
    interfaces: Vec<String>,
}

/// Interfaces claimed by the isolation module, keyed by VLAN id
#[derive(Debug, Clone, Default)]
pub struct IsolationClaims {
    claims: BTreeMap<VlanId, Vec<String>>,
}

impl IsolationClaims {
    /// Load the claims
    ///
    /// An absent document means no claims; one that exists but cannot be
    /// read is an error.
    pub fn load(store: &ConfigStore) -> Result<Self> {
        let doc: Option<BTreeMap<String, serde_json::Value>> =
            store.load_optional(Module::Ebtables)?;
        let Some(doc) = doc else {
            return Ok(Self::default());
        };

        let path = store.path(Module::Ebtables);
        let mut claims = BTreeMap::new();
        for (key, value) in doc {
            if key == "status" {
                continue;
            }
            let Ok(vlan) = key.parse::<VlanId>() else {
                tracing::debug!(key = %key, "ignoring non-VLAN key in isolation claims");
                continue;
            };
            let entry: ClaimEntry = serde_json::from_value(value).map_err(|source| {
                Error::DocumentParse {
                    path: path.clone(),
                    source,
                }
            })?;
            claims.insert(vlan, entry.interfaces);
        }
        Ok(Self { claims })
    }

    /// First VLAN whose isolation set holds `iface`
    pub fn claimant(&self, iface: &str) -> Option<VlanId> {
        self.claims
            .iter()
            .find(|(_, ifaces)| ifaces.iter().any(|i| i == iface))
            .map(|(vlan, _)| *vlan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &TempDir, module: &str, content: &str) {
        let path = dir.path().join(module);
        fs::create_dir_all(&path).unwrap();
        fs::write(path.join(format!("{module}.json")), content).unwrap();
    }

    fn ids(list: &str) -> Vec<VlanId> {
        VlanSet::parse(list).unwrap().iter().collect()
    }

    #[test]
    fn test_registry_enforces_declared_ids() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "vlans",
            r#"{"vlans": [{"id": 1}, {"id": "2"}, {"id": 3, "name": "lan"}], "status": 1}"#,
        );
        let registry = VlanRegistry::load(&ConfigStore::new(dir.path()));
        assert!(registry.check(ids("1-3")).is_ok());
        let err = registry.check(ids("3,4")).unwrap_err();
        assert!(err.to_string().contains("VLAN 4"));
    }

    #[test]
    fn test_registry_absent_or_broken_is_permissive() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path());
        assert!(VlanRegistry::load(&store).check(ids("11")).is_ok());

        write(&dir, "vlans", "garbage");
        assert!(VlanRegistry::load(&store).check(ids("11")).is_ok());
    }

    #[test]
    fn test_claims_lookup() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "ebtables",
            r#"{"status": 1, "7": {"interfaces": ["eth1", "eth2"]}, "9": {"interfaces": []}}"#,
        );
        let claims = IsolationClaims::load(&ConfigStore::new(dir.path())).unwrap();
        assert_eq!(claims.claimant("eth2").map(VlanId::get), Some(7));
        assert_eq!(claims.claimant("eth3"), None);
    }

    #[test]
    fn test_unreadable_claims_fail_closed() {
        let dir = TempDir::new().unwrap();
        write(&dir, "ebtables", "{broken");
        assert!(IsolationClaims::load(&ConfigStore::new(dir.path())).is_err());

        write(&dir, "ebtables", r#"{"7": {"interfaces": "eth1"}}"#);
        assert!(IsolationClaims::load(&ConfigStore::new(dir.path())).is_err());
    }
}
