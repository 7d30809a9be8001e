//! Declared interface-to-VLAN bindings
//!
//! The stored document keeps the two-field layout other tools read
//! (`vlan_untag` / `vlan_tag`, empty string when unused); in memory a
//! binding is either an access port or a trunk, never both.

use crate::error::{Error, Result};
use crate::network::bridge::PortVlans;
use crate::network::vlan::{VlanId, VlanSet};
use crate::store::ModuleStatus;
use serde::{Deserialize, Serialize};
use std::fmt;

/// VLAN membership of one interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Membership {
    /// Single untagged VLAN, also the PVID
    Access(VlanId),
    /// Tagged VLANs, no PVID
    Trunk(VlanSet),
}

impl fmt::Display for Membership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Membership::Access(vlan) => write!(f, "UNTAG={}", vlan),
            Membership::Trunk(vlans) => write!(f, "TAG={}", vlans),
        }
    }
}

/// Physical interface bound to the bridge with a VLAN membership
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "StoredBinding", into = "StoredBinding")]
pub struct InterfaceVlanBinding {
    pub name: String,
    pub membership: Membership,
}

impl InterfaceVlanBinding {
    /// Build a binding from the two optional fields
    ///
    /// Exactly one of `untag`/`tag` must be non-empty.
    pub fn new(name: &str, untag: Option<&str>, tag: Option<&str>) -> Result<Self> {
        let untag = untag.map(str::trim).filter(|s| !s.is_empty());
        let tag = tag.map(str::trim).filter(|s| !s.is_empty());

        let membership = match (untag, tag) {
            (Some(untag), Some(tag)) => {
                return Err(Error::Validation(format!(
                    "interface {} cannot be untagged in VLAN {} and tagged in VLANs {}; choose one",
                    name, untag, tag
                )));
            }
            (None, None) => {
                return Err(Error::Validation(format!(
                    "interface {} needs either an untagged VLAN or a tagged VLAN list",
                    name
                )));
            }
            (Some(untag), None) => Membership::Access(untag.parse()?),
            (None, Some(tag)) => Membership::Trunk(VlanSet::parse(tag)?),
        };

        Ok(Self {
            name: name.trim().to_string(),
            membership,
        })
    }

    /// Every VLAN the binding references
    pub fn vlan_ids(&self) -> Vec<VlanId> {
        match &self.membership {
            Membership::Access(vlan) => vec![*vlan],
            Membership::Trunk(vlans) => vlans.iter().collect(),
        }
    }

    pub fn untag(&self) -> Option<VlanId> {
        match &self.membership {
            Membership::Access(vlan) => Some(*vlan),
            Membership::Trunk(_) => None,
        }
    }

    /// Whether the live port carries exactly the declared membership
    pub fn matches(&self, port: &PortVlans) -> bool {
        match &self.membership {
            Membership::Access(vlan) => port.is_access(*vlan),
            Membership::Trunk(vlans) => port.is_trunk(vlans),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
enum RawVlanField {
    Number(u64),
    Text(String),
}

impl Default for RawVlanField {
    fn default() -> Self {
        RawVlanField::Text(String::new())
    }
}

impl RawVlanField {
    fn into_text(self) -> String {
        match self {
            RawVlanField::Number(n) => n.to_string(),
            RawVlanField::Text(s) => s,
        }
    }
}

/// One entry of the stored document, as written
///
/// Entries are kept raw so a single bad record does not make the whole
/// document unreadable; [`StoredBinding::parse`] validates on use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredBinding {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    vlan_untag: RawVlanField,
    #[serde(default)]
    vlan_tag: RawVlanField,
}

impl StoredBinding {
    pub fn parse(&self) -> Result<InterfaceVlanBinding> {
        InterfaceVlanBinding::try_from(self.clone())
    }
}

impl TryFrom<StoredBinding> for InterfaceVlanBinding {
    type Error = Error;

    fn try_from(raw: StoredBinding) -> Result<Self> {
        if raw.name.trim().is_empty() {
            return Err(Error::Validation("binding has no interface name".to_string()));
        }
        let untag = raw.vlan_untag.into_text();
        let tag = raw.vlan_tag.into_text();
        Self::new(&raw.name, Some(&untag), Some(&tag))
    }
}

impl From<InterfaceVlanBinding> for StoredBinding {
    fn from(binding: InterfaceVlanBinding) -> Self {
        let (untag, tag) = match binding.membership {
            Membership::Access(vlan) => (vlan.to_string(), String::new()),
            Membership::Trunk(vlans) => (String::new(), vlans.to_string()),
        };
        Self {
            name: binding.name,
            vlan_untag: RawVlanField::Text(untag),
            vlan_tag: RawVlanField::Text(tag),
        }
    }
}

/// Stored tagging document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaggingConfig {
    #[serde(default)]
    pub interfaces: Vec<StoredBinding>,
    #[serde(default)]
    pub status: ModuleStatus,
}

impl TaggingConfig {
    /// Every stored binding, failing on the first invalid entry
    pub fn bindings(&self) -> Result<Vec<InterfaceVlanBinding>> {
        self.interfaces
            .iter()
            .map(|raw| {
                raw.parse().map_err(|e| {
                    Error::Validation(format!("stored binding '{}': {}", raw.name, e))
                })
            })
            .collect()
    }

    /// The stored bindings that parse; invalid entries are logged and skipped
    pub fn valid_bindings(&self) -> Vec<InterfaceVlanBinding> {
        self.interfaces
            .iter()
            .filter_map(|raw| match raw.parse() {
                Ok(binding) => Some(binding),
                Err(e) => {
                    tracing::warn!(interface = %raw.name, error = %e, "skipping invalid stored binding");
                    None
                }
            })
            .collect()
    }

    pub fn find(&self, name: &str) -> Option<&StoredBinding> {
        self.interfaces.iter().find(|b| b.name.trim() == name)
    }

    /// Replace any binding with the same name, keeping names unique
    pub fn upsert(&mut self, binding: InterfaceVlanBinding) {
        self.interfaces.retain(|b| b.name.trim() != binding.name);
        self.interfaces.push(binding.into());
    }

    /// Returns whether a binding was removed
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.interfaces.len();
        self.interfaces.retain(|b| b.name.trim() != name);
        self.interfaces.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exactly_one_membership() {
        assert!(InterfaceVlanBinding::new("eth1", Some("10"), Some("20")).is_err());
        assert!(InterfaceVlanBinding::new("eth1", None, None).is_err());
        assert!(InterfaceVlanBinding::new("eth1", Some(""), Some("  ")).is_err());
        assert!(InterfaceVlanBinding::new("eth1", Some("10"), Some("")).is_ok());
    }

    #[test]
    fn test_untag_range() {
        assert!(InterfaceVlanBinding::new("eth1", Some("0"), None).is_err());
        assert!(InterfaceVlanBinding::new("eth1", Some("4095"), None).is_err());
        assert!(InterfaceVlanBinding::new("eth1", Some("1-3"), None).is_err());
    }

    #[test]
    fn test_document_layout() {
        let trunk = InterfaceVlanBinding::new("eth2", None, Some("3-5,12")).unwrap();
        let json = serde_json::to_value(&trunk).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"name": "eth2", "vlan_untag": "", "vlan_tag": "3,4,5,12"})
        );
    }

    #[test]
    fn test_reads_numeric_untag() {
        let binding: InterfaceVlanBinding =
            serde_json::from_str(r#"{"name": "eth1", "vlan_untag": 10}"#).unwrap();
        assert_eq!(binding.untag().map(VlanId::get), Some(10));
    }

    #[test]
    fn test_document_with_both_fields_rejected() {
        let result: std::result::Result<InterfaceVlanBinding, _> =
            serde_json::from_str(r#"{"name": "eth1", "vlan_untag": "10", "vlan_tag": "20"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_upsert_keeps_names_unique() {
        let mut config = TaggingConfig::default();
        config.upsert(InterfaceVlanBinding::new("eth1", Some("10"), None).unwrap());
        config.upsert(InterfaceVlanBinding::new("eth1", None, Some("20")).unwrap());
        assert_eq!(config.interfaces.len(), 1);
        assert!(config.find("eth1").unwrap().parse().unwrap().untag().is_none());
        assert!(config.remove("eth1"));
        assert!(!config.remove("eth1"));
    }

    #[test]
    fn test_bad_entry_does_not_spoil_document() {
        let config: TaggingConfig = serde_json::from_str(
            r#"{"interfaces": [
                {"name": "eth1", "vlan_untag": "10", "vlan_tag": ""},
                {"name": "eth2", "vlan_untag": 5000, "vlan_tag": ""},
                {"vlan_untag": "", "vlan_tag": "3"}
            ], "status": 1}"#,
        )
        .unwrap();

        assert_eq!(config.interfaces.len(), 3);
        let valid = config.valid_bindings();
        assert_eq!(valid.len(), 1);
        assert_eq!(valid[0].name, "eth1");

        let err = config.bindings().unwrap_err();
        assert!(err.to_string().contains("eth2"));
    }
}
