//! Bridge VLAN table
//!
//! Provides:
//! - Parsing of `bridge vlan show` output into a [`BridgeVlanTable`]
//! - Live queries against the managed bridge device

use crate::error::{Error, Result};
use crate::host::Host;
use crate::network::link::{self, LinkInfo};
use crate::network::vlan::{VlanId, VlanSet};
use serde::Serialize;
use std::collections::BTreeMap;

/// VLAN membership of one bridge port
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PortVlans {
    /// Every VLAN the port carries
    pub vlans: VlanSet,
    /// VLANs flagged PVID (primary, untagged ingress)
    pub pvids: VlanSet,
}

impl PortVlans {
    /// Exactly one VLAN, carried as the PVID
    pub fn is_access(&self, vlan: VlanId) -> bool {
        let only = |set: &VlanSet| set.len() == 1 && set.contains(vlan);
        only(&self.vlans) && only(&self.pvids)
    }

    /// Exactly the given tagged set, no PVID
    pub fn is_trunk(&self, vlans: &VlanSet) -> bool {
        &self.vlans == vlans && self.pvids.is_empty()
    }
}

/// Port name to VLAN membership, rebuilt from live output on demand
pub type BridgeVlanTable = BTreeMap<String, PortVlans>;

/// Line parser with one piece of carried state
///
/// A line led by a VLAN id continues the last named port; a line led by
/// any other token names a new port and becomes the carried port.
#[derive(Debug, Default)]
struct VlanTableParser {
    current: Option<String>,
    table: BridgeVlanTable,
}

impl VlanTableParser {
    fn feed(&mut self, line: &str) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let Some(&first) = fields.first() else {
            return;
        };
        if first == "port" {
            return;
        }

        let continued = match &self.current {
            Some(port) if is_vid_token(first) => Some(port.clone()),
            _ => None,
        };

        let (port, vid, flags) = match continued {
            // An id outside 1-4094 still continues the carried port
            Some(port) => (port, parse_vid(first), &fields[1..]),
            None => {
                self.current = Some(first.to_string());
                let vid = fields.get(1).and_then(|v| parse_vid(v));
                let flags = fields.get(2..).unwrap_or(&[]);
                (first.to_string(), vid, flags)
            }
        };

        let entry = self.table.entry(port).or_default();
        let Some(vid) = vid else {
            return;
        };
        let pvid = flags.contains(&"PVID");
        entry.vlans.extend(&vid);
        if pvid {
            entry.pvids.extend(&vid);
        }
    }

    fn finish(self) -> BridgeVlanTable {
        self.table
    }
}

/// Digits, optionally a compressed range (`10-12`)
fn is_vid_token(token: &str) -> bool {
    token.starts_with(|c: char| c.is_ascii_digit())
        && token.chars().all(|c| c.is_ascii_digit() || c == '-')
}

/// A vid column entry: a single id or a compressed range (`10-12`)
fn parse_vid(token: &str) -> Option<VlanSet> {
    if !is_vid_token(token) {
        return None;
    }
    VlanSet::parse(token).ok()
}

/// Parse `bridge vlan show` output
pub fn parse_vlan_table(output: &str) -> BridgeVlanTable {
    let mut parser = VlanTableParser::default();
    for line in output.lines() {
        parser.feed(line);
    }
    parser.finish()
}

/// The bridge device managed by the tagging reconciler
#[derive(Debug, Clone)]
pub struct Bridge {
    name: String,
}

impl Bridge {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check if the bridge device exists
    pub fn exists(&self, host: &Host) -> bool {
        link::interface_exists(host, &self.name)
    }

    /// Live link state of the bridge device
    pub fn link(&self, host: &Host) -> Option<LinkInfo> {
        LinkInfo::query(host, &self.name)
    }

    /// Read and parse the live VLAN table
    pub fn vlan_table(&self, host: &Host) -> Result<BridgeVlanTable> {
        let out = host.probe(host.cmd().bridge_vlan_show());
        if !out.ok {
            return Err(Error::ExternalCommand {
                step: "read bridge VLAN table".to_string(),
                message: out.output,
            });
        }
        Ok(parse_vlan_table(&out.output))
    }

    /// Whether `iface` names the bridge or one of its sub-interfaces
    pub fn is_reserved(&self, iface: &str) -> bool {
        iface == self.name
            || iface
                .strip_prefix(self.name.as_str())
                .is_some_and(|rest| rest.starts_with('.'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(list: &str) -> VlanSet {
        VlanSet::parse(list).unwrap()
    }

    const OUTPUT: &str = "\
port              vlan-id
br0               1 PVID Egress Untagged
                  10
                  20
eth1              10 PVID Egress Untagged
eth2              20
                  30
                  40-42

eth3              1 PVID Egress Untagged
";

    #[test]
    fn test_continuation_lines_attach_to_last_port() {
        let table = parse_vlan_table(OUTPUT);
        assert_eq!(table["br0"].vlans, set("1,10,20"));
        assert_eq!(table["br0"].pvids, set("1"));
        assert_eq!(table["eth2"].vlans, set("20,30,40,41,42"));
        assert!(table["eth2"].pvids.is_empty());
    }

    #[test]
    fn test_pvid_marker() {
        let table = parse_vlan_table(OUTPUT);
        assert!(table["eth1"].is_access(set("10").iter().next().unwrap()));
        assert_eq!(table["eth3"].pvids, set("1"));
    }

    #[test]
    fn test_named_line_resets_carried_port() {
        let output = "eth1 10\n 11\neth2 12\n 13\n";
        let table = parse_vlan_table(output);
        assert_eq!(table["eth1"].vlans, set("10,11"));
        assert_eq!(table["eth2"].vlans, set("12,13"));
    }

    #[test]
    fn test_out_of_range_continuation_keeps_port() {
        let output = "eth1 10\n 4095 PVID\n 11\neth2 12\n";
        let table = parse_vlan_table(output);
        assert!(!table.contains_key("4095"));
        assert_eq!(table["eth1"].vlans, set("10,11"));
        assert!(table["eth1"].pvids.is_empty());
        assert_eq!(table["eth2"].vlans, set("12"));
    }

    #[test]
    fn test_leading_vid_without_port_is_a_name() {
        // Nothing to continue yet, so the token is taken as a port name
        let table = parse_vlan_table("10 PVID\n");
        assert!(table.contains_key("10"));
        assert!(table["10"].vlans.is_empty());
    }

    #[test]
    fn test_port_without_vlans() {
        let table = parse_vlan_table("port vlan-id\neth4 None\n");
        assert!(table["eth4"].vlans.is_empty());
    }

    #[test]
    fn test_trunk_match_is_exact() {
        let table = parse_vlan_table(OUTPUT);
        assert!(table["eth2"].is_trunk(&set("20,30,40-42")));
        assert!(!table["eth2"].is_trunk(&set("20,30")));
        assert!(!table["eth1"].is_trunk(&set("10")));
    }

    #[test]
    fn test_reserved_names() {
        let bridge = Bridge::new("br0");
        assert!(bridge.is_reserved("br0"));
        assert!(bridge.is_reserved("br0.10"));
        assert!(!bridge.is_reserved("br01"));
        assert!(!bridge.is_reserved("eth0"));
    }
}
