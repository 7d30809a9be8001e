//! Link and route inspection
//!
//! Provides:
//! - Interface name validation (applied before any name reaches a command)
//! - Parsing of `ip addr show` output into [`LinkInfo`]
//! - Default route detection from `ip route show` output

use crate::host::Host;
use ipnet::Ipv4Net;
use serde::Serialize;

/// Longest name the kernel accepts (IFNAMSIZ - 1)
pub const MAX_INTERFACE_NAME: usize = 15;

/// Validate an interface name
///
/// Names are 1-15 characters of ASCII alphanumerics, `.`, `_` and `-`,
/// never `.`/`..`, and never start with `-` (would read as an option).
pub fn validate_interface_name(name: &str) -> std::result::Result<(), String> {
    if name.is_empty() {
        return Err("interface name is empty".to_string());
    }
    if name.len() > MAX_INTERFACE_NAME {
        return Err(format!(
            "interface name '{}' is longer than {} characters",
            name, MAX_INTERFACE_NAME
        ));
    }
    if name == "." || name == ".." {
        return Err(format!("interface name '{}' is reserved", name));
    }
    if name.starts_with('-') {
        return Err(format!("interface name '{}' must not start with '-'", name));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
    {
        return Err(format!(
            "interface name '{}' contains invalid character {:?}",
            name, bad
        ));
    }
    Ok(())
}

/// Live state of one interface as reported by `ip addr show`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LinkInfo {
    pub name: String,
    /// Administratively up
    pub up: bool,
    /// Bridge the interface is enslaved to
    pub master: Option<String>,
    /// Configured IPv4 addresses
    pub addresses: Vec<Ipv4Net>,
}

impl LinkInfo {
    /// Parse `ip addr show <iface>` output
    ///
    /// Returns `None` when the output holds no interface header line.
    pub fn parse(output: &str) -> Option<Self> {
        let mut lines = output.lines();
        let header = lines.find(|l| !l.trim().is_empty())?;

        // "2: eth0: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500 ... master br0 state UP"
        let mut fields = header.split_whitespace();
        fields.next()?;
        let name = fields.next()?.trim_end_matches(':');
        // veth peers are printed as "veth0@if3"
        let name = name.split('@').next().unwrap_or(name).to_string();

        let rest: Vec<&str> = fields.collect();
        let flags_up = rest
            .first()
            .and_then(|f| f.strip_prefix('<'))
            .and_then(|f| f.strip_suffix('>'))
            .map(|f| f.split(',').any(|flag| flag == "UP"))
            .unwrap_or(false);
        let state_up = rest
            .windows(2)
            .any(|pair| pair[0] == "state" && pair[1] == "UP");
        let master = rest
            .windows(2)
            .find(|pair| pair[0] == "master")
            .map(|pair| pair[1].to_string());

        let addresses = output
            .lines()
            .filter_map(|line| {
                let mut parts = line.split_whitespace();
                match parts.next() {
                    Some("inet") => parts.next()?.parse::<Ipv4Net>().ok(),
                    _ => None,
                }
            })
            .collect();

        Some(Self {
            name,
            up: flags_up || state_up,
            master,
            addresses,
        })
    }

    /// Query the live state of an interface; `None` if it does not exist
    pub fn query(host: &Host, iface: &str) -> Option<Self> {
        let out = host.probe(host.cmd().addr_show(iface));
        if !out.ok {
            return None;
        }
        Self::parse(&out.output)
    }

    pub fn is_attached_to(&self, bridge: &str) -> bool {
        self.master.as_deref() == Some(bridge)
    }
}

/// Check whether an interface exists on the host
pub fn interface_exists(host: &Host, iface: &str) -> bool {
    host.probe(host.cmd().link_show(iface)).ok
}

/// Whether `ip route show` output holds a default route through `iface`
pub fn has_default_route(routes: &str, iface: &str) -> bool {
    routes.lines().any(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        fields.first() == Some(&"default")
            && fields
                .windows(2)
                .any(|pair| pair[0] == "dev" && pair[1] == iface)
    })
}
