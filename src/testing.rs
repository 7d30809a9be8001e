//! In-memory host for reconciler tests
//!
//! [`FakeHost`] answers the same argument vectors the real binaries get,
//! keeps a log of every command and can be told to fail any command whose
//! text contains a given pattern.

use crate::exec::{CommandOutput, CommandRunner, Exit, RunOptions};
use crate::host::{Budgets, Host, HostCommands};
use crate::manifest::Binaries;
use ipnet::Ipv4Net;
use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// A DHCP lease handed out by the fake server
#[derive(Debug, Clone, Copy)]
pub struct Lease {
    pub address: Ipv4Net,
    pub gateway: Ipv4Addr,
}

impl Lease {
    pub fn new(address: &str, gateway: &str) -> Self {
        Self {
            address: address.parse().unwrap(),
            gateway: gateway.parse().unwrap(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeLink {
    pub up: bool,
    pub master: Option<String>,
    pub addrs: Vec<Ipv4Net>,
}

#[derive(Default)]
struct FakeState {
    links: BTreeMap<String, FakeLink>,
    /// Default routes as (gateway, device)
    routes: Vec<(Ipv4Addr, String)>,
    /// Device -> vid -> PVID flag
    vlans: BTreeMap<String, BTreeMap<u16, bool>>,
    dns: BTreeMap<String, Vec<String>>,
    dhcp: BTreeSet<String>,
    offers: BTreeMap<String, Lease>,
    failures: Vec<String>,
    log: Vec<String>,
}

type Reply = Result<String, String>;

pub struct FakeHost {
    state: Mutex<FakeState>,
}

impl FakeHost {
    /// A host with bridge `br0` carrying the default VLAN 1
    pub fn new() -> Arc<Self> {
        let host = Arc::new(Self {
            state: Mutex::new(FakeState::default()),
        });
        {
            let mut state = host.lock();
            state.links.insert(
                "br0".to_string(),
                FakeLink {
                    up: true,
                    ..FakeLink::default()
                },
            );
            state
                .vlans
                .insert("br0".to_string(), BTreeMap::from([(1, true)]));
        }
        host
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    /// A [`Host`] driving this fake with default binary paths
    pub fn host(self: &Arc<Self>) -> Host {
        let runner: Arc<dyn CommandRunner> = self.clone();
        Host::new(
            runner,
            HostCommands::new(Binaries::default(), None),
            Budgets {
                command: Duration::from_secs(1),
                probe: Duration::from_secs(1),
            },
        )
    }

    pub fn add_link(&self, name: &str) {
        self.lock()
            .links
            .insert(name.to_string(), FakeLink::default());
    }

    pub fn remove_link(&self, name: &str) {
        let mut state = self.lock();
        state.links.remove(name);
        state.vlans.remove(name);
    }

    /// Fail every later command whose text contains `pattern`
    pub fn fail_on(&self, pattern: &str) {
        self.lock().failures.push(pattern.to_string());
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Lease the DHCP client receives as soon as it starts on `iface`
    pub fn offer_lease(&self, iface: &str, lease: Lease) {
        self.lock().offers.insert(iface.to_string(), lease);
    }

    /// Deliver a lease to an already running client
    pub fn grant_lease(&self, iface: &str, lease: Lease) {
        let mut state = self.lock();
        if state.dhcp.contains(iface) {
            apply_lease(&mut state, iface, lease);
        }
    }

    pub fn log(&self) -> Vec<String> {
        self.lock().log.clone()
    }

    pub fn count_matching(&self, pattern: &str) -> usize {
        self.lock()
            .log
            .iter()
            .filter(|c| c.contains(pattern))
            .count()
    }

    pub fn clear_log(&self) {
        self.lock().log.clear();
    }

    pub fn link(&self, name: &str) -> Option<FakeLink> {
        self.lock().links.get(name).cloned()
    }

    pub fn has_default_route(&self, iface: &str) -> bool {
        self.lock().routes.iter().any(|(_, dev)| dev == iface)
    }

    pub fn routes_via(&self, iface: &str) -> usize {
        self.lock().routes.iter().filter(|(_, dev)| dev == iface).count()
    }

    pub fn dns(&self, iface: &str) -> Option<Vec<String>> {
        self.lock().dns.get(iface).cloned()
    }

    pub fn dhcp_running(&self, iface: &str) -> bool {
        self.lock().dhcp.contains(iface)
    }

    /// VLAN entries of a device as (vid, pvid)
    pub fn vlans(&self, dev: &str) -> Vec<(u16, bool)> {
        self.lock()
            .vlans
            .get(dev)
            .map(|v| v.iter().map(|(vid, pvid)| (*vid, *pvid)).collect())
            .unwrap_or_default()
    }
}

impl CommandRunner for FakeHost {
    fn run(&self, argv: &[String], opts: RunOptions) -> CommandOutput {
        let line = argv.join(" ");
        let mut state = self.lock();
        state.log.push(line.clone());

        if state.failures.iter().any(|p| line.contains(p.as_str())) {
            return CommandOutput::new(
                Exit::Failed(Some(2)),
                format!("injected failure: {}", line),
                opts,
            );
        }

        let program = argv
            .first()
            .and_then(|p| Path::new(p).file_name())
            .and_then(|p| p.to_str())
            .unwrap_or_default();
        let args: Vec<&str> = argv.iter().skip(1).map(String::as_str).collect();

        let reply = match program {
            "ip" => ip(&mut state, &args),
            "bridge" => bridge(&mut state, &args),
            "dhcpcd" => dhcp(&mut state, &args),
            "resolvectl" => resolver(&mut state, &args),
            other => Err(format!("{}: command not found", other)),
        };

        match reply {
            Ok(output) => CommandOutput::new(Exit::Success, output, opts),
            Err(message) => CommandOutput::new(Exit::Failed(Some(1)), message, opts),
        }
    }
}

fn missing(dev: &str) -> String {
    format!("Device \"{}\" does not exist.", dev)
}

fn link_mut<'a>(state: &'a mut FakeState, dev: &str) -> Result<&'a mut FakeLink, String> {
    state.links.get_mut(dev).ok_or_else(|| missing(dev))
}

fn ip(state: &mut FakeState, args: &[&str]) -> Reply {
    match args {
        ["link", "show", dev] => {
            if state.links.contains_key(*dev) {
                Ok(render_link(state, dev, false))
            } else {
                Err(missing(dev))
            }
        }
        ["link", "set", dev, "up"] => {
            link_mut(state, dev)?.up = true;
            Ok(String::new())
        }
        ["link", "set", dev, "down"] => {
            link_mut(state, dev)?.up = false;
            Ok(String::new())
        }
        ["link", "set", dev, "master", bridge] => {
            if !state.links.contains_key(*bridge) {
                return Err(missing(bridge));
            }
            link_mut(state, dev)?.master = Some(bridge.to_string());
            // The kernel gives every new port the default PVID
            state
                .vlans
                .insert(dev.to_string(), BTreeMap::from([(1, true)]));
            Ok(String::new())
        }
        ["link", "set", dev, "nomaster"] => {
            link_mut(state, dev)?.master = None;
            state.vlans.remove(*dev);
            Ok(String::new())
        }
        ["addr", "show", dev] => {
            if state.links.contains_key(*dev) {
                Ok(render_link(state, dev, true))
            } else {
                Err(missing(dev))
            }
        }
        ["addr", "flush", "dev", dev] => {
            link_mut(state, dev)?.addrs.clear();
            // Routes through a vanished address go with it
            state.routes.retain(|(_, d)| d != dev);
            Ok(String::new())
        }
        ["addr", "add", cidr, "dev", dev] => {
            let net: Ipv4Net = cidr.parse().map_err(|_| format!("invalid prefix {}", cidr))?;
            let link = link_mut(state, dev)?;
            if link.addrs.contains(&net) {
                return Err("RTNETLINK answers: File exists".to_string());
            }
            link.addrs.push(net);
            Ok(String::new())
        }
        ["route", "show"] => Ok(state
            .routes
            .iter()
            .map(|(gw, dev)| format!("default via {} dev {}\n", gw, dev))
            .collect()),
        ["route", "flush", "dev", dev] => {
            state.routes.retain(|(_, d)| d != dev);
            Ok(String::new())
        }
        ["route", "add", "default", "via", gw, "dev", dev] => {
            let gw: Ipv4Addr = gw.parse().map_err(|_| format!("invalid gateway {}", gw))?;
            let link = link_mut(state, dev)?;
            let reachable = link.up && link.addrs.iter().any(|a| a.trunc().contains(&gw));
            if !reachable {
                return Err("Error: Nexthop has invalid gateway.".to_string());
            }
            if !state.routes.is_empty() {
                return Err("RTNETLINK answers: File exists".to_string());
            }
            state.routes.push((gw, dev.to_string()));
            Ok(String::new())
        }
        _ => Err(format!("unsupported: ip {}", args.join(" "))),
    }
}

fn vid_range(vid: &str) -> Result<(u16, u16), String> {
    let parse = |s: &str| s.parse::<u16>().map_err(|_| format!("invalid vid {}", vid));
    match vid.split_once('-') {
        Some((a, b)) => Ok((parse(a)?, parse(b)?)),
        None => {
            let v = parse(vid)?;
            Ok((v, v))
        }
    }
}

fn bridge(state: &mut FakeState, args: &[&str]) -> Reply {
    match args {
        ["vlan", "show"] => Ok(render_vlans(state)),
        ["vlan", "add", "dev", dev, "vid", vid, flags @ ..] => {
            if !state.links.contains_key(*dev) {
                return Err(missing(dev));
            }
            let (first, last) = vid_range(vid)?;
            let pvid = flags.contains(&"pvid");
            let entries = state.vlans.entry(dev.to_string()).or_default();
            if pvid {
                entries.values_mut().for_each(|p| *p = false);
            }
            for v in first..=last {
                entries.insert(v, pvid);
            }
            Ok(String::new())
        }
        ["vlan", "del", "dev", dev, "vid", vid, ..] => {
            if !state.links.contains_key(*dev) {
                return Err(missing(dev));
            }
            let (first, last) = vid_range(vid)?;
            if let Some(entries) = state.vlans.get_mut(*dev) {
                entries.retain(|v, _| *v < first || *v > last);
            }
            Ok(String::new())
        }
        _ => Err(format!("unsupported: bridge {}", args.join(" "))),
    }
}

fn dhcp(state: &mut FakeState, args: &[&str]) -> Reply {
    match args {
        ["-b", dev] => {
            if !state.links.contains_key(*dev) {
                return Err(missing(dev));
            }
            state.dhcp.insert(dev.to_string());
            if let Some(lease) = state.offers.get(*dev).copied() {
                apply_lease(state, dev, lease);
            }
            Ok("forked to background".to_string())
        }
        ["-k", dev] => {
            state.dhcp.remove(*dev);
            Ok(String::new())
        }
        _ => Err(format!("unsupported: dhcpcd {}", args.join(" "))),
    }
}

fn resolver(state: &mut FakeState, args: &[&str]) -> Reply {
    match args {
        ["dns", dev, servers @ ..] => {
            if !state.links.contains_key(*dev) {
                return Err(format!("Failed to resolve interface \"{}\"", dev));
            }
            state
                .dns
                .insert(dev.to_string(), servers.iter().map(|s| s.to_string()).collect());
            Ok(String::new())
        }
        ["revert", dev] => {
            state.dns.remove(*dev);
            Ok(String::new())
        }
        _ => Err(format!("unsupported: resolvectl {}", args.join(" "))),
    }
}

fn apply_lease(state: &mut FakeState, iface: &str, lease: Lease) {
    if let Some(link) = state.links.get_mut(iface) {
        link.up = true;
        if !link.addrs.contains(&lease.address) {
            link.addrs.push(lease.address);
        }
    }
    if !state.routes.iter().any(|(_, dev)| dev == iface) {
        state.routes.push((lease.gateway, iface.to_string()));
    }
}

fn render_link(state: &FakeState, dev: &str, with_addrs: bool) -> String {
    let index = state.links.keys().position(|k| k == dev).unwrap_or(0) + 2;
    let Some(link) = state.links.get(dev) else {
        return String::new();
    };
    let flags = if link.up {
        "BROADCAST,MULTICAST,UP,LOWER_UP"
    } else {
        "BROADCAST,MULTICAST"
    };
    let master = link
        .master
        .as_ref()
        .map(|m| format!(" master {}", m))
        .unwrap_or_default();
    let state_word = if link.up { "UP" } else { "DOWN" };

    let mut out = format!(
        "{}: {}: <{}> mtu 1500 qdisc noqueue{} state {} group default qlen 1000\n    link/ether 02:00:00:00:00:{:02x} brd ff:ff:ff:ff:ff:ff\n",
        index, dev, flags, master, state_word, index
    );
    if with_addrs {
        for addr in &link.addrs {
            out.push_str(&format!("    inet {} scope global {}\n", addr, dev));
        }
    }
    out
}

fn render_vlans(state: &FakeState) -> String {
    let mut out = String::from("port              vlan-id\n");
    for (dev, entries) in &state.vlans {
        for (i, (vid, pvid)) in entries.iter().enumerate() {
            let port = if i == 0 { dev.as_str() } else { "" };
            let flags = if *pvid { " PVID Egress Untagged" } else { "" };
            out.push_str(&format!("{:<18}{}{}\n", port, vid, flags));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::bridge::parse_vlan_table;
    use crate::network::link::LinkInfo;

    #[test]
    fn test_fake_output_parses() {
        let fake = FakeHost::new();
        fake.add_link("eth1");
        let host = fake.host();

        assert!(host.run(host.cmd().link_master("eth1", "br0")).ok);
        assert!(host.run(host.cmd().link_set("eth1", crate::host::LinkState::Up)).ok);

        let info = LinkInfo::query(&host, "eth1").unwrap();
        assert!(info.up);
        assert!(info.is_attached_to("br0"));

        let out = host.probe(host.cmd().bridge_vlan_show());
        let table = parse_vlan_table(&out.output);
        assert_eq!(table["eth1"].pvids.to_string(), "1");
    }

    #[test]
    fn test_failure_injection_and_log() {
        let fake = FakeHost::new();
        fake.add_link("eth0");
        fake.fail_on("link set eth0 up");
        let host = fake.host();

        let out = host.run(host.cmd().link_set("eth0", crate::host::LinkState::Up));
        assert!(!out.ok);
        assert!(out.output.contains("injected failure"));
        assert_eq!(fake.count_matching("link set eth0 up"), 1);
    }
}
