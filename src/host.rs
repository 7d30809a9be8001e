//! Privileged command surface
//!
//! Builds argument vectors for the link, address, route, bridge VLAN,
//! DHCP client and resolver operations the reconcilers need, and runs
//! them through a [`CommandRunner`] with the configured time budgets.

use crate::exec::{CommandOutput, CommandRunner, RunOptions};
use crate::manifest::{Binaries, SwitchyardConfig};
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Administrative link state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Up,
    Down,
}

impl LinkState {
    fn as_arg(self) -> &'static str {
        match self {
            LinkState::Up => "up",
            LinkState::Down => "down",
        }
    }
}

/// Flags for `bridge vlan add/del`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VlanFlags {
    /// Plain tagged membership
    Tagged,
    /// Primary VLAN, egress untagged
    PvidUntagged,
    /// Entry on the bridge device itself
    OnBridge,
}

impl VlanFlags {
    fn args(self) -> &'static [&'static str] {
        match self {
            VlanFlags::Tagged => &[],
            VlanFlags::PvidUntagged => &["pvid", "untagged"],
            VlanFlags::OnBridge => &["self"],
        }
    }
}

/// Argument-vector builders for every privileged operation
#[derive(Debug, Clone)]
pub struct HostCommands {
    binaries: Binaries,
    wrapper: Option<String>,
}

impl HostCommands {
    pub fn new(binaries: Binaries, wrapper: Option<String>) -> Self {
        Self { binaries, wrapper }
    }

    fn build(&self, binary: &Path, args: &[&str]) -> Vec<String> {
        let mut argv = Vec::with_capacity(args.len() + 2);
        if let Some(wrapper) = &self.wrapper {
            argv.push(wrapper.clone());
        }
        argv.push(binary.display().to_string());
        argv.extend(args.iter().map(|a| a.to_string()));
        argv
    }

    fn ip(&self, args: &[&str]) -> Vec<String> {
        self.build(&self.binaries.ip, args)
    }

    fn bridge(&self, args: &[&str]) -> Vec<String> {
        self.build(&self.binaries.bridge, args)
    }

    pub fn link_show(&self, iface: &str) -> Vec<String> {
        self.ip(&["link", "show", iface])
    }

    pub fn link_set(&self, iface: &str, state: LinkState) -> Vec<String> {
        self.ip(&["link", "set", iface, state.as_arg()])
    }

    pub fn link_master(&self, iface: &str, bridge: &str) -> Vec<String> {
        self.ip(&["link", "set", iface, "master", bridge])
    }

    pub fn link_nomaster(&self, iface: &str) -> Vec<String> {
        self.ip(&["link", "set", iface, "nomaster"])
    }

    pub fn addr_show(&self, iface: &str) -> Vec<String> {
        self.ip(&["addr", "show", iface])
    }

    pub fn addr_flush(&self, iface: &str) -> Vec<String> {
        self.ip(&["addr", "flush", "dev", iface])
    }

    pub fn addr_add(&self, iface: &str, ip: Ipv4Addr, mask: u8) -> Vec<String> {
        let cidr = format!("{}/{}", ip, mask);
        self.ip(&["addr", "add", &cidr, "dev", iface])
    }

    pub fn route_show(&self) -> Vec<String> {
        self.ip(&["route", "show"])
    }

    pub fn route_flush(&self, iface: &str) -> Vec<String> {
        self.ip(&["route", "flush", "dev", iface])
    }

    pub fn route_add_default(&self, gateway: Ipv4Addr, iface: &str) -> Vec<String> {
        let gateway = gateway.to_string();
        self.ip(&["route", "add", "default", "via", &gateway, "dev", iface])
    }

    pub fn bridge_vlan_show(&self) -> Vec<String> {
        self.bridge(&["vlan", "show"])
    }

    /// `vid` is a single id or an inclusive range such as `1-4094`
    pub fn bridge_vlan_add(&self, dev: &str, vid: &str, flags: VlanFlags) -> Vec<String> {
        let mut args = vec!["vlan", "add", "dev", dev, "vid", vid];
        args.extend_from_slice(flags.args());
        self.bridge(&args)
    }

    pub fn bridge_vlan_del(&self, dev: &str, vid: &str, flags: VlanFlags) -> Vec<String> {
        let mut args = vec!["vlan", "del", "dev", dev, "vid", vid];
        args.extend_from_slice(flags.args());
        self.bridge(&args)
    }

    /// Launch the DHCP client in the background (returns before a lease)
    pub fn dhcp_start(&self, iface: &str) -> Vec<String> {
        self.build(&self.binaries.dhcp_client, &["-b", iface])
    }

    pub fn dhcp_stop(&self, iface: &str) -> Vec<String> {
        self.build(&self.binaries.dhcp_client, &["-k", iface])
    }

    pub fn dns_set(&self, iface: &str, servers: &[IpAddr]) -> Vec<String> {
        let servers: Vec<String> = servers.iter().map(|s| s.to_string()).collect();
        let mut args = vec!["dns", iface];
        args.extend(servers.iter().map(String::as_str));
        self.build(&self.binaries.resolver, &args)
    }

    pub fn dns_revert(&self, iface: &str) -> Vec<String> {
        self.build(&self.binaries.resolver, &["revert", iface])
    }
}

/// Time budgets applied by [`Host`]
#[derive(Debug, Clone, Copy)]
pub struct Budgets {
    /// Commands that mutate state
    pub command: Duration,
    /// Commands that only inspect state
    pub probe: Duration,
}

/// Handle to the privileged command surface of the appliance
///
/// Cheap to clone; shared by the reconcilers and the DHCP verifier.
#[derive(Clone)]
pub struct Host {
    runner: Arc<dyn CommandRunner>,
    commands: Arc<HostCommands>,
    budgets: Budgets,
}

impl Host {
    pub fn new(runner: Arc<dyn CommandRunner>, commands: HostCommands, budgets: Budgets) -> Self {
        Self {
            runner,
            commands: Arc::new(commands),
            budgets,
        }
    }

    /// Build a host handle from the appliance configuration
    pub fn from_config(runner: Arc<dyn CommandRunner>, config: &SwitchyardConfig) -> Self {
        let commands = HostCommands::new(
            config.binaries.clone(),
            config.config.privilege_wrapper.clone(),
        );
        let budgets = Budgets {
            command: config.timeouts.command(),
            probe: config.timeouts.probe(),
        };
        Self::new(runner, commands, budgets)
    }

    /// Argument builders
    pub fn cmd(&self) -> &HostCommands {
        &self.commands
    }

    /// Run a mutating command whose failure matters to the caller
    pub fn run(&self, argv: Vec<String>) -> CommandOutput {
        self.runner.run(&argv, RunOptions::checked(self.budgets.command))
    }

    /// Run a mutating command whose failure is tolerated
    pub fn best_effort(&self, argv: Vec<String>) -> CommandOutput {
        self.runner
            .run(&argv, RunOptions::best_effort(self.budgets.command))
    }

    /// Run an inspection command with the short budget
    pub fn probe(&self, argv: Vec<String>) -> CommandOutput {
        self.runner.run(&argv, RunOptions::checked(self.budgets.probe))
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("commands", &self.commands)
            .field("budgets", &self.budgets)
            .finish()
    }
}
