//! Command-line interface for Switchyard
//!
//! Uses clap with derive for type-safe CLI parsing

use crate::gate::Module;
use crate::wan::config::{WanConfigRequest, WanMode};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// Switchyard - bridge VLAN tagging and WAN uplink control plane
#[derive(Parser)]
#[command(name = "switchyard")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "switchyard.toml")]
    pub config: PathBuf,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// WAN uplink lifecycle
    Wan {
        #[command(subcommand)]
        action: WanAction,
    },

    /// Bridge VLAN tagging of physical interfaces
    Tagging {
        #[command(subcommand)]
        action: TaggingAction,
    },

    /// Check whether a module's prerequisites are active
    Deps {
        /// Module to check
        #[arg(value_enum)]
        module: Module,
    },

    /// Generate shell completion scripts
    Completion {
        /// Shell to generate completion for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// WAN subcommands
#[derive(Subcommand)]
pub enum WanAction {
    /// Bring the uplink up in its configured mode
    Start,

    /// Tear the uplink down
    Stop,

    /// Stop, then start
    Restart,

    /// Show live uplink state
    Status {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show the stored WAN configuration
    Show {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Replace the WAN configuration
    Config {
        /// Uplink interface
        #[arg(short, long)]
        interface: String,

        /// Addressing mode
        #[arg(short, long, value_enum)]
        mode: WanMode,

        /// Static IPv4 address (manual mode)
        #[arg(long, required_if_eq("mode", "manual"))]
        ip: Option<String>,

        /// Prefix length (manual mode)
        #[arg(long, required_if_eq("mode", "manual"), value_parser = clap::value_parser!(u8).range(0..=32))]
        mask: Option<u8>,

        /// Default gateway (manual mode)
        #[arg(short, long, required_if_eq("mode", "manual"))]
        gateway: Option<String>,

        /// DNS servers (manual mode, comma-separated or repeated)
        #[arg(long, value_delimiter = ',')]
        dns: Vec<String>,
    },
}

impl WanAction {
    /// Turn `wan config` arguments into a request; `None` for other actions
    pub fn into_request(self) -> Option<WanConfigRequest> {
        match self {
            WanAction::Config {
                interface,
                mode,
                ip,
                mask,
                gateway,
                dns,
            } => Some(WanConfigRequest {
                interface,
                mode,
                ip,
                mask,
                gateway,
                dns,
            }),
            _ => None,
        }
    }
}

/// Tagging subcommands
#[derive(Subcommand)]
pub enum TaggingAction {
    /// Apply every declared binding to the bridge
    Start,

    /// Detach every configured interface from the bridge
    Stop,

    /// Stop, then start
    Restart,

    /// Show bridge membership and the live VLAN table
    Status {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Manage declared bindings
    Config {
        #[command(subcommand)]
        action: TaggingConfigAction,
    },
}

/// Tagging binding subcommands
#[derive(Subcommand)]
pub enum TaggingConfigAction {
    /// Add or replace an interface binding
    Add {
        /// Interface name
        #[arg(short, long)]
        name: String,

        /// Untagged (access) VLAN id
        #[arg(long, conflicts_with = "tag", required_unless_present = "tag")]
        untag: Option<String>,

        /// Tagged VLAN list, e.g. "3-10,12"
        #[arg(long)]
        tag: Option<String>,
    },

    /// Remove an interface binding
    Remove {
        /// Interface name
        #[arg(short, long)]
        name: String,
    },

    /// List the declared bindings
    Show {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Generate shell completion scripts
    pub fn generate_completion(shell: Shell) {
        let mut cmd = Self::command();
        clap_complete::generate(shell, &mut cmd, "switchyard", &mut std::io::stdout());
    }
}
