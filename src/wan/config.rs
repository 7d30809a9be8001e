//! WAN document and typed settings
//!
//! The stored document has named optional fields; [`WanDocument::settings`]
//! turns it into a [`WanSettings`] that reconciler code can rely on.

use crate::error::{Error, Result};
use crate::network::ip::validate_manual_network;
use crate::network::link::validate_interface_name;
use crate::store::ModuleStatus;
use clap::ValueEnum;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

/// How the uplink obtains its address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum WanMode {
    Manual,
    Dhcp,
}

impl fmt::Display for WanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WanMode::Manual => f.write_str("manual"),
            WanMode::Dhcp => f.write_str("dhcp"),
        }
    }
}

/// Stored WAN document (`wan/wan.json`)
///
/// Manual fields are only present in manual mode; `dhcp_error` only in
/// DHCP mode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WanDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<WanMode>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<Ipv4Addr>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "de_mask"
    )]
    pub mask: Option<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<Ipv4Addr>,

    /// Stored as a comma-separated string
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        serialize_with = "ser_dns",
        deserialize_with = "de_dns"
    )]
    pub dns: Vec<IpAddr>,

    /// Verification failure waiting to be reported once
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dhcp_error: Option<String>,

    #[serde(default)]
    pub status: ModuleStatus,

    /// Bumped by every start, stop and reconfiguration
    #[serde(default)]
    pub generation: u64,
}

/// Static addressing of the uplink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManualAddressing {
    pub ip: Ipv4Addr,
    pub mask: u8,
    pub gateway: Ipv4Addr,
    pub dns: Vec<IpAddr>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Addressing {
    Manual(ManualAddressing),
    Dhcp,
}

/// Validated view of a [`WanDocument`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WanSettings {
    pub interface: String,
    pub addressing: Addressing,
}

impl WanDocument {
    pub fn settings(&self) -> Result<WanSettings> {
        let (Some(interface), Some(mode)) = (&self.interface, self.mode) else {
            return Err(Error::IncompleteConfiguration(
                "WAN interface and mode are required".to_string(),
            ));
        };
        validate_interface_name(interface).map_err(Error::Validation)?;

        let addressing = match mode {
            WanMode::Dhcp => Addressing::Dhcp,
            WanMode::Manual => match (self.ip, self.mask, self.gateway) {
                (Some(ip), Some(mask), Some(gateway)) => {
                    // Stored documents may be edited by hand
                    validate_manual_network(ip, mask, gateway)?;
                    Addressing::Manual(ManualAddressing {
                        ip,
                        mask,
                        gateway,
                        dns: self.dns.clone(),
                    })
                }
                _ => {
                    return Err(Error::IncompleteConfiguration(
                        "manual mode requires ip, mask and gateway".to_string(),
                    ));
                }
            },
        };

        Ok(WanSettings {
            interface: interface.clone(),
            addressing,
        })
    }
}

/// Input of `wan config`, as typed by an administrator
#[derive(Debug, Clone)]
pub struct WanConfigRequest {
    pub interface: String,
    pub mode: WanMode,
    pub ip: Option<String>,
    pub mask: Option<u8>,
    pub gateway: Option<String>,
    /// Entries may themselves be comma-separated
    pub dns: Vec<String>,
}

impl WanConfigRequest {
    pub fn dhcp(interface: &str) -> Self {
        Self {
            interface: interface.to_string(),
            mode: WanMode::Dhcp,
            ip: None,
            mask: None,
            gateway: None,
            dns: Vec::new(),
        }
    }

    pub fn manual(interface: &str, ip: &str, mask: u8, gateway: &str) -> Self {
        Self {
            interface: interface.to_string(),
            mode: WanMode::Manual,
            ip: Some(ip.to_string()),
            mask: Some(mask),
            gateway: Some(gateway.to_string()),
            dns: Vec::new(),
        }
    }

    /// Parse the manual fields; `None` in DHCP mode
    pub fn manual_addressing(&self) -> Result<Option<ManualAddressing>> {
        if self.mode == WanMode::Dhcp {
            return Ok(None);
        }

        let ip = parse_ipv4("IP", self.ip.as_deref())?;
        let gateway = parse_ipv4("gateway", self.gateway.as_deref())?;
        let mask = self
            .mask
            .ok_or_else(|| Error::Validation("manual mode requires a mask".to_string()))?;
        let dns = self
            .dns
            .iter()
            .flat_map(|entry| entry.split(','))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<IpAddr>()
                    .map_err(|_| Error::Validation(format!("invalid DNS server '{}'", s)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Some(ManualAddressing {
            ip,
            mask,
            gateway,
            dns,
        }))
    }
}

fn parse_ipv4(field: &str, value: Option<&str>) -> Result<Ipv4Addr> {
    let value = value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::Validation(format!("manual mode requires a {}", field)))?;
    value
        .parse()
        .map_err(|_| Error::Validation(format!("invalid {} '{}'", field, value)))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawMask {
    Number(u8),
    Text(String),
}

fn de_mask<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<u8>, D::Error> {
    match Option::<RawMask>::deserialize(deserializer)? {
        None => Ok(None),
        Some(RawMask::Number(n)) => Ok(Some(n)),
        Some(RawMask::Text(s)) => s.trim().parse().map(Some).map_err(serde::de::Error::custom),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDns {
    List(Vec<String>),
    Text(String),
}

fn de_dns<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<IpAddr>, D::Error> {
    let entries = match Option::<RawDns>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(RawDns::List(list)) => list,
        Some(RawDns::Text(text)) => text.split(',').map(str::to_string).collect(),
    };
    entries
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().map_err(serde::de::Error::custom))
        .collect()
}

fn ser_dns<S: Serializer>(dns: &[IpAddr], serializer: S) -> std::result::Result<S::Ok, S::Error> {
    let joined: Vec<String> = dns.iter().map(|d| d.to_string()).collect();
    serializer.serialize_str(&joined.join(","))
}
