//! VLAN identifiers and VLAN lists
//!
//! Provides:
//! - [`VlanId`]: an 802.1Q id in 1..=4094
//! - [`VlanSet`]: a sorted, de-duplicated set of ids
//! - Parsing of the compact list syntax (`"1,2,3-10,12"`)

use crate::error::{Error, Result};
use nom::{
    character::complete::{char, digit1, space0},
    combinator::{all_consuming, map_res, opt},
    multi::separated_list1,
    sequence::{delimited, pair, preceded},
    Parser,
};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

pub const VLAN_MIN: u16 = 1;
pub const VLAN_MAX: u16 = 4094;

/// The bridge's built-in default VLAN
pub const DEFAULT_VLAN: VlanId = VlanId(1);

/// A VLAN id in the usable 802.1Q range
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VlanId(u16);

impl VlanId {
    pub fn new(id: u32) -> Result<Self> {
        if id < VLAN_MIN as u32 || id > VLAN_MAX as u32 {
            return Err(Error::Validation(format!(
                "VLAN id {} out of range {}-{}",
                id, VLAN_MIN, VLAN_MAX
            )));
        }
        Ok(Self(id as u16))
    }

    pub fn get(self) -> u16 {
        self.0
    }
}

impl fmt::Display for VlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for VlanId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let id: u32 = s
            .parse()
            .map_err(|_| Error::Validation(format!("'{}' is not a VLAN id", s)))?;
        Self::new(id)
    }
}

impl Serialize for VlanId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u16(self.0)
    }
}

/// Documents written by other tools store ids as numbers or numeric strings
#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Number(u64),
    Text(String),
}

impl<'de> Deserialize<'de> for VlanId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        match RawId::deserialize(deserializer)? {
            RawId::Number(n) => {
                let n = u32::try_from(n).map_err(serde::de::Error::custom)?;
                VlanId::new(n).map_err(serde::de::Error::custom)
            }
            RawId::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// Sorted set of VLAN ids
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VlanSet(BTreeSet<VlanId>);

impl VlanSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the compact list syntax
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = || Error::Validation(format!("invalid VLAN list '{}'", input));

        let (_, tokens) = all_consuming(separated_list1(char(','), vlan_token))
            .parse(input)
            .map_err(|_| invalid())?;

        let mut set = BTreeSet::new();
        for (start, end) in tokens {
            let first = VlanId::new(start)?;
            match end {
                None => {
                    set.insert(first);
                }
                Some(end) => {
                    let last = VlanId::new(end)?;
                    if first > last {
                        return Err(Error::Validation(format!(
                            "VLAN range {}-{} is reversed",
                            start, end
                        )));
                    }
                    set.extend((first.0..=last.0).map(VlanId));
                }
            }
        }
        Ok(Self(set))
    }

    pub fn extend(&mut self, other: &VlanSet) {
        self.0.extend(other.0.iter().copied());
    }

    pub fn contains(&self, id: VlanId) -> bool {
        self.0.contains(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = VlanId> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<VlanId> for VlanSet {
    fn from_iter<I: IntoIterator<Item = VlanId>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for VlanSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for id in &self.0 {
            if !first {
                f.write_str(",")?;
            }
            write!(f, "{}", id)?;
            first = false;
        }
        Ok(())
    }
}

impl FromStr for VlanSet {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for VlanSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for VlanSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if raw.trim().is_empty() {
            return Ok(Self::new());
        }
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

// Nom parsers for the list syntax

fn vlan_number(input: &str) -> nom::IResult<&str, u32> {
    delimited(space0, map_res(digit1, |s: &str| s.parse::<u32>()), space0).parse(input)
}

fn vlan_token(input: &str) -> nom::IResult<&str, (u32, Option<u32>)> {
    pair(vlan_number, opt(preceded(char('-'), vlan_number))).parse(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_normalize() {
        let set = VlanSet::parse("1,2,3-10,12").unwrap();
        assert_eq!(set.to_string(), "1,2,3,4,5,6,7,8,9,10,12");
        assert_eq!(set.len(), 11);
    }

    #[test]
    fn test_duplicates_and_order() {
        let set = VlanSet::parse("12, 3-5 ,4,3").unwrap();
        assert_eq!(set.to_string(), "3,4,5,12");
    }

    #[test]
    fn test_reversed_range_rejected() {
        assert!(matches!(VlanSet::parse("10-3"), Err(Error::Validation(_))));
    }

    #[test]
    fn test_out_of_range_rejected() {
        assert!(VlanSet::parse("0").is_err());
        assert!(VlanSet::parse("4095").is_err());
        assert!(VlanSet::parse("4000-4095").is_err());
        assert!(VlanSet::parse("99999999999").is_err());
    }

    #[test]
    fn test_garbage_rejected() {
        for input in ["", ",", "1,", "a", "1-", "1--3", "3;4", "1 2"] {
            assert!(VlanSet::parse(input).is_err(), "{input:?}");
        }
    }

    #[test]
    fn test_vlan_id_from_str() {
        assert_eq!("42".parse::<VlanId>().unwrap().get(), 42);
        assert!("4095".parse::<VlanId>().is_err());
        assert!("x".parse::<VlanId>().is_err());
    }

    #[test]
    fn test_vlan_id_accepts_numeric_string() {
        let id: VlanId = serde_json::from_str("\"7\"").unwrap();
        assert_eq!(id.get(), 7);
        let id: VlanId = serde_json::from_str("7").unwrap();
        assert_eq!(id.get(), 7);
    }

    #[test]
    fn test_set_serializes_as_string() {
        let set = VlanSet::parse("5,3").unwrap();
        assert_eq!(serde_json::to_string(&set).unwrap(), "\"3,5\"");
        let back: VlanSet = serde_json::from_str("\"3-5\"").unwrap();
        assert_eq!(back.to_string(), "3,4,5");
    }
}
