// SPDX-License-Identifier: PMPL-1.0-or-later

//! Feature model: typed observations and the per-scope feature index
//!
//! A [`FeatureSet`] maps each observed [`Feature`] to the addresses where it
//! was seen. A feature present with an empty address set was observed but is
//! not attributable to a location (file-level features); a feature missing
//! from the map was not observed at all.

use crate::types::Address;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// A typed observation extracted from a binary or a trace.
///
/// Equality and hashing are by kind and value only.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    Api(String),
    String(String),
    /// Matches any `String` feature containing the value
    Substring(String),
    /// Matches any `String` feature the pattern finds a match in
    Regex(String),
    Number(i64),
    Offset(i64),
    Mnemonic(String),
    /// Matches any `Bytes` feature that starts with the pattern
    Bytes(#[serde(with = "hex_bytes")] Vec<u8>),
    Characteristic(String),
    Section(String),
    Export(String),
    Import(String),
    FunctionName(String),
    Os(String),
    Arch(String),
    Format(String),
    /// Emitted once per basic block into the enclosing function's features
    BasicBlock,
    /// Synthetic: the named rule (or a rule in the named namespace) matched
    MatchedRule(String),
}

impl Feature {
    pub fn kind(&self) -> &'static str {
        match self {
            Feature::Api(_) => "api",
            Feature::String(_) => "string",
            Feature::Substring(_) => "substring",
            Feature::Regex(_) => "regex",
            Feature::Number(_) => "number",
            Feature::Offset(_) => "offset",
            Feature::Mnemonic(_) => "mnemonic",
            Feature::Bytes(_) => "bytes",
            Feature::Characteristic(_) => "characteristic",
            Feature::Section(_) => "section",
            Feature::Export(_) => "export",
            Feature::Import(_) => "import",
            Feature::FunctionName(_) => "function-name",
            Feature::Os(_) => "os",
            Feature::Arch(_) => "arch",
            Feature::Format(_) => "format",
            Feature::BasicBlock => "basic block",
            Feature::MatchedRule(_) => "match",
        }
    }

    /// Pattern features are tested against other observed features, not looked up directly
    pub fn is_pattern(&self) -> bool {
        matches!(
            self,
            Feature::Substring(_) | Feature::Regex(_) | Feature::Bytes(_)
        )
    }

    pub fn matched_rule<S: Into<String>>(name: S) -> Self {
        Feature::MatchedRule(name.into())
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Feature::String(s) => write!(f, "string: \"{}\"", s.escape_debug()),
            Feature::Substring(s) => write!(f, "substring: \"{}\"", s.escape_debug()),
            Feature::Regex(s) => write!(f, "regex: /{}/", s),
            Feature::Number(n) | Feature::Offset(n) => {
                if *n < 0 {
                    write!(f, "{}: -0x{:X}", self.kind(), n.unsigned_abs())
                } else {
                    write!(f, "{}: 0x{:X}", self.kind(), n)
                }
            }
            Feature::Bytes(b) => {
                let hex: Vec<String> = b.iter().map(|byte| format!("{:02X}", byte)).collect();
                write!(f, "bytes: {}", hex.join(" "))
            }
            Feature::BasicBlock => write!(f, "basic block"),
            Feature::Api(v)
            | Feature::Mnemonic(v)
            | Feature::Characteristic(v)
            | Feature::Section(v)
            | Feature::Export(v)
            | Feature::Import(v)
            | Feature::FunctionName(v)
            | Feature::Os(v)
            | Feature::Arch(v)
            | Feature::Format(v)
            | Feature::MatchedRule(v) => write!(f, "{}: {}", self.kind(), v),
        }
    }
}

/// Feature → addresses index for one scope instance
#[derive(Debug, Clone, Default)]
pub struct FeatureSet {
    features: HashMap<Feature, BTreeSet<Address>>,
}

impl FeatureSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `feature` at `address`; `NoAddress` records presence only
    pub fn insert(&mut self, feature: Feature, address: Address) {
        let addresses = self.features.entry(feature).or_default();
        if !address.is_none() {
            addresses.insert(address);
        }
    }

    /// Record many `(feature, address)` observations
    pub fn insert_all<I>(&mut self, observations: I)
    where
        I: IntoIterator<Item = (Feature, Address)>,
    {
        for (feature, address) in observations {
            self.insert(feature, address);
        }
    }

    /// Union another set into this one
    pub fn merge(&mut self, other: &FeatureSet) {
        for (feature, addresses) in &other.features {
            self.features
                .entry(feature.clone())
                .or_default()
                .extend(addresses.iter().copied());
        }
    }

    /// Record that a rule matched at `address`.
    ///
    /// Besides the rule name, every prefix of its namespace is recorded so
    /// that `match: host-interaction/service` resolves to any rule filed
    /// beneath that namespace.
    pub fn index_rule_match(&mut self, name: &str, namespace: Option<&str>, address: Address) {
        self.insert(Feature::matched_rule(name), address);
        if let Some(namespace) = namespace {
            for prefix in namespace_prefixes(namespace) {
                self.insert(Feature::matched_rule(prefix), address);
            }
        }
    }

    pub fn contains(&self, feature: &Feature) -> bool {
        self.features.contains_key(feature)
    }

    pub fn get(&self, feature: &Feature) -> Option<&BTreeSet<Address>> {
        self.features.get(feature)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Feature, &BTreeSet<Address>)> {
        self.features.iter()
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

impl FromIterator<(Feature, Address)> for FeatureSet {
    fn from_iter<I: IntoIterator<Item = (Feature, Address)>>(iter: I) -> Self {
        let mut set = FeatureSet::new();
        set.insert_all(iter);
        set
    }
}

/// `a/b/c` → `a/b/c`, `a/b`, `a`
pub fn namespace_prefixes(namespace: &str) -> impl Iterator<Item = &str> {
    let ends = namespace
        .match_indices('/')
        .map(|(i, _)| i)
        .chain(std::iter::once(namespace.len()));
    let mut prefixes: Vec<&str> = ends
        .filter(|&end| end > 0)
        .map(|end| &namespace[..end])
        .collect();
    prefixes.reverse();
    prefixes.into_iter()
}

/// Hex encoding for byte patterns in serialized feature documents
mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode_upper(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        hex::decode(compact).map_err(serde::de::Error::custom)
    }
}
