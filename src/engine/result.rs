// SPDX-License-Identifier: PMPL-1.0-or-later

//! Evaluation results

use crate::types::Address;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Outcome of evaluating one node of a rule's logic tree.
///
/// The tree mirrors the statement tree so renderers can show which
/// features contributed to a match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResult {
    pub success: bool,
    /// Human-readable rendering of the node, e.g. `and` or `api: CreateServiceA`
    pub node: String,
    /// Target of a `match:` node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_rule: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<MatchResult>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub locations: BTreeSet<Address>,
}

impl MatchResult {
    pub fn new(success: bool, node: String) -> Self {
        Self {
            success,
            node,
            matched_rule: None,
            children: Vec::new(),
            locations: BTreeSet::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<MatchResult>) -> Self {
        self.children = children;
        self
    }

    pub fn with_locations(mut self, locations: BTreeSet<Address>) -> Self {
        self.locations = locations;
        self
    }

    /// Depth-first iteration over this node and every descendant
    pub fn walk(&self) -> Vec<&MatchResult> {
        let mut stack = vec![self];
        let mut out = Vec::new();
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(node.children.iter().rev());
        }
        out
    }

    /// Successful `match:` nodes in this tree with the locations they resolved to
    pub fn successful_references(&self) -> impl Iterator<Item = (&str, &BTreeSet<Address>)> {
        self.walk().into_iter().filter_map(|node| match &node.matched_rule {
            Some(name) if node.success => Some((name.as_str(), &node.locations)),
            _ => None,
        })
    }
}

/// Rule name → every address the rule matched at, with match detail
pub type MatchResults = BTreeMap<String, Vec<(Address, MatchResult)>>;

/// Append `other`'s matches to `into`
pub fn merge_results(into: &mut MatchResults, other: MatchResults) {
    for (name, mut matches) in other {
        into.entry(name).or_default().append(&mut matches);
    }
}
