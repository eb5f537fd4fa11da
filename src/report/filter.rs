// SPDX-License-Identifier: PMPL-1.0-or-later

//! Which matched rules appear at each verbosity
//!
//! A rule that only ever matched as a building block of another matched
//! rule adds nothing at default verbosity: `act as TCP client` already
//! implies `connect TCP socket`. This module classifies rules; it never
//! removes entries from the match map.

use crate::engine::{MatchResult, MatchResults};
use crate::rules::RuleSet;
use crate::types::Address;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Reported at every verbosity
    Shown,
    /// Every match is accounted for by another matched rule referencing it
    AlsoMatched,
    /// Library rule; only ever reported inside another rule's match tree
    Library,
    /// Synthesized from a subscope node; internal to its parent
    Subscope,
}

impl Visibility {
    pub fn shown_by_default(&self) -> bool {
        matches!(self, Visibility::Shown)
    }

    pub fn shown_when_verbose(&self) -> bool {
        matches!(self, Visibility::Shown | Visibility::AlsoMatched)
    }
}

/// A successful `match:` node found in a capability rule's tree
struct Reference<'a> {
    referrer: &'a str,
    /// Rule name or namespace
    target: &'a str,
    footprint: BTreeSet<Address>,
}

/// Classify every rule in `matches`
pub fn annotate_visibility(
    ruleset: &RuleSet,
    matches: &MatchResults,
) -> BTreeMap<String, Visibility> {
    // only capability rules account for other matches; library and
    // subscope trees count when a capability rule reached them
    let mut references = Vec::new();
    for (referrer, hits) in matches {
        if !is_capability(ruleset, referrer) {
            continue;
        }
        for (address, result) in hits {
            collect_references(ruleset, matches, referrer, *address, result, &mut references);
        }
    }

    matches
        .iter()
        .map(|(name, hits)| {
            let visibility = match ruleset.get(name) {
                Some(rule) if rule.is_subscope_rule() => Visibility::Subscope,
                Some(rule) if rule.is_library_rule() => Visibility::Library,
                Some(rule) => {
                    let footprint: BTreeSet<Address> = references
                        .iter()
                        .filter(|r| {
                            r.referrer != name.as_str()
                                && (r.target == name.as_str() || rule.in_namespace(r.target))
                        })
                        .flat_map(|r| r.footprint.iter().copied())
                        .collect();
                    let covered = !footprint.is_empty()
                        && hits.iter().all(|(address, _)| footprint.contains(address));
                    if covered {
                        Visibility::AlsoMatched
                    } else {
                        Visibility::Shown
                    }
                }
                None => Visibility::Shown,
            };
            (name.clone(), visibility)
        })
        .collect()
}

fn is_capability(ruleset: &RuleSet, name: &str) -> bool {
    ruleset
        .get(name)
        .map_or(true, |r| !r.is_subscope_rule() && !r.is_library_rule())
}

/// Successful `match:` nodes reachable through successful ancestors.
///
/// `address` is where the tree being walked matched. A reference to a
/// rule that matched at no address resolves to no locations; it was
/// satisfied where the referrer matched. References into subscope and
/// library rules are followed into those rules' trees at the addresses
/// the reference resolved to.
fn collect_references<'a>(
    ruleset: &RuleSet,
    matches: &'a MatchResults,
    referrer: &'a str,
    address: Address,
    node: &'a MatchResult,
    out: &mut Vec<Reference<'a>>,
) {
    if !node.success {
        return;
    }
    if let Some(target) = node.matched_rule.as_deref() {
        let footprint = if node.locations.is_empty() {
            BTreeSet::from([address])
        } else {
            node.locations.clone()
        };

        for (name, hits) in matches {
            let internal = ruleset.get(name).is_some_and(|r| {
                (r.is_subscope_rule() || r.is_library_rule())
                    && (r.name == target || r.in_namespace(target))
            });
            if !internal {
                continue;
            }
            for (inner_address, inner) in hits {
                if footprint.contains(inner_address) {
                    collect_references(ruleset, matches, referrer, *inner_address, inner, out);
                }
            }
        }

        out.push(Reference {
            referrer,
            target,
            footprint,
        });
    }
    for child in &node.children {
        collect_references(ruleset, matches, referrer, address, child, out);
    }
}
