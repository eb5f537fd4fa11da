// SPDX-License-Identifier: PMPL-1.0-or-later

//! Rule logic trees and their evaluation against a feature set

use crate::engine::result::MatchResult;
use crate::features::{Feature, FeatureSet};
use crate::types::{Address, Scope};
use regex::Regex;
use std::collections::BTreeSet;
use std::fmt;

/// How many observations a `count(...)` node requires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantifier {
    Exactly(usize),
    AtLeast(usize),
    AtMost(usize),
    Between(usize, usize),
}

impl Quantifier {
    pub fn contains(&self, n: usize) -> bool {
        match *self {
            Quantifier::Exactly(want) => n == want,
            Quantifier::AtLeast(min) => n >= min,
            Quantifier::AtMost(max) => n <= max,
            Quantifier::Between(min, max) => min <= n && n <= max,
        }
    }
}

impl fmt::Display for Quantifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quantifier::Exactly(n) => write!(f, "{}", n),
            Quantifier::AtLeast(n) => write!(f, "{} or more", n),
            Quantifier::AtMost(n) => write!(f, "{} or fewer", n),
            Quantifier::Between(min, max) => write!(f, "({}, {})", min, max),
        }
    }
}

/// Leaf test for a single feature
#[derive(Debug, Clone)]
pub struct FeatureNode {
    pub feature: Feature,
    pub description: Option<String>,
    regex: Option<Regex>,
}

impl FeatureNode {
    /// Addresses at which this feature was observed, `None` if it was not observed.
    ///
    /// Pattern features scan the set: substrings and regexes test every
    /// `String` feature, byte patterns test every `Bytes` feature as a prefix.
    pub fn locations(&self, features: &FeatureSet) -> Option<BTreeSet<Address>> {
        match &self.feature {
            Feature::Substring(needle) => collect_matching(features, |f| {
                matches!(f, Feature::String(s) if s.contains(needle.as_str()))
            }),
            Feature::Regex(_) => {
                let re = self.regex.as_ref()?;
                collect_matching(features, |f| matches!(f, Feature::String(s) if re.is_match(s)))
            }
            Feature::Bytes(pattern) => collect_matching(features, |f| {
                matches!(f, Feature::Bytes(b) if b.starts_with(pattern))
            }),
            exact => features.get(exact).cloned(),
        }
    }
}

fn collect_matching<P>(features: &FeatureSet, predicate: P) -> Option<BTreeSet<Address>>
where
    P: Fn(&Feature) -> bool,
{
    let mut found = false;
    let mut locations = BTreeSet::new();
    for (feature, addresses) in features.iter() {
        if predicate(feature) {
            found = true;
            locations.extend(addresses.iter().copied());
        }
    }
    found.then_some(locations)
}

impl fmt::Display for FeatureNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.description {
            Some(desc) => write!(f, "{} = {}", self.feature, desc),
            None => write!(f, "{}", self.feature),
        }
    }
}

/// A node in a rule's logic tree.
///
/// Trees are built once when rules load and walked for every scope
/// instance; evaluation never re-interprets rule text.
#[derive(Debug, Clone)]
pub enum Statement {
    Feature(FeatureNode),
    /// Succeeds where the named rule, or any rule in the named namespace, matched
    Match(String),
    And(Vec<Statement>),
    Or(Vec<Statement>),
    Not(Box<Statement>),
    /// Always succeeds; contributes locations of children that succeed
    Optional(Vec<Statement>),
    /// `N or more:` over children
    AtLeast {
        count: usize,
        children: Vec<Statement>,
    },
    Count {
        child: Box<Statement>,
        quantifier: Quantifier,
    },
    /// Re-scopes evaluation to a nested granularity. Lowered into a
    /// synthesized rule plus a `Match` when the rule set is built.
    Subscope {
        scope: Scope,
        child: Box<Statement>,
    },
}

impl Statement {
    /// Leaf test for a non-regex feature. Regex leaves go through [`Statement::regex`].
    pub fn feature(feature: Feature) -> Self {
        assert!(
            !matches!(feature, Feature::Regex(_)),
            "regex features must be compiled with Statement::regex"
        );
        Statement::Feature(FeatureNode {
            feature,
            description: None,
            regex: None,
        })
    }

    pub fn regex(pattern: &str) -> Result<Self, regex::Error> {
        let regex = Regex::new(pattern)?;
        Ok(Statement::Feature(FeatureNode {
            feature: Feature::Regex(pattern.to_string()),
            description: None,
            regex: Some(regex),
        }))
    }

    /// Attach a description to a feature leaf; other nodes are returned unchanged
    pub fn described<S: Into<String>>(mut self, description: S) -> Self {
        if let Statement::Feature(node) = &mut self {
            node.description = Some(description.into());
        }
        self
    }

    pub fn matches<S: Into<String>>(name: S) -> Self {
        Statement::Match(name.into())
    }

    pub fn not(child: Statement) -> Self {
        Statement::Not(Box::new(child))
    }

    pub fn count(child: Statement, quantifier: Quantifier) -> Self {
        Statement::Count {
            child: Box::new(child),
            quantifier,
        }
    }

    pub fn subscope(scope: Scope, child: Statement) -> Self {
        Statement::Subscope {
            scope,
            child: Box::new(child),
        }
    }

    /// One-line rendering of this node (children excluded)
    pub fn describe(&self) -> String {
        match self {
            Statement::Feature(node) => node.to_string(),
            Statement::Match(name) => format!("match: {}", name),
            Statement::And(_) => "and".to_string(),
            Statement::Or(_) => "or".to_string(),
            Statement::Not(_) => "not".to_string(),
            Statement::Optional(_) => "optional".to_string(),
            Statement::AtLeast { count, .. } => format!("{} or more", count),
            Statement::Count { child, quantifier } => {
                format!("count({}): {}", count_target(child), quantifier)
            }
            Statement::Subscope { scope, .. } => scope.to_string(),
        }
    }

    /// Evaluate this tree against `features`.
    ///
    /// # Panics
    ///
    /// On a `Subscope` node: those only exist in rules that have not been
    /// through [`crate::rules::RuleSet`] construction.
    pub fn evaluate(&self, features: &FeatureSet) -> MatchResult {
        match self {
            Statement::Feature(node) => match node.locations(features) {
                Some(locations) => MatchResult::new(true, self.describe()).with_locations(locations),
                None => MatchResult::new(false, self.describe()),
            },
            Statement::Match(name) => {
                let mut result = match features.get(&Feature::matched_rule(name.as_str())) {
                    Some(locations) => {
                        MatchResult::new(true, self.describe()).with_locations(locations.clone())
                    }
                    None => MatchResult::new(false, self.describe()),
                };
                result.matched_rule = Some(name.clone());
                result
            }
            Statement::And(children) => {
                let results = evaluate_all(children, features);
                let success = results.iter().all(|r| r.success);
                let locations = if success {
                    intersect_attributable(&results)
                } else {
                    BTreeSet::new()
                };
                MatchResult::new(success, self.describe())
                    .with_children(results)
                    .with_locations(locations)
            }
            Statement::Or(children) => {
                let results = evaluate_all(children, features);
                let success = results.iter().any(|r| r.success);
                let locations = union_successful(&results);
                MatchResult::new(success, self.describe())
                    .with_children(results)
                    .with_locations(locations)
            }
            Statement::Not(child) => {
                let result = child.evaluate(features);
                MatchResult::new(!result.success, self.describe()).with_children(vec![result])
            }
            Statement::Optional(children) => {
                let results = evaluate_all(children, features);
                let locations = union_successful(&results);
                MatchResult::new(true, self.describe())
                    .with_children(results)
                    .with_locations(locations)
            }
            Statement::AtLeast { count, children } => {
                let results = evaluate_all(children, features);
                let satisfied = results.iter().filter(|r| r.success).count();
                let success = satisfied >= *count;
                let locations = if success {
                    union_successful(&results)
                } else {
                    BTreeSet::new()
                };
                MatchResult::new(success, self.describe())
                    .with_children(results)
                    .with_locations(locations)
            }
            Statement::Count { child, quantifier } => {
                let observed = match child.as_ref() {
                    Statement::Feature(node) => node.locations(features).unwrap_or_default(),
                    Statement::Match(name) => features
                        .get(&Feature::matched_rule(name.as_str()))
                        .cloned()
                        .unwrap_or_default(),
                    other => other.evaluate(features).locations,
                };
                let success = quantifier.contains(observed.len());
                let mut result = MatchResult::new(success, self.describe());
                if let Statement::Match(name) = child.as_ref() {
                    result.matched_rule = Some(name.clone());
                }
                if success {
                    result.locations = observed;
                }
                result
            }
            Statement::Subscope { scope, .. } => panic!(
                "{} subscope evaluated directly; subscopes are lowered when the rule set is built",
                scope
            ),
        }
    }

    /// Names referenced by `match:` nodes anywhere in the tree
    pub fn match_references(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.visit(&mut |node| {
            if let Statement::Match(name) = node {
                names.push(name.as_str());
            }
        });
        names
    }

    pub fn has_subscope(&self) -> bool {
        let mut found = false;
        self.visit(&mut |node| {
            if matches!(node, Statement::Subscope { .. }) {
                found = true;
            }
        });
        found
    }

    fn visit<'a, F>(&'a self, f: &mut F)
    where
        F: FnMut(&'a Statement),
    {
        f(self);
        match self {
            Statement::And(children)
            | Statement::Or(children)
            | Statement::Optional(children)
            | Statement::AtLeast { children, .. } => {
                for child in children {
                    child.visit(f);
                }
            }
            Statement::Not(child)
            | Statement::Count { child, .. }
            | Statement::Subscope { child, .. } => child.visit(f),
            Statement::Feature(_) | Statement::Match(_) => {}
        }
    }

    /// Features of which at least one must be present for this tree to
    /// succeed, or `None` when no such guarantee exists (negations,
    /// optional branches, pattern features, zero-count predicates).
    pub fn required_features(&self) -> Option<BTreeSet<Feature>> {
        match self {
            Statement::Feature(node) if node.feature.is_pattern() => None,
            Statement::Feature(node) => Some(BTreeSet::from([node.feature.clone()])),
            Statement::Match(name) => Some(BTreeSet::from([Feature::matched_rule(name.as_str())])),
            Statement::And(children) => children
                .iter()
                .filter_map(|c| c.required_features())
                .min_by_key(|set| set.len()),
            Statement::Or(children) => union_required(children),
            Statement::AtLeast { count: 0, .. } => None,
            Statement::AtLeast { children, .. } => union_required(children),
            Statement::Count { quantifier, .. } if quantifier.contains(0) => None,
            Statement::Count { child, .. } => child.required_features(),
            Statement::Not(_) | Statement::Optional(_) | Statement::Subscope { .. } => None,
        }
    }

    /// Rewrite every `Subscope` node bottom-up with `lower`, which returns the replacement
    pub(crate) fn lower_subscopes<F, E>(self, lower: &mut F) -> Result<Statement, E>
    where
        F: FnMut(Scope, Statement) -> Result<Statement, E>,
    {
        let lower_all = |children: Vec<Statement>, lower: &mut F| {
            children
                .into_iter()
                .map(|c| c.lower_subscopes(lower))
                .collect::<Result<Vec<_>, E>>()
        };
        Ok(match self {
            Statement::And(children) => Statement::And(lower_all(children, &mut *lower)?),
            Statement::Or(children) => Statement::Or(lower_all(children, &mut *lower)?),
            Statement::Optional(children) => Statement::Optional(lower_all(children, &mut *lower)?),
            Statement::AtLeast { count, children } => Statement::AtLeast {
                count,
                children: lower_all(children, &mut *lower)?,
            },
            Statement::Not(child) => Statement::Not(Box::new(child.lower_subscopes(lower)?)),
            Statement::Count { child, quantifier } => Statement::Count {
                child: Box::new(child.lower_subscopes(lower)?),
                quantifier,
            },
            Statement::Subscope { scope, child } => {
                let inner = child.lower_subscopes(lower)?;
                lower(scope, inner)?
            }
            leaf @ (Statement::Feature(_) | Statement::Match(_)) => leaf,
        })
    }
}

fn count_target(child: &Statement) -> String {
    match child {
        Statement::Feature(node) if node.feature == Feature::BasicBlock => "basic blocks".to_string(),
        Statement::Feature(node) => match node.feature.to_string().split_once(": ") {
            Some((kind, value)) => format!("{}({})", kind, value),
            None => node.feature.to_string(),
        },
        Statement::Match(name) => format!("match({})", name),
        other => other.describe(),
    }
}

fn evaluate_all(children: &[Statement], features: &FeatureSet) -> Vec<MatchResult> {
    children.iter().map(|c| c.evaluate(features)).collect()
}

/// Intersection of the children's location sets, ignoring children with
/// none (addressless features participate without narrowing the set)
fn intersect_attributable(results: &[MatchResult]) -> BTreeSet<Address> {
    let mut attributable = results.iter().filter(|r| !r.locations.is_empty());
    let Some(first) = attributable.next() else {
        return BTreeSet::new();
    };
    let mut locations = first.locations.clone();
    for result in attributable {
        locations.retain(|a| result.locations.contains(a));
    }
    locations
}

fn union_successful(results: &[MatchResult]) -> BTreeSet<Address> {
    results
        .iter()
        .filter(|r| r.success)
        .flat_map(|r| r.locations.iter().copied())
        .collect()
}

fn union_required(children: &[Statement]) -> Option<BTreeSet<Feature>> {
    let mut all = BTreeSet::new();
    for child in children {
        all.extend(child.required_features()?);
    }
    Some(all)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(name: &str) -> Statement {
        Statement::feature(Feature::Api(name.to_string()))
    }

    fn at(features: &mut FeatureSet, feature: Feature, va: u64) {
        features.insert(feature, Address::Absolute(va));
    }

    #[test]
    fn test_leaf_present_with_empty_address_set() {
        let mut features = FeatureSet::new();
        features.insert(Feature::Section(".text".into()), Address::NoAddress);

        let result = Statement::feature(Feature::Section(".text".into())).evaluate(&features);
        assert!(result.success);
        assert!(result.locations.is_empty());
    }

    #[test]
    fn test_and_intersects_only_attributable_children() {
        let mut features = FeatureSet::new();
        features.insert(Feature::Arch("i386".into()), Address::NoAddress);
        at(&mut features, Feature::Mnemonic("push".into()), 0x4071A4);
        at(&mut features, Feature::Mnemonic("push".into()), 0x4071B0);
        at(&mut features, Feature::Number(1000), 0x4071A4);

        let stmt = Statement::And(vec![
            Statement::feature(Feature::Arch("i386".into())),
            Statement::feature(Feature::Mnemonic("push".into())),
            Statement::feature(Feature::Number(1000)),
        ]);
        let result = stmt.evaluate(&features);
        assert!(result.success);
        assert_eq!(
            result.locations.into_iter().collect::<Vec<_>>(),
            vec![Address::Absolute(0x4071A4)]
        );
    }

    #[test]
    fn test_and_of_addressless_children_matches_without_address() {
        let mut features = FeatureSet::new();
        features.insert(Feature::Os("windows".into()), Address::NoAddress);
        features.insert(Feature::Format("pe".into()), Address::NoAddress);

        let stmt = Statement::And(vec![
            Statement::feature(Feature::Os("windows".into())),
            Statement::feature(Feature::Format("pe".into())),
        ]);
        let result = stmt.evaluate(&features);
        assert!(result.success);
        assert!(result.locations.is_empty());
    }

    #[test]
    fn test_or_unions_successful_children() {
        let mut features = FeatureSet::new();
        at(&mut features, Feature::Api("socket".into()), 0x10);
        at(&mut features, Feature::Api("connect".into()), 0x20);

        let stmt = Statement::Or(vec![api("socket"), api("connect"), api("bind")]);
        let result = stmt.evaluate(&features);
        assert!(result.success);
        assert_eq!(result.locations.len(), 2);
        assert_eq!(result.children.len(), 3);
        assert!(!result.children[2].success);
    }

    #[test]
    fn test_not_and_optional() {
        let mut features = FeatureSet::new();
        at(&mut features, Feature::Api("socket".into()), 0x10);

        assert!(!Statement::not(api("socket")).evaluate(&features).success);
        assert!(Statement::not(api("bind")).evaluate(&features).success);
        assert!(Statement::not(api("bind")).evaluate(&features).locations.is_empty());

        let optional = Statement::Optional(vec![api("bind"), api("socket")]).evaluate(&features);
        assert!(optional.success);
        assert_eq!(optional.locations.len(), 1);
        assert!(Statement::Optional(vec![api("bind")]).evaluate(&features).success);
    }

    #[test]
    fn test_at_least() {
        let mut features = FeatureSet::new();
        at(&mut features, Feature::Api("a".into()), 1);
        at(&mut features, Feature::Api("b".into()), 2);

        let two = Statement::AtLeast {
            count: 2,
            children: vec![api("a"), api("b"), api("c")],
        };
        assert!(two.evaluate(&features).success);

        let three = Statement::AtLeast {
            count: 3,
            children: vec![api("a"), api("b"), api("c")],
        };
        assert!(!three.evaluate(&features).success);
    }

    #[test]
    fn test_count_quantifiers() {
        let mut features = FeatureSet::new();
        for va in [0x10, 0x20, 0x30] {
            at(&mut features, Feature::BasicBlock, va);
        }
        let bbs = || Statement::feature(Feature::BasicBlock);

        assert!(Statement::count(bbs(), Quantifier::AtLeast(1)).evaluate(&features).success);
        assert!(Statement::count(bbs(), Quantifier::Exactly(3)).evaluate(&features).success);
        assert!(!Statement::count(bbs(), Quantifier::Exactly(2)).evaluate(&features).success);
        assert!(!Statement::count(bbs(), Quantifier::AtMost(2)).evaluate(&features).success);
        assert!(Statement::count(bbs(), Quantifier::Between(2, 4)).evaluate(&features).success);

        // absent feature counts as zero
        let none = Statement::count(api("missing"), Quantifier::Exactly(0));
        assert!(none.evaluate(&features).success);
    }

    #[test]
    fn test_count_describe() {
        let stmt = Statement::count(Statement::feature(Feature::BasicBlock), Quantifier::AtLeast(1));
        assert_eq!(stmt.describe(), "count(basic blocks): 1 or more");
        let stmt = Statement::count(api("CreateFileA"), Quantifier::Exactly(2));
        assert_eq!(stmt.describe(), "count(api(CreateFileA)): 2");
    }

    #[test]
    fn test_match_reference() {
        let mut features = FeatureSet::new();
        features.index_rule_match("tight loop", None, Address::Absolute(0x403685));

        let result = Statement::matches("tight loop").evaluate(&features);
        assert!(result.success);
        assert_eq!(result.matched_rule.as_deref(), Some("tight loop"));
        assert!(!Statement::matches("other").evaluate(&features).success);
    }

    #[test]
    fn test_bytes_prefix_match() {
        let mut features = FeatureSet::new();
        at(
            &mut features,
            Feature::Bytes(vec![0xED, 0x24, 0x9E, 0xF4, 0x52, 0xA9]),
            0x4020B0,
        );

        let hit = Statement::feature(Feature::Bytes(vec![0xED, 0x24, 0x9E]));
        assert!(hit.evaluate(&features).success);

        let miss = Statement::feature(Feature::Bytes(vec![0x24, 0x9E]));
        assert!(!miss.evaluate(&features).success);

        let longer = Statement::feature(Feature::Bytes(vec![0xED, 0x24, 0x9E, 0xF4, 0x52, 0xA9, 0x07]));
        assert!(!longer.evaluate(&features).success);
    }

    #[test]
    fn test_string_patterns() {
        let mut features = FeatureSet::new();
        at(&mut features, Feature::String("C:\\Windows\\explorer.exe".into()), 0x10);

        let sub = Statement::feature(Feature::Substring("explorer.exe".into()));
        assert!(sub.evaluate(&features).success);

        let re = Statement::regex(r"(?i)EXPLORER\.EXE$").unwrap();
        let result = re.evaluate(&features);
        assert!(result.success);
        assert_eq!(result.locations.len(), 1);

        assert!(Statement::regex("(unclosed").is_err());
    }

    #[test]
    fn test_required_features() {
        let and = Statement::And(vec![
            Statement::Or(vec![api("a"), api("b")]),
            api("c"),
        ]);
        assert_eq!(
            and.required_features(),
            Some(BTreeSet::from([Feature::Api("c".into())]))
        );

        let or = Statement::Or(vec![api("a"), Statement::not(api("b"))]);
        assert_eq!(or.required_features(), None);

        let zero = Statement::count(api("a"), Quantifier::AtMost(2));
        assert_eq!(zero.required_features(), None);
    }

    #[test]
    #[should_panic]
    fn test_unlowered_subscope_panics() {
        let stmt = Statement::subscope(Scope::BasicBlock, api("a"));
        stmt.evaluate(&FeatureSet::new());
    }
}
