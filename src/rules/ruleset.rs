// SPDX-License-Identifier: PMPL-1.0-or-later

//! Indexed, dependency-ordered rule collection
//!
//! Construction lowers subscope nodes into synthesized rules, resolves
//! every `match:` reference, rejects cycles and references to broader
//! scopes, and fixes a topological evaluation order. The set is read-only
//! afterwards; evaluation borrows it.

use crate::engine::{MatchResults, Statement};
use crate::error::RuleError;
use crate::features::{namespace_prefixes, Feature, FeatureSet};
use crate::rules::{Rule, RuleMeta};
use crate::types::{Address, Flavor, Scope, Scopes};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::debug;

#[derive(Debug)]
pub struct RuleSet {
    /// Evaluation order: every rule follows the rules it references
    rules: Vec<Rule>,
    index: HashMap<String, usize>,
    dependencies: Vec<Vec<usize>>,
    buckets: HashMap<Scope, Vec<usize>>,
    /// Per rule: features of which one must be present for the rule to match
    triggers: Vec<Option<BTreeSet<Feature>>>,
}

impl RuleSet {
    /// Build a rule set. Fails without partially building anything.
    pub fn new(rules: Vec<Rule>) -> Result<Self, RuleError> {
        ensure_unique(&rules)?;

        let mut lowered = Vec::with_capacity(rules.len());
        for rule in rules {
            lower_rule(rule, &mut lowered)?;
        }
        ensure_unique(&lowered)?;

        let dependencies = resolve_dependencies(&lowered)?;
        let order = topological_order(&lowered, &dependencies)?;

        // Reorder rules and remap dependency indices into evaluation order
        let mut position = vec![0usize; lowered.len()];
        for (new, &old) in order.iter().enumerate() {
            position[old] = new;
        }
        let mut slots: Vec<Option<Rule>> = lowered.into_iter().map(Some).collect();
        let mut ordered = Vec::with_capacity(slots.len());
        let mut ordered_deps = Vec::with_capacity(slots.len());
        for &old in &order {
            if let Some(rule) = slots[old].take() {
                ordered.push(rule);
            }
            ordered_deps.push(dependencies[old].iter().map(|&d| position[d]).collect());
        }

        let index = ordered
            .iter()
            .enumerate()
            .map(|(i, r)| (r.name.clone(), i))
            .collect();

        let mut buckets: HashMap<Scope, Vec<usize>> = HashMap::new();
        for (i, rule) in ordered.iter().enumerate() {
            for scope in rule.scopes.iter() {
                buckets.entry(scope).or_default().push(i);
            }
        }

        let triggers = ordered
            .iter()
            .map(|r| r.statement.required_features())
            .collect();

        let set = Self {
            rules: ordered,
            index,
            dependencies: ordered_deps,
            buckets,
            triggers,
        };
        debug!(
            "built rule set: {} rules ({} synthesized from subscopes), per scope: {:?}",
            set.rules.len(),
            set.rules.iter().filter(|r| r.is_subscope_rule()).count(),
            set.scope_counts()
        );
        Ok(set)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// All rules in evaluation order, including synthesized subscope rules
    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter()
    }

    pub fn get(&self, name: &str) -> Option<&Rule> {
        self.index.get(name).map(|&i| &self.rules[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Rules the named rule references directly
    pub fn dependencies(&self, name: &str) -> Vec<&Rule> {
        match self.index.get(name) {
            Some(&i) => self.dependencies[i].iter().map(|&d| &self.rules[d]).collect(),
            None => Vec::new(),
        }
    }

    /// Rules declared for `scope`, in evaluation order
    pub fn rules_for_scope(&self, scope: Scope) -> Vec<&Rule> {
        self.buckets
            .get(&scope)
            .map(|bucket| bucket.iter().map(|&i| &self.rules[i]).collect())
            .unwrap_or_default()
    }

    pub fn file_rules(&self) -> Vec<&Rule> {
        self.rules_for_scope(Scope::File)
    }

    pub fn function_rules(&self) -> Vec<&Rule> {
        self.rules_for_scope(Scope::Function)
    }

    pub fn basic_block_rules(&self) -> Vec<&Rule> {
        self.rules_for_scope(Scope::BasicBlock)
    }

    pub fn instruction_rules(&self) -> Vec<&Rule> {
        self.rules_for_scope(Scope::Instruction)
    }

    pub fn process_rules(&self) -> Vec<&Rule> {
        self.rules_for_scope(Scope::Process)
    }

    pub fn thread_rules(&self) -> Vec<&Rule> {
        self.rules_for_scope(Scope::Thread)
    }

    pub fn call_rules(&self) -> Vec<&Rule> {
        self.rules_for_scope(Scope::Call)
    }

    pub fn scope_counts(&self) -> BTreeMap<Scope, usize> {
        self.buckets
            .iter()
            .map(|(scope, bucket)| (*scope, bucket.len()))
            .collect()
    }

    /// Evaluate every rule declared for `scope` against `features` at `address`.
    ///
    /// Rules run in dependency order. Each match is recorded into `features`
    /// as a `match` feature (plus its namespaces) before later rules run, so
    /// same-scope references resolve within one pass. Nothing else in
    /// `features` is touched.
    pub fn match_scope(
        &self,
        scope: Scope,
        features: &mut FeatureSet,
        address: Address,
    ) -> MatchResults {
        self.match_bucket(scope, None, features, address)
    }

    /// Like [`RuleSet::match_scope`], restricted to rules whose `flavor`
    /// scope is `scope`. File scope is shared by both hierarchies; static
    /// analysis must not evaluate rules that are file-scoped only for dynamic
    /// analysis, and vice versa.
    pub fn match_flavor_scope(
        &self,
        flavor: Flavor,
        scope: Scope,
        features: &mut FeatureSet,
        address: Address,
    ) -> MatchResults {
        self.match_bucket(scope, Some(flavor), features, address)
    }

    fn match_bucket(
        &self,
        scope: Scope,
        flavor: Option<Flavor>,
        features: &mut FeatureSet,
        address: Address,
    ) -> MatchResults {
        let mut results = MatchResults::new();
        let Some(bucket) = self.buckets.get(&scope) else {
            return results;
        };

        for &i in bucket {
            let rule = &self.rules[i];
            if let Some(flavor) = flavor {
                if rule.scopes.for_flavor(flavor) != Some(scope) {
                    continue;
                }
            }
            if let Some(triggers) = &self.triggers[i] {
                if !triggers.iter().any(|f| features.contains(f)) {
                    continue;
                }
            }

            let result = rule.statement.evaluate(features);
            if result.success {
                features.index_rule_match(&rule.name, rule.namespace.as_deref(), address);
                results
                    .entry(rule.name.clone())
                    .or_default()
                    .push((address, result));
            }
        }
        results
    }

    /// Record `matches` into `features` at the addresses they matched
    pub fn index_matches(&self, features: &mut FeatureSet, matches: &MatchResults) {
        for (name, hits) in matches {
            let namespace = self.get(name).and_then(|r| r.namespace.as_deref());
            for (address, _) in hits {
                features.index_rule_match(name, namespace, *address);
            }
        }
    }

    /// Keep rules whose name or namespace contains `tag`, plus everything they depend on
    pub fn filter_rules_by_meta(&self, tag: &str) -> Result<RuleSet, RuleError> {
        let mut keep = vec![false; self.rules.len()];
        let mut stack: Vec<usize> = self
            .rules
            .iter()
            .enumerate()
            .filter(|(_, r)| {
                !r.is_subscope_rule()
                    && (r.name.contains(tag)
                        || r.namespace.as_deref().is_some_and(|ns| ns.contains(tag)))
            })
            .map(|(i, _)| i)
            .collect();

        while let Some(i) = stack.pop() {
            if keep[i] {
                continue;
            }
            keep[i] = true;
            stack.extend(self.dependencies[i].iter().copied());
        }

        debug!(
            "tag '{}' selected {} of {} rules",
            tag,
            keep.iter().filter(|&&k| k).count(),
            self.rules.len()
        );
        self.subset(&keep)
    }

    /// Drop rules filed under any of `prefixes`, and every rule left with an unresolvable reference
    pub fn without_namespaces(&self, prefixes: &[&str]) -> Result<RuleSet, RuleError> {
        let mut keep = vec![true; self.rules.len()];
        let mut names: HashSet<&str> = HashSet::new();
        let mut namespaces: HashSet<&str> = HashSet::new();

        // evaluation order visits references before referrers
        for (i, rule) in self.rules.iter().enumerate() {
            let excluded = prefixes.iter().any(|p| rule.in_namespace(p));
            let resolvable = rule
                .statement
                .match_references()
                .iter()
                .all(|r| names.contains(r) || namespaces.contains(r));
            if excluded || !resolvable {
                keep[i] = false;
                continue;
            }
            names.insert(rule.name.as_str());
            if let Some(ns) = rule.namespace.as_deref() {
                namespaces.extend(namespace_prefixes(ns));
            }
        }

        // synthesized subscope rules go with their parent
        for (i, rule) in self.rules.iter().enumerate() {
            if let Some(parent) = &rule.meta.subscope_of {
                if !names.contains(parent.as_str()) {
                    keep[i] = false;
                }
            }
        }

        self.subset(&keep)
    }

    fn subset(&self, keep: &[bool]) -> Result<RuleSet, RuleError> {
        let rules = self
            .rules
            .iter()
            .zip(keep)
            .filter(|(_, &k)| k)
            .map(|(r, _)| r.clone())
            .collect();
        RuleSet::new(rules)
    }
}

fn ensure_unique(rules: &[Rule]) -> Result<(), RuleError> {
    let mut seen = HashSet::new();
    for rule in rules {
        if !seen.insert(rule.name.as_str()) {
            return Err(RuleError::DuplicateName(rule.name.clone()));
        }
    }
    Ok(())
}

/// Replace each subscope node with a reference to a synthesized rule
/// declared at the subscope's scope; synthesized rules precede their parent
fn lower_rule(rule: Rule, out: &mut Vec<Rule>) -> Result<(), RuleError> {
    if !rule.statement.has_subscope() {
        out.push(rule);
        return Ok(());
    }

    let Rule {
        name,
        namespace,
        scopes,
        statement,
        meta,
    } = rule;
    let mut synthesized = Vec::new();

    let statement = statement.lower_subscopes(
        &mut |scope: Scope, inner: Statement| -> Result<Statement, RuleError> {
            let invalid = |reason: String| RuleError::InvalidSubscope {
                rule: name.clone(),
                scope,
                reason,
            };
            let flavor = scope
                .flavor()
                .ok_or_else(|| invalid("file scope cannot be nested".to_string()))?;
            let enclosing = scopes
                .for_flavor(flavor)
                .ok_or_else(|| invalid(format!("rule declares no {} scope", flavor)))?;
            if scope == enclosing || !scope.is_within(enclosing) {
                return Err(invalid(format!("must be narrower than {}", enclosing)));
            }

            let child_name = format!("{}/{} subscope {}", name, scope, synthesized.len() + 1);
            let child_scopes = match flavor {
                Flavor::Static => Scopes::static_only(scope),
                Flavor::Dynamic => Scopes::dynamic_only(scope),
            };
            synthesized.push(Rule {
                name: child_name.clone(),
                namespace: None,
                scopes: child_scopes,
                statement: inner,
                meta: RuleMeta {
                    subscope_of: Some(name.clone()),
                    ..RuleMeta::default()
                },
            });
            Ok(Statement::Match(child_name))
        },
    )?;

    out.extend(synthesized);
    out.push(Rule {
        name,
        namespace,
        scopes,
        statement,
        meta,
    });
    Ok(())
}

fn resolve_dependencies(rules: &[Rule]) -> Result<Vec<Vec<usize>>, RuleError> {
    let by_name: HashMap<&str, usize> = rules
        .iter()
        .enumerate()
        .map(|(i, r)| (r.name.as_str(), i))
        .collect();

    let mut dependencies = Vec::with_capacity(rules.len());
    for (i, rule) in rules.iter().enumerate() {
        let mut deps: Vec<usize> = Vec::new();
        for reference in rule.statement.match_references() {
            if let Some(&d) = by_name.get(reference) {
                check_scopes(rule, &rules[d])?;
                if !deps.contains(&d) {
                    deps.push(d);
                }
                continue;
            }

            let members: Vec<usize> = rules
                .iter()
                .enumerate()
                .filter(|(j, r)| *j != i && r.in_namespace(reference))
                .map(|(j, _)| j)
                .collect();
            if members.is_empty() {
                return Err(RuleError::UnknownReference {
                    rule: rule.name.clone(),
                    reference: reference.to_string(),
                });
            }
            for d in members {
                // a namespace may hold rules at broader scopes; those can never
                // satisfy this reference, so they impose no ordering either
                if check_scopes(rule, &rules[d]).is_err() {
                    debug!(
                        "rule '{}': namespace member '{}' is broader, ignored",
                        rule.name, rules[d].name
                    );
                    continue;
                }
                if !deps.contains(&d) {
                    deps.push(d);
                }
            }
        }
        dependencies.push(deps);
    }
    Ok(dependencies)
}

/// A dependency must sit at the same or a narrower scope in every flavor both rules declare
fn check_scopes(rule: &Rule, dependency: &Rule) -> Result<(), RuleError> {
    for flavor in [Flavor::Static, Flavor::Dynamic] {
        if let (Some(scope), Some(dependency_scope)) = (
            rule.scopes.for_flavor(flavor),
            dependency.scopes.for_flavor(flavor),
        ) {
            if !dependency_scope.is_within(scope) {
                return Err(RuleError::BroaderScopeReference {
                    rule: rule.name.clone(),
                    scope,
                    dependency: dependency.name.clone(),
                    dependency_scope,
                });
            }
        }
    }
    Ok(())
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    Active,
    Done,
}

/// Depth-first post-order in declaration order, so unrelated rules keep their relative order
fn topological_order(rules: &[Rule], dependencies: &[Vec<usize>]) -> Result<Vec<usize>, RuleError> {
    fn visit(
        i: usize,
        rules: &[Rule],
        dependencies: &[Vec<usize>],
        marks: &mut [Mark],
        path: &mut Vec<usize>,
        order: &mut Vec<usize>,
    ) -> Result<(), RuleError> {
        match marks[i] {
            Mark::Done => return Ok(()),
            Mark::Active => {
                let start = path.iter().position(|&p| p == i).unwrap_or(0);
                let mut cycle: Vec<String> =
                    path[start..].iter().map(|&p| rules[p].name.clone()).collect();
                cycle.push(rules[i].name.clone());
                return Err(RuleError::CyclicDependency(cycle));
            }
            Mark::Unvisited => {}
        }

        marks[i] = Mark::Active;
        path.push(i);
        for &d in &dependencies[i] {
            visit(d, rules, dependencies, marks, path, order)?;
        }
        path.pop();
        marks[i] = Mark::Done;
        order.push(i);
        Ok(())
    }

    let mut marks = vec![Mark::Unvisited; rules.len()];
    let mut path = Vec::new();
    let mut order = Vec::with_capacity(rules.len());
    for i in 0..rules.len() {
        visit(i, rules, dependencies, &mut marks, &mut path, &mut order)?;
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Quantifier;

    fn feature_rule(name: &str, scopes: Scopes, feature: Feature) -> Rule {
        Rule::new(name, scopes, Statement::feature(feature)).unwrap()
    }

    fn rule(name: &str, scopes: Scopes, statement: Statement) -> Rule {
        Rule::new(name, scopes, statement).unwrap()
    }

    fn names(rules: Vec<&Rule>) -> Vec<&str> {
        rules.into_iter().map(|r| r.name.as_str()).collect()
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let a = feature_rule("a", Scopes::static_only(Scope::Function), Feature::Api("x".into()));
        let b = feature_rule("a", Scopes::static_only(Scope::File), Feature::Api("y".into()));
        let err = RuleSet::new(vec![a, b]).unwrap_err();
        assert!(matches!(err, RuleError::DuplicateName(name) if name == "a"));
    }

    #[test]
    fn test_unknown_reference_rejected() {
        let a = rule(
            "a",
            Scopes::static_only(Scope::Function),
            Statement::matches("missing"),
        );
        let err = RuleSet::new(vec![a]).unwrap_err();
        assert!(matches!(err, RuleError::UnknownReference { reference, .. } if reference == "missing"));
    }

    #[test]
    fn test_cycle_rejected() {
        let scopes = Scopes::static_only(Scope::Function);
        let a = rule("a", scopes, Statement::matches("b"));
        let b = rule("b", scopes, Statement::matches("c"));
        let c = rule("c", scopes, Statement::matches("a"));
        match RuleSet::new(vec![a, b, c]).unwrap_err() {
            RuleError::CyclicDependency(cycle) => {
                assert_eq!(cycle.first(), cycle.last());
                assert_eq!(cycle.len(), 4);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_broader_scope_reference_rejected() {
        let func = feature_rule(
            "function rule",
            Scopes::static_only(Scope::Function),
            Feature::Api("x".into()),
        );
        let bb = rule(
            "bb rule",
            Scopes::static_only(Scope::BasicBlock),
            Statement::matches("function rule"),
        );
        let err = RuleSet::new(vec![func, bb]).unwrap_err();
        assert!(matches!(err, RuleError::BroaderScopeReference { .. }));
    }

    #[test]
    fn test_dependencies_ordered_first() {
        let file = rule(
            "kill thread program",
            Scopes::both(Scope::File, Scope::Process),
            Statement::And(vec![
                Statement::feature(Feature::Section(".text".into())),
                Statement::matches("kill thread loop"),
            ]),
        );
        let func = rule(
            "kill thread loop",
            Scopes::both(Scope::Function, Scope::Process),
            Statement::matches("tight loop"),
        );
        let bb = feature_rule(
            "tight loop",
            Scopes::both(Scope::BasicBlock, Scope::Process),
            Feature::Characteristic("tight loop".into()),
        );
        let unrelated = feature_rule(
            "unrelated",
            Scopes::static_only(Scope::Function),
            Feature::Api("x".into()),
        );
        let set = RuleSet::new(vec![file, unrelated, func, bb]).unwrap();
        let order: Vec<_> = set.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(
            order,
            vec!["tight loop", "kill thread loop", "kill thread program", "unrelated"]
        );
        assert_eq!(
            names(set.process_rules()),
            vec!["tight loop", "kill thread loop", "kill thread program"]
        );
        assert_eq!(names(set.dependencies("kill thread program")), vec!["kill thread loop"]);
    }

    #[test]
    fn test_subscope_lowered_to_synthesized_rule() {
        let r = rule(
            "test rule",
            Scopes::both(Scope::Function, Scope::Process),
            Statement::And(vec![Statement::subscope(
                Scope::BasicBlock,
                Statement::feature(Feature::Characteristic("tight loop".into())),
            )]),
        );
        let set = RuleSet::new(vec![r]).unwrap();
        assert_eq!(set.len(), 2);

        let synthesized = &set.basic_block_rules()[0];
        assert!(synthesized.is_subscope_rule());
        assert_eq!(synthesized.meta.subscope_of.as_deref(), Some("test rule"));
        assert_eq!(synthesized.scopes, Scopes::static_only(Scope::BasicBlock));

        let parent = set.get("test rule").unwrap();
        assert!(!parent.statement.has_subscope());
        assert_eq!(parent.statement.match_references(), vec![synthesized.name.as_str()]);
    }

    #[test]
    fn test_subscope_must_be_narrower() {
        let r = rule(
            "bad",
            Scopes::static_only(Scope::BasicBlock),
            Statement::subscope(Scope::Function, Statement::feature(Feature::Api("x".into()))),
        );
        assert!(matches!(
            RuleSet::new(vec![r]).unwrap_err(),
            RuleError::InvalidSubscope { .. }
        ));

        let r = rule(
            "static only",
            Scopes::static_only(Scope::Function),
            Statement::subscope(Scope::Call, Statement::feature(Feature::Api("x".into()))),
        );
        assert!(matches!(
            RuleSet::new(vec![r]).unwrap_err(),
            RuleError::InvalidSubscope { .. }
        ));
    }

    #[test]
    fn test_match_scope_injects_same_scope_matches() {
        let base = feature_rule(
            "create TCP socket",
            Scopes::static_only(Scope::Function),
            Feature::Api("socket".into()),
        )
        .with_namespace("communication/socket/tcp");
        let by_name = rule(
            "connect TCP socket",
            Scopes::static_only(Scope::Function),
            Statement::And(vec![
                Statement::matches("create TCP socket"),
                Statement::feature(Feature::Api("connect".into())),
            ]),
        );
        let by_namespace = rule(
            "uses sockets",
            Scopes::static_only(Scope::Function),
            Statement::matches("communication/socket"),
        );
        let set = RuleSet::new(vec![by_namespace, by_name, base]).unwrap();

        let mut features = FeatureSet::new();
        features.insert(Feature::Api("socket".into()), Address::Absolute(0x10));
        features.insert(Feature::Api("connect".into()), Address::Absolute(0x20));
        let results = set.match_scope(Scope::Function, &mut features, Address::Absolute(0x1000));

        assert_eq!(results.len(), 3);
        assert!(features.contains(&Feature::matched_rule("connect TCP socket")));
        assert!(features.contains(&Feature::matched_rule("communication")));
        assert_eq!(results["uses sockets"][0].0, Address::Absolute(0x1000));
    }

    #[test]
    fn test_trigger_index_skips_unrelated_rules() {
        let r = rule(
            "needs api",
            Scopes::static_only(Scope::Function),
            Statement::count(Statement::feature(Feature::Api("x".into())), Quantifier::AtLeast(1)),
        );
        let always = rule(
            "without api",
            Scopes::static_only(Scope::Function),
            Statement::not(Statement::feature(Feature::Api("x".into()))),
        );
        let set = RuleSet::new(vec![r, always]).unwrap();
        let mut features = FeatureSet::new();
        let results = set.match_scope(Scope::Function, &mut features, Address::Absolute(1));
        assert_eq!(results.keys().collect::<Vec<_>>(), vec!["without api"]);
    }

    #[test]
    fn test_match_flavor_scope_filters_shared_file_bucket() {
        let static_file = feature_rule(
            "static file rule",
            Scopes::both(Scope::File, Scope::Process),
            Feature::Os("windows".into()),
        );
        let dynamic_file = feature_rule(
            "dynamic file rule",
            Scopes::both(Scope::Function, Scope::File),
            Feature::Os("windows".into()),
        );
        let set = RuleSet::new(vec![static_file, dynamic_file]).unwrap();
        let mut features = FeatureSet::new();
        features.insert(Feature::Os("windows".into()), Address::NoAddress);

        let all = set.match_scope(Scope::File, &mut features.clone(), Address::NoAddress);
        assert_eq!(all.len(), 2);

        let only_static =
            set.match_flavor_scope(Flavor::Static, Scope::File, &mut features, Address::NoAddress);
        assert_eq!(only_static.keys().collect::<Vec<_>>(), vec!["static file rule"]);
    }

    #[test]
    fn test_filter_rules_by_meta_keeps_dependencies() {
        let scopes = Scopes::static_only(Scope::Function);
        let create = feature_rule("create TCP socket", scopes, Feature::Api("socket".into()));
        let connect = rule("connect TCP socket", scopes, Statement::matches("create TCP socket"));
        let act = rule("act as TCP client", scopes, Statement::matches("connect TCP socket"));
        let other = feature_rule("write file", scopes, Feature::Api("WriteFile".into()));
        let set = RuleSet::new(vec![create, connect, act, other]).unwrap();

        let filtered = set.filter_rules_by_meta("act as TCP client").unwrap();
        assert_eq!(filtered.len(), 3);
        assert!(!filtered.contains("write file"));
    }

    #[test]
    fn test_without_namespaces_drops_dependents() {
        let scopes = Scopes::static_only(Scope::Function);
        let create = feature_rule("create TCP socket", scopes, Feature::Api("socket".into()))
            .with_namespace("communication/socket/tcp");
        let connect = rule("connect TCP socket", scopes, Statement::matches("create TCP socket"))
            .with_namespace("communication/tcp/client");
        let other = feature_rule("write file", scopes, Feature::Api("WriteFile".into()))
            .with_namespace("host-interaction/file-system/write");
        let set = RuleSet::new(vec![create, connect, other]).unwrap();

        let trimmed = set.without_namespaces(&["communication/socket"]).unwrap();
        assert_eq!(trimmed.iter().map(|r| r.name.as_str()).collect::<Vec<_>>(), vec!["write file"]);
    }
}
