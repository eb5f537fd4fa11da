// SPDX-License-Identifier: PMPL-1.0-or-later

//! Capability rules
//!
//! A [`Rule`] names a behavior, files it under an optional namespace, and
//! declares the scopes at which its logic tree is evaluated. Rules are
//! gathered into a [`RuleSet`], which resolves `match:` references between
//! them and fixes the evaluation order.

pub mod loader;
pub mod ruleset;

use crate::engine::Statement;
use crate::error::RuleError;
use crate::types::Scopes;
use serde::{Deserialize, Serialize};

pub use loader::{load_rules, load_rules_from_paths};
pub use ruleset::RuleSet;

/// Descriptive metadata; never evaluated
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleMeta {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Library rules exist to be referenced by other rules and are not reported on their own
    #[serde(default)]
    pub lib: bool,
    /// Set on rules synthesized from a subscope node: the enclosing rule's name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscope_of: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub name: String,
    pub namespace: Option<String>,
    pub scopes: Scopes,
    pub statement: Statement,
    pub meta: RuleMeta,
}

impl Rule {
    pub fn new<S: Into<String>>(
        name: S,
        scopes: Scopes,
        statement: Statement,
    ) -> Result<Self, RuleError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(RuleError::invalid_document("rule name must not be empty"));
        }
        if let Some(reason) = scopes.validate() {
            return Err(RuleError::InvalidScopes { rule: name, reason });
        }
        Ok(Self {
            name,
            namespace: None,
            scopes,
            statement,
            meta: RuleMeta::default(),
        })
    }

    pub fn with_namespace<S: Into<String>>(mut self, namespace: S) -> Self {
        let namespace = namespace.into();
        self.namespace = if namespace.is_empty() {
            None
        } else {
            Some(namespace)
        };
        self
    }

    pub fn with_meta(mut self, meta: RuleMeta) -> Self {
        self.meta = meta;
        self
    }

    pub fn is_subscope_rule(&self) -> bool {
        self.meta.subscope_of.is_some()
    }

    pub fn is_library_rule(&self) -> bool {
        self.meta.lib
    }

    /// True if the rule is filed under `prefix` (`a/b` contains `a/b` and `a/b/c`)
    pub fn in_namespace(&self, prefix: &str) -> bool {
        match &self.namespace {
            Some(ns) => {
                ns == prefix || (ns.starts_with(prefix) && ns[prefix.len()..].starts_with('/'))
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::Feature;
    use crate::types::Scope;

    fn rule(name: &str) -> Rule {
        Rule::new(
            name,
            Scopes::both(Scope::Function, Scope::Process),
            Statement::feature(Feature::Api("CreateFileA".into())),
        )
        .unwrap()
    }

    #[test]
    fn test_namespace_prefixes() {
        let r = rule("write file").with_namespace("host-interaction/file-system/write");
        assert!(r.in_namespace("host-interaction"));
        assert!(r.in_namespace("host-interaction/file-system"));
        assert!(r.in_namespace("host-interaction/file-system/write"));
        assert!(!r.in_namespace("host-interaction/file"));
        assert!(!r.in_namespace("anti-analysis"));
    }

    #[test]
    fn test_rule_requires_a_scope() {
        let err = Rule::new(
            "nowhere",
            Scopes::new(None, None),
            Statement::feature(Feature::Api("a".into())),
        )
        .unwrap_err();
        assert!(matches!(err, RuleError::InvalidScopes { .. }));
    }

    #[test]
    fn test_empty_namespace_is_none() {
        assert!(rule("r").with_namespace("").namespace.is_none());
    }
}
