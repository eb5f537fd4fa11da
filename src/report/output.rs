// SPDX-License-Identifier: PMPL-1.0-or-later

//! The serializable result document and its output formats

use crate::capabilities::{AnalysisMeta, Capabilities};
use crate::engine::MatchResult;
use crate::report::filter::{annotate_visibility, Visibility};
use crate::report::formatter::{ReportFormatter, Verbosity};
use crate::rules::RuleSet;
use crate::types::{Address, Scopes};
use anyhow::Result;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportOutputFormat {
    #[default]
    Text,
    Json,
    Yaml,
}

impl ReportOutputFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "text" | "txt" => Some(ReportOutputFormat::Text),
            "json" => Some(ReportOutputFormat::Json),
            "yaml" | "yml" => Some(ReportOutputFormat::Yaml),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ReportOutputFormat::Text => "txt",
            ReportOutputFormat::Json => "json",
            ReportOutputFormat::Yaml => "yaml",
        }
    }

    pub fn serialize(&self, doc: &ResultDocument, verbosity: Verbosity) -> Result<String> {
        match self {
            ReportOutputFormat::Text => Ok(ReportFormatter::new(verbosity).render(doc)),
            ReportOutputFormat::Json => Ok(serde_json::to_string_pretty(doc)?),
            ReportOutputFormat::Yaml => Ok(serde_yaml::to_string(doc)?),
        }
    }
}

/// The analyzed input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleInfo {
    pub path: String,
    pub sha256: String,
}

impl SampleInfo {
    pub fn new<P: AsRef<Path>>(path: P, contents: &[u8]) -> Self {
        Self {
            path: path.as_ref().display().to_string(),
            sha256: hex::encode(Sha256::digest(contents)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultMeta {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample: Option<SampleInfo>,
    pub analysis: AnalysisMeta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSummary {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub scopes: Scopes,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub lib: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleResult {
    pub meta: RuleSummary,
    pub visibility: Visibility,
    pub matches: Vec<(Address, MatchResult)>,
}

/// Everything a renderer needs, independent of the rule set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultDocument {
    pub meta: ResultMeta,
    pub rules: BTreeMap<String, RuleResult>,
}

impl ResultDocument {
    pub fn new(ruleset: &RuleSet, capabilities: &Capabilities, sample: Option<SampleInfo>) -> Self {
        let visibility = annotate_visibility(ruleset, &capabilities.matches);
        let rules = capabilities
            .matches
            .iter()
            .map(|(name, hits)| {
                let rule = ruleset.get(name);
                let meta = RuleSummary {
                    name: name.clone(),
                    namespace: rule.and_then(|r| r.namespace.clone()),
                    scopes: rule.map_or(Scopes::new(None, None), |r| r.scopes),
                    authors: rule.map(|r| r.meta.authors.clone()).unwrap_or_default(),
                    description: rule.and_then(|r| r.meta.description.clone()),
                    lib: rule.is_some_and(|r| r.is_library_rule()),
                };
                let result = RuleResult {
                    meta,
                    visibility: visibility.get(name).copied().unwrap_or(Visibility::Shown),
                    matches: hits.clone(),
                };
                (name.clone(), result)
            })
            .collect();

        Self {
            meta: ResultMeta {
                version: env!("CARGO_PKG_VERSION").to_string(),
                sample,
                analysis: capabilities.meta.clone(),
            },
            rules,
        }
    }

    /// Rules listed at the top level for `verbosity`
    pub fn visible_rules(&self, verbosity: Verbosity) -> impl Iterator<Item = &RuleResult> {
        self.rules.values().filter(move |r| match verbosity {
            Verbosity::Default => r.visibility.shown_by_default(),
            Verbosity::Verbose | Verbosity::VeryVerbose => r.visibility.shown_when_verbose(),
        })
    }
}
