// SPDX-License-Identifier: PMPL-1.0-or-later

//! Error types for rule construction and capability analysis

use crate::types::Scope;
use std::path::PathBuf;
use thiserror::Error;

/// Problems detected while loading rules or building a rule set.
///
/// All of these are raised before any evaluation starts.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("duplicate rule name: {0}")]
    DuplicateName(String),

    #[error("rule '{rule}' references unknown rule or namespace '{reference}'")]
    UnknownReference { rule: String, reference: String },

    #[error("cyclic rule dependency: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),

    #[error("rule '{rule}' ({scope} scope) depends on '{dependency}', declared at broader scope {dependency_scope}")]
    BroaderScopeReference {
        rule: String,
        scope: Scope,
        dependency: String,
        dependency_scope: Scope,
    },

    #[error("rule '{rule}': {scope} subscope is not nested within the rule's scopes ({reason})")]
    InvalidSubscope {
        rule: String,
        scope: Scope,
        reason: String,
    },

    #[error("rule '{rule}': invalid scopes: {reason}")]
    InvalidScopes { rule: String, reason: String },

    #[error("rule '{rule}': invalid feature: {message}")]
    InvalidFeature { rule: String, message: String },

    #[error("invalid rule document{}: {message}", .path.as_ref().map(|p| format!(" {}", p.display())).unwrap_or_default())]
    InvalidDocument {
        path: Option<PathBuf>,
        message: String,
    },

    #[error("failed to parse rule YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl RuleError {
    pub fn invalid_feature<R: Into<String>, M: Into<String>>(rule: R, message: M) -> Self {
        Self::InvalidFeature {
            rule: rule.into(),
            message: message.into(),
        }
    }

    pub fn invalid_document<M: Into<String>>(message: M) -> Self {
        Self::InvalidDocument {
            path: None,
            message: message.into(),
        }
    }
}

/// Top-level error for the capscan library
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Rule(#[from] RuleError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse feature document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid configuration{}: {message}", .path.as_ref().map(|p| format!(" {}", p.display())).unwrap_or_default())]
    Config {
        path: Option<PathBuf>,
        message: String,
    },

    #[error("unsupported extractor kind: {0}")]
    ExtractorKind(String),

    #[error("analysis cancelled after {completed} of {total} passes")]
    Cancelled { completed: usize, total: usize },
}

impl Error {
    pub fn io<P: Into<PathBuf>>(path: P, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
