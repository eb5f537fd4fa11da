// SPDX-License-Identifier: PMPL-1.0-or-later

//! Capability discovery
//!
//! Walks an extractor's scope hierarchy bottom-up. Each scope's features and
//! rule matches are folded into the enclosing scope before that scope's rules
//! run, so a function rule can test instruction features and reference a
//! basic-block rule. Matches from every level reach the file scope, which is
//! evaluated once at the end.

mod dynamic_scopes;
mod static_scopes;

use crate::engine::{merge_results, MatchResults};
use crate::error::{Error, Result};
use crate::extractors::{FeatureExtractor, Observations};
use crate::features::FeatureSet;
use crate::rules::RuleSet;
use crate::types::{Address, Flavor, Scope};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub use dynamic_scopes::find_dynamic_capabilities;
pub use static_scopes::find_static_capabilities;

/// Receives `(completed, total)` after each function or process pass
pub type ProgressCallback = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Knobs for one analysis run
#[derive(Clone)]
pub struct CaptureOptions {
    /// Analyze functions (processes) on rayon's pool
    pub parallel: bool,
    /// Checked before each function (process) pass; once set, analysis stops
    pub cancel: Option<Arc<AtomicBool>>,
    pub progress: Option<ProgressCallback>,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            parallel: true,
            cancel: None,
            progress: None,
        }
    }
}

impl fmt::Debug for CaptureOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureOptions")
            .field("parallel", &self.parallel)
            .field("cancel", &self.cancel)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl CaptureOptions {
    pub fn sequential(mut self) -> Self {
        self.parallel = false;
        self
    }

    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(usize, usize) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(callback));
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeFeatureCount {
    pub address: Address,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureCounts {
    pub file: usize,
    /// One entry per analyzed function (static) or process (dynamic)
    pub scopes: Vec<ScopeFeatureCount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryFunction {
    pub address: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicBlockLayout {
    pub address: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionLayout {
    pub address: Address,
    pub matched_basic_blocks: Vec<BasicBlockLayout>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallLayout {
    pub address: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadLayout {
    pub address: Address,
    pub matched_calls: Vec<CallLayout>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessLayout {
    pub address: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub matched_threads: Vec<ThreadLayout>,
}

/// Where matches were found, for renderers that group by container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Layout {
    Static { functions: Vec<FunctionLayout> },
    Dynamic { processes: Vec<ProcessLayout> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisMeta {
    pub flavor: Flavor,
    pub analyzed_at: String,
    pub base_address: Address,
    pub feature_counts: FeatureCounts,
    pub match_counts: BTreeMap<Scope, usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub library_functions: Vec<LibraryFunction>,
    pub layout: Layout,
}

/// Everything one analysis run found
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capabilities {
    pub matches: MatchResults,
    pub meta: AnalysisMeta,
}

impl Capabilities {
    pub fn contains(&self, rule: &str) -> bool {
        self.matches.contains_key(rule)
    }

    /// Addresses at which `rule` matched, in order
    pub fn addresses(&self, rule: &str) -> Vec<Address> {
        self.matches
            .get(rule)
            .map(|hits| hits.iter().map(|(address, _)| *address).collect())
            .unwrap_or_default()
    }
}

/// Find every capability `ruleset` detects in `extractor`'s features
pub fn find_capabilities(
    ruleset: &RuleSet,
    extractor: &FeatureExtractor,
    options: &CaptureOptions,
) -> Result<Capabilities> {
    let _span = tracing::info_span!("find_capabilities", flavor = %extractor.flavor()).entered();
    let capabilities = match extractor {
        FeatureExtractor::Static(e) => find_static_capabilities(ruleset, e.as_ref(), options)?,
        FeatureExtractor::Dynamic(e) => find_dynamic_capabilities(ruleset, e.as_ref(), options)?,
    };
    info!(
        "{} capabilities matched across {} scopes",
        capabilities.matches.len(),
        capabilities.meta.match_counts.len()
    );
    Ok(capabilities)
}

/// Evaluate file-scope rules once, against file and global features plus
/// everything folded up from narrower scopes. Returns the matches and the
/// number of distinct file and global features.
pub fn find_file_capabilities(
    ruleset: &RuleSet,
    flavor: Flavor,
    file_features: Observations,
    global_features: Observations,
    lower_features: &FeatureSet,
) -> (MatchResults, usize) {
    let mut features: FeatureSet = file_features
        .into_iter()
        .chain(global_features)
        .collect();
    let count = features.len();
    debug!("analyzed file and extracted {} features", count);

    features.merge(lower_features);
    let matches = ruleset.match_flavor_scope(flavor, Scope::File, &mut features, Address::NoAddress);
    (matches, count)
}

/// Run `pass` over `items`, on rayon's pool unless disabled, honoring
/// cancellation and reporting progress. Results keep the input order.
pub(crate) fn run_passes<T, R, F>(items: &[T], options: &CaptureOptions, pass: F) -> Result<Vec<R>>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync + Send,
{
    let total = items.len();
    let done = AtomicUsize::new(0);
    let run = |item: &T| -> Option<R> {
        if options.is_cancelled() {
            return None;
        }
        let result = pass(item);
        let completed = done.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(progress) = &options.progress {
            progress(completed, total);
        }
        Some(result)
    };

    let results: Vec<Option<R>> = if options.parallel {
        items.par_iter().map(run).collect()
    } else {
        items.iter().map(run).collect()
    };

    let completed = done.load(Ordering::Relaxed);
    if completed < total && options.is_cancelled() {
        warn!("analysis cancelled after {} of {} passes", completed, total);
        return Err(Error::Cancelled { completed, total });
    }
    Ok(results.into_iter().flatten().collect())
}

/// Fold `matches` into `into` and count them under `scope`
pub(crate) fn collect_scope(
    into: &mut MatchResults,
    counts: &mut BTreeMap<Scope, usize>,
    scope: Scope,
    matches: MatchResults,
) {
    let n: usize = matches.values().map(Vec::len).sum();
    if n > 0 {
        *counts.entry(scope).or_default() += n;
    }
    merge_results(into, matches);
}

pub(crate) fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub(crate) fn global_feature_set(observations: Observations) -> FeatureSet {
    observations.into_iter().collect()
}
