// SPDX-License-Identifier: PMPL-1.0-or-later

//! Dynamic analysis: call → thread → process → file

use super::{
    collect_scope, find_file_capabilities, global_feature_set, run_passes, timestamp,
    AnalysisMeta, CallLayout, Capabilities, CaptureOptions, FeatureCounts, Layout, ProcessLayout,
    ScopeFeatureCount, ThreadLayout,
};
use crate::engine::{merge_results, MatchResults};
use crate::error::Result;
use crate::extractors::{CallHandle, DynamicFeatureExtractor, ProcessHandle, ThreadHandle};
use crate::features::FeatureSet;
use crate::rules::RuleSet;
use crate::types::{Address, Flavor, Scope};
use std::collections::BTreeMap;
use tracing::debug;

struct ProcessCapabilities {
    process: ProcessHandle,
    process_matches: MatchResults,
    thread_matches: MatchResults,
    call_matches: MatchResults,
    feature_count: usize,
    matched_threads: Vec<ThreadLayout>,
}

impl ProcessCapabilities {
    fn is_empty(&self) -> bool {
        self.process_matches.is_empty() && self.thread_matches.is_empty() && self.call_matches.is_empty()
    }
}

fn find_call_capabilities(
    ruleset: &RuleSet,
    extractor: &dyn DynamicFeatureExtractor,
    global: &FeatureSet,
    process: &ProcessHandle,
    thread: &ThreadHandle,
    call: &CallHandle,
) -> (FeatureSet, MatchResults) {
    let mut features = global.clone();
    features.insert_all(extractor.extract_call_features(process, thread, call));
    let matches = ruleset.match_scope(Scope::Call, &mut features, Address::Call(call.address));
    (features, matches)
}

/// Returns the thread's features, its matches, the call matches, and the
/// calls at which call-scope rules matched
fn find_thread_capabilities(
    ruleset: &RuleSet,
    extractor: &dyn DynamicFeatureExtractor,
    global: &FeatureSet,
    process: &ProcessHandle,
    thread: &ThreadHandle,
) -> (FeatureSet, MatchResults, MatchResults, Vec<CallLayout>) {
    let mut features = global.clone();
    features.insert_all(extractor.extract_thread_features(process, thread));

    let mut call_matches = MatchResults::new();
    let mut matched_calls = Vec::new();
    for call in extractor.get_calls(process, thread) {
        let (call_features, matches) =
            find_call_capabilities(ruleset, extractor, global, process, thread, &call);
        features.merge(&call_features);
        if !matches.is_empty() {
            matched_calls.push(CallLayout {
                address: Address::Call(call.address),
            });
        }
        merge_results(&mut call_matches, matches);
    }

    let matches = ruleset.match_scope(Scope::Thread, &mut features, Address::Thread(thread.address));
    (features, matches, call_matches, matched_calls)
}

fn find_process_capabilities(
    ruleset: &RuleSet,
    extractor: &dyn DynamicFeatureExtractor,
    global: &FeatureSet,
    process: &ProcessHandle,
) -> ProcessCapabilities {
    let mut features = global.clone();
    features.insert_all(extractor.extract_process_features(process));

    let mut thread_matches = MatchResults::new();
    let mut call_matches = MatchResults::new();
    let mut matched_threads = Vec::new();

    for thread in extractor.get_threads(process) {
        let (thread_features, matches, calls, matched_calls) =
            find_thread_capabilities(ruleset, extractor, global, process, &thread);
        features.merge(&thread_features);
        if !matches.is_empty() || !matched_calls.is_empty() {
            matched_threads.push(ThreadLayout {
                address: Address::Thread(thread.address),
                matched_calls,
            });
        }
        merge_results(&mut thread_matches, matches);
        merge_results(&mut call_matches, calls);
    }

    let address = Address::Process(process.address);
    let process_matches = ruleset.match_scope(Scope::Process, &mut features, address);
    debug!(
        "analyzed {} and extracted {} features, {} rules matched",
        address,
        features.len(),
        process_matches.len()
    );

    ProcessCapabilities {
        process: *process,
        process_matches,
        thread_matches,
        call_matches,
        feature_count: features.len(),
        matched_threads,
    }
}

/// Find capabilities in a sandbox execution trace
pub fn find_dynamic_capabilities(
    ruleset: &RuleSet,
    extractor: &dyn DynamicFeatureExtractor,
    options: &CaptureOptions,
) -> Result<Capabilities> {
    let global = global_feature_set(extractor.extract_global_features());
    let processes = extractor.get_processes();
    debug!("analyzing {} processes", processes.len());

    let passes = run_passes(&processes, options, |process| {
        find_process_capabilities(ruleset, extractor, &global, process)
    })?;

    let mut matches = MatchResults::new();
    let mut match_counts = BTreeMap::new();
    let mut lower_features = FeatureSet::new();
    let mut scope_counts = Vec::with_capacity(passes.len());
    let mut layout = Vec::new();

    for pass in passes {
        let address = Address::Process(pass.process.address);
        scope_counts.push(ScopeFeatureCount {
            address,
            count: pass.feature_count,
        });
        if !pass.is_empty() {
            layout.push(ProcessLayout {
                address,
                name: extractor.get_process_name(&pass.process),
                matched_threads: pass.matched_threads,
            });
        }

        for level in [&pass.call_matches, &pass.thread_matches, &pass.process_matches] {
            ruleset.index_matches(&mut lower_features, level);
        }
        collect_scope(&mut matches, &mut match_counts, Scope::Call, pass.call_matches);
        collect_scope(&mut matches, &mut match_counts, Scope::Thread, pass.thread_matches);
        collect_scope(&mut matches, &mut match_counts, Scope::Process, pass.process_matches);
    }

    let (file_matches, file_count) = find_file_capabilities(
        ruleset,
        Flavor::Dynamic,
        extractor.extract_file_features(),
        extractor.extract_global_features(),
        &lower_features,
    );
    collect_scope(&mut matches, &mut match_counts, Scope::File, file_matches);

    Ok(Capabilities {
        matches,
        meta: AnalysisMeta {
            flavor: Flavor::Dynamic,
            analyzed_at: timestamp(),
            base_address: extractor.base_address(),
            feature_counts: FeatureCounts {
                file: file_count,
                scopes: scope_counts,
            },
            match_counts,
            library_functions: Vec::new(),
            layout: Layout::Dynamic { processes: layout },
        },
    })
}
