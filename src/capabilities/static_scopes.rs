// SPDX-License-Identifier: PMPL-1.0-or-later

//! Static analysis: instruction → basic block → function → file

use super::{
    collect_scope, find_file_capabilities, global_feature_set, run_passes, timestamp,
    AnalysisMeta, BasicBlockLayout, Capabilities, CaptureOptions, FeatureCounts, FunctionLayout,
    Layout, LibraryFunction, ScopeFeatureCount,
};
use crate::engine::{merge_results, MatchResults};
use crate::error::Result;
use crate::extractors::{
    BasicBlockHandle, FunctionHandle, InstructionHandle, StaticFeatureExtractor,
};
use crate::features::{Feature, FeatureSet};
use crate::rules::RuleSet;
use crate::types::{Flavor, Scope};
use std::collections::BTreeMap;
use tracing::debug;

/// Everything found within one function
struct FunctionCapabilities {
    function: FunctionHandle,
    function_matches: MatchResults,
    basic_block_matches: MatchResults,
    instruction_matches: MatchResults,
    feature_count: usize,
    matched_basic_blocks: Vec<BasicBlockLayout>,
}

impl FunctionCapabilities {
    fn is_empty(&self) -> bool {
        self.function_matches.is_empty()
            && self.basic_block_matches.is_empty()
            && self.instruction_matches.is_empty()
    }
}

fn find_instruction_capabilities(
    ruleset: &RuleSet,
    extractor: &dyn StaticFeatureExtractor,
    global: &FeatureSet,
    function: &FunctionHandle,
    block: &BasicBlockHandle,
    insn: &InstructionHandle,
) -> (FeatureSet, MatchResults) {
    let mut features = global.clone();
    features.insert_all(extractor.extract_insn_features(function, block, insn));
    let matches = ruleset.match_scope(Scope::Instruction, &mut features, insn.address);
    (features, matches)
}

/// Returns the block's features (instruction features and matches folded
/// in), the block's matches, and the instruction matches
fn find_basic_block_capabilities(
    ruleset: &RuleSet,
    extractor: &dyn StaticFeatureExtractor,
    global: &FeatureSet,
    function: &FunctionHandle,
    block: &BasicBlockHandle,
) -> (FeatureSet, MatchResults, MatchResults) {
    let mut features = global.clone();
    features.insert_all(extractor.extract_basic_block_features(function, block));

    let mut instruction_matches = MatchResults::new();
    for insn in extractor.get_instructions(function, block) {
        let (insn_features, matches) =
            find_instruction_capabilities(ruleset, extractor, global, function, block, &insn);
        features.merge(&insn_features);
        merge_results(&mut instruction_matches, matches);
    }

    let matches = ruleset.match_scope(Scope::BasicBlock, &mut features, block.address);
    (features, matches, instruction_matches)
}

fn find_code_capabilities(
    ruleset: &RuleSet,
    extractor: &dyn StaticFeatureExtractor,
    global: &FeatureSet,
    function: &FunctionHandle,
) -> FunctionCapabilities {
    let mut features = global.clone();
    features.insert_all(extractor.extract_function_features(function));

    let mut basic_block_matches = MatchResults::new();
    let mut instruction_matches = MatchResults::new();
    let mut matched_basic_blocks = Vec::new();

    for block in extractor.get_basic_blocks(function) {
        let (block_features, bb_matches, insn_matches) =
            find_basic_block_capabilities(ruleset, extractor, global, function, &block);
        features.merge(&block_features);
        features.insert(Feature::BasicBlock, block.address);

        if !bb_matches.is_empty() || !insn_matches.is_empty() {
            matched_basic_blocks.push(BasicBlockLayout {
                address: block.address,
            });
        }
        merge_results(&mut basic_block_matches, bb_matches);
        merge_results(&mut instruction_matches, insn_matches);
    }

    let function_matches = ruleset.match_scope(Scope::Function, &mut features, function.address);
    debug!(
        "analyzed function {} and extracted {} features, {} rules matched",
        function.address,
        features.len(),
        function_matches.len()
    );

    FunctionCapabilities {
        function: *function,
        function_matches,
        basic_block_matches,
        instruction_matches,
        feature_count: features.len(),
        matched_basic_blocks,
    }
}

/// Find capabilities in a disassembled binary
pub fn find_static_capabilities(
    ruleset: &RuleSet,
    extractor: &dyn StaticFeatureExtractor,
    options: &CaptureOptions,
) -> Result<Capabilities> {
    let global = global_feature_set(extractor.extract_global_features());

    let mut library_functions = Vec::new();
    let mut functions = Vec::new();
    for function in extractor.get_functions() {
        if extractor.is_library_function(&function) {
            let name = extractor.get_function_name(&function);
            debug!(
                "skipping library function {} ({})",
                function.address,
                name.as_deref().unwrap_or("unnamed")
            );
            library_functions.push(LibraryFunction {
                address: function.address,
                name,
            });
        } else {
            functions.push(function);
        }
    }
    debug!(
        "analyzing {} functions, {} library functions skipped",
        functions.len(),
        library_functions.len()
    );

    let passes = run_passes(&functions, options, |function| {
        find_code_capabilities(ruleset, extractor, &global, function)
    })?;

    let mut matches = MatchResults::new();
    let mut match_counts = BTreeMap::new();
    let mut lower_features = FeatureSet::new();
    let mut scope_counts = Vec::with_capacity(passes.len());
    let mut layout = Vec::new();

    for pass in passes {
        scope_counts.push(ScopeFeatureCount {
            address: pass.function.address,
            count: pass.feature_count,
        });
        if !pass.is_empty() {
            layout.push(FunctionLayout {
                address: pass.function.address,
                matched_basic_blocks: pass.matched_basic_blocks,
            });
        }

        // matches at every level become features of the file scope
        for level in [
            &pass.instruction_matches,
            &pass.basic_block_matches,
            &pass.function_matches,
        ] {
            ruleset.index_matches(&mut lower_features, level);
        }
        collect_scope(&mut matches, &mut match_counts, Scope::Instruction, pass.instruction_matches);
        collect_scope(&mut matches, &mut match_counts, Scope::BasicBlock, pass.basic_block_matches);
        collect_scope(&mut matches, &mut match_counts, Scope::Function, pass.function_matches);
    }

    let (file_matches, file_count) = find_file_capabilities(
        ruleset,
        Flavor::Static,
        extractor.extract_file_features(),
        extractor.extract_global_features(),
        &lower_features,
    );
    collect_scope(&mut matches, &mut match_counts, Scope::File, file_matches);

    Ok(Capabilities {
        matches,
        meta: AnalysisMeta {
            flavor: Flavor::Static,
            analyzed_at: timestamp(),
            base_address: extractor.base_address(),
            feature_counts: FeatureCounts {
                file: file_count,
                scopes: scope_counts,
            },
            match_counts,
            library_functions,
            layout: Layout::Static { functions: layout },
        },
    })
}
