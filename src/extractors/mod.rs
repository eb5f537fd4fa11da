// SPDX-License-Identifier: PMPL-1.0-or-later

//! Feature extractor interfaces
//!
//! The engine never computes features itself. A static extractor exposes a
//! binary as functions → basic blocks → instructions; a dynamic extractor
//! exposes a trace as processes → threads → calls. Both also yield
//! global features (OS, architecture, format) and file features.

pub mod frozen;

use crate::features::Feature;
use crate::types::{Address, CallAddress, Flavor, ProcessAddress, ThreadAddress};

pub use frozen::{FrozenExtractor, FrozenFeatures};

/// Features observed within one scope instance, each with its address
pub type Observations = Vec<(Feature, Address)>;

/// A function within the analyzed binary. `inner` is an extractor-defined slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionHandle {
    pub address: Address,
    pub inner: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BasicBlockHandle {
    pub address: Address,
    pub inner: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstructionHandle {
    pub address: Address,
    pub inner: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessHandle {
    pub address: ProcessAddress,
    pub inner: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadHandle {
    pub address: ThreadAddress,
    pub inner: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallHandle {
    pub address: CallAddress,
    pub inner: usize,
}

/// Features of a disassembled binary
pub trait StaticFeatureExtractor: Send + Sync {
    fn base_address(&self) -> Address;

    /// OS, architecture and format; these hold at every scope
    fn extract_global_features(&self) -> Observations;

    fn extract_file_features(&self) -> Observations;

    fn get_functions(&self) -> Vec<FunctionHandle>;

    /// Library functions (statically linked runtime code) are skipped
    fn is_library_function(&self, _function: &FunctionHandle) -> bool {
        false
    }

    fn get_function_name(&self, _function: &FunctionHandle) -> Option<String> {
        None
    }

    fn extract_function_features(&self, function: &FunctionHandle) -> Observations;

    fn get_basic_blocks(&self, function: &FunctionHandle) -> Vec<BasicBlockHandle>;

    fn extract_basic_block_features(
        &self,
        function: &FunctionHandle,
        block: &BasicBlockHandle,
    ) -> Observations;

    fn get_instructions(
        &self,
        function: &FunctionHandle,
        block: &BasicBlockHandle,
    ) -> Vec<InstructionHandle>;

    fn extract_insn_features(
        &self,
        function: &FunctionHandle,
        block: &BasicBlockHandle,
        insn: &InstructionHandle,
    ) -> Observations;
}

/// Features of a sandbox execution trace
pub trait DynamicFeatureExtractor: Send + Sync {
    fn base_address(&self) -> Address {
        Address::NoAddress
    }

    fn extract_global_features(&self) -> Observations;

    fn extract_file_features(&self) -> Observations;

    fn get_processes(&self) -> Vec<ProcessHandle>;

    fn get_process_name(&self, _process: &ProcessHandle) -> Option<String> {
        None
    }

    fn extract_process_features(&self, process: &ProcessHandle) -> Observations;

    fn get_threads(&self, process: &ProcessHandle) -> Vec<ThreadHandle>;

    fn extract_thread_features(&self, process: &ProcessHandle, thread: &ThreadHandle)
        -> Observations;

    fn get_calls(&self, process: &ProcessHandle, thread: &ThreadHandle) -> Vec<CallHandle>;

    fn extract_call_features(
        &self,
        process: &ProcessHandle,
        thread: &ThreadHandle,
        call: &CallHandle,
    ) -> Observations;
}

/// The two extractor kinds the engine knows; analysis branches on this once
pub enum FeatureExtractor {
    Static(Box<dyn StaticFeatureExtractor>),
    Dynamic(Box<dyn DynamicFeatureExtractor>),
}

impl FeatureExtractor {
    pub fn flavor(&self) -> Flavor {
        match self {
            FeatureExtractor::Static(_) => Flavor::Static,
            FeatureExtractor::Dynamic(_) => Flavor::Dynamic,
        }
    }

    pub fn base_address(&self) -> Address {
        match self {
            FeatureExtractor::Static(e) => e.base_address(),
            FeatureExtractor::Dynamic(e) => e.base_address(),
        }
    }

    pub fn extract_global_features(&self) -> Observations {
        match self {
            FeatureExtractor::Static(e) => e.extract_global_features(),
            FeatureExtractor::Dynamic(e) => e.extract_global_features(),
        }
    }

    pub fn extract_file_features(&self) -> Observations {
        match self {
            FeatureExtractor::Static(e) => e.extract_file_features(),
            FeatureExtractor::Dynamic(e) => e.extract_file_features(),
        }
    }
}

impl std::fmt::Debug for FeatureExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FeatureExtractor::{:?}", self.flavor())
    }
}
