// SPDX-License-Identifier: PMPL-1.0-or-later

//! Frozen feature documents
//!
//! A JSON snapshot of everything an extractor produced, so analysis can be
//! repeated without the binary or the disassembler that read it. The
//! `flavor` tag selects which layout the document must carry.

use crate::error::{Error, Result};
use crate::extractors::{
    BasicBlockHandle, CallHandle, DynamicFeatureExtractor, FeatureExtractor, FunctionHandle,
    InstructionHandle, Observations, ProcessHandle, StaticFeatureExtractor, ThreadHandle,
};
use crate::features::Feature;
use crate::types::{Address, CallAddress, Flavor, ProcessAddress, ThreadAddress};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::debug;

pub const FROZEN_VERSION: u32 = 1;

/// One observation. A missing address means the enclosing scope's own address
/// (or no address, at global and file level).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrozenFeature {
    pub feature: Feature,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrozenInstruction {
    pub address: Address,
    #[serde(default)]
    pub features: Vec<FrozenFeature>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrozenBasicBlock {
    pub address: Address,
    #[serde(default)]
    pub features: Vec<FrozenFeature>,
    #[serde(default)]
    pub instructions: Vec<FrozenInstruction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrozenFunction {
    pub address: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub library: bool,
    #[serde(default)]
    pub features: Vec<FrozenFeature>,
    #[serde(default)]
    pub basic_blocks: Vec<FrozenBasicBlock>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrozenCall {
    pub id: u64,
    #[serde(default)]
    pub features: Vec<FrozenFeature>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrozenThread {
    pub tid: u64,
    #[serde(default)]
    pub features: Vec<FrozenFeature>,
    #[serde(default)]
    pub calls: Vec<FrozenCall>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrozenProcess {
    pub ppid: u64,
    pub pid: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub features: Vec<FrozenFeature>,
    #[serde(default)]
    pub threads: Vec<FrozenThread>,
}

impl FrozenProcess {
    fn address(&self) -> ProcessAddress {
        ProcessAddress {
            ppid: self.ppid,
            pid: self.pid,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrozenFeatures {
    pub version: u32,
    /// `static` or `dynamic`
    pub flavor: String,
    #[serde(default = "no_address")]
    pub base_address: Address,
    #[serde(default)]
    pub global: Vec<FrozenFeature>,
    #[serde(default)]
    pub file: Vec<FrozenFeature>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub functions: Vec<FrozenFunction>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub processes: Vec<FrozenProcess>,
}

fn no_address() -> Address {
    Address::NoAddress
}

impl FrozenFeatures {
    pub fn from_json(text: &str) -> Result<Self> {
        let doc: FrozenFeatures = serde_json::from_str(text)?;
        doc.flavor()?;
        Ok(doc)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// The document's flavor, checked against the layout it carries
    pub fn flavor(&self) -> Result<Flavor> {
        if self.version != FROZEN_VERSION {
            return Err(Error::ExtractorKind(format!(
                "unsupported frozen feature document version {}",
                self.version
            )));
        }
        match self.flavor.as_str() {
            "static" if self.processes.is_empty() => Ok(Flavor::Static),
            "dynamic" if self.functions.is_empty() => Ok(Flavor::Dynamic),
            "static" | "dynamic" => Err(Error::ExtractorKind(format!(
                "{} document carries both functions and processes",
                self.flavor
            ))),
            other => Err(Error::ExtractorKind(format!("unknown flavor '{}'", other))),
        }
    }

    /// Snapshot everything `extractor` produces
    pub fn freeze(extractor: &FeatureExtractor) -> Self {
        let mut doc = FrozenFeatures {
            version: FROZEN_VERSION,
            flavor: extractor.flavor().to_string(),
            base_address: extractor.base_address(),
            global: freeze_all(extractor.extract_global_features()),
            file: freeze_all(extractor.extract_file_features()),
            functions: Vec::new(),
            processes: Vec::new(),
        };

        match extractor {
            FeatureExtractor::Static(e) => {
                for f in e.get_functions() {
                    let basic_blocks = e
                        .get_basic_blocks(&f)
                        .iter()
                        .map(|bb| FrozenBasicBlock {
                            address: bb.address,
                            features: freeze_all(e.extract_basic_block_features(&f, bb)),
                            instructions: e
                                .get_instructions(&f, bb)
                                .iter()
                                .map(|insn| FrozenInstruction {
                                    address: insn.address,
                                    features: freeze_all(e.extract_insn_features(&f, bb, insn)),
                                })
                                .collect(),
                        })
                        .collect();
                    doc.functions.push(FrozenFunction {
                        address: f.address,
                        name: e.get_function_name(&f),
                        library: e.is_library_function(&f),
                        features: freeze_all(e.extract_function_features(&f)),
                        basic_blocks,
                    });
                }
            }
            FeatureExtractor::Dynamic(e) => {
                for p in e.get_processes() {
                    let threads = e
                        .get_threads(&p)
                        .iter()
                        .map(|t| FrozenThread {
                            tid: t.address.tid,
                            features: freeze_all(e.extract_thread_features(&p, t)),
                            calls: e
                                .get_calls(&p, t)
                                .iter()
                                .map(|c| FrozenCall {
                                    id: c.address.id,
                                    features: freeze_all(e.extract_call_features(&p, t, c)),
                                })
                                .collect(),
                        })
                        .collect();
                    doc.processes.push(FrozenProcess {
                        ppid: p.address.ppid,
                        pid: p.address.pid,
                        name: e.get_process_name(&p),
                        features: freeze_all(e.extract_process_features(&p)),
                        threads,
                    });
                }
            }
        }
        doc
    }
}

fn freeze_all(observations: Observations) -> Vec<FrozenFeature> {
    observations
        .into_iter()
        .map(|(feature, address)| FrozenFeature {
            feature,
            address: (!address.is_none()).then_some(address),
        })
        .collect()
}

fn thaw(features: &[FrozenFeature], default: Address) -> Observations {
    features
        .iter()
        .map(|f| (f.feature.clone(), f.address.unwrap_or(default)))
        .collect()
}

/// Serves a frozen document through the extractor traits
#[derive(Debug, Clone)]
pub struct FrozenExtractor {
    doc: FrozenFeatures,
}

impl FrozenExtractor {
    /// Parse a document and wrap it in the extractor kind its flavor names
    pub fn from_json(text: &str) -> Result<FeatureExtractor> {
        Self::from_document(FrozenFeatures::from_json(text)?)
    }

    pub fn from_document(doc: FrozenFeatures) -> Result<FeatureExtractor> {
        let flavor = doc.flavor()?;
        debug!(
            "frozen {} document: {} functions, {} processes",
            flavor,
            doc.functions.len(),
            doc.processes.len()
        );
        let extractor = FrozenExtractor { doc };
        Ok(match flavor {
            Flavor::Static => FeatureExtractor::Static(Box::new(extractor)),
            Flavor::Dynamic => FeatureExtractor::Dynamic(Box::new(extractor)),
        })
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<FeatureExtractor> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_json(&text)
    }

    fn function(&self, handle: &FunctionHandle) -> Option<&FrozenFunction> {
        self.doc.functions.get(handle.inner)
    }

    fn block(&self, f: &FunctionHandle, bb: &BasicBlockHandle) -> Option<&FrozenBasicBlock> {
        self.function(f)?.basic_blocks.get(bb.inner)
    }

    fn process(&self, handle: &ProcessHandle) -> Option<&FrozenProcess> {
        self.doc.processes.get(handle.inner)
    }

    fn thread(&self, p: &ProcessHandle, t: &ThreadHandle) -> Option<&FrozenThread> {
        self.process(p)?.threads.get(t.inner)
    }
}

impl StaticFeatureExtractor for FrozenExtractor {
    fn base_address(&self) -> Address {
        self.doc.base_address
    }

    fn extract_global_features(&self) -> Observations {
        thaw(&self.doc.global, Address::NoAddress)
    }

    fn extract_file_features(&self) -> Observations {
        thaw(&self.doc.file, Address::NoAddress)
    }

    fn get_functions(&self) -> Vec<FunctionHandle> {
        self.doc
            .functions
            .iter()
            .enumerate()
            .map(|(inner, f)| FunctionHandle {
                address: f.address,
                inner,
            })
            .collect()
    }

    fn is_library_function(&self, function: &FunctionHandle) -> bool {
        self.function(function).is_some_and(|f| f.library)
    }

    fn get_function_name(&self, function: &FunctionHandle) -> Option<String> {
        self.function(function).and_then(|f| f.name.clone())
    }

    fn extract_function_features(&self, function: &FunctionHandle) -> Observations {
        self.function(function)
            .map(|f| thaw(&f.features, f.address))
            .unwrap_or_default()
    }

    fn get_basic_blocks(&self, function: &FunctionHandle) -> Vec<BasicBlockHandle> {
        self.function(function)
            .map(|f| {
                f.basic_blocks
                    .iter()
                    .enumerate()
                    .map(|(inner, bb)| BasicBlockHandle {
                        address: bb.address,
                        inner,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn extract_basic_block_features(
        &self,
        function: &FunctionHandle,
        block: &BasicBlockHandle,
    ) -> Observations {
        self.block(function, block)
            .map(|bb| thaw(&bb.features, bb.address))
            .unwrap_or_default()
    }

    fn get_instructions(
        &self,
        function: &FunctionHandle,
        block: &BasicBlockHandle,
    ) -> Vec<InstructionHandle> {
        self.block(function, block)
            .map(|bb| {
                bb.instructions
                    .iter()
                    .enumerate()
                    .map(|(inner, insn)| InstructionHandle {
                        address: insn.address,
                        inner,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn extract_insn_features(
        &self,
        function: &FunctionHandle,
        block: &BasicBlockHandle,
        insn: &InstructionHandle,
    ) -> Observations {
        self.block(function, block)
            .and_then(|bb| bb.instructions.get(insn.inner))
            .map(|i| thaw(&i.features, i.address))
            .unwrap_or_default()
    }
}

impl DynamicFeatureExtractor for FrozenExtractor {
    fn base_address(&self) -> Address {
        self.doc.base_address
    }

    fn extract_global_features(&self) -> Observations {
        thaw(&self.doc.global, Address::NoAddress)
    }

    fn extract_file_features(&self) -> Observations {
        thaw(&self.doc.file, Address::NoAddress)
    }

    fn get_processes(&self) -> Vec<ProcessHandle> {
        self.doc
            .processes
            .iter()
            .enumerate()
            .map(|(inner, p)| ProcessHandle {
                address: p.address(),
                inner,
            })
            .collect()
    }

    fn get_process_name(&self, process: &ProcessHandle) -> Option<String> {
        self.process(process).and_then(|p| p.name.clone())
    }

    fn extract_process_features(&self, process: &ProcessHandle) -> Observations {
        self.process(process)
            .map(|p| thaw(&p.features, Address::Process(p.address())))
            .unwrap_or_default()
    }

    fn get_threads(&self, process: &ProcessHandle) -> Vec<ThreadHandle> {
        self.process(process)
            .map(|p| {
                p.threads
                    .iter()
                    .enumerate()
                    .map(|(inner, t)| ThreadHandle {
                        address: ThreadAddress {
                            process: p.address(),
                            tid: t.tid,
                        },
                        inner,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn extract_thread_features(&self, process: &ProcessHandle, thread: &ThreadHandle) -> Observations {
        self.thread(process, thread)
            .map(|t| thaw(&t.features, Address::Thread(thread.address)))
            .unwrap_or_default()
    }

    fn get_calls(&self, process: &ProcessHandle, thread: &ThreadHandle) -> Vec<CallHandle> {
        self.thread(process, thread)
            .map(|t| {
                t.calls
                    .iter()
                    .enumerate()
                    .map(|(inner, c)| CallHandle {
                        address: CallAddress {
                            thread: thread.address,
                            id: c.id,
                        },
                        inner,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn extract_call_features(
        &self,
        process: &ProcessHandle,
        thread: &ThreadHandle,
        call: &CallHandle,
    ) -> Observations {
        self.thread(process, thread)
            .and_then(|t| t.calls.get(call.inner))
            .map(|c| thaw(&c.features, Address::Call(call.address)))
            .unwrap_or_default()
    }
}
