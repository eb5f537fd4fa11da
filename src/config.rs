// SPDX-License-Identifier: PMPL-1.0-or-later

//! Analysis configuration file
//!
//! ```yaml
//! rules:
//!   - rules/
//! tag: communication
//! exclude_namespaces:
//!   - internal/limitation
//! parallel: true
//! timeout_secs: 600
//! format: json
//! verbosity: 1
//! ```

use crate::capabilities::CaptureOptions;
use crate::error::{Error, Result};
use crate::report::{ReportOutputFormat, Verbosity};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Rule files or directories
    pub rules: Vec<PathBuf>,
    /// Only rules whose name or namespace contains this (plus their dependencies)
    pub tag: Option<String>,
    pub exclude_namespaces: Vec<String>,
    pub parallel: bool,
    /// Cancel analysis after this many seconds
    pub timeout_secs: Option<u64>,
    pub format: ReportOutputFormat,
    /// 0 default, 1 verbose, 2 or more very verbose
    pub verbosity: u8,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            tag: None,
            exclude_namespaces: Vec::new(),
            parallel: true,
            timeout_secs: None,
            format: ReportOutputFormat::Text,
            verbosity: 0,
        }
    }
}

impl AnalysisConfig {
    pub fn from_yaml(text: &str) -> Result<Self> {
        parse(text, None)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        parse(&text, Some(path))
    }

    pub fn verbosity(&self) -> Verbosity {
        Verbosity::from_count(self.verbosity)
    }

    /// Orchestrator options; the cancellation flag is only attached when a timeout is set
    pub fn capture_options(&self, cancel: Option<Arc<AtomicBool>>) -> CaptureOptions {
        let mut options = CaptureOptions::default();
        if !self.parallel {
            options = options.sequential();
        }
        match cancel {
            Some(flag) if self.timeout_secs.is_some() => options.with_cancel_flag(flag),
            _ => options,
        }
    }
}

fn parse(text: &str, path: Option<&Path>) -> Result<AnalysisConfig> {
    serde_yaml::from_str(text).map_err(|e| Error::Config {
        path: path.map(Path::to_path_buf),
        message: e.to_string(),
    })
}
