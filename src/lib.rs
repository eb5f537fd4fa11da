// SPDX-License-Identifier: PMPL-1.0-or-later

//! capscan: rule-driven capability detection.
//!
//! Identifies behavioral capabilities of a binary or of a sandbox execution
//! trace by matching declarative rules against features an extractor
//! produced. Rules reference each other by name or namespace, so small
//! building blocks ("create TCP socket") combine into capabilities
//! ("act as TCP client").
//!
//! PIPELINE:
//! 1. **Rules**: YAML documents parsed into logic trees, collected into a
//!    dependency-ordered [`rules::RuleSet`].
//! 2. **Extractors**: a static (function → basic block → instruction) or
//!    dynamic (process → thread → call) view of the input.
//! 3. **Capabilities**: scopes evaluated bottom-up; every match becomes a
//!    feature of the enclosing scope.
//! 4. **Report**: matches classified for display and rendered as text,
//!    JSON or YAML.

pub mod capabilities;
pub mod config;
pub mod engine;
pub mod error;
pub mod extractors;
pub mod features;
pub mod report;
pub mod rules;
pub mod types;

pub use capabilities::{find_capabilities, Capabilities, CaptureOptions};
pub use error::{Error, Result, RuleError};
pub use extractors::{FeatureExtractor, FrozenExtractor};
pub use features::{Feature, FeatureSet};
pub use rules::{Rule, RuleSet};
pub use types::{Address, Flavor, Scope, Scopes};
