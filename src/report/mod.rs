// SPDX-License-Identifier: PMPL-1.0-or-later

//! Report generation module

pub mod filter;
pub mod formatter;
pub mod output;

use crate::capabilities::Capabilities;
use crate::rules::RuleSet;
use anyhow::Result;
use std::path::Path;

pub use filter::{annotate_visibility, Visibility};
pub use formatter::{ReportFormatter, Verbosity};
pub use output::{ReportOutputFormat, ResultDocument, SampleInfo};

/// Build the result document for one analysis run
pub fn build_document(
    ruleset: &RuleSet,
    capabilities: &Capabilities,
    sample: Option<SampleInfo>,
) -> ResultDocument {
    ResultDocument::new(ruleset, capabilities, sample)
}

/// Save a rendered report to file
pub fn save_report<P: AsRef<Path>>(
    doc: &ResultDocument,
    format: ReportOutputFormat,
    verbosity: Verbosity,
    path: P,
) -> Result<()> {
    let path = path.as_ref();
    match format {
        ReportOutputFormat::Text => ReportFormatter::new(verbosity).save(doc, path),
        other => {
            std::fs::write(path, other.serialize(doc, verbosity)?)?;
            Ok(())
        }
    }
}

/// Print a report to stdout
pub fn print_report(doc: &ResultDocument, format: ReportOutputFormat, verbosity: Verbosity) -> Result<()> {
    match format {
        ReportOutputFormat::Text => ReportFormatter::new(verbosity).print(doc),
        other => println!("{}", other.serialize(doc, verbosity)?),
    }
    Ok(())
}
