// SPDX-License-Identifier: PMPL-1.0-or-later

//! Text rendering of result documents

use crate::engine::MatchResult;
use crate::report::output::{ResultDocument, RuleResult};
use crate::types::{Address, Flavor};
use anyhow::{Context, Result};
use colored::*;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// One line per capability; building-block rules hidden
    #[default]
    Default,
    /// Every matched rule with its namespace, scope and addresses
    Verbose,
    /// Verbose plus the match tree at each address
    VeryVerbose,
}

impl Verbosity {
    pub fn from_count(count: u8) -> Self {
        match count {
            0 => Verbosity::Default,
            1 => Verbosity::Verbose,
            _ => Verbosity::VeryVerbose,
        }
    }
}

pub struct ReportFormatter {
    verbosity: Verbosity,
}

impl ReportFormatter {
    pub fn new(verbosity: Verbosity) -> Self {
        Self { verbosity }
    }

    pub fn print(&self, doc: &ResultDocument) {
        print!("{}", self.render(doc));
    }

    pub fn save<P: AsRef<Path>>(&self, doc: &ResultDocument, path: P) -> Result<()> {
        let path = path.as_ref();
        fs::write(path, self.render(doc))
            .with_context(|| format!("writing report to {}", path.display()))
    }

    pub fn render(&self, doc: &ResultDocument) -> String {
        let mut out = String::new();
        self.render_header(doc, &mut out);

        let visible: Vec<&RuleResult> = doc.visible_rules(self.verbosity).collect();
        if visible.is_empty() {
            let _ = writeln!(out, "{}", "no capabilities found".yellow());
            return out;
        }

        match self.verbosity {
            Verbosity::Default => self.render_table(&visible, &mut out),
            Verbosity::Verbose | Verbosity::VeryVerbose => {
                let flavor = doc.meta.analysis.flavor;
                for rule in visible {
                    self.render_rule(rule, flavor, &mut out);
                }
            }
        }
        out
    }

    fn render_header(&self, doc: &ResultDocument, out: &mut String) {
        let _ = writeln!(out, "{}", "=== CAPSCAN CAPABILITY REPORT ===".bold().cyan());
        if let Some(sample) = &doc.meta.sample {
            let _ = writeln!(out, "  path       {}", sample.path);
            let _ = writeln!(out, "  sha256     {}", sample.sha256);
        }
        let analysis = &doc.meta.analysis;
        let _ = writeln!(out, "  flavor     {}", analysis.flavor);
        if !analysis.base_address.is_none() {
            let _ = writeln!(out, "  base       {}", analysis.base_address);
        }
        if self.verbosity != Verbosity::Default {
            let _ = writeln!(out, "  analyzed   {}", analysis.analyzed_at);
            let _ = writeln!(
                out,
                "  features   {} file, {} scopes analyzed",
                analysis.feature_counts.file,
                analysis.feature_counts.scopes.len()
            );
            if !analysis.library_functions.is_empty() {
                let _ = writeln!(
                    out,
                    "  library    {} functions skipped",
                    analysis.library_functions.len()
                );
            }
        }
        out.push('\n');
    }

    fn render_table(&self, rules: &[&RuleResult], out: &mut String) {
        let width = rules
            .iter()
            .map(|r| capability_label(r).len())
            .max()
            .unwrap_or(0)
            .max("CAPABILITY".len());
        let _ = writeln!(
            out,
            "{}  {}",
            format!("{:<width$}", "CAPABILITY", width = width).bold(),
            "NAMESPACE".bold()
        );
        for rule in rules {
            let _ = writeln!(
                out,
                "{:<width$}  {}",
                capability_label(rule),
                rule.meta.namespace.as_deref().unwrap_or("").dimmed(),
                width = width
            );
        }
    }

    fn render_rule(&self, rule: &RuleResult, flavor: Flavor, out: &mut String) {
        let _ = writeln!(out, "{}", rule.meta.name.bold().yellow());
        if let Some(namespace) = &rule.meta.namespace {
            let _ = writeln!(out, "  namespace  {}", namespace);
        }
        if let Some(description) = &rule.meta.description {
            let _ = writeln!(out, "  description {}", description);
        }
        let scope = rule
            .meta
            .scopes
            .for_flavor(flavor)
            .map_or("unsupported", |s| s.as_str());
        let _ = writeln!(out, "  scope      {}", scope);

        match self.verbosity {
            Verbosity::VeryVerbose => {
                for (address, result) in &rule.matches {
                    let _ = writeln!(out, "  {} @ {}", scope, format_address(address));
                    render_tree(result, 2, out);
                }
            }
            _ => {
                let addresses: Vec<String> = rule
                    .matches
                    .iter()
                    .filter(|(address, _)| !address.is_none())
                    .map(|(address, _)| format_address(address))
                    .collect();
                if !addresses.is_empty() {
                    let _ = writeln!(out, "  matches    {}", addresses.join(", "));
                }
            }
        }
        out.push('\n');
    }
}

fn capability_label(rule: &RuleResult) -> String {
    match rule.matches.len() {
        0 | 1 => rule.meta.name.clone(),
        n => format!("{} ({} matches)", rule.meta.name, n),
    }
}

fn format_address(address: &Address) -> String {
    match address {
        Address::NoAddress => "file".to_string(),
        other => other.to_string(),
    }
}

/// Successful nodes only; a failed branch of an `or` is noise
fn render_tree(node: &MatchResult, depth: usize, out: &mut String) {
    if !node.success {
        return;
    }
    let indent = "  ".repeat(depth);
    let is_leaf = node.children.is_empty();
    let mut line = format!("{}{}", indent, node.node);
    if !is_leaf && !node.node.ends_with(':') {
        line.push(':');
    }
    if is_leaf && !node.locations.is_empty() {
        let shown: Vec<String> = node.locations.iter().take(4).map(format_address).collect();
        let more = node.locations.len().saturating_sub(shown.len());
        line.push_str(&format!(" @ {}", shown.join(", ")));
        if more > 0 {
            line.push_str(&format!(" (+{} more)", more));
        }
    }
    let _ = writeln!(out, "{}", line);

    // `not` succeeds because its child failed; show the child anyway
    if node.node == "not" {
        for child in &node.children {
            let _ = writeln!(out, "{}  {}", indent, child.node);
        }
        return;
    }
    for child in &node.children {
        render_tree(child, depth + 1, out);
    }
}
