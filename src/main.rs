// SPDX-License-Identifier: PMPL-1.0-or-later

//! capscan: identify capabilities in extracted binary and trace features

use anyhow::{bail, Context, Result};
use capscan::config::AnalysisConfig;
use capscan::report::{self, ReportOutputFormat, SampleInfo, Verbosity};
use capscan::rules::{load_rules_from_paths, RuleSet};
use capscan::{find_capabilities, FrozenExtractor, Scope};
use clap::{ArgAction, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "capscan")]
#[command(version)]
#[command(about = "Rule-driven capability detection over extracted binary and trace features")]
#[command(long_about = None)]
struct Cli {
    /// Debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Match rules against a frozen feature document
    Scan {
        /// Frozen features (JSON) of the binary or trace to analyze
        #[arg(value_name = "FEATURES")]
        input: PathBuf,

        /// Rule files or directories
        #[arg(short, long = "rules", value_name = "PATH")]
        rules: Vec<PathBuf>,

        /// Only rules whose name or namespace contains TAG, plus their dependencies
        #[arg(short, long)]
        tag: Option<String>,

        /// Drop rules filed under this namespace (repeatable)
        #[arg(long = "exclude-namespace", value_name = "NAMESPACE")]
        exclude_namespaces: Vec<String>,

        /// Emit JSON (same as --format json)
        #[arg(short, long)]
        json: bool,

        /// Output format
        #[arg(short, long, value_enum)]
        format: Option<ReportOutputFormat>,

        /// Repeat for more detail: -v lists every matched rule, -vv shows match trees
        #[arg(short, long, action = ArgAction::Count)]
        verbose: u8,

        /// Write the report here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// YAML configuration; flags override its values
        #[arg(long)]
        config: Option<PathBuf>,

        /// Abandon analysis after this many seconds
        #[arg(long, value_name = "SECONDS")]
        timeout: Option<u64>,

        /// Analyze functions or processes one at a time
        #[arg(long)]
        no_parallel: bool,
    },

    /// Load rules and summarize them per scope
    Rules {
        /// Rule files or directories
        #[arg(value_name = "PATH", required = true)]
        paths: Vec<PathBuf>,

        /// List every rule, including synthesized subscope rules
        #[arg(short, long)]
        list: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let env_filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.debug {
        EnvFilter::new("capscan=debug")
    } else {
        EnvFilter::new("capscan=warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
    debug!("Logging initialized (debug={})", cli.debug);

    match cli.command {
        Commands::Scan {
            input,
            rules,
            tag,
            exclude_namespaces,
            json,
            format,
            verbose,
            output,
            config,
            timeout,
            no_parallel,
        } => {
            let mut settings = match &config {
                Some(path) => AnalysisConfig::load(path)
                    .with_context(|| format!("loading configuration {}", path.display()))?,
                None => AnalysisConfig::default(),
            };
            if !rules.is_empty() {
                settings.rules = rules;
            }
            if tag.is_some() {
                settings.tag = tag;
            }
            settings.exclude_namespaces.extend(exclude_namespaces);
            if json {
                settings.format = ReportOutputFormat::Json;
            } else if let Some(format) = format {
                settings.format = format;
            }
            if verbose > 0 {
                settings.verbosity = verbose;
            }
            if timeout.is_some() {
                settings.timeout_secs = timeout;
            }
            if no_parallel {
                settings.parallel = false;
            }
            scan(&input, &settings, output)?;
        }

        Commands::Rules { paths, list } => {
            let ruleset = load_rules_from_paths(&paths).context("loading rules")?;
            println!("{} rules loaded", ruleset.len());
            for scope in Scope::all() {
                println!("  {:<12} {}", scope.as_str(), ruleset.rules_for_scope(scope).len());
            }
            if list {
                println!();
                for rule in ruleset.iter() {
                    println!(
                        "  {} [{}] {}",
                        rule.name,
                        rule.scopes,
                        rule.namespace.as_deref().unwrap_or("")
                    );
                }
            }
        }
    }

    Ok(())
}

fn scan(input: &Path, settings: &AnalysisConfig, output: Option<PathBuf>) -> Result<()> {
    if settings.rules.is_empty() {
        bail!("no rules given: pass --rules or list them in --config");
    }

    let mut ruleset: RuleSet = load_rules_from_paths(&settings.rules).context("loading rules")?;
    if let Some(tag) = &settings.tag {
        ruleset = ruleset.filter_rules_by_meta(tag)?;
        info!("{} rules selected by tag '{}'", ruleset.len(), tag);
    }
    if !settings.exclude_namespaces.is_empty() {
        let prefixes: Vec<&str> = settings.exclude_namespaces.iter().map(String::as_str).collect();
        ruleset = ruleset.without_namespaces(&prefixes)?;
    }

    let contents = std::fs::read(input)
        .with_context(|| format!("reading features from {}", input.display()))?;
    let text = String::from_utf8(contents.clone()).context("feature document is not UTF-8")?;
    let extractor = FrozenExtractor::from_json(&text)
        .with_context(|| format!("parsing features from {}", input.display()))?;

    let cancel = Arc::new(AtomicBool::new(false));
    if let Some(secs) = settings.timeout_secs {
        let flag = Arc::clone(&cancel);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_secs(secs));
            flag.store(true, Ordering::Relaxed);
        });
    }
    let options = settings.capture_options(Some(cancel));

    let capabilities = find_capabilities(&ruleset, &extractor, &options)?;
    let doc = report::build_document(
        &ruleset,
        &capabilities,
        Some(SampleInfo::new(input, &contents)),
    );

    let verbosity: Verbosity = settings.verbosity();
    match output {
        Some(path) => {
            report::save_report(&doc, settings.format, verbosity, &path)?;
            println!("Report saved to: {}", path.display());
        }
        None => report::print_report(&doc, settings.format, verbosity)?,
    }
    Ok(())
}
