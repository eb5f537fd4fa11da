// SPDX-License-Identifier: PMPL-1.0-or-later

//! YAML rule documents
//!
//! ```yaml
//! rule:
//!   meta:
//!     name: kill thread loop
//!     namespace: host-interaction/thread/terminate
//!     scopes:
//!       static: function
//!       dynamic: process
//!   features:
//!     - and:
//!       - api: kernel32.TerminateThread
//!       - match: tight loop
//! ```
//!
//! Every logic node is a single-key mapping; feature leaves may carry a
//! `description` sibling key or an inline `= description` suffix.

use crate::engine::{Quantifier, Statement};
use crate::error::{Error, Result, RuleError};
use crate::features::Feature;
use crate::rules::{Rule, RuleMeta, RuleSet};
use crate::types::{Scope, Scopes};
use rayon::prelude::*;
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
struct RuleDocument {
    rule: RuleBody,
}

#[derive(Debug, Deserialize)]
struct RuleBody {
    meta: MetaDocument,
    features: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct MetaDocument {
    name: String,
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default)]
    authors: Vec<String>,
    #[serde(default)]
    examples: Vec<Value>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    lib: bool,
    #[serde(default)]
    scopes: Option<ScopesDocument>,
    /// Single-scope form used by older rules
    #[serde(default)]
    scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScopesDocument {
    #[serde(rename = "static", default)]
    static_scope: Option<String>,
    #[serde(rename = "dynamic", default)]
    dynamic_scope: Option<String>,
}

impl Rule {
    /// Parse one rule document
    pub fn from_yaml(text: &str) -> std::result::Result<Rule, RuleError> {
        let doc: RuleDocument = serde_yaml::from_str(text)?;
        let RuleBody { meta, features } = doc.rule;
        let name = meta.name;

        let scopes = match (&meta.scopes, &meta.scope) {
            (Some(scopes), _) => Scopes::new(
                parse_declared_scope(&name, scopes.static_scope.as_deref())?,
                parse_declared_scope(&name, scopes.dynamic_scope.as_deref())?,
            ),
            (None, Some(legacy)) => legacy_scopes(&name, legacy)?,
            (None, None) => Scopes::both(Scope::Function, Scope::Process),
        };

        let root = match features.as_slice() {
            [root] => parse_node(&name, root)?,
            other => {
                return Err(RuleError::invalid_feature(
                    &name,
                    format!("expected exactly one root node under features, found {}", other.len()),
                ))
            }
        };

        let examples = meta
            .examples
            .iter()
            .filter_map(scalar_text)
            .collect();

        let rule = Rule::new(name, scopes, root)?
            .with_namespace(meta.namespace.unwrap_or_default())
            .with_meta(RuleMeta {
                authors: meta.authors,
                examples,
                description: meta.description,
                lib: meta.lib,
                subscope_of: None,
            });
        Ok(rule)
    }
}

/// Read rules from a file or a directory tree and build a rule set
pub fn load_rules<P: AsRef<Path>>(path: P) -> Result<RuleSet> {
    load_rules_from_paths(&[path.as_ref().to_path_buf()])
}

/// Read rules from several files or directories into one rule set
pub fn load_rules_from_paths(paths: &[PathBuf]) -> Result<RuleSet> {
    let _span = tracing::info_span!("load_rules").entered();

    let mut files = Vec::new();
    for path in paths {
        files.extend(rule_files(path)?);
    }
    info!("Found {} rule files", files.len());

    // parse in parallel, collect in path order
    let parsed: Vec<Result<Rule>> = files.par_iter().map(|path| read_rule_file(path)).collect();
    let rules = parsed.into_iter().collect::<Result<Vec<_>>>()?;

    let set = RuleSet::new(rules)?;
    info!("Loaded {} rules", set.len());
    Ok(set)
}

/// Parse a single rule file
pub fn read_rule_file(path: &Path) -> Result<Rule> {
    debug!("parsing {}", path.display());
    let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    Rule::from_yaml(&text).map_err(|err| match err {
        RuleError::Yaml(yaml) => RuleError::InvalidDocument {
            path: Some(path.to_path_buf()),
            message: yaml.to_string(),
        }
        .into(),
        other => other.into(),
    })
}

fn rule_files(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_dir() {
        return Err(Error::io(
            path,
            std::io::Error::new(std::io::ErrorKind::NotFound, "no such rule file or directory"),
        ));
    }

    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(path)
        .follow_links(false)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|entry| {
            let path = entry.path();
            let hidden = entry.file_name().to_string_lossy().starts_with('.');
            let yaml = path
                .extension()
                .is_some_and(|e| e == "yml" || e == "yaml");
            path.is_file() && yaml && !hidden
        })
        .map(|entry| entry.path().to_path_buf())
        .collect();
    files.sort_by(|a, b| a.to_string_lossy().cmp(&b.to_string_lossy()));
    Ok(files)
}

fn parse_declared_scope(rule: &str, text: Option<&str>) -> std::result::Result<Option<Scope>, RuleError> {
    match text {
        None | Some("unsupported") | Some("unspecified") => Ok(None),
        Some(s) => s
            .parse()
            .map(Some)
            .map_err(|reason| RuleError::InvalidScopes {
                rule: rule.to_string(),
                reason,
            }),
    }
}

/// Older rules declare one scope; the dynamic counterpart is implied
fn legacy_scopes(rule: &str, text: &str) -> std::result::Result<Scopes, RuleError> {
    let scope: Scope = text.parse().map_err(|reason| RuleError::InvalidScopes {
        rule: rule.to_string(),
        reason,
    })?;
    Ok(match scope {
        Scope::File => Scopes::both(Scope::File, Scope::File),
        Scope::Function => Scopes::both(Scope::Function, Scope::Process),
        Scope::BasicBlock => Scopes::both(Scope::BasicBlock, Scope::Thread),
        Scope::Instruction => Scopes::both(Scope::Instruction, Scope::Call),
        dynamic => Scopes::dynamic_only(dynamic),
    })
}

fn parse_node(rule: &str, node: &Value) -> std::result::Result<Statement, RuleError> {
    let map = node
        .as_mapping()
        .ok_or_else(|| RuleError::invalid_feature(rule, format!("expected a mapping, found {:?}", node)))?;

    let description = map
        .get("description")
        .and_then(scalar_text);
    let (key, value) = single_entry(rule, map)?;

    match key {
        "and" => Ok(Statement::And(parse_children(rule, key, value)?)),
        "or" => Ok(Statement::Or(parse_children(rule, key, value)?)),
        "optional" => Ok(Statement::Optional(parse_children(rule, key, value)?)),
        "not" => {
            let mut children = parse_children(rule, key, value)?;
            let child = if children.len() == 1 {
                children.remove(0)
            } else {
                Statement::And(children)
            };
            Ok(Statement::not(child))
        }
        "match" => {
            let name = scalar_text(value)
                .ok_or_else(|| RuleError::invalid_feature(rule, "match: expects a rule name"))?;
            Ok(Statement::matches(name))
        }
        _ => {
            if let Some(count) = at_least_count(key) {
                let children = parse_children(rule, key, value)?;
                return Ok(Statement::AtLeast { count, children });
            }
            if let Ok(scope) = key.parse::<Scope>() {
                let mut children = parse_children(rule, key, value)?;
                let child = if children.len() == 1 {
                    children.remove(0)
                } else {
                    Statement::And(children)
                };
                return Ok(Statement::subscope(scope, child));
            }
            if let Some(target) = key.strip_prefix("count(").and_then(|k| k.strip_suffix(')')) {
                return parse_count(rule, target, value);
            }

            // unquoted digit runs like `0090` arrive as YAML integers
            if key == "bytes" && !value.is_string() {
                return Err(RuleError::invalid_feature(
                    rule,
                    "bytes: hex pattern must be a string (quote it)",
                ));
            }
            let text = scalar_text(value).ok_or_else(|| {
                RuleError::invalid_feature(rule, format!("{}: expects a scalar value", key))
            })?;
            let (text, inline) = split_description(key, &text);
            let leaf = parse_feature(rule, key, &text)?;
            Ok(match description.or(inline) {
                Some(desc) => leaf.described(desc),
                None => leaf,
            })
        }
    }
}

fn single_entry<'a>(rule: &str, map: &'a Mapping) -> std::result::Result<(&'a str, &'a Value), RuleError> {
    let mut entries = map
        .iter()
        .filter(|(k, _)| k.as_str() != Some("description"));
    match (entries.next(), entries.next()) {
        (Some((k, v)), None) => {
            let key = k
                .as_str()
                .ok_or_else(|| RuleError::invalid_feature(rule, format!("non-string key {:?}", k)))?;
            Ok((key, v))
        }
        _ => Err(RuleError::invalid_feature(
            rule,
            "each node must be a mapping with exactly one key",
        )),
    }
}

fn parse_children(rule: &str, key: &str, value: &Value) -> std::result::Result<Vec<Statement>, RuleError> {
    let items = value
        .as_sequence()
        .ok_or_else(|| RuleError::invalid_feature(rule, format!("{}: expects a list of children", key)))?;
    if items.is_empty() {
        return Err(RuleError::invalid_feature(rule, format!("{}: has no children", key)));
    }
    items.iter().map(|item| parse_node(rule, item)).collect()
}

fn at_least_count(key: &str) -> Option<usize> {
    key.strip_suffix(" or more")?.trim().parse().ok()
}

fn parse_count(rule: &str, target: &str, value: &Value) -> std::result::Result<Statement, RuleError> {
    let child = if target == "basic blocks" || target == "basic block" {
        Statement::feature(Feature::BasicBlock)
    } else {
        let (kind, arg) = target
            .split_once('(')
            .and_then(|(k, rest)| rest.strip_suffix(')').map(|a| (k, a)))
            .ok_or_else(|| RuleError::invalid_feature(rule, format!("unsupported count target: {}", target)))?;
        if kind == "match" {
            Statement::matches(arg)
        } else {
            let (arg, inline) = split_description(kind, arg);
            let leaf = parse_feature(rule, kind, &arg)?;
            match inline {
                Some(desc) => leaf.described(desc),
                None => leaf,
            }
        }
    };

    let text = scalar_text(value)
        .ok_or_else(|| RuleError::invalid_feature(rule, "count expects a quantity"))?;
    let quantifier = parse_quantifier(&text)
        .ok_or_else(|| RuleError::invalid_feature(rule, format!("invalid count quantity: {}", text)))?;
    Ok(Statement::count(child, quantifier))
}

/// `3`, `3 or more`, `3 or fewer`, `(2, 5)`
fn parse_quantifier(text: &str) -> Option<Quantifier> {
    let text = text.trim();
    if let Some(n) = text.strip_suffix(" or more") {
        return n.trim().parse().ok().map(Quantifier::AtLeast);
    }
    if let Some(n) = text.strip_suffix(" or fewer") {
        return n.trim().parse().ok().map(Quantifier::AtMost);
    }
    if let Some(range) = text.strip_prefix('(').and_then(|t| t.strip_suffix(')')) {
        let (min, max) = range.split_once(',')?;
        let (min, max) = (min.trim().parse().ok()?, max.trim().parse().ok()?);
        return (min <= max).then_some(Quantifier::Between(min, max));
    }
    text.parse().ok().map(Quantifier::Exactly)
}

/// `number: 41 = socket()` → (`41`, `socket()`); only value kinds carry inline descriptions
fn split_description(kind: &str, text: &str) -> (String, Option<String>) {
    if matches!(kind, "number" | "offset" | "bytes" | "api" | "characteristic") {
        if let Some((value, desc)) = text.split_once(" = ") {
            return (value.trim().to_string(), Some(desc.trim().to_string()));
        }
    }
    (text.to_string(), None)
}

fn parse_feature(rule: &str, kind: &str, text: &str) -> std::result::Result<Statement, RuleError> {
    let invalid = |message: String| RuleError::invalid_feature(rule, message);
    let feature = match kind {
        "api" => Feature::Api(text.to_string()),
        "string" => {
            if let Some(pattern) = regex_literal(text) {
                return Statement::regex(&pattern)
                    .map_err(|e| invalid(format!("invalid regex {}: {}", text, e)));
            }
            Feature::String(text.to_string())
        }
        "substring" => Feature::Substring(text.to_string()),
        "number" => Feature::Number(
            parse_int(text).ok_or_else(|| invalid(format!("invalid number: {}", text)))?,
        ),
        "offset" => Feature::Offset(
            parse_int(text).ok_or_else(|| invalid(format!("invalid offset: {}", text)))?,
        ),
        "bytes" => {
            let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
            let bytes = hex::decode(&compact)
                .map_err(|e| invalid(format!("invalid bytes {}: {}", text, e)))?;
            if bytes.is_empty() {
                return Err(invalid("bytes: pattern is empty".to_string()));
            }
            Feature::Bytes(bytes)
        }
        "mnemonic" => Feature::Mnemonic(text.to_string()),
        "characteristic" => Feature::Characteristic(text.to_string()),
        "section" => Feature::Section(text.to_string()),
        "export" => Feature::Export(text.to_string()),
        "import" => Feature::Import(text.to_string()),
        "function-name" => Feature::FunctionName(text.to_string()),
        "os" => Feature::Os(text.to_string()),
        "arch" => Feature::Arch(text.to_string()),
        "format" => Feature::Format(text.to_string()),
        other => return Err(invalid(format!("unknown feature kind: {}", other))),
    };
    Ok(Statement::feature(feature))
}

/// `/pattern/` or `/pattern/i` → a regex source
fn regex_literal(text: &str) -> Option<String> {
    let body = text.strip_prefix('/')?;
    if let Some(pattern) = body.strip_suffix("/i") {
        return Some(format!("(?i){}", pattern));
    }
    body.strip_suffix('/').map(str::to_string)
}

fn parse_int(text: &str) -> Option<i64> {
    let text = text.trim();
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let magnitude = match digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        Some(hex) => i64::from_str_radix(hex, 16).ok()?,
        None => digits.parse::<i64>().ok()?,
    };
    Some(if negative { -magnitude } else { magnitude })
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureSet;
    use crate::types::Address;

    #[test]
    fn test_parse_rule_with_namespace_and_scopes() {
        let rule = Rule::from_yaml(
            r#"
rule:
  meta:
    name: install service
    namespace: persistence/service
    authors:
      - analyst
    scopes:
      static: function
      dynamic: process
    examples:
      - 9324d1a8ae37a36ae560c37448c9705a:0x4073F0
  features:
    - and:
      - api: advapi32.OpenSCManagerA
      - api: advapi32.CreateServiceA
      - api: advapi32.StartServiceA
"#,
        )
        .unwrap();
        assert_eq!(rule.name, "install service");
        assert_eq!(rule.namespace.as_deref(), Some("persistence/service"));
        assert_eq!(rule.scopes, Scopes::both(Scope::Function, Scope::Process));
        assert_eq!(rule.meta.examples.len(), 1);
        assert!(matches!(rule.statement, Statement::And(ref c) if c.len() == 3));
    }

    #[test]
    fn test_unsupported_dynamic_scope() {
        let rule = Rule::from_yaml(
            r#"
rule:
  meta:
    name: static only
    scopes:
      static: basic block
      dynamic: unsupported
  features:
    - characteristic: tight loop
"#,
        )
        .unwrap();
        assert_eq!(rule.scopes, Scopes::static_only(Scope::BasicBlock));
    }

    #[test]
    fn test_number_with_inline_description() {
        let rule = Rule::from_yaml(
            r#"
rule:
  meta:
    name: create TCP socket
    scopes:
      static: instruction
      dynamic: call
  features:
    - and:
      - number: 6 = IPPROTO_TCP
      - number: 0x10
      - number: -1
"#,
        )
        .unwrap();
        let Statement::And(children) = &rule.statement else {
            panic!("expected and");
        };
        let Statement::Feature(first) = &children[0] else {
            panic!("expected feature");
        };
        assert_eq!(first.feature, Feature::Number(6));
        assert_eq!(first.description.as_deref(), Some("IPPROTO_TCP"));
        assert!(matches!(&children[1], Statement::Feature(n) if n.feature == Feature::Number(16)));
        assert!(matches!(&children[2], Statement::Feature(n) if n.feature == Feature::Number(-1)));
    }

    #[test]
    fn test_subscope_and_count_nodes() {
        let rule = Rule::from_yaml(
            r#"
rule:
  meta:
    name: push 1000 on i386
    scopes:
      static: function
      dynamic: process
  features:
    - and:
      - arch: i386
      - count(basic blocks): 1 or more
      - instruction:
        - mnemonic: push
        - number: 1000
"#,
        )
        .unwrap();
        let Statement::And(children) = &rule.statement else {
            panic!("expected and");
        };
        assert_eq!(children[1].describe(), "count(basic blocks): 1 or more");
        match &children[2] {
            Statement::Subscope { scope, child } => {
                assert_eq!(*scope, Scope::Instruction);
                assert!(matches!(child.as_ref(), Statement::And(c) if c.len() == 2));
            }
            other => panic!("expected subscope, got {:?}", other),
        }
    }

    #[test]
    fn test_string_regex_and_bytes() {
        let rule = Rule::from_yaml(
            r#"
rule:
  meta:
    name: patterns
    scopes:
      static: file
      dynamic: file
  features:
    - or:
      - string: /explorer\.exe$/i
      - bytes: ED 24 9E F4 = magic
      - 2 or more:
        - substring: "HTTP/1."
        - section: .text
"#,
        )
        .unwrap();

        let mut features = FeatureSet::new();
        features.insert(Feature::String("C:\\WINDOWS\\EXPLORER.EXE".into()), Address::Absolute(0x10));
        assert!(rule.statement.evaluate(&features).success);
    }

    #[test]
    fn test_legacy_scope() {
        let rule = Rule::from_yaml(
            r#"
rule:
  meta:
    name: legacy
    scope: basic block
  features:
    - mnemonic: xor
"#,
        )
        .unwrap();
        assert_eq!(rule.scopes, Scopes::both(Scope::BasicBlock, Scope::Thread));
    }

    #[test]
    fn test_quantifiers() {
        assert_eq!(parse_quantifier("2"), Some(Quantifier::Exactly(2)));
        assert_eq!(parse_quantifier("2 or more"), Some(Quantifier::AtLeast(2)));
        assert_eq!(parse_quantifier("3 or fewer"), Some(Quantifier::AtMost(3)));
        assert_eq!(parse_quantifier("(2, 5)"), Some(Quantifier::Between(2, 5)));
        assert_eq!(parse_quantifier("(5, 2)"), None);
        assert_eq!(parse_quantifier("many"), None);
    }

    #[test]
    fn test_malformed_values_rejected() {
        for body in [
            "- number: twelve",
            "- bytes: ZZ",
            "- string: /(unclosed/",
            "- frobnicate: x",
            "- api: a\n    - api: b",
        ] {
            let text = format!(
                "rule:\n  meta:\n    name: bad\n    scopes:\n      static: function\n  features:\n    {}\n",
                body
            );
            let err = Rule::from_yaml(&text).unwrap_err();
            assert!(matches!(err, RuleError::InvalidFeature { .. }), "{}: {}", body, err);
        }
    }

    #[test]
    fn test_bytes_must_be_quoted_when_numeric() {
        let doc = |value: &str| {
            format!(
                "rule:\n  meta:\n    name: nops\n    scopes:\n      static: function\n  features:\n    - bytes: {}\n",
                value
            )
        };
        for value in ["0090", "00"] {
            let err = Rule::from_yaml(&doc(value)).unwrap_err();
            assert!(matches!(err, RuleError::InvalidFeature { .. }), "{}", value);
            assert!(err.to_string().contains("quote"), "{}", err);
        }

        let rule = Rule::from_yaml(&doc("\"0090\"")).unwrap();
        let mut features = FeatureSet::new();
        features.insert(Feature::Bytes(vec![0x00, 0x90, 0xCC]), Address::Absolute(0x10));
        assert!(rule.statement.evaluate(&features).success);
    }

    #[test]
    fn test_unknown_scope_rejected() {
        let err = Rule::from_yaml(
            "rule:\n  meta:\n    name: bad\n    scopes:\n      static: module\n  features:\n    - api: a\n",
        )
        .unwrap_err();
        assert!(matches!(err, RuleError::InvalidScopes { .. }));
    }
}
