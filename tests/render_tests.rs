// SPDX-License-Identifier: PMPL-1.0-or-later

//! Report rendering: default versus verbose listings and the JSON document

use capscan::report::{
    build_document, save_report, ReportFormatter, ReportOutputFormat, SampleInfo, Verbosity,
    Visibility,
};
use capscan::{find_capabilities, CaptureOptions, FrozenExtractor, Rule, RuleSet};
use std::fs;
use std::path::Path;

const SAMPLE: &str = "9324d1a8ae37a36ae560c37448c9705a.json";

const TCP_RULES: [&str; 3] = [
    r#"
rule:
  meta:
    name: create TCP socket
    namespace: communication/socket/tcp
    scopes:
      static: function
      dynamic: process
  features:
    - and:
      - api: ws2_32.socket
      - number: 6 = IPPROTO_TCP
"#,
    r#"
rule:
  meta:
    name: connect TCP socket
    namespace: communication/socket/tcp/connect
    scopes:
      static: function
      dynamic: process
  features:
    - and:
      - match: create TCP socket
      - api: ws2_32.connect
"#,
    r#"
rule:
  meta:
    name: act as TCP client
    namespace: communication/tcp/client
    scopes:
      static: function
      dynamic: process
  features:
    - match: connect TCP socket
"#,
];

const TIGHT_LOOP: &str = r#"
rule:
  meta:
    name: tight loop
    lib: true
    scopes:
      static: basic block
      dynamic: thread
  features:
    - characteristic: tight loop
"#;

const KILL_THREAD_LOOP: &str = r#"
rule:
  meta:
    name: kill thread loop
    namespace: host-interaction/thread/terminate
    scopes:
      static: function
      dynamic: process
  features:
    - and:
      - api: kernel32.TerminateThread
      - match: tight loop
"#;

fn analyze(documents: &[&str]) -> (RuleSet, capscan::Capabilities, Vec<u8>) {
    let rules = RuleSet::new(
        documents
            .iter()
            .map(|d| Rule::from_yaml(d).expect("rule should parse"))
            .collect(),
    )
    .expect("rule set should build");
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(SAMPLE);
    let contents = fs::read(&path).unwrap();
    let extractor = FrozenExtractor::from_json(std::str::from_utf8(&contents).unwrap()).unwrap();
    let caps = find_capabilities(&rules, &extractor, &CaptureOptions::default()).unwrap();
    (rules, caps, contents)
}

fn all_rules() -> Vec<&'static str> {
    let mut docs = TCP_RULES.to_vec();
    docs.push(TIGHT_LOOP);
    docs.push(KILL_THREAD_LOOP);
    docs
}

#[test]
fn test_visibility_classification() {
    let (rules, caps, _) = analyze(&all_rules());
    let doc = build_document(&rules, &caps, None);

    assert_eq!(doc.rules["act as TCP client"].visibility, Visibility::Shown);
    assert_eq!(doc.rules["connect TCP socket"].visibility, Visibility::AlsoMatched);
    assert_eq!(doc.rules["create TCP socket"].visibility, Visibility::AlsoMatched);
    assert_eq!(doc.rules["tight loop"].visibility, Visibility::Library);
    assert_eq!(doc.rules["kill thread loop"].visibility, Visibility::Shown);

    // classification never drops entries
    assert_eq!(doc.rules.len(), caps.matches.len());
}

#[test]
fn test_default_hides_building_blocks() {
    colored::control::set_override(false);
    let (rules, caps, _) = analyze(&all_rules());
    let doc = build_document(&rules, &caps, None);

    let text = ReportFormatter::new(Verbosity::Default).render(&doc);
    assert!(text.contains("act as TCP client"));
    assert!(text.contains("communication/tcp/client"));
    assert!(text.contains("kill thread loop"));
    assert!(!text.contains("connect TCP socket"));
    assert!(!text.contains("create TCP socket"));
    assert!(!text.contains("tight loop\n"));
}

#[test]
fn test_verbose_lists_every_rule() {
    colored::control::set_override(false);
    let (rules, caps, _) = analyze(&all_rules());
    let doc = build_document(&rules, &caps, None);

    let text = ReportFormatter::new(Verbosity::Verbose).render(&doc);
    assert!(text.contains("act as TCP client"));
    assert!(text.contains("connect TCP socket"));
    assert!(text.contains("create TCP socket"));
    assert!(text.contains("0x401000"));

    let trees = ReportFormatter::new(Verbosity::VeryVerbose).render(&doc);
    assert!(trees.contains("api: ws2_32.connect"));
    assert!(trees.contains("number: 0x6 = IPPROTO_TCP"));
}

#[test]
fn test_no_capabilities() {
    colored::control::set_override(false);
    let (rules, caps, _) = analyze(&[r#"
rule:
  meta:
    name: never
    scopes:
      static: function
      dynamic: process
  features:
    - api: does.not.exist
"#]);
    let doc = build_document(&rules, &caps, None);
    assert!(doc.rules.is_empty());
    let text = ReportFormatter::new(Verbosity::Default).render(&doc);
    assert!(text.contains("no capabilities found"));
}

#[test]
fn test_json_document_layout() {
    let (rules, caps, contents) = analyze(&all_rules());
    let doc = build_document(&rules, &caps, Some(SampleInfo::new(SAMPLE, &contents)));

    let json = ReportOutputFormat::Json
        .serialize(&doc, Verbosity::Default)
        .unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();

    assert_eq!(value["meta"]["sample"]["sha256"].as_str().unwrap().len(), 64);
    assert_eq!(value["meta"]["analysis"]["flavor"], "static");

    let functions = value["meta"]["analysis"]["layout"]["functions"]
        .as_array()
        .unwrap();
    let killer = functions
        .iter()
        .find(|f| f["address"]["value"] == 0x403660)
        .expect("function with the tight loop is in the layout");
    assert_eq!(
        killer["matched_basic_blocks"][0]["address"]["value"],
        0x403685
    );

    // JSON keeps every matched rule regardless of visibility
    assert!(value["rules"]["create TCP socket"].is_object());
    assert_eq!(value["rules"]["create TCP socket"]["visibility"], "also_matched");
    assert_eq!(value["rules"]["tight loop"]["meta"]["lib"], true);
}

#[test]
fn test_rendering_leaves_matches_untouched() {
    let (rules, caps, _) = analyze(&all_rules());
    let before = caps.matches.clone();
    let doc = build_document(&rules, &caps, None);
    let _ = ReportFormatter::new(Verbosity::VeryVerbose).render(&doc);
    let _ = ReportOutputFormat::Yaml.serialize(&doc, Verbosity::Default).unwrap();
    assert_eq!(caps.matches, before);

    let again = build_document(&rules, &caps, None);
    assert_eq!(
        serde_json::to_value(&doc.rules).unwrap(),
        serde_json::to_value(&again.rules).unwrap()
    );
}

#[test]
fn test_save_report_formats() {
    let (rules, caps, _) = analyze(&all_rules());
    let doc = build_document(&rules, &caps, None);
    let dir = tempfile::tempdir().unwrap();

    for format in [ReportOutputFormat::Text, ReportOutputFormat::Json, ReportOutputFormat::Yaml] {
        let path = dir.path().join(format!("report.{}", format.extension()));
        save_report(&doc, format, Verbosity::Verbose, &path).unwrap();
        let written = fs::read_to_string(&path).unwrap();
        assert!(written.contains("act as TCP client"), "{:?}", format);
    }
    assert_eq!(ReportOutputFormat::parse("YML"), Some(ReportOutputFormat::Yaml));
    assert_eq!(ReportOutputFormat::parse("sarif"), None);
}

#[test]
fn test_file_rule_referenced_by_file_rule() {
    colored::control::set_override(false);
    let (rules, caps, _) = analyze(&[
        r#"
rule:
  meta:
    name: text section
    scopes:
      static: file
      dynamic: file
  features:
    - section: .text
"#,
        r#"
rule:
  meta:
    name: text and windows
    scopes:
      static: file
      dynamic: file
  features:
    - and:
      - match: text section
      - os: windows
"#,
    ]);
    let doc = build_document(&rules, &caps, None);

    // both matched at no address; the reference still accounts for it
    assert_eq!(doc.rules["text section"].visibility, Visibility::AlsoMatched);
    assert_eq!(doc.rules["text and windows"].visibility, Visibility::Shown);

    let text = ReportFormatter::new(Verbosity::Default).render(&doc);
    assert!(text.contains("text and windows"));
    assert!(!text.contains("text section"));
}

const PLAIN_TIGHT_LOOP: &str = r#"
rule:
  meta:
    name: tight loop
    scopes:
      static: basic block
      dynamic: thread
  features:
    - characteristic: tight loop
"#;

#[test]
fn test_subscope_reference_needs_matched_parent() {
    let (rules, caps, _) = analyze(&[
        PLAIN_TIGHT_LOOP,
        r#"
rule:
  meta:
    name: never parent
    scopes:
      static: function
      dynamic: process
  features:
    - and:
      - api: does.not.exist
      - basic block:
        - match: tight loop
"#,
    ]);
    let doc = build_document(&rules, &caps, None);

    assert!(!caps.matches.contains_key("never parent"));
    assert!(caps.matches.contains_key("never parent/basic block subscope 1"));
    assert_eq!(
        doc.rules["never parent/basic block subscope 1"].visibility,
        Visibility::Subscope
    );
    // only the orphaned subscope rule refers to it
    assert_eq!(doc.rules["tight loop"].visibility, Visibility::Shown);
}

#[test]
fn test_subscope_reference_through_matched_parent() {
    let (rules, caps, _) = analyze(&[
        PLAIN_TIGHT_LOOP,
        r#"
rule:
  meta:
    name: kill parent
    scopes:
      static: function
      dynamic: process
  features:
    - and:
      - api: kernel32.TerminateThread
      - basic block:
        - match: tight loop
"#,
    ]);
    let doc = build_document(&rules, &caps, None);

    assert_eq!(doc.rules["kill parent"].visibility, Visibility::Shown);
    assert_eq!(
        doc.rules["kill parent/basic block subscope 1"].visibility,
        Visibility::Subscope
    );
    assert_eq!(doc.rules["tight loop"].visibility, Visibility::AlsoMatched);
}
