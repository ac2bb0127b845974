use comodin_automation::shared::ids::{generate_compact_id, OrganizationId};
use comodin_automation::shared::logging::EventLog;
use tempfile::tempdir;

#[test]
fn shared_ids_module_parses_organization_identifiers() {
    assert_eq!(
        OrganizationId::parse("org-acme").expect("id").as_str(),
        "org-acme"
    );
    assert_eq!(
        OrganizationId::parse("tienda_42").expect("id").as_str(),
        "tienda_42"
    );

    assert!(OrganizationId::parse("").is_err());
    assert!(OrganizationId::parse("org acme").is_err());
    assert!(OrganizationId::parse("org/acme").is_err());

    let parsed: OrganizationId = serde_json::from_str("\"org-acme\"").expect("deserialize");
    assert_eq!(parsed.to_string(), "org-acme");
    assert!(serde_json::from_str::<OrganizationId>("\"org?\"").is_err());
}

#[test]
fn compact_ids_carry_prefix_and_are_distinct() {
    let first = generate_compact_id("exec", 1_715_785_200).expect("id");
    let second = generate_compact_id("exec", 1_715_785_200).expect("id");
    assert!(first.starts_with("exec-"));
    assert_eq!(first.split('-').count(), 3);
    assert_eq!(first.rsplit('-').next().map(str::len), Some(6));
    assert_ne!(first, second);

    assert!(generate_compact_id("exec", -1).is_err());
}

#[test]
fn event_log_appends_json_lines_and_disabled_log_is_silent() {
    let dir = tempdir().expect("temp dir");
    let log = EventLog::new(dir.path().join("logs/automation.log"));
    log.emit("rule.saved", &[("rule_id", serde_json::Value::from("r1"))]);
    log.emit("rule.saved", &[("rule_id", serde_json::Value::from("r2"))]);

    let raw = std::fs::read_to_string(dir.path().join("logs/automation.log")).expect("read log");
    let lines: Vec<serde_json::Value> = raw
        .lines()
        .map(|line| serde_json::from_str(line).expect("json line"))
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[1]["event"], "rule.saved");
    assert_eq!(lines[1]["rule_id"], "r2");
    assert!(lines[0]["timestamp"].is_i64());

    let disabled = EventLog::disabled();
    assert!(disabled.path().is_none());
    disabled.emit("ignored", &[]);
}
