//! Step definitions loaded from files

mod common;

use common::assert_float_eq;
use common::builders::StageBuilder;
use common::mock_helpers::MemoryHost;
use rowscript::config::{ScriptRole, StageConfig};
use rowscript::jsonl::{read_rows, JsonlWriter};
use rowscript::pipeline::{check_stage, CheckSeverity, RowStage, StageOutcome};
use rowscript::types::{SemanticType, Value};
use std::io::Write;
use std::sync::Arc;

const STEP_TOML: &str = r#"
step_name = "prices"

[[scripts]]
name = "helpers"
role = "Normal"
source = "fn with_tax(p) { p * 1.2 }"

[[scripts]]
name = "main"
source = "gross = with_tax(net); label = upper(item);"

[[fields]]
source_name = "gross"
type = "Number"

[[fields]]
source_name = "label"
target_name = "item_label"
type = "String"

[[input_fields]]
name = "item"
type = "String"

[[input_fields]]
name = "net"
type = "Number"

[error_handling]
enabled = true
"#;

#[test]
fn test_toml_definition_runs() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("step.toml");
    std::fs::File::create(&path)
        .unwrap()
        .write_all(STEP_TOML.as_bytes())
        .unwrap();

    let config = StageConfig::load(&path).unwrap();
    assert_eq!(config.step_name, "prices");
    assert_eq!(config.scripts.transform().unwrap().role, ScriptRole::Transform);
    assert!(config.error_handling.enabled);

    let schema = Arc::new(config.input_schema());
    let input = "{\"item\":\"tea\",\"net\":10}\n{\"item\":\"cake\",\"net\":2.5}\n";
    let rows: Vec<_> = read_rows(input.as_bytes(), &schema)
        .collect::<Result<_, _>>()
        .unwrap();

    let mut host = MemoryHost::new(schema, rows);
    let mut stage = RowStage::new(Arc::new(config), 0).unwrap();
    let report = stage.run(&mut host);
    assert_eq!(report.outcome, StageOutcome::Completed, "{:?}", report.error);

    match &host.emitted[0][2] {
        Some(Value::Number(n)) => assert_float_eq(*n, 12.0, 1e-9),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(host.emitted[1][3], Some(Value::String("CAKE".into())));

    let output_schema = host.output_schema.clone().unwrap();
    let mut writer = JsonlWriter::new(Vec::new());
    for row in &host.emitted {
        writer.write_row(row, &output_schema).unwrap();
    }
    let text = String::from_utf8(writer.into_inner()).unwrap();
    assert!(text.lines().next().unwrap().contains("\"item_label\":\"TEA\""));
}

#[test]
fn test_json_round_trip_through_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("step.json");
    let config = StageBuilder::new("out = amount;")
        .start("let seen = 0;")
        .append("out", "copy", SemanticType::Number)
        .input("amount", SemanticType::Number)
        .build();

    config.save(&path).unwrap();
    let loaded = StageConfig::load(&path).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_check_reports_per_remark() {
    let config: StageConfig = toml::from_str(STEP_TOML).unwrap();
    let remarks = check_stage(&config, &config.input_schema());
    assert!(remarks.iter().all(|r| r.severity != CheckSeverity::Error), "{:?}", remarks);

    let broken = StageBuilder::new("gross = with_tax(net);")
        .append("gross", "gross", SemanticType::Number)
        .input("net", SemanticType::Number)
        .build();
    let remarks = check_stage(&broken, &broken.input_schema());
    assert!(remarks.iter().any(|r| r.severity == CheckSeverity::Error));
}

#[test]
fn test_invalid_toml_is_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "step_name = [").unwrap();
    let err = StageConfig::load(&path).unwrap_err();
    assert!(err.to_string().contains("Configuration error"));
}
