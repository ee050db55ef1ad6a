//! Several step copies running on threads over crossbeam channels

mod common;

use common::builders::{number_row, SchemaBuilder, StageBuilder};
use common::test_timeout;
use crossbeam_channel::bounded;
use rowscript::pipeline::{
    spawn_stage_copies, RunControl, StageMessage, StageOutcome, StageReport, Termination,
};
use rowscript::types::{SemanticType, StepStats, Value};
use rowscript::StageConfig;
use std::sync::Arc;

struct Collected {
    rows: Vec<(usize, f64)>,
    rejected: usize,
    reports: Vec<StageReport>,
    termination: Termination,
}

fn run_copies(config: StageConfig, copies: usize, values: Vec<f64>) -> Collected {
    let schema = SchemaBuilder::new()
        .field("amount", SemanticType::Number)
        .build();
    let control = RunControl::new();
    let (tx, rx) = bounded(1024);
    let mut stage_copies = spawn_stage_copies(Arc::new(config), copies, control, tx).unwrap();
    assert_eq!(stage_copies.len(), copies);

    let feeder = std::thread::spawn(move || {
        for value in values {
            if !stage_copies.dispatch(number_row(value), schema.clone()) {
                break;
            }
        }
        stage_copies.join().unwrap()
    });

    let mut collected = Collected {
        rows: Vec::new(),
        rejected: 0,
        reports: Vec::new(),
        termination: Termination::Completed,
    };
    while let Ok(message) = rx.recv_timeout(test_timeout()) {
        match message {
            StageMessage::Row { copy_nr, row, .. } => match row.last() {
                Some(Some(Value::Number(n))) => collected.rows.push((copy_nr, *n)),
                other => panic!("unexpected output {:?}", other),
            },
            StageMessage::RowError { .. } => collected.rejected += 1,
            StageMessage::Finished(report) => collected.reports.push(report),
        }
    }
    collected.termination = feeder.join().unwrap();
    collected
}

#[test]
fn test_round_robin_over_copies() {
    let config = StageBuilder::new("out = amount * 10.0;")
        .append("out", "out", SemanticType::Number)
        .build();
    let result = run_copies(config, 3, (0..30).map(f64::from).collect());

    assert_eq!(result.termination, Termination::Completed);
    assert_eq!(result.rows.len(), 30);
    assert_eq!(result.reports.len(), 3);
    assert!(result
        .reports
        .iter()
        .all(|r| r.outcome == StageOutcome::Completed && r.stats.lines_read == 10));

    // Each copy preserves the order of the rows it received
    for copy in 0..3 {
        let outputs: Vec<f64> = result
            .rows
            .iter()
            .filter(|(c, _)| *c == copy)
            .map(|(_, v)| *v)
            .collect();
        assert!(outputs.windows(2).all(|w| w[0] < w[1]), "{:?}", outputs);
    }

    let mut total = StepStats::default();
    for report in &result.reports {
        total.merge(&report.stats);
    }
    assert_eq!(total.lines_written, 30);
}

#[test]
fn test_copy_numbers_visible_to_scripts() {
    let config = StageBuilder::new("out = get_copy_nr() * 1.0;")
        .append("out", "out", SemanticType::Number)
        .build();
    let result = run_copies(config, 2, vec![0.0; 4]);
    assert!(result.rows.iter().all(|(copy, v)| *copy as f64 == *v));
}

#[test]
fn test_abort_stops_all_copies() {
    let config = StageBuilder::new(
        "let trans_Status = if amount >= 5.0 { ABORT_TRANSFORMATION } else { CONTINUE_TRANSFORMATION };",
    )
    .build();
    let result = run_copies(config, 2, (0..10_000).map(f64::from).collect());

    assert_eq!(result.termination, Termination::Aborted);
    assert_eq!(result.reports.len(), 2);
    assert!(result.rows.len() < 10_000);
    assert!(result
        .reports
        .iter()
        .all(|r| r.outcome == StageOutcome::Aborted));
}

#[test]
fn test_fatal_error_fails_run() {
    let config = StageBuilder::new("if amount == 3.0 { throw \"boom\"; }").build();
    let result = run_copies(config, 1, (0..10).map(f64::from).collect());

    assert_eq!(result.termination, Termination::Failed);
    assert_eq!(result.rows.len(), 3);
    assert_eq!(result.reports[0].outcome, StageOutcome::Failed);
}

#[test]
fn test_redirected_rows_reach_driver() {
    let config = StageBuilder::new("if amount == 3.0 { throw \"boom\"; }")
        .redirect_errors()
        .build();
    let result = run_copies(config, 2, (0..10).map(f64::from).collect());

    assert_eq!(result.termination, Termination::Completed);
    assert_eq!(result.rows.len(), 9);
    assert_eq!(result.rejected, 1);
}

#[test]
fn test_invalid_definition_rejected_before_spawn() {
    let mut config = StageBuilder::new("1").build();
    config.status_variable = String::new();
    let (tx, _rx) = bounded(1);
    assert!(spawn_stage_copies(Arc::new(config), 2, RunControl::new(), tx).is_err());
}
