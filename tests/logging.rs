//! Log sink smoke test: with LOG_DIR set, emitted records land in the
//! run's events.jsonl as parseable JSON lines.
//!
//! Kept in its own integration binary because the run context is
//! process-global and initialized on first use.

use std::fs::File;
use std::io::{BufRead, BufReader};

use fieldlink::logging::{json_log, obj, v_num, v_str};

#[test]
fn events_file_receives_json_lines() {
    let dir = tempfile::tempdir().unwrap();
    std::env::set_var("LOG_DIR", dir.path());
    std::env::set_var("RUN_ID", "r-test");

    json_log(
        "pipeline",
        obj(&[
            ("outcome", v_str("completed")),
            ("probability", v_num(0.8)),
        ]),
    );
    json_log("probe", obj(&[("connected", v_str("true"))]));

    let events = dir.path().join("r-test").join("events.jsonl");
    let reader = BufReader::new(File::open(&events).unwrap());
    let lines: Vec<String> = reader.lines().map(|l| l.unwrap()).collect();
    assert_eq!(lines.len(), 2);

    let first: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
    assert_eq!(first["run_id"], "r-test");
    assert_eq!(first["component"], "pipeline");
    assert_eq!(first["data"]["outcome"], "completed");
    assert_eq!(first["data"]["probability"], 0.8);
    assert!(first["ts"].is_string());

    let second: serde_json::Value = serde_json::from_str(&lines[1]).unwrap();
    assert_eq!(second["component"], "probe");
    assert!(second["seq"].as_u64().unwrap() > first["seq"].as_u64().unwrap());
}
