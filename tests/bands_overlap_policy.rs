use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_gradebookd");
    let mut child = Command::new(exe)
        .env_remove("GRADEBOOKD_WORKSPACE")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn gradebookd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn error_code(value: &serde_json::Value) -> Option<&str> {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
}


fn labels(list: &serde_json::Value) -> Vec<String> {
    list.get("bands")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default()
        .iter()
        .filter_map(|b| b.get("label").and_then(|v| v.as_str()).map(str::to_string))
        .collect()
}

#[test]
fn replace_rejects_overlaps_until_policy_relaxed() {
    let workspace = temp_dir("gradebook-bands-overlap");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let overlapping = json!([
        { "minScore": 0, "maxScore": 50, "label": "D", "gradePoint": 1.0 },
        { "minScore": 50, "maxScore": 100, "label": "A", "gradePoint": 3.0 }
    ]);
    let rejected = request(
        &mut stdin,
        &mut reader,
        "2",
        "bands.replace",
        json!({ "level": "secondary", "bands": overlapping }),
    );
    assert_eq!(error_code(&rejected), Some("invalid_bands"));
    assert_eq!(
        rejected
            .pointer("/error/details/secondLabel")
            .and_then(|v| v.as_str()),
        Some("A")
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "setup.update",
        json!({ "section": "grading", "patch": { "rejectOverlappingBands": false } }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "bands.replace",
        json!({ "level": "secondary", "bands": overlapping }),
    );

    // First match wins in stored order (min score ascending).
    let res = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "grades.resolve",
        json!({ "score": 50, "level": "secondary" }),
    );
    assert_eq!(res.get("label").and_then(|v| v.as_str()), Some("D"));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn shape_errors_are_rejected_regardless_of_policy() {
    let workspace = temp_dir("gradebook-bands-shape");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "setup.update",
        json!({ "section": "grading", "patch": { "rejectOverlappingBands": false } }),
    );

    let inverted = request(
        &mut stdin,
        &mut reader,
        "3",
        "bands.replace",
        json!({
            "level": "primary",
            "bands": [{ "minScore": 80, "maxScore": 20, "label": "X" }]
        }),
    );
    assert_eq!(error_code(&inverted), Some("invalid_bands"));

    let blank = request(
        &mut stdin,
        &mut reader,
        "4",
        "bands.upsert",
        json!({
            "level": "primary",
            "band": { "minScore": 0, "maxScore": 20, "label": "  " }
        }),
    );
    assert_eq!(error_code(&blank), Some("invalid_bands"));

    let malformed = request(
        &mut stdin,
        &mut reader,
        "5",
        "bands.upsert",
        json!({ "level": "primary", "band": { "label": "X" } }),
    );
    assert_eq!(error_code(&malformed), Some("bad_params"));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn upsert_edit_and_delete_bands_per_level() {
    let workspace = temp_dir("gradebook-bands-crud");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let a = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "bands.upsert",
        json!({
            "level": "secondary",
            "band": { "minScore": 75, "maxScore": 100, "label": "A", "gradePoint": 3.0 }
        }),
    );
    let a_id = a.get("id").and_then(|v| v.as_str()).expect("band id").to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "bands.upsert",
        json!({
            "level": "secondary",
            "band": { "minScore": 0, "maxScore": 74, "label": "C", "gradePoint": 2.0 }
        }),
    );

    let overlap = request(
        &mut stdin,
        &mut reader,
        "4",
        "bands.upsert",
        json!({
            "level": "secondary",
            "band": { "minScore": 70, "maxScore": 80, "label": "B", "gradePoint": 2.5 }
        }),
    );
    assert_eq!(error_code(&overlap), Some("invalid_bands"));

    // The same range on the other level is independent.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "bands.upsert",
        json!({
            "level": "primary",
            "band": { "minScore": 70, "maxScore": 80, "label": "B" }
        }),
    );

    let list = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "bands.list",
        json!({ "level": "secondary" }),
    );
    assert_eq!(labels(&list), vec!["C".to_string(), "A".to_string()]);

    // Editing a band in place may move its own range without tripping the overlap check.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "bands.upsert",
        json!({
            "level": "secondary",
            "band": {
                "id": a_id,
                "minScore": 80,
                "maxScore": 100,
                "label": "A",
                "comment": "Excellent",
                "gradePoint": 4.0
            }
        }),
    );
    let res = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "grades.resolve",
        json!({ "score": 77, "level": "secondary" }),
    );
    assert_eq!(res.get("found").and_then(|v| v.as_bool()), Some(false));

    let color = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "grades.color",
        json!({ "score": 90, "level": "secondary" }),
    );
    assert_eq!(color.get("color").and_then(|v| v.as_str()), Some("success"));

    let deleted = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "bands.delete",
        json!({ "id": a_id }),
    );
    assert_eq!(deleted.get("level").and_then(|v| v.as_str()), Some("secondary"));
    let again = request(
        &mut stdin,
        &mut reader,
        "11",
        "bands.delete",
        json!({ "id": a_id }),
    );
    assert_eq!(error_code(&again), Some("not_found"));

    let list = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "bands.list",
        json!({ "level": "secondary" }),
    );
    assert_eq!(labels(&list), vec!["C".to_string()]);

    drop(stdin);
    let _ = child.wait();
}
