use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{ChildStdin, ChildStdout, Command, Stdio};
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
    if value.get("ok").and_then(|v| v.as_bool()) == Some(false) {
        let code = value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        assert_ne!(
            code, "not_implemented",
            "unexpected unknown method for {}",
            method
        );
    }
    value
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("rosterd-router-smoke");
    let bundle_out = workspace.join("smoke-backup.rosterbackup.zip");

    let exe = env!("CARGO_BIN_EXE_rosterd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn rosterd");
    let mut stdin = child.stdin.take().expect("child stdin");
    let mut reader = BufReader::new(child.stdout.take().expect("child stdout"));

    let _ = request(&mut stdin, &mut reader, "1", "health", json!({}));
    let _ = request(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let created = request(
        &mut stdin,
        &mut reader,
        "3",
        "programs.create",
        json!({ "name": "Smoke Program" }),
    );
    let program_id = created
        .get("result")
        .and_then(|v| v.get("programId"))
        .and_then(|v| v.as_str())
        .expect("programId")
        .to_string();
    let _ = request(&mut stdin, &mut reader, "4", "programs.list", json!({}));

    let created = request(
        &mut stdin,
        &mut reader,
        "5",
        "cohorts.create",
        json!({ "programId": program_id, "name": "Smoke Cohort" }),
    );
    let cohort_id = created
        .get("result")
        .and_then(|v| v.get("cohortId"))
        .and_then(|v| v.as_str())
        .expect("cohortId")
        .to_string();
    let _ = request(&mut stdin, &mut reader, "6", "cohorts.list", json!({}));

    let created = request(
        &mut stdin,
        &mut reader,
        "7",
        "students.create",
        json!({ "firstName": "Sam", "lastName": "Ruiz", "cohortId": cohort_id }),
    );
    let student_id = created
        .get("result")
        .and_then(|v| v.get("studentId"))
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string();
    let _ = request(&mut stdin, &mut reader, "8", "students.list", json!({}));

    let _ = request(
        &mut stdin,
        &mut reader,
        "9",
        "classes.create",
        json!({ "name": "Culinary Arts", "eventType": "Vocational" }),
    );
    let _ = request(&mut stdin, &mut reader, "10", "classes.list", json!({}));

    let created = request(
        &mut stdin,
        &mut reader,
        "11",
        "assignments.create",
        json!({
            "studentId": student_id,
            "eventType": "Vocational",
            "eventTitle": "Kitchen Rotation",
            "location": "Kitchen B",
            "startTime": "2025-08-18T09:00:00Z",
            "duration": 90,
            "responsibleParty": "Chef Patel"
        }),
    );
    let assignment_id = created
        .get("result")
        .and_then(|v| v.get("assignmentId"))
        .and_then(|v| v.as_str())
        .expect("assignmentId")
        .to_string();

    let _ = request(
        &mut stdin,
        &mut reader,
        "12",
        "assignments.list",
        json!({ "studentId": student_id }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "13",
        "schedule.day",
        json!({ "view": "student", "targetId": student_id, "date": "2025-08-18" }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "14",
        "schedule.occurrences",
        json!({ "assignmentId": assignment_id }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "15",
        "backup.export",
        json!({ "outPath": bundle_out.to_string_lossy() }),
    );

    let unknown = request(&mut stdin, &mut reader, "16", "health", json!({}));
    assert_eq!(unknown.get("ok").and_then(|v| v.as_bool()), Some(true));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
