
use serde_json::json;
use std::io::BufReader;
use std::process::{ChildStdin, ChildStdout};
use test_support::{request_err_code, request_ok, spawn_sidecar, temp_dir};

fn seed_student(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &std::path::Path,
) -> String {
    request_ok(
        stdin,
        reader,
        "seed-ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let result = request_ok(
        stdin,
        reader,
        "seed-student",
        "students.create",
        json!({ "firstName": "Dana", "lastName": "Whitfield" }),
    );
    result
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string()
}

fn create_at(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    student_id: &str,
    title: &str,
    start: &str,
) {
    request_ok(
        stdin,
        reader,
        id,
        "assignments.create",
        json!({
            "studentId": student_id,
            "eventType": "Testing",
            "eventTitle": title,
            "location": "Lab 2",
            "responsibleParty": "R. Lindqvist",
            "startTime": start,
            "duration": 45,
        }),
    );
}

fn day_titles(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    student_id: &str,
    date: &str,
    timezone: Option<&str>,
) -> Vec<String> {
    let mut params = json!({ "view": "student", "targetId": student_id, "date": date });
    if let Some(tz) = timezone {
        params["timezone"] = json!(tz);
    }
    let result = request_ok(stdin, reader, id, "schedule.day", params);
    result
        .get("events")
        .and_then(|v| v.as_array())
        .expect("events")
        .iter()
        .map(|e| {
            e.get("eventTitle")
                .and_then(|v| v.as_str())
                .expect("eventTitle")
                .to_string()
        })
        .collect()
}

#[test]
fn same_instant_lands_on_different_local_days() {
    let workspace = temp_dir("rosterd-tz-days");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let student_id = seed_student(&mut stdin, &mut reader, &workspace);

    // 02:00 UTC on the 19th is 22:00 on the 18th in New York.
    create_at(
        &mut stdin,
        &mut reader,
        "a1",
        &student_id,
        "Late Session",
        "2025-08-19T02:00:00Z",
    );

    assert_eq!(
        day_titles(&mut stdin, &mut reader, "q1", &student_id, "2025-08-19", None),
        vec!["Late Session"]
    );
    assert!(
        day_titles(&mut stdin, &mut reader, "q2", &student_id, "2025-08-18", None).is_empty()
    );

    assert_eq!(
        day_titles(
            &mut stdin,
            &mut reader,
            "q3",
            &student_id,
            "2025-08-18",
            Some("America/New_York"),
        ),
        vec!["Late Session"]
    );
    assert!(day_titles(
        &mut stdin,
        &mut reader,
        "q4",
        &student_id,
        "2025-08-19",
        Some("America/New_York"),
    )
    .is_empty());

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn day_range_is_half_open() {
    let workspace = temp_dir("rosterd-tz-halfopen");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let student_id = seed_student(&mut stdin, &mut reader, &workspace);

    create_at(
        &mut stdin,
        &mut reader,
        "a1",
        &student_id,
        "Midnight Start",
        "2025-08-18T00:00:00Z",
    );
    create_at(
        &mut stdin,
        &mut reader,
        "a2",
        &student_id,
        "Next Midnight",
        "2025-08-19T00:00:00Z",
    );

    // The inclusive lower bound picks up the first event, the exclusive upper
    // bound leaves the next midnight to the following day.
    assert_eq!(
        day_titles(&mut stdin, &mut reader, "q1", &student_id, "2025-08-18", None),
        vec!["Midnight Start"]
    );
    assert_eq!(
        day_titles(&mut stdin, &mut reader, "q2", &student_id, "2025-08-19", None),
        vec!["Next Midnight"]
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn range_echoes_utc_bounds_for_named_zone() {
    let workspace = temp_dir("rosterd-tz-range");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let student_id = seed_student(&mut stdin, &mut reader, &workspace);
    create_at(
        &mut stdin,
        &mut reader,
        "a1",
        &student_id,
        "Anchor",
        "2025-08-18T12:00:00Z",
    );

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "q1",
        "schedule.day",
        json!({
            "view": "student",
            "targetId": student_id,
            "date": "2025-08-18",
            "timezone": "America/New_York",
        }),
    );
    let range = result.get("range").expect("range");
    // EDT midnight is 04:00 UTC.
    assert_eq!(
        range.get("start").and_then(|v| v.as_str()),
        Some("2025-08-18T04:00:00Z")
    );
    assert_eq!(
        range.get("end").and_then(|v| v.as_str()),
        Some("2025-08-19T04:00:00Z")
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn unknown_timezone_is_rejected() {
    let workspace = temp_dir("rosterd-tz-unknown");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let student_id = seed_student(&mut stdin, &mut reader, &workspace);

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "q1",
        "schedule.day",
        json!({
            "view": "student",
            "targetId": student_id,
            "date": "2025-08-18",
            "timezone": "Mars/Olympus_Mons",
        }),
    );
    assert_eq!(code, "bad_params");

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "q2",
        "schedule.day",
        json!({ "view": "student", "targetId": student_id, "date": "not-a-date" }),
    );
    assert_eq!(code, "bad_params");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
