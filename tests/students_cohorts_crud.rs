
use serde_json::json;
use std::io::BufReader;
use std::process::{ChildStdin, ChildStdout};
use test_support::{request_err_code, request_ok, spawn_sidecar, temp_dir};

fn select_workspace(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &std::path::Path,
) {
    request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
}

fn id_of(result: &serde_json::Value, key: &str) -> String {
    result
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("missing {}", key))
        .to_string()
}

#[test]
fn program_counts_reflect_active_membership() {
    let workspace = temp_dir("rosterd-crud-counts");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    let program = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "programs.create",
        json!({ "name": "Life Skills", "description": "Daily living curriculum" }),
    );
    let program_id = id_of(&program, "programId");
    let cohort = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "cohorts.create",
        json!({ "programId": program_id, "name": "Morning Group" }),
    );
    let cohort_id = id_of(&cohort, "cohortId");
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({ "firstName": "Ines", "lastName": "Castillo", "cohortId": cohort_id, "grade": "10" }),
    );
    let student_id = id_of(&student, "studentId");

    let listed = request_ok(&mut stdin, &mut reader, "4", "programs.list", json!({}));
    let programs = listed
        .get("programs")
        .and_then(|v| v.as_array())
        .expect("programs");
    assert_eq!(programs.len(), 1);
    assert_eq!(
        programs[0].get("cohortCount").and_then(|v| v.as_i64()),
        Some(1)
    );
    assert_eq!(
        programs[0].get("studentCount").and_then(|v| v.as_i64()),
        Some(1)
    );

    request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "students.deactivate",
        json!({ "studentId": student_id }),
    );
    let listed = request_ok(&mut stdin, &mut reader, "6", "programs.list", json!({}));
    let programs = listed
        .get("programs")
        .and_then(|v| v.as_array())
        .expect("programs");
    assert_eq!(
        programs[0].get("studentCount").and_then(|v| v.as_i64()),
        Some(0)
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn update_roundtrip_and_not_found() {
    let workspace = temp_dir("rosterd-crud-update");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    let student = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "students.create",
        json!({ "firstName": "Noor", "lastName": "Haddad" }),
    );
    let student_id = id_of(&student, "studentId");

    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.update",
        json!({
            "studentId": student_id,
            "patch": { "lastName": "Haddad-Reyes", "email": "noor@example.org", "notes": null },
        }),
    );
    let listed = request_ok(&mut stdin, &mut reader, "3", "students.list", json!({}));
    let students = listed
        .get("students")
        .and_then(|v| v.as_array())
        .expect("students");
    assert_eq!(students.len(), 1);
    assert_eq!(
        students[0].get("lastName").and_then(|v| v.as_str()),
        Some("Haddad-Reyes")
    );
    assert_eq!(
        students[0].get("email").and_then(|v| v.as_str()),
        Some("noor@example.org")
    );

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "4",
        "students.update",
        json!({ "studentId": "missing", "patch": { "firstName": "X" } }),
    );
    assert_eq!(code, "not_found");
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "5",
        "students.update",
        json!({ "studentId": student_id, "patch": { "firstName": "   " } }),
    );
    assert_eq!(code, "bad_params");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn rejected_patch_field_blocks_the_whole_patch() {
    let workspace = temp_dir("rosterd-crud-atomic");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    let student = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "students.create",
        json!({ "firstName": "Omar", "lastName": "Bakr" }),
    );
    let student_id = id_of(&student, "studentId");

    // lastName is valid on its own; the non-string email must fail the whole
    // patch before anything is written.
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "2",
        "students.update",
        json!({
            "studentId": student_id,
            "patch": { "lastName": "Renamed", "email": 7 },
        }),
    );
    assert_eq!(code, "bad_params");

    let listed = request_ok(&mut stdin, &mut reader, "3", "students.list", json!({}));
    let students = listed
        .get("students")
        .and_then(|v| v.as_array())
        .expect("students");
    assert_eq!(
        students[0].get("lastName").and_then(|v| v.as_str()),
        Some("Bakr")
    );
    assert_eq!(students[0].get("email").and_then(|v| v.as_str()), None);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn cohort_creation_requires_active_program() {
    let workspace = temp_dir("rosterd-crud-inactive");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "1",
        "cohorts.create",
        json!({ "programId": "missing", "name": "Orphan" }),
    );
    assert_eq!(code, "not_found");

    let program = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "programs.create",
        json!({ "name": "Sunset Program" }),
    );
    let program_id = id_of(&program, "programId");
    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "programs.deactivate",
        json!({ "programId": program_id }),
    );
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "4",
        "cohorts.create",
        json!({ "programId": program_id, "name": "Too Late" }),
    );
    assert_eq!(code, "bad_params");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn student_moves_validate_target_cohort() {
    let workspace = temp_dir("rosterd-crud-move");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    let program = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "programs.create",
        json!({ "name": "Vocational Track" }),
    );
    let program_id = id_of(&program, "programId");
    let cohort_a = id_of(
        &request_ok(
            &mut stdin,
            &mut reader,
            "2",
            "cohorts.create",
            json!({ "programId": program_id, "name": "A" }),
        ),
        "cohortId",
    );
    let cohort_b = id_of(
        &request_ok(
            &mut stdin,
            &mut reader,
            "3",
            "cohorts.create",
            json!({ "programId": program_id, "name": "B" }),
        ),
        "cohortId",
    );
    let student_id = id_of(
        &request_ok(
            &mut stdin,
            &mut reader,
            "4",
            "students.create",
            json!({ "firstName": "Theo", "lastName": "Park", "cohortId": cohort_a }),
        ),
        "studentId",
    );

    request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "students.update",
        json!({ "studentId": student_id, "patch": { "cohortId": cohort_b } }),
    );
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "students.list",
        json!({ "cohortId": cohort_b }),
    );
    assert_eq!(
        listed.get("students").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(1)
    );

    request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "cohorts.deactivate",
        json!({ "cohortId": cohort_a }),
    );
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "8",
        "students.update",
        json!({ "studentId": student_id, "patch": { "cohortId": cohort_a } }),
    );
    assert_eq!(code, "bad_params");

    // Clearing the cohort is always allowed.
    request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "students.update",
        json!({ "studentId": student_id, "patch": { "cohortId": null } }),
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn inactive_rows_hide_unless_requested() {
    let workspace = temp_dir("rosterd-crud-hidden");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    let student_id = id_of(
        &request_ok(
            &mut stdin,
            &mut reader,
            "1",
            "students.create",
            json!({ "firstName": "Rina", "lastName": "Sato" }),
        ),
        "studentId",
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.deactivate",
        json!({ "studentId": student_id }),
    );

    let listed = request_ok(&mut stdin, &mut reader, "3", "students.list", json!({}));
    assert_eq!(
        listed.get("students").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0)
    );
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "students.list",
        json!({ "includeInactive": true }),
    );
    let students = listed
        .get("students")
        .and_then(|v| v.as_array())
        .expect("students");
    assert_eq!(students.len(), 1);
    assert_eq!(students[0].get("active").and_then(|v| v.as_bool()), Some(false));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn requests_without_workspace_are_refused() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let code = request_err_code(&mut stdin, &mut reader, "1", "students.list", json!({}));
    assert_eq!(code, "no_workspace");

    drop(stdin);
    let _ = child.wait();
}
