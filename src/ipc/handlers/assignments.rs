use crate::import;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, now_ts, parse_bool, parse_opt_i64, parse_opt_string, required_str};
use crate::ipc::types::{AppState, Request};
use crate::schedule::{self, Recurrence, ScheduleError, TimeWindow};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "assignments.create" => Some(handle_create(state, req)),
        "assignments.list" => Some(handle_list(state, req)),
        "assignments.update" => Some(handle_update(state, req)),
        "assignments.deactivate" => Some(handle_deactivate(state, req)),
        "assignments.import" => Some(handle_import(state, req)),
        _ => None,
    }
}

fn validation_err(req: &Request, e: ScheduleError) -> serde_json::Value {
    let details = match &e {
        ScheduleError::DurationMismatch { provided, computed } => {
            Some(json!({ "provided": provided, "computed": computed }))
        }
        _ => None,
    };
    err(&req.id, e.code(), e.to_string(), details)
}

/// Pull start/end/duration out of the params and resolve them into a window.
fn window_from_params(req: &Request) -> Result<TimeWindow, serde_json::Value> {
    let start = match req.params.get("startTime").and_then(|v| v.as_str()) {
        Some(s) => Some(schedule::parse_instant(s).map_err(|e| validation_err(req, e))?),
        None => None,
    };
    let end = match req.params.get("endTime").and_then(|v| v.as_str()) {
        Some(s) => Some(schedule::parse_instant(s).map_err(|e| validation_err(req, e))?),
        None => None,
    };
    // A fractional duration must fail loudly, not fall through as absent.
    let duration = parse_opt_i64(req.params.get("duration"))
        .map_err(|m| err(&req.id, "bad_params", format!("duration {}", m), None))?;
    schedule::resolve_time_window(start, end, duration).map_err(|e| validation_err(req, e))
}

fn student_name(conn: &Connection, student_id: &str) -> rusqlite::Result<Option<(String, i64)>> {
    conn.query_row(
        "SELECT first_name || ' ' || last_name, active FROM students WHERE id = ?",
        params![student_id],
        |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)),
    )
    .optional()
}

fn handle_create(state: &AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let event_type = match required_str(req, "eventType") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if !schedule::is_event_type(&event_type) {
        return err(
            &req.id,
            "bad_params",
            format!("unknown eventType: {}", event_type),
            Some(json!({ "allowed": schedule::EVENT_TYPES })),
        );
    }
    let event_title = match required_str(req, "eventTitle") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let location = match required_str(req, "location") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let responsible_party = match required_str(req, "responsibleParty") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let point_of_contact = match parse_opt_string(req.params.get("pointOfContact")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("pointOfContact {}", m), None),
    };
    let notes = match parse_opt_string(req.params.get("notes")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("notes {}", m), None),
    };
    let class_id = match parse_opt_string(req.params.get("classId")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("classId {}", m), None),
    };

    let window = match window_from_params(req) {
        Ok(w) => w,
        Err(resp) => return resp,
    };

    let recurrence = match req.params.get("recurrence").and_then(|v| v.as_str()) {
        Some(s) => match Recurrence::parse(s) {
            Ok(r) => r,
            Err(e) => return validation_err(req, e),
        },
        None => Recurrence::None,
    };
    let recurrence_end_input = match req.params.get("recurrenceEndDate").and_then(|v| v.as_str()) {
        Some(s) => match schedule::parse_date(s) {
            Ok(d) => Some(d),
            Err(e) => return validation_err(req, e),
        },
        None => None,
    };
    let recurrence_end =
        match schedule::validate_recurrence(recurrence, recurrence_end_input, window.start_utc) {
            Ok(d) => d,
            Err(e) => return validation_err(req, e),
        };

    let student_display = match student_name(conn, &student_id) {
        Ok(None) => return err(&req.id, "not_found", "student not found", None),
        Ok(Some((_, 0))) => return err(&req.id, "bad_params", "student is inactive", None),
        Ok(Some((name, _))) => name,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Some(cid) = &class_id {
        let exists = match conn
            .query_row("SELECT 1 FROM classes WHERE id = ? AND active = 1", params![cid], |_r| Ok(()))
            .optional()
        {
            Ok(v) => v.is_some(),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if !exists {
            return err(&req.id, "not_found", "class not found", None);
        }
    }

    let assignment_id = Uuid::new_v4().to_string();
    let ts = now_ts();
    if let Err(e) = conn.execute(
        "INSERT INTO assignments(
            id, student_id, class_id, event_type, event_title, location,
            start_time, duration, end_time, recurrence, recurrence_end_date,
            notes, responsible_party, point_of_contact, active, created_at, updated_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)",
        params![
            assignment_id,
            student_id,
            class_id,
            event_type,
            event_title,
            location,
            schedule::fmt_instant(&window.start_utc),
            window.duration_minutes,
            schedule::fmt_instant(&window.end_utc),
            recurrence.as_str(),
            recurrence_end.map(|d| d.format("%Y-%m-%d").to_string()),
            notes,
            responsible_party,
            point_of_contact,
            ts,
            ts
        ],
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "assignmentId": assignment_id,
            "studentName": student_display,
            "startTime": schedule::fmt_instant(&window.start_utc),
            "endTime": schedule::fmt_instant(&window.end_utc),
            "duration": window.duration_minutes,
            "recurrence": recurrence.as_str(),
            "recurrenceEndDate": recurrence_end.map(|d| d.format("%Y-%m-%d").to_string()),
        }),
    )
}

fn handle_list(state: &AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let student_id = match parse_opt_string(req.params.get("studentId")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("studentId {}", m), None),
    };
    let cohort_id = match parse_opt_string(req.params.get("cohortId")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("cohortId {}", m), None),
    };

    let mut sql = String::from(
        "SELECT a.id, a.student_id, s.first_name || ' ' || s.last_name,
                a.class_id, a.event_type, a.event_title, a.location,
                a.start_time, a.duration, a.end_time,
                a.recurrence, a.recurrence_end_date,
                a.notes, a.responsible_party, a.point_of_contact
         FROM assignments a
         JOIN students s ON s.id = a.student_id
         WHERE a.active = 1 AND s.active = 1",
    );
    let mut args: Vec<String> = Vec::new();
    if let Some(sid) = &student_id {
        sql.push_str(" AND a.student_id = ?");
        args.push(sid.clone());
    }
    if let Some(cid) = &cohort_id {
        sql.push_str(" AND s.cohort_id = ?");
        args.push(cid.clone());
    }
    if let Some(date_raw) = req.params.get("date").and_then(|v| v.as_str()) {
        let date = match schedule::parse_date(date_raw) {
            Ok(d) => d,
            Err(e) => return validation_err(req, e),
        };
        let tz_raw = req
            .params
            .get("timezone")
            .and_then(|v| v.as_str())
            .unwrap_or("UTC");
        let tz = match schedule::parse_timezone(tz_raw) {
            Ok(t) => t,
            Err(e) => return validation_err(req, e),
        };
        let (day_start, day_end) = schedule::day_bounds_utc(date, tz);
        sql.push_str(" AND a.start_time >= ? AND a.start_time < ?");
        args.push(schedule::fmt_instant(&day_start));
        args.push(schedule::fmt_instant(&day_end));
    }
    sql.push_str(" ORDER BY a.start_time, a.id");

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let assignments = match stmt.query_map(params_from_iter(args.iter()), assignment_row_json) {
        Ok(rows) => match rows.collect::<Result<Vec<_>, _>>() {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        },
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(&req.id, json!({ "assignments": assignments }))
}

pub fn assignment_row_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "studentId": r.get::<_, String>(1)?,
        "studentName": r.get::<_, String>(2)?,
        "classId": r.get::<_, Option<String>>(3)?,
        "eventType": r.get::<_, String>(4)?,
        "eventTitle": r.get::<_, String>(5)?,
        "location": r.get::<_, String>(6)?,
        "startTime": r.get::<_, String>(7)?,
        "duration": r.get::<_, i64>(8)?,
        "endTime": r.get::<_, String>(9)?,
        "recurrence": r.get::<_, String>(10)?,
        "recurrenceEndDate": r.get::<_, Option<String>>(11)?,
        "notes": r.get::<_, Option<String>>(12)?,
        "responsibleParty": r.get::<_, String>(13)?,
        "pointOfContact": r.get::<_, Option<String>>(14)?,
    }))
}

const IMMUTABLE_KEYS: [&str; 5] = [
    "startTime",
    "endTime",
    "duration",
    "recurrence",
    "recurrenceEndDate",
];

fn handle_update(state: &AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let assignment_id = match required_str(req, "assignmentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing patch", None);
    };

    // The window and recurrence are fixed at creation; rescheduling means
    // deactivating this record and creating a new one.
    for key in IMMUTABLE_KEYS {
        if patch.contains_key(key) {
            return err(
                &req.id,
                "window_immutable",
                format!("{} cannot be changed; deactivate and recreate instead", key),
                None,
            );
        }
    }

    let exists = match conn
        .query_row(
            "SELECT 1 FROM assignments WHERE id = ? AND active = 1",
            params![assignment_id],
            |_r| Ok(()),
        )
        .optional()
    {
        Ok(v) => v.is_some(),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if !exists {
        return err(&req.id, "not_found", "assignment not found", None);
    }

    // Validate the whole patch before touching the row, then apply it as one
    // statement. A bad field must not leave earlier fields written.
    let mut sets: Vec<String> = Vec::new();
    let mut values: Vec<SqlValue> = Vec::new();
    for (key, column) in [
        ("eventTitle", "event_title"),
        ("location", "location"),
        ("responsibleParty", "responsible_party"),
    ] {
        if let Some(v) = patch.get(key) {
            let value = match v.as_str().map(|s| s.trim()) {
                Some(s) if !s.is_empty() => s.to_string(),
                _ => {
                    return err(&req.id, "bad_params", format!("patch.{} must not be empty", key), None)
                }
            };
            sets.push(format!("{} = ?", column));
            values.push(SqlValue::Text(value));
        }
    }
    for (key, column) in [("notes", "notes"), ("pointOfContact", "point_of_contact")] {
        if patch.contains_key(key) {
            let value = match parse_opt_string(patch.get(key)) {
                Ok(v) => v,
                Err(m) => return err(&req.id, "bad_params", format!("patch.{} {}", key, m), None),
            };
            sets.push(format!("{} = ?", column));
            values.push(value.map_or(SqlValue::Null, SqlValue::Text));
        }
    }

    if !sets.is_empty() {
        sets.push("updated_at = ?".to_string());
        values.push(SqlValue::Text(now_ts()));
        values.push(SqlValue::Text(assignment_id.clone()));
        let sql = format!("UPDATE assignments SET {} WHERE id = ?", sets.join(", "));
        if let Err(e) = conn.execute(&sql, params_from_iter(values)) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }

    ok(&req.id, json!({ "assignmentId": assignment_id }))
}

fn handle_deactivate(state: &AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let assignment_id = match required_str(req, "assignmentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let changed = match conn.execute(
        "UPDATE assignments SET active = 0, updated_at = ? WHERE id = ?",
        params![now_ts(), assignment_id],
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    if changed == 0 {
        return err(&req.id, "not_found", "assignment not found", None);
    }
    ok(&req.id, json!({ "assignmentId": assignment_id }))
}

fn handle_import(state: &AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let csv = match required_str(req, "csv") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let source = match parse_opt_string(req.params.get("source")) {
        Ok(v) => v.unwrap_or_else(|| "csv".to_string()),
        Err(m) => return err(&req.id, "bad_params", format!("source {}", m), None),
    };
    let skip_duplicates = match parse_bool(req.params.get("skipDuplicates"), false) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("skipDuplicates {}", m), None),
    };

    let parsed = match import::parse_assignment_csv(&csv) {
        Ok(p) => p,
        Err(e) => return err(&req.id, "bad_import", e.to_string(), None),
    };

    let batch_id = Uuid::new_v4().to_string();
    let ts = now_ts();
    let mut imported: i64 = 0;
    let mut skipped: i64 = 0;
    let mut errors: Vec<serde_json::Value> = parsed
        .errors
        .iter()
        .map(|e| json!({ "line": e.line_no, "message": e.message }))
        .collect();

    for row in &parsed.rows {
        let student_id: Option<String> = match conn
            .query_row(
                "SELECT id FROM students WHERE student_no = ? AND active = 1",
                params![row.student_no],
                |r| r.get(0),
            )
            .optional()
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let Some(student_id) = student_id else {
            errors.push(json!({
                "line": row.line_no,
                "message": format!("no active student with student_no {}", row.student_no),
            }));
            continue;
        };

        let start_str = schedule::fmt_instant(&row.window.start_utc);
        if skip_duplicates {
            let dup = match conn
                .query_row(
                    "SELECT 1 FROM assignments
                     WHERE student_id = ? AND start_time = ? AND event_type = ? AND active = 1",
                    params![student_id, start_str, row.event_type],
                    |_r| Ok(()),
                )
                .optional()
            {
                Ok(v) => v.is_some(),
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            };
            if dup {
                skipped += 1;
                continue;
            }
        }

        if let Err(e) = conn.execute(
            "INSERT INTO assignments(
                id, student_id, class_id, event_type, event_title, location,
                start_time, duration, end_time, recurrence, recurrence_end_date,
                notes, responsible_party, point_of_contact,
                import_batch_id, import_source, active, created_at, updated_at
             ) VALUES(?, ?, NULL, ?, ?, ?, ?, ?, ?, 'None', NULL, ?, ?, ?, ?, ?, 1, ?, ?)",
            params![
                Uuid::new_v4().to_string(),
                student_id,
                row.event_type,
                row.event_title,
                row.location,
                start_str,
                row.window.duration_minutes,
                schedule::fmt_instant(&row.window.end_utc),
                row.notes,
                row.responsible_party,
                row.point_of_contact,
                batch_id,
                source,
                ts,
                ts
            ],
        ) {
            return err(&req.id, "db_insert_failed", e.to_string(), None);
        }
        imported += 1;
    }

    ok(
        &req.id,
        json!({
            "batchId": batch_id,
            "imported": imported,
            "skipped": skipped,
            "errors": errors,
        }),
    )
}
