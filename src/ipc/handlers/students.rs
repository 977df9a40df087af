use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, now_ts, parse_bool, parse_opt_string, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_list(state, req)),
        "students.create" => Some(handle_create(state, req)),
        "students.update" => Some(handle_update(state, req)),
        "students.deactivate" => Some(handle_deactivate(state, req)),
        _ => None,
    }
}

fn handle_list(state: &AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let cohort_id = match parse_opt_string(req.params.get("cohortId")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("cohortId {}", m), None),
    };
    let include_inactive = match parse_bool(req.params.get("includeInactive"), false) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("includeInactive {}", m), None),
    };

    let mut sql = String::from(
        "SELECT id, first_name, last_name, email, student_no, grade, cohort_id, notes, active
         FROM students WHERE 1 = 1",
    );
    let mut args: Vec<String> = Vec::new();
    if let Some(cid) = &cohort_id {
        sql.push_str(" AND cohort_id = ?");
        args.push(cid.clone());
    }
    if !include_inactive {
        sql.push_str(" AND active = 1");
    }
    sql.push_str(" ORDER BY last_name, first_name");

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let students = match stmt.query_map(params_from_iter(args.iter()), |r| {
        Ok(json!({
            "id": r.get::<_, String>(0)?,
            "firstName": r.get::<_, String>(1)?,
            "lastName": r.get::<_, String>(2)?,
            "email": r.get::<_, Option<String>>(3)?,
            "studentNo": r.get::<_, Option<String>>(4)?,
            "grade": r.get::<_, Option<String>>(5)?,
            "cohortId": r.get::<_, Option<String>>(6)?,
            "notes": r.get::<_, Option<String>>(7)?,
            "active": r.get::<_, i64>(8)? != 0,
        }))
    }) {
        Ok(rows) => match rows.collect::<Result<Vec<_>, _>>() {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        },
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(&req.id, json!({ "students": students }))
}

fn ensure_cohort_usable(
    conn: &rusqlite::Connection,
    req: &Request,
    cohort_id: &str,
) -> Result<(), serde_json::Value> {
    let active = match conn
        .query_row(
            "SELECT active FROM cohorts WHERE id = ?",
            params![cohort_id],
            |r| r.get::<_, i64>(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return Err(err(&req.id, "db_query_failed", e.to_string(), None)),
    };
    match active {
        None => Err(err(&req.id, "not_found", "cohort not found", None)),
        Some(0) => Err(err(&req.id, "bad_params", "cohort is inactive", None)),
        Some(_) => Ok(()),
    }
}

fn handle_create(state: &AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let first_name = match required_str(req, "firstName") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let last_name = match required_str(req, "lastName") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let email = match parse_opt_string(req.params.get("email")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("email {}", m), None),
    };
    let student_no = match parse_opt_string(req.params.get("studentNo")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("studentNo {}", m), None),
    };
    let grade = match parse_opt_string(req.params.get("grade")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("grade {}", m), None),
    };
    let cohort_id = match parse_opt_string(req.params.get("cohortId")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("cohortId {}", m), None),
    };
    let notes = match parse_opt_string(req.params.get("notes")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("notes {}", m), None),
    };

    if let Some(cid) = &cohort_id {
        if let Err(resp) = ensure_cohort_usable(conn, req, cid) {
            return resp;
        }
    }

    let student_id = Uuid::new_v4().to_string();
    let ts = now_ts();
    if let Err(e) = conn.execute(
        "INSERT INTO students(id, first_name, last_name, email, student_no, grade, cohort_id, notes, active, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)",
        params![student_id, first_name, last_name, email, student_no, grade, cohort_id, notes, ts, ts],
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "studentId": student_id }))
}

fn handle_update(state: &AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing patch", None);
    };

    let exists = match conn
        .query_row(
            "SELECT 1 FROM students WHERE id = ?",
            params![student_id],
            |_r| Ok(()),
        )
        .optional()
    {
        Ok(v) => v.is_some(),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if !exists {
        return err(&req.id, "not_found", "student not found", None);
    }

    // Validate everything first, then write once; a rejected field must not
    // leave earlier fields applied.
    let mut sets: Vec<String> = Vec::new();
    let mut values: Vec<SqlValue> = Vec::new();
    for (key, column) in [("firstName", "first_name"), ("lastName", "last_name")] {
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
    for (key, column) in [
        ("email", "email"),
        ("studentNo", "student_no"),
        ("grade", "grade"),
        ("notes", "notes"),
    ] {
        if patch.contains_key(key) {
            let value = match parse_opt_string(patch.get(key)) {
                Ok(v) => v,
                Err(m) => return err(&req.id, "bad_params", format!("patch.{} {}", key, m), None),
            };
            sets.push(format!("{} = ?", column));
            values.push(value.map_or(SqlValue::Null, SqlValue::Text));
        }
    }
    if patch.contains_key("cohortId") {
        let cohort_id = match parse_opt_string(patch.get("cohortId")) {
            Ok(v) => v,
            Err(m) => return err(&req.id, "bad_params", format!("patch.cohortId {}", m), None),
        };
        if let Some(cid) = &cohort_id {
            if let Err(resp) = ensure_cohort_usable(conn, req, cid) {
                return resp;
            }
        }
        sets.push("cohort_id = ?".to_string());
        values.push(cohort_id.map_or(SqlValue::Null, SqlValue::Text));
    }

    if !sets.is_empty() {
        sets.push("updated_at = ?".to_string());
        values.push(SqlValue::Text(now_ts()));
        values.push(SqlValue::Text(student_id.clone()));
        let sql = format!("UPDATE students SET {} WHERE id = ?", sets.join(", "));
        if let Err(e) = conn.execute(&sql, params_from_iter(values)) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }

    ok(&req.id, json!({ "studentId": student_id }))
}

fn handle_deactivate(state: &AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let changed = match conn.execute(
        "UPDATE students SET active = 0, updated_at = ? WHERE id = ?",
        params![now_ts(), student_id],
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    if changed == 0 {
        return err(&req.id, "not_found", "student not found", None);
    }
    ok(&req.id, json!({ "studentId": student_id }))
}
