use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, now_ts, parse_bool, parse_opt_string, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "cohorts.list" => Some(handle_list(state, req)),
        "cohorts.create" => Some(handle_create(state, req)),
        "cohorts.update" => Some(handle_update(state, req)),
        "cohorts.deactivate" => Some(handle_deactivate(state, req)),
        _ => None,
    }
}

fn handle_list(state: &AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let program_id = match parse_opt_string(req.params.get("programId")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("programId {}", m), None),
    };
    let include_inactive = match parse_bool(req.params.get("includeInactive"), false) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("includeInactive {}", m), None),
    };

    let mut sql = String::from(
        "SELECT c.id, c.program_id, c.name, c.description, c.active,
            (SELECT COUNT(*) FROM students s WHERE s.cohort_id = c.id AND s.active = 1) AS student_count
         FROM cohorts c WHERE 1 = 1",
    );
    let mut args: Vec<String> = Vec::new();
    if let Some(pid) = &program_id {
        sql.push_str(" AND c.program_id = ?");
        args.push(pid.clone());
    }
    if !include_inactive {
        sql.push_str(" AND c.active = 1");
    }
    sql.push_str(" ORDER BY c.name");

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let cohorts = match stmt.query_map(rusqlite::params_from_iter(args.iter()), |r| {
        Ok(json!({
            "id": r.get::<_, String>(0)?,
            "programId": r.get::<_, String>(1)?,
            "name": r.get::<_, String>(2)?,
            "description": r.get::<_, Option<String>>(3)?,
            "active": r.get::<_, i64>(4)? != 0,
            "studentCount": r.get::<_, i64>(5)?,
        }))
    }) {
        Ok(rows) => match rows.collect::<Result<Vec<_>, _>>() {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        },
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(&req.id, json!({ "cohorts": cohorts }))
}

fn handle_create(state: &AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let program_id = match required_str(req, "programId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let description = match parse_opt_string(req.params.get("description")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("description {}", m), None),
    };

    let program_active = match conn
        .query_row(
            "SELECT active FROM programs WHERE id = ?",
            params![program_id],
            |r| r.get::<_, i64>(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    match program_active {
        None => return err(&req.id, "not_found", "program not found", None),
        Some(0) => return err(&req.id, "bad_params", "program is inactive", None),
        Some(_) => {}
    }

    let cohort_id = Uuid::new_v4().to_string();
    let ts = now_ts();
    if let Err(e) = conn.execute(
        "INSERT INTO cohorts(id, program_id, name, description, active, created_at, updated_at)
         VALUES(?, ?, ?, ?, 1, ?, ?)",
        params![cohort_id, program_id, name, description, ts, ts],
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "cohortId": cohort_id }))
}

fn handle_update(state: &AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let cohort_id = match required_str(req, "cohortId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing patch", None);
    };

    let exists = match conn
        .query_row(
            "SELECT 1 FROM cohorts WHERE id = ?",
            params![cohort_id],
            |_r| Ok(()),
        )
        .optional()
    {
        Ok(v) => v.is_some(),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if !exists {
        return err(&req.id, "not_found", "cohort not found", None);
    }

    // Whole patch validated up front, applied in one statement.
    let mut sets: Vec<String> = Vec::new();
    let mut values: Vec<SqlValue> = Vec::new();
    if let Some(v) = patch.get("name") {
        let name = match v.as_str().map(|s| s.trim()) {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => return err(&req.id, "bad_params", "patch.name must not be empty", None),
        };
        sets.push("name = ?".to_string());
        values.push(SqlValue::Text(name));
    }
    if patch.contains_key("description") {
        let description = match parse_opt_string(patch.get("description")) {
            Ok(v) => v,
            Err(m) => return err(&req.id, "bad_params", format!("patch.description {}", m), None),
        };
        sets.push("description = ?".to_string());
        values.push(description.map_or(SqlValue::Null, SqlValue::Text));
    }

    if !sets.is_empty() {
        sets.push("updated_at = ?".to_string());
        values.push(SqlValue::Text(now_ts()));
        values.push(SqlValue::Text(cohort_id.clone()));
        let sql = format!("UPDATE cohorts SET {} WHERE id = ?", sets.join(", "));
        if let Err(e) = conn.execute(&sql, params_from_iter(values)) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }

    ok(&req.id, json!({ "cohortId": cohort_id }))
}

fn handle_deactivate(state: &AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let cohort_id = match required_str(req, "cohortId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let changed = match conn.execute(
        "UPDATE cohorts SET active = 0, updated_at = ? WHERE id = ?",
        params![now_ts(), cohort_id],
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    if changed == 0 {
        return err(&req.id, "not_found", "cohort not found", None);
    }
    ok(&req.id, json!({ "cohortId": cohort_id }))
}
